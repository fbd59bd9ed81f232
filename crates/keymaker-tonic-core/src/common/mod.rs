//! Types shared by the drone server and the cluster client.
//!
//! - [`error`] - the shared [`Error`](error::Error) and its gRPC mapping.
//! - [`tls`] - rustls configuration from PEM material.
//! - [`auth`] - Common Name authorization of client certificates.

pub mod auth;
pub mod error;
pub mod tls;

pub use auth::*;
pub use error::*;
pub use tls::*;
