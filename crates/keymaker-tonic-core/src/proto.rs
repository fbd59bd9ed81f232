//! Wire types for the `keymaker.Drone` service.
//!
//! The protobuf schema, for reference:
//!
//! ```text
//! package keymaker;
//!
//! service Drone {
//!   rpc GenerateKey(KeyRequest) returns (KeyResponse);
//! }
//!
//! message KeyRequest {
//!   string key_type = 1;
//! }
//!
//! message KeyResponse {
//!   optional bytes key = 1;
//!   KeyStatus status = 2;
//!   string message = 3;
//! }
//!
//! enum KeyStatus {
//!   OK = 0;
//!   BAD_REQUEST = 1;
//!   KEY_GEN_FAILED = 2;
//! }
//! ```
//!
//! Service stubs are generated at build time into `drone_server` and
//! `drone_client`.

use bytes::Bytes;
use core::fmt;

include!(concat!(env!("OUT_DIR"), "/keymaker.Drone.rs"));

/// Asks a drone for one freshly generated key.
#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct KeyRequest {
    /// A registered algorithm identifier such as `RSA2048` or `ECDSA256`.
    #[prost(string, tag = "1")]
    pub key_type: String,
}

/// A drone's answer to a [`KeyRequest`].
///
/// `key` holds a PKCS#8 PEM block if and only if the status is
/// [`KeyStatus::Ok`].
#[derive(Clone, PartialEq, prost::Message)]
#[prost(skip_debug)]
pub struct KeyResponse {
    #[prost(bytes = "bytes", optional, tag = "1")]
    pub key: Option<Bytes>,
    #[prost(enumeration = "KeyStatus", tag = "2")]
    pub status: i32,
    #[prost(string, tag = "3")]
    pub message: String,
}

/// Outcome of a single key request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum KeyStatus {
    Ok = 0,
    BadRequest = 1,
    KeyGenFailed = 2,
}

impl KeyRequest {
    pub fn new(key_type: impl Into<String>) -> Self {
        Self {
            key_type: key_type.into(),
        }
    }
}

impl KeyResponse {
    /// A successful response carrying `pem`.
    pub fn issued(pem: impl Into<Bytes>) -> Self {
        Self {
            key: Some(pem.into()),
            status: KeyStatus::Ok as i32,
            message: String::new(),
        }
    }

    /// A failed response. Never carries key bytes.
    pub fn rejected(status: KeyStatus, message: impl Into<String>) -> Self {
        Self {
            key: None,
            status: status as i32,
            message: message.into(),
        }
    }

    /// Returns the key bytes when the response is a well-formed success.
    pub fn into_key(self) -> Option<Bytes> {
        match KeyStatus::try_from(self.status) {
            Ok(KeyStatus::Ok) => self.key.filter(|key| !key.is_empty()),
            _ => None,
        }
    }
}

impl KeyStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "BAD_REQUEST",
            Self::KeyGenFailed => "KEY_GEN_FAILED",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Key bytes stay out of logs; only their length is shown.
impl fmt::Debug for KeyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResponse")
            .field("key_len", &self.key.as_ref().map(Bytes::len))
            .field("status", &self.status())
            .field("message", &self.message)
            .finish()
    }
}
