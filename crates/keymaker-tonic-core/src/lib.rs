#![doc = include_str!("../README.md")]

mod common;
pub mod proto;
#[cfg(test)]
mod testdata;

pub use common::*;
// Public re-exports so downstream crates share one version of each.
pub use keymaker;
pub use rustls;
