#![doc = include_str!("../README.md")]

mod algorithm;
mod error;
mod key;
mod shutdown;

pub use crate::algorithm::*;
pub use crate::error::*;
pub use crate::key::*;
pub use crate::shutdown::*;
