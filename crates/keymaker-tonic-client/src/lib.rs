#![doc = include_str!("../README.md")]

pub mod client;

pub use client::{
    Client,
    config::{ClientConfig, DEFAULT_BUFFER_SIZE},
    stream::KeyStream,
};
pub use keymaker_tonic_core;
