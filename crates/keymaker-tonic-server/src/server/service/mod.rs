pub mod handler;
pub mod stats;
