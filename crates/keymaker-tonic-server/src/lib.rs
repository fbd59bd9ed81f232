#![doc = include_str!("../README.md")]

pub mod server;

pub use keymaker_tonic_core;
pub use server::{Drone, DroneConfig, DroneStats, ListeningDrone, StatsSnapshot};
