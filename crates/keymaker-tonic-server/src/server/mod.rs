pub mod config;
pub mod drone;
pub mod listener;
pub mod service;
pub mod telemetry;

pub use config::{CliArgs, DEFAULT_ADDRESS, DroneConfig};
pub use drone::{Drone, ListeningDrone};
pub use listener::{DroneConnectInfo, HANDSHAKE_TIMEOUT};
pub use service::{
    handler::DroneService,
    stats::{DroneStats, StatsSnapshot},
};
