//! PEM fixtures shared by the unit tests.

macro_rules! fixture {
    ($name:literal) => {
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../testdata/", $name))
    };
}

pub const CA_CERT: &[u8] = fixture!("ca.pem");
pub const DRONE_CERT: &[u8] = fixture!("drone.pem");
pub const DRONE_KEY: &[u8] = fixture!("drone-key.pem");
pub const DRONE_CLIENT_CERT: &[u8] = fixture!("drone-client.pem");
pub const DRONE_CLIENT_KEY: &[u8] = fixture!("drone-client-key.pem");
pub const OTHER_CLIENT_CERT: &[u8] = fixture!("other-client.pem");
pub const ROGUE_CLIENT_CERT: &[u8] = fixture!("rogue-client.pem");
