//! Cluster client: bounded key streams fed round-robin by a set of drones.

pub mod config;
pub mod connector;
pub mod stream;
pub mod telemetry;

use crate::client::{
    config::ClientConfig,
    connector::DroneHandle,
    stream::{KeyStream, Rotation, spawn_producer},
};
use keymaker_tonic_core::{
    Result, TlsMaterial, build_client_tls,
    keymaker::{Algorithm, ShutdownToken, check_algorithm},
};
use std::sync::Arc;

/// A handle to a drone cluster. Clones share the drones and the shutdown
/// token.
#[derive(Clone)]
pub struct Client {
    rotation: Arc<Rotation>,
    buffer_size: usize,
    key_types: Arc<[Algorithm]>,
    token: ShutdownToken,
}

impl Client {
    /// Validates `config`, builds the TLS identity and prepares one lazy
    /// channel per drone. No connection is attempted until a stream asks for
    /// a key. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](keymaker_tonic_core::Error::Config) for an empty
    ///   drone set, a zero buffer size, unusable TLS material or an address
    ///   without a host.
    /// - [`Error::Key`](keymaker_tonic_core::Error::Key) for a configured key
    ///   type that is not registered.
    pub fn open(config: ClientConfig, material: &TlsMaterial) -> Result<Self> {
        let key_types = config.validate()?;
        let tls = build_client_tls(material)?;
        let drones = config
            .addresses
            .iter()
            .map(|address| DroneHandle::new(address, Arc::clone(&tls)))
            .collect::<Result<Vec<_>>>()?;

        #[cfg(feature = "tracing")]
        tracing::debug!("client opened for drones {:?}", config.addresses);

        Ok(Self {
            rotation: Arc::new(Rotation::new(drones)),
            buffer_size: config.buffer_size,
            key_types: key_types.into(),
            token: ShutdownToken::new(),
        })
    }

    /// Starts an independent, endless stream of `key_type` keys.
    ///
    /// Every call starts a new producer; streams for the same type do not
    /// share a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Key`](keymaker_tonic_core::Error::Key) wrapping
    /// `InvalidAlgorithm` if `key_type` is not registered. Nothing is sent.
    pub fn generate(&self, key_type: &str) -> Result<KeyStream> {
        let algorithm = check_algorithm(key_type)?;
        Ok(self.generate_algorithm(algorithm))
    }

    pub fn generate_algorithm(&self, algorithm: Algorithm) -> KeyStream {
        spawn_producer(
            algorithm,
            self.buffer_size,
            Arc::clone(&self.rotation),
            self.token.clone(),
        )
    }

    /// Stops every stream of this client and its clones and closes the
    /// connections to the drones. Idempotent.
    ///
    /// Producers exit at their next wait; keys already buffered can still be
    /// drained, after which each stream ends. Streams started after `stop`
    /// end immediately.
    pub fn stop(&self) {
        if self.token.touch() {
            self.rotation.close();
            #[cfg(feature = "tracing")]
            tracing::debug!("client stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.token.is_running()
    }

    /// The token touched by [`stop`](Self::stop), for reporters and other
    /// tasks that should end with the client.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// Key types validated at [`open`](Self::open).
    pub fn key_types(&self) -> &[Algorithm] {
        &self.key_types
    }

    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.rotation.addresses()
    }
}

impl core::fmt::Debug for Client {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("addresses", &self.addresses().collect::<Vec<_>>())
            .field("buffer_size", &self.buffer_size)
            .field("key_types", &self.key_types)
            .field("running", &self.is_running())
            .finish()
    }
}
