//! Drone lifecycle: `Drone` (configured) → `ListeningDrone` (bound) → served
//! until a shutdown signal, then drained through tonic's graceful shutdown.

use crate::server::{
    config::DroneConfig,
    listener::{Gatekeeper, admitted_connections},
    service::{handler::DroneService, stats::DroneStats},
};
use core::future::Future;
use keymaker_tonic_core::{
    ClientAuthorizationPolicy, Error, Result, TlsMaterial, build_server_tls,
    keymaker::ShutdownToken, proto::drone_server::DroneServer,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tonic::{codec::CompressionEncoding, transport::Server};

/// A validated drone with its TLS identity built, not yet listening.
pub struct Drone {
    config: DroneConfig,
    gatekeeper: Gatekeeper,
    service: DroneService,
}

impl Drone {
    /// Builds the TLS identity and the authorization policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unusable TLS material, an invalid CN
    /// expression, or a CN expression combined with a client-auth mode that
    /// never asks for certificates.
    pub fn new(config: DroneConfig, material: &TlsMaterial) -> Result<Self> {
        let tls = build_server_tls(material, config.client_auth)?;

        let pattern = config.client_cn_regexp.as_deref().filter(|p| !p.is_empty());
        let policy = if config.client_auth.requests_certificate() {
            Some(ClientAuthorizationPolicy::new(pattern)?)
        } else if pattern.is_some() {
            return Err(Error::Config(format!(
                "a client CN expression needs client certificates, but client auth is {}",
                config.client_auth
            )));
        } else {
            None
        };

        let stats = Arc::new(DroneStats::default());
        let gatekeeper = Gatekeeper::new(TlsAcceptor::from(tls), policy, Arc::clone(&stats));
        let service = DroneService::new(config.concurrency, stats);

        Ok(Self {
            config,
            gatekeeper,
            service,
        })
    }

    pub fn config(&self) -> &DroneConfig {
        &self.config
    }

    pub fn concurrency(&self) -> usize {
        self.service.concurrency()
    }

    pub fn stats(&self) -> Arc<DroneStats> {
        Arc::clone(self.service.stats())
    }

    /// Overrides the TLS handshake deadline.
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.gatekeeper = self.gatekeeper.with_handshake_timeout(handshake_timeout);
        self
    }

    /// Binds the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the address cannot be bound.
    pub async fn bind(self) -> Result<ListeningDrone> {
        let listener = TcpListener::bind(&self.config.address)
            .await
            .map_err(|e| Error::Config(format!("binding {}: {e}", self.config.address)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Config(format!("resolving {}: {e}", self.config.address)))?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            "drone listening on {} ({} generation permits, client auth {})",
            local_addr,
            self.service.concurrency(),
            self.config.client_auth
        );

        Ok(ListeningDrone {
            listener,
            local_addr,
            gatekeeper: Arc::new(self.gatekeeper),
            service: self.service,
        })
    }
}

/// A drone bound to its listen address.
pub struct ListeningDrone {
    listener: TcpListener,
    local_addr: SocketAddr,
    gatekeeper: Arc<Gatekeeper>,
    service: DroneService,
}

impl ListeningDrone {
    /// The bound address; useful when listening on port 0.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<DroneStats> {
        Arc::clone(self.service.stats())
    }

    /// Serves until `signal` completes, then stops accepting connections and
    /// waits for in-flight requests to finish. Requests still queued for a
    /// generation permit at that point are answered `KEY_GEN_FAILED`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the gRPC server fails.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let stop = CancellationToken::new();
        let incoming = admitted_connections(self.listener, self.gatekeeper, stop.clone());

        let service = self.service.clone();
        let shutdown = async move {
            signal.await;
            #[cfg(feature = "tracing")]
            tracing::info!("drone draining");
            stop.cancel();
            service.close();
        };

        Server::builder()
            .http2_adaptive_window(Some(true))
            .add_service(build_drone_service(self.service))
            .serve_with_incoming_shutdown(incoming, shutdown)
            .await?;

        #[cfg(feature = "tracing")]
        tracing::info!("drone stopped");
        Ok(())
    }

    /// Serves until `token` is touched.
    ///
    /// # Errors
    ///
    /// See [`serve_with_shutdown`](Self::serve_with_shutdown).
    pub async fn serve(self, token: ShutdownToken) -> Result<()> {
        self.serve_with_shutdown(async move { token.stopped().await })
            .await
    }
}

fn build_drone_service(service: DroneService) -> DroneServer<DroneService> {
    DroneServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
}
