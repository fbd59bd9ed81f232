//! One lazily connected gRPC channel per drone.
//!
//! tonic drives the HTTP/2 connection; the transport underneath is a TCP
//! stream wrapped in a rustls client session built from the client's TLS
//! identity. tonic re-runs the connector whenever the connection is lost, so
//! reconnection to the same address needs no bookkeeping here.

use core::time::Duration;
use hyper_util::rt::TokioIo;
use keymaker_tonic_core::{
    Error, Result,
    proto::drone_client::DroneClient,
    rustls::{ClientConfig, pki_types::ServerName},
    server_name,
};
use std::{io, sync::Arc};
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream};
use tonic::{
    codec::CompressionEncoding,
    transport::{Channel, Endpoint, Uri},
};

/// TCP connect plus TLS handshake deadline for a single drone.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single `GenerateKey` exchange. RSA-4096 generation on a
/// busy drone is the slow case.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A drone address and the channel used to reach it.
#[derive(Clone)]
pub struct DroneHandle {
    address: Arc<str>,
    client: DroneClient<Channel>,
}

impl DroneHandle {
    /// Prepares a channel to `address` without connecting. Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the address has no usable host name.
    pub fn new(address: &str, tls: Arc<ClientConfig>) -> Result<Self> {
        let connector = TlsDialer {
            address: Arc::from(address),
            server_name: server_name(address)?,
            tls: TlsConnector::from(tls),
        };

        // The scheme only shapes the :scheme pseudo-header; TLS is applied by
        // the dialer.
        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| Error::Config(format!("invalid drone address {address:?}: {e}")))?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);

        let channel = endpoint.connect_with_connector_lazy(tower::service_fn(move |_: Uri| {
            let connector = connector.clone();
            async move { connector.dial().await.map(TokioIo::new) }
        }));

        let client = DroneClient::new(channel)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip);

        Ok(Self {
            address: Arc::from(address),
            client,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// A handle to the shared channel, cheap to clone per request.
    pub fn client(&self) -> DroneClient<Channel> {
        self.client.clone()
    }
}

#[derive(Clone)]
struct TlsDialer {
    address: Arc<str>,
    server_name: ServerName<'static>,
    tls: TlsConnector,
}

impl TlsDialer {
    async fn dial(&self) -> io::Result<TlsStream<TcpStream>> {
        let tcp = TcpStream::connect(&*self.address).await?;
        tcp.set_nodelay(true)?;
        let stream = self.tls.connect(self.server_name.clone(), tcp).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!("connected to drone {}", self.address);
        Ok(stream)
    }
}
