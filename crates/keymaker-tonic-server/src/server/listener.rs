//! TLS accept loop and connection admission.
//!
//! Every TCP connection goes through an explicit TLS handshake and, when the
//! drone asks for client certificates, through [`authorize_connection`]
//! before tonic ever sees it. Connections that fail either step are closed
//! here, so no request from an unauthorized peer is ever read.
//!
//! Admission runs on its own task per connection; a slow or stalled peer
//! cannot hold up the accept loop and is dropped after the handshake timeout.

use crate::server::{
    service::stats::{ConnectionGuard, DroneStats},
    telemetry::increment_rejected_connections,
};
use core::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use keymaker_tonic_core::{
    Authorization, ClientAuthorizationPolicy, Error, Result, authorize_connection,
};
use pin_project_lite::pin_project;
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_rustls::{TlsAcceptor, server::TlsStream};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Connected;

/// Upper bound on the TLS handshake of a single connection.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// Admitted connections waiting for tonic to pick them up.
const ADMITTED_BACKLOG: usize = 64;

// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Identity of an admitted peer, available to handlers as a request
/// extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroneConnectInfo {
    pub peer_addr: SocketAddr,
    /// The authorized certificate Common Name. `None` when the drone does not
    /// request client certificates.
    pub common_name: Option<String>,
}

pin_project! {
    /// A TLS connection that passed the handshake and authorization.
    pub struct DroneConnection {
        #[pin]
        stream: TlsStream<TcpStream>,
        info: DroneConnectInfo,
        _open: ConnectionGuard,
    }
}

impl Connected for DroneConnection {
    type ConnectInfo = DroneConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.info.clone()
    }
}

impl AsyncRead for DroneConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().stream.poll_read(cx, buf)
    }
}

impl AsyncWrite for DroneConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}

/// Handshake and authorization for incoming connections.
pub struct Gatekeeper {
    acceptor: TlsAcceptor,
    /// `None` when client certificates are never requested.
    policy: Option<ClientAuthorizationPolicy>,
    stats: Arc<DroneStats>,
    handshake_timeout: Duration,
}

impl Gatekeeper {
    pub fn new(
        acceptor: TlsAcceptor,
        policy: Option<ClientAuthorizationPolicy>,
        stats: Arc<DroneStats>,
    ) -> Self {
        Self {
            acceptor,
            policy,
            stats,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    pub const fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Runs the TLS handshake and the authorization check.
    ///
    /// # Errors
    ///
    /// - [`Error::Handshake`] if the handshake fails or times out.
    /// - [`Error::Authorization`] if the peer's certificate is not allowed.
    pub async fn admit(&self, tcp: TcpStream, peer_addr: SocketAddr) -> Result<DroneConnection> {
        let handshake = timeout(self.handshake_timeout, self.acceptor.accept(tcp)).await;
        let mut stream = match handshake {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.reject(Error::Handshake(format!("{peer_addr}: {e}")))),
            Err(_) => {
                return Err(self.reject(Error::Handshake(format!(
                    "{peer_addr}: timed out after {:?}",
                    self.handshake_timeout
                ))));
            }
        };

        let common_name = match &self.policy {
            None => None,
            Some(policy) => {
                let certificates = stream.get_ref().1.peer_certificates().unwrap_or_default();
                match authorize_connection(certificates, policy) {
                    Authorization::Authorized { common_name } => Some(common_name),
                    Authorization::Rejected { reason } => {
                        // Best effort close_notify; the peer is gone either way.
                        let _ = stream.shutdown().await;
                        return Err(self.reject(Error::Authorization(format!(
                            "{peer_addr}: {reason}"
                        ))));
                    }
                }
            }
        };

        Ok(DroneConnection {
            stream,
            info: DroneConnectInfo {
                peer_addr,
                common_name,
            },
            _open: self.stats.open_connection(),
        })
    }

    fn reject(&self, err: Error) -> Error {
        self.stats.record_rejected_connection();
        increment_rejected_connections();
        err
    }
}

/// Accepts connections until `stop` is cancelled and yields the admitted ones.
///
/// The returned stream ends once the accept loop and every pending admission
/// have finished.
pub fn admitted_connections(
    listener: TcpListener,
    gatekeeper: Arc<Gatekeeper>,
    stop: CancellationToken,
) -> ReceiverStream<io::Result<DroneConnection>> {
    let (tx, rx) = mpsc::channel(ADMITTED_BACKLOG);

    tokio::spawn(async move {
        loop {
            let (tcp, peer_addr) = tokio::select! {
                () = stop.cancelled() => break,
                () = tx.closed() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("accept failed: {}", _e);
                        sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            let gatekeeper = Arc::clone(&gatekeeper);
            let tx = tx.clone();
            tokio::spawn(async move {
                match gatekeeper.admit(tcp, peer_addr).await {
                    Ok(connection) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            "admitted {} (cn: {:?})",
                            connection.info.peer_addr,
                            connection.info.common_name
                        );
                        let _ = tx.send(Ok(connection)).await;
                    }
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("{}", _e);
                    }
                }
            });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("accept loop stopped");
    });

    ReceiverStream::new(rx)
}
