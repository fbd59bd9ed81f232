//! Producers that keep a bounded key stream topped up from the cluster.
//!
//! Each [`KeyStream`] owns one producer task. The producer walks the drone
//! set round-robin, one `GenerateKey` request at a time, and pushes every
//! issued key into a channel of `buffer_size` slots. A full channel blocks
//! the producer; that is the only flow control between drones and consumer.
//!
//! Failed attempts move on to the next drone. After a full rotation without
//! a key the producer sleeps, doubling the pause from [`INITIAL_BACKOFF`] up
//! to [`MAX_BACKOFF`]. Every wait (the request, the backoff, the full
//! channel) also ends when the client's shutdown token is touched.
//!
//! Stopping the client empties the [`Rotation`], dropping every channel and
//! with it the connection to each drone.

use crate::client::connector::DroneHandle;
use bytes::Bytes;
use core::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use keymaker_tonic_core::{
    Error, Result,
    keymaker::{Algorithm, ShutdownToken},
    proto::{KeyRequest, KeyStatus},
};
use parking_lot::RwLock;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{sync::mpsc, time::sleep};
use tokio_stream::{Stream, wrappers::ReceiverStream};

/// First pause after a rotation in which every drone failed.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Longest pause between rotations.
pub const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// An endless stream of PEM-encoded PKCS#8 keys of one algorithm.
///
/// Ends only after the owning client is stopped. At most `buffer_size` keys
/// are held ahead of the consumer.
pub struct KeyStream {
    algorithm: Algorithm,
    capacity: usize,
    inner: ReceiverStream<Bytes>,
}

impl KeyStream {
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Keys generated but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.inner.as_ref().len()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Stream for KeyStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.buffered(), None)
    }
}

impl core::fmt::Debug for KeyStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyStream")
            .field("algorithm", &self.algorithm)
            .field("buffered", &self.buffered())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// The drone set shared by every producer of a client.
pub(crate) struct Rotation {
    addresses: Box<[Arc<str>]>,
    /// `None` once the client has stopped.
    drones: RwLock<Option<Box<[DroneHandle]>>>,
    next: AtomicUsize,
}

impl Rotation {
    pub(crate) fn new(drones: Vec<DroneHandle>) -> Self {
        Self {
            addresses: drones.iter().map(|d| Arc::from(d.address())).collect(),
            drones: RwLock::new(Some(drones.into_boxed_slice())),
            next: AtomicUsize::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.addresses.len()
    }

    pub(crate) fn addresses(&self) -> impl Iterator<Item = &str> {
        self.addresses.iter().map(|address| &**address)
    }

    /// The next drone in turn, or `None` after [`close`](Self::close).
    fn pick(&self) -> Option<DroneHandle> {
        let drones = self.drones.read();
        let drones = drones.as_deref().filter(|d| !d.is_empty())?;
        let i = self.next.fetch_add(1, Ordering::Relaxed) % drones.len();
        Some(drones[i].clone())
    }

    /// Drops every channel. Requests already in flight keep their own handle
    /// until they finish or are abandoned.
    pub(crate) fn close(&self) {
        self.drones.write().take();
    }
}

/// Starts the producer for `algorithm` and returns its consumer side.
pub(crate) fn spawn_producer(
    algorithm: Algorithm,
    buffer_size: usize,
    rotation: Arc<Rotation>,
    token: ShutdownToken,
) -> KeyStream {
    let (tx, rx) = mpsc::channel(buffer_size);
    tokio::spawn(produce(algorithm, rotation, tx, token));
    KeyStream {
        algorithm,
        capacity: buffer_size,
        inner: ReceiverStream::new(rx),
    }
}

async fn produce(
    algorithm: Algorithm,
    rotation: Arc<Rotation>,
    tx: mpsc::Sender<Bytes>,
    token: ShutdownToken,
) {
    let mut backoff = INITIAL_BACKOFF;
    let mut failures = 0;

    while token.is_running() {
        let Some(drone) = rotation.pick() else {
            break;
        };
        let attempt = tokio::select! {
            () = token.stopped() => break,
            () = tx.closed() => break,
            attempt = request_key(&drone, algorithm) => attempt,
        };

        match attempt {
            Ok(key) => {
                failures = 0;
                backoff = INITIAL_BACKOFF;
                tokio::select! {
                    () = token.stopped() => break,
                    sent = tx.send(key) => if sent.is_err() {
                        // Consumer dropped the stream.
                        break;
                    },
                }
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("{} from {} failed: {}", algorithm, drone.address(), _e);

                failures += 1;
                if failures >= rotation.len() {
                    failures = 0;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "no drone issued {} in a full rotation, retrying in {:?}",
                        algorithm,
                        backoff
                    );
                    tokio::select! {
                        () = token.stopped() => break,
                        () = sleep(backoff) => {}
                    }
                    backoff = next_backoff(backoff);
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("{} producer stopped", algorithm);
}

fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}

/// One `GenerateKey` exchange with a single drone.
async fn request_key(drone: &DroneHandle, algorithm: Algorithm) -> Result<Bytes> {
    let response = drone
        .client()
        .generate_key(KeyRequest::new(algorithm.name()))
        .await?
        .into_inner();

    let status = KeyStatus::try_from(response.status).map_err(|_| Error::Drone {
        status: KeyStatus::KeyGenFailed,
        message: format!("unknown status {}", response.status),
    })?;
    match response.key {
        Some(key) if status == KeyStatus::Ok && !key.is_empty() => Ok(key),
        _ if status == KeyStatus::Ok => Err(Error::Drone {
            status,
            message: "OK response without a key".to_string(),
        }),
        _ => Err(Error::Drone {
            status,
            message: response.message,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymaker_tonic_core::{TlsMaterial, build_client_tls};
    use std::path::Path;

    fn rotation(addresses: &[&str]) -> Rotation {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../testdata");
        let read = |name: &str| std::fs::read(dir.join(name)).unwrap();
        let tls = build_client_tls(&TlsMaterial::new(
            read("drone-client.pem"),
            read("drone-client-key.pem"),
            read("ca.pem"),
        ))
        .unwrap();
        let drones = addresses
            .iter()
            .map(|address| DroneHandle::new(address, Arc::clone(&tls)).unwrap())
            .collect();
        Rotation::new(drones)
    }

    #[tokio::test]
    async fn rotation_picks_round_robin() {
        let rotation = rotation(&["127.0.0.1:1", "127.0.0.1:2", "127.0.0.1:3"]);
        let picked: Vec<_> = (0..6)
            .map(|_| rotation.pick().unwrap().address().to_string())
            .collect();
        assert_eq!(picked[..3], ["127.0.0.1:1", "127.0.0.1:2", "127.0.0.1:3"]);
        assert_eq!(picked[..3], picked[3..]);
    }

    #[tokio::test]
    async fn closed_rotation_hands_out_nothing() {
        let rotation = rotation(&["127.0.0.1:1", "127.0.0.1:2"]);
        rotation.close();
        rotation.close();
        assert!(rotation.pick().is_none());
        // Addresses outlive the channels.
        assert_eq!(rotation.len(), 2);
        assert_eq!(rotation.addresses().collect::<Vec<_>>(), ["127.0.0.1:1", "127.0.0.1:2"]);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        assert_eq!(next_backoff(INITIAL_BACKOFF), Duration::from_millis(100));
        assert_eq!(next_backoff(Duration::from_millis(1500)), MAX_BACKOFF);
        assert_eq!(next_backoff(MAX_BACKOFF), MAX_BACKOFF);

        let mut backoff = INITIAL_BACKOFF;
        let mut steps = 0;
        while backoff < MAX_BACKOFF {
            backoff = next_backoff(backoff);
            steps += 1;
        }
        // 50ms, 100, 200, 400, 800, 1600, 2000
        assert_eq!(steps, 6);
    }
}
