//! End-to-end tests: real drones on ephemeral ports, real mutual TLS.

use core::time::Duration;
use keymaker_tonic_client::{
    Client, ClientConfig,
    client::connector::DroneHandle,
    keymaker_tonic_core::{
        ALPN_H2, ClientAuthMode, Error, TlsMaterial, crypto_provider,
        keymaker::{self, Algorithm, ShutdownToken},
        parse_certificates,
        proto::{KeyRequest, KeyStatus},
        rustls::{self, RootCertStore},
    },
};
use keymaker_tonic_server::{Drone, DroneConfig, DroneStats};
use std::{net::SocketAddr, path::Path, sync::Arc};
use tokio::{
    task::JoinSet,
    time::{sleep, timeout},
};
use tokio_stream::StreamExt;

const PATIENCE: Duration = Duration::from_secs(10);

fn testdata(name: &str) -> Vec<u8> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../testdata");
    std::fs::read(dir.join(name)).unwrap()
}

fn identity(name: &str) -> TlsMaterial {
    TlsMaterial::new(
        testdata(&format!("{name}.pem")),
        testdata(&format!("{name}-key.pem")),
        testdata("ca.pem"),
    )
}

struct RunningDrone {
    addr: SocketAddr,
    stats: Arc<DroneStats>,
    token: ShutdownToken,
}

impl RunningDrone {
    async fn start(config: DroneConfig) -> Self {
        let drone = Drone::new(config, &identity("drone"))
            .unwrap()
            .bind()
            .await
            .unwrap();
        let addr = drone.local_addr();
        let stats = drone.stats();
        let token = ShutdownToken::new();
        tokio::spawn(drone.serve(token.clone()));
        Self { addr, stats, token }
    }

    async fn strict() -> Self {
        Self::start(DroneConfig::new("127.0.0.1:0").with_client_cn_regexp("^drone-client$")).await
    }

    fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for RunningDrone {
    fn drop(&mut self) {
        self.token.touch();
    }
}

fn open_client(addresses: Vec<String>, who: &str, buffer_size: usize) -> Client {
    let config = ClientConfig::new(addresses).with_buffer_size(buffer_size);
    Client::open(config, &identity(who)).unwrap()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let waited = timeout(PATIENCE, async {
        while !check() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// A handle that completes the handshake without a client certificate.
fn anonymous_handle(address: &str) -> DroneHandle {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(&testdata("ca.pem"), "CA bundle").unwrap() {
        roots.add(cert).unwrap();
    }
    let mut tls = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    tls.alpn_protocols = vec![ALPN_H2.to_vec()];
    DroneHandle::new(address, Arc::new(tls)).unwrap()
}

fn assert_ecdsa256(pem: &[u8]) {
    let (key, rest) = keymaker::decode_pem(pem).unwrap();
    assert_eq!(key.algorithm(), Some(Algorithm::Ecdsa256));
    assert!(rest.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn authorized_client_receives_keys() {
    let drone = RunningDrone::strict().await;
    let client = open_client(vec![drone.address()], "drone-client", 8);

    let mut stream = client.generate("ECDSA256").unwrap();
    for _ in 0..3 {
        let pem = timeout(PATIENCE, stream.next()).await.unwrap().unwrap();
        assert_ecdsa256(&pem);
    }
    client.stop();

    let stats = drone.stats.snapshot();
    assert!(stats.keys_issued >= 3);
    assert_eq!(stats.rejected_connections, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mismatched_cn_is_rejected_before_any_request() {
    let drone = RunningDrone::strict().await;
    let intruder = open_client(vec![drone.address()], "other-client", 8);

    let mut stream = intruder.generate("ECDSA256").unwrap();
    eventually("a rejected connection", || {
        drone.stats.snapshot().rejected_connections >= 1
    })
    .await;
    assert!(timeout(Duration::from_millis(300), stream.next()).await.is_err());
    assert_eq!(drone.stats.snapshot().requests, 0);
    intruder.stop();

    // The drone keeps serving authorized clients.
    let client = open_client(vec![drone.address()], "drone-client", 1);
    let mut stream = client.generate("ECDSA256").unwrap();
    let pem = timeout(PATIENCE, stream.next()).await.unwrap().unwrap();
    assert_ecdsa256(&pem);
    client.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn certificate_from_unknown_ca_is_rejected() {
    // Same CN as the authorized client, different issuer.
    let drone = RunningDrone::strict().await;
    let rogue = open_client(vec![drone.address()], "rogue-client", 8);

    let mut stream = rogue.generate("ECDSA256").unwrap();
    eventually("a rejected handshake", || {
        drone.stats.snapshot().rejected_connections >= 1
    })
    .await;
    assert!(timeout(Duration::from_millis(300), stream.next()).await.is_err());
    assert_eq!(drone.stats.snapshot().requests, 0);
    rogue.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_auth_none_accepts_any_handshake() {
    let drone = RunningDrone::start(
        DroneConfig::new("127.0.0.1:0").with_client_auth(ClientAuthMode::None),
    )
    .await;

    // A client certificate the strict drone would refuse.
    let client = open_client(vec![drone.address()], "other-client", 2);
    let mut stream = client.generate("ECDSA256").unwrap();
    let pem = timeout(PATIENCE, stream.next()).await.unwrap().unwrap();
    assert_ecdsa256(&pem);
    client.stop();

    // No client certificate at all.
    let response = anonymous_handle(&drone.address())
        .client()
        .generate_key(KeyRequest::new("ECDSA256"))
        .await
        .unwrap()
        .into_inner();
    assert_ecdsa256(&response.into_key().unwrap());
    assert_eq!(drone.stats.snapshot().rejected_connections, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_auth_request_rejects_missing_certificate() {
    let drone = RunningDrone::start(
        DroneConfig::new("127.0.0.1:0").with_client_auth(ClientAuthMode::Request),
    )
    .await;

    let attempt = timeout(
        PATIENCE,
        anonymous_handle(&drone.address())
            .client()
            .generate_key(KeyRequest::new("ECDSA256")),
    )
    .await
    .unwrap();
    assert!(attempt.is_err());
    eventually("a rejected connection", || {
        drone.stats.snapshot().rejected_connections >= 1
    })
    .await;
    assert_eq!(drone.stats.snapshot().requests, 0);

    // A certificate from any client of the CA is enough without a CN rule.
    let client = open_client(vec![drone.address()], "other-client", 1);
    let mut stream = client.generate("ECDSA256").unwrap();
    let pem = timeout(PATIENCE, stream.next()).await.unwrap().unwrap();
    assert_ecdsa256(&pem);
    client.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unregistered_key_type_is_bad_request() {
    let drone = RunningDrone::strict().await;

    let client = open_client(vec![drone.address()], "drone-client", 1);
    assert!(matches!(
        client.generate("RSA2047"),
        Err(Error::Key(keymaker::Error::InvalidAlgorithm(_)))
    ));

    // Bypass client-side validation to reach the drone.
    let tls = keymaker_tonic_client::keymaker_tonic_core::build_client_tls(&identity(
        "drone-client",
    ))
    .unwrap();
    let handle = DroneHandle::new(&drone.address(), tls).unwrap();
    let response = handle
        .client()
        .generate_key(KeyRequest::new("RSA2047"))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status(), KeyStatus::BadRequest);
    assert!(!response.message.is_empty());
    assert_eq!(response.key, None);

    let stats = drone.stats.snapshot();
    assert_eq!((stats.bad_requests, stats.keys_issued), (1, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn producer_blocks_once_the_buffer_is_full() {
    let a = RunningDrone::strict().await;
    let b = RunningDrone::strict().await;
    let issued = || a.stats.snapshot().keys_issued + b.stats.snapshot().keys_issued;

    let client = open_client(vec![a.address(), b.address()], "drone-client", 8);
    let mut stream = client.generate("ECDSA256").unwrap();
    assert_eq!(stream.capacity(), 8);

    eventually("a full buffer", || stream.buffered() == 8).await;
    sleep(Duration::from_millis(500)).await;
    assert_eq!(stream.buffered(), 8);
    // Eight buffered plus the one the blocked producer is holding.
    assert!(issued() <= 9, "issued {}", issued());

    stream.next().await.unwrap();
    eventually("the buffer to refill", || stream.buffered() == 8).await;
    sleep(Duration::from_millis(500)).await;
    assert!(issued() <= 10, "issued {}", issued());

    // Both drones took part.
    assert!(a.stats.snapshot().keys_issued > 0);
    assert!(b.stats.snapshot().keys_issued > 0);
    client.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_closes_every_stream() {
    let drone = RunningDrone::strict().await;
    let client = open_client(vec![drone.address()], "drone-client", 2);

    let mut ecdsa = client.generate("ECDSA256").unwrap();
    let mut rsa = client.generate("RSA1024").unwrap();
    timeout(PATIENCE, ecdsa.next()).await.unwrap().unwrap();

    let clone = client.clone();
    client.stop();
    clone.stop();
    assert!(!client.is_running());
    assert!(!client.shutdown_token().is_running());

    for stream in [&mut ecdsa, &mut rsa] {
        let drained = timeout(PATIENCE, async {
            let mut left = 0;
            while stream.next().await.is_some() {
                left += 1;
            }
            left
        })
        .await
        .unwrap();
        assert!(drained <= 2);
        assert_eq!(stream.next().await, None);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_closes_drone_connections() {
    let drone = RunningDrone::strict().await;
    let client = open_client(vec![drone.address()], "drone-client", 1);

    let mut stream = client.generate("ECDSA256").unwrap();
    assert_ecdsa256(&timeout(PATIENCE, stream.next()).await.unwrap().unwrap());
    assert_eq!(drone.stats.snapshot().open_connections, 1);

    // The client and its stream stay alive; only `stop` releases the channel.
    client.stop();
    while timeout(PATIENCE, stream.next()).await.unwrap().is_some() {}
    eventually("the drone to see the connection close", || {
        drone.stats.snapshot().open_connections == 0
    })
    .await;

    // A stopped client neither reconnects nor produces.
    let mut late = client.generate("ECDSA256").unwrap();
    assert_eq!(timeout(PATIENCE, late.next()).await.unwrap(), None);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(drone.stats.snapshot().open_connections, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_stream_resumes_when_a_drone_comes_up() {
    let address = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let client = open_client(vec![address.clone()], "drone-client", 2);

    let mut stream = client.generate("ECDSA256").unwrap();
    assert!(timeout(Duration::from_secs(1), stream.next()).await.is_err());

    let drone = RunningDrone::start(
        DroneConfig::new(address).with_client_cn_regexp("^drone-client$"),
    )
    .await;
    let pem = timeout(PATIENCE, stream.next()).await.unwrap().unwrap();
    assert_ecdsa256(&pem);
    assert!(drone.stats.snapshot().keys_issued >= 1);
    client.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_cluster_stalls_until_stopped() {
    // Bind and release a port so nothing listens on it.
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let client = open_client(vec![dead, "127.0.0.1:1".to_string()], "drone-client", 8);

    let mut stream = client.generate("ECDSA256").unwrap();
    assert!(timeout(Duration::from_secs(1), stream.next()).await.is_err());
    assert!(client.is_running());

    client.stop();
    assert_eq!(timeout(PATIENCE, stream.next()).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dead_drone_fails_over_to_live_one() {
    let drone = RunningDrone::strict().await;
    let client = open_client(
        vec!["127.0.0.1:1".to_string(), drone.address()],
        "drone-client",
        4,
    );

    let mut stream = client.generate("ECDSA256").unwrap();
    for _ in 0..4 {
        let pem = timeout(PATIENCE, stream.next()).await.unwrap().unwrap();
        assert_ecdsa256(&pem);
    }
    client.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drone_concurrency_holds_under_load() {
    let drone = RunningDrone::start(
        DroneConfig::new("127.0.0.1:0")
            .with_client_cn_regexp("^drone-client$")
            .with_concurrency(2),
    )
    .await;

    let tls = keymaker_tonic_client::keymaker_tonic_core::build_client_tls(&identity(
        "drone-client",
    ))
    .unwrap();
    let handle = DroneHandle::new(&drone.address(), tls).unwrap();

    let mut requests = JoinSet::new();
    for _ in 0..100 {
        let mut client = handle.client();
        requests.spawn(async move {
            client
                .generate_key(KeyRequest::new("ECDSA224"))
                .await
                .map(|r| r.into_inner().into_key().is_some())
        });
    }
    while let Some(joined) = requests.join_next().await {
        assert!(joined.unwrap().unwrap());
    }

    let stats = drone.stats.snapshot();
    assert_eq!(stats.keys_issued, 100);
    assert!(stats.peak_in_flight <= 2, "peak {}", stats.peak_in_flight);
    assert!(stats.peak_in_flight >= 1);
}
