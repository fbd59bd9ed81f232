use clap::Parser;
use core::time::Duration;
use keymaker_tonic_client::{
    Client, ClientConfig, KeyStream,
    client::{config::PilotArgs, telemetry::init_telemetry},
    keymaker_tonic_core::keymaker::ShutdownToken,
};
use portable_atomic::{AtomicU64, Ordering};
use std::{
    io::{self, Write},
    sync::Arc,
};
use tokio::{signal, task::JoinSet, time::interval};
use tokio_stream::StreamExt;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = PilotArgs::parse();
    let verbose = args.verbose;
    let config = ClientConfig::try_from(args)?;

    init_telemetry(verbose)?;

    let material = config.read_tls_material()?;
    let client = Client::open(config, &material)?;

    let stopper = client.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => eprintln!("interrupted, stopping"),
            Err(e) => eprintln!("Ctrl+C handler unavailable: {e}"),
        }
        stopper.stop();
    });

    let mut pilots = JoinSet::new();
    for &algorithm in client.key_types() {
        let stream = client.generate_algorithm(algorithm);
        pilots.spawn(fly(stream, client.shutdown_token(), verbose));
    }

    while let Some(joined) = pilots.join_next().await {
        joined?;
    }
    Ok(())
}

/// Drains one key stream, reporting its count every second until the client
/// stops.
async fn fly(mut stream: KeyStream, token: ShutdownToken, verbose: bool) {
    let name = stream.algorithm().name();
    let count = Arc::new(AtomicU64::new(0));

    let reporter = {
        let count = Arc::clone(&count);
        let token = token.clone();
        tokio::spawn(async move {
            let mut ticks = interval(REPORT_INTERVAL);
            ticks.tick().await;
            while token.is_running() {
                tokio::select! {
                    () = token.stopped() => break,
                    _ = ticks.tick() => {
                        eprintln!("{name} {} generated", count.load(Ordering::Relaxed));
                    }
                }
            }
        })
    };

    while let Some(key) = stream.next().await {
        count.fetch_add(1, Ordering::Relaxed);
        if verbose {
            let mut out = io::stdout().lock();
            let _ = out.write_all(&key);
            let _ = out.flush();
        }
    }

    let _ = reporter.await;
    eprintln!("{name} complete ({} generated)", count.load(Ordering::Relaxed));
}
