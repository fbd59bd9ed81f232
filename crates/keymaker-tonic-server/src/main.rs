use clap::Parser;
use keymaker_tonic_server::server::{
    CliArgs, Drone, DroneConfig,
    telemetry::init_telemetry,
};
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let verbose = args.verbose;
    let config = DroneConfig::try_from(args)?;

    let providers = init_telemetry(verbose)?;
    log_startup_info(&config);

    let material = config.read_tls_material()?;
    let drone = Drone::new(config, &material)?.bind().await?;
    let result = drone.serve_with_shutdown(shutdown_signal()).await;

    providers.shutdown();
    result?;
    Ok(())
}

fn log_startup_info(_config: &DroneConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting drone with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting drone on {} with {} generation permits",
            _config.address,
            _config.concurrency
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("SIGTERM handler unavailable: {}", _e);
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Ctrl+C handler unavailable: {}", _e);
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
}
