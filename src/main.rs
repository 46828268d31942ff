use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tokio::sync::RwLock;

use warden::config::Config;
use warden::evm::{load_contract_metadata, EvmEndpoint, KeyProvider, LocalKeyProvider};
use warden::metrics::Metrics;
use warden::server::{self, WardenStats};
use warden::state::{JsonStateStore, StateStore};
use warden::types::{ChainRole, Direction};
use warden::{RelayError, Relayer};

#[derive(Parser)]
#[command(name = "bridge-warden")]
#[command(about = "Relays Deposit/Unwrap events between the source and destination chains", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the .env file
    #[arg(long, global = true, default_value = ".env")]
    env_file: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one relay pass for the chain whose events are scanned
    Scan {
        /// `source` (Deposit -> wrap) or `destination` (Unwrap -> withdraw)
        chain: Direction,
    },
    /// Relay both directions every poll interval and serve /health and /metrics
    Watch,
}

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load_from_file(&cli.env_file)?;
    tracing::info!(
        source_rpcs = config.source.all_rpc_urls().len(),
        destination_rpcs = config.destination.all_rpc_urls().len(),
        contract_info = %config.contract_info_path.display(),
        "Configuration loaded"
    );

    let keys: Arc<dyn KeyProvider> = Arc::new(LocalKeyProvider::resolve(
        config.key.private_key.as_deref(),
        &config.key.key_file,
    )?);
    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::open(
        config.state.state_file.clone(),
        config.state.processed_file.clone(),
    )?);
    let metrics = Arc::new(Metrics::new());

    match cli.command {
        Commands::Scan { chain } => {
            let relayer = connect(&config, store, keys, metrics).await?;
            let relayed = relayer.scan(chain).await?;
            println!("{}", relayed);
        }
        Commands::Watch => watch(config, store, keys, metrics).await?,
    }

    Ok(())
}

/// Connect both endpoints and build a relayer around the shared state
async fn connect(
    config: &Config,
    store: Arc<dyn StateStore>,
    keys: Arc<dyn KeyProvider>,
    metrics: Arc<Metrics>,
) -> eyre::Result<Relayer> {
    let contracts = load_contract_metadata(&config.contract_info_path)?;

    let source = EvmEndpoint::connect(
        config.chain(ChainRole::Source),
        contracts.for_role(ChainRole::Source).clone(),
    )
    .await?;
    let destination = EvmEndpoint::connect(
        config.chain(ChainRole::Destination),
        contracts.for_role(ChainRole::Destination).clone(),
    )
    .await?;

    Ok(Relayer::new(
        Arc::new(source),
        Arc::new(destination),
        store,
        keys,
        metrics,
        config.relay_config(),
    )?)
}

async fn watch(
    config: Config,
    store: Arc<dyn StateStore>,
    keys: Arc<dyn KeyProvider>,
    metrics: Arc<Metrics>,
) -> eyre::Result<()> {
    let stats = Arc::new(RwLock::new(WardenStats {
        warden: keys.address().to_string(),
        ..Default::default()
    }));

    let api_stats = stats.clone();
    let api_metrics = metrics.clone();
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = server::start_server(api_port, api_stats, api_metrics).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    tracing::info!(poll_interval_ms = config.poll_interval_ms, "Watching both directions");

    loop {
        match connect(&config, store.clone(), keys.clone(), metrics.clone()).await {
            Ok(relayer) => {
                for (direction, result) in relayer.relay_all().await {
                    match result {
                        Ok(report) => stats.write().await.record(&report),
                        Err(RelayError::StatePersistence(msg)) => {
                            return Err(RelayError::StatePersistence(msg))
                                .wrap_err("State could not be persisted, stopping");
                        }
                        Err(e) => {
                            tracing::error!(direction = %direction, error = %e, "Relay pass failed");
                            stats.write().await.last_error = Some(e.to_string());
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect, retrying next cycle");
                stats.write().await.last_error = Some(e.to_string());
            }
        }
        stats.write().await.cycles += 1;

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    tracing::info!("Bridge warden stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,warden=debug,bridge_warden=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
