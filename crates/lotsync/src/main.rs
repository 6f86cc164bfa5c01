//! lotsync binary.
//!
//! Wires the store, the state hub, its producers, and the HTTP surface
//! together from one YAML file, then serves until `Ctrl-C` or the server
//! stops.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (first argument, `LOTSYNC_CONFIG`, or `lotsync.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to the counter store
//! 4. Open the change subscription
//! 5. Bootstrap the hub from configured counters and the store
//! 6. Start the change forwarder, reconciler, and heartbeat
//! 7. Start the HTTP server
//! 8. Wait for shutdown

mod error;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use lotsync_core::config::{LogFormat, LoggingConfig, LotsyncConfig, StoreBackend, StoreConfig};
use lotsync_core::heartbeat::spawn_heartbeat;
use lotsync_core::hub::Hub;
use lotsync_core::listener::{ListenerHealth, spawn_forwarder};
use lotsync_core::reconciler::{ReconcileSchedule, spawn_reconciler};
use lotsync_server::{AppState, ServerConfig, spawn_server};
use lotsync_store::{CounterStore, MemoryCounterStore, RedisCounterStore};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Default configuration file name.
const DEFAULT_CONFIG_PATH: &str = "lotsync.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, store connection, hub bootstrap, or
/// the HTTP server fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let path = config_path();
    let config = LotsyncConfig::from_file(&path).map_err(AppError::from)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        path = %path.display(),
        counters = config.counters.len(),
        backend = ?config.store.backend,
        "lotsync starting"
    );

    run(config).await?;
    Ok(())
}

/// Resolve the configuration file path.
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LOTSYNC_CONFIG").ok())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Connect to the configured store backend.
///
/// The memory backend starts from the configured initial occupancies.
async fn connect_store(config: &LotsyncConfig) -> Result<Arc<dyn CounterStore>, AppError> {
    let StoreConfig {
        backend,
        url,
        namespace,
    } = &config.store;
    match backend {
        StoreBackend::Redis => {
            let store = RedisCounterStore::connect(url, namespace).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; counters are lost on exit");
            let store = MemoryCounterStore::with_values(
                config.counters.iter().map(|c| (c.name.clone(), c.occupancy)),
            );
            Ok(Arc::new(store))
        }
    }
}

async fn run(config: LotsyncConfig) -> Result<(), AppError> {
    // 3. Connect to the counter store.
    let store = connect_store(&config).await?;

    // 4. Subscribe before the bootstrap read so no write falls between them.
    let changes = match store.subscribe_changes().await {
        Ok(changes) => Some(changes),
        Err(e) => {
            error!(error = %e, "Failed to open change subscription; serving without notifications");
            None
        }
    };

    // 5. Bootstrap and start the hub.
    let hub = Hub::bootstrap(
        config.initial_counters(),
        Arc::clone(&store),
        config.hub.store_timeout(),
    )
    .await?;
    let (handle, hub_task) = hub.spawn(config.hub.queue_capacity);

    // 6. Start producers.
    let health = Arc::new(ListenerHealth::new());
    let listener = changes
        .map(|changes| spawn_forwarder(changes, handle.clone(), Arc::clone(&health)));
    let schedule = ReconcileSchedule::from_config(&config.reconcile)?;
    let reconciler = spawn_reconciler(handle.clone(), schedule);
    let heartbeat = spawn_heartbeat(handle.clone(), config.heartbeat.interval());

    // 7. Start the HTTP server.
    let counters: BTreeSet<String> = config.counter_names();
    let state = AppState::new(handle, store, counters, health)
        .with_viewer_buffer(config.hub.viewer_buffer)
        .with_store_timeout(config.hub.store_timeout());
    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };
    let (addr, mut server) = spawn_server(&server_config, Arc::new(state)).await?;
    info!(%addr, "lotsync ready");

    // 8. Wait for shutdown.
    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            Ok(())
        }
        finished = &mut server => match finished {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AppError::from(e)),
            Err(e) => Err(AppError::Task { message: format!("server task failed: {e}") }),
        },
    };

    server.abort();
    if let Some(listener) = &listener {
        listener.abort();
    }
    reconciler.abort();
    heartbeat.abort();
    hub_task.abort();

    info!("lotsync shutdown complete");
    result
}
