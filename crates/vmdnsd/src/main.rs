// # vmdnsd - VM DNS Reconciliation Daemon
//
// Thin integration layer: reads configuration from the environment, wires
// the CloudStack event source and the NicTool registrar into the
// reconciliation engine, and runs it until SIGTERM/SIGINT. All
// reconciliation logic lives in vmdns-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Event database
// - `VMDNS_DB_HOST`: MySQL host (required)
// - `VMDNS_DB_PORT`: MySQL port (default: 3306)
// - `VMDNS_DB_USER`: MySQL user (required)
// - `VMDNS_DB_PASSWORD_B64`: MySQL password, base64-encoded (required)
// - `VMDNS_DB_NAME`: database name (default: cloud)
// - `VMDNS_EVENTS_TABLE`: processing-state table (default: cloud_usage_events)
// - `VMDNS_DB_CONNECT_TIMEOUT_SECS`: connect timeout (default: 5)
//
// ### DNS registrar
// - `VMDNS_NICTOOL_ENDPOINT`: NicTool API gateway base URL (required)
// - `VMDNS_NICTOOL_USER`: NicTool user (required)
// - `VMDNS_NICTOOL_PASSWORD_B64`: NicTool password, base64-encoded (required)
// - `VMDNS_NICTOOL_TTL`: TTL for created records in seconds (default: 300)
//
// ### Engine
// - `VMDNS_POLL_INTERVAL_SECS`: seconds between cycles (default: 10)
// - `VMDNS_DISCOVERY_LOOKBACK_DAYS`: unprocessed-event window (default: 1)
// - `VMDNS_ENRICHMENT_LOOKBACK_DAYS`: metadata join window (default: 7)
//
// ### Logging
// - `VMDNS_LOG_LEVEL`: trace, debug, info, warn or error (default: info)
//
// Passwords are stored base64-encoded so they survive being pasted into
// unit files and shell profiles; this is encoding, not encryption.
//
// ## Example
//
// ```bash
// export VMDNS_DB_HOST=clouddb.internal
// export VMDNS_DB_USER=cloud_ro
// export VMDNS_DB_PASSWORD_B64=$(echo -n 'secret' | base64)
// export VMDNS_NICTOOL_ENDPOINT=https://nictool.internal/api
// export VMDNS_NICTOOL_USER=dnsadmin
// export VMDNS_NICTOOL_PASSWORD_B64=$(echo -n 'secret' | base64)
//
// vmdnsd
// ```

use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::env;
use std::process::ExitCode;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use vmdns_core::config::{DatabaseConfig, EngineConfig, ReconcilerConfig, RegistrarConfig};
use vmdns_core::{EngineEvent, ReconcilerEngine};
use vmdns_registrar_nictool::NictoolRegistrar;
use vmdns_source_cloudstack::{CloudStackEventSource, CloudStackStateStore};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Process exit codes, distinguishable by the supervisor:
/// - 0: clean shutdown
/// - 1: configuration error
/// - 2: runtime error (including fatal startup connectivity)
#[derive(Debug, Clone, Copy)]
enum VmdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error
    ConfigError = 1,
    /// Runtime error
    RuntimeError = 2,
}

impl From<VmdnsExitCode> for ExitCode {
    fn from(code: VmdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    reconciler: ReconcilerConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Defaults come from the core config types so the daemon and any
    /// embedder agree on them.
    fn from_env() -> Result<Self> {
        let db_defaults = DatabaseConfig::default();
        let engine_defaults = EngineConfig::default();
        let RegistrarConfig::Nictool {
            ttl: default_ttl, ..
        } = RegistrarConfig::default();

        let reconciler = ReconcilerConfig {
            database: DatabaseConfig {
                host: required("VMDNS_DB_HOST")?,
                port: parsed_or("VMDNS_DB_PORT", db_defaults.port)?,
                user: required("VMDNS_DB_USER")?,
                password: decoded_secret("VMDNS_DB_PASSWORD_B64")?,
                database: string_or("VMDNS_DB_NAME", &db_defaults.database),
                events_table: string_or("VMDNS_EVENTS_TABLE", &db_defaults.events_table),
                connect_timeout_secs: parsed_or(
                    "VMDNS_DB_CONNECT_TIMEOUT_SECS",
                    db_defaults.connect_timeout_secs,
                )?,
            },
            registrar: RegistrarConfig::Nictool {
                endpoint: required("VMDNS_NICTOOL_ENDPOINT")?,
                username: required("VMDNS_NICTOOL_USER")?,
                password: decoded_secret("VMDNS_NICTOOL_PASSWORD_B64")?,
                ttl: parsed_or("VMDNS_NICTOOL_TTL", default_ttl)?,
            },
            engine: EngineConfig {
                poll_interval_secs: parsed_or(
                    "VMDNS_POLL_INTERVAL_SECS",
                    engine_defaults.poll_interval_secs,
                )?,
                discovery_lookback_days: parsed_or(
                    "VMDNS_DISCOVERY_LOOKBACK_DAYS",
                    engine_defaults.discovery_lookback_days,
                )?,
                enrichment_lookback_days: parsed_or(
                    "VMDNS_ENRICHMENT_LOOKBACK_DAYS",
                    engine_defaults.enrichment_lookback_days,
                )?,
                event_channel_capacity: engine_defaults.event_channel_capacity,
            },
        };

        Ok(Self {
            reconciler,
            log_level: string_or("VMDNS_LOG_LEVEL", "info"),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.reconciler
            .validate()
            .map_err(|e| anyhow::anyhow!(e))?;

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => anyhow::bail!(
                "VMDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                other
            ),
        }
    }
}

/// Read a required environment variable
fn required(name: &str) -> Result<String> {
    env::var(name)
        .map_err(|_| anyhow::anyhow!("{} is required. Set it via: export {}=...", name, name))
}

/// Read an optional environment variable with a fallback
fn string_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, failing loudly on bad values
fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is not a valid value: {}", name, e)),
        Err(_) => Ok(default),
    }
}

/// Read and decode a required base64-encoded secret
fn decoded_secret(name: &str) -> Result<String> {
    decode_secret(name, &required(name)?)
}

/// Decode a base64-encoded secret, tolerating surrounding whitespace
/// (a `$(... | base64)` export carries a trailing newline)
fn decode_secret(name: &str, raw: &str) -> Result<String> {
    let bytes = BASE64
        .decode(raw.trim())
        .map_err(|e| anyhow::anyhow!("{} is not valid base64: {}", name, e))?;
    String::from_utf8(bytes).map_err(|_| anyhow::anyhow!("{} does not decode to UTF-8", name))
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return VmdnsExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return VmdnsExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return VmdnsExitCode::ConfigError.into();
    }

    info!("Starting vmdnsd daemon");
    info!(
        "State table {}, {}-day discovery window, polling every {}s",
        config.reconciler.database.events_table,
        config.reconciler.engine.discovery_lookback_days,
        config.reconciler.engine.poll_interval_secs
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return VmdnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config.reconciler).await {
            error!("Daemon error: {:#}", e);
            VmdnsExitCode::RuntimeError
        } else {
            VmdnsExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: ReconcilerConfig) -> Result<()> {
    info!(
        "Connecting to event database at {}:{}/{}",
        config.database.host, config.database.port, config.database.database
    );
    let pool = vmdns_source_cloudstack::connect(&config.database).await?;

    let state_store =
        CloudStackStateStore::new(pool.clone(), config.database.events_table.clone())?;
    state_store.ensure_schema().await?;
    let source = CloudStackEventSource::new(pool);

    info!("Using {} registrar", config.registrar.type_name());
    let registrar = NictoolRegistrar::from_config(&config.registrar)?;

    let (engine, events) = ReconcilerEngine::new(
        Box::new(source),
        Box::new(state_store),
        Box::new(registrar),
        config,
    )?;

    let monitor = tokio::spawn(monitor_events(events));

    // Engine shutdown is tied to our signal handling so SIGTERM from
    // systemd works the same as CTRL-C.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal_name) => {
                info!("Received {}, stopping after the current cycle", signal_name);
                let _ = shutdown_tx.send(());
            }
            Err(e) => error!("Signal handler error: {}", e),
        }
    });

    let result = engine.run_with_shutdown(Some(shutdown_rx)).await;

    // Dropping the engine closes the event channel, letting the monitor
    // task drain the remaining events and exit.
    drop(engine);
    let _ = monitor.await;

    result?;
    info!("Shutdown complete");
    Ok(())
}

/// Drain engine events, keeping running totals for the shutdown summary
async fn monitor_events(mut events: mpsc::Receiver<EngineEvent>) {
    let mut processed: u64 = 0;
    let mut drifted: u64 = 0;

    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Started { backlog } => {
                debug!("Engine reported a startup backlog of {} events", backlog);
            }
            EngineEvent::EventProcessed { id, kind, fqdn } => {
                processed += 1;
                debug!("Processed event {} ({}) for {}", id, kind, fqdn);
            }
            EngineEvent::EventProcessedWithDrift { id, fqdn, error, .. } => {
                processed += 1;
                drifted += 1;
                warn!("Event {} left DNS drift on {}: {}", id, fqdn, error);
            }
            EngineEvent::CycleFailed { error } => {
                warn!("Cycle failed, ids retry next poll: {}", error);
            }
            EngineEvent::Stopped { reason } => {
                info!(
                    "Engine stopped ({}): {} events processed, {} with DNS drift",
                    reason, processed, drifted
                );
            }
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
///
/// # Returns
///
/// The name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal_name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal_name)
}

/// Wait for a shutdown signal (CTRL-C only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
