//! Configuration types for the vmdns system
//!
//! One struct per concern (database, registrar, engine timing), assembled
//! into [`ReconcilerConfig`]. Everything is loaded once at startup and held
//! read-only for the lifetime of the process.

use serde::{Deserialize, Serialize};

/// Main vmdns configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Event database configuration
    pub database: DatabaseConfig,

    /// DNS registrar configuration
    pub registrar: RegistrarConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl ReconcilerConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            database: DatabaseConfig::default(),
            registrar: RegistrarConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.database.validate()?;
        self.registrar.validate()?;
        self.engine.validate()?;

        Ok(())
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Event database configuration
///
/// Points at the orchestration platform's database. The event log and
/// metadata tables are owned by the platform and only ever read; the
/// processing-state table (`events_table`) is owned by this system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,

    /// Database port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Database name
    #[serde(default = "default_db_name")]
    pub database: String,

    /// Name of the processing-state table
    ///
    /// Interpolated into SQL by the state store, so it is restricted to
    /// `[A-Za-z0-9_]` characters.
    #[serde(default = "default_events_table")]
    pub events_table: String,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Validate the database configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.host.is_empty() {
            return Err(crate::Error::config("Database host cannot be empty"));
        }
        if self.user.is_empty() {
            return Err(crate::Error::config("Database user cannot be empty"));
        }
        if self.database.is_empty() {
            return Err(crate::Error::config("Database name cannot be empty"));
        }
        if self.events_table.is_empty()
            || !self
                .events_table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(crate::Error::config(format!(
                "Invalid events table name: {:?}",
                self.events_table
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(crate::Error::config("Connect timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_db_port(),
            user: String::new(),
            password: String::new(),
            database: default_db_name(),
            events_table: default_events_table(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_name() -> String {
    "cloud".to_string()
}

fn default_events_table() -> String {
    "cloud_usage_events".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// DNS registrar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistrarConfig {
    /// NicTool registrar
    Nictool {
        /// Base URL of the NicTool API gateway
        endpoint: String,
        /// NicTool user
        username: String,
        /// NicTool password
        password: String,
        /// TTL for created records, in seconds
        #[serde(default = "default_record_ttl")]
        ttl: u32,
    },
}

impl RegistrarConfig {
    /// Validate the registrar configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            RegistrarConfig::Nictool {
                endpoint,
                username,
                password,
                ttl,
            } => {
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(crate::Error::config(
                        "NicTool endpoint must be an http(s) URL",
                    ));
                }
                if username.is_empty() {
                    return Err(crate::Error::config("NicTool username cannot be empty"));
                }
                if password.is_empty() {
                    return Err(crate::Error::config("NicTool password cannot be empty"));
                }
                if *ttl == 0 {
                    return Err(crate::Error::config("Record TTL must be > 0"));
                }
                Ok(())
            }
        }
    }

    /// Get the registrar type name
    pub fn type_name(&self) -> &str {
        match self {
            RegistrarConfig::Nictool { .. } => "nictool",
        }
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        RegistrarConfig::Nictool {
            endpoint: String::new(),
            username: String::new(),
            password: String::new(),
            ttl: default_record_ttl(),
        }
    }
}

fn default_record_ttl() -> u32 {
    300
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds to sleep between reconciliation cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Trailing window, in days, scanned for unprocessed events
    ///
    /// Kept narrow so the discovery query stays cheap.
    #[serde(default = "default_discovery_lookback_days")]
    pub discovery_lookback_days: u32,

    /// Trailing window, in days, within which metadata joins are attempted
    ///
    /// Wider than the discovery window so events whose VM/host/network
    /// state took a while to settle can still be enriched.
    #[serde(default = "default_enrichment_lookback_days")]
    pub enrichment_lookback_days: u32,

    /// Capacity of the engine event channel
    ///
    /// When full, new engine events are dropped (with a warning log).
    /// This prevents unbounded memory growth when no consumer is draining.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.discovery_lookback_days == 0 {
            return Err(crate::Error::config("Discovery lookback must be > 0"));
        }
        if self.enrichment_lookback_days < self.discovery_lookback_days {
            return Err(crate::Error::config(
                "Enrichment lookback cannot be narrower than discovery lookback",
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            discovery_lookback_days: default_discovery_lookback_days(),
            enrichment_lookback_days: default_enrichment_lookback_days(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_discovery_lookback_days() -> u32 {
    1
}

fn default_enrichment_lookback_days() -> u32 {
    7
}

fn default_event_channel_capacity() -> usize {
    1000
}
