// # CloudStack Event Source
//
// MySQL-backed implementation of `EventSource` and `StateStore` against a
// CloudStack `cloud` database.
//
// ## Tables
//
// Read-only (owned by CloudStack): `usage_event`, `vm_instance`,
// `guest_os`, `host`, `nics`, `networks`.
//
// Writable (owned by this system): the configured processing-state table,
// by default `cloud_usage_events`, created on demand by `ensure_schema`:
//
// ```sql
// CREATE TABLE IF NOT EXISTS cloud_usage_events (
//   id BIGINT UNSIGNED NOT NULL,
//   state INT UNSIGNED NOT NULL,
//   PRIMARY KEY (id)
// ) ENGINE=InnoDB
// ```
//
// A state row exists iff the event was dispatched; `state = 1` means done.
//
// ## Connection model
//
// One pooled connection (`max_connections = 1`), established eagerly at
// startup so an unreachable database fails fast. Cycles are strictly
// sequential, so a single connection serializes everything the same way
// the schema expects a single worker.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::QueryBuilder;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::net::IpAddr;
use std::time::Duration;

use vmdns_core::config::DatabaseConfig;
use vmdns_core::traits::event_source::{EnrichedVmEvent, EventId, EventKind, UsageEvent};
use vmdns_core::traits::state_store::MarkOutcome;
use vmdns_core::{Error, EventSource, Result, StateStore};

/// Value written to the `state` column for processed events
const STATE_DONE: u32 = 1;

/// Open the single-connection pool for the CloudStack database
///
/// Connects eagerly; an unreachable or misconfigured database surfaces
/// here rather than on the first cycle.
pub async fn connect(config: &DatabaseConfig) -> Result<MySqlPool> {
    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database);

    let pool = MySqlPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(options)
        .await
        .map_err(|e| {
            Error::source(format!(
                "cannot connect to mysql://{}@{}:{}/{}: {}",
                config.user, config.host, config.port, config.database, e
            ))
        })?;

    tracing::info!(
        "Connected to {}:{}/{}",
        config.host, config.port, config.database
    );
    Ok(pool)
}

/// Read-only view over CloudStack's usage-event log and metadata tables
pub struct CloudStackEventSource {
    pool: MySqlPool,
}

impl CloudStackEventSource {
    /// Create an event source over an open pool
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

/// Raw usage-event row
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: u64,
    event_type: String,
    created: NaiveDateTime,
    resource_id: u64,
    resource_name: Option<String>,
}

impl From<EventRow> for UsageEvent {
    fn from(row: EventRow) -> Self {
        UsageEvent {
            id: EventId(row.id),
            event_type: row.event_type,
            created: row.created.and_utc(),
            resource_id: row.resource_id,
            resource_name: row.resource_name,
        }
    }
}

/// One row of the six-table enrichment join
///
/// Field names match the column aliases in the enrichment query; nullable
/// columns stay `Option` here and are resolved in `map_row`.
#[derive(Debug, sqlx::FromRow)]
struct EnrichedRow {
    id: u64,
    event_type: String,
    created: NaiveDateTime,
    resource_name: Option<String>,
    private_ip: Option<String>,
    instance_name: String,
    vm_mac: String,
    datacenter_id: u64,
    os_name: String,
    host_ip: String,
    host_mac: Option<String>,
    network_domain: Option<String>,
}

/// Map one join row to an enriched event
///
/// Returns `None` (an enrichment miss) when a field required to act on the
/// event is missing or unusable: no resource name, no network domain, or a
/// private IP that is absent or unparseable. Informational fields that the
/// platform left NULL default to empty.
fn map_row(row: EnrichedRow) -> Option<EnrichedVmEvent> {
    let kind = EventKind::from_db_str(&row.event_type)?;

    let Some(resource_name) = row.resource_name else {
        tracing::debug!("Event {} has no resource name, skipping", row.id);
        return None;
    };
    let Some(network_domain) = row.network_domain else {
        tracing::debug!("Event {} is on a network without a domain, skipping", row.id);
        return None;
    };
    let private_ip: IpAddr = match row.private_ip {
        Some(ref s) => match s.parse() {
            Ok(ip) => ip,
            Err(_) => {
                tracing::warn!(
                    "Event {} has unparseable private IP {:?}, skipping",
                    row.id, s
                );
                return None;
            }
        },
        None => {
            tracing::debug!("Event {} VM has no private IP yet, skipping", row.id);
            return None;
        }
    };

    Some(EnrichedVmEvent {
        id: EventId(row.id),
        kind,
        created: row.created.and_utc(),
        resource_name,
        private_ip,
        instance_name: row.instance_name,
        vm_mac: row.vm_mac,
        datacenter_id: row.datacenter_id,
        os_name: row.os_name,
        host_ip: row.host_ip,
        host_mac: row.host_mac.unwrap_or_default(),
        network_domain,
    })
}

/// Collapse join rows into at most one enriched event per id
///
/// The host join accepts the VM's current or last host id, so a VM that
/// migrated between hosts produces two rows for one event. Rows arrive
/// ordered by id; the first row per id wins.
fn rows_to_events(rows: Vec<EnrichedRow>) -> Vec<EnrichedVmEvent> {
    let mut events = Vec::with_capacity(rows.len());
    let mut last_id = None;

    for row in rows {
        if last_id == Some(row.id) {
            continue;
        }
        last_id = Some(row.id);
        if let Some(event) = map_row(row) {
            events.push(event);
        }
    }

    events
}

#[async_trait]
impl EventSource for CloudStackEventSource {
    async fn fetch_window(&self, window_start: DateTime<Utc>) -> Result<Vec<UsageEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT usage_event.id AS id, usage_event.type AS event_type, \
             usage_event.created AS created, usage_event.resource_id AS resource_id, \
             usage_event.resource_name AS resource_name \
             FROM usage_event \
             WHERE usage_event.created > ? \
             ORDER BY usage_event.id",
        )
        .bind(window_start.naive_utc())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::source(format!("usage_event window query failed: {}", e)))?;

        Ok(rows.into_iter().map(UsageEvent::from).collect())
    }

    async fn enrich_ids(
        &self,
        ids: &[EventId],
        window_start: DateTime<Utc>,
    ) -> Result<Vec<EnrichedVmEvent>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<sqlx::MySql>::new(
            "SELECT usage_event.id AS id, usage_event.type AS event_type, \
             usage_event.created AS created, usage_event.resource_name AS resource_name, \
             vm.private_ip_address AS private_ip, vm.instance_name AS instance_name, \
             vm.private_mac_address AS vm_mac, vm.data_center_id AS datacenter_id, \
             guest_os.display_name AS os_name, \
             host.private_ip_address AS host_ip, host.private_mac_address AS host_mac, \
             networks.network_domain AS network_domain \
             FROM usage_event \
             JOIN vm_instance AS vm ON vm.id = usage_event.resource_id \
             JOIN guest_os ON guest_os.id = vm.guest_os_id \
             JOIN nics ON nics.mac_address = vm.private_mac_address \
             JOIN networks ON networks.id = nics.network_id \
             JOIN host ON (host.id = vm.last_host_id OR host.id = vm.host_id) \
             WHERE usage_event.type IN ('VM.CREATE', 'VM.DESTROY') \
             AND usage_event.created > ",
        );
        query.push_bind(window_start.naive_utc());
        query.push(" AND usage_event.id IN (");
        let mut in_list = query.separated(", ");
        for id in ids {
            in_list.push_bind(id.as_u64());
        }
        query.push(") ORDER BY usage_event.id");

        let rows: Vec<EnrichedRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::source(format!("enrichment join failed: {}", e)))?;

        tracing::debug!(
            "Enrichment join returned {} rows for {} ids",
            rows.len(),
            ids.len()
        );
        Ok(rows_to_events(rows))
    }
}

/// Processing-state table on the same CloudStack database
pub struct CloudStackStateStore {
    pool: MySqlPool,
    events_table: String,
}

impl CloudStackStateStore {
    /// Create a state store writing to `events_table`
    ///
    /// The table name is interpolated into SQL, so it is validated here
    /// and anything outside `[A-Za-z0-9_]` is rejected.
    pub fn new(pool: MySqlPool, events_table: impl Into<String>) -> Result<Self> {
        let events_table = events_table.into();
        if events_table.is_empty() || !valid_table_name(&events_table) {
            return Err(Error::config(format!(
                "Invalid events table name: {:?}",
                events_table
            )));
        }
        Ok(Self { pool, events_table })
    }

    /// Create the processing-state table if it does not exist
    ///
    /// Idempotent; run once at daemon startup so a first deployment needs
    /// no manual migration step.
    pub async fn ensure_schema(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
               id BIGINT UNSIGNED NOT NULL, \
               state INT UNSIGNED NOT NULL, \
               PRIMARY KEY (id)\
             ) ENGINE=InnoDB",
            self.events_table
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::state_store(format!("schema bootstrap failed: {}", e)))?;

        tracing::debug!("State table {} is present", self.events_table);
        Ok(())
    }
}

fn valid_table_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Statement behind [`StateStore::mark_done`]
///
/// The state value never varies, so `INSERT IGNORE` covers the whole upsert:
/// one affected row is a fresh insert, zero an existing row left untouched.
/// The counts are stable under `CLIENT_FOUND_ROWS`, which the driver always
/// negotiates and which makes a no-op `ON DUPLICATE KEY UPDATE` report one
/// affected row, never zero.
fn mark_done_sql(events_table: &str) -> String {
    format!("INSERT IGNORE INTO {} (id, state) VALUES (?, ?)", events_table)
}

#[async_trait]
impl StateStore for CloudStackStateStore {
    async fn list_unprocessed_ids(&self, window_start: DateTime<Utc>) -> Result<Vec<EventId>> {
        let sql = format!(
            "SELECT usage_event.id AS id \
             FROM usage_event LEFT OUTER JOIN {} AS ue ON usage_event.id = ue.id \
             WHERE usage_event.created >= ? AND ue.id IS NULL \
             ORDER BY usage_event.id",
            self.events_table
        );
        let ids = sqlx::query_scalar::<_, u64>(&sql)
            .bind(window_start.naive_utc())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::state_store(format!("unprocessed-id query failed: {}", e)))?;

        Ok(ids.into_iter().map(EventId).collect())
    }

    async fn mark_done(&self, id: EventId) -> Result<MarkOutcome> {
        let result = sqlx::query(&mark_done_sql(&self.events_table))
            .bind(id.as_u64())
            .bind(STATE_DONE)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::state_store(format!("mark_done({}) failed: {}", id, e)))?;

        // The single statement is atomic; there is no separate commit to gate.
        Ok(if result.rows_affected() == 0 {
            MarkOutcome::AlreadyDone
        } else {
            MarkOutcome::Recorded
        })
    }
}
