// # NicTool DNS Registrar
//
// `DnsRegistrar` implementation backed by a NicTool API gateway.
//
// ## Record model
//
// One VM event maps to two record operations:
//
// - forward: an A or AAAA record for the host label inside its zone
// - reverse: a PTR record in the matching `in-addr.arpa` / `ip6.arpa` zone
//
// The forward zone is everything after the first dot of the FQDN; reverse
// zones are cut at /24 for IPv4 and /64 for IPv6.
//
// ## Wire protocol
//
// Each NicTool function is a POST of a JSON parameter object to
// `{endpoint}/{function}` with HTTP basic auth. Responses carry the
// NicTool envelope: `error_code` 200 means success, anything else is a
// registrar error even when the HTTP status is 200.
//
// Functions used: `get_group_zones`, `get_zone_records`,
// `new_zone_record`, `delete_zone_record`.
//
// ## Coordination
//
// This crate performs no retries and keeps no state. Failures propagate
// to the dispatcher, which decides what a DNS failure means for event
// completion.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::net::IpAddr;
use std::time::Duration;

use vmdns_core::config::RegistrarConfig;
use vmdns_core::{DnsRegistrar, Error, Result};

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// NicTool DNS registrar
///
/// Stateless client over the NicTool JSON gateway. Every operation
/// resolves the zone fresh; there is no caching between calls.
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the password.
pub struct NictoolRegistrar {
    /// Gateway base URL, without trailing slash
    endpoint: String,

    /// NicTool user
    username: String,

    /// NicTool password, sent via basic auth only
    password: String,

    /// TTL applied to created records, in seconds
    ttl: u32,

    /// HTTP client for API requests
    client: reqwest::Client,
}

impl std::fmt::Debug for NictoolRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NictoolRegistrar")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl NictoolRegistrar {
    /// Create a registrar from validated configuration
    pub fn from_config(config: &RegistrarConfig) -> Result<Self> {
        config.validate()?;

        let RegistrarConfig::Nictool {
            endpoint,
            username,
            password,
            ttl,
        } = config;

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            username: username.clone(),
            password: password.clone(),
            ttl: *ttl,
            client,
        })
    }

    /// Invoke one NicTool function and return its response envelope
    ///
    /// # Parameters
    ///
    /// - `function`: NicTool function name, appended to the endpoint path
    /// - `params`: JSON parameter object for the function
    ///
    /// # Returns
    ///
    /// The parsed envelope on `error_code` 200; an error mapped from the
    /// HTTP status or the envelope otherwise.
    async fn call(&self, function: &str, params: Value) -> Result<Value> {
        let url = format!("{}/{}", self.endpoint, function);
        tracing::debug!("NicTool call: {}", function);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&params)
            .send()
            .await
            .map_err(|e| Error::http(format!("NicTool request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            return Err(match status.as_u16() {
                401 | 403 => Error::auth(format!(
                    "NicTool rejected credentials for {}: status {}",
                    function, status
                )),
                404 => Error::not_found(format!(
                    "NicTool function not found at this endpoint: {}",
                    function
                )),
                429 => Error::rate_limited(format!("NicTool rate limit hit on {}", function)),
                500..=599 => Error::registrar(
                    "nictool",
                    format!("server error on {}: {} - {}", function, status, error_text),
                ),
                _ => Error::registrar(
                    "nictool",
                    format!("{} failed: {} - {}", function, status, error_text),
                ),
            });
        }

        let envelope: Value = response.json().await.map_err(|e| {
            Error::registrar(
                "nictool",
                format!("unparseable response from {}: {}", function, e),
            )
        })?;

        match envelope["error_code"].as_i64() {
            Some(200) => Ok(envelope),
            Some(code) => {
                let msg = envelope["error_msg"].as_str().unwrap_or("unknown error");
                Err(Error::registrar(
                    "nictool",
                    format!("{} returned {}: {}", function, code, msg),
                ))
            }
            None => Err(Error::registrar(
                "nictool",
                format!("{} response has no error_code", function),
            )),
        }
    }

    /// Look up the NicTool zone id for a zone name
    ///
    /// Returns `Ok(None)` when no managed zone matches.
    async fn find_zone(&self, zone_name: &str) -> Result<Option<u64>> {
        let envelope = self
            .call("get_group_zones", json!({ "zone": zone_name }))
            .await?;
        Ok(match_zone(&envelope, zone_name))
    }

    /// Create a record unless an identical one already exists
    ///
    /// The existence check keeps redelivered events from stacking up
    /// duplicate records.
    async fn ensure_record(
        &self,
        zone_id: u64,
        name: &str,
        record_type: &str,
        address: &str,
    ) -> Result<()> {
        let existing = self
            .call(
                "get_zone_records",
                json!({ "nt_zone_id": zone_id, "name": name, "type": record_type }),
            )
            .await?;

        let already_present = existing["records"]
            .as_array()
            .into_iter()
            .flatten()
            .any(|record| {
                record["name"].as_str() == Some(name)
                    && record["type"].as_str() == Some(record_type)
                    && record["address"].as_str() == Some(address)
            });
        if already_present {
            tracing::debug!("{} record {} -> {} already present", record_type, name, address);
            return Ok(());
        }

        self.call(
            "new_zone_record",
            json!({
                "nt_zone_id": zone_id,
                "name": name,
                "type": record_type,
                "address": address,
                "ttl": self.ttl,
            }),
        )
        .await?;

        tracing::info!("Added {} record {} -> {}", record_type, name, address);
        Ok(())
    }

    /// Delete records in a zone matching name, type and optional address
    ///
    /// Returns the number of records removed. Zero matches is not an
    /// error.
    async fn delete_matching(
        &self,
        zone_id: u64,
        name: &str,
        record_type: &str,
        address: Option<&str>,
    ) -> Result<usize> {
        let envelope = self
            .call(
                "get_zone_records",
                json!({ "nt_zone_id": zone_id, "name": name, "type": record_type }),
            )
            .await?;

        let mut removed = 0;
        for record in envelope["records"].as_array().into_iter().flatten() {
            if record["name"].as_str() != Some(name) {
                continue;
            }
            if record["type"].as_str() != Some(record_type) {
                continue;
            }
            if let Some(addr) = address {
                if record["address"].as_str() != Some(addr) {
                    continue;
                }
            }
            let Some(record_id) = json_id(&record["nt_zone_record_id"]) else {
                return Err(Error::registrar(
                    "nictool",
                    format!("zone record for {} has no id", name),
                ));
            };

            self.call(
                "delete_zone_record",
                json!({ "nt_zone_record_id": record_id }),
            )
            .await?;
            tracing::info!("Removed {} record {} (id {})", record_type, name, record_id);
            removed += 1;
        }

        Ok(removed)
    }
}

#[async_trait]
impl DnsRegistrar for NictoolRegistrar {
    async fn create_records(&self, fqdn: &str, ip: IpAddr) -> Result<()> {
        let (host, zone_name) = split_fqdn(fqdn)?;
        let record_type = forward_type(ip);

        let zone_id = self.find_zone(zone_name).await?.ok_or_else(|| {
            Error::not_found(format!("Zone not managed by NicTool: {}", zone_name))
        })?;
        self.ensure_record(zone_id, host, record_type, &ip.to_string())
            .await?;

        let (ptr_label, ptr_zone) = reverse_parts(ip);
        let ptr_zone_id = self.find_zone(&ptr_zone).await?.ok_or_else(|| {
            Error::not_found(format!("Reverse zone not managed by NicTool: {}", ptr_zone))
        })?;
        // PTR targets are absolute names
        self.ensure_record(ptr_zone_id, &ptr_label, "PTR", &format!("{}.", fqdn))
            .await?;

        Ok(())
    }

    async fn remove_records(&self, fqdn: &str, ip: IpAddr) -> Result<()> {
        let (host, zone_name) = split_fqdn(fqdn)?;
        let record_type = forward_type(ip);
        let address = ip.to_string();

        match self.find_zone(zone_name).await? {
            Some(zone_id) => {
                let removed = self
                    .delete_matching(zone_id, host, record_type, Some(&address))
                    .await?;
                if removed == 0 {
                    tracing::debug!("No {} records for {} to remove", record_type, fqdn);
                }
            }
            None => {
                tracing::debug!("Zone {} is not managed here, nothing to remove", zone_name);
            }
        }

        let (ptr_label, ptr_zone) = reverse_parts(ip);
        match self.find_zone(&ptr_zone).await? {
            Some(zone_id) => {
                // the label is derived from the address, so every PTR at it
                // is ours to clean up regardless of its current target
                let removed = self.delete_matching(zone_id, &ptr_label, "PTR", None).await?;
                if removed == 0 {
                    tracing::debug!("No PTR records for {} to remove", ip);
                }
            }
            None => {
                tracing::debug!("Reverse zone {} is not managed here, nothing to remove", ptr_zone);
            }
        }

        Ok(())
    }

    fn registrar_name(&self) -> &'static str {
        "nictool"
    }
}

/// Split an FQDN into its host label and zone name at the first dot
fn split_fqdn(fqdn: &str) -> Result<(&str, &str)> {
    match fqdn.split_once('.') {
        Some((host, zone)) if !host.is_empty() && !zone.is_empty() => Ok((host, zone)),
        _ => Err(Error::invalid_input(format!(
            "FQDN has no zone part: {:?}",
            fqdn
        ))),
    }
}

/// Forward record type for an address family
fn forward_type(ip: IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => "A",
        IpAddr::V6(_) => "AAAA",
    }
}

/// Reverse-DNS label and zone for an address
///
/// IPv4 zones are cut at /24 (`c.b.a.in-addr.arpa`, label is the last
/// octet); IPv6 zones at /64 (first 16 reversed nibbles form the label,
/// the remaining 16 the zone under `ip6.arpa`).
fn reverse_parts(ip: IpAddr) -> (String, String) {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            (d.to_string(), format!("{}.{}.{}.in-addr.arpa", c, b, a))
        }
        IpAddr::V6(v6) => {
            let nibbles: Vec<String> = v6
                .octets()
                .iter()
                .rev()
                .flat_map(|byte| [byte & 0x0f, byte >> 4])
                .map(|nibble| format!("{:x}", nibble))
                .collect();
            (
                nibbles[..16].join("."),
                format!("{}.ip6.arpa", nibbles[16..].join(".")),
            )
        }
    }
}

/// Pull the zone id matching `zone_name` out of a get_group_zones envelope
fn match_zone(envelope: &Value, zone_name: &str) -> Option<u64> {
    envelope["zones"].as_array()?.iter().find_map(|zone| {
        let name = zone["zone"].as_str()?;
        if name.eq_ignore_ascii_case(zone_name) {
            json_id(&zone["nt_zone_id"])
        } else {
            None
        }
    })
}

/// Numeric id from a JSON value
///
/// NicTool's Perl backend stringifies numeric ids in some responses, so
/// both forms are accepted.
fn json_id(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
