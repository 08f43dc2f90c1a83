// # DNS Registrar Trait
//
// Defines the interface for the external DNS record store.
//
// ## Implementations
//
// - NicTool: `vmdns-registrar-nictool` crate
// - Future: PowerDNS, Route53, anything with create/remove record calls
//
// ## Usage
//
// ```rust,ignore
// use vmdns_core::DnsRegistrar;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let registrar = /* DnsRegistrar implementation */;
//
//     registrar
//         .create_records("node01.example.com", "10.0.0.5".parse()?)
//         .await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::net::IpAddr;

/// Trait for DNS registrar implementations
///
/// One call covers both directions: the forward record (A or AAAA by
/// address family) and the matching reverse PTR record.
///
/// Implementations must not retry internally. A failed mutation is final;
/// the dispatcher records it as drift and the event is never redispatched,
/// so a registrar-level retry loop would only stall the pipeline.
#[async_trait]
pub trait DnsRegistrar: Send + Sync {
    /// Create forward and reverse records for a VM
    ///
    /// # Parameters
    ///
    /// - `fqdn`: fully qualified name, `host.network-domain`, no trailing dot
    /// - `ip`: the VM's private address
    ///
    /// # Returns
    ///
    /// - `Ok(())`: both records exist after the call
    /// - `Err(Error)`: the mutation failed; record state is unspecified
    async fn create_records(&self, fqdn: &str, ip: IpAddr) -> Result<(), crate::Error>;

    /// Remove forward and reverse records for a VM
    ///
    /// Removing records that are already absent is a success, not an error.
    ///
    /// # Parameters
    ///
    /// - `fqdn`: fully qualified name, `host.network-domain`, no trailing dot
    /// - `ip`: the VM's private address
    ///
    /// # Returns
    ///
    /// - `Ok(())`: neither record exists after the call
    /// - `Err(Error)`: the mutation failed; record state is unspecified
    async fn remove_records(&self, fqdn: &str, ip: IpAddr) -> Result<(), crate::Error>;

    /// Get the registrar name (for logging/debugging)
    ///
    /// # Returns
    ///
    /// A static string identifying the registrar (e.g., "nictool")
    fn registrar_name(&self) -> &'static str;
}
