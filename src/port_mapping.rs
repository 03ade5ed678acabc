//! Port mapping provider seam (spec §1, §6: `Firewall.EnableUpnp` /
//! `EnableNatPmp` / `EnablePcp`). UPnP/NAT-PMP/PCP negotiation talks to
//! an external gateway device; this crate only defines the boundary a
//! real provider would implement, matching the teacher's pattern of
//! narrow trait seams at system boundaries (`crypto/ecdh.rs`'s
//! `PublicKey` abstraction over the underlying curve crate).

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum PortMappingError {
    #[error("port mapping not available")]
    Unavailable,
}

/// A single request to expose `internal_port` on the local host as
/// `external_port` on the gateway's WAN side.
#[derive(Clone, Copy, Debug)]
pub struct MappingRequest {
    pub internal_port: u16,
    pub external_port: u16,
    pub lease_seconds: u32,
}

#[async_trait]
pub trait PortMappingProvider: Send + Sync {
    async fn map(&self, request: MappingRequest) -> Result<(), PortMappingError>;
    async fn unmap(&self, external_port: u16) -> Result<(), PortMappingError>;
}

/// Default provider used when `Firewall.EnableUpnp`/`EnableNatPmp`/
/// `EnablePcp` are all disabled, or no gateway is reachable. Every
/// call fails cleanly rather than silently pretending to succeed.
pub struct NoopPortMapping;

#[async_trait]
impl PortMappingProvider for NoopPortMapping {
    async fn map(&self, _request: MappingRequest) -> Result<(), PortMappingError> {
        Err(PortMappingError::Unavailable)
    }

    async fn unmap(&self, _external_port: u16) -> Result<(), PortMappingError> {
        Err(PortMappingError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_provider_always_reports_unavailable() {
        let provider = NoopPortMapping;
        let request = MappingRequest {
            internal_port: 53317,
            external_port: 53317,
            lease_seconds: 3600,
        };
        assert!(matches!(
            provider.map(request).await,
            Err(PortMappingError::Unavailable)
        ));
        assert!(matches!(
            provider.unmap(53317).await,
            Err(PortMappingError::Unavailable)
        ));
    }
}
