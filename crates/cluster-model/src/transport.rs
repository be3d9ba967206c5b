//! Seam to the transport that owns gateway connections

use crate::gateway::GatewayNode;

/// Transport operations the engine needs to trigger.
///
/// Calls are synchronous: when [`GatewayTransport::disconnect`] returns, the
/// disconnect must already be on its way, because the caller may tear the
/// transport down immediately after logout.
pub trait GatewayTransport: Send + Sync + 'static {
    /// Close the management connection to a gateway
    fn disconnect(&self, gateway: &GatewayNode);
}

/// Transport for embedders that manage connections entirely on their own
#[derive(Clone, Copy, Debug, Default)]
pub struct DetachedTransport;

impl GatewayTransport for DetachedTransport {
    fn disconnect(&self, _gateway: &GatewayNode) {}
}
