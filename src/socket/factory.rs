//! Selection of the platform probe transport

use super::{ProbeChannel, ProbeTransport, SocketSpec, TransportError};
use std::sync::Arc;

/// Transport for platforms without error-queue support
///
/// Every open fails, which measurements record as a per-cycle error.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedTransport;

impl ProbeTransport for UnsupportedTransport {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn open(&self, _spec: &SocketSpec) -> Result<Box<dyn ProbeChannel>, TransportError> {
        Err(TransportError::Unsupported(std::env::consts::OS))
    }
}

/// Create the best transport available on this platform
///
/// Linux uses UDP sockets with `IP_RECVERR`, which works without root.
pub fn default_transport() -> Arc<dyn ProbeTransport> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(super::linux::RecvErrTransport::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnsupportedTransport)
    }
}
