//! Socket abstraction layer for UDP probes
//!
//! Measurements never touch the OS socket API directly. They open one
//! [`ProbeChannel`] per probe cycle through a [`ProbeTransport`], send a single
//! datagram and wait for whatever the kernel delivers back: a reply datagram or
//! an ICMP error drained from the socket error queue.

use std::io;
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub mod factory;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod scripted;

pub use factory::default_transport;
pub use scripted::{ScriptedReply, ScriptedTransport};

/// ICMP type for "destination unreachable"
pub const ICMP_DEST_UNREACH: u8 = 3;
/// ICMP type for "source quench"
pub const ICMP_SOURCE_QUENCH: u8 = 4;
/// ICMP type for "redirect"
pub const ICMP_REDIRECT: u8 = 5;
/// ICMP type for "time exceeded"
pub const ICMP_TIME_EXCEEDED: u8 = 11;
/// ICMP code for "TTL exceeded in transit" (type 11)
pub const ICMP_EXC_TTL: u8 = 0;

/// Errors raised while opening or configuring a probe socket
#[derive(Debug, Error)]
pub enum TransportError {
    /// The target host could not be resolved to an IPv4 address
    #[error("Failed to resolve host {host}: {reason}")]
    Resolve {
        /// Host name or address as configured
        host: String,
        /// Resolver error message
        reason: String,
    },

    /// A socket call failed
    ///
    /// `op` names the failing call (`socket`, `bind`, `setsockopt IP_TTL`, ...).
    #[error("{op}: {source}")]
    Io {
        /// Name of the failing socket operation
        op: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Probe sockets are not available on this platform
    #[error("UDP probe sockets are not supported on {0}")]
    Unsupported(&'static str),
}

impl TransportError {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        TransportError::Io { op, source }
    }
}

/// Parameters for one probe socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSpec {
    /// Target host name or IPv4 address
    pub host: String,
    /// Local port to bind (0 lets the OS choose)
    pub source_port: u16,
    /// Remote port to connect to
    pub destination_port: u16,
    /// IP TTL for outgoing packets (0 keeps the OS default)
    pub ttl: u8,
}

/// Something the kernel handed back on a probe socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// An ICMP error caused by our datagram, read from the error queue
    IcmpError {
        /// ICMP type of the error message
        icmp_type: u8,
        /// ICMP code of the error message
        icmp_code: u8,
        /// Address of the node that generated the ICMP message
        offender: Option<IpAddr>,
        /// Kernel receive timestamp in microseconds since the Unix epoch
        timestamp_us: Option<u64>,
    },
    /// A regular datagram answered our probe
    Datagram {
        /// Datagram payload
        payload: Vec<u8>,
        /// Kernel receive timestamp in microseconds since the Unix epoch
        timestamp_us: Option<u64>,
    },
}

/// An open, connected probe socket
///
/// Dropping the channel closes the socket.
pub trait ProbeChannel: Send {
    /// Send one datagram and return the send timestamp in microseconds
    ///
    /// The timestamp is taken immediately before the send call.
    fn send(&mut self, payload: &[u8]) -> io::Result<u64>;

    /// Wait up to `wait` for an event
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn receive(&mut self, wait: Duration) -> io::Result<Option<ReceiveEvent>>;
}

/// Factory for probe sockets
pub trait ProbeTransport: Send + Sync {
    /// Short human-readable name of the transport
    fn name(&self) -> &'static str;

    /// Open and configure a socket for a single probe cycle
    fn open(&self, spec: &SocketSpec) -> Result<Box<dyn ProbeChannel>, TransportError>;
}

/// Current wall clock time in microseconds since the Unix epoch
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
