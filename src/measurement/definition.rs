//! Measurement definitions
//!
//! A definition is the immutable description of what a measurement does. It
//! is built from the JSON options of a task by the
//! [`MeasurementRegistry`](super::MeasurementRegistry) and serializes back to
//! the same option keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default number of probes per run
pub const DEFAULT_COUNT: u32 = 3;
/// Default pause between two probes, in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 200;
/// Default wait for a reply, in milliseconds
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1000;
/// Default probe payload length in bytes
pub const DEFAULT_PAYLOAD_LEN: usize = 32;
/// Default SNMP wait for a reply, in milliseconds
pub const DEFAULT_SNMP_WAIT_MS: u64 = 1000;

/// Durations are exchanged as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

fn default_count() -> u32 {
    DEFAULT_COUNT
}

fn default_interval() -> Duration {
    Duration::from_millis(DEFAULT_INTERVAL_MS)
}

fn default_receive_timeout() -> Duration {
    Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS)
}

fn default_payload() -> Vec<u8> {
    vec![0; DEFAULT_PAYLOAD_LEN]
}

/// UDP ping with ICMP error decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpPingDefinition {
    /// Target host name or IPv4 address
    #[serde(alias = "url")]
    pub host: String,
    /// Number of probes
    #[serde(default = "default_count")]
    pub count: u32,
    /// Pause between probes
    #[serde(default = "default_interval", with = "duration_ms")]
    pub interval: Duration,
    /// Wait for a reply before a probe counts as timed out
    #[serde(default = "default_receive_timeout", with = "duration_ms")]
    pub receive_timeout: Duration,
    /// IP TTL (0 keeps the OS default)
    #[serde(default)]
    pub ttl: u8,
    /// Remote port (0 uses the classic traceroute port 33434)
    #[serde(default)]
    pub destination_port: u16,
    /// Local port (0 lets the OS choose)
    #[serde(default)]
    pub source_port: u16,
    /// Datagram payload
    #[serde(default = "default_payload")]
    pub payload: Vec<u8>,
}

impl UdpPingDefinition {
    /// Definition for `host` with default settings
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            count: DEFAULT_COUNT,
            interval: default_interval(),
            receive_timeout: default_receive_timeout(),
            ttl: 0,
            destination_port: 0,
            source_port: 0,
            payload: default_payload(),
        }
    }
}

/// Ping flavour a traceroute is built from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingType {
    /// UDP datagrams with ICMP error decoding
    #[default]
    Udp,
    /// TCP SYN probes
    Tcp,
    /// The operating system's ping utility
    System,
}

impl fmt::Display for PingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingType::Udp => write!(f, "UDP"),
            PingType::Tcp => write!(f, "TCP"),
            PingType::System => write!(f, "System"),
        }
    }
}

/// Traceroute built from UDP pings with increasing TTL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerouteDefinition {
    /// Target host name or IPv4 address
    #[serde(alias = "url")]
    pub host: String,
    /// Probes per hop
    #[serde(default = "default_count")]
    pub count: u32,
    /// Pause between probes of one hop
    #[serde(default = "default_interval", with = "duration_ms")]
    pub interval: Duration,
    /// Wait for a reply before a probe counts as timed out
    #[serde(default = "default_receive_timeout", with = "duration_ms")]
    pub receive_timeout: Duration,
    /// Remote port (0 picks a random port at prepare time)
    #[serde(default)]
    pub destination_port: u16,
    /// Local port (0 picks a random port at prepare time)
    #[serde(default)]
    pub source_port: u16,
    /// Datagram payload
    #[serde(default = "default_payload")]
    pub payload: Vec<u8>,
    /// Probe flavour; only UDP is implemented
    #[serde(default, rename = "type")]
    pub ping_type: PingType,
}

impl TracerouteDefinition {
    /// Definition for `host` with default settings
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            count: DEFAULT_COUNT,
            interval: default_interval(),
            receive_timeout: default_receive_timeout(),
            destination_port: 0,
            source_port: 0,
            payload: default_payload(),
            ping_type: PingType::Udp,
        }
    }

    /// Ping definition for one hop
    pub fn ping_definition(&self, ttl: u8) -> UdpPingDefinition {
        UdpPingDefinition {
            host: self.host.clone(),
            count: self.count,
            interval: self.interval,
            receive_timeout: self.receive_timeout,
            ttl,
            destination_port: self.destination_port,
            source_port: self.source_port,
            payload: self.payload.clone(),
        }
    }
}

fn default_communities() -> Vec<String> {
    vec!["public".to_string()]
}

fn default_retries() -> u32 {
    1
}

fn default_snmp_version() -> u8 {
    2
}

fn default_snmp_wait() -> Duration {
    Duration::from_millis(DEFAULT_SNMP_WAIT_MS)
}

/// SNMP device discovery over an address range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpDefinition {
    /// Communities tried for every host, in order
    #[serde(default = "default_communities")]
    pub community_list: Vec<String>,
    /// Requests per host and community before giving up
    #[serde(default = "default_retries")]
    pub retries_per_ip: u32,
    /// SNMP version, 1 or 2 (v2c)
    #[serde(default = "default_snmp_version")]
    pub snmp_version: u8,
    /// Single address, `first-last` range or CIDR block
    pub host_addresses: String,
    /// Pause between two hosts
    #[serde(default, with = "duration_ms")]
    pub send_interval: Duration,
    /// Wait for a reply to one request
    #[serde(default = "default_snmp_wait", with = "duration_ms")]
    pub wait_time: Duration,
}

impl SnmpDefinition {
    /// Definition scanning `host_addresses` with default settings
    pub fn new(host_addresses: impl Into<String>) -> Self {
        Self {
            community_list: default_communities(),
            retries_per_ip: default_retries(),
            snmp_version: default_snmp_version(),
            host_addresses: host_addresses.into(),
            send_interval: Duration::ZERO,
            wait_time: default_snmp_wait(),
        }
    }
}

/// Any measurement definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MeasurementDefinition {
    /// UDP ping
    UdpPing(UdpPingDefinition),
    /// Traceroute
    Traceroute(TracerouteDefinition),
    /// SNMP discovery
    Snmp(SnmpDefinition),
}

impl MeasurementDefinition {
    /// Registry name of the method this definition belongs to
    pub fn method(&self) -> &'static str {
        match self {
            MeasurementDefinition::UdpPing(_) => super::UDP_PING,
            MeasurementDefinition::Traceroute(_) => super::TRACEROUTE,
            MeasurementDefinition::Snmp(_) => super::SNMP,
        }
    }

    /// Target host, if the method has a single one
    pub fn host(&self) -> Option<&str> {
        match self {
            MeasurementDefinition::UdpPing(d) => Some(&d.host),
            MeasurementDefinition::Traceroute(d) => Some(&d.host),
            MeasurementDefinition::Snmp(_) => None,
        }
    }
}
