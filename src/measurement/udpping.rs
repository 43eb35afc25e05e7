//! UDP ping with ICMP error decoding
//!
//! Each cycle opens a fresh socket, sends one datagram and waits for the first
//! meaningful event: a TTL-exceeded or destination-unreachable error from the
//! socket error queue, or a datagram from the target. Source quench, redirect
//! and other ICMP messages are skipped and the wait goes on.

use super::{
    Measurement, MeasurementDefinition, MeasurementEnv, MeasurementError, MeasurementStatus,
    RttStatistics, UdpPingDefinition, UDP_PING,
};
use crate::config::timing;
use crate::result::MeasurementResult;
use crate::socket::{
    now_micros, ReceiveEvent, SocketSpec, ICMP_DEST_UNREACH, ICMP_EXC_TTL, ICMP_TIME_EXCEEDED,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Instant;
use tracing::{debug, warn};

/// Destination port used when none is configured
pub const DEFAULT_DESTINATION_PORT: u16 = 33434;

/// What came back for one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PingResponse {
    /// An intermediate router dropped the packet (ICMP time exceeded)
    TtlExceeded,
    /// The destination rejected the packet (ICMP destination unreachable)
    DestinationUnreachable,
    /// Nothing arrived before the receive timeout
    Timeout,
    /// The destination answered with a datagram
    UdpResponse,
    /// The cycle failed locally; see [`PingProbe::error`]
    Error,
}

impl PingResponse {
    /// Whether the probe reached the destination host
    pub fn reached_destination(self) -> bool {
        matches!(
            self,
            PingResponse::DestinationUnreachable | PingResponse::UdpResponse
        )
    }
}

/// One send/receive exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingProbe {
    /// Send timestamp in microseconds since the Unix epoch
    pub send_time_us: Option<u64>,
    /// Receive timestamp in microseconds since the Unix epoch
    pub recv_time_us: Option<u64>,
    /// Node that generated the ICMP error
    pub source: Option<IpAddr>,
    /// Classification
    pub response: PingResponse,
    /// Local failure description for [`PingResponse::Error`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PingProbe {
    fn new() -> Self {
        Self {
            send_time_us: None,
            recv_time_us: None,
            source: None,
            response: PingResponse::Timeout,
            error: None,
        }
    }

    fn failed(mut self, error: String) -> Self {
        self.response = PingResponse::Error;
        self.error = Some(error);
        self
    }

    /// Round-trip time in microseconds; `None` for timeouts and failed cycles
    pub fn rtt_us(&self) -> Option<u64> {
        match self.response {
            PingResponse::Timeout | PingResponse::Error => None,
            _ => self.recv_time_us?.checked_sub(self.send_time_us?),
        }
    }
}

/// Result of a UDP ping run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingReport {
    /// RTTs of the answered probes in microseconds, in send order
    pub rtts: Vec<u64>,
    /// Every probe, including timeouts and failed cycles
    pub probes: Vec<PingProbe>,
    /// Statistics over `rtts`
    pub statistics: RttStatistics,
}

impl PingReport {
    /// Build the report from raw probes
    pub fn from_probes(probes: Vec<PingProbe>) -> Self {
        let rtts: Vec<u64> = probes.iter().filter_map(PingProbe::rtt_us).collect();
        Self {
            statistics: RttStatistics::from_samples(&rtts),
            rtts,
            probes,
        }
    }
}

/// Map a kernel event to a probe classification
///
/// Returns `None` for events that do not end the wait.
fn classify(event: &ReceiveEvent) -> Option<PingResponse> {
    match *event {
        ReceiveEvent::IcmpError {
            icmp_type: ICMP_TIME_EXCEEDED,
            icmp_code: ICMP_EXC_TTL,
            ..
        } => Some(PingResponse::TtlExceeded),
        ReceiveEvent::IcmpError {
            icmp_type: ICMP_DEST_UNREACH,
            ..
        } => Some(PingResponse::DestinationUnreachable),
        ReceiveEvent::IcmpError { .. } => None,
        ReceiveEvent::Datagram { .. } => Some(PingResponse::UdpResponse),
    }
}

/// UDP ping measurement
pub struct UdpPing {
    env: MeasurementEnv,
    definition: Option<UdpPingDefinition>,
    status: MeasurementStatus,
    probes: Vec<PingProbe>,
}

impl UdpPing {
    /// Create an unprepared ping
    pub fn new(env: MeasurementEnv) -> Self {
        Self {
            env,
            definition: None,
            status: MeasurementStatus::Unknown,
            probes: Vec::new(),
        }
    }

    /// Store a ping definition directly
    pub fn prepare_ping(&mut self, definition: &UdpPingDefinition) -> Result<(), MeasurementError> {
        if definition.host.trim().is_empty() {
            return Err(MeasurementError::Config("host must not be empty".to_string()));
        }
        if definition.count == 0 {
            return Err(MeasurementError::Config("count must be at least 1".to_string()));
        }

        let mut definition = definition.clone();
        if definition.destination_port == 0 {
            definition.destination_port = DEFAULT_DESTINATION_PORT;
        }

        self.definition = Some(definition);
        self.probes.clear();
        self.status = MeasurementStatus::Unknown;
        Ok(())
    }

    /// Definition in effect after `prepare`
    pub fn definition(&self) -> Option<&UdpPingDefinition> {
        self.definition.as_ref()
    }

    /// Probes of the last run
    pub fn probes(&self) -> &[PingProbe] {
        &self.probes
    }

    /// Move the probes of the last run out of the measurement
    pub fn take_probes(&mut self) -> Vec<PingProbe> {
        std::mem::take(&mut self.probes)
    }

    /// One send/receive cycle; only cancellation is an error
    fn ping_once(
        &self,
        definition: &UdpPingDefinition,
        spec: &SocketSpec,
    ) -> Result<PingProbe, MeasurementError> {
        if self.env.cancel.is_cancelled() {
            return Err(MeasurementError::Cancelled);
        }
        let mut probe = PingProbe::new();

        // The channel is dropped, and the socket closed, on every return path
        let mut channel = match self.env.transport.open(spec) {
            Ok(channel) => channel,
            Err(e) => return Ok(probe.failed(e.to_string())),
        };

        match channel.send(&definition.payload) {
            Ok(sent_at) => probe.send_time_us = Some(sent_at),
            Err(e) => return Ok(probe.failed(format!("send: {e}"))),
        }

        let deadline = Instant::now() + definition.receive_timeout;
        let slice = timing::poll_slice();

        loop {
            if self.env.cancel.is_cancelled() {
                return Err(MeasurementError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(probe);
            }

            let event = match channel.receive(remaining.min(slice)) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => return Ok(probe.failed(format!("receive: {e}"))),
            };

            let Some(response) = classify(&event) else {
                debug!(?event, "Ignoring ICMP message");
                continue;
            };

            let (offender, timestamp) = match event {
                ReceiveEvent::IcmpError {
                    offender,
                    timestamp_us,
                    ..
                } => (offender, timestamp_us),
                ReceiveEvent::Datagram { timestamp_us, .. } => (None, timestamp_us),
            };
            probe.response = response;
            probe.source = offender;
            probe.recv_time_us = Some(timestamp.unwrap_or_else(now_micros));
            return Ok(probe);
        }
    }
}

impl Measurement for UdpPing {
    fn method(&self) -> &'static str {
        UDP_PING
    }

    fn status(&self) -> MeasurementStatus {
        self.status
    }

    fn prepare(&mut self, definition: &MeasurementDefinition) -> Result<(), MeasurementError> {
        match definition {
            MeasurementDefinition::UdpPing(d) => self.prepare_ping(d),
            other => Err(MeasurementError::WrongDefinition {
                expected: UDP_PING,
                found: other.method(),
            }),
        }
    }

    fn start(&mut self) -> Result<(), MeasurementError> {
        let definition = self
            .definition
            .clone()
            .ok_or(MeasurementError::NotPrepared)?;

        self.probes.clear();
        self.status = MeasurementStatus::Running;

        let spec = SocketSpec {
            host: definition.host.clone(),
            source_port: definition.source_port,
            destination_port: definition.destination_port,
            ttl: definition.ttl,
        };

        for cycle in 0..definition.count {
            let outcome = if cycle > 0 {
                self.env
                    .pause(definition.interval)
                    .and_then(|()| self.ping_once(&definition, &spec))
            } else {
                self.ping_once(&definition, &spec)
            };

            match outcome {
                Ok(probe) => {
                    if let Some(error) = &probe.error {
                        warn!(host = %definition.host, cycle, %error, "Probe cycle failed");
                    } else {
                        debug!(
                            host = %definition.host,
                            ttl = definition.ttl,
                            cycle,
                            response = ?probe.response,
                            rtt_us = ?probe.rtt_us(),
                            "Probe finished"
                        );
                    }
                    self.probes.push(probe);
                }
                Err(e) => {
                    self.probes.clear();
                    self.status = MeasurementStatus::Unknown;
                    return Err(e);
                }
            }
        }

        self.status = MeasurementStatus::Finished;
        Ok(())
    }

    fn stop(&mut self) -> bool {
        self.env.cancel.cancel();
        let discarded = self.status == MeasurementStatus::Running || !self.probes.is_empty();
        self.probes.clear();
        self.status = MeasurementStatus::Unknown;
        discarded
    }

    fn result(&self) -> Option<MeasurementResult> {
        (self.status == MeasurementStatus::Finished)
            .then(|| MeasurementResult::Ping(PingReport::from_probes(self.probes.clone())))
    }
}
