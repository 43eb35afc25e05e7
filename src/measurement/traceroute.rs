//! Traceroute built from UDP pings with increasing TTL
//!
//! For TTL 1, 2, ... one full [`UdpPing`] run is executed. Time-exceeded and
//! timed-out probes move on to the next TTL; a destination-unreachable error
//! or a reply datagram marks the end of the route and the run finishes after
//! the current TTL. The run also ends, normally, at [`MAX_HOPS`].

use super::udpping::{PingProbe, PingResponse, UdpPing};
use super::{
    Measurement, MeasurementDefinition, MeasurementEnv, MeasurementError, MeasurementStatus,
    PingType, RttStatistics, TracerouteDefinition, TRACEROUTE,
};
use crate::result::MeasurementResult;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::ops::RangeInclusive;
use tracing::{debug, info, warn};

/// TTL ceiling of a traceroute run
pub const MAX_HOPS: u8 = 20;

/// Ports picked for unset source/destination ports
pub const RANDOM_PORT_RANGE: RangeInclusive<u16> = 1024..=65535;

/// One probe of a traceroute run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    /// TTL the probe was sent with
    pub ttl: u8,
    /// The exchange itself; `probe.response` is the classification
    pub probe: PingProbe,
}

/// One probe in a hop report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopPing {
    /// Classification of the probe
    pub response: PingResponse,
    /// Round-trip time in microseconds
    pub rtt: Option<u64>,
}

/// Statistics of one TTL group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopReport {
    /// Index of the TTL group, starting at 0
    pub hop: usize,
    /// Responding node, if any probe got an ICMP error back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    /// Every probe of the group
    pub pings: Vec<HopPing>,
    /// TTL label, `hop + 1`
    pub ttl: usize,
    /// Smallest RTT in microseconds
    pub rtt_min: u64,
    /// Largest RTT in microseconds
    pub rtt_max: u64,
    /// Mean RTT in microseconds
    pub rtt_avg: f64,
    /// Population standard deviation of the RTTs
    pub rtt_stdev: f64,
    /// Number of answered probes
    pub rtt_count: usize,
}

/// Result of a traceroute run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteReport {
    /// Number of TTL groups
    pub hop_count: usize,
    /// Per-hop statistics, in TTL order
    pub results: Vec<HopReport>,
}

impl TracerouteReport {
    /// Group `hops` by TTL and compute the per-hop statistics
    pub fn from_hops(hops: &[Hop]) -> Self {
        let mut results: Vec<HopReport> = Vec::new();

        for group in hops.chunk_by(|a, b| a.ttl == b.ttl) {
            let rtts: Vec<u64> = group.iter().filter_map(|h| h.probe.rtt_us()).collect();
            let stats = RttStatistics::from_samples(&rtts);
            let index = results.len();

            results.push(HopReport {
                hop: index,
                address: group.iter().find_map(|h| h.probe.source),
                pings: group
                    .iter()
                    .map(|h| HopPing {
                        response: h.probe.response,
                        rtt: h.probe.rtt_us(),
                    })
                    .collect(),
                ttl: index + 1,
                rtt_min: stats.min,
                rtt_max: stats.max,
                rtt_avg: stats.avg,
                rtt_stdev: stats.stdev,
                rtt_count: stats.count,
            });
        }

        Self {
            hop_count: results.len(),
            results,
        }
    }
}

/// Traceroute measurement
pub struct Traceroute {
    env: MeasurementEnv,
    definition: Option<TracerouteDefinition>,
    status: MeasurementStatus,
    hops: Vec<Hop>,
    end_of_route: bool,
}

impl Traceroute {
    /// Create an unprepared traceroute
    pub fn new(env: MeasurementEnv) -> Self {
        Self {
            env,
            definition: None,
            status: MeasurementStatus::Unknown,
            hops: Vec::new(),
            end_of_route: false,
        }
    }

    /// Store a traceroute definition directly
    ///
    /// Unset ports are drawn from [`RANDOM_PORT_RANGE`] once here and stay
    /// fixed for every hop of every later run.
    pub fn prepare_traceroute(
        &mut self,
        definition: &TracerouteDefinition,
    ) -> Result<(), MeasurementError> {
        if definition.ping_type != PingType::Udp {
            return Err(MeasurementError::NotImplemented {
                feature: format!("{} traceroute", definition.ping_type),
            });
        }
        if definition.host.trim().is_empty() {
            return Err(MeasurementError::Config("host must not be empty".to_string()));
        }
        if definition.count == 0 {
            return Err(MeasurementError::Config("count must be at least 1".to_string()));
        }

        let mut definition = definition.clone();
        let mut rng = rand::rng();
        if definition.destination_port == 0 {
            definition.destination_port = rng.random_range(RANDOM_PORT_RANGE);
        }
        if definition.source_port == 0 {
            definition.source_port = rng.random_range(RANDOM_PORT_RANGE);
        }

        self.definition = Some(definition);
        self.hops.clear();
        self.end_of_route = false;
        self.status = MeasurementStatus::Unknown;
        Ok(())
    }

    /// Definition in effect after `prepare`
    pub fn definition(&self) -> Option<&TracerouteDefinition> {
        self.definition.as_ref()
    }

    /// Probes of the last finished run
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Whether the last run reached the destination
    pub fn end_of_route(&self) -> bool {
        self.end_of_route
    }

    fn abort(&mut self, error: MeasurementError) -> Result<(), MeasurementError> {
        self.hops.clear();
        self.end_of_route = false;
        self.status = match error {
            MeasurementError::Cancelled => MeasurementStatus::Unknown,
            _ => MeasurementStatus::Error,
        };
        Err(error)
    }
}

impl Measurement for Traceroute {
    fn method(&self) -> &'static str {
        TRACEROUTE
    }

    fn status(&self) -> MeasurementStatus {
        self.status
    }

    fn prepare(&mut self, definition: &MeasurementDefinition) -> Result<(), MeasurementError> {
        match definition {
            MeasurementDefinition::Traceroute(d) => self.prepare_traceroute(d),
            other => Err(MeasurementError::WrongDefinition {
                expected: TRACEROUTE,
                found: other.method(),
            }),
        }
    }

    fn start(&mut self) -> Result<(), MeasurementError> {
        let definition = self
            .definition
            .clone()
            .ok_or(MeasurementError::NotPrepared)?;

        self.hops.clear();
        self.end_of_route = false;
        self.status = MeasurementStatus::Running;
        info!(
            host = %definition.host,
            source_port = definition.source_port,
            destination_port = definition.destination_port,
            "Starting traceroute"
        );

        let mut ttl = 0u8;
        loop {
            ttl += 1;

            let mut ping = UdpPing::new(self.env.clone());
            if let Err(e) = ping.prepare_ping(&definition.ping_definition(ttl)) {
                warn!(host = %definition.host, ttl, error = %e, "Cannot prepare hop probe");
                return self.abort(e);
            }
            if let Err(e) = ping.start() {
                return self.abort(e);
            }

            for probe in ping.take_probes() {
                if probe.response.reached_destination() {
                    self.end_of_route = true;
                }
                self.hops.push(Hop { ttl, probe });
            }
            debug!(ttl, end_of_route = self.end_of_route, "Hop finished");

            if self.end_of_route || ttl >= MAX_HOPS {
                break;
            }
        }

        info!(
            host = %definition.host,
            hops = ttl,
            reached = self.end_of_route,
            "Traceroute finished"
        );
        self.status = MeasurementStatus::Finished;
        Ok(())
    }

    fn stop(&mut self) -> bool {
        self.env.cancel.cancel();
        let discarded = self.status == MeasurementStatus::Running || !self.hops.is_empty();
        self.hops.clear();
        self.end_of_route = false;
        self.status = MeasurementStatus::Unknown;
        discarded
    }

    fn result(&self) -> Option<MeasurementResult> {
        (self.status == MeasurementStatus::Finished)
            .then(|| MeasurementResult::Traceroute(TracerouteReport::from_hops(&self.hops)))
    }
}
