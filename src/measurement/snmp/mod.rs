//! SNMP device discovery
//!
//! Every address of the definition is asked for `sysDescr.0` with each
//! community in turn. An address counts as a device once a GetResponse with
//! the request's id and community comes back. What kind of device answered is
//! not interpreted.

mod hosts;
pub mod packet;

pub use hosts::{parse_hosts, MAX_HOSTS};

use super::{
    Measurement, MeasurementDefinition, MeasurementEnv, MeasurementError, MeasurementStatus,
    SnmpDefinition, SNMP,
};
use crate::config::timing;
use crate::result::MeasurementResult;
use crate::socket::{now_micros, ReceiveEvent, SocketSpec};
use packet::{Message, GET_RESPONSE, SYS_DESCR};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;
use tracing::{debug, info, warn};

/// SNMP agent port
pub const SNMP_PORT: u16 = 161;

/// An address that answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpDevice {
    /// Device address
    pub address: IpAddr,
    /// Community it answered to
    pub community: String,
    /// Round-trip time of the answered request in microseconds
    pub rtt: u64,
}

/// Result of an SNMP discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpReport {
    /// Devices in scan order
    pub devices: Vec<SnmpDevice>,
}

/// SNMP discovery measurement
pub struct Snmp {
    env: MeasurementEnv,
    definition: Option<SnmpDefinition>,
    hosts: Vec<Ipv4Addr>,
    status: MeasurementStatus,
    devices: Vec<SnmpDevice>,
}

impl Snmp {
    /// Create an unprepared discovery
    pub fn new(env: MeasurementEnv) -> Self {
        Self {
            env,
            definition: None,
            hosts: Vec::new(),
            status: MeasurementStatus::Unknown,
            devices: Vec::new(),
        }
    }

    /// Store an SNMP definition directly
    pub fn prepare_snmp(&mut self, definition: &SnmpDefinition) -> Result<(), MeasurementError> {
        if !matches!(definition.snmp_version, 1 | 2) {
            return Err(MeasurementError::Config(format!(
                "unsupported SNMP version {}",
                definition.snmp_version
            )));
        }
        if definition.community_list.is_empty() {
            return Err(MeasurementError::Config(
                "community_list must not be empty".to_string(),
            ));
        }
        if definition.retries_per_ip == 0 {
            return Err(MeasurementError::Config(
                "retries_per_ip must be at least 1".to_string(),
            ));
        }

        self.hosts = parse_hosts(&definition.host_addresses).map_err(MeasurementError::Config)?;
        self.definition = Some(definition.clone());
        self.devices.clear();
        self.status = MeasurementStatus::Unknown;
        Ok(())
    }

    /// Addresses the next run will scan
    pub fn hosts(&self) -> &[Ipv4Addr] {
        &self.hosts
    }

    /// Send one GetRequest and wait for the matching response
    ///
    /// Returns the RTT in microseconds, or `None` when the host stayed
    /// silent, refused the port, or the exchange failed locally.
    fn query(
        &self,
        definition: &SnmpDefinition,
        host: Ipv4Addr,
        community: &str,
    ) -> Result<Option<u64>, MeasurementError> {
        let spec = SocketSpec {
            host: host.to_string(),
            source_port: 0,
            destination_port: SNMP_PORT,
            ttl: 0,
        };
        let mut channel = match self.env.transport.open(&spec) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(%host, error = %e, "Cannot open SNMP socket");
                return Ok(None);
            }
        };

        let version = i64::from(definition.snmp_version) - 1;
        let request_id = rand::rng().random_range(1..=i64::from(i32::MAX));
        let request = Message::get_request(version, community, request_id, SYS_DESCR);

        let sent_at = match channel.send(&request.encode()) {
            Ok(sent_at) => sent_at,
            Err(e) => {
                warn!(%host, error = %e, "SNMP send failed");
                return Ok(None);
            }
        };

        let deadline = Instant::now() + definition.wait_time;
        loop {
            if self.env.cancel.is_cancelled() {
                return Err(MeasurementError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match channel.receive(remaining.min(timing::poll_slice())) {
                Ok(Some(ReceiveEvent::Datagram {
                    payload,
                    timestamp_us,
                })) => {
                    let matched = Message::decode(&payload).is_some_and(|reply| {
                        reply.pdu == GET_RESPONSE
                            && reply.request_id == request_id
                            && reply.community == community
                    });
                    if matched {
                        let received = timestamp_us.unwrap_or_else(now_micros);
                        return Ok(Some(received.saturating_sub(sent_at)));
                    }
                    debug!(%host, "Ignoring unrelated datagram");
                }
                Ok(Some(ReceiveEvent::IcmpError { icmp_type, .. })) => {
                    debug!(%host, icmp_type, "SNMP request rejected");
                    return Ok(None);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%host, error = %e, "SNMP receive failed");
                    return Ok(None);
                }
            }
        }
    }

    fn discover(
        &self,
        definition: &SnmpDefinition,
        host: Ipv4Addr,
    ) -> Result<Option<SnmpDevice>, MeasurementError> {
        for community in &definition.community_list {
            for _ in 0..definition.retries_per_ip {
                if let Some(rtt) = self.query(definition, host, community)? {
                    return Ok(Some(SnmpDevice {
                        address: IpAddr::V4(host),
                        community: community.clone(),
                        rtt,
                    }));
                }
            }
        }
        Ok(None)
    }
}

impl Measurement for Snmp {
    fn method(&self) -> &'static str {
        SNMP
    }

    fn status(&self) -> MeasurementStatus {
        self.status
    }

    fn prepare(&mut self, definition: &MeasurementDefinition) -> Result<(), MeasurementError> {
        match definition {
            MeasurementDefinition::Snmp(d) => self.prepare_snmp(d),
            other => Err(MeasurementError::WrongDefinition {
                expected: SNMP,
                found: other.method(),
            }),
        }
    }

    fn start(&mut self) -> Result<(), MeasurementError> {
        let definition = self
            .definition
            .clone()
            .ok_or(MeasurementError::NotPrepared)?;

        self.devices.clear();
        self.status = MeasurementStatus::Running;

        let mut devices = Vec::new();
        for (index, &host) in self.hosts.iter().enumerate() {
            let outcome = if index > 0 {
                self.env
                    .pause(definition.send_interval)
                    .and_then(|()| self.discover(&definition, host))
            } else {
                self.discover(&definition, host)
            };

            match outcome {
                Ok(Some(device)) => {
                    debug!(address = %device.address, community = %device.community, "SNMP device found");
                    devices.push(device);
                }
                Ok(None) => {}
                Err(e) => {
                    self.status = MeasurementStatus::Unknown;
                    return Err(e);
                }
            }
        }

        info!(
            scanned = self.hosts.len(),
            found = devices.len(),
            "SNMP discovery finished"
        );
        self.devices = devices;
        self.status = MeasurementStatus::Finished;
        Ok(())
    }

    fn stop(&mut self) -> bool {
        self.env.cancel.cancel();
        let discarded = self.status == MeasurementStatus::Running || !self.devices.is_empty();
        self.devices.clear();
        self.status = MeasurementStatus::Unknown;
        discarded
    }

    fn result(&self) -> Option<MeasurementResult> {
        (self.status == MeasurementStatus::Finished).then(|| {
            MeasurementResult::Snmp(SnmpReport {
                devices: self.devices.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{ScriptedReply, ScriptedTransport};
    use packet::Value;
    use std::sync::Arc;
    use std::time::Duration;

    /// Agent that answers any community except "wrong"
    fn agent(request: &[u8]) -> Vec<u8> {
        let Some(mut message) = Message::decode(request) else {
            return Vec::new();
        };
        if message.community == "wrong" {
            return Vec::new();
        }
        message.pdu = GET_RESPONSE;
        message.value = Value::OctetString(b"test agent".to_vec());
        message.encode()
    }

    /// Answers with a stale request id
    fn confused_agent(request: &[u8]) -> Vec<u8> {
        let Some(mut message) = Message::decode(request) else {
            return Vec::new();
        };
        message.pdu = GET_RESPONSE;
        message.request_id += 1;
        message.encode()
    }

    /// Agent that only speaks SNMPv1 (wire version 0)
    fn v1_agent(request: &[u8]) -> Vec<u8> {
        match Message::decode(request) {
            Some(message) if message.version == 0 => agent(request),
            _ => Vec::new(),
        }
    }

    fn definition(hosts: &str) -> SnmpDefinition {
        let mut def = SnmpDefinition::new(hosts);
        def.wait_time = Duration::from_millis(10);
        def
    }

    fn run(transport: ScriptedTransport, def: &SnmpDefinition) -> Snmp {
        let mut snmp = Snmp::new(MeasurementEnv::new(Arc::new(transport)));
        snmp.prepare(&MeasurementDefinition::Snmp(def.clone()))
            .expect("prepare");
        snmp.start().expect("start");
        snmp
    }

    fn devices(snmp: &Snmp) -> Vec<SnmpDevice> {
        match snmp.result() {
            Some(MeasurementResult::Snmp(report)) => report.devices,
            other => panic!("expected SNMP result, got {other:?}"),
        }
    }

    #[test]
    fn test_discovers_answering_hosts() {
        let transport = ScriptedTransport::new(|spec| {
            assert_eq!(spec.destination_port, SNMP_PORT);
            if spec.host == "10.0.0.2" {
                ScriptedReply::Answer {
                    respond: agent,
                    rtt_us: 900,
                }
            } else {
                ScriptedReply::Silence
            }
        });
        let snmp = run(transport, &definition("10.0.0.1-10.0.0.3"));

        assert_eq!(
            devices(&snmp),
            vec![SnmpDevice {
                address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                community: "public".to_string(),
                rtt: 900,
            }]
        );
    }

    #[test]
    fn test_tries_communities_in_order() {
        let transport = ScriptedTransport::new(|_| ScriptedReply::Answer {
            respond: agent,
            rtt_us: 100,
        });

        let mut def = definition("10.0.0.9");
        def.community_list = vec!["wrong".to_string(), "secret".to_string()];
        def.retries_per_ip = 2;
        let snmp = run(transport.clone(), &def);

        let found = devices(&snmp);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].community, "secret");
        // Two attempts with the wrong community, one with the right one
        assert_eq!(transport.sent(), 3);
    }

    #[test]
    fn test_mismatched_request_id_ignored() {
        let transport = ScriptedTransport::new(|_| ScriptedReply::Answer {
            respond: confused_agent,
            rtt_us: 100,
        });
        let snmp = run(transport, &definition("10.0.0.9"));
        assert!(devices(&snmp).is_empty());
    }

    #[test]
    fn test_port_unreachable_skips_host() {
        let target = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        let transport = ScriptedTransport::new(move |_| ScriptedReply::Unreachable {
            from: target,
            rtt_us: 50,
        });
        let mut def = definition("10.0.0.9");
        def.retries_per_ip = 3;
        def.wait_time = Duration::from_secs(5);

        let started = Instant::now();
        let snmp = run(transport.clone(), &def);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(devices(&snmp).is_empty());
        assert_eq!(transport.opened(), 3);
        assert_eq!(transport.closed(), 3);
    }

    #[test]
    fn test_version_on_the_wire() {
        let transport = ScriptedTransport::new(|_| ScriptedReply::Answer {
            respond: v1_agent,
            rtt_us: 1,
        });

        let mut def = definition("10.0.0.9");
        def.snmp_version = 2;
        let snmp = run(transport.clone(), &def);
        assert!(devices(&snmp).is_empty());

        def.snmp_version = 1;
        let snmp = run(transport, &def);
        assert_eq!(devices(&snmp).len(), 1);
    }

    #[test]
    fn test_prepare_validation() {
        let transport = ScriptedTransport::new(|_| ScriptedReply::Silence);
        let mut snmp = Snmp::new(MeasurementEnv::new(Arc::new(transport)));

        let mut def = definition("10.0.0.1");
        def.snmp_version = 3;
        assert!(matches!(snmp.prepare_snmp(&def), Err(MeasurementError::Config(_))));

        let mut def = definition("10.0.0.1");
        def.community_list.clear();
        assert!(matches!(snmp.prepare_snmp(&def), Err(MeasurementError::Config(_))));

        let def = definition("not-an-address");
        assert!(matches!(snmp.prepare_snmp(&def), Err(MeasurementError::Config(_))));

        let def = definition("192.168.0.0/29");
        snmp.prepare_snmp(&def).unwrap();
        assert_eq!(snmp.hosts().len(), 6);
    }
}
