//! Deterministic in-process transport
//!
//! `ScriptedTransport` answers every opened socket from a closure instead of
//! the network. It drives offline runs and the test suite, and counts opened
//! and closed channels so socket release can be checked.

use super::{
    ProbeChannel, ProbeTransport, ReceiveEvent, SocketSpec, TransportError, ICMP_DEST_UNREACH,
    ICMP_EXC_TTL, ICMP_TIME_EXCEEDED,
};
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fake clock origin for scripted timestamps (microseconds)
const SCRIPTED_EPOCH_US: u64 = 1_700_000_000_000_000;

/// How a scripted socket behaves for one probe cycle
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// A router answers with ICMP time exceeded
    TtlExceeded {
        /// Router address
        from: IpAddr,
        /// Round-trip time in microseconds
        rtt_us: u64,
    },
    /// The target answers with ICMP port unreachable
    Unreachable {
        /// Target address
        from: IpAddr,
        /// Round-trip time in microseconds
        rtt_us: u64,
    },
    /// Any other ICMP message
    Icmp {
        /// ICMP type
        icmp_type: u8,
        /// ICMP code
        icmp_code: u8,
        /// Sender address
        from: IpAddr,
        /// Round-trip time in microseconds
        rtt_us: u64,
    },
    /// The target answers with a datagram
    Datagram {
        /// Reply payload
        payload: Vec<u8>,
        /// Round-trip time in microseconds
        rtt_us: u64,
    },
    /// The target answers with a datagram derived from the sent payload
    Answer {
        /// Builds the reply from the probe payload
        respond: fn(&[u8]) -> Vec<u8>,
        /// Round-trip time in microseconds
        rtt_us: u64,
    },
    /// Several events in order, e.g. an ignored ICMP followed by a real one
    Sequence(Vec<ScriptedReply>),
    /// Nothing comes back
    Silence,
    /// Opening the socket fails
    OpenError,
    /// Sending the datagram fails
    SendError,
    /// Waiting for the response fails
    ReceiveError,
}

type Responder = dyn Fn(&SocketSpec) -> ScriptedReply + Send + Sync;

/// Transport whose sockets replay scripted replies
#[derive(Clone)]
pub struct ScriptedTransport {
    responder: Arc<Responder>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    sent: Arc<AtomicUsize>,
    clock: Arc<AtomicU64>,
}

impl ScriptedTransport {
    /// Create a transport answering each socket with `responder(spec)`
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&SocketSpec) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(AtomicUsize::new(0)),
            clock: Arc::new(AtomicU64::new(SCRIPTED_EPOCH_US)),
        }
    }

    /// Number of sockets opened successfully
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of sockets closed
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of datagrams sent
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("opened", &self.opened())
            .field("closed", &self.closed())
            .field("sent", &self.sent())
            .finish()
    }
}

impl ProbeTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&self, spec: &SocketSpec) -> Result<Box<dyn ProbeChannel>, TransportError> {
        let reply = (self.responder)(spec);
        if matches!(reply, ScriptedReply::OpenError) {
            return Err(TransportError::io(
                "socket",
                io::Error::new(io::ErrorKind::PermissionDenied, "scripted open failure"),
            ));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        let pending = match reply {
            ScriptedReply::Sequence(replies) => replies,
            other => vec![other],
        };

        Ok(Box::new(ScriptedChannel {
            pending,
            sent_at: None,
            last_payload: Vec::new(),
            closed: self.closed.clone(),
            sent: self.sent.clone(),
            clock: self.clock.clone(),
        }))
    }
}

struct ScriptedChannel {
    pending: Vec<ScriptedReply>,
    sent_at: Option<u64>,
    last_payload: Vec<u8>,
    closed: Arc<AtomicUsize>,
    sent: Arc<AtomicUsize>,
    clock: Arc<AtomicU64>,
}

impl ProbeChannel for ScriptedChannel {
    fn send(&mut self, payload: &[u8]) -> io::Result<u64> {
        if matches!(self.pending.first(), Some(ScriptedReply::SendError)) {
            return Err(io::Error::new(
                io::ErrorKind::NetworkUnreachable,
                "scripted send failure",
            ));
        }
        // Each send advances the fake clock by a second so cycles never overlap
        let now = self.clock.fetch_add(1_000_000, Ordering::SeqCst);
        self.sent_at = Some(now);
        self.last_payload = payload.to_vec();
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(now)
    }

    fn receive(&mut self, wait: Duration) -> io::Result<Option<ReceiveEvent>> {
        let Some(sent_at) = self.sent_at else {
            return Ok(None);
        };
        if self.pending.is_empty() {
            // Behave like a quiet socket so timeouts still take real time
            std::thread::sleep(wait);
            return Ok(None);
        }

        let reply = self.pending.remove(0);
        if matches!(reply, ScriptedReply::ReceiveError) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted receive failure",
            ));
        }
        let event = match reply {
            ScriptedReply::TtlExceeded { from, rtt_us } => Some(ReceiveEvent::IcmpError {
                icmp_type: ICMP_TIME_EXCEEDED,
                icmp_code: ICMP_EXC_TTL,
                offender: Some(from),
                timestamp_us: Some(sent_at + rtt_us),
            }),
            ScriptedReply::Unreachable { from, rtt_us } => Some(ReceiveEvent::IcmpError {
                icmp_type: ICMP_DEST_UNREACH,
                icmp_code: 3,
                offender: Some(from),
                timestamp_us: Some(sent_at + rtt_us),
            }),
            ScriptedReply::Icmp {
                icmp_type,
                icmp_code,
                from,
                rtt_us,
            } => Some(ReceiveEvent::IcmpError {
                icmp_type,
                icmp_code,
                offender: Some(from),
                timestamp_us: Some(sent_at + rtt_us),
            }),
            ScriptedReply::Datagram { payload, rtt_us } => Some(ReceiveEvent::Datagram {
                payload,
                timestamp_us: Some(sent_at + rtt_us),
            }),
            ScriptedReply::Answer { respond, rtt_us } => Some(ReceiveEvent::Datagram {
                payload: respond(&self.last_payload),
                timestamp_us: Some(sent_at + rtt_us),
            }),
            ScriptedReply::Sequence(_)
            | ScriptedReply::Silence
            | ScriptedReply::OpenError
            | ScriptedReply::SendError
            | ScriptedReply::ReceiveError => None,
        };
        Ok(event)
    }
}

impl Drop for ScriptedChannel {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn spec(ttl: u8) -> SocketSpec {
        SocketSpec {
            host: "192.0.2.1".to_string(),
            source_port: 40000,
            destination_port: 33434,
            ttl,
        }
    }

    #[test]
    fn test_scripted_ttl_exceeded() {
        let router = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let transport = ScriptedTransport::new(move |_| ScriptedReply::TtlExceeded {
            from: router,
            rtt_us: 1500,
        });

        let mut channel = transport.open(&spec(1)).unwrap();
        let sent_at = channel.send(b"x").unwrap();
        let event = channel.receive(Duration::from_millis(10)).unwrap();

        assert_eq!(
            event,
            Some(ReceiveEvent::IcmpError {
                icmp_type: ICMP_TIME_EXCEEDED,
                icmp_code: ICMP_EXC_TTL,
                offender: Some(router),
                timestamp_us: Some(sent_at + 1500),
            })
        );
        drop(channel);
        assert_eq!(transport.opened(), 1);
        assert_eq!(transport.closed(), 1);
    }

    #[test]
    fn test_scripted_open_error_not_counted() {
        let transport = ScriptedTransport::new(|_| ScriptedReply::OpenError);
        assert!(transport.open(&spec(1)).is_err());
        assert_eq!(transport.opened(), 0);
        assert_eq!(transport.closed(), 0);
    }

    #[test]
    fn test_scripted_send_error() {
        let transport = ScriptedTransport::new(|_| ScriptedReply::SendError);
        let mut channel = transport.open(&spec(1)).unwrap();
        assert!(channel.send(b"x").is_err());
        assert_eq!(transport.sent(), 0);
    }

    #[test]
    fn test_scripted_answer_sees_payload() {
        fn reverse(payload: &[u8]) -> Vec<u8> {
            payload.iter().rev().copied().collect()
        }

        let transport = ScriptedTransport::new(|_| ScriptedReply::Answer {
            respond: reverse,
            rtt_us: 10,
        });
        let mut channel = transport.open(&spec(64)).unwrap();
        let sent_at = channel.send(b"abc").unwrap();
        assert_eq!(
            channel.receive(Duration::from_millis(1)).unwrap(),
            Some(ReceiveEvent::Datagram {
                payload: b"cba".to_vec(),
                timestamp_us: Some(sent_at + 10),
            })
        );
    }

    #[test]
    fn test_scripted_silence() {
        let transport = ScriptedTransport::new(|_| ScriptedReply::Silence);
        let mut channel = transport.open(&spec(1)).unwrap();
        channel.send(b"x").unwrap();
        assert_eq!(channel.receive(Duration::from_millis(1)).unwrap(), None);
        assert_eq!(channel.receive(Duration::from_millis(1)).unwrap(), None);
    }
}
