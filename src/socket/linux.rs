//! Linux UDP probe transport using IP_RECVERR
//!
//! Each probe gets its own connected UDP socket. ICMP errors provoked by the
//! datagram (TTL exceeded, port unreachable) are queued by the kernel on that
//! socket and read back with `recvmsg(MSG_ERRQUEUE)`, so no raw socket and no
//! root privileges are needed. `SO_TIMESTAMP` makes the kernel attach the
//! receive time to every message.

use super::{now_micros, ProbeChannel, ProbeTransport, ReceiveEvent, SocketSpec, TransportError};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::ptr;
use std::time::Duration;

// Linux specific constants for IP_RECVERR
const SO_EE_ORIGIN_ICMP: u8 = 2;

const PAYLOAD_BUF_LEN: usize = 1280;
const CONTROL_BUF_LEN: usize = 1024;

// sock_extended_err structure from Linux
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct SockExtendedErr {
    ee_errno: u32,
    ee_origin: u8,
    ee_type: u8,
    ee_code: u8,
    ee_pad: u8,
    ee_info: u32,
    ee_data: u32,
}

/// Decoded `recvmsg` output
struct RawMessage {
    payload: Vec<u8>,
    timestamp_us: Option<u64>,
    icmp: Option<(SockExtendedErr, Option<Ipv4Addr>)>,
}

/// Probe transport backed by `IP_RECVERR` UDP sockets
#[derive(Debug, Default, Clone, Copy)]
pub struct RecvErrTransport;

impl RecvErrTransport {
    /// Create the transport
    pub fn new() -> Self {
        Self
    }
}

impl ProbeTransport for RecvErrTransport {
    fn name(&self) -> &'static str {
        "udp-recverr"
    }

    fn open(&self, spec: &SocketSpec) -> Result<Box<dyn ProbeChannel>, TransportError> {
        let target = resolve_ipv4(&spec.host)?;

        // The socket is closed on drop, including on every early return below
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TransportError::io("socket", e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::io("setsockopt SO_REUSEADDR", e))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, spec.source_port);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| TransportError::io("bind", e))?;

        let fd = socket.as_raw_fd();
        set_int_option(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TIMESTAMP,
            1,
            "setsockopt SO_TIMESTAMP",
        )?;
        if spec.ttl != 0 {
            set_int_option(
                fd,
                libc::IPPROTO_IP,
                libc::IP_TTL,
                i32::from(spec.ttl),
                "setsockopt IP_TTL",
            )?;
        }

        let target_addr = SocketAddrV4::new(target, spec.destination_port);
        socket
            .connect(&target_addr.into())
            .map_err(|e| TransportError::io("connect", e))?;

        set_int_option(
            fd,
            libc::IPPROTO_IP,
            libc::IP_RECVERR,
            1,
            "setsockopt IP_RECVERR",
        )?;

        Ok(Box::new(RecvErrChannel { socket }))
    }
}

/// One connected probe socket
struct RecvErrChannel {
    socket: Socket,
}

impl RecvErrChannel {
    fn recv_message(&self, flags: libc::c_int) -> io::Result<Option<RawMessage>> {
        let mut buf = [0u8; PAYLOAD_BUF_LEN];
        let mut control = [0u8; CONTROL_BUF_LEN];

        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
            iov_len: buf.len(),
        };

        // Field widths of msghdr differ between libc flavours, so start zeroed
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = control.len() as _;

        let ret = unsafe {
            libc::recvmsg(
                self.socket.as_raw_fd(),
                &mut msg,
                flags | libc::MSG_DONTWAIT,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err);
        }

        let mut message = RawMessage {
            payload: buf[..ret as usize].to_vec(),
            timestamp_us: None,
            icmp: None,
        };

        let offender_len = unsafe {
            libc::CMSG_LEN((mem::size_of::<SockExtendedErr>() + mem::size_of::<libc::sockaddr_in>()) as u32)
        } as usize;

        let mut cmsg: *const libc::cmsghdr = unsafe { libc::CMSG_FIRSTHDR(&msg) };
        while !cmsg.is_null() {
            let header = unsafe { ptr::read_unaligned(cmsg) };
            let data = unsafe { libc::CMSG_DATA(cmsg) };

            if header.cmsg_level == libc::SOL_SOCKET && header.cmsg_type == libc::SO_TIMESTAMP {
                let tv = unsafe { ptr::read_unaligned(data as *const libc::timeval) };
                message.timestamp_us = Some(tv.tv_sec as u64 * 1_000_000 + tv.tv_usec as u64);
            } else if header.cmsg_level == libc::IPPROTO_IP && header.cmsg_type == libc::IP_RECVERR
            {
                let ee = unsafe { ptr::read_unaligned(data as *const SockExtendedErr) };
                if ee.ee_origin == SO_EE_ORIGIN_ICMP {
                    // The offending address follows the SockExtendedErr structure
                    let offender = if header.cmsg_len as usize >= offender_len {
                        let addr = unsafe {
                            ptr::read_unaligned(
                                data.add(mem::size_of::<SockExtendedErr>())
                                    as *const libc::sockaddr_in,
                            )
                        };
                        (i32::from(addr.sin_family) == libc::AF_INET)
                            .then(|| Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)))
                    } else {
                        None
                    };
                    message.icmp = Some((ee, offender));
                }
            }

            cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
        }

        Ok(Some(message))
    }
}

impl ProbeChannel for RecvErrChannel {
    fn send(&mut self, payload: &[u8]) -> io::Result<u64> {
        let sent_at = now_micros();
        self.socket.send(payload)?;
        Ok(sent_at)
    }

    fn receive(&mut self, wait: Duration) -> io::Result<Option<ReceiveEvent>> {
        let mut pfd = libc::pollfd {
            fd: self.socket.as_raw_fd(),
            events: libc::POLLIN | libc::POLLERR,
            revents: 0,
        };
        let timeout_ms = wait.as_millis().min(i32::MAX as u128) as libc::c_int;

        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err);
        }
        if ret == 0 || pfd.revents == 0 {
            return Ok(None);
        }

        if pfd.revents & libc::POLLERR != 0 {
            let Some(message) = self.recv_message(libc::MSG_ERRQUEUE)? else {
                return Ok(None);
            };
            return Ok(message.icmp.map(|(ee, offender)| ReceiveEvent::IcmpError {
                icmp_type: ee.ee_type,
                icmp_code: ee.ee_code,
                offender: offender.map(IpAddr::V4),
                timestamp_us: message.timestamp_us,
            }));
        }

        Ok(self
            .recv_message(0)?
            .map(|message| ReceiveEvent::Datagram {
                payload: message.payload,
                timestamp_us: message.timestamp_us,
            }))
    }
}

fn set_int_option(
    fd: libc::c_int,
    level: libc::c_int,
    name: libc::c_int,
    value: i32,
    op: &'static str,
) -> Result<(), TransportError> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const i32 as *const libc::c_void,
            mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(TransportError::io(op, io::Error::last_os_error()));
    }
    Ok(())
}

/// Resolve a host to its first IPv4 address
fn resolve_ipv4(host: &str) -> Result<Ipv4Addr, TransportError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let addrs = (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| TransportError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| TransportError::Resolve {
            host: host.to_string(),
            reason: "no IPv4 address".to_string(),
        })
}
