//! Address lists for SNMP discovery

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Largest number of addresses one definition may scan
pub const MAX_HOSTS: u32 = 65_536;

/// Expand a host list entry into addresses
///
/// Accepts a single IPv4 address, an inclusive range `first-last`, or a CIDR
/// block. A CIDR block yields its usable host addresses only.
pub fn parse_hosts(spec: &str) -> Result<Vec<Ipv4Addr>, String> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err("host_addresses must not be empty".to_string());
    }

    if spec.contains('/') {
        let net: Ipv4Net = spec
            .parse()
            .map_err(|e| format!("invalid CIDR block {spec:?}: {e}"))?;
        if net.prefix_len() < 16 {
            return Err(format!("CIDR block {spec:?} exceeds {MAX_HOSTS} addresses"));
        }
        return Ok(net.hosts().collect());
    }

    if let Some((first, last)) = spec.split_once('-') {
        let first = parse_addr(first)?;
        let last = parse_addr(last)?;
        let (first, last) = (u32::from(first), u32::from(last));
        if first > last {
            return Err(format!("range {spec:?} ends before it starts"));
        }
        if last - first >= MAX_HOSTS {
            return Err(format!("range {spec:?} exceeds {MAX_HOSTS} addresses"));
        }
        return Ok((first..=last).map(Ipv4Addr::from).collect());
    }

    Ok(vec![parse_addr(spec)?])
}

fn parse_addr(s: &str) -> Result<Ipv4Addr, String> {
    s.trim()
        .parse()
        .map_err(|e| format!("invalid IPv4 address {:?}: {e}", s.trim()))
}
