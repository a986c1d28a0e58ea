use std::net::{IpAddr, Ipv6Addr};

use chrono::{DateTime, Duration, Utc};

/// Render an ASN in asdot notation (RFC 5396) when it doesn't fit in 2 bytes
pub fn asn_to_dotted(asn: u32) -> String {
    if asn < 65536 {
        format!("{}", asn)
    } else {
        format!("{}.{}", asn >> 16, asn & 0xffff)
    }
}

#[derive(Debug)]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Parse an ASN from either plain ("65000", "4259840100") or asdot ("65000.100") form
pub fn asn_from_dotted(value: &str) -> Result<u32, ParseError> {
    if let Some(pos) = value.find('.') {
        let (high, low) = value.split_at(pos);
        let high: u16 = high
            .parse()
            .map_err(|_| ParseError::new(format!("Invalid ASN: {}", value)))?;
        let low: u16 = low[1..]
            .parse()
            .map_err(|_| ParseError::new(format!("Invalid ASN: {}", value)))?;
        Ok((u32::from(high) << 16) + u32::from(low))
    } else {
        value
            .parse()
            .map_err(|_| ParseError::new(format!("Invalid ASN: {}", value)))
    }
}

/// Interpret an MP next-hop byte slice as an IP address
pub fn bytes_to_nexthop(buf: &[u8]) -> Option<IpAddr> {
    match buf.len() {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(buf);
            Some(IpAddr::from(octets))
        }
        // 16 or 32 (global + link-local); the global address leads
        16 | 32 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        // RD-prefixed next-hop for VPN families
        12 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[8..]);
            Some(IpAddr::from(octets))
        }
        24 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[8..]);
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

pub fn get_elapsed_time(time: DateTime<Utc>) -> Duration {
    Utc::now().signed_duration_since(time)
}

pub fn format_elapsed_time(elapsed: Duration) -> String {
    let days = elapsed.num_days();
    let hours = elapsed.num_hours() - (days * 24);
    let mins = elapsed.num_minutes() - (days * 1440) - (hours * 60);
    let secs = elapsed.num_seconds() - (days * 86_400) - (hours * 3600) - (mins * 60);
    if days > 0 {
        format!("{}d{:02}:{:02}:{:02}", days, hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    }
}

pub fn format_time_as_elapsed(time: DateTime<Utc>) -> String {
    format_elapsed_time(get_elapsed_time(time))
}

/// Render bytes as contiguous lowercase hex (used for unknown attributes and indexes)
pub fn to_hex(buf: &[u8]) -> String {
    let mut out = String::with_capacity(buf.len() * 2);
    for b in buf {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub fn u32_to_community_string(value: u32) -> String {
    format!("{}:{}", value >> 16, value & 0xffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asn_to_dotted() {
        assert_eq!(asn_to_dotted(100), "100".to_string());
        assert_eq!(asn_to_dotted(4259840100), "65000.100".to_string());
    }

    #[test]
    fn test_asn_from_dotted() {
        assert_eq!(asn_from_dotted("65000").unwrap(), 65000);
        assert_eq!(asn_from_dotted("65000.100").unwrap(), 4259840100);
        assert!(asn_from_dotted("65000.").is_err());
        assert!(asn_from_dotted("nope").is_err());
    }

    #[test]
    fn test_nexthop_decoding() {
        assert_eq!(
            bytes_to_nexthop(&[1, 2, 3, 4]),
            Some(IpAddr::from([1, 2, 3, 4]))
        );
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        let mut buf = [0u8; 16];
        if let IpAddr::V6(addr) = v6 {
            buf.copy_from_slice(&addr.octets());
        }
        assert_eq!(bytes_to_nexthop(&buf), Some(v6));
        // RD-prefixed VPN next-hop
        let mut vpn = vec![0u8; 8];
        vpn.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(bytes_to_nexthop(&vpn), Some(IpAddr::from([1, 2, 3, 4])));
        assert_eq!(bytes_to_nexthop(&[1, 2, 3]), None);
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0xde, 0xad, 0x01]), "dead01");
    }
}
