use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::net::Ipv4Addr;

use crate::utils::{asn_from_dotted, u32_to_community_string};

/// Standard 4-byte community (RFC 1997)
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Community(pub u32);

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            0xffff_ff01 => write!(f, "no-export"),
            0xffff_ff02 => write!(f, "no-advertise"),
            0xffff_ff03 => write!(f, "no-export-subconfed"),
            _ => write!(f, "{}", u32_to_community_string(self.0)),
        }
    }
}

impl TryFrom<&str> for Community {
    type Error = io::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let invalid = || io::Error::new(io::ErrorKind::InvalidInput, "Invalid community");
        match value {
            "no-export" => return Ok(Community(0xffff_ff01)),
            "no-advertise" => return Ok(Community(0xffff_ff02)),
            "no-export-subconfed" => return Ok(Community(0xffff_ff03)),
            _ => (),
        }
        let chunks: Vec<_> = value.split(':').collect();
        match chunks.len() {
            1 => chunks[0].parse().map(Community).map_err(|_| invalid()),
            2 => {
                let high: u32 = chunks[0].parse().map_err(|_| invalid())?;
                let low: u32 = chunks[1].parse().map_err(|_| invalid())?;
                if high > 0xffff || low > 0xffff {
                    return Err(invalid());
                }
                Ok(Community((high << 16) + low))
            }
            _ => Err(invalid()),
        }
    }
}

/// Large community (RFC 8092): three 4-byte words rendered `X:Y:Z`
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct LargeCommunity {
    pub global: u32,
    pub local1: u32,
    pub local2: u32,
}

impl fmt::Display for LargeCommunity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.global, self.local1, self.local2)
    }
}

impl TryFrom<&str> for LargeCommunity {
    type Error = io::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let invalid = || io::Error::new(io::ErrorKind::InvalidInput, "Invalid large community");
        let chunks: Vec<_> = value.split(':').collect();
        if chunks.len() != 3 {
            return Err(invalid());
        }
        Ok(LargeCommunity {
            global: chunks[0].parse().map_err(|_| invalid())?,
            local1: chunks[1].parse().map_err(|_| invalid())?,
            local2: chunks[2].parse().map_err(|_| invalid())?,
        })
    }
}

// Extended community type/subtype bytes this speaker renders structurally
const EXT_TWO_OCTET_AS: u8 = 0x00;
const EXT_IPV4: u8 = 0x01;
const EXT_FOUR_OCTET_AS: u8 = 0x02;
const EXT_OPAQUE: u8 = 0x03;
const EXT_NON_TRANSITIVE: u8 = 0x40;

const SUBTYPE_ROUTE_TARGET: u8 = 0x02;
const SUBTYPE_ROUTE_ORIGIN: u8 = 0x03;
const SUBTYPE_ENCAPSULATION: u8 = 0x0c;
const SUBTYPE_TRAFFIC_RATE: u8 = 0x06;
const SUBTYPE_TRAFFIC_ACTION: u8 = 0x07;
const SUBTYPE_REDIRECT: u8 = 0x08;
const SUBTYPE_TRAFFIC_MARK: u8 = 0x09;
const SUBTYPE_LINK_BANDWIDTH: u8 = 0x04;
const SUBTYPE_MUP: u8 = 0x00;

/// Typed 8-byte extended community (RFC 4360 and friends). The raw bytes are
/// the storage; unknown subtypes round-trip untouched.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ExtendedCommunity(pub [u8; 8]);

impl ExtendedCommunity {
    pub fn route_target(asn: u32, number: u32) -> Self {
        let mut buf = [0u8; 8];
        if asn > 0xffff {
            buf[0] = EXT_FOUR_OCTET_AS;
            buf[1] = SUBTYPE_ROUTE_TARGET;
            buf[2..6].copy_from_slice(&asn.to_be_bytes());
            buf[6..8].copy_from_slice(&(number as u16).to_be_bytes());
        } else {
            buf[0] = EXT_TWO_OCTET_AS;
            buf[1] = SUBTYPE_ROUTE_TARGET;
            buf[2..4].copy_from_slice(&(asn as u16).to_be_bytes());
            buf[4..8].copy_from_slice(&number.to_be_bytes());
        }
        Self(buf)
    }

    pub fn route_origin(asn: u16, number: u32) -> Self {
        let mut buf = [0u8; 8];
        buf[0] = EXT_TWO_OCTET_AS;
        buf[1] = SUBTYPE_ROUTE_ORIGIN;
        buf[2..4].copy_from_slice(&asn.to_be_bytes());
        buf[4..8].copy_from_slice(&number.to_be_bytes());
        Self(buf)
    }

    /// FlowSpec traffic-rate in bytes/second; rate 0 drops the traffic
    pub fn traffic_rate(asn: u16, rate: f32) -> Self {
        let mut buf = [0u8; 8];
        buf[0] = 0x80;
        buf[1] = SUBTYPE_TRAFFIC_RATE;
        buf[2..4].copy_from_slice(&asn.to_be_bytes());
        buf[4..8].copy_from_slice(&rate.to_bits().to_be_bytes());
        Self(buf)
    }

    pub fn traffic_action(sample: bool, terminal: bool) -> Self {
        let mut buf = [0u8; 8];
        buf[0] = 0x80;
        buf[1] = SUBTYPE_TRAFFIC_ACTION;
        buf[7] = u8::from(sample) << 1 | u8::from(terminal);
        Self(buf)
    }

    pub fn redirect(asn: u16, number: u32) -> Self {
        let mut buf = [0u8; 8];
        buf[0] = 0x80;
        buf[1] = SUBTYPE_REDIRECT;
        buf[2..4].copy_from_slice(&asn.to_be_bytes());
        buf[4..8].copy_from_slice(&number.to_be_bytes());
        Self(buf)
    }

    pub fn traffic_mark(dscp: u8) -> Self {
        let mut buf = [0u8; 8];
        buf[0] = 0x80;
        buf[1] = SUBTYPE_TRAFFIC_MARK;
        buf[7] = dscp;
        Self(buf)
    }

    pub fn link_bandwidth(asn: u16, bytes_per_second: f32) -> Self {
        let mut buf = [0u8; 8];
        buf[0] = EXT_NON_TRANSITIVE;
        buf[1] = SUBTYPE_LINK_BANDWIDTH;
        buf[2..4].copy_from_slice(&asn.to_be_bytes());
        buf[4..8].copy_from_slice(&bytes_per_second.to_bits().to_be_bytes());
        Self(buf)
    }

    pub fn encapsulation(tunnel_type: u16) -> Self {
        let mut buf = [0u8; 8];
        buf[0] = EXT_OPAQUE;
        buf[1] = SUBTYPE_ENCAPSULATION;
        buf[6..8].copy_from_slice(&tunnel_type.to_be_bytes());
        Self(buf)
    }

    pub fn mup_direct_segment(asn: u16, id: u32) -> Self {
        let mut buf = [0u8; 8];
        buf[0] = 0x0c;
        buf[1] = SUBTYPE_MUP;
        buf[2..4].copy_from_slice(&asn.to_be_bytes());
        buf[4..8].copy_from_slice(&id.to_be_bytes());
        Self(buf)
    }

    pub fn is_transitive(&self) -> bool {
        self.0[0] & 0x40 == 0
    }

    fn two_octet_value(&self) -> (u16, u32) {
        (
            u16::from_be_bytes([self.0[2], self.0[3]]),
            u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]]),
        )
    }
}

impl fmt::Display for ExtendedCommunity {
    /// The catalogue the API event encoder relies on; anything unrecognised
    /// renders as raw hex
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (kind, subtype) = (self.0[0], self.0[1]);
        match (kind & 0x3f, subtype) {
            (EXT_TWO_OCTET_AS, SUBTYPE_ROUTE_TARGET) => {
                let (asn, value) = self.two_octet_value();
                write!(f, "rt:{}:{}", asn, value)
            }
            (EXT_FOUR_OCTET_AS, SUBTYPE_ROUTE_TARGET) => {
                let asn = u32::from_be_bytes([self.0[2], self.0[3], self.0[4], self.0[5]]);
                let value = u16::from_be_bytes([self.0[6], self.0[7]]);
                write!(f, "rt:{}:{}", asn, value)
            }
            (EXT_IPV4, SUBTYPE_ROUTE_TARGET) => {
                let ip = Ipv4Addr::new(self.0[2], self.0[3], self.0[4], self.0[5]);
                let value = u16::from_be_bytes([self.0[6], self.0[7]]);
                write!(f, "target:{}:{}", ip, value)
            }
            (EXT_TWO_OCTET_AS, SUBTYPE_ROUTE_ORIGIN) => {
                let (asn, value) = self.two_octet_value();
                write!(f, "origin:{}:{}", asn, value)
            }
            (EXT_IPV4, SUBTYPE_ROUTE_ORIGIN) => {
                let ip = Ipv4Addr::new(self.0[2], self.0[3], self.0[4], self.0[5]);
                let value = u16::from_be_bytes([self.0[6], self.0[7]]);
                write!(f, "origin:{}:{}", ip, value)
            }
            (EXT_TWO_OCTET_AS, SUBTYPE_TRAFFIC_RATE) => {
                let (_asn, bits) = self.two_octet_value();
                let rate = f32::from_bits(bits);
                if rate <= 0.0 {
                    write!(f, "rate-limit:discard")
                } else {
                    write!(f, "rate-limit:{}", rate as u64)
                }
            }
            (EXT_TWO_OCTET_AS, SUBTYPE_TRAFFIC_ACTION) => {
                if self.0[7] & 0x2 != 0 {
                    write!(f, "traffic-action:sample")
                } else {
                    write!(f, "traffic-action:terminal")
                }
            }
            (EXT_TWO_OCTET_AS, SUBTYPE_REDIRECT) => {
                let (asn, value) = self.two_octet_value();
                write!(f, "redirect:{}:{}", asn, value)
            }
            (EXT_TWO_OCTET_AS, SUBTYPE_TRAFFIC_MARK) => {
                write!(f, "mark:{}", self.0[7])
            }
            (EXT_TWO_OCTET_AS, SUBTYPE_LINK_BANDWIDTH) if kind == EXT_NON_TRANSITIVE => {
                let (asn, bits) = self.two_octet_value();
                write!(f, "bandwidth:{}:{}", asn, f32::from_bits(bits) as u64)
            }
            (EXT_OPAQUE, SUBTYPE_ENCAPSULATION) => {
                let tunnel = u16::from_be_bytes([self.0[6], self.0[7]]);
                let name = match tunnel {
                    1 => "l2tpv3",
                    2 => "gre",
                    7 => "vxlan",
                    8 => "nvgre",
                    9 => "mpls",
                    19 => "geneve",
                    _ => return write!(f, "encapsulation:{}", tunnel),
                };
                write!(f, "encapsulation:{}", name)
            }
            (0x0c, SUBTYPE_MUP) => {
                let (asn, value) = self.two_octet_value();
                write!(f, "mup:{}:{}", asn, value)
            }
            _ => write!(f, "0x{}", crate::utils::to_hex(&self.0)),
        }
    }
}

impl TryFrom<&str> for ExtendedCommunity {
    type Error = io::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let invalid =
            || io::Error::new(io::ErrorKind::InvalidInput, "Invalid extended community");
        let chunks: Vec<_> = value.split(':').collect();
        match chunks.as_slice() {
            ["rt", asn, number] => {
                let asn = asn_from_dotted(asn).map_err(|_| invalid())?;
                let number: u32 = number.parse().map_err(|_| invalid())?;
                Ok(ExtendedCommunity::route_target(asn, number))
            }
            ["origin", asn, number] => Ok(ExtendedCommunity::route_origin(
                asn.parse().map_err(|_| invalid())?,
                number.parse().map_err(|_| invalid())?,
            )),
            ["redirect", asn, number] => Ok(ExtendedCommunity::redirect(
                asn.parse().map_err(|_| invalid())?,
                number.parse().map_err(|_| invalid())?,
            )),
            ["rate-limit", "discard"] => Ok(ExtendedCommunity::traffic_rate(0, 0.0)),
            ["rate-limit", rate] => Ok(ExtendedCommunity::traffic_rate(
                0,
                rate.parse().map_err(|_| invalid())?,
            )),
            ["mark", dscp] => Ok(ExtendedCommunity::traffic_mark(
                dscp.parse().map_err(|_| invalid())?,
            )),
            ["encapsulation", kind] => {
                let tunnel = match *kind {
                    "l2tpv3" => 1,
                    "gre" => 2,
                    "vxlan" => 7,
                    "nvgre" => 8,
                    "mpls" => 9,
                    "geneve" => 19,
                    other => other.parse().map_err(|_| invalid())?,
                };
                Ok(ExtendedCommunity::encapsulation(tunnel))
            }
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn test_standard_display_and_parse() {
        assert_eq!(Community(0xfde80001).to_string(), "65000:1");
        assert_eq!(Community::try_from("65000:1").unwrap(), Community(0xfde80001));
        assert_eq!(
            Community::try_from("no-export").unwrap().to_string(),
            "no-export"
        );
        assert!(Community::try_from("70000:1").is_err());
    }

    #[test]
    fn test_large_community() {
        let lc = LargeCommunity::try_from("65000:1:2").unwrap();
        assert_eq!(lc.to_string(), "65000:1:2");
        assert!(LargeCommunity::try_from("65000:1").is_err());
    }

    #[test]
    fn test_route_target_forms() {
        let rt = ExtendedCommunity::route_target(65000, 1);
        assert_eq!(rt.to_string(), "rt:65000:1");
        assert_eq!(rt.0[0], EXT_TWO_OCTET_AS);
        let rt4 = ExtendedCommunity::route_target(200_000, 1);
        assert_eq!(rt4.0[0], EXT_FOUR_OCTET_AS);
        assert_eq!(rt4.to_string(), "rt:200000:1");
        assert_eq!(ExtendedCommunity::try_from("rt:65000:1").unwrap(), rt);
    }

    #[test]
    fn test_flowspec_actions() {
        assert_eq!(
            ExtendedCommunity::traffic_rate(0, 0.0).to_string(),
            "rate-limit:discard"
        );
        assert_eq!(
            ExtendedCommunity::traffic_rate(0, 1000.0).to_string(),
            "rate-limit:1000"
        );
        assert_eq!(
            ExtendedCommunity::redirect(65000, 12).to_string(),
            "redirect:65000:12"
        );
    }

    #[test]
    fn test_encapsulation() {
        assert_eq!(
            ExtendedCommunity::encapsulation(7).to_string(),
            "encapsulation:vxlan"
        );
        assert_eq!(
            ExtendedCommunity::try_from("encapsulation:vxlan").unwrap(),
            ExtendedCommunity::encapsulation(7)
        );
    }

    #[test]
    fn test_unknown_renders_hex() {
        let unknown = ExtendedCommunity([0x43, 0x99, 0, 0, 0, 0, 0, 1]);
        assert!(unknown.to_string().starts_with("0x4399"));
        assert!(!unknown.is_transitive());
    }
}
