use std::fmt;
use std::io::{Cursor, Read};
use std::net::IpAddr;
use std::str::FromStr;

use byteorder::ReadBytesExt;
use ipnetwork::IpNetwork;

use super::qualifiers::{LabelStack, RouteDistinguisher};
use crate::message::error::{WireError, WireResult};
use crate::message::family::Afi;
use crate::utils::ParseError;

/// An IP prefix held as masked octets only, the way it sits in the NLRI
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Prefix {
    pub afi: Afi,
    pub length: u8,
    octets: Vec<u8>,
}

impl Prefix {
    pub fn new(afi: Afi, length: u8, octets: &[u8]) -> WireResult<Self> {
        let max_bits = (afi.address_len() * 8) as u8;
        if length > max_bits {
            return Err(WireError::nlri(vec![length]));
        }
        let byte_len = ((length as usize) + 7) / 8;
        if octets.len() < byte_len {
            return Err(WireError::nlri(octets.to_vec()));
        }
        let mut masked = octets[..byte_len].to_vec();
        // Zero any bits past the mask so equal prefixes index identically
        if length % 8 != 0 {
            if let Some(last) = masked.last_mut() {
                *last &= 0xffu8 << (8 - (length % 8));
            }
        }
        Ok(Self {
            afi,
            length,
            octets: masked,
        })
    }

    pub fn masked_octets(&self) -> &[u8] {
        &self.octets
    }

    pub fn byte_len(&self) -> usize {
        self.octets.len()
    }

    pub fn address(&self) -> IpAddr {
        match self.afi {
            Afi::Ipv6 => {
                let mut buf = [0u8; 16];
                buf[..self.octets.len()].copy_from_slice(&self.octets);
                IpAddr::from(buf)
            }
            _ => {
                let mut buf = [0u8; 4];
                buf[..self.octets.len().min(4)]
                    .copy_from_slice(&self.octets[..self.octets.len().min(4)]);
                IpAddr::from(buf)
            }
        }
    }

    /// Read `<mask><masked-octets>` from the stream
    pub fn parse(cur: &mut Cursor<&[u8]>, afi: Afi) -> WireResult<Self> {
        let length = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
        let max_bits = (afi.address_len() * 8) as u8;
        if length > max_bits {
            return Err(WireError::nlri(vec![length]));
        }
        let byte_len = ((length as usize) + 7) / 8;
        let mut octets = vec![0u8; byte_len];
        cur.read_exact(&mut octets)
            .map_err(|_| WireError::nlri(vec![length]))?;
        Self::new(afi, length, &octets)
    }

    pub fn pack(&self, buf: &mut Vec<u8>) {
        buf.push(self.length);
        buf.extend_from_slice(&self.octets);
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.address(), self.length)
    }
}

impl FromStr for Prefix {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let network: IpNetwork = value
            .parse()
            .map_err(|_| ParseError::new(format!("Invalid prefix: {}", value)))?;
        let (afi, octets) = match network.network() {
            IpAddr::V4(ip) => (Afi::Ipv4, ip.octets().to_vec()),
            IpAddr::V6(ip) => (Afi::Ipv6, ip.octets().to_vec()),
        };
        Prefix::new(afi, network.prefix(), &octets)
            .map_err(|_| ParseError::new(format!("Invalid prefix: {}", value)))
    }
}

/// Plain unicast/multicast prefix reachability
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PrefixNlri {
    pub prefix: Prefix,
    pub path_id: Option<u32>,
    packed: Vec<u8>,
}

impl PrefixNlri {
    pub fn new(prefix: Prefix, path_id: Option<u32>) -> Self {
        let mut packed = Vec::with_capacity(1 + prefix.byte_len());
        prefix.pack(&mut packed);
        Self {
            prefix,
            path_id,
            packed,
        }
    }

    pub fn parse(cur: &mut Cursor<&[u8]>, afi: Afi, path_id: Option<u32>) -> WireResult<Self> {
        let prefix = Prefix::parse(cur, afi)?;
        Ok(Self::new(prefix, path_id))
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for PrefixNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.prefix)?;
        if let Some(id) = self.path_id {
            write!(f, " path-information {}", id)?;
        }
        Ok(())
    }
}

/// Labeled unicast prefix (RFC 8277): label stack then prefix, with the
/// label bits folded into the mask length
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LabeledNlri {
    pub prefix: Prefix,
    pub labels: LabelStack,
    pub path_id: Option<u32>,
    packed: Vec<u8>,
}

impl LabeledNlri {
    pub fn new(prefix: Prefix, labels: LabelStack, path_id: Option<u32>) -> Self {
        let mut packed = Vec::with_capacity(1 + labels.len() * 3 + prefix.byte_len());
        packed.push(prefix.length + labels.bit_len());
        labels.pack(&mut packed);
        packed.extend_from_slice(prefix.masked_octets());
        Self {
            prefix,
            labels,
            path_id,
            packed,
        }
    }

    pub fn parse(cur: &mut Cursor<&[u8]>, afi: Afi, path_id: Option<u32>) -> WireResult<Self> {
        let len_bits = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
        if len_bits < 24 {
            return Err(WireError::nlri(vec![len_bits]));
        }
        let byte_len = ((len_bits as usize) + 7) / 8;
        let mut body = vec![0u8; byte_len];
        cur.read_exact(&mut body)
            .map_err(|_| WireError::nlri(vec![len_bits]))?;
        let (labels, used) =
            LabelStack::parse(&body, 8).ok_or_else(|| WireError::nlri(body.clone()))?;
        let prefix_bits = len_bits - (used * 8) as u8;
        let prefix = Prefix::new(afi, prefix_bits, &body[used..])?;
        Ok(Self::new(prefix, labels, path_id))
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for LabeledNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} label {}", self.prefix, self.labels)
    }
}

/// VPN prefix (RFC 4364/4659): labels, 8-byte RD, then the prefix
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VpnNlri {
    pub rd: RouteDistinguisher,
    pub prefix: Prefix,
    pub labels: LabelStack,
    pub path_id: Option<u32>,
    packed: Vec<u8>,
}

impl VpnNlri {
    pub fn new(
        rd: RouteDistinguisher,
        prefix: Prefix,
        labels: LabelStack,
        path_id: Option<u32>,
    ) -> Self {
        let mut packed = Vec::with_capacity(9 + labels.len() * 3 + prefix.byte_len());
        packed.push(prefix.length + labels.bit_len() + 64);
        labels.pack(&mut packed);
        rd.pack(&mut packed);
        packed.extend_from_slice(prefix.masked_octets());
        Self {
            rd,
            prefix,
            labels,
            path_id,
            packed,
        }
    }

    pub fn parse(cur: &mut Cursor<&[u8]>, afi: Afi, path_id: Option<u32>) -> WireResult<Self> {
        let len_bits = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
        if len_bits < 88 {
            return Err(WireError::nlri(vec![len_bits]));
        }
        let byte_len = ((len_bits as usize) + 7) / 8;
        let mut body = vec![0u8; byte_len];
        cur.read_exact(&mut body)
            .map_err(|_| WireError::nlri(vec![len_bits]))?;
        let (labels, used) =
            LabelStack::parse(&body, 8).ok_or_else(|| WireError::nlri(body.clone()))?;
        if body.len() < used + 8 {
            return Err(WireError::nlri(body));
        }
        let mut rd = [0u8; 8];
        rd.copy_from_slice(&body[used..used + 8]);
        let prefix_bits = len_bits - (used * 8) as u8 - 64;
        let prefix = Prefix::new(afi, prefix_bits, &body[used + 8..])?;
        Ok(Self::new(
            RouteDistinguisher(rd),
            prefix,
            labels,
            path_id,
        ))
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for VpnNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} rd {} label {}", self.prefix, self.rd, self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_pack() {
        let prefix: Prefix = "10.0.0.0/24".parse().unwrap();
        let mut buf = Vec::new();
        prefix.pack(&mut buf);
        assert_eq!(buf, vec![0x18, 0x0a, 0x00, 0x00]);
        assert_eq!(prefix.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn test_prefix_normalizes_host_bits() {
        let a = Prefix::new(Afi::Ipv4, 23, &[10, 0, 1]).unwrap();
        let b = Prefix::new(Afi::Ipv4, 23, &[10, 0, 0]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_prefix_parse_roundtrip() {
        let wire = [0x20u8, 0x20, 0x01, 0x0d, 0xb8];
        let mut cur = Cursor::new(&wire[..]);
        let prefix = Prefix::parse(&mut cur, Afi::Ipv6).unwrap();
        assert_eq!(prefix.to_string(), "2001:db8::/32");
        let mut buf = Vec::new();
        prefix.pack(&mut buf);
        assert_eq!(buf, wire);
    }

    #[test]
    fn test_prefix_rejects_bad_mask() {
        let wire = [0x29u8, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut cur = Cursor::new(&wire[..]);
        assert!(Prefix::parse(&mut cur, Afi::Ipv4).is_err());
    }

    #[test]
    fn test_labeled_nlri() {
        let prefix: Prefix = "10.0.0.0/24".parse().unwrap();
        let nlri = LabeledNlri::new(prefix, LabelStack::single(100), None);
        // 24 + 24 label bits, then the label entry, then the prefix
        assert_eq!(nlri.packed(), &[0x30, 0x00, 0x06, 0x41, 0x0a, 0x00, 0x00]);

        let mut cur = Cursor::new(nlri.packed());
        let parsed = LabeledNlri::parse(&mut cur, Afi::Ipv4, None).unwrap();
        assert_eq!(parsed, nlri);
    }

    #[test]
    fn test_vpn_nlri() {
        let prefix: Prefix = "10.0.0.0/24".parse().unwrap();
        let rd = RouteDistinguisher::from_asn(65000, 1);
        let nlri = VpnNlri::new(rd, prefix, LabelStack::single(100), None);
        // 24 prefix + 24 label + 64 RD bits
        assert_eq!(nlri.packed()[0], 112);
        assert_eq!(nlri.packed().len(), 1 + 3 + 8 + 3);

        let mut cur = Cursor::new(nlri.packed());
        let parsed = VpnNlri::parse(&mut cur, Afi::Ipv4, None).unwrap();
        assert_eq!(parsed, nlri);
        assert_eq!(parsed.rd.to_string(), "65000:1");
    }
}
