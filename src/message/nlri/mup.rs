use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use super::prefix::Prefix;
use super::qualifiers::RouteDistinguisher;
use crate::message::error::{WireError, WireResult};
use crate::message::family::Afi;

pub const MUP_ARCH_3GPP_5G: u8 = 1;

pub const MUP_ISD: u16 = 1;
pub const MUP_DSD: u16 = 2;
pub const MUP_T1ST: u16 = 3;
pub const MUP_T2ST: u16 = 4;

/// MUP route types (draft-mpmz-bess-mup-safi). The session-transform bodies
/// are carried opaque behind their validated headers; this speaker relays
/// them, it does not program a user plane.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum MupRoute {
    /// Type 1: interwork segment discovery
    InterworkSegmentDiscovery {
        rd: RouteDistinguisher,
        prefix: Prefix,
    },
    /// Type 2: direct segment discovery
    DirectSegmentDiscovery {
        rd: RouteDistinguisher,
        address: Vec<u8>,
    },
    /// Type 3: type-1 session transformed
    Type1SessionTransformed {
        rd: RouteDistinguisher,
        body: Vec<u8>,
    },
    /// Type 4: type-2 session transformed
    Type2SessionTransformed {
        rd: RouteDistinguisher,
        body: Vec<u8>,
    },
}

impl MupRoute {
    pub fn route_type(&self) -> u16 {
        match self {
            MupRoute::InterworkSegmentDiscovery { .. } => MUP_ISD,
            MupRoute::DirectSegmentDiscovery { .. } => MUP_DSD,
            MupRoute::Type1SessionTransformed { .. } => MUP_T1ST,
            MupRoute::Type2SessionTransformed { .. } => MUP_T2ST,
        }
    }

    pub fn rd(&self) -> RouteDistinguisher {
        match self {
            MupRoute::InterworkSegmentDiscovery { rd, .. }
            | MupRoute::DirectSegmentDiscovery { rd, .. }
            | MupRoute::Type1SessionTransformed { rd, .. }
            | MupRoute::Type2SessionTransformed { rd, .. } => *rd,
        }
    }

    fn pack_body(&self, buf: &mut Vec<u8>) {
        match self {
            MupRoute::InterworkSegmentDiscovery { rd, prefix } => {
                rd.pack(buf);
                prefix.pack(buf);
            }
            MupRoute::DirectSegmentDiscovery { rd, address } => {
                rd.pack(buf);
                buf.extend_from_slice(address);
            }
            MupRoute::Type1SessionTransformed { rd, body }
            | MupRoute::Type2SessionTransformed { rd, body } => {
                rd.pack(buf);
                buf.extend_from_slice(body);
            }
        }
    }
}

/// MUP NLRI: `<arch-type:1><route-type:2><length:1><body>`
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MupNlri {
    pub route: MupRoute,
    pub afi: Afi,
    packed: Vec<u8>,
}

impl MupNlri {
    pub fn new(route: MupRoute, afi: Afi) -> Self {
        let mut body = Vec::with_capacity(24);
        route.pack_body(&mut body);
        let mut packed = Vec::with_capacity(body.len() + 4);
        packed.push(MUP_ARCH_3GPP_5G);
        packed.extend_from_slice(&route.route_type().to_be_bytes());
        packed.push(body.len() as u8);
        packed.extend_from_slice(&body);
        Self { route, afi, packed }
    }

    pub fn parse(cur: &mut Cursor<&[u8]>, afi: Afi) -> WireResult<Self> {
        let arch = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
        if arch != MUP_ARCH_3GPP_5G {
            return Err(WireError::nlri(vec![arch]));
        }
        let route_type = cur
            .read_u16::<BigEndian>()
            .map_err(|_| WireError::nlri(vec![arch]))?;
        let length = cur.read_u8().map_err(|_| WireError::nlri(vec![arch]))?;
        let mut body = vec![0u8; usize::from(length)];
        cur.read_exact(&mut body)
            .map_err(|_| WireError::nlri(vec![arch, length]))?;
        if body.len() < 8 {
            return Err(WireError::nlri(body));
        }
        let mut body_cur = Cursor::new(&body[..]);
        let mut rd = [0u8; 8];
        body_cur
            .read_exact(&mut rd)
            .map_err(|_| WireError::nlri(body.clone()))?;
        let rd = RouteDistinguisher(rd);
        let rest = body[8..].to_vec();

        let route = match route_type {
            MUP_ISD => {
                let mut rest_cur = Cursor::new(&body[8..]);
                let prefix = Prefix::parse(&mut rest_cur, afi)?;
                MupRoute::InterworkSegmentDiscovery { rd, prefix }
            }
            MUP_DSD => {
                if rest.len() != afi.address_len() {
                    return Err(WireError::nlri(body));
                }
                MupRoute::DirectSegmentDiscovery { rd, address: rest }
            }
            MUP_T1ST => MupRoute::Type1SessionTransformed { rd, body: rest },
            MUP_T2ST => MupRoute::Type2SessionTransformed { rd, body: rest },
            _ => return Err(WireError::nlri(route_type.to_be_bytes().to_vec())),
        };
        Ok(Self::new(route, afi))
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for MupNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.route {
            MupRoute::InterworkSegmentDiscovery { rd, prefix } => {
                write!(f, "mup-isd {} rd {}", prefix, rd)
            }
            MupRoute::DirectSegmentDiscovery { rd, address } => {
                let addr = match address.len() {
                    4 => std::net::Ipv4Addr::new(address[0], address[1], address[2], address[3])
                        .to_string(),
                    16 => {
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(address);
                        std::net::Ipv6Addr::from(octets).to_string()
                    }
                    _ => crate::utils::to_hex(address),
                };
                write!(f, "mup-dsd {} rd {}", addr, rd)
            }
            MupRoute::Type1SessionTransformed { rd, body } => {
                write!(f, "mup-t1st rd {} 0x{}", rd, crate::utils::to_hex(body))
            }
            MupRoute::Type2SessionTransformed { rd, body } => {
                write!(f, "mup-t2st rd {} 0x{}", rd, crate::utils::to_hex(body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(nlri: &MupNlri, afi: Afi) {
        let mut cur = Cursor::new(nlri.packed());
        let parsed = MupNlri::parse(&mut cur, afi).unwrap();
        assert_eq!(&parsed, nlri);
    }

    #[test]
    fn test_isd_roundtrip() {
        let nlri = MupNlri::new(
            MupRoute::InterworkSegmentDiscovery {
                rd: RouteDistinguisher::from_asn(65000, 1),
                prefix: "10.0.0.0/24".parse().unwrap(),
            },
            Afi::Ipv4,
        );
        assert_eq!(nlri.packed()[0], MUP_ARCH_3GPP_5G);
        assert_eq!(&nlri.packed()[1..3], &MUP_ISD.to_be_bytes());
        roundtrip(&nlri, Afi::Ipv4);
    }

    #[test]
    fn test_dsd_roundtrip() {
        let nlri = MupNlri::new(
            MupRoute::DirectSegmentDiscovery {
                rd: RouteDistinguisher::from_asn(65000, 2),
                address: vec![192, 0, 2, 1],
            },
            Afi::Ipv4,
        );
        roundtrip(&nlri, Afi::Ipv4);
    }

    #[test]
    fn test_t1st_roundtrip() {
        let nlri = MupNlri::new(
            MupRoute::Type1SessionTransformed {
                rd: RouteDistinguisher::from_asn(65000, 3),
                body: vec![0x20, 10, 0, 0, 1, 0, 0, 0, 7],
            },
            Afi::Ipv4,
        );
        roundtrip(&nlri, Afi::Ipv4);
    }

    #[test]
    fn test_bad_arch_rejected() {
        let wire = [2u8, 0, 1, 0];
        let mut cur = Cursor::new(&wire[..]);
        assert!(MupNlri::parse(&mut cur, Afi::Ipv4).is_err());
    }
}
