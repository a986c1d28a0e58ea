use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use super::qualifiers::RouteDistinguisher;
use crate::message::error::{WireError, WireResult};

pub const MVPN_INTRA_AS_AD: u8 = 1;
pub const MVPN_SOURCE_ACTIVE_AD: u8 = 5;
pub const MVPN_SHARED_TREE_JOIN: u8 = 6;
pub const MVPN_SOURCE_TREE_JOIN: u8 = 7;

/// Addresses inside MVPN routes carry their own bit-length byte
fn pack_len_address(buf: &mut Vec<u8>, addr: &[u8]) {
    buf.push((addr.len() * 8) as u8);
    buf.extend_from_slice(addr);
}

fn parse_len_address(cur: &mut Cursor<&[u8]>) -> WireResult<Vec<u8>> {
    let bits = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
    let bytes = match bits {
        32 => 4,
        128 => 16,
        _ => return Err(WireError::nlri(vec![bits])),
    };
    let mut addr = vec![0u8; bytes];
    cur.read_exact(&mut addr)
        .map_err(|_| WireError::nlri(vec![bits]))?;
    Ok(addr)
}

fn display_address(addr: &[u8]) -> String {
    match addr.len() {
        4 => std::net::Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]).to_string(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(addr);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => crate::utils::to_hex(addr),
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum MvpnRoute {
    /// Type 1: intra-AS I-PMSI auto-discovery
    IntraAsAd {
        rd: RouteDistinguisher,
        originator: Vec<u8>,
    },
    /// Type 5: source active auto-discovery
    SourceActiveAd {
        rd: RouteDistinguisher,
        source: Vec<u8>,
        group: Vec<u8>,
    },
    /// Type 6: shared tree join
    SharedTreeJoin {
        rd: RouteDistinguisher,
        source_as: u32,
        source: Vec<u8>,
        group: Vec<u8>,
    },
    /// Type 7: source tree join
    SourceTreeJoin {
        rd: RouteDistinguisher,
        source_as: u32,
        source: Vec<u8>,
        group: Vec<u8>,
    },
}

impl MvpnRoute {
    pub fn route_type(&self) -> u8 {
        match self {
            MvpnRoute::IntraAsAd { .. } => MVPN_INTRA_AS_AD,
            MvpnRoute::SourceActiveAd { .. } => MVPN_SOURCE_ACTIVE_AD,
            MvpnRoute::SharedTreeJoin { .. } => MVPN_SHARED_TREE_JOIN,
            MvpnRoute::SourceTreeJoin { .. } => MVPN_SOURCE_TREE_JOIN,
        }
    }

    pub fn rd(&self) -> RouteDistinguisher {
        match self {
            MvpnRoute::IntraAsAd { rd, .. }
            | MvpnRoute::SourceActiveAd { rd, .. }
            | MvpnRoute::SharedTreeJoin { rd, .. }
            | MvpnRoute::SourceTreeJoin { rd, .. } => *rd,
        }
    }

    fn pack_body(&self, buf: &mut Vec<u8>) {
        match self {
            MvpnRoute::IntraAsAd { rd, originator } => {
                rd.pack(buf);
                buf.extend_from_slice(originator);
            }
            MvpnRoute::SourceActiveAd { rd, source, group } => {
                rd.pack(buf);
                pack_len_address(buf, source);
                pack_len_address(buf, group);
            }
            MvpnRoute::SharedTreeJoin {
                rd,
                source_as,
                source,
                group,
            }
            | MvpnRoute::SourceTreeJoin {
                rd,
                source_as,
                source,
                group,
            } => {
                rd.pack(buf);
                buf.extend_from_slice(&source_as.to_be_bytes());
                pack_len_address(buf, source);
                pack_len_address(buf, group);
            }
        }
    }
}

/// MVPN NLRI (RFC 6514): `<route-type:1><length:1><body>`
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MvpnNlri {
    pub route: MvpnRoute,
    packed: Vec<u8>,
}

impl MvpnNlri {
    pub fn new(route: MvpnRoute) -> Self {
        let mut body = Vec::with_capacity(24);
        route.pack_body(&mut body);
        let mut packed = Vec::with_capacity(body.len() + 2);
        packed.push(route.route_type());
        packed.push(body.len() as u8);
        packed.extend_from_slice(&body);
        Self { route, packed }
    }

    pub fn parse(cur: &mut Cursor<&[u8]>) -> WireResult<Self> {
        let route_type = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
        let length = cur.read_u8().map_err(|_| WireError::nlri(vec![route_type]))?;
        let mut body = vec![0u8; usize::from(length)];
        cur.read_exact(&mut body)
            .map_err(|_| WireError::nlri(vec![route_type, length]))?;
        let mut body_cur = Cursor::new(&body[..]);

        let mut rd = [0u8; 8];
        body_cur
            .read_exact(&mut rd)
            .map_err(|_| WireError::nlri(body.clone()))?;
        let rd = RouteDistinguisher(rd);

        let route = match route_type {
            MVPN_INTRA_AS_AD => {
                let originator = body[body_cur.position() as usize..].to_vec();
                if originator.len() != 4 && originator.len() != 16 {
                    return Err(WireError::nlri(body));
                }
                MvpnRoute::IntraAsAd { rd, originator }
            }
            MVPN_SOURCE_ACTIVE_AD => {
                let source = parse_len_address(&mut body_cur)?;
                let group = parse_len_address(&mut body_cur)?;
                MvpnRoute::SourceActiveAd { rd, source, group }
            }
            MVPN_SHARED_TREE_JOIN | MVPN_SOURCE_TREE_JOIN => {
                let source_as = body_cur
                    .read_u32::<BigEndian>()
                    .map_err(|_| WireError::nlri(body.clone()))?;
                let source = parse_len_address(&mut body_cur)?;
                let group = parse_len_address(&mut body_cur)?;
                if route_type == MVPN_SHARED_TREE_JOIN {
                    MvpnRoute::SharedTreeJoin {
                        rd,
                        source_as,
                        source,
                        group,
                    }
                } else {
                    MvpnRoute::SourceTreeJoin {
                        rd,
                        source_as,
                        source,
                        group,
                    }
                }
            }
            _ => return Err(WireError::nlri(vec![route_type])),
        };
        Ok(Self::new(route))
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for MvpnNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.route {
            MvpnRoute::IntraAsAd { rd, originator } => write!(
                f,
                "mcast-vpn auto-discovery rd {} originator {}",
                rd,
                display_address(originator)
            ),
            MvpnRoute::SourceActiveAd { rd, source, group } => write!(
                f,
                "mcast-vpn source-ad rd {} source {} group {}",
                rd,
                display_address(source),
                display_address(group)
            ),
            MvpnRoute::SharedTreeJoin {
                rd,
                source_as,
                source,
                group,
            } => write!(
                f,
                "mcast-vpn shared-join rd {} source-as {} source {} group {}",
                rd,
                source_as,
                display_address(source),
                display_address(group)
            ),
            MvpnRoute::SourceTreeJoin {
                rd,
                source_as,
                source,
                group,
            } => write!(
                f,
                "mcast-vpn source-join rd {} source-as {} source {} group {}",
                rd,
                source_as,
                display_address(source),
                display_address(group)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(nlri: &MvpnNlri) {
        let mut cur = Cursor::new(nlri.packed());
        let parsed = MvpnNlri::parse(&mut cur).unwrap();
        assert_eq!(&parsed, nlri);
    }

    #[test]
    fn test_intra_as_ad() {
        let nlri = MvpnNlri::new(MvpnRoute::IntraAsAd {
            rd: RouteDistinguisher::from_asn(65000, 1),
            originator: vec![192, 0, 2, 1],
        });
        assert_eq!(nlri.packed()[0], MVPN_INTRA_AS_AD);
        assert_eq!(nlri.packed()[1], 12);
        roundtrip(&nlri);
    }

    #[test]
    fn test_shared_join() {
        let nlri = MvpnNlri::new(MvpnRoute::SharedTreeJoin {
            rd: RouteDistinguisher::from_asn(65000, 1),
            source_as: 65001,
            source: vec![10, 0, 0, 1],
            group: vec![224, 0, 0, 10],
        });
        roundtrip(&nlri);
    }

    #[test]
    fn test_source_join() {
        let nlri = MvpnNlri::new(MvpnRoute::SourceTreeJoin {
            rd: RouteDistinguisher::from_asn(65000, 1),
            source_as: 65001,
            source: vec![10, 0, 0, 1],
            group: vec![224, 0, 0, 10],
        });
        roundtrip(&nlri);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let wire = [9u8, 8, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut cur = Cursor::new(&wire[..]);
        assert!(MvpnNlri::parse(&mut cur).is_err());
    }
}
