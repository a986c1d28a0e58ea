use std::fmt;
use std::io::{Cursor, Read};
use std::net::IpAddr;

use byteorder::{BigEndian, ReadBytesExt};

use super::qualifiers::{Esi, EthernetTag, LabelStack, MacAddress, RouteDistinguisher};
use crate::message::error::{WireError, WireResult};

pub const EVPN_ETHERNET_AD: u8 = 1;
pub const EVPN_MAC_ADVERTISEMENT: u8 = 2;
pub const EVPN_MULTICAST: u8 = 3;
pub const EVPN_ETHERNET_SEGMENT: u8 = 4;
pub const EVPN_IP_PREFIX: u8 = 5;

/// The five EVPN route types (RFC 7432 + RFC 9136)
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum EvpnRoute {
    /// Type 1: per-ES auto-discovery
    EthernetAutoDiscovery {
        rd: RouteDistinguisher,
        esi: Esi,
        tag: EthernetTag,
        labels: LabelStack,
    },
    /// Type 2: MAC (optionally MAC+IP) advertisement
    MacAdvertisement {
        rd: RouteDistinguisher,
        esi: Esi,
        tag: EthernetTag,
        mac: MacAddress,
        ip: Option<IpAddr>,
        labels: LabelStack,
    },
    /// Type 3: inclusive multicast ethernet tag
    Multicast {
        rd: RouteDistinguisher,
        tag: EthernetTag,
        ip: IpAddr,
    },
    /// Type 4: ethernet segment discovery
    EthernetSegment {
        rd: RouteDistinguisher,
        esi: Esi,
        ip: IpAddr,
    },
    /// Type 5: IP prefix advertisement
    IpPrefix {
        rd: RouteDistinguisher,
        esi: Esi,
        tag: EthernetTag,
        prefix: IpAddr,
        prefix_length: u8,
        gateway: IpAddr,
        labels: LabelStack,
    },
}

impl EvpnRoute {
    pub fn route_type(&self) -> u8 {
        match self {
            EvpnRoute::EthernetAutoDiscovery { .. } => EVPN_ETHERNET_AD,
            EvpnRoute::MacAdvertisement { .. } => EVPN_MAC_ADVERTISEMENT,
            EvpnRoute::Multicast { .. } => EVPN_MULTICAST,
            EvpnRoute::EthernetSegment { .. } => EVPN_ETHERNET_SEGMENT,
            EvpnRoute::IpPrefix { .. } => EVPN_IP_PREFIX,
        }
    }

    pub fn rd(&self) -> RouteDistinguisher {
        match self {
            EvpnRoute::EthernetAutoDiscovery { rd, .. }
            | EvpnRoute::MacAdvertisement { rd, .. }
            | EvpnRoute::Multicast { rd, .. }
            | EvpnRoute::EthernetSegment { rd, .. }
            | EvpnRoute::IpPrefix { rd, .. } => *rd,
        }
    }

    fn pack_body(&self, buf: &mut Vec<u8>) {
        match self {
            EvpnRoute::EthernetAutoDiscovery {
                rd,
                esi,
                tag,
                labels,
            } => {
                rd.pack(buf);
                buf.extend_from_slice(&esi.0);
                buf.extend_from_slice(&tag.0.to_be_bytes());
                labels.pack(buf);
            }
            EvpnRoute::MacAdvertisement {
                rd,
                esi,
                tag,
                mac,
                ip,
                labels,
            } => {
                rd.pack(buf);
                buf.extend_from_slice(&esi.0);
                buf.extend_from_slice(&tag.0.to_be_bytes());
                buf.push(48);
                buf.extend_from_slice(&mac.0);
                pack_optional_address(*ip, buf);
                labels.pack(buf);
            }
            EvpnRoute::Multicast { rd, tag, ip } => {
                rd.pack(buf);
                buf.extend_from_slice(&tag.0.to_be_bytes());
                pack_optional_address(Some(*ip), buf);
            }
            EvpnRoute::EthernetSegment { rd, esi, ip } => {
                rd.pack(buf);
                buf.extend_from_slice(&esi.0);
                pack_optional_address(Some(*ip), buf);
            }
            EvpnRoute::IpPrefix {
                rd,
                esi,
                tag,
                prefix,
                prefix_length,
                gateway,
                labels,
            } => {
                rd.pack(buf);
                buf.extend_from_slice(&esi.0);
                buf.extend_from_slice(&tag.0.to_be_bytes());
                buf.push(*prefix_length);
                pack_address(*prefix, buf);
                pack_address(*gateway, buf);
                labels.pack(buf);
            }
        }
    }
}

fn pack_address(ip: IpAddr, buf: &mut Vec<u8>) {
    match ip {
        IpAddr::V4(ip) => buf.extend_from_slice(&ip.octets()),
        IpAddr::V6(ip) => buf.extend_from_slice(&ip.octets()),
    }
}

fn pack_optional_address(ip: Option<IpAddr>, buf: &mut Vec<u8>) {
    match ip {
        None => buf.push(0),
        Some(IpAddr::V4(ip)) => {
            buf.push(32);
            buf.extend_from_slice(&ip.octets());
        }
        Some(IpAddr::V6(ip)) => {
            buf.push(128);
            buf.extend_from_slice(&ip.octets());
        }
    }
}

fn parse_optional_address(cur: &mut Cursor<&[u8]>) -> WireResult<Option<IpAddr>> {
    let bits = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
    match bits {
        0 => Ok(None),
        32 => {
            let mut octets = [0u8; 4];
            cur.read_exact(&mut octets)
                .map_err(|_| WireError::nlri(vec![bits]))?;
            Ok(Some(IpAddr::from(octets)))
        }
        128 => {
            let mut octets = [0u8; 16];
            cur.read_exact(&mut octets)
                .map_err(|_| WireError::nlri(vec![bits]))?;
            Ok(Some(IpAddr::from(octets)))
        }
        _ => Err(WireError::nlri(vec![bits])),
    }
}

fn parse_rd(cur: &mut Cursor<&[u8]>) -> WireResult<RouteDistinguisher> {
    let mut raw = [0u8; 8];
    cur.read_exact(&mut raw).map_err(|_| WireError::nlri(vec![]))?;
    Ok(RouteDistinguisher(raw))
}

fn parse_esi(cur: &mut Cursor<&[u8]>) -> WireResult<Esi> {
    let mut raw = [0u8; 10];
    cur.read_exact(&mut raw).map_err(|_| WireError::nlri(vec![]))?;
    Ok(Esi(raw))
}

/// EVPN NLRI: `<route-type:1><length:1><type-specific body>`
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EvpnNlri {
    pub route: EvpnRoute,
    pub path_id: Option<u32>,
    packed: Vec<u8>,
}

impl EvpnNlri {
    pub fn new(route: EvpnRoute, path_id: Option<u32>) -> Self {
        let mut body = Vec::with_capacity(32);
        route.pack_body(&mut body);
        let mut packed = Vec::with_capacity(body.len() + 2);
        packed.push(route.route_type());
        packed.push(body.len() as u8);
        packed.extend_from_slice(&body);
        Self {
            route,
            path_id,
            packed,
        }
    }

    pub fn parse(cur: &mut Cursor<&[u8]>, path_id: Option<u32>) -> WireResult<Self> {
        let route_type = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
        let length = cur.read_u8().map_err(|_| WireError::nlri(vec![route_type]))?;
        let mut body = vec![0u8; usize::from(length)];
        cur.read_exact(&mut body)
            .map_err(|_| WireError::nlri(vec![route_type, length]))?;
        let mut body_cur = Cursor::new(&body[..]);

        let route = match route_type {
            EVPN_ETHERNET_AD => {
                let rd = parse_rd(&mut body_cur)?;
                let esi = parse_esi(&mut body_cur)?;
                let tag = EthernetTag(
                    body_cur
                        .read_u32::<BigEndian>()
                        .map_err(|_| WireError::nlri(body.clone()))?,
                );
                let rest = &body[body_cur.position() as usize..];
                let (labels, _) =
                    LabelStack::parse(rest, 1).ok_or_else(|| WireError::nlri(body.clone()))?;
                EvpnRoute::EthernetAutoDiscovery {
                    rd,
                    esi,
                    tag,
                    labels,
                }
            }
            EVPN_MAC_ADVERTISEMENT => {
                let rd = parse_rd(&mut body_cur)?;
                let esi = parse_esi(&mut body_cur)?;
                let tag = EthernetTag(
                    body_cur
                        .read_u32::<BigEndian>()
                        .map_err(|_| WireError::nlri(body.clone()))?,
                );
                let mac_len = body_cur
                    .read_u8()
                    .map_err(|_| WireError::nlri(body.clone()))?;
                if mac_len != 48 {
                    return Err(WireError::nlri(vec![mac_len]));
                }
                let mut mac = [0u8; 6];
                body_cur
                    .read_exact(&mut mac)
                    .map_err(|_| WireError::nlri(body.clone()))?;
                let ip = parse_optional_address(&mut body_cur)?;
                let rest = &body[body_cur.position() as usize..];
                let (labels, _) =
                    LabelStack::parse(rest, 2).ok_or_else(|| WireError::nlri(body.clone()))?;
                EvpnRoute::MacAdvertisement {
                    rd,
                    esi,
                    tag,
                    mac: MacAddress(mac),
                    ip,
                    labels,
                }
            }
            EVPN_MULTICAST => {
                let rd = parse_rd(&mut body_cur)?;
                let tag = EthernetTag(
                    body_cur
                        .read_u32::<BigEndian>()
                        .map_err(|_| WireError::nlri(body.clone()))?,
                );
                let ip = parse_optional_address(&mut body_cur)?
                    .ok_or_else(|| WireError::nlri(body.clone()))?;
                EvpnRoute::Multicast { rd, tag, ip }
            }
            EVPN_ETHERNET_SEGMENT => {
                let rd = parse_rd(&mut body_cur)?;
                let esi = parse_esi(&mut body_cur)?;
                let ip = parse_optional_address(&mut body_cur)?
                    .ok_or_else(|| WireError::nlri(body.clone()))?;
                EvpnRoute::EthernetSegment { rd, esi, ip }
            }
            EVPN_IP_PREFIX => {
                let rd = parse_rd(&mut body_cur)?;
                let esi = parse_esi(&mut body_cur)?;
                let tag = EthernetTag(
                    body_cur
                        .read_u32::<BigEndian>()
                        .map_err(|_| WireError::nlri(body.clone()))?,
                );
                let prefix_length = body_cur
                    .read_u8()
                    .map_err(|_| WireError::nlri(body.clone()))?;
                // Remaining: prefix + gateway (4+4 or 16+16) + 3-byte label
                let remaining = body.len() - body_cur.position() as usize;
                let addr_len = match remaining {
                    11 => 4,
                    35 => 16,
                    _ => return Err(WireError::nlri(body.clone())),
                };
                let mut read_addr = |cur: &mut Cursor<&[u8]>| -> WireResult<IpAddr> {
                    if addr_len == 4 {
                        let mut octets = [0u8; 4];
                        cur.read_exact(&mut octets)
                            .map_err(|_| WireError::nlri(vec![]))?;
                        Ok(IpAddr::from(octets))
                    } else {
                        let mut octets = [0u8; 16];
                        cur.read_exact(&mut octets)
                            .map_err(|_| WireError::nlri(vec![]))?;
                        Ok(IpAddr::from(octets))
                    }
                };
                let prefix = read_addr(&mut body_cur)?;
                let gateway = read_addr(&mut body_cur)?;
                let rest = &body[body_cur.position() as usize..];
                let (labels, _) =
                    LabelStack::parse(rest, 1).ok_or_else(|| WireError::nlri(body.clone()))?;
                EvpnRoute::IpPrefix {
                    rd,
                    esi,
                    tag,
                    prefix,
                    prefix_length,
                    gateway,
                    labels,
                }
            }
            _ => return Err(WireError::nlri(vec![route_type])),
        };
        Ok(Self::new(route, path_id))
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for EvpnNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.route {
            EvpnRoute::EthernetAutoDiscovery { rd, esi, tag, .. } => {
                write!(f, "evpn:auto-discovery rd {} esi {} etag {}", rd, esi, tag)
            }
            EvpnRoute::MacAdvertisement {
                rd, esi, mac, ip, ..
            } => {
                write!(f, "evpn:mac rd {} esi {} mac {}", rd, esi, mac)?;
                if let Some(ip) = ip {
                    write!(f, " ip {}", ip)?;
                }
                Ok(())
            }
            EvpnRoute::Multicast { rd, tag, ip } => {
                write!(f, "evpn:multicast rd {} etag {} ip {}", rd, tag, ip)
            }
            EvpnRoute::EthernetSegment { rd, esi, ip } => {
                write!(f, "evpn:segment rd {} esi {} ip {}", rd, esi, ip)
            }
            EvpnRoute::IpPrefix {
                rd,
                prefix,
                prefix_length,
                gateway,
                ..
            } => write!(
                f,
                "evpn:prefix rd {} ip {}/{} gw {}",
                rd, prefix, prefix_length, gateway
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(nlri: &EvpnNlri) {
        let mut cur = Cursor::new(nlri.packed());
        let parsed = EvpnNlri::parse(&mut cur, None).unwrap();
        assert_eq!(&parsed, nlri);
        assert_eq!(cur.position() as usize, nlri.packed().len());
    }

    #[test]
    fn test_mac_advertisement_roundtrip() {
        let nlri = EvpnNlri::new(
            EvpnRoute::MacAdvertisement {
                rd: RouteDistinguisher::from_asn(65000, 1),
                esi: Esi::default(),
                tag: EthernetTag(100),
                mac: "de:ad:be:ef:00:01".parse().unwrap(),
                ip: Some("192.0.2.1".parse().unwrap()),
                labels: LabelStack::single(100),
            },
            None,
        );
        assert_eq!(nlri.packed()[0], EVPN_MAC_ADVERTISEMENT);
        // RD + ESI + tag + maclen + mac + iplen + ip + label
        assert_eq!(nlri.packed()[1], 8 + 10 + 4 + 1 + 6 + 1 + 4 + 3);
        roundtrip(&nlri);
    }

    #[test]
    fn test_multicast_roundtrip() {
        let nlri = EvpnNlri::new(
            EvpnRoute::Multicast {
                rd: RouteDistinguisher::from_asn(65000, 2),
                tag: EthernetTag(0),
                ip: "192.0.2.2".parse().unwrap(),
            },
            None,
        );
        roundtrip(&nlri);
    }

    #[test]
    fn test_prefix_route_roundtrip() {
        let nlri = EvpnNlri::new(
            EvpnRoute::IpPrefix {
                rd: RouteDistinguisher::from_asn(65000, 3),
                esi: Esi::default(),
                tag: EthernetTag(0),
                prefix: "10.0.0.0".parse().unwrap(),
                prefix_length: 24,
                gateway: "192.0.2.254".parse().unwrap(),
                labels: LabelStack::single(3),
            },
            None,
        );
        roundtrip(&nlri);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let wire = [9u8, 2, 0, 0];
        let mut cur = Cursor::new(&wire[..]);
        assert!(EvpnNlri::parse(&mut cur, None).is_err());
    }
}
