use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;
use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use super::error::{
    WireError, WireResult, OPEN_UNSUPPORTED_PARAMETER, OPEN_UNSUPPORTED_VERSION,
};
use super::family::Family;
use crate::message::family::Afi;

// Capability codes (RFC 5492 registry)
pub const CAP_MULTIPROTOCOL: u8 = 1;
pub const CAP_ROUTE_REFRESH: u8 = 2;
pub const CAP_EXTENDED_NEXT_HOP: u8 = 5;
pub const CAP_EXTENDED_MESSAGE: u8 = 6;
pub const CAP_BGPSEC: u8 = 7;
pub const CAP_GRACEFUL_RESTART: u8 = 64;
pub const CAP_FOUR_BYTE_ASN: u8 = 65;
pub const CAP_ADD_PATH: u8 = 69;
pub const CAP_ENHANCED_ROUTE_REFRESH: u8 = 70;
pub const CAP_LLGR: u8 = 71;
pub const CAP_HOSTNAME: u8 = 73;

pub const AS_TRANS: u16 = 23456;

/// The direction a peer wants ADD-PATH to flow, from its point of view
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum AddPathDirection {
    Receive = 1,
    Send = 2,
    Both = 3,
}

impl AddPathDirection {
    pub fn sends(self) -> bool {
        matches!(self, AddPathDirection::Send | AddPathDirection::Both)
    }

    pub fn receives(self) -> bool {
        matches!(self, AddPathDirection::Receive | AddPathDirection::Both)
    }
}

impl TryFrom<u8> for AddPathDirection {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AddPathDirection::Receive),
            2 => Ok(AddPathDirection::Send),
            3 => Ok(AddPathDirection::Both),
            _ => Err(WireError::capability(CAP_ADD_PATH)),
        }
    }
}

/// Graceful restart capability contents (RFC 4724)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GracefulRestartCap {
    pub restarting: bool,
    pub restart_time: u16,
    /// (family, forwarding state preserved)
    pub families: Vec<(Family, bool)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpenCapability {
    MultiProtocol(Family),
    RouteRefresh,
    ExtendedNextHop(Vec<(Family, Afi)>),
    ExtendedMessage,
    BgpSec,
    GracefulRestart(GracefulRestartCap),
    FourByteAsn(u32),
    AddPath(Vec<(Family, AddPathDirection)>),
    EnhancedRouteRefresh,
    LongLivedGracefulRestart(Vec<u8>),
    Hostname {
        hostname: String,
        domain: Option<String>,
    },
    Unknown {
        code: u8,
        value: Vec<u8>,
    },
}

impl OpenCapability {
    pub fn code(&self) -> u8 {
        match self {
            OpenCapability::MultiProtocol(_) => CAP_MULTIPROTOCOL,
            OpenCapability::RouteRefresh => CAP_ROUTE_REFRESH,
            OpenCapability::ExtendedNextHop(_) => CAP_EXTENDED_NEXT_HOP,
            OpenCapability::ExtendedMessage => CAP_EXTENDED_MESSAGE,
            OpenCapability::BgpSec => CAP_BGPSEC,
            OpenCapability::GracefulRestart(_) => CAP_GRACEFUL_RESTART,
            OpenCapability::FourByteAsn(_) => CAP_FOUR_BYTE_ASN,
            OpenCapability::AddPath(_) => CAP_ADD_PATH,
            OpenCapability::EnhancedRouteRefresh => CAP_ENHANCED_ROUTE_REFRESH,
            OpenCapability::LongLivedGracefulRestart(_) => CAP_LLGR,
            OpenCapability::Hostname { .. } => CAP_HOSTNAME,
            OpenCapability::Unknown { code, .. } => *code,
        }
    }

    fn parse(cur: &mut Cursor<&[u8]>) -> WireResult<(u16, OpenCapability)> {
        let code = cur
            .read_u8()
            .map_err(|_| WireError::open(OPEN_UNSUPPORTED_PARAMETER, vec![]))?;
        let length = cur
            .read_u8()
            .map_err(|_| WireError::open(OPEN_UNSUPPORTED_PARAMETER, vec![code]))?;
        let mut value = vec![0u8; usize::from(length)];
        cur.read_exact(&mut value)
            .map_err(|_| WireError::open(OPEN_UNSUPPORTED_PARAMETER, vec![code, length]))?;
        let capability = Self::parse_value(code, &value)?;
        Ok((2 + u16::from(length), capability))
    }

    fn parse_value(code: u8, value: &[u8]) -> WireResult<OpenCapability> {
        let bad = || WireError::capability(code);
        let capability = match code {
            CAP_MULTIPROTOCOL => {
                if value.len() != 4 {
                    return Err(bad());
                }
                let afi = u16::from_be_bytes([value[0], value[1]]);
                OpenCapability::MultiProtocol(Family::try_from((afi, value[3])).map_err(|_| bad())?)
            }
            CAP_ROUTE_REFRESH => OpenCapability::RouteRefresh,
            CAP_EXTENDED_NEXT_HOP => {
                if value.len() % 6 != 0 {
                    return Err(bad());
                }
                let mut pairs = Vec::with_capacity(value.len() / 6);
                for chunk in value.chunks(6) {
                    let afi = u16::from_be_bytes([chunk[0], chunk[1]]);
                    let safi = u16::from_be_bytes([chunk[2], chunk[3]]);
                    let nh_afi = u16::from_be_bytes([chunk[4], chunk[5]]);
                    pairs.push((
                        Family::try_from((afi, safi as u8)).map_err(|_| bad())?,
                        Afi::try_from(nh_afi).map_err(|_| bad())?,
                    ));
                }
                OpenCapability::ExtendedNextHop(pairs)
            }
            CAP_EXTENDED_MESSAGE => OpenCapability::ExtendedMessage,
            CAP_BGPSEC => OpenCapability::BgpSec,
            CAP_GRACEFUL_RESTART => {
                if value.len() < 2 || (value.len() - 2) % 4 != 0 {
                    return Err(bad());
                }
                let head = u16::from_be_bytes([value[0], value[1]]);
                let mut families = Vec::with_capacity((value.len() - 2) / 4);
                for chunk in value[2..].chunks(4) {
                    let afi = u16::from_be_bytes([chunk[0], chunk[1]]);
                    families.push((
                        Family::try_from((afi, chunk[2])).map_err(|_| bad())?,
                        chunk[3] & 0x80 != 0,
                    ));
                }
                OpenCapability::GracefulRestart(GracefulRestartCap {
                    restarting: head & 0x8000 != 0,
                    restart_time: head & 0x0fff,
                    families,
                })
            }
            CAP_FOUR_BYTE_ASN => {
                if value.len() != 4 {
                    return Err(bad());
                }
                OpenCapability::FourByteAsn(u32::from_be_bytes([
                    value[0], value[1], value[2], value[3],
                ]))
            }
            CAP_ADD_PATH => {
                if value.len() % 4 != 0 {
                    return Err(bad());
                }
                let mut pairs = Vec::with_capacity(value.len() / 4);
                for chunk in value.chunks(4) {
                    let afi = u16::from_be_bytes([chunk[0], chunk[1]]);
                    pairs.push((
                        Family::try_from((afi, chunk[2])).map_err(|_| bad())?,
                        AddPathDirection::try_from(chunk[3])?,
                    ));
                }
                OpenCapability::AddPath(pairs)
            }
            CAP_ENHANCED_ROUTE_REFRESH => OpenCapability::EnhancedRouteRefresh,
            CAP_LLGR => OpenCapability::LongLivedGracefulRestart(value.to_vec()),
            CAP_HOSTNAME => {
                let mut cur = Cursor::new(value);
                let read_string = |cur: &mut Cursor<&[u8]>| -> WireResult<String> {
                    let len = cur.read_u8().map_err(|_| bad())?;
                    let mut raw = vec![0u8; usize::from(len)];
                    cur.read_exact(&mut raw).map_err(|_| bad())?;
                    String::from_utf8(raw).map_err(|_| bad())
                };
                let hostname = read_string(&mut cur)?;
                let domain = read_string(&mut cur).ok().filter(|d| !d.is_empty());
                OpenCapability::Hostname { hostname, domain }
            }
            _ => OpenCapability::Unknown {
                code,
                value: value.to_vec(),
            },
        };
        Ok(capability)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        let mut value = Vec::with_capacity(8);
        match self {
            OpenCapability::MultiProtocol(family) => {
                value.extend_from_slice(&family.afi.code().to_be_bytes());
                value.push(0);
                value.push(family.safi.code());
            }
            OpenCapability::RouteRefresh
            | OpenCapability::ExtendedMessage
            | OpenCapability::BgpSec
            | OpenCapability::EnhancedRouteRefresh => (),
            OpenCapability::ExtendedNextHop(pairs) => {
                for (family, nh_afi) in pairs {
                    value.extend_from_slice(&family.afi.code().to_be_bytes());
                    value.extend_from_slice(&u16::from(family.safi.code()).to_be_bytes());
                    value.extend_from_slice(&nh_afi.code().to_be_bytes());
                }
            }
            OpenCapability::GracefulRestart(gr) => {
                let mut head = gr.restart_time & 0x0fff;
                if gr.restarting {
                    head |= 0x8000;
                }
                value.extend_from_slice(&head.to_be_bytes());
                for (family, preserved) in &gr.families {
                    value.extend_from_slice(&family.afi.code().to_be_bytes());
                    value.push(family.safi.code());
                    value.push(if *preserved { 0x80 } else { 0 });
                }
            }
            OpenCapability::FourByteAsn(asn) => value.extend_from_slice(&asn.to_be_bytes()),
            OpenCapability::AddPath(pairs) => {
                for (family, direction) in pairs {
                    value.extend_from_slice(&family.afi.code().to_be_bytes());
                    value.push(family.safi.code());
                    value.push(*direction as u8);
                }
            }
            OpenCapability::LongLivedGracefulRestart(raw) => value.extend_from_slice(raw),
            OpenCapability::Hostname { hostname, domain } => {
                value.push(hostname.len() as u8);
                value.extend_from_slice(hostname.as_bytes());
                match domain {
                    Some(domain) => {
                        value.push(domain.len() as u8);
                        value.extend_from_slice(domain.as_bytes());
                    }
                    None => value.push(0),
                }
            }
            OpenCapability::Unknown { value: raw, .. } => value.extend_from_slice(raw),
        }
        buf.push(self.code());
        buf.push(value.len() as u8);
        buf.extend_from_slice(&value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpenParameter {
    Capabilities(Vec<OpenCapability>),
    Unknown { param_type: u8, value: Vec<u8> },
}

impl OpenParameter {
    fn parse(cur: &mut Cursor<&[u8]>) -> WireResult<(u16, OpenParameter)> {
        let param_type = cur
            .read_u8()
            .map_err(|_| WireError::open(OPEN_UNSUPPORTED_PARAMETER, vec![]))?;
        let param_length = cur
            .read_u8()
            .map_err(|_| WireError::open(OPEN_UNSUPPORTED_PARAMETER, vec![param_type]))?;
        let mut value = vec![0u8; usize::from(param_length)];
        cur.read_exact(&mut value)
            .map_err(|_| WireError::open(OPEN_UNSUPPORTED_PARAMETER, vec![param_type]))?;

        let parameter = if param_type == 2 {
            let mut caps = Vec::with_capacity(4);
            let mut inner = Cursor::new(&value[..]);
            let mut read = 0u16;
            while read < u16::from(param_length) {
                let (cap_len, cap) = OpenCapability::parse(&mut inner)?;
                caps.push(cap);
                read += cap_len;
            }
            if read != u16::from(param_length) {
                return Err(WireError::open(
                    OPEN_UNSUPPORTED_PARAMETER,
                    vec![param_type],
                ));
            }
            OpenParameter::Capabilities(caps)
        } else {
            OpenParameter::Unknown { param_type, value }
        };
        Ok((2 + u16::from(param_length), parameter))
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            OpenParameter::Capabilities(caps) => {
                let mut value = Vec::with_capacity(32);
                for cap in caps {
                    cap.encode(&mut value);
                }
                buf.push(2);
                buf.push(value.len() as u8);
                buf.extend_from_slice(&value);
            }
            OpenParameter::Unknown { param_type, value } => {
                buf.push(*param_type);
                buf.push(value.len() as u8);
                buf.extend_from_slice(value);
            }
        }
    }
}

/// BGP OPEN message body
#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    pub version: u8,
    /// 2-byte field; AS_TRANS when the real ASN needs 4 bytes
    pub peer_asn: u16,
    pub hold_time: u16,
    pub identifier: u32,
    pub parameters: Vec<OpenParameter>,
}

impl Open {
    pub fn parse(buf: &[u8]) -> WireResult<Open> {
        let mut cur = Cursor::new(buf);
        let version = cur
            .read_u8()
            .map_err(|_| WireError::open(OPEN_UNSUPPORTED_VERSION, vec![]))?;
        if version != 4 {
            return Err(WireError::open(OPEN_UNSUPPORTED_VERSION, vec![0, 4]));
        }
        let peer_asn = cur
            .read_u16::<BigEndian>()
            .map_err(|_| WireError::truncated(super::error::ErrorKind::OpenMessage))?;
        let hold_time = cur
            .read_u16::<BigEndian>()
            .map_err(|_| WireError::truncated(super::error::ErrorKind::OpenMessage))?;
        let identifier = cur
            .read_u32::<BigEndian>()
            .map_err(|_| WireError::truncated(super::error::ErrorKind::OpenMessage))?;
        let mut remaining = i32::from(
            cur.read_u8()
                .map_err(|_| WireError::truncated(super::error::ErrorKind::OpenMessage))?,
        );

        let mut parameters = Vec::with_capacity(2);
        while remaining > 0 {
            let (bytes_read, parameter) = OpenParameter::parse(&mut cur)?;
            parameters.push(parameter);
            remaining -= i32::from(bytes_read);
        }
        if remaining != 0 {
            return Err(WireError::open(OPEN_UNSUPPORTED_PARAMETER, vec![]));
        }

        Ok(Open {
            version,
            peer_asn,
            hold_time,
            identifier,
            parameters,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.version);
        buf.extend_from_slice(&self.peer_asn.to_be_bytes());
        buf.extend_from_slice(&self.hold_time.to_be_bytes());
        buf.extend_from_slice(&self.identifier.to_be_bytes());
        let mut params = Vec::with_capacity(64);
        for parameter in &self.parameters {
            parameter.encode(&mut params);
        }
        buf.push(params.len() as u8);
        buf.extend_from_slice(&params);
    }

    /// The peer's ASN: 4-byte capability first, 2-byte header field otherwise
    pub fn asn(&self) -> u32 {
        self.capability_iter()
            .find_map(|cap| match cap {
                OpenCapability::FourByteAsn(asn) => Some(*asn),
                _ => None,
            })
            .unwrap_or_else(|| u32::from(self.peer_asn))
    }

    pub fn capability_iter(&self) -> impl Iterator<Item = &OpenCapability> {
        self.parameters
            .iter()
            .flat_map(|p| {
                match p {
                    OpenParameter::Capabilities(caps) => caps.as_slice(),
                    _ => &[],
                }
            })
    }
}

impl fmt::Display for Open {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Open asn={} hold={} id={}>",
            self.asn(),
            self.hold_time,
            std::net::Ipv4Addr::from(self.identifier)
        )
    }
}

/// The declared capability set of one side of a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    pub multiprotocol: HashSet<Family>,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub extended_message: bool,
    pub bgpsec: bool,
    pub asn4: Option<u32>,
    pub add_path: HashMap<Family, AddPathDirection>,
    pub extended_next_hop: HashMap<Family, Afi>,
    pub graceful_restart: Option<GracefulRestartCap>,
    pub hostname: Option<String>,
    pub unknown: Vec<(u8, Vec<u8>)>,
}

impl Capabilities {
    pub fn from_open(open: &Open) -> Self {
        let mut caps = Capabilities::default();
        for capability in open.capability_iter() {
            match capability {
                OpenCapability::MultiProtocol(family) => {
                    caps.multiprotocol.insert(*family);
                }
                OpenCapability::RouteRefresh => caps.route_refresh = true,
                OpenCapability::EnhancedRouteRefresh => caps.enhanced_route_refresh = true,
                OpenCapability::ExtendedMessage => caps.extended_message = true,
                OpenCapability::BgpSec => caps.bgpsec = true,
                OpenCapability::FourByteAsn(asn) => caps.asn4 = Some(*asn),
                OpenCapability::AddPath(pairs) => {
                    for (family, direction) in pairs {
                        caps.add_path.insert(*family, *direction);
                    }
                }
                OpenCapability::ExtendedNextHop(pairs) => {
                    for (family, nh_afi) in pairs {
                        caps.extended_next_hop.insert(*family, *nh_afi);
                    }
                }
                OpenCapability::GracefulRestart(gr) => caps.graceful_restart = Some(gr.clone()),
                OpenCapability::Hostname { hostname, .. } => {
                    caps.hostname = Some(hostname.clone())
                }
                OpenCapability::LongLivedGracefulRestart(_) => (),
                OpenCapability::Unknown { code, value } => {
                    caps.unknown.push((*code, value.clone()))
                }
            }
        }
        caps
    }

    /// The capability list to advertise, ordered for stable OPEN bytes
    pub fn to_capability_list(&self) -> Vec<OpenCapability> {
        let mut caps: Vec<OpenCapability> = Vec::with_capacity(self.multiprotocol.len() + 4);
        let mut families: Vec<_> = self.multiprotocol.iter().cloned().collect();
        families.sort();
        caps.extend(families.into_iter().map(OpenCapability::MultiProtocol));
        if self.route_refresh {
            caps.push(OpenCapability::RouteRefresh);
        }
        if self.enhanced_route_refresh {
            caps.push(OpenCapability::EnhancedRouteRefresh);
        }
        if self.extended_message {
            caps.push(OpenCapability::ExtendedMessage);
        }
        if !self.extended_next_hop.is_empty() {
            let mut pairs: Vec<_> = self
                .extended_next_hop
                .iter()
                .map(|(f, a)| (*f, *a))
                .collect();
            pairs.sort();
            caps.push(OpenCapability::ExtendedNextHop(pairs));
        }
        if let Some(gr) = &self.graceful_restart {
            caps.push(OpenCapability::GracefulRestart(gr.clone()));
        }
        if !self.add_path.is_empty() {
            let mut pairs: Vec<_> = self.add_path.iter().map(|(f, d)| (*f, *d)).collect();
            pairs.sort_by_key(|(f, _)| *f);
            caps.push(OpenCapability::AddPath(pairs));
        }
        if let Some(asn) = self.asn4 {
            caps.push(OpenCapability::FourByteAsn(asn));
        }
        if let Some(hostname) = &self.hostname {
            caps.push(OpenCapability::Hostname {
                hostname: hostname.clone(),
                domain: None,
            });
        }
        caps
    }

    /// Drop a capability we previously advertised; used to retry after the
    /// peer rejects one as unsupported
    pub fn without(&self, code: u8) -> Self {
        let mut reduced = self.clone();
        match code {
            CAP_ROUTE_REFRESH => reduced.route_refresh = false,
            CAP_ENHANCED_ROUTE_REFRESH => reduced.enhanced_route_refresh = false,
            CAP_EXTENDED_MESSAGE => reduced.extended_message = false,
            CAP_GRACEFUL_RESTART => reduced.graceful_restart = None,
            CAP_ADD_PATH => reduced.add_path.clear(),
            CAP_EXTENDED_NEXT_HOP => reduced.extended_next_hop.clear(),
            CAP_HOSTNAME => reduced.hostname = None,
            _ => (),
        }
        reduced
    }
}
