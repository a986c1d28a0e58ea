use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;
use std::hash::Hasher;
use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv4Addr};

use byteorder::{BigEndian, ReadBytesExt};

use super::community::{Community, ExtendedCommunity, LargeCommunity};
use super::context::Negotiated;
use super::error::{
    attr_disposition, AttrDisposition, WireError, WireResult, UPDATE_ATTRIBUTE_LENGTH,
    UPDATE_INVALID_ORIGIN, UPDATE_MALFORMED_AS_PATH, UPDATE_MALFORMED_ATTRIBUTE_LIST,
    UPDATE_MISSING_WELL_KNOWN, UPDATE_UNRECOGNIZED_WELL_KNOWN,
};
use super::family::Family;
use super::nlri::Nlri;
use super::open::AS_TRANS;

pub mod codes {
    pub const ORIGIN: u8 = 1;
    pub const AS_PATH: u8 = 2;
    pub const NEXT_HOP: u8 = 3;
    pub const MULTI_EXIT_DISC: u8 = 4;
    pub const LOCAL_PREF: u8 = 5;
    pub const ATOMIC_AGGREGATE: u8 = 6;
    pub const AGGREGATOR: u8 = 7;
    pub const COMMUNITIES: u8 = 8;
    pub const ORIGINATOR_ID: u8 = 9;
    pub const CLUSTER_LIST: u8 = 10;
    pub const MP_REACH_NLRI: u8 = 14;
    pub const MP_UNREACH_NLRI: u8 = 15;
    pub const EXTENDED_COMMUNITIES: u8 = 16;
    pub const AS4_PATH: u8 = 17;
    pub const AS4_AGGREGATOR: u8 = 18;
    pub const PMSI_TUNNEL: u8 = 22;
    pub const TUNNEL_ENCAPSULATION: u8 = 23;
    pub const AIGP: u8 = 26;
    pub const BGP_LS: u8 = 29;
    pub const LARGE_COMMUNITIES: u8 = 32;
    pub const BGP_PREFIX_SID: u8 = 40;
}

pub const FLAG_OPTIONAL: u8 = 0x80;
pub const FLAG_TRANSITIVE: u8 = 0x40;
pub const FLAG_PARTIAL: u8 = 0x20;
pub const FLAG_EXT_LENGTH: u8 = 0x10;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Origin {
    Igp,
    Egp,
    Incomplete,
}

impl Origin {
    pub fn code(self) -> u8 {
        match self {
            Origin::Igp => 0,
            Origin::Egp => 1,
            Origin::Incomplete => 2,
        }
    }
}

impl TryFrom<u8> for Origin {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Origin::Igp),
            1 => Ok(Origin::Egp),
            2 => Ok(Origin::Incomplete),
            _ => Err(WireError::attribute(UPDATE_INVALID_ORIGIN, vec![value])),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            Origin::Igp => "igp",
            Origin::Egp => "egp",
            Origin::Incomplete => "incomplete",
        };
        write!(f, "{}", word)
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Segment {
    Sequence(Vec<u32>),
    Set(Vec<u32>),
}

const SEGMENT_SET: u8 = 1;
const SEGMENT_SEQUENCE: u8 = 2;

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct AsPath {
    pub segments: Vec<Segment>,
}

impl AsPath {
    pub fn sequence(asns: Vec<u32>) -> Self {
        Self {
            segments: vec![Segment::Sequence(asns)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Prepend for eBGP export; a new leading SEQUENCE is created if the
    /// path starts with a SET
    pub fn prepended(&self, asn: u32) -> Self {
        let mut segments = self.segments.clone();
        match segments.first_mut() {
            Some(Segment::Sequence(seq)) => seq.insert(0, asn),
            _ => segments.insert(0, Segment::Sequence(vec![asn])),
        }
        Self { segments }
    }

    /// True when any ASN needs 4 bytes on the wire
    pub fn has_wide_asn(&self) -> bool {
        self.iter_asns().any(|asn| asn > 0xffff)
    }

    pub fn iter_asns(&self) -> impl Iterator<Item = u32> + '_ {
        self.segments
            .iter()
            .flat_map(|segment| match segment {
                Segment::Sequence(asns) | Segment::Set(asns) => asns.as_slice(),
            })
            .copied()
    }

    fn parse(buf: &[u8], asn4: bool) -> WireResult<Self> {
        let mut cur = Cursor::new(buf);
        let mut segments = Vec::with_capacity(1);
        while (cur.position() as usize) < buf.len() {
            let segment_type = cur
                .read_u8()
                .map_err(|_| WireError::attribute(UPDATE_MALFORMED_AS_PATH, vec![]))?;
            let count = cur
                .read_u8()
                .map_err(|_| WireError::attribute(UPDATE_MALFORMED_AS_PATH, vec![]))?;
            let mut asns = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                let asn = if asn4 {
                    cur.read_u32::<BigEndian>()
                } else {
                    cur.read_u16::<BigEndian>().map(u32::from)
                }
                .map_err(|_| WireError::attribute(UPDATE_MALFORMED_AS_PATH, vec![]))?;
                asns.push(asn);
            }
            match segment_type {
                SEGMENT_SET => segments.push(Segment::Set(asns)),
                SEGMENT_SEQUENCE => segments.push(Segment::Sequence(asns)),
                _ => {
                    return Err(WireError::attribute(
                        UPDATE_MALFORMED_AS_PATH,
                        vec![segment_type],
                    ))
                }
            }
        }
        Ok(Self { segments })
    }

    fn encode(&self, asn4: bool, buf: &mut Vec<u8>) {
        for segment in &self.segments {
            let (segment_type, asns) = match segment {
                Segment::Set(asns) => (SEGMENT_SET, asns),
                Segment::Sequence(asns) => (SEGMENT_SEQUENCE, asns),
            };
            buf.push(segment_type);
            buf.push(asns.len() as u8);
            for asn in asns {
                if asn4 {
                    buf.extend_from_slice(&asn.to_be_bytes());
                } else if *asn > 0xffff {
                    buf.extend_from_slice(&AS_TRANS.to_be_bytes());
                } else {
                    buf.extend_from_slice(&(*asn as u16).to_be_bytes());
                }
            }
        }
    }

    /// RFC 6793 §4.2.3: splice the true ASNs from AS4_PATH back into a
    /// 2-byte AS_PATH received from an old speaker
    pub fn merged_with_as4(&self, as4_path: &AsPath) -> AsPath {
        let own_len = self.iter_asns().count();
        let as4_len = as4_path.iter_asns().count();
        if as4_len > own_len {
            // Broken peer; RFC says ignore AS4_PATH entirely
            return self.clone();
        }
        let keep = own_len - as4_len;
        let leading: Vec<u32> = self.iter_asns().take(keep).collect();
        let mut segments = Vec::with_capacity(1 + as4_path.segments.len());
        if !leading.is_empty() {
            segments.push(Segment::Sequence(leading));
        }
        segments.extend(as4_path.segments.iter().cloned());
        AsPath { segments }
    }
}

impl fmt::Display for AsPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rendered = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Sequence(asns) => asns
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
                Segment::Set(asns) => format!(
                    "({})",
                    asns.iter()
                        .map(|a| a.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                ),
            })
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{}", rendered)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Aggregator {
    pub asn: u32,
    pub speaker: Ipv4Addr,
}

/// MP_REACH_NLRI payload (RFC 4760 §3)
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MpReach {
    pub family: Family,
    pub next_hop: Vec<u8>,
    pub nlris: Vec<Nlri>,
}

/// MP_UNREACH_NLRI payload (RFC 4760 §4)
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MpUnreach {
    pub family: Family,
    pub nlris: Vec<Nlri>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PathAttribute {
    Origin(Origin),
    AsPath(AsPath),
    NextHop(IpAddr),
    MultiExitDisc(u32),
    LocalPref(u32),
    AtomicAggregate,
    Aggregator(Aggregator),
    Communities(Vec<Community>),
    OriginatorId(u32),
    ClusterList(Vec<u32>),
    MpReach(MpReach),
    MpUnreach(MpUnreach),
    ExtendedCommunities(Vec<ExtendedCommunity>),
    As4Path(AsPath),
    As4Aggregator(Aggregator),
    /// Flags + tunnel type + MPLS label + identifier, carried opaque
    PmsiTunnel(Vec<u8>),
    TunnelEncapsulation(Vec<u8>),
    /// Accumulated IGP metric (TLV type 1)
    Aigp(u64),
    LargeCommunities(Vec<LargeCommunity>),
    LinkState(Vec<u8>),
    PrefixSid(Vec<u8>),
    Unknown {
        flags: u8,
        code: u8,
        value: Vec<u8>,
    },
}

impl PathAttribute {
    pub fn code(&self) -> u8 {
        use PathAttribute::*;
        match self {
            Origin(_) => codes::ORIGIN,
            AsPath(_) => codes::AS_PATH,
            NextHop(_) => codes::NEXT_HOP,
            MultiExitDisc(_) => codes::MULTI_EXIT_DISC,
            LocalPref(_) => codes::LOCAL_PREF,
            AtomicAggregate => codes::ATOMIC_AGGREGATE,
            Aggregator(_) => codes::AGGREGATOR,
            Communities(_) => codes::COMMUNITIES,
            OriginatorId(_) => codes::ORIGINATOR_ID,
            ClusterList(_) => codes::CLUSTER_LIST,
            MpReach(_) => codes::MP_REACH_NLRI,
            MpUnreach(_) => codes::MP_UNREACH_NLRI,
            ExtendedCommunities(_) => codes::EXTENDED_COMMUNITIES,
            As4Path(_) => codes::AS4_PATH,
            As4Aggregator(_) => codes::AS4_AGGREGATOR,
            PmsiTunnel(_) => codes::PMSI_TUNNEL,
            TunnelEncapsulation(_) => codes::TUNNEL_ENCAPSULATION,
            Aigp(_) => codes::AIGP,
            LargeCommunities(_) => codes::LARGE_COMMUNITIES,
            LinkState(_) => codes::BGP_LS,
            PrefixSid(_) => codes::BGP_PREFIX_SID,
            Unknown { code, .. } => *code,
        }
    }

    /// Canonical flag byte (without extended-length, which depends on size)
    pub fn flags(&self) -> u8 {
        use PathAttribute::*;
        match self {
            Origin(_) | AsPath(_) | NextHop(_) | LocalPref(_) | AtomicAggregate => {
                FLAG_TRANSITIVE
            }
            MultiExitDisc(_) | OriginatorId(_) | ClusterList(_) | MpReach(_) | MpUnreach(_)
            | LinkState(_) => FLAG_OPTIONAL,
            Aigp(_) => FLAG_OPTIONAL,
            Aggregator(_) | Communities(_) | ExtendedCommunities(_) | As4Path(_)
            | As4Aggregator(_) | PmsiTunnel(_) | TunnelEncapsulation(_) | LargeCommunities(_)
            | PrefixSid(_) => FLAG_OPTIONAL | FLAG_TRANSITIVE,
            // Preserved verbatim; the partial bit is added at encode time
            Unknown { flags, .. } => *flags & !FLAG_EXT_LENGTH,
        }
    }

    /// Parse one attribute. `Ok(None)` means an unknown non-transitive
    /// attribute was dropped, per RFC 4271 §9. Truncation of the header or
    /// value loses the next attribute's boundary, so those failures are
    /// `MalformedAttributeList` (always session reset), never recoverable.
    pub fn parse(
        cur: &mut Cursor<&[u8]>,
        negotiated: &Negotiated,
    ) -> WireResult<Option<PathAttribute>> {
        let flags = cur
            .read_u8()
            .map_err(|_| WireError::attribute_list(vec![]))?;
        let code = cur
            .read_u8()
            .map_err(|_| WireError::attribute_list(vec![]))?;
        let length = if flags & FLAG_EXT_LENGTH != 0 {
            cur.read_u16::<BigEndian>()
                .map_err(|_| WireError::attribute_list(vec![code]))?
        } else {
            u16::from(
                cur.read_u8()
                    .map_err(|_| WireError::attribute_list(vec![code]))?,
            )
        };
        let mut value = vec![0u8; usize::from(length)];
        cur.read_exact(&mut value)
            .map_err(|_| WireError::attribute_list(vec![code]))?;
        // Lead the error data with the attribute code so the caller can
        // look up its RFC 7606 disposition
        Self::parse_value(flags, code, &value, negotiated).map_err(|mut err| {
            err.data.insert(0, code);
            err
        })
    }

    fn parse_value(
        flags: u8,
        code: u8,
        value: &[u8],
        negotiated: &Negotiated,
    ) -> WireResult<Option<PathAttribute>> {
        let short = || WireError::attribute(UPDATE_ATTRIBUTE_LENGTH, vec![flags, code]);
        let need = |len: usize| -> WireResult<()> {
            if value.len() != len {
                Err(short())
            } else {
                Ok(())
            }
        };
        let need_multiple = |len: usize| -> WireResult<()> {
            if len == 0 || value.len() % len != 0 {
                Err(short())
            } else {
                Ok(())
            }
        };
        let read_u32 = |buf: &[u8]| u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

        let attribute = match code {
            codes::ORIGIN => {
                need(1)?;
                PathAttribute::Origin(Origin::try_from(value[0])?)
            }
            codes::AS_PATH => PathAttribute::AsPath(AsPath::parse(value, negotiated.asn4)?),
            codes::NEXT_HOP => match value.len() {
                4 => PathAttribute::NextHop(IpAddr::from([value[0], value[1], value[2], value[3]])),
                16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(value);
                    PathAttribute::NextHop(IpAddr::from(octets))
                }
                _ => return Err(short()),
            },
            codes::MULTI_EXIT_DISC => {
                need(4)?;
                PathAttribute::MultiExitDisc(read_u32(value))
            }
            codes::LOCAL_PREF => {
                need(4)?;
                PathAttribute::LocalPref(read_u32(value))
            }
            codes::ATOMIC_AGGREGATE => {
                need(0)?;
                PathAttribute::AtomicAggregate
            }
            codes::AGGREGATOR => {
                let (asn, ip) = match value.len() {
                    6 => (
                        u32::from(u16::from_be_bytes([value[0], value[1]])),
                        &value[2..6],
                    ),
                    8 => (read_u32(value), &value[4..8]),
                    _ => return Err(short()),
                };
                PathAttribute::Aggregator(Aggregator {
                    asn,
                    speaker: Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]),
                })
            }
            codes::COMMUNITIES => {
                need_multiple(4)?;
                PathAttribute::Communities(
                    value.chunks(4).map(|c| Community(read_u32(c))).collect(),
                )
            }
            codes::ORIGINATOR_ID => {
                need(4)?;
                PathAttribute::OriginatorId(read_u32(value))
            }
            codes::CLUSTER_LIST => {
                need_multiple(4)?;
                PathAttribute::ClusterList(value.chunks(4).map(read_u32).collect())
            }
            codes::MP_REACH_NLRI => {
                let mut cur = Cursor::new(value);
                let afi = cur.read_u16::<BigEndian>().map_err(|_| short())?;
                let safi = cur.read_u8().map_err(|_| short())?;
                let family = Family::try_from((afi, safi))?;
                let nh_len = cur.read_u8().map_err(|_| short())?;
                let mut next_hop = vec![0u8; usize::from(nh_len)];
                cur.read_exact(&mut next_hop).map_err(|_| short())?;
                let _reserved = cur.read_u8().map_err(|_| short())?;
                let rest = &value[cur.position() as usize..];
                let nlris =
                    Nlri::parse_all(family, negotiated.addpath_receive(family), rest)?;
                PathAttribute::MpReach(MpReach {
                    family,
                    next_hop,
                    nlris,
                })
            }
            codes::MP_UNREACH_NLRI => {
                if value.len() < 3 {
                    return Err(short());
                }
                let afi = u16::from_be_bytes([value[0], value[1]]);
                let family = Family::try_from((afi, value[2]))?;
                let nlris =
                    Nlri::parse_all(family, negotiated.addpath_receive(family), &value[3..])?;
                PathAttribute::MpUnreach(MpUnreach { family, nlris })
            }
            codes::EXTENDED_COMMUNITIES => {
                need_multiple(8)?;
                PathAttribute::ExtendedCommunities(
                    value
                        .chunks(8)
                        .map(|c| {
                            let mut raw = [0u8; 8];
                            raw.copy_from_slice(c);
                            ExtendedCommunity(raw)
                        })
                        .collect(),
                )
            }
            codes::AS4_PATH => PathAttribute::As4Path(AsPath::parse(value, true)?),
            codes::AS4_AGGREGATOR => {
                need(8)?;
                PathAttribute::As4Aggregator(Aggregator {
                    asn: read_u32(value),
                    speaker: Ipv4Addr::new(value[4], value[5], value[6], value[7]),
                })
            }
            codes::PMSI_TUNNEL => {
                if value.len() < 5 {
                    return Err(short());
                }
                PathAttribute::PmsiTunnel(value.to_vec())
            }
            codes::TUNNEL_ENCAPSULATION => PathAttribute::TunnelEncapsulation(value.to_vec()),
            codes::AIGP => {
                // TLV type 1 carries the 8-byte accumulated metric
                if value.len() < 11 || value[0] != 1 {
                    return Err(short());
                }
                PathAttribute::Aigp(u64::from_be_bytes([
                    value[3], value[4], value[5], value[6], value[7], value[8], value[9],
                    value[10],
                ]))
            }
            codes::LARGE_COMMUNITIES => {
                need_multiple(12)?;
                PathAttribute::LargeCommunities(
                    value
                        .chunks(12)
                        .map(|c| LargeCommunity {
                            global: read_u32(&c[0..4]),
                            local1: read_u32(&c[4..8]),
                            local2: read_u32(&c[8..12]),
                        })
                        .collect(),
                )
            }
            codes::BGP_LS => PathAttribute::LinkState(value.to_vec()),
            codes::BGP_PREFIX_SID => PathAttribute::PrefixSid(value.to_vec()),
            _ => {
                if flags & FLAG_OPTIONAL == 0 {
                    // Unrecognized well-known attribute is fatal
                    return Err(WireError::attribute(
                        UPDATE_UNRECOGNIZED_WELL_KNOWN,
                        vec![code],
                    ));
                }
                if flags & FLAG_TRANSITIVE == 0 {
                    // Unknown optional non-transitive: silently dropped
                    return Ok(None);
                }
                PathAttribute::Unknown {
                    flags,
                    code,
                    value: value.to_vec(),
                }
            }
        };
        Ok(Some(attribute))
    }

    pub fn encode(&self, negotiated: &Negotiated, buf: &mut Vec<u8>) {
        let mut value = Vec::with_capacity(8);
        match self {
            PathAttribute::Origin(origin) => value.push(origin.code()),
            PathAttribute::AsPath(path) => path.encode(negotiated.asn4, &mut value),
            PathAttribute::NextHop(ip) => match ip {
                IpAddr::V4(ip) => value.extend_from_slice(&ip.octets()),
                IpAddr::V6(ip) => value.extend_from_slice(&ip.octets()),
            },
            PathAttribute::MultiExitDisc(med) => value.extend_from_slice(&med.to_be_bytes()),
            PathAttribute::LocalPref(pref) => value.extend_from_slice(&pref.to_be_bytes()),
            PathAttribute::AtomicAggregate => (),
            PathAttribute::Aggregator(agg) => {
                if negotiated.asn4 {
                    value.extend_from_slice(&agg.asn.to_be_bytes());
                } else if agg.asn > 0xffff {
                    value.extend_from_slice(&AS_TRANS.to_be_bytes());
                } else {
                    value.extend_from_slice(&(agg.asn as u16).to_be_bytes());
                }
                value.extend_from_slice(&agg.speaker.octets());
            }
            PathAttribute::Communities(communities) => {
                for community in communities {
                    value.extend_from_slice(&community.0.to_be_bytes());
                }
            }
            PathAttribute::OriginatorId(id) => value.extend_from_slice(&id.to_be_bytes()),
            PathAttribute::ClusterList(ids) => {
                for id in ids {
                    value.extend_from_slice(&id.to_be_bytes());
                }
            }
            PathAttribute::MpReach(mp) => {
                let ctx = negotiated.context(mp.family);
                value.extend_from_slice(&mp.family.afi.code().to_be_bytes());
                value.push(mp.family.safi.code());
                value.push(mp.next_hop.len() as u8);
                value.extend_from_slice(&mp.next_hop);
                value.push(0);
                for nlri in &mp.nlris {
                    nlri.pack(&ctx, &mut value);
                }
            }
            PathAttribute::MpUnreach(mp) => {
                let ctx = negotiated.context(mp.family);
                value.extend_from_slice(&mp.family.afi.code().to_be_bytes());
                value.push(mp.family.safi.code());
                for nlri in &mp.nlris {
                    nlri.pack(&ctx, &mut value);
                }
            }
            PathAttribute::ExtendedCommunities(communities) => {
                for community in communities {
                    value.extend_from_slice(&community.0);
                }
            }
            PathAttribute::As4Path(path) => path.encode(true, &mut value),
            PathAttribute::As4Aggregator(agg) => {
                value.extend_from_slice(&agg.asn.to_be_bytes());
                value.extend_from_slice(&agg.speaker.octets());
            }
            PathAttribute::PmsiTunnel(raw) | PathAttribute::TunnelEncapsulation(raw) => {
                value.extend_from_slice(raw)
            }
            PathAttribute::Aigp(metric) => {
                value.push(1);
                value.extend_from_slice(&11u16.to_be_bytes());
                value.extend_from_slice(&metric.to_be_bytes());
            }
            PathAttribute::LargeCommunities(communities) => {
                for community in communities {
                    value.extend_from_slice(&community.global.to_be_bytes());
                    value.extend_from_slice(&community.local1.to_be_bytes());
                    value.extend_from_slice(&community.local2.to_be_bytes());
                }
            }
            PathAttribute::LinkState(raw) | PathAttribute::PrefixSid(raw) => {
                value.extend_from_slice(raw)
            }
            PathAttribute::Unknown { value: raw, .. } => value.extend_from_slice(raw),
        }

        let mut flags = self.flags();
        if let PathAttribute::Unknown { .. } = self {
            // Forwarding an unknown optional transitive attribute: mark partial
            if flags & FLAG_TRANSITIVE != 0 {
                flags |= FLAG_PARTIAL;
            }
        }
        if value.len() > 255 {
            buf.push(flags | FLAG_EXT_LENGTH);
            buf.push(self.code());
            buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        } else {
            buf.push(flags);
            buf.push(self.code());
            buf.push(value.len() as u8);
        }
        buf.extend_from_slice(&value);
    }
}

/// Outcome of parsing a full attribute section
#[derive(Debug)]
pub struct ParsedAttributes {
    pub attributes: Attributes,
    /// Set when a malformed attribute fell in the RFC 7606 recoverable
    /// category; the whole UPDATE must be handled as a withdraw
    pub treat_as_withdraw: Option<WireError>,
}

/// Ordered attribute collection: one attribute per type code, canonical
/// RFC 4271 ordering by construction
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Attributes {
    inner: BTreeMap<u8, PathAttribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: PathAttribute) -> Self {
        self.insert(attribute);
        self
    }

    /// Insert, replacing any existing attribute of the same code
    pub fn insert(&mut self, attribute: PathAttribute) {
        self.inner.insert(attribute.code(), attribute);
    }

    pub fn remove(&mut self, code: u8) -> Option<PathAttribute> {
        self.inner.remove(&code)
    }

    pub fn get(&self, code: u8) -> Option<&PathAttribute> {
        self.inner.get(&code)
    }

    pub fn contains(&self, code: u8) -> bool {
        self.inner.contains_key(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathAttribute> {
        self.inner.values()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Merge: attributes in `other` win on conflicts
    pub fn merged(&self, other: &Attributes) -> Attributes {
        let mut merged = self.clone();
        for attribute in other.iter() {
            merged.insert(attribute.clone());
        }
        merged
    }

    pub fn next_hop(&self) -> Option<IpAddr> {
        match self.get(codes::NEXT_HOP) {
            Some(PathAttribute::NextHop(ip)) => Some(*ip),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&AsPath> {
        match self.get(codes::AS_PATH) {
            Some(PathAttribute::AsPath(path)) => Some(path),
            _ => None,
        }
    }

    pub fn origin(&self) -> Option<Origin> {
        match self.get(codes::ORIGIN) {
            Some(PathAttribute::Origin(origin)) => Some(*origin),
            _ => None,
        }
    }

    /// Canonical byte fingerprint for attribute grouping: every non-MP
    /// attribute encoded in code order with a fixed 4-byte-ASN context
    pub fn index(&self) -> Vec<u8> {
        let base = Negotiated {
            asn4: true,
            ..Negotiated::default()
        };
        let mut bytes = Vec::with_capacity(16 * self.inner.len());
        for attribute in self.inner.values() {
            match attribute.code() {
                codes::MP_REACH_NLRI | codes::MP_UNREACH_NLRI => continue,
                _ => attribute.encode(&base, &mut bytes),
            }
        }
        bytes
    }

    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        hasher.write(&self.index());
        hasher.finish()
    }

    /// Encode every attribute, in code order
    pub fn encode(&self, negotiated: &Negotiated, buf: &mut Vec<u8>) {
        for attribute in self.inner.values() {
            attribute.encode(negotiated, buf);
        }
    }

    /// Parse an attribute section. RFC 7606: recoverable malformations mark
    /// the whole UPDATE treat-as-withdraw instead of killing the session.
    pub fn parse_all(buf: &[u8], negotiated: &Negotiated) -> WireResult<ParsedAttributes> {
        let mut cur = Cursor::new(buf);
        let mut attributes = Attributes::new();
        let mut treat_as_withdraw: Option<WireError> = None;
        while (cur.position() as usize) < buf.len() {
            match PathAttribute::parse(&mut cur, negotiated) {
                Ok(Some(attribute)) => {
                    if attributes.contains(attribute.code()) {
                        // Duplicate attribute: keep the first occurrence
                        treat_as_withdraw.get_or_insert(WireError::attribute(
                            UPDATE_MALFORMED_ATTRIBUTE_LIST,
                            vec![attribute.code()],
                        ));
                        continue;
                    }
                    attributes.insert(attribute);
                }
                Ok(None) => (),
                // A truncated header or value loses the attribute boundary
                // (RFC 7606 §4), and an unrecognized well-known attribute
                // stays fatal (RFC 4271 §6.3): both reset the session
                Err(err)
                    if err.kind == super::error::ErrorKind::MalformedAttributeList
                        || err.subcode == UPDATE_UNRECOGNIZED_WELL_KNOWN =>
                {
                    return Err(err)
                }
                Err(err) => match attr_disposition(err.data.first().copied().unwrap_or(0)) {
                    AttrDisposition::SessionReset => return Err(err),
                    AttrDisposition::Discard => (),
                    AttrDisposition::TreatAsWithdraw => {
                        treat_as_withdraw.get_or_insert(err);
                        // The cursor is already past the broken attribute
                    }
                },
            }
        }
        Ok(ParsedAttributes {
            attributes,
            treat_as_withdraw,
        })
    }

    /// RFC 4271 §6.3: announcements require the well-known mandatory set
    pub fn mandatory_check(&self, has_legacy_nlri: bool) -> WireResult<()> {
        let mut required = vec![codes::ORIGIN, codes::AS_PATH];
        if has_legacy_nlri {
            required.push(codes::NEXT_HOP);
        }
        for code in required {
            if !self.contains(code) {
                return Err(WireError::attribute(UPDATE_MISSING_WELL_KNOWN, vec![code]));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::nlri::PrefixNlri;
    use super::*;

    fn base_attrs() -> Attributes {
        Attributes::new()
            .with(PathAttribute::Origin(Origin::Igp))
            .with(PathAttribute::AsPath(AsPath::sequence(vec![65000])))
            .with(PathAttribute::NextHop("1.2.3.4".parse().unwrap()))
    }

    fn roundtrip(attrs: &Attributes, negotiated: &Negotiated) -> Attributes {
        let mut buf = Vec::new();
        attrs.encode(negotiated, &mut buf);
        Attributes::parse_all(&buf, negotiated)
            .unwrap()
            .attributes
    }

    #[test]
    fn test_roundtrip_core_attributes() {
        let negotiated = Negotiated::test_session();
        let attrs = base_attrs()
            .with(PathAttribute::MultiExitDisc(50))
            .with(PathAttribute::LocalPref(200))
            .with(PathAttribute::Communities(vec![
                Community(0xfde80001),
                Community(0xffffff01),
            ]))
            .with(PathAttribute::LargeCommunities(vec![LargeCommunity {
                global: 65000,
                local1: 1,
                local2: 2,
            }]))
            .with(PathAttribute::ExtendedCommunities(vec![
                ExtendedCommunity::route_target(65000, 1),
            ]))
            .with(PathAttribute::Aigp(100));
        assert_eq!(roundtrip(&attrs, &negotiated), attrs);
    }

    #[test]
    fn test_wire_layout_origin() {
        let negotiated = Negotiated::test_session();
        let attrs = Attributes::new().with(PathAttribute::Origin(Origin::Igp));
        let mut buf = Vec::new();
        attrs.encode(&negotiated, &mut buf);
        assert_eq!(buf, vec![FLAG_TRANSITIVE, codes::ORIGIN, 1, 0]);
    }

    #[test]
    fn test_as_path_as2_with_as_trans() {
        let negotiated = Negotiated {
            asn4: false,
            ..Negotiated::test_session()
        };
        let attrs =
            Attributes::new().with(PathAttribute::AsPath(AsPath::sequence(vec![70000, 65001])));
        let mut buf = Vec::new();
        attrs.encode(&negotiated, &mut buf);
        // flags, code, len, seg type, count, AS_TRANS, 65001
        assert_eq!(
            buf,
            vec![0x40, 2, 6, 2, 2, 0x5b, 0xa0, 0xfd, 0xe9]
        );
    }

    #[test]
    fn test_as4_path_merge() {
        let as_path = AsPath::sequence(vec![65000, u32::from(AS_TRANS)]);
        let as4_path = AsPath::sequence(vec![200_000]);
        let merged = as_path.merged_with_as4(&as4_path);
        let asns: Vec<u32> = merged.iter_asns().collect();
        assert_eq!(asns, vec![65000, 200_000]);

        // AS4_PATH longer than AS_PATH is ignored
        let bogus = AsPath::sequence(vec![1, 2, 3]);
        assert_eq!(as_path.merged_with_as4(&bogus), as_path);
    }

    #[test]
    fn test_mp_reach_roundtrip_with_addpath() {
        let negotiated = Negotiated::test_session_add_path(Family::IPV4_UNICAST);
        let attrs = base_attrs().with(PathAttribute::MpReach(MpReach {
            family: Family::IPV4_UNICAST,
            next_hop: vec![1, 2, 3, 4],
            nlris: vec![Nlri::Unicast(PrefixNlri::new(
                "10.0.0.0/24".parse().unwrap(),
                Some(7),
            ))],
        }));
        assert_eq!(roundtrip(&attrs, &negotiated), attrs);
    }

    #[test]
    fn test_unknown_transitive_keeps_flags_sets_partial() {
        let negotiated = Negotiated::test_session();
        let attrs = Attributes::new().with(PathAttribute::Unknown {
            flags: FLAG_OPTIONAL | FLAG_TRANSITIVE,
            code: 99,
            value: vec![0xde, 0xad],
        });
        let mut buf = Vec::new();
        attrs.encode(&negotiated, &mut buf);
        assert_eq!(buf[0], FLAG_OPTIONAL | FLAG_TRANSITIVE | FLAG_PARTIAL);
        assert_eq!(buf[1], 99);
        let parsed = Attributes::parse_all(&buf, &negotiated).unwrap().attributes;
        match parsed.get(99) {
            Some(PathAttribute::Unknown { value, .. }) => assert_eq!(value, &vec![0xde, 0xad]),
            other => panic!("expected unknown attribute, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_non_transitive_dropped() {
        let negotiated = Negotiated::test_session();
        let buf = vec![FLAG_OPTIONAL, 99, 2, 0xde, 0xad];
        let parsed = Attributes::parse_all(&buf, &negotiated).unwrap();
        assert!(parsed.attributes.is_empty());
        assert!(parsed.treat_as_withdraw.is_none());
    }

    #[test]
    fn test_unrecognized_well_known_is_fatal() {
        let negotiated = Negotiated::test_session();
        let buf = vec![FLAG_TRANSITIVE, 77, 1, 0];
        let err = Attributes::parse_all(&buf, &negotiated).unwrap_err();
        assert_eq!(err.subcode, UPDATE_UNRECOGNIZED_WELL_KNOWN);
    }

    #[test]
    fn test_truncated_attribute_is_session_reset() {
        use crate::message::error::ErrorKind;
        let negotiated = Negotiated::test_session();
        // Value shorter than the declared length: the next attribute's
        // boundary is lost, so this can't be treat-as-withdraw
        let buf = vec![FLAG_TRANSITIVE, codes::AS_PATH, 10, 2, 1];
        let err = Attributes::parse_all(&buf, &negotiated).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedAttributeList);
        assert_eq!(err.subcode, UPDATE_MALFORMED_ATTRIBUTE_LIST);

        // Header cut off after the flags byte
        let buf = vec![FLAG_TRANSITIVE];
        let err = Attributes::parse_all(&buf, &negotiated).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedAttributeList);

        // Extended-length bit set but only one length byte present
        let buf = vec![FLAG_TRANSITIVE | FLAG_EXT_LENGTH, codes::AS_PATH, 0];
        let err = Attributes::parse_all(&buf, &negotiated).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedAttributeList);
    }

    #[test]
    fn test_malformed_as_path_treat_as_withdraw() {
        let negotiated = Negotiated::test_session();
        // Segment claims 3 ASNs but carries only one
        let buf = vec![FLAG_TRANSITIVE, codes::AS_PATH, 4, 2, 3, 0xfd, 0xe8];
        let parsed = Attributes::parse_all(&buf, &negotiated).unwrap();
        assert!(parsed.treat_as_withdraw.is_some());
    }

    #[test]
    fn test_fingerprint_groups_and_ignores_mp() {
        let a = base_attrs();
        let mut b = base_attrs();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.insert(PathAttribute::MpUnreach(MpUnreach {
            family: Family::IPV6_UNICAST,
            nlris: vec![],
        }));
        assert_eq!(a.fingerprint(), b.fingerprint());
        let c = base_attrs().with(PathAttribute::LocalPref(100));
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_mandatory_check() {
        assert!(base_attrs().mandatory_check(true).is_ok());
        let mut attrs = base_attrs();
        attrs.remove(codes::NEXT_HOP);
        assert!(attrs.mandatory_check(true).is_err());
        assert!(attrs.mandatory_check(false).is_ok());
    }

    #[test]
    fn test_extended_length_encoding() {
        let negotiated = Negotiated::test_session();
        let communities: Vec<Community> = (0..70).map(Community).collect();
        let attrs = Attributes::new().with(PathAttribute::Communities(communities.clone()));
        let mut buf = Vec::new();
        attrs.encode(&negotiated, &mut buf);
        assert_eq!(
            buf[0] & FLAG_EXT_LENGTH,
            FLAG_EXT_LENGTH,
            "280-byte value needs the extended length bit"
        );
        let parsed = Attributes::parse_all(&buf, &negotiated).unwrap().attributes;
        assert_eq!(
            parsed.get(codes::COMMUNITIES),
            Some(&PathAttribute::Communities(communities))
        );
    }
}
