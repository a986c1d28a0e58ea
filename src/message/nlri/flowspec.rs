use std::fmt;
use std::io::{Cursor, Read};

use byteorder::ReadBytesExt;

use super::prefix::Prefix;
use super::qualifiers::RouteDistinguisher;
use crate::message::error::{WireError, WireResult};
use crate::message::family::{Afi, Family, Safi};

// Component type codes (RFC 8955 §4.2.2)
pub const COMPONENT_DESTINATION: u8 = 1;
pub const COMPONENT_SOURCE: u8 = 2;
pub const COMPONENT_PROTOCOL: u8 = 3;
pub const COMPONENT_PORT: u8 = 4;
pub const COMPONENT_DESTINATION_PORT: u8 = 5;
pub const COMPONENT_SOURCE_PORT: u8 = 6;
pub const COMPONENT_ICMP_TYPE: u8 = 7;
pub const COMPONENT_ICMP_CODE: u8 = 8;
pub const COMPONENT_TCP_FLAGS: u8 = 9;
pub const COMPONENT_PACKET_LENGTH: u8 = 10;
pub const COMPONENT_DSCP: u8 = 11;
pub const COMPONENT_FRAGMENT: u8 = 12;

// Operator bits shared by the numeric and bitmask forms
pub const OP_EOL: u8 = 0x80;
pub const OP_AND: u8 = 0x40;
pub const OP_LT: u8 = 0x04;
pub const OP_GT: u8 = 0x02;
pub const OP_EQ: u8 = 0x01;
pub const OP_MATCH: u8 = 0x01;
pub const OP_NOT: u8 = 0x02;

/// One `{operator, value}` pair; the length bits of the operator byte are
/// computed at pack time from the value
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FlowOp {
    pub op: u8,
    pub value: u64,
}

impl FlowOp {
    pub fn eq(value: u64) -> Self {
        Self { op: OP_EQ, value }
    }

    fn value_len(value: u64) -> (u8, usize) {
        if value <= 0xff {
            (0x00, 1)
        } else if value <= 0xffff {
            (0x10, 2)
        } else if value <= 0xffff_ffff {
            (0x20, 4)
        } else {
            (0x30, 8)
        }
    }

    fn pack(&self, last: bool, buf: &mut Vec<u8>) {
        let (len_bits, len) = Self::value_len(self.value);
        let mut op = (self.op & !(OP_EOL | 0x30)) | len_bits;
        if last {
            op |= OP_EOL;
        }
        buf.push(op);
        buf.extend_from_slice(&self.value.to_be_bytes()[8 - len..]);
    }

    fn parse(cur: &mut Cursor<&[u8]>) -> WireResult<(Self, bool)> {
        let op = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
        let len = 1usize << ((op & 0x30) >> 4);
        let mut raw = [0u8; 8];
        cur.read_exact(&mut raw[8 - len..])
            .map_err(|_| WireError::nlri(vec![op]))?;
        Ok((
            Self {
                op: op & !(OP_EOL | 0x30),
                value: u64::from_be_bytes(raw),
            },
            op & OP_EOL != 0,
        ))
    }

    fn numeric_string(&self) -> String {
        let mut out = String::new();
        if self.op & OP_AND != 0 {
            out.push('&');
        }
        if self.op & OP_LT != 0 {
            out.push('<');
        } else if self.op & OP_GT != 0 {
            out.push('>');
        }
        if self.op & OP_EQ != 0 {
            out.push('=');
        }
        out.push_str(&self.value.to_string());
        out
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum FlowComponent {
    DestinationPrefix(Prefix),
    SourcePrefix(Prefix),
    Protocol(Vec<FlowOp>),
    Port(Vec<FlowOp>),
    DestinationPort(Vec<FlowOp>),
    SourcePort(Vec<FlowOp>),
    IcmpType(Vec<FlowOp>),
    IcmpCode(Vec<FlowOp>),
    TcpFlags(Vec<FlowOp>),
    PacketLength(Vec<FlowOp>),
    Dscp(Vec<FlowOp>),
    Fragment(Vec<FlowOp>),
}

impl FlowComponent {
    pub fn type_code(&self) -> u8 {
        use FlowComponent::*;
        match self {
            DestinationPrefix(_) => COMPONENT_DESTINATION,
            SourcePrefix(_) => COMPONENT_SOURCE,
            Protocol(_) => COMPONENT_PROTOCOL,
            Port(_) => COMPONENT_PORT,
            DestinationPort(_) => COMPONENT_DESTINATION_PORT,
            SourcePort(_) => COMPONENT_SOURCE_PORT,
            IcmpType(_) => COMPONENT_ICMP_TYPE,
            IcmpCode(_) => COMPONENT_ICMP_CODE,
            TcpFlags(_) => COMPONENT_TCP_FLAGS,
            PacketLength(_) => COMPONENT_PACKET_LENGTH,
            Dscp(_) => COMPONENT_DSCP,
            Fragment(_) => COMPONENT_FRAGMENT,
        }
    }

    fn ops(&self) -> Option<&[FlowOp]> {
        use FlowComponent::*;
        match self {
            DestinationPrefix(_) | SourcePrefix(_) => None,
            Protocol(ops) | Port(ops) | DestinationPort(ops) | SourcePort(ops)
            | IcmpType(ops) | IcmpCode(ops) | TcpFlags(ops) | PacketLength(ops) | Dscp(ops)
            | Fragment(ops) => Some(ops),
        }
    }

    fn pack(&self, afi: Afi, buf: &mut Vec<u8>) {
        buf.push(self.type_code());
        match self {
            FlowComponent::DestinationPrefix(prefix) | FlowComponent::SourcePrefix(prefix) => {
                prefix.pack(buf);
                if afi == Afi::Ipv6 {
                    // RFC 8956 puts an offset byte after the length; always 0 here,
                    // the packer writes length first so splice the offset in
                    let at = buf.len() - prefix.byte_len();
                    buf.insert(at, 0);
                }
            }
            _ => {
                let ops = self.ops().expect("operator component");
                for (i, op) in ops.iter().enumerate() {
                    op.pack(i == ops.len() - 1, buf);
                }
            }
        }
    }

    fn parse(cur: &mut Cursor<&[u8]>, afi: Afi) -> WireResult<Self> {
        let type_code = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
        match type_code {
            COMPONENT_DESTINATION | COMPONENT_SOURCE => {
                let prefix = if afi == Afi::Ipv6 {
                    let length = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
                    let _offset = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
                    let byte_len = ((length as usize) + 7) / 8;
                    let mut octets = vec![0u8; byte_len];
                    cur.read_exact(&mut octets)
                        .map_err(|_| WireError::nlri(vec![length]))?;
                    Prefix::new(afi, length, &octets)?
                } else {
                    Prefix::parse(cur, afi)?
                };
                if type_code == COMPONENT_DESTINATION {
                    Ok(FlowComponent::DestinationPrefix(prefix))
                } else {
                    Ok(FlowComponent::SourcePrefix(prefix))
                }
            }
            COMPONENT_PROTOCOL..=COMPONENT_FRAGMENT => {
                let mut ops = Vec::with_capacity(1);
                loop {
                    let (op, eol) = FlowOp::parse(cur)?;
                    ops.push(op);
                    if eol {
                        break;
                    }
                    if ops.len() > 64 {
                        return Err(WireError::nlri(vec![type_code]));
                    }
                }
                Ok(match type_code {
                    COMPONENT_PROTOCOL => FlowComponent::Protocol(ops),
                    COMPONENT_PORT => FlowComponent::Port(ops),
                    COMPONENT_DESTINATION_PORT => FlowComponent::DestinationPort(ops),
                    COMPONENT_SOURCE_PORT => FlowComponent::SourcePort(ops),
                    COMPONENT_ICMP_TYPE => FlowComponent::IcmpType(ops),
                    COMPONENT_ICMP_CODE => FlowComponent::IcmpCode(ops),
                    COMPONENT_TCP_FLAGS => FlowComponent::TcpFlags(ops),
                    COMPONENT_PACKET_LENGTH => FlowComponent::PacketLength(ops),
                    COMPONENT_DSCP => FlowComponent::Dscp(ops),
                    _ => FlowComponent::Fragment(ops),
                })
            }
            _ => Err(WireError::nlri(vec![type_code])),
        }
    }
}

impl fmt::Display for FlowComponent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let render = |ops: &[FlowOp]| {
            ops.iter()
                .map(|op| op.numeric_string())
                .collect::<Vec<_>>()
                .join(" ")
        };
        match self {
            FlowComponent::DestinationPrefix(p) => write!(f, "destination {}", p),
            FlowComponent::SourcePrefix(p) => write!(f, "source {}", p),
            FlowComponent::Protocol(ops) => write!(f, "protocol {}", render(ops)),
            FlowComponent::Port(ops) => write!(f, "port {}", render(ops)),
            FlowComponent::DestinationPort(ops) => write!(f, "destination-port {}", render(ops)),
            FlowComponent::SourcePort(ops) => write!(f, "source-port {}", render(ops)),
            FlowComponent::IcmpType(ops) => write!(f, "icmp-type {}", render(ops)),
            FlowComponent::IcmpCode(ops) => write!(f, "icmp-code {}", render(ops)),
            FlowComponent::TcpFlags(ops) => write!(f, "tcp-flags {}", render(ops)),
            FlowComponent::PacketLength(ops) => write!(f, "packet-length {}", render(ops)),
            FlowComponent::Dscp(ops) => write!(f, "dscp {}", render(ops)),
            FlowComponent::Fragment(ops) => write!(f, "fragment {}", render(ops)),
        }
    }
}

/// Accumulates components, then `finalise()` orders them by type code and
/// computes the packed bytes once. The only NLRI that isn't packed-first,
/// because component order on the wire is a validity rule.
#[derive(Debug)]
pub struct FlowBuilder {
    afi: Afi,
    rd: Option<RouteDistinguisher>,
    components: Vec<FlowComponent>,
}

impl FlowBuilder {
    pub fn new(afi: Afi) -> Self {
        Self {
            afi,
            rd: None,
            components: Vec::new(),
        }
    }

    pub fn rd(mut self, rd: RouteDistinguisher) -> Self {
        self.rd = Some(rd);
        self
    }

    pub fn component(mut self, component: FlowComponent) -> Self {
        self.components.push(component);
        self
    }

    pub fn finalise(mut self) -> WireResult<FlowNlri> {
        if self.components.is_empty() {
            return Err(WireError::nlri(vec![]));
        }
        self.components.sort_by_key(|c| c.type_code());
        let safi = if self.rd.is_some() {
            Safi::FlowVpn
        } else {
            Safi::Flow
        };
        let family = Family::new(self.afi, safi);
        let mut body = Vec::with_capacity(16);
        if let Some(rd) = self.rd {
            rd.pack(&mut body);
        }
        for component in &self.components {
            component.pack(self.afi, &mut body);
        }
        let mut packed = Vec::with_capacity(body.len() + 2);
        if body.len() < 240 {
            packed.push(body.len() as u8);
        } else {
            packed.push(0xf0 | ((body.len() >> 8) & 0x0f) as u8);
            packed.push((body.len() & 0xff) as u8);
        }
        packed.extend_from_slice(&body);
        Ok(FlowNlri {
            family,
            rd: self.rd,
            components: self.components,
            packed,
        })
    }
}

/// An immutable, finalised FlowSpec rule set
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FlowNlri {
    pub family: Family,
    pub rd: Option<RouteDistinguisher>,
    pub components: Vec<FlowComponent>,
    packed: Vec<u8>,
}

impl FlowNlri {
    pub fn parse(cur: &mut Cursor<&[u8]>, family: Family) -> WireResult<Self> {
        let first = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
        let length = if first >= 0xf0 {
            let second = cur.read_u8().map_err(|_| WireError::nlri(vec![first]))?;
            ((usize::from(first) & 0x0f) << 8) + usize::from(second)
        } else {
            usize::from(first)
        };
        let mut body = vec![0u8; length];
        cur.read_exact(&mut body)
            .map_err(|_| WireError::nlri(vec![first]))?;

        let mut body_cur = Cursor::new(&body[..]);
        let rd = if family.safi == Safi::FlowVpn {
            let mut raw = [0u8; 8];
            body_cur
                .read_exact(&mut raw)
                .map_err(|_| WireError::nlri(body.clone()))?;
            Some(RouteDistinguisher(raw))
        } else {
            None
        };
        let mut components = Vec::with_capacity(2);
        while (body_cur.position() as usize) < body.len() {
            components.push(FlowComponent::parse(&mut body_cur, family.afi)?);
        }

        let mut builder = FlowBuilder::new(family.afi);
        if let Some(rd) = rd {
            builder = builder.rd(rd);
        }
        for component in components {
            builder = builder.component(component);
        }
        builder.finalise()
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for FlowNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "flow")?;
        if let Some(rd) = &self.rd {
            write!(f, " rd {}", rd)?;
        }
        for component in &self.components {
            write!(f, " {}", component)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_flow() -> FlowNlri {
        FlowBuilder::new(Afi::Ipv4)
            .component(FlowComponent::DestinationPort(vec![FlowOp::eq(80)]))
            .component(FlowComponent::DestinationPrefix(
                "10.0.0.0/24".parse().unwrap(),
            ))
            .component(FlowComponent::Protocol(vec![FlowOp::eq(6)]))
            .finalise()
            .unwrap()
    }

    #[test]
    fn test_components_ordered_by_type() {
        let flow = sample_flow();
        let codes: Vec<u8> = flow.components.iter().map(|c| c.type_code()).collect();
        assert_eq!(
            codes,
            vec![COMPONENT_DESTINATION, COMPONENT_PROTOCOL, COMPONENT_DESTINATION_PORT]
        );
        // length, dest(type+mask+3), proto(type+op+val), dport(type+op+val)
        assert_eq!(flow.packed().len(), 1 + 5 + 3 + 3);
        assert_eq!(flow.packed()[0], 11);
    }

    #[test]
    fn test_flow_roundtrip() {
        let flow = sample_flow();
        let mut cur = Cursor::new(flow.packed());
        let parsed = FlowNlri::parse(&mut cur, Family::IPV4_FLOW).unwrap();
        assert_eq!(parsed, flow);
    }

    #[test]
    fn test_flow_vpn_carries_rd() {
        let rd = RouteDistinguisher::from_asn(65000, 1);
        let flow = FlowBuilder::new(Afi::Ipv4)
            .rd(rd)
            .component(FlowComponent::Protocol(vec![FlowOp::eq(17)]))
            .finalise()
            .unwrap();
        assert_eq!(flow.family.safi, Safi::FlowVpn);
        let mut cur = Cursor::new(flow.packed());
        let parsed =
            FlowNlri::parse(&mut cur, Family::new(Afi::Ipv4, Safi::FlowVpn)).unwrap();
        assert_eq!(parsed.rd, Some(rd));
    }

    #[test]
    fn test_wide_value_length() {
        let flow = FlowBuilder::new(Afi::Ipv4)
            .component(FlowComponent::PacketLength(vec![FlowOp::eq(1500)]))
            .finalise()
            .unwrap();
        // Operator byte carries the 2-byte length bits plus EOL
        assert_eq!(flow.packed()[2] & 0x30, 0x10);
        assert_eq!(&flow.packed()[3..5], &1500u16.to_be_bytes());
    }

    #[test]
    fn test_empty_flow_rejected() {
        assert!(FlowBuilder::new(Afi::Ipv4).finalise().is_err());
    }
}
