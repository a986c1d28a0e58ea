use std::convert::TryFrom;
use std::net::IpAddr;

use crate::message::attributes::{Aggregator, AsPath, Origin, PathAttribute};
use crate::message::community::{Community, ExtendedCommunity, LargeCommunity};
use crate::message::nlri::flowspec::{FlowBuilder, FlowComponent, FlowOp, OP_EQ, OP_GT, OP_LT};
use crate::message::nlri::qualifiers::{Esi, EthernetTag, LabelStack, RouteDistinguisher};
use crate::message::nlri::{
    EvpnNlri, EvpnRoute, LabeledNlri, MupNlri, MupRoute, MvpnNlri, MvpnRoute, Prefix,
    PrefixNlri, RtcNlri, VplsNlri, VpnNlri,
};
use crate::message::{Attributes, Nlri, Safi};
use crate::rib::{NextHop, Route};
use crate::utils::{asn_from_dotted, ParseError};

/// A parsed route-spec line: the route plus command-level hints
#[derive(Debug)]
pub struct RouteSpec {
    pub route: Route,
    pub watchdog: Option<String>,
    pub withdraw_hint: bool,
}

struct Tokens<'a> {
    items: &'a [&'a str],
    at: usize,
}

impl<'a> Tokens<'a> {
    fn new(items: &'a [&'a str]) -> Self {
        Self { items, at: 0 }
    }

    fn peek(&self) -> Option<&'a str> {
        self.items.get(self.at).copied()
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.peek();
        if token.is_some() {
            self.at += 1;
        }
        token
    }

    fn expect(&mut self, what: &str) -> Result<&'a str, ParseError> {
        self.next()
            .ok_or_else(|| ParseError::new(format!("missing {}", what)))
    }

    /// Consume either a single token or a bracketed `[ a b c ]` list
    fn value_list(&mut self, what: &str) -> Result<Vec<&'a str>, ParseError> {
        match self.expect(what)? {
            "[" => {
                let mut values = Vec::new();
                loop {
                    match self.expect(&format!("{} list", what))? {
                        "]" => return Ok(values),
                        value => values.push(value),
                    }
                }
            }
            value => Ok(vec![value]),
        }
    }
}

fn parse_u32(token: &str, what: &str) -> Result<u32, ParseError> {
    token
        .parse()
        .map_err(|_| ParseError::new(format!("invalid {}: {}", what, token)))
}

fn parse_labels(token: &str) -> Result<LabelStack, ParseError> {
    let mut labels = Vec::new();
    for part in token.split(',') {
        labels.push(crate::message::nlri::qualifiers::Label(parse_u32(
            part, "label",
        )?));
    }
    Ok(LabelStack(labels))
}

fn parse_path_id(token: &str) -> Result<u32, ParseError> {
    if let Ok(ip) = token.parse::<std::net::Ipv4Addr>() {
        return Ok(u32::from_be_bytes(ip.octets()));
    }
    parse_u32(token, "path-information")
}

/// Attribute keywords shared by every family's grammar. Returns false when
/// the keyword wasn't an attribute (caller decides what it means).
fn parse_attribute_keyword(
    keyword: &str,
    tokens: &mut Tokens,
    attributes: &mut Attributes,
    spec: &mut SpecFields,
) -> Result<bool, ParseError> {
    match keyword {
        "next-hop" => {
            spec.nexthop = Some(
                tokens
                    .expect("next-hop")?
                    .parse()
                    .map_err(|err: ParseError| err)?,
            );
        }
        "origin" => {
            let origin = match tokens.expect("origin")? {
                "igp" => Origin::Igp,
                "egp" => Origin::Egp,
                "incomplete" => Origin::Incomplete,
                other => return Err(ParseError::new(format!("invalid origin: {}", other))),
            };
            attributes.insert(PathAttribute::Origin(origin));
        }
        "med" => {
            attributes.insert(PathAttribute::MultiExitDisc(parse_u32(
                tokens.expect("med")?,
                "med",
            )?));
        }
        "local-preference" => {
            attributes.insert(PathAttribute::LocalPref(parse_u32(
                tokens.expect("local-preference")?,
                "local-preference",
            )?));
        }
        "as-path" => {
            let mut asns = Vec::new();
            for token in tokens.value_list("as-path")? {
                asns.push(asn_from_dotted(token)?);
            }
            attributes.insert(PathAttribute::AsPath(AsPath::sequence(asns)));
        }
        "community" => {
            let mut communities = Vec::new();
            for token in tokens.value_list("community")? {
                communities.push(
                    Community::try_from(token)
                        .map_err(|_| ParseError::new(format!("invalid community: {}", token)))?,
                );
            }
            attributes.insert(PathAttribute::Communities(communities));
        }
        "extended-community" => {
            let mut communities = Vec::new();
            for token in tokens.value_list("extended-community")? {
                communities.push(ExtendedCommunity::try_from(token).map_err(|_| {
                    ParseError::new(format!("invalid extended community: {}", token))
                })?);
            }
            attributes.insert(PathAttribute::ExtendedCommunities(communities));
        }
        "large-community" => {
            let mut communities = Vec::new();
            for token in tokens.value_list("large-community")? {
                communities.push(LargeCommunity::try_from(token).map_err(|_| {
                    ParseError::new(format!("invalid large community: {}", token))
                })?);
            }
            attributes.insert(PathAttribute::LargeCommunities(communities));
        }
        "originator-id" => {
            let ip: std::net::Ipv4Addr = tokens
                .expect("originator-id")?
                .parse()
                .map_err(|_| ParseError::new("invalid originator-id"))?;
            attributes.insert(PathAttribute::OriginatorId(u32::from_be_bytes(ip.octets())));
        }
        "cluster-list" => {
            let mut ids = Vec::new();
            for token in tokens.value_list("cluster-list")? {
                let ip: std::net::Ipv4Addr = token
                    .parse()
                    .map_err(|_| ParseError::new("invalid cluster-list entry"))?;
                ids.push(u32::from_be_bytes(ip.octets()));
            }
            attributes.insert(PathAttribute::ClusterList(ids));
        }
        "atomic-aggregate" => {
            attributes.insert(PathAttribute::AtomicAggregate);
        }
        "aggregator" => {
            let token = tokens.expect("aggregator")?;
            let open = token.find('(').map(|at| at + 1).unwrap_or(0);
            let close = token.find(')').unwrap_or(token.len());
            let inner = &token[open..close];
            let at = inner
                .find(':')
                .ok_or_else(|| ParseError::new("aggregator needs asn:ip"))?;
            let asn = asn_from_dotted(&inner[..at])?;
            let speaker = inner[at + 1..]
                .parse()
                .map_err(|_| ParseError::new("invalid aggregator address"))?;
            attributes.insert(PathAttribute::Aggregator(Aggregator { asn, speaker }));
        }
        "aigp" => {
            attributes.insert(PathAttribute::Aigp(
                tokens
                    .expect("aigp")?
                    .parse()
                    .map_err(|_| ParseError::new("invalid aigp"))?,
            ));
        }
        "watchdog" => {
            spec.watchdog = Some(tokens.expect("watchdog")?.to_string());
        }
        "withdraw" => {
            spec.withdraw_hint = true;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

#[derive(Default)]
struct SpecFields {
    nexthop: Option<NextHop>,
    watchdog: Option<String>,
    withdraw_hint: bool,
    label: Option<LabelStack>,
    rd: Option<RouteDistinguisher>,
    path_id: Option<u32>,
}

/// Parse one route-spec (everything after the command verb)
pub fn parse(tokens: &[&str]) -> Result<RouteSpec, ParseError> {
    let mut tokens = Tokens::new(tokens);
    match tokens.expect("route family")? {
        "route" => parse_route(&mut tokens, None),
        "ipv4" | "ipv6" => {
            let safi = match tokens.expect("safi")? {
                "unicast" => Safi::Unicast,
                "multicast" => Safi::Multicast,
                "nlri-mpls" | "mpls" => Safi::Mpls,
                "mpls-vpn" => Safi::MplsVpn,
                other => return Err(ParseError::new(format!("unsupported safi: {}", other))),
            };
            parse_route(&mut tokens, Some(safi))
        }
        "flow" => parse_flow(&mut tokens),
        "vpls" => parse_vpls(&mut tokens),
        "rtc" => parse_rtc(&mut tokens),
        "evpn" => parse_evpn(&mut tokens),
        "mup-isd" => parse_mup_isd(&mut tokens),
        "mup-dsd" => parse_mup_dsd(&mut tokens),
        "mcast-vpn" => parse_mvpn(&mut tokens),
        other => Err(ParseError::new(format!("unknown route kind: {}", other))),
    }
}

fn finish(
    nlri: Nlri,
    attributes: Attributes,
    spec: SpecFields,
) -> Result<RouteSpec, ParseError> {
    let nexthop = spec.nexthop.unwrap_or(NextHop::SelfAddress);
    Ok(RouteSpec {
        route: Route::new(nlri, attributes, nexthop),
        watchdog: spec.watchdog,
        withdraw_hint: spec.withdraw_hint,
    })
}

fn parse_route(tokens: &mut Tokens, safi: Option<Safi>) -> Result<RouteSpec, ParseError> {
    let prefix: Prefix = tokens.expect("prefix")?.parse()?;
    let mut attributes = Attributes::new();
    let mut spec = SpecFields::default();
    while let Some(keyword) = tokens.next() {
        if parse_attribute_keyword(keyword, tokens, &mut attributes, &mut spec)? {
            continue;
        }
        match keyword {
            "label" => spec.label = Some(parse_labels(tokens.expect("label")?)?),
            "rd" | "route-distinguisher" => {
                spec.rd = Some(tokens.expect("rd")?.parse()?);
            }
            "path-information" => {
                spec.path_id = Some(parse_path_id(tokens.expect("path-information")?)?);
            }
            other => return Err(ParseError::new(format!("unknown keyword: {}", other))),
        }
    }

    let safi = safi.unwrap_or(match (&spec.rd, &spec.label) {
        (Some(_), _) => Safi::MplsVpn,
        (None, Some(_)) => Safi::Mpls,
        (None, None) => Safi::Unicast,
    });
    let nlri = match safi {
        Safi::Unicast => Nlri::Unicast(PrefixNlri::new(prefix, spec.path_id)),
        Safi::Multicast => Nlri::Multicast(PrefixNlri::new(prefix, spec.path_id)),
        Safi::Mpls => Nlri::Labeled(LabeledNlri::new(
            prefix,
            spec.label.clone().unwrap_or_default(),
            spec.path_id,
        )),
        Safi::MplsVpn => Nlri::Vpn(VpnNlri::new(
            spec.rd.unwrap_or(RouteDistinguisher::ZERO),
            prefix,
            spec.label.clone().unwrap_or_default(),
            spec.path_id,
        )),
        _ => unreachable!(),
    };
    finish(nlri, attributes, spec)
}

fn parse_flow_ops(values: &[&str], what: &str) -> Result<Vec<FlowOp>, ParseError> {
    let mut ops = Vec::with_capacity(values.len());
    for value in values {
        let (op, rest) = if let Some(rest) = value.strip_prefix(">=") {
            (OP_GT | OP_EQ, rest)
        } else if let Some(rest) = value.strip_prefix("<=") {
            (OP_LT | OP_EQ, rest)
        } else if let Some(rest) = value.strip_prefix('>') {
            (OP_GT, rest)
        } else if let Some(rest) = value.strip_prefix('<') {
            (OP_LT, rest)
        } else if let Some(rest) = value.strip_prefix('=') {
            (OP_EQ, rest)
        } else {
            (OP_EQ, *value)
        };
        let value: u64 = rest
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}: {}", what, rest)))?;
        ops.push(FlowOp { op, value });
    }
    Ok(ops)
}

fn parse_flow(tokens: &mut Tokens) -> Result<RouteSpec, ParseError> {
    let mut attributes = Attributes::new();
    let mut spec = SpecFields::default();
    let mut rd = None;
    let mut components: Vec<FlowComponent> = Vec::new();
    let mut afi = crate::message::Afi::Ipv4;
    let mut communities: Vec<ExtendedCommunity> = Vec::new();
    let mut in_actions = false;

    while let Some(keyword) = tokens.next() {
        if in_actions {
            match keyword {
                "rate-limit" => {
                    let rate: f32 = tokens
                        .expect("rate-limit")?
                        .parse()
                        .map_err(|_| ParseError::new("invalid rate-limit"))?;
                    communities.push(ExtendedCommunity::traffic_rate(0, rate));
                }
                "discard" => communities.push(ExtendedCommunity::traffic_rate(0, 0.0)),
                "redirect" => {
                    let token = tokens.expect("redirect")?;
                    let at = token
                        .find(':')
                        .ok_or_else(|| ParseError::new("redirect needs asn:value"))?;
                    communities.push(ExtendedCommunity::redirect(
                        token[..at]
                            .parse()
                            .map_err(|_| ParseError::new("invalid redirect"))?,
                        token[at + 1..]
                            .parse()
                            .map_err(|_| ParseError::new("invalid redirect"))?,
                    ));
                }
                "mark" => {
                    communities.push(ExtendedCommunity::traffic_mark(
                        tokens
                            .expect("mark")?
                            .parse()
                            .map_err(|_| ParseError::new("invalid mark"))?,
                    ));
                }
                "action" => match tokens.expect("action")? {
                    "sample" => communities.push(ExtendedCommunity::traffic_action(true, false)),
                    "terminal" => {
                        communities.push(ExtendedCommunity::traffic_action(false, true))
                    }
                    "sample-terminal" => {
                        communities.push(ExtendedCommunity::traffic_action(true, true))
                    }
                    other => return Err(ParseError::new(format!("unknown action: {}", other))),
                },
                other => {
                    if !parse_attribute_keyword(other, tokens, &mut attributes, &mut spec)? {
                        return Err(ParseError::new(format!("unknown flow action: {}", other)));
                    }
                }
            }
            continue;
        }
        match keyword {
            "then" => in_actions = true,
            "rd" | "route-distinguisher" => rd = Some(tokens.expect("rd")?.parse()?),
            "destination" => {
                let prefix: Prefix = tokens.expect("destination")?.parse()?;
                afi = prefix.afi;
                components.push(FlowComponent::DestinationPrefix(prefix));
            }
            "source" => {
                let prefix: Prefix = tokens.expect("source")?.parse()?;
                afi = prefix.afi;
                components.push(FlowComponent::SourcePrefix(prefix));
            }
            "protocol" => components.push(FlowComponent::Protocol(parse_flow_ops(
                &tokens.value_list("protocol")?,
                "protocol",
            )?)),
            "port" => components.push(FlowComponent::Port(parse_flow_ops(
                &tokens.value_list("port")?,
                "port",
            )?)),
            "destination-port" => components.push(FlowComponent::DestinationPort(
                parse_flow_ops(&tokens.value_list("destination-port")?, "destination-port")?,
            )),
            "source-port" => components.push(FlowComponent::SourcePort(parse_flow_ops(
                &tokens.value_list("source-port")?,
                "source-port",
            )?)),
            "icmp-type" => components.push(FlowComponent::IcmpType(parse_flow_ops(
                &tokens.value_list("icmp-type")?,
                "icmp-type",
            )?)),
            "icmp-code" => components.push(FlowComponent::IcmpCode(parse_flow_ops(
                &tokens.value_list("icmp-code")?,
                "icmp-code",
            )?)),
            "tcp-flags" => components.push(FlowComponent::TcpFlags(parse_flow_ops(
                &tokens.value_list("tcp-flags")?,
                "tcp-flags",
            )?)),
            "packet-length" => components.push(FlowComponent::PacketLength(parse_flow_ops(
                &tokens.value_list("packet-length")?,
                "packet-length",
            )?)),
            "dscp" => components.push(FlowComponent::Dscp(parse_flow_ops(
                &tokens.value_list("dscp")?,
                "dscp",
            )?)),
            "fragment" => components.push(FlowComponent::Fragment(parse_flow_ops(
                &tokens.value_list("fragment")?,
                "fragment",
            )?)),
            other => {
                if !parse_attribute_keyword(other, tokens, &mut attributes, &mut spec)? {
                    return Err(ParseError::new(format!("unknown flow match: {}", other)));
                }
            }
        }
    }

    if !communities.is_empty() {
        attributes.insert(PathAttribute::ExtendedCommunities(communities));
    }
    let mut builder = FlowBuilder::new(afi);
    if let Some(rd) = rd {
        builder = builder.rd(rd);
    }
    for component in components {
        builder = builder.component(component);
    }
    let nlri = builder
        .finalise()
        .map_err(|_| ParseError::new("flow needs at least one match component"))?;
    finish(Nlri::Flow(nlri), attributes, spec)
}

fn parse_vpls(tokens: &mut Tokens) -> Result<RouteSpec, ParseError> {
    let mut attributes = Attributes::new();
    let mut spec = SpecFields::default();
    let (mut rd, mut endpoint, mut offset, mut size, mut base) = (None, None, None, None, None);
    while let Some(keyword) = tokens.next() {
        if parse_attribute_keyword(keyword, tokens, &mut attributes, &mut spec)? {
            continue;
        }
        match keyword {
            "rd" | "route-distinguisher" => rd = Some(tokens.expect("rd")?.parse()?),
            "endpoint" => endpoint = Some(parse_u32(tokens.expect("endpoint")?, "endpoint")?),
            "offset" => offset = Some(parse_u32(tokens.expect("offset")?, "offset")?),
            "size" => size = Some(parse_u32(tokens.expect("size")?, "size")?),
            "base" => base = Some(parse_u32(tokens.expect("base")?, "base")?),
            other => return Err(ParseError::new(format!("unknown vpls keyword: {}", other))),
        }
    }
    let missing = || ParseError::new("vpls needs rd, endpoint, offset, size and base");
    let nlri = VplsNlri::new(
        rd.ok_or_else(missing)?,
        endpoint.ok_or_else(missing)? as u16,
        offset.ok_or_else(missing)? as u16,
        size.ok_or_else(missing)? as u16,
        base.ok_or_else(missing)?,
    );
    finish(Nlri::Vpls(nlri), attributes, spec)
}

fn parse_rtc(tokens: &mut Tokens) -> Result<RouteSpec, ParseError> {
    let mut attributes = Attributes::new();
    let mut spec = SpecFields::default();
    if tokens.peek() == Some("default") {
        tokens.next();
        while let Some(keyword) = tokens.next() {
            if !parse_attribute_keyword(keyword, tokens, &mut attributes, &mut spec)? {
                return Err(ParseError::new(format!("unknown rtc keyword: {}", keyword)));
            }
        }
        return finish(Nlri::Rtc(RtcNlri::wildcard()), attributes, spec);
    }
    let mut origin = None;
    let mut target = None;
    while let Some(keyword) = tokens.next() {
        if parse_attribute_keyword(keyword, tokens, &mut attributes, &mut spec)? {
            continue;
        }
        match keyword {
            "origin" => origin = Some(asn_from_dotted(tokens.expect("origin")?)?),
            "target" => {
                let token = tokens.expect("target")?;
                let at = token
                    .find(':')
                    .ok_or_else(|| ParseError::new("target needs asn:value"))?;
                let asn = asn_from_dotted(&token[..at])?;
                let value: u32 = token[at + 1..]
                    .parse()
                    .map_err(|_| ParseError::new("invalid target"))?;
                target = Some(ExtendedCommunity::route_target(asn, value).0);
            }
            other => return Err(ParseError::new(format!("unknown rtc keyword: {}", other))),
        }
    }
    let missing = || ParseError::new("rtc needs origin and target");
    let nlri = RtcNlri::new(origin.ok_or_else(missing)?, &target.ok_or_else(missing)?);
    finish(Nlri::Rtc(nlri), attributes, spec)
}

fn parse_esi(token: &str) -> Result<Esi, ParseError> {
    if token == "0" || token == "-" {
        return Ok(Esi::default());
    }
    let cleaned: String = token.chars().filter(|c| *c != ':').collect();
    if cleaned.len() != 20 {
        return Err(ParseError::new(format!("invalid esi: {}", token)));
    }
    let mut esi = [0u8; 10];
    for (i, chunk) in cleaned.as_bytes().chunks(2).enumerate() {
        let hex = std::str::from_utf8(chunk).map_err(|_| ParseError::new("invalid esi"))?;
        esi[i] =
            u8::from_str_radix(hex, 16).map_err(|_| ParseError::new("invalid esi"))?;
    }
    Ok(Esi(esi))
}

fn parse_evpn(tokens: &mut Tokens) -> Result<RouteSpec, ParseError> {
    let kind = tokens.expect("evpn route type")?;
    let mut attributes = Attributes::new();
    let mut spec = SpecFields::default();
    let (mut rd, mut esi, mut etag, mut mac, mut ip, mut label) =
        (None, Esi::default(), 0u32, None, None, None);
    while let Some(keyword) = tokens.next() {
        if parse_attribute_keyword(keyword, tokens, &mut attributes, &mut spec)? {
            continue;
        }
        match keyword {
            "rd" | "route-distinguisher" => rd = Some(tokens.expect("rd")?.parse()?),
            "esi" => esi = parse_esi(tokens.expect("esi")?)?,
            "etag" => etag = parse_u32(tokens.expect("etag")?, "etag")?,
            "mac" => {
                mac = Some(
                    tokens
                        .expect("mac")?
                        .parse()
                        .map_err(|err: ParseError| err)?,
                )
            }
            "ip" => {
                ip = Some(
                    tokens
                        .expect("ip")?
                        .parse::<IpAddr>()
                        .map_err(|_| ParseError::new("invalid evpn ip"))?,
                )
            }
            "label" => label = Some(parse_labels(tokens.expect("label")?)?),
            other => return Err(ParseError::new(format!("unknown evpn keyword: {}", other))),
        }
    }
    let rd = rd.ok_or_else(|| ParseError::new("evpn needs an rd"))?;
    let route = match kind {
        "mac" => EvpnRoute::MacAdvertisement {
            rd,
            esi,
            tag: EthernetTag(etag),
            mac: mac.ok_or_else(|| ParseError::new("evpn mac needs a mac"))?,
            ip,
            labels: label.unwrap_or_else(|| LabelStack::single(0)),
        },
        "multicast" => EvpnRoute::Multicast {
            rd,
            tag: EthernetTag(etag),
            ip: ip.ok_or_else(|| ParseError::new("evpn multicast needs an ip"))?,
        },
        "segment" => EvpnRoute::EthernetSegment {
            rd,
            esi,
            ip: ip.ok_or_else(|| ParseError::new("evpn segment needs an ip"))?,
        },
        other => return Err(ParseError::new(format!("unknown evpn type: {}", other))),
    };
    finish(Nlri::Evpn(EvpnNlri::new(route, None)), attributes, spec)
}

fn parse_mup_isd(tokens: &mut Tokens) -> Result<RouteSpec, ParseError> {
    let prefix: Prefix = tokens.expect("prefix")?.parse()?;
    let afi = prefix.afi;
    let mut attributes = Attributes::new();
    let mut spec = SpecFields::default();
    let mut rd = None;
    while let Some(keyword) = tokens.next() {
        if parse_attribute_keyword(keyword, tokens, &mut attributes, &mut spec)? {
            continue;
        }
        match keyword {
            "rd" | "route-distinguisher" => rd = Some(tokens.expect("rd")?.parse()?),
            other => return Err(ParseError::new(format!("unknown mup keyword: {}", other))),
        }
    }
    let rd = rd.ok_or_else(|| ParseError::new("mup-isd needs an rd"))?;
    let nlri = MupNlri::new(MupRoute::InterworkSegmentDiscovery { rd, prefix }, afi);
    finish(Nlri::Mup(nlri), attributes, spec)
}

fn parse_mup_dsd(tokens: &mut Tokens) -> Result<RouteSpec, ParseError> {
    let address: IpAddr = tokens
        .expect("address")?
        .parse()
        .map_err(|_| ParseError::new("invalid mup-dsd address"))?;
    let (afi, octets) = match address {
        IpAddr::V4(ip) => (crate::message::Afi::Ipv4, ip.octets().to_vec()),
        IpAddr::V6(ip) => (crate::message::Afi::Ipv6, ip.octets().to_vec()),
    };
    let mut attributes = Attributes::new();
    let mut spec = SpecFields::default();
    let mut rd = None;
    while let Some(keyword) = tokens.next() {
        if parse_attribute_keyword(keyword, tokens, &mut attributes, &mut spec)? {
            continue;
        }
        match keyword {
            "rd" | "route-distinguisher" => rd = Some(tokens.expect("rd")?.parse()?),
            other => return Err(ParseError::new(format!("unknown mup keyword: {}", other))),
        }
    }
    let rd = rd.ok_or_else(|| ParseError::new("mup-dsd needs an rd"))?;
    let nlri = MupNlri::new(
        MupRoute::DirectSegmentDiscovery {
            rd,
            address: octets,
        },
        afi,
    );
    finish(Nlri::Mup(nlri), attributes, spec)
}

fn parse_mvpn(tokens: &mut Tokens) -> Result<RouteSpec, ParseError> {
    let kind = tokens.expect("mcast-vpn route type")?;
    let mut attributes = Attributes::new();
    let mut spec = SpecFields::default();
    let (mut rd, mut source_as, mut source, mut group, mut originator) =
        (None, 0u32, None, None, None);
    let addr_octets = |token: &str| -> Result<(crate::message::Afi, Vec<u8>), ParseError> {
        let ip: IpAddr = token
            .parse()
            .map_err(|_| ParseError::new("invalid mcast-vpn address"))?;
        Ok(match ip {
            IpAddr::V4(ip) => (crate::message::Afi::Ipv4, ip.octets().to_vec()),
            IpAddr::V6(ip) => (crate::message::Afi::Ipv6, ip.octets().to_vec()),
        })
    };
    let mut afi = crate::message::Afi::Ipv4;
    while let Some(keyword) = tokens.next() {
        if parse_attribute_keyword(keyword, tokens, &mut attributes, &mut spec)? {
            continue;
        }
        match keyword {
            "rd" | "route-distinguisher" => rd = Some(tokens.expect("rd")?.parse()?),
            "source-as" => source_as = asn_from_dotted(tokens.expect("source-as")?)?,
            "source" => {
                let (a, octets) = addr_octets(tokens.expect("source")?)?;
                afi = a;
                source = Some(octets);
            }
            "group" => {
                let (a, octets) = addr_octets(tokens.expect("group")?)?;
                afi = a;
                group = Some(octets);
            }
            "originator" => {
                let (a, octets) = addr_octets(tokens.expect("originator")?)?;
                afi = a;
                originator = Some(octets);
            }
            other => {
                return Err(ParseError::new(format!(
                    "unknown mcast-vpn keyword: {}",
                    other
                )))
            }
        }
    }
    let rd = rd.ok_or_else(|| ParseError::new("mcast-vpn needs an rd"))?;
    let route = match kind {
        "auto-discovery" => MvpnRoute::IntraAsAd {
            rd,
            originator: originator
                .ok_or_else(|| ParseError::new("auto-discovery needs an originator"))?,
        },
        "source-ad" => MvpnRoute::SourceActiveAd {
            rd,
            source: source.ok_or_else(|| ParseError::new("source-ad needs a source"))?,
            group: group.ok_or_else(|| ParseError::new("source-ad needs a group"))?,
        },
        "shared-join" => MvpnRoute::SharedTreeJoin {
            rd,
            source_as,
            source: source.ok_or_else(|| ParseError::new("shared-join needs a source"))?,
            group: group.ok_or_else(|| ParseError::new("shared-join needs a group"))?,
        },
        "source-join" => MvpnRoute::SourceTreeJoin {
            rd,
            source_as,
            source: source.ok_or_else(|| ParseError::new("source-join needs a source"))?,
            group: group.ok_or_else(|| ParseError::new("source-join needs a group"))?,
        },
        other => {
            return Err(ParseError::new(format!(
                "unknown mcast-vpn type: {}",
                other
            )))
        }
    };
    finish(Nlri::Mvpn(afi, MvpnNlri::new(route)), attributes, spec)
}
