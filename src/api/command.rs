use std::net::IpAddr;

use crate::message::Family;
use crate::utils::ParseError;

use super::route_spec::{self, RouteSpec};

/// Which neighbors a command applies to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerSelector {
    All,
    List(Vec<IpAddr>),
}

impl PeerSelector {
    pub fn matches(&self, addr: IpAddr) -> bool {
        match self {
            PeerSelector::All => true,
            PeerSelector::List(addrs) => addrs.contains(&addr),
        }
    }
}

#[derive(Debug)]
pub enum RemoveTarget {
    /// Hex route index as returned by `routes add`
    Index(Vec<u8>),
    Spec(RouteSpec),
}

#[derive(Debug)]
pub enum Command {
    Announce {
        peers: PeerSelector,
        specs: Vec<RouteSpec>,
    },
    Withdraw {
        peers: PeerSelector,
        specs: Vec<RouteSpec>,
    },
    AnnounceEor {
        peers: PeerSelector,
        family: Family,
    },
    AnnounceRefresh {
        peers: PeerSelector,
        family: Family,
    },
    RoutesList {
        family: Option<Family>,
    },
    RoutesAdd {
        spec: RouteSpec,
    },
    RoutesRemove {
        target: RemoveTarget,
    },
    ShowNeighbor {
        addr: Option<IpAddr>,
        extensive: bool,
    },
    Teardown {
        peers: PeerSelector,
        subcode: u8,
    },
    /// Sub-commands batched so their changes drain into one UPDATE pass
    Group {
        peers: PeerSelector,
        commands: Vec<Command>,
    },
}

/// Parse one newline-delimited command
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::new("empty command"));
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (peers, rest) = parse_selector(&tokens)?;
    parse_verb(peers, rest)
}

/// `peer *`, `peer <ip>`, or `peer [ip, ip]`; absent means every neighbor
fn parse_selector<'a>(
    tokens: &'a [&'a str],
) -> Result<(PeerSelector, &'a [&'a str]), ParseError> {
    if tokens.first() != Some(&"peer") {
        return Ok((PeerSelector::All, tokens));
    }
    let spec = tokens
        .get(1)
        .ok_or_else(|| ParseError::new("missing peer selector"))?;
    if *spec == "*" {
        return Ok((PeerSelector::All, &tokens[2..]));
    }
    if let Ok(addr) = spec.parse::<IpAddr>() {
        return Ok((PeerSelector::List(vec![addr]), &tokens[2..]));
    }
    if spec.starts_with('[') {
        let mut addrs = Vec::new();
        let mut consumed = 1;
        for token in &tokens[1..] {
            consumed += 1;
            let cleaned = token.trim_matches(|c| c == '[' || c == ']' || c == ',');
            if !cleaned.is_empty() {
                addrs.push(
                    cleaned
                        .parse()
                        .map_err(|_| ParseError::new(format!("invalid peer: {}", cleaned)))?,
                );
            }
            if token.ends_with(']') {
                break;
            }
        }
        if addrs.is_empty() {
            return Err(ParseError::new("empty peer list"));
        }
        return Ok((PeerSelector::List(addrs), &tokens[consumed..]));
    }
    Err(ParseError::new(format!("invalid peer selector: {}", spec)))
}

fn parse_family(tokens: &[&str]) -> Result<Family, ParseError> {
    match tokens {
        [afi, safi, ..] => Family::from_strings(afi, safi)
            .ok_or_else(|| ParseError::new(format!("unknown family: {} {}", afi, safi))),
        _ => Err(ParseError::new("missing family")),
    }
}

/// One or more route specs: either a plain spec, or the shared-attribute
/// form `attributes <attrs> nlri <p1> <p2> ...`
fn parse_specs(tokens: &[&str]) -> Result<Vec<RouteSpec>, ParseError> {
    if tokens.first() == Some(&"attributes") {
        let nlri_at = tokens
            .iter()
            .position(|token| *token == "nlri")
            .ok_or_else(|| ParseError::new("attributes form needs an nlri section"))?;
        let attr_tokens = &tokens[1..nlri_at];
        let prefixes = &tokens[nlri_at + 1..];
        if prefixes.is_empty() {
            return Err(ParseError::new("nlri section is empty"));
        }
        let mut specs = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            let mut spec_tokens = vec!["route", prefix];
            spec_tokens.extend_from_slice(attr_tokens);
            specs.push(route_spec::parse(&spec_tokens)?);
        }
        return Ok(specs);
    }
    Ok(vec![route_spec::parse(tokens)?])
}

fn parse_verb(peers: PeerSelector, tokens: &[&str]) -> Result<Command, ParseError> {
    let (verb, rest) = tokens
        .split_first()
        .ok_or_else(|| ParseError::new("missing command"))?;
    match *verb {
        "announce" => match rest.first() {
            Some(&"eor") => Ok(Command::AnnounceEor {
                peers,
                family: parse_family(&rest[1..])?,
            }),
            Some(&"route-refresh") => Ok(Command::AnnounceRefresh {
                peers,
                family: parse_family(&rest[1..])?,
            }),
            _ => Ok(Command::Announce {
                peers,
                specs: parse_specs(rest)?,
            }),
        },
        "withdraw" => Ok(Command::Withdraw {
            peers,
            specs: parse_specs(rest)?,
        }),
        "attributes" => Ok(Command::Announce {
            peers,
            specs: parse_specs(tokens)?,
        }),
        "routes" => match rest.split_first() {
            Some((&"list", family_tokens)) => {
                let family = if family_tokens.is_empty() {
                    None
                } else {
                    Some(parse_family(family_tokens)?)
                };
                Ok(Command::RoutesList { family })
            }
            Some((&"add", spec_tokens)) => Ok(Command::RoutesAdd {
                spec: route_spec::parse(spec_tokens)?,
            }),
            Some((&"remove", target_tokens)) => match target_tokens.split_first() {
                Some((&"index", index_tokens)) => {
                    let hex = index_tokens
                        .first()
                        .ok_or_else(|| ParseError::new("missing index"))?;
                    let hex = hex.trim_start_matches("0x");
                    if hex.len() % 2 != 0 {
                        return Err(ParseError::new("index must be whole bytes"));
                    }
                    let mut index = Vec::with_capacity(hex.len() / 2);
                    for at in (0..hex.len()).step_by(2) {
                        index.push(
                            u8::from_str_radix(&hex[at..at + 2], 16)
                                .map_err(|_| ParseError::new("invalid index hex"))?,
                        );
                    }
                    Ok(Command::RoutesRemove {
                        target: RemoveTarget::Index(index),
                    })
                }
                Some(_) => Ok(Command::RoutesRemove {
                    target: RemoveTarget::Spec(route_spec::parse(target_tokens)?),
                }),
                None => Err(ParseError::new("routes remove needs a target")),
            },
            _ => Err(ParseError::new("routes needs list, add or remove")),
        },
        "show" => match rest.split_first() {
            Some((&"neighbor", args)) => {
                let mut addr = None;
                let mut extensive = false;
                for arg in args {
                    match *arg {
                        "extensive" => extensive = true,
                        "summary" => extensive = false,
                        other => {
                            addr = Some(other.parse().map_err(|_| {
                                ParseError::new(format!("invalid neighbor: {}", other))
                            })?)
                        }
                    }
                }
                Ok(Command::ShowNeighbor { addr, extensive })
            }
            _ => Err(ParseError::new("show supports: show neighbor")),
        },
        "teardown" => {
            let subcode = match rest.first() {
                None => crate::message::error::CEASE_ADMIN_SHUTDOWN,
                Some(token) => token
                    .parse()
                    .map_err(|_| ParseError::new(format!("invalid subcode: {}", token)))?,
            };
            Ok(Command::Teardown { peers, subcode })
        }
        "group" => {
            let joined = rest.join(" ");
            let mut commands = Vec::new();
            for part in joined.split(';') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let sub_tokens: Vec<&str> = part.split_whitespace().collect();
                commands.push(parse_verb(peers.clone(), &sub_tokens)?);
            }
            if commands.is_empty() {
                return Err(ParseError::new("empty group"));
            }
            Ok(Command::Group { peers, commands })
        }
        other => Err(ParseError::new(format!("unknown command: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_forms() {
        let command = parse("peer * announce route 10.0.0.0/24 next-hop 1.2.3.4").unwrap();
        match command {
            Command::Announce { peers, specs } => {
                assert_eq!(peers, PeerSelector::All);
                assert_eq!(specs.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        let command =
            parse("peer 127.0.0.2 withdraw route 10.0.0.0/24").unwrap();
        match command {
            Command::Withdraw { peers, .. } => {
                assert!(peers.matches("127.0.0.2".parse().unwrap()));
                assert!(!peers.matches("127.0.0.3".parse().unwrap()));
            }
            other => panic!("unexpected {:?}", other),
        }

        let command = parse(
            "peer [127.0.0.2, 127.0.0.3] announce route 10.0.0.0/24 next-hop 1.2.3.4",
        )
        .unwrap();
        match command {
            Command::Announce { peers, .. } => {
                assert!(peers.matches("127.0.0.3".parse().unwrap()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_eor_and_refresh() {
        match parse("announce eor ipv4 unicast").unwrap() {
            Command::AnnounceEor { family, .. } => {
                assert_eq!(family, Family::IPV4_UNICAST)
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse("peer * announce route-refresh ipv6 unicast").unwrap() {
            Command::AnnounceRefresh { family, .. } => {
                assert_eq!(family, Family::IPV6_UNICAST)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_routes_commands() {
        match parse("routes list ipv4 unicast").unwrap() {
            Command::RoutesList { family } => assert_eq!(family, Some(Family::IPV4_UNICAST)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parse("routes list").unwrap(),
            Command::RoutesList { family: None }
        ));
        assert!(matches!(
            parse("routes add route 10.0.0.0/24 next-hop 1.2.3.4").unwrap(),
            Command::RoutesAdd { .. }
        ));
        match parse("routes remove index 0x0001011800000a").unwrap() {
            Command::RoutesRemove {
                target: RemoveTarget::Index(index),
            } => assert_eq!(index.len(), 7),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parse("routes remove route 10.0.0.0/24").unwrap(),
            Command::RoutesRemove {
                target: RemoveTarget::Spec(_)
            }
        ));
    }

    #[test]
    fn test_group_batches() {
        let command = parse(
            "group withdraw route 10.0.0.0/24 ; announce route 10.0.0.0/24 next-hop 1.2.3.5",
        )
        .unwrap();
        match command {
            Command::Group { peers, commands } => {
                assert_eq!(peers, PeerSelector::All);
                assert_eq!(commands.len(), 2);
                assert!(matches!(commands[0], Command::Withdraw { .. }));
                assert!(matches!(commands[1], Command::Announce { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_attributes_nlri_form() {
        let command = parse(
            "announce attributes next-hop 1.2.3.4 med 50 nlri 10.0.0.0/24 10.0.1.0/24",
        )
        .unwrap();
        match command {
            Command::Announce { specs, .. } => {
                assert_eq!(specs.len(), 2);
                assert_eq!(
                    specs[0].route.attributes.index(),
                    specs[1].route.attributes.index()
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_show_and_teardown() {
        match parse("show neighbor 127.0.0.2 extensive").unwrap() {
            Command::ShowNeighbor { addr, extensive } => {
                assert_eq!(addr, Some("127.0.0.2".parse().unwrap()));
                assert!(extensive);
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse("peer 127.0.0.2 teardown 4").unwrap() {
            Command::Teardown { subcode, .. } => assert_eq!(subcode, 4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("peer").is_err());
        assert!(parse("bogus command").is_err());
        assert!(parse("announce attributes next-hop 1.2.3.4").is_err());
        assert!(parse("group ;").is_err());
        assert!(parse("routes remove").is_err());
    }
}
