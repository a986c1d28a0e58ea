use std::net::IpAddr;
use std::sync::Arc;

use crate::message::attributes::{codes, MpReach, MpUnreach, Origin, PathAttribute};
use crate::message::{Attributes, Family, Negotiated, Nlri, Update};
use crate::message::{HEADER_LEN, Safi};

use super::route::Route;

/// Withdrawn-routes-length + total-path-attribute-length fields
const UPDATE_FIXED_OVERHEAD: usize = 4;

/// Legacy placement applies only to plain IPv4 unicast toward an IPv4
/// next-hop, and only when ADD-PATH send wasn't negotiated for the family
fn use_legacy(family: Family, negotiated: &Negotiated, next_hop: IpAddr) -> bool {
    family == Family::IPV4_UNICAST && !negotiated.addpath_send(family) && next_hop.is_ipv4()
}

/// MP_REACH next-hop bytes: VPN families prepend an all-zero RD
fn mp_next_hop(family: Family, next_hop: IpAddr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(24);
    if matches!(family.safi, Safi::MplsVpn | Safi::FlowVpn) {
        buf.extend_from_slice(&[0u8; 8]);
    }
    match family.safi {
        // FlowSpec rules carry no next-hop unless redirection needs one
        Safi::Flow => return vec![],
        _ => (),
    }
    match next_hop {
        IpAddr::V4(ip) => buf.extend_from_slice(&ip.octets()),
        IpAddr::V6(ip) => buf.extend_from_slice(&ip.octets()),
    }
    buf
}

fn encoded_len(attributes: &Attributes, negotiated: &Negotiated) -> usize {
    let mut buf = Vec::with_capacity(64);
    attributes.encode(negotiated, &mut buf);
    buf.len()
}

/// Split routes into the minimum number of UPDATE bodies that fit the
/// negotiated message size. Routes sharing this attribute group but
/// pointing at different next-hops cannot share a message.
pub fn announce_updates(
    family: Family,
    attributes: &Attributes,
    routes: &[Arc<Route>],
    negotiated: &Negotiated,
    local_addr: IpAddr,
    grouped: bool,
) -> Vec<Update> {
    let ctx = negotiated.context(family);
    let mut updates = Vec::with_capacity(1);

    // Partition by resolved next-hop, preserving insertion order
    let mut by_next_hop: Vec<(IpAddr, Vec<&Arc<Route>>)> = Vec::with_capacity(1);
    for route in routes {
        let next_hop = route.nexthop.resolve(local_addr);
        match by_next_hop.iter_mut().find(|(nh, _)| *nh == next_hop) {
            Some((_, group)) => group.push(route),
            None => by_next_hop.push((next_hop, vec![route])),
        }
    }

    for (next_hop, group) in by_next_hop {
        let legacy = use_legacy(family, negotiated, next_hop);
        let mut base = attributes.clone();
        base.remove(codes::MP_REACH_NLRI);
        base.remove(codes::MP_UNREACH_NLRI);
        // Well-known mandatory attributes, and local-AS prepend toward eBGP
        if base.origin().is_none() {
            base.insert(PathAttribute::Origin(Origin::Igp));
        }
        let as_path = base.as_path().cloned().unwrap_or_default();
        if ctx.is_ibgp() {
            base.insert(PathAttribute::AsPath(as_path));
            if !base.contains(codes::LOCAL_PREF) {
                base.insert(PathAttribute::LocalPref(100));
            }
        } else {
            base.insert(PathAttribute::AsPath(as_path.prepended(ctx.local_as)));
        }
        let mp_nh = mp_next_hop(family, next_hop);
        let per_message_overhead = if legacy {
            base.insert(PathAttribute::NextHop(next_hop));
            0
        } else {
            base.remove(codes::NEXT_HOP);
            // MP_REACH header: flags+code+ext-len, afi+safi+nh-len+reserved
            4 + 5 + mp_nh.len()
        };
        let base_len = encoded_len(&base, negotiated);
        let budget = usize::from(negotiated.msg_size)
            .saturating_sub(HEADER_LEN + UPDATE_FIXED_OVERHEAD + base_len + per_message_overhead);

        let mut chunk: Vec<Nlri> = Vec::with_capacity(group.len());
        let mut chunk_len = 0usize;
        let mut flush = |chunk: &mut Vec<Nlri>, updates: &mut Vec<Update>| {
            if chunk.is_empty() {
                return;
            }
            let nlris = std::mem::take(chunk);
            let update = if legacy {
                Update::new(vec![], base.clone(), nlris)
            } else {
                let attrs = base.clone().with(PathAttribute::MpReach(MpReach {
                    family,
                    next_hop: mp_nh.clone(),
                    nlris,
                }));
                Update::new(vec![], attrs, vec![])
            };
            updates.push(update);
        };

        for route in group {
            let nlri_len = route.nlri.packed_len(&ctx);
            if !chunk.is_empty() && (!grouped || chunk_len + nlri_len > budget) {
                flush(&mut chunk, &mut updates);
                chunk_len = 0;
            }
            chunk.push((*route.nlri).clone());
            chunk_len += nlri_len;
        }
        flush(&mut chunk, &mut updates);
    }
    updates
}

/// Withdraws never share attributes; IPv4 unicast uses the legacy withdrawn
/// section unless ADD-PATH send was negotiated for it
pub fn withdraw_updates(
    family: Family,
    nlris: &[Arc<Nlri>],
    negotiated: &Negotiated,
) -> Vec<Update> {
    let ctx = negotiated.context(family);
    let legacy = family == Family::IPV4_UNICAST && !negotiated.addpath_send(family);
    let overhead = HEADER_LEN + UPDATE_FIXED_OVERHEAD + if legacy { 0 } else { 4 + 3 };
    let budget = usize::from(negotiated.msg_size).saturating_sub(overhead);

    let mut updates = Vec::with_capacity(1);
    let mut chunk: Vec<Nlri> = Vec::with_capacity(nlris.len());
    let mut chunk_len = 0usize;
    let mut flush = |chunk: &mut Vec<Nlri>, updates: &mut Vec<Update>| {
        if chunk.is_empty() {
            return;
        }
        let nlris = std::mem::take(chunk);
        let update = if legacy {
            Update::new(nlris, Attributes::new(), vec![])
        } else {
            let attrs =
                Attributes::new().with(PathAttribute::MpUnreach(MpUnreach { family, nlris }));
            Update::new(vec![], attrs, vec![])
        };
        updates.push(update);
    };

    for nlri in nlris {
        let nlri_len = nlri.packed_len(&ctx);
        if !chunk.is_empty() && chunk_len + nlri_len > budget {
            flush(&mut chunk, &mut updates);
            chunk_len = 0;
        }
        chunk.push((**nlri).clone());
        chunk_len += nlri_len;
    }
    flush(&mut chunk, &mut updates);
    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::attributes::{AsPath, Origin};
    use crate::message::nlri::PrefixNlri;
    use crate::rib::NextHop;

    fn local() -> IpAddr {
        "192.0.2.1".parse().unwrap()
    }

    fn attrs() -> Attributes {
        Attributes::new()
            .with(PathAttribute::Origin(Origin::Igp))
            .with(PathAttribute::AsPath(AsPath::sequence(vec![65000])))
    }

    fn v4_route(third_octet: u8, fourth: u8, next_hop: &str) -> Arc<Route> {
        let prefix = format!("10.{}.{}.0/24", third_octet, fourth);
        Arc::new(Route::new(
            Nlri::Unicast(PrefixNlri::new(prefix.parse().unwrap(), None)),
            attrs(),
            next_hop.parse::<IpAddr>().map(NextHop::Address).unwrap(),
        ))
    }

    #[test]
    fn test_single_announce_is_legacy() {
        let negotiated = Negotiated::test_session();
        let updates = announce_updates(
            Family::IPV4_UNICAST,
            &attrs(),
            &[v4_route(0, 0, "1.2.3.4")],
            &negotiated,
            local(),
            true,
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].announced.len(), 1);
        assert!(updates[0].attributes.contains(codes::NEXT_HOP));
        assert!(!updates[0].attributes.contains(codes::MP_REACH_NLRI));
    }

    #[test]
    fn test_addpath_forces_mp_placement() {
        let negotiated = Negotiated::test_session_add_path(Family::IPV4_UNICAST);
        let updates = announce_updates(
            Family::IPV4_UNICAST,
            &attrs(),
            &[v4_route(0, 0, "1.2.3.4")],
            &negotiated,
            local(),
            true,
        );
        assert_eq!(updates.len(), 1);
        assert!(updates[0].announced.is_empty());
        assert!(updates[0].attributes.contains(codes::MP_REACH_NLRI));
    }

    #[test]
    fn test_next_hop_splits_messages() {
        let negotiated = Negotiated::test_session();
        let routes = vec![
            v4_route(0, 0, "1.2.3.4"),
            v4_route(0, 1, "1.2.3.5"),
            v4_route(0, 2, "1.2.3.4"),
        ];
        let updates = announce_updates(
            Family::IPV4_UNICAST,
            &attrs(),
            &routes,
            &negotiated,
            local(),
            true,
        );
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].announced.len(), 2);
        assert_eq!(updates[1].announced.len(), 1);
    }

    #[test]
    fn test_grouping_respects_message_size() {
        let negotiated = Negotiated::test_session();
        // 1500 /24 prefixes at 4 bytes each: two full messages needed
        let routes: Vec<Arc<Route>> = (0..1500)
            .map(|i| v4_route((i / 256) as u8, (i % 256) as u8, "1.2.3.4"))
            .collect();
        let updates = announce_updates(
            Family::IPV4_UNICAST,
            &attrs(),
            &routes,
            &negotiated,
            local(),
            true,
        );
        assert_eq!(updates.len(), 2);
        let total: usize = updates.iter().map(|u| u.announced.len()).sum();
        assert_eq!(total, 1500);
        for update in &updates {
            let mut buf = Vec::new();
            update.encode(&negotiated, &mut buf);
            assert!(HEADER_LEN + buf.len() <= usize::from(negotiated.msg_size));
        }
    }

    #[test]
    fn test_ungrouped_one_route_per_update() {
        let negotiated = Negotiated::test_session();
        let routes = vec![v4_route(0, 0, "1.2.3.4"), v4_route(0, 1, "1.2.3.4")];
        let updates = announce_updates(
            Family::IPV4_UNICAST,
            &attrs(),
            &routes,
            &negotiated,
            local(),
            false,
        );
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn test_nexthop_self_resolution() {
        let negotiated = Negotiated::test_session();
        let route = Arc::new(Route::new(
            Nlri::Unicast(PrefixNlri::new("10.0.0.0/24".parse().unwrap(), None)),
            attrs(),
            NextHop::SelfAddress,
        ));
        let updates = announce_updates(
            Family::IPV4_UNICAST,
            &attrs(),
            &[route],
            &negotiated,
            local(),
            true,
        );
        assert_eq!(updates[0].attributes.next_hop(), Some(local()));
    }

    #[test]
    fn test_legacy_withdraws() {
        let negotiated = Negotiated::test_session();
        let nlris = vec![Arc::new(Nlri::Unicast(PrefixNlri::new(
            "10.0.0.0/24".parse().unwrap(),
            None,
        )))];
        let updates = withdraw_updates(Family::IPV4_UNICAST, &nlris, &negotiated);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].withdrawn.len(), 1);
        assert!(updates[0].attributes.is_empty());
    }

    #[test]
    fn test_mp_withdraws_for_ipv6() {
        let negotiated = Negotiated::test_session();
        let nlris = vec![Arc::new(Nlri::Unicast(PrefixNlri::new(
            "2001:db8::/32".parse().unwrap(),
            None,
        )))];
        let updates = withdraw_updates(Family::IPV6_UNICAST, &nlris, &negotiated);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].withdrawn.is_empty());
        assert!(updates[0].attributes.contains(codes::MP_UNREACH_NLRI));
    }
}
