use std::cmp;
use std::collections::HashMap;

use super::family::Family;
use super::open::Capabilities;

pub const BGP_MAX_MSG_SIZE: u16 = 4096;
pub const BGP_EXTENDED_MSG_SIZE: u16 = 65535;

/// The per-family encoding parameters handed to every pack call. Derived
/// from `Negotiated`, never from globals.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct OpenContext {
    pub family: Family,
    pub addpath_send: bool,
    pub addpath_receive: bool,
    pub asn4: bool,
    pub msg_size: u16,
    pub local_as: u32,
    pub peer_as: u32,
}

impl OpenContext {
    pub fn is_ibgp(&self) -> bool {
        self.local_as == self.peer_as
    }

    #[cfg(test)]
    pub fn test_default(family: Family) -> Self {
        Self {
            family,
            addpath_send: false,
            addpath_receive: false,
            asn4: true,
            msg_size: BGP_MAX_MSG_SIZE,
            local_as: 65000,
            peer_as: 65001,
        }
    }

    #[cfg(test)]
    pub fn test_add_path(family: Family) -> Self {
        Self {
            addpath_send: true,
            addpath_receive: true,
            ..Self::test_default(family)
        }
    }
}

/// Graceful restart values in effect for a session (RFC 4724)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GracefulRestart {
    pub restart_time: u16,
    pub peer_restarting: bool,
    /// Families both sides listed; routes for these stay stale-marked
    /// instead of flushed when the session drops
    pub preserved: Vec<Family>,
}

/// Everything computed at OPENCONFIRM that codecs and timers key off
#[derive(Clone, Debug, PartialEq)]
pub struct Negotiated {
    pub local_as: u32,
    pub peer_as: u32,
    pub asn4: bool,
    pub hold_time: u16,
    pub keepalive: u16,
    pub msg_size: u16,
    pub families: Vec<Family>,
    /// family -> (send, receive), from the local point of view
    pub add_path: HashMap<Family, (bool, bool)>,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub graceful_restart: Option<GracefulRestart>,
}

impl Default for Negotiated {
    /// Pre-OPEN baseline: plain BGP-4, IPv4 unicast, nothing negotiated
    fn default() -> Self {
        Self {
            local_as: 0,
            peer_as: 0,
            asn4: false,
            hold_time: 180,
            keepalive: 60,
            msg_size: BGP_MAX_MSG_SIZE,
            families: vec![Family::IPV4_UNICAST],
            add_path: HashMap::new(),
            route_refresh: false,
            enhanced_route_refresh: false,
            graceful_restart: None,
        }
    }
}

impl Negotiated {
    /// Intersect both OPENs. ADD-PATH direction inverts across the wire:
    /// we can send on a family iff we offered send and the peer offered
    /// receive.
    pub fn negotiate(
        local: &Capabilities,
        peer: &Capabilities,
        local_as: u32,
        peer_as: u32,
        local_hold: u16,
        peer_hold: u16,
    ) -> Self {
        let hold_time = cmp::min(local_hold, peer_hold);
        let mut families: Vec<Family> = local
            .multiprotocol
            .intersection(&peer.multiprotocol)
            .cloned()
            .collect();
        families.sort();

        let mut add_path = HashMap::new();
        for (family, local_dir) in &local.add_path {
            if let Some(peer_dir) = peer.add_path.get(family) {
                let send = local_dir.sends() && peer_dir.receives();
                let receive = local_dir.receives() && peer_dir.sends();
                if send || receive {
                    add_path.insert(*family, (send, receive));
                }
            }
        }

        let graceful_restart = match (&local.graceful_restart, &peer.graceful_restart) {
            (Some(local_gr), Some(peer_gr)) => {
                let local_families: Vec<Family> =
                    local_gr.families.iter().map(|(f, _)| *f).collect();
                let preserved = peer_gr
                    .families
                    .iter()
                    .filter(|(f, _)| local_families.contains(f))
                    .map(|(f, _)| *f)
                    .collect();
                Some(GracefulRestart {
                    restart_time: peer_gr.restart_time,
                    peer_restarting: peer_gr.restarting,
                    preserved,
                })
            }
            _ => None,
        };

        Self {
            local_as,
            peer_as,
            asn4: local.asn4.is_some() && peer.asn4.is_some(),
            hold_time,
            keepalive: hold_time / 3,
            msg_size: if local.extended_message && peer.extended_message {
                BGP_EXTENDED_MSG_SIZE
            } else {
                BGP_MAX_MSG_SIZE
            },
            families,
            add_path,
            route_refresh: local.route_refresh && peer.route_refresh,
            enhanced_route_refresh: local.enhanced_route_refresh && peer.enhanced_route_refresh,
            graceful_restart,
        }
    }

    pub fn addpath_send(&self, family: Family) -> bool {
        self.add_path.get(&family).map_or(false, |(send, _)| *send)
    }

    pub fn addpath_receive(&self, family: Family) -> bool {
        self.add_path
            .get(&family)
            .map_or(false, |(_, receive)| *receive)
    }

    pub fn is_ibgp(&self) -> bool {
        self.local_as == self.peer_as
    }

    pub fn context(&self, family: Family) -> OpenContext {
        let (addpath_send, addpath_receive) =
            self.add_path.get(&family).copied().unwrap_or((false, false));
        OpenContext {
            family,
            addpath_send,
            addpath_receive,
            asn4: self.asn4,
            msg_size: self.msg_size,
            local_as: self.local_as,
            peer_as: self.peer_as,
        }
    }

    #[cfg(test)]
    pub fn test_session() -> Self {
        Self {
            local_as: 65000,
            peer_as: 65001,
            asn4: true,
            families: vec![
                Family::IPV4_UNICAST,
                Family::IPV6_UNICAST,
                Family::IPV4_MPLS_VPN,
            ],
            route_refresh: true,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn test_session_add_path(family: Family) -> Self {
        let mut negotiated = Self::test_session();
        negotiated.add_path.insert(family, (true, true));
        negotiated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::open::{AddPathDirection, GracefulRestartCap};

    fn capabilities(add_path: AddPathDirection) -> Capabilities {
        let mut caps = Capabilities::default();
        caps.multiprotocol.insert(Family::IPV4_UNICAST);
        caps.multiprotocol.insert(Family::IPV6_UNICAST);
        caps.route_refresh = true;
        caps.asn4 = Some(65000);
        caps.add_path.insert(Family::IPV4_UNICAST, add_path);
        caps
    }

    #[test]
    fn test_addpath_direction_inverts() {
        let local = capabilities(AddPathDirection::Send);
        let peer = capabilities(AddPathDirection::Receive);
        let negotiated = Negotiated::negotiate(&local, &peer, 65000, 65001, 180, 90);
        assert!(negotiated.addpath_send(Family::IPV4_UNICAST));
        assert!(!negotiated.addpath_receive(Family::IPV4_UNICAST));
        assert!(!negotiated.addpath_send(Family::IPV6_UNICAST));
    }

    #[test]
    fn test_hold_time_minimum() {
        let local = capabilities(AddPathDirection::Both);
        let peer = capabilities(AddPathDirection::Both);
        let negotiated = Negotiated::negotiate(&local, &peer, 65000, 65001, 180, 90);
        assert_eq!(negotiated.hold_time, 90);
        assert_eq!(negotiated.keepalive, 30);
        assert_eq!(negotiated.msg_size, BGP_MAX_MSG_SIZE);
    }

    #[test]
    fn test_extended_message_size() {
        let mut local = capabilities(AddPathDirection::Both);
        let mut peer = capabilities(AddPathDirection::Both);
        local.extended_message = true;
        peer.extended_message = true;
        let negotiated = Negotiated::negotiate(&local, &peer, 65000, 65001, 180, 180);
        assert_eq!(negotiated.msg_size, BGP_EXTENDED_MSG_SIZE);
    }

    #[test]
    fn test_asn4_requires_both() {
        let local = capabilities(AddPathDirection::Both);
        let mut peer = capabilities(AddPathDirection::Both);
        peer.asn4 = None;
        let negotiated = Negotiated::negotiate(&local, &peer, 65000, 65001, 180, 180);
        assert!(!negotiated.asn4);
    }

    #[test]
    fn test_graceful_restart_intersection() {
        let mut local = capabilities(AddPathDirection::Both);
        let mut peer = capabilities(AddPathDirection::Both);
        local.graceful_restart = Some(GracefulRestartCap {
            restarting: false,
            restart_time: 120,
            families: vec![(Family::IPV4_UNICAST, true), (Family::IPV6_UNICAST, true)],
        });
        peer.graceful_restart = Some(GracefulRestartCap {
            restarting: true,
            restart_time: 90,
            families: vec![(Family::IPV4_UNICAST, true)],
        });
        let negotiated = Negotiated::negotiate(&local, &peer, 65000, 65001, 180, 180);
        let gr = negotiated.graceful_restart.unwrap();
        assert_eq!(gr.restart_time, 90);
        assert!(gr.peer_restarting);
        assert_eq!(gr.preserved, vec![Family::IPV4_UNICAST]);
    }

    #[test]
    fn test_context_reflects_family() {
        let negotiated = Negotiated::test_session_add_path(Family::IPV4_UNICAST);
        let ctx = negotiated.context(Family::IPV4_UNICAST);
        assert!(ctx.addpath_send && ctx.addpath_receive);
        assert!(!ctx.is_ibgp());
        let ctx6 = negotiated.context(Family::IPV6_UNICAST);
        assert!(!ctx6.addpath_send);
    }
}
