use std::fs::File;
use std::io::{self, Read};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::message::Family;

struct Defaults {}

impl Defaults {
    fn enabled() -> bool {
        true
    }

    fn passive() -> bool {
        false
    }

    fn poll_interval() -> u16 {
        30
    }

    fn hold_time() -> u16 {
        180
    }

    fn dest_port() -> u16 {
        179
    }

    fn families() -> Vec<Family> {
        vec![Family::IPV4_UNICAST, Family::IPV6_UNICAST]
    }

    fn route_refresh() -> bool {
        true
    }

    fn group_updates() -> bool {
        true
    }

    fn rib() -> bool {
        true
    }

    fn api_events() -> Vec<String> {
        vec!["*".to_string()]
    }

    fn api_listen() -> String {
        "127.0.0.1:1790".to_string()
    }
}

/// Per-family ADD-PATH declaration
#[derive(Clone, Debug, Deserialize)]
pub(super) struct AddPathSpec {
    pub(super) family: Family,
    /// send | receive | both | disable
    pub(super) mode: String,
}

/// `nexthop <afi> <safi> <nh-afi>` declaration (RFC 8950)
#[derive(Clone, Debug, Deserialize)]
pub(super) struct NexthopEncodingSpec {
    pub(super) family: Family,
    pub(super) nexthop_afi: String,
}

/// Config (toml) representation of a peer
#[derive(Clone, Debug, Deserialize)]
pub(super) struct PeerConfigSpec {
    pub(super) remote_ip: IpNetwork,
    pub(super) remote_as: u32,
    pub(super) local_as: Option<u32>,
    pub(super) local_router_id: Option<IpAddr>,
    pub(super) local_address: Option<IpAddr>,

    #[serde(default = "Defaults::enabled")]
    pub(super) enabled: bool,

    // Only accept incoming connections; never dial out
    #[serde(default = "Defaults::passive")]
    pub(super) passive: bool,

    #[serde(default = "Defaults::hold_time")]
    pub(super) hold_time: u16,

    #[serde(default = "Defaults::dest_port")]
    pub(super) dest_port: u16,

    #[serde(default = "Defaults::families")]
    pub(super) families: Vec<Family>,

    #[serde(default = "Vec::new")]
    pub(super) add_path: Vec<AddPathSpec>,

    #[serde(default = "Vec::new")]
    pub(super) nexthop: Vec<NexthopEncodingSpec>,

    #[serde(default = "Defaults::route_refresh")]
    pub(super) route_refresh: bool,

    #[serde(default)]
    pub(super) enhanced_route_refresh: bool,

    #[serde(default)]
    pub(super) extended_message: bool,

    // Restart time in seconds; absent disables the capability
    pub(super) graceful_restart: Option<u16>,

    #[serde(default = "Defaults::group_updates")]
    pub(super) group_updates: bool,

    #[serde(default = "Defaults::rib")]
    pub(super) adj_rib_in: bool,

    #[serde(default = "Defaults::rib")]
    pub(super) adj_rib_out: bool,

    #[serde(default)]
    pub(super) manual_eor: bool,

    pub(super) md5_password: Option<String>,

    // When set, md5_password is base64 of the real key
    #[serde(default)]
    pub(super) md5_base64: bool,

    pub(super) source_interface: Option<String>,
    pub(super) outgoing_ttl: Option<u8>,
    pub(super) incoming_ttl: Option<u8>,
    pub(super) description: Option<String>,

    #[serde(default = "Defaults::api_events")]
    pub(super) api_events: Vec<String>,

    // Initial routes in the command route-spec grammar
    #[serde(default = "Vec::new")]
    pub(super) routes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerConfigSpec {
    pub(super) router_id: IpAddr,
    pub(super) default_as: u32,

    #[serde(default = "Defaults::poll_interval")]
    pub(super) poll_interval: u16,

    #[serde(default = "Defaults::api_listen")]
    pub(super) api_listen: String,

    pub(super) dump_path: Option<String>,
    pub(super) hostname: Option<String>,

    #[serde(default = "Vec::new")]
    pub(super) peers: Vec<PeerConfigSpec>,
}

impl ServerConfigSpec {
    pub(super) fn from_file(path: &str) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        toml::from_str(&contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
    }

    pub(super) fn from_str(contents: &str) -> io::Result<Self> {
        toml::from_str(contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let spec = ServerConfigSpec::from_str(
            r#"
            router_id = "1.1.1.1"
            default_as = 65000

            [[peers]]
            remote_ip = "127.0.0.2"
            remote_as = 65000
            "#,
        )
        .unwrap();
        assert_eq!(spec.peers.len(), 1);
        let peer = &spec.peers[0];
        assert!(peer.enabled);
        assert_eq!(peer.hold_time, 180);
        assert_eq!(peer.dest_port, 179);
        assert_eq!(peer.families.len(), 2);
        assert!(peer.route_refresh);
    }

    #[test]
    fn test_full_peer_options() {
        let spec = ServerConfigSpec::from_str(
            r#"
            router_id = "1.1.1.1"
            default_as = 65000
            api_listen = "127.0.0.1:1790"

            [[peers]]
            remote_ip = "192.0.2.0/24"
            remote_as = 65001
            local_as = 65000
            local_address = "192.0.2.1"
            passive = true
            hold_time = 90
            families = ["ipv4 unicast", "ipv4 mpls-vpn", "ipv6 unicast"]
            md5_password = "c2VjcmV0"
            md5_base64 = true
            source_interface = "eth0"
            outgoing_ttl = 255
            incoming_ttl = 1
            graceful_restart = 120
            manual_eor = true
            api_events = ["update", "state"]
            routes = ["route 10.0.0.0/24 next-hop 192.0.2.1"]

            [[peers.add_path]]
            family = "ipv4 unicast"
            mode = "both"

            [[peers.nexthop]]
            family = "ipv4 unicast"
            nexthop_afi = "ipv6"
            "#,
        )
        .unwrap();
        let peer = &spec.peers[0];
        assert!(peer.passive);
        assert_eq!(peer.add_path.len(), 1);
        assert_eq!(peer.add_path[0].mode, "both");
        assert_eq!(peer.nexthop.len(), 1);
        assert_eq!(peer.graceful_restart, Some(120));
        assert_eq!(peer.routes.len(), 1);
    }

    #[test]
    fn test_bad_family_rejected() {
        let result = ServerConfigSpec::from_str(
            r#"
            router_id = "1.1.1.1"
            default_as = 65000

            [[peers]]
            remote_ip = "127.0.0.2"
            remote_as = 65000
            families = ["ipv9 unicast"]
            "#,
        );
        assert!(result.is_err());
    }
}
