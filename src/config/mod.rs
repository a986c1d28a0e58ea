mod file;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use ipnetwork::IpNetwork;

use crate::message::open::{AddPathDirection, GracefulRestartCap};
use crate::message::{Afi, Capabilities, Family};
use crate::session::socket::TransportOptions;

/// Parse a TOML config file into the resolved in-memory form
pub fn from_file(path: &str) -> io::Result<ServerConfig> {
    let spec = file::ServerConfigSpec::from_file(path)?;
    ServerConfig::from_spec(spec)
}

pub fn from_str(contents: &str) -> io::Result<ServerConfig> {
    let spec = file::ServerConfigSpec::from_str(contents)?;
    ServerConfig::from_spec(spec)
}

/// Which event types one API subscription receives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventMask {
    pub state: bool,
    pub update: bool,
    pub refresh: bool,
    pub notification: bool,
    pub open: bool,
    pub keepalive: bool,
    pub operational: bool,
}

impl Default for EventMask {
    fn default() -> Self {
        Self::all()
    }
}

impl EventMask {
    pub fn all() -> Self {
        Self {
            state: true,
            update: true,
            refresh: true,
            notification: true,
            open: true,
            keepalive: true,
            operational: true,
        }
    }

    pub fn none() -> Self {
        Self {
            state: false,
            update: false,
            refresh: false,
            notification: false,
            open: false,
            keepalive: false,
            operational: false,
        }
    }

    pub fn from_names(names: &[String]) -> io::Result<Self> {
        let mut mask = Self::none();
        for name in names {
            match name.as_str() {
                "*" | "all" => mask = Self::all(),
                "state" | "neighbor-changes" => mask.state = true,
                "update" | "receive-updates" => mask.update = true,
                "refresh" => mask.refresh = true,
                "notification" => mask.notification = true,
                "open" => mask.open = true,
                "keepalive" => mask.keepalive = true,
                "operational" => mask.operational = true,
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Unknown api event: {}", other),
                    ))
                }
            }
        }
        Ok(mask)
    }
}

#[derive(Debug)]
pub struct ServerConfig {
    pub router_id: IpAddr,
    pub default_as: u32,
    pub poll_interval: u16,
    pub api_listen: SocketAddr,
    pub dump_path: Option<String>,
    pub hostname: Option<String>,
    pub peers: Vec<Arc<PeerConfig>>,
}

/// In-memory peer config with server-level defaults resolved
#[derive(Debug)]
pub struct PeerConfig {
    pub remote_ip: IpNetwork,
    pub remote_as: u32,
    pub local_as: u32,
    pub local_router_id: IpAddr,
    pub local_address: Option<IpAddr>,
    pub enabled: bool,
    pub passive: bool,
    pub hold_time: u16,
    pub dest_port: u16,
    pub families: Vec<Family>,
    pub add_path: Vec<(Family, AddPathDirection)>,
    pub nexthop_encoding: Vec<(Family, Afi)>,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    pub extended_message: bool,
    pub graceful_restart: Option<u16>,
    pub group_updates: bool,
    pub adj_rib_in: bool,
    pub adj_rib_out: bool,
    pub manual_eor: bool,
    pub md5_password: Option<String>,
    pub source_interface: Option<String>,
    pub outgoing_ttl: Option<u8>,
    pub incoming_ttl: Option<u8>,
    pub description: Option<String>,
    pub hostname: Option<String>,
    pub api_events: EventMask,
    pub static_routes: Vec<String>,
}

impl PeerConfig {
    pub fn is_ebgp(&self) -> bool {
        self.remote_as != self.local_as
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            md5_password: self.md5_password.clone(),
            source_interface: self.source_interface.clone(),
            outgoing_ttl: self.outgoing_ttl,
            incoming_ttl: self.incoming_ttl,
        }
    }

    /// The capability set this side advertises in its OPEN
    pub fn local_capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::default();
        caps.multiprotocol = self.families.iter().cloned().collect();
        caps.route_refresh = self.route_refresh;
        caps.enhanced_route_refresh = self.enhanced_route_refresh;
        caps.extended_message = self.extended_message;
        caps.asn4 = Some(self.local_as);
        for (family, direction) in &self.add_path {
            caps.add_path.insert(*family, *direction);
        }
        for (family, afi) in &self.nexthop_encoding {
            caps.extended_next_hop.insert(*family, *afi);
        }
        if let Some(restart_time) = self.graceful_restart {
            caps.graceful_restart = Some(GracefulRestartCap {
                restarting: false,
                restart_time,
                families: self.families.iter().map(|f| (*f, true)).collect(),
            });
        }
        caps.hostname = self.hostname.clone();
        caps
    }
}

impl ServerConfig {
    fn from_spec(spec: file::ServerConfigSpec) -> io::Result<Self> {
        let api_listen: SocketAddr = spec.api_listen.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid api_listen address: {}", spec.api_listen),
            )
        })?;

        let mut peers = Vec::with_capacity(spec.peers.len());
        for p in &spec.peers {
            let md5_password = match (&p.md5_password, p.md5_base64) {
                (Some(encoded), true) => {
                    let decoded = base64::decode(encoded).map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("Invalid base64 md5_password for {}", p.remote_ip),
                        )
                    })?;
                    Some(String::from_utf8(decoded).map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("md5_password for {} is not UTF-8", p.remote_ip),
                        )
                    })?)
                }
                (password, _) => password.clone(),
            };

            let mut add_path = Vec::with_capacity(p.add_path.len());
            for ap in &p.add_path {
                let direction = match ap.mode.as_str() {
                    "send" => Some(AddPathDirection::Send),
                    "receive" => Some(AddPathDirection::Receive),
                    "both" | "send/receive" => Some(AddPathDirection::Both),
                    "disable" => None,
                    other => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("Unknown add-path mode: {}", other),
                        ))
                    }
                };
                if let Some(direction) = direction {
                    add_path.push((ap.family, direction));
                }
            }

            let mut nexthop_encoding = Vec::with_capacity(p.nexthop.len());
            for nh in &p.nexthop {
                let afi = match nh.nexthop_afi.as_str() {
                    "ipv4" => Afi::Ipv4,
                    "ipv6" => Afi::Ipv6,
                    other => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("Unknown nexthop afi: {}", other),
                        ))
                    }
                };
                nexthop_encoding.push((nh.family, afi));
            }

            peers.push(Arc::new(PeerConfig {
                remote_ip: p.remote_ip,
                remote_as: p.remote_as,
                local_as: p.local_as.unwrap_or(spec.default_as),
                local_router_id: p.local_router_id.unwrap_or(spec.router_id),
                local_address: p.local_address,
                enabled: p.enabled,
                passive: p.passive,
                hold_time: p.hold_time,
                dest_port: p.dest_port,
                families: p.families.clone(),
                add_path,
                nexthop_encoding,
                route_refresh: p.route_refresh,
                enhanced_route_refresh: p.enhanced_route_refresh,
                extended_message: p.extended_message,
                graceful_restart: p.graceful_restart,
                group_updates: p.group_updates,
                adj_rib_in: p.adj_rib_in,
                adj_rib_out: p.adj_rib_out,
                manual_eor: p.manual_eor,
                md5_password,
                source_interface: p.source_interface.clone(),
                outgoing_ttl: p.outgoing_ttl,
                incoming_ttl: p.incoming_ttl,
                description: p.description.clone(),
                hostname: spec.hostname.clone(),
                api_events: EventMask::from_names(&p.api_events)?,
                static_routes: p.routes.clone(),
            }));
        }

        Ok(Self {
            router_id: spec.router_id,
            default_as: spec.default_as,
            poll_interval: spec.poll_interval,
            api_listen,
            dump_path: spec.dump_path,
            hostname: spec.hostname,
            peers,
        })
    }
}

impl FromStr for EventMask {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let names: Vec<String> = value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        EventMask::from_names(&names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        router_id = "1.1.1.1"
        default_as = 65000

        [[peers]]
        remote_ip = "127.0.0.2"
        remote_as = 65001
        md5_password = "c2VjcmV0"
        md5_base64 = true

        [[peers.add_path]]
        family = "ipv4 unicast"
        mode = "send"
    "#;

    #[test]
    fn test_resolution_and_md5_decode() {
        let config = from_str(MINIMAL).unwrap();
        assert_eq!(config.peers.len(), 1);
        let peer = &config.peers[0];
        assert_eq!(peer.local_as, 65000);
        assert!(peer.is_ebgp());
        assert_eq!(peer.local_router_id, config.router_id);
        assert_eq!(peer.md5_password.as_deref(), Some("secret"));
        assert_eq!(
            peer.add_path,
            vec![(Family::IPV4_UNICAST, AddPathDirection::Send)]
        );
    }

    #[test]
    fn test_local_capabilities() {
        let config = from_str(MINIMAL).unwrap();
        let caps = config.peers[0].local_capabilities();
        assert_eq!(caps.asn4, Some(65000));
        assert!(caps.multiprotocol.contains(&Family::IPV4_UNICAST));
        assert_eq!(
            caps.add_path.get(&Family::IPV4_UNICAST),
            Some(&AddPathDirection::Send)
        );
        assert!(caps.graceful_restart.is_none());
    }

    #[test]
    fn test_event_mask() {
        let mask: EventMask = "update, state".parse().unwrap();
        assert!(mask.update && mask.state);
        assert!(!mask.keepalive);
        let all: EventMask = "*".parse().unwrap();
        assert_eq!(all, EventMask::all());
        assert!("bogus".parse::<EventMask>().is_err());
    }

    #[test]
    fn test_bad_base64_is_config_error() {
        let result = from_str(
            r#"
            router_id = "1.1.1.1"
            default_as = 65000

            [[peers]]
            remote_ip = "127.0.0.2"
            remote_as = 65001
            md5_password = "not base64!!"
            md5_base64 = true
            "#,
        );
        assert!(result.is_err());
    }
}
