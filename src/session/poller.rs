use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use ipnetwork::IpNetwork;
use log::{debug, trace, warn};
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};
use tokio_util::time::DelayQueue;

use super::socket::{apply_peer_options, outbound_socket};
use crate::config::PeerConfig;

const TCP_INIT_TIMEOUT_MS: u64 = 1000;
const MAX_BACKOFF_SHIFT: u32 = 5;

pub type PollerTx = mpsc::UnboundedSender<Arc<PeerConfig>>;
pub type PollerRx = mpsc::UnboundedReceiver<Arc<PeerConfig>>;

/// A configured peer with no active session
#[derive(Debug)]
pub struct IdlePeer {
    config: Arc<PeerConfig>,
    failures: u32,
}

impl IdlePeer {
    pub fn new(config: Arc<PeerConfig>) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    pub fn get_config(&self) -> Arc<PeerConfig> {
        Arc::clone(&self.config)
    }

    /// Exponential backoff with jitter so repeated failures don't
    /// synchronise reconnect storms
    fn next_delay(&self, interval: Duration) -> Duration {
        let shift = self.failures.min(MAX_BACKOFF_SHIFT);
        let base = interval * 2u32.pow(shift);
        let jitter_ms = rand::thread_rng().gen_range(0..=interval.as_millis().max(1) / 2);
        base + Duration::from_millis(jitter_ms as u64)
    }

    async fn connect(
        &self,
        default_source: IpAddr,
    ) -> Result<(TcpStream, Arc<PeerConfig>), io::Error> {
        let remote_ip = get_host_address(&self.config.remote_ip).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot dial a peer configured as a network range",
            )
        })?;
        let peer_addr = SocketAddr::new(remote_ip, self.config.dest_port);
        let source_ip = self.config.local_address.unwrap_or(default_source);
        let source = SocketAddr::new(source_ip, 0);
        let socket = outbound_socket(peer_addr, source, &self.config.transport_options())?;
        let stream = timeout(
            Duration::from_millis(TCP_INIT_TIMEOUT_MS),
            socket.connect(peer_addr),
        )
        .await??;
        Ok((stream, Arc::clone(&self.config)))
    }
}

impl fmt::Display for IdlePeer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<IdlePeer {} failures={}>",
            self.config.remote_ip, self.failures
        )
    }
}

/// Watches idle peers: accepts inbound connections, dials outbound on a
/// backoff schedule, and takes rescheduled peers back from the manager
pub struct Poller {
    idle_peers: HashMap<IpNetwork, IdlePeer>,
    tcp_listener: TcpListener,
    rx: PollerRx,
    interval: Duration,
    delay_queue: DelayQueue<IpAddr>,
}

impl Poller {
    pub fn new(listener: TcpListener, interval_secs: u32, rx: PollerRx) -> Self {
        let mut delay_queue = DelayQueue::with_capacity(4);
        // Keep the queue populated so polling it never starves the select
        delay_queue.insert_at(
            IpAddr::from(Ipv4Addr::new(0, 0, 0, 0)),
            Instant::now() + Duration::from_secs(31_536_000),
        );
        Self {
            idle_peers: HashMap::new(),
            tcp_listener: listener,
            rx,
            interval: Duration::from_secs(interval_secs.into()),
            delay_queue,
        }
    }

    pub fn upsert_config(&mut self, config: Arc<PeerConfig>) {
        let network = config.remote_ip;
        // Inbound MD5 has to be armed on the listening socket per peer
        if config.md5_password.is_some() {
            if let Some(remote_ip) = get_host_address(&network) {
                if let Err(err) = apply_peer_options(
                    &self.tcp_listener,
                    remote_ip,
                    &config.transport_options(),
                ) {
                    warn!("Couldn't arm listener options for {}: {}", remote_ip, err);
                }
            }
        }
        if self
            .idle_peers
            .insert(network, IdlePeer::new(config))
            .is_some()
        {
            debug!("Peer config for {} updated", network);
        } else if let Some(remote_ip) = get_host_address(&network) {
            self.delay_queue.insert(remote_ip, self.interval);
        }
    }

    pub async fn get_connection(
        &mut self,
    ) -> Result<Option<(TcpStream, Arc<PeerConfig>)>, io::Error> {
        let local_outbound_addr = self.tcp_listener.local_addr()?;

        enum Wake {
            Incoming(TcpStream, SocketAddr),
            Dial(IpAddr),
            Rescheduled(Arc<PeerConfig>),
            Tick,
        }
        // Wait for exactly one wake reason, then release the borrows so
        // the handling code below owns the poller again
        let wake = {
            let tcp_listener = &self.tcp_listener;
            let delay_queue = &mut self.delay_queue;
            let rx = &mut self.rx;
            tokio::select! {
                incoming = timeout(
                    Duration::from_millis(TCP_INIT_TIMEOUT_MS),
                    tcp_listener.accept(),
                ) => match incoming {
                    Ok(Ok((stream, socket))) => Wake::Incoming(stream, socket),
                    _ => Wake::Tick,
                },
                expired = futures::future::poll_fn(|cx| delay_queue.poll_expired(cx)) => {
                    match expired {
                        Some(expired) => Wake::Dial(expired.into_inner()),
                        None => Wake::Tick,
                    }
                },
                peer = rx.recv() => match peer {
                    Some(config) => Wake::Rescheduled(config),
                    None => Wake::Tick,
                },
            }
        };

        match wake {
            Wake::Incoming(stream, socket) => {
                if let Some(config) = get_config_for_peer(&self.idle_peers, socket.ip()) {
                    if config.enabled {
                        let peer = self
                            .idle_peers
                            .remove(&config.remote_ip)
                            .expect("idle peer exists");
                        debug!("Incoming new connection from {}", socket.ip());
                        return Ok(Some((stream, peer.get_config())));
                    }
                } else {
                    warn!(
                        "Unexpected connection from {}: Not a configured peer",
                        socket.ip(),
                    );
                }
                Ok(None)
            }
            Wake::Dial(addr) => {
                trace!("Poller outbound triggered for {}", addr);
                // The peer may be gone if an inbound connection won the race
                if let Some(config) = get_config_for_peer(&self.idle_peers, addr) {
                    if config.enabled && !config.passive {
                        let network = config.remote_ip;
                        let peer = self.idle_peers.get(&network).expect("idle peer exists");
                        match peer.connect(local_outbound_addr.ip()).await {
                            Ok(connection) => {
                                self.idle_peers.remove(&network);
                                return Ok(Some(connection));
                            }
                            Err(err) => {
                                warn!("Error polling {}: {}", addr, err);
                                let peer = self
                                    .idle_peers
                                    .get_mut(&network)
                                    .expect("idle peer exists");
                                peer.failures += 1;
                                let delay = peer.next_delay(self.interval);
                                self.delay_queue.insert(addr, delay);
                            }
                        }
                    }
                }
                Ok(None)
            }
            Wake::Rescheduled(config) => {
                let network = config.remote_ip;
                self.upsert_config(config);
                // Already-known peers don't get re-queued by upsert
                if self.idle_peers.contains_key(&network) {
                    if let Some(addr) = get_host_address(&network) {
                        self.delay_queue.insert(addr, self.interval);
                    }
                }
                Ok(None)
            }
            Wake::Tick => Ok(None),
        }
    }
}

impl fmt::Display for Poller {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Poller peers={}>", self.idle_peers.len())
    }
}

/// A /32 (or /128) peer network is a dialable host; wider ranges are
/// listen-only
pub fn get_host_address(network: &IpNetwork) -> Option<IpAddr> {
    match network {
        IpNetwork::V4(network) if network.prefix() == 32 => Some(IpAddr::V4(network.ip())),
        IpNetwork::V6(network) if network.prefix() == 128 => Some(IpAddr::V6(network.ip())),
        _ => None,
    }
}

fn get_config_for_peer(
    idle_peers: &HashMap<IpNetwork, IdlePeer>,
    peer: IpAddr,
) -> Option<Arc<PeerConfig>> {
    idle_peers
        .keys()
        .find(|network| network.contains(peer))
        .and_then(|network| idle_peers.get(network))
        .map(|idle| idle.get_config())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_address() {
        let host: IpNetwork = "192.0.2.1/32".parse().unwrap();
        assert_eq!(get_host_address(&host), Some("192.0.2.1".parse().unwrap()));
        let range: IpNetwork = "192.0.2.0/24".parse().unwrap();
        assert_eq!(get_host_address(&range), None);
        let host6: IpNetwork = "2001:db8::1/128".parse().unwrap();
        assert_eq!(
            get_host_address(&host6),
            Some("2001:db8::1".parse().unwrap())
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = Arc::new(crate::config::PeerConfig {
            remote_ip: "192.0.2.1/32".parse().unwrap(),
            remote_as: 65001,
            local_as: 65000,
            local_router_id: "1.1.1.1".parse().unwrap(),
            local_address: None,
            enabled: true,
            passive: false,
            hold_time: 180,
            dest_port: 179,
            families: vec![],
            add_path: vec![],
            nexthop_encoding: vec![],
            route_refresh: true,
            enhanced_route_refresh: false,
            extended_message: false,
            graceful_restart: None,
            group_updates: true,
            adj_rib_in: true,
            adj_rib_out: true,
            manual_eor: false,
            md5_password: None,
            source_interface: None,
            outgoing_ttl: None,
            incoming_ttl: None,
            description: None,
            hostname: None,
            api_events: crate::config::EventMask::all(),
            static_routes: vec![],
        });
        let interval = Duration::from_secs(10);
        let mut peer = IdlePeer::new(config);
        let first = peer.next_delay(interval);
        assert!(first >= interval);
        peer.failures = 3;
        let backed_off = peer.next_delay(interval);
        assert!(backed_off >= interval * 8);
        peer.failures = 30;
        let capped = peer.next_delay(interval);
        assert!(capped <= interval * 32 + Duration::from_secs(5));
    }
}
