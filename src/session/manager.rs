use std::collections::HashMap;
use std::error::Error;
use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};

use super::codec::MessageCodec;
use super::poller::{Poller, PollerTx};
use super::{Session, SessionError, SessionUpdate};
use crate::api::messages::Event;
use crate::config::{PeerConfig, ServerConfig};
use crate::message::Message;
use tokio_util::codec::Framed;

pub struct SessionManager {
    pub(crate) idle_peers: Poller,
    // Active sessions, keyed by remote IP
    pub(crate) sessions: Arc<Mutex<HashMap<IpAddr, Session>>>,
    config: Arc<ServerConfig>,
    poller_tx: PollerTx,
    config_watch: watch::Receiver<Arc<ServerConfig>>,
    events: mpsc::UnboundedSender<Event>,
    // Graceful-restart helper state: Adj-RIB-Out kept (stale-marked) for
    // peers whose session dropped with GR negotiated
    preserved_ribs: HashMap<IpAddr, crate::rib::AdjRibOut>,
    // Capabilities each peer rejected with an Unsupported Capability
    // NOTIFICATION; the next OPEN omits them
    capability_exclusions: HashMap<IpAddr, Vec<u8>>,
}

impl SessionManager {
    pub fn new(
        config: Arc<ServerConfig>,
        listener: TcpListener,
        config_watch: watch::Receiver<Arc<ServerConfig>>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let (poller_tx, poller_rx) = mpsc::unbounded_channel();
        let mut poller = Poller::new(listener, config.poll_interval.into(), poller_rx);
        for peer_config in config.peers.iter() {
            poller.upsert_config(peer_config.clone());
        }
        Self {
            idle_peers: poller,
            sessions: Arc::new(Mutex::new(HashMap::with_capacity(config.peers.len()))),
            config,
            poller_tx,
            config_watch,
            events,
            preserved_ribs: HashMap::new(),
            capability_exclusions: HashMap::new(),
        }
    }

    pub fn get_peer_configs(&self) -> Vec<Arc<PeerConfig>> {
        self.config.peers.to_vec()
    }

    pub fn sessions(&self) -> Arc<Mutex<HashMap<IpAddr, Session>>> {
        Arc::clone(&self.sessions)
    }

    /// Hand a peer back to the idle poller (used after admin teardown)
    pub fn reschedule(&self, config: Arc<PeerConfig>) {
        let _ = self.poller_tx.send(config);
    }

    /// Drive every active session one tick, then wait for a new
    /// connection or a config change
    pub async fn get_update(
        &mut self,
    ) -> Result<Option<SessionUpdate>, Box<dyn Error + Send + Sync>> {
        {
            let mut ended_sessions: Vec<IpAddr> = Vec::new();
            let mut sessions = self.sessions.lock().await;
            for (remote_ip, session) in sessions.iter_mut() {
                match session.run().await {
                    Ok(update) => {
                        if update.is_some() {
                            return Ok(update);
                        }
                    }
                    Err(err) => {
                        // FSM transitions and received NOTIFICATIONs have
                        // already said goodbye on the wire; everything else
                        // still owes the peer a NOTIFICATION
                        let already_notified = matches!(
                            err,
                            SessionError::FiniteStateMachine(_)
                                | SessionError::NotificationReceived(_)
                                | SessionError::TransportError(_)
                        );
                        if !already_notified {
                            if let Some(notification) = err.notification() {
                                let _ = session
                                    .send_message(Message::Notification(notification))
                                    .await;
                            }
                        }
                        if let SessionError::NotificationReceived(notification) = &err {
                            use crate::message::error::{
                                ERR_OPEN_MESSAGE, OPEN_UNSUPPORTED_CAPABILITY,
                            };
                            if notification.code == ERR_OPEN_MESSAGE
                                && notification.subcode == OPEN_UNSUPPORTED_CAPABILITY
                            {
                                if let Some(code) = notification.data.first() {
                                    self.capability_exclusions
                                        .entry(*remote_ip)
                                        .or_insert_with(Vec::new)
                                        .push(*code);
                                }
                            }
                        }
                        warn!("{}", err);
                        self.poller_tx.send(session.config.clone())?;
                        ended_sessions.push(*remote_ip);
                    }
                }
            }
            if !ended_sessions.is_empty() {
                for remote_ip in &ended_sessions {
                    if let Some(mut session) = sessions.remove(remote_ip) {
                        // GR helper: retain the sent-routes view, stale-marked,
                        // so the next session replays instead of starting cold
                        let preserved = session
                            .negotiated()
                            .graceful_restart
                            .as_ref()
                            .map(|gr| gr.preserved.clone())
                            .unwrap_or_default();
                        if !preserved.is_empty() {
                            session.rib_out.mark_stale(&preserved);
                            self.preserved_ribs.insert(*remote_ip, session.rib_out);
                        }
                    }
                }
                return Ok(Some(SessionUpdate::Ended(ended_sessions)));
            }
        }

        enum Waited {
            Connection(Option<(tokio::net::TcpStream, Arc<PeerConfig>)>),
            ConfigChanged,
            Nothing,
        }
        let waited = {
            let poller = &mut self.idle_peers;
            let config_watch = &mut self.config_watch;
            tokio::select! {
                new_connection = poller.get_connection() => {
                    Waited::Connection(new_connection?)
                },
                changed = config_watch.changed() => match changed {
                    Ok(()) => Waited::ConfigChanged,
                    Err(_) => Waited::Nothing,
                },
            }
        };

        match waited {
            Waited::Connection(Some((stream, peer_config))) => {
                let mut sessions = self.sessions.lock().await;
                let remote_ip = stream.peer_addr()?.ip();
                if sessions.contains_key(&remote_ip) {
                    warn!(
                        "Unexpected connection from {}: Already have an existing session",
                        remote_ip,
                    );
                    return Ok(None);
                }
                let protocol = Framed::new(stream, MessageCodec::new());
                let mut new_session =
                    Session::new(Arc::clone(&peer_config), protocol, self.events.clone());
                if let Some(excluded) = self.capability_exclusions.get(&remote_ip) {
                    new_session.exclude_capabilities(excluded);
                }
                if let Some(rib) = self.preserved_ribs.remove(&remote_ip) {
                    new_session.restore_rib(rib);
                }
                info!("New session started: {}", remote_ip);
                sessions.insert(remote_ip, new_session);
                Ok(None)
            }
            Waited::ConfigChanged => {
                let new_config = self.config_watch.borrow().clone();
                self.apply_config(new_config).await?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    async fn apply_config(
        &mut self,
        new_config: Arc<ServerConfig>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.config = new_config.clone();
        let configs_by_network: HashMap<IpNetwork, Arc<PeerConfig>> = new_config
            .peers
            .iter()
            .map(|p| (p.remote_ip, p.clone()))
            .collect();
        {
            let mut current_sessions = self.sessions.lock().await;
            let mut removed_peers: Vec<IpAddr> = vec![];
            for (addr, current_session) in current_sessions.iter_mut() {
                if let Some(network) = configs_by_network.keys().find(|n| n.contains(*addr)) {
                    let config = configs_by_network.get(network).expect("network has config");
                    current_session.update_config(config.clone());
                } else {
                    removed_peers.push(*addr);
                }
            }
            debug!(
                "Received config [{} peer configs, {} removed peer configs]",
                configs_by_network.len(),
                removed_peers.len()
            );
            for removed_ip in removed_peers {
                warn!("Session ended with {}, peer de-configured", removed_ip);
                let mut session = current_sessions.remove(&removed_ip).expect("active session");
                let _ = session
                    .teardown(crate::message::error::CEASE_PEER_DECONFIGURED)
                    .await;
            }
        }
        for (_, new_config) in configs_by_network {
            self.poller_tx.send(new_config)?;
        }
        Ok(())
    }
}
