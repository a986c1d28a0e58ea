use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use super::codec::MessageProtocol;
use super::fsm::{step, FsmAction, FsmEvent, FsmState};
use super::{HoldTimer, MessageCounts, SessionError, SessionUpdate};
use crate::api::messages::{Direction, Event, EventKind};
use crate::config::PeerConfig;
use crate::message::error::{CEASE_ADMIN_SHUTDOWN, ERR_OPEN_MESSAGE, OPEN_UNSUPPORTED_CAPABILITY};
use crate::message::open::{Capabilities, OpenParameter, AS_TRANS};
use crate::message::route_refresh::RefreshSubtype;
use crate::message::{Family, Message, Negotiated, Notification, Open, Update};
use crate::rib::{AdjRibIn, AdjRibOut};
use crate::utils::format_time_as_elapsed;

/// Where a connected peer is managed: framing, the FSM, timers, the
/// per-neighbor RIBs, and event emission
pub struct Session {
    pub(crate) addr: IpAddr,
    pub(crate) state: FsmState,
    pub(crate) router_id: IpAddr,
    pub(crate) config: Arc<PeerConfig>,
    pub(crate) protocol: MessageProtocol,
    pub(crate) connect_time: DateTime<Utc>,
    pub(crate) hold_timer: HoldTimer,
    pub(crate) counts: MessageCounts,
    pub(crate) rib_out: AdjRibOut,
    pub(crate) rib_in: AdjRibIn,
    local_capabilities: Capabilities,
    events: mpsc::UnboundedSender<Event>,
    /// Families owed an End-of-RIB after the initial drain
    eor_pending: Vec<Family>,
    initial_drain_done: bool,
}

impl Session {
    pub fn new(
        config: Arc<PeerConfig>,
        protocol: MessageProtocol,
        events: mpsc::UnboundedSender<Event>,
    ) -> Session {
        let addr = protocol
            .get_ref()
            .peer_addr()
            .map(|sock| sock.ip())
            .unwrap_or_else(|_| config.remote_ip.ip());
        let local_addr = protocol
            .get_ref()
            .local_addr()
            .map(|sock| sock.ip())
            .unwrap_or_else(|_| "0.0.0.0".parse().expect("valid address"));
        let hold_timer = HoldTimer::new(config.hold_time);
        let local_capabilities = config.local_capabilities();
        let rib_out = AdjRibOut::new(local_addr, config.group_updates);
        Session {
            addr,
            state: FsmState::Connect,
            router_id: addr,
            config,
            protocol,
            connect_time: Utc::now(),
            hold_timer,
            counts: MessageCounts::new(),
            rib_out,
            rib_in: AdjRibIn::new(),
            local_capabilities,
            events,
            eor_pending: Vec::new(),
            initial_drain_done: false,
        }
    }

    pub fn negotiated(&self) -> &Negotiated {
        self.protocol.codec().negotiated()
    }

    /// Did the local side initiate the connection (remote port is the
    /// configured destination port; inbound connections come from a
    /// random port)
    pub fn is_locally_initiated(&self) -> bool {
        self.protocol
            .get_ref()
            .peer_addr()
            .map(|sock| sock.port() == self.config.dest_port)
            .unwrap_or(false)
    }

    pub fn update_config(&mut self, new_config: Arc<PeerConfig>) {
        debug!("Peer config for {} (active session) updated", self.addr);
        self.config = new_config;
    }

    /// Omit capabilities the peer refused on an earlier attempt
    pub(crate) fn exclude_capabilities(&mut self, codes: &[u8]) {
        for code in codes {
            self.local_capabilities = self.local_capabilities.without(*code);
        }
    }

    /// Adopt the stale-marked Adj-RIB-Out preserved from the previous
    /// session (graceful restart helper mode)
    pub(crate) fn restore_rib(&mut self, rib: AdjRibOut) {
        self.rib_out = rib;
    }

    fn emit(&self, kind: EventKind) {
        let event = Event::new(self.addr, self.config.remote_as, kind);
        if event.allowed(&self.config.api_events) {
            let _ = self.events.send(event);
        }
    }

    /// Advance the FSM and execute the returned actions. The caller gets
    /// the actions back to decide whether the session ends.
    async fn apply_event(&mut self, event: FsmEvent) -> Result<Vec<FsmAction>, SessionError> {
        let (next, actions) = step(self.state, event);
        if next != self.state {
            debug!("{} went from {} to {}", self.addr, self.state, next);
            self.state = next;
            self.emit(EventKind::State(next));
        }
        for action in &actions {
            match action {
                FsmAction::SendOpen => {
                    let open = self.create_open();
                    self.emit(EventKind::Open {
                        direction: Direction::Out,
                        open: open.clone(),
                    });
                    self.send_message(Message::Open(open)).await?;
                }
                FsmAction::SendKeepalive => {
                    self.send_message(Message::KeepAlive).await?;
                }
                FsmAction::SendNotification(code, subcode) => {
                    let notification = Notification::new(*code, *subcode, vec![]);
                    self.emit(EventKind::Notification {
                        direction: Direction::Out,
                        notification: notification.clone(),
                    });
                    self.send_message(Message::Notification(notification)).await?;
                }
                FsmAction::StartHoldTimer | FsmAction::StartKeepaliveTimer => {
                    self.hold_timer = HoldTimer::new(self.negotiated().hold_time);
                }
                FsmAction::ResetHoldTimer => self.hold_timer.received(),
                FsmAction::SessionUp | FsmAction::SessionDown => (),
                FsmAction::StartConnectRetryTimer
                | FsmAction::StopConnectRetryTimer
                | FsmAction::CloseConnection
                | FsmAction::ScheduleReconnect => (),
            }
        }
        Ok(actions)
    }

    /// Main function for making progress with the session. Waits for an
    /// incoming message, then services timers and the Adj-RIB-Out.
    pub async fn run(&mut self) -> Result<Option<SessionUpdate>, SessionError> {
        if !self.config.enabled {
            return Err(SessionError::Deconfigured);
        }
        if self.state == FsmState::Connect && self.is_locally_initiated() {
            self.apply_event(FsmEvent::TcpCrAcked).await?;
        }

        match timeout(Duration::from_millis(250), self.protocol.next()).await {
            // Framed stream is exhausted, remote side closed the connection
            Ok(None) => {
                self.apply_event(FsmEvent::TcpConnectionFails).await?;
                return Err(SessionError::TransportError(format!(
                    "Session ended with {}",
                    self.addr
                )));
            }
            Ok(Some(Ok(message))) => {
                trace!("[{}] Incoming: {}", self.addr, message.type_name());
                self.counts.increment_received();
                self.hold_timer.received();
                if let Some(update) = self.process_message(message).await? {
                    return Ok(Some(update));
                }
            }
            Ok(Some(Err(err))) => {
                return Err(SessionError::from(err));
            }
            // Timeout hit: fall through to timer and RIB service
            Err(_) => (),
        }

        if !matches!(
            self.state,
            FsmState::OpenConfirm | FsmState::Established
        ) {
            return Ok(None);
        }

        trace!("Hold time on {}: {}", self.addr, self.hold_timer);
        if self.hold_timer.should_send_keepalive().await? {
            self.apply_event(FsmEvent::KeepaliveTimerExpires).await?;
        }

        if self.state == FsmState::Established {
            self.drain_rib_out().await?;
        }
        Ok(None)
    }

    async fn process_message(
        &mut self,
        message: Message,
    ) -> Result<Option<SessionUpdate>, SessionError> {
        match message {
            Message::Open(open) => {
                self.emit(EventKind::Open {
                    direction: Direction::In,
                    open: open.clone(),
                });
                self.open_received(&open)?;
                let actions = self.apply_event(FsmEvent::OpenReceived).await?;
                if actions.contains(&FsmAction::CloseConnection) {
                    return Err(SessionError::FiniteStateMachine(fsm_subcode(self.state)));
                }
                Ok(None)
            }
            Message::KeepAlive => {
                self.emit(EventKind::Keepalive {
                    direction: Direction::In,
                });
                let actions = self.apply_event(FsmEvent::KeepaliveReceived).await?;
                if actions.contains(&FsmAction::SessionUp) {
                    self.session_up();
                    return Ok(Some(SessionUpdate::Up(self.addr)));
                }
                if actions.contains(&FsmAction::CloseConnection) {
                    return Err(SessionError::FiniteStateMachine(1));
                }
                Ok(None)
            }
            Message::Update(update) => {
                let actions = self.apply_event(FsmEvent::UpdateReceived).await?;
                if actions.contains(&FsmAction::CloseConnection) {
                    return Err(SessionError::FiniteStateMachine(fsm_subcode(self.state)));
                }
                self.emit(EventKind::Update {
                    direction: Direction::In,
                    update: update.clone(),
                });
                self.apply_update(&update);
                Ok(Some(SessionUpdate::Learned(self.addr, update)))
            }
            Message::Notification(notification) => {
                warn!("{} NOTIFICATION: {}", self.addr, notification);
                self.emit(EventKind::Notification {
                    direction: Direction::In,
                    notification: notification.clone(),
                });
                if notification.code == ERR_OPEN_MESSAGE
                    && notification.subcode == OPEN_UNSUPPORTED_CAPABILITY
                {
                    if let Some(code) = notification.data.first() {
                        // Remembered so the next attempt omits the capability
                        warn!(
                            "{} rejected capability {}; will retry without it",
                            self.addr, code
                        );
                        self.local_capabilities = self.local_capabilities.without(*code);
                    }
                }
                self.apply_event(FsmEvent::NotificationReceived).await?;
                Err(SessionError::NotificationReceived(notification))
            }
            Message::RouteRefresh(refresh) => {
                self.apply_event(FsmEvent::RouteRefreshReceived).await?;
                self.emit(EventKind::Refresh {
                    direction: Direction::In,
                    refresh,
                });
                if refresh.subtype == RefreshSubtype::Normal {
                    self.rib_out.refresh(refresh.family);
                }
                Ok(None)
            }
        }
    }

    fn apply_update(&mut self, update: &Update) {
        if let Some(err) = &update.treat_as_withdraw {
            warn!(
                "{} malformed attribute ({}); treating contained NLRI as withdrawn",
                self.addr, err
            );
            for nlri in update.all_announced() {
                self.rib_in.withdraw(nlri);
            }
            for nlri in update.all_withdrawn() {
                self.rib_in.withdraw(nlri);
            }
            return;
        }
        if let Some(family) = update.is_eor() {
            debug!("{} sent End-of-RIB for {}", self.addr, family);
            return;
        }
        if !self.config.adj_rib_in {
            return;
        }
        for nlri in update.all_withdrawn() {
            self.rib_in.withdraw(nlri);
        }
        let announced = update.all_announced();
        self.counts.add_prefixes_received(announced.len() as u64);
        for nlri in announced {
            self.rib_in.announce(nlri.clone(), &update.attributes);
        }
    }

    fn session_up(&mut self) {
        self.eor_pending = if self.config.manual_eor {
            Vec::new()
        } else {
            self.negotiated().families.clone()
        };
        self.initial_drain_done = false;
    }

    /// Service refresh replies first, then pending changes, then the
    /// End-of-RIB markers owed after the initial drain
    async fn drain_rib_out(&mut self) -> Result<(), SessionError> {
        let negotiated = self.negotiated().clone();
        for message in self.rib_out.refresh_updates(&negotiated) {
            if let Message::RouteRefresh(refresh) = &message {
                self.emit(EventKind::Refresh {
                    direction: Direction::Out,
                    refresh: *refresh,
                });
            }
            self.send_message(message).await?;
        }
        if self.rib_out.has_pending() {
            for update in self.rib_out.updates(&negotiated) {
                self.emit(EventKind::Update {
                    direction: Direction::Out,
                    update: update.clone(),
                });
                self.send_message(Message::Update(update)).await?;
            }
        }
        if !self.initial_drain_done {
            self.initial_drain_done = true;
            for family in std::mem::take(&mut self.eor_pending) {
                self.send_message(Message::Update(Update::eor(family))).await?;
            }
        }
        Ok(())
    }

    /// Operator-requested EOR (the `announce eor` command)
    pub async fn send_eor(&mut self, family: Family) -> Result<(), SessionError> {
        self.send_message(Message::Update(Update::eor(family))).await?;
        Ok(())
    }

    pub async fn send_message(&mut self, message: Message) -> Result<(), SessionError> {
        trace!("[{}] Outgoing: {}", self.addr, message.type_name());
        self.protocol.send(message).await?;
        self.counts.increment_sent();
        self.hold_timer.sent();
        Ok(())
    }

    /// Administrative teardown with an RFC 4486 subcode
    pub async fn teardown(&mut self, subcode: u8) -> Result<(), SessionError> {
        let notification = Notification::cease(subcode);
        self.emit(EventKind::Notification {
            direction: Direction::Out,
            notification: notification.clone(),
        });
        self.send_message(Message::Notification(notification)).await?;
        self.emit(EventKind::Shutdown);
        self.state = FsmState::Idle;
        Ok(())
    }

    pub async fn admin_shutdown(&mut self) -> Result<(), SessionError> {
        self.teardown(CEASE_ADMIN_SHUTDOWN).await
    }

    fn open_received(&mut self, open: &Open) -> Result<(), SessionError> {
        let remote_asn = open.asn();
        if remote_asn != self.config.remote_as {
            return Err(SessionError::OpenAsnMismatch(
                remote_asn,
                self.config.remote_as,
            ));
        }
        self.router_id = IpAddr::from(open.identifier.to_be_bytes());
        debug!("[{}] Received {}", self.addr, open);

        let peer_capabilities = Capabilities::from_open(open);
        let negotiated = Negotiated::negotiate(
            &self.local_capabilities,
            &peer_capabilities,
            self.config.local_as,
            self.config.remote_as,
            self.config.hold_time,
            open.hold_time,
        );
        self.hold_timer = HoldTimer::new(negotiated.hold_time);
        self.protocol.codec_mut().set_negotiated(negotiated);
        Ok(())
    }

    pub fn create_open(&self) -> Open {
        let router_id = match self.config.local_router_id {
            IpAddr::V4(ipv4) => ipv4,
            // Router IDs are 32 bits; config validation enforces IPv4
            IpAddr::V6(_) => unreachable!(),
        };
        let two_byte_asn = if self.config.local_as > u32::from(u16::MAX) {
            AS_TRANS
        } else {
            self.config.local_as as u16
        };
        Open {
            version: 4,
            peer_asn: two_byte_asn,
            hold_time: self.config.hold_time,
            identifier: u32::from_be_bytes(router_id.octets()),
            parameters: vec![OpenParameter::Capabilities(
                self.local_capabilities.to_capability_list(),
            )],
        }
    }
}

fn fsm_subcode(state: FsmState) -> u8 {
    match state {
        FsmState::OpenSent => 1,
        FsmState::OpenConfirm => 2,
        FsmState::Established => 3,
        _ => 0,
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "<Session {} state={} uptime={} hold_time={}>",
            self.addr,
            self.state,
            format_time_as_elapsed(self.connect_time),
            self.hold_timer,
        )
    }
}
