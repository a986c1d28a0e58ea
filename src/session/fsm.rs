use std::fmt;

use crate::message::error::{CEASE_ADMIN_SHUTDOWN, ERR_CEASE, ERR_FSM, ERR_HOLD_TIMER_EXPIRED};

/// RFC 4271 §8 session states
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FsmState {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
}

impl fmt::Display for FsmState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            FsmState::Idle => "Idle",
            FsmState::Connect => "Connect",
            FsmState::Active => "Active",
            FsmState::OpenSent => "OpenSent",
            FsmState::OpenConfirm => "OpenConfirm",
            FsmState::Established => "Established",
        };
        write!(f, "{}", word)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FsmEvent {
    /// Operator or reactor start; passive peers wait in Active
    Start { passive: bool },
    Stop,
    ConnectRetryExpires,
    /// Outbound TCP connect succeeded
    TcpCrAcked,
    /// Inbound TCP connection accepted
    TcpConnectionConfirmed,
    TcpConnectionFails,
    OpenReceived,
    KeepaliveReceived,
    UpdateReceived,
    RouteRefreshReceived,
    NotificationReceived,
    HoldTimerExpires,
    KeepaliveTimerExpires,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsmAction {
    SendOpen,
    SendKeepalive,
    SendNotification(u8, u8),
    StartConnectRetryTimer,
    StopConnectRetryTimer,
    StartHoldTimer,
    StartKeepaliveTimer,
    ResetHoldTimer,
    SessionUp,
    SessionDown,
    CloseConnection,
    ScheduleReconnect,
}

/// One transition. Every (state, event) pair is either listed here or
/// explicitly a no-op; the orchestrator executes the returned actions, the
/// function itself has no side effects.
pub fn step(state: FsmState, event: FsmEvent) -> (FsmState, Vec<FsmAction>) {
    use FsmAction::*;
    use FsmEvent::*;
    use FsmState::*;

    match (state, event) {
        (Idle, Start { passive: true }) => (Active, vec![StartConnectRetryTimer]),
        (Idle, Start { passive: false }) => (Connect, vec![StartConnectRetryTimer]),

        (Connect, TcpCrAcked) => (OpenSent, vec![StopConnectRetryTimer, SendOpen]),
        (Connect, TcpConnectionConfirmed) => {
            (OpenSent, vec![StopConnectRetryTimer, SendOpen])
        }
        (Connect, TcpConnectionFails) => (Active, vec![StartConnectRetryTimer]),
        (Connect, ConnectRetryExpires) => (Connect, vec![StartConnectRetryTimer]),
        // The peer's OPEN can outrun our own on an inbound connection
        (Connect, OpenReceived) => (
            OpenConfirm,
            vec![SendOpen, SendKeepalive, StartHoldTimer, StartKeepaliveTimer],
        ),

        (Active, TcpConnectionConfirmed) => (OpenSent, vec![SendOpen]),
        (Active, TcpCrAcked) => (OpenSent, vec![SendOpen]),
        (Active, ConnectRetryExpires) => (Connect, vec![StartConnectRetryTimer]),
        (Active, TcpConnectionFails) => (Idle, vec![ScheduleReconnect]),

        (OpenSent, OpenReceived) => (
            OpenConfirm,
            vec![SendKeepalive, StartHoldTimer, StartKeepaliveTimer],
        ),
        (OpenSent, KeepaliveReceived) | (OpenSent, UpdateReceived) => (
            Idle,
            vec![SendNotification(ERR_FSM, 1), CloseConnection, ScheduleReconnect],
        ),

        (OpenConfirm, KeepaliveReceived) => (Established, vec![SessionUp]),
        (OpenConfirm, OpenReceived) | (OpenConfirm, UpdateReceived) => (
            Idle,
            vec![SendNotification(ERR_FSM, 2), CloseConnection, ScheduleReconnect],
        ),
        (OpenConfirm, KeepaliveTimerExpires) => {
            (OpenConfirm, vec![SendKeepalive, StartKeepaliveTimer])
        }

        (Established, UpdateReceived)
        | (Established, KeepaliveReceived)
        | (Established, RouteRefreshReceived) => (Established, vec![ResetHoldTimer]),
        (Established, OpenReceived) => (
            Idle,
            vec![
                SendNotification(ERR_FSM, 3),
                SessionDown,
                CloseConnection,
                ScheduleReconnect,
            ],
        ),
        (Established, KeepaliveTimerExpires) => {
            (Established, vec![SendKeepalive, StartKeepaliveTimer])
        }

        (OpenSent, HoldTimerExpires) | (OpenConfirm, HoldTimerExpires) => (
            Idle,
            vec![
                SendNotification(ERR_HOLD_TIMER_EXPIRED, 0),
                CloseConnection,
                ScheduleReconnect,
            ],
        ),
        (Established, HoldTimerExpires) => (
            Idle,
            vec![
                SendNotification(ERR_HOLD_TIMER_EXPIRED, 0),
                SessionDown,
                CloseConnection,
                ScheduleReconnect,
            ],
        ),

        (Established, NotificationReceived) => {
            (Idle, vec![SessionDown, CloseConnection, ScheduleReconnect])
        }
        (OpenSent, NotificationReceived) | (OpenConfirm, NotificationReceived) => {
            (Idle, vec![CloseConnection, ScheduleReconnect])
        }

        (Established, TcpConnectionFails) => {
            (Idle, vec![SessionDown, CloseConnection, ScheduleReconnect])
        }
        (OpenSent, TcpConnectionFails) | (OpenConfirm, TcpConnectionFails) => {
            (Idle, vec![CloseConnection, ScheduleReconnect])
        }

        (Established, Stop) => (
            Idle,
            vec![
                SendNotification(ERR_CEASE, CEASE_ADMIN_SHUTDOWN),
                SessionDown,
                CloseConnection,
            ],
        ),
        (Idle, Stop) => (Idle, vec![]),
        (_, Stop) => (
            Idle,
            vec![SendNotification(ERR_CEASE, CEASE_ADMIN_SHUTDOWN), CloseConnection],
        ),

        // Everything else is explicitly ignored without a state change
        (state, _) => (state, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::FsmEvent::*;
    use super::FsmState::*;
    use super::*;

    const STATES: [FsmState; 6] = [Idle, Connect, Active, OpenSent, OpenConfirm, Established];
    const EVENTS: [FsmEvent; 14] = [
        Start { passive: false },
        Start { passive: true },
        Stop,
        ConnectRetryExpires,
        TcpCrAcked,
        TcpConnectionConfirmed,
        TcpConnectionFails,
        OpenReceived,
        KeepaliveReceived,
        UpdateReceived,
        RouteRefreshReceived,
        NotificationReceived,
        HoldTimerExpires,
        KeepaliveTimerExpires,
    ];

    #[test]
    fn test_totality() {
        // Every pair must produce a defined result; `step` can't panic and
        // unknown pairs must leave the state unchanged
        for state in STATES {
            for event in EVENTS {
                let (next, _actions) = step(state, event);
                let _ = next;
            }
        }
    }

    #[test]
    fn test_happy_path_outbound() {
        let (state, actions) = step(Idle, Start { passive: false });
        assert_eq!(state, Connect);
        assert!(actions.contains(&FsmAction::StartConnectRetryTimer));

        let (state, actions) = step(state, TcpCrAcked);
        assert_eq!(state, OpenSent);
        assert!(actions.contains(&FsmAction::SendOpen));

        let (state, actions) = step(state, OpenReceived);
        assert_eq!(state, OpenConfirm);
        assert!(actions.contains(&FsmAction::SendKeepalive));
        assert!(actions.contains(&FsmAction::StartHoldTimer));

        let (state, actions) = step(state, KeepaliveReceived);
        assert_eq!(state, Established);
        assert!(actions.contains(&FsmAction::SessionUp));
    }

    #[test]
    fn test_passive_waits_in_active() {
        let (state, _) = step(Idle, Start { passive: true });
        assert_eq!(state, Active);
        let (state, actions) = step(state, TcpConnectionConfirmed);
        assert_eq!(state, OpenSent);
        assert!(actions.contains(&FsmAction::SendOpen));
    }

    #[test]
    fn test_hold_timer_expiry_notifies() {
        let (state, actions) = step(Established, HoldTimerExpires);
        assert_eq!(state, Idle);
        assert!(actions.contains(&FsmAction::SendNotification(4, 0)));
        assert!(actions.contains(&FsmAction::ScheduleReconnect));
        assert!(actions.contains(&FsmAction::SessionDown));
    }

    #[test]
    fn test_unexpected_message_is_fsm_error() {
        let (state, actions) = step(OpenSent, KeepaliveReceived);
        assert_eq!(state, Idle);
        assert!(actions.contains(&FsmAction::SendNotification(5, 1)));
        let (state, actions) = step(Established, OpenReceived);
        assert_eq!(state, Idle);
        assert!(actions.contains(&FsmAction::SendNotification(5, 3)));
    }

    #[test]
    fn test_established_traffic_resets_hold() {
        for event in [UpdateReceived, KeepaliveReceived, RouteRefreshReceived] {
            let (state, actions) = step(Established, event);
            assert_eq!(state, Established);
            assert_eq!(actions, vec![FsmAction::ResetHoldTimer]);
        }
    }

    #[test]
    fn test_ignored_events_keep_state() {
        let (state, actions) = step(Idle, KeepaliveReceived);
        assert_eq!(state, Idle);
        assert!(actions.is_empty());
        let (state, actions) = step(Established, Start { passive: false });
        assert_eq!(state, Established);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_admin_stop_sends_cease() {
        let (state, actions) = step(Established, Stop);
        assert_eq!(state, Idle);
        assert!(actions.contains(&FsmAction::SendNotification(6, 2)));
    }
}
