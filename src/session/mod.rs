pub mod codec;
pub mod fsm;
mod hold_timer;
mod manager;
mod message_counts;
mod poller;
mod session;
pub mod socket;

use std::error;
use std::fmt;
use std::io;
use std::net::IpAddr;

pub use fsm::{FsmAction, FsmEvent, FsmState};
use hold_timer::HoldTimer;
pub use manager::SessionManager;
use message_counts::MessageCounts;
use poller::{Poller, PollerTx};
pub use session::Session;

use crate::message::{Notification, Update, WireError};

/// What a session surfaced to the reactor this tick
#[derive(Debug)]
pub enum SessionUpdate {
    /// Update received from a peer
    Learned(IpAddr, Update),
    /// Session reached Established
    Up(IpAddr),
    /// Sessions ended; their peers go back to the idle poller
    Ended(Vec<IpAddr>),
}

#[derive(Debug)]
pub enum SessionError {
    /// Peer de-configured
    Deconfigured,
    /// Received an unexpected ASN [received, expected]
    OpenAsnMismatch(u32, u32),
    /// Unexpected message for the current state [fsm subcode]
    FiniteStateMachine(u8),
    /// Hold time expired [negotiated hold]
    HoldTimeExpired(u16),
    /// Peer sent NOTIFICATION
    NotificationReceived(Notification),
    /// Decode failure that maps to an outgoing NOTIFICATION
    Wire(WireError),
    /// Something happened in transport
    TransportError(String),
    Other(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Session Error: ")?;
        use SessionError::*;
        match self {
            Deconfigured => write!(f, "Peer de-configured"),
            OpenAsnMismatch(received, expected) => write!(
                f,
                "Open ASN mismatch (received={}, expected={})",
                received, expected
            ),
            FiniteStateMachine(subcode) => {
                write!(f, "Finite state machine error [{}]", subcode)
            }
            HoldTimeExpired(hold) => write!(f, "Hold time expired after {} seconds", hold),
            NotificationReceived(notification) => {
                write!(f, "Received NOTIFICATION {}", notification)
            }
            Wire(err) => write!(f, "Decode failure: {}", err),
            TransportError(reason) => write!(f, "Transport error [{}]", reason),
            Other(reason) => write!(f, "{}", reason),
        }
    }
}

impl error::Error for SessionError {}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        SessionError::TransportError(error.to_string())
    }
}

impl From<WireError> for SessionError {
    fn from(error: WireError) -> Self {
        match error.kind {
            crate::message::error::ErrorKind::Io => {
                SessionError::TransportError(error.to_string())
            }
            _ => SessionError::Wire(error),
        }
    }
}

impl SessionError {
    /// The NOTIFICATION owed to the peer for this failure, if any
    pub fn notification(&self) -> Option<Notification> {
        use crate::message::error::*;
        match self {
            SessionError::Deconfigured => {
                Some(Notification::cease(CEASE_PEER_DECONFIGURED))
            }
            SessionError::OpenAsnMismatch(..) => {
                Some(Notification::new(ERR_OPEN_MESSAGE, OPEN_BAD_PEER_AS, vec![]))
            }
            SessionError::FiniteStateMachine(subcode) => {
                Some(Notification::new(ERR_FSM, *subcode, vec![]))
            }
            SessionError::HoldTimeExpired(_) => Some(Notification::hold_timer_expired()),
            SessionError::Wire(err) if err.code != 0 => {
                Some(Notification::new(err.code, err.subcode, err.data.clone()))
            }
            _ => None,
        }
    }
}
