pub mod assembler;
pub mod incoming;
pub mod outgoing;
pub mod route;
pub mod store;

pub use incoming::AdjRibIn;
pub use outgoing::AdjRibOut;
pub use route::{NextHop, Route};
pub use store::RouteStore;

use std::error;
use std::fmt;

/// Where a route entered the daemon from
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntrySource {
    Api,
    Config,
    Peer(std::net::IpAddr),
}

impl fmt::Display for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EntrySource::Api => write!(f, "API"),
            EntrySource::Config => write!(f, "Config"),
            EntrySource::Peer(addr) => write!(f, "{}", addr),
        }
    }
}

/// Enqueue-time validation failures; raised before any wire bytes exist
#[derive(Debug, PartialEq, Eq)]
pub enum RibError {
    /// Unicast/multicast announce without a concrete next-hop
    UnresolvedNextHop,
    /// Labeled announce with an empty label stack
    MissingLabel,
    /// VPN announce with a zero route distinguisher
    ZeroRouteDistinguisher,
}

impl fmt::Display for RibError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RibError::UnresolvedNextHop => write!(f, "announce requires a resolved next-hop"),
            RibError::MissingLabel => write!(f, "labeled announce requires at least one label"),
            RibError::ZeroRouteDistinguisher => {
                write!(f, "vpn announce requires a non-zero route distinguisher")
            }
        }
    }
}

impl error::Error for RibError {}
