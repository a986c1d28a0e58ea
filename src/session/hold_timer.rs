use std::fmt;
use std::time;

use chrono::{DateTime, Duration, Utc};
use tokio::time::{interval, Interval};

use super::SessionError;
use crate::utils::{format_elapsed_time, get_elapsed_time};

/// Negotiated hold-time bookkeeping. Keepalives go out when less than two
/// keepalive intervals of hold time remain; the session dies when nothing
/// was received for a full hold time.
#[derive(Debug)]
pub struct HoldTimer {
    pub(crate) hold_time: u16,
    pub(crate) interval: u16,
    timer: Interval,
    pub(crate) last_sent: DateTime<Utc>,
    pub(crate) last_received: DateTime<Utc>,
}

impl HoldTimer {
    pub fn new(hold_time: u16) -> HoldTimer {
        HoldTimer {
            hold_time,
            interval: hold_time / 3,
            timer: interval(time::Duration::from_millis(100)),
            last_received: Utc::now(),
            last_sent: Utc::now(),
        }
    }

    pub async fn should_send_keepalive(&mut self) -> Result<bool, SessionError> {
        self.timer.tick().await;
        if self.is_expired() {
            return Err(SessionError::HoldTimeExpired(self.hold_time));
        }
        Ok(self.get_hold_time().num_seconds() < (2 * i64::from(self.interval)))
    }

    pub fn received(&mut self) {
        self.last_received = Utc::now();
    }

    pub fn sent(&mut self) {
        self.last_sent = Utc::now();
    }

    // Remaining time before we owe the peer a keepalive
    fn get_hold_time(&self) -> Duration {
        let hold_time = Duration::seconds(self.hold_time.into());
        if get_elapsed_time(self.last_sent) > hold_time {
            Duration::seconds(0)
        } else {
            hold_time - get_elapsed_time(self.last_sent)
        }
    }

    fn is_expired(&self) -> bool {
        self.hold_time > 0
            && get_elapsed_time(self.last_received)
                >= Duration::seconds(self.hold_time.into())
    }
}

impl fmt::Display for HoldTimer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", format_elapsed_time(self.get_hold_time()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keepalive_scheduling() {
        let mut ht = HoldTimer::new(30);
        assert_eq!(ht.interval, 10);
        assert!(!ht.is_expired());

        ht.last_sent = ht.last_sent - Duration::seconds(5);
        ht.timer = interval(time::Duration::from_millis(1));
        assert!(!ht.should_send_keepalive().await.unwrap());

        // Past 1/3 of the hold time without sending: keepalive due
        ht.last_sent = ht.last_sent - Duration::seconds(5);
        ht.timer = interval(time::Duration::from_millis(1));
        assert!(ht.should_send_keepalive().await.unwrap());

        ht.sent();
        ht.timer = interval(time::Duration::from_millis(1));
        assert!(!ht.should_send_keepalive().await.unwrap());

        // Nothing received for a full hold time: expired
        ht.last_received = ht.last_received - Duration::seconds(30);
        ht.timer = interval(time::Duration::from_millis(1));
        assert!(ht.should_send_keepalive().await.is_err());
    }

    #[tokio::test]
    async fn test_zero_hold_time_never_expires() {
        let mut ht = HoldTimer::new(0);
        ht.last_received = ht.last_received - Duration::seconds(3600);
        ht.timer = interval(time::Duration::from_millis(1));
        assert!(ht.should_send_keepalive().await.is_ok());
    }
}
