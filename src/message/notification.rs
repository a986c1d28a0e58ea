use std::fmt;

use super::error::{
    WireError, WireResult, CEASE_ADMIN_RESET, CEASE_ADMIN_SHUTDOWN, CEASE_CONFIGURATION_CHANGE,
    CEASE_CONNECTION_REJECTED, CEASE_MAX_PREFIXES, CEASE_PEER_DECONFIGURED, ERR_CEASE,
    ERR_HOLD_TIMER_EXPIRED, HEADER_BAD_LENGTH,
};

/// BGP NOTIFICATION message body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub code: u8,
    pub subcode: u8,
    pub data: Vec<u8>,
}

impl Notification {
    pub fn new(code: u8, subcode: u8, data: Vec<u8>) -> Self {
        Self {
            code,
            subcode,
            data,
        }
    }

    pub fn hold_timer_expired() -> Self {
        Self::new(ERR_HOLD_TIMER_EXPIRED, 0, vec![])
    }

    pub fn cease(subcode: u8) -> Self {
        Self::new(ERR_CEASE, subcode, vec![])
    }

    pub fn parse(buf: &[u8]) -> WireResult<Notification> {
        if buf.len() < 2 {
            return Err(WireError::header(HEADER_BAD_LENGTH, buf.to_vec()));
        }
        Ok(Notification {
            code: buf[0],
            subcode: buf[1],
            data: buf[2..].to_vec(),
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.code);
        buf.push(self.subcode);
        buf.extend_from_slice(&self.data);
    }

    pub fn is_cease(&self) -> bool {
        self.code == ERR_CEASE
    }

    pub fn major(&self) -> String {
        match self.code {
            1 => "Message Header Error".to_string(),
            2 => "OPEN Message Error".to_string(),
            3 => "UPDATE Message Error".to_string(),
            4 => "Hold Timer Expired".to_string(),
            5 => "Finite State Machine Error".to_string(),
            6 => "Cease".to_string(),
            _ => format!("Code {}", self.code),
        }
    }

    pub fn minor(&self) -> String {
        if self.code == ERR_CEASE {
            let word = match self.subcode {
                CEASE_MAX_PREFIXES => "Maximum Number of Prefixes Reached",
                CEASE_ADMIN_SHUTDOWN => "Administrative Shutdown",
                CEASE_PEER_DECONFIGURED => "Peer De-configured",
                CEASE_ADMIN_RESET => "Administrative Reset",
                CEASE_CONNECTION_REJECTED => "Connection Rejected",
                CEASE_CONFIGURATION_CHANGE => "Other Configuration Change",
                7 => "Connection Collision Resolution",
                8 => "Out of Resources",
                _ => return format!("{}", self.subcode),
            };
            return word.to_string();
        }
        format!("{}", self.subcode)
    }

    pub fn message(&self) -> Option<String> {
        if self.data.is_empty() {
            None
        } else {
            String::from_utf8(self.data.clone()).ok()
        }
    }
}

impl From<&WireError> for Notification {
    fn from(err: &WireError) -> Self {
        Notification::new(err.code, err.subcode, err.data.clone())
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} / {}", self.major(), self.minor())?;
        if let Some(message) = self.message() {
            write!(f, " {}", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let notification = Notification::new(6, 2, vec![]);
        let mut buf = Vec::new();
        notification.encode(&mut buf);
        assert_eq!(buf, vec![6, 2]);
        assert_eq!(Notification::parse(&buf).unwrap(), notification);
        assert!(Notification::parse(&[6]).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Notification::cease(CEASE_ADMIN_SHUTDOWN).to_string(),
            "Cease / Administrative Shutdown"
        );
        assert_eq!(
            Notification::hold_timer_expired().to_string(),
            "Hold Timer Expired / 0"
        );
        let with_data = Notification::new(2, 7, b"Unsupported Capability".to_vec());
        assert_eq!(
            with_data.to_string(),
            "OPEN Message Error / 7 Unsupported Capability"
        );
    }

    #[test]
    fn test_from_wire_error() {
        let err = WireError::update(3, vec![0x01]);
        let notification = Notification::from(&err);
        assert_eq!(notification.code, 3);
        assert_eq!(notification.subcode, 3);
        assert_eq!(notification.data, vec![0x01]);
    }
}
