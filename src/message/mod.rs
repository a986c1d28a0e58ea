pub mod attributes;
pub mod community;
pub mod context;
pub mod error;
pub mod family;
pub mod nlri;
pub mod notification;
pub mod open;
pub mod route_refresh;
pub mod update;

pub use attributes::{Attributes, PathAttribute};
pub use context::{Negotiated, OpenContext};
pub use error::{WireError, WireResult};
pub use family::{Afi, Family, Safi};
pub use nlri::Nlri;
pub use notification::Notification;
pub use open::{Capabilities, Open};
pub use route_refresh::RouteRefresh;
pub use update::Update;

use self::error::{HEADER_BAD_LENGTH, HEADER_BAD_TYPE, HEADER_NOT_SYNCHRONIZED};

/// All-ones marker preceding every message (RFC 4271 §4.1)
pub const MARKER: [u8; 16] = [0xff; 16];
pub const HEADER_LEN: usize = 19;

pub const TYPE_OPEN: u8 = 1;
pub const TYPE_UPDATE: u8 = 2;
pub const TYPE_NOTIFICATION: u8 = 3;
pub const TYPE_KEEPALIVE: u8 = 4;
pub const TYPE_ROUTE_REFRESH: u8 = 5;

/// Fixed message header: the marker plus total length plus type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub length: u16,
    pub message_type: u8,
}

impl Header {
    /// Validate marker and length fields of a 19-byte header slice
    pub fn parse(buf: &[u8]) -> WireResult<Header> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::header(HEADER_BAD_LENGTH, vec![]));
        }
        if buf[..16] != MARKER {
            return Err(WireError::header(HEADER_NOT_SYNCHRONIZED, vec![]));
        }
        let length = u16::from_be_bytes([buf[16], buf[17]]);
        let message_type = buf[18];
        if usize::from(length) < HEADER_LEN || length > context::BGP_EXTENDED_MSG_SIZE {
            return Err(WireError::header(
                HEADER_BAD_LENGTH,
                length.to_be_bytes().to_vec(),
            ));
        }
        if !(TYPE_OPEN..=TYPE_ROUTE_REFRESH).contains(&message_type) {
            return Err(WireError::header(HEADER_BAD_TYPE, vec![message_type]));
        }
        Ok(Header {
            length,
            message_type,
        })
    }
}

/// A decoded BGP message
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Open(Open),
    Update(Update),
    Notification(Notification),
    KeepAlive,
    RouteRefresh(RouteRefresh),
}

impl Message {
    pub fn message_type(&self) -> u8 {
        match self {
            Message::Open(_) => TYPE_OPEN,
            Message::Update(_) => TYPE_UPDATE,
            Message::Notification(_) => TYPE_NOTIFICATION,
            Message::KeepAlive => TYPE_KEEPALIVE,
            Message::RouteRefresh(_) => TYPE_ROUTE_REFRESH,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Open(_) => "OPEN",
            Message::Update(_) => "UPDATE",
            Message::Notification(_) => "NOTIFICATION",
            Message::KeepAlive => "KEEPALIVE",
            Message::RouteRefresh(_) => "ROUTE-REFRESH",
        }
    }

    /// Decode a message body. The body slice excludes the 19-byte header.
    pub fn parse(header: Header, body: &[u8], negotiated: &Negotiated) -> WireResult<Message> {
        if body.len() != usize::from(header.length) - HEADER_LEN {
            return Err(WireError::header(HEADER_BAD_LENGTH, vec![]));
        }
        match header.message_type {
            TYPE_OPEN => Ok(Message::Open(Open::parse(body)?)),
            TYPE_UPDATE => Ok(Message::Update(Update::parse(body, negotiated)?)),
            TYPE_NOTIFICATION => Ok(Message::Notification(Notification::parse(body)?)),
            TYPE_KEEPALIVE => {
                if !body.is_empty() {
                    return Err(WireError::header(HEADER_BAD_LENGTH, vec![]));
                }
                Ok(Message::KeepAlive)
            }
            TYPE_ROUTE_REFRESH => Ok(Message::RouteRefresh(RouteRefresh::parse(body)?)),
            other => Err(WireError::header(HEADER_BAD_TYPE, vec![other])),
        }
    }

    /// Encode the full framed message: marker, length, type, body
    pub fn encode(&self, negotiated: &Negotiated, buf: &mut Vec<u8>) {
        let mut body = Vec::with_capacity(32);
        match self {
            Message::Open(open) => open.encode(&mut body),
            Message::Update(update) => update.encode(negotiated, &mut body),
            Message::Notification(notification) => notification.encode(&mut body),
            Message::KeepAlive => (),
            Message::RouteRefresh(refresh) => refresh.encode(&mut body),
        }
        buf.extend_from_slice(&MARKER);
        buf.extend_from_slice(&((HEADER_LEN + body.len()) as u16).to_be_bytes());
        buf.push(self.message_type());
        buf.extend_from_slice(&body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_validation() {
        let mut buf = vec![0xffu8; 16];
        buf.extend_from_slice(&[0x00, 0x13, TYPE_KEEPALIVE]);
        let header = Header::parse(&buf).unwrap();
        assert_eq!(header.length, 19);
        assert_eq!(header.message_type, TYPE_KEEPALIVE);

        // Broken marker
        let mut bad = buf.clone();
        bad[0] = 0;
        assert_eq!(
            Header::parse(&bad).unwrap_err().subcode,
            HEADER_NOT_SYNCHRONIZED
        );

        // Bad type
        let mut bad = buf.clone();
        bad[18] = 9;
        assert_eq!(Header::parse(&bad).unwrap_err().subcode, HEADER_BAD_TYPE);

        // Undersized length
        let mut bad = buf;
        bad[17] = 0x10;
        assert_eq!(Header::parse(&bad).unwrap_err().subcode, HEADER_BAD_LENGTH);
    }

    #[test]
    fn test_keepalive_roundtrip() {
        let negotiated = Negotiated::default();
        let mut buf = Vec::new();
        Message::KeepAlive.encode(&negotiated, &mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let header = Header::parse(&buf).unwrap();
        let message = Message::parse(header, &buf[HEADER_LEN..], &negotiated).unwrap();
        assert_eq!(message, Message::KeepAlive);
    }

    #[test]
    fn test_keepalive_with_body_rejected() {
        let negotiated = Negotiated::default();
        let header = Header {
            length: 20,
            message_type: TYPE_KEEPALIVE,
        };
        assert!(Message::parse(header, &[0], &negotiated).is_err());
    }
}
