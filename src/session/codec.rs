use bytes::{Buf, BytesMut};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use twoway::find_bytes;

use crate::message::error::{WireError, HEADER_BAD_LENGTH};
use crate::message::{Header, Message, Negotiated, HEADER_LEN, MARKER};

pub type MessageProtocol = Framed<TcpStream, MessageCodec>;

/// Framed BGP message codec. Starts with the pre-OPEN baseline parameters
/// and is upgraded in place once the session negotiates.
#[derive(Debug, Default)]
pub struct MessageCodec {
    negotiated: Negotiated,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    pub fn set_negotiated(&mut self, negotiated: Negotiated) {
        self.negotiated = negotiated;
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = WireError;

    // Find the marker, read the declared length, then hand the message body
    // an owned slice so it can outlive the read buffer
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = match find_bytes(buf, &MARKER) {
            Some(start) => start,
            None => {
                // Nothing message-shaped yet; bound the garbage we retain
                if buf.len() > MARKER.len() {
                    let keep = buf.len() - MARKER.len();
                    buf.advance(keep);
                }
                return Ok(None);
            }
        };
        if buf.len() < start + HEADER_LEN {
            return Ok(None);
        }
        let header = Header::parse(&buf[start..start + HEADER_LEN])?;
        let total = usize::from(header.length);
        if buf.len() < start + total {
            return Ok(None);
        }
        let body = buf[start + HEADER_LEN..start + total].to_vec();
        buf.advance(start + total);
        let message = Message::parse(header, &body, &self.negotiated)?;
        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let mut bytes = Vec::with_capacity(64);
        message.encode(&self.negotiated, &mut bytes);
        if bytes.len() > usize::from(self.negotiated.msg_size) {
            return Err(WireError::header(
                HEADER_BAD_LENGTH,
                (bytes.len() as u16).to_be_bytes().to_vec(),
            ));
        }
        buf.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_keepalive() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&MARKER);
        buf.extend_from_slice(&[0x00, 0x13, 0x04]);
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(message, Message::KeepAlive);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_full_message() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&MARKER);
        buf.extend_from_slice(&[0x00, 0x17, 0x03]); // NOTIFICATION, 23 bytes
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[6, 2, 0, 0]);
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(message, Message::Notification(_)));
    }

    #[test]
    fn test_decode_skips_leading_garbage() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x01, 0x02]);
        buf.extend_from_slice(&MARKER);
        buf.extend_from_slice(&[0x00, 0x13, 0x04]);
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(message, Message::KeepAlive);
    }

    #[test]
    fn test_decode_without_marker_keeps_tail() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0u8; 64]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), MARKER.len());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Message::Notification(crate::message::Notification::cease(2)), &mut buf)
            .unwrap();
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(message, Message::Notification(n) if n.is_cease()));
    }
}
