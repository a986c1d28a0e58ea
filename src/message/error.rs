use std::error;
use std::fmt;
use std::io;

/// What went wrong while decoding, at the granularity the session layer
/// needs to pick a response (NOTIFICATION vs. treat-as-withdraw vs. drop)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Header,
    OpenMessage,
    UpdateMessage,
    MalformedAttribute,
    /// Truncated attribute header or value: the boundary of the next
    /// attribute is lost, so RFC 7606 §4 forbids treat-as-withdraw
    MalformedAttributeList,
    MalformedNlri,
    UnknownCapability,
    Io,
}

/// Typed decode failure carrying the RFC 4271 notification code triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError {
    pub kind: ErrorKind,
    pub code: u8,
    pub subcode: u8,
    pub data: Vec<u8>,
}

pub type WireResult<T> = Result<T, WireError>;

// RFC 4271 notification major codes
pub const ERR_MESSAGE_HEADER: u8 = 1;
pub const ERR_OPEN_MESSAGE: u8 = 2;
pub const ERR_UPDATE_MESSAGE: u8 = 3;
pub const ERR_HOLD_TIMER_EXPIRED: u8 = 4;
pub const ERR_FSM: u8 = 5;
pub const ERR_CEASE: u8 = 6;

// Message header subcodes
pub const HEADER_NOT_SYNCHRONIZED: u8 = 1;
pub const HEADER_BAD_LENGTH: u8 = 2;
pub const HEADER_BAD_TYPE: u8 = 3;

// OPEN subcodes
pub const OPEN_UNSUPPORTED_VERSION: u8 = 1;
pub const OPEN_BAD_PEER_AS: u8 = 2;
pub const OPEN_BAD_BGP_IDENTIFIER: u8 = 3;
pub const OPEN_UNSUPPORTED_PARAMETER: u8 = 4;
pub const OPEN_UNACCEPTABLE_HOLD_TIME: u8 = 6;
pub const OPEN_UNSUPPORTED_CAPABILITY: u8 = 7;

// UPDATE subcodes
pub const UPDATE_MALFORMED_ATTRIBUTE_LIST: u8 = 1;
pub const UPDATE_UNRECOGNIZED_WELL_KNOWN: u8 = 2;
pub const UPDATE_MISSING_WELL_KNOWN: u8 = 3;
pub const UPDATE_ATTRIBUTE_FLAGS: u8 = 4;
pub const UPDATE_ATTRIBUTE_LENGTH: u8 = 5;
pub const UPDATE_INVALID_ORIGIN: u8 = 6;
pub const UPDATE_INVALID_NEXT_HOP: u8 = 8;
pub const UPDATE_OPTIONAL_ATTRIBUTE: u8 = 9;
pub const UPDATE_INVALID_NETWORK_FIELD: u8 = 10;
pub const UPDATE_MALFORMED_AS_PATH: u8 = 11;

// RFC 4486 cease subcodes
pub const CEASE_MAX_PREFIXES: u8 = 1;
pub const CEASE_ADMIN_SHUTDOWN: u8 = 2;
pub const CEASE_PEER_DECONFIGURED: u8 = 3;
pub const CEASE_ADMIN_RESET: u8 = 4;
pub const CEASE_CONNECTION_REJECTED: u8 = 5;
pub const CEASE_CONFIGURATION_CHANGE: u8 = 6;

impl WireError {
    pub fn header(subcode: u8, data: Vec<u8>) -> Self {
        Self {
            kind: ErrorKind::Header,
            code: ERR_MESSAGE_HEADER,
            subcode,
            data,
        }
    }

    pub fn open(subcode: u8, data: Vec<u8>) -> Self {
        Self {
            kind: ErrorKind::OpenMessage,
            code: ERR_OPEN_MESSAGE,
            subcode,
            data,
        }
    }

    pub fn update(subcode: u8, data: Vec<u8>) -> Self {
        Self {
            kind: ErrorKind::UpdateMessage,
            code: ERR_UPDATE_MESSAGE,
            subcode,
            data,
        }
    }

    pub fn attribute(subcode: u8, data: Vec<u8>) -> Self {
        Self {
            kind: ErrorKind::MalformedAttribute,
            code: ERR_UPDATE_MESSAGE,
            subcode,
            data,
        }
    }

    /// An attribute whose header or value ran past the section end
    pub fn attribute_list(data: Vec<u8>) -> Self {
        Self {
            kind: ErrorKind::MalformedAttributeList,
            code: ERR_UPDATE_MESSAGE,
            subcode: UPDATE_MALFORMED_ATTRIBUTE_LIST,
            data,
        }
    }

    pub fn nlri(data: Vec<u8>) -> Self {
        Self {
            kind: ErrorKind::MalformedNlri,
            code: ERR_UPDATE_MESSAGE,
            subcode: UPDATE_INVALID_NETWORK_FIELD,
            data,
        }
    }

    pub fn capability(code: u8) -> Self {
        Self {
            kind: ErrorKind::UnknownCapability,
            code: ERR_OPEN_MESSAGE,
            subcode: OPEN_UNSUPPORTED_CAPABILITY,
            data: vec![code],
        }
    }

    /// Truncated input; maps to the containing message's length subcode
    pub fn truncated(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::OpenMessage => Self::open(OPEN_UNSUPPORTED_PARAMETER, vec![]),
            ErrorKind::MalformedAttribute => Self::attribute(UPDATE_ATTRIBUTE_LENGTH, vec![]),
            ErrorKind::MalformedNlri => Self::nlri(vec![]),
            _ => Self::header(HEADER_BAD_LENGTH, vec![]),
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Wire error [{:?}] code={} subcode={}",
            self.kind, self.code, self.subcode
        )?;
        if !self.data.is_empty() {
            write!(f, " data={}", crate::utils::to_hex(&self.data))?;
        }
        Ok(())
    }
}

impl error::Error for WireError {}

impl From<io::Error> for WireError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => WireError::header(HEADER_BAD_LENGTH, vec![]),
            _ => WireError {
                kind: ErrorKind::Io,
                code: 0,
                subcode: 0,
                data: err.to_string().into_bytes(),
            },
        }
    }
}

impl From<WireError> for io::Error {
    fn from(err: WireError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err.to_string())
    }
}

/// How the session must react to a malformed path attribute (RFC 7606)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrDisposition {
    /// Well-known or NLRI-bearing attribute: tear the session down
    SessionReset,
    /// RFC 7606 §7 category: keep the session, withdraw the contained NLRI
    TreatAsWithdraw,
    /// Attribute-discard category: drop the attribute, keep the UPDATE
    Discard,
}

/// Error-handling category per attribute type code, per RFC 7606 §7
pub fn attr_disposition(code: u8) -> AttrDisposition {
    use crate::message::attributes::codes::*;
    match code {
        // The attributes that frame NLRI cannot be recovered from
        MP_REACH_NLRI | MP_UNREACH_NLRI => AttrDisposition::SessionReset,
        ORIGIN | AS_PATH | NEXT_HOP | MULTI_EXIT_DISC | LOCAL_PREF | AGGREGATOR | COMMUNITIES
        | ORIGINATOR_ID | CLUSTER_LIST | EXTENDED_COMMUNITIES | LARGE_COMMUNITIES | AS4_PATH
        | AS4_AGGREGATOR | PMSI_TUNNEL => AttrDisposition::TreatAsWithdraw,
        ATOMIC_AGGREGATE | AIGP => AttrDisposition::Discard,
        _ => AttrDisposition::TreatAsWithdraw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::attributes::codes;

    #[test]
    fn test_dispositions() {
        assert_eq!(
            attr_disposition(codes::MP_REACH_NLRI),
            AttrDisposition::SessionReset
        );
        assert_eq!(
            attr_disposition(codes::AS_PATH),
            AttrDisposition::TreatAsWithdraw
        );
        assert_eq!(
            attr_disposition(codes::ATOMIC_AGGREGATE),
            AttrDisposition::Discard
        );
    }

    #[test]
    fn test_error_roundtrip_to_io() {
        let err = WireError::update(UPDATE_MALFORMED_AS_PATH, vec![0x02]);
        let io_err: io::Error = err.clone().into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(err.code, ERR_UPDATE_MESSAGE);
        assert_eq!(err.subcode, UPDATE_MALFORMED_AS_PATH);
    }
}
