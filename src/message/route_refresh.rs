use std::convert::TryFrom;
use std::fmt;

use super::error::{WireError, WireResult, HEADER_BAD_LENGTH};
use super::family::Family;

/// Enhanced route refresh subtypes (RFC 7313); Normal is the RFC 2918 form
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshSubtype {
    Normal,
    Begin,
    End,
}

impl RefreshSubtype {
    fn code(self) -> u8 {
        match self {
            RefreshSubtype::Normal => 0,
            RefreshSubtype::Begin => 1,
            RefreshSubtype::End => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RouteRefresh {
    pub family: Family,
    pub subtype: RefreshSubtype,
}

impl RouteRefresh {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            subtype: RefreshSubtype::Normal,
        }
    }

    pub fn begin(family: Family) -> Self {
        Self {
            family,
            subtype: RefreshSubtype::Begin,
        }
    }

    pub fn end(family: Family) -> Self {
        Self {
            family,
            subtype: RefreshSubtype::End,
        }
    }

    pub fn parse(buf: &[u8]) -> WireResult<RouteRefresh> {
        if buf.len() != 4 {
            return Err(WireError::header(HEADER_BAD_LENGTH, buf.to_vec()));
        }
        let afi = u16::from_be_bytes([buf[0], buf[1]]);
        let subtype = match buf[2] {
            0 => RefreshSubtype::Normal,
            1 => RefreshSubtype::Begin,
            2 => RefreshSubtype::End,
            other => return Err(WireError::header(HEADER_BAD_LENGTH, vec![other])),
        };
        Ok(RouteRefresh {
            family: Family::try_from((afi, buf[3]))?,
            subtype,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.family.afi.code().to_be_bytes());
        buf.push(self.subtype.code());
        buf.push(self.family.safi.code());
    }
}

impl fmt::Display for RouteRefresh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let marker = match self.subtype {
            RefreshSubtype::Normal => "",
            RefreshSubtype::Begin => " begin",
            RefreshSubtype::End => " end",
        };
        write!(f, "refresh {}{}", self.family, marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for refresh in [
            RouteRefresh::new(Family::IPV4_UNICAST),
            RouteRefresh::begin(Family::IPV6_UNICAST),
            RouteRefresh::end(Family::IPV4_MPLS_VPN),
        ] {
            let mut buf = Vec::new();
            refresh.encode(&mut buf);
            assert_eq!(buf.len(), 4);
            assert_eq!(RouteRefresh::parse(&buf).unwrap(), refresh);
        }
    }

    #[test]
    fn test_wire_layout() {
        let mut buf = Vec::new();
        RouteRefresh::begin(Family::IPV4_UNICAST).encode(&mut buf);
        assert_eq!(buf, vec![0x00, 0x01, 0x01, 0x01]);
        assert!(RouteRefresh::parse(&[0, 1, 9, 1]).is_err());
        assert!(RouteRefresh::parse(&[0, 1, 0]).is_err());
    }
}
