use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use super::qualifiers::RouteDistinguisher;
use crate::message::error::{WireError, WireResult};

/// VPLS endpoint NLRI (RFC 4761): fixed 17-byte body behind a 2-byte length
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VplsNlri {
    pub rd: RouteDistinguisher,
    pub ve_id: u16,
    pub block_offset: u16,
    pub block_size: u16,
    pub label_base: u32,
    packed: Vec<u8>,
}

impl VplsNlri {
    pub fn new(
        rd: RouteDistinguisher,
        ve_id: u16,
        block_offset: u16,
        block_size: u16,
        label_base: u32,
    ) -> Self {
        let mut packed = Vec::with_capacity(19);
        packed.extend_from_slice(&17u16.to_be_bytes());
        rd.pack(&mut packed);
        packed.extend_from_slice(&ve_id.to_be_bytes());
        packed.extend_from_slice(&block_offset.to_be_bytes());
        packed.extend_from_slice(&block_size.to_be_bytes());
        packed.extend_from_slice(&label_base.to_be_bytes()[1..4]);
        Self {
            rd,
            ve_id,
            block_offset,
            block_size,
            label_base,
            packed,
        }
    }

    pub fn parse(cur: &mut Cursor<&[u8]>) -> WireResult<Self> {
        let length = cur
            .read_u16::<BigEndian>()
            .map_err(|_| WireError::nlri(vec![]))?;
        if length != 17 {
            return Err(WireError::nlri(length.to_be_bytes().to_vec()));
        }
        let mut rd = [0u8; 8];
        cur.read_exact(&mut rd).map_err(|_| WireError::nlri(vec![]))?;
        let ve_id = cur
            .read_u16::<BigEndian>()
            .map_err(|_| WireError::nlri(vec![]))?;
        let block_offset = cur
            .read_u16::<BigEndian>()
            .map_err(|_| WireError::nlri(vec![]))?;
        let block_size = cur
            .read_u16::<BigEndian>()
            .map_err(|_| WireError::nlri(vec![]))?;
        let label_base = cur
            .read_u24::<BigEndian>()
            .map_err(|_| WireError::nlri(vec![]))?;
        Ok(Self::new(
            RouteDistinguisher(rd),
            ve_id,
            block_offset,
            block_size,
            label_base,
        ))
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for VplsNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "vpls rd {} endpoint {} offset {} size {} base {}",
            self.rd, self.ve_id, self.block_offset, self.block_size, self.label_base
        )
    }
}

/// Route Target Constraint NLRI (RFC 4684): origin AS plus a route-target
/// prefix; zero length is the default wildcard
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RtcNlri {
    pub origin_as: u32,
    /// 0..=8 leading bytes of the route target, per the mask length
    pub target: Vec<u8>,
    pub length: u8,
    packed: Vec<u8>,
}

impl RtcNlri {
    pub const DEFAULT: u8 = 0;

    pub fn wildcard() -> Self {
        Self {
            origin_as: 0,
            target: vec![],
            length: 0,
            packed: vec![0],
        }
    }

    pub fn new(origin_as: u32, target: &[u8; 8]) -> Self {
        let length = 96u8;
        let mut packed = Vec::with_capacity(13);
        packed.push(length);
        packed.extend_from_slice(&origin_as.to_be_bytes());
        packed.extend_from_slice(target);
        Self {
            origin_as,
            target: target.to_vec(),
            length,
            packed,
        }
    }

    pub fn parse(cur: &mut Cursor<&[u8]>) -> WireResult<Self> {
        let length = cur.read_u8().map_err(|_| WireError::nlri(vec![]))?;
        if length == 0 {
            return Ok(Self::wildcard());
        }
        if length < 32 || length > 96 {
            return Err(WireError::nlri(vec![length]));
        }
        let byte_len = ((length as usize) + 7) / 8;
        let mut body = vec![0u8; byte_len];
        cur.read_exact(&mut body)
            .map_err(|_| WireError::nlri(vec![length]))?;
        let origin_as = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        let target = body[4..].to_vec();
        let mut packed = Vec::with_capacity(1 + byte_len);
        packed.push(length);
        packed.extend_from_slice(&body);
        Ok(Self {
            origin_as,
            target,
            length,
            packed,
        })
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for RtcNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.length == 0 {
            write!(f, "rtc default")
        } else {
            write!(
                f,
                "rtc origin {} target 0x{}",
                self.origin_as,
                crate::utils::to_hex(&self.target)
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vpls_roundtrip() {
        let nlri = VplsNlri::new(RouteDistinguisher::from_asn(65000, 1), 7, 100, 8, 1000);
        assert_eq!(nlri.packed().len(), 19);
        let mut cur = Cursor::new(nlri.packed());
        let parsed = VplsNlri::parse(&mut cur).unwrap();
        assert_eq!(parsed, nlri);
    }

    #[test]
    fn test_vpls_bad_length() {
        let wire = [0u8, 5, 1, 2, 3, 4, 5];
        let mut cur = Cursor::new(&wire[..]);
        assert!(VplsNlri::parse(&mut cur).is_err());
    }

    #[test]
    fn test_rtc_roundtrip() {
        let target = [0x00, 0x02, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x01];
        let nlri = RtcNlri::new(65000, &target);
        let mut cur = Cursor::new(nlri.packed());
        let parsed = RtcNlri::parse(&mut cur).unwrap();
        assert_eq!(parsed, nlri);
        assert_eq!(parsed.origin_as, 65000);
    }

    #[test]
    fn test_rtc_wildcard() {
        let wire = [0u8];
        let mut cur = Cursor::new(&wire[..]);
        let parsed = RtcNlri::parse(&mut cur).unwrap();
        assert_eq!(parsed, RtcNlri::wildcard());
        assert_eq!(parsed.packed(), &[0]);
    }
}
