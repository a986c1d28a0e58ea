use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use super::qualifiers::RouteDistinguisher;
use crate::message::error::{WireError, WireResult};

pub const LS_NODE: u16 = 1;
pub const LS_LINK: u16 = 2;
pub const LS_IPV4_PREFIX: u16 = 3;
pub const LS_IPV6_PREFIX: u16 = 4;
pub const LS_SRV6_SID: u16 = 6;

/// Link-state NLRI (RFC 7752 / RFC 9514). Descriptor TLVs are validated for
/// structure and carried opaque; this speaker forwards them, it does not run
/// an IGP.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct BgpLsNlri {
    pub ls_type: u16,
    pub protocol_id: u8,
    pub identifier: u64,
    /// Descriptor TLVs, verbatim
    pub descriptors: Vec<u8>,
    /// RD for the VPN flavor (SAFI 72)
    pub rd: Option<RouteDistinguisher>,
    packed: Vec<u8>,
}

fn validate_tlvs(buf: &[u8]) -> bool {
    let mut offset = 0usize;
    while offset < buf.len() {
        if offset + 4 > buf.len() {
            return false;
        }
        let length = usize::from(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]));
        offset += 4 + length;
    }
    offset == buf.len()
}

impl BgpLsNlri {
    pub fn new(
        ls_type: u16,
        protocol_id: u8,
        identifier: u64,
        descriptors: Vec<u8>,
        rd: Option<RouteDistinguisher>,
    ) -> WireResult<Self> {
        match ls_type {
            LS_NODE | LS_LINK | LS_IPV4_PREFIX | LS_IPV6_PREFIX | LS_SRV6_SID => (),
            _ => return Err(WireError::nlri(ls_type.to_be_bytes().to_vec())),
        }
        if !validate_tlvs(&descriptors) {
            return Err(WireError::nlri(descriptors));
        }
        let rd_len = if rd.is_some() { 8 } else { 0 };
        let total = 9 + rd_len + descriptors.len();
        let mut packed = Vec::with_capacity(4 + total);
        packed.extend_from_slice(&ls_type.to_be_bytes());
        packed.extend_from_slice(&(total as u16).to_be_bytes());
        if let Some(rd) = rd {
            rd.pack(&mut packed);
        }
        packed.push(protocol_id);
        packed.extend_from_slice(&identifier.to_be_bytes());
        packed.extend_from_slice(&descriptors);
        Ok(Self {
            ls_type,
            protocol_id,
            identifier,
            descriptors,
            rd,
            packed,
        })
    }

    pub fn parse(cur: &mut Cursor<&[u8]>, vpn: bool) -> WireResult<Self> {
        let ls_type = cur
            .read_u16::<BigEndian>()
            .map_err(|_| WireError::nlri(vec![]))?;
        let length = cur
            .read_u16::<BigEndian>()
            .map_err(|_| WireError::nlri(vec![]))?;
        let mut body = vec![0u8; usize::from(length)];
        cur.read_exact(&mut body)
            .map_err(|_| WireError::nlri(length.to_be_bytes().to_vec()))?;
        let header = 9 + if vpn { 8 } else { 0 };
        if body.len() < header {
            return Err(WireError::nlri(body));
        }
        let mut body_cur = Cursor::new(&body[..]);
        let rd = if vpn {
            let mut raw = [0u8; 8];
            body_cur
                .read_exact(&mut raw)
                .map_err(|_| WireError::nlri(body.clone()))?;
            Some(RouteDistinguisher(raw))
        } else {
            None
        };
        let protocol_id = body_cur
            .read_u8()
            .map_err(|_| WireError::nlri(body.clone()))?;
        let identifier = body_cur
            .read_u64::<BigEndian>()
            .map_err(|_| WireError::nlri(body.clone()))?;
        let descriptors = body[body_cur.position() as usize..].to_vec();
        Self::new(ls_type, protocol_id, identifier, descriptors, rd)
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for BgpLsNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.ls_type {
            LS_NODE => "node",
            LS_LINK => "link",
            LS_IPV4_PREFIX => "ipv4-prefix",
            LS_IPV6_PREFIX => "ipv6-prefix",
            LS_SRV6_SID => "srv6-sid",
            _ => "unknown",
        };
        write!(
            f,
            "bgp-ls {} protocol {} identifier {}",
            kind, self.protocol_id, self.identifier
        )?;
        if let Some(rd) = &self.rd {
            write!(f, " rd {}", rd)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_descriptor() -> Vec<u8> {
        // Local node descriptor TLV (256) holding an AS number sub-TLV (512)
        let mut tlv = vec![0x02, 0x00, 0x00, 0x08];
        tlv.extend_from_slice(&[0x02, 0x00, 0x00, 0x04, 0x00, 0x00, 0xfd, 0xe8]);
        tlv
    }

    #[test]
    fn test_node_roundtrip() {
        let nlri = BgpLsNlri::new(LS_NODE, 3, 0, node_descriptor(), None).unwrap();
        let mut cur = Cursor::new(nlri.packed());
        let parsed = BgpLsNlri::parse(&mut cur, false).unwrap();
        assert_eq!(parsed, nlri);
        assert_eq!(cur.position() as usize, nlri.packed().len());
    }

    #[test]
    fn test_vpn_flavor_roundtrip() {
        let rd = RouteDistinguisher::from_asn(65000, 9);
        let nlri = BgpLsNlri::new(LS_LINK, 3, 7, node_descriptor(), Some(rd)).unwrap();
        let mut cur = Cursor::new(nlri.packed());
        let parsed = BgpLsNlri::parse(&mut cur, true).unwrap();
        assert_eq!(parsed.rd, Some(rd));
        assert_eq!(parsed, nlri);
    }

    #[test]
    fn test_bad_tlv_structure_rejected() {
        assert!(BgpLsNlri::new(LS_NODE, 3, 0, vec![0x01, 0x00, 0x00], None).is_err());
        assert!(BgpLsNlri::new(99, 3, 0, vec![], None).is_err());
    }
}
