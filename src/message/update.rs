use std::fmt;

use super::attributes::{codes, Attributes, PathAttribute};
use super::context::Negotiated;
use super::error::{WireError, WireResult, UPDATE_MALFORMED_ATTRIBUTE_LIST};
use super::family::Family;
use super::nlri::Nlri;

/// BGP UPDATE message body. Legacy IPv4 unicast routes sit in the
/// withdrawn/NLRI sections; everything else rides in the MP attributes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    pub withdrawn: Vec<Nlri>,
    pub attributes: Attributes,
    pub announced: Vec<Nlri>,
    /// RFC 7606 verdict from parse: the session stays up but every NLRI in
    /// this message must be handled as withdrawn
    pub treat_as_withdraw: Option<WireError>,
}

impl Update {
    pub fn new(withdrawn: Vec<Nlri>, attributes: Attributes, announced: Vec<Nlri>) -> Self {
        Self {
            withdrawn,
            attributes,
            announced,
            treat_as_withdraw: None,
        }
    }

    /// End-of-RIB marker (RFC 4724 §2): an empty IPv4 UPDATE, or an empty
    /// MP_UNREACH for any other family
    pub fn eor(family: Family) -> Self {
        let mut update = Update::default();
        if family != Family::IPV4_UNICAST {
            update.attributes.insert(PathAttribute::MpUnreach(
                super::attributes::MpUnreach {
                    family,
                    nlris: vec![],
                },
            ));
        }
        update
    }

    pub fn is_eor(&self) -> Option<Family> {
        if !self.withdrawn.is_empty() || !self.announced.is_empty() {
            return None;
        }
        if self.attributes.is_empty() {
            return Some(Family::IPV4_UNICAST);
        }
        if self.attributes.len() != 1 {
            return None;
        }
        match self.attributes.get(codes::MP_UNREACH_NLRI) {
            Some(PathAttribute::MpUnreach(mp)) if mp.nlris.is_empty() => Some(mp.family),
            _ => None,
        }
    }

    pub fn parse(buf: &[u8], negotiated: &Negotiated) -> WireResult<Update> {
        let bad = || WireError::update(UPDATE_MALFORMED_ATTRIBUTE_LIST, vec![]);
        if buf.len() < 4 {
            return Err(bad());
        }
        let v4_addpath = negotiated.addpath_receive(Family::IPV4_UNICAST);

        let withdrawn_len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
        if 2 + withdrawn_len + 2 > buf.len() {
            return Err(bad());
        }
        let withdrawn = Nlri::parse_all(
            Family::IPV4_UNICAST,
            v4_addpath,
            &buf[2..2 + withdrawn_len],
        )?;

        let attrs_at = 2 + withdrawn_len;
        let attrs_len =
            usize::from(u16::from_be_bytes([buf[attrs_at], buf[attrs_at + 1]]));
        if attrs_at + 2 + attrs_len > buf.len() {
            return Err(bad());
        }
        let parsed =
            Attributes::parse_all(&buf[attrs_at + 2..attrs_at + 2 + attrs_len], negotiated)?;
        let mut attributes = parsed.attributes;
        let mut treat_as_withdraw = parsed.treat_as_withdraw;

        let announced = Nlri::parse_all(
            Family::IPV4_UNICAST,
            v4_addpath,
            &buf[attrs_at + 2 + attrs_len..],
        )?;

        // Old speakers tunnel 4-byte ASNs through AS4_PATH / AS4_AGGREGATOR
        if !negotiated.asn4 {
            if let Some(PathAttribute::As4Path(as4)) = attributes.remove(codes::AS4_PATH) {
                let merged = attributes.as_path().map(|path| path.merged_with_as4(&as4));
                if let Some(merged) = merged {
                    attributes.insert(PathAttribute::AsPath(merged));
                }
            }
            if let Some(PathAttribute::As4Aggregator(agg)) =
                attributes.remove(codes::AS4_AGGREGATOR)
            {
                attributes.insert(PathAttribute::Aggregator(agg));
            }
        }

        let mut update = Update {
            withdrawn,
            attributes,
            announced,
            treat_as_withdraw: None,
        };
        if update.is_announcement() && treat_as_withdraw.is_none() {
            if let Err(err) = update
                .attributes
                .mandatory_check(!update.announced.is_empty())
            {
                treat_as_withdraw = Some(err);
            }
        }
        update.treat_as_withdraw = treat_as_withdraw;
        Ok(update)
    }

    pub fn encode(&self, negotiated: &Negotiated, buf: &mut Vec<u8>) {
        let v4_ctx = negotiated.context(Family::IPV4_UNICAST);
        let mut withdrawn = Vec::with_capacity(self.withdrawn.len() * 5);
        for nlri in &self.withdrawn {
            nlri.pack(&v4_ctx, &mut withdrawn);
        }
        buf.extend_from_slice(&(withdrawn.len() as u16).to_be_bytes());
        buf.extend_from_slice(&withdrawn);

        let mut attrs = Vec::with_capacity(64);
        self.attributes.encode(negotiated, &mut attrs);
        buf.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        buf.extend_from_slice(&attrs);

        for nlri in &self.announced {
            nlri.pack(&v4_ctx, buf);
        }
    }

    pub fn is_announcement(&self) -> bool {
        !self.announced.is_empty()
            || matches!(
                self.attributes.get(codes::MP_REACH_NLRI),
                Some(PathAttribute::MpReach(mp)) if !mp.nlris.is_empty()
            )
    }

    pub fn is_withdrawal(&self) -> bool {
        !self.withdrawn.is_empty()
            || matches!(
                self.attributes.get(codes::MP_UNREACH_NLRI),
                Some(PathAttribute::MpUnreach(mp)) if !mp.nlris.is_empty()
            )
    }

    /// Every announced NLRI, legacy section and MP_REACH alike
    pub fn all_announced(&self) -> Vec<&Nlri> {
        let mut nlris: Vec<&Nlri> = self.announced.iter().collect();
        if let Some(PathAttribute::MpReach(mp)) = self.attributes.get(codes::MP_REACH_NLRI) {
            nlris.extend(mp.nlris.iter());
        }
        nlris
    }

    pub fn all_withdrawn(&self) -> Vec<&Nlri> {
        let mut nlris: Vec<&Nlri> = self.withdrawn.iter().collect();
        if let Some(PathAttribute::MpUnreach(mp)) = self.attributes.get(codes::MP_UNREACH_NLRI)
        {
            nlris.extend(mp.nlris.iter());
        }
        nlris
    }

    /// The announced next-hop: MP_REACH's when present, NEXT_HOP otherwise
    pub fn next_hop(&self) -> Option<std::net::IpAddr> {
        if let Some(PathAttribute::MpReach(mp)) = self.attributes.get(codes::MP_REACH_NLRI) {
            return crate::utils::bytes_to_nexthop(&mp.next_hop);
        }
        self.attributes.next_hop()
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Update announced={} withdrawn={}>",
            self.all_announced().len(),
            self.all_withdrawn().len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::attributes::{AsPath, MpReach, Origin};
    use super::super::nlri::qualifiers::{LabelStack, RouteDistinguisher};
    use super::super::nlri::{PrefixNlri, VpnNlri};
    use super::*;

    fn unicast(prefix: &str, path_id: Option<u32>) -> Nlri {
        Nlri::Unicast(PrefixNlri::new(prefix.parse().unwrap(), path_id))
    }

    fn announce_attrs() -> Attributes {
        Attributes::new()
            .with(PathAttribute::Origin(Origin::Igp))
            .with(PathAttribute::AsPath(AsPath::sequence(vec![65000])))
            .with(PathAttribute::NextHop("1.2.3.4".parse().unwrap()))
    }

    #[test]
    fn test_minimal_announce_bytes() {
        // Single IPv4 announce: ORIGIN=IGP, AS_PATH [65000], NEXT_HOP 1.2.3.4
        let negotiated = Negotiated::test_session();
        let update = Update::new(vec![], announce_attrs(), vec![unicast("10.0.0.0/24", None)]);
        let mut buf = Vec::new();
        update.encode(&negotiated, &mut buf);
        let expected: Vec<u8> = vec![
            0x00, 0x00, // withdrawn routes length
            0x00, 0x14, // total path attribute length (20)
            0x40, 0x01, 0x01, 0x00, // ORIGIN IGP
            0x40, 0x02, 0x06, 0x02, 0x01, 0x00, 0x00, 0xfd, 0xe8, // AS_PATH seq [65000]
            0x40, 0x03, 0x04, 0x01, 0x02, 0x03, 0x04, // NEXT_HOP 1.2.3.4
            0x18, 0x0a, 0x00, 0x00, // NLRI 10.0.0.0/24
        ];
        assert_eq!(buf, expected);
        assert_eq!(Update::parse(&buf, &negotiated).unwrap(), update);
    }

    #[test]
    fn test_minimal_withdraw_bytes() {
        let negotiated = Negotiated::test_session();
        let update = Update::new(vec![unicast("10.0.0.0/24", None)], Attributes::new(), vec![]);
        let mut buf = Vec::new();
        update.encode(&negotiated, &mut buf);
        assert_eq!(
            buf,
            vec![0x00, 0x04, 0x18, 0x0a, 0x00, 0x00, 0x00, 0x00]
        );
        let parsed = Update::parse(&buf, &negotiated).unwrap();
        assert_eq!(parsed, update);
        assert!(parsed.is_withdrawal());
        assert!(!parsed.is_announcement());
    }

    #[test]
    fn test_addpath_nlri_prefix() {
        let negotiated = Negotiated::test_session_add_path(Family::IPV4_UNICAST);
        let update = Update::new(
            vec![],
            announce_attrs(),
            vec![unicast("10.0.0.0/24", Some(7))],
        );
        let mut buf = Vec::new();
        update.encode(&negotiated, &mut buf);
        // The NLRI section must start with the 4-byte path id
        let nlri_section = &buf[buf.len() - 8..];
        assert_eq!(
            nlri_section,
            &[0x00, 0x00, 0x00, 0x07, 0x18, 0x0a, 0x00, 0x00]
        );
        assert_eq!(Update::parse(&buf, &negotiated).unwrap(), update);
    }

    #[test]
    fn test_mp_reach_ipv6() {
        let negotiated = Negotiated::test_session();
        let nexthop: std::net::Ipv6Addr = "2001:db8::1".parse().unwrap();
        let attrs = Attributes::new()
            .with(PathAttribute::Origin(Origin::Igp))
            .with(PathAttribute::AsPath(AsPath::sequence(vec![65000])))
            .with(PathAttribute::MpReach(MpReach {
                family: Family::IPV6_UNICAST,
                next_hop: nexthop.octets().to_vec(),
                nlris: vec![unicast("2001:db8::/32", None)],
            }));
        let update = Update::new(vec![], attrs, vec![]);
        let mut buf = Vec::new();
        update.encode(&negotiated, &mut buf);

        // Find the MP_REACH attribute and check its layout
        let mp_at = buf
            .windows(2)
            .position(|w| w == [0x80, 0x0e])
            .expect("MP_REACH present");
        let mp = &buf[mp_at..];
        assert_eq!(mp[2], 26); // length
        assert_eq!(&mp[3..5], &[0x00, 0x02]); // AFI
        assert_eq!(mp[5], 1); // SAFI
        assert_eq!(mp[6], 16); // next-hop length
        assert_eq!(&mp[7..23], &nexthop.octets()[..]);
        assert_eq!(mp[23], 0); // reserved
        assert_eq!(&mp[24..29], &[0x20, 0x20, 0x01, 0x0d, 0xb8]);
        assert_eq!(Update::parse(&buf, &negotiated).unwrap(), update);
    }

    #[test]
    fn test_mp_reach_vpn() {
        let negotiated = Negotiated::test_session();
        let nlri = Nlri::Vpn(VpnNlri::new(
            RouteDistinguisher::from_asn(65000, 1),
            "10.0.0.0/24".parse().unwrap(),
            LabelStack::single(100),
            None,
        ));
        // VPN next-hop: zero RD then the IPv4 address
        let mut next_hop = vec![0u8; 8];
        next_hop.extend_from_slice(&[1, 2, 3, 4]);
        let attrs = Attributes::new()
            .with(PathAttribute::Origin(Origin::Igp))
            .with(PathAttribute::AsPath(AsPath::sequence(vec![65000])))
            .with(PathAttribute::MpReach(MpReach {
                family: Family::IPV4_MPLS_VPN,
                next_hop,
                nlris: vec![nlri],
            }));
        let update = Update::new(vec![], attrs, vec![]);
        let mut buf = Vec::new();
        update.encode(&negotiated, &mut buf);
        let mp_at = buf
            .windows(2)
            .position(|w| w == [0x80, 0x0e])
            .expect("MP_REACH present");
        let mp = &buf[mp_at..];
        assert_eq!(&mp[3..5], &[0x00, 0x01]); // AFI 1
        assert_eq!(mp[5], 128); // SAFI mpls-vpn
        assert_eq!(mp[6], 12); // next-hop length: RD + IPv4
        // NLRI: mask includes label+RD bits, label has bottom-of-stack
        let nlri_wire = &mp[20..];
        assert_eq!(nlri_wire[0], 112);
        assert_eq!(&nlri_wire[1..4], &[0x00, 0x06, 0x41]);
        assert_eq!(Update::parse(&buf, &negotiated).unwrap(), update);
    }

    #[test]
    fn test_eor_markers() {
        let negotiated = Negotiated::test_session();
        let eor4 = Update::eor(Family::IPV4_UNICAST);
        let mut buf = Vec::new();
        eor4.encode(&negotiated, &mut buf);
        assert_eq!(buf, vec![0, 0, 0, 0]);
        assert_eq!(eor4.is_eor(), Some(Family::IPV4_UNICAST));

        let eor6 = Update::eor(Family::IPV6_UNICAST);
        assert_eq!(eor6.is_eor(), Some(Family::IPV6_UNICAST));
        let mut buf = Vec::new();
        eor6.encode(&negotiated, &mut buf);
        let parsed = Update::parse(&buf, &negotiated).unwrap();
        assert_eq!(parsed.is_eor(), Some(Family::IPV6_UNICAST));
    }

    #[test]
    fn test_missing_mandatory_marks_withdraw() {
        let negotiated = Negotiated::test_session();
        // Announce with no ORIGIN/AS_PATH
        let update = Update::new(vec![], Attributes::new(), vec![unicast("10.0.0.0/24", None)]);
        let mut buf = Vec::new();
        update.encode(&negotiated, &mut buf);
        let parsed = Update::parse(&buf, &negotiated).unwrap();
        assert!(parsed.treat_as_withdraw.is_some());
    }

    #[test]
    fn test_bogus_withdraw_length_fails() {
        let negotiated = Negotiated::test_session();
        let buf = vec![0xff, 0xff, 0x00, 0x00];
        assert!(Update::parse(&buf, &negotiated).is_err());
    }
}
