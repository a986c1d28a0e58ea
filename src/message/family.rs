use std::convert::TryFrom;
use std::fmt;

use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

use super::error::{WireError, HEADER_BAD_TYPE};

/// Address Family Identifier (RFC 4760)
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Afi {
    Ipv4,
    Ipv6,
    L2vpn,
    BgpLs,
}

impl Afi {
    pub fn code(self) -> u16 {
        match self {
            Afi::Ipv4 => 1,
            Afi::Ipv6 => 2,
            Afi::L2vpn => 25,
            Afi::BgpLs => 16388,
        }
    }

    /// Host address length in bytes for prefix-bearing families
    pub fn address_len(self) -> usize {
        match self {
            Afi::Ipv4 => 4,
            Afi::Ipv6 => 16,
            _ => 0,
        }
    }
}

impl TryFrom<u16> for Afi {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Afi::Ipv4),
            2 => Ok(Afi::Ipv6),
            25 => Ok(Afi::L2vpn),
            16388 => Ok(Afi::BgpLs),
            _ => Err(WireError::header(
                HEADER_BAD_TYPE,
                value.to_be_bytes().to_vec(),
            )),
        }
    }
}

impl fmt::Display for Afi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            Afi::Ipv4 => "ipv4",
            Afi::Ipv6 => "ipv6",
            Afi::L2vpn => "l2vpn",
            Afi::BgpLs => "bgp-ls",
        };
        write!(f, "{}", word)
    }
}

/// Subsequent Address Family Identifier
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Safi {
    Unicast,
    Multicast,
    Mpls,
    McastVpn,
    Vpls,
    Evpn,
    BgpLs,
    BgpLsVpn,
    Mup,
    MplsVpn,
    Rtc,
    Flow,
    FlowVpn,
}

impl Safi {
    pub fn code(self) -> u8 {
        match self {
            Safi::Unicast => 1,
            Safi::Multicast => 2,
            Safi::Mpls => 4,
            Safi::McastVpn => 5,
            Safi::Vpls => 65,
            Safi::Evpn => 70,
            Safi::BgpLs => 71,
            Safi::BgpLsVpn => 72,
            Safi::Mup => 85,
            Safi::MplsVpn => 128,
            Safi::Rtc => 132,
            Safi::Flow => 133,
            Safi::FlowVpn => 134,
        }
    }
}

impl TryFrom<u8> for Safi {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Safi::Unicast),
            2 => Ok(Safi::Multicast),
            4 => Ok(Safi::Mpls),
            5 => Ok(Safi::McastVpn),
            65 => Ok(Safi::Vpls),
            70 => Ok(Safi::Evpn),
            71 => Ok(Safi::BgpLs),
            72 => Ok(Safi::BgpLsVpn),
            85 => Ok(Safi::Mup),
            128 => Ok(Safi::MplsVpn),
            132 => Ok(Safi::Rtc),
            133 => Ok(Safi::Flow),
            134 => Ok(Safi::FlowVpn),
            _ => Err(WireError::header(HEADER_BAD_TYPE, vec![value])),
        }
    }
}

impl fmt::Display for Safi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            Safi::Unicast => "unicast",
            Safi::Multicast => "multicast",
            Safi::Mpls => "nlri-mpls",
            Safi::McastVpn => "mcast-vpn",
            Safi::Vpls => "vpls",
            Safi::Evpn => "evpn",
            Safi::BgpLs => "bgp-ls",
            Safi::BgpLsVpn => "bgp-ls-vpn",
            Safi::Mup => "mup",
            Safi::MplsVpn => "mpls-vpn",
            Safi::Rtc => "rtc",
            Safi::Flow => "flow",
            Safi::FlowVpn => "flow-vpn",
        };
        write!(f, "{}", word)
    }
}

/// The dispatch key for every NLRI operation
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Family {
    pub afi: Afi,
    pub safi: Safi,
}

impl Family {
    pub const IPV4_UNICAST: Family = Family {
        afi: Afi::Ipv4,
        safi: Safi::Unicast,
    };
    pub const IPV6_UNICAST: Family = Family {
        afi: Afi::Ipv6,
        safi: Safi::Unicast,
    };
    pub const IPV4_MPLS_VPN: Family = Family {
        afi: Afi::Ipv4,
        safi: Safi::MplsVpn,
    };
    pub const IPV4_FLOW: Family = Family {
        afi: Afi::Ipv4,
        safi: Safi::Flow,
    };
    pub const L2VPN_VPLS: Family = Family {
        afi: Afi::L2vpn,
        safi: Safi::Vpls,
    };
    pub const L2VPN_EVPN: Family = Family {
        afi: Afi::L2vpn,
        safi: Safi::Evpn,
    };

    pub fn new(afi: Afi, safi: Safi) -> Self {
        Self { afi, safi }
    }

    /// Leading bytes of every route index for this family
    pub fn index_prefix(self) -> [u8; 3] {
        let afi = self.afi.code().to_be_bytes();
        [afi[0], afi[1], self.safi.code()]
    }

    /// Parse the canonical lowercase form, e.g. "ipv4 unicast"
    pub fn from_strings(afi: &str, safi: &str) -> Option<Family> {
        let afi = match afi {
            "ipv4" => Afi::Ipv4,
            "ipv6" => Afi::Ipv6,
            "l2vpn" => Afi::L2vpn,
            "bgp-ls" => Afi::BgpLs,
            _ => return None,
        };
        let safi = match safi {
            "unicast" => Safi::Unicast,
            "multicast" => Safi::Multicast,
            "nlri-mpls" | "mpls" => Safi::Mpls,
            "mcast-vpn" => Safi::McastVpn,
            "vpls" => Safi::Vpls,
            "evpn" => Safi::Evpn,
            "bgp-ls" => Safi::BgpLs,
            "bgp-ls-vpn" => Safi::BgpLsVpn,
            "mup" => Safi::Mup,
            "mpls-vpn" => Safi::MplsVpn,
            "rtc" | "rt-constraint" => Safi::Rtc,
            "flow" => Safi::Flow,
            "flow-vpn" => Safi::FlowVpn,
            _ => return None,
        };
        Some(Family::new(afi, safi))
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.afi, self.safi)
    }
}

impl TryFrom<(u16, u8)> for Family {
    type Error = WireError;

    fn try_from(v: (u16, u8)) -> Result<Self, Self::Error> {
        Ok(Self::new(Afi::try_from(v.0)?, Safi::try_from(v.1)?))
    }
}

impl Serialize for Family {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Family {
    fn deserialize<D>(deserializer: D) -> Result<Family, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let parts: Vec<&str> = s.trim().split_whitespace().collect();
        if parts.len() != 2 {
            return Err(serde::de::Error::custom(format!(
                "Incorrect family format: '{}'",
                s
            )));
        }
        Family::from_strings(parts[0], parts[1])
            .ok_or_else(|| serde::de::Error::custom(format!("Unsupported family: '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::value::{Error, StrDeserializer};
    use serde::de::IntoDeserializer;
    use std::convert::TryFrom;

    #[test]
    fn test_family_display() {
        assert_eq!(&Family::IPV4_UNICAST.to_string(), "ipv4 unicast");
        assert_eq!(&Family::IPV4_MPLS_VPN.to_string(), "ipv4 mpls-vpn");
        assert_eq!(
            &Family::new(Afi::Ipv6, Safi::Flow).to_string(),
            "ipv6 flow"
        );
        assert_eq!(&Family::L2VPN_EVPN.to_string(), "l2vpn evpn");
    }

    #[test]
    fn test_family_codes() {
        assert_eq!(Family::IPV4_UNICAST.index_prefix(), [0, 1, 1]);
        assert_eq!(Family::IPV4_MPLS_VPN.index_prefix(), [0, 1, 128]);
        let family = Family::try_from((16388u16, 71u8)).unwrap();
        assert_eq!(family, Family::new(Afi::BgpLs, Safi::BgpLs));
        assert!(Family::try_from((3u16, 1u8)).is_err());
        assert!(Family::try_from((1u16, 99u8)).is_err());
    }

    #[test]
    fn test_deserialize_family() {
        let deserializer: StrDeserializer<Error> = "ipv6 unicast".into_deserializer();
        let family = Family::deserialize(deserializer).unwrap();
        assert_eq!(family, Family::IPV6_UNICAST);

        let deserializer: StrDeserializer<Error> = "ipv4 flow".into_deserializer();
        let family = Family::deserialize(deserializer).unwrap();
        assert_eq!(family, Family::IPV4_FLOW);

        let deserializer: StrDeserializer<Error> = "ipv4 bogus".into_deserializer();
        assert!(Family::deserialize(deserializer).is_err());
    }

}
