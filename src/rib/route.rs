use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use crate::message::{Attributes, Family, Nlri};
use crate::utils::ParseError;

/// A route's next-hop; `SelfAddress` is the sentinel resolved to the
/// session's local address at send time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NextHop {
    SelfAddress,
    Address(IpAddr),
}

impl NextHop {
    pub fn resolve(&self, local: IpAddr) -> IpAddr {
        match self {
            NextHop::SelfAddress => local,
            NextHop::Address(addr) => *addr,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, NextHop::Address(_))
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NextHop::SelfAddress => write!(f, "self"),
            NextHop::Address(addr) => write!(f, "{}", addr),
        }
    }
}

impl FromStr for NextHop {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "self" {
            return Ok(NextHop::SelfAddress);
        }
        value
            .parse()
            .map(NextHop::Address)
            .map_err(|_| ParseError::new(format!("Invalid next-hop: {}", value)))
    }
}

/// The operational unit: an NLRI plus the attributes to announce it with.
/// Immutable; shared by reference across every neighbor that carries it.
/// Whether it is being announced or withdrawn is the *operation*, never a
/// field here.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub nlri: Arc<Nlri>,
    pub attributes: Arc<Attributes>,
    pub nexthop: NextHop,
}

impl Route {
    pub fn new(nlri: Nlri, attributes: Attributes, nexthop: NextHop) -> Self {
        Self {
            nlri: Arc::new(nlri),
            attributes: Arc::new(attributes),
            nexthop,
        }
    }

    pub fn from_parts(nlri: Arc<Nlri>, attributes: Arc<Attributes>, nexthop: NextHop) -> Self {
        Self {
            nlri,
            attributes,
            nexthop,
        }
    }

    pub fn family(&self) -> Family {
        self.nlri.family()
    }

    pub fn index(&self) -> Vec<u8> {
        self.nlri.index()
    }

    /// Same NLRI, different next-hop; used for nexthop-self materialisation
    pub fn with_nexthop(&self, nexthop: IpAddr) -> Route {
        Route {
            nlri: Arc::clone(&self.nlri),
            attributes: Arc::clone(&self.attributes),
            nexthop: NextHop::Address(nexthop),
        }
    }

    pub fn with_merged_attributes(&self, overrides: &Attributes) -> Route {
        Route {
            nlri: Arc::clone(&self.nlri),
            attributes: Arc::new(self.attributes.merged(overrides)),
            nexthop: self.nexthop,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} next-hop {}", self.nlri, self.nexthop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::attributes::{AsPath, Origin, PathAttribute};
    use crate::message::nlri::PrefixNlri;

    fn sample_route() -> Route {
        let attrs = Attributes::new()
            .with(PathAttribute::Origin(Origin::Igp))
            .with(PathAttribute::AsPath(AsPath::sequence(vec![65000])));
        Route::new(
            Nlri::Unicast(PrefixNlri::new("10.0.0.0/24".parse().unwrap(), None)),
            attrs,
            NextHop::Address("1.2.3.4".parse().unwrap()),
        )
    }

    #[test]
    fn test_index_stability() {
        let route = sample_route();
        assert_eq!(route.index(), route.index());
        let mut expected = route.family().index_prefix().to_vec();
        expected.extend_from_slice(route.nlri.packed());
        assert_eq!(route.index(), expected);
    }

    #[test]
    fn test_with_nexthop_shares_nlri() {
        let route = sample_route();
        let updated = route.with_nexthop("5.6.7.8".parse().unwrap());
        assert!(Arc::ptr_eq(&route.nlri, &updated.nlri));
        assert!(Arc::ptr_eq(&route.attributes, &updated.attributes));
        assert_eq!(
            updated.nexthop,
            NextHop::Address("5.6.7.8".parse().unwrap())
        );
        // The original is untouched
        assert_eq!(
            route.nexthop,
            NextHop::Address("1.2.3.4".parse().unwrap())
        );
    }

    #[test]
    fn test_with_merged_attributes() {
        let route = sample_route();
        let overrides = Attributes::new().with(PathAttribute::LocalPref(200));
        let updated = route.with_merged_attributes(&overrides);
        assert!(Arc::ptr_eq(&route.nlri, &updated.nlri));
        assert_eq!(updated.attributes.len(), 3);
        assert_eq!(route.attributes.len(), 2);
    }

    #[test]
    fn test_nexthop_parse_and_resolve() {
        let nh: NextHop = "self".parse().unwrap();
        assert!(!nh.is_resolved());
        let local: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(nh.resolve(local), local);
        let nh: NextHop = "1.2.3.4".parse().unwrap();
        assert_eq!(nh.resolve(local), "1.2.3.4".parse::<IpAddr>().unwrap());
        assert!("nope".parse::<NextHop>().is_err());
    }
}
