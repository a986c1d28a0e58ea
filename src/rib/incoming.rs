use std::collections::HashMap;
use std::sync::Arc;

use crate::message::nlri::qualifiers::Interner;
use crate::message::{Attributes, Family, Nlri};

/// The cache of what a peer last advertised to us. Optional per neighbor
/// policy; when disabled the daemon still emits update events, it just
/// keeps no copy. Attribute sets repeat heavily across a table, so they
/// are interned and shared.
pub struct AdjRibIn {
    entries: HashMap<Family, HashMap<Vec<u8>, (Arc<Nlri>, Arc<Attributes>)>>,
    attribute_cache: Interner<Attributes>,
}

impl Default for AdjRibIn {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            attribute_cache: Interner::with_capacity(1024),
        }
    }
}

impl AdjRibIn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announce(&mut self, nlri: Nlri, attributes: &Attributes) {
        let family = nlri.family();
        let index = nlri.index();
        let shared = self.attribute_cache.intern(attributes.clone());
        self.entries
            .entry(family)
            .or_insert_with(HashMap::new)
            .insert(index, (Arc::new(nlri), shared));
    }

    pub fn withdraw(&mut self, nlri: &Nlri) -> bool {
        let family = nlri.family();
        self.entries
            .get_mut(&family)
            .map(|routes| routes.remove(&nlri.index()).is_some())
            .unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn clear_family(&mut self, family: Family) {
        self.entries.remove(&family);
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|routes| routes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Family, &Arc<Nlri>, &Arc<Attributes>)> {
        self.entries.iter().flat_map(|(family, routes)| {
            routes
                .values()
                .map(move |(nlri, attrs)| (*family, nlri, attrs))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::attributes::{AsPath, Origin, PathAttribute};
    use crate::message::nlri::PrefixNlri;

    fn unicast(prefix: &str) -> Nlri {
        Nlri::Unicast(PrefixNlri::new(prefix.parse().unwrap(), None))
    }

    fn attrs() -> Attributes {
        Attributes::new()
            .with(PathAttribute::Origin(Origin::Igp))
            .with(PathAttribute::AsPath(AsPath::sequence(vec![65001])))
    }

    #[test]
    fn test_announce_withdraw() {
        let mut rib = AdjRibIn::new();
        rib.announce(unicast("10.0.0.0/24"), &attrs());
        rib.announce(unicast("10.0.1.0/24"), &attrs());
        assert_eq!(rib.len(), 2);
        // Re-announce replaces, not duplicates
        rib.announce(unicast("10.0.0.0/24"), &attrs());
        assert_eq!(rib.len(), 2);
        assert!(rib.withdraw(&unicast("10.0.0.0/24")));
        assert!(!rib.withdraw(&unicast("10.0.0.0/24")));
        assert_eq!(rib.len(), 1);
    }

    #[test]
    fn test_attribute_sets_shared() {
        let mut rib = AdjRibIn::new();
        rib.announce(unicast("10.0.0.0/24"), &attrs());
        rib.announce(unicast("10.0.1.0/24"), &attrs());
        let shared: Vec<&Arc<Attributes>> = rib.iter().map(|(_, _, attrs)| attrs).collect();
        assert!(Arc::ptr_eq(shared[0], shared[1]));
    }

    #[test]
    fn test_clear_family() {
        let mut rib = AdjRibIn::new();
        rib.announce(unicast("10.0.0.0/24"), &attrs());
        rib.announce(unicast("2001:db8::/32"), &attrs());
        rib.clear_family(Family::IPV4_UNICAST);
        assert_eq!(rib.len(), 1);
        rib.clear();
        assert!(rib.is_empty());
    }
}
