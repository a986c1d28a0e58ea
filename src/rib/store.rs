use std::collections::HashMap;
use std::sync::Arc;

use super::route::Route;
use super::EntrySource;

struct StoreEntry {
    route: Arc<Route>,
    source: EntrySource,
    refs: usize,
}

/// The global route store: one allocation per distinct NLRI, refcounted by
/// how many neighbor RIBs hold it. Only the reactor writes; neighbor tasks
/// read through the shared `Arc<Route>`.
#[derive(Default)]
pub struct RouteStore {
    entries: HashMap<Vec<u8>, StoreEntry>,
}

impl RouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or re-reference) a route, returning the canonical shared
    /// instance. A differing route under the same index replaces the old
    /// allocation but keeps the reference count.
    pub fn acquire(&mut self, route: Route, source: EntrySource) -> Arc<Route> {
        let index = route.index();
        match self.entries.get_mut(&index) {
            Some(entry) => {
                entry.refs += 1;
                if *entry.route != route {
                    entry.route = Arc::new(route);
                }
                Arc::clone(&entry.route)
            }
            None => {
                let shared = Arc::new(route);
                self.entries.insert(
                    index,
                    StoreEntry {
                        route: Arc::clone(&shared),
                        source,
                        refs: 1,
                    },
                );
                shared
            }
        }
    }

    /// Drop one reference; the entry leaves the store at zero
    pub fn release(&mut self, index: &[u8]) -> bool {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.refs -= 1;
            if entry.refs == 0 {
                self.entries.remove(index);
                return true;
            }
        }
        false
    }

    pub fn get(&self, index: &[u8]) -> Option<Arc<Route>> {
        self.entries.get(index).map(|e| Arc::clone(&e.route))
    }

    pub fn contains(&self, index: &[u8]) -> bool {
        self.entries.contains_key(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Arc<Route>, EntrySource)> {
        self.entries
            .iter()
            .map(|(index, entry)| (index, &entry.route, entry.source))
    }
}

#[cfg(test)]
mod tests {
    use super::super::NextHop;
    use super::*;
    use crate::message::attributes::{AsPath, Origin, PathAttribute};
    use crate::message::nlri::PrefixNlri;
    use crate::message::{Attributes, Nlri};

    fn route(prefix: &str) -> Route {
        let attrs = Attributes::new()
            .with(PathAttribute::Origin(Origin::Igp))
            .with(PathAttribute::AsPath(AsPath::sequence(vec![65000])));
        Route::new(
            Nlri::Unicast(PrefixNlri::new(prefix.parse().unwrap(), None)),
            attrs,
            NextHop::Address("1.2.3.4".parse().unwrap()),
        )
    }

    #[test]
    fn test_acquire_shares_allocation() {
        let mut store = RouteStore::new();
        let a = store.acquire(route("10.0.0.0/24"), EntrySource::Api);
        let b = store.acquire(route("10.0.0.0/24"), EntrySource::Api);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_release_at_zero_removes() {
        let mut store = RouteStore::new();
        let index = route("10.0.0.0/24").index();
        store.acquire(route("10.0.0.0/24"), EntrySource::Api);
        store.acquire(route("10.0.0.0/24"), EntrySource::Config);
        assert!(!store.release(&index));
        assert_eq!(store.len(), 1);
        assert!(store.release(&index));
        assert!(store.is_empty());
        assert!(!store.release(&index));
    }

    #[test]
    fn test_replacement_keeps_refs() {
        let mut store = RouteStore::new();
        let original = store.acquire(route("10.0.0.0/24"), EntrySource::Api);
        let changed = route("10.0.0.0/24").with_nexthop("9.9.9.9".parse().unwrap());
        let replaced = store.acquire(changed, EntrySource::Api);
        assert!(!Arc::ptr_eq(&original, &replaced));
        let index = original.index();
        assert!(!store.release(&index));
        assert!(store.release(&index));
    }
}
