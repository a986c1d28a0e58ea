use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

use log::debug;

use crate::message::nlri::Nlri;
use crate::message::{Attributes, Family, Message, Negotiated, RouteRefresh, Update};

use super::assembler;
use super::route::{NextHop, Route};
use super::RibError;

/// What was last successfully sent for one NLRI
pub struct SeenEntry {
    pub route: Arc<Route>,
    pub stale: bool,
}

/// Announce queue for one attribute fingerprint, insertion-ordered
#[derive(Default)]
struct OrderedRoutes {
    order: Vec<Vec<u8>>,
    routes: HashMap<Vec<u8>, Arc<Route>>,
}

impl OrderedRoutes {
    fn insert(&mut self, index: Vec<u8>, route: Arc<Route>) {
        if self.routes.insert(index.clone(), route).is_none() {
            self.order.push(index);
        }
    }

    fn remove(&mut self, index: &[u8]) -> Option<Arc<Route>> {
        self.routes.remove(index)
    }

    fn drain(&mut self) -> Vec<Arc<Route>> {
        let order = std::mem::take(&mut self.order);
        let routes = &mut self.routes;
        order
            .into_iter()
            .filter_map(|index| routes.remove(&index))
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

struct PendingGroup {
    attributes: Arc<Attributes>,
    families: BTreeMap<Family, OrderedRoutes>,
}

#[derive(Default)]
struct Watchdog {
    active: HashMap<Vec<u8>, Arc<Route>>,
    inactive: HashMap<Vec<u8>, Arc<Route>>,
}

/// Per-neighbor outbound state: what is queued to announce or withdraw,
/// and what the peer has already been told
pub struct AdjRibOut {
    local_addr: IpAddr,
    group_updates: bool,
    pending: BTreeMap<u64, PendingGroup>,
    withdraws: BTreeMap<Family, BTreeMap<Vec<u8>, Arc<Nlri>>>,
    seen: HashMap<Family, HashMap<Vec<u8>, SeenEntry>>,
    watchdogs: HashMap<String, Watchdog>,
    refresh_queue: VecDeque<Family>,
    flush_hooks: Vec<Box<dyn Fn() + Send>>,
}

impl AdjRibOut {
    pub fn new(local_addr: IpAddr, group_updates: bool) -> Self {
        Self {
            local_addr,
            group_updates,
            pending: BTreeMap::new(),
            withdraws: BTreeMap::new(),
            seen: HashMap::new(),
            watchdogs: HashMap::new(),
            refresh_queue: VecDeque::new(),
            flush_hooks: Vec::new(),
        }
    }

    /// Announce/withdraw legality is only known here, where the operation
    /// is explicit; NLRI constructors can't reject these
    fn validate(&self, route: &Route) -> Result<(), RibError> {
        match &*route.nlri {
            Nlri::Unicast(_) | Nlri::Multicast(_) => {
                let resolvable = route.nexthop.is_resolved()
                    || (route.nexthop == NextHop::SelfAddress
                        && !self.local_addr.is_unspecified());
                if !resolvable {
                    return Err(RibError::UnresolvedNextHop);
                }
            }
            Nlri::Labeled(labeled) => {
                if labeled.labels.is_empty() {
                    return Err(RibError::MissingLabel);
                }
            }
            Nlri::Vpn(vpn) => {
                if vpn.labels.is_empty() {
                    return Err(RibError::MissingLabel);
                }
                if vpn.rd.is_zero() {
                    return Err(RibError::ZeroRouteDistinguisher);
                }
            }
            _ => (),
        }
        Ok(())
    }

    /// Queue an announce; cancels any queued withdraw of the same NLRI
    pub fn add_to_rib(&mut self, route: Arc<Route>) -> Result<(), RibError> {
        self.validate(&route)?;
        let family = route.family();
        let index = route.index();
        if let Some(withdraws) = self.withdraws.get_mut(&family) {
            withdraws.remove(&index);
        }
        let fingerprint = route.attributes.fingerprint();
        let group = self.pending.entry(fingerprint).or_insert_with(|| PendingGroup {
            attributes: Arc::clone(&route.attributes),
            families: BTreeMap::new(),
        });
        group
            .families
            .entry(family)
            .or_insert_with(OrderedRoutes::default)
            .insert(index, route);
        Ok(())
    }

    /// Queue a withdraw; cancels any queued announce of the same NLRI
    pub fn del_from_rib(&mut self, nlri: Arc<Nlri>) {
        let family = nlri.family();
        let index = nlri.index();
        for group in self.pending.values_mut() {
            if let Some(routes) = group.families.get_mut(&family) {
                routes.remove(&index);
            }
        }
        // Withdrawing something never sent is a no-op on the wire, but the
        // queue entry is kept so a just-sent announce is still retracted
        self.withdraws
            .entry(family)
            .or_insert_with(BTreeMap::new)
            .insert(index, nlri);
    }

    /// Was this exact route (attributes and next-hop included) already
    /// sent; stale entries don't count, they predate the current session
    pub fn in_cache(&self, route: &Route) -> bool {
        self.seen
            .get(&route.family())
            .and_then(|entries| entries.get(&route.index()))
            .map(|entry| {
                !entry.stale
                    && entry.route.attributes.fingerprint() == route.attributes.fingerprint()
                    && entry.route.nexthop == route.nexthop
            })
            .unwrap_or(false)
    }

    /// Post-reconnect resync: everything previously sent but absent from
    /// `new` is withdrawn, and every entry of `new` is re-announced
    pub fn replace_restart(&mut self, new: &[Arc<Route>]) -> Result<(), RibError> {
        let missing = self.seen_not_in(new);
        for nlri in missing {
            self.del_from_rib(nlri);
        }
        for route in new {
            self.add_to_rib(Arc::clone(route))?;
        }
        Ok(())
    }

    /// Config-reload resync: only differences generate wire traffic
    pub fn replace_reload(&mut self, new: &[Arc<Route>]) -> Result<(), RibError> {
        let missing = self.seen_not_in(new);
        for nlri in missing {
            self.del_from_rib(nlri);
        }
        for route in new {
            if !self.in_cache(route) {
                self.add_to_rib(Arc::clone(route))?;
            }
        }
        Ok(())
    }

    fn seen_not_in(&self, keep: &[Arc<Route>]) -> Vec<Arc<Nlri>> {
        let keep_indexes: Vec<Vec<u8>> = keep.iter().map(|r| r.index()).collect();
        self.seen
            .values()
            .flat_map(|entries| entries.values())
            .filter(|entry| !keep_indexes.contains(&entry.route.index()))
            .map(|entry| Arc::clone(&entry.route.nlri))
            .collect()
    }

    /// Park a route behind a named watchdog; inactive routes wait for
    /// `announce_watchdog`
    pub fn add_to_watchdog(
        &mut self,
        name: &str,
        route: Arc<Route>,
        active: bool,
    ) -> Result<(), RibError> {
        self.validate(&route)?;
        let watchdog = self.watchdogs.entry(name.to_string()).or_default();
        let index = route.index();
        if active {
            watchdog.active.insert(index, Arc::clone(&route));
            self.add_to_rib(route)?;
        } else {
            watchdog.inactive.insert(index, route);
        }
        Ok(())
    }

    pub fn announce_watchdog(&mut self, name: &str) {
        let activated: Vec<(Vec<u8>, Arc<Route>)> = match self.watchdogs.get_mut(name) {
            Some(watchdog) => watchdog.inactive.drain().collect(),
            None => return,
        };
        if let Some(watchdog) = self.watchdogs.get_mut(name) {
            for (index, route) in &activated {
                watchdog.active.insert(index.clone(), Arc::clone(route));
            }
        }
        for (_index, route) in activated {
            // Routes held by a watchdog were validated on entry
            let _ = self.add_to_rib(route);
        }
    }

    pub fn withdraw_watchdog(&mut self, name: &str) {
        let deactivated: Vec<(Vec<u8>, Arc<Route>)> = match self.watchdogs.get_mut(name) {
            Some(watchdog) => watchdog.active.drain().collect(),
            None => return,
        };
        if let Some(watchdog) = self.watchdogs.get_mut(name) {
            for (index, route) in &deactivated {
                watchdog.inactive.insert(index.clone(), Arc::clone(route));
            }
        }
        for (_index, route) in deactivated {
            self.del_from_rib(Arc::clone(&route.nlri));
        }
    }

    /// Queue an outbound ROUTE-REFRESH reply for a family
    pub fn refresh(&mut self, family: Family) {
        if !self.refresh_queue.contains(&family) {
            self.refresh_queue.push_back(family);
        }
    }

    pub fn on_flush(&mut self, hook: Box<dyn Fn() + Send>) {
        self.flush_hooks.push(hook);
    }

    pub fn has_pending(&self) -> bool {
        !self.refresh_queue.is_empty()
            || self.withdraws.values().any(|w| !w.is_empty())
            || self
                .pending
                .values()
                .any(|group| group.families.values().any(|routes| !routes.is_empty()))
    }

    /// Drain pending state into UPDATE bodies: all withdraws first, then
    /// announces grouped by attribute fingerprint. Drained announces land
    /// in `seen`; flush hooks fire once the queues are empty.
    pub fn updates(&mut self, negotiated: &Negotiated) -> Vec<Update> {
        let mut produced = Vec::with_capacity(4);

        let withdraws = std::mem::take(&mut self.withdraws);
        for (family, entries) in withdraws {
            if entries.is_empty() {
                continue;
            }
            let nlris: Vec<Arc<Nlri>> = entries.into_values().collect();
            for nlri in &nlris {
                if let Some(seen) = self.seen.get_mut(&family) {
                    seen.remove(&nlri.index());
                }
            }
            produced.extend(assembler::withdraw_updates(family, &nlris, negotiated));
        }

        let fingerprints: Vec<u64> = self.pending.keys().copied().collect();
        for fingerprint in fingerprints {
            let group = self.pending.get_mut(&fingerprint).expect("group exists");
            let attributes = Arc::clone(&group.attributes);
            let families: Vec<Family> = group.families.keys().copied().collect();
            for family in families {
                let routes = group
                    .families
                    .get_mut(&family)
                    .expect("family exists")
                    .drain();
                if routes.is_empty() {
                    continue;
                }
                produced.extend(assembler::announce_updates(
                    family,
                    &attributes,
                    &routes,
                    negotiated,
                    self.local_addr,
                    self.group_updates,
                ));
                let seen = self.seen.entry(family).or_insert_with(HashMap::new);
                for route in routes {
                    seen.insert(
                        route.index(),
                        SeenEntry {
                            route,
                            stale: false,
                        },
                    );
                }
            }
        }
        self.pending.retain(|_, group| {
            group.families.retain(|_, routes| !routes.is_empty());
            !group.families.is_empty()
        });

        if !produced.is_empty() {
            for hook in &self.flush_hooks {
                hook();
            }
        }
        produced
    }

    /// Serve queued ROUTE-REFRESH requests: BoRR, a replay of `seen` for
    /// the family, EoRR (markers only when enhanced refresh was negotiated)
    pub fn refresh_updates(&mut self, negotiated: &Negotiated) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(family) = self.refresh_queue.pop_front() {
            if negotiated.enhanced_route_refresh {
                messages.push(Message::RouteRefresh(RouteRefresh::begin(family)));
            }
            // Replay grouped by fingerprint for deterministic output
            let mut by_fingerprint: BTreeMap<u64, (Arc<Attributes>, Vec<Arc<Route>>)> =
                BTreeMap::new();
            if let Some(entries) = self.seen.get(&family) {
                let mut ordered: Vec<&SeenEntry> = entries.values().collect();
                ordered.sort_by_key(|entry| entry.route.index());
                for entry in ordered {
                    by_fingerprint
                        .entry(entry.route.attributes.fingerprint())
                        .or_insert_with(|| (Arc::clone(&entry.route.attributes), Vec::new()))
                        .1
                        .push(Arc::clone(&entry.route));
                }
            }
            for (_, (attributes, routes)) in by_fingerprint {
                for update in assembler::announce_updates(
                    family,
                    &attributes,
                    &routes,
                    negotiated,
                    self.local_addr,
                    self.group_updates,
                ) {
                    messages.push(Message::Update(update));
                }
            }
            if negotiated.enhanced_route_refresh {
                messages.push(Message::RouteRefresh(RouteRefresh::end(family)));
            }
            debug!("Served route-refresh for {}", family);
        }
        messages
    }

    /// Graceful restart: keep `seen` for the preserved families but mark it
    /// stale; everything else is forgotten. The resync after reconnect
    /// (`replace_restart`) withdraws whatever is no longer wanted.
    pub fn mark_stale(&mut self, preserved: &[Family]) {
        self.seen.retain(|family, _| preserved.contains(family));
        for entries in self.seen.values_mut() {
            for entry in entries.values_mut() {
                entry.stale = true;
            }
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.withdraws.clear();
        self.seen.clear();
        self.refresh_queue.clear();
    }

    pub fn seen_count(&self) -> usize {
        self.seen.values().map(|entries| entries.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::attributes::{AsPath, Origin, PathAttribute};
    use crate::message::nlri::qualifiers::{LabelStack, RouteDistinguisher};
    use crate::message::nlri::{LabeledNlri, PrefixNlri, VpnNlri};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rib() -> AdjRibOut {
        AdjRibOut::new("192.0.2.1".parse().unwrap(), true)
    }

    fn attrs() -> Attributes {
        Attributes::new()
            .with(PathAttribute::Origin(Origin::Igp))
            .with(PathAttribute::AsPath(AsPath::sequence(vec![65000])))
    }

    fn unicast_nlri(prefix: &str) -> Nlri {
        Nlri::Unicast(PrefixNlri::new(prefix.parse().unwrap(), None))
    }

    fn route(prefix: &str, next_hop: &str) -> Arc<Route> {
        Arc::new(Route::new(
            unicast_nlri(prefix),
            attrs(),
            next_hop.parse().unwrap(),
        ))
    }

    #[test]
    fn test_rib_monotonicity() {
        let mut rib = rib();
        let negotiated = Negotiated::test_session();
        let route = route("10.0.0.0/24", "1.2.3.4");
        rib.add_to_rib(Arc::clone(&route)).unwrap();
        assert!(!rib.in_cache(&route));
        let updates = rib.updates(&negotiated);
        assert_eq!(updates.len(), 1);
        assert!(rib.in_cache(&route));
        assert!(!rib.has_pending());

        rib.del_from_rib(Arc::clone(&route.nlri));
        let updates = rib.updates(&negotiated);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_withdrawal());
        assert!(!rib.in_cache(&route));
    }

    #[test]
    fn test_announce_cancels_withdraw() {
        let mut rib = rib();
        let negotiated = Negotiated::test_session();
        // Seed the cache so the withdraw would be real
        rib.add_to_rib(route("10.0.0.0/24", "1.2.3.4")).unwrap();
        rib.updates(&negotiated);

        rib.del_from_rib(Arc::new(unicast_nlri("10.0.0.0/24")));
        rib.add_to_rib(route("10.0.0.0/24", "1.2.3.5")).unwrap();
        let updates = rib.updates(&negotiated);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_announcement());
        assert!(!updates[0].is_withdrawal());
    }

    #[test]
    fn test_withdraw_cancels_announce() {
        let mut rib = rib();
        let negotiated = Negotiated::test_session();
        let route = route("10.0.0.0/24", "1.2.3.4");
        rib.add_to_rib(Arc::clone(&route)).unwrap();
        rib.del_from_rib(Arc::clone(&route.nlri));
        let updates = rib.updates(&negotiated);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_withdrawal());
        assert!(!updates[0].is_announcement());
    }

    #[test]
    fn test_withdraws_precede_announces() {
        let mut rib = rib();
        let negotiated = Negotiated::test_session();
        rib.add_to_rib(route("10.0.0.0/24", "1.2.3.4")).unwrap();
        rib.updates(&negotiated);
        rib.del_from_rib(Arc::new(unicast_nlri("10.0.0.0/24")));
        rib.add_to_rib(route("10.0.1.0/24", "1.2.3.4")).unwrap();
        let updates = rib.updates(&negotiated);
        assert_eq!(updates.len(), 2);
        assert!(updates[0].is_withdrawal());
        assert!(updates[1].is_announcement());
    }

    #[test]
    fn test_validation() {
        let mut rib = AdjRibOut::new("0.0.0.0".parse().unwrap(), true);
        let unresolved = Arc::new(Route::new(
            unicast_nlri("10.0.0.0/24"),
            attrs(),
            NextHop::SelfAddress,
        ));
        assert_eq!(
            rib.add_to_rib(unresolved),
            Err(RibError::UnresolvedNextHop)
        );

        let unlabeled = Arc::new(Route::new(
            Nlri::Labeled(LabeledNlri::new(
                "10.0.0.0/24".parse().unwrap(),
                LabelStack::default(),
                None,
            )),
            attrs(),
            NextHop::Address("1.2.3.4".parse().unwrap()),
        ));
        assert_eq!(rib.add_to_rib(unlabeled), Err(RibError::MissingLabel));

        let zero_rd = Arc::new(Route::new(
            Nlri::Vpn(VpnNlri::new(
                RouteDistinguisher::ZERO,
                "10.0.0.0/24".parse().unwrap(),
                LabelStack::single(100),
                None,
            )),
            attrs(),
            NextHop::Address("1.2.3.4".parse().unwrap()),
        ));
        assert_eq!(
            rib.add_to_rib(zero_rd),
            Err(RibError::ZeroRouteDistinguisher)
        );
    }

    #[test]
    fn test_replace_reload_only_diffs() {
        let mut rib = rib();
        let negotiated = Negotiated::test_session();
        let keep = route("10.0.0.0/24", "1.2.3.4");
        let drop = route("10.0.1.0/24", "1.2.3.4");
        rib.add_to_rib(Arc::clone(&keep)).unwrap();
        rib.add_to_rib(Arc::clone(&drop)).unwrap();
        rib.updates(&negotiated);

        let added = route("10.0.2.0/24", "1.2.3.4");
        rib.replace_reload(&[Arc::clone(&keep), Arc::clone(&added)])
            .unwrap();
        let updates = rib.updates(&negotiated);
        let withdrawn: usize = updates.iter().map(|u| u.all_withdrawn().len()).sum();
        let announced: usize = updates.iter().map(|u| u.all_announced().len()).sum();
        assert_eq!(withdrawn, 1);
        assert_eq!(announced, 1);
    }

    #[test]
    fn test_replace_restart_reannounces_all() {
        let mut rib = rib();
        let negotiated = Negotiated::test_session();
        let keep = route("10.0.0.0/24", "1.2.3.4");
        rib.add_to_rib(Arc::clone(&keep)).unwrap();
        rib.updates(&negotiated);

        rib.replace_restart(&[Arc::clone(&keep)]).unwrap();
        let updates = rib.updates(&negotiated);
        let announced: usize = updates.iter().map(|u| u.all_announced().len()).sum();
        assert_eq!(announced, 1);
    }

    #[test]
    fn test_watchdog_gating() {
        let mut rib = rib();
        let negotiated = Negotiated::test_session();
        rib.add_to_watchdog("upstream", route("10.0.0.0/24", "1.2.3.4"), false)
            .unwrap();
        assert!(rib.updates(&negotiated).is_empty());

        rib.announce_watchdog("upstream");
        let updates = rib.updates(&negotiated);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_announcement());

        rib.withdraw_watchdog("upstream");
        let updates = rib.updates(&negotiated);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_withdrawal());

        // Toggling back re-announces
        rib.announce_watchdog("upstream");
        let updates = rib.updates(&negotiated);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_announcement());
    }

    #[test]
    fn test_refresh_replays_seen() {
        let mut rib = rib();
        let mut negotiated = Negotiated::test_session();
        negotiated.enhanced_route_refresh = true;
        rib.add_to_rib(route("10.0.0.0/24", "1.2.3.4")).unwrap();
        rib.add_to_rib(route("10.0.1.0/24", "1.2.3.4")).unwrap();
        rib.updates(&negotiated);

        rib.refresh(Family::IPV4_UNICAST);
        let messages = rib.refresh_updates(&negotiated);
        assert!(matches!(
            messages.first(),
            Some(Message::RouteRefresh(r)) if *r == RouteRefresh::begin(Family::IPV4_UNICAST)
        ));
        assert!(matches!(
            messages.last(),
            Some(Message::RouteRefresh(r)) if *r == RouteRefresh::end(Family::IPV4_UNICAST)
        ));
        let replayed: usize = messages
            .iter()
            .filter_map(|m| match m {
                Message::Update(update) => Some(update.all_announced().len()),
                _ => None,
            })
            .sum();
        assert_eq!(replayed, 2);
    }

    #[test]
    fn test_flush_hooks_fire_on_drain() {
        let mut rib = rib();
        let negotiated = Negotiated::test_session();
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        rib.on_flush(Box::new(|| {
            FIRED.fetch_add(1, Ordering::SeqCst);
        }));
        rib.updates(&negotiated);
        assert_eq!(FIRED.load(Ordering::SeqCst), 0);
        rib.add_to_rib(route("10.0.0.0/24", "1.2.3.4")).unwrap();
        rib.updates(&negotiated);
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_graceful_restart_staleness() {
        let mut rib = rib();
        let negotiated = Negotiated::test_session();
        let kept = route("10.0.0.0/24", "1.2.3.4");
        let gone = route("10.0.1.0/24", "1.2.3.4");
        rib.add_to_rib(Arc::clone(&kept)).unwrap();
        rib.add_to_rib(Arc::clone(&gone)).unwrap();
        rib.add_to_rib(route("2001:db8::/32", "2001:db8::1")).unwrap();
        rib.updates(&negotiated);
        assert_eq!(rib.seen_count(), 3);

        // Only IPv4 unicast was a preserved family
        rib.mark_stale(&[Family::IPV4_UNICAST]);
        assert_eq!(rib.seen_count(), 2);
        assert!(!rib.in_cache(&kept), "stale entries are not synced");

        // Resync after reconnect: one route still wanted, one gone
        rib.replace_restart(&[Arc::clone(&kept)]).unwrap();
        let updates = rib.updates(&negotiated);
        let withdrawn: usize = updates.iter().map(|u| u.all_withdrawn().len()).sum();
        let announced: usize = updates.iter().map(|u| u.all_announced().len()).sum();
        assert_eq!(withdrawn, 1);
        assert_eq!(announced, 1);
        assert!(rib.in_cache(&kept));
        assert!(!rib.in_cache(&gone));
    }
}
