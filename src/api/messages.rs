use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::EventMask;
use crate::message::attributes::PathAttribute;
use crate::message::{Attributes, Notification, Open, RouteRefresh, Update};
use crate::session::fsm::FsmState;
use crate::utils::to_hex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

#[derive(Clone, Debug)]
pub enum EventKind {
    State(FsmState),
    Update {
        direction: Direction,
        update: Update,
    },
    Refresh {
        direction: Direction,
        refresh: RouteRefresh,
    },
    Notification {
        direction: Direction,
        notification: Notification,
    },
    Open {
        direction: Direction,
        open: Open,
    },
    Keepalive {
        direction: Direction,
    },
    Shutdown,
}

/// One event on the subscriber channel
#[derive(Clone, Debug)]
pub struct Event {
    pub peer: IpAddr,
    pub asn: u32,
    pub time: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(peer: IpAddr, asn: u32, kind: EventKind) -> Self {
        Self {
            peer,
            asn,
            time: Utc::now(),
            kind,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EventKind::State(_) => "state",
            EventKind::Update { .. } => "update",
            EventKind::Refresh { .. } => "refresh",
            EventKind::Notification { .. } => "notification",
            EventKind::Open { .. } => "open",
            EventKind::Keepalive { .. } => "keepalive",
            EventKind::Shutdown => "shutdown",
        }
    }

    pub fn allowed(&self, mask: &EventMask) -> bool {
        match self.kind {
            EventKind::State(_) => mask.state,
            EventKind::Update { .. } => mask.update,
            EventKind::Refresh { .. } => mask.refresh,
            EventKind::Notification { .. } => mask.notification,
            EventKind::Open { .. } => mask.open,
            EventKind::Keepalive { .. } => mask.keepalive,
            EventKind::Shutdown => true,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "neighbor": { "ip": self.peer.to_string(), "asn": self.asn },
            "type": self.type_name(),
            "time": self.time.timestamp(),
        });
        let extra = match &self.kind {
            EventKind::State(state) => json!({ "state": state.to_string().to_lowercase() }),
            EventKind::Update { direction, update } => {
                let mut value = json!({ "direction": direction.to_string() });
                let announces = render_announces(update);
                if !announces.is_empty() {
                    value["announce"] = Value::Object(announces.into_iter().collect());
                }
                let withdraws = render_withdraws(update);
                if !withdraws.is_empty() {
                    value["withdraw"] = Value::Object(withdraws.into_iter().collect());
                }
                value
            }
            EventKind::Refresh { direction, refresh } => json!({
                "direction": direction.to_string(),
                "family": refresh.family.to_string(),
                "subtype": format!("{:?}", refresh.subtype).to_lowercase(),
            }),
            EventKind::Notification {
                direction,
                notification,
            } => json!({
                "direction": direction.to_string(),
                "code": notification.code,
                "subcode": notification.subcode,
                "message": notification.to_string(),
            }),
            EventKind::Open { direction, open } => json!({
                "direction": direction.to_string(),
                "asn": open.asn(),
                "hold_time": open.hold_time,
                "router_id": std::net::Ipv4Addr::from(open.identifier).to_string(),
            }),
            EventKind::Keepalive { direction } => {
                json!({ "direction": direction.to_string() })
            }
            EventKind::Shutdown => json!({}),
        };
        if let (Value::Object(body_map), Value::Object(extra_map)) = (&mut body, extra) {
            body_map.extend(extra_map);
        }
        body
    }

    /// One-line text form for subscribers that asked for text
    pub fn to_text(&self) -> String {
        match &self.kind {
            EventKind::State(state) => {
                format!("neighbor {} state {}", self.peer, state.to_string().to_lowercase())
            }
            EventKind::Update { direction, update } => {
                format!("neighbor {} update {} {}", self.peer, direction, update)
            }
            EventKind::Refresh { direction, refresh } => {
                format!("neighbor {} {} {}", self.peer, direction, refresh)
            }
            EventKind::Notification {
                direction,
                notification,
            } => format!(
                "neighbor {} notification {} {}",
                self.peer, direction, notification
            ),
            EventKind::Open { direction, open } => {
                format!("neighbor {} open {} {}", self.peer, direction, open)
            }
            EventKind::Keepalive { direction } => {
                format!("neighbor {} keepalive {}", self.peer, direction)
            }
            EventKind::Shutdown => format!("neighbor {} shutdown", self.peer),
        }
    }
}

fn render_announces(update: &Update) -> BTreeMap<String, Value> {
    let mut families: BTreeMap<String, Value> = BTreeMap::new();
    let attrs = render_attributes(&update.attributes);
    for nlri in update.all_announced() {
        let family = nlri.family().to_string();
        let entry = families
            .entry(family)
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = entry {
            map.insert(nlri.to_string(), attrs.clone());
        }
    }
    families
}

fn render_withdraws(update: &Update) -> BTreeMap<String, Value> {
    let mut families: BTreeMap<String, Value> = BTreeMap::new();
    for nlri in update.all_withdrawn() {
        let family = nlri.family().to_string();
        let entry = families
            .entry(family)
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = entry {
            map.insert(nlri.to_string(), json!({}));
        }
    }
    families
}

/// The canonical textual rendering catalogue for attributes
pub fn render_attributes(attributes: &Attributes) -> Value {
    let mut map = serde_json::Map::new();
    for attribute in attributes.iter() {
        match attribute {
            PathAttribute::Origin(origin) => {
                map.insert("origin".into(), json!(origin.to_string()));
            }
            PathAttribute::AsPath(path) => {
                let asns: Vec<u32> = path.iter_asns().collect();
                map.insert("as-path".into(), json!(asns));
            }
            PathAttribute::NextHop(ip) => {
                map.insert("next-hop".into(), json!(ip.to_string()));
            }
            PathAttribute::MultiExitDisc(med) => {
                map.insert("med".into(), json!(med));
            }
            PathAttribute::LocalPref(pref) => {
                map.insert("local-preference".into(), json!(pref));
            }
            PathAttribute::AtomicAggregate => {
                map.insert("atomic-aggregate".into(), json!(true));
            }
            PathAttribute::Aggregator(agg) => {
                map.insert(
                    "aggregator".into(),
                    json!(format!("{}:{}", agg.asn, agg.speaker)),
                );
            }
            PathAttribute::Communities(communities) => {
                let rendered: Vec<String> =
                    communities.iter().map(|c| c.to_string()).collect();
                map.insert("community".into(), json!(rendered));
            }
            PathAttribute::ExtendedCommunities(communities) => {
                let rendered: Vec<String> =
                    communities.iter().map(|c| c.to_string()).collect();
                map.insert("extended-community".into(), json!(rendered));
            }
            PathAttribute::LargeCommunities(communities) => {
                let rendered: Vec<String> =
                    communities.iter().map(|c| c.to_string()).collect();
                map.insert("large-community".into(), json!(rendered));
            }
            PathAttribute::OriginatorId(id) => {
                map.insert(
                    "originator-id".into(),
                    json!(std::net::Ipv4Addr::from(*id).to_string()),
                );
            }
            PathAttribute::ClusterList(ids) => {
                let rendered: Vec<String> = ids
                    .iter()
                    .map(|id| std::net::Ipv4Addr::from(*id).to_string())
                    .collect();
                map.insert("cluster-list".into(), json!(rendered));
            }
            PathAttribute::Aigp(metric) => {
                map.insert("aigp".into(), json!(metric));
            }
            // MP attributes are message framing, not route properties
            PathAttribute::MpReach(mp) => {
                if let Some(next_hop) = crate::utils::bytes_to_nexthop(&mp.next_hop) {
                    map.insert("next-hop".into(), json!(next_hop.to_string()));
                }
            }
            PathAttribute::MpUnreach(_) => (),
            PathAttribute::As4Path(_) | PathAttribute::As4Aggregator(_) => (),
            PathAttribute::PmsiTunnel(raw) => {
                map.insert("pmsi-tunnel".into(), json!(format!("0x{}", to_hex(raw))));
            }
            PathAttribute::TunnelEncapsulation(raw) => {
                map.insert(
                    "tunnel-encapsulation".into(),
                    json!(format!("0x{}", to_hex(raw))),
                );
            }
            PathAttribute::LinkState(raw) => {
                map.insert("bgp-ls".into(), json!(format!("0x{}", to_hex(raw))));
            }
            PathAttribute::PrefixSid(raw) => {
                map.insert("bgp-prefix-sid".into(), json!(format!("0x{}", to_hex(raw))));
            }
            PathAttribute::Unknown { flags, code, value } => {
                map.insert(
                    format!("attribute-0x{:02x}-0x{:02x}", code, flags),
                    json!(format!("0x{}", to_hex(value))),
                );
            }
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::attributes::{AsPath, Origin};
    use crate::message::community::Community;
    use crate::message::nlri::{Nlri, PrefixNlri};

    fn sample_update() -> Update {
        let attrs = Attributes::new()
            .with(PathAttribute::Origin(Origin::Igp))
            .with(PathAttribute::AsPath(AsPath::sequence(vec![65000, 65001])))
            .with(PathAttribute::NextHop("1.2.3.4".parse().unwrap()))
            .with(PathAttribute::Communities(vec![Community(0xfde80001)]));
        Update::new(
            vec![],
            attrs,
            vec![Nlri::Unicast(PrefixNlri::new(
                "10.0.0.0/24".parse().unwrap(),
                None,
            ))],
        )
    }

    #[test]
    fn test_update_event_json_shape() {
        let event = Event::new(
            "127.0.0.2".parse().unwrap(),
            65001,
            EventKind::Update {
                direction: Direction::In,
                update: sample_update(),
            },
        );
        let value = event.to_json();
        assert_eq!(value["type"], "update");
        assert_eq!(value["direction"], "in");
        assert_eq!(value["neighbor"]["ip"], "127.0.0.2");
        let route = &value["announce"]["ipv4 unicast"]["10.0.0.0/24"];
        assert_eq!(route["origin"], "igp");
        assert_eq!(route["as-path"], json!([65000, 65001]));
        assert_eq!(route["next-hop"], "1.2.3.4");
        assert_eq!(route["community"], json!(["65000:1"]));
    }

    #[test]
    fn test_unknown_attribute_rendering() {
        let attrs = Attributes::new().with(PathAttribute::Unknown {
            flags: 0xc0,
            code: 0x63,
            value: vec![0xde, 0xad],
        });
        let value = render_attributes(&attrs);
        assert_eq!(value["attribute-0x63-0xc0"], "0xdead");
    }

    #[test]
    fn test_event_mask_filter() {
        let event = Event::new(
            "127.0.0.2".parse().unwrap(),
            65001,
            EventKind::Keepalive {
                direction: Direction::In,
            },
        );
        assert!(event.allowed(&EventMask::all()));
        let mut mask = EventMask::none();
        assert!(!event.allowed(&mask));
        mask.keepalive = true;
        assert!(event.allowed(&mask));
    }

    #[test]
    fn test_state_event_text() {
        let event = Event::new(
            "127.0.0.2".parse().unwrap(),
            65001,
            EventKind::State(FsmState::Established),
        );
        assert_eq!(event.to_text(), "neighbor 127.0.0.2 state established");
        assert_eq!(event.to_json()["state"], "established");
    }
}
