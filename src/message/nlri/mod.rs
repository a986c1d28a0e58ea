pub mod bgpls;
pub mod evpn;
pub mod flowspec;
pub mod l2vpn;
pub mod mup;
pub mod mvpn;
pub mod prefix;
pub mod qualifiers;

pub use bgpls::BgpLsNlri;
pub use evpn::{EvpnNlri, EvpnRoute};
pub use flowspec::{FlowBuilder, FlowComponent, FlowNlri, FlowOp};
pub use l2vpn::{RtcNlri, VplsNlri};
pub use mup::{MupNlri, MupRoute};
pub use mvpn::{MvpnNlri, MvpnRoute};
pub use prefix::{LabeledNlri, Prefix, PrefixNlri, VpnNlri};

use std::fmt;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use super::context::OpenContext;
use super::error::{WireError, WireResult};
use super::family::{Afi, Family, Safi};

/// One route's identity on the wire. Every variant carries its canonical
/// packed bytes, computed once at construction, so re-emitting a route to
/// another peer with matching capabilities copies bytes instead of encoding.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Nlri {
    Unicast(PrefixNlri),
    Multicast(PrefixNlri),
    Labeled(LabeledNlri),
    Vpn(VpnNlri),
    Flow(FlowNlri),
    Evpn(EvpnNlri),
    BgpLs(BgpLsNlri),
    Vpls(VplsNlri),
    Rtc(RtcNlri),
    Mvpn(Afi, MvpnNlri),
    Mup(MupNlri),
}

impl Nlri {
    pub fn family(&self) -> Family {
        match self {
            Nlri::Unicast(p) => Family::new(p.prefix.afi, Safi::Unicast),
            Nlri::Multicast(p) => Family::new(p.prefix.afi, Safi::Multicast),
            Nlri::Labeled(l) => Family::new(l.prefix.afi, Safi::Mpls),
            Nlri::Vpn(v) => Family::new(v.prefix.afi, Safi::MplsVpn),
            Nlri::Flow(f) => f.family,
            Nlri::Evpn(_) => Family::L2VPN_EVPN,
            Nlri::BgpLs(b) => {
                if b.rd.is_some() {
                    Family::new(Afi::BgpLs, Safi::BgpLsVpn)
                } else {
                    Family::new(Afi::BgpLs, Safi::BgpLs)
                }
            }
            Nlri::Vpls(_) => Family::L2VPN_VPLS,
            Nlri::Rtc(_) => Family::new(Afi::Ipv4, Safi::Rtc),
            Nlri::Mvpn(afi, _) => Family::new(*afi, Safi::McastVpn),
            Nlri::Mup(m) => Family::new(m.afi, Safi::Mup),
        }
    }

    /// The ADD-PATH identifier, when one was negotiated or requested
    pub fn path_id(&self) -> Option<u32> {
        match self {
            Nlri::Unicast(p) | Nlri::Multicast(p) => p.path_id,
            Nlri::Labeled(l) => l.path_id,
            Nlri::Vpn(v) => v.path_id,
            Nlri::Evpn(e) => e.path_id,
            _ => None,
        }
    }

    /// Canonical packed wire bytes, without any ADD-PATH header
    pub fn packed(&self) -> &[u8] {
        match self {
            Nlri::Unicast(p) | Nlri::Multicast(p) => p.packed(),
            Nlri::Labeled(l) => l.packed(),
            Nlri::Vpn(v) => v.packed(),
            Nlri::Flow(f) => f.packed(),
            Nlri::Evpn(e) => e.packed(),
            Nlri::BgpLs(b) => b.packed(),
            Nlri::Vpls(v) => v.packed(),
            Nlri::Rtc(r) => r.packed(),
            Nlri::Mvpn(_, m) => m.packed(),
            Nlri::Mup(m) => m.packed(),
        }
    }

    /// Canonical map key: family prefix, then the path identifier when one
    /// exists (two paths to the same prefix are distinct routes), then the
    /// packed bytes. Stable across the object's lifetime.
    pub fn index(&self) -> Vec<u8> {
        let packed = self.packed();
        let mut index = Vec::with_capacity(7 + packed.len());
        index.extend_from_slice(&self.family().index_prefix());
        if let Some(path_id) = self.path_id() {
            index.extend_from_slice(&path_id.to_be_bytes());
        }
        index.extend_from_slice(packed);
        index
    }

    /// Wire bytes for a specific target session. No arithmetic beyond the
    /// ADD-PATH header decision happens here.
    pub fn pack(&self, ctx: &OpenContext, buf: &mut Vec<u8>) {
        if ctx.addpath_send {
            buf.extend_from_slice(&self.path_id().unwrap_or(0).to_be_bytes());
        }
        buf.extend_from_slice(self.packed());
    }

    /// Encoded size under the given context, for message budgeting
    pub fn packed_len(&self, ctx: &OpenContext) -> usize {
        self.packed().len() + if ctx.addpath_send { 4 } else { 0 }
    }

    /// Decode one NLRI of `family` from the stream. `add_path` reflects the
    /// session's negotiated receive direction for that family.
    pub fn parse(
        family: Family,
        add_path: bool,
        cur: &mut Cursor<&[u8]>,
    ) -> WireResult<Nlri> {
        let path_id = if add_path && supports_add_path(family) {
            Some(
                cur.read_u32::<BigEndian>()
                    .map_err(|_| WireError::nlri(vec![]))?,
            )
        } else {
            None
        };
        match (family.afi, family.safi) {
            (Afi::Ipv4, Safi::Unicast) | (Afi::Ipv6, Safi::Unicast) => Ok(Nlri::Unicast(
                PrefixNlri::parse(cur, family.afi, path_id)?,
            )),
            (Afi::Ipv4, Safi::Multicast) | (Afi::Ipv6, Safi::Multicast) => Ok(Nlri::Multicast(
                PrefixNlri::parse(cur, family.afi, path_id)?,
            )),
            (Afi::Ipv4, Safi::Mpls) | (Afi::Ipv6, Safi::Mpls) => Ok(Nlri::Labeled(
                LabeledNlri::parse(cur, family.afi, path_id)?,
            )),
            (Afi::Ipv4, Safi::MplsVpn) | (Afi::Ipv6, Safi::MplsVpn) => {
                Ok(Nlri::Vpn(VpnNlri::parse(cur, family.afi, path_id)?))
            }
            (Afi::Ipv4, Safi::Flow)
            | (Afi::Ipv6, Safi::Flow)
            | (Afi::Ipv4, Safi::FlowVpn)
            | (Afi::Ipv6, Safi::FlowVpn) => Ok(Nlri::Flow(FlowNlri::parse(cur, family)?)),
            (Afi::L2vpn, Safi::Evpn) => Ok(Nlri::Evpn(EvpnNlri::parse(cur, path_id)?)),
            (Afi::L2vpn, Safi::Vpls) => Ok(Nlri::Vpls(VplsNlri::parse(cur)?)),
            (Afi::Ipv4, Safi::Rtc) => Ok(Nlri::Rtc(RtcNlri::parse(cur)?)),
            (Afi::Ipv4, Safi::McastVpn) | (Afi::Ipv6, Safi::McastVpn) => {
                Ok(Nlri::Mvpn(family.afi, MvpnNlri::parse(cur)?))
            }
            (Afi::Ipv4, Safi::Mup) | (Afi::Ipv6, Safi::Mup) => {
                Ok(Nlri::Mup(MupNlri::parse(cur, family.afi)?))
            }
            (Afi::BgpLs, Safi::BgpLs) => Ok(Nlri::BgpLs(BgpLsNlri::parse(cur, false)?)),
            (Afi::BgpLs, Safi::BgpLsVpn) => Ok(Nlri::BgpLs(BgpLsNlri::parse(cur, true)?)),
            _ => Err(WireError::nlri(family.index_prefix().to_vec())),
        }
    }

    /// Decode a run of NLRIs until the slice is exhausted
    pub fn parse_all(family: Family, add_path: bool, buf: &[u8]) -> WireResult<Vec<Nlri>> {
        let mut cur = Cursor::new(buf);
        let mut nlris = Vec::with_capacity(4);
        while (cur.position() as usize) < buf.len() {
            nlris.push(Nlri::parse(family, add_path, &mut cur)?);
        }
        Ok(nlris)
    }
}

/// The families this speaker will honor an ADD-PATH identifier on
fn supports_add_path(family: Family) -> bool {
    matches!(
        family.safi,
        Safi::Unicast | Safi::Multicast | Safi::Mpls | Safi::MplsVpn | Safi::Evpn
    )
}

impl fmt::Display for Nlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Nlri::Unicast(p) | Nlri::Multicast(p) => write!(f, "{}", p),
            Nlri::Labeled(l) => write!(f, "{}", l),
            Nlri::Vpn(v) => write!(f, "{}", v),
            Nlri::Flow(flow) => write!(f, "{}", flow),
            Nlri::Evpn(e) => write!(f, "{}", e),
            Nlri::BgpLs(b) => write!(f, "{}", b),
            Nlri::Vpls(v) => write!(f, "{}", v),
            Nlri::Rtc(r) => write!(f, "{}", r),
            Nlri::Mvpn(_, m) => write!(f, "{}", m),
            Nlri::Mup(m) => write!(f, "{}", m),
        }
    }
}
