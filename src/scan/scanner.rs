// topoprobe: Active IPv4 network topology discovery
// Copyright (C) 2026 the topoprobe contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! The scanner: neighbor-amortized distance estimation plus trail
//! derivation from the recorded partial route.

use std::time::Duration;

use rayon::prelude::*;

use crate::config::Config;
use crate::dict::{Dictionary, EntryType, RouteHop, RouteHopKind, Trail};
use crate::ipv4::Ipv4;
use crate::prober::Prober;

/// Probe `dst` at TTLs walking away from `start_ttl` until a target reply is
/// seen, recording every intermediate hop into `route` (0-indexed by
/// `request_ttl - 1`). Returns the minimal TTL that reached the target.
fn estimate_distance(
    prober: &dyn Prober,
    src: Ipv4,
    dst: Ipv4,
    start_ttl: u8,
    timeout: Duration,
    fixed_flow: bool,
    route: &mut Vec<RouteHop>,
) -> Option<u8> {
    let mut ttl = start_ttl.max(1);
    loop {
        let record = prober.probe(src, dst, ttl, timeout, fixed_flow, None).ok()?;
        record_hop(route, ttl, &record);
        if record.answered_by_target() {
            return Some(ttl);
        }
        if ttl >= 255 {
            return None;
        }
        ttl += 1;
    }
}

fn record_hop(route: &mut Vec<RouteHop>, ttl: u8, record: &crate::prober::ProbeRecord) {
    let idx = (ttl - 1) as usize;
    if route.len() <= idx {
        route.resize_with(idx + 1, RouteHop::unmeasured);
    }
    route[idx] = if record.reply_addr.is_zero() {
        RouteHop::anonymous(ttl)
    } else {
        RouteHop::valid(RouteHopKind::ViaTraceroute, record.reply_addr, ttl, record.reply_ttl)
    };
}

/// Re-confirm the minimal TTL by decrementing from `estimated - 1` until the
/// target no longer answers.
fn confirm_minimum(
    prober: &dyn Prober,
    src: Ipv4,
    dst: Ipv4,
    mut ttl: u8,
    timeout: Duration,
    fixed_flow: bool,
    route: &mut Vec<RouteHop>,
) -> u8 {
    while ttl > 1 {
        let probe_ttl = ttl - 1;
        let Ok(record) = prober.probe(src, dst, probe_ttl, timeout, fixed_flow, None) else {
            break;
        };
        record_hop(route, probe_ttl, &record);
        if !record.answered_by_target() {
            break;
        }
        ttl = probe_ttl;
    }
    ttl
}

/// Derive a `Trail` from a target's recorded route: scan backward from the
/// hop just before the target, collapse a run of identical IPs (a cycle),
/// then require everything before that run to be settled.
pub fn derive_trail(route: &[RouteHop], ttl: u8) -> Trail {
    if ttl < 2 {
        return Trail::Void;
    }
    let scan_from = (ttl - 2) as usize;
    if scan_from >= route.len() {
        return Trail::Void;
    }

    let mut k = scan_from as isize;
    while k >= 0 && !route[k as usize].is_valid() {
        k -= 1;
    }
    let Ok(k) = usize::try_from(k) else {
        return if route[..=scan_from].iter().all(|h| matches!(h.kind, RouteHopKind::Anonymous)) {
            Trail::AllAnonymous {
                length: (ttl - 1) as u16,
            }
        } else {
            Trail::Void
        };
    };

    let last_valid_ip = route[k].ip.expect("validated above");
    let mut j = k;
    while j > 0 && route[j - 1].ip == Some(last_valid_ip) {
        j -= 1;
    }
    if route[..j].iter().any(|h| !h.is_settled()) {
        return Trail::Void;
    }

    let anomalies = (scan_from - j) as u16;
    Trail::Valid {
        last_valid_ip,
        anomalies,
        reply_ttl: route[j].reply_ttl,
        request_ttl: (j + 1) as u8,
    }
}

/// Run distance estimation and trail derivation for every responsive IP in
/// `dict`, amortizing probes across consecutive addresses.
pub fn scan(dict: &mut Dictionary, cfg: &Config, prober: &dyn Prober, src: Ipv4) {
    let responsive: Vec<Ipv4> = dict
        .iter()
        .filter(|e| e.entry_type == EntryType::ResponsiveTarget)
        .map(|e| e.addr)
        .collect();

    let slices = super::partition_into_slices(&responsive, cfg.concurrency_max_threads as usize);
    let timeout = Duration::from_millis(cfg.probing_timeout_period as u64);
    let fixed_flow = cfg.probing_fixed_flow_paris;

    let results: Vec<(Ipv4, u8, Vec<RouteHop>)> = slices
        .into_par_iter()
        .flat_map(|slice| {
            let mut out = Vec::with_capacity(slice.len());
            let mut next_start_ttl = cfg.scanning_start_ttl;
            for &dst in &slice {
                let mut route = Vec::new();
                let Some(found_ttl) =
                    estimate_distance(prober, src, dst, next_start_ttl, timeout, fixed_flow, &mut route)
                else {
                    continue;
                };
                let confirmed_ttl = if next_start_ttl > 0 && found_ttl > 1 {
                    confirm_minimum(prober, src, dst, found_ttl, timeout, fixed_flow, &mut route)
                } else {
                    found_ttl
                };
                next_start_ttl = confirmed_ttl.saturating_sub(1).max(1);
                out.push((dst, confirmed_ttl, route));
            }
            out
        })
        .collect();

    for (addr, ttl, route) in results {
        let entry = dict.get_or_create(addr, EntryType::ResponsiveTarget);
        entry.observe_ttl(ttl);
        entry.route = route;
        entry.trail = derive_trail(&entry.route, ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::RouteHopKind;

    #[test]
    fn trail_with_single_anomaly() {
        let a = Ipv4::from_octets(10, 0, 0, 1);
        let b = Ipv4::from_octets(10, 0, 0, 2);
        let c = Ipv4::from_octets(10, 0, 0, 3);
        let route = vec![
            RouteHop::valid(RouteHopKind::ViaTraceroute, a, 1, 10),
            RouteHop::valid(RouteHopKind::ViaTraceroute, b, 2, 10),
            RouteHop::valid(RouteHopKind::ViaTraceroute, c, 3, 10),
            RouteHop::anonymous(4),
        ];
        let trail = derive_trail(&route, 5);
        assert_eq!(trail.last_valid_ip(), Some(c));
        assert_eq!(trail.anomalies(), Some(1));
        assert!(!trail.is_direct());
    }

    #[test]
    fn trail_direct_when_last_hop_valid() {
        let a = Ipv4::from_octets(10, 0, 0, 1);
        let route = vec![RouteHop::valid(RouteHopKind::ViaTraceroute, a, 1, 10)];
        let trail = derive_trail(&route, 2);
        assert_eq!(trail.last_valid_ip(), Some(a));
        assert_eq!(trail.anomalies(), Some(0));
        assert!(trail.is_direct());
    }

    #[test]
    fn trail_all_anonymous() {
        let route = vec![RouteHop::anonymous(1), RouteHop::anonymous(2)];
        let trail = derive_trail(&route, 3);
        assert_eq!(trail, Trail::AllAnonymous { length: 2 });
    }

    #[test]
    fn trail_collapses_repeated_cycle_hop() {
        let a = Ipv4::from_octets(10, 0, 0, 1);
        let b = Ipv4::from_octets(10, 0, 0, 2);
        let route = vec![
            RouteHop::valid(RouteHopKind::ViaTraceroute, a, 1, 10),
            RouteHop::valid(RouteHopKind::ViaTraceroute, b, 2, 10),
            RouteHop::valid(RouteHopKind::ViaTraceroute, b, 3, 10),
            RouteHop::anonymous(4),
        ];
        let trail = derive_trail(&route, 5);
        assert_eq!(trail.last_valid_ip(), Some(b));
        assert_eq!(trail.anomalies(), Some(2));
    }
}
