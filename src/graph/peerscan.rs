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

//! Peer scanner: backward traceroute from each subnet's eligible pivots,
//! looking for the nearest hop that denotes a neighborhood.

use std::time::Duration;

use rayon::prelude::*;

use crate::alias::AliasSet;
use crate::config::Config;
use crate::dict::{Dictionary, EntryType, RouteHop, RouteHopKind};
use crate::ipv4::Ipv4;
use crate::prober::Prober;
use crate::subnet::Subnet;

/// One (subnet, interface) peer-scan task.
struct Task {
    subnet_idx: usize,
    target: Ipv4,
    start_ttl: u8,
}

/// Build the round-robin task queue: up to `max_pivots` eligible interfaces
/// per subnet, interleaved subnet-by-subnet so successive probes target
/// different subnets rather than hammering one at a time.
fn build_queue(dict: &Dictionary, subnets: &[Subnet], max_pivots: usize) -> Vec<Task> {
    let mut per_subnet: Vec<Vec<Task>> = Vec::with_capacity(subnets.len());
    for (idx, subnet) in subnets.iter().enumerate() {
        let smallest_ttl = subnet
            .interfaces
            .iter()
            .filter_map(|i| dict.lookup(i.addr).and_then(|e| e.ttl))
            .min();
        if smallest_ttl.map(|t| t <= 1).unwrap_or(true) {
            per_subnet.push(Vec::new());
            continue;
        }
        let mut tasks = Vec::new();
        for iface in subnet.interfaces.iter().filter(|i| i.status.eligible_for_peer_discovery()) {
            if tasks.len() >= max_pivots {
                break;
            }
            let Some(entry) = dict.lookup(iface.addr) else { continue };
            let Some(ttl) = entry.ttl else { continue };
            let trail_len = entry.trail.anomalies().unwrap_or(0) as u8;
            let start_ttl = ttl.saturating_sub(1).saturating_sub(trail_len).max(1);
            tasks.push(Task {
                subnet_idx: idx,
                target: iface.addr,
                start_ttl,
            });
        }
        per_subnet.push(tasks);
    }

    let mut queue = Vec::new();
    let mut cursor = 0usize;
    loop {
        let mut any = false;
        for tasks in per_subnet.iter_mut() {
            if cursor < tasks.len() {
                any = true;
            }
        }
        if !any {
            break;
        }
        for tasks in per_subnet.iter_mut() {
            if cursor < tasks.len() {
                queue.push(std::mem::replace(
                    &mut tasks[cursor],
                    Task {
                        subnet_idx: usize::MAX,
                        target: Ipv4::ZERO,
                        start_ttl: 0,
                    },
                ));
            }
        }
        cursor += 1;
    }
    queue.retain(|t| t.subnet_idx != usize::MAX);
    queue
}

/// Walk `target` backward from `start_ttl` down to TTL 0, stopping at the
/// first hop that denotes a neighborhood and isn't the target / inside the
/// target's subnet / an alias of its trail-IP (the "peering point"), or at
/// TTL 0.
#[allow(clippy::too_many_arguments)]
fn walk_backward(
    prober: &dyn Prober,
    cfg: &Config,
    src: Ipv4,
    dict: &Dictionary,
    alias_set: &AliasSet,
    subnet: &Subnet,
    target: Ipv4,
    start_ttl: u8,
) -> (Vec<RouteHop>, Vec<(Ipv4, u8, u8)>) {
    let timeout = Duration::from_millis(cfg.probing_timeout_period as u64);
    let fixed_flow = cfg.probing_fixed_flow_paris;
    let trail_ip = dict.lookup(target).and_then(|e| e.trail.last_valid_ip());

    let mut hops = Vec::new();
    let mut discovered = Vec::new();
    let mut ttl = start_ttl;

    while ttl > 0 {
        let Ok(record) = prober.probe(src, target, ttl, timeout, fixed_flow, None) else {
            break;
        };
        let mut record = record;
        if record.reply_addr.is_zero() {
            let retry = prober.probe(src, target, ttl, timeout * 2, fixed_flow, None);
            if let Ok(r) = retry {
                record = r;
            }
        }

        if record.reply_addr.is_zero() {
            hops.push(RouteHop::anonymous(ttl));
            ttl -= 1;
            continue;
        }

        let hop_ip = record.reply_addr;
        discovered.push((hop_ip, ttl, record.reply_ttl));

        let denotes_neighborhood = dict.lookup(hop_ip).map(|e| e.denotes_neighborhood).unwrap_or(false);
        let is_target = hop_ip == target;
        let in_target_subnet = subnet.contains(hop_ip);
        let is_trail_alias = trail_ip.map(|t| alias_set.same_alias(hop_ip, t) || hop_ip == t).unwrap_or(false);

        if denotes_neighborhood && !is_target && !in_target_subnet && !is_trail_alias {
            hops.push(RouteHop::valid(RouteHopKind::PeeringPoint, hop_ip, ttl, record.reply_ttl));
            break;
        }

        hops.push(RouteHop::valid(RouteHopKind::ViaTraceroute, hop_ip, ttl, record.reply_ttl));
        ttl -= 1;
    }

    hops.reverse();
    (hops, discovered)
}

/// Run peer scanning for every subnet: populate `partial_routes` on each
/// eligible interface and create/update dictionary entries for every valid
/// hop encountered.
pub fn peerscan(
    dict: &mut Dictionary,
    cfg: &Config,
    prober: &dyn Prober,
    alias_set: &AliasSet,
    src: Ipv4,
    subnets: &mut [Subnet],
) {
    let queue = build_queue(dict, subnets, cfg.peer_discovery_max_pivots as usize);
    let delay = Duration::from_millis(cfg.probing_regulating_delay as u64);

    let workers = (cfg.concurrency_max_threads as usize).max(1).min(queue.len().max(1));
    let chunk_size = queue.len().div_ceil(workers).max(1);
    let index_slices: Vec<Vec<usize>> = (0..queue.len())
        .collect::<Vec<_>>()
        .chunks(chunk_size)
        .map(|c| c.to_vec())
        .collect();

    let results: Vec<(usize, Ipv4, Vec<RouteHop>, Vec<(Ipv4, u8, u8)>)> = index_slices
        .into_par_iter()
        .flat_map(|indices| {
            let mut out = Vec::with_capacity(indices.len());
            for idx in indices {
                let task = &queue[idx];
                let subnet = &subnets[task.subnet_idx];
                let (hops, discovered) =
                    walk_backward(prober, cfg, src, dict, alias_set, subnet, task.target, task.start_ttl);
                out.push((task.subnet_idx, task.target, hops, discovered));
                std::thread::sleep(delay);
            }
            out
        })
        .collect();

    for (subnet_idx, target, hops, discovered) in results {
        for (ip, ttl, reply_ttl) in discovered {
            let entry = dict.get_or_create(ip, EntryType::SeenInTraceroute);
            entry.observe_ttl(ttl);
            let inferred = crate::dict::InitialTtl::from_reply_ttl(reply_ttl, ttl);
            entry.inferred_initial_ttl = entry.inferred_initial_ttl.merge(inferred);
        }
        subnets[subnet_idx].partial_routes.insert(target, hops);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::EntryType;
    use crate::prober::MockProber;
    use crate::subnet::{InterfaceStatus, SubnetInterface};

    fn make_subnet(pivot: Ipv4) -> Subnet {
        let mut s = Subnet::new(pivot);
        s.interfaces = vec![SubnetInterface {
            addr: pivot,
            status: InterfaceStatus::SelectedPivot,
        }];
        s
    }

    #[test]
    fn queue_skips_ttl_one_subnets() {
        let mut dict = Dictionary::new();
        let pivot = Ipv4::from_octets(10, 0, 0, 1);
        dict.create(pivot, EntryType::ScannedOk).unwrap().ttl = Some(1);
        let subnets = vec![make_subnet(pivot)];
        let queue = build_queue(&dict, &subnets, 4);
        assert!(queue.is_empty());
    }

    #[test]
    fn queue_includes_eligible_pivot() {
        let mut dict = Dictionary::new();
        let pivot = Ipv4::from_octets(10, 0, 0, 1);
        dict.create(pivot, EntryType::ScannedOk).unwrap().ttl = Some(4);
        let subnets = vec![make_subnet(pivot)];
        let queue = build_queue(&dict, &subnets, 4);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].target, pivot);
    }

    #[test]
    fn peerscan_records_no_hops_when_unresponsive() {
        let mut dict = Dictionary::new();
        let pivot = Ipv4::from_octets(10, 0, 0, 1);
        dict.create(pivot, EntryType::ScannedOk).unwrap().ttl = Some(3);
        let mut subnets = vec![make_subnet(pivot)];
        let cfg = Config::default();
        let prober = MockProber::new();
        let alias_set = AliasSet::default();
        peerscan(&mut dict, &cfg, &prober, &alias_set, Ipv4::from_octets(10, 0, 0, 254), &mut subnets);
        assert!(subnets[0].partial_routes.contains_key(&pivot));
    }
}
