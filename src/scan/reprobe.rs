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

//! Reprobing pass: re-measure entries whose trail is still suspect,
//! rebalancing the work across exactly `MaxThreads` lists.

use std::time::Duration;

use rayon::prelude::*;

use crate::config::Config;
use crate::dict::{Dictionary, EntryType};
use crate::ipv4::Ipv4;
use crate::prober::Prober;

use super::scanner::derive_trail;

/// An entry's trail still needs reprobing if it is void with a known TTL,
/// echoing, or has a non-zero anomaly count.
fn is_bad_trail(entry: &crate::dict::IpEntry) -> bool {
    if entry.ttl.is_none() {
        return false;
    }
    if entry.trail.is_void() {
        return true;
    }
    if entry.is_echoing {
        return true;
    }
    entry.trail.anomalies().unwrap_or(0) > 0
}

/// Group `ips` by TTL, then split or merge groups until exactly
/// `max_threads` lists remain.
fn rebalance(dict: &Dictionary, ips: Vec<Ipv4>, max_threads: usize, split_threshold: u32) -> Vec<Vec<Ipv4>> {
    use std::collections::BTreeMap;
    let mut by_ttl: BTreeMap<u8, Vec<Ipv4>> = BTreeMap::new();
    for ip in ips {
        let ttl = dict.lookup(ip).and_then(|e| e.ttl).unwrap_or(0);
        by_ttl.entry(ttl).or_default().push(ip);
    }
    for list in by_ttl.values_mut() {
        list.sort();
    }
    let mut lists: Vec<Vec<Ipv4>> = by_ttl.into_values().collect();

    while lists.len() < max_threads {
        let Some((idx, list)) = lists
            .iter()
            .enumerate()
            .filter(|(_, l)| l.len() >= 2)
            .max_by_key(|(_, l)| {
                let mid = l.len() / 2;
                l[mid].wrapping_sub(l[mid - 1])
            })
        else {
            break;
        };
        let mid = list.len() / 2;
        let gap = list[mid].wrapping_sub(list[mid - 1]);
        if gap <= split_threshold {
            break;
        }
        let mut list = lists.remove(idx);
        let tail = list.split_off(mid);
        lists.push(list);
        lists.push(tail);
    }

    while lists.len() > max_threads.max(1) {
        lists.sort_by_key(|l| l.len());
        let smallest = lists.remove(0);
        if lists.is_empty() {
            lists.push(smallest);
            break;
        }
        lists[0].extend(smallest);
        lists[0].sort();
    }

    lists
}

/// Run up to `scanning_number_of_reprobing` rounds, reprobing every entry
/// whose trail still looks suspect, stopping early once none remain.
pub fn reprobe(dict: &mut Dictionary, cfg: &Config, prober: &dyn Prober, src: Ipv4) {
    let timeout = Duration::from_millis(cfg.probing_timeout_period as u64);
    let fixed_flow = cfg.probing_fixed_flow_paris;

    for _round in 0..cfg.scanning_number_of_reprobing {
        let bad: Vec<Ipv4> = dict
            .iter()
            .filter(|e| e.entry_type == EntryType::ScannedOk || e.entry_type == EntryType::ResponsiveTarget)
            .filter(|e| is_bad_trail(e))
            .map(|e| e.addr)
            .collect();
        if bad.is_empty() {
            break;
        }

        let lists = rebalance(
            dict,
            bad,
            cfg.concurrency_max_threads as usize,
            cfg.scanning_target_list_split_threshold,
        );

        let updates: Vec<(Ipv4, u8, Vec<crate::dict::RouteHop>)> = lists
            .into_par_iter()
            .flat_map(|list| {
                list.into_iter()
                    .filter_map(|ip| {
                        let ttl = dict.lookup(ip)?.ttl?;
                        let record = prober.probe(src, ip, ttl.saturating_sub(1).max(1), timeout, fixed_flow, None).ok()?;
                        let mut route = dict.lookup(ip)?.route.clone();
                        let idx = (ttl.saturating_sub(2)) as usize;
                        if route.len() <= idx {
                            route.resize_with(idx + 1, crate::dict::RouteHop::unmeasured);
                        }
                        route[idx] = if record.reply_addr.is_zero() {
                            crate::dict::RouteHop::anonymous(ttl - 1)
                        } else {
                            crate::dict::RouteHop::valid(
                                crate::dict::RouteHopKind::ViaTraceroute,
                                record.reply_addr,
                                ttl - 1,
                                record.reply_ttl,
                            )
                        };
                        Some((ip, ttl, route))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        for (ip, ttl, route) in updates {
            if let Some(entry) = dict.lookup_mut(ip) {
                entry.route = route;
                entry.trail = derive_trail(&entry.route, ttl);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::EntryType;

    #[test]
    fn rebalance_respects_thread_count() {
        let mut dict = Dictionary::new();
        let mut ips = Vec::new();
        for i in 0..20u32 {
            let ip = Ipv4(0x0A00_0000 + i);
            dict.create(ip, EntryType::ScannedOk).unwrap().ttl = Some((i % 3) as u8 + 1);
            ips.push(ip);
        }
        let lists = rebalance(&dict, ips, 4, 256);
        assert!(lists.len() <= 4);
        assert!(!lists.is_empty());
    }
}
