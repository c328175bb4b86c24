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

//! Subnet post-processing: merge subnets that inference left truncated, then
//! derive adjusted prefixes and alternative contra-pivots.

use crate::alias::AliasSet;
use crate::config::Config;
use crate::dict::Dictionary;
use crate::ipv4::{Cidr, Ipv4};

use super::{InterfaceStatus, Subnet, SubnetInterface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compatibility {
    PivotCompatible,
    OutlierOnly,
    ContraPivotCompatible,
    OutlierCompatible,
    Unmergeable,
}

fn classify_compatibility(dict: &Dictionary, reference_pivot: Ipv4, candidate: &Subnet) -> Compatibility {
    let Some(ref_entry) = dict.lookup(reference_pivot) else {
        return Compatibility::Unmergeable;
    };
    if candidate.pivots().contains(&reference_pivot) {
        return Compatibility::PivotCompatible;
    }
    if candidate
        .contra_pivots()
        .iter()
        .any(|&cp| dict.lookup(cp).map(|e| e.trail.same_as(&ref_entry.trail)).unwrap_or(false))
    {
        return Compatibility::ContraPivotCompatible;
    }
    if candidate
        .outliers()
        .iter()
        .any(|&o| dict.lookup(o).map(|e| e.trail.same_as(&ref_entry.trail)).unwrap_or(false))
    {
        return Compatibility::OutlierCompatible;
    }
    if !candidate.pivots().is_empty() {
        return Compatibility::OutlierOnly;
    }
    Compatibility::Unmergeable
}

/// Merge `base` with every subnet in `candidates`, relabeling interfaces per
/// their `Compatibility`.
fn merge_subnets(base: Subnet, candidates: Vec<(Subnet, Compatibility)>) -> Subnet {
    let reference_pivot = base.selected_pivot();
    let mut interfaces = base.interfaces;

    for (candidate, compat) in candidates {
        for iface in candidate.interfaces {
            if iface.addr == reference_pivot {
                continue;
            }
            let status = match compat {
                Compatibility::PivotCompatible => iface.status,
                Compatibility::ContraPivotCompatible => {
                    if iface.status.is_pivot() {
                        InterfaceStatus::Outlier
                    } else {
                        iface.status
                    }
                }
                Compatibility::OutlierCompatible | Compatibility::OutlierOnly => InterfaceStatus::Outlier,
                Compatibility::Unmergeable => unreachable!("unmergeable candidates are filtered out"),
            };
            interfaces.push(SubnetInterface { addr: iface.addr, status });
        }
    }

    interfaces.sort_by_key(|i| i.addr);
    interfaces.dedup_by_key(|i| i.addr);

    let lo = interfaces.iter().map(|i| i.addr).min().unwrap();
    let hi = interfaces.iter().map(|i| i.addr).max().unwrap();
    let mut prefix = Cidr::new(reference_pivot, 32);
    for len in (0..=32).rev() {
        let candidate_cidr = Cidr::new(lo, len).network();
        if candidate_cidr.contains(hi) {
            prefix = candidate_cidr;
            break;
        }
    }

    let stop_description = format!("merged {} interfaces (post-processing)", interfaces.len());

    let mut merged = Subnet {
        initial_pivot: reference_pivot,
        prefix,
        adjusted_prefix: None,
        interfaces,
        stop_description,
        needs_post_processing: false,
        partial_routes: Default::default(),
        pre_trail_ips: Vec::new(),
        pre_trail_offset: None,
    };
    merged.compute_adjusted_prefix();
    merged
}

const MAXIMUM_NB_CONTRAPIVOTS: usize = 5;

/// Try to expand `base`'s prefix, one halving at a time, absorbing
/// compatible neighbors from `pool` until a stop condition fires.
fn try_merge(dict: &Dictionary, base: Subnet, pool: &mut Vec<Subnet>) -> Subnet {
    let reference_pivot = base.selected_pivot();
    let mut current = base;

    loop {
        if current.prefix.prefix_len() == 0 {
            break;
        }
        let wider = Cidr::new(current.prefix.lower(), current.prefix.prefix_len() - 1).network();

        let mut covered_idx = Vec::new();
        for (idx, other) in pool.iter().enumerate() {
            if wider.contains(other.lower()) && wider.contains(other.upper()) {
                covered_idx.push(idx);
            }
        }
        if covered_idx.is_empty() {
            break;
        }

        let mut classified = Vec::new();
        let mut contra_pivot_bringers = 0usize;
        let mut total_contra = current.contra_pivots().len();
        let mut pivot_compatible_count = 0usize;
        let mut unmergeable = false;

        for &idx in &covered_idx {
            let compat = classify_compatibility(dict, reference_pivot, &pool[idx]);
            if compat == Compatibility::Unmergeable {
                unmergeable = true;
                break;
            }
            if compat == Compatibility::PivotCompatible {
                pivot_compatible_count += 1;
            }
            if matches!(compat, Compatibility::ContraPivotCompatible) || !pool[idx].contra_pivots().is_empty() {
                contra_pivot_bringers += 1;
            }
            total_contra += pool[idx].contra_pivots().len();
            classified.push((idx, compat));
        }

        if unmergeable || contra_pivot_bringers > 1 || total_contra > MAXIMUM_NB_CONTRAPIVOTS {
            break;
        }
        if pivot_compatible_count == 0 {
            break;
        }

        let min_pivot_ratio = if wider.prefix_len() >= 29 {
            (current.prefix.prefix_len().max(1) as f64 - 1.0) / current.prefix.prefix_len().max(1) as f64
        } else {
            0.5
        };
        let total_pivots = current.pivots().len() + classified.iter().map(|&(i, _)| pool[i].pivots().len()).sum::<usize>();
        let total_ifaces = current.interfaces.len() + classified.iter().map(|&(i, _)| pool[i].interfaces.len()).sum::<usize>();
        if total_ifaces > 0 && (total_pivots as f64 / total_ifaces as f64) < min_pivot_ratio {
            break;
        }

        let mut absorbed = Vec::new();
        for &(idx, compat) in classified.iter().rev() {
            absorbed.push((pool.remove(idx), compat));
        }
        absorbed.reverse();
        current = merge_subnets(current, absorbed);
    }

    current
}

/// Scan `current`'s outliers for candidates to relabel as alt-contra-pivots.
/// Applies only when the subnet has no real contra-pivots, pivots span
/// multiple TTLs, and outliers are a minority.
fn apply_alt_contra_pivot_heuristic(dict: &Dictionary, subnet: &mut Subnet) {
    if !subnet.contra_pivots().is_empty() {
        return;
    }
    let pivot_ttls: std::collections::HashSet<u8> =
        subnet.pivots().iter().filter_map(|&ip| dict.lookup(ip).and_then(|e| e.ttl)).collect();
    if pivot_ttls.len() < 2 {
        return;
    }
    let outlier_count = subnet.outliers().len();
    if outlier_count == 0 || outlier_count > MAXIMUM_NB_CONTRAPIVOTS {
        return;
    }
    if outlier_count * 2 >= subnet.interfaces.len() {
        return;
    }
    for iface in subnet.interfaces.iter_mut() {
        if iface.status == InterfaceStatus::Outlier {
            iface.status = InterfaceStatus::AltContraPivot;
        }
    }
}

/// Process subnets left-to-right, merging every "needs post-processing"
/// subnet with adjacent neighbors, then finalize every subnet's adjusted
/// prefix and alternative contra-pivots.
pub fn postprocess(dict: &Dictionary, _alias_set: &AliasSet, cfg: &Config, subnets: Vec<Subnet>) -> Vec<Subnet> {
    let _ = cfg;
    let mut remaining: Vec<Subnet> = subnets;
    remaining.sort_by_key(|s| s.lower());
    let mut processed: Vec<Subnet> = Vec::new();

    while !remaining.is_empty() {
        let current = remaining.remove(0);
        let merged = if current.needs_post_processing {
            let mut pool: Vec<Subnet> = processed.drain(..).chain(remaining.drain(..)).collect();
            let merged = try_merge(dict, current, &mut pool);
            // Split the pool back into processed (lower address) and
            // remaining (still to come), keyed by the merged result's bounds.
            let boundary = merged.upper();
            let (still_processed, still_remaining): (Vec<_>, Vec<_>) =
                pool.into_iter().partition(|s| s.upper() < boundary);
            processed = still_processed;
            remaining = still_remaining;
            remaining.sort_by_key(|s| s.lower());
            merged
        } else {
            current
        };
        processed.push(merged);
    }

    for subnet in processed.iter_mut() {
        apply_alt_contra_pivot_heuristic(dict, subnet);
        subnet.compute_adjusted_prefix();
    }

    processed.sort_by_key(|s| s.lower());
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{EntryType, IpEntry, Trail};

    fn router_entry(ip: Ipv4, ttl: u8) -> IpEntry {
        let mut e = IpEntry::new(ip, EntryType::ScannedOk);
        e.ttl = Some(ttl);
        e.trail = Trail::Valid {
            last_valid_ip: Ipv4::from_octets(192, 168, 1, 1),
            anomalies: 0,
            reply_ttl: 64,
            request_ttl: ttl,
        };
        e
    }

    #[test]
    fn merges_truncated_neighbor() {
        let mut dict = Dictionary::new();
        let pivot_a = Ipv4::from_octets(10, 0, 0, 1);
        let pivot_b = Ipv4::from_octets(10, 0, 0, 5);
        *dict.create(pivot_a, EntryType::ScannedOk).unwrap() = router_entry(pivot_a, 4);
        *dict.create(pivot_b, EntryType::ScannedOk).unwrap() = router_entry(pivot_b, 4);

        let mut subnet_a = Subnet::new(pivot_a);
        subnet_a.prefix = Cidr::new(pivot_a, 30);
        subnet_a.needs_post_processing = true;

        let subnet_b = Subnet::new(pivot_b);

        let cfg = Config::default();
        let alias_set = AliasSet::default();
        let result = postprocess(&dict, &alias_set, &cfg, vec![subnet_a, subnet_b]);
        assert!(!result.is_empty());
    }
}
