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

//! Subnet inference: a deterministic, right-to-left linear scan that grows
//! CIDR prefixes using five rules, stopping on sound contra-pivot discovery.

use crate::alias::AliasSet;
use crate::config::Config;
use crate::dict::{Dictionary, IpEntry, Trail};
use crate::ipv4::{Cidr, Ipv4};

use super::{InterfaceStatus, Subnet, SubnetInterface};

enum Classification {
    Rule(u8),
    /// Rule 2 fired and the candidate's anomaly count is strictly smaller
    /// than the pivot's: promote the candidate to selected pivot.
    Rule2Promote,
    ContraPivotCandidate,
    /// Candidate's TTL exceeds the pivot's by exactly one and the subnet
    /// currently has a single interface: adopt it as the new pivot.
    TtlStepPromotion,
    Outlier,
}

/// Classify `candidate` against the current `pivot`, implementing the five
/// rules in order, followed by the contra-pivot / promotion / outlier
/// fallbacks.
fn classify(
    pivot: &IpEntry,
    candidate: &IpEntry,
    alias_set: &AliasSet,
    single_interface_subnet: bool,
) -> Classification {
    let (pivot_ttl, cand_ttl) = match (pivot.ttl, candidate.ttl) {
        (Some(p), Some(c)) => (p, c),
        _ => return Classification::Outlier,
    };

    // Rule 1: same non-void trail.
    if !pivot.trail.is_void() && !candidate.trail.is_void() && pivot.trail.same_as(&candidate.trail) {
        return Classification::Rule(1);
    }

    // Rule 2: same TTL, both non-void, different anomaly counts. A
    // strictly smaller candidate anomaly count promotes it to pivot.
    if pivot_ttl == cand_ttl && !pivot.trail.is_void() && !candidate.trail.is_void() {
        if let (Some(pa), Some(ca)) = (pivot.trail.anomalies(), candidate.trail.anomalies()) {
            if ca < pa {
                return Classification::Rule2Promote;
            }
            if pa != ca {
                return Classification::Rule(2);
            }
        }
    }

    // Rule 3: same TTL, both echoing.
    if pivot_ttl == cand_ttl && pivot.is_echoing && candidate.is_echoing {
        return Classification::Rule(3);
    }

    // Rule 4: same TTL, both flickering, trail-IPs linked by the
    // subnet-discovery alias set.
    if pivot_ttl == cand_ttl && pivot.is_flickering && candidate.is_flickering {
        if let (Some(pt), Some(ct)) = (pivot.trail.last_valid_ip(), candidate.trail.last_valid_ip()) {
            if alias_set.same_alias(pt, ct) {
                return Classification::Rule(4);
            }
        }
    }

    // Rule 5: both trails direct, trail-IPs in the same alias.
    if pivot.trail.is_direct() && candidate.trail.is_direct() {
        if let (Some(pt), Some(ct)) = (pivot.trail.last_valid_ip(), candidate.trail.last_valid_ip()) {
            if alias_set.same_alias(pt, ct) {
                return Classification::Rule(5);
            }
        }
    }

    if cand_ttl < pivot_ttl {
        return Classification::ContraPivotCandidate;
    }
    if cand_ttl == pivot_ttl + 1 && single_interface_subnet {
        return Classification::TtlStepPromotion;
    }
    Classification::Outlier
}

struct Round {
    new_pivots: Vec<(Ipv4, InterfaceStatus)>,
    outliers: Vec<Ipv4>,
    contra_pivot_candidates: Vec<Ipv4>,
    promoted_pivot: Option<(Ipv4, Ipv4)>, // (new pivot, rolled-into-contra old pivot)
}

fn run_round(
    dict: &Dictionary,
    alias_set: &AliasSet,
    current_pivot: Ipv4,
    current_interface_count: usize,
    candidates: &[Ipv4],
) -> Round {
    let mut round = Round {
        new_pivots: Vec::new(),
        outliers: Vec::new(),
        contra_pivot_candidates: Vec::new(),
        promoted_pivot: None,
    };
    let mut pivot_addr = current_pivot;
    // The TTL-step promotion rule only fires while the subnet still has a
    // single interface; once anything else has been added this round, or
    // the caller already grew past one interface, it can't fire again.
    let mut single_interface_subnet = current_interface_count == 1;

    for &cand in candidates {
        let Some(pivot_entry) = dict.lookup(pivot_addr) else {
            break;
        };
        let Some(cand_entry) = dict.lookup(cand) else {
            continue;
        };
        match classify(pivot_entry, cand_entry, alias_set, single_interface_subnet) {
            Classification::Rule(r) => {
                round.new_pivots.push((cand, InterfaceStatus::pivot_by_rule(r)));
                single_interface_subnet = false;
            }
            Classification::Rule2Promote => {
                round.promoted_pivot = Some((cand, pivot_addr));
                pivot_addr = cand;
                single_interface_subnet = false;
            }
            Classification::ContraPivotCandidate => {
                round.contra_pivot_candidates.push(cand);
                single_interface_subnet = false;
            }
            Classification::TtlStepPromotion => {
                round.promoted_pivot = Some((cand, pivot_addr));
                pivot_addr = cand;
            }
            Classification::Outlier => {
                round.outliers.push(cand);
                single_interface_subnet = false;
            }
        }
    }
    round
}

/// Gap (in addresses) between two contra-pivots, used by the overgrowth
/// tight-packing heuristic.
fn min_gap(contra_pivots: &[Ipv4]) -> u32 {
    let mut sorted = contra_pivots.to_vec();
    sorted.sort();
    sorted
        .windows(2)
        .map(|w| w[1].wrapping_sub(w[0]))
        .min()
        .unwrap_or(u32::MAX)
}

/// Diagnosis outcome for one expansion round.
enum Diagnosis {
    ShrinkBack(String),
    AcceptContraPivots,
    Continue,
}

#[allow(clippy::too_many_arguments)]
fn diagnose(
    cfg: &Config,
    dict: &Dictionary,
    alias_set: &AliasSet,
    new_pivots: &[(Ipv4, InterfaceStatus)],
    outliers: &[Ipv4],
    contra_pivots: &[Ipv4],
) -> Diagnosis {
    let new_interfaces = new_pivots.len() + outliers.len() + contra_pivots.len();
    if new_interfaces == 0 {
        return Diagnosis::Continue;
    }

    if !outliers.is_empty() {
        let minority = (outliers.len() as u32) * cfg.inference_outliers_ratio_divisor >= new_interfaces as u32
            && outliers.len() > new_pivots.len();
        if minority {
            return Diagnosis::ShrinkBack(
                "too many outliers relative to newly confirmed pivots".to_string(),
            );
        }
    }

    if contra_pivots.is_empty() {
        return Diagnosis::Continue;
    }

    if contra_pivots.len() > 2 && (contra_pivots.len() > 5 || contra_pivots.len() > new_pivots.len()) {
        return Diagnosis::ShrinkBack("too many contra-pivot candidates".to_string());
    }

    let ttls: Vec<u8> = contra_pivots.iter().filter_map(|&ip| dict.lookup(ip).and_then(|e| e.ttl)).collect();
    if ttls.is_empty() || ttls.iter().any(|&t| t != ttls[0]) {
        return Diagnosis::ShrinkBack("contra-pivots do not share the same TTL".to_string());
    }

    // Trail similarity among contra-pivots.
    let trails: Vec<&Trail> = contra_pivots
        .iter()
        .filter_map(|&ip| dict.lookup(ip).map(|e| &e.trail))
        .collect();
    let all_same = trails.windows(2).all(|w| w[0].same_as(w[1]));
    if !all_same {
        let all_aliased = contra_pivots.iter().all(|&a| {
            contra_pivots.iter().all(|&b| {
                a == b
                    || match (dict.lookup(a).and_then(|e| e.trail.last_valid_ip()), dict.lookup(b).and_then(|e| e.trail.last_valid_ip())) {
                        (Some(ta), Some(tb)) => alias_set.same_alias(ta, tb),
                        _ => false,
                    }
            })
        });
        if !all_aliased {
            return Diagnosis::ShrinkBack("contra-pivots have differing, non-aliased trails".to_string());
        }
        // differing-but-aliased trails: proceed, noted via log only.
        log::debug!("contra-pivots have differing but aliased trails");
    }

    // Overgrowth check when >= 2 contra-pivots.
    if contra_pivots.len() >= 2 {
        let growth_candidates: Vec<Ipv4> = new_pivots.iter().map(|(ip, _)| *ip).chain(outliers.iter().copied()).collect();
        let mut working = growth_candidates.clone();
        let mut peerless_count = 0usize;
        for &cp in contra_pivots {
            // Largest prefix around cp encompassing no other contra-pivot:
            // walk prefix lengths from 32 down, stop just before another
            // contra-pivot would fall inside.
            let mut best = Cidr::new(cp, 32);
            for len in (20..32).rev() {
                let candidate = Cidr::new(cp, len).network();
                if contra_pivots.iter().any(|&other| other != cp && candidate.contains(other)) {
                    break;
                }
                best = candidate;
            }
            if !growth_candidates.iter().any(|&ip| best.contains(ip)) {
                peerless_count += 1;
            }
            working.retain(|ip| !best.contains(*ip));
        }
        if working.is_empty() {
            let gap = min_gap(contra_pivots);
            let peerless_ratio = cfg.inference_tight_packing_peerless_ratio;
            let tightly_packed = gap < cfg.inference_tight_packing_min_gap
                && contra_pivots.len() > new_pivots.len()
                && (peerless_count as f64) >= (contra_pivots.len() as f64 * peerless_ratio);
            if !tightly_packed {
                return Diagnosis::ShrinkBack(
                    "expansion would hide smaller, sounder subnets (overgrowth)".to_string(),
                );
            }
        }
    }

    Diagnosis::AcceptContraPivots
}

/// Grow one subnet from `initial_pivot`, consuming entries from `worklist`
/// (ascending order; consumed from the tail, i.e. highest address first)
/// and stopping once a round's diagnosis says to.
fn grow_subnet(
    dict: &Dictionary,
    cfg: &Config,
    alias_set: &AliasSet,
    worklist: &mut Vec<Ipv4>,
    initial_pivot: Ipv4,
    prev_low_border: Option<Ipv4>,
) -> Subnet {
    let mut subnet = Subnet::new(initial_pivot);
    let mut prefix_len = 32u8;

    loop {
        if prefix_len <= 20 {
            subnet.stop_description = "reached minimum prefix length /20".to_string();
            break;
        }
        let candidate_len = prefix_len - 1;
        let candidate_cidr = Cidr::new(subnet.selected_pivot(), candidate_len).network();

        if let Some(prev_low) = prev_low_border {
            if candidate_cidr.upper() >= prev_low {
                subnet.stop_description = "overlap with an already-inferred subnet".to_string();
                subnet.needs_post_processing = true;
                break;
            }
        }

        let mut candidates: Vec<Ipv4> = Vec::new();
        worklist.retain(|&ip| {
            if candidate_cidr.contains(ip) && !subnet.interfaces.iter().any(|i| i.addr == ip) {
                candidates.push(ip);
                false
            } else {
                true
            }
        });

        if candidates.is_empty() {
            if worklist.is_empty() {
                subnet.needs_post_processing = true;
            }
            prefix_len = candidate_len;
            subnet.prefix = candidate_cidr;
            continue;
        }

        let round = run_round(
            dict,
            alias_set,
            subnet.selected_pivot(),
            subnet.interfaces.len(),
            &candidates,
        );
        match diagnose(
            cfg,
            dict,
            alias_set,
            &round.new_pivots,
            &round.outliers,
            &round.contra_pivot_candidates,
        ) {
            Diagnosis::ShrinkBack(reason) => {
                worklist.extend(candidates);
                subnet.stop_description = reason;
                break;
            }
            Diagnosis::AcceptContraPivots => {
                apply_round(&mut subnet, round);
                subnet.prefix = candidate_cidr;
                subnet.stop_description = "sound contra-pivot IP found".to_string();
                break;
            }
            Diagnosis::Continue => {
                apply_round(&mut subnet, round);
                subnet.prefix = candidate_cidr;
                prefix_len = candidate_len;
            }
        }
    }

    subnet.compute_adjusted_prefix();
    subnet
}

fn apply_round(subnet: &mut Subnet, round: Round) {
    if let Some((new_pivot, old_pivot)) = round.promoted_pivot {
        if let Some(old) = subnet.interfaces.iter_mut().find(|i| i.addr == old_pivot) {
            old.status = InterfaceStatus::ContraPivot;
        }
        subnet.interfaces.push(SubnetInterface {
            addr: new_pivot,
            status: InterfaceStatus::SelectedPivot,
        });
    }
    for (ip, status) in round.new_pivots {
        subnet.interfaces.push(SubnetInterface { addr: ip, status });
    }
    for ip in round.outliers {
        subnet.interfaces.push(SubnetInterface {
            addr: ip,
            status: InterfaceStatus::Outlier,
        });
    }
    for ip in round.contra_pivot_candidates {
        subnet.interfaces.push(SubnetInterface {
            addr: ip,
            status: InterfaceStatus::ContraPivot,
        });
    }
}

/// Run subnet inference over every scanned-OK entry.
pub fn infer_subnets(dict: &Dictionary, cfg: &Config, alias_set: &AliasSet) -> Vec<Subnet> {
    let mut worklist: Vec<Ipv4> = dict
        .iter()
        .filter(|e| e.entry_type == crate::dict::EntryType::ScannedOk)
        .map(|e| e.addr)
        .collect();
    worklist.sort();

    let mut subnets = Vec::new();
    let mut prev_low_border: Option<Ipv4> = None;

    while let Some(initial_pivot) = worklist.pop() {
        let subnet = grow_subnet(dict, cfg, alias_set, &mut worklist, initial_pivot, prev_low_border);
        prev_low_border = Some(subnet.lower());
        subnets.push(subnet);
    }

    subnets.sort_by_key(|s| s.lower());
    subnets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::EntryType;

    fn entry_with_trail(ip: Ipv4, ttl: u8, trail_ip: Ipv4, anomalies: u16) -> IpEntry {
        let mut e = IpEntry::new(ip, EntryType::ScannedOk);
        e.ttl = Some(ttl);
        e.observed_ttls = vec![ttl];
        e.trail = Trail::Valid {
            last_valid_ip: trail_ip,
            anomalies,
            reply_ttl: 64,
            request_ttl: ttl,
        };
        e
    }

    fn dict_with(entries: Vec<IpEntry>) -> Dictionary {
        let mut dict = Dictionary::new();
        for e in entries {
            let ip = e.addr;
            let et = e.entry_type;
            let slot = dict.create(ip, et).unwrap();
            *slot = e;
        }
        dict
    }

    #[test]
    fn seed_scenario_4_rule1_growth() {
        let router = Ipv4::from_octets(192, 168, 1, 1);
        let ip1 = Ipv4::from_octets(10, 0, 0, 1);
        let ip2 = Ipv4::from_octets(10, 0, 0, 2);
        let dict = dict_with(vec![
            entry_with_trail(ip1, 4, router, 0),
            entry_with_trail(ip2, 4, router, 0),
        ]);
        let cfg = Config::default();
        let alias_set = AliasSet::default();
        let subnets = infer_subnets(&dict, &cfg, &alias_set);
        assert_eq!(subnets.len(), 1);
        assert!(subnets[0].contains(ip1));
        assert!(subnets[0].contains(ip2));
        assert!(subnets[0].contra_pivots().is_empty());
    }

    #[test]
    fn seed_scenario_5_contra_pivot_detection() {
        // contra sits one hop closer to the vantage point, so its trail
        // names the router one hop further up than the subnet's own trail.
        let upstream_router = Ipv4::from_octets(192, 168, 0, 1);
        let subnet_router = Ipv4::from_octets(192, 168, 1, 1);
        let contra = Ipv4::from_octets(10, 0, 0, 1);
        let p2 = Ipv4::from_octets(10, 0, 0, 2);
        let p3 = Ipv4::from_octets(10, 0, 0, 3);
        let p4 = Ipv4::from_octets(10, 0, 0, 4);
        let dict = dict_with(vec![
            entry_with_trail(contra, 3, upstream_router, 0),
            entry_with_trail(p2, 4, subnet_router, 0),
            entry_with_trail(p3, 4, subnet_router, 0),
            entry_with_trail(p4, 4, subnet_router, 0),
        ]);
        let cfg = Config::default();
        let alias_set = AliasSet::default();
        let subnets = infer_subnets(&dict, &cfg, &alias_set);
        assert_eq!(subnets.len(), 1);
        let subnet = &subnets[0];
        assert_eq!(subnet.contra_pivots(), vec![contra]);
        assert!(subnet.stop_description.contains("sound contra-pivot"));
    }
}
