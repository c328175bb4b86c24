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

//! Alias resolution: Ally, velocity overlap, reverse-DNS matching, and the
//! per-fingerprint resolution dispatch that partitions a set of IPs into
//! aliases (routers).

use std::collections::HashMap;

use crate::config::Config;
use crate::ipv4::Ipv4;

use super::hints::{AliasHint, CounterClass, Fingerprint};

/// Outcome of comparing two IPs' IP-ID sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllyResult {
    Accepted,
    Rejected,
    NoSequence,
}

/// One inferred alias: a set of IPs believed to belong to the same router.
#[derive(Debug, Clone, Default)]
pub struct Alias {
    pub members: Vec<Ipv4>,
}

/// Pairs up two IPs' (token, ip_id) sequences by index (round-robin
/// collection guarantees interleaving) and applies the rollover-tolerant
/// comparison in both directions, then the inter-probe sequence.
pub fn ally(a: &AliasHint, b: &AliasHint, max_diff: u32) -> AllyResult {
    let len = a.tokens.len().min(b.tokens.len());
    if len == 0 {
        return AllyResult::NoSequence;
    }

    let mut rollovers = 0u32;
    for i in 0..len {
        let (ta, tb) = (a.tokens[i], b.tokens[i]);
        let (ida, idb) = (a.ip_ids[i] as i64, b.ip_ids[i] as i64);
        if ta == tb {
            continue;
        }
        let (earlier, later) = if ta < tb { (ida, idb) } else { (idb, ida) };
        if earlier > later {
            let gap = (65_535 - earlier) + later;
            if gap as u32 > max_diff {
                return AllyResult::Rejected;
            }
            rollovers += 1;
            if rollovers > 1 {
                return AllyResult::Rejected;
            }
        }
    }

    // Inter-probe sequence: id_A[i] -> id_B[i+1] and id_B[i] -> id_A[i+1],
    // tolerating at most 2 rollovers total.
    let mut inter_rollovers = 0u32;
    let mut saw_sequence = len >= 1;
    for i in 0..len.saturating_sub(1) {
        for (first, second) in [
            (a.ip_ids[i] as i64, b.ip_ids[i + 1] as i64),
            (b.ip_ids[i] as i64, a.ip_ids[i + 1] as i64),
        ] {
            saw_sequence = true;
            if first > second {
                let gap = (65_535 - first) + second;
                if gap as u32 > max_diff {
                    return AllyResult::Rejected;
                }
                inter_rollovers += 1;
                if inter_rollovers > 2 {
                    return AllyResult::Rejected;
                }
            }
        }
    }

    if !saw_sequence {
        AllyResult::NoSequence
    } else {
        AllyResult::Accepted
    }
}

/// Ally between an isolated IP and every member of a growing group: all
/// comparisons must be ACCEPTED or NO_SEQUENCE, with at least one ACCEPTED.
pub fn group_ally(isolated: &AliasHint, group: &[&AliasHint], max_diff: u32) -> bool {
    let mut saw_accepted = false;
    for member in group {
        match ally(isolated, member, max_diff) {
            AllyResult::Rejected => return false,
            AllyResult::Accepted => saw_accepted = true,
            AllyResult::NoSequence => {}
        }
    }
    saw_accepted
}

/// True iff the two IPs' velocity ranges overlap within tolerance and the
/// newer IP's first IP-ID lies in the window predicted from the older IP's
/// last observation.
pub fn velocity_overlap(a: &AliasHint, b: &AliasHint, cfg: &Config) -> bool {
    if matches!(a.counter_class, CounterClass::Unknown) || matches!(b.counter_class, CounterClass::Unknown) {
        return false;
    }
    let (lo_a, hi_a) = (a.velocity_low, a.velocity_high);
    let (lo_b, hi_b) = (b.velocity_low, b.velocity_high);
    if !hi_a.is_finite() || !hi_b.is_finite() {
        return false;
    }

    let (wide_lo, wide_hi, narrow_lo, narrow_hi) = if (hi_a - lo_a) >= (hi_b - lo_b) {
        (lo_a, hi_a, lo_b, hi_b)
    } else {
        (lo_b, hi_b, lo_a, hi_a)
    };
    let tolerance = wide_lo * cfg.alias_resolution_velocity_overlap_tolerance;
    let extended_lo = wide_lo - tolerance;
    let extended_hi = wide_hi + tolerance;
    if extended_hi < narrow_lo || extended_lo > narrow_hi {
        return false;
    }

    let (older, newer) = if a.tokens.last().copied().unwrap_or(0) <= b.tokens.first().copied().unwrap_or(0) {
        (a, b)
    } else {
        (b, a)
    };
    let Some(&last_id) = older.ip_ids.last() else {
        return true;
    };
    let Some(&first_id_new) = newer.ip_ids.first() else {
        return true;
    };
    let Some(&last_token) = older.tokens.last() else {
        return true;
    };
    let Some(&first_token) = newer.tokens.first() else {
        return true;
    };
    if first_token < last_token {
        return true;
    }
    let avg_speed = (wide_lo + wide_hi) / 2.0;
    let elapsed = (first_token - last_token) as f64;
    let predicted_span = 2.0 * avg_speed * elapsed;
    let predicted_low = last_id as f64;
    let predicted_high = last_id as f64 + predicted_span;

    let observed = first_id_new as f64;
    let observed_wrapped = observed + 65_536.0;
    (predicted_low..=predicted_high).contains(&observed)
        || (predicted_low..=predicted_high).contains(&observed_wrapped)
}

/// Reverse-DNS match: same number of dot-separated labels, and all labels
/// from the TLD end agree up to at most one differing label.
pub fn dns_match(a: &str, b: &str) -> bool {
    let la: Vec<&str> = a.split('.').collect();
    let lb: Vec<&str> = b.split('.').collect();
    if la.len() != lb.len() {
        return false;
    }
    let differences = la.iter().rev().zip(lb.iter().rev()).filter(|(x, y)| x != y).count();
    differences <= 1
}

/// Run alias resolution over a list of IPs with hints from the current
/// stage. `strict`, when true, never emits a single-IP alias and skips the
/// random/echo/unknown branches entirely.
pub fn resolve(hints: &HashMap<Ipv4, AliasHint>, cfg: &Config, strict: bool) -> Vec<Alias> {
    let at_full_resolution = hints
        .values()
        .next()
        .map(|h| matches!(h.stage, super::hints::Stage::FullResolution))
        .unwrap_or(false);

    let mut remaining: Vec<Ipv4> = hints.keys().copied().collect();
    remaining.sort_by_key(|ip| (hints[ip].fingerprint(at_full_resolution), *ip));

    let mut aliases: Vec<Alias> = Vec::new();
    let mut excluded: Vec<Ipv4> = Vec::new();

    while !remaining.is_empty() {
        let reference_ip = remaining.remove(0);
        let reference = &hints[&reference_ip];
        let reference_fp = reference.fingerprint(at_full_resolution);

        let mut peeled: Vec<Ipv4> = Vec::new();
        remaining.retain(|ip| {
            if hints[ip].fingerprint(at_full_resolution) == reference_fp {
                peeled.push(*ip);
                false
            } else {
                true
            }
        });
        if let Some(udp_src) = reference.udp_port_unreachable_src.filter(|_| !reference.udp_secondary) {
            remaining.retain(|ip| {
                if *ip == udp_src {
                    peeled.push(*ip);
                    false
                } else {
                    true
                }
            });
        }

        let mut group = vec![reference_ip];

        if reference.udp_port_unreachable_src.is_some() && !reference.udp_secondary {
            group.extend(peeled.iter().copied());
            emit_alias(&mut aliases, group, strict);
            continue;
        }

        match reference.counter_class {
            CounterClass::Healthy => {
                let mut set_aside = Vec::new();
                for ip in peeled {
                    let group_hints: Vec<&AliasHint> = group.iter().map(|g| &hints[g]).collect();
                    if group_ally(&hints[&ip], &group_hints, cfg.alias_resolution_ally_max_difference) {
                        group.push(ip);
                    } else {
                        set_aside.push(ip);
                    }
                }
                emit_alias(&mut aliases, group, strict);
                excluded.extend(set_aside);
            }
            CounterClass::Fast => {
                let mut set_aside = Vec::new();
                for ip in peeled {
                    let compatible = group
                        .iter()
                        .all(|g| velocity_overlap(&hints[&ip], &hints[g], cfg));
                    if compatible {
                        group.push(ip);
                    } else {
                        set_aside.push(ip);
                    }
                }
                emit_alias(&mut aliases, group, strict);
                excluded.extend(set_aside);
            }
            CounterClass::Random | CounterClass::Echo => {
                if strict {
                    excluded.extend(peeled);
                    if group.len() > 1 {
                        emit_alias(&mut aliases, group, strict);
                    }
                    continue;
                }
                group.extend(peeled.iter().copied().filter(|ip| {
                    reference
                        .hostname
                        .as_deref()
                        .zip(hints[ip].hostname.as_deref())
                        .map(|(a, b)| dns_match(a, b))
                        .unwrap_or(true)
                }));
                let leftover: Vec<Ipv4> = peeled
                    .into_iter()
                    .filter(|ip| !group.contains(ip))
                    .collect();
                emit_alias(&mut aliases, group, strict);
                excluded.extend(leftover);
            }
            CounterClass::Unknown => {
                if strict {
                    excluded.extend(peeled);
                    continue;
                }
                if let Some(hostname) = &reference.hostname {
                    let (matching, rest): (Vec<Ipv4>, Vec<Ipv4>) = peeled
                        .into_iter()
                        .partition(|ip| hints[ip].hostname.as_deref().map(|h| dns_match(hostname, h)).unwrap_or(false));
                    group.extend(matching);
                    emit_alias(&mut aliases, group, strict);
                    excluded.extend(rest);
                } else {
                    excluded.extend(peeled);
                    if !strict {
                        aliases.push(Alias { members: group });
                    }
                }
            }
        }
    }

    if !excluded.is_empty() {
        let reseeded: HashMap<Ipv4, AliasHint> = excluded
            .into_iter()
            .filter_map(|ip| hints.get(&ip).map(|h| (ip, h.clone())))
            .collect();
        if !reseeded.is_empty() {
            aliases.extend(resolve(&reseeded, cfg, strict));
        }
    }

    fuse_healthy_aliases(&mut aliases, hints, cfg);
    aliases
}

fn emit_alias(aliases: &mut Vec<Alias>, members: Vec<Ipv4>, strict: bool) {
    if members.len() < 2 && strict {
        return;
    }
    aliases.push(Alias { members });
}

/// After a healthy-class group is finalized, try to fuse it with a
/// previously emitted healthy alias by picking that alias's UDP-method
/// member with a healthy counter as a merging pivot and rerunning Ally.
fn fuse_healthy_aliases(aliases: &mut Vec<Alias>, hints: &HashMap<Ipv4, AliasHint>, cfg: &Config) {
    let mut i = 0;
    while i < aliases.len() {
        let mut fused_into = None;
        for j in 0..i {
            let Some(pivot) = aliases[j]
                .members
                .iter()
                .find(|ip| hints.get(ip).map(|h| matches!(h.counter_class, CounterClass::Healthy)).unwrap_or(false))
            else {
                continue;
            };
            let Some(pivot_hint) = hints.get(pivot) else { continue };
            let candidate_pivot = aliases[i]
                .members
                .iter()
                .find(|ip| hints.get(ip).map(|h| matches!(h.counter_class, CounterClass::Healthy)).unwrap_or(false));
            if let Some(candidate) = candidate_pivot {
                if let Some(candidate_hint) = hints.get(candidate) {
                    if ally(pivot_hint, candidate_hint, cfg.alias_resolution_ally_max_difference) == AllyResult::Accepted {
                        fused_into = Some(j);
                        break;
                    }
                }
            }
        }
        if let Some(j) = fused_into {
            let merged = aliases.remove(i);
            aliases[j].members.extend(merged.members);
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::hints::Stage;

    fn hint(tokens: &[u64], ids: &[u16]) -> AliasHint {
        AliasHint {
            stage: Stage::FullResolution,
            tokens: tokens.to_vec(),
            ip_ids: ids.to_vec(),
            echo_mask: vec![false; ids.len()],
            delays_us: vec![1000; ids.len().saturating_sub(1)],
            time_exceeded_initial_ttl: crate::dict::InitialTtl::Unknown,
            echo_reply_initial_ttl: crate::dict::InitialTtl::Unknown,
            hostname: None,
            replies_to_timestamp: false,
            udp_port_unreachable_src: None,
            udp_secondary: false,
            velocity_low: 0.0,
            velocity_high: 0.0,
            counter_class: CounterClass::Unknown,
        }
    }

    #[test]
    fn ally_accepts_seed_scenario_6() {
        // Two IPs probed round-robin: (1:100, 2:120, 1:140, 2:160), tokens 1..4.
        let a = hint(&[1, 3], &[100, 140]);
        let b = hint(&[2, 4], &[120, 160]);
        assert_eq!(ally(&a, &b, 1000), AllyResult::Accepted);
    }

    #[test]
    fn ally_is_symmetric() {
        let a = hint(&[1, 3], &[100, 140]);
        let b = hint(&[2, 4], &[120, 160]);
        assert_eq!(ally(&a, &b, 1000), ally(&b, &a, 1000));
    }

    #[test]
    fn ally_rejects_large_gap() {
        let a = hint(&[1, 3], &[100, 40_000]);
        let b = hint(&[2, 4], &[20_000, 60_000]);
        assert_eq!(ally(&a, &b, 100), AllyResult::Rejected);
    }

    #[test]
    fn dns_match_allows_one_differing_label() {
        assert!(dns_match("r1.pop1.example.com", "r2.pop1.example.com"));
        assert!(!dns_match("r1.pop1.example.com", "r1.pop2.other.com"));
    }

    #[test]
    fn resolve_seed_scenario_6_single_alias() {
        let cfg = Config::default();
        let ip1 = Ipv4::from_octets(10, 0, 0, 1);
        let ip2 = Ipv4::from_octets(10, 0, 0, 2);
        let mut h1 = hint(&[1, 3], &[100, 140]);
        h1.counter_class = CounterClass::Healthy;
        h1.velocity_low = 1.0;
        h1.velocity_high = 1.0;
        let mut h2 = hint(&[2, 4], &[120, 160]);
        h2.counter_class = CounterClass::Healthy;
        h2.velocity_low = 1.0;
        h2.velocity_high = 1.0;
        let hints = HashMap::from([(ip1, h1), (ip2, h2)]);
        let aliases = resolve(&hints, &cfg, false);
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].members.len(), 2);
    }

    #[test]
    fn strict_mode_never_emits_single_ip_alias() {
        let cfg = Config::default();
        let ip1 = Ipv4::from_octets(10, 0, 0, 1);
        let h1 = hint(&[1], &[100]);
        let hints = HashMap::from([(ip1, h1)]);
        let aliases = resolve(&hints, &cfg, true);
        assert!(aliases.iter().all(|a| a.members.len() >= 2));
    }
}
