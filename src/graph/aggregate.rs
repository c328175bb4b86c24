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

//! Aggregation and peer discovery/disambiguation: bucket subnets by trail
//! key, locate each aggregate's peer IPs, then disambiguate those peers into
//! the graph-building alias set.

use std::collections::{HashMap, HashSet};

use crate::alias::{self, AliasSet};
use crate::alias::hints::Stage;
use crate::config::Config;
use crate::dict::Dictionary;
use crate::ipv4::Ipv4;
use crate::prober::Prober;
use crate::subnet::Subnet;

/// What a bucket of subnets is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrailKey {
    /// Vantage-point-adjacent: every subnet whose trail is void.
    Home,
    Trail(Ipv4),
    /// Echo-trail subnets are keyed by (pivot TTL, pre-trail offset); the
    /// union-find clustering step then subdivides further by pre-trail-IP
    /// overlap.
    Echo { pivot_ttl: u8, pre_trail_offset: usize, cluster: usize },
}

#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub key: Option<TrailKey>,
    pub subnet_indices: Vec<usize>,
    pub pre_trail_ips: HashSet<Ipv4>,
    pub peers: Vec<Ipv4>,
    pub misc_ips: Vec<Ipv4>,
    pub blindspots: Vec<Ipv4>,
}

/// Non-anonymous hops preceding an echo-trail subnet's pivot trail, newest
/// first, plus the offset (route index from the end) of the first one.
fn pre_trail_ips(route: &[crate::dict::RouteHop]) -> (Vec<Ipv4>, usize) {
    let mut ips = Vec::new();
    let mut offset = None;
    for (i, hop) in route.iter().enumerate().rev() {
        if let Some(ip) = hop.ip {
            if offset.is_none() {
                offset = Some(route.len() - 1 - i);
            }
            ips.push(ip);
        }
    }
    (ips, offset.unwrap_or(0))
}

/// Bucket subnets into aggregates.
pub fn aggregate(dict: &Dictionary, subnets: &[Subnet], subnet_discovery_aliases: &AliasSet) -> Vec<Aggregate> {
    let mut home = Aggregate {
        key: Some(TrailKey::Home),
        ..Default::default()
    };
    let mut by_trail: HashMap<Ipv4, Aggregate> = HashMap::new();
    let mut echo_groups: Vec<(u8, usize, HashSet<Ipv4>, Vec<usize>)> = Vec::new();

    for (idx, subnet) in subnets.iter().enumerate() {
        let pivot = subnet.selected_pivot();
        let Some(entry) = dict.lookup(pivot) else { continue };

        if entry.trail.is_void() {
            home.subnet_indices.push(idx);
            continue;
        }

        if entry.is_echoing {
            let ttl = entry.ttl.unwrap_or(0);
            let (ips, offset) = pre_trail_ips(&entry.route);
            let ip_set: HashSet<Ipv4> = ips.into_iter().collect();

            let existing = echo_groups
                .iter_mut()
                .find(|(t, o, set, _)| *t == ttl && *o == offset && !set.is_disjoint(&ip_set));
            if let Some((_, _, set, indices)) = existing {
                set.extend(ip_set);
                indices.push(idx);
            } else {
                echo_groups.push((ttl, offset, ip_set, vec![idx]));
            }
            continue;
        }

        let Some(trail_ip) = entry.trail.last_valid_ip() else { continue };
        by_trail.entry(trail_ip).or_insert_with(|| Aggregate {
            key: Some(TrailKey::Trail(trail_ip)),
            ..Default::default()
        }).subnet_indices.push(idx);
    }

    // Absorb aliased buckets: if a bucket's trail is flickering with no
    // anomalies and subnet-discovery aliases the trail IP, fold every other
    // bucket keyed on an aliased IP into it.
    let trail_ips: Vec<Ipv4> = by_trail.keys().copied().collect();
    let mut absorbed: HashSet<Ipv4> = HashSet::new();
    for &trail_ip in &trail_ips {
        if absorbed.contains(&trail_ip) {
            continue;
        }
        let flickering_no_anomaly = by_trail
            .get(&trail_ip)
            .map(|bucket| {
                bucket.subnet_indices.iter().any(|&idx| {
                    let pivot = subnets[idx].selected_pivot();
                    dict.lookup(pivot)
                        .map(|e| dict.trail_is_flickering(e) && e.trail.anomalies() == Some(0))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);
        if !flickering_no_anomaly || !subnet_discovery_aliases.has_alias_for(trail_ip) {
            continue;
        }
        let Some(alias) = subnet_discovery_aliases.alias_of(trail_ip) else { continue };
        for &member in &alias.members {
            if member == trail_ip || absorbed.contains(&member) {
                continue;
            }
            if let Some(other) = by_trail.remove(&member) {
                by_trail.get_mut(&trail_ip).unwrap().subnet_indices.extend(other.subnet_indices);
                absorbed.insert(member);
            }
        }
    }

    let mut aggregates: Vec<Aggregate> = Vec::new();
    if !home.subnet_indices.is_empty() {
        aggregates.push(home);
    }
    aggregates.extend(by_trail.into_values());
    for (ttl, offset, ip_set, indices) in echo_groups {
        aggregates.push(Aggregate {
            key: Some(TrailKey::Echo {
                pivot_ttl: ttl,
                pre_trail_offset: offset,
                cluster: aggregates.len(),
            }),
            subnet_indices: indices,
            pre_trail_ips: ip_set,
            ..Default::default()
        });
    }

    aggregates
}

/// For every aggregate, find the smallest offset at which any interface's
/// partial route contains a peering-point hop; peers are the hops at that
/// offset, non-peering hops at the same offset are miscellaneous.
pub fn discover_peers(subnets: &[Subnet], aggregates: &mut [Aggregate], subnet_discovery_aliases: &AliasSet) {
    for agg in aggregates.iter_mut() {
        let mut best_offset: Option<usize> = None;
        for &idx in &agg.subnet_indices {
            for route in subnets[idx].partial_routes.values() {
                if let Some(offset) = route.iter().position(|h| h.kind == crate::dict::RouteHopKind::PeeringPoint) {
                    best_offset = Some(best_offset.map_or(offset, |b: usize| b.min(offset)));
                }
            }
        }
        let Some(offset) = best_offset else { continue };

        let mut peers = Vec::new();
        let mut misc = Vec::new();
        for &idx in &agg.subnet_indices {
            for route in subnets[idx].partial_routes.values() {
                let Some(hop) = route.get(offset) else { continue };
                let Some(ip) = hop.ip else { continue };
                if hop.kind == crate::dict::RouteHopKind::PeeringPoint {
                    peers.push(ip);
                } else {
                    misc.push(ip);
                }
            }
        }
        peers = peers
            .into_iter()
            .map(|ip| subnet_discovery_aliases.canonical(ip))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        misc.sort();
        misc.dedup();

        agg.peers = peers;
        agg.misc_ips = misc;
    }
}

/// Union-find clusterer: groups IPs that co-occur in any aggregate's
/// initial-peer list (peers ∪ misc), one cluster per connected component.
fn cluster_ips(aggregates: &[Aggregate]) -> Vec<Vec<Ipv4>> {
    let mut parent: HashMap<Ipv4, Ipv4> = HashMap::new();
    fn find(parent: &mut HashMap<Ipv4, Ipv4>, ip: Ipv4) -> Ipv4 {
        let p = *parent.get(&ip).unwrap_or(&ip);
        if p == ip {
            ip
        } else {
            let root = find(parent, p);
            parent.insert(ip, root);
            root
        }
    }
    fn union(parent: &mut HashMap<Ipv4, Ipv4>, a: Ipv4, b: Ipv4) {
        let (ra, rb) = (find(parent, a), find(parent, b));
        if ra != rb {
            parent.insert(ra, rb);
        }
    }

    for agg in aggregates {
        let all: Vec<Ipv4> = agg.peers.iter().chain(agg.misc_ips.iter()).copied().collect();
        for &ip in &all {
            parent.entry(ip).or_insert(ip);
        }
        for w in all.windows(2) {
            union(&mut parent, w[0], w[1]);
        }
    }

    let mut groups: HashMap<Ipv4, Vec<Ipv4>> = HashMap::new();
    let ips: Vec<Ipv4> = parent.keys().copied().collect();
    for ip in ips {
        let root = find(&mut parent, ip);
        groups.entry(root).or_default().push(ip);
    }
    groups.into_values().collect()
}

/// Disambiguate peer IPs via alias resolution: cluster all aggregates'
/// initial peer IPs, resolve each cluster of size >= 2, and keep aliases
/// with >= 2 members as the graph-building alias set. Then mark blindspots
/// and re-run the backward search for aggregates that have any.
pub fn disambiguate(
    dict: &mut Dictionary,
    cfg: &Config,
    prober: &dyn Prober,
    src: Ipv4,
    aggregates: &mut [Aggregate],
    subnets: &[Subnet],
) -> AliasSet {
    let clusters = cluster_ips(aggregates);
    let no_dns = |_: Ipv4| None;
    let mut all_aliases = Vec::new();

    for cluster in clusters.iter().filter(|c| c.len() >= 2) {
        let hints = alias::collect_hints(prober, cfg, src, cluster, Stage::GraphBuilding, &no_dns);
        let resolved = alias::resolve(&hints, cfg, cfg.alias_resolution_strict_mode);
        all_aliases.extend(resolved.into_iter().filter(|a| a.members.len() >= 2));
    }
    let graph_aliases = AliasSet::from_aliases(all_aliases);

    for agg in aggregates.iter_mut() {
        let blindspots: Vec<Ipv4> = agg
            .misc_ips
            .iter()
            .copied()
            .filter(|&ip| {
                graph_aliases
                    .alias_of(ip)
                    .map(|a| a.members.iter().any(|&m| dict.lookup(m).map(|e| e.denotes_neighborhood).unwrap_or(false)))
                    .unwrap_or(false)
            })
            .collect();
        if blindspots.is_empty() {
            continue;
        }
        for &ip in &blindspots {
            if let Some(e) = dict.lookup_mut(ip) {
                e.is_blindspot = true;
            }
        }
        agg.blindspots = blindspots;

        if let Some(earlier) = find_earlier_peer(subnets, agg, dict) {
            agg.peers = earlier;
        }
    }

    graph_aliases
}

/// Rerun a backward search for an earlier peering point once blindspots are
/// known: a valid hop flagged blindspot that is neither the target nor the
/// trail-IP, nor an alias of either.
fn find_earlier_peer(subnets: &[Subnet], agg: &Aggregate, dict: &Dictionary) -> Option<Vec<Ipv4>> {
    let mut best_offset = None;
    for &idx in &agg.subnet_indices {
        let subnet = &subnets[idx];
        let pivot = subnet.selected_pivot();
        let trail_ip = dict.lookup(pivot).and_then(|e| e.trail.last_valid_ip());
        for (&target, route) in subnet.partial_routes.iter() {
            for (offset, hop) in route.iter().enumerate() {
                let Some(ip) = hop.ip else { continue };
                if ip == target || Some(ip) == trail_ip {
                    continue;
                }
                let is_blindspot = dict.lookup(ip).map(|e| e.is_blindspot).unwrap_or(false);
                if is_blindspot {
                    best_offset = Some(best_offset.map_or(offset, |b: usize| b.min(offset)));
                }
            }
        }
    }
    let offset = best_offset?;
    let mut peers = Vec::new();
    for &idx in &agg.subnet_indices {
        for route in subnets[idx].partial_routes.values() {
            if let Some(hop) = route.get(offset) {
                if let Some(ip) = hop.ip {
                    peers.push(ip);
                }
            }
        }
    }
    peers.sort();
    peers.dedup();
    Some(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{EntryType, Trail};

    #[test]
    fn void_trail_subnets_go_to_home() {
        let mut dict = Dictionary::new();
        let pivot = Ipv4::from_octets(10, 0, 0, 1);
        let e = dict.create(pivot, EntryType::ScannedOk).unwrap();
        e.ttl = Some(1);
        e.trail = Trail::Void;
        let subnet = Subnet::new(pivot);
        let alias_set = AliasSet::default();
        let aggs = aggregate(&dict, &[subnet], &alias_set);
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].key, Some(TrailKey::Home));
    }

    #[test]
    fn distinct_trail_ips_form_distinct_aggregates() {
        let mut dict = Dictionary::new();
        let pivot_a = Ipv4::from_octets(10, 0, 0, 1);
        let pivot_b = Ipv4::from_octets(10, 0, 0, 5);
        let trail_a = Ipv4::from_octets(192, 168, 1, 1);
        let trail_b = Ipv4::from_octets(192, 168, 2, 1);
        for (pivot, trail) in [(pivot_a, trail_a), (pivot_b, trail_b)] {
            let e = dict.create(pivot, EntryType::ScannedOk).unwrap();
            e.ttl = Some(4);
            e.trail = Trail::Valid {
                last_valid_ip: trail,
                anomalies: 0,
                reply_ttl: 64,
                request_ttl: 3,
            };
        }
        let subnets = vec![Subnet::new(pivot_a), Subnet::new(pivot_b)];
        let alias_set = AliasSet::default();
        let aggs = aggregate(&dict, &subnets, &alias_set);
        assert_eq!(aggs.len(), 2);
    }
}
