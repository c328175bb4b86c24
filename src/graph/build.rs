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

//! Vertex construction and edge wiring: turns the aggregate list into the
//! final neighborhood graph.

use std::collections::{HashMap, HashSet};

use crate::alias::AliasSet;
use crate::dict::Dictionary;
use crate::ipv4::Ipv4;
use crate::subnet::Subnet;

use super::aggregate::Aggregate;
use super::{Edge, Graph, Medium, VertexId, VertexKind};

/// IPs that identify an aggregate: its trail IP for a `Trail`-keyed
/// aggregate, its pre-trail IPs for an `Echo`-keyed one, none for `Home`.
fn identifying_ips(agg: &Aggregate) -> Vec<Ipv4> {
    match &agg.key {
        Some(super::aggregate::TrailKey::Trail(ip)) => vec![*ip],
        Some(super::aggregate::TrailKey::Echo { .. }) => agg.pre_trail_ips.iter().copied().collect(),
        _ => Vec::new(),
    }
}

/// A merged peer group: every IP the graph-building alias set says belongs
/// to the same router, plus the aggregates it identifies.
#[derive(Debug, Default)]
struct Peer {
    ips: Vec<Ipv4>,
}

fn canonical_peer_key(ip: Ipv4, graph_aliases: &AliasSet) -> Ipv4 {
    graph_aliases.canonical(ip)
}

/// Build the neighborhood graph from aggregates: vertex construction
/// followed by edge wiring, running the Pioneer voyager at the end.
pub fn build(
    dict: &Dictionary,
    subnets: Vec<Subnet>,
    aggregates: Vec<Aggregate>,
    graph_aliases: &AliasSet,
    subnet_discovery_aliases: &AliasSet,
) -> Graph {
    let mut graph = Graph {
        subnets,
        ..Default::default()
    };
    graph.index_subnets();

    // identifying ip -> aggregate index, after canonicalizing through the
    // graph-building alias set so aliased trail IPs collapse together.
    let mut identified_by: HashMap<Ipv4, usize> = HashMap::new();
    for (idx, agg) in aggregates.iter().enumerate() {
        for ip in identifying_ips(agg) {
            identified_by.insert(canonical_peer_key(ip, graph_aliases), idx);
        }
    }

    // Every peer/misc IP across every aggregate, canonicalized.
    let mut all_peer_ips: HashSet<Ipv4> = HashSet::new();
    for agg in &aggregates {
        for &ip in agg.peers.iter().chain(agg.misc_ips.iter()) {
            all_peer_ips.insert(canonical_peer_key(ip, graph_aliases));
        }
    }

    // An aggregate is a terminus iff none of its identifying IPs appears in
    // any aggregate's peer/misc list.
    let is_terminus: Vec<bool> = aggregates
        .iter()
        .map(|agg| identifying_ips(agg).iter().all(|ip| !all_peer_ips.contains(&canonical_peer_key(*ip, graph_aliases))))
        .collect();

    let mut vertex_of_aggregate: Vec<Option<VertexId>> = vec![None; aggregates.len()];

    for (idx, agg) in aggregates.iter().enumerate() {
        if is_terminus[idx] {
            let pre_echoing = match &agg.key {
                Some(super::aggregate::TrailKey::Echo { .. }) => agg.pre_trail_ips.iter().copied().collect(),
                _ => Vec::new(),
            };
            let vid = graph.push_vertex(VertexKind::Node { pre_echoing_ips: pre_echoing });
            vertex_of_aggregate[idx] = Some(vid);
            graph.vertex_mut(vid).trail_ips = identifying_ips(agg);
            graph.vertex_mut(vid).contra_pivot_ips = collect_contra_pivots(dict, &graph.subnets, agg);
        }
    }

    // Group peer IPs (merged under the graph-building alias set) into Peer
    // structures, then one vertex per group.
    let mut peer_groups: HashMap<Ipv4, Peer> = HashMap::new();
    for &ip in &all_peer_ips {
        peer_groups.entry(ip).or_default().ips.push(ip);
    }
    // Fold every alias member into its canonical group so multi-member
    // aliases contribute all their IPs, not just the canonical one.
    for alias in &graph_aliases.aliases {
        if alias.members.len() < 2 {
            continue;
        }
        let canonical = graph_aliases.canonical(alias.members[0]);
        if let Some(peer) = peer_groups.get_mut(&canonical) {
            for &m in &alias.members {
                if !peer.ips.contains(&m) {
                    peer.ips.push(m);
                }
            }
        }
    }

    let mut peer_vertex: HashMap<Ipv4, VertexId> = HashMap::new();
    for (key, peer) in &peer_groups {
        let mut identified_aggs: Vec<usize> = Vec::new();
        let mut blindspots: Vec<Ipv4> = Vec::new();
        for &ip in &peer.ips {
            if let Some(&agg_idx) = identified_by.get(&ip) {
                if !identified_aggs.contains(&agg_idx) {
                    identified_aggs.push(agg_idx);
                }
            } else if dict.lookup(ip).map(|e| e.is_blindspot).unwrap_or(false) {
                blindspots.push(ip);
            }
        }

        let kind = if identified_aggs.len() == 1 && blindspots.is_empty() {
            VertexKind::Node { pre_echoing_ips: Vec::new() }
        } else {
            let flickering_alias_ips: Vec<Ipv4> = peer
                .ips
                .iter()
                .copied()
                .filter(|&ip| dict.lookup(ip).map(|e| subnet_discovery_aliases.has_alias_for(ip) && e.is_flickering).unwrap_or(false))
                .collect();
            VertexKind::Cluster {
                aggregate_count: identified_aggs.len(),
                blindspots: blindspots.clone(),
                flickering_alias_ips,
            }
        };
        let vid = graph.push_vertex(kind);
        peer_vertex.insert(*key, vid);

        let mut trail_ips = Vec::new();
        let mut contra_pivots = Vec::new();
        for &agg_idx in &identified_aggs {
            vertex_of_aggregate[agg_idx] = Some(vid);
            trail_ips.extend(identifying_ips(&aggregates[agg_idx]));
            contra_pivots.extend(collect_contra_pivots(dict, &graph.subnets, &aggregates[agg_idx]));
        }
        graph.vertex_mut(vid).trail_ips = trail_ips;
        graph.vertex_mut(vid).contra_pivot_ips = contra_pivots;
    }

    // Any aggregate still unassigned (a peering aggregate whose identifying
    // IP never made it into a Peer group, e.g. filtered upstream) falls back
    // to its own Node so no aggregate is silently dropped.
    for (idx, agg) in aggregates.iter().enumerate() {
        if vertex_of_aggregate[idx].is_none() {
            let vid = graph.push_vertex(VertexKind::Node { pre_echoing_ips: Vec::new() });
            graph.vertex_mut(vid).trail_ips = identifying_ips(agg);
            graph.vertex_mut(vid).contra_pivot_ips = collect_contra_pivots(dict, &graph.subnets, agg);
            vertex_of_aggregate[idx] = Some(vid);
        }
    }

    // GraphPeers: for each vertex, the union of the peer IPs its
    // constituent aggregates reference (their forward pointers).
    let mut graph_peers: HashMap<usize, HashSet<Ipv4>> = HashMap::new();
    for (idx, agg) in aggregates.iter().enumerate() {
        let vid = vertex_of_aggregate[idx].unwrap();
        let entry = graph_peers.entry(vid.0).or_default();
        for &ip in agg.peers.iter().chain(agg.misc_ips.iter()) {
            entry.insert(canonical_peer_key(ip, graph_aliases));
        }
    }

    for vid in 0..graph.vertices.len() {
        let Some(peers) = graph_peers.get(&vid) else { continue };
        let targets: Vec<VertexId> = peers
            .iter()
            .filter_map(|ip| peer_vertex.get(ip).copied())
            .filter(|&t| t.0 != vid)
            .collect();
        graph.vertices[vid].peers = targets;
    }

    wire_edges(&mut graph, &aggregates, &vertex_of_aggregate, &identified_by);

    super::voyagers::pioneer(&mut graph);
    graph
}

fn collect_contra_pivots(dict: &Dictionary, subnets: &[Subnet], agg: &Aggregate) -> Vec<Ipv4> {
    let mut out = Vec::new();
    for &idx in &agg.subnet_indices {
        out.extend(subnets[idx].contra_pivots());
    }
    out.retain(|ip| dict.contains(*ip));
    out.sort();
    out.dedup();
    out
}

/// Wire outgoing edges for every vertex with a recorded peer set.
fn wire_edges(
    graph: &mut Graph,
    aggregates: &[Aggregate],
    vertex_of_aggregate: &[Option<VertexId>],
    identified_by: &HashMap<Ipv4, usize>,
) {
    for v_idx in 0..graph.vertices.len() {
        let peers: Vec<VertexId> = graph.vertices[v_idx].peers.clone();
        let source_ips: Vec<Ipv4> = graph.vertices[v_idx].trail_ips.clone();

        for &u in &peers {
            // offset: 0 if any of V's aggregates directly peer U at offset 0;
            // approximate by checking whether any partial route identifying
            // U has a peering point at index 0.
            let offset_zero = aggregates.iter().enumerate().any(|(idx, agg)| {
                vertex_of_aggregate[idx] == Some(VertexId(v_idx))
                    && agg.subnet_indices.iter().any(|&si| {
                        graph.subnets[si]
                            .partial_routes
                            .values()
                            .any(|route| route.first().map(|h| h.kind == crate::dict::RouteHopKind::PeeringPoint).unwrap_or(false))
                    })
            });

            let identifies_u = |ip: Ipv4| identified_by.get(&ip).and_then(|&a| vertex_of_aggregate[a]) == Some(u);

            if offset_zero {
                let direct_subnet = source_ips.iter().find_map(|&ip| {
                    graph.subnets.iter().find(|s| s.contains(ip) && identifies_u(s.selected_pivot()))
                });
                if let Some(s) = direct_subnet {
                    let medium = s.prefix;
                    graph.vertices[v_idx].edges.push(Edge::Direct { to: u, medium });
                    continue;
                }
                let medium = source_ips
                    .iter()
                    .find_map(|&ip| graph.find_subnet_containing(ip).map(|s| Medium::Subnet(s.prefix)))
                    .unwrap_or(Medium::None);
                graph.vertices[v_idx].edges.push(Edge::Indirect { to: u, medium });
            } else {
                let mut routes: Vec<Vec<Ipv4>> = Vec::new();
                for (idx, agg) in aggregates.iter().enumerate() {
                    if vertex_of_aggregate[idx] != Some(VertexId(v_idx)) {
                        continue;
                    }
                    for &si in &agg.subnet_indices {
                        for route in graph.subnets[si].partial_routes.values() {
                            let Some(first) = route.first().and_then(|h| h.ip) else { continue };
                            if !source_ips.contains(&first) {
                                continue;
                            }
                            let tail: Vec<Ipv4> = route.iter().skip(1).filter_map(|h| h.ip).collect();
                            if !routes.contains(&tail) {
                                routes.push(tail);
                            }
                        }
                    }
                }
                graph.vertices[v_idx].edges.push(Edge::Remote { to: u, routes });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{EntryType, Trail};

    #[test]
    fn terminus_home_aggregate_becomes_node() {
        let mut dict = Dictionary::new();
        let pivot = Ipv4::from_octets(10, 0, 0, 1);
        let e = dict.create(pivot, EntryType::ScannedOk).unwrap();
        e.ttl = Some(1);
        e.trail = Trail::Void;
        let subnets = vec![Subnet::new(pivot)];
        let alias_set = AliasSet::default();
        let aggs = super::super::aggregate::aggregate(&dict, &subnets, &alias_set);
        let graph = build(&dict, subnets, aggs, &alias_set, &alias_set);
        assert_eq!(graph.vertices.len(), 1);
        assert!(matches!(graph.vertices[0].kind, VertexKind::Node { .. }));
    }
}
