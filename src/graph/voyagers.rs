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

//! The four graph-traversal passes, named after their probe-mission
//! counterparts: Pioneer assigns vertex IDs by forward DFS, Mariner orders
//! vertices for emission, Galileo resolves per-vertex aliases, Cassini
//! computes summary statistics.

use std::collections::{HashMap, HashSet};

use crate::alias;
use crate::config::Config;
use crate::dict::Dictionary;
use crate::ipv4::Ipv4;
use crate::prober::Prober;

use super::{Graph, VertexId, VertexKind};

/// Forward DFS from every gate (vertex with no incoming edges), visiting
/// peer pointers too, numbering reached vertices 1, 2, 3, ... in visit
/// order. Each vertex's `id` is overwritten with its 1-based visit-order
/// number (a permutation of 1..N over the reachable vertices); the `VertexId`
/// used to index `graph.vertices` is unaffected and keeps addressing by
/// position. Sets `graph.vertex_count` to the number of vertices reached.
pub fn pioneer(graph: &mut Graph) {
    let mut visited = vec![false; graph.vertices.len()];
    let mut order = 0usize;

    let mut starts = graph.gates();
    if starts.is_empty() {
        starts = (0..graph.vertices.len()).map(VertexId).collect();
    }

    for start in starts {
        if visited[start.0] {
            continue;
        }
        let mut stack = vec![start];
        while let Some(v) = stack.pop() {
            if visited[v.0] {
                continue;
            }
            visited[v.0] = true;
            order += 1;
            graph.vertices[v.0].id = VertexId(order);
            let vertex = &graph.vertices[v.0];
            let mut next: Vec<VertexId> = vertex.edges.iter().map(|e| e.target()).collect();
            next.extend(vertex.peers.iter().copied());
            for n in next.into_iter().rev() {
                if !visited[n.0] {
                    stack.push(n);
                }
            }
        }
    }
    graph.vertex_count = order;
}

/// Vertices in ascending-ID order, the order result files emit them in.
pub fn mariner(graph: &Graph) -> Vec<VertexId> {
    let mut order: Vec<VertexId> = (0..graph.vertices.len()).map(VertexId).collect();
    order.sort_by_key(|v| graph.vertices[v.0].id.0);
    order
}

/// Resolve an alias for every non-terminus vertex from its contra-pivot and
/// trail IPs, at full resolution.
pub fn galileo(graph: &mut Graph, dict: &Dictionary, cfg: &Config, prober: &dyn Prober, src: Ipv4) {
    let no_dns = |_: Ipv4| None;

    for idx in 0..graph.vertices.len() {
        let candidates: Vec<Ipv4> = {
            let v = &graph.vertices[idx];
            let mut ips: Vec<Ipv4> = v.contra_pivot_ips.iter().chain(v.trail_ips.iter()).copied().collect();
            ips.sort();
            ips.dedup();
            ips.retain(|ip| dict.contains(*ip));
            ips
        };
        if candidates.len() < 2 {
            continue;
        }
        let hints = alias::collect_hints(prober, cfg, src, &candidates, alias::Stage::FullResolution, &no_dns);
        let resolved = alias::resolve(&hints, cfg, cfg.alias_resolution_strict_mode);
        graph.vertices[idx].aliases = resolved.into_iter().filter(|a| a.members.len() >= 2).collect();
    }
}

/// Summary statistics over the finished graph, backing the metrics output.
#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    pub vertex_count: usize,
    pub edge_count: usize,
    pub node_count: usize,
    pub cluster_count: usize,
    pub subnet_count: usize,
    pub direct_edges: usize,
    pub indirect_edges: usize,
    pub remote_edges: usize,
    pub aliased_vertex_count: usize,
    pub degree_histogram: HashMap<usize, usize>,
    pub connected_components: usize,
    pub longest_forward_path: usize,
}

pub fn cassini(graph: &Graph) -> GraphStats {
    let mut stats = GraphStats {
        vertex_count: graph.vertices.len(),
        subnet_count: graph.subnets.len(),
        ..Default::default()
    };

    for v in &graph.vertices {
        match v.kind {
            VertexKind::Node { .. } => stats.node_count += 1,
            VertexKind::Cluster { .. } => stats.cluster_count += 1,
        }
        if !v.aliases.is_empty() {
            stats.aliased_vertex_count += 1;
        }
        stats.edge_count += v.edges.len();
        for e in &v.edges {
            match e {
                super::Edge::Direct { .. } => stats.direct_edges += 1,
                super::Edge::Indirect { .. } => stats.indirect_edges += 1,
                super::Edge::Remote { .. } => stats.remote_edges += 1,
            }
        }
        let degree = v.edges.len() + v.peers.len();
        *stats.degree_histogram.entry(degree).or_default() += 1;
    }

    stats.connected_components = count_components(graph);
    stats.longest_forward_path = graph
        .gates()
        .iter()
        .map(|&g| longest_path_from(graph, g))
        .max()
        .unwrap_or(0);

    stats
}

/// Connected components over the undirected closure of edges + peers.
fn count_components(graph: &Graph) -> usize {
    let n = graph.vertices.len();
    let mut adjacency: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for (i, v) in graph.vertices.iter().enumerate() {
        for e in &v.edges {
            adjacency[i].insert(e.target().0);
            adjacency[e.target().0].insert(i);
        }
        for p in &v.peers {
            adjacency[i].insert(p.0);
            adjacency[p.0].insert(i);
        }
    }

    let mut visited = vec![false; n];
    let mut components = 0;
    for start in 0..n {
        if visited[start] {
            continue;
        }
        components += 1;
        let mut stack = vec![start];
        while let Some(u) = stack.pop() {
            if visited[u] {
                continue;
            }
            visited[u] = true;
            for &w in &adjacency[u] {
                if !visited[w] {
                    stack.push(w);
                }
            }
        }
    }
    components
}

/// Longest simple forward-edge path reachable from `start` (DAG-style DFS;
/// cycles are cut by the visited set, matching Cassini's "longest path from
/// each gate" metric).
fn longest_path_from(graph: &Graph, start: VertexId) -> usize {
    fn visit(graph: &Graph, v: VertexId, visiting: &mut HashSet<usize>) -> usize {
        if !visiting.insert(v.0) {
            return 0;
        }
        let best = graph.vertices[v.0]
            .edges
            .iter()
            .map(|e| 1 + visit(graph, e.target(), visiting))
            .max()
            .unwrap_or(0);
        visiting.remove(&v.0);
        best
    }
    let mut visiting = HashSet::new();
    visit(graph, start, &mut visiting)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Vertex};

    fn bare_vertex(id: usize, kind: VertexKind) -> Vertex {
        Vertex {
            id: VertexId(id),
            kind,
            trail_ips: Vec::new(),
            contra_pivot_ips: Vec::new(),
            edges: Vec::new(),
            peers: Vec::new(),
            aliases: Vec::new(),
        }
    }

    #[test]
    fn pioneer_numbers_every_reachable_vertex() {
        let mut graph = Graph::default();
        graph.vertices.push(bare_vertex(0, VertexKind::Node { pre_echoing_ips: vec![] }));
        graph.vertices.push(bare_vertex(1, VertexKind::Node { pre_echoing_ips: vec![] }));
        graph.vertices[0].edges.push(Edge::Remote {
            to: VertexId(1),
            routes: vec![],
        });
        pioneer(&mut graph);
        assert_eq!(graph.vertex_count, 2);
    }

    #[test]
    fn mariner_orders_ascending() {
        let mut graph = Graph::default();
        for i in 0..3 {
            graph.vertices.push(bare_vertex(i, VertexKind::Node { pre_echoing_ips: vec![] }));
        }
        let order = mariner(&graph);
        assert_eq!(order, vec![VertexId(0), VertexId(1), VertexId(2)]);
    }

    #[test]
    fn single_isolated_vertex_is_its_own_component() {
        let mut graph = Graph::default();
        graph.vertices.push(bare_vertex(0, VertexKind::Node { pre_echoing_ips: vec![] }));
        let stats = cassini(&graph);
        assert_eq!(stats.connected_components, 1);
        assert_eq!(stats.node_count, 1);
    }
}
