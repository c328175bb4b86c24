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

//! Neighborhood-graph construction.
//!
//! `Vertex`/`Edge` are tagged variants rather than a class hierarchy. The
//! graph owns every vertex in a `Vec<Vertex>` indexed by `VertexId`; edges
//! are owned by their tail vertex; peer back-references are plain
//! non-owning `VertexId`s. `VertexId` always addresses a vertex's position
//! in that `Vec`; a vertex's separate `id` field holds its display-facing,
//! 1-based visit-order number once Pioneer has run.

pub mod aggregate;
pub mod build;
pub mod peerscan;
pub mod voyagers;

use std::collections::HashMap;

use crate::ipv4::{Cidr, Ipv4};

/// A non-owning reference to a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub usize);

/// How an edge's target was located.
#[derive(Debug, Clone)]
pub enum Medium {
    Subnet(Cidr),
    Remote,
    None,
}

/// A directed edge owned by its tail vertex.
#[derive(Debug, Clone)]
pub enum Edge {
    Direct { to: VertexId, medium: Cidr },
    Indirect { to: VertexId, medium: Medium },
    Remote { to: VertexId, routes: Vec<Vec<Ipv4>> },
}

impl Edge {
    pub fn target(&self) -> VertexId {
        match self {
            Edge::Direct { to, .. } => *to,
            Edge::Indirect { to, .. } => *to,
            Edge::Remote { to, .. } => *to,
        }
    }
}

/// Vertex tag (replaces the `Node`/`Cluster` subclass split).
#[derive(Debug, Clone)]
pub enum VertexKind {
    /// A terminus: no aggregate-peer IP identifies it.
    Node { pre_echoing_ips: Vec<Ipv4> },
    /// A peering point backed by more than one aggregate, or with blindspots.
    Cluster {
        aggregate_count: usize,
        blindspots: Vec<Ipv4>,
        flickering_alias_ips: Vec<Ipv4>,
    },
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: VertexId,
    pub kind: VertexKind,
    /// Trail IPs (or pre-echoing IPs) identifying this vertex's aggregate(s).
    pub trail_ips: Vec<Ipv4>,
    /// Contra-pivot IPs across this vertex's constituent subnets.
    pub contra_pivot_ips: Vec<Ipv4>,
    pub edges: Vec<Edge>,
    /// The peer set this vertex references as its own peers, resolved to
    /// vertex IDs after all vertices exist.
    pub peers: Vec<VertexId>,
    /// Aliases discovered by Galileo at full resolution.
    pub aliases: Vec<crate::alias::Alias>,
}

impl Vertex {
    fn new(id: VertexId, kind: VertexKind) -> Self {
        Vertex {
            id,
            kind,
            trail_ips: Vec::new(),
            contra_pivot_ips: Vec::new(),
            edges: Vec::new(),
            peers: Vec::new(),
            aliases: Vec::new(),
        }
    }
}

/// The final neighborhood graph: vertices owned here, edges owned by their
/// tail vertex.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub vertices: Vec<Vertex>,
    /// 2^20-bucket subnet index, keyed by `Cidr::index_bucket`.
    pub subnet_index: HashMap<u32, Vec<usize>>,
    pub subnets: Vec<crate::subnet::Subnet>,
    /// Assigned by the Pioneer voyager; 0 until Pioneer runs.
    pub vertex_count: usize,
}

impl Graph {
    pub fn push_vertex(&mut self, kind: VertexKind) -> VertexId {
        let id = VertexId(self.vertices.len());
        self.vertices.push(Vertex::new(id, kind));
        id
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.0]
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id.0]
    }

    /// Build the subnet index from `self.subnets`.
    pub fn index_subnets(&mut self) {
        self.subnet_index.clear();
        for (idx, subnet) in self.subnets.iter().enumerate() {
            self.subnet_index.entry(subnet.prefix.index_bucket()).or_default().push(idx);
        }
    }

    /// First subnet (if any) whose bounds contain `ip`.
    pub fn find_subnet_containing(&self, ip: Ipv4) -> Option<&crate::subnet::Subnet> {
        let bucket = Cidr::new(ip, 32).index_bucket();
        self.subnet_index
            .get(&bucket)
            .into_iter()
            .flatten()
            .map(|&idx| &self.subnets[idx])
            .find(|s| s.contains(ip))
    }

    /// Gates: vertices with no incoming edges, i.e. the roots Pioneer
    /// starts its forward walk from.
    pub fn gates(&self) -> Vec<VertexId> {
        let mut has_incoming = vec![false; self.vertices.len()];
        for v in &self.vertices {
            for e in &v.edges {
                has_incoming[e.target().0] = true;
            }
        }
        (0..self.vertices.len())
            .filter(|&i| !has_incoming[i])
            .map(VertexId)
            .collect()
    }
}
