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

//! Result files: one set of `<label>.*` files per run, each opened with mode
//! 0766 so a run started as root leaves files the invoking user can still
//! read. CSV framing is `;`-delimited with headers on, matching the other
//! tabular outputs this crate writes.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::dict::Dictionary;
use crate::env::Environment;
use crate::error::CoreError;
use crate::graph::{Edge, Medium, VertexKind};

#[cfg(unix)]
fn loosen_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o766))
}

#[cfg(not(unix))]
fn loosen_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn create(dir: &Path, label: &str, suffix: &str) -> Result<File, CoreError> {
    let path = dir.join(format!("{label}.{suffix}"));
    let file = File::create(&path)?;
    loosen_permissions(&path)?;
    Ok(file)
}

fn write_ips(dict: &Dictionary, dir: &Path, label: &str) -> Result<(), CoreError> {
    let mut f = create(dir, label, "ips")?;
    for entry in dict.iter() {
        writeln!(
            f,
            "{};{};{};{}",
            entry.addr,
            entry.entry_type,
            entry.ttl.unwrap_or(0),
            entry.inferred_initial_ttl.as_wire_value()
        )?;
    }
    Ok(())
}

fn write_subnets(env: &Environment, dir: &Path, label: &str) -> Result<(), CoreError> {
    let mut f = create(dir, label, "subnets")?;
    for subnet in &env.graph.subnets {
        writeln!(
            f,
            "{};{};{}",
            subnet.prefix,
            subnet.selected_pivot(),
            subnet.contra_pivots().iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(",")
        )?;
    }
    Ok(())
}

fn write_hints(dict: &Dictionary, dir: &Path, label: &str) -> Result<(), CoreError> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(true)
        .delimiter(b';')
        .from_writer(Vec::new());
    for entry in dict.iter() {
        for hint in &entry.alias_hints {
            csv.serialize((entry.addr.to_string(), format!("{:?}", hint.stage), hint.tokens.len()))
                .map_err(|e| CoreError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        }
    }
    csv.flush()?;
    let mut f = create(dir, label, "hints")?;
    f.write_all(&csv.into_inner().map_err(|e| CoreError::Io(io::Error::new(io::ErrorKind::Other, e)))?)?;
    Ok(())
}

fn write_fingerprints(dict: &Dictionary, dir: &Path, label: &str) -> Result<(), CoreError> {
    let mut f = create(dir, label, "fingerprints")?;
    for entry in dict.iter() {
        writeln!(
            f,
            "{};{};{}",
            entry.addr,
            entry.inferred_initial_ttl.as_wire_value(),
            entry.is_flickering
        )?;
    }
    Ok(())
}

fn write_aliases(env: &Environment, dir: &Path, label: &str) -> Result<(), CoreError> {
    let write_set = |suffix: &str, set: &crate::alias::AliasSet| -> Result<(), CoreError> {
        let mut f = create(dir, label, suffix)?;
        for alias in &set.aliases {
            let line = alias.members.iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(",");
            writeln!(f, "{line}")?;
        }
        Ok(())
    };
    write_set("aliases-1", &env.subnet_discovery_aliases)?;
    write_set("aliases-2", &env.graph_aliases)?;

    let mut f = create(dir, label, "aliases-f")?;
    for vertex in &env.graph.vertices {
        for alias in &vertex.aliases {
            let line = alias.members.iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(",");
            writeln!(f, "{line}")?;
        }
    }
    Ok(())
}

fn write_peers(env: &Environment, dir: &Path, label: &str) -> Result<(), CoreError> {
    let mut f = create(dir, label, "peers")?;
    for vertex in &env.graph.vertices {
        let peers = vertex
            .peers
            .iter()
            .map(|p| env.graph.vertices[p.0].id.0.to_string())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(f, "{};{}", vertex.id.0, peers)?;
    }
    Ok(())
}

fn write_neighborhoods(dict: &Dictionary, dir: &Path, label: &str) -> Result<(), CoreError> {
    let mut f = create(dir, label, "neighborhoods")?;
    for entry in dict.iter() {
        if entry.denotes_neighborhood {
            writeln!(f, "{}", entry.addr)?;
        }
    }
    Ok(())
}

fn write_graph(env: &Environment, dir: &Path, label: &str) -> Result<(), CoreError> {
    let mut f = create(dir, label, "graph")?;
    for vertex in &env.graph.vertices {
        let kind = match &vertex.kind {
            VertexKind::Node { pre_echoing_ips } => {
                format!("Node({})", pre_echoing_ips.iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(","))
            }
            VertexKind::Cluster {
                aggregate_count,
                blindspots,
                flickering_alias_ips,
            } => format!(
                "Cluster(aggregates={aggregate_count},blindspots={},flickering={})",
                blindspots.iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(","),
                flickering_alias_ips.iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(",")
            ),
        };
        writeln!(f, "vertex {} {kind}", vertex.id.0)?;
        for edge in &vertex.edges {
            match edge {
                Edge::Direct { to, medium } => {
                    writeln!(f, "edge {} -> {} direct {medium}", vertex.id.0, env.graph.vertices[to.0].id.0)?
                }
                Edge::Indirect { to, medium } => {
                    let medium = match medium {
                        Medium::Subnet(cidr) => cidr.to_string(),
                        Medium::Remote => "remote".to_string(),
                        Medium::None => "none".to_string(),
                    };
                    writeln!(f, "edge {} -> {} indirect {medium}", vertex.id.0, env.graph.vertices[to.0].id.0)?
                }
                Edge::Remote { to, routes } => {
                    writeln!(
                        f,
                        "edge {} -> {} remote routes={}",
                        vertex.id.0,
                        env.graph.vertices[to.0].id.0,
                        routes.len()
                    )?
                }
            }
        }
    }
    Ok(())
}

fn write_metrics(env: &Environment, dir: &Path, label: &str) -> Result<(), CoreError> {
    let mut f = create(dir, label, "metrics")?;
    let s = &env.stats;
    writeln!(f, "vertex_count;{}", s.vertex_count)?;
    writeln!(f, "edge_count;{}", s.edge_count)?;
    writeln!(f, "node_count;{}", s.node_count)?;
    writeln!(f, "cluster_count;{}", s.cluster_count)?;
    writeln!(f, "subnet_count;{}", s.subnet_count)?;
    writeln!(f, "direct_edges;{}", s.direct_edges)?;
    writeln!(f, "indirect_edges;{}", s.indirect_edges)?;
    writeln!(f, "remote_edges;{}", s.remote_edges)?;
    writeln!(f, "aliased_vertex_count;{}", s.aliased_vertex_count)?;
    writeln!(f, "connected_components;{}", s.connected_components)?;
    writeln!(f, "longest_forward_path;{}", s.longest_forward_path)?;
    for (degree, count) in {
        let mut pairs: Vec<_> = s.degree_histogram.iter().collect();
        pairs.sort_by_key(|(d, _)| **d);
        pairs
    } {
        writeln!(f, "degree_histogram[{degree}];{count}")?;
    }
    Ok(())
}

/// Write every result file into `dir` under the `<label>` stem.
pub fn write_all(env: &Environment, dir: &Path, label: &str) -> Result<Vec<PathBuf>, CoreError> {
    std::fs::create_dir_all(dir)?;
    write_ips(&env.dict, dir, label)?;
    write_subnets(env, dir, label)?;
    write_hints(&env.dict, dir, label)?;
    write_fingerprints(&env.dict, dir, label)?;
    write_aliases(env, dir, label)?;
    write_peers(env, dir, label)?;
    write_neighborhoods(&env.dict, dir, label)?;
    write_graph(env, dir, label)?;
    write_metrics(env, dir, label)?;

    let suffixes = [
        "ips",
        "subnets",
        "hints",
        "fingerprints",
        "aliases-1",
        "aliases-2",
        "aliases-f",
        "peers",
        "neighborhoods",
        "graph",
        "metrics",
    ];
    Ok(suffixes.iter().map(|s| dir.join(format!("{label}.{s}"))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn empty_environment() -> Environment {
        Environment {
            dict: Dictionary::new(),
            subnets: Vec::new(),
            subnet_discovery_aliases: crate::alias::AliasSet::default(),
            graph_aliases: crate::alias::AliasSet::default(),
            graph: Graph::default(),
            stats: crate::graph::voyagers::GraphStats::default(),
        }
    }

    #[test]
    fn writes_every_file() {
        let dir = std::env::temp_dir().join(format!("topoprobe-output-test-{}", std::process::id()));
        let env = empty_environment();
        let paths = write_all(&env, &dir, "run").unwrap();
        assert_eq!(paths.len(), 11);
        for path in &paths {
            assert!(path.exists());
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
