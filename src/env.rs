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

//! `Environment`: the sole process-wide state, owning the IP dictionary,
//! subnet list, alias sets, and final graph. Passed by reference into every
//! phase; nothing here is a mutable global.

use crate::alias::AliasSet;
use crate::config::Config;
use crate::dict::Dictionary;
use crate::graph::voyagers::{self, GraphStats};
use crate::graph::{aggregate, build, peerscan, Graph};
use crate::ipv4::Ipv4;
use crate::prober::Prober;
use crate::scan;
use crate::subnet::{self, postprocess};

/// Everything a finished run produced, ready for `output::write_all`.
pub struct Environment {
    pub dict: Dictionary,
    pub subnets: Vec<subnet::Subnet>,
    pub subnet_discovery_aliases: AliasSet,
    pub graph_aliases: AliasSet,
    pub graph: Graph,
    pub stats: GraphStats,
}

impl Environment {
    /// Run every phase of the pipeline in order. Each phase allocates a
    /// worker pool, partitions its work list, and joins before the next
    /// phase starts.
    pub fn run(cfg: &Config, prober: &dyn Prober, targets: &[Ipv4], src: Ipv4) -> Environment {
        let mut dict = Dictionary::new();

        log::info!("scanning {} targets", targets.len());
        let subnet_discovery_aliases = scan::run(&mut dict, cfg, prober, targets, src);

        log::info!("inferring subnets");
        let inferred = subnet::inference::infer_subnets(&dict, cfg, &subnet_discovery_aliases);
        let mut subnets = postprocess::postprocess(&dict, &subnet_discovery_aliases, cfg, inferred);
        subnets.sort_by_key(|s| s.lower());

        subnet::mark_neighborhoods(&mut dict, &subnets);

        log::info!("peer-scanning {} subnets", subnets.len());
        peerscan::peerscan(&mut dict, cfg, prober, &subnet_discovery_aliases, src, &mut subnets);

        log::info!("building aggregates");
        let mut aggregates = aggregate::aggregate(&dict, &subnets, &subnet_discovery_aliases);
        aggregate::discover_peers(&subnets, &mut aggregates, &subnet_discovery_aliases);
        let graph_aliases = aggregate::disambiguate(&mut dict, cfg, prober, src, &mut aggregates, &subnets);

        log::info!("constructing the neighborhood graph");
        let mut graph = build::build(&dict, subnets, aggregates, &graph_aliases, &subnet_discovery_aliases);

        voyagers::galileo(&mut graph, &dict, cfg, prober, src);
        let stats = voyagers::cassini(&graph);

        Environment {
            dict,
            subnets: graph.subnets.clone(),
            subnet_discovery_aliases,
            graph_aliases,
            graph,
            stats,
        }
    }
}
