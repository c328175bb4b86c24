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

//! Alias resolution engine: hint collection plus the Ally/velocity/
//! reverse-DNS/fingerprint-group methods that partition interfaces into
//! routers.

pub mod hints;
pub mod resolver;

use std::collections::HashMap;

use crate::ipv4::Ipv4;

pub use hints::{collect_hints, AliasHint, CounterClass, Stage, TokenCounter};
pub use resolver::{ally, dns_match, group_ally, resolve, velocity_overlap, Alias, AllyResult};

/// A partitioned list of `Alias`es plus an `IP -> Alias` index. One
/// `AliasSet` exists per stage.
#[derive(Debug, Clone, Default)]
pub struct AliasSet {
    pub aliases: Vec<Alias>,
    by_ip: HashMap<Ipv4, usize>,
}

impl AliasSet {
    pub fn from_aliases(aliases: Vec<Alias>) -> Self {
        let mut by_ip = HashMap::new();
        for (idx, alias) in aliases.iter().enumerate() {
            for &ip in &alias.members {
                by_ip.insert(ip, idx);
            }
        }
        AliasSet { aliases, by_ip }
    }

    pub fn alias_of(&self, ip: Ipv4) -> Option<&Alias> {
        self.by_ip.get(&ip).map(|&idx| &self.aliases[idx])
    }

    /// True iff both IPs are known and belong to the same alias.
    pub fn same_alias(&self, a: Ipv4, b: Ipv4) -> bool {
        matches!((self.by_ip.get(&a), self.by_ip.get(&b)), (Some(x), Some(y)) if x == y)
    }

    pub fn has_alias_for(&self, ip: Ipv4) -> bool {
        self.by_ip.contains_key(&ip)
    }

    /// Canonical representative of `ip`'s alias: its first member, or `ip`
    /// itself if it belongs to no alias.
    pub fn canonical(&self, ip: Ipv4) -> Ipv4 {
        self.alias_of(ip)
            .and_then(|a| a.members.first().copied())
            .unwrap_or(ip)
    }

    /// Members of `ip`'s alias with at least 2 interfaces, as used to seed
    /// the graph-building alias set.
    pub fn aliases_with_min_size(&self, min: usize) -> Vec<Alias> {
        self.aliases.iter().filter(|a| a.members.len() >= min).cloned().collect()
    }
}
