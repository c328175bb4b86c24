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

//! Scanning pipeline: prescan → distance-estimate → reprobe → dictionary
//! review passes → subnet-discovery alias seeding.

pub mod prescan;
pub mod reprobe;
pub mod scanner;

use std::collections::HashMap;

use crate::alias::hints::Stage;
use crate::alias::{self, AliasHint, AliasSet};
use crate::config::Config;
use crate::dict::Dictionary;
use crate::ipv4::Ipv4;
use crate::prober::Prober;

/// Split `items` into up to `max_threads` roughly-equal consecutive slices,
/// respecting the configured minimum-per-thread floor isn't violated by
/// over-splitting a short list.
pub(crate) fn partition_into_slices(items: &[Ipv4], max_threads: usize) -> Vec<Vec<Ipv4>> {
    if items.is_empty() {
        return Vec::new();
    }
    let threads = max_threads.max(1).min(items.len());
    let chunk_size = items.len().div_ceil(threads);
    items.chunks(chunk_size.max(1)).map(|c| c.to_vec()).collect()
}

/// Run the full scan stage: prescan, distance estimation, reprobing, the
/// dictionary's review passes, and subnet-discovery alias seeding from
/// mutually flickering trios.
pub fn run(dict: &mut Dictionary, cfg: &Config, prober: &dyn Prober, targets: &[Ipv4], src: Ipv4) -> AliasSet {
    prescan::prescan(dict, cfg, prober, targets, src);
    scanner::scan(dict, cfg, prober, src);
    reprobe::reprobe(dict, cfg, prober, src);

    dict.label_post_scan();
    dict.detect_special_ips(cfg.scanning_maximum_flickering_delta);

    let trios = dict.flickering_trios();
    let no_dns = |_: Ipv4| None;
    let mut all_hints: HashMap<Ipv4, AliasHint> = HashMap::new();
    for trio in &trios {
        let hints = alias::collect_hints(prober, cfg, src, trio, Stage::SubnetDiscovery, &no_dns);
        all_hints.extend(hints);
    }
    let aliases = alias::resolve(&all_hints, cfg, true);
    AliasSet::from_aliases(aliases)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_splits_evenly() {
        let items: Vec<Ipv4> = (0..10u32).map(Ipv4).collect();
        let slices = partition_into_slices(&items, 3);
        assert!(slices.len() <= 3);
        assert_eq!(slices.iter().map(|s| s.len()).sum::<usize>(), 10);
    }

    #[test]
    fn partition_of_empty_is_empty() {
        assert!(partition_into_slices(&[], 4).is_empty());
    }
}
