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

//! Subnet data model. The inference and post-processing algorithms live in
//! the sibling `inference`/`postprocess` modules; this module only holds the
//! shared types.

pub mod inference;
pub mod postprocess;

use std::collections::HashMap;

use crate::dict::{Dictionary, RouteHop};
use crate::ipv4::{Cidr, Ipv4};

/// How an interface entered a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum InterfaceStatus {
    SelectedPivot,
    PivotByRule1,
    PivotByRule2,
    PivotByRule3,
    PivotByRule4,
    PivotByRule5,
    ContraPivot,
    AltContraPivot,
    Outlier,
}

impl InterfaceStatus {
    pub fn pivot_by_rule(rule: u8) -> InterfaceStatus {
        match rule {
            1 => InterfaceStatus::PivotByRule1,
            2 => InterfaceStatus::PivotByRule2,
            3 => InterfaceStatus::PivotByRule3,
            4 => InterfaceStatus::PivotByRule4,
            5 => InterfaceStatus::PivotByRule5,
            other => panic!("not a rule number: {other}"),
        }
    }

    pub fn is_pivot(&self) -> bool {
        matches!(
            self,
            InterfaceStatus::SelectedPivot
                | InterfaceStatus::PivotByRule1
                | InterfaceStatus::PivotByRule2
                | InterfaceStatus::PivotByRule3
                | InterfaceStatus::PivotByRule4
                | InterfaceStatus::PivotByRule5
        )
    }

    pub fn is_contra_pivot(&self) -> bool {
        matches!(self, InterfaceStatus::ContraPivot | InterfaceStatus::AltContraPivot)
    }

    /// Statuses eligible to seed peer discovery: never rule 2, which
    /// indicates a partial trail.
    pub fn eligible_for_peer_discovery(&self) -> bool {
        matches!(
            self,
            InterfaceStatus::SelectedPivot
                | InterfaceStatus::PivotByRule1
                | InterfaceStatus::PivotByRule3
                | InterfaceStatus::PivotByRule4
                | InterfaceStatus::PivotByRule5
        )
    }
}

#[derive(Debug, Clone)]
pub struct SubnetInterface {
    pub addr: Ipv4,
    pub status: InterfaceStatus,
}

#[derive(Debug, Clone)]
pub struct Subnet {
    pub initial_pivot: Ipv4,
    pub prefix: Cidr,
    pub adjusted_prefix: Option<Cidr>,
    pub interfaces: Vec<SubnetInterface>,
    pub stop_description: String,
    pub needs_post_processing: bool,
    pub partial_routes: HashMap<Ipv4, Vec<RouteHop>>,
    pub pre_trail_ips: Vec<Ipv4>,
    pub pre_trail_offset: Option<usize>,
}

impl Subnet {
    pub fn new(initial_pivot: Ipv4) -> Self {
        Subnet {
            initial_pivot,
            prefix: Cidr::new(initial_pivot, 32),
            adjusted_prefix: None,
            interfaces: vec![SubnetInterface {
                addr: initial_pivot,
                status: InterfaceStatus::SelectedPivot,
            }],
            stop_description: String::new(),
            needs_post_processing: false,
            partial_routes: HashMap::new(),
            pre_trail_ips: Vec::new(),
            pre_trail_offset: None,
        }
    }

    pub fn selected_pivot(&self) -> Ipv4 {
        self.interfaces
            .iter()
            .find(|i| i.status == InterfaceStatus::SelectedPivot)
            .map(|i| i.addr)
            .expect("a subnet always has exactly one selected pivot")
    }

    pub fn contra_pivots(&self) -> Vec<Ipv4> {
        self.interfaces
            .iter()
            .filter(|i| i.status.is_contra_pivot())
            .map(|i| i.addr)
            .collect()
    }

    pub fn pivots(&self) -> Vec<Ipv4> {
        self.interfaces
            .iter()
            .filter(|i| i.status.is_pivot())
            .map(|i| i.addr)
            .collect()
    }

    pub fn outliers(&self) -> Vec<Ipv4> {
        self.interfaces
            .iter()
            .filter(|i| i.status == InterfaceStatus::Outlier)
            .map(|i| i.addr)
            .collect()
    }

    pub fn lower(&self) -> Ipv4 {
        self.prefix.lower()
    }

    pub fn upper(&self) -> Ipv4 {
        self.prefix.upper()
    }

    pub fn contains(&self, ip: Ipv4) -> bool {
        self.prefix.contains(ip)
    }

    /// Smallest prefix length that still encompasses every interface: the
    /// "adjusted prefix" search.
    pub fn compute_adjusted_prefix(&mut self) {
        let lo = self.interfaces.iter().map(|i| i.addr).min().unwrap();
        let hi = self.interfaces.iter().map(|i| i.addr).max().unwrap();
        for len in (self.prefix.prefix_len()..=32).rev() {
            let candidate = Cidr::new(lo, len).network();
            if candidate.contains(hi) {
                self.adjusted_prefix = Some(candidate);
                break;
            }
        }
    }
}

/// Invariant checks exposed for tests and for the post-processor to assert
/// on merge results.
pub fn check_invariants(subnet: &Subnet) -> Result<(), String> {
    let prefix_len = subnet.prefix.prefix_len();
    if !(20..=32).contains(&prefix_len) {
        return Err(format!("prefix length {prefix_len} out of [20,32]"));
    }
    for iface in &subnet.interfaces {
        if !subnet.contains(iface.addr) {
            return Err(format!("{} outside subnet bounds {}", iface.addr, subnet.prefix));
        }
    }
    let pivot_count = subnet
        .interfaces
        .iter()
        .filter(|i| i.status == InterfaceStatus::SelectedPivot)
        .count();
    if pivot_count != 1 {
        return Err(format!("expected exactly one selected pivot, found {pivot_count}"));
    }
    if subnet.contra_pivots().len() > 5 {
        return Err("more than 5 contra-pivots".to_string());
    }
    Ok(())
}

/// Subnets are ordered by prefix length then lower border and must not
/// overlap.
pub fn subnets_sorted_and_disjoint(subnets: &[Subnet]) -> bool {
    let mut sorted: Vec<&Subnet> = subnets.iter().collect();
    sorted.sort_by_key(|s| s.lower());
    sorted.windows(2).all(|w| w[0].upper() < w[1].lower())
}

/// Flag every subnet's selected-pivot trail IP as denoting a neighborhood: a
/// network region a set of subnets clusters around. Run once, after subnet
/// inference and
/// before the peer scanner, so `peerscan::walk_backward`'s stop condition
/// can recognize these hops.
pub fn mark_neighborhoods(dict: &mut Dictionary, subnets: &[Subnet]) {
    for subnet in subnets {
        let Some(trail_ip) = dict.lookup(subnet.selected_pivot()).and_then(|e| e.trail.last_valid_ip()) else {
            continue;
        };
        if let Some(entry) = dict.lookup_mut(trail_ip) {
            entry.denotes_neighborhood = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{EntryType, Trail};

    #[test]
    fn marks_trail_ip_of_selected_pivot() {
        let mut dict = Dictionary::new();
        let pivot = Ipv4::from_octets(10, 0, 0, 1);
        let trail_ip = Ipv4::from_octets(10, 0, 0, 254);
        let e = dict.create(pivot, EntryType::ScannedOk).unwrap();
        e.trail = Trail::Valid {
            last_valid_ip: trail_ip,
            anomalies: 0,
            reply_ttl: 64,
            request_ttl: 5,
        };
        dict.create(trail_ip, EntryType::SeenInTrail).unwrap();
        let subnets = vec![Subnet::new(pivot)];
        mark_neighborhoods(&mut dict, &subnets);
        assert!(dict.lookup(trail_ip).unwrap().denotes_neighborhood);
    }
}
