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

//! The IP dictionary: a 2^20-bucket table keyed by the top 20 bits of the
//! address, plus the review passes that transition the dictionary between
//! pipeline phases.

use std::collections::HashMap;

use crate::alias::hints::AliasHint;
use crate::ipv4::Ipv4;

pub const NUM_BUCKETS: usize = 1 << 20;

/// How an entry came to exist and what kind of answer it gave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum EntryType {
    ResponsiveTarget,
    ScannedOk,
    ScannedFail,
    SeenInTrail,
    SeenInTraceroute,
}

/// Inferred sender-initial-TTL for a Time-Exceeded (or Echo-Reply) sender.
/// Modeled as an explicit enum rather than a `u8` with a magic 42 for
/// "conflicting".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InitialTtl {
    #[default]
    Unknown,
    Known(u8),
    Conflicting,
}

impl InitialTtl {
    /// Renders the way the `.ips`/`.fingerprints` text format expects:
    /// `0` for unknown, `42` for conflicting, the TTL otherwise.
    pub fn as_wire_value(&self) -> u8 {
        match self {
            InitialTtl::Unknown => 0,
            InitialTtl::Known(t) => *t,
            InitialTtl::Conflicting => 42,
        }
    }

    /// Ladder of 32/64/128/255, with a correction when the target is
    /// >= 32 hops away.
    pub fn from_reply_ttl(reply_ttl: u8, request_ttl: u8) -> InitialTtl {
        let reply = reply_ttl as u16;
        let ttl = if reply > 128 {
            255
        } else if reply > 64 {
            128
        } else if reply > 32 || request_ttl >= 32 {
            64
        } else {
            32
        };
        InitialTtl::Known(ttl)
    }

    /// Merge a newly observed value with a possibly-already-known one,
    /// applying the 42-conflict rule.
    pub fn merge(self, observed: InitialTtl) -> InitialTtl {
        match (self, observed) {
            (InitialTtl::Unknown, o) => o,
            (s, InitialTtl::Unknown) => s,
            (InitialTtl::Known(a), InitialTtl::Known(b)) if a == b => InitialTtl::Known(a),
            _ => InitialTtl::Conflicting,
        }
    }
}

/// One hop in a target's partial route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteHopKind {
    Unmeasured,
    Anonymous,
    ViaTraceroute,
    PeeringPoint,
}

#[derive(Debug, Clone)]
pub struct RouteHop {
    pub kind: RouteHopKind,
    pub ip: Option<Ipv4>,
    pub request_ttl: u8,
    pub reply_ttl: u8,
}

impl RouteHop {
    pub fn unmeasured() -> Self {
        RouteHop {
            kind: RouteHopKind::Unmeasured,
            ip: None,
            request_ttl: 0,
            reply_ttl: 0,
        }
    }

    pub fn anonymous(request_ttl: u8) -> Self {
        RouteHop {
            kind: RouteHopKind::Anonymous,
            ip: None,
            request_ttl,
            reply_ttl: 0,
        }
    }

    pub fn valid(kind: RouteHopKind, ip: Ipv4, request_ttl: u8, reply_ttl: u8) -> Self {
        RouteHop {
            kind,
            ip: Some(ip),
            request_ttl,
            reply_ttl,
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.kind, RouteHopKind::Unmeasured)
    }

    pub fn is_valid(&self) -> bool {
        self.ip.is_some()
    }
}

/// Identifies the last recognizable hop before a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trail {
    Void,
    AllAnonymous { length: u16 },
    Valid {
        last_valid_ip: Ipv4,
        anomalies: u16,
        reply_ttl: u8,
        request_ttl: u8,
    },
}

impl Trail {
    pub fn last_valid_ip(&self) -> Option<Ipv4> {
        match self {
            Trail::Valid { last_valid_ip, .. } => Some(*last_valid_ip),
            _ => None,
        }
    }

    pub fn anomalies(&self) -> Option<u16> {
        match self {
            Trail::Valid { anomalies, .. } => Some(*anomalies),
            Trail::AllAnonymous { length } => Some(*length),
            Trail::Void => None,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Trail::Valid { anomalies: 0, .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Trail::Void)
    }

    pub fn inferred_initial_ttl(&self) -> InitialTtl {
        match self {
            Trail::Valid {
                reply_ttl,
                request_ttl,
                ..
            } => InitialTtl::from_reply_ttl(*reply_ttl, *request_ttl),
            _ => InitialTtl::Unknown,
        }
    }

    /// Two Trails are equal iff last-valid IP and anomaly count match; this
    /// is exactly `PartialEq` for the `Valid` variant, provided explicitly
    /// for callers that want the rule spelled out.
    pub fn same_as(&self, other: &Trail) -> bool {
        match (self, other) {
            (
                Trail::Valid {
                    last_valid_ip: a,
                    anomalies: na,
                    ..
                },
                Trail::Valid {
                    last_valid_ip: b,
                    anomalies: nb,
                    ..
                },
            ) => a == b && na == nb,
            _ => false,
        }
    }
}

/// The per-IP dictionary value.
#[derive(Debug, Clone)]
pub struct IpEntry {
    pub addr: Ipv4,
    pub ttl: Option<u8>,
    pub observed_ttls: Vec<u8>,
    pub preferred_timeout_ms: Option<u32>,
    pub entry_type: EntryType,
    pub inferred_initial_ttl: InitialTtl,
    pub route: Vec<RouteHop>,
    pub trail: Trail,

    pub is_trail_ip: bool,
    pub is_warping: bool,
    pub is_echoing: bool,
    pub is_flickering: bool,
    pub denotes_neighborhood: bool,
    pub is_blindspot: bool,

    pub flickering_peers: Vec<Ipv4>,
    pub alias_hints: Vec<AliasHint>,
}

impl IpEntry {
    pub fn new(addr: Ipv4, entry_type: EntryType) -> Self {
        IpEntry {
            addr,
            ttl: None,
            observed_ttls: Vec::new(),
            preferred_timeout_ms: None,
            entry_type,
            inferred_initial_ttl: InitialTtl::Unknown,
            route: Vec::new(),
            trail: Trail::Void,
            is_trail_ip: false,
            is_warping: false,
            is_echoing: false,
            is_flickering: false,
            denotes_neighborhood: false,
            is_blindspot: false,
            flickering_peers: Vec::new(),
            alias_hints: Vec::new(),
        }
    }

    /// Record a TTL at which this IP has been observed, keeping
    /// `observed_ttls` ordered and duplicate-free, and `ttl` equal to the
    /// minimum.
    pub fn observe_ttl(&mut self, ttl: u8) {
        if let Err(pos) = self.observed_ttls.binary_search(&ttl) {
            self.observed_ttls.insert(pos, ttl);
        }
        self.ttl = Some(self.observed_ttls[0]);
    }

    pub fn is_warping_from_observations(&self) -> bool {
        self.observed_ttls.len() >= 2
    }
}

/// A 2^20-bucket, sorted-bucket hash table. No concurrent mutation: writers
/// are serialized by the orchestrating thread between phases; shared read
/// during a phase is safe since workers own disjoint slices.
pub struct Dictionary {
    buckets: Vec<HashMap<u32, usize>>,
    entries: Vec<IpEntry>,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

fn bucket_index(ip: Ipv4) -> usize {
    (ip.0 >> 12) as usize
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary {
            buckets: (0..NUM_BUCKETS).map(|_| HashMap::new()).collect(),
            entries: Vec::new(),
        }
    }

    /// Returns a mutable reference to a freshly created entry, or `None` if
    /// one already exists for this address (distinguished from `lookup`).
    pub fn create(&mut self, ip: Ipv4, entry_type: EntryType) -> Option<&mut IpEntry> {
        let bucket = bucket_index(ip);
        if self.buckets[bucket].contains_key(&ip.0) {
            return None;
        }
        let idx = self.entries.len();
        self.entries.push(IpEntry::new(ip, entry_type));
        self.buckets[bucket].insert(ip.0, idx);
        Some(&mut self.entries[idx])
    }

    pub fn lookup(&self, ip: Ipv4) -> Option<&IpEntry> {
        let bucket = bucket_index(ip);
        self.buckets[bucket].get(&ip.0).map(|&idx| &self.entries[idx])
    }

    pub fn lookup_mut(&mut self, ip: Ipv4) -> Option<&mut IpEntry> {
        let bucket = bucket_index(ip);
        let idx = *self.buckets[bucket].get(&ip.0)?;
        Some(&mut self.entries[idx])
    }

    pub fn contains(&self, ip: Ipv4) -> bool {
        self.lookup(ip).is_some()
    }

    /// Get-or-create: returns the existing entry, or a newly created one
    /// with the given type.
    pub fn get_or_create(&mut self, ip: Ipv4, entry_type: EntryType) -> &mut IpEntry {
        let bucket = bucket_index(ip);
        if let Some(&idx) = self.buckets[bucket].get(&ip.0) {
            return &mut self.entries[idx];
        }
        let idx = self.entries.len();
        self.entries.push(IpEntry::new(ip, entry_type));
        self.buckets[bucket].insert(ip.0, idx);
        &mut self.entries[idx]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut IpEntry> {
        self.entries.iter_mut()
    }

    /// Entries in ascending-address order (subnet inference's scan order).
    pub fn sorted_addresses(&self) -> Vec<Ipv4> {
        let mut addrs: Vec<Ipv4> = self.entries.iter().map(|e| e.addr).collect();
        addrs.sort();
        addrs
    }

    // ---- Review passes ----

    /// Post-scan labeling: entries with no TTL, or TTL > 1 with a void
    /// trail, become scanned-fail; everything else scanned-OK.
    pub fn label_post_scan(&mut self) {
        for entry in self.entries.iter_mut() {
            if entry.entry_type != EntryType::ResponsiveTarget {
                continue;
            }
            let fails = match entry.ttl {
                None => true,
                Some(ttl) => ttl > 1 && entry.trail.is_void(),
            };
            entry.entry_type = if fails {
                EntryType::ScannedFail
            } else {
                EntryType::ScannedOk
            };
        }
    }

    /// Special-IP detection: ensures trail IPs have entries, records their
    /// TTL and inferred initial TTL, then flags trail-IP/warping/echoing,
    /// then detects flickering via the sliding-window-of-three rule.
    pub fn detect_special_ips(&mut self, max_flickering_delta: u32) {
        // Pass 1: ensure every non-void trail's last-valid IP has an entry,
        // recording its TTL and sender-initial-TTL.
        let scanned_ok: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].entry_type == EntryType::ScannedOk)
            .collect();

        for &i in &scanned_ok {
            let (trail_ip, ttl, inferred) = {
                let e = &self.entries[i];
                let Trail::Valid {
                    last_valid_ip,
                    reply_ttl,
                    request_ttl,
                    ..
                } = e.trail
                else {
                    continue;
                };
                (
                    last_valid_ip,
                    reply_ttl,
                    InitialTtl::from_reply_ttl(reply_ttl, request_ttl),
                )
            };
            let trail_entry = self.get_or_create(trail_ip, EntryType::SeenInTrail);
            trail_entry.observe_ttl(ttl);
            trail_entry.inferred_initial_ttl = trail_entry.inferred_initial_ttl.merge(inferred);
        }

        // Pass 2: flag trail-IP, warping, echoing.
        let trail_ips: std::collections::HashSet<Ipv4> = scanned_ok
            .iter()
            .filter_map(|&i| self.entries[i].trail.last_valid_ip())
            .collect();
        for entry in self.entries.iter_mut() {
            if trail_ips.contains(&entry.addr) {
                entry.is_trail_ip = true;
            }
            entry.is_warping = entry.is_warping_from_observations();
            if entry.entry_type == EntryType::ScannedOk {
                entry.is_echoing = entry
                    .trail
                    .last_valid_ip()
                    .map(|ip| ip == entry.addr)
                    .unwrap_or(false);
            }
        }

        // Pass 3: flickering sliding window over the three most recent
        // scanned-OK entries in ascending-address order.
        let mut ordered: Vec<usize> = scanned_ok;
        ordered.sort_by_key(|&i| self.entries[i].addr);

        let mut flickering_trail_ips: Vec<(Ipv4, Ipv4)> = Vec::new();
        for w in ordered.windows(3) {
            let (prev_prev, prev, cur) = (w[0], w[1], w[2]);
            let (ttl_pp, ttl_p, ttl_c) = (
                self.entries[prev_prev].ttl,
                self.entries[prev].ttl,
                self.entries[cur].ttl,
            );
            if ttl_pp.is_none() || ttl_pp != ttl_p || ttl_p != ttl_c {
                continue;
            }
            let anomalies_zero = [prev_prev, prev, cur]
                .iter()
                .all(|&i| self.entries[i].trail.anomalies() == Some(0));
            if !anomalies_zero {
                continue;
            }
            let (Some(trail_pp), Some(trail_p), Some(trail_c)) = (
                self.entries[prev_prev].trail.last_valid_ip(),
                self.entries[prev].trail.last_valid_ip(),
                self.entries[cur].trail.last_valid_ip(),
            ) else {
                continue;
            };
            if trail_c != trail_pp || trail_c == trail_p {
                continue;
            }
            let ip_pp = self.entries[prev_prev].addr;
            let ip_p = self.entries[prev].addr;
            let ip_cur = self.entries[cur].addr;
            let delta = ip_cur.wrapping_sub(ip_p).wrapping_add(ip_p.wrapping_sub(ip_pp));
            if delta == 0 || delta > max_flickering_delta {
                continue;
            }
            for &i in &[prev_prev, prev, cur] {
                self.entries[i].is_flickering = true;
            }
            flickering_trail_ips.push((trail_pp, trail_c));
        }
        for (a, b) in flickering_trail_ips {
            if let Some(e) = self.lookup_mut(a) {
                if !e.flickering_peers.contains(&b) {
                    e.flickering_peers.push(b);
                }
            }
            if let Some(e) = self.lookup_mut(b) {
                if !e.flickering_peers.contains(&a) {
                    e.flickering_peers.push(a);
                }
            }
        }

        // Pass 3 (final): a trail itself counts as flickering if its
        // trail-IP was flagged flickering above. We expose this via
        // `trail_is_flickering`, queried by subnet inference rule 4,
        // rather than mutating the entry's own `is_flickering` (which
        // describes the IP, not its trail).
    }

    /// Whether `entry`'s trail is flagged flickering, i.e. its trail-IP was
    /// itself flagged flickering by `detect_special_ips`.
    pub fn trail_is_flickering(&self, entry: &IpEntry) -> bool {
        entry
            .trail
            .last_valid_ip()
            .and_then(|ip| self.lookup(ip))
            .map(|trail_entry| trail_entry.is_flickering)
            .unwrap_or(false)
    }

    /// All mutually-flickering trios (pair-transitively), used by the
    /// scanner to seed subnet-discovery alias resolution in strict mode.
    pub fn flickering_trios(&self) -> Vec<Vec<Ipv4>> {
        let mut visited = std::collections::HashSet::new();
        let mut groups = Vec::new();
        for entry in self.entries.iter().filter(|e| e.is_flickering) {
            if visited.contains(&entry.addr) {
                continue;
            }
            let mut group = vec![entry.addr];
            let mut frontier = entry.flickering_peers.clone();
            visited.insert(entry.addr);
            while let Some(ip) = frontier.pop() {
                if visited.contains(&ip) {
                    continue;
                }
                visited.insert(ip);
                group.push(ip);
                if let Some(peer_entry) = self.lookup(ip) {
                    frontier.extend(peer_entry.flickering_peers.iter().copied());
                }
            }
            if group.len() >= 2 {
                groups.push(group);
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_vs_lookup() {
        let mut dict = Dictionary::new();
        let ip = Ipv4::from_octets(10, 0, 0, 1);
        assert!(dict.lookup(ip).is_none());
        assert!(dict.create(ip, EntryType::ResponsiveTarget).is_some());
        assert!(dict.create(ip, EntryType::ResponsiveTarget).is_none());
        assert!(dict.lookup(ip).is_some());
    }

    #[test]
    fn observe_ttl_keeps_min() {
        let mut e = IpEntry::new(Ipv4::from_octets(10, 0, 0, 1), EntryType::ScannedOk);
        e.observe_ttl(5);
        e.observe_ttl(3);
        e.observe_ttl(4);
        assert_eq!(e.ttl, Some(3));
        assert_eq!(e.observed_ttls, vec![3, 4, 5]);
    }

    #[test]
    fn initial_ttl_ladder() {
        assert_eq!(InitialTtl::from_reply_ttl(250, 5), InitialTtl::Known(255));
        assert_eq!(InitialTtl::from_reply_ttl(100, 5), InitialTtl::Known(128));
        assert_eq!(InitialTtl::from_reply_ttl(60, 5), InitialTtl::Known(64));
        assert_eq!(InitialTtl::from_reply_ttl(20, 5), InitialTtl::Known(32));
        // target >= 32 hops away corrects a small reply TTL up to 64
        assert_eq!(InitialTtl::from_reply_ttl(20, 33), InitialTtl::Known(64));
    }

    #[test]
    fn initial_ttl_conflict_sentinel() {
        let merged = InitialTtl::Known(64).merge(InitialTtl::Known(32));
        assert_eq!(merged, InitialTtl::Conflicting);
        assert_eq!(merged.as_wire_value(), 42);
    }

    #[test]
    fn post_scan_labeling() {
        let mut dict = Dictionary::new();
        let a = Ipv4::from_octets(10, 0, 0, 1);
        let b = Ipv4::from_octets(10, 0, 0, 2);
        dict.create(a, EntryType::ResponsiveTarget).unwrap().ttl = Some(1);
        let eb = dict.create(b, EntryType::ResponsiveTarget).unwrap();
        eb.ttl = Some(5);
        eb.trail = Trail::Void;
        dict.label_post_scan();
        assert_eq!(dict.lookup(a).unwrap().entry_type, EntryType::ScannedOk);
        assert_eq!(dict.lookup(b).unwrap().entry_type, EntryType::ScannedFail);
    }
}
