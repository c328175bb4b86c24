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

//! Alias-hint collection: the four probe kinds fired per IP, paced by a
//! shared monotonic token counter, and the per-IP finalization into a
//! counter class plus velocity bounds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rayon::prelude::*;

use crate::config::Config;
use crate::dict::InitialTtl;
use crate::ipv4::Ipv4;
use crate::prober::{Prober, ReplyKind};

/// Which pipeline stage produced a given `AliasHint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Stage {
    SubnetDiscovery,
    GraphBuilding,
    FullResolution,
}

/// IP-ID counter behavior class, derived from the N IP-ID probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, Default)]
pub enum CounterClass {
    #[default]
    Unknown,
    Healthy,
    Fast,
    Random,
    Echo,
}

/// Per-IP hints gathered at one stage.
#[derive(Debug, Clone)]
pub struct AliasHint {
    pub stage: Stage,
    pub tokens: Vec<u64>,
    pub ip_ids: Vec<u16>,
    /// true iff the returned IP-ID equals the one sent (index-aligned with
    /// `ip_ids`/`tokens`).
    pub echo_mask: Vec<bool>,
    /// Microsecond delays between successive IP-ID probes (len = N-1).
    pub delays_us: Vec<u64>,
    pub time_exceeded_initial_ttl: InitialTtl,
    pub echo_reply_initial_ttl: InitialTtl,
    pub hostname: Option<String>,
    pub replies_to_timestamp: bool,
    pub udp_port_unreachable_src: Option<Ipv4>,
    pub udp_secondary: bool,
    pub velocity_low: f64,
    pub velocity_high: f64,
    pub counter_class: CounterClass,
}

impl AliasHint {
    fn empty(stage: Stage) -> Self {
        AliasHint {
            stage,
            tokens: Vec::new(),
            ip_ids: Vec::new(),
            echo_mask: Vec::new(),
            delays_us: Vec::new(),
            time_exceeded_initial_ttl: InitialTtl::Unknown,
            echo_reply_initial_ttl: InitialTtl::Unknown,
            hostname: None,
            replies_to_timestamp: false,
            udp_port_unreachable_src: None,
            udp_secondary: false,
            velocity_low: 0.0,
            velocity_high: 0.0,
            counter_class: CounterClass::Unknown,
        }
    }

    /// The fixed tuple used to group IPs before resolution. `at_full_resolution`
    /// drops the Time-Exceeded TTL field, which is ignored at that stage.
    pub fn fingerprint(&self, at_full_resolution: bool) -> Fingerprint {
        Fingerprint {
            time_exceeded_ttl: if at_full_resolution {
                None
            } else {
                Some(self.time_exceeded_initial_ttl)
            },
            echo_ttl: self.echo_reply_initial_ttl,
            udp_src: if self.udp_secondary {
                None
            } else {
                self.udp_port_unreachable_src
            },
            counter_class: self.counter_class,
            has_hostname: self.hostname.is_some(),
            replies_to_timestamp: self.replies_to_timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub time_exceeded_ttl: Option<InitialTtl>,
    pub echo_ttl: InitialTtl,
    pub udp_src: Option<Ipv4>,
    pub counter_class: CounterClass,
    pub has_hostname: bool,
    pub replies_to_timestamp: bool,
}

impl PartialOrd for Fingerprint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fingerprint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn key(f: &Fingerprint) -> (u8, Option<u32>, Option<u8>, u32, u8, bool, bool) {
            let (cls_ord, ttl_wire) = match f.echo_ttl {
                InitialTtl::Unknown => (0, None),
                InitialTtl::Known(t) => (1, Some(t)),
                InitialTtl::Conflicting => (2, None),
            };
            (
                cls_ord,
                f.udp_src.map(|ip| ip.0),
                ttl_wire,
                f.counter_class as u32,
                f.time_exceeded_ttl.map(|t| t.as_wire_value()).unwrap_or(0),
                f.has_hostname,
                f.replies_to_timestamp,
            )
        }
        key(self).cmp(&key(other))
    }
}

/// Monotonic token source shared across all hint-collection workers.
/// Acquisition of a token is an atomic increment.
#[derive(Default)]
pub struct TokenCounter(AtomicU64);

impl TokenCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Collect hints for a set of IPs at a given stage. Fires, per IP:
/// N round-robin IP-ID probes (interleaved across the whole IP set so
/// no IP's i-th probe precedes another IP's (i-1)-th), one ICMP-timestamp
/// probe, one reverse-DNS lookup, and one UDP port-unreachable probe.
pub fn collect_hints(
    prober: &dyn Prober,
    cfg: &Config,
    src: Ipv4,
    ips: &[Ipv4],
    stage: Stage,
    resolve_dns: &dyn Fn(Ipv4) -> Option<String>,
) -> HashMap<Ipv4, AliasHint> {
    let n = cfg.alias_resolution_nb_ip_ids as usize;
    let timeout = Duration::from_millis(cfg.probing_timeout_period as u64);
    let tokens = TokenCounter::default();

    // Round-robin IP-ID probing: round i probes every IP once, in order,
    // before round i+1 starts, guaranteeing the interleaving Ally needs.
    let mut per_ip_tokens: HashMap<Ipv4, Vec<u64>> = ips.iter().map(|&ip| (ip, Vec::new())).collect();
    let mut per_ip_ids: HashMap<Ipv4, Vec<u16>> = ips.iter().map(|&ip| (ip, Vec::new())).collect();
    let mut per_ip_echo: HashMap<Ipv4, Vec<bool>> = ips.iter().map(|&ip| (ip, Vec::new())).collect();
    let mut per_ip_times: HashMap<Ipv4, Vec<std::time::Instant>> =
        ips.iter().map(|&ip| (ip, Vec::new())).collect();

    for _round in 0..n {
        for &ip in ips {
            let token = tokens.next();
            let sent_id = (token & 0xFFFF) as u16;
            if let Ok(record) = prober.probe(src, ip, 64, timeout, false, None) {
                per_ip_tokens.get_mut(&ip).unwrap().push(token);
                per_ip_ids.get_mut(&ip).unwrap().push(record.reply_ip_id);
                per_ip_echo
                    .get_mut(&ip)
                    .unwrap()
                    .push(record.reply_ip_id == sent_id && record.reply_kind == ReplyKind::EchoReply);
                per_ip_times
                    .get_mut(&ip)
                    .unwrap()
                    .push(record.reply_time.unwrap_or(record.request_time));
            }
            std::thread::sleep(Duration::from_micros(1));
        }
    }

    ips.par_iter()
        .map(|&ip| {
            let mut hint = AliasHint::empty(stage);
            hint.tokens = per_ip_tokens.remove(&ip).unwrap_or_default();
            hint.ip_ids = per_ip_ids.remove(&ip).unwrap_or_default();
            hint.echo_mask = per_ip_echo.remove(&ip).unwrap_or_default();
            let times = per_ip_times.remove(&ip).unwrap_or_default();
            hint.delays_us = times
                .windows(2)
                .map(|w| w[1].saturating_duration_since(w[0]).as_micros() as u64)
                .collect();

            if let Ok(ts_probe) = prober.probe(src, ip, 64, timeout, false, None) {
                hint.replies_to_timestamp = ts_probe.timestamps.is_some();
            }
            if let Ok(echo_probe) = prober.probe(src, ip, 64, timeout, false, None) {
                if echo_probe.reply_kind == ReplyKind::EchoReply {
                    hint.echo_reply_initial_ttl =
                        InitialTtl::from_reply_ttl(echo_probe.reply_ttl, 1);
                } else if echo_probe.reply_kind == ReplyKind::TimeExceeded {
                    hint.time_exceeded_initial_ttl =
                        InitialTtl::from_reply_ttl(echo_probe.reply_ttl, 1);
                }
            }
            if let Ok(udp_probe) = prober.probe(src, ip, 64, timeout, false, Some((40_000, 55_000))) {
                if udp_probe.reply_kind == ReplyKind::PortUnreachable
                    && udp_probe.reply_addr != ip
                    && !udp_probe.reply_addr.is_zero()
                {
                    hint.udp_port_unreachable_src = Some(udp_probe.reply_addr);
                }
            }
            hint.hostname = resolve_dns(ip);

            finalize_counter_class(&mut hint, cfg);
            (ip, hint)
        })
        .collect()
}

/// Finalize an IP's counter class and velocity bounds from its collected
/// IP-IDs.
pub fn finalize_counter_class(hint: &mut AliasHint, cfg: &Config) {
    if hint.ip_ids.len() < 2 {
        return;
    }
    if hint.echo_mask.iter().all(|&e| e) && !hint.echo_mask.is_empty() {
        hint.counter_class = CounterClass::Echo;
        return;
    }

    let deltas: Vec<i64> = hint
        .ip_ids
        .windows(2)
        .map(|w| w[1] as i64 - w[0] as i64)
        .collect();
    let negative_deltas = deltas.iter().filter(|&&d| d < 0).count();

    if negative_deltas <= 1 {
        hint.counter_class = CounterClass::Healthy;
        let velocities: Vec<f64> = hint
            .ip_ids
            .windows(2)
            .zip(hint.delays_us.iter())
            .filter(|(_, &delay)| delay > 0)
            .map(|(w, &delay)| {
                let raw = w[1] as i64 - w[0] as i64;
                let unwrapped = if raw < 0 { raw + 65_536 } else { raw };
                unwrapped as f64 / delay as f64
            })
            .collect();
        if !velocities.is_empty() {
            hint.velocity_low = velocities.iter().cloned().fold(f64::INFINITY, f64::min);
            hint.velocity_high = velocities.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        }
        return;
    }

    // Try to find an integer rollover count that reconciles the negative
    // deltas with the rest of the sequence.
    for rollovers in 0..=cfg.alias_resolution_velocity_max_rollovers {
        let mut ok = true;
        let mut velocities = Vec::new();
        for (i, &raw) in deltas.iter().enumerate() {
            let candidate = raw + 65_536 * rollovers as i64;
            if candidate < 0 {
                ok = false;
                break;
            }
            let bound = 65_536.0 * cfg.alias_resolution_velocity_max_error;
            let remainder = (candidate as f64) % 65_536.0;
            if remainder > bound && (65_536.0 - remainder) > bound {
                ok = false;
                break;
            }
            if let Some(&delay) = hint.delays_us.get(i) {
                if delay > 0 {
                    velocities.push(candidate as f64 / delay as f64);
                }
            }
        }
        if ok {
            hint.counter_class = CounterClass::Fast;
            if !velocities.is_empty() {
                hint.velocity_low = velocities.iter().cloned().fold(f64::INFINITY, f64::min);
                hint.velocity_high = velocities.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            }
            return;
        }
    }

    hint.counter_class = CounterClass::Random;
    hint.velocity_low = 0.0;
    hint.velocity_high = 65_535.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint_with_ids(ids: &[u16], delays_us: &[u64]) -> AliasHint {
        let mut h = AliasHint::empty(Stage::FullResolution);
        h.ip_ids = ids.to_vec();
        h.echo_mask = vec![false; ids.len()];
        h.delays_us = delays_us.to_vec();
        h
    }

    #[test]
    fn healthy_counter_class() {
        let cfg = Config::default();
        let mut h = hint_with_ids(&[100, 200, 300, 400], &[1000, 1000, 1000]);
        finalize_counter_class(&mut h, &cfg);
        assert_eq!(h.counter_class, CounterClass::Healthy);
        assert!(h.velocity_low > 0.0);
    }

    #[test]
    fn echo_counter_class() {
        let cfg = Config::default();
        let mut h = hint_with_ids(&[1, 1, 1, 1], &[1000, 1000, 1000]);
        h.echo_mask = vec![true; 4];
        finalize_counter_class(&mut h, &cfg);
        assert_eq!(h.counter_class, CounterClass::Echo);
    }

    #[test]
    fn random_counter_class_on_heavy_jitter() {
        let cfg = Config::default();
        let mut h = hint_with_ids(&[40000, 5, 50000, 10, 60000], &[1000, 1000, 1000, 1000]);
        finalize_counter_class(&mut h, &cfg);
        assert_eq!(h.counter_class, CounterClass::Random);
    }
}
