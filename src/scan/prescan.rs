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

//! The prescanner: a multi-round liveness filter that remembers, per
//! target, the shortest timeout that elicited a reply.

use std::time::Duration;

use rayon::prelude::*;

use crate::config::Config;
use crate::dict::{Dictionary, EntryType};
use crate::ipv4::Ipv4;
use crate::prober::Prober;

const PRESCAN_TTL: u8 = 255;

/// Run up to three liveness rounds over `targets`, writing a
/// `ResponsiveTarget` entry (with its settled timeout) for every IP that
/// answers.
pub fn prescan(dict: &mut Dictionary, cfg: &Config, prober: &dyn Prober, targets: &[Ipv4], src: Ipv4) {
    let batch_size = cfg.prescanning_batch_size.max(1) as usize;
    let base_timeout = Duration::from_millis(cfg.probing_timeout_period as u64);
    let fixed_flow = cfg.probing_fixed_flow_paris;

    let mut pending: Vec<Ipv4> = targets.to_vec();

    let mut round_timeout = base_timeout;
    let max_rounds = if cfg.prescanning_third_opinion { 3 } else { 2 };

    for round in 0..max_rounds {
        if pending.is_empty() {
            break;
        }
        if round > 0 {
            round_timeout = if round == 1 {
                base_timeout * 2
            } else {
                base_timeout * 4
            };
        }

        let results: Vec<(Ipv4, bool)> = pending
            .par_chunks(batch_size.max(1))
            .flat_map(|chunk| {
                chunk
                    .iter()
                    .map(|&ip| {
                        let responsive = prober
                            .probe(src, ip, PRESCAN_TTL, round_timeout, fixed_flow, None)
                            .map(|r| r.answered_by_target())
                            .unwrap_or(false);
                        (ip, responsive)
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut carry_over = Vec::new();
        for (ip, responsive) in results {
            if responsive {
                let entry = dict.get_or_create(ip, EntryType::ResponsiveTarget);
                entry.preferred_timeout_ms = Some(round_timeout.as_millis() as u32);
            } else {
                carry_over.push(ip);
            }
        }
        pending = carry_over;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::{MockProber, ProbeRecord};
    use crate::prober::ReplyKind;
    use std::time::Instant;

    fn echo(dst: Ipv4) -> ProbeRecord {
        ProbeRecord {
            dst,
            request_ttl: PRESCAN_TTL,
            reply_addr: dst,
            reply_kind: ReplyKind::EchoReply,
            reply_ttl: 64,
            sent_ip_id: 1,
            reply_ip_id: 1,
            request_time: Instant::now(),
            reply_time: Some(Instant::now()),
            timestamps: None,
        }
    }

    #[test]
    fn responsive_target_recorded() {
        let prober = MockProber::new();
        let dst = Ipv4::from_octets(10, 0, 0, 1);
        prober.script(dst, PRESCAN_TTL, echo(dst));
        let cfg = Config::default();
        let mut dict = Dictionary::new();
        prescan(&mut dict, &cfg, &prober, &[dst], Ipv4::from_octets(10, 0, 0, 254));
        let entry = dict.lookup(dst).unwrap();
        assert_eq!(entry.entry_type, EntryType::ResponsiveTarget);
        assert!(entry.preferred_timeout_ms.is_some());
    }

    #[test]
    fn unresponsive_target_absent() {
        let prober = MockProber::new();
        let dst = Ipv4::from_octets(10, 0, 0, 2);
        let mut cfg = Config::default();
        cfg.prescanning_third_opinion = false;
        let mut dict = Dictionary::new();
        prescan(&mut dict, &cfg, &prober, &[dst], Ipv4::from_octets(10, 0, 0, 254));
        assert!(dict.lookup(dst).is_none());
    }
}
