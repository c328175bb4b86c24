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

//! The single-probe request/reply abstraction the core consumes.
//! Raw-socket transmission/reception is explicitly out of scope: this
//! module only defines the seam and a scripted test double.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::CoreError;
use crate::ipv4::Ipv4;

/// ICMP type/code of a probe reply, restricted to the handful the core
/// cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ReplyKind {
    /// No reply within the timeout.
    Timeout,
    /// ICMP Time-Exceeded (TTL expired in transit).
    TimeExceeded,
    /// ICMP Echo Reply (or, for UDP/TCP base probes, the equivalent
    /// "target answered directly" signal).
    EchoReply,
    /// ICMP Destination Unreachable, Port Unreachable.
    PortUnreachable,
    /// Any other ICMP message (net/host unreachable, etc). Treated like an
    /// anonymous hop by the scanner but distinguished for logging.
    Other,
}

/// A single probe's outcome.
#[derive(Debug, Clone)]
pub struct ProbeRecord {
    pub dst: Ipv4,
    pub request_ttl: u8,
    /// 0 if the probe timed out.
    pub reply_addr: Ipv4,
    pub reply_kind: ReplyKind,
    pub reply_ttl: u8,
    pub sent_ip_id: u16,
    pub reply_ip_id: u16,
    pub request_time: Instant,
    pub reply_time: Option<Instant>,
    /// Only populated for the ICMP-timestamp alias-hint variant.
    pub timestamps: Option<(u32, u32, u32)>,
}

impl ProbeRecord {
    pub fn rtt(&self) -> Option<Duration> {
        self.reply_time.map(|t| t.saturating_duration_since(self.request_time))
    }

    /// True iff this probe's reply came from the target itself (an "echo"
    /// in the prescanner's and scanner's sense, not the alias-resolution
    /// IP-ID echo-mask bit).
    pub fn answered_by_target(&self) -> bool {
        self.reply_kind == ReplyKind::EchoReply && self.reply_addr == self.dst
    }
}

/// The core's only dependency on the transport layer.
pub trait Prober: Send + Sync {
    /// Send one probe and wait (up to `timeout`) for its reply.
    ///
    /// `fixed_flow`, when true, keeps the flow-identifying header fields
    /// constant across calls for the same (`src`, `dst`) pair so load
    /// balancers route successive probes identically (Paris-traceroute).
    #[allow(clippy::too_many_arguments)]
    fn probe(
        &self,
        src: Ipv4,
        dst: Ipv4,
        ttl: u8,
        timeout: Duration,
        fixed_flow: bool,
        ports: Option<(u16, u16)>,
    ) -> Result<ProbeRecord, CoreError>;
}

/// A scripted prober for tests: replies are looked up by `(dst, ttl)`,
/// falling back to timeout. Also used to drive the alias-resolution hint
/// collector's IP-ID / timestamp / DNS / UDP probes in tests.
#[derive(Default)]
pub struct MockProber {
    scripted: Mutex<std::collections::HashMap<(Ipv4, u8), VecDeque<ProbeRecord>>>,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next `probe(dst, ttl)` call.
    pub fn script(&self, dst: Ipv4, ttl: u8, record: ProbeRecord) {
        self.scripted
            .lock()
            .entry((dst, ttl))
            .or_default()
            .push_back(record);
    }
}

impl Prober for MockProber {
    fn probe(
        &self,
        _src: Ipv4,
        dst: Ipv4,
        ttl: u8,
        _timeout: Duration,
        _fixed_flow: bool,
        _ports: Option<(u16, u16)>,
    ) -> Result<ProbeRecord, CoreError> {
        let mut scripted = self.scripted.lock();
        if let Some(queue) = scripted.get_mut(&(dst, ttl)) {
            if let Some(record) = queue.pop_front() {
                return Ok(record);
            }
        }
        Ok(ProbeRecord {
            dst,
            request_ttl: ttl,
            reply_addr: Ipv4::ZERO,
            reply_kind: ReplyKind::Timeout,
            reply_ttl: 0,
            sent_ip_id: 0,
            reply_ip_id: 0,
            request_time: Instant::now(),
            reply_time: None,
            timestamps: None,
        })
    }
}
