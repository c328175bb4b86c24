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

//! Typed configuration, overlaying a `key=value` config-file format onto a
//! plain struct with validated ranges and documented defaults.

use std::collections::HashMap;
use std::path::Path;

use crate::error::CoreError;

macro_rules! validate_range {
    ($key:expr, $val:expr, $lo:expr, $hi:expr) => {
        if $val < $lo || $val > $hi {
            return Err(CoreError::Config {
                key: $key.to_string(),
                value: $val.to_string(),
                reason: format!("must be in [{}, {}]", $lo, $hi),
            });
        }
    };
}

/// Base probing protocol selected with `-p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
pub enum Protocol {
    #[strum(serialize = "ICMP")]
    Icmp,
    #[strum(serialize = "UDP")]
    Udp,
    #[strum(serialize = "TCP")]
    Tcp,
}

#[derive(Debug, Clone)]
pub struct Config {
    // --- time, milliseconds ---
    pub probing_timeout_period: u32,
    pub probing_regulating_delay: u32,
    pub probing_retry_delay: u32,
    pub concurrency_thread_delay: u32,

    // --- booleans ---
    pub probing_fixed_flow_paris: bool,
    pub prescanning_third_opinion: bool,
    pub prescanning_expansion: bool,
    pub alias_resolution_strict_mode: bool,

    // --- string ---
    pub probing_payload_message: String,

    // --- integers ---
    pub probing_max_retries: u8,
    pub concurrency_max_threads: u32,
    pub scanning_start_ttl: u8,
    pub scanning_minimum_targets_per_thread: u32,
    pub scanning_target_list_split_threshold: u32,
    pub scanning_number_of_reprobing: u8,
    pub scanning_maximum_flickering_delta: u32,
    pub inference_outliers_ratio_divisor: u32,
    pub peer_discovery_max_pivots: u32,
    pub alias_resolution_nb_ip_ids: u8,
    pub alias_resolution_ally_max_difference: u32,
    pub alias_resolution_ally_max_consecutive_difference: u32,
    pub alias_resolution_velocity_max_rollovers: u32,

    // --- doubles, in ]0,1[ ---
    pub alias_resolution_velocity_overlap_tolerance: f64,
    pub alias_resolution_velocity_max_error: f64,

    // --- tight-packing overgrowth heuristic knobs ---
    pub inference_tight_packing_min_gap: u32,
    pub inference_tight_packing_peerless_ratio: f64,

    // --- ambient: prescanner batch floor ---
    pub prescanning_batch_size: u32,

    pub base_protocol: Protocol,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            probing_timeout_period: 2_500,
            probing_regulating_delay: 250,
            probing_retry_delay: 500,
            concurrency_thread_delay: 500,

            probing_fixed_flow_paris: true,
            prescanning_third_opinion: false,
            prescanning_expansion: true,
            alias_resolution_strict_mode: false,

            probing_payload_message: String::from("topoprobe"),

            probing_max_retries: 2,
            concurrency_max_threads: 256,
            scanning_start_ttl: 4,
            scanning_minimum_targets_per_thread: 32,
            scanning_target_list_split_threshold: 256,
            scanning_number_of_reprobing: 2,
            scanning_maximum_flickering_delta: 16,
            inference_outliers_ratio_divisor: 3,
            peer_discovery_max_pivots: 4,
            alias_resolution_nb_ip_ids: 4,
            alias_resolution_ally_max_difference: 2_000,
            alias_resolution_ally_max_consecutive_difference: 200,
            alias_resolution_velocity_max_rollovers: 10,

            alias_resolution_velocity_overlap_tolerance: 0.2,
            alias_resolution_velocity_max_error: 0.1,

            inference_tight_packing_min_gap: 8,
            inference_tight_packing_peerless_ratio: 0.5,

            prescanning_batch_size: 32,

            base_protocol: Protocol::Icmp,
        }
    }
}

impl Config {
    /// Parse a `key=value` stream, one assignment per non-empty,
    /// non-comment line, overlaying onto the defaults.
    pub fn parse(input: &str) -> Result<Config, CoreError> {
        let mut raw = HashMap::new();
        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(CoreError::Config {
                    key: line.to_string(),
                    value: String::new(),
                    reason: "expected `key=value`".to_string(),
                });
            };
            raw.insert(key.trim().to_string(), value.trim().to_string());
        }
        Config::from_map(raw)
    }

    pub fn from_file(path: &Path) -> Result<Config, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Config::parse(&text)
    }

    fn from_map(raw: HashMap<String, String>) -> Result<Config, CoreError> {
        let mut cfg = Config::default();

        macro_rules! take_u32 {
            ($field:ident, $key:literal, $lo:expr, $hi:expr) => {
                if let Some(v) = raw.get($key) {
                    let parsed: u32 = v.parse().map_err(|_| CoreError::Config {
                        key: $key.to_string(),
                        value: v.clone(),
                        reason: "expected an integer".to_string(),
                    })?;
                    validate_range!($key, parsed, $lo, $hi);
                    cfg.$field = parsed;
                }
            };
        }
        macro_rules! take_u8 {
            ($field:ident, $key:literal, $lo:expr, $hi:expr) => {
                if let Some(v) = raw.get($key) {
                    let parsed: u32 = v.parse().map_err(|_| CoreError::Config {
                        key: $key.to_string(),
                        value: v.clone(),
                        reason: "expected an integer".to_string(),
                    })?;
                    validate_range!($key, parsed, $lo, $hi);
                    cfg.$field = parsed as u8;
                }
            };
        }
        macro_rules! take_bool {
            ($field:ident, $key:literal) => {
                if let Some(v) = raw.get($key) {
                    cfg.$field = match v.as_str() {
                        "true" => true,
                        "false" => false,
                        other => {
                            return Err(CoreError::Config {
                                key: $key.to_string(),
                                value: other.to_string(),
                                reason: "expected `true` or `false`".to_string(),
                            })
                        }
                    };
                }
            };
        }
        macro_rules! take_f64 {
            ($field:ident, $key:literal) => {
                if let Some(v) = raw.get($key) {
                    let parsed: f64 = v.parse().map_err(|_| CoreError::Config {
                        key: $key.to_string(),
                        value: v.clone(),
                        reason: "expected a floating point number".to_string(),
                    })?;
                    if !(parsed > 0.0 && parsed < 1.0) {
                        return Err(CoreError::Config {
                            key: $key.to_string(),
                            value: v.clone(),
                            reason: "must be in ]0,1[".to_string(),
                        });
                    }
                    cfg.$field = parsed;
                }
            };
        }

        take_u32!(probing_timeout_period, "probingTimeoutPeriod", 1, 10_000);
        take_u32!(probing_regulating_delay, "probingRegulatingDelay", 0, 1_000);
        take_u32!(probing_retry_delay, "probingRetryDelay", 0, 10_000);
        take_u32!(concurrency_thread_delay, "concurrencyThreadDelay", 0, 1_000);

        take_bool!(probing_fixed_flow_paris, "probingFixedFlowParis");
        take_bool!(prescanning_third_opinion, "prescanningThirdOpinion");
        take_bool!(prescanning_expansion, "prescanningExpansion");
        take_bool!(alias_resolution_strict_mode, "aliasResolutionStrictMode");

        if let Some(v) = raw.get("probingPayloadMessage") {
            if v.chars().count() >= 100 {
                return Err(CoreError::Config {
                    key: "probingPayloadMessage".to_string(),
                    value: v.clone(),
                    reason: "must be fewer than 100 characters".to_string(),
                });
            }
            cfg.probing_payload_message = v.clone();
        }

        take_u8!(probing_max_retries, "probingMaxRetries", 1, 4);
        take_u32!(concurrency_max_threads, "concurrencyMaxThreads", 2, 32_767);
        take_u8!(scanning_start_ttl, "scanningStartTTL", 1, 64);
        take_u32!(
            scanning_minimum_targets_per_thread,
            "scanningMinimumTargetsPerThread",
            1,
            32_767
        );
        take_u32!(
            scanning_target_list_split_threshold,
            "scanningTargetListSplitThreshold",
            1,
            2_048
        );
        take_u8!(scanning_number_of_reprobing, "scanningNumberOfReprobing", 1, 4);
        take_u32!(
            scanning_maximum_flickering_delta,
            "scanningMaximumFlickeringDelta",
            2,
            256
        );
        take_u32!(
            inference_outliers_ratio_divisor,
            "inferenceOutliersRatioDivisor",
            2,
            100
        );
        take_u32!(peer_discovery_max_pivots, "peerDiscoveryMaxPivots", 2, 4_095);
        take_u8!(alias_resolution_nb_ip_ids, "aliasResolutionNbIPIDs", 3, 20);
        take_u32!(
            alias_resolution_ally_max_difference,
            "aliasResolutionAllyMaxDifference",
            1,
            32_768
        );
        take_u32!(
            alias_resolution_ally_max_consecutive_difference,
            "aliasResolutionAllyMaxConsecutiveDifference",
            1,
            3_277
        );
        take_u32!(
            alias_resolution_velocity_max_rollovers,
            "aliasResolutionVelocityMaxRollovers",
            1,
            256
        );

        take_f64!(
            alias_resolution_velocity_overlap_tolerance,
            "aliasResolutionVelocityOverlapTolerance"
        );
        take_f64!(alias_resolution_velocity_max_error, "aliasResolutionVelocityMaxError");

        take_u32!(
            inference_tight_packing_min_gap,
            "inferenceTightPackingMinGap",
            1,
            1_000_000
        );
        take_f64!(
            inference_tight_packing_peerless_ratio,
            "inferenceTightPackingPeerlessRatio"
        );

        if cfg.concurrency_max_threads <= cfg.alias_resolution_nb_ip_ids as u32 + 1 {
            return Err(CoreError::Config {
                key: "concurrencyMaxThreads".to_string(),
                value: cfg.concurrency_max_threads.to_string(),
                reason: "must be greater than aliasResolutionNbIPIDs + 1".to_string(),
            });
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.concurrency_max_threads > cfg.alias_resolution_nb_ip_ids as u32 + 1);
    }

    #[test]
    fn parses_overrides() {
        let cfg = Config::parse("probingTimeoutPeriod=1000\nscanningStartTTL=8\n").unwrap();
        assert_eq!(cfg.probing_timeout_period, 1000);
        assert_eq!(cfg.scanning_start_ttl, 8);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(Config::parse("scanningStartTTL=0").is_err());
        assert!(Config::parse("scanningStartTTL=65").is_err());
    }

    #[test]
    fn rejects_bad_bool() {
        assert!(Config::parse("probingFixedFlowParis=maybe").is_err());
    }

    #[test]
    fn rejects_threads_too_small_for_ipid_count() {
        assert!(Config::parse("concurrencyMaxThreads=2\naliasResolutionNbIPIDs=3").is_err());
    }
}
