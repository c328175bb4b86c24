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

//! Target list parsing: the CLI's positional argument is a comma-separated
//! list where each item is an IPv4 address, a CIDR block, or a filename
//! whose contents are newline-separated items of the same kind.

use std::fs;
use std::str::FromStr;

use crate::error::CoreError;
use crate::ipv4::{Cidr, Ipv4};

/// One resolved target: a single host, or every host in a CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Host(Ipv4),
    Block(Cidr),
}

impl Target {
    /// Every IPv4 address this target denotes. For a `/31` or `/32` this is
    /// the address itself; for wider blocks it's every address in bounds,
    /// including network/broadcast.
    pub fn hosts(&self) -> Vec<Ipv4> {
        match self {
            Target::Host(ip) => vec![*ip],
            Target::Block(cidr) => {
                let (lower, upper) = (cidr.lower().0, cidr.upper().0);
                (lower..=upper).map(Ipv4).collect()
            }
        }
    }
}

fn parse_item(item: &str) -> Result<Target, CoreError> {
    let item = item.trim();
    if item.is_empty() {
        return Err(CoreError::BadTarget(item.to_string()));
    }
    if item.contains('/') {
        return Cidr::from_str(item)
            .map(Target::Block)
            .map_err(|_| CoreError::BadTarget(item.to_string()));
    }
    Ipv4::from_str(item)
        .map(Target::Host)
        .map_err(|_| CoreError::BadTarget(item.to_string()))
}

/// Parse a single comma-separated argument, expanding any item that names a
/// readable file into its newline-separated contents.
pub fn parse(arg: &str) -> Result<Vec<Target>, CoreError> {
    let mut targets = Vec::new();
    for item in arg.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if let Ok(meta) = fs::metadata(item) {
            if meta.is_file() {
                let text = fs::read_to_string(item).map_err(|source| CoreError::TargetFile {
                    path: item.to_string(),
                    source,
                })?;
                for line in text.lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    targets.push(parse_item(line)?);
                }
                continue;
            }
        }
        targets.push(parse_item(item)?);
    }
    Ok(targets)
}

/// Flatten a target list into the deduplicated, sorted set of hosts to
/// probe.
pub fn resolve_hosts(targets: &[Target]) -> Vec<Ipv4> {
    let mut hosts: Vec<Ipv4> = targets.iter().flat_map(Target::hosts).collect();
    hosts.sort();
    hosts.dedup();
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_hosts_and_blocks() {
        let targets = parse("10.0.0.1,10.0.1.0/30").unwrap();
        assert_eq!(targets.len(), 2);
        assert!(matches!(targets[0], Target::Host(_)));
        assert!(matches!(targets[1], Target::Block(_)));
    }

    #[test]
    fn rejects_malformed_item() {
        assert!(parse("not-an-ip").is_err());
    }

    #[test]
    fn resolves_block_to_every_host() {
        let targets = parse("10.0.0.0/30").unwrap();
        let hosts = resolve_hosts(&targets);
        assert_eq!(hosts.len(), 4);
    }

    #[test]
    fn expands_file_contents() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("topoprobe-targets-test-{}.txt", std::process::id()));
        fs::write(&path, "10.0.0.1\n10.0.0.2\n").unwrap();
        let targets = parse(path.to_str().unwrap()).unwrap();
        assert_eq!(targets.len(), 2);
        fs::remove_file(&path).ok();
    }
}
