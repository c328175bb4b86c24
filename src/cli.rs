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

//! Command-line argument parsing via `clap::Parser`'s derive style.

use clap::Parser;

use crate::config::Protocol;

#[derive(Parser, Debug)]
#[command(author, version, about = "Active IPv4 network topology discovery")]
pub struct Args {
    /// Comma-separated list of IPv4 addresses, CIDR blocks, or target-list files.
    pub targets: String,

    /// Configuration file (`key=value` lines).
    #[arg(short = 'c', long = "config")]
    pub config: Option<String>,

    /// Outbound interface (default: first non-loopback IPv4).
    #[arg(short = 'e', long = "interface")]
    pub interface: Option<String>,

    /// Base probing protocol.
    #[arg(short = 'p', long = "protocol", default_value = "ICMP")]
    pub protocol: Protocol,

    /// Output-file stem (default: start-time `dd-mm-yyyy hh:mm:ss`).
    #[arg(short = 'l', long = "label")]
    pub label: Option<String>,

    /// Verbosity: 0-3, 3 = debug.
    #[arg(short = 'v', long = "verbosity", default_value_t = 1)]
    pub verbosity: u8,

    /// Print an info summary of the most recent run instead of probing.
    #[arg(short = 'i', long = "info")]
    pub info: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let args = Args::parse_from(["topoprobe", "10.0.0.1"]);
        assert_eq!(args.targets, "10.0.0.1");
        assert_eq!(args.verbosity, 1);
        assert!(!args.info);
    }

    #[test]
    fn parses_full_invocation() {
        let args = Args::parse_from([
            "topoprobe",
            "-c",
            "topoprobe.conf",
            "-e",
            "eth0",
            "-p",
            "UDP",
            "-l",
            "run1",
            "-v",
            "3",
            "10.0.0.0/24",
        ]);
        assert_eq!(args.config.as_deref(), Some("topoprobe.conf"));
        assert_eq!(args.interface.as_deref(), Some("eth0"));
        assert_eq!(args.label.as_deref(), Some("run1"));
        assert_eq!(args.verbosity, 3);
    }
}
