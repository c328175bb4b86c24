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

//! Library-internal error types.
//!
//! Binaries wrap these in `anyhow::Result` and attach context; library code
//! always returns a typed error so callers can match on what went wrong.

use thiserror::Error;

use crate::ipv4::Ipv4;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration key `{key}` has invalid value `{value}`: {reason}")]
    Config {
        key: String,
        value: String,
        reason: String,
    },

    #[error("malformed target `{0}`: not an IPv4 address, CIDR block, or readable file")]
    BadTarget(String),

    #[error("could not read target file `{path}`: {source}")]
    TargetFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error on worker: {0}")]
    Socket(String),

    #[error("insufficient privileges to open a raw socket (try running elevated)")]
    Privilege,

    #[error("probing was aborted: {0}")]
    Stopped(String),

    #[error("no entry for {0} in the IP dictionary")]
    NoEntry(Ipv4),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
