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

//! Active IPv4 network topology discovery: target probing, subnet
//! inference, peer discovery, alias resolution, and neighborhood-graph
//! construction.

pub mod alias;
pub mod cli;
pub mod config;
pub mod dict;
pub mod env;
pub mod error;
pub mod graph;
pub mod ipv4;
pub mod logging;
pub mod output;
pub mod prober;
pub mod scan;
pub mod subnet;
pub mod targets;
