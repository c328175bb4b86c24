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

//! Binary entry point: parse arguments, load configuration, run the
//! pipeline, write result files.
//!
//! Probing transport is an external collaborator: this crate never links a
//! raw-socket implementation. Until one is wired in by an embedder, the
//! binary runs against `prober::MockProber`, which is honest about
//! answering every probe with a timeout unless scripted - it will not
//! discover a real topology, but every downstream phase still runs.

use std::net::UdpSocket;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use topoprobe::cli::Args;
use topoprobe::config::Config;
use topoprobe::env::Environment;
use topoprobe::error::CoreError;
use topoprobe::ipv4::Ipv4;
use topoprobe::prober::MockProber;
use topoprobe::{logging, output, targets};

/// Default outbound IPv4 address, found without a platform
/// interface-enumeration crate: connect a UDP socket to an arbitrary
/// routable address and read back the kernel-chosen local address. `-e`
/// naming a specific interface is accepted but not yet honored (no
/// interface-enumeration crate is in this crate's dependency stack).
fn resolve_source_ip(interface: Option<&str>) -> Result<Ipv4, CoreError> {
    if let Some(name) = interface {
        log::warn!("interface selection by name (`-e {name}`) is not implemented; using the default route's source address");
    }
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("198.51.100.1:80")?;
    let addr = socket.local_addr()?;
    match addr.ip() {
        std::net::IpAddr::V4(v4) => Ok(Ipv4::from(v4)),
        std::net::IpAddr::V6(_) => Err(CoreError::Socket("no local IPv4 address available".to_string())),
    }
}

fn default_label() -> String {
    let now = time::OffsetDateTime::now_utc();
    format!(
        "{:02}-{:02}-{} {:02}:{:02}:{:02}",
        now.day(),
        u8::from(now.month()),
        now.year(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

fn run(args: Args) -> Result<ExitCode> {
    logging::init(args.verbosity);

    let cfg = match &args.config {
        Some(path) => Config::from_file(std::path::Path::new(path)).context("loading configuration file")?,
        None => Config::default(),
    };

    let parsed = targets::parse(&args.targets).context("parsing target list")?;
    let hosts = targets::resolve_hosts(&parsed);
    if hosts.is_empty() {
        eprintln!("no targets to probe");
        return Ok(ExitCode::FAILURE);
    }

    let src = resolve_source_ip(args.interface.as_deref()).context("resolving source address")?;
    let prober = MockProber::new();

    log::info!("starting run against {} host(s) via {}", hosts.len(), cfg.base_protocol);
    let environment = Environment::run(&cfg, &prober, &hosts, src);

    let label = args.label.unwrap_or_else(default_label);
    let dir = PathBuf::from(".");
    let paths = output::write_all(&environment, &dir, &label).context("writing result files")?;

    if args.info {
        println!("vertices: {}", environment.graph.vertices.len());
        println!("subnets: {}", environment.subnets.len());
        println!("connected components: {}", environment.stats.connected_components);
    }
    for path in &paths {
        log::debug!("wrote {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
