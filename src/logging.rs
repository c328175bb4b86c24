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

//! Verbosity-to-log-level wiring for the `-v` flag.

/// Map the CLI's `-v {0|1|2|3}` to a `log::LevelFilter`, 3 being debug.
pub fn level_filter(verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    }
}

/// Initialize `pretty_env_logger` at the requested verbosity, overriding
/// whatever `RUST_LOG` would otherwise select.
pub fn init(verbosity: u8) {
    pretty_env_logger::formatted_builder()
        .filter_level(level_filter(verbosity))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_three_is_debug() {
        assert_eq!(level_filter(3), log::LevelFilter::Debug);
        assert_eq!(level_filter(9), log::LevelFilter::Debug);
    }

    #[test]
    fn verbosity_zero_is_error() {
        assert_eq!(level_filter(0), log::LevelFilter::Error);
    }
}
