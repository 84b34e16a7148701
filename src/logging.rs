//! Logger bootstrap for binaries and tests. Library code logs through the
//! `log` facade and stays agnostic of the backend.

use std::io::Write;

use env_logger::Builder;
use log::LevelFilter;

/// Initializes `env_logger` with a compact `LEVEL target: message` line
/// format. `RUST_LOG` overrides the default filter. Safe to call more than
/// once; later calls are ignored.
pub fn init(default_level: LevelFilter) {
    let _ = Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(buf, "{:5} {}: {}", record.level(), record.target(), record.args())
        })
        .try_init();
}
