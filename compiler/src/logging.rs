//! Log setup for drivers and tests
//!
//! Lowering reports through the `log` facade; nothing is printed unless a
//! logger is installed. Levels used by the pass:
//!
//! - `error!` verification failures, followed by the function and module dumps
//! - `warn!` the failing verification messages
//! - `info!` module phases and unit initializers
//! - `debug!` function entry, scope pushes and pops, pruning
//! - `trace!` every lowered expression, extern declarations, folded constants
//!
//! ```bash
//! RUST_LOG=blockgen::lowering::scope=debug cargo test --test test_exceptions
//! ```

use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

fn builder() -> Builder {
    let mut builder = Builder::new();
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{:5} {}] {}",
            record.level(),
            record.target().trim_start_matches("blockgen::"),
            record.args()
        )
    });
    builder
}

/// Install the logger at `level` for every module. Later calls are no-ops.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        let _ = builder().filter_level(level).try_init();
    });
}

/// Install the logger at `info`: module phases and unit initializers
pub fn init() {
    init_with_level(LevelFilter::Info);
}

/// Install the logger configured by `RUST_LOG`, warnings by default
pub fn init_from_env() {
    INIT.call_once(|| {
        let _ = builder()
            .parse_env(Env::default().default_filter_or("warn"))
            .try_init();
    });
}

/// Logger for tests: output goes through the test harness capture
pub fn init_test() {
    let _ = builder()
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .is_test(true)
        .try_init();
}
