//! Structured, colored console logging bootstrap.
//!
//! Same shape as this codebase's other standalone binaries: a `fern`
//! `Dispatch` with a formatter that colors the level tag via `colored`,
//! stamps a `chrono::Local` timestamp, and chains to stdout. Exposed as a
//! free function rather than run automatically at crate load, so example
//! binaries (and test setup) opt in explicitly and choose their own level.

use std::sync::Once;

use colored::Color;
use fern::colors::ColoredLevelConfig;
use log::LevelFilter;

static INIT: Once = Once::new();

/// Installs the colored `fern` logger at `level`. Safe to call more than
/// once -- only the first call takes effect, so tests and example binaries
/// that both try to initialize logging don't panic on double-init.
pub fn init(level: LevelFilter) {
    INIT.call_once(|| {
        let colors = ColoredLevelConfig::new()
            .error(Color::Red)
            .warn(Color::Yellow)
            .info(Color::White)
            .debug(Color::Green)
            .trace(Color::Blue);

        let dispatch = fern::Dispatch::new()
            .level(level)
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "{}{}[{}][{}] {}",
                    format_args!("\x1B[{}m", colors.get_color(&record.level()).to_fg_str()),
                    chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                    record.target(),
                    record.level(),
                    message
                ))
            })
            .chain(std::io::stdout());

        // A console logger that fails to attach leaves the process silently
        // unlogged rather than unable to start -- not worth aborting over.
        let _ = dispatch.apply();
    });
}

/// `init` at the default level ([`LevelFilter::Info`]) used by the bridge
/// and CANopen example binaries.
pub fn init_default() {
    init(LevelFilter::Info);
}
