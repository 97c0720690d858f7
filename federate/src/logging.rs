//! Select log verbosity from the environment and install a subscriber.
//!
//! Verbosity is read once from [LOG_LEVEL] and handed to `tracing-subscriber`; components log through
//! the `tracing` macros and never consult the level themselves. Errors are written to stderr and
//! everything else to stdout.

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Environment variable selecting verbosity.
pub const LOG_LEVEL: &str = "LOG_LEVEL";

/// Level used when [LOG_LEVEL] is unset or unrecognized.
pub const DEFAULT_LEVEL: Level = Level::WARN;

/// Map a [LOG_LEVEL] value to a level.
///
/// Accepted values are `ERROR`, `WARNING`, `INFO`, `DEBUG`, and `DEBUG1` through `DEBUG4` (all of
/// which enable `TRACE`).
pub fn parse(value: Option<&str>) -> Level {
    match value {
        Some("ERROR") => Level::ERROR,
        Some("WARNING") => Level::WARN,
        Some("INFO") => Level::INFO,
        Some("DEBUG") => Level::DEBUG,
        Some("DEBUG1" | "DEBUG2" | "DEBUG3" | "DEBUG4") => Level::TRACE,
        _ => DEFAULT_LEVEL,
    }
}

/// Read the level from [LOG_LEVEL].
pub fn from_env() -> Level {
    parse(std::env::var(LOG_LEVEL).ok().as_deref())
}

/// Install the global subscriber.
pub fn init(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(
            std::io::stderr
                .with_max_level(Level::ERROR)
                .or_else(std::io::stdout),
        )
        .with_line_number(true)
        .with_file(true)
        .init();
}
