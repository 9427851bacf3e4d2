//! Log setup: the system journal, plus console output unless quieted.

use tracing_subscriber::{filter::LevelFilter, prelude::*};

/// Identifier under which entries appear in the system log.
pub const SYSLOG_IDENTIFIER: &str = "vpro-to-wu";

/// Level for the given verbosity flags.
pub fn level(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Level for console output, or `None` for no console output.
///
/// `--quiet` silences the console only while the journal is there to take
/// over; without it, errors still go to the console.
pub fn console_level(quiet: bool, debug: bool, journal: bool) -> Option<LevelFilter> {
    match (quiet, journal) {
        (false, _) => Some(level(debug)),
        (true, false) => Some(LevelFilter::ERROR),
        (true, true) => None,
    }
}

/// Install the global subscriber.
///
/// A missing journal is not fatal; it is reported once logging is up.
pub fn init(quiet: bool, debug: bool) {
    let (journald, journald_err) = match tracing_journald::layer() {
        Ok(layer) => (
            Some(layer.with_syslog_identifier(SYSLOG_IDENTIFIER.to_string())),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    let console = console_level(quiet, debug, journald.is_some()).map(|filter| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter)
    });

    tracing_subscriber::registry()
        .with(level(debug))
        .with(journald)
        .with(console)
        .init();

    if let Some(e) = journald_err {
        tracing::warn!("system log unavailable: {}", e);
    }
}
