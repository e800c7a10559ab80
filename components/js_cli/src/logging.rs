//! Tracing subscriber setup

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

/// Install a stderr subscriber at debug level
///
/// Returns false when a global subscriber was already set.
pub fn init_tracing(json: bool) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_max_level(Level::DEBUG)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}
