//! Process-wide observability plumbing: tracing subscriber setup and a
//! text-format dump of the default prometheus registry.

use once_cell::sync::OnceCell;
use prometheus::{Encoder, TextEncoder};
use tracing_subscriber::EnvFilter;

static TRACING_STARTED: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber, honoring `RUST_LOG`.
///
/// Idempotent: later calls (for example from multiple test binaries linked
/// against this crate) are no-ops.
pub fn init() {
    TRACING_STARTED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

/// Render every metric registered against the default registry in the
/// prometheus text exposition format.
pub fn gather() -> String {
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(error) = encoder.encode(&families, &mut buffer) {
        tracing::error!(%error, "failed to encode prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }

    #[test]
    fn gather_renders_text_format() {
        let dump = gather();
        // Empty registry renders to an empty string; registered metrics to
        // '# HELP'-prefixed families. Either way it must not error.
        assert!(dump.is_empty() || dump.contains("# HELP"));
    }
}
