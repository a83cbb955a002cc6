use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Installs the global subscriber. Safe to call more than once.
///
/// Verbosity follows RUST_LOG, e.g. `RUST_LOG=info,gateway_ratelimit=debug`
/// to see every per-key decision. Set `RATE_LIMIT_LOG_FORMAT=json` for one
/// JSON object per line.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("RATE_LIMIT_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let registry = tracing_subscriber::registry().with(filter);
        if json {
            registry.with(fmt::layer().json().with_current_span(false)).init();
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true) // contention shows up per thread
                        .with_line_number(true),
                )
                .init();
        }

        tracing::info!("Logging initialized");
    });
}

/// Logs one per-key decision
#[macro_export]
macro_rules! rate_limit_event {
    ($key:expr, $admitted:expr, $limit:expr, $remaining:expr) => {
        tracing::debug!(
            key = $key,
            admitted = $admitted,
            limit = $limit,
            remaining = $remaining,
            "Rate limit decision"
        )
    };
}

/// Logs a backend call with its outcome and timing
#[macro_export]
macro_rules! storage_op {
    ($backend:expr, $operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::trace!(
            backend = $backend,
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
