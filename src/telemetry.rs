//! Logging initialization.
//!
//! Events go to stderr so stdout stays free for command output.
//!
//! - `SEEDCORPUS_LOG` (falling back to `RUST_LOG`) sets the filter, with the
//!   usual `EnvFilter` directive syntax; default `info`.
//! - `SEEDCORPUS_LOG_FORMAT=json` switches from compact text to one JSON
//!   object per event.

use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SEEDCORPUS_LOG";
const FORMAT_ENV: &str = "SEEDCORPUS_LOG_FORMAT";

/// Marker that logging is installed. Hold this in `main()` until exit.
pub struct TelemetryGuard {
    _private: (),
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global subscriber.
///
/// Calling this twice is harmless; the second subscriber is discarded.
#[must_use]
pub fn init() -> TelemetryGuard {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let json = std::env::var(FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter());

    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("warning: logging already initialized: {e}");
    }

    TelemetryGuard { _private: () }
}
