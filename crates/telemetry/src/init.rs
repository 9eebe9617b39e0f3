// Path: crates/telemetry/src/init.rs
//! Global `tracing` setup for worker and supervisor processes.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Filter applied when `RUST_LOG` is unset: the worker pipeline at `info`,
/// the HTTP plumbing underneath it kept quiet so agent output and delivery
/// events stay readable in the supervisor's aggregated log.
fn default_filter() -> EnvFilter {
    EnvFilter::new("info,hyper=warn,reqwest=warn,tower_http=warn")
}

/// Installs the global subscriber.
///
/// Default output is JSON lines on stderr with UTC timestamps, which is
/// what the supervisor and log shippers consume. `LOG_FORMAT=text` switches
/// to the human-readable form for interactive runs. `RUST_LOG` overrides
/// the default filter when present.
pub fn init_tracing() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());
    tracing_log::LogTracer::init()?;

    let text_mode = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("text"));
    if text_mode {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
        tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))?;
    } else {
        let layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339());
        tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))?;
    }
    Ok(())
}
