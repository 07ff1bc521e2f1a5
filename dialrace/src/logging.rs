//! Tracing subscriber setup for binaries embedding dialrace.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Build the log filter.
///
/// `RUST_LOG` wins when set. Otherwise `DIALRACE_LOG` picks the level for the
/// dialrace targets (`debug`, `info`, `warn`, `error`; default `info`).
pub fn env_filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    let level = level_from(std::env::var("DIALRACE_LOG").ok().as_deref());
    EnvFilter::new(format!(
        "dialrace={level},dialrace_probe={level}",
        level = level
    ))
}

fn level_from(value: Option<&str>) -> &'static str {
    match value {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

/// Install a global subscriber writing to stderr.
///
/// `LOG_FORMAT=json` switches to JSON lines. Does nothing if a subscriber is
/// already installed.
pub fn init_tracing() {
    let filter = env_filter();
    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
