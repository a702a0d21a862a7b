//! tracing subscriber setup.
//!
//! `RUST_LOG` wins when set. Otherwise `secret_sync=info`, or `debug` with
//! `--verbose`. Set `SECRET_SYNC_LOG_FORMAT=json` for JSON lines.

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log format
pub const LOG_FORMAT_VAR: &str = "SECRET_SYNC_LOG_FORMAT";

pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("secret_sync={}", default_level)));

    let json = std::env::var(LOG_FORMAT_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // try_init: a second call (e.g. from tests) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
