//! Centralised tracing initialisation for fsmstress binaries and harnesses.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter` and optional JSON formatting.
//!
//! The filter is read from `FSMSTRESS_LOG` first, then `RUST_LOG`, then
//! falls back to [`default_directives`]. The per-handler events of the agent
//! loop sit at `trace` and stay hidden unless one of those variables asks for
//! them, e.g. `FSMSTRESS_LOG=info,fsmstress_core::agent=trace`.
//!
//! Safe to call more than once; subsequent calls are silently ignored
//! (the global subscriber can only be set once per process).

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "FSMSTRESS_LOG";

/// Filter used when neither `FSMSTRESS_LOG` nor `RUST_LOG` is set.
///
/// The agent module is capped at `debug` so a verbose run does not print one
/// line per handler call across every agent.
pub fn default_directives(level: Level) -> String {
    let agent = if level > Level::DEBUG {
        Level::DEBUG
    } else {
        level
    };
    format!(
        "{},fsmstress_core::agent={}",
        level.as_str().to_ascii_lowercase(),
        agent.as_str().to_ascii_lowercase()
    )
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Initialise the global tracing subscriber.
///
/// * `json`: when `true`, emit newline-delimited JSON log lines.
/// * `level`: default verbosity when no filter variable is set.
///
/// Agent events carry `agent`, `state` and `iteration` fields, so JSON output
/// can be filtered per agent when replaying a failing seed. Thread names and
/// ids are included because agents hop between runtime workers.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = env_filter(level);
    let layer = fmt::layer()
        .with_target(false)
        .with_thread_names(true)
        .with_thread_ids(true);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}
