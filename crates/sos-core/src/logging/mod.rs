//! Structured logging for the ingest pipeline.
//!
//! Events are emitted through [`log_event!`](crate::log_event), which stamps
//! the run and host ids of a [`LogContext`] and the pipeline [`Stage`] onto
//! every record and uses the event name as the tracing target. Output always
//! goes to stderr, either as compact text or as JSON lines.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::JsonlLayer;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::IsTerminal;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Later calls leave the first one in place.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(config.level).into())
        .parse_lossy("");
    let ansi = std::io::stderr().is_terminal();
    let human = config.format == LogFormat::Human;

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with((human && config.timestamps).then(|| {
            fmt::layer().with_writer(std::io::stderr).with_ansi(ansi)
        }))
        .with((human && !config.timestamps).then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .without_time()
        }))
        .with((config.format == LogFormat::Jsonl).then(JsonlLayer::stderr))
        .try_init();
}

/// Fresh id for one service instance or CLI invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &uuid[..12])
}

/// Stable, non-identifying id of this host.
pub fn get_host_id() -> String {
    let name = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    match name {
        Some(name) => format!("host-{}", &hash_string(&name)[..8]),
        None => "host-unknown".to_string(),
    }
}

fn hash_string(s: &str) -> String {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Emit a pipeline event.
///
/// ```ignore
/// log_event!(self.log, INFO, event_names::INGEST_COMMITTED, Stage::Commit,
///     format!("committed {} observations", n), template = id.as_str());
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, $level:ident, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)* $(,)?) => {
        tracing::event!(
            target: $event,
            tracing::Level::$level,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            message = %$msg,
            $($key = $val,)*
        )
    };
}
