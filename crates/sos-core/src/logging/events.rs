//! Event vocabulary: levels, pipeline stages, event names and the
//! correlation ids attached to every event.

use serde::{Deserialize, Serialize};

/// Level as written in JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        if level == tracing::Level::ERROR {
            Level::Error
        } else if level == tracing::Level::WARN {
            Level::Warn
        } else if level == tracing::Level::INFO {
            Level::Info
        } else if level == tracing::Level::DEBUG {
            Level::Debug
        } else {
            Level::Trace
        }
    }
}

/// Where in the service an event happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    Register,
    /// Template lookup before decoding.
    Lookup,
    Decode,
    /// Constellation resolution and feature propagation.
    Validate,
    Persist,
    Commit,
    Rollback,
    Retrieve,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Register => "register",
            Stage::Lookup => "lookup",
            Stage::Decode => "decode",
            Stage::Validate => "validate",
            Stage::Persist => "persist",
            Stage::Commit => "commit",
            Stage::Rollback => "rollback",
            Stage::Retrieve => "retrieve",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event names, used as tracing targets.
pub mod event_names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";
    pub const CONFIG_LOADED: &str = "config.loaded";

    pub const TEMPLATE_REGISTERED: &str = "template.registered";
    pub const TEMPLATE_REJECTED: &str = "template.rejected";

    pub const INGEST_STARTED: &str = "ingest.started";
    pub const INGEST_PHASE: &str = "ingest.phase";
    pub const INGEST_COMMITTED: &str = "ingest.committed";
    pub const INGEST_ROLLED_BACK: &str = "ingest.rolled_back";

    pub const RESULT_RETRIEVED: &str = "result.retrieved";
}

/// Correlation ids shared by all events of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    pub run_id: String,
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
        }
    }

    /// Context with a fresh run id for this host.
    pub fn for_run() -> Self {
        LogContext::new(super::generate_run_id(), super::get_host_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display_matches_serde() {
        for stage in [Stage::Init, Stage::Decode, Stage::Rollback, Stage::Retrieve] {
            assert_eq!(
                serde_json::to_string(&stage).unwrap(),
                format!("\"{}\"", stage)
            );
        }
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(Level::from(tracing::Level::TRACE), Level::Trace);
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warn);
        assert_eq!(serde_json::to_string(&Level::Error).unwrap(), "\"error\"");
    }

    #[test]
    fn test_runs_get_distinct_ids_on_one_host() {
        let a = LogContext::for_run();
        let b = LogContext::for_run();
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.host_id, b.host_id);
    }

    #[test]
    fn test_event_names_are_dotted() {
        for name in [
            event_names::RUN_STARTED,
            event_names::CONFIG_LOADED,
            event_names::INGEST_ROLLED_BACK,
            event_names::RESULT_RETRIEVED,
        ] {
            assert!(name.contains('.'), "{}", name);
        }
    }
}
