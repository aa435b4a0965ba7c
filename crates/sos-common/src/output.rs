//! CLI output formats.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How a command renders its result on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Response envelope as pretty JSON.
    #[default]
    Json,
    /// `[OK] command: ...` on one line.
    Summary,
    /// Markdown tables for people.
    Md,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputFormat::Json => "json",
            OutputFormat::Summary => "summary",
            OutputFormat::Md => "md",
        };
        f.write_str(name)
    }
}
