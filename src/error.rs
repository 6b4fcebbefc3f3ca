//! JDI-009: Error taxonomy.
//!
//! Every failure is terminal for the invocation. Variants carry enough
//! context (path, job, key, status) to act on without a verbose rerun.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JdiError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed recipe {}: {reason}", path.display())]
    MalformedRecipe { path: PathBuf, reason: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("failed to decode header: {0}")]
    HeaderDecode(String),

    #[error("failed to decode jobs: {0}")]
    JobDecode(String),

    #[error("job '{name}' not found{}", referenced_by.as_ref().map(|r| format!(" (required by '{}')", r)).unwrap_or_default())]
    UnknownJob {
        name: String,
        referenced_by: Option<String>,
    },

    #[error("dependency cycle detected: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("job '{job}': required environment variable {key} not found")]
    MissingRequiredEnvironment { job: String, key: String },

    #[error("invalid override '{0}': expected key=value with a shell identifier key")]
    InvalidOverride(String),

    #[error("failed to build image '{image}' from {}: {reason}", builder.display())]
    BuilderFailure {
        builder: PathBuf,
        image: String,
        reason: String,
    },

    #[error("failed to start session: {0}")]
    SessionStart(String),

    #[error("job '{job}' failed: {reason}")]
    CommandDispatch { job: String, reason: String },

    #[error("session error: {0}")]
    Session(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, JdiError>;
