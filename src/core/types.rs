//! JDI-001: Recipe schema and orchestration types.
//!
//! Header and Job are decoded from YAML. EnvironmentSet, ExecutionPlan and
//! CompiledJob are derived during an invocation and never persisted.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Recipe document
// ============================================================================

/// Recipe-wide defaults. Decoded strictly: unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Header {
    /// Image build-file, built before the session starts
    #[serde(default)]
    pub builder: Option<PathBuf>,

    /// Base environment for every job
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: IndexMap<String, String>,

    /// Environment files read before `env`
    #[serde(default, rename = "envFile")]
    pub env_file: Vec<PathBuf>,
}

/// A named unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job environment; every key is also required to be present
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: IndexMap<String, String>,

    #[serde(default, rename = "envFile")]
    pub env_file: Vec<PathBuf>,

    #[serde(default)]
    pub run: String,

    /// Cleanup command, sent after `run` whatever its outcome
    #[serde(default)]
    pub defer: String,

    /// Names of jobs that must run first
    #[serde(default)]
    pub depends: Vec<String>,
}

/// Header plus job table, read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recipe {
    pub header: Header,
    pub jobs: IndexMap<String, Job>,
}

/// Accept any YAML scalar as an environment value (`PORT: 8080`).
fn scalar_map<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<IndexMap<String, serde_yaml_ng::Value>> = Option::deserialize(deserializer)?;
    let mut out = IndexMap::new();
    for (key, value) in raw.unwrap_or_default() {
        let value = match value {
            serde_yaml_ng::Value::Null => String::new(),
            serde_yaml_ng::Value::String(s) => s,
            serde_yaml_ng::Value::Bool(b) => b.to_string(),
            serde_yaml_ng::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "env value for '{}' must be a scalar, got {:?}",
                    key, other
                )))
            }
        };
        out.insert(key, value);
    }
    Ok(out)
}

// ============================================================================
// Caller overrides
// ============================================================================

/// Caller-supplied `key=value` pairs. Exposed to templates as `.Args`
/// and appended last to every job environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides(IndexMap<String, String>);

impl Overrides {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut map = IndexMap::new();
        for (key, value) in pairs {
            map.insert(key, value);
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn as_map(&self) -> &IndexMap<String, String> {
        &self.0
    }
}

// ============================================================================
// Environment
// ============================================================================

/// One environment entry. File-sourced lines without `=` keep their text
/// as the key and carry no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: String,
    pub value: Option<String>,
}

impl EnvEntry {
    pub fn parse(line: &str) -> Self {
        match line.split_once('=') {
            Some((key, value)) => Self {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            None => Self {
                key: line.to_string(),
                value: None,
            },
        }
    }
}

impl fmt::Display for EnvEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.key, value),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Ordered entries; later entries shadow earlier ones once exported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSet {
    pub entries: Vec<EnvEntry>,
}

// ============================================================================
// Plan
// ============================================================================

/// Job names in dispatch order. Each name appears once, after all of its
/// dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub order: Vec<String>,
}

impl ExecutionPlan {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// Export-prefixed statements for one job, ready to send to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledJob {
    pub name: String,
    pub run: Option<String>,
    pub defer: Option<String>,
}
