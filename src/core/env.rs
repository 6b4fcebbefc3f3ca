//! JDI-002: Environment composition.
//!
//! Sources are appended in precedence order: environment files, then the
//! declared map, then caller overrides. Nothing is deduplicated; the shell
//! resolves shadowing when the set is exported.

use super::types::{EnvEntry, EnvironmentSet, Overrides};
use crate::error::{JdiError, Result};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Compose an environment from files, a declared map and overrides.
pub fn compose(
    files: &[PathBuf],
    declared: &IndexMap<String, String>,
    overrides: &Overrides,
) -> Result<EnvironmentSet> {
    let mut env = EnvironmentSet::default();
    env.extend_files(files)?;
    env.extend_map(declared);
    env.extend_map(overrides.as_map());
    Ok(env)
}

/// Read an environment file. Blank lines and `#` comments are skipped;
/// every other line is kept verbatim.
pub fn read_env_file(path: &Path) -> Result<Vec<EnvEntry>> {
    let content = std::fs::read_to_string(path).map_err(|source| JdiError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .map(EnvEntry::parse)
        .collect())
}

impl EnvironmentSet {
    pub fn extend_files(&mut self, files: &[PathBuf]) -> Result<()> {
        for file in files {
            self.entries.extend(read_env_file(file)?);
        }
        Ok(())
    }

    /// Append `KEY=VALUE` entries, dropping empty values.
    pub fn extend_map(&mut self, map: &IndexMap<String, String>) {
        self.entries.extend(
            map.iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(key, value)| EnvEntry {
                    key: key.clone(),
                    value: Some(value.clone()),
                }),
        );
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|entry| entry.key == key)
    }

    /// Check that every required key has an entry with exactly that name.
    /// Returns the first missing key.
    pub fn validate<'a>(
        &self,
        required: impl IntoIterator<Item = &'a str>,
    ) -> std::result::Result<(), String> {
        for key in required {
            if !self.contains_key(key) {
                return Err(key.to_string());
            }
        }
        Ok(())
    }

    /// Render `export K=V ...` followed by the command. An empty set yields
    /// the bare command, since a bare `export` lists the whole environment.
    pub fn export_preamble(&self, command: &str) -> String {
        if self.entries.is_empty() {
            return command.to_string();
        }
        let pairs: Vec<String> = self.entries.iter().map(ToString::to_string).collect();
        format!("export {}\n{}", pairs.join(" "), command)
    }
}
