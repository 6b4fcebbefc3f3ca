//! JDI-005: Dependency closure.
//!
//! Depth-first over `depends`, dependencies accumulated before dependents
//! and deduplicated by first occurrence. The requested names follow the
//! closure in caller order. Names on the current traversal path are
//! tracked so a cycle fails instead of recursing forever.

use super::types::{ExecutionPlan, Job, Recipe};
use crate::error::{JdiError, Result};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;

/// Resolve requested job names into a dependency-ordered plan.
pub fn resolve(recipe: &Recipe, requested: &[String]) -> Result<ExecutionPlan> {
    let mut walk = Walk {
        jobs: &recipe.jobs,
        closure: Vec::new(),
        seen: FxHashSet::default(),
        path: Vec::new(),
    };

    for name in requested {
        let job = recipe.jobs.get(name).ok_or_else(|| JdiError::UnknownJob {
            name: name.clone(),
            referenced_by: None,
        })?;
        walk.path.push(name.clone());
        for dep in &job.depends {
            walk.visit(dep, name)?;
        }
        walk.path.pop();
    }

    let Walk {
        mut closure,
        mut seen,
        ..
    } = walk;
    for name in requested {
        if seen.insert(name.clone()) {
            closure.push(name.clone());
        }
    }

    Ok(ExecutionPlan { order: closure })
}

struct Walk<'a> {
    jobs: &'a IndexMap<String, Job>,
    closure: Vec<String>,
    seen: FxHashSet<String>,
    path: Vec<String>,
}

impl Walk<'_> {
    fn visit(&mut self, name: &str, parent: &str) -> Result<()> {
        if let Some(start) = self.path.iter().position(|p| p == name) {
            let mut cycle = self.path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(JdiError::DependencyCycle { path: cycle });
        }
        if self.seen.contains(name) {
            return Ok(());
        }
        let jobs = self.jobs;
        let job = jobs.get(name).ok_or_else(|| JdiError::UnknownJob {
            name: name.to_string(),
            referenced_by: Some(parent.to_string()),
        })?;

        self.path.push(name.to_string());
        for dep in &job.depends {
            self.visit(dep, name)?;
        }
        self.path.pop();

        self.seen.insert(name.to_string());
        self.closure.push(name.to_string());
        Ok(())
    }
}
