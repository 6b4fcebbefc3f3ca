//! JDI-006: Job compilation.
//!
//! Each job gets the header environment, then its own env files, its own
//! declared env, then the caller overrides. Every key the job declares
//! must be present in the result, even when declared empty.

use super::env;
use super::types::{CompiledJob, EnvironmentSet, ExecutionPlan, Job, Overrides, Recipe};
use crate::error::{JdiError, Result};

/// Compose the header-level environment shared by every job.
pub fn base_environment(recipe: &Recipe) -> Result<EnvironmentSet> {
    env::compose(
        &recipe.header.env_file,
        &recipe.header.env,
        &Overrides::default(),
    )
}

/// Compile one job into its run and defer statements.
pub fn compile(
    name: &str,
    job: &Job,
    base: &EnvironmentSet,
    overrides: &Overrides,
) -> Result<CompiledJob> {
    let mut env = base.clone();
    env.extend_files(&job.env_file)?;
    env.extend_map(&job.env);
    env.extend_map(overrides.as_map());

    env.validate(job.env.keys().map(String::as_str))
        .map_err(|key| JdiError::MissingRequiredEnvironment {
            job: name.to_string(),
            key,
        })?;

    let statement = |command: &str| {
        if command.is_empty() {
            None
        } else {
            Some(env.export_preamble(command))
        }
    };

    Ok(CompiledJob {
        name: name.to_string(),
        run: statement(&job.run),
        defer: statement(&job.defer),
    })
}

/// Compile every job in the plan, in plan order.
pub fn compile_plan(
    recipe: &Recipe,
    plan: &ExecutionPlan,
    overrides: &Overrides,
) -> Result<Vec<CompiledJob>> {
    let base = base_environment(recipe)?;
    plan.iter()
        .map(|name| {
            let job = recipe.jobs.get(name).ok_or_else(|| JdiError::UnknownJob {
                name: name.to_string(),
                referenced_by: None,
            })?;
            compile(name, job, &base, overrides)
        })
        .collect()
}
