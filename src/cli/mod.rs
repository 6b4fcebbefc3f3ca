//! JDI-010: Command line. Recipe file, overrides and requested jobs.

use crate::core::executor::Controller;
use crate::core::types::{CompiledJob, Overrides, Recipe};
use crate::core::{compiler, recipe, resolver};
use crate::error::{JdiError, Result};
use crate::session::process::ProcessSession;
use crate::session::{builder, Backend, SessionConfig};
use clap::Parser;
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Image the builder tags and the container session runs.
pub const DEFAULT_IMAGE: &str = "justdoit";

static OVERRIDE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|e| panic!("bad key pattern: {}", e))
});

#[derive(Parser, Debug)]
#[command(
    name = "jdi",
    version,
    about = "Run recipe jobs and their dependencies in one container session"
)]
pub struct Cli {
    /// Recipe file
    #[arg(short, long, default_value = ".jdi")]
    pub file: PathBuf,

    /// Override as KEY=VALUE, exported to every job and exposed as .Args.KEY
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_override)]
    pub env: Vec<(String, String)>,

    /// Run in a local bash session instead of a container
    #[arg(long)]
    pub local: bool,

    /// Run the container without --privileged
    #[arg(long, conflicts_with = "local")]
    pub unprivileged: bool,

    /// Image to build and run
    #[arg(long, default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Seconds to wait for the session to exit before stopping it
    #[arg(long, default_value_t = 2)]
    pub grace: u64,

    /// Print the plan and compiled statements without starting a session
    #[arg(long)]
    pub dry_run: bool,

    /// Print dry-run output as JSON
    #[arg(long, requires = "dry_run")]
    pub json: bool,

    /// List the recipe's jobs and exit
    #[arg(long)]
    pub list: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Jobs to run, dependencies first
    pub jobs: Vec<String>,
}

/// Parse one `KEY=VALUE` override. The value may be empty or contain `=`.
pub fn parse_override(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| JdiError::InvalidOverride(raw.to_string()))?;
    if !OVERRIDE_KEY.is_match(key) {
        return Err(JdiError::InvalidOverride(raw.to_string()));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Load, resolve, compile and dispatch.
pub async fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides::new(cli.env.iter().cloned());
    let recipe = recipe::load_recipe(&cli.file, &overrides)?;

    if cli.list {
        print!("{}", format_job_list(&recipe));
        return Ok(());
    }
    if cli.jobs.is_empty() {
        warn!("no jobs requested");
        return Ok(());
    }

    let plan = resolver::resolve(&recipe, &cli.jobs)?;
    info!(plan = %plan.order.join(" -> "), "plan resolved");
    let compiled = compiler::compile_plan(&recipe, &plan, &overrides)?;

    if cli.dry_run {
        print!("{}", format_dry_run(&plan.order, &compiled, cli.json)?);
        return Ok(());
    }

    let workdir = std::env::current_dir().map_err(|source| JdiError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    let backend = if cli.local {
        if recipe.header.builder.is_some() {
            debug!("local session, skipping image build");
        }
        Backend::Local
    } else {
        if let Some(build_file) = &recipe.header.builder {
            builder::build_image(build_file, &cli.image)?;
        }
        Backend::Container {
            image: cli.image.clone(),
        }
    };

    let mut config = SessionConfig::new(workdir, backend);
    config.privileged = !cli.unprivileged;
    let session = ProcessSession::start(&config)?;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let summary = Controller::new(session, Duration::from_secs(cli.grace))
        .run(&compiled, cancel_rx)
        .await?;
    info!(
        jobs = summary.jobs_completed,
        defers_failed = summary.defers_failed,
        seconds = summary.total_duration.as_secs_f64(),
        "done"
    );
    Ok(())
}

fn format_job_list(recipe: &Recipe) -> String {
    let mut out = String::new();
    for (name, job) in &recipe.jobs {
        if job.depends.is_empty() {
            out.push_str(&format!("{}\n", name));
        } else {
            out.push_str(&format!("{} (depends: {})\n", name, job.depends.join(", ")));
        }
    }
    out
}

#[derive(Serialize)]
struct DryRun<'a> {
    plan: &'a [String],
    jobs: &'a [CompiledJob],
}

fn format_dry_run(plan: &[String], jobs: &[CompiledJob], json: bool) -> Result<String> {
    if json {
        let mut text = serde_json::to_string_pretty(&DryRun { plan, jobs })
            .map_err(|e| JdiError::Serialization(e.to_string()))?;
        text.push('\n');
        return Ok(text);
    }

    let mut out = format!("Plan: {}\n", plan.join(" -> "));
    for job in jobs {
        out.push_str(&format!("\n[{}]\n", job.name));
        if let Some(run) = &job.run {
            out.push_str(&format!("run:\n{}\n", run));
        }
        if let Some(defer) = &job.defer {
            out.push_str(&format!("defer:\n{}\n", defer));
        }
    }
    Ok(out)
}
