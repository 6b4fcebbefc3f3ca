//! JDI-008: Image builder.
//!
//! Uses the `docker` binary directly. Build output is captured and only
//! shown when the build fails.

use crate::error::{JdiError, Result};
use std::path::Path;
use std::process::Command;
use tracing::info;

/// Build `image` from the build-file at `builder`, with the current
/// directory as build context.
pub fn build_image(builder: &Path, image: &str) -> Result<()> {
    build_with("docker", builder, image)
}

fn build_with(program: &str, builder: &Path, image: &str) -> Result<()> {
    let failure = |reason: String| JdiError::BuilderFailure {
        builder: builder.to_path_buf(),
        image: image.to_string(),
        reason,
    };

    info!(builder = %builder.display(), image, "building image");
    let output = Command::new(program)
        .args(build_args(builder, image))
        .output()
        .map_err(|e| failure(format!("cannot run {}: {}", program, e)))?;

    if output.status.success() {
        return Ok(());
    }

    // Combined output, stdout first.
    eprint!("{}", String::from_utf8_lossy(&output.stdout));
    eprint!("{}", String::from_utf8_lossy(&output.stderr));
    Err(failure(match output.status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }))
}

fn build_args(builder: &Path, image: &str) -> Vec<String> {
    vec![
        "build".to_string(),
        "-t".to_string(),
        image.to_string(),
        "-f".to_string(),
        builder.display().to_string(),
        ".".to_string(),
    ]
}
