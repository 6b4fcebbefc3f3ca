//! JDI-004: Recipe loading.
//!
//! A recipe is a YAML header and a templated YAML body separated by the
//! first run of three line breaks. The header is decoded strictly. The
//! body is rendered on a scoped thread into a pipe while the decoder reads
//! the other end; the renderer is joined before loading returns, so a
//! render failure is always reported.

use super::template::{RenderError, Template};
use super::types::{Header, Job, Overrides, Recipe};
use crate::error::{JdiError, Result};
use indexmap::IndexMap;
use std::path::Path;
use tracing::debug;

/// Header/body delimiter.
pub const DELIMITER: &str = "\n\n\n";

/// Load a recipe file, rendering its body with the caller's overrides.
pub fn load_recipe(path: &Path, args: &Overrides) -> Result<Recipe> {
    let content = std::fs::read_to_string(path).map_err(|source| JdiError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let recipe = parse_recipe(&content, args, path)?;
    debug!(
        path = %path.display(),
        jobs = recipe.jobs.len(),
        "recipe loaded"
    );
    Ok(recipe)
}

/// Parse recipe text. `origin` is only used in error messages.
pub fn parse_recipe(content: &str, args: &Overrides, origin: &Path) -> Result<Recipe> {
    let (header_text, body_text) =
        content.split_once(DELIMITER).ok_or_else(|| JdiError::MalformedRecipe {
            path: origin.to_path_buf(),
            reason: "missing blank-line delimiter between header and jobs".to_string(),
        })?;

    let header = decode_header(header_text)?;
    if body_text.trim().is_empty() {
        return Ok(Recipe {
            header,
            jobs: IndexMap::new(),
        });
    }
    let template = Template::parse(body_text).map_err(JdiError::Template)?;
    let jobs = decode_jobs(&template, args)?;

    Ok(Recipe { header, jobs })
}

fn decode_header(text: &str) -> Result<Header> {
    if text.trim().is_empty() {
        return Ok(Header::default());
    }
    let header: Option<Header> =
        serde_yaml_ng::from_str(text).map_err(|e| JdiError::HeaderDecode(e.to_string()))?;
    Ok(header.unwrap_or_default())
}

/// Render the body into a pipe and decode the job table from it.
fn decode_jobs(template: &Template<'_>, args: &Overrides) -> Result<IndexMap<String, Job>> {
    let (reader, mut writer) = std::io::pipe()
        .map_err(|e| JdiError::Template(format!("cannot open render pipe: {}", e)))?;

    let (rendered, decoded) = std::thread::scope(|scope| {
        let renderer = scope.spawn(move || {
            let result = template.render_to(args, &mut writer);
            drop(writer);
            result
        });
        let decoded: std::result::Result<Option<IndexMap<String, Job>>, _> =
            serde_yaml_ng::from_reader(reader);
        (renderer.join(), decoded)
    });

    let rendered = rendered.map_err(|_| JdiError::Template("renderer panicked".to_string()))?;
    match (rendered, decoded) {
        (Ok(()), Ok(jobs)) => Ok(jobs.unwrap_or_default()),
        (Ok(()), Err(e)) => Err(JdiError::JobDecode(e.to_string())),
        (Err(e @ RenderError::Unresolved(_)), _) => Err(JdiError::Template(e.to_string())),
        // A write error means the decoder stopped reading; its error is the cause.
        (Err(RenderError::Io(_)), Err(e)) => Err(JdiError::JobDecode(e.to_string())),
        (Err(e @ RenderError::Io(_)), Ok(_)) => Err(JdiError::Template(e.to_string())),
    }
}
