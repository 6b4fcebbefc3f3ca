//! JDI-003: Recipe body templating.
//!
//! The body is parsed once into literal and `{{.Args.key}}` segments, then
//! rendered segment by segment into any writer. The only namespace is
//! `.Args`; any other reference is rejected at parse time, and a key
//! missing from the overrides fails the render.

use super::types::Overrides;
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Arg(&'a str),
}

/// A parsed body template borrowing from the recipe text.
#[derive(Debug, Clone)]
pub struct Template<'a> {
    segments: Vec<Segment<'a>>,
}

/// Failure while rendering into a writer.
#[derive(Debug)]
pub enum RenderError {
    /// Substitution could not be resolved
    Unresolved(String),
    /// The writer went away
    Io(std::io::Error),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unresolved(key) => write!(f, "no override for .Args.{}", key),
            Self::Io(e) => write!(f, "write error: {}", e),
        }
    }
}

impl<'a> Template<'a> {
    pub fn parse(source: &'a str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(&rest[..open]));
            }
            let close = rest[open..]
                .find("}}")
                .ok_or_else(|| format!("unclosed action at byte {}", offset + open))?;
            let action = rest[open + 2..open + close].trim();
            let key = action
                .strip_prefix(".Args.")
                .filter(|k| !k.is_empty() && !k.contains(char::is_whitespace))
                .ok_or_else(|| {
                    format!(
                        "unsupported reference '{{{{{}}}}}' at byte {}",
                        action,
                        offset + open
                    )
                })?;
            segments.push(Segment::Arg(key));

            let consumed = open + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest));
        }
        Ok(Self { segments })
    }

    pub fn render_to<W: Write>(&self, args: &Overrides, out: &mut W) -> Result<(), RenderError> {
        for segment in &self.segments {
            let text = match segment {
                Segment::Literal(text) => *text,
                Segment::Arg(key) => args
                    .get(key)
                    .ok_or_else(|| RenderError::Unresolved(key.to_string()))?,
            };
            out.write_all(text.as_bytes()).map_err(RenderError::Io)?;
        }
        out.flush().map_err(RenderError::Io)
    }

    pub fn render(&self, args: &Overrides) -> Result<String, RenderError> {
        let mut buf = Vec::new();
        self.render_to(args, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
