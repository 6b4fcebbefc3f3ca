//! Core orchestration: types, environment, templating, loading, resolution, compilation, dispatch.

pub mod compiler;
pub mod env;
pub mod executor;
pub mod recipe;
pub mod resolver;
pub mod template;
pub mod types;
