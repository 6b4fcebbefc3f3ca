//! jdi: a recipe-driven task runner.
//!
//! Jobs from a templated recipe are resolved with their dependencies,
//! prefixed with their environment, and sent in order to one long-lived
//! shell session, usually inside a container.

pub mod cli;
pub mod core;
pub mod error;
pub mod session;
