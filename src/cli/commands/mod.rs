//! CLI command implementations.
//!
//! Each subcommand implements [`Command`] and is routed by
//! [`CommandDispatcher`]. Commands open their own [`AppContext`] from a
//! [`CommandEnv`] and release it before returning.
//!
//! [`AppContext`]: crate::context::AppContext

pub mod cleanup;
pub mod collect;
pub mod completions;
pub mod dispatcher;
pub mod display;
pub mod info;
pub mod plan;
pub mod run;
pub mod status;
pub mod steps;
pub mod stop;
pub mod submit;
pub mod workflow;

pub use dispatcher::{Command, CommandDispatcher, CommandEnv, CommandResult};
