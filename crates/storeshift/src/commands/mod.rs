//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function returning the
//! process exit code.

pub mod check;
pub mod run;
pub mod verify;
