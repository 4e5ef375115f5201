//! Nearby CLI library
//!
//! Argument parsing, configuration and the two-node loopback demo behind the
//! `nearby` binary.

pub mod cli;
pub mod config;
pub mod demo;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::CliConfig;
pub use demo::{run_demo, DemoOptions, DemoReport};
pub use error::{CliError, Result};
