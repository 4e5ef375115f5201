//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a two-node session over the in-memory loopback radio
    Demo {
        /// File to send; random bytes are sent when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Size of the random payload in bytes
        #[arg(short, long, default_value_t = 64 * 1024)]
        size: usize,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}
