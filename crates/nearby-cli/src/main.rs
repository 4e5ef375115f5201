//! Nearby CLI entry point

use clap::Parser;
use tracing::{error, info};

use nearby_cli::{
    cli::{Cli, Commands},
    config::CliConfig,
    demo::{run_demo, DemoOptions},
    error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = load_configuration(&cli)?;

    match cli.command {
        Commands::Demo { file, size, json } => {
            let options = DemoOptions { file, size, json };
            match run_demo(&config, &options).await {
                Ok(report) => {
                    if json {
                        println!("{}", serde_json::to_string(&report)?);
                    } else {
                        println!(
                            "Payload {} finished {:?}: sent {} bytes, received {} bytes in {} ms",
                            report.payload_id,
                            report.status,
                            report.bytes_sent,
                            report.bytes_received,
                            report.elapsed_ms
                        );
                    }
                }
                Err(e) => {
                    error!("Demo failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<CliConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        CliConfig::load_from_file(config_path)
    } else {
        info!("Using default configuration");
        Ok(CliConfig::default())
    }
}
