pub mod commands;
pub mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a crawl over a set of URLs
    Crawl {
        /// Target URLs
        #[arg(required_unless_present = "url_file")]
        urls: Vec<String>,

        /// File with one URL per line
        #[arg(short = 'f', long)]
        url_file: Option<PathBuf>,

        /// Selector schema YAML; built-in default extraction when omitted
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Site profile to use
        #[arg(short, long)]
        profile: Option<String>,

        /// Write results to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the recorded outcome of a finished crawl
    Status {
        /// Crawl ID to check
        #[arg(required = true)]
        crawl_id: String,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to show or create
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },

    /// Check a selector schema file without running a crawl
    ValidateSchema {
        /// Schema YAML file
        #[arg(required = true)]
        file: PathBuf,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl { urls, url_file, schema, profile, output } => {
            commands::crawl(urls, url_file, schema, profile, output).await
        }
        Commands::Status { crawl_id } => {
            info!("Checking status for crawl {}", crawl_id);
            commands::status(crawl_id).await
        }
        Commands::Config { profile, list } => {
            if list {
                commands::list_profiles().await
            } else if let Some(profile_name) = profile {
                commands::manage_profile(profile_name).await
            } else {
                commands::show_config().await
            }
        }
        Commands::ValidateSchema { file } => commands::validate_schema(file).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }
}
