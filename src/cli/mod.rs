pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker: bus consumer, queue workers and liveness endpoint
    Serve {
        /// Configuration profile to use
        #[arg(short, long, default_value = "default")]
        profile: String,
    },

    /// Submit one request envelope over the bus and print the response
    Submit {
        /// Request pattern, e.g. crawlOnchSoldoutProducts
        #[arg(required = true)]
        pattern: String,

        /// JSON payload data
        #[arg(short, long, default_value = "{}")]
        data: String,

        /// Store the job runs against
        #[arg(short, long, default_value = "onch")]
        store: String,

        /// Correlation job id; generated when omitted
        #[arg(short, long)]
        job_id: Option<String>,

        /// Configuration profile to use
        #[arg(short, long, default_value = "default")]
        profile: String,

        /// Seconds to wait for the response
        #[arg(short, long, default_value_t = 300)]
        timeout: usize,
    },

    /// Show queue status counts of a running worker
    Status {
        /// Configuration profile to use
        #[arg(short, long, default_value = "default")]
        profile: String,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { profile } => {
            info!("Starting worker with profile {}", profile);
            commands::serve(profile).await
        }
        Commands::Submit { pattern, data, store, job_id, profile, timeout } => {
            info!("Submitting {} request", pattern);
            commands::submit(pattern, data, store, job_id, profile, timeout).await
        }
        Commands::Status { profile } => {
            info!("Checking queue status");
            commands::status(profile).await
        }
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles().await
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name).await
            } else {
                info!("Showing current configuration");
                commands::show_config().await
            }
        }
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
