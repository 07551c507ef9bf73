use anyhow::Result;
use tracing::{info, error};

mod automation;
mod browser;
mod cli;
mod dispatch;
mod notify;
mod queue;
mod scrape;
mod server;
mod storage;
mod tasks;
mod utils;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::parse_args();

    // Initialize logging
    utils::init_logging(args.verbose, None)?;

    info!("Starting Onch worker v{}", env!("CARGO_PKG_VERSION"));

    // Process commands
    match cli::process_command(args).await {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {}", e);
            Err(e)
        }
    }
}
