use anyhow::Result;
use tracing::{error, info};

use selector_crawler::cli;
use selector_crawler::utils::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging(false, None)?;

    info!("Starting Selector Crawler v{}", env!("CARGO_PKG_VERSION"));

    // Parse command line arguments
    let args = cli::parse_args();

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
