use anyhow::Result;
use clap::Parser;
use tracing::info;

use turnos_hub::cli::{Cli, Command};
use turnos_hub::telemetry::Telemetry;
use turnos_hub::{client, HubConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(args) => {
            let config = HubConfig::try_from(args)?;
            info!(
                listen_addr = %config.listen_addr,
                admin_token = config.admin_token.is_some(),
                admin_writes_only = config.admin_writes_only,
                max_message_bytes = config.max_message_bytes,
                "starting turnos hub"
            );
            turnos_hub::run(config, Some(telemetry.metrics_handle())).await
        }
        Command::Watch(args) => client::run_watch(args).await,
        Command::Seed(args) => client::run_seed(args).await,
    }
}
