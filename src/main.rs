mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use launcher::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Status { json } => commands::status::cmd_status(config, json).await?,
        Commands::Check { service, strict } => {
            let running = commands::check::cmd_check(config, &service, strict).await?;
            if !running {
                std::process::exit(1);
            }
        }
        Commands::Start { service } => commands::start::cmd_start(config, &service).await?,
        Commands::Stop { service } => commands::stop::cmd_stop(config, &service).await?,
        Commands::Verify => commands::verify::cmd_verify(config).await?,
        Commands::Open { tool } => commands::open::cmd_open(config, &tool).await?,
        Commands::Watch => commands::watch::cmd_watch(config).await?,
        Commands::Config { init } => commands::config::cmd_config(config, init)?,
    }

    Ok(())
}
