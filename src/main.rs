use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use voicevault::{
    cli::{handle_records_command, handle_upload_command, Cli, CliCommand},
    config::Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        CliCommand::Version => {
            println!("voicevault {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::Records(args) => {
            let config = Config::load()?;
            handle_records_command(&config, args).await
        }
        CliCommand::Upload(args) => {
            let config = Config::load()?;
            handle_upload_command(&config, args).await
        }
    }
}
