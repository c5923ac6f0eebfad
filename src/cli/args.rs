use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "voicevault")]
#[command(about = "Records voice channels per speaker and shares them from cloud storage", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print share links for every stored recording of a channel
    Records(ChannelArgs),
    /// Upload whatever a previous pass left in a channel's staging directory
    Upload(ChannelArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct ChannelArgs {
    /// Voice channel id
    pub channel_id: String,
}
