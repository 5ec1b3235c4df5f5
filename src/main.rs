use clap::Parser;

use rendezvous_relay::config::{Cli, Commands};
use rendezvous_relay::server;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    server::init_log(&cli.log_level);

    match cli.command {
        Commands::Serve(args) => server::serve(args.into()),
    }
}
