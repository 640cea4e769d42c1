//! RC CLI - RunCloud web application provisioning

mod api;
mod cli;
mod commands;
mod config;
mod generate;
mod output;
mod provision;
mod proxy;

use clap::Parser;
use cli::{Cli, Commands};
use output::PebbleError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let out = output::Output::new(cli.agent, cli.verbose);

    // If no command provided, show help
    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            eprintln!("Error: no command provided. Use --help for usage.");
            std::process::exit(1);
        }
    };

    let result = match command {
        Commands::Create(args) => commands::create::run(args, &out).await,
        Commands::Proxy(args) => commands::proxy::run(args, &out).await,
    };

    if let Err(e) = result {
        out.error(PebbleError::sys("INTERNAL", &format!("{:#}", e)));
    }
}
