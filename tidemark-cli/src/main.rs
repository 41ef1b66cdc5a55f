//! Tidemark CLI - Command-line interface for Tidemark migrations.

use clap::Parser;
use miette::Diagnostic;
use tracing::warn;

use tidemark_cli::cli::{Cli, Command};
use tidemark_cli::commands::{self, Context};
use tidemark_cli::error::CliResult;
use tidemark_cli::{logging, output};
use tidemark_migrate::CancellationToken;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    // Run the CLI and handle errors
    if let Err(e) = run(cli, cancel).await {
        output::newline();
        output::error(&e.to_string());
        if let Some(version) = e.failed_version() {
            output::error(&format!("Failed at version {}", version));
        }
        if let Some(help) = e.help() {
            output::help(&help.to_string());
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> CliResult<()> {
    if let Command::Version = cli.command {
        return commands::version::run();
    }

    let ctx = Context::load(&cli.config, cli.db_url, cancel)?;

    match cli.command {
        Command::Migrate(args) => commands::migrate::run(args, &ctx).await,
        Command::Seed(args) => commands::seed::run(args, &ctx).await,
        Command::Version => commands::version::run(),
    }
}
