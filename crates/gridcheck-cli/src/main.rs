use anyhow::Result;
use clap::Parser;
use gridcheck_cli::cli::{Cli, Commands};
use tracing::error;
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::run::RunArgs;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!("{err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Run {
            case,
            contingencies,
            out,
            bus_scope,
            config,
            adjust_reactive,
        } => commands::run::handle(RunArgs {
            case,
            contingencies,
            out,
            bus_scope: bus_scope.as_deref(),
            config: config.as_deref(),
            adjust_reactive: *adjust_reactive,
        }),
        Commands::Batch { file, threads } => commands::batch::handle(file, *threads),
        Commands::Validate {
            contingencies,
            config,
            adjust_reactive,
        } => commands::validate::handle(contingencies, config.as_deref(), *adjust_reactive),
    }
}
