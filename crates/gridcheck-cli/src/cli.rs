use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gridcheck", author, version, about = "Contingency execution and compliance checks", long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every contingency against one network case
    Run {
        /// Network case (JSON)
        #[arg(value_hint = ValueHint::FilePath)]
        case: PathBuf,
        /// Contingency CSV directory or YAML/JSON file
        #[arg(long, value_hint = ValueHint::AnyPath)]
        contingencies: PathBuf,
        /// Results directory
        #[arg(long, value_hint = ValueHint::DirPath)]
        out: PathBuf,
        /// Bus scope CSV (bus,include,contingency)
        #[arg(long, value_hint = ValueHint::FilePath)]
        bus_scope: Option<PathBuf>,
        /// Study configuration (TOML)
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
        /// Run the reactive compensation search after each steady-state solve
        #[arg(long)]
        adjust_reactive: bool,
    },
    /// Run several cases described by a batch file
    Batch {
        /// Batch file (TOML, YAML or JSON)
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// Override the batch file's thread count (0 = all CPUs)
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Check contingency and configuration inputs without solving
    Validate {
        /// Contingency CSV directory or YAML/JSON file
        #[arg(long, value_hint = ValueHint::AnyPath)]
        contingencies: PathBuf,
        /// Study configuration (TOML)
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
        /// Also check the compensation section of the configuration
        #[arg(long)]
        adjust_reactive: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::parse_from([
            "gridcheck",
            "run",
            "winter.json",
            "--contingencies",
            "contingencies",
            "--out",
            "results",
            "--adjust-reactive",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
        match cli.command {
            Commands::Run {
                case,
                adjust_reactive,
                bus_scope,
                ..
            } => {
                assert_eq!(case, PathBuf::from("winter.json"));
                assert!(adjust_reactive);
                assert!(bus_scope.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
