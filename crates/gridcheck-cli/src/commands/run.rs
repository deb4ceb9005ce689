use crate::commands::summary::print_summary;
use anyhow::{Context, Result};
use gridcheck_algo::{run_study, BusScope, NetworkSession};
use gridcheck_io::{load_bus_scope, load_contingencies, write_report, StudyConfig};
use std::path::Path;
use tracing::{error, info, warn};

pub struct RunArgs<'a> {
    pub case: &'a Path,
    pub contingencies: &'a Path,
    pub out: &'a Path,
    pub bus_scope: Option<&'a Path>,
    pub config: Option<&'a Path>,
    pub adjust_reactive: bool,
}

pub fn handle(args: RunArgs<'_>) -> Result<()> {
    let config = StudyConfig::load_or_default(args.config, args.adjust_reactive)?;
    let contingencies = load_contingencies(args.contingencies)?;
    let scope = match args.bus_scope {
        Some(path) => load_bus_scope(path)?,
        None => BusScope::default(),
    };
    info!(
        "Running {} contingencies on {} -> {}",
        contingencies.len(),
        args.case.display(),
        args.out.display()
    );

    let mut session = NetworkSession::new(config.solver.clone()).context("creating solver session")?;
    let settings = config.study_settings(args.adjust_reactive);
    match run_study(&mut session, args.case, &contingencies, &scope, &settings) {
        Ok(report) => {
            write_report(&report, args.out)?;
            print_summary(&report.summary)?;
            for issue in &report.diagnostics.issues {
                warn!("{issue}");
            }
            println!("Diagnostics: {}", report.diagnostics.summary());
            Ok(())
        }
        Err(err) => {
            if let Some(partial) = err.partial_report() {
                error!(
                    "case aborted after {} contingencies; writing partial results",
                    partial.results.len()
                );
                write_report(partial, args.out).context("writing partial results")?;
                print_summary(&partial.summary)?;
            }
            Err(err).with_context(|| format!("study of '{}' failed", args.case.display()))
        }
    }
}
