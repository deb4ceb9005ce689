use anyhow::{bail, Result};
use gridcheck_batch::{run_batch, BatchFile, BatchRunnerConfig, NetworkSessionFactory};
use std::io::{self, Write};
use std::path::Path;
use tabwriter::TabWriter;
use tracing::info;

pub fn handle(file: &Path, threads: Option<usize>) -> Result<()> {
    let batch = BatchFile::load(file)?;
    let mut config = BatchRunnerConfig::from_batch_file(batch)?;
    if let Some(threads) = threads {
        config.threads = threads;
    }
    info!("Running batch {} ({} cases)", file.display(), config.cases.len());

    let summary = run_batch(&config, &NetworkSessionFactory)?;

    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "CASE\tSTATUS\tCONTINGENCIES\tCOMPLIANT\tSECONDS\tOUTPUT")?;
    for record in &summary.cases {
        let compliant = match record.compliant {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        };
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{:.2}\t{}",
            record.id, record.status, record.contingencies, compliant, record.duration_secs, record.output
        )?;
    }
    writer.flush()?;
    println!(
        "{} ok, {} failed; manifest {}",
        summary.success,
        summary.failure,
        summary.manifest_path.display()
    );

    if summary.failure > 0 {
        bail!("{} of {} cases failed", summary.failure, summary.cases.len());
    }
    Ok(())
}
