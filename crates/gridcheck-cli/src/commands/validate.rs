use anyhow::Result;
use gridcheck_io::{load_contingencies, StudyConfig};
use std::io::{self, Write};
use std::path::Path;
use tabwriter::TabWriter;

pub fn handle(contingencies: &Path, config: Option<&Path>, adjust_reactive: bool) -> Result<()> {
    let config = StudyConfig::load_or_default(config, adjust_reactive)?;
    let set = load_contingencies(contingencies)?;

    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "CONTINGENCY\tKIND\tACTIONS\tEXCLUDED BUSES")?;
    for contingency in &set {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            contingency.name,
            contingency.kind(),
            contingency.actions().len(),
            contingency.excluded_buses.len()
        )?;
    }
    writer.flush()?;
    println!(
        "{} contingencies valid; {} voltage bands configured",
        set.len(),
        config.thresholds.voltage_bands.bands().len()
    );
    Ok(())
}
