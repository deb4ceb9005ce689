use anyhow::Result;
use gridcheck_algo::SummaryRow;
use std::io::{self, Write};
use tabwriter::TabWriter;

fn mark(ok: bool) -> &'static str {
    if ok {
        "pass"
    } else {
        "FAIL"
    }
}

/// Tab-aligned compliance summary on stdout.
pub fn print_summary(rows: &[SummaryRow]) -> Result<()> {
    let mut writer = TabWriter::new(io::stdout());
    writeln!(
        writer,
        "CONTINGENCY\tMESSAGE\tSTEP CHANGE\tSTEADY VOLTAGE\tCIRCUITS\tTX2\tTX3 WINDINGS"
    )?;
    for row in rows {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.contingency,
            row.message,
            mark(row.step_change),
            mark(row.steady_voltage),
            mark(row.circuit_loading),
            mark(row.tx2_loading),
            mark(row.winding_loading)
        )?;
    }
    writer.flush()?;

    let compliant = rows.iter().filter(|row| row.all_compliant()).count();
    println!("{compliant} of {} rows fully compliant", rows.len());
    Ok(())
}
