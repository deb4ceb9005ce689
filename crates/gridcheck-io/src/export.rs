//! Result export: one CSV per dataset, `summary.csv`, `diagnostics.csv` and
//! `report.json`.

use anyhow::{Context, Result};
use gridcheck_algo::{ExportTable, StudyReport};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SUMMARY_FILE: &str = "summary.csv";
pub const REPORT_FILE: &str = "report.json";
pub const DIAGNOSTICS_FILE: &str = "diagnostics.csv";

/// Write every table of `report` into `dir`, creating it if needed. Existing
/// files are overwritten. Returns the written paths.
pub fn write_report(report: &StudyReport, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory '{}'", dir.display()))?;

    let mut written = Vec::new();
    for table in report.tables() {
        let path = dir.join(format!("{}.csv", table.name));
        write_table(&table, &path)?;
        written.push(path);
    }

    let summary = dir.join(SUMMARY_FILE);
    write_table(&report.summary_table(), &summary)?;
    written.push(summary);

    let diagnostics = dir.join(DIAGNOSTICS_FILE);
    write_table(&diagnostics_table(report), &diagnostics)?;
    written.push(diagnostics);

    let json_path = dir.join(REPORT_FILE);
    announce_overwrite(&json_path);
    let json = report.to_json().context("serializing report")?;
    fs::write(&json_path, json)
        .with_context(|| format!("writing '{}'", json_path.display()))?;
    written.push(json_path);

    info!(
        case = %report.case,
        dir = %dir.display(),
        files = written.len(),
        "results written"
    );
    Ok(written)
}

pub fn write_table(table: &ExportTable, path: &Path) -> Result<()> {
    announce_overwrite(path);
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("opening '{}' for writing", path.display()))?;
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer
        .flush()
        .with_context(|| format!("writing '{}'", path.display()))?;
    Ok(())
}

fn diagnostics_table(report: &StudyReport) -> ExportTable {
    ExportTable {
        name: "diagnostics".to_string(),
        headers: ["severity", "category", "entity", "message"]
            .iter()
            .map(|h| h.to_string())
            .collect(),
        rows: report
            .diagnostics
            .issues
            .iter()
            .map(|issue| {
                vec![
                    issue.severity.as_str().to_string(),
                    issue.category.clone(),
                    issue.entity.clone().unwrap_or_default(),
                    issue.message.clone(),
                ]
            })
            .collect(),
    }
}

fn announce_overwrite(path: &Path) {
    if path.exists() {
        info!(path = %path.display(), "overwriting existing output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcheck_algo::test_utils::{ScriptedSession, ScriptedSolve};
    use gridcheck_algo::{
        run_study, BusScope, ContingencyDefinition, ContingencySet, Dataset, StudySettings,
    };
    use gridcheck_core::{BranchKey, ElementStatus};
    use tempfile::tempdir;

    fn report() -> StudyReport {
        let mut session = ScriptedSession::new()
            .with_bus(1, 400.0, 1.0)
            .with_bus(2, 400.0, 1.0)
            .with_circuit(BranchKey::new(1, 2, "1"), 500.0, 120.0)
            .then_solve(ScriptedSolve::converged())
            .then_solve(ScriptedSolve::converged().voltage(2, 0.99))
            .then_solve(ScriptedSolve::converged().voltage(2, 1.01));
        let set = ContingencySet::new(vec![ContingencyDefinition::new("Outage-A")
            .with_circuit(BranchKey::new(1, 2, "1"), ElementStatus::OutOfService)])
        .unwrap();
        run_study(
            &mut session,
            Path::new("winter.json"),
            &set,
            &BusScope::default(),
            &StudySettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn writes_every_dataset_and_overwrites() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("results");
        let report = report();

        let written = write_report(&report, &out).unwrap();
        assert_eq!(written.len(), Dataset::ALL.len() + 3);
        for path in &written {
            assert!(path.exists(), "{} missing", path.display());
        }

        let summary = fs::read_to_string(out.join(SUMMARY_FILE)).unwrap();
        let mut lines = summary.lines();
        assert_eq!(
            lines.next().unwrap(),
            "contingency,message,convergent,step_change,steady_voltage,circuit_loading,tx2_loading,tx3_winding_loading"
        );
        assert!(lines.next().unwrap().starts_with("BASE_CASE,"));
        assert!(lines.next().unwrap().starts_with("Outage-A,Convergent"));

        let diagnostics = fs::read_to_string(out.join(DIAGNOSTICS_FILE)).unwrap();
        assert_eq!(diagnostics.trim(), "severity,category,entity,message");

        let voltages = fs::read_to_string(out.join("steady_voltage.csv")).unwrap();
        assert!(voltages.contains("1.010000"));

        fs::write(out.join(SUMMARY_FILE), "stale").unwrap();
        write_report(&report, &out).unwrap();
        let summary = fs::read_to_string(out.join(SUMMARY_FILE)).unwrap();
        assert!(summary.starts_with("contingency,"));
    }
}
