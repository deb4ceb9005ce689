//! Bus scope CSV: `bus,include,contingency`.
//!
//! `include` marks a bus as studied. A non-empty `contingency` leaves the bus
//! out of that contingency's compensation search. Both columns are optional.

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, Trim};
use gridcheck_algo::BusScope;
use gridcheck_core::BusNumber;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ScopeRow {
    bus: u32,
    #[serde(default)]
    include: Option<String>,
    #[serde(default)]
    contingency: Option<String>,
}

pub fn load_bus_scope(path: &Path) -> Result<BusScope> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening bus scope '{}'", path.display()))?;

    let mut scope = BusScope::default();
    for (line, record) in reader.deserialize().enumerate() {
        let row: ScopeRow = record
            .with_context(|| format!("parsing '{}' record {}", path.display(), line + 1))?;
        let bus = BusNumber::new(row.bus);
        let included = match row.include.as_deref() {
            Some(flag) => parse_flag(flag)
                .with_context(|| format!("bus {} in '{}'", row.bus, path.display()))?,
            None => true,
        };
        if included && !scope.included.contains(&bus) {
            scope.included.push(bus);
        }
        if let Some(name) = row.contingency.as_deref().map(str::trim) {
            if !name.is_empty() {
                scope.exclusions.entry(name.to_string()).or_default().insert(bus);
            }
        }
    }
    scope.included.sort();
    info!(
        path = %path.display(),
        included = scope.included.len(),
        exclusions = scope.exclusions.len(),
        "bus scope loaded"
    );
    Ok(scope)
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "x" => Ok(true),
        "" | "0" | "false" | "no" | "n" => Ok(false),
        other => Err(anyhow!("invalid include flag '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reads_inclusions_and_exclusions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scope.csv");
        fs::write(
            &path,
            "bus,include,contingency\n30,1,\n10,yes,Outage-A\n20,0,Outage-A\n20,0,Outage-B\n",
        )
        .unwrap();
        let scope = load_bus_scope(&path).unwrap();
        assert_eq!(scope.included, vec![BusNumber::new(10), BusNumber::new(30)]);
        assert_eq!(
            scope.exclusions["Outage-A"].iter().map(|b| b.value()).collect::<Vec<_>>(),
            vec![10, 20]
        );
        assert_eq!(scope.exclusions["Outage-B"].len(), 1);
    }

    #[test]
    fn bus_column_alone_includes_every_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scope.csv");
        fs::write(&path, "bus\n5\n4\n").unwrap();
        let scope = load_bus_scope(&path).unwrap();
        assert_eq!(scope.included.len(), 2);
        assert!(scope.exclusions.is_empty());
    }

    #[test]
    fn rejects_unknown_flags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scope.csv");
        fs::write(&path, "bus,include\n5,maybe\n").unwrap();
        let err = load_bus_scope(&path).unwrap_err();
        assert!(format!("{err:#}").contains("invalid include flag"));
    }
}
