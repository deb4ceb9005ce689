//! Contingency input.
//!
//! Two layouts are accepted:
//!
//! - a directory holding any of the per-element CSV files below, one row per
//!   switched element, keyed by a `contingency` column
//! - a single YAML or JSON document, either a list of contingencies or a map
//!   with a `contingencies` list
//!
//! | File | Columns |
//! |------|---------|
//! | `circuits.csv` | `contingency,from,to,id,status` |
//! | `transformers_2w.csv` | `contingency,from,to,id,status` |
//! | `transformers_3w.csv` | `contingency,wind1,wind2,wind3,id,status` |
//! | `busbars.csv` | `contingency,bus,state` |
//! | `fixed_shunts.csv` | `contingency,bus,id,status` |
//! | `switched_shunts.csv` | `contingency,bus,id,status` |
//!
//! Extra columns such as `comment` are ignored. Status is `0`/`1` or
//! `in_service`/`out_of_service`; busbar state is a bus type code `1`-`4` or
//! its name. Contingencies come out sorted by name.

use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, Trim};
use gridcheck_algo::contingency::{BusbarSwitch, Switch};
use gridcheck_algo::{ContingencyDefinition, ContingencySet};
use gridcheck_core::{BranchKey, BusNumber, BusType, ElementStatus, ShuntKey, Tx3Key};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const CIRCUITS_FILE: &str = "circuits.csv";
pub const TRANSFORMERS_2W_FILE: &str = "transformers_2w.csv";
pub const TRANSFORMERS_3W_FILE: &str = "transformers_3w.csv";
pub const BUSBARS_FILE: &str = "busbars.csv";
pub const FIXED_SHUNTS_FILE: &str = "fixed_shunts.csv";
pub const SWITCHED_SHUNTS_FILE: &str = "switched_shunts.csv";

#[derive(Debug, Deserialize)]
struct BranchRow {
    contingency: String,
    from: u32,
    to: u32,
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Tx3Row {
    contingency: String,
    wind1: u32,
    wind2: u32,
    wind3: u32,
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct BusbarRow {
    contingency: String,
    bus: u32,
    state: String,
}

#[derive(Debug, Deserialize)]
struct ShuntRow {
    contingency: String,
    bus: u32,
    id: String,
    status: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Wrapped {
        contingencies: Vec<ContingencyDefinition>,
    },
    List(Vec<ContingencyDefinition>),
}

/// Load contingencies from a CSV directory or a YAML/JSON file.
pub fn load_contingencies(path: &Path) -> Result<ContingencySet> {
    let mut contingencies = if path.is_dir() {
        from_csv_dir(path)?
    } else {
        from_document(path)?
    };
    contingencies.sort_by(|a, b| a.name.cmp(&b.name));
    let set = ContingencySet::new(contingencies)
        .with_context(|| format!("validating contingencies from '{}'", path.display()))?;
    info!(path = %path.display(), count = set.len(), "contingencies loaded");
    Ok(set)
}

fn from_document(path: &Path) -> Result<Vec<ContingencyDefinition>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading contingency file '{}'", path.display()))?;
    let document: Document = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&data).context("parsing contingency json")?
        }
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            serde_yaml::from_str(&data).context("parsing contingency yaml")?
        }
        _ => serde_yaml::from_str(&data)
            .or_else(|_| serde_json::from_str(&data))
            .context("parsing contingency file")?,
    };
    Ok(match document {
        Document::Wrapped { contingencies } | Document::List(contingencies) => contingencies,
    })
}

fn from_csv_dir(dir: &Path) -> Result<Vec<ContingencyDefinition>> {
    let mut by_name: BTreeMap<String, ContingencyDefinition> = BTreeMap::new();
    let mut files = 0;

    if let Some(rows) = read_rows::<BranchRow>(&dir.join(CIRCUITS_FILE))? {
        files += 1;
        for row in rows {
            let status = parse_status(&row.status)?;
            entry(&mut by_name, &row.contingency)
                .circuits
                .push(Switch::new(BranchKey::new(row.from, row.to, &row.id), status));
        }
    }
    if let Some(rows) = read_rows::<BranchRow>(&dir.join(TRANSFORMERS_2W_FILE))? {
        files += 1;
        for row in rows {
            let status = parse_status(&row.status)?;
            entry(&mut by_name, &row.contingency)
                .two_winding
                .push(Switch::new(BranchKey::new(row.from, row.to, &row.id), status));
        }
    }
    if let Some(rows) = read_rows::<Tx3Row>(&dir.join(TRANSFORMERS_3W_FILE))? {
        files += 1;
        for row in rows {
            let status = parse_status(&row.status)?;
            let key = Tx3Key::new(row.wind1, row.wind2, row.wind3, &row.id);
            entry(&mut by_name, &row.contingency).three_winding.push(Switch::new(key, status));
        }
    }
    if let Some(rows) = read_rows::<BusbarRow>(&dir.join(BUSBARS_FILE))? {
        files += 1;
        for row in rows {
            let state = parse_bus_type(&row.state)?;
            entry(&mut by_name, &row.contingency).busbars.push(BusbarSwitch {
                bus: BusNumber::new(row.bus),
                state,
            });
        }
    }
    if let Some(rows) = read_rows::<ShuntRow>(&dir.join(FIXED_SHUNTS_FILE))? {
        files += 1;
        for row in rows {
            let status = parse_status(&row.status)?;
            entry(&mut by_name, &row.contingency)
                .fixed_shunts
                .push(Switch::new(ShuntKey::new(row.bus, &row.id), status));
        }
    }
    if let Some(rows) = read_rows::<ShuntRow>(&dir.join(SWITCHED_SHUNTS_FILE))? {
        files += 1;
        for row in rows {
            let status = parse_status(&row.status)?;
            entry(&mut by_name, &row.contingency)
                .switched_shunts
                .push(Switch::new(ShuntKey::new(row.bus, &row.id), status));
        }
    }

    if files == 0 {
        bail!("no contingency CSV files found in '{}'", dir.display());
    }
    Ok(by_name.into_values().collect())
}

fn entry<'a>(
    by_name: &'a mut BTreeMap<String, ContingencyDefinition>,
    name: &str,
) -> &'a mut ContingencyDefinition {
    let name = name.trim();
    by_name
        .entry(name.to_string())
        .or_insert_with(|| ContingencyDefinition::new(name))
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening '{}'", path.display()))?;
    let mut rows = Vec::new();
    for (line, record) in reader.deserialize().enumerate() {
        let row: T = record.with_context(|| {
            format!("parsing '{}' record {}", path.display(), line + 1)
        })?;
        rows.push(row);
    }
    debug!(path = %path.display(), rows = rows.len(), "read contingency rows");
    Ok(Some(rows))
}

/// `0`/`1` (also `0.0`/`1.0`) or a status name.
pub fn parse_status(raw: &str) -> Result<ElementStatus> {
    let raw = raw.trim();
    if let Ok(code) = raw.parse::<f64>() {
        return ElementStatus::from_code(code as i32)
            .filter(|_| code.fract() == 0.0)
            .ok_or_else(|| anyhow!("invalid status code '{raw}'"));
    }
    match raw.to_ascii_lowercase().as_str() {
        "in_service" | "in" | "on" | "closed" => Ok(ElementStatus::InService),
        "out_of_service" | "out" | "off" | "open" => Ok(ElementStatus::OutOfService),
        _ => Err(anyhow!("invalid status '{raw}'")),
    }
}

/// Bus type code `1`-`4` or a type name.
pub fn parse_bus_type(raw: &str) -> Result<BusType> {
    let raw = raw.trim();
    if let Ok(code) = raw.parse::<f64>() {
        return BusType::from_code(code as i32)
            .filter(|_| code.fract() == 0.0)
            .ok_or_else(|| anyhow!("invalid bus type code '{raw}'"));
    }
    match raw.to_ascii_lowercase().as_str() {
        "load" | "pq" => Ok(BusType::Load),
        "generator" | "pv" => Ok(BusType::Generator),
        "swing" | "slack" => Ok(BusType::Swing),
        "isolated" | "disconnected" => Ok(BusType::Isolated),
        _ => Err(anyhow!("invalid bus type '{raw}'")),
    }
}
