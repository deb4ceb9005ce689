//! Study results and their tabular views.
//!
//! A [`StudyReport`] owns the snapshot store of a finished (or aborted) case.
//! [`StudyReport::tables`] flattens every dataset into an [`ExportTable`]:
//! element key columns, then `BASE_CASE`, then one column per contingency in
//! processing order. Sentinel cells render as empty strings.

use crate::compliance::VoltageBands;
use crate::contingency::{ContingencyResult, ConvergenceMessage};
use crate::snapshot::{Dataset, SnapshotStore, SnapshotTable};
use gridcheck_core::{
    BranchKey, BusNumber, Diagnostics, MachineKey, ShuntKey, Tx3Key, WindingKey,
};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;

/// One summary row per contingency, `BASE_CASE` first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub contingency: String,
    pub message: ConvergenceMessage,
    pub convergent: bool,
    pub step_change: bool,
    pub steady_voltage: bool,
    pub circuit_loading: bool,
    pub tx2_loading: bool,
    pub winding_loading: bool,
}

impl SummaryRow {
    pub const HEADERS: [&'static str; 8] = [
        "contingency",
        "message",
        "convergent",
        "step_change",
        "steady_voltage",
        "circuit_loading",
        "tx2_loading",
        "tx3_winding_loading",
    ];

    pub fn all_compliant(&self) -> bool {
        self.convergent
            && self.step_change
            && self.steady_voltage
            && self.circuit_loading
            && self.tx2_loading
            && self.winding_loading
    }

    pub fn cells(&self) -> Vec<String> {
        vec![
            self.contingency.clone(),
            self.message.to_string(),
            self.convergent.to_string(),
            self.step_change.to_string(),
            self.steady_voltage.to_string(),
            self.circuit_loading.to_string(),
            self.tx2_loading.to_string(),
            self.winding_loading.to_string(),
        ]
    }
}

#[derive(Debug)]
pub struct StudyReport {
    /// Case file stem.
    pub case: String,
    pub results: Vec<ContingencyResult>,
    pub summary: Vec<SummaryRow>,
    pub store: SnapshotStore,
    pub diagnostics: Diagnostics,
    pub bands: VoltageBands,
}

/// A dataset flattened to strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportTable {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl StudyReport {
    pub fn summary_row(&self, contingency: &str) -> Option<&SummaryRow> {
        self.summary.iter().find(|row| row.contingency == contingency)
    }

    /// Whether every contingency passed every check.
    pub fn all_compliant(&self) -> bool {
        self.summary.iter().all(SummaryRow::all_compliant)
    }

    pub fn summary_table(&self) -> ExportTable {
        ExportTable {
            name: "summary".to_string(),
            headers: SummaryRow::HEADERS.iter().map(|h| h.to_string()).collect(),
            rows: self.summary.iter().map(SummaryRow::cells).collect(),
        }
    }

    /// Every dataset, in [`Dataset::ALL`] order.
    pub fn tables(&self) -> Vec<ExportTable> {
        Dataset::ALL.iter().map(|dataset| self.table(*dataset)).collect()
    }

    pub fn table(&self, dataset: Dataset) -> ExportTable {
        let store = &self.store;
        match dataset {
            Dataset::BusState => self.bus_table(dataset, store.bus_state(), false),
            Dataset::SteadyVoltage => self.bus_table(dataset, store.steady_voltage(), true),
            Dataset::StepVoltage => self.bus_table(dataset, store.step_voltage(), false),
            Dataset::CircuitStatus => render(dataset, store.circuit_status(), None),
            Dataset::CircuitLoading => {
                render(dataset, store.circuit_loading(), Some(store.circuit_ratings()))
            }
            Dataset::Tx2Status => render(dataset, store.tx2_status(), None),
            Dataset::Tx2Loading => render(dataset, store.tx2_loading(), Some(store.tx2_ratings())),
            Dataset::Tx3Status => render(dataset, store.tx3_status(), None),
            Dataset::WindingStatus => render(dataset, store.winding_status(), None),
            Dataset::WindingLoading => {
                render(dataset, store.winding_loading(), Some(store.winding_ratings()))
            }
            Dataset::FixedShuntStatus => render(dataset, store.fixed_shunt_status(), None),
            Dataset::SwitchedShuntStatus => render(dataset, store.switched_shunt_status(), None),
            Dataset::MachineOutput => render(dataset, store.machine_output(), None),
        }
    }

    /// Bus tables carry name and nominal voltage; the steady-state table also
    /// carries the band limits.
    fn bus_table<V: Cell + Clone>(
        &self,
        dataset: Dataset,
        table: &SnapshotTable<BusNumber, V>,
        with_limits: bool,
    ) -> ExportTable {
        let info: HashMap<BusNumber, _> = self
            .store
            .buses()
            .iter()
            .map(|bus| (bus.number, bus))
            .collect();
        let mut headers = vec!["bus".to_string(), "name".to_string(), "base_kv".to_string()];
        if with_limits {
            headers.push("lower_limit".to_string());
            headers.push("upper_limit".to_string());
        }
        headers.extend(table.column_names().into_iter().map(str::to_string));

        let columns = columns(table);
        let rows = table
            .keys()
            .iter()
            .enumerate()
            .map(|(row, bus)| {
                let mut cells = vec![bus.to_string()];
                match info.get(bus) {
                    Some(bus) => {
                        cells.push(bus.name.clone());
                        cells.push(format!("{}", bus.base_kv.value()));
                    }
                    None => cells.extend([String::new(), String::new()]),
                }
                if with_limits {
                    let band = info.get(bus).and_then(|b| self.bands.band_for(b.base_kv));
                    match band {
                        Some(band) => {
                            cells.push(band.lower.value().render());
                            cells.push(band.upper.value().render());
                        }
                        None => cells.extend([String::new(), String::new()]),
                    }
                }
                cells.extend(columns.iter().map(|column| render_cell(&column[row])));
                cells
            })
            .collect();

        ExportTable {
            name: dataset.as_str().to_string(),
            headers,
            rows,
        }
    }

    /// JSON document with the summary, per-contingency results, diagnostics
    /// and every dataset.
    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct View<'a> {
            case: &'a str,
            summary: &'a [SummaryRow],
            results: &'a [ContingencyResult],
            diagnostics: &'a Diagnostics,
            voltage_bands: &'a VoltageBands,
            tables: Vec<ExportTable>,
        }
        serde_json::to_string_pretty(&View {
            case: &self.case,
            summary: &self.summary,
            results: &self.results,
            diagnostics: &self.diagnostics,
            voltage_bands: &self.bands,
            tables: self.tables(),
        })
    }
}

/// Key columns of an element table.
pub trait ExportKey {
    fn headers() -> Vec<&'static str>;
    fn cells(&self) -> Vec<String>;
}

impl ExportKey for BranchKey {
    fn headers() -> Vec<&'static str> {
        vec!["from_bus", "to_bus", "id"]
    }
    fn cells(&self) -> Vec<String> {
        vec![self.from.to_string(), self.to.to_string(), self.id.to_string()]
    }
}

impl ExportKey for Tx3Key {
    fn headers() -> Vec<&'static str> {
        vec!["wind1_bus", "wind2_bus", "wind3_bus", "id"]
    }
    fn cells(&self) -> Vec<String> {
        vec![
            self.wind1.to_string(),
            self.wind2.to_string(),
            self.wind3.to_string(),
            self.id.to_string(),
        ]
    }
}

impl ExportKey for WindingKey {
    fn headers() -> Vec<&'static str> {
        let mut headers = vec!["winding_bus"];
        headers.extend(Tx3Key::headers());
        headers
    }
    fn cells(&self) -> Vec<String> {
        let mut cells = vec![self.winding_bus.to_string()];
        cells.extend(self.transformer.cells());
        cells
    }
}

impl ExportKey for ShuntKey {
    fn headers() -> Vec<&'static str> {
        vec!["bus", "id"]
    }
    fn cells(&self) -> Vec<String> {
        vec![self.bus.to_string(), self.id.to_string()]
    }
}

impl ExportKey for MachineKey {
    fn headers() -> Vec<&'static str> {
        vec!["bus", "id"]
    }
    fn cells(&self) -> Vec<String> {
        vec![self.bus.to_string(), self.id.to_string()]
    }
}

pub trait Cell {
    fn render(&self) -> String;
}

impl Cell for f64 {
    fn render(&self) -> String {
        format!("{self:.6}")
    }
}

impl Cell for i32 {
    fn render(&self) -> String {
        self.to_string()
    }
}

fn render_cell<V: Cell>(value: &Option<V>) -> String {
    value.as_ref().map(Cell::render).unwrap_or_default()
}

fn columns<K, V>(table: &SnapshotTable<K, V>) -> Vec<&[Option<V>]>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    table
        .column_names()
        .into_iter()
        .filter_map(|name| table.column(name))
        .collect()
}

/// Element tables; loading tables get a `rating` column after the keys.
fn render<K, V>(
    dataset: Dataset,
    table: &SnapshotTable<K, V>,
    ratings: Option<&HashMap<K, gridcheck_core::model::Ratings>>,
) -> ExportTable
where
    K: ExportKey + Clone + Eq + Hash,
    V: Cell + Clone,
{
    let mut headers: Vec<String> = K::headers().into_iter().map(str::to_string).collect();
    if ratings.is_some() {
        headers.push("rate_a".to_string());
    }
    headers.extend(table.column_names().into_iter().map(str::to_string));

    let columns = columns(table);
    let rows = table
        .keys()
        .iter()
        .enumerate()
        .map(|(row, key)| {
            let mut cells = key.cells();
            if let Some(ratings) = ratings {
                cells.push(
                    ratings
                        .get(key)
                        .map(|r| r.rate_a.value().render())
                        .unwrap_or_default(),
                );
            }
            cells.extend(columns.iter().map(|column| render_cell(&column[row])));
            cells
        })
        .collect();

    ExportTable {
        name: dataset.as_str().to_string(),
        headers,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use crate::contingency::{ContingencyDefinition, ContingencySet};
    use crate::snapshot::{Dataset, BASE_CASE};
    use crate::study::{run_study, BusScope, StudySettings};
    use crate::test_utils::{ScriptedSession, ScriptedSolve};
    use gridcheck_core::{BranchKey, ElementStatus};
    use std::path::Path;

    fn report() -> super::StudyReport {
        let mut session = ScriptedSession::new()
            .with_bus(1, 220.0, 1.0)
            .with_bus(2, 220.0, 1.0)
            .with_circuit(BranchKey::new(1, 2, "1"), 100.0, 40.0)
            .with_circuit(BranchKey::new(1, 2, "2"), 0.0, 10.0)
            .then_solve(ScriptedSolve::converged())
            .then_solve(ScriptedSolve::converged().voltage(2, 0.97))
            .then_solve(ScriptedSolve::diverged())
            .then_solve(ScriptedSolve::diverged());
        let set = ContingencySet::new(vec![ContingencyDefinition::new("Outage-A")
            .with_circuit(BranchKey::new(1, 2, "1"), ElementStatus::OutOfService)])
        .unwrap();
        run_study(
            &mut session,
            Path::new("case.json"),
            &set,
            &BusScope::default(),
            &StudySettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn steady_voltage_table_has_band_limits_and_blank_sentinels() {
        let report = report();
        let table = report.table(Dataset::SteadyVoltage);
        assert_eq!(
            table.headers,
            vec!["bus", "name", "base_kv", "lower_limit", "upper_limit", BASE_CASE, "Outage-A"]
        );
        let row = &table.rows[1];
        assert_eq!(row[0], "2");
        assert_eq!(row[3], format!("{:.6}", 200.0 / 220.0));
        assert_eq!(row[5], "1.000000");
        assert_eq!(row[6], "");

        let step = report.table(Dataset::StepVoltage);
        assert_eq!(step.rows[1][4], "0.970000");
    }

    #[test]
    fn loading_table_lists_rating_and_unrated_elements_warn_once() {
        let report = report();
        let table = report.table(Dataset::CircuitLoading);
        assert_eq!(&table.headers[..4], &["from_bus", "to_bus", "id", "rate_a"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1][3], "0.000000");
        assert_eq!(report.diagnostics.warning_count(), 1);
    }

    #[test]
    fn summary_and_json_views() {
        let report = report();
        let summary = report.summary_table();
        assert_eq!(summary.rows.len(), 2);
        assert_eq!(summary.rows[1][1], "Non-Convergent Steady State");
        assert!(!report.all_compliant());
        assert!(report.summary_row(BASE_CASE).unwrap().all_compliant());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["case"], "case");
        assert_eq!(json["summary"][1]["message"], "Non-Convergent Steady State");
        assert_eq!(json["tables"].as_array().unwrap().len(), Dataset::ALL.len());
    }
}
