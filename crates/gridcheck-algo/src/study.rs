//! Study orchestration for one network case.
//!
//! [`run_study`] drives the whole case protocol against a session:
//!
//! 1. load the case and restrict reads to the bus scope within the banded
//!    nominal-voltage range
//! 2. solve the base case (taps free, warm start); islands or divergence here
//!    mean the case itself is unusable
//! 3. capture the base-case column of every table, check every bus has a
//!    voltage band, then reload so no contingency sees the solved base state
//! 4. run the contingencies in input order, reloading after each
//! 5. aggregate compliance per dataset, with `BASE_CASE` compliant throughout
//!
//! A fatal error part way through step 4 is returned as
//! [`StudyError::CaseAborted`] carrying everything recorded so far.

use crate::compliance::{check_loading, check_steady_voltage, check_step, ComplianceThresholds};
use crate::contingency::{CompensationSettings, ContingencyExecutor, ContingencyKind, ContingencySet};
use crate::contingency::{ContingencyResult, ConvergenceMessage};
use crate::error::StudyError;
use crate::report::{StudyReport, SummaryRow};
use crate::session::{BusFilter, PowerFlowSession, SolveOptions};
use crate::snapshot::{SnapshotStore, BASE_CASE};
use gridcheck_core::{BusNumber, Diagnostics, GridResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{error, info, warn};

/// Buses studied and per-contingency bus exclusions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusScope {
    /// Empty means every bus inside the banded voltage range.
    pub included: Vec<BusNumber>,
    /// Buses left out of the compensation search, per contingency name.
    pub exclusions: HashMap<String, BTreeSet<BusNumber>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudySettings {
    #[serde(default)]
    pub thresholds: ComplianceThresholds,
    #[serde(default)]
    pub compensation: CompensationSettings,
    /// Run the reactive compensation search after each steady-state solve.
    #[serde(default)]
    pub adjust_reactive: bool,
}

impl StudySettings {
    pub fn validate(&self) -> GridResult<()> {
        self.thresholds.validate()?;
        if self.adjust_reactive {
            self.compensation.validate()?;
        }
        Ok(())
    }
}

/// Run every contingency of `contingencies` against the case at `case`.
pub fn run_study<S: PowerFlowSession + ?Sized>(
    session: &mut S,
    case: &Path,
    contingencies: &ContingencySet,
    scope: &BusScope,
    settings: &StudySettings,
) -> Result<StudyReport, StudyError> {
    settings.validate()?;
    if contingencies.is_empty() {
        return Err(StudyError::Config("no contingencies defined".into()));
    }
    let case_name = case
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| case.display().to_string());
    let bands = &settings.thresholds.voltage_bands;
    let mut diagnostics = Diagnostics::new();

    let mut contingencies = contingencies.clone();
    for name in contingencies.apply_exclusions(&scope.exclusions) {
        diagnostics.add_warning_with_entity(
            "scope",
            "bus exclusions given for a contingency that is not defined",
            &name,
        );
    }

    info!(case = %case.display(), contingencies = contingencies.len(), "starting study");
    session.load_case(case)?;
    session.define_subsystem(BusFilter {
        buses: scope.included.clone(),
        kv_range: bands.kv_span(),
    })?;

    let base = session.solve(SolveOptions::STEADY_WARM)?;
    if base.has_islands() {
        return Err(StudyError::BaseCase(format!(
            "buses {:?} are isolated in the base case",
            base.isolated_buses
        )));
    }
    if !base.converged {
        return Err(StudyError::BaseCase("no convergence".into()));
    }

    let mut store = SnapshotStore::capture_base(&*session)?;
    bands.check_coverage(&store)?;
    // Every contingency starts from the case as loaded, not the solved base.
    session.reload_case()?;

    for definition in contingencies.iter() {
        for element in definition.unknown_elements(&store) {
            warn!(contingency = %definition.name, element = %element, "element not found in case");
            diagnostics.add_warning_with_entity(
                "input",
                &format!("{element} is not in the case and will fail to switch"),
                &definition.name,
            );
        }
    }

    let mut executor = ContingencyExecutor::new(bands);
    if settings.adjust_reactive {
        executor = executor.with_compensation(&settings.compensation);
    }

    let mut results: Vec<ContingencyResult> = Vec::with_capacity(contingencies.len());
    for definition in contingencies.iter() {
        match executor.execute(session, &mut store, definition, &mut diagnostics) {
            Ok(result) => results.push(result),
            Err(err) => {
                error!(
                    case = %case_name,
                    contingency = %definition.name,
                    error = %err,
                    "fatal error; abandoning the rest of the case"
                );
                diagnostics.add_error_with_entity("study", &err.to_string(), &definition.name);
                let partial = assemble(case_name, results, store, diagnostics, &settings.thresholds);
                return Err(StudyError::CaseAborted {
                    contingency: definition.name.clone(),
                    source: Box::new(err),
                    partial: Box::new(partial),
                });
            }
        }
    }

    let report = assemble(case_name, results, store, diagnostics, &settings.thresholds);
    info!(
        case = %report.case,
        contingencies = report.results.len(),
        compliant = report.summary.iter().filter(|row| row.all_compliant()).count() - 1,
        "study finished"
    );
    Ok(report)
}

fn assemble(
    case: String,
    results: Vec<ContingencyResult>,
    store: SnapshotStore,
    mut diagnostics: Diagnostics,
    thresholds: &ComplianceThresholds,
) -> StudyReport {
    let summary = summarise(&results, &store, thresholds, &mut diagnostics);
    StudyReport {
        case,
        results,
        summary,
        store,
        diagnostics,
        bands: thresholds.voltage_bands.clone(),
    }
}

/// Compliance summary: the `BASE_CASE` row followed by one row per result.
pub fn summarise(
    results: &[ContingencyResult],
    store: &SnapshotStore,
    thresholds: &ComplianceThresholds,
    diagnostics: &mut Diagnostics,
) -> Vec<SummaryRow> {
    let names: Vec<String> = results.iter().map(|r| r.name.clone()).collect();
    let of_kind = |kind: ContingencyKind| -> Vec<String> {
        results
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.name.clone())
            .collect()
    };

    let mut step: HashMap<String, bool> = check_step(
        store,
        &of_kind(ContingencyKind::CircuitSwitching),
        thresholds.step_circuit,
    )
    .into_iter()
    .collect();
    step.extend(check_step(
        store,
        &of_kind(ContingencyKind::VoltageControl),
        thresholds.step_voltage_control,
    ));
    let steady: HashMap<String, bool> =
        check_steady_voltage(store, &names, &thresholds.voltage_bands)
            .into_iter()
            .collect();
    let circuits: HashMap<String, bool> = check_loading(
        store.circuit_loading(),
        store.circuit_ratings(),
        &names,
        thresholds,
        "circuit",
        diagnostics,
    )
    .into_iter()
    .collect();
    let tx2: HashMap<String, bool> = check_loading(
        store.tx2_loading(),
        store.tx2_ratings(),
        &names,
        thresholds,
        "two-winding transformer",
        diagnostics,
    )
    .into_iter()
    .collect();
    let windings: HashMap<String, bool> = check_loading(
        store.winding_loading(),
        store.winding_ratings(),
        &names,
        thresholds,
        "three-winding transformer winding",
        diagnostics,
    )
    .into_iter()
    .collect();

    let verdict = |map: &HashMap<String, bool>, name: &str| map.get(name).copied().unwrap_or(false);
    std::iter::once(SummaryRow::base_case())
        .chain(results.iter().map(|result| SummaryRow {
            contingency: result.name.clone(),
            message: result.message,
            convergent: result.convergent(),
            step_change: verdict(&step, &result.name),
            steady_voltage: verdict(&steady, &result.name),
            circuit_loading: verdict(&circuits, &result.name),
            tx2_loading: verdict(&tx2, &result.name),
            winding_loading: verdict(&windings, &result.name),
        }))
        .collect()
}

impl SummaryRow {
    fn base_case() -> Self {
        Self {
            contingency: BASE_CASE.to_string(),
            message: ConvergenceMessage::Convergent,
            convergent: true,
            step_change: true,
            steady_voltage: true,
            circuit_loading: true,
            tx2_loading: true,
            winding_loading: true,
        }
    }
}
