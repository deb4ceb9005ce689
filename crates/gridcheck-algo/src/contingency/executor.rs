//! Single-contingency state machine.
//!
//! | State | Entered when |
//! |-------|--------------|
//! | `Defined` | execution starts |
//! | `Applied` | every switching action succeeded |
//! | `StepChangeSolved` | the taps-locked solve finished (converged or not) |
//! | `SteadyStateSolved` | the taps-free solve and its retries finished |
//! | `CompensationSearch` | the reactive search is running |
//! | `Recorded` | results are in the snapshot store |
//! | `Aborted` | a switching action failed; sentinels recorded, nothing solved |
//! | `Reset` | the case was reloaded (always, whatever happened before) |

use crate::compliance::VoltageBands;
use crate::contingency::compensation::{CompensationMode, CompensationOutcome, CompensationSearch, CompensationSettings};
use crate::contingency::definition::{ContingencyDefinition, ContingencyKind};
use crate::error::StudyError;
use crate::session::{PowerFlowSession, SolveOptions, SolveOutcome};
use crate::snapshot::SnapshotStore;
use gridcheck_core::Diagnostics;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Defined,
    Applied,
    StepChangeSolved,
    SteadyStateSolved,
    CompensationSearch,
    Recorded,
    Aborted,
    Reset,
}

/// Convergence classification of a contingency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConvergenceMessage {
    #[serde(rename = "Convergent")]
    Convergent,
    #[serde(rename = "Non-Convergent")]
    NonConvergent,
    #[serde(rename = "Non-Convergent Steady State")]
    NonConvergentSteadyState,
    #[serde(rename = "Non-Convergent Step Change")]
    NonConvergentStepChange,
}

impl ConvergenceMessage {
    pub fn classify(step_convergent: bool, steady_convergent: bool) -> Self {
        match (step_convergent, steady_convergent) {
            (true, true) => ConvergenceMessage::Convergent,
            (false, false) => ConvergenceMessage::NonConvergent,
            (true, false) => ConvergenceMessage::NonConvergentSteadyState,
            (false, true) => ConvergenceMessage::NonConvergentStepChange,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConvergenceMessage::Convergent => "Convergent",
            ConvergenceMessage::NonConvergent => "Non-Convergent",
            ConvergenceMessage::NonConvergentSteadyState => "Non-Convergent Steady State",
            ConvergenceMessage::NonConvergentStepChange => "Non-Convergent Step Change",
        }
    }
}

impl fmt::Display for ConvergenceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one contingency. Built once when execution finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContingencyResult {
    pub name: String,
    pub kind: ContingencyKind,
    pub setup_ok: bool,
    pub step_convergent: bool,
    pub steady_convergent: bool,
    pub message: ConvergenceMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationOutcome>,
}

impl ContingencyResult {
    fn new(
        definition: &ContingencyDefinition,
        setup_ok: bool,
        step_convergent: bool,
        steady_convergent: bool,
        compensation: Option<CompensationOutcome>,
    ) -> Self {
        Self {
            name: definition.name.clone(),
            kind: definition.kind(),
            setup_ok,
            step_convergent,
            steady_convergent,
            message: ConvergenceMessage::classify(step_convergent, steady_convergent),
            compensation,
        }
    }

    pub fn convergent(&self) -> bool {
        self.step_convergent && self.steady_convergent
    }
}

/// Runs contingencies one at a time against a session and records their
/// columns in a [`SnapshotStore`].
pub struct ContingencyExecutor<'a> {
    bands: &'a VoltageBands,
    compensation: Option<&'a CompensationSettings>,
}

impl<'a> ContingencyExecutor<'a> {
    pub fn new(bands: &'a VoltageBands) -> Self {
        Self {
            bands,
            compensation: None,
        }
    }

    /// Enable the reactive compensation search.
    pub fn with_compensation(mut self, settings: &'a CompensationSettings) -> Self {
        self.compensation = Some(settings);
        self
    }

    /// Apply, solve and record one contingency, then reload the case.
    ///
    /// The reload happens even when execution fails; the execution error
    /// takes precedence over a reload error.
    pub fn execute<S: PowerFlowSession + ?Sized>(
        &self,
        session: &mut S,
        store: &mut SnapshotStore,
        definition: &ContingencyDefinition,
        diagnostics: &mut Diagnostics,
    ) -> Result<ContingencyResult, StudyError> {
        info!(contingency = %definition.name, kind = %definition.kind(), "processing contingency");
        let mut state = ExecutionState::Defined;
        let outcome = self.run(session, store, definition, diagnostics, &mut state);
        let reset = session.reload_case();
        match (outcome, reset) {
            (Ok(result), Ok(())) => {
                transition(&definition.name, &mut state, ExecutionState::Reset);
                info!(
                    contingency = %definition.name,
                    message = %result.message,
                    "contingency finished"
                );
                Ok(result)
            }
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err.into()),
        }
    }

    fn run<S: PowerFlowSession + ?Sized>(
        &self,
        session: &mut S,
        store: &mut SnapshotStore,
        definition: &ContingencyDefinition,
        diagnostics: &mut Diagnostics,
        state: &mut ExecutionState,
    ) -> Result<ContingencyResult, StudyError> {
        let name = definition.name.as_str();

        let mut setup_ok = true;
        for (element, action) in definition.actions() {
            if !session.write_element_state(&element, &action) {
                warn!(contingency = name, element = %element, "switching failed");
                diagnostics.add_error_with_entity(
                    "switching",
                    &format!("{element} could not be switched"),
                    name,
                );
                setup_ok = false;
            }
        }
        store.capture_switching(session, name)?;

        if !setup_ok {
            warn!(contingency = name, "contingency not set up correctly; skipping solves");
            store.record_step_sentinel(name)?;
            store.record_steady_sentinel(name)?;
            transition(name, state, ExecutionState::Aborted);
            return Ok(ContingencyResult::new(definition, false, false, false, None));
        }
        transition(name, state, ExecutionState::Applied);

        let search = self
            .compensation
            .map(|settings| CompensationSearch::new(settings, self.bands));
        if let (Some(search), Some(settings)) = (&search, self.compensation) {
            if settings.mode == CompensationMode::ReactiveDispatch {
                search.seed_dispatch(session);
            }
        }

        let step = solve_resolving_islands(session, store, name, SolveOptions::STEP_CHANGE)?;
        if step.converged {
            store.record_step_voltages(session, name)?;
        } else {
            warn!(contingency = name, "step change did not converge");
            store.record_step_sentinel(name)?;
        }
        transition(name, state, ExecutionState::StepChangeSolved);

        let mut steady =
            solve_resolving_islands(session, store, name, SolveOptions::STEADY_WARM)?.converged;
        if !steady {
            debug!(contingency = name, "steady state diverged; retrying from flat start");
            let flat = solve_resolving_islands(session, store, name, SolveOptions::STEADY_FLAT)?;
            if flat.converged {
                steady =
                    solve_resolving_islands(session, store, name, SolveOptions::STEADY_WARM)?.converged;
            }
        }
        transition(name, state, ExecutionState::SteadyStateSolved);

        let compensation = match &search {
            Some(search) => {
                transition(name, state, ExecutionState::CompensationSearch);
                let outcome = search.run(session, definition, steady)?;
                steady = true;
                Some(outcome)
            }
            None => None,
        };

        if steady {
            store.record_steady_state(session, name)?;
        } else {
            warn!(contingency = name, "steady state did not converge");
            store.record_steady_sentinel(name)?;
        }
        transition(name, state, ExecutionState::Recorded);

        Ok(ContingencyResult::new(
            definition,
            true,
            step.converged,
            steady,
            compensation,
        ))
    }
}

fn transition(contingency: &str, state: &mut ExecutionState, next: ExecutionState) {
    debug!(contingency, from = ?*state, to = ?next, "state transition");
    *state = next;
}

/// Solve once; if the solver islands buses, mark them isolated in this
/// contingency's bus state column and solve again. Islands on the second
/// attempt are fatal.
fn solve_resolving_islands<S: PowerFlowSession + ?Sized>(
    session: &mut S,
    store: &mut SnapshotStore,
    contingency: &str,
    options: SolveOptions,
) -> Result<SolveOutcome, StudyError> {
    let outcome = session.solve(options)?;
    if !outcome.has_islands() {
        return Ok(outcome);
    }
    warn!(
        contingency,
        buses = ?outcome.isolated_buses,
        "solver isolated buses without a swing bus; re-solving"
    );
    store.mark_isolated(contingency, &outcome.isolated_buses)?;

    let retry = session.solve(options)?;
    if retry.has_islands() {
        return Err(StudyError::PersistentIsland {
            contingency: contingency.to_string(),
            buses: retry.isolated_buses,
        });
    }
    Ok(retry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::BASE_CASE;
    use crate::test_utils::{ScriptedSession, ScriptedSolve};
    use gridcheck_core::{BranchKey, BusNumber, BusType, ElementKey, ElementStatus, ShuntKey};

    fn network() -> ScriptedSession {
        ScriptedSession::new()
            .with_bus(1, 220.0, 1.0)
            .with_bus(2, 220.0, 1.0)
            .with_bus(3, 220.0, 1.0)
            .with_circuit(BranchKey::new(1, 2, "1"), 100.0, 40.0)
            .with_circuit(BranchKey::new(2, 3, "1"), 100.0, 40.0)
            .with_switched_shunt(ShuntKey::new(3, "1"))
    }

    fn outage_a() -> ContingencyDefinition {
        ContingencyDefinition::new("Outage-A")
            .with_circuit(BranchKey::new(1, 2, "1"), ElementStatus::OutOfService)
    }

    #[test]
    fn messages_cover_every_combination() {
        assert_eq!(ConvergenceMessage::classify(true, true).as_str(), "Convergent");
        assert_eq!(ConvergenceMessage::classify(false, false).as_str(), "Non-Convergent");
        assert_eq!(
            ConvergenceMessage::classify(true, false).as_str(),
            "Non-Convergent Steady State"
        );
        assert_eq!(
            ConvergenceMessage::classify(false, true).as_str(),
            "Non-Convergent Step Change"
        );
    }

    #[test]
    fn outage_a_converges_and_records_everything() {
        let mut session = network();
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        session.push_solve(ScriptedSolve::converged().voltage(2, 0.98));
        session.push_solve(ScriptedSolve::converged().voltage(2, 0.99));
        let bands = VoltageBands::default();
        let mut diagnostics = Diagnostics::new();

        let result = ContingencyExecutor::new(&bands)
            .execute(&mut session, &mut store, &outage_a(), &mut diagnostics)
            .unwrap();

        assert_eq!(result.message, ConvergenceMessage::Convergent);
        assert!(result.setup_ok && result.convergent());
        assert_eq!(result.kind, ContingencyKind::CircuitSwitching);
        let bus2 = BusNumber::new(2);
        assert_eq!(store.step_voltage().value("Outage-A", &bus2), Some(&0.98));
        assert_eq!(store.steady_voltage().value("Outage-A", &bus2), Some(&0.99));
        let outaged = BranchKey::new(1, 2, "1");
        assert_eq!(store.circuit_status().value("Outage-A", &outaged), Some(&0));
        assert_eq!(store.circuit_loading().value("Outage-A", &outaged), Some(&0.0));
        assert_eq!(session.reloads, 1);
        assert_eq!(
            session.solves,
            vec![SolveOptions::STEP_CHANGE, SolveOptions::STEADY_WARM]
        );
    }

    #[test]
    fn outage_b_steady_failure_records_sentinels() {
        let mut session = network()
            .then_solve(ScriptedSolve::converged())
            .then_solve(ScriptedSolve::diverged())
            .then_solve(ScriptedSolve::diverged());
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        let bands = VoltageBands::default();
        let def = ContingencyDefinition::new("Outage-B")
            .with_circuit(BranchKey::new(2, 3, "1"), ElementStatus::OutOfService);

        let result = ContingencyExecutor::new(&bands)
            .execute(&mut session, &mut store, &def, &mut Diagnostics::new())
            .unwrap();

        assert_eq!(result.message, ConvergenceMessage::NonConvergentSteadyState);
        assert!(store
            .steady_voltage()
            .column("Outage-B")
            .unwrap()
            .iter()
            .all(Option::is_none));
        assert!(store
            .circuit_loading()
            .column("Outage-B")
            .unwrap()
            .iter()
            .all(Option::is_none));
        assert!(store.step_voltage().column("Outage-B").unwrap()[0].is_some());
        // warm, flat; the second warm solve only follows a converged flat start
        assert_eq!(
            session.solves,
            vec![
                SolveOptions::STEP_CHANGE,
                SolveOptions::STEADY_WARM,
                SolveOptions::STEADY_FLAT
            ]
        );
    }

    #[test]
    fn flat_start_recovery_runs_a_final_warm_solve() {
        let mut session = network()
            .then_solve(ScriptedSolve::converged())
            .then_solve(ScriptedSolve::diverged())
            .then_solve(ScriptedSolve::converged())
            .then_solve(ScriptedSolve::converged());
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        let bands = VoltageBands::default();

        let result = ContingencyExecutor::new(&bands)
            .execute(&mut session, &mut store, &outage_a(), &mut Diagnostics::new())
            .unwrap();

        assert_eq!(result.message, ConvergenceMessage::Convergent);
        assert_eq!(session.solves.len(), 4);
    }

    #[test]
    fn step_failure_with_steady_success_is_reported() {
        let mut session = network()
            .then_solve(ScriptedSolve::diverged())
            .then_solve(ScriptedSolve::converged());
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        let bands = VoltageBands::default();

        let result = ContingencyExecutor::new(&bands)
            .execute(&mut session, &mut store, &outage_a(), &mut Diagnostics::new())
            .unwrap();

        assert_eq!(result.message, ConvergenceMessage::NonConvergentStepChange);
        assert!(store.step_voltage().column("Outage-A").unwrap()[0].is_none());
        assert!(store.steady_voltage().column("Outage-A").unwrap()[0].is_some());
    }

    #[test]
    fn switch_failure_aborts_without_solving() {
        let missing = BranchKey::new(8, 9, "1");
        let mut session = network();
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        let bands = VoltageBands::default();
        let def = outage_a().with_circuit(missing, ElementStatus::OutOfService);
        let mut diagnostics = Diagnostics::new();

        let result = ContingencyExecutor::new(&bands)
            .execute(&mut session, &mut store, &def, &mut diagnostics)
            .unwrap();

        assert!(!result.setup_ok);
        assert_eq!(result.message, ConvergenceMessage::NonConvergent);
        assert!(session.solves.is_empty());
        assert_eq!(session.reloads, 1);
        // every action was attempted; the first one took effect before reload
        assert_eq!(session.writes.len(), 2);
        assert_eq!(
            store.circuit_status().value("Outage-A", &BranchKey::new(1, 2, "1")),
            Some(&0)
        );
        assert!(store.step_voltage().column("Outage-A").unwrap().iter().all(Option::is_none));
        assert!(store.steady_voltage().column("Outage-A").unwrap().iter().all(Option::is_none));
        assert_eq!(diagnostics.error_count(), 1);
    }

    #[test]
    fn islands_are_marked_and_resolved_once() {
        let mut session = network()
            .then_solve(ScriptedSolve::islanded(&[3]))
            .then_solve(ScriptedSolve::converged())
            .then_solve(ScriptedSolve::converged());
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        let bands = VoltageBands::default();

        let result = ContingencyExecutor::new(&bands)
            .execute(&mut session, &mut store, &outage_a(), &mut Diagnostics::new())
            .unwrap();

        assert!(result.convergent());
        assert!(store.is_isolated("Outage-A", &BusNumber::new(3)));
        assert!(!store.is_isolated(BASE_CASE, &BusNumber::new(3)));
        assert_eq!(
            store.bus_state().value("Outage-A", &BusNumber::new(3)),
            Some(&BusType::Isolated.code())
        );
    }

    #[test]
    fn persistent_islands_are_fatal_and_still_reset() {
        let mut session = network()
            .then_solve(ScriptedSolve::islanded(&[3]))
            .then_solve(ScriptedSolve::islanded(&[3]));
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        let bands = VoltageBands::default();

        let err = ContingencyExecutor::new(&bands)
            .execute(&mut session, &mut store, &outage_a(), &mut Diagnostics::new())
            .unwrap_err();

        assert!(matches!(err, StudyError::PersistentIsland { .. }));
        assert_eq!(session.reloads, 1);
    }

    #[test]
    fn retrieval_failure_is_fatal() {
        let mut session = network();
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        session.fail_retrieval = true;
        let bands = VoltageBands::default();

        let err = ContingencyExecutor::new(&bands)
            .execute(&mut session, &mut store, &outage_a(), &mut Diagnostics::new())
            .unwrap_err();
        assert!(matches!(err, StudyError::DataRetrieval(_)));
    }

    #[test]
    fn search_marks_steady_convergent_and_reseeds_dispatch() {
        let machine = gridcheck_core::MachineKey::new(2, "SH");
        let mut session = network()
            .with_machine(machine.clone(), 25.0)
            .then_solve(ScriptedSolve::converged())
            .then_solve(ScriptedSolve::diverged())
            .then_solve(ScriptedSolve::diverged())
            .then_solve(ScriptedSolve::converged());
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        let bands = VoltageBands::default();
        let settings = CompensationSettings {
            machines: vec![machine.clone()],
            mode: CompensationMode::ReactiveDispatch,
            ..CompensationSettings::default()
        };

        let result = ContingencyExecutor::new(&bands)
            .with_compensation(&settings)
            .execute(&mut session, &mut store, &outage_a(), &mut Diagnostics::new())
            .unwrap();

        assert!(result.steady_convergent);
        let outcome = result.compensation.unwrap();
        assert!(outcome.restored);
        assert_eq!(outcome.iterations, 1);
        // seeded to q_start before the step solve, then one -5 Mvar step
        assert!(matches!(
            session.writes[1],
            (ElementKey::Machine(_), crate::session::ElementAction::ReactiveOutput(q)) if q.value() == 0.0
        ));
        assert_eq!(store.machine_output().value("Outage-A", &machine), Some(&-5.0));
    }

    #[test]
    fn voltage_control_contingency_is_classified() {
        let mut session = network()
            .then_solve(ScriptedSolve::converged().voltage(3, 1.04))
            .then_solve(ScriptedSolve::converged());
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        let bands = VoltageBands::default();
        let def = ContingencyDefinition::new("Shunt-C")
            .with_switched_shunt(ShuntKey::new(3, "1"), ElementStatus::OutOfService);

        let result = ContingencyExecutor::new(&bands)
            .execute(&mut session, &mut store, &def, &mut Diagnostics::new())
            .unwrap();
        assert_eq!(result.kind, ContingencyKind::VoltageControl);
        assert_eq!(result.message, ConvergenceMessage::Convergent);
        assert_eq!(
            store.switched_shunt_status().value("Shunt-C", &ShuntKey::new(3, "1")),
            Some(&0)
        );
    }
}
