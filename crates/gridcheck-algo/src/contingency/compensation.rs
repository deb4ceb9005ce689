//! Reactive compensation search.
//!
//! After a contingency, the search walks the voltage target of a fixed set of
//! machines down from `v_max` in equal steps (and their reactive dispatch down
//! from `q_start` in fixed Mvar steps) until no in-scope bus sits above its
//! band, re-solving the steady state at every step.
//!
//! ```text
//! v_step = (v_max - v_min) / max_iterations
//!
//! while violating && v > v_min && q > q_floor && iter < max_iterations:
//!     v = history[target] - v_step   (v_max on first visit)
//!     q = q + q_step
//!     write v (or q) to every machine; solve warm, else flat then warm
//!     violating = not converged || some bus above its band
//! ```
//!
//! A failed solve counts as an iteration and keeps the case violating.

use crate::compliance::{VoltageBands, VOLTAGE_TOLERANCE};
use crate::contingency::definition::ContingencyDefinition;
use crate::error::StudyError;
use crate::session::{ElementAction, PowerFlowSession, SolveOptions, SolveOutcome};
use gridcheck_core::{BusNumber, BusType, ElementKey, GridError, GridResult, MachineKey, Megavars, PerUnit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// What the search writes to the target machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompensationMode {
    /// Voltage setpoint and regulated bus.
    #[default]
    VoltageTarget,
    /// Fixed reactive output.
    ReactiveDispatch,
}

fn default_max_iterations() -> usize {
    100
}
fn default_v_max() -> f64 {
    1.078947
}
fn default_v_min() -> f64 {
    0.948
}
fn default_q_step() -> f64 {
    -5.0
}
fn default_q_floor() -> f64 {
    -1000.0
}
fn default_machines() -> Vec<MachineKey> {
    vec![MachineKey::new(2204, "SH"), MachineKey::new(5464, "SH")]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_v_max")]
    pub v_max: f64,
    #[serde(default = "default_v_min")]
    pub v_min: f64,
    #[serde(default)]
    pub q_start: f64,
    #[serde(default = "default_q_step")]
    pub q_step: f64,
    #[serde(default = "default_q_floor")]
    pub q_floor: f64,
    #[serde(default)]
    pub mode: CompensationMode,
    /// Regulate the worst bus instead of each machine's own terminal.
    #[serde(default)]
    pub remote_targeting: bool,
    #[serde(default = "default_machines")]
    pub machines: Vec<MachineKey>,
}

impl Default for CompensationSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            v_max: default_v_max(),
            v_min: default_v_min(),
            q_start: 0.0,
            q_step: default_q_step(),
            q_floor: default_q_floor(),
            mode: CompensationMode::default(),
            remote_targeting: false,
            machines: default_machines(),
        }
    }
}

impl CompensationSettings {
    pub fn v_step(&self) -> f64 {
        (self.v_max - self.v_min) / self.max_iterations as f64
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.max_iterations == 0 {
            return Err(GridError::Config(
                "compensation max_iterations must be at least 1".into(),
            ));
        }
        if !(self.v_max > self.v_min) {
            return Err(GridError::Config(format!(
                "compensation v_max ({}) must exceed v_min ({})",
                self.v_max, self.v_min
            )));
        }
        if !(self.q_step < 0.0) {
            return Err(GridError::Config(format!(
                "compensation q_step must be negative, got {}",
                self.q_step
            )));
        }
        if !(self.q_floor < self.q_start) {
            return Err(GridError::Config(format!(
                "compensation q_floor ({}) must be below q_start ({})",
                self.q_floor, self.q_start
            )));
        }
        if self.machines.is_empty() {
            return Err(GridError::Config(
                "compensation search needs at least one target machine".into(),
            ));
        }
        Ok(())
    }
}

/// Result of one search, attached to the contingency result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensationOutcome {
    pub iterations: usize,
    /// No in-scope bus above its band when the search stopped.
    pub restored: bool,
    /// Last voltage target written. `None` in reactive-dispatch mode or when
    /// no iteration ran.
    pub voltage_target: Option<f64>,
    /// Reactive dispatch in effect when the search stopped (Mvar). `None` in
    /// voltage-target mode.
    pub reactive_dispatch: Option<f64>,
    /// Bus regulated in the last iteration (`0` = machine terminal).
    pub target_bus: BusNumber,
}

/// Worst over-voltage among the buses the search watches.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Violation {
    bus: BusNumber,
    excess: f64,
}

pub struct CompensationSearch<'a> {
    settings: &'a CompensationSettings,
    bands: &'a VoltageBands,
}

impl<'a> CompensationSearch<'a> {
    pub fn new(settings: &'a CompensationSettings, bands: &'a VoltageBands) -> Self {
        Self { settings, bands }
    }

    /// Write the starting dispatch to every target machine. Used before the
    /// step-change solve in reactive-dispatch mode.
    pub fn seed_dispatch<S: PowerFlowSession + ?Sized>(&self, session: &mut S) {
        let action = ElementAction::ReactiveOutput(Megavars(self.settings.q_start));
        for machine in &self.settings.machines {
            let element = ElementKey::Machine(machine.clone());
            if !session.write_element_state(&element, &action) {
                warn!(element = %element, "could not set starting reactive dispatch");
            }
        }
    }

    /// Run the search against the session's current state. `steady_converged`
    /// is the result of the steady-state solve that preceded it.
    pub fn run<S: PowerFlowSession + ?Sized>(
        &self,
        session: &mut S,
        contingency: &ContingencyDefinition,
        steady_converged: bool,
    ) -> Result<CompensationOutcome, StudyError> {
        let settings = self.settings;
        let v_step = settings.v_step();
        let mut history: HashMap<BusNumber, f64> = HashMap::new();

        let mut worst = if steady_converged {
            self.worst_violation(session, contingency)?
        } else {
            None
        };
        let mut violating = !steady_converged || worst.is_some();

        let mut target_v = settings.v_max;
        let mut target_q = settings.q_start;
        let mut target_bus = BusNumber::new(0);
        let mut last_written = None;
        let mut iterations = 0;

        while violating
            && target_v > settings.v_min
            && target_q > settings.q_floor
            && iterations < settings.max_iterations
        {
            target_bus = match (settings.remote_targeting, worst) {
                (true, Some(violation)) => violation.bus,
                _ => BusNumber::new(0),
            };
            target_v = match history.get(&target_bus) {
                Some(previous) => previous - v_step,
                None => settings.v_max,
            };
            history.insert(target_bus, target_v);
            target_q += settings.q_step;
            iterations += 1;
            last_written = Some(target_v);

            self.write_targets(session, target_v, target_q, target_bus);

            let converged = self.resolve(session, &contingency.name)?;
            if converged {
                worst = self.worst_violation(session, contingency)?;
                violating = worst.is_some();
            } else {
                violating = true;
            }
            debug!(
                contingency = %contingency.name,
                iteration = iterations,
                target_v,
                target_q,
                target_bus = %target_bus,
                converged,
                worst_bus = ?worst.map(|w| w.bus),
                worst_excess = ?worst.map(|w| w.excess),
                "compensation step"
            );
        }

        let (voltage_target, reactive_dispatch) = match settings.mode {
            CompensationMode::VoltageTarget => (last_written, None),
            CompensationMode::ReactiveDispatch => (None, Some(target_q)),
        };
        let outcome = CompensationOutcome {
            iterations,
            restored: !violating,
            voltage_target,
            reactive_dispatch,
            target_bus,
        };
        if outcome.restored {
            info!(
                contingency = %contingency.name,
                iterations,
                "compensation search restored voltage limits"
            );
        } else {
            warn!(
                contingency = %contingency.name,
                iterations,
                "compensation search exhausted without restoring voltage limits"
            );
        }
        Ok(outcome)
    }

    fn write_targets<S: PowerFlowSession + ?Sized>(
        &self,
        session: &mut S,
        target_v: f64,
        target_q: f64,
        target_bus: BusNumber,
    ) {
        let action = match self.settings.mode {
            CompensationMode::VoltageTarget => ElementAction::VoltageTarget {
                target: PerUnit(target_v),
                regulated_bus: target_bus,
            },
            CompensationMode::ReactiveDispatch => ElementAction::ReactiveOutput(Megavars(target_q)),
        };
        for machine in &self.settings.machines {
            let element = ElementKey::Machine(machine.clone());
            if !session.write_element_state(&element, &action) {
                warn!(element = %element, "compensation target could not be written");
            }
        }
    }

    /// Warm solve; on failure flat start and, if that converges, warm again.
    fn resolve<S: PowerFlowSession + ?Sized>(
        &self,
        session: &mut S,
        contingency: &str,
    ) -> Result<bool, StudyError> {
        let warm = checked_solve(session, contingency, SolveOptions::STEADY_WARM)?;
        if warm.converged {
            return Ok(true);
        }
        let flat = checked_solve(session, contingency, SolveOptions::STEADY_FLAT)?;
        if !flat.converged {
            return Ok(false);
        }
        Ok(checked_solve(session, contingency, SolveOptions::STEADY_WARM)?.converged)
    }

    fn worst_violation<S: PowerFlowSession + ?Sized>(
        &self,
        session: &S,
        contingency: &ContingencyDefinition,
    ) -> Result<Option<Violation>, StudyError> {
        let mut worst: Option<Violation> = None;
        for bus in session.read_buses()? {
            if bus.bus_type == BusType::Isolated || contingency.excluded_buses.contains(&bus.number) {
                continue;
            }
            let Some(band) = self.bands.band_for(bus.base_kv) else {
                continue;
            };
            let excess = band.excess(bus.voltage.value());
            if excess > VOLTAGE_TOLERANCE && worst.map_or(true, |w| excess > w.excess) {
                worst = Some(Violation {
                    bus: bus.number,
                    excess,
                });
            }
        }
        Ok(worst)
    }
}

/// Islands appearing during the search mean the network changed topology
/// under a setpoint change, which is not recoverable.
fn checked_solve<S: PowerFlowSession + ?Sized>(
    session: &mut S,
    contingency: &str,
    options: SolveOptions,
) -> Result<SolveOutcome, StudyError> {
    let outcome = session.solve(options)?;
    if outcome.has_islands() {
        return Err(StudyError::PersistentIsland {
            contingency: contingency.to_string(),
            buses: outcome.isolated_buses,
        });
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedSession, ScriptedSolve};

    fn settings() -> CompensationSettings {
        CompensationSettings {
            machines: vec![MachineKey::new(2, "SH")],
            ..CompensationSettings::default()
        }
    }

    fn session_with_high_voltage() -> ScriptedSession {
        ScriptedSession::new()
            .with_bus(1, 220.0, 1.0)
            .with_bus(2, 220.0, 1.12)
            .with_machine(MachineKey::new(2, "SH"), 0.0)
    }

    #[test]
    fn defaults_match_search_constants() {
        let s = CompensationSettings::default();
        assert_eq!(s.max_iterations, 100);
        assert!((s.v_step() - (1.078947 - 0.948) / 100.0).abs() < 1e-12);
        assert_eq!(s.machines.len(), 2);
        assert!(!s.remote_targeting);
        s.validate().unwrap();
    }

    #[test]
    fn no_violation_means_no_iterations() {
        let settings = settings();
        let bands = VoltageBands::default();
        let mut session = ScriptedSession::new().with_bus(1, 220.0, 1.0);
        let def = ContingencyDefinition::new("C");
        let outcome = CompensationSearch::new(&settings, &bands)
            .run(&mut session, &def, true)
            .unwrap();
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.restored);
        assert!(session.solves.is_empty());
    }

    #[test]
    fn stops_on_first_compliant_iteration() {
        let settings = settings();
        let bands = VoltageBands::default();
        let mut session = session_with_high_voltage()
            .then_solve(ScriptedSolve::converged().voltage(2, 1.11))
            .then_solve(ScriptedSolve::converged().voltage(2, 1.05));
        let def = ContingencyDefinition::new("C");
        let outcome = CompensationSearch::new(&settings, &bands)
            .run(&mut session, &def, true)
            .unwrap();
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.restored);
        let expected = settings.v_max - settings.v_step();
        assert!((outcome.voltage_target.unwrap() - expected).abs() < 1e-12);
        assert_eq!(outcome.reactive_dispatch, None);
        assert_eq!(outcome.target_bus, BusNumber::new(0));
        assert_eq!(session.network.last_setpoint(), Some((expected, BusNumber::new(0))));
    }

    #[test]
    fn bounded_by_max_iterations() {
        let settings = settings();
        let bands = VoltageBands::default();
        let mut session = session_with_high_voltage();
        let def = ContingencyDefinition::new("C");
        let outcome = CompensationSearch::new(&settings, &bands)
            .run(&mut session, &def, true)
            .unwrap();
        assert!(!outcome.restored);
        assert_eq!(outcome.iterations, 100);
        assert_eq!(session.solves.len(), 100);
        assert_eq!(session.network.setpoints.len(), 100);
    }

    #[test]
    fn voltage_target_stays_above_floor() {
        let settings = CompensationSettings {
            max_iterations: 4,
            v_max: 1.0,
            v_min: 0.96,
            ..settings()
        };
        let bands = VoltageBands::default();
        let mut session = session_with_high_voltage();
        let def = ContingencyDefinition::new("C");
        let outcome = CompensationSearch::new(&settings, &bands)
            .run(&mut session, &def, true)
            .unwrap();

        assert!(!outcome.restored);
        assert_eq!(outcome.iterations, 4);
        let written: Vec<f64> = session.network.setpoints.iter().map(|(_, v, _)| *v).collect();
        let expected = [1.0, 0.99, 0.98, 0.97];
        assert_eq!(written.len(), expected.len());
        for (got, want) in written.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{got} vs {want}");
        }
        // the next step would land on v_min, which is never written
        let last = outcome.voltage_target.unwrap();
        assert!(last > settings.v_min);
        assert!(last - settings.v_step() <= settings.v_min + 1e-9);
    }

    #[test]
    fn stops_at_reactive_floor() {
        let settings = CompensationSettings {
            mode: CompensationMode::ReactiveDispatch,
            q_floor: -12.0,
            ..settings()
        };
        let bands = VoltageBands::default();
        let mut session = session_with_high_voltage();
        let def = ContingencyDefinition::new("C");
        let outcome = CompensationSearch::new(&settings, &bands)
            .run(&mut session, &def, true)
            .unwrap();

        assert!(!outcome.restored);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.reactive_dispatch, Some(-15.0));
        assert_eq!(outcome.voltage_target, None);
        assert_eq!(session.network.machines[0].q, Megavars(-15.0));
    }

    #[test]
    fn remote_targets_keep_their_own_history() {
        let settings = CompensationSettings {
            remote_targeting: true,
            ..settings()
        };
        let bands = VoltageBands::default();
        let mut session = session_with_high_voltage()
            .with_bus(3, 220.0, 1.10)
            // bus 2 fixed, bus 3 now worst
            .then_solve(ScriptedSolve::converged().voltage(2, 1.0).voltage(3, 1.12))
            // bus 3 fixed, bus 2 back over
            .then_solve(ScriptedSolve::converged().voltage(3, 1.0).voltage(2, 1.11))
            .then_solve(ScriptedSolve::converged().voltage(2, 1.0));
        let def = ContingencyDefinition::new("C");
        let outcome = CompensationSearch::new(&settings, &bands)
            .run(&mut session, &def, true)
            .unwrap();

        assert!(outcome.restored);
        assert_eq!(outcome.iterations, 3);
        let step = settings.v_step();
        let written: Vec<(f64, u32)> = session
            .network
            .setpoints
            .iter()
            .map(|(_, v, bus)| (*v, bus.value()))
            .collect();
        assert_eq!(written.len(), 3);
        assert_eq!(written[0], (settings.v_max, 2));
        assert_eq!(written[1], (settings.v_max, 3));
        assert_eq!(written[2].1, 2);
        assert!((written[2].0 - (settings.v_max - step)).abs() < 1e-12);
        assert_eq!(outcome.target_bus, BusNumber::new(2));
    }

    #[test]
    fn excluded_and_isolated_buses_are_ignored() {
        let settings = settings();
        let bands = VoltageBands::default();
        let mut session = session_with_high_voltage().with_typed_bus(3, 220.0, 1.5, BusType::Isolated);
        let def = ContingencyDefinition::new("C").excluding(2);
        let outcome = CompensationSearch::new(&settings, &bands)
            .run(&mut session, &def, true)
            .unwrap();
        assert_eq!(outcome.iterations, 0);
    }

    #[test]
    fn failed_solves_count_and_retry_flat_then_warm() {
        let settings = settings();
        let bands = VoltageBands::default();
        let mut session = session_with_high_voltage()
            .then_solve(ScriptedSolve::diverged())
            .then_solve(ScriptedSolve::converged())
            .then_solve(ScriptedSolve::converged().voltage(2, 1.0));
        let def = ContingencyDefinition::new("C");
        let outcome = CompensationSearch::new(&settings, &bands)
            .run(&mut session, &def, false)
            .unwrap();
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.restored);
        assert_eq!(
            session.solves,
            vec![
                SolveOptions::STEADY_WARM,
                SolveOptions::STEADY_FLAT,
                SolveOptions::STEADY_WARM
            ]
        );
    }

    #[test]
    fn remote_targeting_regulates_worst_bus() {
        let settings = CompensationSettings {
            remote_targeting: true,
            mode: CompensationMode::VoltageTarget,
            ..settings()
        };
        let bands = VoltageBands::default();
        let mut session = session_with_high_voltage()
            .then_solve(ScriptedSolve::converged().voltage(2, 1.0));
        let def = ContingencyDefinition::new("C");
        let outcome = CompensationSearch::new(&settings, &bands)
            .run(&mut session, &def, true)
            .unwrap();
        assert_eq!(outcome.target_bus, BusNumber::new(2));
        assert_eq!(session.network.last_setpoint(), Some((settings.v_max, BusNumber::new(2))));
    }

    #[test]
    fn reactive_dispatch_mode_writes_reactive_output() {
        let settings = CompensationSettings {
            mode: CompensationMode::ReactiveDispatch,
            ..settings()
        };
        let bands = VoltageBands::default();
        let mut session = session_with_high_voltage()
            .then_solve(ScriptedSolve::converged().voltage(2, 1.0));
        let def = ContingencyDefinition::new("C");
        let outcome = CompensationSearch::new(&settings, &bands)
            .run(&mut session, &def, true)
            .unwrap();
        assert_eq!(session.network.machines[0].q, Megavars(-5.0));
        assert_eq!(outcome.reactive_dispatch, Some(-5.0));
        assert_eq!(outcome.voltage_target, None);
        assert!(session.network.setpoints.is_empty());
    }
}
