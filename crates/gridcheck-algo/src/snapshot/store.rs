use super::{SnapshotError, SnapshotTable};
use crate::session::PowerFlowSession;
use gridcheck_core::model::Ratings;
use gridcheck_core::{
    BranchKey, BusNumber, BusType, ElementStatus, Kilovolts, MachineKey, ShuntKey, Tx3Key,
    WindingKey,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Static bus attributes captured with the base case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusInfo {
    pub number: BusNumber,
    pub name: String,
    pub base_kv: Kilovolts,
}

/// The datasets a study produces, one per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    BusState,
    SteadyVoltage,
    StepVoltage,
    CircuitStatus,
    CircuitLoading,
    Tx2Status,
    Tx2Loading,
    Tx3Status,
    WindingStatus,
    WindingLoading,
    FixedShuntStatus,
    SwitchedShuntStatus,
    MachineOutput,
}

impl Dataset {
    pub const ALL: [Dataset; 13] = [
        Dataset::BusState,
        Dataset::SteadyVoltage,
        Dataset::StepVoltage,
        Dataset::CircuitStatus,
        Dataset::CircuitLoading,
        Dataset::Tx2Status,
        Dataset::Tx2Loading,
        Dataset::Tx3Status,
        Dataset::WindingStatus,
        Dataset::WindingLoading,
        Dataset::FixedShuntStatus,
        Dataset::SwitchedShuntStatus,
        Dataset::MachineOutput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::BusState => "bus_state",
            Dataset::SteadyVoltage => "steady_voltage",
            Dataset::StepVoltage => "step_voltage",
            Dataset::CircuitStatus => "circuit_status",
            Dataset::CircuitLoading => "circuit_loading",
            Dataset::Tx2Status => "tx2_status",
            Dataset::Tx2Loading => "tx2_loading",
            Dataset::Tx3Status => "tx3_status",
            Dataset::WindingStatus => "tx3_winding_status",
            Dataset::WindingLoading => "tx3_winding_loading",
            Dataset::FixedShuntStatus => "fixed_shunt_status",
            Dataset::SwitchedShuntStatus => "switched_shunt_status",
            Dataset::MachineOutput => "machine_reactive_output",
        }
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All snapshot tables of one network case.
///
/// [`SnapshotStore::capture_base`] initialises the base column of every table.
/// Contingency columns are appended by [`SnapshotStore::capture_switching`] and
/// the `record_*` calls made by the executor; earlier columns never change
/// apart from isolation marks.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    buses: Vec<BusInfo>,
    bus_state: SnapshotTable<BusNumber, i32>,
    steady_voltage: SnapshotTable<BusNumber, f64>,
    step_voltage: SnapshotTable<BusNumber, f64>,
    circuit_status: SnapshotTable<BranchKey, i32>,
    circuit_loading: SnapshotTable<BranchKey, f64>,
    circuit_ratings: HashMap<BranchKey, Ratings>,
    tx2_status: SnapshotTable<BranchKey, i32>,
    tx2_loading: SnapshotTable<BranchKey, f64>,
    tx2_ratings: HashMap<BranchKey, Ratings>,
    tx3_status: SnapshotTable<Tx3Key, i32>,
    winding_status: SnapshotTable<WindingKey, i32>,
    winding_loading: SnapshotTable<WindingKey, f64>,
    winding_ratings: HashMap<WindingKey, Ratings>,
    fixed_shunt_status: SnapshotTable<ShuntKey, i32>,
    switched_shunt_status: SnapshotTable<ShuntKey, i32>,
    machine_output: SnapshotTable<MachineKey, f64>,
    machine_status: HashMap<MachineKey, ElementStatus>,
}

impl SnapshotStore {
    /// Capture the base-case column of every table from the current
    /// (solved) session state.
    pub fn capture_base<S: PowerFlowSession + ?Sized>(session: &S) -> Result<Self, SnapshotError> {
        let bus_records = session.read_buses()?;
        let circuits = session.read_circuits()?;
        let tx2 = session.read_two_winding()?;
        let tx3 = session.read_three_winding()?;
        let windings = session.read_windings()?;
        let fixed = session.read_fixed_shunts()?;
        let switched = session.read_switched_shunts()?;
        let machines = session.read_machines()?;

        let buses = bus_records
            .iter()
            .map(|b| BusInfo {
                number: b.number,
                name: b.name.clone(),
                base_kv: b.base_kv,
            })
            .collect();

        let store = Self {
            buses,
            bus_state: SnapshotTable::with_base(
                bus_records
                    .iter()
                    .map(|b| (b.number, Some(b.bus_type.code()))),
            ),
            steady_voltage: SnapshotTable::with_base(
                bus_records.iter().map(|b| (b.number, Some(b.voltage.value()))),
            ),
            step_voltage: SnapshotTable::with_base(
                bus_records.iter().map(|b| (b.number, Some(b.voltage.value()))),
            ),
            circuit_status: SnapshotTable::with_base(
                circuits
                    .iter()
                    .map(|c| (c.key.clone(), Some(c.status.code()))),
            ),
            circuit_loading: SnapshotTable::with_base(
                circuits
                    .iter()
                    .map(|c| (c.key.clone(), Some(c.loading.value()))),
            ),
            circuit_ratings: circuits
                .iter()
                .map(|c| (c.key.clone(), c.ratings))
                .collect(),
            tx2_status: SnapshotTable::with_base(
                tx2.iter().map(|t| (t.key.clone(), Some(t.status.code()))),
            ),
            tx2_loading: SnapshotTable::with_base(
                tx2.iter().map(|t| (t.key.clone(), Some(t.loading.value()))),
            ),
            tx2_ratings: tx2.iter().map(|t| (t.key.clone(), t.ratings)).collect(),
            tx3_status: SnapshotTable::with_base(
                tx3.iter().map(|t| (t.key.clone(), Some(t.status.code()))),
            ),
            winding_status: SnapshotTable::with_base(
                windings
                    .iter()
                    .map(|w| (w.key.clone(), Some(w.status.code()))),
            ),
            winding_loading: SnapshotTable::with_base(
                windings
                    .iter()
                    .map(|w| (w.key.clone(), Some(w.loading.value()))),
            ),
            winding_ratings: windings
                .iter()
                .map(|w| (w.key.clone(), w.ratings))
                .collect(),
            fixed_shunt_status: SnapshotTable::with_base(
                fixed.iter().map(|s| (s.key.clone(), Some(s.status.code()))),
            ),
            switched_shunt_status: SnapshotTable::with_base(
                switched
                    .iter()
                    .map(|s| (s.key.clone(), Some(s.status.code()))),
            ),
            machine_output: SnapshotTable::with_base(
                machines.iter().map(|m| (m.key.clone(), Some(m.q.value()))),
            ),
            machine_status: machines.iter().map(|m| (m.key.clone(), m.status)).collect(),
        };
        debug!(
            buses = store.buses.len(),
            circuits = store.circuit_status.len(),
            machines = store.machine_output.len(),
            "captured base case"
        );
        Ok(store)
    }

    /// Status columns after switching, captured whether or not switching
    /// succeeded.
    pub fn capture_switching<S: PowerFlowSession + ?Sized>(
        &mut self,
        session: &S,
        contingency: &str,
    ) -> Result<(), SnapshotError> {
        let buses = session.read_buses()?;
        self.bus_state.append(
            contingency,
            buses.iter().map(|b| (b.number, Some(b.bus_type.code()))),
        )?;

        let circuits = session.read_circuits()?;
        self.circuit_status.append(
            contingency,
            circuits
                .iter()
                .map(|c| (c.key.clone(), Some(c.status.code()))),
        )?;

        let tx2 = session.read_two_winding()?;
        self.tx2_status.append(
            contingency,
            tx2.iter().map(|t| (t.key.clone(), Some(t.status.code()))),
        )?;

        let tx3 = session.read_three_winding()?;
        self.tx3_status.append(
            contingency,
            tx3.iter().map(|t| (t.key.clone(), Some(t.status.code()))),
        )?;

        let windings = session.read_windings()?;
        self.winding_status.append(
            contingency,
            windings
                .iter()
                .map(|w| (w.key.clone(), Some(w.status.code()))),
        )?;

        let fixed = session.read_fixed_shunts()?;
        self.fixed_shunt_status.append(
            contingency,
            fixed.iter().map(|s| (s.key.clone(), Some(s.status.code()))),
        )?;

        let switched = session.read_switched_shunts()?;
        self.switched_shunt_status.append(
            contingency,
            switched
                .iter()
                .map(|s| (s.key.clone(), Some(s.status.code()))),
        )?;
        Ok(())
    }

    /// Mark buses the solver islanded as isolated in this contingency's bus
    /// state column.
    pub fn mark_isolated(
        &mut self,
        contingency: &str,
        buses: &[BusNumber],
    ) -> Result<(), SnapshotError> {
        for bus in buses {
            self.bus_state
                .amend(contingency, bus, Some(BusType::Isolated.code()))?;
        }
        Ok(())
    }

    pub fn record_step_voltages<S: PowerFlowSession + ?Sized>(
        &mut self,
        session: &S,
        contingency: &str,
    ) -> Result<(), SnapshotError> {
        let buses = session.read_buses()?;
        self.step_voltage.append(
            contingency,
            buses.iter().map(|b| (b.number, Some(b.voltage.value()))),
        )
    }

    pub fn record_step_sentinel(&mut self, contingency: &str) -> Result<(), SnapshotError> {
        self.step_voltage.append_sentinel(contingency)
    }

    /// Steady-state voltages, loadings and machine reactive output.
    pub fn record_steady_state<S: PowerFlowSession + ?Sized>(
        &mut self,
        session: &S,
        contingency: &str,
    ) -> Result<(), SnapshotError> {
        let buses = session.read_buses()?;
        self.steady_voltage.append(
            contingency,
            buses.iter().map(|b| (b.number, Some(b.voltage.value()))),
        )?;

        let circuits = session.read_circuits()?;
        self.circuit_loading.append(
            contingency,
            circuits
                .iter()
                .map(|c| (c.key.clone(), Some(c.loading.value()))),
        )?;

        let tx2 = session.read_two_winding()?;
        self.tx2_loading.append(
            contingency,
            tx2.iter().map(|t| (t.key.clone(), Some(t.loading.value()))),
        )?;

        let windings = session.read_windings()?;
        self.winding_loading.append(
            contingency,
            windings
                .iter()
                .map(|w| (w.key.clone(), Some(w.loading.value()))),
        )?;

        let machines = session.read_machines()?;
        self.machine_output.append(
            contingency,
            machines.iter().map(|m| (m.key.clone(), Some(m.q.value()))),
        )
    }

    pub fn record_steady_sentinel(&mut self, contingency: &str) -> Result<(), SnapshotError> {
        self.steady_voltage.append_sentinel(contingency)?;
        self.circuit_loading.append_sentinel(contingency)?;
        self.tx2_loading.append_sentinel(contingency)?;
        self.winding_loading.append_sentinel(contingency)?;
        self.machine_output.append_sentinel(contingency)
    }

    pub fn buses(&self) -> &[BusInfo] {
        &self.buses
    }

    pub fn bus_state(&self) -> &SnapshotTable<BusNumber, i32> {
        &self.bus_state
    }

    pub fn steady_voltage(&self) -> &SnapshotTable<BusNumber, f64> {
        &self.steady_voltage
    }

    pub fn step_voltage(&self) -> &SnapshotTable<BusNumber, f64> {
        &self.step_voltage
    }

    pub fn circuit_status(&self) -> &SnapshotTable<BranchKey, i32> {
        &self.circuit_status
    }

    pub fn circuit_loading(&self) -> &SnapshotTable<BranchKey, f64> {
        &self.circuit_loading
    }

    pub fn circuit_ratings(&self) -> &HashMap<BranchKey, Ratings> {
        &self.circuit_ratings
    }

    pub fn tx2_status(&self) -> &SnapshotTable<BranchKey, i32> {
        &self.tx2_status
    }

    pub fn tx2_loading(&self) -> &SnapshotTable<BranchKey, f64> {
        &self.tx2_loading
    }

    pub fn tx2_ratings(&self) -> &HashMap<BranchKey, Ratings> {
        &self.tx2_ratings
    }

    pub fn tx3_status(&self) -> &SnapshotTable<Tx3Key, i32> {
        &self.tx3_status
    }

    pub fn winding_status(&self) -> &SnapshotTable<WindingKey, i32> {
        &self.winding_status
    }

    pub fn winding_loading(&self) -> &SnapshotTable<WindingKey, f64> {
        &self.winding_loading
    }

    pub fn winding_ratings(&self) -> &HashMap<WindingKey, Ratings> {
        &self.winding_ratings
    }

    pub fn fixed_shunt_status(&self) -> &SnapshotTable<ShuntKey, i32> {
        &self.fixed_shunt_status
    }

    pub fn switched_shunt_status(&self) -> &SnapshotTable<ShuntKey, i32> {
        &self.switched_shunt_status
    }

    pub fn machine_output(&self) -> &SnapshotTable<MachineKey, f64> {
        &self.machine_output
    }

    pub fn machine_status(&self) -> &HashMap<MachineKey, ElementStatus> {
        &self.machine_status
    }

    /// Whether `bus` is isolated under `contingency`.
    pub fn is_isolated(&self, contingency: &str, bus: &BusNumber) -> bool {
        self.bus_state.value(contingency, bus).copied() == Some(BusType::Isolated.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::BASE_CASE;
    use crate::test_utils::ScriptedSession;

    fn session() -> ScriptedSession {
        ScriptedSession::new()
            .with_bus(1, 220.0, 1.0)
            .with_bus(2, 220.0, 0.99)
            .with_circuit(BranchKey::new(1, 2, "1"), 100.0, 40.0)
    }

    #[test]
    fn contingency_columns_leave_earlier_columns_untouched() {
        let mut session = session();
        let key = BranchKey::new(1, 2, "1");
        let mut store = SnapshotStore::capture_base(&session).unwrap();

        session.network.circuits[0].status = ElementStatus::OutOfService;
        store.capture_switching(&session, "A").unwrap();
        session.network.circuits[0].status = ElementStatus::InService;
        session.network.set_voltage(2, 0.95);
        store.capture_switching(&session, "B").unwrap();
        store.record_steady_state(&session, "B").unwrap();

        let status = store.circuit_status();
        assert_eq!(status.column_names(), vec![BASE_CASE, "A", "B"]);
        assert_eq!(status.value(BASE_CASE, &key), Some(&1));
        assert_eq!(status.value("A", &key), Some(&0));
        assert_eq!(status.value("B", &key), Some(&1));
        let bus2 = BusNumber::new(2);
        assert_eq!(store.steady_voltage().value(BASE_CASE, &bus2), Some(&0.99));
        assert_eq!(store.steady_voltage().value("B", &bus2), Some(&0.95));
    }

    #[test]
    fn base_name_cannot_be_appended() {
        let session = session();
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        assert!(matches!(
            store.capture_switching(&session, BASE_CASE),
            Err(SnapshotError::ReservedName(_))
        ));
        assert!(matches!(
            store.mark_isolated(BASE_CASE, &[BusNumber::new(2)]),
            Err(SnapshotError::BaseImmutable)
        ));
    }

    #[test]
    fn retrieval_failure_is_an_error() {
        let mut session = session();
        let mut store = SnapshotStore::capture_base(&session).unwrap();
        session.fail_retrieval = true;
        assert!(matches!(
            store.capture_switching(&session, "A"),
            Err(SnapshotError::Retrieval(_))
        ));
    }
}
