//! Scripted in-memory [`PowerFlowSession`] for driving the contingency engine
//! deterministically in tests.
//!
//! Solves pop [`ScriptedSolve`] entries in order; once the script is empty an
//! optional responder closure decides, and failing that every solve converges
//! without changing any value. Reloading restores the network as it was built
//! but keeps the remaining script.

use crate::session::{
    BranchRecord, BusFilter, BusRecord, ElementAction, MachineRecord, PowerFlowSession,
    SessionError, ShuntRecord, SolveOptions, SolveOutcome, Tx3Record, WindingRecord,
};
use gridcheck_core::model::Ratings;
use gridcheck_core::{
    BranchKey, BusNumber, BusType, ElementKey, ElementStatus, Kilovolts, MachineKey, Megavars,
    MegavoltAmperes, PerUnit, ShuntKey, Tx3Key, WindingKey,
};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// Network state held by the scripted session.
#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    pub buses: Vec<BusRecord>,
    pub circuits: Vec<BranchRecord>,
    pub two_winding: Vec<BranchRecord>,
    pub three_winding: Vec<Tx3Record>,
    pub windings: Vec<WindingRecord>,
    pub fixed_shunts: Vec<ShuntRecord>,
    pub switched_shunts: Vec<ShuntRecord>,
    pub machines: Vec<MachineRecord>,
    /// Last voltage target written per machine: (target pu, regulated bus).
    pub setpoints: Vec<(MachineKey, f64, BusNumber)>,
}

impl FakeNetwork {
    pub fn set_voltage(&mut self, bus: u32, voltage: f64) {
        if let Some(record) = self
            .buses
            .iter_mut()
            .find(|b| b.number == BusNumber::new(bus))
        {
            record.voltage = PerUnit(voltage);
        }
    }

    pub fn voltage(&self, bus: u32) -> Option<f64> {
        self.buses
            .iter()
            .find(|b| b.number == BusNumber::new(bus))
            .map(|b| b.voltage.value())
    }

    pub fn set_loading(&mut self, key: &BranchKey, loading: f64) {
        for record in self.circuits.iter_mut().chain(self.two_winding.iter_mut()) {
            if &record.key == key {
                record.loading = MegavoltAmperes(loading);
            }
        }
    }

    pub fn last_setpoint(&self) -> Option<(f64, BusNumber)> {
        self.setpoints.last().map(|(_, v, bus)| (*v, *bus))
    }
}

/// One scripted solve result.
#[derive(Debug, Clone)]
pub struct ScriptedSolve {
    pub outcome: SolveOutcome,
    pub voltages: Vec<(u32, f64)>,
    pub loadings: Vec<(BranchKey, f64)>,
}

impl ScriptedSolve {
    pub fn converged() -> Self {
        Self {
            outcome: SolveOutcome::converged(),
            voltages: Vec::new(),
            loadings: Vec::new(),
        }
    }

    pub fn diverged() -> Self {
        Self {
            outcome: SolveOutcome::diverged(),
            voltages: Vec::new(),
            loadings: Vec::new(),
        }
    }

    pub fn islanded(buses: &[u32]) -> Self {
        Self {
            outcome: SolveOutcome::islanded(buses.iter().copied().map(BusNumber::new).collect()),
            voltages: Vec::new(),
            loadings: Vec::new(),
        }
    }

    pub fn voltage(mut self, bus: u32, voltage: f64) -> Self {
        self.voltages.push((bus, voltage));
        self
    }

    pub fn loading(mut self, key: BranchKey, loading: f64) -> Self {
        self.loadings.push((key, loading));
        self
    }
}

type Responder = Box<dyn FnMut(&mut FakeNetwork, SolveOptions) -> SolveOutcome + Send>;

pub struct ScriptedSession {
    pristine: FakeNetwork,
    pub network: FakeNetwork,
    script: VecDeque<ScriptedSolve>,
    responder: Option<Responder>,
    pub failing_writes: HashSet<ElementKey>,
    pub fail_retrieval: bool,
    pub solves: Vec<SolveOptions>,
    pub writes: Vec<(ElementKey, ElementAction)>,
    pub reloads: usize,
    pub loaded: Option<PathBuf>,
    pub subsystem: Option<BusFilter>,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            pristine: FakeNetwork::default(),
            network: FakeNetwork::default(),
            script: VecDeque::new(),
            responder: None,
            failing_writes: HashSet::new(),
            fail_retrieval: false,
            solves: Vec::new(),
            writes: Vec::new(),
            reloads: 0,
            loaded: None,
            subsystem: None,
        }
    }

    fn edit(mut self, f: impl FnOnce(&mut FakeNetwork)) -> Self {
        f(&mut self.pristine);
        self.network = self.pristine.clone();
        self
    }

    pub fn with_bus(self, number: u32, base_kv: f64, voltage: f64) -> Self {
        self.with_typed_bus(number, base_kv, voltage, BusType::Load)
    }

    pub fn with_typed_bus(self, number: u32, base_kv: f64, voltage: f64, bus_type: BusType) -> Self {
        self.edit(|n| {
            n.buses.push(BusRecord {
                number: BusNumber::new(number),
                name: format!("BUS{number}"),
                base_kv: Kilovolts(base_kv),
                bus_type,
                voltage: PerUnit(voltage),
            })
        })
    }

    pub fn with_circuit(self, key: BranchKey, rate_a: f64, loading: f64) -> Self {
        self.edit(|n| n.circuits.push(branch_record(key, rate_a, loading)))
    }

    pub fn with_two_winding(self, key: BranchKey, rate_a: f64, loading: f64) -> Self {
        self.edit(|n| n.two_winding.push(branch_record(key, rate_a, loading)))
    }

    pub fn with_three_winding(self, key: Tx3Key, rate_a: f64, loading: f64) -> Self {
        self.edit(|n| {
            for bus in key.buses() {
                n.windings.push(WindingRecord {
                    key: WindingKey {
                        winding_bus: bus,
                        transformer: key.clone(),
                    },
                    status: ElementStatus::InService,
                    ratings: Ratings {
                        rate_a: MegavoltAmperes(rate_a),
                        ..Ratings::default()
                    },
                    loading: MegavoltAmperes(loading),
                });
            }
            n.three_winding.push(Tx3Record {
                key,
                status: ElementStatus::InService,
            });
        })
    }

    pub fn with_fixed_shunt(self, key: ShuntKey) -> Self {
        self.edit(|n| {
            n.fixed_shunts.push(ShuntRecord {
                key,
                status: ElementStatus::InService,
            })
        })
    }

    pub fn with_switched_shunt(self, key: ShuntKey) -> Self {
        self.edit(|n| {
            n.switched_shunts.push(ShuntRecord {
                key,
                status: ElementStatus::InService,
            })
        })
    }

    pub fn with_machine(self, key: MachineKey, q: f64) -> Self {
        self.edit(|n| {
            n.machines.push(MachineRecord {
                key,
                status: ElementStatus::InService,
                q: Megavars(q),
            })
        })
    }

    pub fn then_solve(mut self, solve: ScriptedSolve) -> Self {
        self.script.push_back(solve);
        self
    }

    pub fn push_solve(&mut self, solve: ScriptedSolve) {
        self.script.push_back(solve);
    }

    /// Decide solves once the script is exhausted.
    pub fn with_responder(
        mut self,
        responder: impl FnMut(&mut FakeNetwork, SolveOptions) -> SolveOutcome + Send + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn failing_write(mut self, element: ElementKey) -> Self {
        self.failing_writes.insert(element);
        self
    }

    pub fn remaining_script(&self) -> usize {
        self.script.len()
    }

    fn retrieve<T: Clone>(&self, rows: &[T]) -> Result<Vec<T>, SessionError> {
        if self.fail_retrieval {
            return Err(SessionError::Retrieval("scripted retrieval failure".into()));
        }
        Ok(rows.to_vec())
    }
}

fn branch_record(key: BranchKey, rate_a: f64, loading: f64) -> BranchRecord {
    BranchRecord {
        key,
        status: ElementStatus::InService,
        ratings: Ratings {
            rate_a: MegavoltAmperes(rate_a),
            ..Ratings::default()
        },
        loading: MegavoltAmperes(loading),
    }
}

impl PowerFlowSession for ScriptedSession {
    fn load_case(&mut self, path: &Path) -> Result<(), SessionError> {
        self.loaded = Some(path.to_path_buf());
        self.network = self.pristine.clone();
        Ok(())
    }

    fn reload_case(&mut self) -> Result<(), SessionError> {
        self.reloads += 1;
        self.network = self.pristine.clone();
        Ok(())
    }

    fn define_subsystem(&mut self, filter: BusFilter) -> Result<(), SessionError> {
        self.subsystem = Some(filter);
        Ok(())
    }

    fn solve(&mut self, options: SolveOptions) -> Result<SolveOutcome, SessionError> {
        self.solves.push(options);
        if let Some(step) = self.script.pop_front() {
            for bus in &step.outcome.isolated_buses {
                if let Some(record) = self.network.buses.iter_mut().find(|b| &b.number == bus) {
                    record.bus_type = BusType::Isolated;
                }
            }
            if step.outcome.converged {
                for (bus, v) in &step.voltages {
                    self.network.set_voltage(*bus, *v);
                }
                for (key, loading) in &step.loadings {
                    self.network.set_loading(key, *loading);
                }
            }
            return Ok(step.outcome);
        }
        if let Some(responder) = self.responder.as_mut() {
            return Ok(responder(&mut self.network, options));
        }
        Ok(SolveOutcome::converged())
    }

    fn read_buses(&self) -> Result<Vec<BusRecord>, SessionError> {
        self.retrieve(&self.network.buses)
    }

    fn read_circuits(&self) -> Result<Vec<BranchRecord>, SessionError> {
        self.retrieve(&self.network.circuits)
    }

    fn read_two_winding(&self) -> Result<Vec<BranchRecord>, SessionError> {
        self.retrieve(&self.network.two_winding)
    }

    fn read_three_winding(&self) -> Result<Vec<Tx3Record>, SessionError> {
        self.retrieve(&self.network.three_winding)
    }

    fn read_windings(&self) -> Result<Vec<WindingRecord>, SessionError> {
        self.retrieve(&self.network.windings)
    }

    fn read_fixed_shunts(&self) -> Result<Vec<ShuntRecord>, SessionError> {
        self.retrieve(&self.network.fixed_shunts)
    }

    fn read_switched_shunts(&self) -> Result<Vec<ShuntRecord>, SessionError> {
        self.retrieve(&self.network.switched_shunts)
    }

    fn read_machines(&self) -> Result<Vec<MachineRecord>, SessionError> {
        self.retrieve(&self.network.machines)
    }

    fn write_element_state(&mut self, element: &ElementKey, action: &ElementAction) -> bool {
        self.writes.push((element.clone(), action.clone()));
        if self.failing_writes.contains(element) {
            return false;
        }
        let n = &mut self.network;
        match (element, action) {
            (ElementKey::Bus(bus), ElementAction::BusType(bus_type)) => {
                match n.buses.iter_mut().find(|b| &b.number == bus) {
                    Some(record) => {
                        record.bus_type = *bus_type;
                        true
                    }
                    None => false,
                }
            }
            (ElementKey::Circuit(key), ElementAction::Status(status)) => {
                set_branch_status(&mut n.circuits, key, *status)
            }
            (ElementKey::TwoWinding(key), ElementAction::Status(status)) => {
                set_branch_status(&mut n.two_winding, key, *status)
            }
            (ElementKey::ThreeWinding(key), ElementAction::Status(status)) => {
                let Some(record) = n.three_winding.iter_mut().find(|t| &t.key == key) else {
                    return false;
                };
                record.status = *status;
                for winding in n.windings.iter_mut().filter(|w| &w.key.transformer == key) {
                    winding.status = *status;
                    if !status.is_in_service() {
                        winding.loading = MegavoltAmperes(0.0);
                    }
                }
                true
            }
            (ElementKey::FixedShunt(key), ElementAction::Status(status)) => {
                set_shunt_status(&mut n.fixed_shunts, key, *status)
            }
            (ElementKey::SwitchedShunt(key), ElementAction::Status(status)) => {
                set_shunt_status(&mut n.switched_shunts, key, *status)
            }
            (ElementKey::Machine(key), ElementAction::ReactiveOutput(q)) => {
                match n.machines.iter_mut().find(|m| &m.key == key) {
                    Some(record) => {
                        record.q = *q;
                        true
                    }
                    None => false,
                }
            }
            (
                ElementKey::Machine(key),
                ElementAction::VoltageTarget {
                    target,
                    regulated_bus,
                },
            ) => {
                if !n.machines.iter().any(|m| &m.key == key) {
                    return false;
                }
                n.setpoints
                    .push((key.clone(), target.value(), *regulated_bus));
                true
            }
            _ => false,
        }
    }
}

fn set_branch_status(records: &mut [BranchRecord], key: &BranchKey, status: ElementStatus) -> bool {
    match records.iter_mut().find(|r| r.key.same_element(key)) {
        Some(record) => {
            record.status = status;
            if !status.is_in_service() {
                record.loading = MegavoltAmperes(0.0);
            }
            true
        }
        None => false,
    }
}

fn set_shunt_status(records: &mut [ShuntRecord], key: &ShuntKey, status: ElementStatus) -> bool {
    match records.iter_mut().find(|r| &r.key == key) {
        Some(record) => {
            record.status = status;
            true
        }
        None => false,
    }
}
