//! In-memory [`PowerFlowSession`] over a JSON [`NetworkCase`].
//!
//! Each solve compiles the current case into a dense admittance matrix over
//! the non-isolated buses plus one star node per in-service three-winding
//! transformer, then runs Newton-Raphson inside two outer loops:
//!
//! | Loop | Runs | Adjusts |
//! |------|------|---------|
//! | reactive limits / remote regulation | always | PV → PQ at Q limits; local setpoint of remotely regulating machines |
//! | voltage controls | taps free only | switched shunt steps, transformer tap steps |
//!
//! Islands without a swing bus are found before solving; their buses are
//! switched to type 4 and reported instead of solving.

use super::newton::{compute_power, stamp_shunt, AdmittanceMatrix, NewtonRaphson, NodeKind, PiBranch};
use crate::session::{
    BranchRecord, BusFilter, BusRecord, ElementAction, MachineRecord, PowerFlowSession,
    SessionError, ShuntRecord, SolveOptions, SolveOutcome, Tx3Record, WindingRecord,
};
use gridcheck_core::model::{CaseWinding, NetworkCase};
use gridcheck_core::{
    find_islands, BusNumber, BusType, ElementKey, LinearSystemBackend, MachineKey,
    Megavars, MegavoltAmperes, PerUnit, SolverKind, Tx3Key, WindingKey,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn default_max_iterations() -> usize {
    100
}
fn default_tolerance_mva() -> f64 {
    2.0
}
fn default_outer_iterations() -> usize {
    20
}

/// Numerical settings fixed when the session is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Largest acceptable bus mismatch, MW/Mvar
    #[serde(default = "default_tolerance_mva")]
    pub tolerance_mva: f64,
    #[serde(default)]
    pub linear_solver: SolverKind,
    /// Reactive-limit and remote-regulation passes per solve
    #[serde(default = "default_outer_iterations")]
    pub max_limit_iterations: usize,
    /// Tap and switched-shunt passes per taps-free solve
    #[serde(default = "default_outer_iterations")]
    pub max_control_iterations: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance_mva: default_tolerance_mva(),
            linear_solver: SolverKind::default(),
            max_limit_iterations: default_outer_iterations(),
            max_control_iterations: default_outer_iterations(),
        }
    }
}

impl SessionSettings {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.max_iterations == 0 {
            return Err(SessionError::Configuration(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(self.tolerance_mva.is_finite() && self.tolerance_mva > 0.0) {
            return Err(SessionError::Configuration(format!(
                "tolerance must be a positive number of MVA, got {}",
                self.tolerance_mva
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum CaseSource {
    File(PathBuf),
    Memory(Box<NetworkCase>),
}

pub struct NetworkSession {
    settings: SessionSettings,
    backend: Arc<dyn LinearSystemBackend>,
    source: Option<CaseSource>,
    case: Option<NetworkCase>,
    subsystem: Option<BusFilter>,
    /// (|V| pu, angle rad) per bus; isolated buses read as zero.
    voltages: HashMap<BusNumber, (f64, f64)>,
    star_voltages: HashMap<Tx3Key, (f64, f64)>,
    machine_q: HashMap<MachineKey, f64>,
}

impl NetworkSession {
    pub fn new(settings: SessionSettings) -> Result<Self, SessionError> {
        settings.validate()?;
        Ok(Self {
            backend: settings.linear_solver.build_solver(),
            settings,
            source: None,
            case: None,
            subsystem: None,
            voltages: HashMap::new(),
            star_voltages: HashMap::new(),
            machine_q: HashMap::new(),
        })
    }

    /// Session over a case built in memory; reloading restores this case.
    pub fn from_case(case: NetworkCase, settings: SessionSettings) -> Result<Self, SessionError> {
        case.validate()
            .map_err(|err| SessionError::CaseLoad {
                path: PathBuf::from(&case.name),
                reason: err.to_string(),
            })?;
        let mut session = Self::new(settings)?;
        session.install(case.clone());
        session.source = Some(CaseSource::Memory(Box::new(case)));
        Ok(session)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Current (possibly switched) case.
    pub fn case(&self) -> Option<&NetworkCase> {
        self.case.as_ref()
    }

    fn install(&mut self, case: NetworkCase) {
        self.voltages = case
            .buses
            .iter()
            .map(|bus| (bus.number, (bus.vm.value(), bus.va_deg.to_radians())))
            .collect();
        self.star_voltages.clear();
        self.machine_q = case
            .machines
            .iter()
            .map(|m| (m.key(), m.qg.value()))
            .collect();
        self.case = Some(case);
    }

    fn case_ref(&self) -> Result<&NetworkCase, SessionError> {
        self.case.as_ref().ok_or(SessionError::NoCase)
    }

    fn admitted(&self, case: &NetworkCase) -> HashSet<BusNumber> {
        case.buses
            .iter()
            .filter(|bus| {
                self.subsystem
                    .as_ref()
                    .map_or(true, |filter| filter.admits(bus.number, bus.base_kv))
            })
            .map(|bus| bus.number)
            .collect()
    }

    fn voltage(&self, bus: BusNumber) -> (f64, f64) {
        self.voltages.get(&bus).copied().unwrap_or((0.0, 0.0))
    }

    fn branch_loading(&self, base_mva: f64, from: BusNumber, to: BusNumber, branch: PiBranch) -> f64 {
        let (vf, af) = self.voltage(from);
        let (vt, at) = self.voltage(to);
        branch.loading(&[vf, vt], &[af, at]) * base_mva
    }

    fn winding_loading(&self, case: &NetworkCase, key: &Tx3Key, bus: BusNumber, winding: &CaseWinding) -> f64 {
        let Some(&(vs, a_s)) = self.star_voltages.get(key) else {
            return 0.0;
        };
        let (vb, ab) = self.voltage(bus);
        PiBranch::new(0, 1, winding.r, winding.x, 0.0, winding.ratio, 0.0).loading(&[vb, vs], &[ab, a_s])
            * case.base_mva
    }

    fn solve_case(&mut self, options: SolveOptions) -> Result<bool, SessionError> {
        let mut flat = options.flat_start;
        for pass in 0..=self.settings.max_control_iterations {
            let case = self.case_ref()?;
            let solution = solve_network(case, &self.settings, &self.backend, self.warm_start(flat))?;
            let converged = solution.converged;
            self.store(solution);
            if !converged {
                return Ok(false);
            }
            if options.tap_locked {
                return Ok(true);
            }
            let voltages = self.voltages.clone();
            let case = self.case.as_mut().ok_or(SessionError::NoCase)?;
            if !step_voltage_controls(case, &voltages) {
                return Ok(true);
            }
            debug!(pass, "voltage controls moved; re-solving");
            flat = false;
        }
        warn!(
            passes = self.settings.max_control_iterations,
            "voltage controls did not settle"
        );
        Ok(true)
    }

    fn warm_start(&self, flat: bool) -> Option<(&HashMap<BusNumber, (f64, f64)>, &HashMap<Tx3Key, (f64, f64)>)> {
        if flat {
            None
        } else {
            Some((&self.voltages, &self.star_voltages))
        }
    }

    fn store(&mut self, solution: Solution) {
        if !solution.finite {
            return;
        }
        self.voltages.extend(solution.voltages);
        self.star_voltages = solution.star_voltages;
        self.machine_q.extend(solution.machine_q);
    }
}

impl PowerFlowSession for NetworkSession {
    fn load_case(&mut self, path: &Path) -> Result<(), SessionError> {
        let case = NetworkCase::from_json_path(path).map_err(|err| SessionError::CaseLoad {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        info!(path = %path.display(), buses = case.buses.len(), "case loaded");
        self.install(case);
        self.source = Some(CaseSource::File(path.to_path_buf()));
        Ok(())
    }

    fn reload_case(&mut self) -> Result<(), SessionError> {
        match self.source.clone() {
            Some(CaseSource::File(path)) => {
                let case = NetworkCase::from_json_path(&path).map_err(|err| SessionError::CaseLoad {
                    path: path.clone(),
                    reason: err.to_string(),
                })?;
                self.install(case);
                Ok(())
            }
            Some(CaseSource::Memory(case)) => {
                self.install(*case);
                Ok(())
            }
            None => Err(SessionError::NoCase),
        }
    }

    fn define_subsystem(&mut self, filter: BusFilter) -> Result<(), SessionError> {
        self.subsystem = Some(filter);
        Ok(())
    }

    fn solve(&mut self, options: SolveOptions) -> Result<SolveOutcome, SessionError> {
        let case = self.case.as_mut().ok_or(SessionError::NoCase)?;
        let unsupplied = find_islands(case).unsupplied_buses();
        if !unsupplied.is_empty() {
            for bus in case.buses.iter_mut().filter(|b| unsupplied.contains(&b.number)) {
                bus.bus_type = BusType::Isolated;
            }
            for bus in &unsupplied {
                self.voltages.insert(*bus, (0.0, 0.0));
            }
            info!(buses = ?unsupplied, "isolated buses without a swing bus");
            return Ok(SolveOutcome::islanded(unsupplied));
        }

        let converged = self.solve_case(options)?;
        debug!(?options, converged, "solve finished");
        Ok(SolveOutcome {
            converged,
            isolated_buses: Vec::new(),
        })
    }

    fn read_buses(&self) -> Result<Vec<BusRecord>, SessionError> {
        let case = self.case_ref()?;
        let admitted = self.admitted(case);
        Ok(case
            .buses
            .iter()
            .filter(|bus| admitted.contains(&bus.number))
            .map(|bus| BusRecord {
                number: bus.number,
                name: bus.name.clone(),
                base_kv: bus.base_kv,
                bus_type: bus.bus_type,
                voltage: if bus.bus_type == BusType::Isolated {
                    PerUnit(0.0)
                } else {
                    PerUnit(self.voltage(bus.number).0)
                },
            })
            .collect())
    }

    fn read_circuits(&self) -> Result<Vec<BranchRecord>, SessionError> {
        let case = self.case_ref()?;
        let admitted = self.admitted(case);
        let live = live_buses(case);
        Ok(case
            .branches
            .iter()
            .filter(|b| admitted.contains(&b.from) || admitted.contains(&b.to))
            .map(|b| {
                let energised = b.status.is_in_service() && live.contains(&b.from) && live.contains(&b.to);
                let loading = if energised {
                    self.branch_loading(
                        case.base_mva,
                        b.from,
                        b.to,
                        PiBranch::new(0, 1, b.r, b.x, b.b, 1.0, 0.0),
                    )
                } else {
                    0.0
                };
                BranchRecord {
                    key: b.key(),
                    status: b.status,
                    ratings: b.ratings,
                    loading: MegavoltAmperes(loading),
                }
            })
            .collect())
    }

    fn read_two_winding(&self) -> Result<Vec<BranchRecord>, SessionError> {
        let case = self.case_ref()?;
        let admitted = self.admitted(case);
        let live = live_buses(case);
        Ok(case
            .transformers_2w
            .iter()
            .filter(|t| admitted.contains(&t.from) || admitted.contains(&t.to))
            .map(|t| {
                let energised = t.status.is_in_service() && live.contains(&t.from) && live.contains(&t.to);
                let loading = if energised {
                    self.branch_loading(
                        case.base_mva,
                        t.from,
                        t.to,
                        PiBranch::new(0, 1, t.r, t.x, 0.0, t.ratio, t.phase_deg.to_radians()),
                    )
                } else {
                    0.0
                };
                BranchRecord {
                    key: t.key(),
                    status: t.status,
                    ratings: t.ratings,
                    loading: MegavoltAmperes(loading),
                }
            })
            .collect())
    }

    fn read_three_winding(&self) -> Result<Vec<Tx3Record>, SessionError> {
        let case = self.case_ref()?;
        let admitted = self.admitted(case);
        Ok(case
            .transformers_3w
            .iter()
            .filter(|t| t.key().buses().iter().any(|b| admitted.contains(b)))
            .map(|t| Tx3Record {
                key: t.key(),
                status: t.status,
            })
            .collect())
    }

    fn read_windings(&self) -> Result<Vec<WindingRecord>, SessionError> {
        let case = self.case_ref()?;
        let admitted = self.admitted(case);
        let live = live_buses(case);
        let mut records = Vec::new();
        for tx in &case.transformers_3w {
            let key = tx.key();
            let buses = key.buses();
            if !buses.iter().any(|b| admitted.contains(b)) {
                continue;
            }
            for (bus, winding) in buses.iter().zip(tx.windings.iter()) {
                let loading = if tx.status.is_in_service() && live.contains(bus) {
                    self.winding_loading(case, &key, *bus, winding)
                } else {
                    0.0
                };
                records.push(WindingRecord {
                    key: WindingKey {
                        winding_bus: *bus,
                        transformer: key.clone(),
                    },
                    status: tx.status,
                    ratings: winding.ratings,
                    loading: MegavoltAmperes(loading),
                });
            }
        }
        Ok(records)
    }

    fn read_fixed_shunts(&self) -> Result<Vec<ShuntRecord>, SessionError> {
        let case = self.case_ref()?;
        let admitted = self.admitted(case);
        Ok(case
            .fixed_shunts
            .iter()
            .filter(|s| admitted.contains(&s.bus))
            .map(|s| ShuntRecord {
                key: s.key(),
                status: s.status,
            })
            .collect())
    }

    fn read_switched_shunts(&self) -> Result<Vec<ShuntRecord>, SessionError> {
        let case = self.case_ref()?;
        let admitted = self.admitted(case);
        Ok(case
            .switched_shunts
            .iter()
            .filter(|s| admitted.contains(&s.bus))
            .map(|s| ShuntRecord {
                key: s.key(),
                status: s.status,
            })
            .collect())
    }

    fn read_machines(&self) -> Result<Vec<MachineRecord>, SessionError> {
        let case = self.case_ref()?;
        let admitted = self.admitted(case);
        Ok(case
            .machines
            .iter()
            .filter(|m| admitted.contains(&m.bus))
            .map(|m| {
                let key = m.key();
                let q = self.machine_q.get(&key).copied().unwrap_or(m.qg.value());
                MachineRecord {
                    key,
                    status: m.status,
                    q: Megavars(q),
                }
            })
            .collect())
    }

    fn write_element_state(&mut self, element: &ElementKey, action: &ElementAction) -> bool {
        let Some(case) = self.case.as_mut() else {
            return false;
        };
        match (element, action) {
            (ElementKey::Bus(number), ElementAction::BusType(bus_type)) => {
                match case.buses.iter_mut().find(|b| b.number == *number) {
                    Some(bus) => {
                        bus.bus_type = *bus_type;
                        true
                    }
                    None => false,
                }
            }
            (ElementKey::Circuit(key), ElementAction::Status(status)) => {
                match case.branches.iter_mut().find(|b| b.key().same_element(key)) {
                    Some(branch) => {
                        branch.status = *status;
                        true
                    }
                    None => false,
                }
            }
            (ElementKey::TwoWinding(key), ElementAction::Status(status)) => {
                match case.transformers_2w.iter_mut().find(|t| t.key().same_element(key)) {
                    Some(tx) => {
                        tx.status = *status;
                        true
                    }
                    None => false,
                }
            }
            (ElementKey::ThreeWinding(key), ElementAction::Status(status)) => {
                match case.transformers_3w.iter_mut().find(|t| t.key() == *key) {
                    Some(tx) => {
                        tx.status = *status;
                        true
                    }
                    None => false,
                }
            }
            (ElementKey::FixedShunt(key), ElementAction::Status(status)) => {
                match case.fixed_shunts.iter_mut().find(|s| s.key() == *key) {
                    Some(shunt) => {
                        shunt.status = *status;
                        true
                    }
                    None => false,
                }
            }
            (ElementKey::SwitchedShunt(key), ElementAction::Status(status)) => {
                match case.switched_shunts.iter_mut().find(|s| s.key() == *key) {
                    Some(shunt) => {
                        shunt.status = *status;
                        true
                    }
                    None => false,
                }
            }
            (ElementKey::Machine(key), ElementAction::VoltageTarget { target, regulated_bus }) => {
                match case.machines.iter_mut().find(|m| m.key() == *key) {
                    Some(machine) => {
                        machine.vs = *target;
                        machine.regulated_bus = Some(*regulated_bus);
                        true
                    }
                    None => false,
                }
            }
            (ElementKey::Machine(key), ElementAction::ReactiveOutput(q)) => {
                match case.machines.iter_mut().find(|m| m.key() == *key) {
                    Some(machine) => {
                        machine.qg = *q;
                        machine.qmax = *q;
                        machine.qmin = *q;
                        self.machine_q.insert(key.clone(), q.value());
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }
}

fn live_buses(case: &NetworkCase) -> HashSet<BusNumber> {
    case.buses
        .iter()
        .filter(|b| b.bus_type.in_service())
        .map(|b| b.number)
        .collect()
}

/// Voltage-controlled machine group at one node.
#[derive(Debug, Clone)]
struct RegulatingNode {
    node: usize,
    /// Node whose voltage the group holds
    regulated: usize,
    target: f64,
    q_min: f64,
    q_max: f64,
    /// Fixed-output machine Q at the node, Mvar
    q_fixed: f64,
}

struct CompiledNetwork {
    index: HashMap<BusNumber, usize>,
    buses: Vec<BusNumber>,
    stars: Vec<(Tx3Key, usize)>,
    y_bus: AdmittanceMatrix,
    kinds: Vec<NodeKind>,
    p_spec: Vec<f64>,
    q_spec: Vec<f64>,
    load_q: Vec<f64>,
    setpoints: Vec<f64>,
    regulating: Vec<RegulatingNode>,
}

fn compile(case: &NetworkCase) -> CompiledNetwork {
    let base = case.base_mva;
    let buses: Vec<BusNumber> = case
        .buses
        .iter()
        .filter(|b| b.bus_type.in_service())
        .map(|b| b.number)
        .collect();
    let index: HashMap<BusNumber, usize> =
        buses.iter().enumerate().map(|(i, b)| (*b, i)).collect();

    let mut stars = Vec::new();
    let mut next = buses.len();
    for tx in case.transformers_3w.iter().filter(|t| t.status.is_in_service()) {
        if tx.key().buses().iter().any(|b| index.contains_key(b)) {
            stars.push((tx.key(), next));
            next += 1;
        }
    }
    let n = next;

    let mut y_bus = vec![vec![(0.0, 0.0); n]; n];
    for branch in case.branches.iter().filter(|b| b.status.is_in_service()) {
        if let (Some(&i), Some(&j)) = (index.get(&branch.from), index.get(&branch.to)) {
            PiBranch::new(i, j, branch.r, branch.x, branch.b, 1.0, 0.0).stamp(&mut y_bus);
        }
    }
    for tx in case.transformers_2w.iter().filter(|t| t.status.is_in_service()) {
        if let (Some(&i), Some(&j)) = (index.get(&tx.from), index.get(&tx.to)) {
            PiBranch::new(i, j, tx.r, tx.x, 0.0, tx.ratio, tx.phase_deg.to_radians()).stamp(&mut y_bus);
        }
    }
    let star_index: HashMap<&Tx3Key, usize> = stars.iter().map(|(k, i)| (k, *i)).collect();
    for tx in case.transformers_3w.iter().filter(|t| t.status.is_in_service()) {
        let key = tx.key();
        let Some(&star) = star_index.get(&key) else {
            continue;
        };
        for (bus, winding) in key.buses().iter().zip(tx.windings.iter()) {
            if let Some(&i) = index.get(bus) {
                PiBranch::new(i, star, winding.r, winding.x, 0.0, winding.ratio, 0.0).stamp(&mut y_bus);
            }
        }
    }
    for shunt in case.fixed_shunts.iter().filter(|s| s.status.is_in_service()) {
        if let Some(&i) = index.get(&shunt.bus) {
            stamp_shunt(&mut y_bus, i, shunt.g.value() / base, shunt.b.value() / base);
        }
    }
    for shunt in case.switched_shunts.iter().filter(|s| s.status.is_in_service()) {
        if let Some(&i) = index.get(&shunt.bus) {
            stamp_shunt(&mut y_bus, i, 0.0, shunt.b.value() / base);
        }
    }

    let mut p_spec = vec![0.0; n];
    let mut q_spec = vec![0.0; n];
    let mut load_q = vec![0.0; n];
    for load in case.loads.iter().filter(|l| l.status.is_in_service()) {
        if let Some(&i) = index.get(&load.bus) {
            p_spec[i] -= load.p.value() / base;
            q_spec[i] -= load.q.value() / base;
            load_q[i] += load.q.value();
        }
    }

    let mut kinds = vec![NodeKind::Pq; n];
    let mut setpoints = vec![1.0; n];
    let mut groups: HashMap<usize, RegulatingNode> = HashMap::new();
    for bus in &case.buses {
        if let Some(&i) = index.get(&bus.number) {
            setpoints[i] = bus.vm.value();
            if bus.bus_type == BusType::Swing {
                kinds[i] = NodeKind::Slack;
            }
        }
    }
    for machine in case.machines.iter().filter(|m| m.status.is_in_service()) {
        let Some(&i) = index.get(&machine.bus) else {
            continue;
        };
        p_spec[i] += machine.pg.value() / base;
        let bus_type = case.bus(machine.bus).map(|b| b.bus_type).unwrap_or_default();
        let controllable = machine.qmax > machine.qmin;
        let regulates = matches!(bus_type, BusType::Generator | BusType::Swing);

        if regulates && (controllable || bus_type == BusType::Swing) {
            let regulated = index.get(&machine.controlled_bus()).copied().unwrap_or(i);
            let group = groups.entry(i).or_insert_with(|| RegulatingNode {
                node: i,
                regulated,
                target: machine.vs.value(),
                q_min: 0.0,
                q_max: 0.0,
                q_fixed: 0.0,
            });
            if controllable {
                group.q_min += machine.qmin.value();
                group.q_max += machine.qmax.value();
            } else {
                group.q_fixed += machine.qg.value();
            }
        } else {
            q_spec[i] += machine.qg.value() / base;
            if regulates {
                groups
                    .entry(i)
                    .or_insert_with(|| RegulatingNode {
                        node: i,
                        regulated: i,
                        target: machine.vs.value(),
                        q_min: 0.0,
                        q_max: 0.0,
                        q_fixed: 0.0,
                    })
                    .q_fixed += machine.qg.value();
            }
        }
    }

    let mut regulating: Vec<RegulatingNode> = groups.into_values().collect();
    regulating.sort_by_key(|g| g.node);
    for group in &regulating {
        let has_range = group.q_max > group.q_min;
        if kinds[group.node] == NodeKind::Slack || has_range {
            if kinds[group.node] == NodeKind::Pq {
                kinds[group.node] = NodeKind::Pv;
            }
            setpoints[group.node] = group.target;
        }
    }
    // generator buses with only fixed machines stay PQ
    regulating.retain(|g| kinds[g.node] != NodeKind::Pq);

    CompiledNetwork {
        index,
        buses,
        stars,
        y_bus,
        kinds,
        p_spec,
        q_spec,
        load_q,
        setpoints,
        regulating,
    }
}

struct Solution {
    converged: bool,
    finite: bool,
    voltages: HashMap<BusNumber, (f64, f64)>,
    star_voltages: HashMap<Tx3Key, (f64, f64)>,
    machine_q: HashMap<MachineKey, f64>,
}

type WarmStart<'a> = Option<(&'a HashMap<BusNumber, (f64, f64)>, &'a HashMap<Tx3Key, (f64, f64)>)>;

fn solve_network(
    case: &NetworkCase,
    settings: &SessionSettings,
    backend: &Arc<dyn LinearSystemBackend>,
    warm: WarmStart<'_>,
) -> Result<Solution, SessionError> {
    let mut net = compile(case);
    let n = net.kinds.len();
    let base = case.base_mva;

    let mut v_mag = vec![1.0; n];
    let mut v_ang = vec![0.0; n];
    if let Some((voltages, stars)) = warm {
        for (i, bus) in net.buses.iter().enumerate() {
            if let Some(&(vm, va)) = voltages.get(bus) {
                if vm > 0.0 {
                    v_mag[i] = vm;
                    v_ang[i] = va;
                }
            }
        }
        for (key, i) in &net.stars {
            if let Some(&(vm, va)) = stars.get(key) {
                v_mag[*i] = vm;
                v_ang[*i] = va;
            }
        }
    }

    let newton = NewtonRaphson::new(settings.max_iterations, settings.tolerance_mva / base, backend.clone());
    let mut converged = false;
    for pass in 0..settings.max_limit_iterations.max(1) {
        for i in 0..n {
            if net.kinds[i] != NodeKind::Pq {
                v_mag[i] = net.setpoints[i];
            }
        }
        let result = newton.solve(&net.y_bus, &net.kinds, &net.p_spec, &net.q_spec, &mut v_mag, &mut v_ang);
        converged = result.converged;
        if !converged {
            debug!(max_mismatch = result.max_mismatch, "newton-raphson diverged");
            break;
        }
        let limited = enforce_q_limits(&mut net, &v_mag, &v_ang, base);
        let retargeted = adjust_remote_setpoints(&mut net, &v_mag);
        if !limited && !retargeted {
            break;
        }
        debug!(pass, limited, retargeted, "re-solving after reactive limit or setpoint change");
    }

    let finite = v_mag.iter().chain(v_ang.iter()).all(|v| v.is_finite());
    let mut voltages: HashMap<BusNumber, (f64, f64)> = net
        .buses
        .iter()
        .enumerate()
        .map(|(i, bus)| (*bus, (v_mag[i], v_ang[i])))
        .collect();
    for bus in case.buses.iter().filter(|b| !b.bus_type.in_service()) {
        voltages.insert(bus.number, (0.0, 0.0));
    }
    let star_voltages = net
        .stars
        .iter()
        .map(|(key, i)| (key.clone(), (v_mag[*i], v_ang[*i])))
        .collect();
    let machine_q = if converged && finite {
        machine_outputs(case, &net, &v_mag, &v_ang)
    } else {
        HashMap::new()
    };

    Ok(Solution {
        converged,
        finite,
        voltages,
        star_voltages,
        machine_q,
    })
}

/// Net machine Q (Mvar) each regulating node has to produce.
fn regulating_q(net: &CompiledNetwork, q_calc: &[f64], node: usize, base: f64) -> f64 {
    q_calc[node] * base + net.load_q[node]
}

/// PV nodes whose machines exceed their reactive range become PQ at the
/// violated limit.
fn enforce_q_limits(net: &mut CompiledNetwork, v_mag: &[f64], v_ang: &[f64], base: f64) -> bool {
    let (_, q_calc) = compute_power(&net.y_bus, v_mag, v_ang);
    let mut switched = false;
    for group in &net.regulating {
        if net.kinds[group.node] != NodeKind::Pv {
            continue;
        }
        let q_controllable = regulating_q(net, &q_calc, group.node, base) - group.q_fixed;
        let limit = if q_controllable > group.q_max {
            Some(group.q_max)
        } else if q_controllable < group.q_min {
            Some(group.q_min)
        } else {
            None
        };
        if let Some(limit) = limit {
            debug!(
                bus = %net.buses[group.node],
                q = q_controllable,
                limit,
                "reactive limit reached; PV -> PQ"
            );
            net.kinds[group.node] = NodeKind::Pq;
            net.q_spec[group.node] = (limit + group.q_fixed - net.load_q[group.node]) / base;
            switched = true;
        }
    }
    switched
}

/// Move the local setpoint of remotely regulating PV nodes by the remote
/// voltage error.
fn adjust_remote_setpoints(net: &mut CompiledNetwork, v_mag: &[f64]) -> bool {
    let mut moved = false;
    for group in &net.regulating {
        if group.regulated == group.node || net.kinds[group.node] != NodeKind::Pv {
            continue;
        }
        let error = group.target - v_mag[group.regulated];
        if error.abs() > 1e-4 {
            let local = (net.setpoints[group.node] + error).clamp(0.8, 1.2);
            if (local - net.setpoints[group.node]).abs() > 1e-9 {
                net.setpoints[group.node] = local;
                moved = true;
            }
        }
    }
    moved
}

/// Machine Q after a converged solve. Controllable machines share their
/// node's output in proportion to their reactive range.
fn machine_outputs(case: &NetworkCase, net: &CompiledNetwork, v_mag: &[f64], v_ang: &[f64]) -> HashMap<MachineKey, f64> {
    let base = case.base_mva;
    let (_, q_calc) = compute_power(&net.y_bus, v_mag, v_ang);
    let groups: HashMap<usize, &RegulatingNode> = net.regulating.iter().map(|g| (g.node, g)).collect();

    let mut outputs = HashMap::new();
    for machine in &case.machines {
        let key = machine.key();
        let node = net.index.get(&machine.bus).copied();
        let q = match (machine.status.is_in_service(), node) {
            (true, Some(i)) => match groups.get(&i) {
                Some(group) if machine.qmax > machine.qmin => {
                    let total = regulating_q(net, &q_calc, i, base) - group.q_fixed;
                    let range = group.q_max - group.q_min;
                    let share = if range > 0.0 {
                        (machine.qmax.value() - machine.qmin.value()) / range
                    } else {
                        0.0
                    };
                    total * share
                }
                Some(group) if net.kinds[i] == NodeKind::Slack && group.q_max <= group.q_min => {
                    // swing bus with only fixed machines absorbs the balance
                    let count = case
                        .machines
                        .iter()
                        .filter(|m| m.bus == machine.bus && m.status.is_in_service())
                        .count()
                        .max(1);
                    regulating_q(net, &q_calc, i, base) / count as f64
                }
                _ => machine.qg.value(),
            },
            _ => 0.0,
        };
        outputs.insert(key, q);
    }
    outputs
}

/// One discrete step of every switched shunt and controlling tap whose
/// regulated bus is outside its band. Returns whether anything moved.
fn step_voltage_controls(case: &mut NetworkCase, voltages: &HashMap<BusNumber, (f64, f64)>) -> bool {
    let live = live_buses(case);
    let voltage_at = |bus: BusNumber| -> Option<f64> {
        if live.contains(&bus) {
            voltages.get(&bus).map(|(vm, _)| *vm)
        } else {
            None
        }
    };

    let mut moved = false;
    for shunt in case.switched_shunts.iter_mut().filter(|s| s.status.is_in_service()) {
        let regulated = match shunt.regulated_bus {
            Some(bus) if bus.value() != 0 => bus,
            _ => shunt.bus,
        };
        let (Some(v), true) = (voltage_at(regulated), live.contains(&shunt.bus)) else {
            continue;
        };
        let step = shunt.b_step.value().abs();
        if step <= 0.0 {
            continue;
        }
        let b = shunt.b.value();
        let next = if v < shunt.v_min.value() && b < shunt.b_max.value() {
            (b + step).min(shunt.b_max.value())
        } else if v > shunt.v_max.value() && b > shunt.b_min.value() {
            (b - step).max(shunt.b_min.value())
        } else {
            continue;
        };
        debug!(shunt = %shunt.key(), from = b, to = next, voltage = v, "switched shunt step");
        shunt.b = Megavars(next);
        moved = true;
    }

    for tx in case.transformers_2w.iter_mut().filter(|t| t.status.is_in_service()) {
        let Some(control) = &tx.control else {
            continue;
        };
        let regulated = control.regulated_bus.unwrap_or(tx.to);
        let Some(v) = voltage_at(regulated) else {
            continue;
        };
        let next = if v < control.v_min.value() && tx.ratio > control.ratio_min {
            (tx.ratio - control.step).max(control.ratio_min)
        } else if v > control.v_max.value() && tx.ratio < control.ratio_max {
            (tx.ratio + control.step).min(control.ratio_max)
        } else {
            continue;
        };
        debug!(transformer = %tx.key(), from = tx.ratio, to = next, voltage = v, "tap step");
        tx.ratio = next;
        moved = true;
    }
    moved
}
