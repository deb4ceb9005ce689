//! JSON network case.
//!
//! The format is a plain serde mapping of a bus-branch model with the element
//! types a contingency study switches. Impedances are per-unit on
//! [`NetworkCase::base_mva`]; shunt and machine quantities are in MW/Mvar.
//!
//! ```json
//! {
//!   "base_mva": 100.0,
//!   "buses": [{"number": 1, "name": "NORTH", "base_kv": 220.0, "bus_type": "swing"}],
//!   "branches": [{"from": 1, "to": 2, "id": "1", "r": 0.001, "x": 0.01, "rate_a": 400.0}]
//! }
//! ```

use crate::error::{GridError, GridResult};
use crate::units::{Kilovolts, Megavars, MegavoltAmperes, Megawatts, PerUnit};
use crate::{BranchKey, BusNumber, BusType, CircuitId, ElementStatus, MachineKey, ShuntKey, Tx3Key};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

fn default_base_mva() -> f64 {
    100.0
}

fn default_one() -> f64 {
    1.0
}

fn default_vm() -> PerUnit {
    PerUnit::ONE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkCase {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_base_mva")]
    pub base_mva: f64,
    pub buses: Vec<CaseBus>,
    #[serde(default)]
    pub loads: Vec<CaseLoad>,
    #[serde(default)]
    pub branches: Vec<CaseBranch>,
    #[serde(default)]
    pub transformers_2w: Vec<CaseTransformer2w>,
    #[serde(default)]
    pub transformers_3w: Vec<CaseTransformer3w>,
    #[serde(default)]
    pub fixed_shunts: Vec<CaseFixedShunt>,
    #[serde(default)]
    pub switched_shunts: Vec<CaseSwitchedShunt>,
    #[serde(default)]
    pub machines: Vec<CaseMachine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseBus {
    pub number: BusNumber,
    #[serde(default)]
    pub name: String,
    pub base_kv: Kilovolts,
    #[serde(default)]
    pub bus_type: BusType,
    #[serde(default = "default_vm")]
    pub vm: PerUnit,
    /// Voltage angle in degrees
    #[serde(default)]
    pub va_deg: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseLoad {
    pub bus: BusNumber,
    #[serde(default = "CaseLoad::default_id")]
    pub id: CircuitId,
    pub p: Megawatts,
    #[serde(default)]
    pub q: Megavars,
    #[serde(default)]
    pub status: ElementStatus,
}

impl CaseLoad {
    fn default_id() -> CircuitId {
        CircuitId::new("1")
    }
}

/// Thermal ratings of a branch or winding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Ratings {
    #[serde(default)]
    pub rate_a: MegavoltAmperes,
    #[serde(default)]
    pub rate_b: MegavoltAmperes,
    #[serde(default)]
    pub rate_c: MegavoltAmperes,
}

/// Which rating set a loading check compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingColumn {
    #[default]
    A,
    B,
    C,
}

impl Ratings {
    pub fn rating(&self, column: RatingColumn) -> MegavoltAmperes {
        match column {
            RatingColumn::A => self.rate_a,
            RatingColumn::B => self.rate_b,
            RatingColumn::C => self.rate_c,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseBranch {
    pub from: BusNumber,
    pub to: BusNumber,
    pub id: CircuitId,
    #[serde(default)]
    pub r: f64,
    pub x: f64,
    /// Total line charging susceptance (pu)
    #[serde(default)]
    pub b: f64,
    #[serde(flatten)]
    pub ratings: Ratings,
    #[serde(default)]
    pub status: ElementStatus,
}

impl CaseBranch {
    pub fn key(&self) -> BranchKey {
        BranchKey {
            from: self.from,
            to: self.to,
            id: self.id.clone(),
        }
    }
}

/// Automatic tap control of a two-winding transformer.
///
/// Only acts when the session solves with taps free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapControl {
    /// Defaults to the `to` bus
    #[serde(default)]
    pub regulated_bus: Option<BusNumber>,
    pub v_min: PerUnit,
    pub v_max: PerUnit,
    #[serde(default = "TapControl::default_ratio_min")]
    pub ratio_min: f64,
    #[serde(default = "TapControl::default_ratio_max")]
    pub ratio_max: f64,
    #[serde(default = "TapControl::default_step")]
    pub step: f64,
}

impl TapControl {
    fn default_ratio_min() -> f64 {
        0.9
    }
    fn default_ratio_max() -> f64 {
        1.1
    }
    fn default_step() -> f64 {
        0.00625
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseTransformer2w {
    pub from: BusNumber,
    pub to: BusNumber,
    pub id: CircuitId,
    #[serde(default)]
    pub r: f64,
    pub x: f64,
    /// Off-nominal ratio on the `from` side
    #[serde(default = "default_one")]
    pub ratio: f64,
    #[serde(default)]
    pub phase_deg: f64,
    #[serde(flatten)]
    pub ratings: Ratings,
    #[serde(default)]
    pub status: ElementStatus,
    #[serde(default)]
    pub control: Option<TapControl>,
}

impl CaseTransformer2w {
    pub fn key(&self) -> BranchKey {
        BranchKey {
            from: self.from,
            to: self.to,
            id: self.id.clone(),
        }
    }
}

/// Star-equivalent winding of a three-winding transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseWinding {
    #[serde(default)]
    pub r: f64,
    pub x: f64,
    #[serde(default = "default_one")]
    pub ratio: f64,
    #[serde(flatten)]
    pub ratings: Ratings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseTransformer3w {
    pub wind1: BusNumber,
    pub wind2: BusNumber,
    pub wind3: BusNumber,
    pub id: CircuitId,
    pub windings: [CaseWinding; 3],
    #[serde(default)]
    pub status: ElementStatus,
}

impl CaseTransformer3w {
    pub fn key(&self) -> Tx3Key {
        Tx3Key {
            wind1: self.wind1,
            wind2: self.wind2,
            wind3: self.wind3,
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseFixedShunt {
    pub bus: BusNumber,
    pub id: CircuitId,
    #[serde(default)]
    pub g: Megawatts,
    /// Injection at 1.0 pu, positive is capacitive
    pub b: Megavars,
    #[serde(default)]
    pub status: ElementStatus,
}

impl CaseFixedShunt {
    pub fn key(&self) -> ShuntKey {
        ShuntKey {
            bus: self.bus,
            id: self.id.clone(),
        }
    }
}

/// Voltage-controlled switched shunt.
///
/// Steps by `b_step` within `[b_min, b_max]` to hold the regulated bus inside
/// `[v_min, v_max]` when the session solves with shunts free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSwitchedShunt {
    pub bus: BusNumber,
    pub id: CircuitId,
    pub b: Megavars,
    pub b_min: Megavars,
    pub b_max: Megavars,
    pub b_step: Megavars,
    pub v_min: PerUnit,
    pub v_max: PerUnit,
    #[serde(default)]
    pub regulated_bus: Option<BusNumber>,
    #[serde(default)]
    pub status: ElementStatus,
}

impl CaseSwitchedShunt {
    pub fn key(&self) -> ShuntKey {
        ShuntKey {
            bus: self.bus,
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseMachine {
    pub bus: BusNumber,
    pub id: CircuitId,
    #[serde(default)]
    pub pg: Megawatts,
    #[serde(default)]
    pub qg: Megavars,
    pub qmax: Megavars,
    pub qmin: Megavars,
    #[serde(default = "default_vm")]
    pub vs: PerUnit,
    /// Remote regulated bus; `None` or bus `0` regulates the terminal
    #[serde(default)]
    pub regulated_bus: Option<BusNumber>,
    #[serde(default)]
    pub status: ElementStatus,
}

impl CaseMachine {
    pub fn key(&self) -> MachineKey {
        MachineKey {
            bus: self.bus,
            id: self.id.clone(),
        }
    }

    /// Regulated bus with the `0 == terminal` convention resolved.
    pub fn controlled_bus(&self) -> BusNumber {
        match self.regulated_bus {
            Some(bus) if bus.value() != 0 => bus,
            _ => self.bus,
        }
    }
}

impl NetworkCase {
    /// Read and validate a case file.
    pub fn from_json_path(path: &Path) -> GridResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let case: NetworkCase = serde_json::from_str(&text)?;
        case.validate()?;
        Ok(case)
    }

    pub fn bus(&self, number: BusNumber) -> Option<&CaseBus> {
        self.buses.iter().find(|bus| bus.number == number)
    }

    /// Structural checks: unique bus numbers, references to existing buses,
    /// a swing bus, non-zero series reactance.
    pub fn validate(&self) -> GridResult<()> {
        if self.buses.is_empty() {
            return Err(GridError::Validation("case has no buses".into()));
        }
        if self.base_mva <= 0.0 {
            return Err(GridError::Validation(format!(
                "base MVA must be positive, got {}",
                self.base_mva
            )));
        }

        let mut numbers = HashSet::new();
        for bus in &self.buses {
            if !numbers.insert(bus.number) {
                return Err(GridError::Validation(format!(
                    "duplicate bus number {}",
                    bus.number
                )));
            }
        }
        if !self.buses.iter().any(|bus| bus.bus_type == BusType::Swing) {
            return Err(GridError::Network("case has no swing bus".into()));
        }

        let check = |bus: BusNumber, what: &str| -> GridResult<()> {
            if numbers.contains(&bus) {
                Ok(())
            } else {
                Err(GridError::Network(format!(
                    "{what} references unknown bus {bus}"
                )))
            }
        };

        for load in &self.loads {
            check(load.bus, "load")?;
        }
        for branch in &self.branches {
            check(branch.from, "circuit")?;
            check(branch.to, "circuit")?;
            if branch.x.abs() < 1e-9 && branch.r.abs() < 1e-9 {
                return Err(GridError::Validation(format!(
                    "circuit {} has zero impedance",
                    branch.key()
                )));
            }
        }
        for tx in &self.transformers_2w {
            check(tx.from, "transformer")?;
            check(tx.to, "transformer")?;
            if tx.x.abs() < 1e-9 && tx.r.abs() < 1e-9 {
                return Err(GridError::Validation(format!(
                    "transformer {} has zero impedance",
                    tx.key()
                )));
            }
            if let Some(control) = &tx.control {
                if let Some(bus) = control.regulated_bus {
                    check(bus, "tap control")?;
                }
                if control.v_min > control.v_max || control.ratio_min > control.ratio_max {
                    return Err(GridError::Validation(format!(
                        "transformer {} has an inverted control range",
                        tx.key()
                    )));
                }
            }
        }
        for tx in &self.transformers_3w {
            for bus in tx.key().buses() {
                check(bus, "3-winding transformer")?;
            }
            if tx.windings.iter().any(|w| w.x.abs() < 1e-9 && w.r.abs() < 1e-9) {
                return Err(GridError::Validation(format!(
                    "3-winding transformer {} has a zero-impedance winding",
                    tx.key()
                )));
            }
        }
        for shunt in &self.fixed_shunts {
            check(shunt.bus, "fixed shunt")?;
        }
        for shunt in &self.switched_shunts {
            check(shunt.bus, "switched shunt")?;
            if let Some(bus) = shunt.regulated_bus {
                check(bus, "switched shunt")?;
            }
            if shunt.b_min > shunt.b_max || shunt.v_min > shunt.v_max {
                return Err(GridError::Validation(format!(
                    "switched shunt {} has an inverted control range",
                    shunt.key()
                )));
            }
        }
        for machine in &self.machines {
            check(machine.bus, "machine")?;
            let controlled = machine.controlled_bus();
            check(controlled, "machine")?;
            if machine.qmin > machine.qmax {
                return Err(GridError::Validation(format!(
                    "machine {} has qmin above qmax",
                    machine.key()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASE: &str = r#"{
        "name": "two-bus",
        "buses": [
            {"number": 1, "name": "NORTH", "base_kv": 220.0, "bus_type": "swing"},
            {"number": 2, "name": "SOUTH", "base_kv": 220.0}
        ],
        "loads": [{"bus": 2, "p": 50.0, "q": 10.0}],
        "branches": [{"from": 1, "to": 2, "id": 1, "x": 0.05, "rate_a": 300.0}],
        "machines": [{"bus": 1, "id": "G1", "qmax": 100.0, "qmin": -50.0, "regulated_bus": 0}]
    }"#;

    #[test]
    fn parses_defaults() {
        let case: NetworkCase = serde_json::from_str(CASE).unwrap();
        case.validate().unwrap();
        assert_eq!(case.base_mva, 100.0);
        assert_eq!(case.buses[1].bus_type, BusType::Load);
        assert_eq!(case.branches[0].id.as_str(), "1");
        assert_eq!(case.branches[0].ratings.rate_a, MegavoltAmperes(300.0));
        assert_eq!(case.branches[0].status, ElementStatus::InService);
        assert_eq!(case.machines[0].controlled_bus(), BusNumber::new(1));
    }

    #[test]
    fn rejects_unknown_bus_reference() {
        let mut case: NetworkCase = serde_json::from_str(CASE).unwrap();
        case.loads[0].bus = BusNumber::new(9);
        let err = case.validate().unwrap_err();
        assert!(err.to_string().contains("unknown bus 9"));
    }

    #[test]
    fn rejects_case_without_swing() {
        let mut case: NetworkCase = serde_json::from_str(CASE).unwrap();
        case.buses[0].bus_type = BusType::Generator;
        assert!(matches!(case.validate(), Err(GridError::Network(_))));
    }

    #[test]
    fn reads_case_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.json");
        std::fs::write(&path, CASE).unwrap();
        let case = NetworkCase::from_json_path(&path).unwrap();
        assert_eq!(case.name, "two-bus");
    }
}
