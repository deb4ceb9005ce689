//! # gridcheck-core: Network Model Core
//!
//! Element identities, the network case model and shared infrastructure for
//! contingency analysis of transmission networks.
//!
//! ## Element identities
//!
//! Contingency input, solver sessions and snapshot tables all talk about the
//! same elements, so every element type has one key type used everywhere:
//!
//! | Element | Key | Example |
//! |---------|-----|---------|
//! | Bus | [`BusNumber`] | `2204` |
//! | Circuit / 2-winding transformer | [`BranchKey`] | `1-2 '1'` |
//! | 3-winding transformer | [`Tx3Key`] | `10-20-30 'T1'` |
//! | 3-winding transformer winding | [`WindingKey`] | `20 @ 10-20-30 'T1'` |
//! | Fixed / switched shunt | [`ShuntKey`] | `2204 'SH'` |
//! | Machine | [`MachineKey`] | `5464 'SH'` |
//!
//! Circuit ids are normalised on construction (trimmed, integral floats such as
//! `1.0` collapse to `1`) so ids read from spreadsheets and CSV files compare
//! equal to ids stored in the case.
//!
//! ## Modules
//!
//! - [`model`] - JSON network case used by the reference power-flow session
//! - [`diagnostics`] - Warnings and errors collected while running a study
//! - [`graph_utils`] - Island detection over the in-service topology
//! - [`solver`] - Dense linear-system backends for Newton-Raphson updates
//! - [`units`] - Unit newtypes (kV, pu, MVA, Mvar)

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod diagnostics;
pub mod error;
pub mod graph_utils;
pub mod model;
pub mod solver;
pub mod units;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{GridError, GridResult};
pub use graph_utils::{find_islands, IslandAnalysis, IslandSummary};
pub use model::NetworkCase;
pub use solver::{FaerSolver, GaussSolver, LinearSystemBackend, SolverKind};
pub use units::{Kilovolts, Megavars, MegavoltAmperes, Megawatts, PerUnit};

/// Bus number as used in the network case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusNumber(u32);

impl BusNumber {
    #[inline]
    pub fn new(value: u32) -> Self {
        BusNumber(value)
    }
    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for BusNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Circuit or element identifier (`"1"`, `"SH"`, `"T1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CircuitId(String);

impl CircuitId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        // Spreadsheet exports turn circuit "1" into 1.0
        if let Ok(value) = trimmed.parse::<f64>() {
            if value.is_finite() && value.fract() == 0.0 && !trimmed.is_empty() {
                return CircuitId(format!("{}", value as i64));
            }
        }
        CircuitId(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for CircuitId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
            Float(f64),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => CircuitId::new(text),
            Raw::Int(value) => CircuitId::new(value.to_string()),
            Raw::Float(value) => CircuitId::new(value.to_string()),
        })
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Circuit or two-winding transformer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchKey {
    pub from: BusNumber,
    pub to: BusNumber,
    pub id: CircuitId,
}

impl BranchKey {
    pub fn new(from: u32, to: u32, id: impl AsRef<str>) -> Self {
        Self {
            from: BusNumber(from),
            to: BusNumber(to),
            id: CircuitId::new(id),
        }
    }

    /// Same element regardless of the direction it was written in.
    pub fn same_element(&self, other: &BranchKey) -> bool {
        self.id == other.id
            && ((self.from == other.from && self.to == other.to)
                || (self.from == other.to && self.to == other.from))
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} '{}'", self.from, self.to, self.id)
    }
}

/// Three-winding transformer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tx3Key {
    pub wind1: BusNumber,
    pub wind2: BusNumber,
    pub wind3: BusNumber,
    pub id: CircuitId,
}

impl Tx3Key {
    pub fn new(wind1: u32, wind2: u32, wind3: u32, id: impl AsRef<str>) -> Self {
        Self {
            wind1: BusNumber(wind1),
            wind2: BusNumber(wind2),
            wind3: BusNumber(wind3),
            id: CircuitId::new(id),
        }
    }

    pub fn buses(&self) -> [BusNumber; 3] {
        [self.wind1, self.wind2, self.wind3]
    }
}

impl fmt::Display for Tx3Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{} '{}'",
            self.wind1, self.wind2, self.wind3, self.id
        )
    }
}

/// One winding of a three-winding transformer, keyed by the bus it connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindingKey {
    pub winding_bus: BusNumber,
    pub transformer: Tx3Key,
}

impl fmt::Display for WindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.winding_bus, self.transformer)
    }
}

/// Fixed or switched shunt identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShuntKey {
    pub bus: BusNumber,
    pub id: CircuitId,
}

impl ShuntKey {
    pub fn new(bus: u32, id: impl AsRef<str>) -> Self {
        Self {
            bus: BusNumber(bus),
            id: CircuitId::new(id),
        }
    }
}

impl fmt::Display for ShuntKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.bus, self.id)
    }
}

/// Machine identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MachineKey {
    pub bus: BusNumber,
    pub id: CircuitId,
}

impl MachineKey {
    pub fn new(bus: u32, id: impl AsRef<str>) -> Self {
        Self {
            bus: BusNumber(bus),
            id: CircuitId::new(id),
        }
    }
}

impl fmt::Display for MachineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.bus, self.id)
    }
}

/// Any switchable element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementKey {
    Bus(BusNumber),
    Circuit(BranchKey),
    TwoWinding(BranchKey),
    ThreeWinding(Tx3Key),
    FixedShunt(ShuntKey),
    SwitchedShunt(ShuntKey),
    Machine(MachineKey),
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKey::Bus(bus) => write!(f, "Bus {bus}"),
            ElementKey::Circuit(key) => write!(f, "Circuit {key}"),
            ElementKey::TwoWinding(key) => write!(f, "Transformer {key}"),
            ElementKey::ThreeWinding(key) => write!(f, "3-winding transformer {key}"),
            ElementKey::FixedShunt(key) => write!(f, "Fixed shunt {key}"),
            ElementKey::SwitchedShunt(key) => write!(f, "Switched shunt {key}"),
            ElementKey::Machine(key) => write!(f, "Machine {key}"),
        }
    }
}

/// Bus type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    #[default]
    Load,
    Generator,
    Swing,
    Isolated,
}

impl BusType {
    pub fn code(self) -> i32 {
        match self {
            BusType::Load => 1,
            BusType::Generator => 2,
            BusType::Swing => 3,
            BusType::Isolated => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(BusType::Load),
            2 => Some(BusType::Generator),
            3 => Some(BusType::Swing),
            4 => Some(BusType::Isolated),
            _ => None,
        }
    }

    pub fn in_service(self) -> bool {
        self != BusType::Isolated
    }
}

/// In/out of service flag for switchable elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementStatus {
    #[default]
    InService,
    OutOfService,
}

impl ElementStatus {
    pub fn code(self) -> i32 {
        match self {
            ElementStatus::InService => 1,
            ElementStatus::OutOfService => 0,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ElementStatus::OutOfService),
            1 => Some(ElementStatus::InService),
            _ => None,
        }
    }

    pub fn is_in_service(self) -> bool {
        self == ElementStatus::InService
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_ids_normalise_spreadsheet_floats() {
        assert_eq!(CircuitId::new(" 1.0 "), CircuitId::new("1"));
        assert_eq!(CircuitId::new("SH").as_str(), "SH");
        assert_eq!(CircuitId::new("1.5").as_str(), "1.5");
        assert_eq!(CircuitId::new("").as_str(), "");
    }

    #[test]
    fn circuit_id_deserializes_from_numbers() {
        let key: ShuntKey = serde_json::from_str(r#"{"bus": 2204, "id": 1.0}"#).unwrap();
        assert_eq!(key, ShuntKey::new(2204, "1"));
    }

    #[test]
    fn branch_keys_match_in_either_direction() {
        let a = BranchKey::new(1, 2, "1");
        assert!(a.same_element(&BranchKey::new(2, 1, "1")));
        assert!(!a.same_element(&BranchKey::new(1, 2, "2")));
        assert_eq!(a.to_string(), "1-2 '1'");
    }

    #[test]
    fn status_codes_roundtrip() {
        for code in 1..=4 {
            assert_eq!(BusType::from_code(code).map(BusType::code), Some(code));
        }
        assert_eq!(BusType::from_code(7), None);
        assert_eq!(ElementStatus::from_code(0), Some(ElementStatus::OutOfService));
        assert!(!BusType::Isolated.in_service());
    }
}
