//! Power-flow session contract.
//!
//! The contingency engine never touches a network model directly. Everything
//! it needs (loading a case, switching elements, solving, reading results)
//! goes through [`PowerFlowSession`], which holds one mutable network state and
//! is owned exclusively by the study running against it.
//!
//! Reads are restricted to the subsystem set with
//! [`PowerFlowSession::define_subsystem`]: buses in the filter, and elements
//! with at least one terminal bus in the filter. The subsystem survives
//! [`PowerFlowSession::reload_case`].

use gridcheck_core::model::Ratings;
use gridcheck_core::{
    BranchKey, BusNumber, BusType, ElementKey, ElementStatus, GridError, Kilovolts, MachineKey,
    Megavars, MegavoltAmperes, PerUnit, ShuntKey, Tx3Key, WindingKey,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by a session. All of them are fatal for the current case.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to load case {path}: {reason}")]
    CaseLoad { path: PathBuf, reason: String },

    #[error("no case loaded")]
    NoCase,

    #[error("invalid solver configuration: {0}")]
    Configuration(String),

    #[error("data retrieval failed: {0}")]
    Retrieval(String),

    #[error("solver failure: {0}")]
    Solver(String),
}

impl From<SessionError> for GridError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::CaseLoad { .. } => GridError::Parse(err.to_string()),
            SessionError::Configuration(msg) => GridError::Config(msg),
            other => GridError::Solver(other.to_string()),
        }
    }
}

/// How a solve treats voltage controls and its starting point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolveOptions {
    /// Transformer taps and switched shunts held at their present positions.
    pub tap_locked: bool,
    /// Start from 1.0 pu / 0 rad instead of the last solution.
    pub flat_start: bool,
}

impl SolveOptions {
    /// Immediate post-switching state: controls have not had time to act.
    pub const STEP_CHANGE: Self = Self {
        tap_locked: true,
        flat_start: false,
    };
    pub const STEADY_WARM: Self = Self {
        tap_locked: false,
        flat_start: false,
    };
    pub const STEADY_FLAT: Self = Self {
        tap_locked: false,
        flat_start: true,
    };
}

/// Result of one solve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveOutcome {
    pub converged: bool,
    /// Buses found in islands without a swing bus. The session has already
    /// switched them to [`BusType::Isolated`]; the solve did not run.
    pub isolated_buses: Vec<BusNumber>,
}

impl SolveOutcome {
    pub fn converged() -> Self {
        Self {
            converged: true,
            isolated_buses: Vec::new(),
        }
    }

    pub fn diverged() -> Self {
        Self::default()
    }

    pub fn islanded(buses: Vec<BusNumber>) -> Self {
        Self {
            converged: false,
            isolated_buses: buses,
        }
    }

    pub fn has_islands(&self) -> bool {
        !self.isolated_buses.is_empty()
    }
}

/// Bus subsystem definition. Empty `buses` means every bus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusFilter {
    pub buses: Vec<BusNumber>,
    /// Inclusive nominal-voltage range.
    pub kv_range: Option<(Kilovolts, Kilovolts)>,
}

impl BusFilter {
    pub fn admits(&self, bus: BusNumber, base_kv: Kilovolts) -> bool {
        let listed = self.buses.is_empty() || self.buses.contains(&bus);
        let in_range = self
            .kv_range
            .map_or(true, |(lo, hi)| base_kv >= lo && base_kv <= hi);
        listed && in_range
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusRecord {
    pub number: BusNumber,
    pub name: String,
    pub base_kv: Kilovolts,
    pub bus_type: BusType,
    pub voltage: PerUnit,
}

/// Circuit or two-winding transformer.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchRecord {
    pub key: BranchKey,
    pub status: ElementStatus,
    pub ratings: Ratings,
    pub loading: MegavoltAmperes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tx3Record {
    pub key: Tx3Key,
    pub status: ElementStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindingRecord {
    pub key: WindingKey,
    pub status: ElementStatus,
    pub ratings: Ratings,
    pub loading: MegavoltAmperes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShuntRecord {
    pub key: ShuntKey,
    pub status: ElementStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineRecord {
    pub key: MachineKey,
    pub status: ElementStatus,
    pub q: Megavars,
}

/// State change requested on one element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementAction {
    Status(ElementStatus),
    BusType(BusType),
    /// Machine voltage setpoint; bus `0` regulates the machine terminal.
    VoltageTarget {
        target: PerUnit,
        regulated_bus: BusNumber,
    },
    /// Fix machine reactive output (Q, Qmax and Qmin all set to the value).
    ReactiveOutput(Megavars),
}

pub trait PowerFlowSession {
    fn load_case(&mut self, path: &Path) -> Result<(), SessionError>;

    /// Discard every change and reload the last loaded case.
    fn reload_case(&mut self) -> Result<(), SessionError>;

    fn define_subsystem(&mut self, filter: BusFilter) -> Result<(), SessionError>;

    fn solve(&mut self, options: SolveOptions) -> Result<SolveOutcome, SessionError>;

    fn read_buses(&self) -> Result<Vec<BusRecord>, SessionError>;
    fn read_circuits(&self) -> Result<Vec<BranchRecord>, SessionError>;
    fn read_two_winding(&self) -> Result<Vec<BranchRecord>, SessionError>;
    fn read_three_winding(&self) -> Result<Vec<Tx3Record>, SessionError>;
    fn read_windings(&self) -> Result<Vec<WindingRecord>, SessionError>;
    fn read_fixed_shunts(&self) -> Result<Vec<ShuntRecord>, SessionError>;
    fn read_switched_shunts(&self) -> Result<Vec<ShuntRecord>, SessionError>;
    fn read_machines(&self) -> Result<Vec<MachineRecord>, SessionError>;

    /// Apply `action` to `element`. `false` when the element does not exist or
    /// the action does not apply to it.
    fn write_element_state(&mut self, element: &ElementKey, action: &ElementAction) -> bool;
}
