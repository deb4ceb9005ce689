//! # gridcheck-algo: Contingency Execution & Compliance
//!
//! Runs N-1 style contingency studies against a power-flow session and judges
//! every outcome against voltage and thermal limits.
//!
//! ## Architecture
//!
//! The engine never owns a network model. It talks to a solver through the
//! [`PowerFlowSession`] trait and records what it reads into snapshot tables:
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Solver contract: load, switch, solve, read |
//! | [`snapshot`] | Base-case + per-contingency tables for every element type |
//! | [`contingency`] | Definitions, the per-contingency state machine, reactive compensation search |
//! | [`compliance`] | Voltage bands, step-change limits, loading checks |
//! | [`study`] | Whole-case protocol and compliance aggregation |
//! | [`report`] | Summary rows and flattened dataset tables |
//! | [`power_flow`] | Reference Newton-Raphson session over a JSON network case |
//!
//! ## Example
//!
//! ```ignore
//! use gridcheck_algo::{run_study, BusScope, NetworkSession, SessionSettings, StudySettings};
//!
//! let mut session = NetworkSession::new(SessionSettings::default())?;
//! let report = run_study(
//!     &mut session,
//!     Path::new("winter_peak.json"),
//!     &contingencies,
//!     &BusScope::default(),
//!     &StudySettings::default(),
//! )?;
//! for row in &report.summary {
//!     println!("{}: {}", row.contingency, row.message);
//! }
//! ```

pub mod compliance;
pub mod contingency;
pub mod error;
pub mod power_flow;
pub mod report;
pub mod session;
pub mod snapshot;
pub mod study;
pub mod test_utils;

pub use compliance::{ComplianceThresholds, VoltageBand, VoltageBands};
pub use contingency::{
    CompensationMode, CompensationOutcome, CompensationSettings, ContingencyDefinition,
    ContingencyExecutor, ContingencyKind, ContingencyResult, ContingencySet, ConvergenceMessage,
};
pub use error::StudyError;
pub use power_flow::{NetworkSession, SessionSettings};
pub use report::{ExportTable, StudyReport, SummaryRow};
pub use session::{PowerFlowSession, SessionError, SolveOptions, SolveOutcome};
pub use snapshot::{Dataset, SnapshotStore, BASE_CASE};
pub use study::{run_study, summarise, BusScope, StudySettings};
