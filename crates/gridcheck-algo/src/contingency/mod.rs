//! Contingency definition and execution.
//!
//! A contingency switches a set of elements, then the network is solved in
//! two phases:
//!
//! 1. **Step change**: taps and switched shunts locked, modelling the instant
//!    after switching.
//! 2. **Steady state**: controls free to act. A diverged warm solve is retried
//!    from a flat start, then warm again.
//!
//! Optionally a reactive compensation search then lowers machine voltage
//! targets until no bus is above its band. The case is reloaded after every
//! contingency whatever the outcome.

pub mod compensation;
pub mod definition;
pub mod executor;

pub use compensation::{CompensationMode, CompensationOutcome, CompensationSearch, CompensationSettings};
pub use definition::{BusbarSwitch, ContingencyDefinition, ContingencyKind, ContingencySet, Switch};
pub use executor::{ContingencyExecutor, ContingencyResult, ConvergenceMessage, ExecutionState};
