//! Dense linear-system backends used by the Newton-Raphson update step.

pub mod backend;
pub mod registry;

pub use backend::{FaerSolver, GaussSolver, LinearSystemBackend};
pub use registry::SolverKind;
