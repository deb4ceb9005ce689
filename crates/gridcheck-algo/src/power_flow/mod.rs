//! Reference AC power flow.
//!
//! - [`newton`]: Newton-Raphson over a dense admittance matrix
//! - [`session`]: [`NetworkSession`], a [`PowerFlowSession`](crate::session::PowerFlowSession)
//!   over a JSON network case

pub mod newton;
pub mod session;

pub use newton::{NewtonRaphson, NewtonResult, NodeKind, PiBranch};
pub use session::{NetworkSession, SessionSettings};
