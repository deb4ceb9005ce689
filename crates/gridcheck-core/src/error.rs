//! Error type shared by the gridcheck crates.
//!
//! [`GridError`] is the common error representation at crate boundaries.
//! Domain-specific errors (solver sessions, snapshot tables, study runs) are
//! defined next to the code that raises them and convert into `GridError`
//! where they cross into generic code.
//!
//! # Example
//!
//! ```ignore
//! use gridcheck_core::{GridError, GridResult};
//!
//! fn load(path: &str) -> GridResult<NetworkCase> {
//!     let text = std::fs::read_to_string(path)?;
//!     Ok(serde_json::from_str(&text)?)
//! }
//! ```

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed case or input file
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input that parsed but cannot be studied
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Topology problems such as a case without a swing bus
    #[error("Network error: {0}")]
    Network(String),
}

pub type GridResult<T> = Result<T, GridError>;

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Parse(err.to_string())
    }
}
