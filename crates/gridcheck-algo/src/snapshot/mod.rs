//! Per element-type snapshot tables.
//!
//! Every table carries a base-case column captured once, before any
//! contingency runs, plus one column per contingency in the order the
//! contingencies were processed. Columns are only ever appended; the one
//! exception is the bus state column of the contingency being processed, which
//! is amended when the solver islands buses.

pub mod store;
pub mod table;

pub use store::{BusInfo, Dataset, SnapshotStore};
pub use table::{Column, SnapshotTable};

use crate::session::SessionError;
use thiserror::Error;

/// Column name of the base case in every table.
pub const BASE_CASE: &str = "BASE_CASE";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("'{0}' is reserved for the base case")]
    ReservedName(String),

    #[error("a column named '{0}' already exists")]
    DuplicateColumn(String),

    #[error("no column named '{0}'")]
    MissingColumn(String),

    #[error("the base-case column cannot be changed once captured")]
    BaseImmutable,

    #[error(transparent)]
    Retrieval(#[from] SessionError),
}
