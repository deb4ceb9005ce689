use crate::report::StudyReport;
use crate::session::SessionError;
use crate::snapshot::SnapshotError;
use gridcheck_core::{BusNumber, GridError};
use thiserror::Error;

/// Failures of a contingency study.
///
/// Everything except [`StudyError::Config`] is raised after solving began and
/// aborts the rest of the case. Recoverable non-convergence is not an error;
/// it is recorded in the results.
#[derive(Error, Debug)]
pub enum StudyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load case: {0}")]
    CaseLoad(String),

    #[error("base case did not solve ({0}); check case")]
    BaseCase(String),

    #[error("data retrieval failed: {0}")]
    DataRetrieval(String),

    #[error("solver failure: {0}")]
    Solver(String),

    #[error("contingency '{contingency}': buses {buses:?} still isolated after re-solve")]
    PersistentIsland {
        contingency: String,
        buses: Vec<BusNumber>,
    },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// A fatal error part way through the contingency list. `partial` holds
    /// everything recorded before the failure.
    #[error("case aborted at contingency '{contingency}': {source}")]
    CaseAborted {
        contingency: String,
        #[source]
        source: Box<StudyError>,
        partial: Box<StudyReport>,
    },
}

impl StudyError {
    /// Whether this error ends the current case (as opposed to rejecting the
    /// study before anything ran).
    pub fn is_fatal_for_case(&self) -> bool {
        !matches!(self, StudyError::Config(_))
    }

    /// Results recorded before an abort, if any.
    pub fn partial_report(&self) -> Option<&StudyReport> {
        match self {
            StudyError::CaseAborted { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

impl From<SessionError> for StudyError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::CaseLoad { .. } | SessionError::NoCase => {
                StudyError::CaseLoad(err.to_string())
            }
            SessionError::Configuration(msg) => StudyError::Solver(format!(
                "invalid solver configuration: {msg}"
            )),
            SessionError::Retrieval(msg) => StudyError::DataRetrieval(msg),
            SessionError::Solver(msg) => StudyError::Solver(msg),
        }
    }
}

impl From<SnapshotError> for StudyError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Retrieval(inner) => inner.into(),
            other => StudyError::Snapshot(other.to_string()),
        }
    }
}

impl From<GridError> for StudyError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::Config(msg) | GridError::Validation(msg) => StudyError::Config(msg),
            other => StudyError::Solver(other.to_string()),
        }
    }
}

impl From<StudyError> for GridError {
    fn from(err: StudyError) -> Self {
        match err {
            StudyError::Config(msg) => GridError::Config(msg),
            other => GridError::Solver(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_failures_become_data_retrieval_errors() {
        let err: StudyError =
            SnapshotError::Retrieval(SessionError::Retrieval("bus read".into())).into();
        assert!(matches!(err, StudyError::DataRetrieval(_)));
        assert!(err.is_fatal_for_case());
    }

    #[test]
    fn config_errors_are_not_case_fatal() {
        let err: StudyError = GridError::Config("no bands".into()).into();
        assert!(!err.is_fatal_for_case());
        assert!(err.partial_report().is_none());
    }
}
