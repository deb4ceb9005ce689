use super::backend::{FaerSolver, GaussSolver, LinearSystemBackend};
use crate::error::{GridError, GridResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Registry of available linear-system backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    #[default]
    Gauss,
    Faer,
}

impl SolverKind {
    pub fn parse(input: &str) -> GridResult<Self> {
        match input.to_ascii_lowercase().as_str() {
            "gauss" | "default" => Ok(SolverKind::Gauss),
            "faer" => Ok(SolverKind::Faer),
            other => Err(GridError::Config(format!(
                "unknown linear solver '{}'; supported values: {}",
                other,
                Self::available().join(", ")
            ))),
        }
    }

    pub fn build_solver(self) -> Arc<dyn LinearSystemBackend> {
        match self {
            SolverKind::Gauss => Arc::new(GaussSolver),
            SolverKind::Faer => Arc::new(FaerSolver),
        }
    }

    pub fn available() -> &'static [&'static str] {
        &["gauss", "faer"]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolverKind::Gauss => "gauss",
            SolverKind::Faer => "faer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_kind_parsing_supports_all_engines() {
        assert_eq!(SolverKind::parse("gauss").unwrap(), SolverKind::Gauss);
        assert_eq!(SolverKind::parse("FAER").unwrap(), SolverKind::Faer);
        assert!(matches!(
            SolverKind::parse("unknown"),
            Err(GridError::Config(_))
        ));
    }

    #[test]
    fn solver_backend_options_solve_diagonal_system() {
        let matrix = vec![vec![2.0, 0.0], vec![0.0, 3.0]];
        let rhs = vec![4.0, 6.0];

        for kind in [SolverKind::Gauss, SolverKind::Faer] {
            let solver = kind.build_solver();
            let x = solver.solve(&matrix, &rhs).unwrap();
            assert!((x[0] - 2.0).abs() < 1e-12 && (x[1] - 2.0).abs() < 1e-12);
        }
    }
}
