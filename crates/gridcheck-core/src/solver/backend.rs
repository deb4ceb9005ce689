use crate::error::{GridError, GridResult};
use faer::{prelude::*, solvers::PartialPivLu, Mat};

/// Solves dense linear systems (Ax = b).
///
/// The Jacobians of the reference session are small and dense, so the
/// interface stays at `Vec<Vec<f64>>`.
pub trait LinearSystemBackend: Send + Sync {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> GridResult<Vec<f64>>;
}

fn check_dimensions(matrix: &[Vec<f64>], rhs: &[f64]) -> GridResult<usize> {
    let n = matrix.len();
    if rhs.len() != n {
        return Err(GridError::Solver(format!(
            "rhs length ({}) does not match matrix dimension {}",
            rhs.len(),
            n
        )));
    }
    if matrix.iter().any(|row| row.len() != n) {
        return Err(GridError::Solver("matrix must be square".into()));
    }
    Ok(n)
}

/// Gauss-Jordan elimination with partial pivoting.
#[derive(Debug, Clone, Default)]
pub struct GaussSolver;

impl LinearSystemBackend for GaussSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> GridResult<Vec<f64>> {
        let n = check_dimensions(matrix, rhs)?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut a = matrix.to_vec();
        let mut b = rhs.to_vec();

        for i in 0..n {
            let mut pivot = i;
            for row in i + 1..n {
                if a[row][i].abs() > a[pivot][i].abs() {
                    pivot = row;
                }
            }
            if pivot != i {
                a.swap(i, pivot);
                b.swap(i, pivot);
            }

            let diag = a[i][i];
            if diag.abs() < 1e-12 {
                return Err(GridError::Solver("singular matrix".into()));
            }

            for value in a[i][i..].iter_mut() {
                *value /= diag;
            }
            b[i] /= diag;

            let pivot_segment = a[i][i..].to_vec();
            for row in 0..n {
                if row == i {
                    continue;
                }
                let factor = a[row][i];
                if factor == 0.0 {
                    continue;
                }
                for (target, &pivot) in a[row][i..].iter_mut().zip(pivot_segment.iter()) {
                    *target -= factor * pivot;
                }
                b[row] -= factor * b[i];
            }
        }

        Ok(b)
    }
}

/// LU with partial pivoting from `faer`.
#[derive(Debug, Clone, Default)]
pub struct FaerSolver;

impl LinearSystemBackend for FaerSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> GridResult<Vec<f64>> {
        let n = check_dimensions(matrix, rhs)?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let mat = Mat::from_fn(n, n, |i, j| matrix[i][j]);
        let rhs_mat = Mat::from_fn(n, 1, |i, _| rhs[i]);
        let lu = PartialPivLu::new(mat.as_ref());
        let sol = lu.solve(&rhs_mat);

        let mut solution = Vec::with_capacity(n);
        for i in 0..n {
            solution.push(sol.read(i, 0));
        }
        // faer does not report singularity; it shows up as non-finite entries
        if solution.iter().any(|value| !value.is_finite()) {
            return Err(GridError::Solver("singular matrix".into()));
        }
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauss_pivots_on_zero_diagonal() {
        let matrix = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let x = GaussSolver.solve(&matrix, &[3.0, 5.0]).unwrap();
        assert_eq!(x, vec![5.0, 3.0]);
    }

    #[test]
    fn gauss_reports_singular_matrix() {
        let matrix = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        let err = GaussSolver.solve(&matrix, &[1.0, 1.0]).unwrap_err();
        assert!(err.to_string().contains("singular"));
    }

    #[test]
    fn rejects_mismatched_rhs() {
        let matrix = vec![vec![1.0]];
        assert!(GaussSolver.solve(&matrix, &[1.0, 2.0]).is_err());
        assert!(FaerSolver.solve(&matrix, &[1.0, 2.0]).is_err());
    }
}
