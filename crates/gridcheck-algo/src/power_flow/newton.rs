//! Newton-Raphson iteration in polar form.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  J × [Δθ, ΔV]ᵀ = [ΔP, ΔQ]ᵀ                                    │
//! │                                                              │
//! │  J = [ ∂P/∂θ   ∂P/∂V ]   P rows: every non-slack node        │
//! │      [ ∂Q/∂θ   ∂Q/∂V ]   Q rows: PQ nodes only               │
//! │                                                              │
//! │  P_i = Σ V_i V_j (G_ij cos θ_ij + B_ij sin θ_ij)             │
//! │  Q_i = Σ V_i V_j (G_ij sin θ_ij − B_ij cos θ_ij)             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The admittance matrix is dense `(G, B)` pairs; the linear step goes
//! through a [`LinearSystemBackend`].

use gridcheck_core::{GridResult, LinearSystemBackend};
use num_complex::Complex64;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Slack,
    Pv,
    Pq,
}

/// Dense bus admittance matrix, `y[i][j] = (G_ij, B_ij)`.
pub type AdmittanceMatrix = Vec<Vec<(f64, f64)>>;

/// Two-port pi model: series admittance, total charging, off-nominal tap on
/// the `from` side.
#[derive(Debug, Clone, Copy)]
pub struct PiBranch {
    pub from: usize,
    pub to: usize,
    pub y_series: Complex64,
    pub b_charging: f64,
    pub tap: Complex64,
}

impl PiBranch {
    pub fn new(from: usize, to: usize, r: f64, x: f64, b_charging: f64, ratio: f64, shift_rad: f64) -> Self {
        let ratio = if ratio > 0.0 { ratio } else { 1.0 };
        Self {
            from,
            to,
            y_series: Complex64::new(r, x).inv(),
            b_charging,
            tap: Complex64::from_polar(ratio, shift_rad),
        }
    }

    pub fn stamp(&self, y_bus: &mut AdmittanceMatrix) {
        let (i, j) = (self.from, self.to);
        let b_half = Complex64::new(0.0, self.b_charging / 2.0);
        let tap_mag_sq = self.tap.norm_sqr();

        let y_ij = -(self.y_series / self.tap.conj());
        let y_ji = -(self.y_series / self.tap);
        let y_ii = self.y_series / tap_mag_sq + b_half;
        let y_jj = self.y_series + b_half;

        add(&mut y_bus[i][j], y_ij);
        add(&mut y_bus[j][i], y_ji);
        add(&mut y_bus[i][i], y_ii);
        add(&mut y_bus[j][j], y_jj);
    }

    /// Complex power entering the branch at each end, per unit.
    pub fn end_flows(&self, v_mag: &[f64], v_ang: &[f64]) -> (Complex64, Complex64) {
        let v_f = Complex64::from_polar(v_mag[self.from], v_ang[self.from]);
        let v_t = Complex64::from_polar(v_mag[self.to], v_ang[self.to]);
        let b_half = Complex64::new(0.0, self.b_charging / 2.0);
        let i_f = (self.y_series / self.tap.norm_sqr() + b_half) * v_f
            - (self.y_series / self.tap.conj()) * v_t;
        let i_t = -(self.y_series / self.tap) * v_f + (self.y_series + b_half) * v_t;
        (v_f * i_f.conj(), v_t * i_t.conj())
    }

    /// Apparent power loading: the larger of the two ends, per unit.
    pub fn loading(&self, v_mag: &[f64], v_ang: &[f64]) -> f64 {
        let (s_from, s_to) = self.end_flows(v_mag, v_ang);
        s_from.norm().max(s_to.norm())
    }
}

fn add(cell: &mut (f64, f64), y: Complex64) {
    cell.0 += y.re;
    cell.1 += y.im;
}

/// Diagonal shunt admittance (per unit) at node `i`.
pub fn stamp_shunt(y_bus: &mut AdmittanceMatrix, i: usize, g: f64, b: f64) {
    add(&mut y_bus[i][i], Complex64::new(g, b));
}

/// Newton-Raphson iteration result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonResult {
    pub converged: bool,
    pub iterations: usize,
    pub max_mismatch: f64,
}

pub struct NewtonRaphson {
    max_iterations: usize,
    tolerance: f64,
    backend: Arc<dyn LinearSystemBackend>,
}

impl NewtonRaphson {
    /// `tolerance` is the largest acceptable P/Q mismatch in per unit.
    pub fn new(max_iterations: usize, tolerance: f64, backend: Arc<dyn LinearSystemBackend>) -> Self {
        Self {
            max_iterations,
            tolerance,
            backend,
        }
    }

    /// Iterate in place on `v_mag`/`v_ang`. A singular Jacobian or a
    /// non-finite update counts as divergence.
    pub fn solve(
        &self,
        y_bus: &AdmittanceMatrix,
        kinds: &[NodeKind],
        p_spec: &[f64],
        q_spec: &[f64],
        v_mag: &mut [f64],
        v_ang: &mut [f64],
    ) -> NewtonResult {
        let p_nodes: Vec<usize> = (0..kinds.len())
            .filter(|&i| kinds[i] != NodeKind::Slack)
            .collect();
        let q_nodes: Vec<usize> = (0..kinds.len())
            .filter(|&i| kinds[i] == NodeKind::Pq)
            .collect();
        let n_p = p_nodes.len();
        let n_vars = n_p + q_nodes.len();

        if n_vars == 0 {
            return NewtonResult {
                converged: true,
                iterations: 0,
                max_mismatch: 0.0,
            };
        }

        let mut max_mismatch = f64::INFINITY;
        for iter in 0..self.max_iterations {
            let (p_calc, q_calc) = compute_power(y_bus, v_mag, v_ang);

            let mut mismatch = vec![0.0; n_vars];
            max_mismatch = 0.0;
            for (k, &i) in p_nodes.iter().enumerate() {
                mismatch[k] = p_spec[i] - p_calc[i];
                max_mismatch = max_mismatch.max(mismatch[k].abs());
            }
            for (k, &i) in q_nodes.iter().enumerate() {
                mismatch[n_p + k] = q_spec[i] - q_calc[i];
                max_mismatch = max_mismatch.max(mismatch[n_p + k].abs());
            }

            if !max_mismatch.is_finite() {
                break;
            }
            if max_mismatch < self.tolerance {
                return NewtonResult {
                    converged: true,
                    iterations: iter,
                    max_mismatch,
                };
            }

            let jacobian = build_jacobian(y_bus, v_mag, v_ang, &p_nodes, &q_nodes);
            let delta: GridResult<Vec<f64>> = self.backend.solve(&jacobian, &mismatch);
            let Ok(delta) = delta else {
                break;
            };

            for (k, &i) in p_nodes.iter().enumerate() {
                v_ang[i] += delta[k];
            }
            for (k, &i) in q_nodes.iter().enumerate() {
                v_mag[i] += delta[n_p + k];
            }
        }

        NewtonResult {
            converged: false,
            iterations: self.max_iterations,
            max_mismatch,
        }
    }
}

/// P and Q injections at the current voltages.
pub fn compute_power(y_bus: &AdmittanceMatrix, v_mag: &[f64], v_ang: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = v_mag.len();
    let mut p = vec![0.0; n];
    let mut q = vec![0.0; n];
    for i in 0..n {
        for j in 0..n {
            let (g_ij, b_ij) = y_bus[i][j];
            if g_ij == 0.0 && b_ij == 0.0 {
                continue;
            }
            let theta_ij = v_ang[i] - v_ang[j];
            let (sin_t, cos_t) = theta_ij.sin_cos();
            p[i] += v_mag[i] * v_mag[j] * (g_ij * cos_t + b_ij * sin_t);
            q[i] += v_mag[i] * v_mag[j] * (g_ij * sin_t - b_ij * cos_t);
        }
    }
    (p, q)
}

fn build_jacobian(
    y_bus: &AdmittanceMatrix,
    v_mag: &[f64],
    v_ang: &[f64],
    p_nodes: &[usize],
    q_nodes: &[usize],
) -> Vec<Vec<f64>> {
    let (p_calc, q_calc) = compute_power(y_bus, v_mag, v_ang);
    let n_p = p_nodes.len();
    let n_vars = n_p + q_nodes.len();
    let mut jacobian = vec![vec![0.0; n_vars]; n_vars];

    // J11: ∂P/∂θ
    for (row, &i) in p_nodes.iter().enumerate() {
        for (col, &j) in p_nodes.iter().enumerate() {
            jacobian[row][col] = dp_dtheta(y_bus, v_mag, v_ang, &q_calc, i, j);
        }
    }
    // J12: ∂P/∂V
    for (row, &i) in p_nodes.iter().enumerate() {
        for (col, &j) in q_nodes.iter().enumerate() {
            jacobian[row][n_p + col] = dp_dv(y_bus, v_mag, v_ang, &p_calc, i, j);
        }
    }
    // J21: ∂Q/∂θ
    for (row, &i) in q_nodes.iter().enumerate() {
        for (col, &j) in p_nodes.iter().enumerate() {
            jacobian[n_p + row][col] = dq_dtheta(y_bus, v_mag, v_ang, &p_calc, i, j);
        }
    }
    // J22: ∂Q/∂V
    for (row, &i) in q_nodes.iter().enumerate() {
        for (col, &j) in q_nodes.iter().enumerate() {
            jacobian[n_p + row][n_p + col] = dq_dv(y_bus, v_mag, v_ang, &q_calc, i, j);
        }
    }
    jacobian
}

fn dp_dtheta(y_bus: &AdmittanceMatrix, v_mag: &[f64], v_ang: &[f64], q: &[f64], i: usize, j: usize) -> f64 {
    let (g_ij, b_ij) = y_bus[i][j];
    if i == j {
        -q[i] - b_ij * v_mag[i] * v_mag[i]
    } else {
        let theta_ij = v_ang[i] - v_ang[j];
        v_mag[i] * v_mag[j] * (g_ij * theta_ij.sin() - b_ij * theta_ij.cos())
    }
}

fn dp_dv(y_bus: &AdmittanceMatrix, v_mag: &[f64], v_ang: &[f64], p: &[f64], i: usize, j: usize) -> f64 {
    let (g_ij, b_ij) = y_bus[i][j];
    if i == j {
        p[i] / v_mag[i] + g_ij * v_mag[i]
    } else {
        let theta_ij = v_ang[i] - v_ang[j];
        v_mag[i] * (g_ij * theta_ij.cos() + b_ij * theta_ij.sin())
    }
}

fn dq_dtheta(y_bus: &AdmittanceMatrix, v_mag: &[f64], v_ang: &[f64], p: &[f64], i: usize, j: usize) -> f64 {
    let (g_ij, b_ij) = y_bus[i][j];
    if i == j {
        p[i] - g_ij * v_mag[i] * v_mag[i]
    } else {
        let theta_ij = v_ang[i] - v_ang[j];
        -v_mag[i] * v_mag[j] * (g_ij * theta_ij.cos() + b_ij * theta_ij.sin())
    }
}

fn dq_dv(y_bus: &AdmittanceMatrix, v_mag: &[f64], v_ang: &[f64], q: &[f64], i: usize, j: usize) -> f64 {
    let (g_ij, b_ij) = y_bus[i][j];
    if i == j {
        q[i] / v_mag[i] - b_ij * v_mag[i]
    } else {
        let theta_ij = v_ang[i] - v_ang[j];
        v_mag[i] * (g_ij * theta_ij.sin() - b_ij * theta_ij.cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcheck_core::SolverKind;

    fn two_bus(load_p: f64, load_q: f64) -> (AdmittanceMatrix, Vec<NodeKind>, Vec<f64>, Vec<f64>) {
        let mut y_bus = vec![vec![(0.0, 0.0); 2]; 2];
        PiBranch::new(0, 1, 0.01, 0.1, 0.0, 1.0, 0.0).stamp(&mut y_bus);
        (
            y_bus,
            vec![NodeKind::Slack, NodeKind::Pq],
            vec![0.0, -load_p],
            vec![0.0, -load_q],
        )
    }

    #[test]
    fn two_bus_load_converges_below_slack_voltage() {
        for kind in [SolverKind::Gauss, SolverKind::Faer] {
            let (y_bus, kinds, p, q) = two_bus(0.5, 0.2);
            let mut v_mag = vec![1.0, 1.0];
            let mut v_ang = vec![0.0, 0.0];
            let result = NewtonRaphson::new(20, 1e-8, kind.build_solver())
                .solve(&y_bus, &kinds, &p, &q, &mut v_mag, &mut v_ang);
            assert!(result.converged, "{kind:?} did not converge");
            assert!(v_mag[1] < 1.0 && v_mag[1] > 0.9);
            assert!(v_ang[1] < 0.0);

            let (p_calc, q_calc) = compute_power(&y_bus, &v_mag, &v_ang);
            assert!((p_calc[1] + 0.5).abs() < 1e-6);
            assert!((q_calc[1] + 0.2).abs() < 1e-6);
        }
    }

    #[test]
    fn impossible_load_diverges() {
        let (y_bus, kinds, p, q) = two_bus(50.0, 20.0);
        let mut v_mag = vec![1.0, 1.0];
        let mut v_ang = vec![0.0, 0.0];
        let result = NewtonRaphson::new(30, 1e-8, SolverKind::Gauss.build_solver())
            .solve(&y_bus, &kinds, &p, &q, &mut v_mag, &mut v_ang);
        assert!(!result.converged);
    }

    #[test]
    fn end_flows_balance_on_lossless_line() {
        let branch = PiBranch::new(0, 1, 0.0, 0.1, 0.0, 1.0, 0.0);
        let (s_from, s_to) = branch.end_flows(&[1.0, 1.0], &[0.0, -0.05]);
        assert!((s_from.re + s_to.re).abs() < 1e-12);
        assert!(s_from.re > 0.0);
        assert!((branch.loading(&[1.0, 1.0], &[0.0, -0.05]) - s_from.norm().max(s_to.norm())).abs() < 1e-12);
    }
}
