use log::debug;
use nalgebra::DVector;
use rand::Rng;
use serde::Serialize;

use crate::core::error::{check_len, PesError, Result};
use crate::dof::Dof;

/// Comparison of finite differences of the energy with the analytic gradient.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaReport {
    /// `|E(x + dx) - E(x)|` per displacement.
    pub numerical: Vec<f64>,
    /// `|(g(x) + g(x + dx))/2 . dx|` per displacement.
    pub analytical: Vec<f64>,
    /// Absolute difference between the two estimates per displacement.
    pub errors: Vec<f64>,
    /// Largest relative error among the displacements whose energy change is
    /// above the median (smaller changes are dominated by rounding).
    pub worst_relative: f64,
}

impl DeltaReport {
    pub fn passes(&self, tolerance: f64) -> bool {
        self.worst_relative < tolerance
    }
}

/// Random displacements with components uniform in `[-eps, eps)`. The
/// components listed in `zero` are kept at zero.
pub fn random_dxs(
    ndof: usize,
    count: usize,
    eps: f64,
    zero: &[usize],
    rng: &mut impl Rng,
) -> Vec<DVector<f64>> {
    (0..count)
        .map(|_| {
            let mut dx = DVector::from_fn(ndof, |_, _| rng.gen_range(-eps..eps));
            for &k in zero.iter().filter(|&&k| k < ndof) {
                dx[k] = 0.0;
            }
            dx
        })
        .collect()
}

/// Tests the analytic gradient of `dof` at `x` along the displacements `dxs`.
///
/// The energy change over each step is compared with the trapezoid estimate
/// built from the gradients at both ends, which is exact up to third order in
/// the step size. The geometry of the DOF is left at `x`.
pub fn check_delta<D: Dof + ?Sized>(dof: &mut D, x: &DVector<f64>, dxs: &[DVector<f64>]) -> Result<DeltaReport> {
    check_len("x", dof.ndof(), x.len())?;
    if dxs.is_empty() {
        return Err(PesError::InvalidParameter {
            name: "number of displacements",
            value: 0.0,
        });
    }
    let (e0, g0) = dof.energy_gradient(x)?;
    let mut numerical = Vec::with_capacity(dxs.len());
    let mut analytical = Vec::with_capacity(dxs.len());
    let mut errors = Vec::with_capacity(dxs.len());
    for dx in dxs {
        check_len("dx", x.len(), dx.len())?;
        let (e1, g1) = dof.energy_gradient(&(x + dx))?;
        let d1 = e1 - e0;
        let d2 = 0.5 * (&g0 + &g1).dot(dx);
        numerical.push(d1.abs());
        analytical.push(d2.abs());
        errors.push((d1 - d2).abs());
    }
    dof.energy(x)?;

    let mut sorted = numerical.clone();
    sorted.sort_by(f64::total_cmp);
    let median = sorted[sorted.len() / 2];
    let worst_relative = numerical
        .iter()
        .zip(&errors)
        .filter(|(n, _)| **n >= median && **n > 0.0)
        .map(|(n, e)| e / n)
        .fold(0.0, f64::max);
    debug!(
        "check_delta: {} displacements, median |dE|={:.3e}, worst relative error={:.3e}",
        dxs.len(),
        median,
        worst_relative
    );
    Ok(DeltaReport {
        numerical,
        analytical,
        errors,
        worst_relative,
    })
}
