use log::info;
use nalgebra::{DMatrix, DVector};

use crate::core::error::{check_non_negative, PesError, Result};
use crate::dof::{CartesianDof, Dof};

/// Estimates the Hessian of a DOF at `x0` with central differences of the
/// analytic gradient. The result is symmetrized and the DOF is reset to `x0`.
pub fn estimate_hessian<D: Dof + ?Sized>(dof: &mut D, eps: f64) -> Result<DMatrix<f64>> {
    check_non_negative("eps", eps)?;
    if eps == 0.0 {
        return Err(PesError::InvalidParameter { name: "eps", value: eps });
    }
    let x0: DVector<f64> = dof.x0().clone();
    let n = x0.len();
    let mut hessian = DMatrix::zeros(n, n);
    for k in 0..n {
        let mut x = x0.clone();
        x[k] = x0[k] + eps;
        let (_, gplus) = dof.energy_gradient(&x)?;
        x[k] = x0[k] - eps;
        let (_, gminus) = dof.energy_gradient(&x)?;
        hessian.set_row(k, &((gplus - gminus) / (2.0 * eps)).transpose());
    }
    dof.reset()?;
    Ok((&hessian + hessian.transpose()) * 0.5)
}

/// Cartesian Hessian of all atoms, or of the selected atoms of the DOF.
pub fn estimate_cart_hessian(dof: &mut CartesianDof, eps: f64) -> Result<DMatrix<f64>> {
    let hessian = estimate_hessian(dof, eps)?;
    info!("Estimated a {0}x{0} Cartesian Hessian", hessian.nrows());
    Ok(hessian)
}
