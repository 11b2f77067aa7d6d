pub mod cartesian;
pub mod cell;
pub mod convergence;

pub use cartesian::CartesianDof;
pub use cell::{AnisoCell, AnisoCellDof, CellDof, CellParametrization, FullCell, FullCellDof, IsoCell, IsoCellDof};
pub use convergence::{ConvergenceReport, Measure, Metric};

use nalgebra::DVector;

use crate::core::error::Result;
use crate::engine::forcefield::SumForceField;

/// A set of degrees of freedom that maps a flat parameter vector onto the
/// geometry of a force field, so that generic minimizers can work with it.
pub trait Dof {
    /// The parameters of the geometry at construction time.
    fn x0(&self) -> &DVector<f64>;

    fn ndof(&self) -> usize {
        self.x0().len()
    }

    /// Updates the geometry and returns the energy.
    fn energy(&mut self, x: &DVector<f64>) -> Result<f64>;

    /// Updates the geometry and returns the energy and its gradient with
    /// respect to `x`.
    fn energy_gradient(&mut self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)>;

    fn fun(&mut self, x: &DVector<f64>, do_gradient: bool) -> Result<(f64, Option<DVector<f64>>)> {
        if do_gradient {
            let (e, g) = self.energy_gradient(x)?;
            Ok((e, Some(g)))
        } else {
            Ok((self.energy(x)?, None))
        }
    }

    /// Restores the geometry of `x0` and forgets the convergence history.
    fn reset(&mut self) -> Result<()>;

    /// Compares the gradient of the last `energy_gradient` call and the
    /// displacement since the previous check with the thresholds. The first
    /// call only records the geometry.
    fn check_convergence(&mut self) -> Result<ConvergenceReport>;

    fn ff(&self) -> &SumForceField;
}
