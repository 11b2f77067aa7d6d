use nalgebra::{Matrix3, Vector3};

use crate::core::domain::System;
use crate::core::error::Result;
use crate::engine::neighbors::NeighborList;

/// A contribution to the potential energy surface.
///
/// `compute` returns the energy of the current geometry and, when buffers are
/// given, *adds* the Cartesian gradient (`+dE/dpos`) to `gpos` and the virial
/// tensor (`dE/d strain`) to `vtens`. Terms never clear the buffers and never
/// mutate the system.
pub trait Term: Send {
    fn name(&self) -> &str;

    /// Pair terms request a neighbour list with at least this cutoff.
    fn rcut(&self) -> Option<f64> {
        None
    }

    /// Called by the force field after the positions or the cell changed, so
    /// geometry-dependent caches can be dropped.
    fn geometry_changed(&mut self, _cell_changed: bool) {}

    fn compute(
        &mut self,
        system: &System,
        nlist: Option<&NeighborList>,
        gpos: Option<&mut [Vector3<f64>]>,
        vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64>;
}

/// Accumulates the gradient and virial of a pair interaction.
///
/// `vg` is the derivative of the pair energy with respect to the distance,
/// divided by the distance; `delta = pos[j] - pos[i]`.
#[inline]
pub(crate) fn accumulate_pair(
    i: usize,
    j: usize,
    delta: &Vector3<f64>,
    vg: f64,
    gpos: Option<&mut [Vector3<f64>]>,
    vtens: Option<&mut Matrix3<f64>>,
) {
    if let Some(gpos) = gpos {
        let g = delta * vg;
        gpos[j] += g;
        gpos[i] -= g;
    }
    if let Some(vtens) = vtens {
        *vtens += delta * delta.transpose() * vg;
    }
}
