use nalgebra::Vector3;

use crate::core::domain::Cell;

/// Fractional coordinates of all positions in the completed cell basis.
pub fn to_fractional(cell: &Cell, pos: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    pos.iter().map(|p| cell.to_fractional(p)).collect()
}

/// Wraps positions into the [0, 1) fractional box along periodic axes.
/// For an aperiodic cell the geometric center is moved to the origin.
///
/// **Invariant**: Modifies positions in-place. Does NOT reorder atoms.
pub fn wrap_or_center(cell: &Cell, pos: &mut [Vector3<f64>]) {
    if cell.nvec() > 0 {
        for p in pos.iter_mut() {
            let mut frac = cell.to_fractional(p);
            for a in 0..cell.nvec() {
                frac[a] = frac[a].rem_euclid(1.0);
            }
            *p = cell.to_cartesian(&frac);
        }
    } else {
        if pos.is_empty() {
            return;
        }
        let center = pos.iter().sum::<Vector3<f64>>() / pos.len() as f64;
        for p in pos.iter_mut() {
            *p -= center;
        }
    }
}
