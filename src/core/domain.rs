use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::error::{check_len, PesError, Result};
use crate::core::topology::Topology;

// --- Periodic Boundary Conditions ---

/// A periodic cell with zero to three lattice vectors.
///
/// Lattice vectors are stored as the rows of a 3x3 matrix. When fewer than
/// three vectors are present, the remaining rows are filled with an
/// orthonormal complement so that fractional coordinates are defined along
/// every Cartesian direction. The reciprocal rows always satisfy
/// `rvec(i) . gvec(j) == delta_ij` and are recomputed together with the
/// lattice vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    nvec: usize,
    rfull: Matrix3<f64>,
    gfull: Matrix3<f64>,
}

impl Cell {
    pub fn new(rvecs: &[Vector3<f64>]) -> Result<Self> {
        let nvec = rvecs.len();
        let rfull = match nvec {
            0 => Matrix3::identity(),
            1 => {
                let a = rvecs[0];
                if a.norm() == 0.0 {
                    return Err(PesError::DegenerateCell);
                }
                // Cross with the Cartesian axis least aligned with `a`.
                let axis = a.iamin();
                let e = Vector3::ith(axis, 1.0);
                let u1 = a.cross(&e).normalize();
                let u2 = a.cross(&u1).normalize();
                Matrix3::from_rows(&[a.transpose(), u1.transpose(), u2.transpose()])
            }
            2 => {
                let (a, b) = (rvecs[0], rvecs[1]);
                let n = a.cross(&b);
                if n.norm() <= f64::EPSILON * a.norm() * b.norm() {
                    return Err(PesError::DegenerateCell);
                }
                Matrix3::from_rows(&[a.transpose(), b.transpose(), n.normalize().transpose()])
            }
            3 => {
                let m = Matrix3::from_rows(&[
                    rvecs[0].transpose(),
                    rvecs[1].transpose(),
                    rvecs[2].transpose(),
                ]);
                let scale = rvecs[0].norm() * rvecs[1].norm() * rvecs[2].norm();
                if m.determinant().abs() <= 1e-12 * scale {
                    return Err(PesError::DegenerateCell);
                }
                m
            }
            n => return Err(PesError::TooManyCellVectors(n)),
        };
        let gfull = rfull
            .try_inverse()
            .ok_or(PesError::DegenerateCell)?
            .transpose();
        Ok(Self { nvec, rfull, gfull })
    }

    /// An aperiodic "cell".
    pub fn empty() -> Self {
        Self {
            nvec: 0,
            rfull: Matrix3::identity(),
            gfull: Matrix3::identity(),
        }
    }

    pub fn nvec(&self) -> usize {
        self.nvec
    }

    pub fn rvec(&self, i: usize) -> Vector3<f64> {
        self.rfull.row(i).transpose()
    }

    pub fn gvec(&self, i: usize) -> Vector3<f64> {
        self.gfull.row(i).transpose()
    }

    /// The lattice vectors (only the periodic ones).
    pub fn rvecs(&self) -> Vec<Vector3<f64>> {
        (0..self.nvec).map(|i| self.rvec(i)).collect()
    }

    /// Lattice vectors completed with the orthonormal complement, as rows.
    pub fn rvecs_full(&self) -> &Matrix3<f64> {
        &self.rfull
    }

    /// Reciprocal vectors of the completed basis, as rows.
    pub fn gvecs_full(&self) -> &Matrix3<f64> {
        &self.gfull
    }

    /// Volume of the cell, only defined for three lattice vectors.
    pub fn volume(&self) -> Option<f64> {
        (self.nvec == 3).then(|| self.rfull.determinant().abs())
    }

    /// Distances between consecutive lattice planes, per periodic axis.
    pub fn rspacings(&self) -> Vec<f64> {
        (0..self.nvec).map(|i| 1.0 / self.gvec(i).norm()).collect()
    }

    /// Distances between consecutive reciprocal lattice planes, per periodic axis.
    pub fn gspacings(&self) -> Vec<f64> {
        (0..self.nvec).map(|i| 1.0 / self.rvec(i).norm()).collect()
    }

    pub fn to_fractional(&self, r: &Vector3<f64>) -> Vector3<f64> {
        self.gfull * r
    }

    pub fn to_cartesian(&self, frac: &Vector3<f64>) -> Vector3<f64> {
        self.rfull.transpose() * frac
    }

    /// Applies the minimum image convention to a relative vector, in place.
    /// Only the periodic directions are wrapped.
    pub fn mic(&self, delta: &mut Vector3<f64>) {
        if self.nvec == 0 {
            return;
        }
        let frac = self.gfull * *delta;
        for a in 0..self.nvec {
            let n = frac[a].round();
            if n != 0.0 {
                *delta -= self.rvec(a) * n;
            }
        }
    }

    /// Number of periodic images along each axis needed to find every image
    /// of a minimum-image vector within `rcut`. Non-periodic axes get zero.
    pub fn image_ranges(&self, rcut: f64) -> [i32; 3] {
        let mut ranges = [0; 3];
        for (a, spacing) in self.rspacings().into_iter().enumerate() {
            ranges[a] = (rcut / spacing + 0.5).ceil() as i32;
        }
        ranges
    }

    /// Builds a cell with new lattice vectors. The number of vectors is fixed
    /// for the lifetime of a cell.
    pub fn with_rvecs(&self, rvecs: &[Vector3<f64>]) -> Result<Self> {
        if rvecs.len() != self.nvec {
            return Err(PesError::CellDimensionChanged {
                expected: self.nvec,
                found: rvecs.len(),
            });
        }
        Cell::new(rvecs)
    }
}

// --- The Core Entity ---

/// Geometry and static per-atom properties of an atomistic system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
    numbers: Vec<u8>,
    pos: Vec<Vector3<f64>>,
    cell: Cell,
    charges: Option<Vec<f64>>,
    masses: Option<Vec<f64>>,
    bonds: Vec<[usize; 2]>,
    topology: Option<Topology>,
}

impl System {
    pub fn new(numbers: Vec<u8>, pos: Vec<Vector3<f64>>, rvecs: &[Vector3<f64>]) -> Result<Self> {
        check_len("positions", numbers.len(), pos.len())?;
        if pos.iter().any(|p| p.iter().any(|c| !c.is_finite())) {
            return Err(PesError::InvalidParameter {
                name: "position",
                value: f64::NAN,
            });
        }
        Ok(Self {
            numbers,
            pos,
            cell: Cell::new(rvecs)?,
            charges: None,
            masses: None,
            bonds: Vec::new(),
            topology: None,
        })
    }

    pub fn with_charges(mut self, charges: Vec<f64>) -> Result<Self> {
        check_len("charges", self.natom(), charges.len())?;
        self.charges = Some(charges);
        Ok(self)
    }

    pub fn with_masses(mut self, masses: Vec<f64>) -> Result<Self> {
        check_len("masses", self.natom(), masses.len())?;
        self.masses = Some(masses);
        Ok(self)
    }

    /// Attaches chemical bonds and derives the bonded neighbour shells.
    pub fn with_bonds(mut self, bonds: Vec<[usize; 2]>) -> Result<Self> {
        let natom = self.natom();
        for &index in bonds.iter().flatten() {
            if index >= natom {
                return Err(PesError::AtomIndex { index, natom });
            }
        }
        self.topology = Some(Topology::new(natom, &bonds));
        self.bonds = bonds;
        Ok(self)
    }

    pub fn natom(&self) -> usize {
        self.pos.len()
    }

    pub fn numbers(&self) -> &[u8] {
        &self.numbers
    }

    pub fn pos(&self) -> &[Vector3<f64>] {
        &self.pos
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn charges(&self) -> Option<&[f64]> {
        self.charges.as_deref()
    }

    pub fn masses(&self) -> Option<&[f64]> {
        self.masses.as_deref()
    }

    pub fn bonds(&self) -> &[[usize; 2]] {
        &self.bonds
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_ref()
    }

    /// Relative vector `pos[j] - pos[i]` under the minimum image convention.
    pub fn delta(&self, i: usize, j: usize) -> Vector3<f64> {
        let mut d = self.pos[j] - self.pos[i];
        self.cell.mic(&mut d);
        d
    }

    pub(crate) fn set_pos(&mut self, pos: &[Vector3<f64>]) -> Result<()> {
        check_len("positions", self.natom(), pos.len())?;
        self.pos.copy_from_slice(pos);
        Ok(())
    }

    pub(crate) fn set_rvecs(&mut self, rvecs: &[Vector3<f64>]) -> Result<()> {
        self.cell = self.cell.with_rvecs(rvecs)?;
        Ok(())
    }

    /// Returns a supercell repeating the system `reps[a]` times along each
    /// lattice vector. Bonds that cross the cell boundary are reconnected to
    /// the neighbouring image.
    pub fn supercell(&self, reps: &[usize]) -> Result<System> {
        let nvec = self.cell.nvec();
        if nvec == 0 {
            return Err(PesError::Supercell(
                "can not create a supercell of a non-periodic system".into(),
            ));
        }
        if reps.len() != nvec {
            return Err(PesError::Supercell(format!(
                "expected {} repetitions, got {}",
                nvec,
                reps.len()
            )));
        }
        if reps.iter().any(|&r| r == 0) {
            return Err(PesError::Supercell("repetitions must be positive".into()));
        }

        let images = iter_images(reps);
        let rep_all = images.len();
        let natom = self.natom();

        let mut numbers = Vec::with_capacity(natom * rep_all);
        let mut pos = Vec::with_capacity(natom * rep_all);
        for image in &images {
            let shift = self.image_shift(image);
            numbers.extend_from_slice(&self.numbers);
            pos.extend(self.pos.iter().map(|p| p + shift));
        }

        let rvecs: Vec<Vector3<f64>> = (0..nvec)
            .map(|a| self.cell.rvec(a) * reps[a] as f64)
            .collect();
        let mut result = System::new(numbers, pos, &rvecs)?;
        if let Some(q) = &self.charges {
            result.charges = Some(q.repeat(rep_all));
        }
        if let Some(m) = &self.masses {
            result.masses = Some(m.repeat(rep_all));
        }

        if !self.bonds.is_empty() {
            // Image offset of the partner atom relative to the first atom of each bond.
            let rel_images: Vec<Vec<i64>> = self
                .bonds
                .iter()
                .map(|&[i0, i1]| {
                    let frac = self.cell.to_fractional(&(self.pos[i0] - self.pos[i1]));
                    (0..nvec).map(|a| (frac[a] - 0.5).ceil() as i64).collect()
                })
                .collect();

            let mut bonds = Vec::with_capacity(self.bonds.len() * rep_all);
            for (offset0, image0) in images.iter().enumerate() {
                for (&[i0, i1], rel) in self.bonds.iter().zip(&rel_images) {
                    let image1: Vec<usize> = (0..nvec)
                        .map(|a| (image0[a] as i64 + rel[a]).rem_euclid(reps[a] as i64) as usize)
                        .collect();
                    let offset1 = image_index(&image1, reps);
                    bonds.push([offset0 * natom + i0, offset1 * natom + i1]);
                }
            }
            result = result.with_bonds(bonds)?;
        }
        Ok(result)
    }

    fn image_shift(&self, image: &[usize]) -> Vector3<f64> {
        image
            .iter()
            .enumerate()
            .fold(Vector3::zeros(), |acc, (a, &n)| acc + self.cell.rvec(a) * n as f64)
    }
}

/// All image indexes in row-major order (last axis fastest).
fn iter_images(reps: &[usize]) -> Vec<Vec<usize>> {
    let mut result = vec![Vec::new()];
    for &r in reps {
        result = result
            .into_iter()
            .flat_map(|prefix| {
                (0..r).map(move |n| {
                    let mut v = prefix.clone();
                    v.push(n);
                    v
                })
            })
            .collect();
    }
    result
}

fn image_index(image: &[usize], reps: &[usize]) -> usize {
    image.iter().zip(reps).fold(0, |acc, (&n, &r)| acc * r + n)
}
