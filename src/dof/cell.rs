use log::info;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::core::config::CellThresholds;
use crate::core::error::{check_len, PesError, Result};
use crate::core::spatial;
use crate::dof::convergence::{ConvergenceReport, ConvergenceState, Measure, Snapshot};
use crate::dof::Dof;
use crate::engine::forcefield::SumForceField;

/// A bijection between cell parameters and the lattice vectors, relative to
/// the reference vectors `rvecs0` (one row per periodic axis).
pub trait CellParametrization {
    fn name(&self) -> &'static str;

    /// Number of cell parameters for `nvec` lattice vectors.
    fn ncellvar(&self, nvec: usize) -> usize;

    /// The parameters that reproduce `rvecs0`.
    fn initial(&self, nvec: usize) -> Vec<f64>;

    fn x_to_rvecs(&self, rvecs0: &[Vector3<f64>], x: &[f64]) -> Vec<Vector3<f64>>;

    /// Chain rule: gradient with respect to the parameters from the gradient
    /// with respect to the lattice vectors.
    fn grvecs_to_gx(&self, rvecs0: &[Vector3<f64>], grvecs: &[Vector3<f64>]) -> Vec<f64>;
}

// --- Parametrizations ---

/// Symmetric deformation `D` of the reference cell, `rvecs = D rvecs0`. The
/// diagonal elements come first, followed by the shears of the axis pairs
/// (1,2), (0,2), (0,1); each shear parameter is twice the off-diagonal
/// element.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullCell;

impl FullCell {
    /// Index pairs of the shear parameters, in parameter order.
    fn shears(nvec: usize) -> &'static [(usize, usize)] {
        match nvec {
            3 => &[(1, 2), (0, 2), (0, 1)],
            2 => &[(0, 1)],
            _ => &[],
        }
    }

    fn deform(x: &[f64], nvec: usize) -> DMatrix<f64> {
        let mut d = DMatrix::zeros(nvec, nvec);
        for a in 0..nvec {
            d[(a, a)] = x[a];
        }
        for (k, &(a, b)) in Self::shears(nvec).iter().enumerate() {
            let s = 0.5 * x[nvec + k];
            d[(a, b)] = s;
            d[(b, a)] = s;
        }
        d
    }
}

impl CellParametrization for FullCell {
    fn name(&self) -> &'static str {
        "full"
    }

    fn ncellvar(&self, nvec: usize) -> usize {
        nvec * (nvec + 1) / 2
    }

    fn initial(&self, nvec: usize) -> Vec<f64> {
        let mut x = vec![0.0; self.ncellvar(nvec)];
        x[..nvec].fill(1.0);
        x
    }

    fn x_to_rvecs(&self, rvecs0: &[Vector3<f64>], x: &[f64]) -> Vec<Vector3<f64>> {
        let nvec = rvecs0.len();
        let d = Self::deform(x, nvec);
        (0..nvec)
            .map(|a| {
                (0..nvec).fold(Vector3::zeros(), |acc, b| acc + rvecs0[b] * d[(a, b)])
            })
            .collect()
    }

    fn grvecs_to_gx(&self, rvecs0: &[Vector3<f64>], grvecs: &[Vector3<f64>]) -> Vec<f64> {
        let nvec = rvecs0.len();
        // gmat[a][b] = dE/dD_ab
        let gmat = DMatrix::from_fn(nvec, nvec, |a, b| grvecs[a].dot(&rvecs0[b]));
        let mut gx: Vec<f64> = (0..nvec).map(|a| gmat[(a, a)]).collect();
        for &(a, b) in Self::shears(nvec) {
            gx.push(0.5 * (gmat[(a, b)] + gmat[(b, a)]));
        }
        gx
    }
}

/// One scale factor per lattice vector.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnisoCell;

impl CellParametrization for AnisoCell {
    fn name(&self) -> &'static str {
        "aniso"
    }

    fn ncellvar(&self, nvec: usize) -> usize {
        nvec
    }

    fn initial(&self, nvec: usize) -> Vec<f64> {
        vec![1.0; nvec]
    }

    fn x_to_rvecs(&self, rvecs0: &[Vector3<f64>], x: &[f64]) -> Vec<Vector3<f64>> {
        rvecs0.iter().zip(x).map(|(r, s)| r * *s).collect()
    }

    fn grvecs_to_gx(&self, rvecs0: &[Vector3<f64>], grvecs: &[Vector3<f64>]) -> Vec<f64> {
        rvecs0.iter().zip(grvecs).map(|(r, g)| r.dot(g)).collect()
    }
}

/// A single scale factor for the whole cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsoCell;

impl CellParametrization for IsoCell {
    fn name(&self) -> &'static str {
        "iso"
    }

    fn ncellvar(&self, _nvec: usize) -> usize {
        1
    }

    fn initial(&self, _nvec: usize) -> Vec<f64> {
        vec![1.0]
    }

    fn x_to_rvecs(&self, rvecs0: &[Vector3<f64>], x: &[f64]) -> Vec<Vector3<f64>> {
        rvecs0.iter().map(|r| r * x[0]).collect()
    }

    fn grvecs_to_gx(&self, rvecs0: &[Vector3<f64>], grvecs: &[Vector3<f64>]) -> Vec<f64> {
        vec![rvecs0.iter().zip(grvecs).map(|(r, g)| r.dot(g)).sum()]
    }
}

pub type FullCellDof = CellDof<FullCell>;
pub type AnisoCellDof = CellDof<AnisoCell>;
pub type IsoCellDof = CellDof<IsoCell>;

// --- Cell DOF ---

/// Cell parameters followed by the fractional coordinates of all atoms.
///
/// With `do_frozen` the fractional coordinates keep their initial values and
/// only the cell parameters remain. Fractional coordinates are taken in the
/// completed cell basis, so for `nvec < 3` they also cover the non-periodic
/// directions; the completing vectors never change.
pub struct CellDof<P: CellParametrization> {
    ff: SumForceField,
    param: P,
    thresholds: CellThresholds,
    do_frozen: bool,
    rvecs0: Vec<Vector3<f64>>,
    complement: Vec<Vector3<f64>>,
    frac0: Vec<Vector3<f64>>,
    ncellvar: usize,
    x0: DVector<f64>,
    // Scratch
    pos: Vec<Vector3<f64>>,
    cell: Vec<Vector3<f64>>,
    gpos: Vec<Vector3<f64>>,
    vtens: Matrix3<f64>,
    gcell: Vec<Vector3<f64>>,
    state: ConvergenceState,
}

impl<P: CellParametrization + Default> CellDof<P> {
    pub fn new(ff: SumForceField, thresholds: CellThresholds, do_frozen: bool) -> Result<Self> {
        Self::with_parametrization(ff, P::default(), thresholds, do_frozen)
    }
}

impl<P: CellParametrization> CellDof<P> {
    pub fn with_parametrization(
        ff: SumForceField,
        param: P,
        thresholds: CellThresholds,
        do_frozen: bool,
    ) -> Result<Self> {
        let system = ff.system();
        let cell = system.cell();
        let nvec = cell.nvec();
        if nvec == 0 {
            return Err(PesError::NotPeriodic);
        }
        thresholds.require_criterion(do_frozen)?;
        let rvecs0 = cell.rvecs();
        let complement: Vec<Vector3<f64>> = (nvec..3).map(|a| cell.rvec(a)).collect();
        let frac0 = spatial::to_fractional(cell, system.pos());
        let ncellvar = param.ncellvar(nvec);

        let mut x0 = param.initial(nvec);
        if !do_frozen {
            x0.extend(frac0.iter().flat_map(|f| f.iter().copied()));
        }
        let x0 = DVector::from_vec(x0);
        info!(
            "Cell DOF ({}): {} cell parameters, {} total, do_frozen={}",
            param.name(),
            ncellvar,
            x0.len(),
            do_frozen
        );

        let pos = system.pos().to_vec();
        let natom = pos.len();
        Ok(Self {
            pos,
            cell: rvecs0.clone(),
            gpos: vec![Vector3::zeros(); natom],
            vtens: Matrix3::zeros(),
            gcell: vec![Vector3::zeros(); nvec],
            ff,
            param,
            thresholds,
            do_frozen,
            rvecs0,
            complement,
            frac0,
            ncellvar,
            x0,
            state: ConvergenceState::Uninitialized,
        })
    }

    pub fn do_frozen(&self) -> bool {
        self.do_frozen
    }

    pub fn ncellvar(&self) -> usize {
        self.ncellvar
    }

    /// Lattice vectors of the last update.
    pub fn rvecs(&self) -> &[Vector3<f64>] {
        &self.cell
    }

    pub fn into_ff(self) -> SumForceField {
        self.ff
    }

    fn update(&mut self, x: &DVector<f64>) -> Result<()> {
        check_len("x", self.x0.len(), x.len())?;
        let xs = x.as_slice();
        self.cell = self.param.x_to_rvecs(&self.rvecs0, &xs[..self.ncellvar]);

        let basis: Vec<Vector3<f64>> = self.cell.iter().chain(&self.complement).copied().collect();
        let to_cartesian = |f: &Vector3<f64>| basis[0] * f[0] + basis[1] * f[1] + basis[2] * f[2];
        if self.do_frozen {
            for (p, f) in self.pos.iter_mut().zip(&self.frac0) {
                *p = to_cartesian(f);
            }
        } else {
            let frac = &xs[self.ncellvar..];
            for (i, p) in self.pos.iter_mut().enumerate() {
                let f = Vector3::new(frac[3 * i], frac[3 * i + 1], frac[3 * i + 2]);
                *p = to_cartesian(&f);
            }
        }
        self.ff.update_rvecs(&self.cell)?;
        self.ff.update_pos(&self.pos)
    }
}

impl<P: CellParametrization> Dof for CellDof<P> {
    fn x0(&self) -> &DVector<f64> {
        &self.x0
    }

    fn energy(&mut self, x: &DVector<f64>) -> Result<f64> {
        self.update(x)?;
        self.ff.compute(None, None)
    }

    fn energy_gradient(&mut self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        self.update(x)?;
        self.gpos.iter_mut().for_each(|g| *g = Vector3::zeros());
        self.vtens = Matrix3::zeros();
        let e = if self.do_frozen {
            self.ff.compute(None, Some(&mut self.vtens))?
        } else {
            self.ff
                .compute(Some(self.gpos.as_mut_slice()), Some(&mut self.vtens))?
        };

        let gvecs = self.ff.system().cell().gvecs_full();
        let gfull = gvecs * self.vtens;
        for (a, g) in self.gcell.iter_mut().enumerate() {
            *g = gfull.row(a).transpose();
        }
        let mut gx = self.param.grvecs_to_gx(&self.rvecs0, &self.gcell);
        if !self.do_frozen {
            let rvecs = self.ff.system().cell().rvecs_full();
            // dE/dfrac = gpos rvecs^T
            for g in &self.gpos {
                gx.extend_from_slice((rvecs * g).as_slice());
            }
        }
        Ok((e, DVector::from_vec(gx)))
    }

    fn reset(&mut self) -> Result<()> {
        let x0 = self.x0.clone();
        self.update(&x0)?;
        self.gpos.iter_mut().for_each(|g| *g = Vector3::zeros());
        self.gcell.iter_mut().for_each(|g| *g = Vector3::zeros());
        self.vtens = Matrix3::zeros();
        self.state = ConvergenceState::Uninitialized;
        Ok(())
    }

    fn check_convergence(&mut self) -> Result<ConvergenceReport> {
        let th = self.thresholds;
        th.require_criterion(self.do_frozen)?;
        let gpos_th = th.gpos_threshold(self.do_frozen);
        let current = Snapshot {
            pos: self.pos.clone(),
            cell: self.cell.clone(),
        };
        let pos = &self.pos;
        let cell = &self.cell;
        let gpos = &self.gpos;
        let gcell = &self.gcell;
        let do_frozen = self.do_frozen;
        self.state.advance(current, |last| {
            let dpos = pos.iter().zip(&last.pos).map(|(p, l)| p - l).collect();
            let dcell = cell.iter().zip(&last.cell).map(|(c, l)| c - l).collect();
            let mut criteria = Vec::with_capacity(4);
            if !do_frozen {
                criteria.push((Measure::Gpos, gpos.clone(), gpos_th));
            }
            criteria.push((Measure::Dpos, dpos, th.dpos_rms));
            criteria.push((Measure::Gcell, gcell.clone(), th.gcell_rms));
            criteria.push((Measure::Dcell, dcell, th.dcell_rms));
            criteria
        })
    }

    fn ff(&self) -> &SumForceField {
        &self.ff
    }
}
