use std::f64::consts::PI;

use log::{debug, info, warn};
use nalgebra::{Matrix3, Vector3};
use statrs::function::erf::erf;

use crate::core::config::EwaldParams;
use crate::core::domain::{Cell, System};
use crate::core::error::{check_len, PesError, Result};
use crate::core::spatial;
use crate::engine::neighbors::{NeighborList, Scalings};
use crate::engine::pair::{PairPotEI, PairTerm};
use crate::engine::term::{accumulate_pair, Term};

/// Net charges below this magnitude count as neutral.
const NEUTRALITY_TOL: f64 = 1e-8;

/// Builds the real-space, reciprocal-space and correction terms of an Ewald
/// summation with consistent parameters. The system must carry charges.
pub fn ewald_terms(
    system: &System,
    params: &EwaldParams,
    scalings: Scalings,
) -> Result<Vec<Box<dyn Term>>> {
    params.validate()?;
    let charges = system.charges().ok_or(PesError::MissingCharges)?.to_vec();
    let real = PairTerm::new(
        Box::new(PairPotEI::new(charges, params.alpha, params.rcut)?),
        scalings.clone(),
    );
    let reci = EwaldReciprocalTerm::new(system, params)?;
    let corr = EwaldCorrectionTerm::new(system, params, scalings)?;
    Ok(vec![Box::new(real), Box::new(reci), Box::new(corr)])
}

// --- Reciprocal space ---

#[derive(Debug, Clone, Copy)]
struct KVector {
    n: [i32; 3],
    k: Vector3<f64>,
    /// `(4 pi / V) exp(-k^2 / 4 alpha^2) / k^2`
    weight: f64,
    /// `2 (1/k^2 + 1/(4 alpha^2))`, the strain derivative of `ln weight`.
    vfac: f64,
}

/// The smooth long-range part of the Ewald sum, evaluated as a sum over
/// reciprocal lattice vectors. Only defined for three-dimensional periodic
/// systems.
///
/// Every pair `k`, `-k` contributes the same amount, so only half of the
/// reciprocal lattice is visited and the prefactor is doubled. The phase
/// factors `exp(i k.r)` are built per atom from `cos`/`sin` tables of the
/// fractional coordinates, using angle addition instead of one call to the
/// trigonometric functions per k-vector.
#[derive(Debug, Clone)]
pub struct EwaldReciprocalTerm {
    charges: Vec<f64>,
    alpha: f64,
    gmax: [usize; 3],
    kcut: Option<f64>,
    kvecs: Option<Vec<KVector>>,
    // Scratch, one entry per atom.
    cosfac: Vec<f64>,
    sinfac: Vec<f64>,
}

impl EwaldReciprocalTerm {
    pub fn new(system: &System, params: &EwaldParams) -> Result<Self> {
        params.validate()?;
        let cell = system.cell();
        if cell.nvec() != 3 {
            return Err(PesError::UnsupportedPeriodicity {
                what: "The reciprocal Ewald term",
                nvec: cell.nvec(),
            });
        }
        if params.alpha <= 0.0 {
            return Err(PesError::InvalidParameter {
                name: "alpha",
                value: params.alpha,
            });
        }
        let charges = system.charges().ok_or(PesError::MissingCharges)?.to_vec();
        let gmax = params.gmax_for(cell);
        if gmax.iter().any(|&g| g == 0) {
            warn!("Reciprocal term with gmax={:?}: some axes have no k-vectors", gmax);
        }
        info!(
            "Reciprocal Ewald term: alpha={:.5}, gmax={:?}, kcut={:?}",
            params.alpha, gmax, params.kcut
        );
        let natom = charges.len();
        Ok(Self {
            charges,
            alpha: params.alpha,
            gmax,
            kcut: params.kcut,
            kvecs: None,
            cosfac: vec![0.0; natom],
            sinfac: vec![0.0; natom],
        })
    }

    pub fn gmax(&self) -> [usize; 3] {
        self.gmax
    }

    /// Number of k-vectors in the current table, if one was built.
    pub fn nkvec(&self) -> Option<usize> {
        self.kvecs.as_ref().map(Vec::len)
    }

    fn build_kvecs(&self, cell: &Cell) -> Result<Vec<KVector>> {
        let volume = cell.volume().ok_or(PesError::UnsupportedPeriodicity {
            what: "The reciprocal Ewald term",
            nvec: cell.nvec(),
        })?;
        let fac = 4.0 * PI / volume;
        let inv_4a2 = 0.25 / (self.alpha * self.alpha);
        let kcut_sq = self.kcut.map(|k| k * k);
        let [g0, g1, g2] = self.gmax.map(|g| g as i32);

        let mut kvecs = Vec::new();
        for n0 in 0..=g0 {
            for n1 in -g1..=g1 {
                for n2 in -g2..=g2 {
                    // Half space: the negative partner of each k is skipped.
                    if n0 == 0 && (n1 < 0 || (n1 == 0 && n2 <= 0)) {
                        continue;
                    }
                    let k = (cell.gvec(0) * n0 as f64
                        + cell.gvec(1) * n1 as f64
                        + cell.gvec(2) * n2 as f64)
                        * (2.0 * PI);
                    let ksq = k.norm_squared();
                    if kcut_sq.is_some_and(|c| ksq > c) {
                        continue;
                    }
                    kvecs.push(KVector {
                        n: [n0, n1, n2],
                        k,
                        weight: fac * (-ksq * inv_4a2).exp() / ksq,
                        vfac: 2.0 * (1.0 / ksq + inv_4a2),
                    });
                }
            }
        }
        debug!("Reciprocal Ewald term: {} k-vectors", kvecs.len());
        Ok(kvecs)
    }
}

/// `cos(n theta)` and `sin(n theta)` for `n = 0..=nmax` of every atom, stored
/// row-major per atom.
struct TrigTable {
    stride: usize,
    cos: Vec<f64>,
    sin: Vec<f64>,
}

impl TrigTable {
    fn new(thetas: impl ExactSizeIterator<Item = f64>, nmax: usize) -> Self {
        let stride = nmax + 1;
        let natom = thetas.len();
        let mut cos = vec![0.0; natom * stride];
        let mut sin = vec![0.0; natom * stride];
        for (i, theta) in thetas.enumerate() {
            let (s1, c1) = theta.sin_cos();
            let row = i * stride;
            cos[row] = 1.0;
            for n in 1..stride {
                let (c, s) = (cos[row + n - 1], sin[row + n - 1]);
                cos[row + n] = c * c1 - s * s1;
                sin[row + n] = s * c1 + c * s1;
            }
        }
        Self { stride, cos, sin }
    }

    /// `(cos, sin)` of `n theta_i` for a possibly negative `n`.
    #[inline]
    fn get(&self, i: usize, n: i32) -> (f64, f64) {
        let idx = i * self.stride + n.unsigned_abs() as usize;
        if n < 0 {
            (self.cos[idx], -self.sin[idx])
        } else {
            (self.cos[idx], self.sin[idx])
        }
    }
}

impl Term for EwaldReciprocalTerm {
    fn name(&self) -> &str {
        "ewald_reci"
    }

    fn geometry_changed(&mut self, cell_changed: bool) {
        if cell_changed {
            self.kvecs = None;
        }
    }

    fn compute(
        &mut self,
        system: &System,
        _nlist: Option<&NeighborList>,
        mut gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64> {
        let cell = system.cell();
        if cell.nvec() != 3 {
            return Err(PesError::UnsupportedPeriodicity {
                what: "The reciprocal Ewald term",
                nvec: cell.nvec(),
            });
        }
        let natom = system.natom();
        check_len("charges", natom, self.charges.len())?;
        if let Some(gpos) = gpos.as_deref() {
            check_len("gpos", natom, gpos.len())?;
        }
        if self.kvecs.is_none() {
            self.kvecs = Some(self.build_kvecs(cell)?);
        }
        let Some(kvecs) = self.kvecs.as_ref() else {
            return Ok(0.0);
        };

        let frac = spatial::to_fractional(cell, system.pos());
        let tables: Vec<TrigTable> = (0..3)
            .map(|a| TrigTable::new(frac.iter().map(|f| 2.0 * PI * f[a]), self.gmax[a]))
            .collect();

        let mut energy = 0.0;
        let mut vsum = Matrix3::zeros();
        for kv in kvecs {
            let mut s_re = 0.0;
            let mut s_im = 0.0;
            for i in 0..natom {
                let (c0, s0) = tables[0].get(i, kv.n[0]);
                let (c1, s1) = tables[1].get(i, kv.n[1]);
                let (c2, s2) = tables[2].get(i, kv.n[2]);
                let c01 = c0 * c1 - s0 * s1;
                let s01 = s0 * c1 + c0 * s1;
                let c = c01 * c2 - s01 * s2;
                let s = s01 * c2 + c01 * s2;
                self.cosfac[i] = c;
                self.sinfac[i] = s;
                s_re += self.charges[i] * c;
                s_im += self.charges[i] * s;
            }
            let e_k = kv.weight * (s_re * s_re + s_im * s_im);
            energy += e_k;

            if let Some(gpos) = gpos.as_deref_mut() {
                let gfac = 2.0 * kv.weight;
                for i in 0..natom {
                    let f = gfac
                        * self.charges[i]
                        * (self.cosfac[i] * s_im - self.sinfac[i] * s_re);
                    gpos[i] += kv.k * f;
                }
            }
            if vtens.is_some() {
                vsum += kv.k * kv.k.transpose() * (e_k * kv.vfac);
            }
        }

        if let Some(vtens) = vtens.as_deref_mut() {
            *vtens += vsum - Matrix3::identity() * energy;
        }
        Ok(energy)
    }
}

// --- Corrections ---

/// Removes the self interaction of every Gaussian charge and the smooth
/// interaction between excluded or scaled pairs that the reciprocal sum
/// includes implicitly. Optionally adds the energy of a uniform background
/// that neutralizes a charged system.
#[derive(Debug, Clone)]
pub struct EwaldCorrectionTerm {
    charges: Vec<f64>,
    alpha: f64,
    scalings: Scalings,
    background: bool,
}

impl EwaldCorrectionTerm {
    pub fn new(system: &System, params: &EwaldParams, scalings: Scalings) -> Result<Self> {
        params.validate()?;
        let charges = system.charges().ok_or(PesError::MissingCharges)?.to_vec();
        let net: f64 = charges.iter().sum();
        if net.abs() > NEUTRALITY_TOL && !params.background {
            warn!(
                "Net charge {:.3e} without background correction; the Ewald energy depends on alpha",
                net
            );
        }
        for (i, j, _) in scalings.iter() {
            let natom = charges.len();
            if i >= natom || j >= natom {
                return Err(PesError::AtomIndex {
                    index: i.max(j),
                    natom,
                });
            }
        }
        Ok(Self {
            charges,
            alpha: params.alpha,
            scalings,
            background: params.background,
        })
    }
}

impl Term for EwaldCorrectionTerm {
    fn name(&self) -> &str {
        "ewald_cor"
    }

    fn compute(
        &mut self,
        system: &System,
        _nlist: Option<&NeighborList>,
        mut gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64> {
        check_len("charges", system.natom(), self.charges.len())?;
        if let Some(gpos) = gpos.as_deref() {
            check_len("gpos", system.natom(), gpos.len())?;
        }
        let alpha = self.alpha;
        let sqrt_pi = PI.sqrt();

        // Self interaction: no geometry dependence.
        let q_sq: f64 = self.charges.iter().map(|q| q * q).sum();
        let mut energy = -alpha / sqrt_pi * q_sq;

        for (i, j, scale) in self.scalings.iter() {
            let delta = system.delta(i, j);
            let d = delta.norm();
            let qprod = (1.0 - scale) * self.charges[i] * self.charges[j];
            let x = alpha * d;
            let pot = erf(x) / d;
            energy -= qprod * pot;
            if gpos.is_some() || vtens.is_some() {
                let vg = -qprod * (2.0 * alpha / sqrt_pi * (-x * x).exp() - pot) / (d * d);
                accumulate_pair(i, j, &delta, vg, gpos.as_deref_mut(), vtens.as_deref_mut());
            }
        }

        if self.background {
            if let Some(volume) = system.cell().volume() {
                let net: f64 = self.charges.iter().sum();
                let e_bg = -PI * net * net / (2.0 * volume * alpha * alpha);
                energy += e_bg;
                if let Some(vtens) = vtens.as_deref_mut() {
                    *vtens -= Matrix3::identity() * e_bg;
                }
            }
        }
        Ok(energy)
    }
}
