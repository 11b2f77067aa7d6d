use std::f64::consts::PI;

use log::info;
use nalgebra::{Matrix3, Vector3};
use statrs::function::erf::erfc;

use crate::core::domain::System;
use crate::core::error::{check_len, check_non_negative, PesError, Result};
use crate::engine::neighbors::{NeighborList, Scalings};
use crate::engine::term::{accumulate_pair, Term};

/// A radial pair potential between atoms `i` and `j`.
pub trait PairPot: Send {
    fn name(&self) -> &str;

    fn rcut(&self) -> f64;

    /// Number of atoms the per-atom parameters describe.
    fn natom(&self) -> usize;

    /// Returns the pair energy at distance `d` and its derivative divided by `d`.
    fn pair_fn(&self, i: usize, j: usize, d: f64) -> (f64, f64);
}

// --- Ewald real space ---

/// Screened Coulomb interaction `q_i q_j erfc(alpha d) / d`. With
/// `alpha == 0` this is the bare Coulomb interaction.
#[derive(Debug, Clone)]
pub struct PairPotEI {
    charges: Vec<f64>,
    alpha: f64,
    rcut: f64,
}

impl PairPotEI {
    pub fn new(charges: Vec<f64>, alpha: f64, rcut: f64) -> Result<Self> {
        check_non_negative("alpha", alpha)?;
        check_positive("rcut", rcut)?;
        Ok(Self { charges, alpha, rcut })
    }
}

impl PairPot for PairPotEI {
    fn name(&self) -> &str {
        "pair_ei"
    }

    fn rcut(&self) -> f64 {
        self.rcut
    }

    fn natom(&self) -> usize {
        self.charges.len()
    }

    fn pair_fn(&self, i: usize, j: usize, d: f64) -> (f64, f64) {
        let qprod = self.charges[i] * self.charges[j];
        let (pot, g) = if self.alpha > 0.0 {
            let x = self.alpha * d;
            let pot = erfc(x) / d;
            (pot, (-2.0 / PI.sqrt() * self.alpha * (-x * x).exp() - pot) / d)
        } else {
            let pot = 1.0 / d;
            (pot, -pot / d)
        };
        (qprod * pot, qprod * g / d)
    }
}

// --- Lennard-Jones ---

/// `4 eps [(sigma/d)^12 - (sigma/d)^6]` with arithmetic mean sigmas and
/// geometric mean epsilons.
#[derive(Debug, Clone)]
pub struct PairPotLJ {
    sigmas: Vec<f64>,
    epsilons: Vec<f64>,
    rcut: f64,
}

impl PairPotLJ {
    pub fn new(sigmas: Vec<f64>, epsilons: Vec<f64>, rcut: f64) -> Result<Self> {
        check_len("epsilons", sigmas.len(), epsilons.len())?;
        check_positive("rcut", rcut)?;
        Ok(Self {
            sigmas,
            epsilons,
            rcut,
        })
    }
}

impl PairPot for PairPotLJ {
    fn name(&self) -> &str {
        "pair_lj"
    }

    fn rcut(&self) -> f64 {
        self.rcut
    }

    fn natom(&self) -> usize {
        self.sigmas.len()
    }

    fn pair_fn(&self, i: usize, j: usize, d: f64) -> (f64, f64) {
        let sigma = 0.5 * (self.sigmas[i] + self.sigmas[j]);
        let epsilon = (self.epsilons[i] * self.epsilons[j]).sqrt();
        let x = (sigma / d).powi(6);
        let v = 4.0 * epsilon * x * (x - 1.0);
        let g = 24.0 * epsilon / (d * d) * x * (1.0 - 2.0 * x);
        (v, g)
    }
}

// --- Buckingham ---

/// Parameters of `A exp(-d/rho) - C/d^6` for one pair of atom types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuckinghamParams {
    pub a: f64,
    pub rho: f64,
    pub c: f64,
}

/// Buckingham potential with a symmetric table indexed by atom type.
/// Type pairs without parameters do not interact.
#[derive(Debug, Clone)]
pub struct PairPotBuckingham {
    type_ids: Vec<usize>,
    ntype: usize,
    table: Vec<Option<BuckinghamParams>>,
    rcut: f64,
}

impl PairPotBuckingham {
    pub fn new(type_ids: Vec<usize>, rcut: f64) -> Result<Self> {
        check_positive("rcut", rcut)?;
        let ntype = type_ids.iter().max().map_or(0, |&t| t + 1);
        Ok(Self {
            type_ids,
            ntype,
            table: vec![None; ntype * ntype],
            rcut,
        })
    }

    pub fn with_pair(mut self, t0: usize, t1: usize, params: BuckinghamParams) -> Result<Self> {
        for t in [t0, t1] {
            if t >= self.ntype {
                return Err(PesError::AtomIndex {
                    index: t,
                    natom: self.ntype,
                });
            }
        }
        check_positive("rho", params.rho)?;
        self.table[t0 * self.ntype + t1] = Some(params);
        self.table[t1 * self.ntype + t0] = Some(params);
        Ok(self)
    }
}

impl PairPot for PairPotBuckingham {
    fn name(&self) -> &str {
        "pair_buck"
    }

    fn rcut(&self) -> f64 {
        self.rcut
    }

    fn natom(&self) -> usize {
        self.type_ids.len()
    }

    fn pair_fn(&self, i: usize, j: usize, d: f64) -> (f64, f64) {
        let key = self.type_ids[i] * self.ntype + self.type_ids[j];
        match self.table[key] {
            Some(BuckinghamParams { a, rho, c }) => {
                let rep = a * (-d / rho).exp();
                let d6 = d.powi(6);
                let v = rep - c / d6;
                let g = (-rep / rho + 6.0 * c / (d6 * d)) / d;
                (v, g)
            }
            None => (0.0, 0.0),
        }
    }
}

// --- Pair term ---

/// Sums a pair potential over all neighbour pairs, applying exclusion scale
/// factors to the minimum-image pairs.
pub struct PairTerm {
    name: String,
    pot: Box<dyn PairPot>,
    scalings: Scalings,
    smooth: bool,
}

impl PairTerm {
    pub fn new(pot: Box<dyn PairPot>, scalings: Scalings) -> Self {
        let name = pot.name().to_string();
        info!(
            "Pair term '{}': rcut={:.4}, {} scaled pairs",
            name,
            pot.rcut(),
            scalings.len()
        );
        Self {
            name,
            pot,
            scalings,
            smooth: false,
        }
    }

    /// Multiplies the potential with `exp(1/(d - rcut))` so that it goes
    /// smoothly to zero at the cutoff.
    pub fn smooth(mut self, smooth: bool) -> Self {
        self.smooth = smooth;
        self
    }
}

impl Term for PairTerm {
    fn name(&self) -> &str {
        &self.name
    }

    fn rcut(&self) -> Option<f64> {
        Some(self.pot.rcut())
    }

    fn compute(
        &mut self,
        system: &System,
        nlist: Option<&NeighborList>,
        mut gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64> {
        let nlist = nlist.ok_or(PesError::InvalidParameter {
            name: "neighbor list cutoff",
            value: 0.0,
        })?;
        if nlist.rcut() < self.pot.rcut() {
            return Err(PesError::InvalidParameter {
                name: "neighbor list cutoff",
                value: nlist.rcut(),
            });
        }
        check_len("pair potential atoms", system.natom(), self.pot.natom())?;
        if let Some(gpos) = gpos.as_deref() {
            check_len("gpos", system.natom(), gpos.len())?;
        }

        let rcut = self.pot.rcut();
        let need_derivatives = gpos.is_some() || vtens.is_some();
        let mut energy = 0.0;
        nlist.for_each(|n| {
            if n.d >= rcut {
                return;
            }
            let s = if n.is_primary() && n.i != n.j {
                self.scalings.get(n.i, n.j)
            } else {
                1.0
            };
            if s <= 0.0 {
                return;
            }
            let (mut v, mut vg) = self.pot.pair_fn(n.i, n.j, n.d);
            if self.smooth {
                let (h, hg) = hammer(n.d, rcut);
                vg = vg * h + v * hg / n.d;
                v *= h;
            }
            energy += s * v;
            if need_derivatives {
                accumulate_pair(n.i, n.j, &n.delta, s * vg, gpos.as_deref_mut(), vtens.as_deref_mut());
            }
        });
        Ok(energy)
    }
}

/// Switching function `exp(1/(d - c))` and its derivative, zero beyond `c`.
fn hammer(d: f64, c: f64) -> (f64, f64) {
    if d < c {
        let x = d - c;
        let h = (1.0 / x).exp();
        (h, -h / (x * x))
    } else {
        (0.0, 0.0)
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PesError::InvalidParameter { name, value })
    }
}
