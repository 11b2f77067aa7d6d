#![allow(dead_code)]

use ewaldcell::core::builders::{fcc, water_box};
use ewaldcell::core::config::{EwaldParams, ScalingParams};
use ewaldcell::core::domain::System;
use ewaldcell::engine::ewald::ewald_terms;
use ewaldcell::engine::forcefield::SumForceField;
use ewaldcell::engine::neighbors::Scalings;
use ewaldcell::engine::pair::{PairPotLJ, PairTerm};
use ewaldcell::engine::perturb::Perturbation;
use ewaldcell::engine::term::Term;
use nalgebra::{Matrix3, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Lattice constant of an fcc LJ crystal (sigma = 1) close to equilibrium.
pub const LJ_FCC_A: f64 = 1.5496;

/// 32 water molecules in a 12.4 x 12.4 x 6.2 Angstrom (slightly triclinic) box.
pub fn water32() -> System {
    water_box([4, 4, 2], 3.1, 1).unwrap()
}

pub fn ewald_params(alpha: f64, tolerance: f64) -> EwaldParams {
    EwaldParams::from_tolerance(alpha, tolerance)
}

/// Real + reciprocal + correction terms with O-H and H-H exclusions.
pub fn ewald_ff(system: System, params: &EwaldParams) -> SumForceField {
    let scalings = Scalings::new(&system, ScalingParams::default()).unwrap();
    let terms = ewald_terms(&system, params, scalings).unwrap();
    SumForceField::new(system, terms).unwrap()
}

/// A moderately converged Ewald force field for the water box, cheap enough
/// for repeated evaluations in derivative tests.
pub fn water32_ff() -> SumForceField {
    ewald_ff(water32(), &ewald_params(0.35, 1e-10))
}

/// Smoothly truncated Lennard-Jones term in reduced units.
pub fn lj_term(natom: usize, rcut: f64) -> Box<dyn Term> {
    let pot = PairPotLJ::new(vec![1.0; natom], vec![1.0; natom], rcut).unwrap();
    Box::new(PairTerm::new(Box::new(pot), Scalings::empty()).smooth(true))
}

/// Rattled fcc LJ crystal that keeps only the first `nvec` cell vectors.
pub fn lj_system(nvec: usize, rattle: f64, seed: u64) -> System {
    let bulk = fcc(LJ_FCC_A, 18).unwrap();
    let rvecs: Vec<Vector3<f64>> = bulk.cell().rvecs()[..nvec].to_vec();
    let system = System::new(bulk.numbers().to_vec(), bulk.pos().to_vec(), &rvecs).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Perturbation::new().rattle(rattle).apply(&system, &mut rng).unwrap()
}

pub fn lj_ff(nvec: usize, rattle: f64, seed: u64) -> SumForceField {
    let system = lj_system(nvec, rattle, seed);
    let natom = system.natom();
    SumForceField::new(system, vec![lj_term(natom, 3.0)]).unwrap()
}

/// Energy after the homogeneous deformation `r -> r + r eps` of positions and
/// cell vectors (row-vector convention). The geometry is restored afterwards.
pub fn strained_energy(ff: &mut SumForceField, eps: &Matrix3<f64>) -> f64 {
    let pos0 = ff.system().pos().to_vec();
    let rvecs0 = ff.system().cell().rvecs();
    let deform = |v: &Vector3<f64>| v + eps.transpose() * v;
    let pos: Vec<Vector3<f64>> = pos0.iter().map(deform).collect();
    let rvecs: Vec<Vector3<f64>> = rvecs0.iter().map(deform).collect();
    ff.update_rvecs(&rvecs).unwrap();
    ff.update_pos(&pos).unwrap();
    let e = ff.compute(None, None).unwrap();
    ff.update_rvecs(&rvecs0).unwrap();
    ff.update_pos(&pos0).unwrap();
    e
}

/// Central finite-difference estimate of the virial tensor.
pub fn numerical_virial(ff: &mut SumForceField, h: f64) -> Matrix3<f64> {
    let mut result = Matrix3::zeros();
    for a in 0..3 {
        for b in 0..3 {
            let mut eps = Matrix3::zeros();
            eps[(a, b)] = h;
            let ep = strained_energy(ff, &eps);
            let em = strained_energy(ff, &(-eps));
            result[(a, b)] = (ep - em) / (2.0 * h);
        }
    }
    result
}

/// Central finite-difference estimate of the Cartesian gradient of a few atoms.
pub fn numerical_gradient(ff: &mut SumForceField, atoms: &[usize], h: f64) -> Vec<Vector3<f64>> {
    let pos0 = ff.system().pos().to_vec();
    let mut result = Vec::with_capacity(atoms.len());
    for &i in atoms {
        let mut g = Vector3::zeros();
        for c in 0..3 {
            let mut pos = pos0.clone();
            pos[i][c] += h;
            ff.update_pos(&pos).unwrap();
            let ep = ff.compute(None, None).unwrap();
            pos[i][c] -= 2.0 * h;
            ff.update_pos(&pos).unwrap();
            let em = ff.compute(None, None).unwrap();
            g[c] = (ep - em) / (2.0 * h);
        }
        result.push(g);
    }
    ff.update_pos(&pos0).unwrap();
    result
}

/// Analytic gradient and virial of the current geometry.
pub fn analytic(ff: &mut SumForceField) -> (f64, Vec<Vector3<f64>>, Matrix3<f64>) {
    let mut gpos = vec![Vector3::zeros(); ff.system().natom()];
    let mut vtens = Matrix3::zeros();
    let e = ff.compute(Some(&mut gpos[..]), Some(&mut vtens)).unwrap();
    (e, gpos, vtens)
}

pub fn max_abs_diff(a: &Matrix3<f64>, b: &Matrix3<f64>) -> f64 {
    (a - b).abs().max()
}
