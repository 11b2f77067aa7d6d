use ewaldcell::core::builders::{fcc, rock_salt};
use ewaldcell::core::config::EwaldParams;
use ewaldcell::core::domain::System;
use ewaldcell::core::error::PesError;
use ewaldcell::engine::ewald::{ewald_terms, EwaldReciprocalTerm};
use ewaldcell::engine::forcefield::SumForceField;
use ewaldcell::engine::neighbors::Scalings;
use ewaldcell::engine::term::Term;
use nalgebra::Vector3;

mod common;
use common::{ewald_ff, ewald_params, water32};

/// Madelung constant of the rock-salt structure.
const MADELUNG_NACL: f64 = 1.747_564_594_633;

fn total_energy(system: &System, params: &EwaldParams, scalings: Scalings) -> f64 {
    let terms = ewald_terms(system, params, scalings).unwrap();
    let mut ff = SumForceField::new(system.clone(), terms).unwrap();
    ff.compute(None, None).unwrap()
}

#[test]
fn test_alpha_invariance_water32() {
    let alphas = [0.05, 0.1, 0.2, 0.5, 1.0];
    let tolerance = (-5.5f64 * 5.5).exp();
    let energies: Vec<f64> = alphas
        .iter()
        .map(|&alpha| {
            let params = ewald_params(alpha, tolerance);
            assert!((params.rcut - 5.5 / alpha).abs() < 1e-9);
            let mut ff = ewald_ff(water32(), &params);
            ff.compute(None, None).unwrap()
        })
        .collect();

    for (alpha, e) in alphas.iter().zip(&energies) {
        assert!(
            (e - energies[0]).abs() < 1e-8,
            "alpha={} gives {:.14} instead of {:.14}",
            alpha,
            e,
            energies[0]
        );
    }
}

#[test]
fn test_madelung_rock_salt() {
    // Nearest-neighbour distance 1, unit charges: E = -4 M per conventional cell.
    let system = rock_salt(2.0, [11, 17], [1.0, -1.0]).unwrap();
    for alpha in [0.8, 1.5, 3.0] {
        let params = ewald_params(alpha, 1e-15);
        let e = total_energy(&system, &params, Scalings::empty());
        assert!(
            (e + 4.0 * MADELUNG_NACL).abs() < 1e-8,
            "alpha={}: {} vs {}",
            alpha,
            e,
            -4.0 * MADELUNG_NACL
        );
    }
}

#[test]
fn test_supercell_is_extensive() {
    let unit = rock_salt(2.0, [11, 17], [1.0, -1.0]).unwrap();
    let big = unit.supercell(&[2, 1, 2]).unwrap();
    assert_eq!(big.natom(), 32);
    let params = ewald_params(1.2, 1e-14);
    let e1 = total_energy(&unit, &params, Scalings::empty());
    let e4 = total_energy(&big, &params, Scalings::empty());
    assert!((e4 - 4.0 * e1).abs() < 1e-8, "{} vs {}", e4, 4.0 * e1);
}

#[test]
fn test_exclusions_remove_bare_coulomb() {
    // Scaling a pair by s removes (1 - s) of its bare Coulomb interaction
    // (minimum image only), whatever the split between the terms.
    let system = water32();
    let params = ewald_params(0.4, 1e-12);
    let scalings = Scalings::new(&system, Default::default()).unwrap();
    assert_eq!(scalings.len(), 32 * 3); // two O-H and one H-H per molecule

    let q = system.charges().unwrap();
    let removed: f64 = scalings
        .iter()
        .map(|(i, j, s)| (1.0 - s) * q[i] * q[j] / system.delta(i, j).norm())
        .sum();

    let e_full = total_energy(&system, &params, Scalings::empty());
    let e_scaled = total_energy(&system, &params, scalings);
    assert!(
        (e_scaled - (e_full - removed)).abs() < 1e-8,
        "{} vs {}",
        e_scaled,
        e_full - removed
    );
}

#[test]
fn test_background_for_charged_system() {
    // Remove one anion from the rock-salt cell: net charge +1.
    let nacl = rock_salt(2.0, [11, 17], [1.0, -1.0]).unwrap();
    let n = nacl.natom() - 1;
    let charged = System::new(
        nacl.numbers()[..n].to_vec(),
        nacl.pos()[..n].to_vec(),
        &nacl.cell().rvecs(),
    )
    .unwrap()
    .with_charges(nacl.charges().unwrap()[..n].to_vec())
    .unwrap();

    let energy = |alpha: f64, background: bool| {
        let mut params = ewald_params(alpha, 1e-15);
        params.background = background;
        total_energy(&charged, &params, Scalings::empty())
    };

    let reference = energy(0.8, true);
    for alpha in [1.2, 2.0] {
        let e = energy(alpha, true);
        assert!((e - reference).abs() < 1e-8, "alpha={}: {} vs {}", alpha, e, reference);
    }
    // Without the background the result depends on alpha.
    assert!((energy(0.8, false) - energy(2.0, false)).abs() > 1e-3);
}

#[test]
fn test_reciprocal_requires_3d_periodicity() {
    let nacl = rock_salt(2.0, [11, 17], [1.0, -1.0]).unwrap();
    let rvecs = nacl.cell().rvecs();
    let slab = System::new(nacl.numbers().to_vec(), nacl.pos().to_vec(), &rvecs[..2])
        .unwrap()
        .with_charges(nacl.charges().unwrap().to_vec())
        .unwrap();

    let params = ewald_params(1.0, 1e-10);
    let err = EwaldReciprocalTerm::new(&slab, &params).unwrap_err();
    assert_eq!(
        err,
        PesError::UnsupportedPeriodicity {
            what: "The reciprocal Ewald term",
            nvec: 2
        }
    );
    assert!(ewald_terms(&slab, &params, Scalings::empty()).is_err());
}

#[test]
fn test_missing_charges_and_bad_parameters() {
    let system = fcc(2.0, 18).unwrap();
    let params = ewald_params(1.0, 1e-10);
    let err = ewald_terms(&system, &params, Scalings::empty()).err();
    assert_eq!(err, Some(PesError::MissingCharges));

    let nacl = rock_salt(2.0, [11, 17], [1.0, -1.0]).unwrap();
    let mut bad = params.clone();
    bad.alpha = -1.0;
    assert!(matches!(
        ewald_terms(&nacl, &bad, Scalings::empty()),
        Err(PesError::InvalidParameter { name: "alpha", .. })
    ));
    let mut bad = params;
    bad.rcut = f64::NAN;
    assert!(ewald_terms(&nacl, &bad, Scalings::empty()).is_err());
}

#[test]
fn test_kcut_limits_kvectors() {
    let system = rock_salt(2.0, [11, 17], [1.0, -1.0]).unwrap();
    let params = ewald_params(1.5, 1e-14);

    let mut full = EwaldReciprocalTerm::new(&system, &params).unwrap();
    let e_full = full.compute(&system, None, None, None).unwrap();
    let n_full = full.nkvec().unwrap();

    // A spherical cutoff beyond every corner of the gmax box changes nothing.
    let g = full.gmax();
    let kmax: f64 = (0..3)
        .map(|a| 2.0 * std::f64::consts::PI * g[a] as f64 * system.cell().gvec(a).norm())
        .sum();
    let mut loose = params.clone();
    loose.kcut = Some(kmax * 1.01);
    let mut same = EwaldReciprocalTerm::new(&system, &loose).unwrap();
    assert_eq!(same.compute(&system, None, None, None).unwrap(), e_full);
    assert_eq!(same.nkvec(), Some(n_full));

    let mut tight = params;
    tight.kcut = Some(kmax * 0.5);
    let mut cut = EwaldReciprocalTerm::new(&system, &tight).unwrap();
    cut.compute(&system, None, None, None).unwrap();
    assert!(cut.nkvec().unwrap() < n_full);
}

#[test]
fn test_kvector_cache_follows_cell() {
    let system = rock_salt(2.0, [11, 17], [1.0, -1.0]).unwrap();
    let terms = ewald_terms(&system, &ewald_params(1.5, 1e-14), Scalings::empty()).unwrap();
    let mut ff = SumForceField::new(system.clone(), terms).unwrap();
    let e0 = ff.compute(None, None).unwrap();

    // Scaling the cell by s scales the Coulomb energy by 1/s.
    let s = 1.1;
    let rvecs: Vec<Vector3<f64>> = system.cell().rvecs().iter().map(|r| r * s).collect();
    let pos: Vec<Vector3<f64>> = system.pos().iter().map(|p| p * s).collect();
    ff.update_rvecs(&rvecs).unwrap();
    ff.update_pos(&pos).unwrap();
    let e1 = ff.compute(None, None).unwrap();
    assert!((e1 - e0 / s).abs() < 1e-8, "{} vs {}", e1, e0 / s);
}
