use ewaldcell::core::builders::{fcc, rock_salt, water_box};
use ewaldcell::core::config::{EwaldParams, RunConfig, ScalingParams};
use ewaldcell::core::domain::{Cell, System};
use ewaldcell::core::error::PesError;
use ewaldcell::core::spatial::{to_fractional, wrap_or_center};
use ewaldcell::core::topology::Topology;
use ewaldcell::engine::neighbors::{NeighborList, Scalings};
use ewaldcell::engine::perturb::Perturbation;
use nalgebra::{Matrix3, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

mod common;

fn triclinic() -> Vec<Vector3<f64>> {
    vec![
        Vector3::new(5.0, 0.0, 0.0),
        Vector3::new(1.0, 4.5, 0.0),
        Vector3::new(-0.5, 0.7, 6.0),
    ]
}

#[test]
fn test_cell_reciprocal_basis() {
    let sets = [
        vec![],
        vec![Vector3::new(1.0, 2.0, 0.5)],
        vec![Vector3::new(3.0, 0.0, 0.0), Vector3::new(1.0, 2.0, 0.3)],
        triclinic(),
    ];
    for rvecs in sets {
        let cell = Cell::new(&rvecs).unwrap();
        assert_eq!(cell.nvec(), rvecs.len());
        let product = cell.rvecs_full() * cell.gvecs_full().transpose();
        assert!(
            (product - Matrix3::identity()).abs().max() < 1e-12,
            "r.g != 1 for nvec={}",
            rvecs.len()
        );
        // Complement rows are orthonormal and orthogonal to the lattice vectors.
        for a in cell.nvec()..3 {
            assert!((cell.rvec(a).norm() - 1.0).abs() < 1e-12);
            for b in 0..a {
                assert!(cell.rvec(a).dot(&cell.rvec(b)).abs() < 1e-12);
            }
        }
        assert_eq!(cell.volume().is_some(), rvecs.len() == 3);
    }
}

#[test]
fn test_cell_volume_and_spacings() {
    let cell = Cell::new(&triclinic()).unwrap();
    assert!((cell.volume().unwrap() - 5.0 * 4.5 * 6.0).abs() < 1e-10);
    let rs = cell.rspacings();
    assert!((rs[2] - 6.0).abs() < 1e-12, "spacing along c: {}", rs[2]);
    let gs = cell.gspacings();
    assert!((gs[0] - 0.2).abs() < 1e-12);
}

#[test]
fn test_cell_errors() {
    let zero = Cell::new(&[Vector3::zeros()]);
    assert_eq!(zero.unwrap_err(), PesError::DegenerateCell);

    let a = Vector3::new(1.0, 0.0, 0.0);
    let b = Vector3::new(0.0, 1.0, 0.0);
    assert_eq!(Cell::new(&[a, a * 2.0]).unwrap_err(), PesError::DegenerateCell);
    assert_eq!(
        Cell::new(&[a, b, a + b]).unwrap_err(),
        PesError::DegenerateCell
    );
    assert_eq!(
        Cell::new(&[a, b, a.cross(&b), a]).unwrap_err(),
        PesError::TooManyCellVectors(4)
    );

    let cell = Cell::new(&triclinic()).unwrap();
    assert_eq!(
        cell.with_rvecs(&[a, b]).unwrap_err(),
        PesError::CellDimensionChanged {
            expected: 3,
            found: 2
        }
    );
}

#[test]
fn test_minimum_image() {
    let cell = Cell::new(&triclinic()).unwrap();
    let base = Vector3::new(0.3, -0.4, 0.2);
    let mut shifted = base + cell.rvec(0) * 2.0 - cell.rvec(1) + cell.rvec(2) * 3.0;
    cell.mic(&mut shifted);
    assert!((shifted - base).norm() < 1e-12);

    // Only periodic axes are wrapped.
    let slab = Cell::new(&triclinic()[..2]).unwrap();
    let mut far = Vector3::new(0.0, 0.0, 40.0) + slab.rvec(0);
    slab.mic(&mut far);
    assert!((far - Vector3::new(0.0, 0.0, 40.0)).norm() < 1e-12);

    let free = Cell::empty();
    let mut d = Vector3::new(100.0, 0.0, 0.0);
    free.mic(&mut d);
    assert_eq!(d.x, 100.0);
}

#[test]
fn test_image_ranges() {
    let cell = Cell::new(&triclinic()[..2]).unwrap();
    let ranges = cell.image_ranges(10.0);
    assert!(ranges[0] >= 2 && ranges[1] >= 2);
    assert_eq!(ranges[2], 0);
    assert_eq!(Cell::empty().image_ranges(10.0), [0, 0, 0]);
}

#[test]
fn test_fractional_roundtrip_and_wrap() {
    let cell = Cell::new(&triclinic()).unwrap();
    let r = Vector3::new(13.1, -7.2, 25.0);
    let frac = cell.to_fractional(&r);
    assert!((cell.to_cartesian(&frac) - r).norm() < 1e-12);

    let mut pos = vec![r];
    wrap_or_center(&cell, &mut pos);
    let f = cell.to_fractional(&pos[0]);
    assert!(f.iter().all(|&x| (0.0..1.0).contains(&x)), "{:?}", f);
    let mut d = pos[0] - r;
    cell.mic(&mut d);
    assert!(d.norm() < 1e-10);
}

#[test]
fn test_perturbation_wraps_into_cell() {
    let nacl = rock_salt(5.64, [11, 17], [1.0, -1.0]).unwrap();
    let loose = Perturbation::new()
        .rattle(0.4)
        .apply(&nacl, &mut ChaCha8Rng::seed_from_u64(3))
        .unwrap();
    let wrapped = Perturbation::new()
        .rattle(0.4)
        .wrap(true)
        .apply(&nacl, &mut ChaCha8Rng::seed_from_u64(3))
        .unwrap();

    // Some atoms left the box, and wrapping brings all of them back.
    let outside = to_fractional(loose.cell(), loose.pos())
        .iter()
        .any(|f| f.iter().any(|&x| !(0.0..1.0).contains(&x)));
    assert!(outside);
    for f in to_fractional(wrapped.cell(), wrapped.pos()) {
        assert!(f.iter().all(|&x| (0.0..1.0).contains(&x)), "{:?}", f);
    }
    // Wrapping only shifts by lattice vectors.
    for (a, b) in loose.pos().iter().zip(wrapped.pos()) {
        let mut d = b - a;
        wrapped.cell().mic(&mut d);
        assert!(d.norm() < 1e-10);
    }
}

#[test]
fn test_system_validation() {
    let pos = vec![Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0)];
    assert!(matches!(
        System::new(vec![1], pos.clone(), &[]),
        Err(PesError::LengthMismatch { .. })
    ));
    let system = System::new(vec![1, 1], pos.clone(), &[]).unwrap();
    assert!(system.clone().with_charges(vec![1.0]).is_err());
    assert_eq!(
        system.clone().with_bonds(vec![[0, 2]]).unwrap_err(),
        PesError::AtomIndex { index: 2, natom: 2 }
    );
    let mut bad = pos;
    bad[1].y = f64::NAN;
    assert!(System::new(vec![1, 1], bad, &[]).is_err());
}

#[test]
fn test_topology_shells() {
    // Linear chain 0-1-2-3-4
    let topo = Topology::new(5, &[[0, 1], [1, 2], [2, 3], [3, 4]]);
    assert_eq!(topo.neighs1(2).iter().copied().collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(topo.neighs2(0).iter().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(topo.neighs3(0).iter().copied().collect::<Vec<_>>(), vec![3]);
    assert!(topo.neighs3(1).contains(&4));

    // In a three-membered ring every pair is bonded.
    let ring = Topology::new(3, &[[0, 1], [1, 2], [2, 0]]);
    for i in 0..3 {
        assert_eq!(ring.neighs1(i).len(), 2);
        assert!(ring.neighs2(i).is_empty());
        assert!(ring.neighs3(i).is_empty());
    }
}

#[test]
fn test_scalings_from_topology() {
    let system = System::new(vec![6; 4], vec![Vector3::zeros(); 4], &[])
        .unwrap()
        .with_bonds(vec![[0, 1], [1, 2], [2, 3]])
        .unwrap();
    let params = ScalingParams {
        scale1: 0.0,
        scale2: 0.5,
        scale3: 0.8,
    };
    let scalings = Scalings::new(&system, params).unwrap();
    assert_eq!(scalings.len(), 6);
    assert_eq!(scalings.get(1, 0), 0.0);
    assert_eq!(scalings.get(0, 2), 0.5);
    assert_eq!(scalings.get(3, 0), 0.8);

    let bad = ScalingParams {
        scale1: 1.5,
        ..Default::default()
    };
    assert!(Scalings::new(&system, bad).is_err());
    assert!(Scalings::empty().is_empty());
}

#[test]
fn test_supercell() {
    let water = water_box([1, 1, 1], 3.1, 7).unwrap();
    assert_eq!(water.natom(), 3);
    let big = water.supercell(&[2, 3, 1]).unwrap();
    assert_eq!(big.natom(), 18);
    assert_eq!(big.bonds().len(), 12);
    assert_eq!(big.charges().unwrap().len(), 18);
    let volume_ratio = big.cell().volume().unwrap() / water.cell().volume().unwrap();
    assert!((volume_ratio - 6.0).abs() < 1e-10);
    // Every bond keeps its length in the supercell.
    for &[i, j] in big.bonds() {
        let d = big.delta(i, j).norm();
        assert!((d - 0.9572).abs() < 1e-8, "bond {}-{} has length {}", i, j, d);
    }

    assert!(matches!(water.supercell(&[2, 2]), Err(PesError::Supercell(_))));
    assert!(matches!(water.supercell(&[2, 0, 1]), Err(PesError::Supercell(_))));
    let molecule = System::new(vec![1], vec![Vector3::zeros()], &[]).unwrap();
    assert!(molecule.supercell(&[]).is_err());
}

#[test]
fn test_builders() {
    let nacl = rock_salt(5.64, [11, 17], [1.0, -1.0]).unwrap();
    assert_eq!(nacl.natom(), 8);
    assert_eq!(nacl.charges().unwrap().iter().sum::<f64>(), 0.0);
    let shortest = (0..8)
        .flat_map(|i| ((i + 1)..8).map(move |j| (i, j)))
        .map(|(i, j)| nacl.delta(i, j).norm())
        .fold(f64::INFINITY, f64::min);
    assert!((shortest - 2.82).abs() < 1e-12, "{}", shortest);

    let argon = fcc(5.26, 18).unwrap();
    assert!(argon.charges().is_none());
    assert!(fcc(-1.0, 18).is_err());

    let water = common::water32();
    assert_eq!(water.natom(), 96);
    assert_eq!(water.bonds().len(), 64);
    let q: f64 = water.charges().unwrap().iter().sum();
    assert!(q.abs() < 1e-12);
    // Deterministic for a fixed seed.
    assert_eq!(water.pos(), common::water32().pos());
    assert!(water_box([1, 1, 1], 2.0, 1).is_err());
}

#[test]
fn test_neighbor_list_counts() {
    // fcc: 12 nearest neighbours at a / sqrt(2).
    let a = 2.0;
    let argon = fcc(a, 18).unwrap();
    let mut nlist = NeighborList::new(a / 2f64.sqrt() + 0.01).unwrap();
    nlist.update(&argon);
    let mut count = vec![0usize; argon.natom()];
    nlist.for_each(|n| {
        count[n.i] += 1;
        count[n.j] += 1;
    });
    assert!(count.iter().all(|&c| c == 12), "{:?}", count);
    assert!(NeighborList::new(-1.0).is_err());
}

#[test]
fn test_config_defaults_and_json() {
    let config: RunConfig = serde_json::from_str(r#"{"ewald": {"alpha": 0.3}}"#).unwrap();
    assert_eq!(config.ewald.alpha, 0.3);
    assert_eq!(config.scalings, ScalingParams::default());
    assert!(config.cartesian.gpos_rms.is_some());

    let params = EwaldParams::from_tolerance(0.5, 1e-12);
    params.validate().unwrap();
    let erfc_cut = statrs::function::erf::erfc(params.alpha * params.rcut);
    assert!(erfc_cut < 1e-12);

    let cell = Cell::new(&triclinic()).unwrap();
    let gmax = params.gmax_for(&cell);
    assert!(gmax.iter().all(|&g| g >= 1));
    let mut fixed = params.clone();
    fixed.gmax = Some([1, 2, 3]);
    assert_eq!(fixed.gmax_for(&cell), [1, 2, 3]);

    let mut bad = params;
    bad.tolerance = 2.0;
    assert!(bad.validate().is_err());
}
