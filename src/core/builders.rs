use nalgebra::{Rotation3, Unit, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::core::domain::System;
use crate::core::error::{check_non_negative, PesError, Result};

/// `e^2 / (4 pi eps0)` in eV Angstrom. Charges in units of `e` multiplied by
/// the square root of this constant give Coulomb energies in eV.
pub const COULOMB_EV_ANGSTROM: f64 = 14.399645;

/// Fractional coordinates of the four sites of a face-centered cubic cell.
const FCC_SITES: [[f64; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [0.0, 0.5, 0.5],
    [0.5, 0.0, 0.5],
    [0.5, 0.5, 0.0],
];

fn cubic_rvecs(a: f64) -> Result<[Vector3<f64>; 3]> {
    check_non_negative("lattice constant", a)?;
    if a == 0.0 {
        return Err(PesError::InvalidParameter {
            name: "lattice constant",
            value: a,
        });
    }
    Ok([
        Vector3::new(a, 0.0, 0.0),
        Vector3::new(0.0, a, 0.0),
        Vector3::new(0.0, 0.0, a),
    ])
}

/// Conventional cubic cell of a face-centered cubic crystal (4 atoms).
pub fn fcc(a: f64, number: u8) -> Result<System> {
    let rvecs = cubic_rvecs(a)?;
    let pos = FCC_SITES
        .iter()
        .map(|f| Vector3::new(f[0], f[1], f[2]) * a)
        .collect();
    System::new(vec![number; 4], pos, &rvecs)
}

/// Conventional cubic cell of the rock-salt structure: four cations on the
/// fcc sites followed by four anions shifted by `a/2` along x.
pub fn rock_salt(a: f64, numbers: [u8; 2], charges: [f64; 2]) -> Result<System> {
    let rvecs = cubic_rvecs(a)?;
    let mut pos = Vec::with_capacity(8);
    let mut z = Vec::with_capacity(8);
    let mut q = Vec::with_capacity(8);
    for (species, shift) in [(0, 0.0), (1, 0.5)] {
        for f in FCC_SITES {
            pos.push(Vector3::new((f[0] + shift) % 1.0, f[1], f[2]) * a);
            z.push(numbers[species]);
            q.push(charges[species]);
        }
    }
    System::new(z, pos, &rvecs)?.with_charges(q)
}

/// Rigid water geometry: O-H bond length and H-O-H angle.
const WATER_OH: f64 = 0.9572;
const WATER_ANGLE: f64 = 104.52 * std::f64::consts::PI / 180.0;

/// A box of `reps[0] * reps[1] * reps[2]` randomly oriented water molecules
/// on a regular grid in a slightly triclinic cell.
///
/// Atoms are ordered O, H, H per molecule with charges -0.8, +0.4, +0.4 and
/// O-H bonds. The same seed always gives the same system.
pub fn water_box(reps: [usize; 3], spacing: f64, seed: u64) -> Result<System> {
    check_non_negative("spacing", spacing)?;
    if spacing < 2.0 * WATER_OH + 1.0 {
        return Err(PesError::InvalidParameter {
            name: "spacing",
            value: spacing,
        });
    }
    if reps.iter().any(|&r| r == 0) {
        return Err(PesError::Supercell("repetitions must be positive".into()));
    }
    let lengths = reps.map(|r| r as f64 * spacing);
    let rvecs = [
        Vector3::new(lengths[0], 0.0, 0.0),
        Vector3::new(0.02 * lengths[1], lengths[1], 0.0),
        Vector3::new(0.015 * lengths[2], -0.03 * lengths[2], lengths[2]),
    ];

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let half = 0.5 * WATER_ANGLE;
    let h1 = Vector3::new(half.sin(), half.cos(), 0.0) * WATER_OH;
    let h2 = Vector3::new(-half.sin(), half.cos(), 0.0) * WATER_OH;

    let nmol = reps.iter().product::<usize>();
    let mut numbers = Vec::with_capacity(3 * nmol);
    let mut pos = Vec::with_capacity(3 * nmol);
    let mut charges = Vec::with_capacity(3 * nmol);
    let mut bonds = Vec::with_capacity(2 * nmol);
    for i0 in 0..reps[0] {
        for i1 in 0..reps[1] {
            for i2 in 0..reps[2] {
                let frac = [
                    (i0 as f64 + 0.5) / reps[0] as f64,
                    (i1 as f64 + 0.5) / reps[1] as f64,
                    (i2 as f64 + 0.5) / reps[2] as f64,
                ];
                let center = rvecs[0] * frac[0] + rvecs[1] * frac[1] + rvecs[2] * frac[2];
                let axis = Unit::new_normalize(Vector3::new(
                    rng.gen::<f64>() - 0.5,
                    rng.gen::<f64>() - 0.5,
                    rng.gen::<f64>() - 0.5,
                ));
                let rot = Rotation3::from_axis_angle(&axis, rng.gen_range(0.0..std::f64::consts::TAU));

                let o = pos.len();
                bonds.push([o, o + 1]);
                bonds.push([o, o + 2]);
                numbers.extend_from_slice(&[8, 1, 1]);
                charges.extend_from_slice(&[-0.8, 0.4, 0.4]);
                pos.push(center);
                pos.push(center + rot * h1);
                pos.push(center + rot * h2);
            }
        }
    }
    System::new(numbers, pos, &rvecs)?
        .with_charges(charges)?
        .with_bonds(bonds)
}
