use nalgebra::{Matrix3, Vector3};
use rand::Rng;

use crate::core::domain::System;
use crate::core::error::{check_non_negative, Result};
use crate::core::spatial;

/// A composable random perturbation of a geometry.
#[derive(Clone, Debug, Default)]
pub struct Perturbation {
    strain_intensity: Option<f64>, // Max strain component
    rattle_intensity: Option<f64>, // Max atom displacement per component
    wrap: bool,
}

impl Perturbation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a random symmetric strain to the cell, atoms keep their
    /// fractional coordinates.
    pub fn strain(mut self, max_strain: f64) -> Self {
        self.strain_intensity = Some(max_strain);
        self
    }

    pub fn rattle(mut self, max_dist: f64) -> Self {
        self.rattle_intensity = Some(max_dist);
        self
    }

    /// Wraps the atoms back into the cell afterwards.
    pub fn wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn apply(&self, system: &System, rng: &mut impl Rng) -> Result<System> {
        let mut result = system.clone();
        let mut pos = system.pos().to_vec();

        // 1. Strain
        if let Some(mag) = self.strain_intensity {
            check_non_negative("max_strain", mag)?;
            let nvec = system.cell().nvec();
            if nvec > 0 && mag > 0.0 {
                let mut eps = Matrix3::zeros();
                for a in 0..3 {
                    for b in a..3 {
                        let e = rng.gen_range(-mag..mag);
                        eps[(a, b)] = e;
                        eps[(b, a)] = e;
                    }
                }
                let deform = Matrix3::identity() + eps;
                let rvecs: Vec<Vector3<f64>> = system
                    .cell()
                    .rvecs()
                    .iter()
                    .map(|r| (r.transpose() * deform).transpose())
                    .collect();
                for p in pos.iter_mut() {
                    *p = (p.transpose() * deform).transpose();
                }
                result.set_rvecs(&rvecs)?;
            }
        }

        // 2. Rattle
        if let Some(mag) = self.rattle_intensity {
            check_non_negative("max_dist", mag)?;
            if mag > 0.0 {
                for p in pos.iter_mut() {
                    *p += Vector3::from_fn(|_, _| rng.gen_range(-mag..mag));
                }
            }
        }

        if self.wrap {
            spatial::wrap_or_center(result.cell(), &mut pos);
        }
        result.set_pos(&pos)?;
        Ok(result)
    }
}
