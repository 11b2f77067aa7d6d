use std::collections::BTreeMap;

use log::debug;
use nalgebra::Vector3;

use crate::core::config::ScalingParams;
use crate::core::domain::System;
use crate::core::error::{PesError, Result};

/// One periodic image of an atom pair within the cutoff.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub i: usize,
    pub j: usize,
    /// `pos[j] - pos[i]`, minimum image plus `image` lattice translations.
    pub delta: Vector3<f64>,
    pub d: f64,
    pub image: [i32; 3],
}

impl Neighbor {
    /// The minimum-image pair (exclusions only apply to this one).
    pub fn is_primary(&self) -> bool {
        self.image == [0, 0, 0]
    }
}

#[derive(Debug, Clone, Copy)]
struct BasePair {
    i: usize,
    j: usize,
    delta: Vector3<f64>,
}

/// Enumerates all pairs within a cutoff, including periodic images.
///
/// Only the minimum-image vectors are stored (one per unordered pair), the
/// images are generated on the fly. Memory is therefore quadratic in the
/// number of atoms and independent of the cutoff. Each unordered pair image
/// is visited exactly once; an atom and its own periodic image count as a
/// pair with `i == j`.
#[derive(Debug, Clone)]
pub struct NeighborList {
    rcut: f64,
    base: Vec<BasePair>,
    shifts: Vec<([i32; 3], Vector3<f64>)>,
}

impl NeighborList {
    pub fn new(rcut: f64) -> Result<Self> {
        if !(rcut.is_finite() && rcut > 0.0) {
            return Err(PesError::InvalidParameter {
                name: "rcut",
                value: rcut,
            });
        }
        Ok(Self {
            rcut,
            base: Vec::new(),
            shifts: Vec::new(),
        })
    }

    pub fn rcut(&self) -> f64 {
        self.rcut
    }

    /// Recomputes the minimum-image vectors and the image translations for
    /// the current geometry.
    pub fn update(&mut self, system: &System) {
        let natom = system.natom();
        let cell = system.cell();

        self.base.clear();
        for i in 0..natom {
            if cell.nvec() > 0 {
                self.base.push(BasePair {
                    i,
                    j: i,
                    delta: Vector3::zeros(),
                });
            }
            for j in (i + 1)..natom {
                self.base.push(BasePair {
                    i,
                    j,
                    delta: system.delta(i, j),
                });
            }
        }

        let ranges = cell.image_ranges(self.rcut);
        self.shifts.clear();
        for n0 in -ranges[0]..=ranges[0] {
            for n1 in -ranges[1]..=ranges[1] {
                for n2 in -ranges[2]..=ranges[2] {
                    let image = [n0, n1, n2];
                    let mut shift = Vector3::zeros();
                    for (a, &n) in image.iter().enumerate() {
                        if n != 0 {
                            shift += cell.rvec(a) * n as f64;
                        }
                    }
                    self.shifts.push((image, shift));
                }
            }
        }
        debug!(
            "Neighbor list updated: {} base pairs, {} images, rcut={:.4}",
            self.base.len(),
            self.shifts.len(),
            self.rcut
        );
    }

    /// Calls `f` for every pair image with a separation below the cutoff, in
    /// a deterministic order.
    pub fn for_each<F: FnMut(&Neighbor)>(&self, mut f: F) {
        let rcut_sq = self.rcut * self.rcut;
        for base in &self.base {
            let self_pair = base.i == base.j;
            for (image, shift) in &self.shifts {
                if self_pair && !is_positive_half(image) {
                    continue;
                }
                let delta = base.delta + shift;
                let d_sq = delta.norm_squared();
                if d_sq < rcut_sq {
                    f(&Neighbor {
                        i: base.i,
                        j: base.j,
                        delta,
                        d: d_sq.sqrt(),
                        image: *image,
                    });
                }
            }
        }
    }
}

/// Lexicographically positive image indexes; `n` and `-n` describe the same
/// self-pair, so only one of them is kept.
fn is_positive_half(image: &[i32; 3]) -> bool {
    match (image[0], image[1], image[2]) {
        (n0, _, _) if n0 != 0 => n0 > 0,
        (_, n1, _) if n1 != 0 => n1 > 0,
        (_, _, n2) => n2 > 0,
    }
}

// --- Exclusions ---

/// Scale factors for bonded pairs, sorted by `(i, j)` with `i < j`.
/// Pairs that are not listed interact with scale 1.
#[derive(Debug, Clone, Default)]
pub struct Scalings {
    table: BTreeMap<(usize, usize), f64>,
}

impl Scalings {
    /// Builds the table from the bonded neighbour shells of the system. A
    /// system without bonds has no scaled pairs.
    pub fn new(system: &System, params: ScalingParams) -> Result<Self> {
        params.validate()?;
        let mut table = BTreeMap::new();
        if let Some(topology) = system.topology() {
            for i in 0..topology.natom() {
                let shells = [
                    (topology.neighs1(i), params.scale1),
                    (topology.neighs2(i), params.scale2),
                    (topology.neighs3(i), params.scale3),
                ];
                for (shell, scale) in shells {
                    if scale >= 1.0 {
                        continue;
                    }
                    for &j in shell.iter().filter(|&&j| j > i) {
                        table.insert((i, j), scale);
                    }
                }
            }
        }
        debug!("Scalings: {} scaled pairs", table.len());
        Ok(Self { table })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        let key = if i < j { (i, j) } else { (j, i) };
        self.table.get(&key).copied().unwrap_or(1.0)
    }

    /// Iterates over `(i, j, scale)` with `i < j`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.table.iter().map(|(&(i, j), &s)| (i, j, s))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
