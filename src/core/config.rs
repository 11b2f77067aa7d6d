use serde::{Deserialize, Serialize};

use crate::core::domain::Cell;
use crate::core::error::{check_non_negative, PesError, Result};

// --- Electrostatics ---

/// Parameters shared by the three Ewald terms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EwaldParams {
    /// Screening parameter (inverse length).
    pub alpha: f64,
    /// Real-space cutoff.
    pub rcut: f64,
    /// Largest reciprocal index per axis. Derived from `tolerance` when absent.
    pub gmax: Option<[usize; 3]>,
    /// Optional spherical cutoff on |k| in the reciprocal sum.
    pub kcut: Option<f64>,
    /// Target relative size of the neglected Gaussian factors.
    pub tolerance: f64,
    /// Adds the uniform neutralizing background for non-neutral systems.
    pub background: bool,
}

impl Default for EwaldParams {
    fn default() -> Self {
        Self::from_tolerance(0.2, 1e-13)
    }
}

impl EwaldParams {
    /// Picks the real-space cutoff such that `erfc(alpha * rcut)` is of the
    /// order of `tolerance`.
    pub fn from_tolerance(alpha: f64, tolerance: f64) -> Self {
        Self {
            alpha,
            rcut: (-tolerance.ln()).sqrt() / alpha,
            gmax: None,
            kcut: None,
            tolerance,
            background: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_non_negative("alpha", self.alpha)?;
        check_non_negative("rcut", self.rcut)?;
        if self.rcut == 0.0 {
            return Err(PesError::InvalidParameter {
                name: "rcut",
                value: self.rcut,
            });
        }
        if let Some(kcut) = self.kcut {
            check_non_negative("kcut", kcut)?;
        }
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(PesError::InvalidParameter {
                name: "tolerance",
                value: self.tolerance,
            });
        }
        Ok(())
    }

    /// Reciprocal cutoff indexes: the smallest |k| with index `n` along axis
    /// `a` is `2 pi n / |r_a|`, so `exp(-k^2 / 4 alpha^2) < tolerance` beyond
    /// `n = alpha |r_a| sqrt(-ln tol) / pi`.
    pub fn gmax_for(&self, cell: &Cell) -> [usize; 3] {
        if let Some(gmax) = self.gmax {
            return gmax;
        }
        let factor = self.alpha * (-self.tolerance.ln()).sqrt() / std::f64::consts::PI;
        let mut gmax = [0; 3];
        for (a, spacing) in cell.gspacings().into_iter().enumerate() {
            gmax[a] = (factor / spacing).ceil() as usize;
        }
        gmax
    }
}

// --- Exclusions ---

/// Scale factors for pairs separated by one, two or three bonds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingParams {
    pub scale1: f64,
    pub scale2: f64,
    pub scale3: f64,
}

impl Default for ScalingParams {
    fn default() -> Self {
        Self {
            scale1: 0.0,
            scale2: 0.0,
            scale3: 1.0,
        }
    }
}

impl ScalingParams {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("scale1", self.scale1),
            ("scale2", self.scale2),
            ("scale3", self.scale3),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PesError::InvalidParameter { name, value });
            }
        }
        Ok(())
    }
}

// --- Convergence ---

/// Convergence thresholds for Cartesian optimizations. A `None` disables the
/// corresponding criterion; at least one must remain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CartesianThresholds {
    pub gpos_rms: Option<f64>,
    pub dpos_rms: Option<f64>,
}

impl CartesianThresholds {
    /// Fails when every criterion is disabled.
    pub fn require_criterion(&self) -> Result<()> {
        if self.gpos_rms.is_none() && self.dpos_rms.is_none() {
            return Err(PesError::NoConvergenceCriterion);
        }
        Ok(())
    }
}

impl Default for CartesianThresholds {
    fn default() -> Self {
        Self {
            gpos_rms: Some(1e-5),
            dpos_rms: Some(1e-3),
        }
    }
}

/// Convergence thresholds for cell optimizations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CellThresholds {
    pub gpos_rms: Option<f64>,
    pub dpos_rms: Option<f64>,
    pub gcell_rms: Option<f64>,
    pub dcell_rms: Option<f64>,
}

impl CellThresholds {
    /// The gradient of the positions is active unless the fractional
    /// coordinates are frozen.
    pub fn gpos_threshold(&self, do_frozen: bool) -> Option<f64> {
        if do_frozen {
            None
        } else {
            self.gpos_rms
        }
    }

    /// Fails when every criterion that applies is disabled.
    pub fn require_criterion(&self, do_frozen: bool) -> Result<()> {
        if [self.gpos_threshold(do_frozen), self.dpos_rms, self.gcell_rms, self.dcell_rms]
            .iter()
            .all(Option::is_none)
        {
            return Err(PesError::NoConvergenceCriterion);
        }
        Ok(())
    }
}

impl Default for CellThresholds {
    fn default() -> Self {
        Self {
            gpos_rms: Some(1e-5),
            dpos_rms: Some(1e-3),
            gcell_rms: Some(1e-5),
            dcell_rms: Some(1e-3),
        }
    }
}

// --- Optimizer ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DescentParams {
    pub max_iter: usize,
    /// First trial step length along the negative gradient.
    pub initial_step: f64,
    /// Step multiplier after an accepted step.
    pub grow: f64,
    /// Step multiplier after a rejected trial.
    pub shrink: f64,
    /// Below this step length the line search gives up.
    pub min_step: f64,
}

impl Default for DescentParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            initial_step: 1e-2,
            grow: 1.2,
            shrink: 0.5,
            min_step: 1e-14,
        }
    }
}

// --- Top-level configuration (CLI) ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub ewald: EwaldParams,
    pub scalings: ScalingParams,
    pub cartesian: CartesianThresholds,
    pub cell: CellThresholds,
    pub descent: DescentParams,
}
