use nalgebra::Vector3;
use serde::Serialize;

use crate::core::error::{PesError, Result};

/// The quantities that can be monitored during an optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Measure {
    /// Cartesian gradient of the atoms.
    Gpos,
    /// Displacement of the atoms since the previous check.
    Dpos,
    /// Gradient with respect to the cell vectors.
    Gcell,
    /// Displacement of the cell vectors since the previous check.
    Dcell,
}

impl Measure {
    pub fn rms_name(self) -> &'static str {
        match self {
            Measure::Gpos => "gpos_rms",
            Measure::Dpos => "dpos_rms",
            Measure::Gcell => "gcell_rms",
            Measure::Dcell => "dcell_rms",
        }
    }

    pub fn max_name(self) -> &'static str {
        match self {
            Measure::Gpos => "gpos_max",
            Measure::Dpos => "dpos_max",
            Measure::Gcell => "gcell_max",
            Measure::Dcell => "dcell_max",
        }
    }
}

/// The RMS and the maximum of the norms of one monitored quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metric {
    pub measure: Measure,
    pub rms: f64,
    pub max: f64,
}

/// Outcome of one convergence check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceReport {
    pub converged: bool,
    /// Largest ratio between a measured value and its threshold. Convergence
    /// requires this to drop below one.
    pub conv_val: f64,
    /// Name of the criterion that produced `conv_val`.
    pub conv_worst: &'static str,
    /// Number of violated criteria, `None` on the first call.
    pub conv_count: Option<usize>,
    pub metrics: Vec<Metric>,
}

impl ConvergenceReport {
    fn first_step() -> Self {
        Self {
            converged: false,
            conv_val: 2.0,
            conv_worst: "first_step",
            conv_count: None,
            metrics: Vec::new(),
        }
    }

    pub fn metric(&self, measure: Measure) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.measure == measure)
    }
}

/// Geometry at the previous convergence check.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Snapshot {
    pub pos: Vec<Vector3<f64>>,
    pub cell: Vec<Vector3<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConvergenceState {
    Uninitialized,
    Tracking(Snapshot),
}

/// One quantity to compare against a threshold. A quantity without a
/// threshold is reported but does not take part in the decision.
pub(crate) struct Criterion<'a> {
    pub measure: Measure,
    pub vectors: &'a [Vector3<f64>],
    pub threshold: Option<f64>,
}

impl ConvergenceState {
    /// Advances the state machine. On the first call the snapshot is stored
    /// and a "first step" report is returned; afterwards the criteria built by
    /// `criteria` from the previous snapshot are evaluated and the snapshot is
    /// replaced by `current`.
    pub fn advance<F>(&mut self, current: Snapshot, criteria: F) -> Result<ConvergenceReport>
    where
        F: FnOnce(&Snapshot) -> Vec<(Measure, Vec<Vector3<f64>>, Option<f64>)>,
    {
        match self {
            ConvergenceState::Uninitialized => {
                *self = ConvergenceState::Tracking(current);
                Ok(ConvergenceReport::first_step())
            }
            ConvergenceState::Tracking(last) => {
                let owned = criteria(last);
                let borrowed: Vec<Criterion> = owned
                    .iter()
                    .map(|(measure, vectors, threshold)| Criterion {
                        measure: *measure,
                        vectors,
                        threshold: *threshold,
                    })
                    .collect();
                let report = evaluate(&borrowed)?;
                *last = current;
                Ok(report)
            }
        }
    }
}

/// `(rms, max)` of the norms of a list of vectors. Zero for an empty list.
pub(crate) fn rms_max(vectors: &[Vector3<f64>]) -> (f64, f64) {
    if vectors.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum = 0.0;
    let mut max_sq: f64 = 0.0;
    for v in vectors {
        let sq = v.norm_squared();
        sum += sq;
        max_sq = max_sq.max(sq);
    }
    ((sum / vectors.len() as f64).sqrt(), max_sq.sqrt())
}

/// Compares every criterion with its threshold. The maximum norm is allowed
/// to exceed the RMS threshold by a factor `3 / sqrt(N)`, with `N` the number
/// of scalar components of the quantity. For `N >= 9` that limit is tighter
/// than the RMS threshold, so in large systems the max criterion decides.
pub(crate) fn evaluate(criteria: &[Criterion]) -> Result<ConvergenceReport> {
    let mut metrics = Vec::with_capacity(criteria.len());
    let mut ratios: Vec<(f64, &'static str)> = Vec::new();
    for c in criteria {
        let (rms, max) = rms_max(c.vectors);
        metrics.push(Metric {
            measure: c.measure,
            rms,
            max,
        });
        if let Some(th) = c.threshold {
            let ndof = (3 * c.vectors.len()).max(1) as f64;
            ratios.push((rms / th, c.measure.rms_name()));
            ratios.push((max / (th * 3.0 / ndof.sqrt()), c.measure.max_name()));
        }
    }
    let (conv_val, conv_worst) = ratios
        .iter()
        .copied()
        .fold(None, |acc: Option<(f64, &'static str)>, r| match acc {
            Some(best) if best.0 >= r.0 => Some(best),
            _ => Some(r),
        })
        .ok_or(PesError::NoConvergenceCriterion)?;
    let conv_count = ratios.iter().filter(|(v, _)| *v >= 1.0).count();
    Ok(ConvergenceReport {
        converged: conv_count == 0,
        conv_val,
        conv_worst,
        conv_count: Some(conv_count),
        metrics,
    })
}
