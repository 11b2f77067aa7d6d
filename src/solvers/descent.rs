use std::time::Instant;

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use nalgebra::DVector;

use crate::core::config::DescentParams;
use crate::core::error::{PesError, Result};
use crate::dof::{ConvergenceReport, Dof};
use crate::solvers::{SolverEvent, StepStats};

/// Result of a minimization.
#[derive(Debug, Clone)]
pub struct DescentOutcome {
    pub converged: bool,
    pub iterations: usize,
    pub energy: f64,
    pub x: DVector<f64>,
    pub report: ConvergenceReport,
}

/// Steepest descent with a backtracking step length.
///
/// Every trial moves a distance `step` along the negative gradient. A trial
/// that lowers the energy is accepted and the step grows; otherwise the step
/// shrinks and the trial is repeated from the same point. After each accepted
/// step the DOF decides whether the minimization converged.
pub struct SteepestDescent {
    params: DescentParams,
}

impl SteepestDescent {
    pub fn new(params: DescentParams) -> Result<Self> {
        for (name, value) in [
            ("initial_step", params.initial_step),
            ("min_step", params.min_step),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(PesError::InvalidParameter { name, value });
            }
        }
        if !(params.grow >= 1.0) {
            return Err(PesError::InvalidParameter {
                name: "grow",
                value: params.grow,
            });
        }
        if !(params.shrink > 0.0 && params.shrink < 1.0) {
            return Err(PesError::InvalidParameter {
                name: "shrink",
                value: params.shrink,
            });
        }
        Ok(Self { params })
    }

    /// Minimizes the energy of `dof`, starting from its `x0`. Progress is
    /// reported on `tx` when given. The DOF is left at the final point.
    pub fn solve<D: Dof + ?Sized>(
        &self,
        dof: &mut D,
        tx: Option<&Sender<SolverEvent>>,
    ) -> Result<DescentOutcome> {
        let send = |event: SolverEvent| {
            if let Some(tx) = tx {
                let _ = tx.send(event);
            }
        };

        // The first check only records the starting geometry.
        let mut x = dof.x0().clone();
        let (mut energy, mut grad) = dof.energy_gradient(&x)?;
        let mut report = dof.check_convergence()?;
        send(SolverEvent::Log(format!(
            "Starting steepest descent: {} parameters, energy {:.10e}",
            x.len(),
            energy
        )));

        let start_time = Instant::now();
        let mut step = self.params.initial_step;
        let mut iterations = 0;
        let mut stalled = false;

        while iterations < self.params.max_iter {
            let gnorm = grad.norm();
            if gnorm == 0.0 {
                // Already at a stationary point; the check below decides.
                report = dof.check_convergence()?;
                if report.converged {
                    break;
                }
            }

            // Backtracking along the negative gradient.
            let direction = if gnorm > 0.0 { -&grad / gnorm } else { grad.clone() };
            let accepted = loop {
                let x_trial = &x + &direction * step;
                let (e_trial, g_trial) = dof.energy_gradient(&x_trial)?;
                if e_trial < energy {
                    break Some((x_trial, e_trial, g_trial));
                }
                step *= self.params.shrink;
                if step < self.params.min_step {
                    break None;
                }
            };

            let Some((x_new, e_new, g_new)) = accepted else {
                warn!("Line search failed below step {:.3e}", self.params.min_step);
                stalled = true;
                break;
            };
            let step_length = (&x_new - &x).norm();
            x = x_new;
            energy = e_new;
            grad = g_new;
            iterations += 1;
            step *= self.params.grow;

            report = dof.check_convergence()?;
            debug!(
                "Iteration {}: energy={:.10e}, step={:.3e}, worst={} ({:.3})",
                iterations, energy, step_length, report.conv_worst, report.conv_val
            );
            send(SolverEvent::StepUpdate(StepStats {
                iteration: iterations,
                energy,
                step_length,
                gradient_norm: grad.norm(),
                conv_val: report.conv_val,
                conv_worst: report.conv_worst,
                converged: report.converged,
            }));
            if report.converged {
                break;
            }
        }

        if stalled {
            // The last trial was rejected; move the DOF back to the best point.
            dof.energy_gradient(&x)?;
        }
        info!(
            "Steepest descent finished after {} iterations in {:.2?}: energy={:.10e}, converged={}",
            iterations,
            start_time.elapsed(),
            energy,
            report.converged
        );
        send(SolverEvent::Log(format!(
            "Finished after {} iterations (converged: {})",
            iterations, report.converged
        )));
        send(SolverEvent::Finished);

        Ok(DescentOutcome {
            converged: report.converged,
            iterations,
            energy,
            x,
            report,
        })
    }
}
