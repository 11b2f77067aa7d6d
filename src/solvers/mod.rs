/// Statistics of a single accepted optimization step.
/// Used for progress reporting and the CSV trace of the CLI.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StepStats {
    pub iteration: usize,
    pub energy: f64,
    /// Length of the accepted step in parameter space.
    pub step_length: f64,
    /// Norm of the gradient with respect to the parameters.
    pub gradient_norm: f64,
    pub conv_val: f64,
    pub conv_worst: &'static str,
    pub converged: bool,
}

/// Events emitted by solvers to the main thread.
#[derive(Debug, Clone)]
pub enum SolverEvent {
    /// Diagnostic log message.
    Log(String),

    /// An accepted step with its statistics.
    StepUpdate(StepStats),

    /// Solver has finished its run.
    Finished,
}

pub mod descent;

pub use descent::{DescentOutcome, SteepestDescent};
