use thiserror::Error;

/// Everything that can go wrong while setting up or evaluating an energy model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PesError {
    #[error("At least one convergence criterion must be present.")]
    NoConvergenceCriterion,

    #[error("A cell optimization requires a system that is periodic.")]
    NotPeriodic,

    #[error("{what} requires a 3D periodic system, got {nvec} cell vector(s)")]
    UnsupportedPeriodicity { what: &'static str, nvec: usize },

    #[error("At most three cell vectors are allowed, got {0}")]
    TooManyCellVectors(usize),

    #[error("The cell vectors are linearly dependent")]
    DegenerateCell,

    #[error("The number of cell vectors can not change (expected {expected}, got {found})")]
    CellDimensionChanged { expected: usize, found: usize },

    #[error("Length mismatch for {what}: expected {expected}, got {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("The system has no atomic charges")]
    MissingCharges,

    #[error("Atom index {index} out of range for a system with {natom} atoms")]
    AtomIndex { index: usize, natom: usize },

    #[error("Non-finite {quantity} produced by term '{term}'")]
    NonFinite { term: String, quantity: &'static str },

    #[error("Invalid supercell repetitions: {0}")]
    Supercell(String),
}

pub type Result<T> = std::result::Result<T, PesError>;

/// Rejects negative, NaN and infinite values for a named parameter.
pub(crate) fn check_non_negative(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(PesError::InvalidParameter { name, value })
    }
}

pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(PesError::LengthMismatch { what, expected, found })
    }
}
