pub mod check_delta;
pub mod harmonic;

pub use check_delta::{check_delta, random_dxs, DeltaReport};
pub use harmonic::{estimate_cart_hessian, estimate_hessian};
