pub mod core {
    pub mod builders;
    pub mod config;
    pub mod domain;
    pub mod error;
    pub mod spatial;
    pub mod topology;
}

pub mod engine {
    pub mod ewald;
    pub mod forcefield;
    pub mod neighbors;
    pub mod pair;
    pub mod perturb;
    pub mod term;
}

pub mod analysis;
pub mod dof;
pub mod logging;
pub mod solvers;
