use crossbeam_channel::unbounded;
use ewaldcell::core::config::{CartesianThresholds, CellThresholds, DescentParams};
use ewaldcell::core::domain::System;
use ewaldcell::core::error::{PesError, Result};
use ewaldcell::dof::{CartesianDof, Dof, IsoCellDof, Measure};
use ewaldcell::engine::forcefield::SumForceField;
use ewaldcell::engine::neighbors::NeighborList;
use ewaldcell::engine::term::Term;
use ewaldcell::solvers::{SolverEvent, SteepestDescent};
use nalgebra::{Matrix3, Vector3};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

mod common;
use common::lj_ff;

fn params(max_iter: usize) -> DescentParams {
    DescentParams {
        max_iter,
        ..Default::default()
    }
}

#[test]
fn test_descent_parameters() {
    assert!(SteepestDescent::new(DescentParams::default()).is_ok());
    for bad in [
        DescentParams { shrink: 1.5, ..Default::default() },
        DescentParams { grow: 0.5, ..Default::default() },
        DescentParams { initial_step: 0.0, ..Default::default() },
        DescentParams { min_step: f64::NAN, ..Default::default() },
    ] {
        assert!(matches!(
            SteepestDescent::new(bad),
            Err(PesError::InvalidParameter { .. })
        ));
    }
}

#[test]
fn test_cartesian_relaxation_flow() {
    let th = CartesianThresholds {
        gpos_rms: Some(1e-4),
        dpos_rms: None,
    };
    let ff = lj_ff(3, 0.08, 21);
    let mut dof = CartesianDof::new(ff, th).unwrap();
    let x0 = dof.x0().clone();
    let e0 = dof.energy(&x0).unwrap();

    let solver = SteepestDescent::new(params(20_000)).unwrap();
    let (tx, rx) = unbounded();
    let handle = thread::spawn(move || {
        let outcome = solver.solve(&mut dof, Some(&tx));
        (outcome, dof)
    });

    let mut updates = Vec::new();
    let mut logs = 0;
    let mut finished = false;
    for event in rx.iter() {
        match event {
            SolverEvent::Log(_) => logs += 1,
            SolverEvent::StepUpdate(stats) => updates.push(stats),
            SolverEvent::Finished => {
                finished = true;
                break;
            }
        }
    }
    let (outcome, dof) = handle.join().unwrap();
    let outcome = outcome.unwrap();

    assert!(finished, "no Finished event");
    assert!(logs >= 2);
    assert!(outcome.converged, "not converged after {} iterations", outcome.iterations);
    assert!(outcome.energy < e0);
    assert_eq!(updates.len(), outcome.iterations);
    assert!(updates.last().unwrap().converged);
    for pair in updates.windows(2) {
        assert!(pair[1].energy < pair[0].energy, "energy must decrease");
        assert_eq!(pair[1].iteration, pair[0].iteration + 1);
    }

    let gpos = outcome.report.metric(Measure::Gpos).unwrap();
    assert!(gpos.rms < 1e-4);
    assert!(outcome.report.conv_val < 1.0);
    // The DOF is left at the final point.
    assert!((dof.ff().energy() - outcome.energy).abs() < 1e-12);
}

#[test]
fn test_iso_cell_relaxation() {
    let th = CellThresholds {
        gpos_rms: None,
        dpos_rms: None,
        gcell_rms: Some(1e-5),
        dcell_rms: None,
    };
    let mut dof = IsoCellDof::new(lj_ff(3, 0.0, 1), th, true).unwrap();
    assert_eq!(dof.ndof(), 1);
    let x0 = dof.x0().clone();
    let e0 = dof.energy(&x0).unwrap();

    let solver = SteepestDescent::new(params(5_000)).unwrap();
    let outcome = solver.solve(&mut dof, None).unwrap();
    assert!(outcome.converged);
    assert!(outcome.energy <= e0);
    assert!(outcome.iterations >= 1);

    // At the optimum the isotropic pressure vanishes.
    let x = outcome.x.clone();
    let (_, g) = dof.energy_gradient(&x).unwrap();
    assert!(g[0].abs() < 1e-3, "residual gradient {}", g[0]);
    let gcell = outcome.report.metric(Measure::Gcell).unwrap();
    assert!(gcell.rms < 1e-5);
}

/// Counts how often the energy is evaluated.
struct Counting {
    calls: Arc<AtomicUsize>,
}

impl Term for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn compute(
        &mut self,
        _system: &System,
        _nlist: Option<&NeighborList>,
        _gpos: Option<&mut [Vector3<f64>]>,
        _vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(0.0)
    }
}

#[test]
fn test_missing_criterion_is_rejected_before_any_evaluation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let terms: Vec<Box<dyn Term>> = vec![Box::new(Counting {
        calls: Arc::clone(&calls),
    })];
    let ff = SumForceField::new(lj_ff(3, 0.05, 2).system().clone(), terms).unwrap();
    let th = CartesianThresholds {
        gpos_rms: None,
        dpos_rms: None,
    };
    assert_eq!(
        CartesianDof::new(ff, th).err(),
        Some(PesError::NoConvergenceCriterion)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_iteration_limit() {
    let mut dof = CartesianDof::new(lj_ff(3, 0.1, 8), CartesianThresholds::default()).unwrap();
    let solver = SteepestDescent::new(params(3)).unwrap();
    let outcome = solver.solve(&mut dof, None).unwrap();
    assert!(!outcome.converged);
    assert_eq!(outcome.iterations, 3);
}
