use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::unbounded;
use log::{info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use ewaldcell::core::builders::{rock_salt, water_box, COULOMB_EV_ANGSTROM};
use ewaldcell::core::config::{EwaldParams, RunConfig};
use ewaldcell::core::domain::System;
use ewaldcell::dof::{AnisoCellDof, CartesianDof, Dof, FullCellDof, IsoCellDof};
use ewaldcell::engine::ewald::ewald_terms;
use ewaldcell::engine::forcefield::SumForceField;
use ewaldcell::engine::neighbors::Scalings;
use ewaldcell::engine::pair::{BuckinghamParams, PairPotBuckingham, PairTerm};
use ewaldcell::engine::perturb::Perturbation;
use ewaldcell::engine::term::Term;
use ewaldcell::logging;
use ewaldcell::solvers::{DescentOutcome, SolverEvent, SteepestDescent};

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Ewald electrostatics and cell relaxation", long_about = None)]
struct Args {
    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// JSON file with any subset of the run configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads for batch evaluations (0 = all cores)
    #[arg(short, long, default_value_t = 0, global = true)]
    threads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate the Ewald energy of a test system for several screening parameters
    Scan {
        /// Test system
        #[arg(long, value_enum, default_value_t = TestSystem::Water)]
        system: TestSystem,

        /// Screening parameters (1/Angstrom)
        #[arg(long, value_delimiter = ',', default_values_t = vec![0.05, 0.1, 0.2, 0.5, 1.0])]
        alphas: Vec<f64>,

        /// Real-space cutoff times alpha
        #[arg(long, default_value_t = 5.5)]
        cutoff_factor: f64,

        /// Seed for the water box
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },

    /// Relax a rattled MgO crystal (Ewald + Buckingham) with steepest descent
    Relax {
        /// Degrees of freedom of the relaxation
        #[arg(long, value_enum, default_value_t = DofKind::Cartesian)]
        dof: DofKind,

        /// Lattice constant of the conventional cell (Angstrom)
        #[arg(long, default_value_t = 4.212)]
        lattice: f64,

        /// Repetitions of the conventional cell along each axis
        #[arg(long, default_value_t = 1)]
        supercell: usize,

        /// Maximum random displacement per Cartesian component (Angstrom)
        #[arg(long, default_value_t = 0.05)]
        rattle: f64,

        /// Maximum random strain component
        #[arg(long, default_value_t = 0.0)]
        strain: f64,

        /// Keep the fractional coordinates fixed (cell DOFs only)
        #[arg(long)]
        frozen: bool,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Write one CSV row per accepted step
        #[arg(long)]
        trace: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TestSystem {
    /// 32 randomly oriented water molecules
    Water,
    /// Conventional rock-salt cell with unit charges and unit nearest-neighbour distance
    Nacl,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum DofKind {
    Cartesian,
    Full,
    Aniso,
    Iso,
}

// --- Initialization Helpers ---

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        None => Ok(RunConfig::default()),
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config file {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        }
    }
}

/// MgO with formal charges and the Buckingham parameters of Lewis and Catlow.
/// Energies in eV, lengths in Angstrom.
fn create_mgo(lattice: f64, supercell: usize) -> Result<System> {
    let q = 2.0 * COULOMB_EV_ANGSTROM.sqrt();
    let unit = rock_salt(lattice, [12, 8], [q, -q]).context("Failed to build MgO cell")?;
    if supercell > 1 {
        Ok(unit.supercell(&[supercell; 3])?)
    } else {
        Ok(unit)
    }
}

fn create_mgo_ff(system: System, ewald: &EwaldParams) -> Result<SumForceField> {
    // Index 0 = Mg, index 1 = O
    let type_ids = system
        .numbers()
        .iter()
        .map(|&z| match z {
            12 => Ok(0),
            8 => Ok(1),
            _ => Err(anyhow!("No Buckingham parameters for element {}", z)),
        })
        .collect::<Result<Vec<usize>>>()?;
    let buck = PairPotBuckingham::new(type_ids, 10.0)?
        .with_pair(0, 1, BuckinghamParams { a: 1280.1, rho: 0.29969, c: 0.0 })?
        .with_pair(1, 1, BuckinghamParams { a: 22764.0, rho: 0.149, c: 27.88 })?;

    let mut terms: Vec<Box<dyn Term>> = ewald_terms(&system, ewald, Scalings::empty())?;
    terms.push(Box::new(PairTerm::new(Box::new(buck), Scalings::empty())));
    Ok(SumForceField::new(system, terms)?)
}

// --- Commands ---

fn run_scan(system: TestSystem, alphas: &[f64], cutoff_factor: f64, seed: u64, config: &RunConfig) -> Result<()> {
    let system = match system {
        TestSystem::Water => water_box([4, 4, 2], 3.1, seed)?,
        TestSystem::Nacl => rock_salt(2.0, [11, 17], [1.0, -1.0])?,
    };
    let scalings = Scalings::new(&system, config.scalings)?;

    // Every alpha gets its own force field, so the batch runs in parallel.
    let rows = alphas
        .par_iter()
        .map(|&alpha| -> Result<(EwaldParams, Vec<f64>, f64)> {
            let mut params = EwaldParams::from_tolerance(alpha, (-cutoff_factor * cutoff_factor).exp());
            params.background = config.ewald.background;
            params.kcut = config.ewald.kcut;
            let terms = ewald_terms(&system, &params, scalings.clone())
                .with_context(|| format!("Invalid Ewald parameters for alpha={}", alpha))?;
            let mut ff = SumForceField::new(system.clone(), terms)?;
            let total = ff.compute(None, None)?;
            let parts = ff.energy_parts().iter().map(|(_, e)| *e).collect();
            Ok((params, parts, total))
        })
        .collect::<Result<Vec<_>>>()?;

    println!("{:>8} {:>10} {:>20} {:>20} {:>20} {:>22}", "alpha", "rcut", "real", "reci", "corr", "total");
    for (params, parts, total) in &rows {
        println!(
            "{:>8.4} {:>10.4} {:>20.12} {:>20.12} {:>20.12} {:>22.14}",
            params.alpha, params.rcut, parts[0], parts[1], parts[2], total
        );
    }
    let spread = rows
        .iter()
        .map(|(_, _, e)| *e)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), e| (lo.min(e), hi.max(e)));
    info!("Spread of the total energy over alpha: {:.3e}", spread.1 - spread.0);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_relax(
    kind: DofKind,
    lattice: f64,
    supercell: usize,
    rattle: f64,
    strain: f64,
    frozen: bool,
    seed: u64,
    trace: Option<PathBuf>,
    config: RunConfig,
) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let system = create_mgo(lattice, supercell)?;
    let system = Perturbation::new()
        .strain(strain)
        .rattle(rattle)
        .wrap(true)
        .apply(&system, &mut rng)?;
    let ff = create_mgo_ff(system, &config.ewald)?;
    let solver = SteepestDescent::new(config.descent.clone())?;

    let mut writer = match &trace {
        Some(path) => Some(
            csv::Writer::from_path(path)
                .with_context(|| format!("Failed to create trace file {}", path.display()))?,
        ),
        None => None,
    };

    // Spawn Solver Thread
    let (tx, rx) = unbounded();
    let handle = thread::Builder::new()
        .name("Solver-Worker".to_string())
        .spawn(move || -> Result<(DescentOutcome, SumForceField)> {
            fn drive<D: Dof>(
                mut dof: D,
                solver: &SteepestDescent,
                tx: &crossbeam_channel::Sender<SolverEvent>,
                into_ff: fn(D) -> SumForceField,
            ) -> Result<(DescentOutcome, SumForceField)> {
                let outcome = solver.solve(&mut dof, Some(tx))?;
                Ok((outcome, into_ff(dof)))
            }
            match kind {
                DofKind::Cartesian => drive(
                    CartesianDof::new(ff, config.cartesian)?,
                    &solver,
                    &tx,
                    CartesianDof::into_ff,
                ),
                DofKind::Full => drive(
                    FullCellDof::new(ff, config.cell, frozen)?,
                    &solver,
                    &tx,
                    FullCellDof::into_ff,
                ),
                DofKind::Aniso => drive(
                    AnisoCellDof::new(ff, config.cell, frozen)?,
                    &solver,
                    &tx,
                    AnisoCellDof::into_ff,
                ),
                DofKind::Iso => drive(
                    IsoCellDof::new(ff, config.cell, frozen)?,
                    &solver,
                    &tx,
                    IsoCellDof::into_ff,
                ),
            }
        })?;

    // Event Loop
    for event in rx.iter() {
        match event {
            SolverEvent::Log(msg) => info!("{}", msg),
            SolverEvent::StepUpdate(stats) => {
                if stats.iteration % 10 == 0 || stats.converged {
                    println!(
                        "{:>6} {:>22.12} {:>12.3e} {:>10} {:>8.3}",
                        stats.iteration, stats.energy, stats.step_length, stats.conv_worst, stats.conv_val
                    );
                }
                if let Some(w) = writer.as_mut() {
                    w.serialize(&stats).context("Failed to write trace row")?;
                }
            }
            SolverEvent::Finished => break,
        }
    }
    if let Some(mut w) = writer {
        w.flush().context("Failed to flush trace file")?;
    }

    let (outcome, ff) = handle
        .join()
        .map_err(|_| anyhow!("Solver thread panicked"))??;
    if !outcome.converged {
        warn!("Relaxation did not converge in {} iterations", outcome.iterations);
    }
    println!("Final energy: {:.12} eV after {} steps", outcome.energy, outcome.iterations);
    for (name, e) in ff.energy_parts() {
        println!("  {:>12}: {:.12}", name, e);
    }
    for (a, r) in ff.system().cell().rvecs().iter().enumerate() {
        println!("  rvec[{}] = [{:.6}, {:.6}, {:.6}]", a, r.x, r.y, r.z);
    }
    Ok(())
}

// --- Main ---

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_with_level(&["ewaldcell"], logging::level_from_verbosity(args.verbose, args.quiet));
    let config = load_config(args.config.as_deref())?;
    config.ewald.validate().context("Invalid Ewald configuration")?;
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("Failed to configure the thread pool")?;
    }

    match args.command {
        Command::Scan {
            system,
            alphas,
            cutoff_factor,
            seed,
        } => {
            if alphas.is_empty() {
                bail!("At least one alpha is required");
            }
            run_scan(system, &alphas, cutoff_factor, seed, &config)
        }
        Command::Relax {
            dof,
            lattice,
            supercell,
            rattle,
            strain,
            frozen,
            seed,
            trace,
        } => run_relax(dof, lattice, supercell, rattle, strain, frozen, seed, trace, config),
    }
}
