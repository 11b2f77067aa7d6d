use log::info;
use nalgebra::{DVector, Vector3};

use crate::core::config::CartesianThresholds;
use crate::core::error::{check_len, PesError, Result};
use crate::dof::convergence::{ConvergenceReport, ConvergenceState, Measure, Snapshot};
use crate::dof::Dof;
use crate::engine::forcefield::SumForceField;

/// Cartesian coordinates of all atoms, or of a selection of atoms.
pub struct CartesianDof {
    ff: SumForceField,
    thresholds: CartesianThresholds,
    select: Option<Vec<usize>>,
    x0: DVector<f64>,
    pos: Vec<Vector3<f64>>,
    gpos: Vec<Vector3<f64>>,
    state: ConvergenceState,
}

impl CartesianDof {
    pub fn new(ff: SumForceField, thresholds: CartesianThresholds) -> Result<Self> {
        thresholds.require_criterion()?;
        let pos = ff.system().pos().to_vec();
        let x0 = flatten(pos.iter());
        info!("Cartesian DOF: {} parameters", x0.len());
        Ok(Self {
            gpos: vec![Vector3::zeros(); pos.len()],
            ff,
            thresholds,
            select: None,
            x0,
            pos,
            state: ConvergenceState::Uninitialized,
        })
    }

    /// Only the atoms in `select` move; the others keep their positions.
    pub fn with_select(
        ff: SumForceField,
        thresholds: CartesianThresholds,
        select: Vec<usize>,
    ) -> Result<Self> {
        let natom = ff.system().natom();
        let mut seen = vec![false; natom];
        for &index in &select {
            if index >= natom {
                return Err(PesError::AtomIndex { index, natom });
            }
            if seen[index] {
                return Err(PesError::InvalidParameter {
                    name: "duplicate atom in selection",
                    value: index as f64,
                });
            }
            seen[index] = true;
        }
        let mut dof = Self::new(ff, thresholds)?;
        dof.x0 = flatten(select.iter().map(|&i| &dof.pos[i]));
        info!("Cartesian DOF restricted to {} atoms", select.len());
        dof.select = Some(select);
        Ok(dof)
    }

    pub fn select(&self) -> Option<&[usize]> {
        self.select.as_deref()
    }

    pub fn into_ff(self) -> SumForceField {
        self.ff
    }

    fn update(&mut self, x: &DVector<f64>) -> Result<()> {
        check_len("x", self.x0.len(), x.len())?;
        match &self.select {
            None => {
                for (i, p) in self.pos.iter_mut().enumerate() {
                    *p = Vector3::new(x[3 * i], x[3 * i + 1], x[3 * i + 2]);
                }
            }
            Some(select) => {
                for (k, &i) in select.iter().enumerate() {
                    self.pos[i] = Vector3::new(x[3 * k], x[3 * k + 1], x[3 * k + 2]);
                }
            }
        }
        self.ff.update_pos(&self.pos)
    }

    fn selected(&self, v: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        match &self.select {
            None => v.to_vec(),
            Some(select) => select.iter().map(|&i| v[i]).collect(),
        }
    }
}

impl Dof for CartesianDof {
    fn x0(&self) -> &DVector<f64> {
        &self.x0
    }

    fn energy(&mut self, x: &DVector<f64>) -> Result<f64> {
        self.update(x)?;
        self.ff.compute(None, None)
    }

    fn energy_gradient(&mut self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        self.update(x)?;
        self.gpos.iter_mut().for_each(|g| *g = Vector3::zeros());
        let e = self.ff.compute(Some(self.gpos.as_mut_slice()), None)?;
        let gx = match &self.select {
            None => flatten(self.gpos.iter()),
            Some(select) => flatten(select.iter().map(|&i| &self.gpos[i])),
        };
        Ok((e, gx))
    }

    fn reset(&mut self) -> Result<()> {
        let x0 = self.x0.clone();
        self.update(&x0)?;
        self.gpos.iter_mut().for_each(|g| *g = Vector3::zeros());
        self.state = ConvergenceState::Uninitialized;
        Ok(())
    }

    fn check_convergence(&mut self) -> Result<ConvergenceReport> {
        let th = self.thresholds;
        th.require_criterion()?;
        let current = Snapshot {
            pos: self.pos.clone(),
            cell: Vec::new(),
        };
        let gpos = self.selected(&self.gpos);
        let pos = self.selected(&self.pos);
        let select = self.select.clone();
        self.state.advance(current, |last| {
            let last_pos: Vec<Vector3<f64>> = match &select {
                None => last.pos.clone(),
                Some(select) => select.iter().map(|&i| last.pos[i]).collect(),
            };
            let dpos = pos.iter().zip(&last_pos).map(|(p, l)| p - l).collect();
            vec![
                (Measure::Gpos, gpos, th.gpos_rms),
                (Measure::Dpos, dpos, th.dpos_rms),
            ]
        })
    }

    fn ff(&self) -> &SumForceField {
        &self.ff
    }
}

/// Concatenates 3-vectors into one flat vector.
pub(crate) fn flatten<'a>(vectors: impl Iterator<Item = &'a Vector3<f64>>) -> DVector<f64> {
    let data: Vec<f64> = vectors.flat_map(|v| v.iter().copied()).collect();
    DVector::from_vec(data)
}
