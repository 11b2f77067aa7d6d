use log::{debug, info, trace};
use nalgebra::{Matrix3, Vector3};

use crate::core::domain::System;
use crate::core::error::{check_len, PesError, Result};
use crate::engine::neighbors::NeighborList;
use crate::engine::term::Term;

/// A force field that sums the contributions of a list of terms.
///
/// The force field owns the system and is the only place where its geometry
/// changes. Gradient and virial buffers passed to [`SumForceField::compute`]
/// are *accumulated into*: callers zero them when they want the derivatives of
/// this force field alone.
pub struct SumForceField {
    system: System,
    terms: Vec<Box<dyn Term>>,
    nlist: Option<NeighborList>,
    nlist_dirty: bool,
    parts: Vec<f64>,
    energy: f64,
}

impl SumForceField {
    pub fn new(system: System, terms: Vec<Box<dyn Term>>) -> Result<Self> {
        let rcut = terms
            .iter()
            .filter_map(|t| t.rcut())
            .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.max(r))));
        let nlist = rcut.map(NeighborList::new).transpose()?;
        info!(
            "Force field with {} term(s) [{}] for {} atoms, nvec={}, neighbor cutoff={:?}",
            terms.len(),
            terms.iter().map(|t| t.name()).collect::<Vec<_>>().join(", "),
            system.natom(),
            system.cell().nvec(),
            rcut
        );
        let nterm = terms.len();
        Ok(Self {
            system,
            terms,
            nlist,
            nlist_dirty: true,
            parts: vec![0.0; nterm],
            energy: 0.0,
        })
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn terms(&self) -> &[Box<dyn Term>] {
        &self.terms
    }

    /// Energy of the last call to `compute`.
    pub fn energy(&self) -> f64 {
        self.energy
    }

    /// Energy of every term in the last call to `compute`, in list order.
    pub fn energy_parts(&self) -> Vec<(&str, f64)> {
        self.terms
            .iter()
            .zip(&self.parts)
            .map(|(t, &e)| (t.name(), e))
            .collect()
    }

    pub fn update_pos(&mut self, pos: &[Vector3<f64>]) -> Result<()> {
        self.system.set_pos(pos)?;
        self.nlist_dirty = true;
        for term in &mut self.terms {
            term.geometry_changed(false);
        }
        Ok(())
    }

    pub fn update_rvecs(&mut self, rvecs: &[Vector3<f64>]) -> Result<()> {
        self.system.set_rvecs(rvecs)?;
        self.nlist_dirty = true;
        for term in &mut self.terms {
            term.geometry_changed(true);
        }
        Ok(())
    }

    /// Computes the total energy. When given, the gradient (`+dE/dpos`) is
    /// added to `gpos` and the virial (`dE/d strain`) to `vtens`.
    pub fn compute(
        &mut self,
        mut gpos: Option<&mut [Vector3<f64>]>,
        mut vtens: Option<&mut Matrix3<f64>>,
    ) -> Result<f64> {
        if let Some(gpos) = gpos.as_deref() {
            check_len("gpos", self.system.natom(), gpos.len())?;
        }
        if self.nlist_dirty {
            if let Some(nlist) = self.nlist.as_mut() {
                nlist.update(&self.system);
            }
            self.nlist_dirty = false;
        }

        let mut energy = 0.0;
        for (term, part) in self.terms.iter_mut().zip(self.parts.iter_mut()) {
            let e = term.compute(
                &self.system,
                self.nlist.as_ref(),
                gpos.as_deref_mut(),
                vtens.as_deref_mut(),
            )?;
            if !e.is_finite() {
                return Err(non_finite(term.as_ref(), "energy"));
            }
            if gpos
                .as_deref()
                .is_some_and(|g| g.iter().any(|v| !v.iter().all(|c| c.is_finite())))
            {
                return Err(non_finite(term.as_ref(), "gradient"));
            }
            if vtens.as_deref().is_some_and(|v| !v.iter().all(|c| c.is_finite())) {
                return Err(non_finite(term.as_ref(), "virial"));
            }
            trace!("{:>12}: {:.12e}", term.name(), e);
            *part = e;
            energy += e;
        }
        debug!("Total energy: {:.12e}", energy);
        self.energy = energy;
        Ok(energy)
    }
}

fn non_finite(term: &dyn Term, quantity: &'static str) -> PesError {
    PesError::NonFinite {
        term: term.name().to_string(),
        quantity,
    }
}
