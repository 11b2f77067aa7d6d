use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Bonded neighbour shells derived from a bond list.
///
/// `neighs1[i]` holds the atoms bonded to `i`, `neighs2[i]` the atoms two
/// bonds away and `neighs3[i]` the atoms three bonds away. An atom only ever
/// appears in its shortest shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    neighs1: Vec<BTreeSet<usize>>,
    neighs2: Vec<BTreeSet<usize>>,
    neighs3: Vec<BTreeSet<usize>>,
}

impl Topology {
    pub fn new(natom: usize, bonds: &[[usize; 2]]) -> Self {
        let mut neighs1 = vec![BTreeSet::new(); natom];
        for &[i0, i1] in bonds {
            neighs1[i0].insert(i1);
            neighs1[i1].insert(i0);
        }

        let mut neighs2 = vec![BTreeSet::new(); natom];
        for i0 in 0..natom {
            for &i1 in &neighs1[i0] {
                for &i2 in &neighs1[i1] {
                    if i2 > i0 && !neighs1[i0].contains(&i2) {
                        neighs2[i0].insert(i2);
                        neighs2[i2].insert(i0);
                    }
                }
            }
        }

        let mut neighs3 = vec![BTreeSet::new(); natom];
        for i0 in 0..natom {
            for &i1 in &neighs1[i0] {
                for &i3 in &neighs2[i1] {
                    if i3 != i0 && !neighs1[i0].contains(&i3) && !neighs2[i0].contains(&i3) {
                        neighs3[i0].insert(i3);
                        neighs3[i3].insert(i0);
                    }
                }
            }
        }

        Self {
            neighs1,
            neighs2,
            neighs3,
        }
    }

    pub fn natom(&self) -> usize {
        self.neighs1.len()
    }

    pub fn neighs1(&self, i: usize) -> &BTreeSet<usize> {
        &self.neighs1[i]
    }

    pub fn neighs2(&self, i: usize) -> &BTreeSet<usize> {
        &self.neighs2[i]
    }

    pub fn neighs3(&self, i: usize) -> &BTreeSet<usize> {
        &self.neighs3[i]
    }
}
