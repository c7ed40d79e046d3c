//! Band window and momentum of a BSE run on top of computed quasiparticles

use super::mapper::NscfMapping;
use super::QpSubset;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BseWindow {
    pub v_min: i64,
    pub c_max: i64,
    pub q_ind: usize,
}

impl BseWindow {
    /// `BSEBands` value
    pub fn bands(&self) -> [i64; 2] {
        [self.v_min, self.c_max]
    }

    /// `BSEQptR` value
    pub fn q_range(&self) -> [i64; 2] {
        [self.q_ind as i64, self.q_ind as i64]
    }
}

pub struct QpAnalyzer;

impl QpAnalyzer {
    /// Union of the bands of every computed subset, widened to the band edges
    pub fn analyze(subsets: &[QpSubset], mapping: &NscfMapping) -> BseWindow {
        let ranges = subsets.iter().flatten();
        let v_min = ranges
            .clone()
            .map(|r| r[2].min(r[3]))
            .min()
            .unwrap_or(mapping.valence as i64)
            .min(mapping.valence as i64)
            .max(1);
        let c_max = ranges
            .map(|r| r[2].max(r[3]))
            .max()
            .unwrap_or(mapping.conduction as i64)
            .max(mapping.conduction as i64);

        let window = BseWindow {
            v_min,
            c_max,
            q_ind: mapping.q_ind,
        };
        debug!(v_min, c_max, q_ind = window.q_ind, "BSE window from computed quasiparticles");
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> NscfMapping {
        NscfMapping {
            valence: 4,
            conduction: 5,
            number_of_kpoints: 8,
            homo: 0.0,
            lumo: 1.1,
            homo_k: 1,
            lumo_k: 3,
            nscf_gap_ev: 1.1,
            direct: false,
            q_ind: 3,
            fermi_energy: 0.2,
            soc: false,
        }
    }

    #[test]
    fn test_window_is_union_of_subsets() {
        let subsets = vec![vec![[1, 8, 2, 4]], vec![[1, 8, 5, 7]]];
        let window = QpAnalyzer::analyze(&subsets, &mapping());
        assert_eq!(window.bands(), [2, 7]);
        assert_eq!(window.q_range(), [3, 3]);
    }

    #[test]
    fn test_window_reaches_band_edges() {
        let subsets = vec![vec![[1, 1, 4, 4]]];
        let window = QpAnalyzer::analyze(&subsets, &mapping());
        assert_eq!(window.bands(), [4, 5]);
        assert_eq!(QpAnalyzer::analyze(&[], &mapping()).bands(), [4, 5]);
    }
}
