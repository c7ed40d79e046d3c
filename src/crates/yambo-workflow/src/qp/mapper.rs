//! Band-edge mapping of an nscf run and the energy-window QP search

use super::QpRange;
use crate::error::{Result, WorkflowError};
use crate::provenance::PwOutputs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Distance to the nearest integer below which two crystal coordinates match
const KPOINT_MATCH: f64 = 1e-4;

/// Band edges and gap of an nscf band structure
///
/// Band and k-point indices are 1-based, as yambo counts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NscfMapping {
    pub valence: usize,
    pub conduction: usize,
    pub number_of_kpoints: usize,
    /// Top of the valence band, eV
    pub homo: f64,
    /// Bottom of the conduction band, eV
    pub lumo: f64,
    pub homo_k: usize,
    pub lumo_k: usize,
    #[serde(rename = "nscf_gap_eV")]
    pub nscf_gap_ev: f64,
    pub direct: bool,
    /// Index of the transferred momentum `k_lumo - k_homo`
    pub q_ind: usize,
    pub fermi_energy: f64,
    pub soc: bool,
}

/// Highest occupied and lowest empty band indices (1-based)
pub fn band_edges(number_of_electrons: f64, soc: bool) -> (usize, usize) {
    let nel = number_of_electrons.max(0.0) as usize;
    if soc {
        let valence = nel.saturating_sub(1);
        (valence, valence + 2)
    } else {
        let valence = nel / 2 + nel % 2;
        (valence, valence + 1)
    }
}

impl NscfMapping {
    pub fn from_pw(pw: &PwOutputs) -> Result<Self> {
        let (valence, conduction) = band_edges(pw.number_of_electrons, pw.spin_orbit_calculation);
        let (nk, nb) = pw.bands.dim();
        if valence == 0 || conduction > nb || nk == 0 {
            return Err(WorkflowError::InvalidInputs(format!(
                "band structure with {} k-points and {} bands has no conduction band {}",
                nk, nb, conduction
            )));
        }

        let vb = pw.bands.column(valence - 1);
        let cb = pw.bands.column(conduction - 1);
        let (homo_k, homo) = vb
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (k, e)| if *e > best.1 { (k, *e) } else { best });
        let (lumo_k, lumo) = cb
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (k, e)| if *e < best.1 { (k, *e) } else { best });

        let q_ind = transfer_index(&pw.kpoints, homo_k, lumo_k);

        Ok(Self {
            valence,
            conduction,
            number_of_kpoints: nk,
            homo,
            lumo,
            homo_k: homo_k + 1,
            lumo_k: lumo_k + 1,
            nscf_gap_ev: lumo - homo,
            direct: homo_k == lumo_k,
            q_ind,
            fermi_energy: pw.fermi_energy,
            soc: pw.spin_orbit_calculation,
        })
    }
}

fn is_lattice_vector(v: [f64; 3]) -> bool {
    v.iter().all(|x| (x - x.round()).abs() < KPOINT_MATCH)
}

/// 1-based index of the k-point equal to `k_lumo - k_homo` modulo a
/// reciprocal lattice vector, 1 when the list does not contain it
fn transfer_index(kpoints: &[[f64; 3]], homo_k: usize, lumo_k: usize) -> usize {
    let (Some(kh), Some(kl)) = (kpoints.get(homo_k), kpoints.get(lumo_k)) else {
        return 1;
    };
    let q = [kl[0] - kh[0], kl[1] - kh[1], kl[2] - kh[2]];
    kpoints
        .iter()
        .position(|k| is_lattice_vector([k[0] - q[0], k[1] - q[1], k[2] - q[2]]))
        .map(|i| i + 1)
        .unwrap_or(1)
}

/// Iterative search for the states close to the gap
///
/// Starting from a tolerance, selects every `(k, b)` whose energy lies within
/// it of mid-gap. The tolerance grows by `tolerance_growth` until at least two
/// states are selected and the selection reaches both a valence and a
/// conduction band.
#[derive(Debug, Clone, PartialEq)]
pub struct QpMapper {
    pub tolerance_growth: f64,
    pub max_attempts: u32,
}

impl Default for QpMapper {
    fn default() -> Self {
        Self {
            tolerance_growth: 1.5,
            max_attempts: 64,
        }
    }
}

impl QpMapper {
    pub fn new(tolerance_growth: f64, max_attempts: u32) -> Self {
        Self {
            tolerance_growth,
            max_attempts,
        }
    }

    /// `[k,k,b,b]` per selected state, or `[k,k,b_min,b_max]` for every k-point
    /// with `full_bands`
    pub fn map(&self, pw: &PwOutputs, tolerance: f64, full_bands: bool) -> Result<Vec<QpRange>> {
        if !(tolerance > 0.0) || !(self.tolerance_growth > 1.0) {
            return Err(WorkflowError::InvalidInputs(format!(
                "energy window needs a positive tolerance and growth > 1 (got {} and {})",
                tolerance, self.tolerance_growth
            )));
        }
        let (valence, conduction) = band_edges(pw.number_of_electrons, pw.spin_orbit_calculation);
        let (nk, nb) = pw.bands.dim();
        if valence == 0 || conduction > nb {
            return Err(WorkflowError::InvalidInputs(format!(
                "{} bands cannot hold conduction band {}",
                nb, conduction
            )));
        }

        let top_valence = pw
            .bands
            .column(valence - 1)
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let bottom_conduction = pw
            .bands
            .column(conduction - 1)
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        let mid_gap = top_valence + (bottom_conduction - top_valence) / 2.0;

        let mut tol = tolerance;
        for attempt in 1..=self.max_attempts {
            let selected: Vec<(usize, usize)> = pw
                .bands
                .indexed_iter()
                .filter(|(_, e)| (**e - mid_gap).abs() < tol)
                .map(|(idx, _)| idx)
                .collect();

            if selected.len() >= 2 {
                let ranges = if full_bands {
                    let b_min = selected.iter().map(|(_, b)| *b).min().unwrap_or(0) as i64 + 1;
                    let b_max = selected.iter().map(|(_, b)| *b).max().unwrap_or(0) as i64 + 1;
                    (1..=nk as i64).map(|k| [k, k, b_min, b_max]).collect()
                } else {
                    selected
                        .iter()
                        .map(|(k, b)| {
                            let (k, b) = (*k as i64 + 1, *b as i64 + 1);
                            [k, k, b, b]
                        })
                        .collect::<Vec<_>>()
                };

                let reaches_valence = ranges
                    .iter()
                    .any(|r| valence as i64 >= r[2] || valence as i64 >= r[3]);
                let reaches_conduction = ranges
                    .iter()
                    .any(|r| conduction as i64 <= r[2] || conduction as i64 <= r[3]);

                if reaches_valence && reaches_conduction {
                    info!(
                        states = ranges.len(),
                        tolerance = tol,
                        attempt,
                        "Energy window brackets the gap"
                    );
                    return Ok(ranges);
                }
            }

            debug!(attempt, tolerance = tol, selected = selected.len(), "Widening energy window");
            tol *= self.tolerance_growth;
        }

        Err(WorkflowError::NoQpWindow {
            attempts: self.max_attempts,
            tolerance: tol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// 2 k-points, 4 bands, 4 electrons: valence 2, conduction 3, gap 1 eV
    fn insulator() -> PwOutputs {
        PwOutputs {
            fermi_energy: 0.5,
            spin_orbit_calculation: false,
            number_of_electrons: 4.0,
            kpoints: vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]],
            bands: array![[-5.0, 0.0, 1.2, 6.0], [-4.0, -0.3, 1.0, 5.0]],
        }
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(band_edges(8.0, false), (4, 5));
        assert_eq!(band_edges(9.0, false), (5, 6));
        assert_eq!(band_edges(8.0, true), (7, 9));
    }

    #[test]
    fn test_mapping_of_indirect_gap() {
        let mapping = NscfMapping::from_pw(&insulator()).unwrap();
        assert_eq!((mapping.valence, mapping.conduction), (2, 3));
        assert_eq!(mapping.homo_k, 1);
        assert_eq!(mapping.lumo_k, 2);
        assert!(!mapping.direct);
        assert!((mapping.nscf_gap_ev - 1.0).abs() < 1e-12);
        assert_eq!(mapping.q_ind, 2);
    }

    #[test]
    fn test_mapping_rejects_missing_conduction_band() {
        let mut pw = insulator();
        pw.number_of_electrons = 8.0;
        assert!(NscfMapping::from_pw(&pw).is_err());
    }

    #[test]
    fn test_window_widens_until_gap_is_bracketed() {
        // mid-gap is 0.5 eV; 0.2 eV selects nothing
        let ranges = QpMapper::default().map(&insulator(), 0.2, false).unwrap();
        assert!(ranges.iter().any(|r| r[2] <= 2));
        assert!(ranges.iter().any(|r| r[2] >= 3));
        assert!(ranges.iter().all(|r| r[0] == r[1] && r[2] == r[3]));
    }

    #[test]
    fn test_full_bands_cover_every_kpoint() {
        let ranges = QpMapper::default().map(&insulator(), 0.9, true).unwrap();
        assert_eq!(ranges, vec![[1, 1, 2, 3], [2, 2, 2, 3]]);
    }

    #[test]
    fn test_cap_exhaustion_is_an_error() {
        let mapper = QpMapper::new(1.5, 2);
        let err = mapper.map(&insulator(), 0.01, false).unwrap_err();
        assert!(matches!(err, WorkflowError::NoQpWindow { attempts: 2, .. }));
    }
}
