//! Exciton spectrum from a BSE diagonalization

use crate::ndb::BseDiagoDatabase;
use serde::{Deserialize, Serialize};

/// Energy grid and broadening used to rebuild chi from exciton poles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BseSpectrumOptions {
    /// Lorentzian half width in eV
    pub broadening_ev: f64,
    pub points: usize,
    pub energy_min_ev: f64,
    /// Upper grid bound; the highest exciton plus 2 eV when unset
    pub energy_max_ev: Option<f64>,
}

impl Default for BseSpectrumOptions {
    fn default() -> Self {
        Self {
            broadening_ev: 0.1,
            points: 1000,
            energy_min_ev: 0.0,
            energy_max_ev: None,
        }
    }
}

/// Response function sampled on an energy grid
#[derive(Debug, Clone, PartialEq)]
pub struct ChiSpectrum {
    pub energies: Vec<f64>,
    pub chi_re: Vec<f64>,
    pub chi_im: Vec<f64>,
}

/// Excitons sorted by energy
#[derive(Debug, Clone, PartialEq)]
pub struct ExcitonicStates {
    /// 1-based position of each exciton in the database
    pub index: Vec<f64>,
    pub energies: Vec<f64>,
    pub intensities: Vec<f64>,
}

impl ExcitonicStates {
    pub fn from_database(db: &BseDiagoDatabase) -> Self {
        let mut order: Vec<usize> = (0..db.energies.len()).collect();
        order.sort_by(|a, b| db.energies[*a].total_cmp(&db.energies[*b]));
        Self {
            index: order.iter().map(|i| (*i + 1) as f64).collect(),
            energies: order.iter().map(|i| db.energies[*i]).collect(),
            intensities: order
                .iter()
                .map(|i| db.intensities.get(*i).copied().unwrap_or(0.0))
                .collect(),
        }
    }

    pub fn lowest(&self) -> Option<(f64, f64)> {
        self.energies.first().map(|e| (*e, self.intensities[0]))
    }

    pub fn brightest(&self) -> Option<(f64, f64)> {
        self.intensities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, intensity)| (self.energies[i], *intensity))
    }
}

/// `chi(w) = sum_i I_i / (E_i - w - i*eta)`
pub fn lorentzian_chi(db: &BseDiagoDatabase, options: &BseSpectrumOptions) -> ChiSpectrum {
    let eta = options.broadening_ev.max(f64::EPSILON);
    let top = db.energies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let e_max = options
        .energy_max_ev
        .unwrap_or(if top.is_finite() { top + 2.0 } else { options.energy_min_ev + 1.0 });
    let points = options.points.max(2);
    let step = (e_max - options.energy_min_ev) / (points - 1) as f64;

    let mut spectrum = ChiSpectrum {
        energies: Vec::with_capacity(points),
        chi_re: Vec::with_capacity(points),
        chi_im: Vec::with_capacity(points),
    };
    for n in 0..points {
        let w = options.energy_min_ev + step * n as f64;
        let (mut re, mut im) = (0.0, 0.0);
        for (e, intensity) in db.energies.iter().zip(&db.intensities) {
            let delta = e - w;
            let denom = delta * delta + eta * eta;
            re += intensity * delta / denom;
            im += intensity * eta / denom;
        }
        spectrum.energies.push(w);
        spectrum.chi_re.push(re);
        spectrum.chi_im.push(im);
    }
    spectrum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> BseDiagoDatabase {
        BseDiagoDatabase {
            q_index: 1,
            energies: vec![3.0, 2.0],
            intensities: vec![5.0, 1.0],
        }
    }

    #[test]
    fn test_peak_at_exciton_energy() {
        let options = BseSpectrumOptions {
            points: 401,
            energy_max_ev: Some(4.0),
            ..Default::default()
        };
        let chi = lorentzian_chi(&database(), &options);

        let peak = chi
            .chi_im
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| chi.energies[i])
            .unwrap();
        assert!((peak - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_states_sorted() {
        let states = ExcitonicStates::from_database(&database());
        assert_eq!(states.energies, vec![2.0, 3.0]);
        assert_eq!(states.index, vec![2.0, 1.0]);
        assert_eq!(states.lowest(), Some((2.0, 1.0)));
        assert_eq!(states.brightest(), Some((3.0, 5.0)));
    }
}
