//! Structured numeric datasets emitted by the parser
//!
//! Array keys are encoded with [`encode_name`] so that observables such as
//! `E-Eo` and `E_Eo` can never land on the same key.

use crate::bse::{ChiSpectrum, ExcitonicStates};
use crate::error::{ParserError, Result};
use crate::formats::{KpointTable, Observables};
use crate::naming::{decode_name, encode_name};
use crate::ndb::{HfDatabase, QpDatabase};
use ndarray::{Array1, Array2, ArrayD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Output link names
pub mod links {
    pub const ARRAY_EELS: &str = "array_eels";
    pub const ARRAY_EPS: &str = "array_eps";
    pub const ARRAY_ALPHA: &str = "array_alpha";
    pub const ARRAY_QP: &str = "array_qp";
    pub const BANDS_QUASIPARTICLE: &str = "bands_quasiparticle";
    pub const ARRAY_LIFETIME: &str = "array_lifetime";
    pub const BANDS_LIFETIME: &str = "bands_lifetime";
    pub const QP_DB: &str = "QP_db";
    pub const ARRAY_NDB: &str = "array_ndb";
    pub const ARRAY_NDB_QP: &str = "array_ndb_QP";
    pub const ARRAY_NDB_HF: &str = "array_ndb_HFlocXC";
    pub const ARRAY_CHI: &str = "array_chi";
    pub const ARRAY_EXCITONIC_STATES: &str = "array_excitonic_states";
}

/// Named n-dimensional arrays
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayData {
    arrays: BTreeMap<String, ArrayD<f64>>,
}

impl ArrayData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an array under the encoded form of `name`
    pub fn set_array(&mut self, name: &str, array: ArrayD<f64>) {
        self.arrays.insert(encode_name(name), array);
    }

    pub fn set_vector(&mut self, name: &str, values: Vec<f64>) {
        self.set_array(name, Array1::from(values).into_dyn());
    }

    /// Look up by observable name
    pub fn get_array(&self, name: &str) -> Option<&ArrayD<f64>> {
        self.arrays.get(&encode_name(name))
    }

    /// Encoded keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    /// Observable names recovered from the keys, sorted by name
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names = self.arrays.keys().map(|k| decode_name(k)).collect::<Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }
}

/// Band structure with explicit k-point geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandsData {
    pub cell: [[f64; 3]; 3],
    /// `[nk, 3]`
    pub kpoints: Array2<f64>,
    /// Yambo index of each k-point row, 1-based
    #[serde(default)]
    pub kpoint_indices: Vec<u32>,
    pub labels: Vec<String>,
    /// One `[nk, nbands]` array per label
    pub bands: BTreeMap<String, Array2<f64>>,
    pub units: String,
}

impl BandsData {
    /// Build from per-k-point observables
    ///
    /// Every k-point must carry the same observables with the same band count.
    pub fn from_table(
        data: &KpointTable,
        kpoints: &BTreeMap<u32, [f64; 3]>,
        cell: [[f64; 3]; 3],
    ) -> Result<Self> {
        let first = data
            .values()
            .next()
            .ok_or_else(|| ParserError::ShapeMismatch("no k-points".to_string()))?;
        let labels: Vec<String> = first.keys().cloned().collect();
        let nk = data.len();

        let mut k_rows = Vec::with_capacity(nk * 3);
        for k in data.keys() {
            let triplet = kpoints
                .get(k)
                .ok_or_else(|| ParserError::ShapeMismatch(format!("k-point {} has no coordinates", k)))?;
            k_rows.extend_from_slice(triplet);
        }
        let kpoint_array = Array2::from_shape_vec((nk, 3), k_rows)
            .map_err(|e| ParserError::ShapeMismatch(e.to_string()))?;

        let mut bands = BTreeMap::new();
        for label in &labels {
            let nb = first[label].len();
            let mut values = Vec::with_capacity(nk * nb);
            for (k, observables) in data {
                let row = observables.get(label).filter(|row| row.len() == nb).ok_or_else(|| {
                    ParserError::ShapeMismatch(format!("observable {} is ragged at k-point {}", label, k))
                })?;
                values.extend_from_slice(row);
            }
            let array = Array2::from_shape_vec((nk, nb), values)
                .map_err(|e| ParserError::ShapeMismatch(e.to_string()))?;
            bands.insert(label.clone(), array);
        }

        Ok(Self {
            cell,
            kpoints: kpoint_array,
            kpoint_indices: data.keys().copied().collect(),
            labels,
            bands,
            units: "eV".to_string(),
        })
    }
}

/// One output of a parse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dataset {
    Array(ArrayData),
    Bands(BandsData),
    SingleFile { filename: String, content: Vec<u8> },
}

impl Dataset {
    pub fn as_array(&self) -> Option<&ArrayData> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_bands(&self) -> Option<&BandsData> {
        match self {
            Self::Bands(bands) => Some(bands),
            _ => None,
        }
    }

    pub fn as_single_file(&self) -> Option<(&str, &[u8])> {
        match self {
            Self::SingleFile { filename, content } => Some((filename.as_str(), content.as_slice())),
            _ => None,
        }
    }
}

/// Fold an optics table into one array per observable
///
/// K-point `0` holds the aggregate; the other k-points are appended to it in
/// k-point order.
pub fn optics_array(data: &KpointTable) -> ArrayData {
    let (aggregate_key, mut full): (u32, Observables) = match data.get(&0) {
        Some(aggregate) => (0, aggregate.clone()),
        None => match data.iter().next() {
            Some((k, observables)) => (*k, observables.clone()),
            None => return ArrayData::new(),
        },
    };

    for (k, observables) in data {
        if *k == aggregate_key {
            continue;
        }
        for (name, values) in full.iter_mut() {
            if let Some(more) = observables.get(name) {
                values.extend_from_slice(more);
            }
        }
    }

    let mut array = ArrayData::new();
    for (name, values) in full {
        array.set_vector(&name, values);
    }
    array
}

/// Quasiparticle table in the internal Yambo layout
///
/// `Eo`, `E-Eo`, `So` and `Z` are flat arrays; row `i` of `qp_table` holds
/// `[k-point, band, spin]` of entry `i`.
pub fn qp_table_array(data: &KpointTable) -> ArrayData {
    let mut eo = Vec::new();
    let mut e_minus_eo = Vec::new();
    let mut so = Vec::new();
    let mut z = Vec::new();
    let mut table = Vec::new();

    for (k, observables) in data {
        let Some(bands) = observables.get("Band") else { continue };
        for (idx, band) in bands.iter().enumerate() {
            let take = |names: &[&str], into: &mut Vec<f64>| {
                if let Some(v) = names.iter().find_map(|n| observables.get(*n)).and_then(|v| v.get(idx)) {
                    into.push(*v);
                }
            };
            take(&["Eo"], &mut eo);
            take(&["E-Eo"], &mut e_minus_eo);
            take(&["Sc|Eo", "So"], &mut so);
            take(&["Z", "Re(Z)"], &mut z);

            let spin = observables
                .get("Spin_Pol")
                .and_then(|v| v.get(idx))
                .copied()
                .unwrap_or(0.0);
            table.extend_from_slice(&[*k as f64, *band, spin]);
        }
    }

    let mut array = ArrayData::new();
    for (name, values) in [("Eo", eo), ("E-Eo", e_minus_eo), ("So", so), ("Z", z)] {
        if !values.is_empty() {
            array.set_vector(name, values);
        }
    }
    let rows = table.len() / 3;
    if let Ok(qp_table) = Array2::from_shape_vec((rows, 3), table) {
        array.set_array("qp_table", qp_table.into_dyn());
    }
    array
}

/// Band structure when every k-point has coordinates, else the index table
pub fn quasiparticle_dataset(
    data: &KpointTable,
    kpoints: &BTreeMap<u32, [f64; 3]>,
    cell: [[f64; 3]; 3],
) -> Option<Dataset> {
    if data.is_empty() {
        return None;
    }
    if data.keys().all(|k| kpoints.contains_key(k)) {
        match BandsData::from_table(data, kpoints, cell) {
            Ok(bands) => return Some(Dataset::Bands(bands)),
            Err(err) => {
                tracing::warn!(error = %err, "Band structure construction failed, storing the QP table");
            }
        }
    }
    Some(Dataset::Array(qp_table_array(data)))
}

fn observables_array(observables: BTreeMap<String, ArrayD<f64>>) -> ArrayData {
    let mut array = ArrayData::new();
    for (name, values) in observables {
        array.set_array(&name, values);
    }
    array
}

pub fn ndb_qp_array(qp: &QpDatabase) -> ArrayData {
    observables_array(qp.observables())
}

pub fn ndb_hf_array(hf: &HfDatabase) -> ArrayData {
    observables_array(hf.observables())
}

/// Merge `ndb.QP` and `ndb.HF_and_locXC` and add the correlation self-energy
///
/// `Sc = (1/Z)(E - Eo) - Sx + Vxc`, unless `So` was read from the database.
pub fn sigma_c(qp: &QpDatabase, hf: &HfDatabase) -> Result<ArrayData> {
    let sc = match &qp.so {
        Some(so) => so.clone(),
        None => {
            let n = qp.len();
            if qp.z.len() != n || hf.sx.len() != n || hf.vxc.len() != n {
                return Err(ParserError::ShapeMismatch(format!(
                    "ndb.QP has {} states, Z {}, Sx {}, Vxc {}",
                    n,
                    qp.z.len(),
                    hf.sx.len(),
                    hf.vxc.len()
                )));
            }
            qp.e_minus_eo()
                .iter()
                .zip(&qp.z)
                .zip(hf.sx.iter().zip(&hf.vxc))
                .map(|((de, z), (sx, vxc))| de / z - sx + vxc)
                .collect()
        }
    };

    let mut merged = qp.observables();
    for (name, values) in hf.observables() {
        merged.entry(name).or_insert(values);
    }
    let mut array = observables_array(merged);
    array.set_vector("Sc", sc);
    Ok(array)
}

pub fn chi_array(chi: &ChiSpectrum, q_index: u32) -> ArrayData {
    let mut array = ArrayData::new();
    array.set_vector("E", chi.energies.clone());
    array.set_vector("chi-Re", chi.chi_re.clone());
    array.set_vector("chi-Im", chi.chi_im.clone());
    array.set_vector("q", vec![q_index as f64]);
    array
}

pub fn excitonic_states_array(states: &ExcitonicStates) -> ArrayData {
    let mut array = ArrayData::new();
    array.set_vector("index", states.index.clone());
    array.set_vector("energies", states.energies.clone());
    array.set_vector("intensities", states.intensities.clone());
    array
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: Vec<(u32, Vec<(&str, Vec<f64>)>)>) -> KpointTable {
        entries
            .into_iter()
            .map(|(k, observables)| {
                let observables = observables
                    .into_iter()
                    .map(|(name, values)| (name.to_string(), values))
                    .collect();
                (k, observables)
            })
            .collect()
    }

    #[test]
    fn test_sigma_c_from_databases() {
        let qp = QpDatabase {
            e: vec![1.4],
            eo: vec![1.0],
            z: vec![2.0],
            bands: vec![1.0],
            kpoints: vec![1.0],
            ..Default::default()
        };
        let hf = HfDatabase {
            sx: vec![1.0],
            vxc: vec![0.8],
            ..Default::default()
        };

        let array = sigma_c(&qp, &hf).unwrap();
        let sc = array.get_array("Sc").unwrap();
        assert!(sc[0].abs() < 1e-12);
        assert!(array.get_array("Sx").is_some());
        assert!(array.keys().any(|k| k == "E_minus_Eo"));
    }

    #[test]
    fn test_sigma_c_prefers_parsed_so() {
        let qp = QpDatabase {
            e: vec![1.4],
            eo: vec![1.0],
            z: vec![2.0],
            so: Some(vec![0.25]),
            ..Default::default()
        };
        let array = sigma_c(&qp, &HfDatabase::default()).unwrap();
        assert_eq!(array.get_array("Sc").unwrap()[0], 0.25);
    }

    #[test]
    fn test_optics_fold() {
        let data = table(vec![
            (0, vec![("E/ev[1]", vec![0.0, 0.1]), ("EPS-Im[2]", vec![0.0, 0.5])]),
            (2, vec![("E/ev[1]", vec![0.2]), ("EPS-Im[2]", vec![0.7])]),
        ]);
        let array = optics_array(&data);
        assert_eq!(array.get_array("EPS-Im[2]").unwrap().len(), 3);
        assert_eq!(array.names().unwrap(), vec!["E/ev[1]", "EPS-Im[2]"]);
    }

    #[test]
    fn test_qp_table_without_kpoints() {
        let data = table(vec![
            (1, vec![("Band", vec![4.0, 5.0]), ("Eo", vec![-0.1, 2.4]), ("E-Eo", vec![-0.5, 0.6])]),
            (2, vec![("Band", vec![4.0]), ("Eo", vec![-1.3]), ("E-Eo", vec![-0.4])]),
        ]);
        let dataset = quasiparticle_dataset(&data, &BTreeMap::new(), [[0.0; 3]; 3]).unwrap();
        let array = dataset.as_array().unwrap();

        let qp_table = array.get_array("qp_table").unwrap();
        assert_eq!(qp_table.shape(), &[3, 3]);
        assert_eq!(qp_table[[2, 0]], 2.0);
        assert!(array.get_array("Z").is_none());
    }

    #[test]
    fn test_bands_with_kpoints() {
        let data = table(vec![
            (1, vec![("Band", vec![4.0, 5.0]), ("E", vec![-0.6, 3.0])]),
            (2, vec![("Band", vec![4.0, 5.0]), ("E", vec![-1.8, 2.9])]),
        ]);
        let kpoints = BTreeMap::from([(1, [0.0, 0.0, 0.0]), (2, [0.5, 0.0, 0.0])]);
        let dataset = quasiparticle_dataset(&data, &kpoints, [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
            .unwrap();
        let bands = dataset.as_bands().unwrap();
        assert_eq!(bands.bands["E"].shape(), &[2, 2]);
        assert_eq!(bands.kpoints[[1, 0]], 0.5);
    }

    #[test]
    fn test_ragged_bands_fall_back_to_table() {
        let data = table(vec![
            (1, vec![("Band", vec![4.0, 5.0]), ("E", vec![-0.6, 3.0])]),
            (2, vec![("Band", vec![4.0]), ("E", vec![-1.8])]),
        ]);
        let kpoints = BTreeMap::from([(1, [0.0, 0.0, 0.0]), (2, [0.5, 0.0, 0.0])]);
        let dataset = quasiparticle_dataset(&data, &kpoints, [[0.0; 3]; 3]).unwrap();
        assert!(dataset.as_array().is_some());
    }
}
