//! Binary `ndb.*` databases
//!
//! Yambo writes its databases as netCDF (or netCDF-4/HDF5) files. Decoding sits
//! behind [`DatabaseReader`] so the parser can run without libnetcdf: the
//! default [`NoDatabaseReader`] reports every database as unreadable, and the
//! `netcdf` feature enables [`NetcdfReader`].
//!
//! Energies are converted from Hartree to eV by the reader.

use crate::error::{ParserError, Result};
use ndarray::{Array1, ArrayD};
use std::collections::BTreeMap;
use std::path::Path;

/// Hartree to electronvolt
pub const HA2EV: f64 = 27.211_386_245_988;

/// Contents of `ndb.QP`, one entry per (band, k-point, spin) state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QpDatabase {
    pub e: Vec<f64>,
    pub eo: Vec<f64>,
    pub z: Vec<f64>,
    /// Correlation part, when the run stored it
    pub so: Option<Vec<f64>>,
    pub bands: Vec<f64>,
    pub kpoints: Vec<f64>,
    /// Spin index, present for spin-polarized runs
    pub spins: Option<Vec<f64>>,
}

impl QpDatabase {
    pub fn len(&self) -> usize {
        self.e.len()
    }

    pub fn is_empty(&self) -> bool {
        self.e.is_empty()
    }

    pub fn e_minus_eo(&self) -> Vec<f64> {
        self.e.iter().zip(&self.eo).map(|(e, eo)| e - eo).collect()
    }

    pub fn has_nan(&self) -> bool {
        self.e_minus_eo().iter().any(|v| v.is_nan())
    }

    /// Observables keyed by their Yambo names
    pub fn observables(&self) -> BTreeMap<String, ArrayD<f64>> {
        let mut map = BTreeMap::new();
        let mut put = |name: &str, values: &[f64]| {
            map.insert(name.to_string(), vector(values));
        };
        put("E", &self.e);
        put("Eo", &self.eo);
        put("E-Eo", &self.e_minus_eo());
        put("Z", &self.z);
        put("band", &self.bands);
        put("kpoint", &self.kpoints);
        if let Some(so) = &self.so {
            put("So", so);
        }
        if let Some(spins) = &self.spins {
            put("spin", spins);
        }
        map
    }
}

/// Contents of `ndb.HF_and_locXC`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HfDatabase {
    pub sx: Vec<f64>,
    pub vxc: Vec<f64>,
    pub bands: Vec<f64>,
    pub kpoints: Vec<f64>,
}

impl HfDatabase {
    pub fn observables(&self) -> BTreeMap<String, ArrayD<f64>> {
        let mut map = BTreeMap::new();
        map.insert("Sx".to_string(), vector(&self.sx));
        map.insert("Vxc".to_string(), vector(&self.vxc));
        if !self.bands.is_empty() {
            map.insert("band".to_string(), vector(&self.bands));
        }
        if !self.kpoints.is_empty() {
            map.insert("kpoint".to_string(), vector(&self.kpoints));
        }
        map
    }
}

/// Contents of `ndb.BS_diago_Q<n>`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BseDiagoDatabase {
    /// Momentum transfer index taken from the file name
    pub q_index: u32,
    /// Exciton energies in eV
    pub energies: Vec<f64>,
    /// Oscillator strengths `|R_left * R_right|`
    pub intensities: Vec<f64>,
}

fn vector(values: &[f64]) -> ArrayD<f64> {
    Array1::from(values.to_vec()).into_dyn()
}

/// `ndb.BS_diago_Q3` -> 3
pub fn bse_q_index(filename: &str) -> u32 {
    filename
        .rsplit_once("_Q")
        .and_then(|(_, q)| q.parse().ok())
        .unwrap_or(1)
}

/// Decoder for Yambo binary databases
pub trait DatabaseReader: Send + Sync {
    fn read_qp(&self, path: &Path) -> Result<QpDatabase>;

    fn read_hf(&self, path: &Path) -> Result<HfDatabase>;

    fn read_bse_diago(&self, path: &Path) -> Result<BseDiagoDatabase>;
}

/// Reader used when no database backend is compiled in
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDatabaseReader;

impl NoDatabaseReader {
    fn unavailable<T>(path: &Path) -> Result<T> {
        Err(ParserError::DatabaseUnavailable(path.display().to_string()))
    }
}

impl DatabaseReader for NoDatabaseReader {
    fn read_qp(&self, path: &Path) -> Result<QpDatabase> {
        Self::unavailable(path)
    }

    fn read_hf(&self, path: &Path) -> Result<HfDatabase> {
        Self::unavailable(path)
    }

    fn read_bse_diago(&self, path: &Path) -> Result<BseDiagoDatabase> {
        Self::unavailable(path)
    }
}

/// Reader for the default backend of this build
pub fn default_reader() -> Box<dyn DatabaseReader> {
    #[cfg(feature = "netcdf")]
    {
        Box::new(NetcdfReader)
    }
    #[cfg(not(feature = "netcdf"))]
    {
        Box::new(NoDatabaseReader)
    }
}

#[cfg(feature = "netcdf")]
pub use self::netcdf_reader::NetcdfReader;

#[cfg(feature = "netcdf")]
mod netcdf_reader {
    //! Variable layouts:
    //!
    //! - `QP_E_Eo_Z`: `[complex, state, 3]` holding E, Eo, Z (real part used),
    //!   or `[state, 3]` in real-valued files
    //! - `QP_table`: `[column, state]` with band, band, k-point and optional spin
    //! - `Sx_Vxc`: `[complex, state, 2]` or `[state, 2]` holding Sx and Vxc
    //! - `BS_Energies`: `[eigenvalue, complex]`
    //! - `BS_left_Residuals` / `BS_right_Residuals`: `[eigenvalue, complex]`

    use super::*;
    use ndarray::{Array2, Axis, IxDyn};

    #[derive(Debug, Clone, Copy, Default)]
    pub struct NetcdfReader;

    fn filename(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn read_variable(file: &netcdf::File, path: &Path, name: &str) -> Result<ArrayD<f64>> {
        let variable = file
            .variable(name)
            .ok_or_else(|| ParserError::database(filename(path), format!("missing variable {}", name)))?;
        let shape: Vec<usize> = variable.dimensions().iter().map(|d| d.len()).collect();
        let values: Vec<f64> = variable
            .get_values::<f64, _>(..)
            .map_err(|e| ParserError::database(filename(path), e.to_string()))?;
        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| ParserError::database(filename(path), e.to_string()))
    }

    /// Drop a leading or trailing complex axis of length 2, keeping the real part
    fn real_part(array: ArrayD<f64>, complex_leading: bool) -> ArrayD<f64> {
        if complex_leading && array.ndim() == 3 && array.shape()[0] == 2 {
            return array.index_axis(Axis(0), 0).to_owned();
        }
        if !complex_leading && array.ndim() == 2 && array.shape()[1] == 2 {
            return array.index_axis(Axis(1), 0).to_owned();
        }
        array
    }

    fn as_matrix(array: ArrayD<f64>, path: &Path, name: &str) -> Result<Array2<f64>> {
        array
            .into_dimensionality()
            .map_err(|e| ParserError::database(filename(path), format!("{}: {}", name, e)))
    }

    fn column(matrix: &Array2<f64>, idx: usize) -> Vec<f64> {
        if idx < matrix.ncols() {
            matrix.column(idx).to_vec()
        } else {
            Vec::new()
        }
    }

    impl DatabaseReader for NetcdfReader {
        fn read_qp(&self, path: &Path) -> Result<QpDatabase> {
            let file = netcdf::open(path)?;
            let energies = as_matrix(real_part(read_variable(&file, path, "QP_E_Eo_Z")?, true), path, "QP_E_Eo_Z")?;
            let table = as_matrix(read_variable(&file, path, "QP_table")?, path, "QP_table")?;
            // QP_table is stored column-major: one row per column kind
            let table = if table.nrows() <= 4 && table.ncols() == energies.nrows() {
                table.reversed_axes()
            } else {
                table
            };

            let to_ev = |values: Vec<f64>| values.into_iter().map(|v| v * HA2EV).collect::<Vec<_>>();
            Ok(QpDatabase {
                e: to_ev(column(&energies, 0)),
                eo: to_ev(column(&energies, 1)),
                z: column(&energies, 2),
                so: None,
                bands: column(&table, 0),
                kpoints: column(&table, 2),
                spins: (table.ncols() > 3).then(|| column(&table, 3)),
            })
        }

        fn read_hf(&self, path: &Path) -> Result<HfDatabase> {
            let file = netcdf::open(path)?;
            let values = as_matrix(real_part(read_variable(&file, path, "Sx_Vxc")?, true), path, "Sx_Vxc")?;
            Ok(HfDatabase {
                sx: column(&values, 0).into_iter().map(|v| v * HA2EV).collect(),
                vxc: column(&values, 1).into_iter().map(|v| v * HA2EV).collect(),
                bands: Vec::new(),
                kpoints: Vec::new(),
            })
        }

        fn read_bse_diago(&self, path: &Path) -> Result<BseDiagoDatabase> {
            let file = netcdf::open(path)?;
            let energies = real_part(read_variable(&file, path, "BS_Energies")?, false);
            let left = as_matrix(read_variable(&file, path, "BS_left_Residuals")?, path, "BS_left_Residuals")?;
            let right = as_matrix(read_variable(&file, path, "BS_right_Residuals")?, path, "BS_right_Residuals")?;

            let intensities = left
                .outer_iter()
                .zip(right.outer_iter())
                .map(|(l, r)| {
                    // |(a + ib)(c + id)|
                    let (a, b) = (l[0], l.get(1).copied().unwrap_or(0.0));
                    let (c, d) = (r[0], r.get(1).copied().unwrap_or(0.0));
                    ((a * c - b * d).powi(2) + (a * d + b * c).powi(2)).sqrt()
                })
                .collect();

            Ok(BseDiagoDatabase {
                q_index: bse_q_index(&filename(path)),
                energies: energies.iter().map(|v| v * HA2EV).collect(),
                intensities,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qp_observables() {
        let db = QpDatabase {
            e: vec![1.5, f64::NAN],
            eo: vec![1.0, 2.0],
            z: vec![0.8, 0.8],
            bands: vec![4.0, 5.0],
            kpoints: vec![1.0, 1.0],
            ..Default::default()
        };
        assert!(db.has_nan());
        let observables = db.observables();
        assert_eq!(observables["E-Eo"][0], 0.5);
        assert!(!observables.contains_key("So"));
    }

    #[test]
    fn test_bse_q_index() {
        assert_eq!(bse_q_index("ndb.BS_diago_Q3"), 3);
        assert_eq!(bse_q_index("ndb.BS_diago"), 1);
    }

    #[test]
    fn test_no_reader_reports_unavailable() {
        let err = NoDatabaseReader.read_qp(Path::new("ndb.QP")).unwrap_err();
        assert!(matches!(err, ParserError::DatabaseUnavailable(_)));
    }
}
