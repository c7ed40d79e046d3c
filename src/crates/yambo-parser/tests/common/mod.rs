//! Common test utilities and fixtures

#![allow(dead_code)]

use std::path::Path;
use yambo_parser::{
    BseDiagoDatabase, DatabaseReader, HfDatabase, MemoryFolder, ParserError, QpDatabase, Result,
};

/// Leading bytes of a netCDF classic file
pub const NETCDF_MAGIC: &[u8] = b"CDF\x01\x00\x00\x00\x00";

pub const GAME_OVER_LOG: &str = "\
 <---> P1: [01] MPI/OPENMP structure, Files & I/O Directories
 <01s> P1: [M  0.120 Gb] Alloc WF ( 0.080)
 <52m-10s> P1: [WR./SAVE//ndb.QP]-----------------------------------
 <01h-00m-02s> P1: Game Over & Game summary
";

pub const QP_OUTPUT: &str = "\
#    K-point            Band               Eo [eV]            E-Eo [eV]          Sc|Eo [eV]
         1                 4             -0.102             -0.521              1.665
         1                 5              2.455              0.612             -2.112
";

/// Reader returning fixed databases, regardless of file content
#[derive(Debug, Clone, Default)]
pub struct StubReader {
    pub qp: Option<QpDatabase>,
    pub hf: Option<HfDatabase>,
    pub bse: Option<BseDiagoDatabase>,
}

impl StubReader {
    fn missing(path: &Path) -> ParserError {
        ParserError::database(path.display().to_string(), "not stubbed")
    }
}

impl DatabaseReader for StubReader {
    fn read_qp(&self, path: &Path) -> Result<QpDatabase> {
        self.qp.clone().ok_or_else(|| Self::missing(path))
    }

    fn read_hf(&self, path: &Path) -> Result<HfDatabase> {
        self.hf.clone().ok_or_else(|| Self::missing(path))
    }

    fn read_bse_diago(&self, path: &Path) -> Result<BseDiagoDatabase> {
        self.bse.clone().ok_or_else(|| Self::missing(path))
    }
}

/// Two quasiparticle states at the first k-point
pub fn qp_database(e_minus_eo: [f64; 2]) -> QpDatabase {
    QpDatabase {
        e: vec![-0.102 + e_minus_eo[0], 2.455 + e_minus_eo[1]],
        eo: vec![-0.102, 2.455],
        z: vec![0.78, 0.79],
        so: None,
        bands: vec![4.0, 5.0],
        kpoints: vec![1.0, 1.0],
        spins: None,
    }
}

pub fn hf_database() -> HfDatabase {
    HfDatabase {
        sx: vec![-15.1, -6.2],
        vxc: vec![-14.0, -12.3],
        bands: vec![4.0, 5.0],
        kpoints: vec![1.0, 1.0],
    }
}

/// Retrieved folder of a finished GW run
pub fn gw_folder() -> MemoryFolder {
    MemoryFolder::new()
        .with_file("LOG/l-gw_ppa_HF_and_locXC_gw0_em1d_CPU_1", GAME_OVER_LOG)
        .with_file("r-gw_ppa_HF_and_locXC_gw0_em1d", " <01h-00m-02s> P1: Game Over & Game summary\n")
        .with_file("ndb.QP", NETCDF_MAGIC)
        .with_file("ndb.HF_and_locXC", NETCDF_MAGIC)
        .with_file("o-gw.qp", QP_OUTPUT)
        .with_file("_scheduler-stderr.txt", "")
}
