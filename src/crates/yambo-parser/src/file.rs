//! Classification and decoding of retrieved files
//!
//! [`classify`] is a pure function of the file name and the first bytes of the
//! file. Database types are only accepted when the bytes carry a netCDF
//! (`CDF\x01`, `CDF\x02`) or HDF5 (`\x89HDF`) signature, so a truncated or
//! placeholder `ndb.QP` is reported as [`YamboFileType::Unknown`].

use crate::error::Result;
use crate::formats::log::{scan_log, LogEvidence};
use crate::formats::report::scan_report_qp;
use crate::formats::table::parse_table;
use crate::formats::KpointTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of leading bytes [`classify`] looks at
pub const SIGNATURE_LEN: usize = 8;

/// Kind of optical spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpticsKind {
    /// Electron energy loss
    Eel,
    /// Dielectric function
    Eps,
    /// Polarizability
    Alpha,
}

impl OpticsKind {
    pub fn link_name(&self) -> &'static str {
        match self {
            Self::Eel => crate::datasets::links::ARRAY_EELS,
            Self::Eps => crate::datasets::links::ARRAY_EPS,
            Self::Alpha => crate::datasets::links::ARRAY_ALPHA,
        }
    }
}

/// Type of a retrieved file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YamboFileType {
    Log,
    Report,
    OutputGw,
    Optics(OpticsKind),
    NdbQp,
    NdbHfLocXc,
    Unknown,
}

impl YamboFileType {
    pub fn is_database(&self) -> bool {
        matches!(self, Self::NdbQp | Self::NdbHfLocXc)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Log | Self::Report | Self::OutputGw | Self::Optics(_))
    }
}

impl fmt::Display for YamboFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => write!(f, "log"),
            Self::Report => write!(f, "report"),
            Self::OutputGw => write!(f, "output_gw"),
            Self::Optics(OpticsKind::Eel) => write!(f, "optics(eel)"),
            Self::Optics(OpticsKind::Eps) => write!(f, "optics(eps)"),
            Self::Optics(OpticsKind::Alpha) => write!(f, "optics(alpha)"),
            Self::NdbQp => write!(f, "ndb.QP"),
            Self::NdbHfLocXc => write!(f, "ndb.HF_and_locXC"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

fn has_database_signature(head: &[u8]) -> bool {
    head.starts_with(b"CDF\x01") || head.starts_with(b"CDF\x02") || head.starts_with(b"\x89HDF")
}

fn basename(filename: &str) -> &str {
    filename.rsplit('/').next().unwrap_or(filename)
}

/// Classify a file from its name and leading bytes
pub fn classify(filename: &str, head: &[u8]) -> YamboFileType {
    let name = basename(filename);

    if name == "ndb.QP" || name == "ndb.HF_and_locXC" {
        if !has_database_signature(head) {
            return YamboFileType::Unknown;
        }
        return if name == "ndb.QP" {
            YamboFileType::NdbQp
        } else {
            YamboFileType::NdbHfLocXc
        };
    }

    if name.starts_with("l-") || name.starts_with("l_") {
        return YamboFileType::Log;
    }
    if name.starts_with("r-") || name.starts_with("r_") {
        return YamboFileType::Report;
    }
    if name.starts_with("o-") || name.starts_with("o_") {
        // o-<job>.eel_q1_..., o-<job>.eps_q1_..., o-<job>.alpha_q1_...
        let suffix = name.split_once('.').map(|(_, s)| s).unwrap_or("");
        if suffix.starts_with("eel") || suffix.contains(".eel") {
            return YamboFileType::Optics(OpticsKind::Eel);
        }
        if suffix.starts_with("eps") || suffix.contains(".eps") {
            return YamboFileType::Optics(OpticsKind::Eps);
        }
        if suffix.starts_with("alpha") || suffix.contains(".alpha") {
            return YamboFileType::Optics(OpticsKind::Alpha);
        }
        if suffix.ends_with("qp") {
            return YamboFileType::OutputGw;
        }
    }

    YamboFileType::Unknown
}

/// One parsed text file
#[derive(Debug, Clone, PartialEq)]
pub struct YamboFile {
    pub filename: String,
    pub file_type: YamboFileType,
    pub data: KpointTable,
    pub kpoints: BTreeMap<u32, [f64; 3]>,
    pub evidence: LogEvidence,
}

impl YamboFile {
    /// Decode the content of a text file of the given type
    pub fn from_text(filename: &str, file_type: YamboFileType, text: &str) -> Result<Self> {
        let mut file = Self {
            filename: basename(filename).to_string(),
            file_type,
            data: KpointTable::new(),
            kpoints: BTreeMap::new(),
            evidence: LogEvidence::default(),
        };

        match file_type {
            YamboFileType::Log => {
                file.evidence = scan_log(text);
            }
            YamboFileType::Report => {
                file.evidence = scan_log(text);
                let qp = scan_report_qp(text);
                file.data = qp.data;
                file.kpoints = qp.kpoints;
            }
            YamboFileType::OutputGw | YamboFileType::Optics(_) => {
                file.data = parse_table(filename, text)?.to_kpoint_table();
            }
            YamboFileType::NdbQp | YamboFileType::NdbHfLocXc | YamboFileType::Unknown => {}
        }

        Ok(file)
    }

    /// Whether this is the report of a database setup run
    pub fn is_setup_report(&self) -> bool {
        self.file_type == YamboFileType::Report && self.filename.contains("setup")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_name() {
        assert_eq!(classify("l-gw_ppa_HF_and_locXC_gw0_em1d", b""), YamboFileType::Log);
        assert_eq!(classify("LOG/l-gw_CPU_1", b""), YamboFileType::Log);
        assert_eq!(classify("r-gw_ppa_HF_and_locXC_gw0_em1d", b""), YamboFileType::Report);
        assert_eq!(classify("o-gw.qp", b""), YamboFileType::OutputGw);
        assert_eq!(
            classify("o-bse.eps_q1_diago_bse", b""),
            YamboFileType::Optics(OpticsKind::Eps)
        );
        assert_eq!(
            classify("o-bse.eel_q1_diago_bse", b""),
            YamboFileType::Optics(OpticsKind::Eel)
        );
        assert_eq!(classify("job.out", b""), YamboFileType::Unknown);
    }

    #[test]
    fn test_database_requires_signature() {
        assert_eq!(classify("ndb.QP", b"CDF\x02\x00\x00\x00\x00"), YamboFileType::NdbQp);
        assert_eq!(classify("ndb.HF_and_locXC", b"\x89HDF\r\n\x1a\n"), YamboFileType::NdbHfLocXc);
        assert_eq!(classify("ndb.QP", b"not a db"), YamboFileType::Unknown);
    }

    #[test]
    fn test_report_collects_qp_and_flags() {
        let text = "\
  QP [eV] @ K [1] (iku):  0.000000  0.000000  0.000000
   B=4 Eo= -0.10 E= -0.62 E-Eo= -0.52
 <10s> P1: Game Over & Game summary
";
        let file = YamboFile::from_text("r-gw_gw0", YamboFileType::Report, text).unwrap();
        assert!(file.evidence.game_over);
        assert_eq!(file.kpoints[&1], [0.0, 0.0, 0.0]);
        assert_eq!(file.data[&1]["Eo"], vec![-0.10]);
    }
}
