//! Line markers of Yambo log and report files
//!
//! Yambo prefixes progress lines with the elapsed time (`<01h-02m-03s>`),
//! reports memory as `[M  1.234 Gb]`, flags problems with `[ERROR]` and
//! `[WARNING]`, marks written databases with `[WR./SAVE//ndb.QP]` and closes a
//! clean run with `Game Over`.

use super::parse_number;
use regex::Regex;
use std::sync::LazyLock;

static ELAPSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<([0-9dhms\-]+)>").unwrap());

static ELAPSED_PART: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)([dhms])").unwrap());

static MEMORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[M\s+([0-9.]+)\s*(Gb|Mb|Kb)\]").unwrap());

static WRITTEN_DB: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[WR([^\]]+)\]").unwrap());

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Version\s+([0-9]+\.[0-9]+(?:\.[0-9]+)?)").unwrap());

static FERMI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Fermi Level\s*\[ev\]\s*:\s*(-?[0-9.]+(?:[ED][+\-]?[0-9]+)?)").unwrap()
});

/// Kind of an `[ERROR]` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parallelization,
    XParAllocation,
    Allocation,
    CorruptedFragment,
    Other,
}

impl ErrorKind {
    pub fn classify(line: &str) -> Self {
        let lower = line.to_ascii_lowercase();
        if lower.contains("variable not defined") {
            Self::CorruptedFragment
        } else if lower.contains("allocation") && line.contains("X_par") {
            Self::XParAllocation
        } else if lower.contains("allocation") {
            Self::Allocation
        } else if lower.contains("parallel") || lower.contains("cpu structure") {
            Self::Parallelization
        } else {
            Self::Other
        }
    }
}

/// Evidence collected from one log or report file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogEvidence {
    /// Last elapsed-time marker, in seconds
    pub last_time: Option<f64>,
    pub game_over: bool,
    pub p2y_completed: bool,
    pub has_gpu: bool,
    pub yambo_version: Option<String>,
    pub fermi_ev: Option<f64>,
    /// Memory snapshots in Gb, in file order
    pub memory_gb: Vec<f64>,
    pub memstats: Vec<String>,
    pub errors: Vec<(ErrorKind, String)>,
    pub warnings: Vec<String>,
    pub timing: Vec<String>,
    pub written_dbs: Vec<String>,
}

impl LogEvidence {
    pub fn max_memory_gb(&self) -> Option<f64> {
        self.memory_gb.iter().copied().reduce(f64::max)
    }
}

/// Convert an elapsed marker such as `01h-02m-03s` to seconds
pub fn elapsed_seconds(marker: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut matched = false;
    for caps in ELAPSED_PART.captures_iter(marker) {
        let value: f64 = caps[1].parse().ok()?;
        let scale = match &caps[2] {
            "d" => 86_400.0,
            "h" => 3_600.0,
            "m" => 60.0,
            _ => 1.0,
        };
        total += value * scale;
        matched = true;
    }
    matched.then_some(total)
}

/// Scan a log or report file
pub fn scan_log(text: &str) -> LogEvidence {
    let mut evidence = LogEvidence::default();
    let mut in_timing = false;

    for line in text.lines() {
        if let Some(caps) = ELAPSED.captures(line) {
            if let Some(seconds) = elapsed_seconds(&caps[1]) {
                evidence.last_time = Some(seconds);
            }
        }

        if let Some(caps) = MEMORY.captures(line) {
            if let Some(value) = parse_number(&caps[1]) {
                let gb = match &caps[2] {
                    "Mb" => value / 1024.0,
                    "Kb" => value / (1024.0 * 1024.0),
                    _ => value,
                };
                evidence.memory_gb.push(gb);
                evidence.memstats.push(line.trim().to_string());
            }
        }

        for caps in WRITTEN_DB.captures_iter(line) {
            evidence.written_dbs.push(caps[1].trim().to_string());
        }

        if line.contains("[ERROR]") {
            let message = line.trim().to_string();
            evidence.errors.push((ErrorKind::classify(&message), message));
        }
        if line.contains("[WARNING]") {
            evidence.warnings.push(line.trim().to_string());
        }

        if line.contains("Game Over") {
            evidence.game_over = true;
        }
        if line.contains("P2Y completed") {
            evidence.p2y_completed = true;
        }
        if line.contains("CUDA") || line.contains("GPU") {
            evidence.has_gpu = true;
        }

        if evidence.yambo_version.is_none() {
            if let Some(caps) = VERSION.captures(line) {
                evidence.yambo_version = Some(caps[1].to_string());
            }
        }
        if let Some(caps) = FERMI.captures(line) {
            evidence.fermi_ev = parse_number(&caps[1]);
        }

        if line.contains("Timing") {
            in_timing = true;
        }
        if in_timing && !line.trim().is_empty() {
            evidence.timing.push(line.trim().to_string());
        }
    }

    evidence
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
 <---> P1: [01] MPI/OPENMP structure, Files & I/O Directories
 <---> P1: [02] CORE Variables Setup
 <01s> P1: [M  0.051 Gb] Alloc WF ( 0.031)
 <05s> P1: [WR./SAVE//ndb.QP]--------------------------------------
 <01m-02s> P1: [ERROR] Allocation of X_par%blc failed
 <01h-00m-10s> P1: [WARNING] Empty workload for CPU 3
 <01h-00m-12s> P1: Game Over & Game summary
";

    #[test]
    fn test_scan_log_markers() {
        let evidence = scan_log(LOG);

        assert_eq!(evidence.last_time, Some(3612.0));
        assert!(evidence.game_over);
        assert_eq!(evidence.written_dbs, vec!["./SAVE//ndb.QP"]);
        assert_eq!(evidence.errors.len(), 1);
        assert_eq!(evidence.errors[0].0, ErrorKind::XParAllocation);
        assert_eq!(evidence.warnings.len(), 1);
        assert_eq!(evidence.max_memory_gb(), Some(0.051));
    }

    #[test]
    fn test_elapsed_seconds() {
        assert_eq!(elapsed_seconds("1d-01h-00m-01s"), Some(90_001.0));
        assert_eq!(elapsed_seconds("---"), None);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ErrorKind::classify("[ERROR] USER parallel structure does not fit the current run parameters"),
            ErrorKind::Parallelization
        );
        assert_eq!(ErrorKind::classify("[ERROR] Allocation of DIP_iR failed"), ErrorKind::Allocation);
        assert_eq!(
            ErrorKind::classify("[ERROR][NetCDF] NetCDF: Variable not defined"),
            ErrorKind::CorruptedFragment
        );
    }
}
