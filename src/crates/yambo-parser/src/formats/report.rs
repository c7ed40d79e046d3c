//! Quasiparticle blocks of report files
//!
//! ```text
//!  QP [eV] @ K [1] (iku):  0.000000  0.000000  0.000000
//!   B=4 Eo= -0.10 E= -0.62 E-Eo= -0.52 Re(Z)=0.76 Im(Z)=-.13E-2 nlXC=-15.2 lXC=-14.1 So= 1.665
//! ```
//!
//! Each block yields the k-point triplet and one row of observables per band.
//! The `B` key is stored as `Band` so reports and `o-*.qp` files share names.

use super::{parse_number, KpointTable};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static QP_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"QP \[eV\] @ K \[(\d+)\] \(iku\):\s*(\S+)\s+(\S+)\s+(\S+)").unwrap()
});

static PAIR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([A-Za-z][\w()\-]*)=\s*(\S+)").unwrap());

/// Quasiparticle data found in a report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportQp {
    pub data: KpointTable,
    pub kpoints: BTreeMap<u32, [f64; 3]>,
}

pub fn scan_report_qp(text: &str) -> ReportQp {
    let mut report = ReportQp::default();
    let mut current: Option<u32> = None;

    for line in text.lines() {
        if let Some(caps) = QP_HEADER.captures(line) {
            let Ok(k) = caps[1].parse::<u32>() else {
                current = None;
                continue;
            };
            let triplet = [&caps[2], &caps[3], &caps[4]].map(parse_number);
            if let [Some(x), Some(y), Some(z)] = triplet {
                report.kpoints.insert(k, [x, y, z]);
            }
            current = Some(k);
            continue;
        }

        let Some(k) = current else { continue };
        let trimmed = line.trim_start();
        if !trimmed.starts_with("B=") {
            if !trimmed.is_empty() {
                current = None;
            }
            continue;
        }

        let observables = report.data.entry(k).or_default();
        for caps in PAIR.captures_iter(trimmed) {
            let Some(value) = parse_number(&caps[2]) else { continue };
            let name = match &caps[1] {
                "B" => "Band",
                other => other,
            };
            observables.entry(name.to_string()).or_default().push(value);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qp_blocks() {
        let text = "\
 [08] Dyson equation: Newton solver

  QP [eV] @ K [1] (iku):  0.000000  0.000000  0.000000
   B=4 Eo= -0.10 E= -0.62 E-Eo= -0.52 Re(Z)=0.76 Im(Z)=-.1367E-2 So= 1.665
   B=5 Eo=  2.45 E=  3.06 E-Eo=  0.61 Re(Z)=0.77 Im(Z)=-.1457E-2 So=-2.112

  QP [eV] @ K [3] (iku): -0.500000  0.500000  0.000000
   B=4 Eo= -1.31 E= -1.80 E-Eo= -0.49 Re(Z)=0.76 Im(Z)=-.1312E-2 So= 1.701
 [09] Game Over & Game summary
";
        let report = scan_report_qp(text);

        assert_eq!(report.kpoints[&3], [-0.5, 0.5, 0.0]);
        assert_eq!(report.data[&1]["Band"], vec![4.0, 5.0]);
        assert_eq!(report.data[&1]["E-Eo"], vec![-0.52, 0.61]);
        assert_eq!(report.data[&3]["Re(Z)"], vec![0.76]);
        assert!(!report.data.contains_key(&2));
    }
}
