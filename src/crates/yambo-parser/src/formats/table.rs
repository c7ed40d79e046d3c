//! Column files
//!
//! ```text
//! #
//! #    K-point            Band               Eo [eV]            E-Eo [eV]          Sc|Eo [eV]
//! #
//!          1                 4             -0.102             -0.521              1.665
//! ```
//!
//! The header is the last comment line whose column count matches the data.
//! Header cells are separated by two or more spaces; a trailing unit such as
//! ` [eV]` is dropped. Rows are grouped by the `K-point` column when present.

use super::{parse_number, KpointTable};
use crate::error::{ParserError, Result};
use regex::Regex;
use std::sync::LazyLock;

/// A parsed column file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

static CELL_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static TRAILING_UNIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*\S)\s+\[[^\]]*\]$").unwrap());

fn column_name(cell: &str) -> String {
    let cell = cell.trim();
    match TRAILING_UNIT.captures(cell) {
        Some(caps) => caps[1].to_string(),
        None => cell.to_string(),
    }
}

fn header_cells(line: &str, separator: &Regex) -> Vec<String> {
    let body = line.trim_start_matches('#').trim();
    if body.is_empty() {
        return Vec::new();
    }
    separator.split(body).map(column_name).collect()
}

/// Parse a Yambo column file
pub fn parse_table(filename: &str, text: &str) -> Result<Table> {
    let mut comments = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') {
            comments.push(trimmed);
            continue;
        }
        let row: Option<Vec<f64>> = trimmed.split_whitespace().map(parse_number).collect();
        let row = row.ok_or_else(|| ParserError::Table {
            file: filename.to_string(),
            reason: format!("non numeric data on line {}", lineno + 1),
        })?;
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(ParserError::Table {
                    file: filename.to_string(),
                    reason: format!(
                        "line {} has {} columns, expected {}",
                        lineno + 1,
                        row.len(),
                        first.len()
                    ),
                });
            }
        }
        rows.push(row);
    }

    let Some(width) = rows.first().map(Vec::len) else {
        return Ok(Table::default());
    };

    let columns = comments
        .iter()
        .rev()
        .map(|line| header_cells(line, &CELL_SEPARATOR))
        .find(|cells| cells.len() == width)
        .or_else(|| {
            comments
                .iter()
                .rev()
                .map(|line| header_cells(line, &WHITESPACE))
                .find(|cells| cells.len() == width)
        })
        .unwrap_or_else(|| (1..=width).map(|i| format!("col{}", i)).collect());

    Ok(Table { columns, rows })
}

fn is_kpoint_column(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "k-point" || lower == "kpoint" || lower == "k-points"
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }

    /// Group rows by k-point; tables without a k-point column land under key `0`
    pub fn to_kpoint_table(&self) -> KpointTable {
        let mut table = KpointTable::new();
        let kcol = self.columns.iter().position(|c| is_kpoint_column(c));

        for row in &self.rows {
            let k = match kcol {
                Some(idx) => row[idx].round().max(0.0) as u32,
                None => 0,
            };
            let observables = table.entry(k).or_default();
            for (idx, value) in row.iter().enumerate() {
                if Some(idx) == kcol {
                    continue;
                }
                observables
                    .entry(self.columns[idx].clone())
                    .or_default()
                    .push(*value);
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QP_FILE: &str = "\
#
# GW [GPL Version 5.1.0 Revision 21422]
#
#    K-point            Band               Eo [eV]            E-Eo [eV]          Sc|Eo [eV]
#
         1                 4             -0.102             -0.521              1.665
         1                 5              2.455              0.612             -2.112
         2                 4             -1.311             -0.488              1.701
#
# 01h-02m-03s
";

    #[test]
    fn test_qp_file_groups_by_kpoint() {
        let table = parse_table("o-gw.qp", QP_FILE).unwrap();
        assert_eq!(table.columns, vec!["K-point", "Band", "Eo", "E-Eo", "Sc|Eo"]);

        let grouped = table.to_kpoint_table();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&1]["Band"], vec![4.0, 5.0]);
        assert_eq!(grouped[&2]["E-Eo"], vec![-0.488]);
        assert!(!grouped[&1].contains_key("K-point"));
    }

    #[test]
    fn test_optics_header_keeps_indices() {
        let text = "\
#    E/ev[1]     EPS-Im[2]     EPS-Re[3]
   0.000000D+00   0.000000D+00   0.120000D+02
   0.100000D+00   0.500000D-02   0.121000D+02
";
        let table = parse_table("o-bse.eps_q1_diago_bse", text).unwrap();
        assert_eq!(table.columns, vec!["E/ev[1]", "EPS-Im[2]", "EPS-Re[3]"]);
        let grouped = table.to_kpoint_table();
        assert_eq!(grouped[&0]["EPS-Re[3]"], vec![12.0, 12.1]);
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let err = parse_table("o-x", "1 2 3\n1 2\n").unwrap_err();
        assert!(matches!(err, ParserError::Table { .. }));
    }
}
