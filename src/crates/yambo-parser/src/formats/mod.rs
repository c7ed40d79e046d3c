//! Text formats written by Yambo
//!
//! - [`table`] - column files (`o-*.qp`, `o-*.eps_*`, `o-*.eel_*`, `o-*.alpha_*`)
//! - [`log`] - line markers in log and report files
//! - [`report`] - quasiparticle blocks of report files
//! - [`stderr`] - scheduler kill messages

pub mod log;
pub mod report;
pub mod stderr;
pub mod table;

use std::collections::BTreeMap;

/// Observable name to values, for one k-point
pub type Observables = BTreeMap<String, Vec<f64>>;

/// K-point index to observables; key `0` holds data not resolved by k-point
pub type KpointTable = BTreeMap<u32, Observables>;

/// Parse a Fortran-style number (`1.0D-03`, `NaN`)
pub(crate) fn parse_number(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    if token.contains(['D', 'd']) && !token.eq_ignore_ascii_case("nan") {
        return token.replace(['D', 'd'], "E").parse().ok();
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1.5D-01"), Some(0.15));
        assert_eq!(parse_number("-2.0"), Some(-2.0));
        assert!(parse_number("NaN").unwrap().is_nan());
        assert_eq!(parse_number("Band"), None);
    }
}
