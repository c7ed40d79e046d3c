//! Exit status taxonomy reported to the host

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exit status of one parse
///
/// The numeric codes are stable: an outer restart layer matches on them to pick
/// a remedy (more memory, another parallel layout, a longer wall time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParserExitCode {
    Ok,
    NoSuccess,
    NoRetrievedFolder,
    ParserAnomaly,
    WalltimeError,
    ParaError,
    MemoryError,
    XParMemoryError,
    VariableNotDefined,
    NanAsOutput,
    NoInputParameters,
}

impl ParserExitCode {
    pub fn code(&self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::NoSuccess => 300,
            Self::NoRetrievedFolder => 500,
            Self::ParserAnomaly => 501,
            Self::WalltimeError => 502,
            Self::ParaError => 503,
            Self::MemoryError => 504,
            Self::XParMemoryError => 505,
            Self::VariableNotDefined => 506,
            Self::NanAsOutput => 507,
            Self::NoInputParameters => 509,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Ok => "Calculation finished successfully",
            Self::NoSuccess => "Calculation did not finish correctly",
            Self::NoRetrievedFolder => "The retrieved folder data node could not be accessed",
            Self::ParserAnomaly => "Unexpected behavior of the parser",
            Self::WalltimeError => "Time exceeded the max walltime",
            Self::ParaError => "Problems with the parallelization of the run",
            Self::MemoryError => "Memory allocation error",
            Self::XParMemoryError => "Memory allocation error of the X_par response matrix",
            Self::VariableNotDefined => "Variable not defined in a database fragment: corrupted fragment",
            Self::NanAsOutput => "NaN found in the quasiparticle corrections",
            Self::NoInputParameters => "Input parameters not found",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for ParserExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            ParserExitCode::Ok,
            ParserExitCode::NoSuccess,
            ParserExitCode::NoRetrievedFolder,
            ParserExitCode::ParserAnomaly,
            ParserExitCode::WalltimeError,
            ParserExitCode::ParaError,
            ParserExitCode::MemoryError,
            ParserExitCode::XParMemoryError,
            ParserExitCode::VariableNotDefined,
            ParserExitCode::NanAsOutput,
            ParserExitCode::NoInputParameters,
        ];
        let mut codes: Vec<u32> = all.iter().map(|c| c.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert_eq!(ParserExitCode::NanAsOutput.to_string(), "[507] NaN found in the quasiparticle corrections");
    }
}
