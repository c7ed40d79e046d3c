//! Yambo input parameters and calculation settings
//!
//! Yambo inputs are a list of runlevel arguments (`gw0`, `ppa`, `bse`, ...) plus
//! a set of variables. Each variable carries a value and a unit string, and is
//! serialized as a `[value, units]` pair: `"BndsRnXp": [[1, 50], ""]`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value of one Yambo input variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Scalar(f64),
    Text(String),
    List(Vec<f64>),
    Table(Vec<Vec<f64>>),
}

impl VariableValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[f64]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&[Vec<f64>]> {
        match self {
            Self::Table(rows) => Some(rows),
            _ => None,
        }
    }
}

/// A variable value together with its units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(VariableValue, String)", into = "(VariableValue, String)")]
pub struct YamboVariable {
    pub value: VariableValue,
    pub units: String,
}

impl YamboVariable {
    pub fn new(value: VariableValue, units: impl Into<String>) -> Self {
        Self {
            value,
            units: units.into(),
        }
    }

    pub fn unitless(value: VariableValue) -> Self {
        Self::new(value, "")
    }
}

impl From<(VariableValue, String)> for YamboVariable {
    fn from((value, units): (VariableValue, String)) -> Self {
        Self { value, units }
    }
}

impl From<YamboVariable> for (VariableValue, String) {
    fn from(variable: YamboVariable) -> Self {
        (variable.value, variable.units)
    }
}

/// Input parameters of a Yambo calculation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct YamboParameters {
    #[serde(default)]
    pub arguments: Vec<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, YamboVariable>,
}

impl YamboParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn with_variable(
        mut self,
        name: impl Into<String>,
        value: VariableValue,
        units: impl Into<String>,
    ) -> Self {
        self.set_variable(name, value, units);
        self
    }

    pub fn has_argument(&self, argument: &str) -> bool {
        self.arguments.iter().any(|a| a == argument)
    }

    /// Quasiparticle (GW) run
    pub fn is_gw_run(&self) -> bool {
        self.has_argument("gw0") || self.has_argument("gw0___")
    }

    /// Quasiparticle lifetime run
    pub fn is_lifetime_run(&self) -> bool {
        self.has_argument("life") || self.has_argument("life___")
    }

    pub fn is_bse_run(&self) -> bool {
        self.has_argument("bse")
    }

    pub fn variable(&self, name: &str) -> Option<&YamboVariable> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: VariableValue, units: impl Into<String>) {
        self.variables
            .insert(name.into(), YamboVariable::new(value, units));
    }

    /// Upper bound of a `[lower, upper]` range variable such as `BndsRnXp`
    pub fn range_upper(&self, name: &str) -> Option<i64> {
        self.variable(name)
            .and_then(|v| v.value.as_list())
            .and_then(|range| range.get(1))
            .map(|upper| upper.round() as i64)
    }

    /// `QPkrange` entries as `[k_i, k_f, b_i, b_f]` quadruples
    pub fn qp_ranges(&self) -> Vec<[i64; 4]> {
        let Some(rows) = self.variable("QPkrange").and_then(|v| v.value.as_table()) else {
            return Vec::new();
        };
        rows.iter()
            .filter(|row| row.len() >= 4)
            .map(|row| {
                [
                    row[0].round() as i64,
                    row[1].round() as i64,
                    row[2].round() as i64,
                    row[3].round() as i64,
                ]
            })
            .collect()
    }

    /// Replace `QPkrange` with the given quadruples
    pub fn set_qp_ranges(&mut self, ranges: &[[i64; 4]]) {
        let rows = ranges
            .iter()
            .map(|r| r.iter().map(|v| *v as f64).collect())
            .collect();
        self.set_variable("QPkrange", VariableValue::Table(rows), "");
    }
}

/// Settings of a Yambo calculation
///
/// Keys are upper case (`INITIALISE`, `COPY_DBS`, `T_VERBOSE`); lower case
/// spellings are accepted on input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct YamboSettings {
    /// Database initialisation (p2y/setup) run
    #[serde(default, alias = "initialise", skip_serializing_if = "Option::is_none")]
    pub initialise: Option<bool>,

    /// Copy the parent databases instead of linking them
    #[serde(default, alias = "copy_dbs")]
    pub copy_dbs: bool,

    /// Keep the verbose timing section of the log
    #[serde(default, alias = "t_verbose")]
    pub t_verbose: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl YamboSettings {
    pub fn is_initialise(&self) -> bool {
        self.initialise.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_pairs_deserialize() {
        let parameters: YamboParameters = serde_json::from_value(serde_json::json!({
            "arguments": ["dyson", "gw0", "HF_and_locXC", "em1d", "ppa"],
            "variables": {
                "BndsRnXp": [[1, 50], ""],
                "NGsBlkXp": [2, "Ry"],
                "QPkrange": [[[1, 4, 8, 9]], ""],
                "KfnQPdb": ["E < ./ndb.QP", ""]
            }
        }))
        .unwrap();

        assert!(parameters.is_gw_run());
        assert!(!parameters.is_bse_run());
        assert_eq!(parameters.range_upper("BndsRnXp"), Some(50));
        assert_eq!(parameters.qp_ranges(), vec![[1, 4, 8, 9]]);
        assert_eq!(parameters.variable("NGsBlkXp").unwrap().units, "Ry");
        assert_eq!(
            parameters.variable("KfnQPdb").unwrap().value.as_str(),
            Some("E < ./ndb.QP")
        );
    }

    #[test]
    fn test_settings_accept_lower_case() {
        let settings: YamboSettings =
            serde_json::from_value(serde_json::json!({"initialise": true, "COPY_DBS": true, "PARENT_DB": false}))
                .unwrap();
        assert!(settings.is_initialise());
        assert!(settings.copy_dbs);
        assert!(!settings.t_verbose);
        assert_eq!(settings.extra.get("PARENT_DB"), Some(&serde_json::json!(false)));
    }
}
