//! Quantities parsed on top of a finished run
//!
//! Requested quantities name quasiparticle states relative to the nscf band
//! edges. Before the GW run [`add_corrections`] makes sure `QPkrange` covers
//! them; afterwards [`additional_parsed`] reads them back from the parser
//! datasets of the run.

use crate::error::{Result, WorkflowError};
use crate::provenance::CalculationNode;
use crate::qp::{NscfMapping, QpRange};
use ndarray::Ix2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use yambo_parser::{links, Dataset, YamboParameters};

/// A quantity to extract from the final datasets
///
/// Written as a string: `gap`, `homo`, `lumo`, `scissor`, `lowest`,
/// `brightest`, or `name:[k1,k2,b1,b2]` / `name:[k,b]` for a custom transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AdditionalQuantity {
    Gap,
    Homo,
    Lumo,
    Scissor,
    LowestExciton,
    BrightestExciton,
    /// `E(k2,b2) - E(k1,b1)`, or `E(k,b)` for a single state
    Transition { name: String, range: QpRange },
}

impl AdditionalQuantity {
    /// Read from the exciton dataset of a BSE run
    pub fn is_excitonic(&self) -> bool {
        matches!(self, Self::LowestExciton | Self::BrightestExciton)
    }
}

impl FromStr for AdditionalQuantity {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || WorkflowError::InvalidInputs(format!("unknown quantity {}", s));
        match s.trim() {
            "gap" | "gap_" => return Ok(Self::Gap),
            "homo" => return Ok(Self::Homo),
            "lumo" => return Ok(Self::Lumo),
            "scissor" => return Ok(Self::Scissor),
            "lowest" | "lowest_exciton" => return Ok(Self::LowestExciton),
            "brightest" | "brightest_exciton" => return Ok(Self::BrightestExciton),
            _ => {}
        }

        let (name, indices) = s.split_once(':').ok_or_else(invalid)?;
        let indices = indices
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|v| v.trim().parse::<i64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        let range = match indices.as_slice() {
            [k, b] => [*k, *k, *b, *b],
            [k1, k2, b1, b2] => [*k1, *k2, *b1, *b2],
            _ => return Err(invalid()),
        };
        let name = name.trim();
        if name.is_empty() || range.iter().any(|i| *i < 1) {
            return Err(invalid());
        }
        Ok(Self::Transition {
            name: name.to_string(),
            range,
        })
    }
}

impl TryFrom<String> for AdditionalQuantity {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AdditionalQuantity> for String {
    fn from(value: AdditionalQuantity) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AdditionalQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gap => f.write_str("gap"),
            Self::Homo => f.write_str("homo"),
            Self::Lumo => f.write_str("lumo"),
            Self::Scissor => f.write_str("scissor"),
            Self::LowestExciton => f.write_str("lowest"),
            Self::BrightestExciton => f.write_str("brightest"),
            Self::Transition { name, range } => write!(
                f,
                "{}:[{},{},{},{}]",
                name, range[0], range[1], range[2], range[3]
            ),
        }
    }
}

fn homo_state(mapping: &NscfMapping) -> (i64, i64) {
    (mapping.homo_k as i64, mapping.valence as i64)
}

fn lumo_state(mapping: &NscfMapping) -> (i64, i64) {
    (mapping.lumo_k as i64, mapping.conduction as i64)
}

/// States (as single-state ranges or blocks) a set of quantities needs
pub fn correction_ranges(quantities: &[AdditionalQuantity], mapping: &NscfMapping) -> Vec<QpRange> {
    let single = |(k, b): (i64, i64)| [k, k, b, b];
    let mut ranges = Vec::new();
    for quantity in quantities {
        match quantity {
            AdditionalQuantity::Gap => {
                ranges.push(single(homo_state(mapping)));
                ranges.push(single(lumo_state(mapping)));
            }
            AdditionalQuantity::Homo => ranges.push(single(homo_state(mapping))),
            AdditionalQuantity::Lumo => ranges.push(single(lumo_state(mapping))),
            AdditionalQuantity::Scissor => ranges.push([
                1,
                mapping.number_of_kpoints as i64,
                mapping.valence as i64,
                mapping.conduction as i64,
            ]),
            AdditionalQuantity::Transition { range, .. } => {
                ranges.push(single((range[0], range[2])));
                ranges.push(single((range[1], range[3])));
            }
            AdditionalQuantity::LowestExciton | AdditionalQuantity::BrightestExciton => {}
        }
    }
    ranges
}

fn contains(outer: &QpRange, inner: &QpRange) -> bool {
    outer[0] <= inner[0] && inner[1] <= outer[1] && outer[2] <= inner[2] && inner[3] <= outer[3]
}

/// Extend `QPkrange` with every state the quantities need
pub fn add_corrections(
    parameters: &YamboParameters,
    quantities: &[AdditionalQuantity],
    mapping: &NscfMapping,
) -> YamboParameters {
    let mut ranges = parameters.qp_ranges();
    let before = ranges.len();
    for needed in correction_ranges(quantities, mapping) {
        if !ranges.iter().any(|r| contains(r, &needed)) {
            ranges.push(needed);
        }
    }

    let mut updated = parameters.clone();
    if ranges.len() > before {
        debug!(added = ranges.len() - before, "Extending QPkrange for additional parsing");
        updated.set_qp_ranges(&ranges);
    }
    updated
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QpState {
    pub k: i64,
    pub b: i64,
    /// Quasiparticle energy, eV
    pub e: f64,
    /// Kohn-Sham energy, eV
    pub eo: f64,
}

/// Quasiparticle energies of a run, from whichever dataset it produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QpStates(Vec<QpState>);

impl QpStates {
    pub fn from_node(node: &CalculationNode) -> Option<Self> {
        [links::ARRAY_NDB, links::ARRAY_NDB_QP, links::ARRAY_QP, links::BANDS_QUASIPARTICLE]
            .iter()
            .filter_map(|link| node.dataset(link))
            .find_map(Self::from_dataset)
    }

    /// States of several runs, e.g. the split QP calculations
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a CalculationNode>) -> Option<Self> {
        let mut all = Vec::new();
        for states in nodes.into_iter().filter_map(Self::from_node) {
            all.extend(states.0);
        }
        (!all.is_empty()).then_some(Self(all))
    }

    pub fn from_dataset(dataset: &Dataset) -> Option<Self> {
        let states = match dataset {
            Dataset::Array(array) => {
                if let (Some(k), Some(b), Some(e), Some(eo)) = (
                    array.get_array("kpoint"),
                    array.get_array("band"),
                    array.get_array("E"),
                    array.get_array("Eo"),
                ) {
                    k.iter()
                        .zip(b.iter())
                        .zip(e.iter().zip(eo.iter()))
                        .map(|((k, b), (e, eo))| QpState {
                            k: k.round() as i64,
                            b: b.round() as i64,
                            e: *e,
                            eo: *eo,
                        })
                        .collect()
                } else if let (Some(table), Some(eo), Some(de)) = (
                    array.get_array("qp_table"),
                    array.get_array("Eo"),
                    array.get_array("E-Eo"),
                ) {
                    let table = table.view().into_dimensionality::<Ix2>().ok()?;
                    table
                        .outer_iter()
                        .zip(eo.iter().zip(de.iter()))
                        .filter(|(row, _)| row.len() >= 2)
                        .map(|(row, (eo, de))| QpState {
                            k: row[0].round() as i64,
                            b: row[1].round() as i64,
                            e: eo + de,
                            eo: *eo,
                        })
                        .collect()
                } else {
                    return None;
                }
            }
            Dataset::Bands(bands) => {
                let (Some(band), Some(eo), Some(de)) = (
                    bands.bands.get("Band"),
                    bands.bands.get("Eo"),
                    bands.bands.get("E-Eo"),
                ) else {
                    return None;
                };
                band.indexed_iter()
                    .filter_map(|((i, j), b)| {
                        let eo = *eo.get((i, j))?;
                        let de = *de.get((i, j))?;
                        let k = bands.kpoint_indices.get(i).map_or(i as i64 + 1, |k| *k as i64);
                        Some(QpState {
                            k,
                            b: b.round() as i64,
                            e: eo + de,
                            eo,
                        })
                    })
                    .collect()
            }
            Dataset::SingleFile { .. } => return None,
        };
        Some(Self(states))
    }

    pub fn states(&self) -> &[QpState] {
        &self.0
    }

    pub fn get(&self, k: i64, b: i64) -> Option<&QpState> {
        self.0.iter().find(|s| s.k == k && s.b == b)
    }
}

fn exciton_energies(node: &CalculationNode) -> Option<(Vec<f64>, Vec<f64>)> {
    let states = node.dataset(links::ARRAY_EXCITONIC_STATES)?.as_array()?;
    let energies = states.get_array("energies")?.iter().cloned().collect();
    let intensities = states.get_array("intensities")?.iter().cloned().collect();
    Some((energies, intensities))
}

/// Values of the requested quantities, keyed by name
///
/// Quasiparticle quantities come with a `_dft` twin holding the Kohn-Sham
/// value. Quantities whose data the node lacks are skipped with a warning.
pub fn additional_parsed(
    node: &CalculationNode,
    quantities: &[AdditionalQuantity],
    mapping: &NscfMapping,
) -> BTreeMap<String, f64> {
    let mut parsed = BTreeMap::new();
    let states = QpStates::from_node(node);
    let excitons = exciton_energies(node);

    let mut put_difference = |name: &str, from: (i64, i64), to: (i64, i64)| {
        let Some(states) = &states else { return };
        match (states.get(from.0, from.1), states.get(to.0, to.1)) {
            (Some(a), Some(b)) => {
                let single = from == to;
                let (e, eo) = if single { (b.e, b.eo) } else { (b.e - a.e, b.eo - a.eo) };
                parsed.insert(name.to_string(), e);
                parsed.insert(format!("{}_dft", name), eo);
            }
            _ => warn!(node = %node.id, quantity = name, "Quasiparticle state not computed"),
        }
    };

    for quantity in quantities {
        match quantity {
            AdditionalQuantity::Gap => {
                put_difference("gap", homo_state(mapping), lumo_state(mapping))
            }
            AdditionalQuantity::Homo => {
                put_difference("homo", homo_state(mapping), homo_state(mapping))
            }
            AdditionalQuantity::Lumo => {
                put_difference("lumo", lumo_state(mapping), lumo_state(mapping))
            }
            AdditionalQuantity::Transition { name, range } => {
                put_difference(name.as_str(), (range[0], range[2]), (range[1], range[3]))
            }
            AdditionalQuantity::Scissor
            | AdditionalQuantity::LowestExciton
            | AdditionalQuantity::BrightestExciton => {}
        }
    }

    if let Some((energies, intensities)) = excitons {
        for quantity in quantities {
            match quantity {
                AdditionalQuantity::LowestExciton => {
                    if let Some(lowest) = energies.iter().cloned().reduce(f64::min) {
                        parsed.insert("lowest_exciton".to_string(), lowest);
                    }
                }
                AdditionalQuantity::BrightestExciton => {
                    let brightest = energies
                        .iter()
                        .zip(&intensities)
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(e, _)| *e);
                    if let Some(brightest) = brightest {
                        parsed.insert("brightest_exciton".to_string(), brightest);
                    }
                }
                _ => {}
            }
        }
    }
    parsed
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Least squares line through `(x, y)`; needs two distinct `x`
    pub fn least_squares(points: &[(f64, f64)]) -> Option<Self> {
        let n = points.len() as f64;
        if points.len() < 2 {
            return None;
        }
        let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
        let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
        if sxx < 1e-12 {
            return None;
        }
        let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
        let slope = sxy / sxx;
        Some(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Linear model of the QP correction `E - Eo` as a function of `Eo`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScissorFit {
    pub valence: LinearFit,
    pub conduction: LinearFit,
}

impl ScissorFit {
    /// Correction of the gap at the nscf band edges
    pub fn gap_shift(&self, mapping: &NscfMapping) -> f64 {
        self.conduction.at(mapping.lumo) - self.valence.at(mapping.homo)
    }
}

/// Fit the valence (`b <= valence`) and conduction (`b >= conduction`) manifolds
pub fn fit_scissor(states: &QpStates, mapping: &NscfMapping) -> Result<ScissorFit> {
    let side = |pick: &dyn Fn(i64) -> bool, label: &str| {
        let points: Vec<(f64, f64)> = states
            .states()
            .iter()
            .filter(|s| pick(s.b))
            .map(|s| (s.eo, s.e - s.eo))
            .collect();
        LinearFit::least_squares(&points).ok_or_else(|| {
            WorkflowError::InvalidInputs(format!(
                "scissor fit needs two distinct {} states, got {}",
                label,
                points.len()
            ))
        })
    };

    let valence = mapping.valence as i64;
    let conduction = mapping.conduction as i64;
    Ok(ScissorFit {
        valence: side(&|b| b <= valence, "valence")?,
        conduction: side(&|b| b >= conduction, "conduction")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{NodeId, ProcessType};
    use yambo_parser::{ArrayData, BandsData, VariableValue};

    fn mapping() -> NscfMapping {
        NscfMapping {
            valence: 4,
            conduction: 5,
            number_of_kpoints: 2,
            homo: 0.0,
            lumo: 1.0,
            homo_k: 1,
            lumo_k: 2,
            nscf_gap_ev: 1.0,
            direct: false,
            q_ind: 2,
            fermi_energy: 0.3,
            soc: false,
        }
    }

    fn gw_node() -> CalculationNode {
        let mut array = ArrayData::new();
        array.set_vector("kpoint", vec![1.0, 1.0, 2.0, 2.0]);
        array.set_vector("band", vec![4.0, 5.0, 4.0, 5.0]);
        array.set_vector("Eo", vec![0.0, 2.0, -0.5, 1.0]);
        array.set_vector("E", vec![-0.4, 2.6, -0.8, 1.5]);
        let mut node = CalculationNode::new(NodeId(5), ProcessType::YamboRestart);
        node.outputs
            .datasets
            .insert(links::ARRAY_NDB.to_string(), Dataset::Array(array));
        node
    }

    #[test]
    fn test_quantity_strings() {
        assert_eq!("gap_".parse::<AdditionalQuantity>().unwrap(), AdditionalQuantity::Gap);
        let custom: AdditionalQuantity = "direct:[1,1,4,5]".parse().unwrap();
        assert_eq!(custom.to_string(), "direct:[1,1,4,5]");
        let single: AdditionalQuantity = "vb_gamma:[1,4]".parse().unwrap();
        assert_eq!(
            single,
            AdditionalQuantity::Transition {
                name: "vb_gamma".to_string(),
                range: [1, 1, 4, 4]
            }
        );
        assert!("direct:[1,2,3]".parse::<AdditionalQuantity>().is_err());
        assert!("phonons".parse::<AdditionalQuantity>().is_err());
    }

    #[test]
    fn test_quantities_deserialize_from_strings() {
        let quantities: Vec<AdditionalQuantity> =
            serde_json::from_value(serde_json::json!(["gap", "lowest", "x:[2,5]"])).unwrap();
        assert_eq!(quantities.len(), 3);
        assert_eq!(serde_json::to_value(&quantities[1]).unwrap(), "lowest");
    }

    #[test]
    fn test_add_corrections_only_adds_missing_states() {
        let params = YamboParameters::new().with_variable(
            "QPkrange",
            VariableValue::Table(vec![vec![1.0, 1.0, 3.0, 4.0]]),
            "",
        );
        let updated = add_corrections(&params, &[AdditionalQuantity::Gap], &mapping());
        assert_eq!(updated.qp_ranges(), vec![[1, 1, 3, 4], [2, 2, 5, 5]]);

        let unchanged = add_corrections(&params, &[AdditionalQuantity::Homo], &mapping());
        assert_eq!(unchanged, params);
    }

    #[test]
    fn test_band_structure_states_keep_yambo_kpoints() {
        // QPkrange [1,1,4,4],[3,3,5,5]: two rows, k-points 1 and 3
        let bands = BandsData {
            cell: [[0.0; 3]; 3],
            kpoints: ndarray::array![[0.0, 0.0, 0.0], [0.5, 0.5, 0.0]],
            kpoint_indices: vec![1, 3],
            labels: vec!["Band".to_string(), "Eo".to_string(), "E-Eo".to_string()],
            bands: BTreeMap::from([
                ("Band".to_string(), ndarray::array![[4.0], [5.0]]),
                ("Eo".to_string(), ndarray::array![[0.0], [1.2]]),
                ("E-Eo".to_string(), ndarray::array![[-0.3], [0.6]]),
            ]),
            units: "eV".to_string(),
        };
        let mut node = CalculationNode::new(NodeId(6), ProcessType::YamboCalculation);
        node.outputs
            .datasets
            .insert(links::BANDS_QUASIPARTICLE.to_string(), Dataset::Bands(bands));
        let mapping = NscfMapping {
            lumo_k: 3,
            lumo: 1.2,
            nscf_gap_ev: 1.2,
            number_of_kpoints: 3,
            ..mapping()
        };

        let states = QpStates::from_node(&node).unwrap();
        assert!(states.get(3, 5).is_some());
        assert!(states.get(2, 5).is_none());

        let parsed = additional_parsed(&node, &[AdditionalQuantity::Gap, AdditionalQuantity::Lumo], &mapping);
        assert!((parsed["gap"] - 2.1).abs() < 1e-12);
        assert!((parsed["lumo"] - 1.8).abs() < 1e-12);
    }

    #[test]
    fn test_additional_parsed_values() {
        let quantities = [
            AdditionalQuantity::Gap,
            AdditionalQuantity::Homo,
            "direct:[1,1,4,5]".parse().unwrap(),
            AdditionalQuantity::LowestExciton,
        ];
        let parsed = additional_parsed(&gw_node(), &quantities, &mapping());

        assert!((parsed["gap"] - 1.9).abs() < 1e-12);
        assert!((parsed["gap_dft"] - 1.0).abs() < 1e-12);
        assert_eq!(parsed["homo"], -0.4);
        assert!((parsed["direct"] - 3.0).abs() < 1e-12);
        assert!(!parsed.contains_key("lowest_exciton"));
    }

    #[test]
    fn test_scissor_fit() {
        let states = QpStates::from_node(&gw_node()).unwrap();
        let fit = fit_scissor(&states, &mapping()).unwrap();
        // valence: (0.0,-0.4) (-0.5,-0.3); conduction: (2.0,0.6) (1.0,0.5)
        assert!((fit.valence.slope + 0.2).abs() < 1e-12);
        assert!((fit.conduction.slope - 0.1).abs() < 1e-12);
        assert!((fit.gap_shift(&mapping()) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_scissor_needs_two_states_per_side() {
        let mut node = gw_node();
        let mut array = ArrayData::new();
        array.set_vector("kpoint", vec![1.0, 1.0]);
        array.set_vector("band", vec![4.0, 5.0]);
        array.set_vector("Eo", vec![0.0, 2.0]);
        array.set_vector("E", vec![-0.4, 2.6]);
        node.outputs
            .datasets
            .insert(links::ARRAY_NDB.to_string(), Dataset::Array(array));
        let states = QpStates::from_node(&node).unwrap();
        assert!(fit_scissor(&states, &mapping()).is_err());
    }
}
