//! Splitting a large QP request into independent yambo runs

use super::mapper::{NscfMapping, QpMapper};
use super::{QpRange, QpSubset};
use crate::error::{Result, WorkflowError};
use crate::provenance::PwOutputs;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Energy windows are never narrower than this fraction over the nscf gap
const GAP_WINDOW_FACTOR: f64 = 1.2;

fn default_qp_per_subset() -> usize {
    10
}

fn default_parallel_runs() -> usize {
    1
}

/// Band range applied to every k-point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandBoundaries {
    pub bi: i64,
    pub bf: i64,
}

/// Which quasiparticles to compute and how to split them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QpSubsetSpec {
    /// Explicit `[k_i,k_f,b_i,b_f]` ranges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit: Option<Vec<QpRange>>,
    /// Energy window around mid-gap, eV
    #[serde(default, rename = "range_QP", skip_serializing_if = "Option::is_none")]
    pub range_qp: Option<f64>,
    #[serde(default)]
    pub full_bands: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundaries: Option<BandBoundaries>,
    /// Ready-made subsets, used as given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsets: Option<Vec<QpSubset>>,
    #[serde(default = "default_qp_per_subset")]
    pub qp_per_subset: usize,
    /// Subsets submitted together in one batch
    #[serde(default = "default_parallel_runs")]
    pub parallel_runs: usize,
}

impl Default for QpSubsetSpec {
    fn default() -> Self {
        Self {
            explicit: None,
            range_qp: None,
            full_bands: false,
            boundaries: None,
            subsets: None,
            qp_per_subset: default_qp_per_subset(),
            parallel_runs: default_parallel_runs(),
        }
    }
}

impl QpSubsetSpec {
    pub fn explicit(ranges: Vec<QpRange>) -> Self {
        Self {
            explicit: Some(ranges),
            ..Default::default()
        }
    }

    pub fn energy_window(range_ev: f64, full_bands: bool) -> Self {
        Self {
            range_qp: Some(range_ev),
            full_bands,
            ..Default::default()
        }
    }

    pub fn boundaries(bi: i64, bf: i64) -> Self {
        Self {
            boundaries: Some(BandBoundaries { bi, bf }),
            ..Default::default()
        }
    }

    pub fn with_qp_per_subset(mut self, qp_per_subset: usize) -> Self {
        self.qp_per_subset = qp_per_subset;
        self
    }

    pub fn with_parallel_runs(mut self, parallel_runs: usize) -> Self {
        self.parallel_runs = parallel_runs;
        self
    }

    /// Expand the descriptor into the subsets to submit
    ///
    /// Precedence: ready-made `subsets`, then the energy window (which
    /// replaces `explicit`), then `explicit`, then `boundaries`.
    pub fn materialize(
        &self,
        mapping: &NscfMapping,
        pw: &PwOutputs,
        mapper: &QpMapper,
    ) -> Result<Vec<QpSubset>> {
        if let Some(subsets) = &self.subsets {
            return Ok(subsets.clone());
        }

        let explicit = match self.range_qp {
            Some(range) => {
                let window = range.max(mapping.nscf_gap_ev * GAP_WINDOW_FACTOR);
                info!(window_ev = window, full_bands = self.full_bands, "Selecting QP by energy");
                Some(mapper.map(pw, window, self.full_bands)?)
            }
            None => self.explicit.clone(),
        };

        if let Some(explicit) = explicit {
            return Ok(qp_list_merger(&explicit, self.qp_per_subset));
        }
        if let Some(b) = self.boundaries {
            return Ok(qp_subset_groups(
                1,
                mapping.number_of_kpoints as i64,
                b.bi,
                b.bf,
                self.qp_per_subset,
            ));
        }
        Err(WorkflowError::InvalidInputs(
            "QP subset descriptor needs subsets, explicit, range_QP or boundaries".to_string(),
        ))
    }
}

/// Number of (k, b) states in a range
pub fn range_size(range: &QpRange) -> i64 {
    let nk = range[1] - range[0] + 1;
    let nb = range[3] - range[2] + 1;
    nk.max(0) * nb.max(0)
}

fn chunks(start: i64, end: i64, width: i64) -> impl Iterator<Item = (i64, i64)> {
    (start..=end)
        .step_by(width.max(1) as usize)
        .map(move |lo| (lo, (lo + width - 1).min(end)))
}

/// Tile the rectangle `k_i..=k_f` x `b_i..=b_f` into disjoint subsets of at
/// most `budget` states
///
/// The smaller axis is kept whole when it fits the budget and the larger
/// axis is cut; every tile is one subset with a single range.
pub fn qp_subset_groups(k_i: i64, k_f: i64, b_i: i64, b_f: i64, budget: usize) -> Vec<QpSubset> {
    if k_f < k_i || b_f < b_i {
        return Vec::new();
    }
    let budget = budget.max(1) as i64;
    let nk = k_f - k_i + 1;
    let nb = b_f - b_i + 1;

    let (k_width, b_width) = if nk > nb {
        let b_width = nb.min(budget);
        ((budget / b_width).max(1), b_width)
    } else {
        let k_width = nk.min(budget);
        (k_width, (budget / k_width).max(1))
    };

    let mut groups = Vec::new();
    for (k_lo, k_hi) in chunks(k_i, k_f, k_width) {
        for (b_lo, b_hi) in chunks(b_i, b_f, b_width) {
            groups.push(vec![[k_lo, k_hi, b_lo, b_hi]]);
        }
    }
    groups
}

/// Greedily pack explicit ranges, in order, into subsets of at most `budget`
/// states
///
/// A range larger than the budget on its own forms a subset by itself.
pub fn qp_list_merger(ranges: &[QpRange], budget: usize) -> Vec<QpSubset> {
    let budget = budget as i64;
    let mut subsets = Vec::new();
    let mut current: QpSubset = Vec::new();
    let mut size = 0;

    for range in ranges {
        let n = range_size(range);
        if !current.is_empty() && size + n > budget {
            subsets.push(std::mem::take(&mut current));
            size = 0;
        }
        current.push(*range);
        size += n;
    }
    if !current.is_empty() {
        subsets.push(current);
    }
    subsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn covered(groups: &[QpSubset]) -> Vec<(i64, i64)> {
        let mut cells = Vec::new();
        for range in groups.iter().flatten() {
            for k in range[0]..=range[1] {
                for b in range[2]..=range[3] {
                    cells.push((k, b));
                }
            }
        }
        cells
    }

    #[test]
    fn test_groups_split_the_longer_axis() {
        let groups = qp_subset_groups(1, 10, 4, 5, 6);
        assert!(groups.iter().all(|g| g[0][2] == 4 && g[0][3] == 5));
        assert_eq!(groups[0], vec![[1, 3, 4, 5]]);
        assert_eq!(groups.last().unwrap(), &vec![[10, 10, 4, 5]]);
    }

    #[test]
    fn test_groups_of_empty_rectangle() {
        assert!(qp_subset_groups(3, 2, 1, 4, 10).is_empty());
    }

    #[test]
    fn test_list_merger_respects_budget() {
        let ranges = [[1, 1, 4, 4], [1, 1, 5, 5], [2, 2, 4, 5], [1, 8, 1, 8], [3, 3, 4, 4]];
        let subsets = qp_list_merger(&ranges, 4);
        assert_eq!(subsets.len(), 3);
        assert_eq!(subsets[0].len(), 3);
        // oversized range stays alone
        assert_eq!(subsets[1], vec![[1, 8, 1, 8]]);
        assert_eq!(subsets[2], vec![[3, 3, 4, 4]]);
    }

    #[test]
    fn test_list_merger_empty() {
        assert!(qp_list_merger(&[], 10).is_empty());
    }

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: QpSubsetSpec =
            serde_json::from_value(serde_json::json!({"range_QP": 2.5, "full_bands": true})).unwrap();
        assert_eq!(spec.range_qp, Some(2.5));
        assert_eq!(spec.qp_per_subset, 10);
        assert_eq!(spec.parallel_runs, 1);
    }

    proptest! {
        #[test]
        fn prop_groups_partition_the_rectangle(
            k_i in 1i64..20,
            nk in 1i64..40,
            b_i in 1i64..30,
            nb in 1i64..25,
            budget in 1usize..60,
        ) {
            let (k_f, b_f) = (k_i + nk - 1, b_i + nb - 1);
            let groups = qp_subset_groups(k_i, k_f, b_i, b_f, budget);

            for group in &groups {
                prop_assert!(range_size(&group[0]) <= budget as i64);
            }

            let cells = covered(&groups);
            let unique: HashSet<_> = cells.iter().cloned().collect();
            prop_assert_eq!(unique.len(), cells.len());
            prop_assert_eq!(cells.len() as i64, nk * nb);
            prop_assert!(cells.iter().all(|(k, b)| (k_i..=k_f).contains(k) && (b_i..=b_f).contains(b)));
        }

        #[test]
        fn prop_list_merger_keeps_order_and_budget(
            sizes in proptest::collection::vec((1i64..4, 1i64..4), 0..30),
            budget in 1usize..20,
        ) {
            let ranges: Vec<QpRange> = sizes
                .iter()
                .enumerate()
                .map(|(i, (dk, db))| {
                    let k = i as i64 + 1;
                    [k, k + dk - 1, 1, *db]
                })
                .collect();
            let subsets = qp_list_merger(&ranges, budget);

            let flattened: Vec<QpRange> = subsets.iter().flatten().cloned().collect();
            prop_assert_eq!(&flattened, &ranges);
            for subset in &subsets {
                let total: i64 = subset.iter().map(range_size).sum();
                prop_assert!(subset.len() == 1 || total <= budget as i64);
            }
        }
    }
}
