//! Inputs of a workflow and of the calculations it submits

use crate::corrections::AdditionalQuantity;
use crate::provenance::{PwParameters, RemoteFolder};
use crate::qp::QpSubsetSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use yambo_parser::{YamboParameters, YamboSettings};

/// Inputs of one pw.x step (scf or nscf)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PwInputs {
    pub parameters: PwParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder: Option<RemoteFolder>,
    #[serde(default)]
    pub clean_workdir: bool,
    /// Host-side inputs passed through untouched (code, structure, pseudos, kpoints)
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl PwInputs {
    pub fn new(parameters: PwParameters) -> Self {
        Self {
            parameters,
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Inputs of one yambo step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YamboInputs {
    pub parameters: YamboParameters,
    #[serde(default)]
    pub settings: YamboSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder: Option<RemoteFolder>,
    #[serde(default)]
    pub clean_workdir: bool,
    /// Quasiparticle database applied on top of the run (`QP_corrections`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qp_corrections: Option<PathBuf>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl YamboInputs {
    pub fn new(parameters: YamboParameters) -> Self {
        Self {
            parameters,
            ..Default::default()
        }
    }

    pub fn with_settings(mut self, settings: YamboSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Bands the run needs from the nscf step: the larger of the
    /// `BndsRnXp` and `GbndRnge` upper bounds, 0 when neither is set
    pub fn gw_bands(&self) -> u32 {
        ["BndsRnXp", "GbndRnge"]
            .iter()
            .filter_map(|name| self.parameters.range_upper(name))
            .max()
            .unwrap_or(0)
            .max(0) as u32
    }
}

/// Everything a [`crate::YamboWorkflow`] is started with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scf: Option<PwInputs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nscf: Option<PwInputs>,
    /// Main yambo inputs; the BSE step when `qp` is also given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yres: Option<YamboInputs>,
    /// GW inputs of a BSE-on-GW run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qp: Option<YamboInputs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_parsing: Vec<AdditionalQuantity>,
    #[serde(default, rename = "QP_subset_dict", skip_serializing_if = "Option::is_none")]
    pub qp_subset_dict: Option<QpSubsetSpec>,
    /// scf, nscf or yambo folder to start from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder: Option<RemoteFolder>,
    /// Recompute the nscf step even when the parent has enough bands
    #[serde(default)]
    pub redo_nscf: bool,
}

impl WorkflowInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scf(mut self, scf: PwInputs) -> Self {
        self.scf = Some(scf);
        self
    }

    pub fn with_nscf(mut self, nscf: PwInputs) -> Self {
        self.nscf = Some(nscf);
        self
    }

    pub fn with_yres(mut self, yres: YamboInputs) -> Self {
        self.yres = Some(yres);
        self
    }

    pub fn with_qp(mut self, qp: YamboInputs) -> Self {
        self.qp = Some(qp);
        self
    }

    pub fn with_additional_parsing(mut self, quantities: Vec<AdditionalQuantity>) -> Self {
        self.additional_parsing = quantities;
        self
    }

    pub fn with_qp_subsets(mut self, spec: QpSubsetSpec) -> Self {
        self.qp_subset_dict = Some(spec);
        self
    }

    pub fn with_parent_folder(mut self, folder: RemoteFolder) -> Self {
        self.parent_folder = Some(folder);
        self
    }

    pub fn with_redo_nscf(mut self, redo: bool) -> Self {
        self.redo_nscf = redo;
        self
    }
}
