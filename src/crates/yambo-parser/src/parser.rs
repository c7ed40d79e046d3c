//! The Yambo result parser
//!
//! One call to [`YamboParser::parse`] turns a retrieved folder into a
//! [`ParseOutcome`]:
//!
//! 1. copy the folder into a scratch directory;
//! 2. apply scheduler stderr signals and decode `ndb.BS_diago*`;
//! 3. classify and decode every other file, in name order;
//! 4. dispatch each file to its handler, which updates [`OutputParameters`]
//!    and may emit datasets;
//! 5. decide success and pick the exit code.
//!
//! All state is local to one call.

use crate::bse::{lorentzian_chi, BseSpectrumOptions, ChiSpectrum, ExcitonicStates};
use crate::datasets::{self, links, Dataset};
use crate::error::Result;
use crate::exit_code::ParserExitCode;
use crate::file::{classify, YamboFile, YamboFileType, SIGNATURE_LEN};
use crate::folder::{RetrievedFolder, Scratch};
use crate::formats::stderr::scan_scheduler_stderr;
use crate::ndb::{default_reader, DatabaseReader, HfDatabase, QpDatabase};
use crate::parameters::{YamboParameters, YamboSettings};
use crate::params::OutputParameters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tunables of the parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Lower bound of the near-timeout window on `(requested - last) / requested`
    pub near_timeout_lower: f64,
    /// Upper bound of the near-timeout window
    pub near_timeout_upper: f64,
    /// Directory that receives scratch copies (system temp dir when unset)
    pub scratch_root: Option<PathBuf>,
    /// Keep the scratch copy so `ns_db1_path` stays valid after the parse
    pub keep_scratch: bool,
    pub bse_spectrum: BseSpectrumOptions,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            near_timeout_lower: -2.0,
            near_timeout_upper: 0.16,
            scratch_root: None,
            keep_scratch: false,
            bse_spectrum: BseSpectrumOptions::default(),
        }
    }
}

/// What the host knows about the calculation being parsed
#[derive(Debug, Clone, Default)]
pub struct ParserInputs {
    pub parameters: Option<YamboParameters>,
    pub settings: YamboSettings,
    /// Requested wall-clock budget in seconds
    pub requested_time: f64,
    /// Lattice of the originating structure
    pub cell: [[f64; 3]; 3],
    /// `ns_db1_path` reported by the parent calculation
    pub parent_ns_db1_path: Option<String>,
}

impl ParserInputs {
    pub fn new(parameters: YamboParameters) -> Self {
        Self {
            parameters: Some(parameters),
            ..Default::default()
        }
    }

    pub fn with_settings(mut self, settings: YamboSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_requested_time(mut self, seconds: f64) -> Self {
        self.requested_time = seconds;
        self
    }

    pub fn with_cell(mut self, cell: [[f64; 3]; 3]) -> Self {
        self.cell = cell;
        self
    }

    pub fn with_parent_ns_db1_path(mut self, path: impl Into<String>) -> Self {
        self.parent_ns_db1_path = Some(path.into());
        self
    }
}

/// Result of one parse
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub output_parameters: OutputParameters,
    /// Datasets keyed by output link name
    pub datasets: BTreeMap<String, Dataset>,
    pub exit_code: ParserExitCode,
}

impl ParseOutcome {
    fn failed(output_parameters: OutputParameters, exit_code: ParserExitCode) -> Self {
        Self {
            output_parameters,
            datasets: BTreeMap::new(),
            exit_code,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.exit_code.is_ok()
    }

    pub fn dataset(&self, link: &str) -> Option<&Dataset> {
        self.datasets.get(link)
    }
}

/// Per-call state threaded through the file handlers
#[derive(Default)]
struct ParseState {
    datasets: BTreeMap<String, Dataset>,
    ndb_qp: Option<QpDatabase>,
    ndb_hf: Option<HfDatabase>,
    chi: Option<(ChiSpectrum, u32)>,
    excitons: Option<ExcitonicStates>,
    has_optics: bool,
    has_text_qp: bool,
    nan_found: bool,
}

impl ParseState {
    fn emit(&mut self, link: &str, dataset: Dataset) {
        if self.datasets.contains_key(link) {
            debug!(link, "Dataset already emitted, keeping the first one");
            return;
        }
        self.datasets.insert(link.to_string(), dataset);
    }
}

/// Parser for finished Yambo calculations
#[derive(Clone)]
pub struct YamboParser {
    options: ParserOptions,
    reader: Arc<dyn DatabaseReader>,
}

impl std::fmt::Debug for YamboParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YamboParser")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for YamboParser {
    fn default() -> Self {
        Self::new()
    }
}

impl YamboParser {
    pub fn new() -> Self {
        Self {
            options: ParserOptions::default(),
            reader: Arc::from(default_reader()),
        }
    }

    pub fn with_options(mut self, options: ParserOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_reader(mut self, reader: impl DatabaseReader + 'static) -> Self {
        self.reader = Arc::new(reader);
        self
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Parse a retrieved folder
    ///
    /// `folder` is `None` when the host could not access the retrieved folder.
    pub fn parse(&self, folder: Option<&dyn RetrievedFolder>, inputs: &ParserInputs) -> ParseOutcome {
        let initialise = inputs.settings.is_initialise();
        let mut params = OutputParameters::new(
            inputs.requested_time,
            inputs.parent_ns_db1_path.clone().unwrap_or_else(|| ".".to_string()),
        );

        let Some(folder) = folder else {
            warn!("Retrieved folder not available");
            return ParseOutcome::failed(params, ParserExitCode::NoRetrievedFolder);
        };

        let parameters = match (&inputs.parameters, initialise) {
            (Some(parameters), _) => parameters.clone(),
            (None, true) => YamboParameters::default(),
            (None, false) => {
                warn!("Input parameters not found");
                return ParseOutcome::failed(params, ParserExitCode::NoInputParameters);
            }
        };

        let state = match self.parse_folder(folder, inputs, &parameters, &mut params) {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "Parser anomaly");
                params.warn(err.to_string());
                return ParseOutcome::failed(params, ParserExitCode::ParserAnomaly);
            }
        };

        if state.nan_found {
            warn!("NaN found in E-Eo of ndb.QP");
            return ParseOutcome {
                output_parameters: params,
                datasets: state.datasets,
                exit_code: ParserExitCode::NanAsOutput,
            };
        }

        self.finish(state, params, &parameters, initialise)
    }

    fn parse_folder(
        &self,
        folder: &dyn RetrievedFolder,
        inputs: &ParserInputs,
        parameters: &YamboParameters,
        params: &mut OutputParameters,
    ) -> Result<ParseState> {
        let scratch = Scratch::materialize(folder, self.options.scratch_root.as_deref())?;
        let mut state = ParseState::default();

        if scratch.contains_basename("ns.db1") {
            params.ns_db1_path = scratch.path().display().to_string();
        }

        for name in scratch.files() {
            if name.contains("stderr") {
                let text = String::from_utf8_lossy(&scratch.read(name)?).into_owned();
                params.apply_scheduler(&scan_scheduler_stderr(&text));
            } else if name.contains("ndb.BS_diago") {
                match self.reader.read_bse_diago(&scratch.file_path(name)) {
                    Ok(db) => {
                        let chi = lorentzian_chi(&db, &self.options.bse_spectrum);
                        state.chi = Some((chi, db.q_index));
                        state.excitons = Some(ExcitonicStates::from_database(&db));
                    }
                    Err(err) => {
                        warn!(file = %name, error = %err, "BSE database not readable");
                        params.warn(format!("{}: {}", name, err));
                    }
                }
            }
        }

        for name in scratch.files() {
            if name.contains("stderr") || name.contains("ndb.BS_diago") {
                continue;
            }
            let file_type = classify(name, &scratch.head(name, SIGNATURE_LEN)?);
            debug!(file = %name, file_type = %file_type, "Classified");

            match file_type {
                YamboFileType::Unknown => continue,
                YamboFileType::NdbQp => {
                    let qp = match self.reader.read_qp(&scratch.file_path(name)) {
                        Ok(qp) => qp,
                        Err(err) => {
                            warn!(file = %name, error = %err, "ndb.QP not readable");
                            params.warn(format!("{}: {}", name, err));
                            continue;
                        }
                    };
                    if qp.has_nan() {
                        state.nan_found = true;
                        return Ok(state);
                    }
                    state.emit(
                        links::QP_DB,
                        Dataset::SingleFile {
                            filename: "ndb.QP".to_string(),
                            content: scratch.read(name)?,
                        },
                    );
                    state.ndb_qp = Some(qp);
                }
                YamboFileType::NdbHfLocXc => match self.reader.read_hf(&scratch.file_path(name)) {
                    Ok(hf) => state.ndb_hf = Some(hf),
                    Err(err) => {
                        warn!(file = %name, error = %err, "ndb.HF_and_locXC not readable");
                        params.warn(format!("{}: {}", name, err));
                    }
                },
                _ => {
                    let text = String::from_utf8_lossy(&scratch.read(name)?).into_owned();
                    let file = YamboFile::from_text(name, file_type, &text)?;
                    self.dispatch(&file, inputs, parameters, params, &mut state);
                }
            }
        }

        params.finalize_written_dbs();

        if self.options.keep_scratch {
            let kept = scratch.persist();
            debug!(path = %kept.display(), "Scratch copy kept");
        }
        Ok(state)
    }

    fn dispatch(
        &self,
        file: &YamboFile,
        inputs: &ParserInputs,
        parameters: &YamboParameters,
        params: &mut OutputParameters,
        state: &mut ParseState,
    ) {
        match file.file_type {
            YamboFileType::Log => params.apply_log(&file.evidence, inputs.settings.t_verbose),
            YamboFileType::Report => params.apply_report(&file.evidence, file.is_setup_report()),
            YamboFileType::Optics(kind) => {
                state.emit(kind.link_name(), Dataset::Array(datasets::optics_array(&file.data)));
                state.has_optics = true;
                return;
            }
            _ => {}
        }

        let (bands_link, array_link) = if parameters.is_gw_run() {
            (links::BANDS_QUASIPARTICLE, links::ARRAY_QP)
        } else if parameters.is_lifetime_run() {
            (links::BANDS_LIFETIME, links::ARRAY_LIFETIME)
        } else {
            return;
        };

        match datasets::quasiparticle_dataset(&file.data, &file.kpoints, inputs.cell) {
            Some(dataset @ Dataset::Bands(_)) => {
                state.emit(bands_link, dataset);
                state.has_text_qp = true;
            }
            Some(dataset) => {
                state.emit(array_link, dataset);
                state.has_text_qp = true;
            }
            None => {}
        }
    }

    fn finish(
        &self,
        mut state: ParseState,
        mut params: OutputParameters,
        parameters: &YamboParameters,
        initialise: bool,
    ) -> ParseOutcome {
        let mut success = params.game_over || (params.p2y_completed && initialise);

        if !success {
            if let Some(fraction) = params.remaining_time_fraction() {
                if fraction > self.options.near_timeout_lower && fraction < self.options.near_timeout_upper {
                    debug!(fraction, "Run stopped close to the requested wall time");
                    params.time_error = true;
                }
            }
        }

        if params.has_terminal_error() {
            success = false;
        }

        let has_qp = state.ndb_qp.as_ref().is_some_and(|qp| !qp.is_empty()) || state.has_text_qp;
        if success && parameters.is_gw_run() && !initialise && !has_qp {
            warn!("GW run produced no quasiparticle dataset");
            success = false;
        } else if success && parameters.is_bse_run() && !initialise && !(state.chi.is_some() || state.has_optics) {
            warn!("BSE run produced neither chi nor an optics spectrum");
            success = false;
        }

        if !success {
            let exit_code = if params.corrupted_fragment {
                ParserExitCode::VariableNotDefined
            } else if params.time_error {
                ParserExitCode::WalltimeError
            } else if params.para_error {
                ParserExitCode::ParaError
            } else if params.x_par_allocation_error {
                ParserExitCode::XParMemoryError
            } else if params.memory_error {
                ParserExitCode::MemoryError
            } else {
                ParserExitCode::NoSuccess
            };
            info!(exit_code = exit_code.code(), "Calculation not successful");
            return ParseOutcome {
                output_parameters: params,
                datasets: state.datasets,
                exit_code,
            };
        }

        match (state.ndb_qp.take(), state.ndb_hf.take()) {
            (Some(qp), Some(hf)) => match datasets::sigma_c(&qp, &hf) {
                Ok(array) => state.emit(links::ARRAY_NDB, Dataset::Array(array)),
                Err(err) => {
                    warn!(error = %err, "Cannot merge ndb.QP and ndb.HF_and_locXC, storing them apart");
                    params.warn(err.to_string());
                    state.emit(links::ARRAY_NDB_QP, Dataset::Array(datasets::ndb_qp_array(&qp)));
                    state.emit(links::ARRAY_NDB_HF, Dataset::Array(datasets::ndb_hf_array(&hf)));
                }
            },
            (Some(qp), None) => state.emit(links::ARRAY_NDB_QP, Dataset::Array(datasets::ndb_qp_array(&qp))),
            (None, Some(hf)) => state.emit(links::ARRAY_NDB_HF, Dataset::Array(datasets::ndb_hf_array(&hf))),
            (None, None) => {}
        }

        if let Some((chi, q)) = state.chi.take() {
            state.emit(links::ARRAY_CHI, Dataset::Array(datasets::chi_array(&chi, q)));
        }
        if let Some(excitons) = state.excitons.take() {
            state.emit(
                links::ARRAY_EXCITONIC_STATES,
                Dataset::Array(datasets::excitonic_states_array(&excitons)),
            );
        }

        info!(datasets = state.datasets.len(), "Calculation parsed successfully");
        ParseOutcome {
            output_parameters: params,
            datasets: state.datasets,
            exit_code: ParserExitCode::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folder::MemoryFolder;

    fn gw_inputs() -> ParserInputs {
        ParserInputs::new(YamboParameters::new().with_argument("gw0")).with_requested_time(3600.0)
    }

    #[test]
    fn test_missing_folder() {
        let outcome = YamboParser::new().parse(None, &gw_inputs());
        assert_eq!(outcome.exit_code, ParserExitCode::NoRetrievedFolder);
    }

    #[test]
    fn test_missing_parameters() {
        let folder = MemoryFolder::new();
        let outcome = YamboParser::new().parse(Some(&folder), &ParserInputs::default());
        assert_eq!(outcome.exit_code, ParserExitCode::NoInputParameters);
    }

    #[test]
    fn test_initialise_without_parameters() {
        let folder = MemoryFolder::new().with_file("r_setup", " <01s> P1: Game Over & Game summary\n");
        let inputs = ParserInputs::default().with_settings(YamboSettings {
            initialise: Some(true),
            ..Default::default()
        });
        let outcome = YamboParser::new().parse(Some(&folder), &inputs);
        assert_eq!(outcome.exit_code, ParserExitCode::Ok);
        assert!(outcome.output_parameters.p2y_completed);
    }

    #[test]
    fn test_gw_without_qp_fails() {
        let folder = MemoryFolder::new().with_file("r-gw", " <10s> P1: Game Over & Game summary\n");
        let outcome = YamboParser::new().parse(Some(&folder), &gw_inputs());
        assert_eq!(outcome.exit_code, ParserExitCode::NoSuccess);
        assert!(outcome.output_parameters.game_over);
    }
}
