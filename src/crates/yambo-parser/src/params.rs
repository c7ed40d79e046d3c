//! Output parameters builder
//!
//! [`OutputParameters`] is created once per parse, passed by `&mut` to every
//! file handler and returned inside the
//! [`ParseOutcome`](crate::ParseOutcome). Field names on the wire match the keys
//! downstream workflows already read (`game_over`, `X_par_allocation_error`,
//! `Fermi(eV)`, ...).

use crate::formats::log::{ErrorKind, LogEvidence};
use crate::formats::stderr::SchedulerSignals;
use serde::{Deserialize, Serialize};

/// Diagnostics of one Yambo calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputParameters {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub timing: Vec<String>,
    pub memstats: Vec<String>,

    pub yambo_wrote_dbs: bool,
    pub game_over: bool,
    pub p2y_completed: bool,

    /// Last elapsed-time marker of the log
    pub last_time: f64,
    /// Wall time requested from the scheduler
    pub requested_time: f64,
    pub last_time_units: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_gb: Option<f64>,

    pub para_error: bool,
    pub memory_error: bool,
    pub time_error: bool,
    #[serde(rename = "X_par_allocation_error")]
    pub x_par_allocation_error: bool,
    pub corrupted_fragment: bool,

    pub has_gpu: bool,
    pub yambo_version: String,
    #[serde(rename = "Fermi(eV)")]
    pub fermi_ev: f64,
    pub ns_db1_path: String,

    /// Databases reported as written (`[WR...]` markers)
    #[serde(default)]
    pub written_databases: Vec<String>,
}

impl OutputParameters {
    pub fn new(requested_time: f64, ns_db1_path: impl Into<String>) -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
            timing: Vec::new(),
            memstats: Vec::new(),
            yambo_wrote_dbs: false,
            game_over: false,
            p2y_completed: false,
            last_time: 0.0,
            requested_time,
            last_time_units: "seconds".to_string(),
            max_memory_gb: None,
            para_error: false,
            memory_error: false,
            time_error: false,
            x_par_allocation_error: false,
            corrupted_fragment: false,
            has_gpu: false,
            yambo_version: "5.x".to_string(),
            fermi_ev: 0.0,
            ns_db1_path: ns_db1_path.into(),
            written_databases: Vec::new(),
        }
    }

    /// Any flag that forbids reporting success
    pub fn has_terminal_error(&self) -> bool {
        self.para_error
            || self.memory_error
            || self.time_error
            || self.x_par_allocation_error
            || self.corrupted_fragment
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Apply scheduler kill signals
    pub fn apply_scheduler(&mut self, signals: &SchedulerSignals) {
        self.memory_error |= signals.out_of_memory;
        self.time_error |= signals.time_limit;
        self.errors.extend(signals.lines.iter().cloned());
    }

    /// Apply evidence from a log file
    pub fn apply_log(&mut self, evidence: &LogEvidence, verbose_timing: bool) {
        self.apply_common(evidence);
        if let Some(last) = evidence.last_time {
            self.last_time = self.last_time.max(last);
        }
        self.memstats.extend(evidence.memstats.iter().cloned());
        if let Some(max) = evidence.max_memory_gb() {
            self.max_memory_gb = Some(self.max_memory_gb.map_or(max, |m| m.max(max)));
        }
        self.has_gpu |= evidence.has_gpu;
        if verbose_timing {
            self.timing.extend(evidence.timing.iter().cloned());
        }

        for (kind, message) in &evidence.errors {
            match kind {
                ErrorKind::Parallelization => self.para_error = true,
                ErrorKind::XParAllocation => self.x_par_allocation_error = true,
                ErrorKind::Allocation => self.memory_error = true,
                ErrorKind::CorruptedFragment => self.corrupted_fragment = true,
                ErrorKind::Other => {}
            }
            self.errors.push(message.clone());
        }
    }

    /// Apply evidence from a report file
    ///
    /// A setup report that reached `Game Over` counts as a completed p2y run.
    pub fn apply_report(&mut self, evidence: &LogEvidence, setup_report: bool) {
        self.apply_common(evidence);
        if setup_report && evidence.game_over {
            self.p2y_completed = true;
        }
        for (kind, message) in &evidence.errors {
            if *kind == ErrorKind::CorruptedFragment {
                self.corrupted_fragment = true;
            }
            if !self.errors.contains(message) {
                self.errors.push(message.clone());
            }
        }
    }

    fn apply_common(&mut self, evidence: &LogEvidence) {
        self.game_over |= evidence.game_over;
        self.p2y_completed |= evidence.p2y_completed;
        if let Some(version) = &evidence.yambo_version {
            self.yambo_version = version.clone();
        }
        if let Some(fermi) = evidence.fermi_ev {
            self.fermi_ev = fermi;
        }
        for db in &evidence.written_dbs {
            if !self.written_databases.contains(db) {
                self.written_databases.push(db.clone());
            }
        }
        for warning in &evidence.warnings {
            if !self.warnings.contains(warning) {
                self.warnings.push(warning.clone());
            }
        }
    }

    /// Finalize `yambo_wrote_dbs` once every file has been applied
    pub fn finalize_written_dbs(&mut self) {
        self.yambo_wrote_dbs = !self.written_databases.is_empty();
    }

    /// `(requested - last) / requested`, or `None` without a requested time
    pub fn remaining_time_fraction(&self) -> Option<f64> {
        (self.requested_time > 0.0).then(|| (self.requested_time - self.last_time) / self.requested_time)
    }
}
