//! # yambo-parser - Result Parser for Yambo Calculations
//!
//! Turns the retrieved output folder of a finished Yambo run into structured
//! diagnostics, numeric datasets and one exit code.
//!
//! ## Pipeline
//!
//! 1. The folder is copied into a scratch directory ([`folder::Scratch`]).
//! 2. Scheduler stderr sets out-of-memory and wall-time flags.
//! 3. `ndb.BS_diago*` databases are decoded into a chi spectrum and excitons.
//! 4. Every other file is classified by [`file::classify`], a pure function of
//!    its name and leading bytes, and decoded.
//! 5. Handlers update the [`OutputParameters`] builder and emit [`Dataset`]s.
//! 6. Success and the [`ParserExitCode`] are decided from the collected flags.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use yambo_parser::{LocalFolder, ParserInputs, YamboParameters, YamboParser};
//!
//! let parameters = YamboParameters::new().with_argument("gw0").with_argument("ppa");
//! let inputs = ParserInputs::new(parameters).with_requested_time(3600.0);
//!
//! let folder = LocalFolder::new("./retrieved");
//! let outcome = YamboParser::new().parse(Some(&folder), &inputs);
//! println!("{} ({} datasets)", outcome.exit_code, outcome.datasets.len());
//! ```
//!
//! ## Binary databases
//!
//! `ndb.*` files are read through [`DatabaseReader`]. Enable the `netcdf`
//! feature for the libnetcdf backend; without it the databases are listed as
//! unreadable in the warnings.

pub mod bse;
pub mod datasets;
pub mod error;
pub mod exit_code;
pub mod file;
pub mod folder;
pub mod formats;
pub mod naming;
pub mod ndb;
pub mod parameters;
pub mod params;
pub mod parser;

pub use bse::{BseSpectrumOptions, ExcitonicStates};
pub use datasets::{links, ArrayData, BandsData, Dataset};
pub use error::{ParserError, Result};
pub use exit_code::ParserExitCode;
pub use file::{classify, OpticsKind, YamboFile, YamboFileType};
pub use folder::{LocalFolder, MemoryFolder, RetrievedFolder};
pub use naming::{decode_name, encode_name};
pub use ndb::{BseDiagoDatabase, DatabaseReader, HfDatabase, NoDatabaseReader, QpDatabase};
#[cfg(feature = "netcdf")]
pub use ndb::NetcdfReader;
pub use parameters::{VariableValue, YamboParameters, YamboSettings, YamboVariable};
pub use params::OutputParameters;
pub use parser::{ParseOutcome, ParserInputs, ParserOptions, YamboParser};
