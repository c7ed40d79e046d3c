//! Error types for parsing operations

use thiserror::Error;

/// Result type for parser operations
pub type Result<T> = std::result::Result<T, ParserError>;

/// Errors raised while decoding a retrieved folder
///
/// These never reach the host directly: [`YamboParser::parse`](crate::YamboParser::parse)
/// folds them into a [`ParserExitCode`](crate::ParserExitCode) or a warning.
#[derive(Error, Debug)]
pub enum ParserError {
    /// I/O error while materializing or reading files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The retrieved folder could not be listed or read
    #[error("Retrieved folder error: {0}")]
    Folder(String),

    /// An encoded dataset name is not valid
    #[error("Invalid encoded name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A binary database could not be decoded
    #[error("Database error in {file}: {reason}")]
    Database { file: String, reason: String },

    /// No database backend is compiled in
    #[error("No database reader available for {0}")]
    DatabaseUnavailable(String),

    /// Arrays that must align have different shapes
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A text table has an unexpected layout
    #[error("Malformed table in {file}: {reason}")]
    Table { file: String, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ParserError {
    pub fn database(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Database {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "netcdf")]
impl From<netcdf::Error> for ParserError {
    fn from(err: netcdf::Error) -> Self {
        Self::Database {
            file: String::from("<netcdf>"),
            reason: err.to_string(),
        }
    }
}
