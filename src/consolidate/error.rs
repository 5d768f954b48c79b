use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::excel::{ExcelError, ExcelErrorType};

/// Errors raised while consolidating documents or managing the stores
#[derive(Error, Debug)]
pub enum ConsolidationError {
    // ===== Request errors =====
    #[error("{0} cannot be empty")]
    EmptyOrMissingField(String),

    #[error("File: '{0}' needs to be of type '.xlsx'!")]
    InvalidExtension(String),

    #[error("Template file: '{name}' must contain exactly one worksheet, found {count}")]
    InvalidSheetCount { name: String, count: usize },

    #[error("Content File: '{file}' contains invalid headers in sheet: '{sheet}'")]
    HeaderMismatch { file: String, sheet: String },

    #[error("File '{file}' did not pass validations! (cell {cell}: {reason})")]
    ValidationFailure {
        file: String,
        cell: String,
        reason: String,
    },

    #[error("Template file: '{0}' does not exist!")]
    MissingTemplate(String),

    #[error("Unable to merge as consolidated file does not exist for template: {0}")]
    MissingConsolidatedForMerge(String),

    // ===== Store errors =====
    #[error("Unable to find file with name: {0}")]
    NotFound(String),

    #[error("Unable to delete file with name: {0}")]
    DeleteFailed(String),

    #[error("File '{0}' already exists")]
    AlreadyExists(String),

    #[error("{0}")]
    ResourceIo(String),

    #[error("{0}")]
    Unexpected(String),
}

pub type ConsolidationResult<T> = Result<T, ConsolidationError>;

impl ConsolidationError {
    /// Whether the caller caused the failure (as opposed to the server)
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            ConsolidationError::AlreadyExists(_)
                | ConsolidationError::ResourceIo(_)
                | ConsolidationError::Unexpected(_)
        )
    }
}

impl From<ExcelError> for ConsolidationError {
    fn from(e: ExcelError) -> Self {
        match e.error_type {
            ExcelErrorType::FileNotFound | ExcelErrorType::ReadError | ExcelErrorType::WriteError => {
                ConsolidationError::ResourceIo(e.message)
            }
            _ => ConsolidationError::Unexpected(e.message),
        }
    }
}

impl From<std::io::Error> for ConsolidationError {
    fn from(e: std::io::Error) -> Self {
        ConsolidationError::ResourceIo(e.to_string())
    }
}

/// The single reported result of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ConsolidationOutcome {
    Success(String),
    ClientError(String),
    ServerError(String),
}

impl ConsolidationOutcome {
    pub fn message(&self) -> &str {
        match self {
            ConsolidationOutcome::Success(m)
            | ConsolidationOutcome::ClientError(m)
            | ConsolidationOutcome::ServerError(m) => m,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConsolidationOutcome::Success(_))
    }
}

impl From<ConsolidationResult<String>> for ConsolidationOutcome {
    fn from(result: ConsolidationResult<String>) -> Self {
        match result {
            Ok(message) => ConsolidationOutcome::Success(message),
            Err(e) if e.is_client_error() => ConsolidationOutcome::ClientError(e.to_string()),
            Err(e) => ConsolidationOutcome::ServerError(format!("An exception occurred: {}", e)),
        }
    }
}
