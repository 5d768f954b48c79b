//! Template-driven consolidation of uploaded workbooks.
//!
//! A template defines the header row every content sheet must carry and the
//! data validation rules merged cells must satisfy. Content rows accumulate in
//! one `Consolidated-<template>` document per template.

pub mod error;
pub mod orchestrator;
pub mod schema;
pub mod transfer;
pub mod verify;

pub use error::{ConsolidationError, ConsolidationOutcome, ConsolidationResult};
pub use orchestrator::{ConsolidationRequest, Consolidator, Upload};
pub use schema::{extract_template_schema, headers_match, TemplateSchema};
pub use transfer::{classify, transfer_rows, transfer_value, TransferKind};
pub use verify::verify_sheet;

pub const XLSX_EXTENSION: &str = ".xlsx";
pub const CONSOLIDATED_PREFIX: &str = "Consolidated-";
pub const CONSOLIDATED_SHEET_NAME: &str = "Consolidated";

/// Case-sensitive `.xlsx` suffix check
pub fn has_xlsx_extension(name: &str) -> bool {
    name.ends_with(XLSX_EXTENSION)
}

/// `T.xlsx` -> `Consolidated-T.xlsx`
pub fn consolidated_name_for(template_name: &str) -> String {
    format!("{}{}", CONSOLIDATED_PREFIX, template_name)
}
