//! Excel module for reading, writing, and validating XLSX workbooks.
//!
//! This module provides:
//! - An in-memory workbook model with typed cell values
//! - Reading workbooks (values and formulas) with calamine
//! - Writing rows back while preserving the rest of the file
//! - Data validation rules read from the workbook's own metadata

pub mod types;
pub mod reader;
pub mod validation;
pub mod writer;

// Re-export commonly used types and functions
pub use types::*;
pub use reader::{compute_checksum, describe_document, get_sheets, read_workbook};
pub use validation::{
    check_cell, read_validation_rules, RuleContext, RuleSource, SheetRules, ValidationKind,
    ValidationOperator, ValidationRule, Verdict,
};
pub use writer::{write_rows, write_workbook};
