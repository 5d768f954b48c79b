use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use super::error::{ConsolidationError, ConsolidationResult};
use super::has_xlsx_extension;
use crate::excel::{read_workbook, Row, Sheet};

const HEADER_ROW: u32 = 0;

/// Ordered column index -> header text, taken from a template's first row.
/// Immutable once extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateSchema {
    headers: BTreeMap<u32, String>,
}

impl TemplateSchema {
    /// Dense mapping over `0..=last populated column`; gaps map to ""
    pub fn from_header_row(row: Option<&Row>) -> Self {
        let headers = match row.and_then(|r| r.last_col().map(|last| (r, last))) {
            Some((row, last)) => (0..=last).map(|col| (col, header_text(row, col))).collect(),
            None => BTreeMap::new(),
        };
        TemplateSchema { headers }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn get(&self, col: u32) -> Option<&str> {
        self.headers.get(&col).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.headers.iter().map(|(col, name)| (*col, name.as_str()))
    }
}

fn header_text(row: &Row, col: u32) -> String {
    row.get(col)
        .map(|cell| cell.value.to_text().trim().to_string())
        .unwrap_or_default()
}

/// Read a template and derive its schema. The template must be an `.xlsx`
/// file holding exactly one sheet.
pub fn extract_template_schema(path: &Path) -> ConsolidationResult<(Sheet, TemplateSchema)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if !has_xlsx_extension(&name) {
        return Err(ConsolidationError::InvalidExtension(name));
    }

    let mut sheets = read_workbook(path)?.sheets;
    if sheets.len() != 1 {
        return Err(ConsolidationError::InvalidSheetCount {
            name,
            count: sheets.len(),
        });
    }

    let sheet = sheets.remove(0);
    let schema = TemplateSchema::from_header_row(sheet.row(HEADER_ROW));
    debug!(template = %name, columns = schema.len(), "Extracted template schema");

    Ok((sheet, schema))
}

/// True iff the candidate's header row has the schema's width and every
/// header text matches exactly after trimming
pub fn headers_match(schema: &TemplateSchema, candidate: &Sheet) -> bool {
    let header = candidate.row(HEADER_ROW);
    let width = header
        .and_then(Row::last_col)
        .map(|last| last as usize + 1)
        .unwrap_or(0);

    if width != schema.len() {
        return false;
    }

    schema.iter().all(|(col, expected)| {
        let actual = header.map(|row| header_text(row, col)).unwrap_or_default();
        actual == expected
    })
}
