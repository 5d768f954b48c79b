use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};
use chrono::{NaiveDate, NaiveDateTime};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::types::*;

/// Read every sheet of a workbook into memory, values and formulas
pub fn read_workbook(path: &Path) -> Result<Workbook, ExcelError> {
    if !path.exists() {
        return Err(ExcelError::file_not_found(&path.display().to_string()));
    }

    let mut workbook: Sheets<_> = open_workbook_auto(path)
        .map_err(|e| ExcelError::read_error(format!("Failed to open workbook: {}", e)))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(sheet_names.len());

    for name in &sheet_names {
        let values = workbook
            .worksheet_range(name)
            .map_err(|e| ExcelError::read_error(format!("Failed to read sheet '{}': {}", name, e)))?;
        let formulas = workbook
            .worksheet_formula(name)
            .map_err(|e| ExcelError::read_error(format!("Failed to read formulas of '{}': {}", name, e)))?;

        sheets.push(build_sheet(name, &values, &formulas));
    }

    Ok(Workbook { sheets })
}

/// Merge calamine's value and formula grids into one sheet.
/// Empty value cells without a formula are not stored.
fn build_sheet(name: &str, values: &Range<Data>, formulas: &Range<String>) -> Sheet {
    let mut sheet = Sheet::new(name);

    if let Some((start_row, start_col)) = values.start() {
        for (row_offset, row) in values.rows().enumerate() {
            for (col_offset, data) in row.iter().enumerate() {
                let value = convert_cell_value(data);
                if value.is_blank() {
                    continue;
                }
                let at = CellRef::new(start_row + row_offset as u32, start_col + col_offset as u32);
                sheet.set_cell(at, Cell::new(value));
            }
        }
    }

    if let Some((start_row, start_col)) = formulas.start() {
        for (row_offset, row) in formulas.rows().enumerate() {
            for (col_offset, formula) in row.iter().enumerate() {
                if formula.is_empty() {
                    continue;
                }
                let at = CellRef::new(start_row + row_offset as u32, start_col + col_offset as u32);
                let formula_text = formula.strip_prefix('=').unwrap_or(formula);
                sheet.set_formula(at, formula_text);
            }
        }
    }

    sheet
}

/// Convert calamine Data to our CellValue
fn convert_cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Blank,
        Data::String(s) => CellValue::String(s.clone()),
        Data::Float(f) => CellValue::Numeric(*f),
        Data::Int(i) => CellValue::Numeric(*i as f64),
        Data::Bool(b) => CellValue::Boolean(*b),
        Data::DateTime(dt) => value_from_serial(dt.as_f64()),
        Data::DateTimeIso(s) => parse_iso_datetime(s),
        Data::DurationIso(s) => CellValue::String(s.clone()),
        Data::Error(e) => CellValue::Error(format!("{:?}", e)),
    }
}

fn parse_iso_datetime(s: &str) -> CellValue {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return CellValue::DateTime(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return CellValue::Date(date);
    }
    CellValue::String(s.to_string())
}

/// Get list of sheets in a workbook with their used sizes
pub fn get_sheets(path: &Path) -> Result<Vec<SheetInfo>, ExcelError> {
    let mut workbook: Sheets<_> = open_workbook_auto(path)
        .map_err(|e| ExcelError::read_error(format!("Failed to open workbook: {}", e)))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::new();

    for (index, name) in sheet_names.iter().enumerate() {
        let (row_count, col_count) = workbook
            .worksheet_range(name)
            .map(|range| range.get_size())
            .unwrap_or((0, 0));
        sheets.push(SheetInfo {
            name: name.clone(),
            index: index as u32,
            row_count: row_count as u32,
            col_count: col_count as u32,
        });
    }

    Ok(sheets)
}

/// Sheet summaries, size and checksum of a stored document
pub fn describe_document(path: &Path) -> Result<DocumentInfo, ExcelError> {
    if !path.exists() {
        return Err(ExcelError::file_not_found(&path.display().to_string()));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    Ok(DocumentInfo {
        name,
        sheets: get_sheets(path)?,
        file_size_bytes,
        checksum: compute_checksum(path)?,
    })
}

/// Compute SHA-256 checksum of a file
pub fn compute_checksum(path: &Path) -> Result<String, ExcelError> {
    let mut file = File::open(path)
        .map_err(|e| ExcelError::read_error(format!("Failed to open file for checksum: {}", e)))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| ExcelError::read_error(format!("Failed to read file for checksum: {}", e)))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    let result = hasher.finalize();
    Ok(format!("{:x}", result))
}
