use std::path::Path;
use umya_spreadsheet::{new_file, reader, writer, Worksheet};

use super::types::*;

const DATE_FORMAT: &str = "yyyy-mm-dd";
const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Write rows `from_row..` of `sheet` into the worksheet named `on_disk_name`
/// of an existing workbook, optionally renaming that worksheet, and save it.
/// Rows before `from_row` are left exactly as they are on disk.
pub fn write_rows(
    path: &Path,
    on_disk_name: &str,
    sheet: &Sheet,
    from_row: u32,
    rename_to: Option<&str>,
) -> Result<u32, ExcelError> {
    if !path.exists() {
        return Err(ExcelError::file_not_found(&path.display().to_string()));
    }

    let mut book = reader::xlsx::read(path)
        .map_err(|e| ExcelError::read_error(format!("Failed to open workbook: {}", e)))?;

    let worksheet = book
        .get_sheet_by_name_mut(on_disk_name)
        .ok_or_else(|| ExcelError::sheet_not_found(on_disk_name))?;

    let mut rows_written = 0;
    for (row_idx, row) in sheet.rows().filter(|(idx, _)| *idx >= from_row) {
        for (col_idx, cell) in row.cells() {
            write_cell(worksheet, CellRef::new(row_idx, col_idx), cell);
        }
        rows_written += 1;
    }

    if let Some(name) = rename_to {
        worksheet.set_name(name);
    }

    writer::xlsx::write(&book, path)
        .map_err(|e| ExcelError::write_error(format!("Failed to save workbook: {}", e)))?;

    Ok(rows_written)
}

/// Write a single cell, preserving its kind
fn write_cell(worksheet: &mut Worksheet, at: CellRef, cell: &Cell) {
    // Excel uses 1-based indexing
    let target = worksheet.get_cell_mut((at.col + 1, at.row + 1));

    if let Some(formula) = &cell.formula {
        // umya adds the leading '='
        let formula_text = formula.strip_prefix('=').unwrap_or(formula);
        target.set_formula(formula_text);
        return;
    }

    match &cell.value {
        CellValue::Blank => {}
        CellValue::String(s) | CellValue::RichText(s) | CellValue::Error(s) => {
            target.set_value_string(s);
        }
        CellValue::Numeric(n) => {
            target.set_value_number(*n);
        }
        CellValue::Boolean(b) => {
            target.set_value_bool(*b);
        }
        CellValue::Date(d) => {
            target.set_value_number(date_to_serial(*d));
            target
                .get_style_mut()
                .get_number_format_mut()
                .set_format_code(DATE_FORMAT);
        }
        CellValue::DateTime(dt) => {
            target.set_value_number(datetime_to_serial(*dt));
            target
                .get_style_mut()
                .get_number_format_mut()
                .set_format_code(DATETIME_FORMAT);
        }
    }
}

/// Write a whole in-memory workbook to a new file
pub fn write_workbook(workbook: &Workbook, output_path: &Path) -> Result<(), ExcelError> {
    let mut book = new_file();

    for (index, sheet) in workbook.sheets.iter().enumerate() {
        if index == 0 {
            // new_file() starts with "Sheet1"
            if let Some(first) = book.get_sheet_by_name_mut("Sheet1") {
                first.set_name(sheet.name.as_str());
            }
        } else if book.get_sheet_by_name(&sheet.name).is_none() {
            let _ = book.new_sheet(sheet.name.as_str());
        }

        let worksheet = book
            .get_sheet_by_name_mut(&sheet.name)
            .ok_or_else(|| ExcelError::sheet_not_found(&sheet.name))?;

        for (row_idx, row) in sheet.rows() {
            for (col_idx, cell) in row.cells() {
                write_cell(worksheet, CellRef::new(row_idx, col_idx), cell);
            }
        }
    }

    writer::xlsx::write(&book, output_path)
        .map_err(|e| ExcelError::write_error(format!("Failed to write file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::reader::read_workbook;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn text(s: &str) -> Cell {
        Cell::new(CellValue::String(s.to_string()))
    }

    #[test]
    fn test_write_rows_appends_and_renames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.xlsx");

        let mut sheet = Sheet::new("Template");
        sheet.set_cell(CellRef::new(0, 0), text("Name"));
        sheet.set_cell(CellRef::new(0, 1), text("Paid"));
        write_workbook(&Workbook { sheets: vec![sheet.clone()] }, &path).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        sheet.append_row(Row::from_cells([
            (0, text("alpha")),
            (1, Cell::new(CellValue::Boolean(true))),
        ]));
        sheet.append_row(Row::from_cells([
            (0, Cell::new(CellValue::Date(date))),
            (1, Cell::new(CellValue::Numeric(4.0))),
        ]));

        let written = write_rows(&path, "Template", &sheet, 1, Some("Consolidated")).unwrap();
        assert_eq!(written, 2);

        let book = read_workbook(&path).unwrap();
        let merged = book.sheet("Consolidated").expect("renamed sheet");
        assert_eq!(merged.cell(CellRef::new(0, 0)).unwrap().value, CellValue::String("Name".into()));
        assert_eq!(merged.cell(CellRef::new(1, 1)).unwrap().value, CellValue::Boolean(true));
        assert_eq!(merged.cell(CellRef::new(2, 0)).unwrap().value, CellValue::Date(date));
        assert_eq!(merged.cell(CellRef::new(2, 1)).unwrap().value, CellValue::Numeric(4.0));
    }

    #[test]
    fn test_write_rows_unknown_sheet() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.xlsx");
        write_workbook(&Workbook { sheets: vec![Sheet::new("Only")] }, &path).unwrap();

        let err = write_rows(&path, "Missing", &Sheet::new("Missing"), 0, None).unwrap_err();
        assert_eq!(err.error_type, ExcelErrorType::SheetNotFound);
    }
}
