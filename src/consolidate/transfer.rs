use serde::Serialize;

use crate::excel::{Cell, CellValue, Row, Sheet};

/// The single copy path a cell takes, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferKind {
    DateTime,
    Date,
    RichText,
    Boolean,
    Numeric,
    String,
    Formula,
    Empty,
}

/// Pick the copy path for a cell. Date, date-time and rich text values win
/// over a formula; boolean, numeric and string values only count for
/// literal (formula-free) cells.
pub fn classify(cell: &Cell) -> TransferKind {
    let literal = cell.formula.is_none();
    match &cell.value {
        CellValue::DateTime(_) => TransferKind::DateTime,
        CellValue::Date(_) => TransferKind::Date,
        CellValue::RichText(_) => TransferKind::RichText,
        CellValue::Boolean(_) if literal => TransferKind::Boolean,
        CellValue::Numeric(_) if literal => TransferKind::Numeric,
        CellValue::String(_) if literal => TransferKind::String,
        _ if !literal => TransferKind::Formula,
        _ => TransferKind::Empty,
    }
}

/// Produce the destination cell for a source cell.
///
/// A formula is copied as formula text; the source's cached result rides
/// along so the merged sheet can be checked without a formula engine.
pub fn transfer_value(cell: &Cell) -> Cell {
    match classify(cell) {
        TransferKind::DateTime
        | TransferKind::Date
        | TransferKind::RichText
        | TransferKind::Boolean
        | TransferKind::Numeric
        | TransferKind::String => Cell::new(cell.value.clone()),
        TransferKind::Formula => match &cell.formula {
            Some(formula) => Cell::with_formula(formula.clone(), cell.value.clone()),
            None => Cell::new(CellValue::String(String::new())),
        },
        TransferKind::Empty => Cell::new(CellValue::String(String::new())),
    }
}

/// Append the data rows of `source` (row 1 onwards) to the end of `dest`.
///
/// Stops at the first row that is absent or holds only blank cells; rows
/// after that hole are never copied. Returns the number of rows appended.
pub fn transfer_rows(source: &Sheet, dest: &mut Sheet) -> usize {
    let mut appended = 0;
    let mut index = 1;

    while let Some(row) = source.row(index) {
        if row.cell_count() == 0 || row.is_blank() {
            break;
        }

        let copied = Row::from_cells(
            row.cells()
                .filter(|(_, cell)| !cell.is_blank())
                .map(|(col, cell)| (col, transfer_value(cell))),
        );
        dest.append_row(copied);

        appended += 1;
        index += 1;
    }

    appended
}
