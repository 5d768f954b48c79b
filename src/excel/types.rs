use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sheet bounds; references beyond them are rejected when parsed
pub const EXCEL_MAX_ROWS: u32 = 1_048_576;
pub const EXCEL_MAX_COLS: u32 = 16_384;

/// A reference to a single cell. Rows and columns are 0-indexed, so
/// `CellRef::new(0, 0)` is `A1`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Convert to A1 notation (e.g. `A1`, `BC32`)
    pub fn to_a1(self) -> String {
        format!("{}{}", column_index_to_letter(self.col), self.row + 1)
    }

    /// Parse an A1-style reference, accepting optional `$` markers (`$B$2`)
    pub fn from_a1(a1: &str) -> Result<Self, ExcelError> {
        let s = a1.trim();
        let bytes = s.as_bytes();
        let mut idx = 0usize;

        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }
        let col_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        if idx == col_start {
            return Err(ExcelError::invalid_reference(a1));
        }
        let col_str = &s[col_start..idx];

        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }
        let row_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == row_start || idx != bytes.len() {
            return Err(ExcelError::invalid_reference(a1));
        }

        let col = column_letter_to_index(col_str).ok_or_else(|| ExcelError::invalid_reference(a1))?;
        let row: u32 = s[row_start..idx]
            .parse()
            .map_err(|_| ExcelError::invalid_reference(a1))?;
        if row == 0 || row > EXCEL_MAX_ROWS || col >= EXCEL_MAX_COLS {
            return Err(ExcelError::invalid_reference(a1));
        }

        Ok(Self { row: row - 1, col })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// An inclusive rectangular region, always normalized so that
/// `start` is the top-left corner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn new(a: CellRef, b: CellRef) -> Self {
        Self {
            start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn contains(&self, cell: CellRef) -> bool {
        cell.row >= self.start.row
            && cell.row <= self.end.row
            && cell.col >= self.start.col
            && cell.col <= self.end.col
    }

    /// Parse `A1:B2` or a single-cell `C3`
    pub fn from_a1(a1: &str) -> Result<Self, ExcelError> {
        match a1.trim().split_once(':') {
            Some((lhs, rhs)) => Ok(Self::new(CellRef::from_a1(lhs)?, CellRef::from_a1(rhs)?)),
            None => {
                let cell = CellRef::from_a1(a1)?;
                Ok(Self::new(cell, cell))
            }
        }
    }

    /// Cells of the range in row-major order
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        (self.start.row..=self.end.row)
            .flat_map(move |row| (self.start.col..=self.end.col).map(move |col| CellRef::new(row, col)))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// Parse a SpreadsheetML `sqref` attribute (`A1`, `A1:B2`, `A1 A3:B7`)
pub fn parse_sqref(sqref: &str) -> Result<Vec<CellRange>, ExcelError> {
    sqref.split_whitespace().map(CellRange::from_a1).collect()
}

/// Represents a cell value with type information.
/// For formula cells this is the cached result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    Blank,
    String(String),
    RichText(String),
    Numeric(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Error(String),
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Blank
    }
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Blank)
    }

    /// Display text, the way the value reads in a grid
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Blank => String::new(),
            CellValue::String(s) | CellValue::RichText(s) | CellValue::Error(s) => s.clone(),
            CellValue::Numeric(n) => format_number(*n),
            CellValue::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }

    /// Numeric view of the value; dates become Excel serial numbers
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Numeric(n) => Some(*n),
            CellValue::Date(d) => Some(date_to_serial(*d)),
            CellValue::DateTime(dt) => Some(datetime_to_serial(*dt)),
            _ => None,
        }
    }
}

/// A populated cell: a value plus the formula that produced it, if any
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub value: CellValue,
    pub formula: Option<String>,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Cell { value, formula: None }
    }

    pub fn with_formula(formula: impl Into<String>, cached: CellValue) -> Self {
        Cell {
            value: cached,
            formula: Some(formula.into()),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.value.is_blank() && self.formula.is_none()
    }
}

/// One sheet row, keyed by 0-based column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    cells: BTreeMap<u32, Cell>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn from_cells(cells: impl IntoIterator<Item = (u32, Cell)>) -> Self {
        Row {
            cells: cells.into_iter().collect(),
        }
    }

    pub fn set(&mut self, col: u32, cell: Cell) {
        self.cells.insert(col, cell);
    }

    pub fn get(&self, col: u32) -> Option<&Cell> {
        self.cells.get(&col)
    }

    pub fn cells(&self) -> impl Iterator<Item = (u32, &Cell)> {
        self.cells.iter().map(|(col, cell)| (*col, cell))
    }

    pub fn last_col(&self) -> Option<u32> {
        self.cells.keys().next_back().copied()
    }

    /// Number of cell slots present, blank or not
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// True when the row has no cells or every cell is blank
    pub fn is_blank(&self) -> bool {
        self.cells.values().all(Cell::is_blank)
    }
}

/// A worksheet held fully in memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    rows: BTreeMap<u32, Row>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Sheet {
            name: name.into(),
            rows: BTreeMap::new(),
        }
    }

    pub fn row(&self, index: u32) -> Option<&Row> {
        self.rows.get(&index)
    }

    pub fn rows(&self) -> impl Iterator<Item = (u32, &Row)> {
        self.rows.iter().map(|(idx, row)| (*idx, row))
    }

    pub fn cell(&self, at: CellRef) -> Option<&Cell> {
        self.rows.get(&at.row).and_then(|row| row.get(at.col))
    }

    pub fn set_cell(&mut self, at: CellRef, cell: Cell) {
        self.rows.entry(at.row).or_default().set(at.col, cell);
    }

    /// Attach a formula to a cell, keeping any cached value already read
    pub fn set_formula(&mut self, at: CellRef, formula: impl Into<String>) {
        let row = self.rows.entry(at.row).or_default();
        match row.cells.get_mut(&at.col) {
            Some(cell) => cell.formula = Some(formula.into()),
            None => row.set(at.col, Cell::with_formula(formula, CellValue::Blank)),
        }
    }

    /// Index of the last row holding at least one cell
    pub fn last_row(&self) -> Option<u32> {
        self.rows
            .iter()
            .rev()
            .find(|(_, row)| row.cell_count() > 0)
            .map(|(idx, _)| *idx)
    }

    /// Append a row after the current last row and return its index
    pub fn append_row(&mut self, row: Row) -> u32 {
        let index = self.last_row().map(|r| r + 1).unwrap_or(0);
        self.rows.insert(index, row);
        index
    }
}

/// A workbook held fully in memory, sheets in workbook order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

/// Information about a sheet in an Excel file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetInfo {
    pub name: String,
    pub index: u32,
    pub row_count: u32,
    pub col_count: u32,
}

/// Summary of a stored document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub name: String,
    pub sheets: Vec<SheetInfo>,
    pub file_size_bytes: u64,
    pub checksum: String,
}

/// Excel-specific errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcelError {
    pub message: String,
    pub error_type: ExcelErrorType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExcelErrorType {
    FileNotFound,
    InvalidFormat,
    InvalidReference,
    SheetNotFound,
    ReadError,
    WriteError,
}

impl fmt::Display for ExcelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExcelError {}

impl ExcelError {
    pub fn new(message: impl Into<String>, error_type: ExcelErrorType) -> Self {
        ExcelError {
            message: message.into(),
            error_type,
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        ExcelError::new(format!("File not found: {}", path), ExcelErrorType::FileNotFound)
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        ExcelError::new(message, ExcelErrorType::InvalidFormat)
    }

    pub fn invalid_reference(reference: &str) -> Self {
        ExcelError::new(
            format!("Invalid cell reference: '{}'", reference),
            ExcelErrorType::InvalidReference,
        )
    }

    pub fn sheet_not_found(sheet: &str) -> Self {
        ExcelError::new(format!("Sheet not found: {}", sheet), ExcelErrorType::SheetNotFound)
    }

    pub fn read_error(message: impl Into<String>) -> Self {
        ExcelError::new(message, ExcelErrorType::ReadError)
    }

    pub fn write_error(message: impl Into<String>) -> Self {
        ExcelError::new(message, ExcelErrorType::WriteError)
    }
}

impl From<zip::result::ZipError> for ExcelError {
    fn from(e: zip::result::ZipError) -> Self {
        ExcelError::invalid_format(format!("Invalid XLSX package: {}", e))
    }
}

impl From<quick_xml::Error> for ExcelError {
    fn from(e: quick_xml::Error) -> Self {
        ExcelError::invalid_format(format!("Malformed worksheet XML: {}", e))
    }
}

impl From<quick_xml::events::attributes::AttrError> for ExcelError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        ExcelError::invalid_format(format!("Malformed worksheet XML attribute: {}", e))
    }
}

// Excel epoch (1900 date system, valid from 1900-03-01 on)
fn excel_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .unwrap_or_default()
        .and_time(NaiveTime::default())
}

/// Excel serial number of a date
pub fn date_to_serial(date: NaiveDate) -> f64 {
    datetime_to_serial(date.and_time(NaiveTime::default()))
}

/// Excel serial number of a date-time (days plus fractional day)
pub fn datetime_to_serial(value: NaiveDateTime) -> f64 {
    let elapsed = value - excel_epoch();
    elapsed.num_seconds() as f64 / 86_400.0
}

/// Convert an Excel serial number (days since 1899-12-30) to a date-time
pub fn serial_to_datetime(value: f64) -> Option<NaiveDateTime> {
    if !value.is_finite() {
        return None;
    }
    let days = value.floor() as i64;
    let seconds = (value.fract() * 86_400.0).round() as i64;
    excel_epoch()
        .checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}

/// Split a serial date-time into `Date` when it has no time part
pub fn value_from_serial(value: f64) -> CellValue {
    match serial_to_datetime(value) {
        Some(dt) if dt.num_seconds_from_midnight() == 0 => CellValue::Date(dt.date()),
        Some(dt) => CellValue::DateTime(dt),
        None => CellValue::Numeric(value),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Convert column index (0-based) to Excel column letter (A, B, ..., Z, AA, AB, ...)
pub fn column_index_to_letter(index: u32) -> String {
    let mut result = String::new();
    let mut n = index + 1;

    while n > 0 {
        n -= 1;
        let c = (b'A' + (n % 26) as u8) as char;
        result.insert(0, c);
        n /= 26;
    }

    result
}

/// Convert an Excel column letter to a 0-based index
pub fn column_letter_to_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut n: u32 = 0;
    for b in letters.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        n = n * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32;
    }
    Some(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_index_to_letter() {
        assert_eq!(column_index_to_letter(0), "A");
        assert_eq!(column_index_to_letter(1), "B");
        assert_eq!(column_index_to_letter(25), "Z");
        assert_eq!(column_index_to_letter(26), "AA");
        assert_eq!(column_index_to_letter(27), "AB");
        assert_eq!(column_index_to_letter(51), "AZ");
        assert_eq!(column_index_to_letter(52), "BA");
    }

    #[test]
    fn test_column_letter_to_index() {
        assert_eq!(column_letter_to_index("A"), Some(0));
        assert_eq!(column_letter_to_index("z"), Some(25));
        assert_eq!(column_letter_to_index("AA"), Some(26));
        assert_eq!(column_letter_to_index("BA"), Some(52));
        assert_eq!(column_letter_to_index(""), None);
        assert_eq!(column_letter_to_index("A1"), None);
    }

    #[test]
    fn test_cell_ref_from_a1() {
        assert_eq!(CellRef::from_a1("A1").unwrap(), CellRef::new(0, 0));
        assert_eq!(CellRef::from_a1("$C$12").unwrap(), CellRef::new(11, 2));
        assert_eq!(CellRef::from_a1("AB3").unwrap().to_a1(), "AB3");
        assert!(CellRef::from_a1("A0").is_err());
        assert!(CellRef::from_a1("12").is_err());
        assert!(CellRef::from_a1("B2x").is_err());
    }

    #[test]
    fn test_sqref_ranges() {
        let ranges = parse_sqref("B2:B100 D5").unwrap();
        assert_eq!(ranges.len(), 2);
        assert!(ranges[0].contains(CellRef::new(1, 1)));
        assert!(ranges[0].contains(CellRef::new(99, 1)));
        assert!(!ranges[0].contains(CellRef::new(100, 1)));
        assert!(ranges[1].contains(CellRef::new(4, 3)));
        assert_eq!(ranges[0].to_string(), "B2:B100");
    }

    #[test]
    fn test_range_is_normalized() {
        let range = CellRange::from_a1("C3:A1").unwrap();
        assert_eq!(range.start, CellRef::new(0, 0));
        assert_eq!(range.end, CellRef::new(2, 2));
        assert_eq!(range.cells().count(), 9);
    }

    #[test]
    fn test_serial_conversions() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(date_to_serial(date), 45306.0);
        assert_eq!(value_from_serial(45306.0), CellValue::Date(date));

        let dt = date.and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(datetime_to_serial(dt), 45306.5);
        assert_eq!(value_from_serial(45306.5), CellValue::DateTime(dt));
    }

    #[test]
    fn test_to_text() {
        assert_eq!(CellValue::Numeric(42.0).to_text(), "42");
        assert_eq!(CellValue::Numeric(2.5).to_text(), "2.5");
        assert_eq!(CellValue::Boolean(true).to_text(), "TRUE");
        assert_eq!(CellValue::Blank.to_text(), "");
    }

    #[test]
    fn test_sheet_append_and_last_row() {
        let mut sheet = Sheet::new("Data");
        assert_eq!(sheet.last_row(), None);

        sheet.set_cell(CellRef::new(0, 0), Cell::new(CellValue::String("Name".into())));
        let idx = sheet.append_row(Row::from_cells([(0, Cell::new(CellValue::Numeric(1.0)))]));
        assert_eq!(idx, 1);
        assert_eq!(sheet.last_row(), Some(1));
    }

    #[test]
    fn test_set_formula_keeps_cached_value() {
        let mut sheet = Sheet::new("Data");
        let at = CellRef::new(1, 1);
        sheet.set_cell(at, Cell::new(CellValue::Numeric(3.0)));
        sheet.set_formula(at, "A2+1");

        let cell = sheet.cell(at).unwrap();
        assert_eq!(cell.value, CellValue::Numeric(3.0));
        assert_eq!(cell.formula.as_deref(), Some("A2+1"));
    }
}
