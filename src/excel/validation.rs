//! Data validation rules embedded in a workbook.
//!
//! Rules are read from the `<dataValidations>` block of a worksheet part and
//! evaluated against in-memory cells. Evaluation never authors or rewrites
//! rules; list sources and cell-reference operands are resolved through a
//! [`RuleContext`].

use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::OnceLock;
use zip::ZipArchive;

use super::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationKind {
    Whole,
    Decimal,
    List,
    Date,
    Time,
    TextLength,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValidationOperator {
    #[default]
    Between,
    NotBetween,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

/// A declarative constraint bound to one or more cell ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub kind: ValidationKind,
    pub operator: ValidationOperator,
    /// Stored without a leading `=`
    pub formula1: String,
    pub formula2: Option<String>,
    pub allow_blank: bool,
    pub ranges: Vec<CellRange>,
}

impl ValidationRule {
    pub fn applies_to(&self, cell: CellRef) -> bool {
        self.ranges.iter().any(|r| r.contains(cell))
    }
}

/// Lookup of the rule bound to a cell location
pub trait RuleSource {
    fn rule_for(&self, cell: CellRef) -> Option<&ValidationRule>;
}

/// Resolves what a rule refers to outside of itself
pub trait RuleContext {
    /// Value at a (possibly sheet-qualified) location
    fn cell_value(&self, sheet: Option<&str>, at: CellRef) -> Option<CellValue>;

    /// Outcome of a custom formula for `candidate`, if the context can evaluate it
    fn custom_formula(&self, _formula: &str, _candidate: &Cell) -> Option<bool> {
        None
    }
}

/// The rules of one worksheet, in document order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetRules {
    rules: Vec<ValidationRule>,
}

impl SheetRules {
    pub fn new(rules: Vec<ValidationRule>) -> Self {
        SheetRules { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleSource for SheetRules {
    fn rule_for(&self, cell: CellRef) -> Option<&ValidationRule> {
        self.rules.iter().find(|rule| rule.applies_to(cell))
    }
}

// A single-sheet document resolves every reference against its only sheet,
// whatever qualifier the rule carries (the sheet may have been renamed).
impl RuleContext for Sheet {
    fn cell_value(&self, _sheet: Option<&str>, at: CellRef) -> Option<CellValue> {
        self.cell(at).map(|cell| cell.value.clone())
    }
}

/// Outcome of checking one cell
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Fail(String),
    /// The rule references something that cannot be resolved here
    Unresolved(String),
}

/// Check a cell's current value against a rule
pub fn check_cell(rule: &ValidationRule, cell: &Cell, ctx: &dyn RuleContext) -> Verdict {
    let value = &cell.value;

    if cell.formula.is_some() && value.is_blank() {
        return Verdict::Unresolved("formula without a cached result".to_string());
    }

    let is_empty = match value {
        CellValue::Blank => true,
        CellValue::String(s) | CellValue::RichText(s) => s.is_empty(),
        _ => false,
    };
    if is_empty {
        return if rule.allow_blank {
            Verdict::Pass
        } else {
            Verdict::Fail("blank value is not allowed".to_string())
        };
    }

    match rule.kind {
        ValidationKind::List => check_list(rule, value, ctx),
        ValidationKind::Custom => match ctx.custom_formula(&rule.formula1, cell) {
            Some(true) => Verdict::Pass,
            Some(false) => Verdict::Fail(format!("custom rule '{}' is not satisfied", rule.formula1)),
            None => Verdict::Unresolved(format!("custom formula '{}'", rule.formula1)),
        },
        ValidationKind::Whole | ValidationKind::Decimal => {
            let Some(x) = value.as_number() else {
                return Verdict::Fail(format!("'{}' is not a number", value.to_text()));
            };
            if rule.kind == ValidationKind::Whole && x.fract() != 0.0 {
                return Verdict::Fail(format!("{} is not a whole number", value.to_text()));
            }
            check_bounds(rule, x, ctx)
        }
        ValidationKind::Date => match value.as_number() {
            Some(x) => check_bounds(rule, x, ctx),
            None => Verdict::Fail(format!("'{}' is not a date", value.to_text())),
        },
        ValidationKind::Time => {
            let x = match value {
                CellValue::Date(_) | CellValue::DateTime(_) => value.as_number().map(|n| n - n.floor()),
                _ => value.as_number(),
            };
            match x {
                Some(x) => check_bounds(rule, x, ctx),
                None => Verdict::Fail(format!("'{}' is not a time", value.to_text())),
            }
        }
        ValidationKind::TextLength => {
            let length = value.to_text().chars().count() as f64;
            check_bounds(rule, length, ctx)
        }
    }
}

fn check_bounds(rule: &ValidationRule, x: f64, ctx: &dyn RuleContext) -> Verdict {
    let Some(lo) = resolve_operand(&rule.formula1, ctx) else {
        return Verdict::Unresolved(format!("operand '{}'", rule.formula1));
    };

    let needs_upper = matches!(
        rule.operator,
        ValidationOperator::Between | ValidationOperator::NotBetween
    );
    let hi = if needs_upper {
        let formula2 = rule.formula2.as_deref().unwrap_or_default();
        match resolve_operand(formula2, ctx) {
            Some(hi) => hi,
            None => return Verdict::Unresolved(format!("operand '{}'", formula2)),
        }
    } else {
        lo
    };

    let (min, max) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let ok = match rule.operator {
        ValidationOperator::Between => x >= min && x <= max,
        ValidationOperator::NotBetween => x < min || x > max,
        ValidationOperator::Equal => x == lo,
        ValidationOperator::NotEqual => x != lo,
        ValidationOperator::GreaterThan => x > lo,
        ValidationOperator::GreaterThanOrEqual => x >= lo,
        ValidationOperator::LessThan => x < lo,
        ValidationOperator::LessThanOrEqual => x <= lo,
    };

    if ok {
        Verdict::Pass
    } else {
        Verdict::Fail(format!("{} fails {:?} {}", x, rule.operator, rule.formula1))
    }
}

fn check_list(rule: &ValidationRule, value: &CellValue, ctx: &dyn RuleContext) -> Verdict {
    let Some(items) = list_items(&rule.formula1, ctx) else {
        return Verdict::Unresolved(format!("list source '{}'", rule.formula1));
    };

    let text = value.to_text();
    let number = value.as_number();
    let found = items.iter().any(|item| {
        *item == text || (number.is_some() && item.parse::<f64>().ok() == number)
    });

    if found {
        Verdict::Pass
    } else {
        Verdict::Fail(format!("'{}' is not one of the allowed values", text))
    }
}

/// Items of a list rule: a quoted literal (`"a,b,c"`) or a range reference
fn list_items(formula: &str, ctx: &dyn RuleContext) -> Option<Vec<String>> {
    let f = formula.trim();
    if let Some(inner) = f.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Some(inner.split(',').map(|item| item.trim().to_string()).collect());
    }

    let (sheet, range) = parse_reference(f)?;
    Some(
        range
            .cells()
            .filter_map(|at| ctx.cell_value(sheet.as_deref(), at))
            .filter(|v| !v.is_blank())
            .map(|v| v.to_text())
            .collect(),
    )
}

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:'?([^'!]+)'?!)?(\$?[A-Za-z]{1,3}\$?\d+(?::\$?[A-Za-z]{1,3}\$?\d+)?)$")
            .expect("valid regex")
    })
}

fn date_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^DATE\(\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*\)$").expect("valid regex")
    })
}

fn time_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^TIME\(\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*\)$").expect("valid regex")
    })
}

/// Split `Sheet!$A$1:$A$3` into its optional sheet qualifier and range
fn parse_reference(formula: &str) -> Option<(Option<String>, CellRange)> {
    let caps = reference_re().captures(formula.trim())?;
    let sheet = caps.get(1).map(|m| m.as_str().to_string());
    let range = CellRange::from_a1(caps.get(2)?.as_str()).ok()?;
    Some((sheet, range))
}

/// Resolve a numeric operand: a literal, `DATE(y,m,d)`, `TIME(h,m,s)`,
/// or a single-cell reference
fn resolve_operand(formula: &str, ctx: &dyn RuleContext) -> Option<f64> {
    let f = formula.trim();
    let f = f.strip_prefix('=').unwrap_or(f).trim();
    if f.is_empty() {
        return None;
    }

    if let Ok(n) = f.trim_matches('"').parse::<f64>() {
        return Some(n);
    }

    if let Some(caps) = date_fn_re().captures(f) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day).map(date_to_serial);
    }

    if let Some(caps) = time_fn_re().captures(f) {
        let hours: f64 = caps[1].parse().ok()?;
        let minutes: f64 = caps[2].parse().ok()?;
        let seconds: f64 = caps[3].parse().ok()?;
        return Some((hours * 3600.0 + minutes * 60.0 + seconds) / 86_400.0);
    }

    let (sheet, range) = parse_reference(f)?;
    if range.start != range.end {
        return None;
    }
    ctx.cell_value(sheet.as_deref(), range.start)?.as_number()
}

/// Read the validation rules of the named worksheet of an XLSX file
pub fn read_validation_rules(path: &Path, sheet_name: &str) -> Result<SheetRules, ExcelError> {
    let file = File::open(path)
        .map_err(|e| ExcelError::read_error(format!("Failed to open workbook: {}", e)))?;
    let mut archive = ZipArchive::new(file)?;

    let part = worksheet_part(&mut archive, sheet_name)?;
    let xml = read_part(&mut archive, &part)?;

    Ok(SheetRules::new(parse_data_validations(&xml)?))
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String, ExcelError> {
    let mut entry = archive.by_name(name)?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| ExcelError::read_error(format!("Failed to read '{}': {}", name, e)))?;
    Ok(xml)
}

/// Locate the package part holding a worksheet via workbook.xml and its rels
fn worksheet_part<R: Read + Seek>(archive: &mut ZipArchive<R>, sheet_name: &str) -> Result<String, ExcelError> {
    let workbook_xml = read_part(archive, "xl/workbook.xml")?;
    let relationship_id = sheet_relationship_id(&workbook_xml, sheet_name)?
        .ok_or_else(|| ExcelError::sheet_not_found(sheet_name))?;

    let rels_xml = read_part(archive, "xl/_rels/workbook.xml.rels")?;
    let target = relationship_target(&rels_xml, &relationship_id)?.ok_or_else(|| {
        ExcelError::invalid_format(format!("No relationship '{}' for sheet '{}'", relationship_id, sheet_name))
    })?;

    Ok(match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    })
}

fn sheet_relationship_id(workbook_xml: &str, sheet_name: &str) -> Result<Option<String>, ExcelError> {
    let mut reader = Reader::from_str(workbook_xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => return Ok(None),
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut id = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.local_name().as_ref() {
                        b"name" => name = Some(attr.unescape_value()?.into_owned()),
                        b"id" => id = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if name.as_deref() == Some(sheet_name) {
                    return Ok(id);
                }
            }
            _ => {}
        }
        buf.clear();
    }
}

fn relationship_target(rels_xml: &str, relationship_id: &str) -> Result<Option<String>, ExcelError> {
    let mut reader = Reader::from_str(rels_xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => return Ok(None),
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr.unescape_value()?.into_owned()),
                        b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if id.as_deref() == Some(relationship_id) {
                    return Ok(target);
                }
            }
            _ => {}
        }
        buf.clear();
    }
}

fn parse_xml_bool(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

fn parse_kind(val: &str) -> Option<ValidationKind> {
    match val {
        "whole" => Some(ValidationKind::Whole),
        "decimal" => Some(ValidationKind::Decimal),
        "list" => Some(ValidationKind::List),
        "date" => Some(ValidationKind::Date),
        "time" => Some(ValidationKind::Time),
        "textLength" => Some(ValidationKind::TextLength),
        "custom" => Some(ValidationKind::Custom),
        // `none` (or a missing type) disables the rule
        _ => None,
    }
}

fn parse_operator(val: &str) -> Option<ValidationOperator> {
    match val {
        "between" => Some(ValidationOperator::Between),
        "notBetween" => Some(ValidationOperator::NotBetween),
        "equal" => Some(ValidationOperator::Equal),
        "notEqual" => Some(ValidationOperator::NotEqual),
        "greaterThan" => Some(ValidationOperator::GreaterThan),
        "greaterThanOrEqual" => Some(ValidationOperator::GreaterThanOrEqual),
        "lessThan" => Some(ValidationOperator::LessThan),
        "lessThanOrEqual" => Some(ValidationOperator::LessThanOrEqual),
        _ => None,
    }
}

fn rule_from_element(e: &BytesStart) -> Result<Option<ValidationRule>, ExcelError> {
    let mut kind = None;
    let mut operator = ValidationOperator::default();
    let mut allow_blank = false;
    let mut ranges = Vec::new();

    for attr in e.attributes() {
        let attr = attr?;
        let val = attr.unescape_value()?.into_owned();
        match attr.key.as_ref() {
            b"type" => kind = parse_kind(&val),
            b"operator" => operator = parse_operator(&val).unwrap_or_default(),
            b"allowBlank" => allow_blank = parse_xml_bool(&val),
            b"sqref" => ranges = parse_sqref(&val)?,
            _ => {}
        }
    }

    Ok(kind.map(|kind| ValidationRule {
        kind,
        operator,
        formula1: String::new(),
        formula2: None,
        allow_blank,
        ranges,
    }))
}

fn strip_leading_equals(formula: &str) -> String {
    let trimmed = formula.trim();
    trimmed.strip_prefix('=').unwrap_or(trimmed).to_string()
}

#[derive(Clone, Copy)]
enum FormulaTarget {
    Formula1,
    Formula2,
}

/// Extract `<dataValidation>` rules from worksheet XML. Disabled or unknown
/// rule types are skipped.
pub fn parse_data_validations(xml: &str) -> Result<Vec<ValidationRule>, ExcelError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = Vec::new();

    let mut current: Option<ValidationRule> = None;
    let mut in_formula: Option<FormulaTarget> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"dataValidation" => {
                current = rule_from_element(&e)?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"dataValidation" => {
                if let Some(rule) = rule_from_element(&e)? {
                    out.push(rule);
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"formula1" => {
                in_formula = current.as_ref().map(|_| FormulaTarget::Formula1);
            }
            Event::Start(e) if e.local_name().as_ref() == b"formula2" => {
                in_formula = current.as_ref().map(|_| FormulaTarget::Formula2);
            }
            Event::Text(e) => {
                if let (Some(target), Some(rule)) = (in_formula, current.as_mut()) {
                    let text = e.unescape()?;
                    match target {
                        FormulaTarget::Formula1 => rule.formula1.push_str(&text),
                        FormulaTarget::Formula2 => rule.formula2.get_or_insert_with(String::new).push_str(&text),
                    }
                }
            }
            Event::End(e) if matches!(e.local_name().as_ref(), b"formula1" | b"formula2") => {
                in_formula = None;
            }
            Event::End(e) if e.local_name().as_ref() == b"dataValidation" => {
                if let Some(mut rule) = current.take() {
                    rule.formula1 = strip_leading_equals(&rule.formula1);
                    rule.formula2 = rule.formula2.as_deref().map(strip_leading_equals);
                    out.push(rule);
                }
                in_formula = None;
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
