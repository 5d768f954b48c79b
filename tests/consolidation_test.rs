// End-to-end consolidation over real XLSX files in temporary stores

use std::io::{Cursor, Read, Write};

use tempfile::TempDir;
use xlsx_consolidator::consolidate::CONSOLIDATED_SHEET_NAME;
use xlsx_consolidator::excel::{
    read_validation_rules, read_workbook, write_workbook, Cell, CellRef, CellValue, RuleSource,
    Sheet, ValidationKind, Workbook,
};
use xlsx_consolidator::{
    logging, Config, ConsolidationOutcome, ConsolidationRequest, Consolidator, DocumentStore,
    FsDocumentStore, PartialMergePolicy, StoreKind, Upload,
};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const TEMPLATE: &str = "Template.xlsx";
const CONSOLIDATED: &str = "Consolidated-Template.xlsx";

// ==========================================
// Fixtures
// ==========================================

fn setup() -> (TempDir, FsDocumentStore) {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let store = FsDocumentStore::new(&Config::with_root(dir.path())).unwrap();
    (dir, store)
}

fn text(s: &str) -> CellValue {
    CellValue::String(s.to_string())
}

fn num(n: f64) -> CellValue {
    CellValue::Numeric(n)
}

fn sheet(name: &str, rows: &[Vec<CellValue>]) -> Sheet {
    let mut sheet = Sheet::new(name);
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if !value.is_blank() {
                sheet.set_cell(CellRef::new(r as u32, c as u32), Cell::new(value.clone()));
            }
        }
    }
    sheet
}

fn header() -> Vec<CellValue> {
    vec![text("Name"), text("Amount")]
}

fn xlsx_bytes(sheets: Vec<Sheet>) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fixture.xlsx");
    write_workbook(&Workbook { sheets }, &path).unwrap();
    std::fs::read(&path).unwrap()
}

/// Inject a `<dataValidations>` block into the first worksheet part
fn with_validations(bytes: &[u8], validations_xml: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        let name = entry.name().to_string();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();

        if name == "xl/worksheets/sheet1.xml" {
            let xml = String::from_utf8(content).unwrap();
            let anchor = if xml.contains("<pageMargins") { "<pageMargins" } else { "</worksheet>" };
            content = xml
                .replacen(anchor, &format!("{}{}", validations_xml, anchor), 1)
                .into_bytes();
        }

        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(&content).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

fn install_template(store: &FsDocumentStore, bytes: &[u8]) {
    store.create(StoreKind::Template, TEMPLATE, bytes).unwrap();
}

fn plain_template() -> Vec<u8> {
    xlsx_bytes(vec![sheet("Template", &[header()])])
}

fn content(rows: &[(&str, f64)]) -> Vec<u8> {
    let mut all = vec![header()];
    all.extend(rows.iter().map(|(name, amount)| vec![text(name), num(*amount)]));
    xlsx_bytes(vec![sheet("Data", &all)])
}

fn request(is_merged: bool, uploads: Vec<(&str, Vec<u8>)>) -> ConsolidationRequest {
    ConsolidationRequest {
        template_name: Some(TEMPLATE.to_string()),
        is_merged: Some(is_merged),
        uploads: uploads
            .into_iter()
            .map(|(name, bytes)| Upload::new(name, bytes))
            .collect(),
    }
}

/// Rows of the consolidated report as display text
fn consolidated_rows(store: &FsDocumentStore) -> Vec<Vec<String>> {
    let path = store.open(StoreKind::Consolidation, CONSOLIDATED).expect("consolidated report");
    let book = read_workbook(&path).unwrap();
    assert_eq!(book.sheets.len(), 1);

    let sheet = &book.sheets[0];
    assert_eq!(sheet.name, CONSOLIDATED_SHEET_NAME);
    sheet
        .rows()
        .map(|(_, row)| row.cells().map(|(_, cell)| cell.value.to_text()).collect())
        .collect()
}

fn temp_is_empty(store: &FsDocumentStore) -> bool {
    store.list(StoreKind::Temp).unwrap().is_empty()
}

fn run(store: &FsDocumentStore, policy: PartialMergePolicy, req: ConsolidationRequest) -> ConsolidationOutcome {
    Consolidator::new(store, policy).run(&req)
}

// ==========================================
// Scenarios
// ==========================================

#[test]
fn test_fresh_merge_creates_consolidated_report() {
    let (_dir, store) = setup();
    install_template(&store, &plain_template());

    let outcome = run(
        &store,
        PartialMergePolicy::Retain,
        request(false, vec![("january.xlsx", content(&[("alpha", 10.0), ("beta", 2.5)]))]),
    );

    assert_eq!(
        outcome,
        ConsolidationOutcome::Success(
            "Successfully created consolidated report: Consolidated-Template.xlsx".to_string()
        )
    );
    assert_eq!(
        consolidated_rows(&store),
        vec![
            vec!["Name".to_string(), "Amount".to_string()],
            vec!["alpha".to_string(), "10".to_string()],
            vec!["beta".to_string(), "2.5".to_string()],
        ]
    );
    assert!(temp_is_empty(&store));
}

#[test]
fn test_documents_merge_in_upload_order() {
    let (_dir, store) = setup();
    install_template(&store, &plain_template());

    let outcome = run(
        &store,
        PartialMergePolicy::Retain,
        request(
            false,
            vec![
                ("b.xlsx", content(&[("second", 2.0)])),
                ("a.xlsx", content(&[("first", 1.0)])),
            ],
        ),
    );
    assert!(outcome.is_success(), "{:?}", outcome);

    let names: Vec<String> = consolidated_rows(&store).into_iter().map(|row| row[0].clone()).collect();
    assert_eq!(names, vec!["Name", "second", "first"]);
}

#[test]
fn test_rows_after_missing_row_are_ignored() {
    let (_dir, store) = setup();
    install_template(&store, &plain_template());

    // Blank cells are never written, so the third row is absent from the file
    let rows = vec![
        header(),
        vec![text("kept"), num(1.0)],
        vec![CellValue::Blank, CellValue::Blank],
        vec![text("dropped"), num(2.0)],
    ];
    let upload = xlsx_bytes(vec![sheet("Data", &rows)]);

    let outcome = run(&store, PartialMergePolicy::Retain, request(false, vec![("in.xlsx", upload)]));
    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(consolidated_rows(&store).len(), 2);
}

#[test]
fn test_merge_requires_existing_report() {
    let (_dir, store) = setup();
    install_template(&store, &plain_template());

    let outcome = run(
        &store,
        PartialMergePolicy::Retain,
        request(true, vec![("in.xlsx", content(&[("alpha", 1.0)]))]),
    );

    assert_eq!(
        outcome,
        ConsolidationOutcome::ClientError(
            "Unable to merge as consolidated file does not exist for template: Template.xlsx".to_string()
        )
    );
    assert!(store.list(StoreKind::Consolidation).unwrap().is_empty());
    assert!(temp_is_empty(&store));
}

#[test]
fn test_header_mismatch_rejects_whole_document() {
    let (_dir, store) = setup();
    install_template(&store, &plain_template());

    let good = sheet("Good", &[header(), vec![text("alpha"), num(1.0)]]);
    let bad = sheet(
        "Bad",
        &[vec![text("Name"), text("Amt")], vec![text("beta"), num(2.0)]],
    );
    let upload = xlsx_bytes(vec![good, bad]);

    let outcome = run(&store, PartialMergePolicy::Retain, request(false, vec![("mixed.xlsx", upload)]));

    assert_eq!(
        outcome,
        ConsolidationOutcome::ClientError(
            "Content File: 'mixed.xlsx' contains invalid headers in sheet: 'Bad'".to_string()
        )
    );
    // The report was created by this request, so it goes away again
    assert!(store.open(StoreKind::Consolidation, CONSOLIDATED).is_none());
    assert!(temp_is_empty(&store));
}

#[test]
fn test_header_mismatch_leaves_existing_report_untouched() {
    let (_dir, store) = setup();
    install_template(&store, &plain_template());

    let first = run(
        &store,
        PartialMergePolicy::Retain,
        request(false, vec![("in.xlsx", content(&[("alpha", 1.0)]))]),
    );
    assert!(first.is_success(), "{:?}", first);

    let bad = xlsx_bytes(vec![sheet("Data", &[vec![text("Name")], vec![text("beta")]])]);
    let outcome = run(&store, PartialMergePolicy::Retain, request(true, vec![("bad.xlsx", bad)]));

    assert!(matches!(outcome, ConsolidationOutcome::ClientError(_)));
    assert_eq!(consolidated_rows(&store).len(), 2);
    assert!(temp_is_empty(&store));
}

#[test]
fn test_resubmitting_appends_rows_again() {
    let (_dir, store) = setup();
    install_template(&store, &plain_template());
    let upload = content(&[("alpha", 1.0), ("beta", 2.0)]);

    let first = run(&store, PartialMergePolicy::Retain, request(false, vec![("in.xlsx", upload.clone())]));
    assert!(first.is_success(), "{:?}", first);

    // An existing report is reused whatever the flag says
    let second = run(&store, PartialMergePolicy::Retain, request(false, vec![("in.xlsx", upload)]));
    assert!(second.is_success(), "{:?}", second);

    let names: Vec<String> = consolidated_rows(&store).into_iter().map(|row| row[0].clone()).collect();
    assert_eq!(names, vec!["Name", "alpha", "beta", "alpha", "beta"]);
}

#[test]
fn test_missing_template_cleans_up_temp_files() {
    let (_dir, store) = setup();

    let outcome = run(
        &store,
        PartialMergePolicy::Retain,
        request(false, vec![("in.xlsx", content(&[("alpha", 1.0)]))]),
    );

    assert_eq!(
        outcome,
        ConsolidationOutcome::ClientError("Template file: 'Template.xlsx' does not exist!".to_string())
    );
    assert!(temp_is_empty(&store));
    assert!(store.list(StoreKind::Consolidation).unwrap().is_empty());
}

#[test]
fn test_invalid_upload_extension_writes_nothing() {
    let (_dir, store) = setup();
    install_template(&store, &plain_template());

    let outcome = run(
        &store,
        PartialMergePolicy::Retain,
        request(false, vec![("in.xlsx", content(&[])), ("notes.csv", b"a,b".to_vec())]),
    );

    assert_eq!(
        outcome,
        ConsolidationOutcome::ClientError("File: 'notes.csv' needs to be of type '.xlsx'!".to_string())
    );
    assert!(temp_is_empty(&store));
    assert!(store.list(StoreKind::Consolidation).unwrap().is_empty());
}

#[test]
fn test_corrupt_upload_is_server_error() {
    let (_dir, store) = setup();
    install_template(&store, &plain_template());

    let outcome = run(
        &store,
        PartialMergePolicy::Retain,
        request(false, vec![("broken.xlsx", b"definitely not a zip".to_vec())]),
    );

    match outcome {
        ConsolidationOutcome::ServerError(message) => {
            assert!(message.starts_with("An exception occurred: "), "{}", message)
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(temp_is_empty(&store));
    assert!(store.open(StoreKind::Consolidation, CONSOLIDATED).is_none());
}

fn partial_failure(policy: PartialMergePolicy) -> (TempDir, FsDocumentStore) {
    let (dir, store) = setup();
    install_template(&store, &plain_template());

    let first = run(&store, policy, request(false, vec![("seed.xlsx", content(&[("seed", 1.0)]))]));
    assert!(first.is_success(), "{:?}", first);

    // The first document is merged and saved before the second one fails
    let bad = xlsx_bytes(vec![sheet("Data", &[vec![text("Wrong"), text("Header")]])]);
    let outcome = run(
        &store,
        policy,
        request(
            true,
            vec![("good.xlsx", content(&[("good", 2.0), ("also", 3.0)])), ("bad.xlsx", bad)],
        ),
    );
    assert!(matches!(outcome, ConsolidationOutcome::ClientError(_)));
    assert!(temp_is_empty(&store));

    (dir, store)
}

#[test]
fn test_retain_policy_keeps_rows_merged_before_failure() {
    let (_dir, store) = partial_failure(PartialMergePolicy::Retain);

    let names: Vec<String> = consolidated_rows(&store).into_iter().map(|row| row[0].clone()).collect();
    assert_eq!(names, vec!["Name", "seed", "good", "also"]);
}

#[test]
fn test_rollback_policy_restores_report() {
    let (_dir, store) = partial_failure(PartialMergePolicy::Rollback);

    let names: Vec<String> = consolidated_rows(&store).into_iter().map(|row| row[0].clone()).collect();
    assert_eq!(names, vec!["Name", "seed"]);
}

const AMOUNT_RULE: &str = r#"<dataValidations count="1"><dataValidation type="whole" operator="between" allowBlank="1" showErrorMessage="1" sqref="B2:B1000"><formula1>0</formula1><formula2>100</formula2></dataValidation></dataValidations>"#;

#[test]
fn test_validation_failure_removes_new_report() {
    let (_dir, store) = setup();
    install_template(&store, &with_validations(&plain_template(), AMOUNT_RULE));

    let outcome = run(
        &store,
        PartialMergePolicy::Retain,
        request(
            false,
            vec![
                ("ok.xlsx", content(&[("alpha", 5.0)])),
                ("over.xlsx", content(&[("beta", 500.0)])),
            ],
        ),
    );

    match outcome {
        ConsolidationOutcome::ClientError(message) => {
            assert!(message.starts_with("File 'over.xlsx' did not pass validations!"), "{}", message);
            assert!(message.contains("B3"), "{}", message);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(store.open(StoreKind::Consolidation, CONSOLIDATED).is_none());
    assert!(temp_is_empty(&store));
}

#[test]
fn test_valid_rows_pass_validation() {
    let (_dir, store) = setup();
    install_template(&store, &with_validations(&plain_template(), AMOUNT_RULE));

    let outcome = run(
        &store,
        PartialMergePolicy::Retain,
        request(false, vec![("ok.xlsx", content(&[("alpha", 5.0), ("beta", 100.0)]))]),
    );

    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(consolidated_rows(&store).len(), 3);
}

#[test]
fn test_rules_survive_into_later_requests() {
    let (_dir, store) = setup();
    install_template(&store, &with_validations(&plain_template(), AMOUNT_RULE));

    let first = run(
        &store,
        PartialMergePolicy::Retain,
        request(false, vec![("ok.xlsx", content(&[("alpha", 5.0)]))]),
    );
    assert!(first.is_success(), "{:?}", first);

    // The saved report still carries the template's rule
    let path = store.open(StoreKind::Consolidation, CONSOLIDATED).unwrap();
    let rules = read_validation_rules(&path, CONSOLIDATED_SHEET_NAME).unwrap();
    let rule = rules.rule_for(CellRef::new(1, 1)).expect("amount rule");
    assert_eq!(rule.kind, ValidationKind::Whole);

    let second = run(
        &store,
        PartialMergePolicy::Retain,
        request(true, vec![("late.xlsx", content(&[("beta", 500.0)]))]),
    );

    match second {
        ConsolidationOutcome::ClientError(message) => {
            assert!(message.starts_with("File 'late.xlsx' did not pass validations!"), "{}", message);
            assert!(message.contains("B3"), "{}", message);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(temp_is_empty(&store));
}

#[test]
fn test_cell_kinds_survive_the_merge() {
    let (_dir, store) = setup();
    let template = xlsx_bytes(vec![sheet("Template", &[vec![text("When"), text("Done"), text("Twice")]])]);
    install_template(&store, &template);

    let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let mut data = sheet(
        "Data",
        &[
            vec![text("When"), text("Done"), text("Twice")],
            vec![CellValue::Date(date), CellValue::Boolean(true)],
        ],
    );
    data.set_cell(CellRef::new(1, 2), Cell::with_formula("1+1", CellValue::Blank));
    let upload = xlsx_bytes(vec![data]);

    let outcome = run(&store, PartialMergePolicy::Retain, request(false, vec![("kinds.xlsx", upload)]));
    assert!(outcome.is_success(), "{:?}", outcome);

    let path = store.open(StoreKind::Consolidation, CONSOLIDATED).unwrap();
    let book = read_workbook(&path).unwrap();
    let merged = &book.sheets[0];
    assert_eq!(merged.cell(CellRef::new(1, 0)).unwrap().value, CellValue::Date(date));
    assert_eq!(merged.cell(CellRef::new(1, 1)).unwrap().value, CellValue::Boolean(true));
    assert_eq!(merged.cell(CellRef::new(1, 2)).unwrap().formula.as_deref(), Some("1+1"));
}
