use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{ConsolidationError, ConsolidationOutcome, ConsolidationResult};
use super::schema::{extract_template_schema, headers_match, TemplateSchema};
use super::transfer::transfer_rows;
use super::verify::verify_sheet;
use super::{consolidated_name_for, has_xlsx_extension, CONSOLIDATED_SHEET_NAME};
use crate::config::PartialMergePolicy;
use crate::excel::{read_validation_rules, read_workbook, write_rows, Sheet, SheetRules};
use crate::store::{file_name_only, DocumentStore, StoreKind};

/// One uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// The name is reduced to its final path component
    pub fn new(file_name: &str, bytes: Vec<u8>) -> Self {
        Upload {
            file_name: file_name_only(file_name).unwrap_or_default().to_string(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationRequest {
    pub template_name: Option<String>,
    pub is_merged: Option<bool>,
    pub uploads: Vec<Upload>,
}

/// Runs consolidation requests against a document store
pub struct Consolidator<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    policy: PartialMergePolicy,
}

impl<'a, S: DocumentStore + ?Sized> Consolidator<'a, S> {
    pub fn new(store: &'a S, policy: PartialMergePolicy) -> Self {
        Consolidator { store, policy }
    }

    /// Run a request and report it as a single outcome
    pub fn run(&self, request: &ConsolidationRequest) -> ConsolidationOutcome {
        let outcome = ConsolidationOutcome::from(self.consolidate(request));
        match &outcome {
            ConsolidationOutcome::Success(message) => info!("{}", message),
            ConsolidationOutcome::ClientError(message) => info!("Request rejected: {}", message),
            ConsolidationOutcome::ServerError(message) => warn!("{}", message),
        }
        outcome
    }

    /// Merge the uploads of a request into the template's consolidated
    /// document. Temp files are removed whatever the result.
    pub fn consolidate(&self, request: &ConsolidationRequest) -> ConsolidationResult<String> {
        let (template_name, is_merged) = check_request(request)?;

        let request_id = Uuid::new_v4();
        info!(
            %request_id,
            template = template_name,
            is_merged,
            uploads = request.uploads.len(),
            "Starting consolidation"
        );

        let mut tx = MergeTransaction::new(self.store, self.policy);
        match self.merge(&mut tx, request_id, template_name, is_merged, &request.uploads) {
            Ok(message) => {
                tx.commit();
                Ok(message)
            }
            Err(e) => {
                tx.abort();
                Err(e)
            }
        }
    }

    fn merge(
        &self,
        tx: &mut MergeTransaction<'_, S>,
        request_id: Uuid,
        template_name: &str,
        is_merged: bool,
        uploads: &[Upload],
    ) -> ConsolidationResult<String> {
        for (index, upload) in uploads.iter().enumerate() {
            let path = self.store.stage(&request_id, index, &upload.file_name, &upload.bytes)?;
            tx.staged.push((upload.file_name.clone(), path));
        }

        let template_path = self
            .store
            .open(StoreKind::Template, template_name)
            .ok_or_else(|| ConsolidationError::MissingTemplate(template_name.to_string()))?;

        let consolidated_name = consolidated_name_for(template_name);
        let consolidated_path = match self.store.open(StoreKind::Consolidation, &consolidated_name) {
            Some(path) => {
                if self.policy == PartialMergePolicy::Rollback {
                    let original = self.store.read(StoreKind::Consolidation, &consolidated_name)?;
                    tx.snapshot = Some((path.clone(), original));
                }
                path
            }
            None if is_merged => {
                return Err(ConsolidationError::MissingConsolidatedForMerge(
                    template_name.to_string(),
                ));
            }
            None => {
                let template_bytes = self.store.read(StoreKind::Template, template_name)?;
                let path = self
                    .store
                    .create(StoreKind::Consolidation, &consolidated_name, &template_bytes)?;
                info!(file = %consolidated_name, "Created consolidated document from template");
                tx.created = Some(path.clone());
                path
            }
        };

        let (_, schema) = extract_template_schema(&template_path)?;
        let mut consolidated = ConsolidatedDocument::open(&consolidated_path)?;

        let mut last_file = "";
        for (file_name, staged_path) in &tx.staged {
            merge_document(&schema, &mut consolidated, file_name, staged_path)?;
            last_file = file_name.as_str();
        }

        consolidated.verify(last_file)?;

        Ok(format!("Successfully created consolidated report: {}", consolidated_name))
    }
}

/// Reject a request before anything is written
fn check_request(request: &ConsolidationRequest) -> ConsolidationResult<(&str, bool)> {
    let template_name = request
        .template_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ConsolidationError::EmptyOrMissingField("Template name".to_string()))?;

    if !has_xlsx_extension(template_name) {
        return Err(ConsolidationError::InvalidExtension(template_name.to_string()));
    }

    let is_merged = request
        .is_merged
        .ok_or_else(|| ConsolidationError::EmptyOrMissingField("isMerged name".to_string()))?;

    if request.uploads.is_empty() {
        return Err(ConsolidationError::EmptyOrMissingField("file".to_string()));
    }

    if let Some(upload) = request.uploads.iter().find(|u| !has_xlsx_extension(&u.file_name)) {
        return Err(ConsolidationError::InvalidExtension(upload.file_name.clone()));
    }

    Ok((template_name, is_merged))
}

/// Check every sheet of one content document, then append all of its rows
/// and persist the consolidated document
fn merge_document(
    schema: &TemplateSchema,
    consolidated: &mut ConsolidatedDocument,
    file_name: &str,
    path: &Path,
) -> ConsolidationResult<()> {
    let workbook = read_workbook(path)?;

    if let Some(sheet) = workbook.sheets.iter().find(|sheet| !headers_match(schema, sheet)) {
        return Err(ConsolidationError::HeaderMismatch {
            file: file_name.to_string(),
            sheet: sheet.name.clone(),
        });
    }

    let appended: usize = workbook
        .sheets
        .iter()
        .map(|sheet| transfer_rows(sheet, &mut consolidated.sheet))
        .sum();
    debug!(file = file_name, sheets = workbook.sheets.len(), rows = appended, "Merged document");

    consolidated.persist()
}

/// The consolidated document held in memory, together with the rules
/// bound to its sheet
struct ConsolidatedDocument {
    path: PathBuf,
    /// Sheet name as currently saved; differs from the in-memory name until
    /// the first save renames it
    on_disk_name: String,
    sheet: Sheet,
    rules: SheetRules,
    /// First row not yet written to disk
    pending_from: u32,
}

impl ConsolidatedDocument {
    fn open(path: &Path) -> ConsolidationResult<Self> {
        let mut sheets = read_workbook(path)?.sheets;
        if sheets.is_empty() {
            return Err(ConsolidationError::InvalidSheetCount {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                count: 0,
            });
        }

        let mut sheet = sheets.remove(0);
        let on_disk_name = sheet.name.clone();
        let rules = read_validation_rules(path, &on_disk_name)?;
        let pending_from = sheet.last_row().map(|row| row + 1).unwrap_or(0);
        sheet.name = CONSOLIDATED_SHEET_NAME.to_string();

        debug!(sheet = %on_disk_name, rules = rules.len(), "Opened consolidated document");

        Ok(ConsolidatedDocument {
            path: path.to_path_buf(),
            on_disk_name,
            sheet,
            rules,
            pending_from,
        })
    }

    /// Write the rows appended since the last save
    fn persist(&mut self) -> ConsolidationResult<()> {
        write_rows(
            &self.path,
            &self.on_disk_name,
            &self.sheet,
            self.pending_from,
            Some(CONSOLIDATED_SHEET_NAME),
        )?;
        self.on_disk_name = CONSOLIDATED_SHEET_NAME.to_string();
        self.pending_from = self.sheet.last_row().map(|row| row + 1).unwrap_or(0);
        Ok(())
    }

    fn verify(&self, file_name: &str) -> ConsolidationResult<usize> {
        verify_sheet(&self.sheet, &self.rules, &self.sheet, file_name)
    }
}

/// Files touched by one request, and how to undo them
struct MergeTransaction<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    policy: PartialMergePolicy,
    /// Upload name and staged temp path, in upload order
    staged: Vec<(String, PathBuf)>,
    /// Consolidated document created by this request
    created: Option<PathBuf>,
    /// Pre-existing consolidated document and its original bytes
    snapshot: Option<(PathBuf, Vec<u8>)>,
}

impl<'a, S: DocumentStore + ?Sized> MergeTransaction<'a, S> {
    fn new(store: &'a S, policy: PartialMergePolicy) -> Self {
        MergeTransaction {
            store,
            policy,
            staged: Vec::new(),
            created: None,
            snapshot: None,
        }
    }

    fn commit(self) {
        self.remove_staged();
    }

    fn abort(self) {
        self.remove_staged();

        if let Some(path) = &self.created {
            if self.store.delete(path) {
                debug!(path = %path.display(), "Deleted new consolidated document");
            } else {
                warn!(path = %path.display(), "Failed to delete new consolidated document");
            }
        } else if let (PartialMergePolicy::Rollback, Some((path, original))) = (self.policy, &self.snapshot) {
            match self.store.overwrite(path, original) {
                Ok(()) => info!(path = %path.display(), "Restored consolidated document"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to restore consolidated document"),
            }
        }
    }

    fn remove_staged(&self) {
        for (_, path) in &self.staged {
            if !self.store.delete(path) {
                warn!(path = %path.display(), "Failed to delete temp file");
            }
        }
    }
}
