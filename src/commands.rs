use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::consolidate::{
    has_xlsx_extension, ConsolidationError, ConsolidationOutcome, ConsolidationRequest, Consolidator,
    Upload,
};
use crate::excel::{self, DocumentInfo, ExcelError};
use crate::store::{DocumentStore, FsDocumentStore, StoreKind};

pub struct AppState {
    pub config: Config,
    pub store: Arc<FsDocumentStore>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, CommandError> {
        let store = FsDocumentStore::new(&config).map_err(|e| CommandError {
            message: format!("Failed to open document stores: {}", e),
            client: false,
        })?;
        Ok(AppState {
            config,
            store: Arc::new(store),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CommandError {
    pub message: String,
    /// True when the caller's input caused the failure
    pub client: bool,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConsolidationError> for CommandError {
    fn from(e: ConsolidationError) -> Self {
        let client = e.is_client_error();
        let message = if client {
            e.to_string()
        } else {
            format!("An exception occurred: {}", e)
        };
        CommandError { message, client }
    }
}

impl From<ExcelError> for CommandError {
    fn from(e: ExcelError) -> Self {
        ConsolidationError::from(e).into()
    }
}

impl From<tokio::task::JoinError> for CommandError {
    fn from(e: tokio::task::JoinError) -> Self {
        CommandError {
            message: format!("Task join error: {}", e),
            client: false,
        }
    }
}

// ==================== Consolidation ====================

/// Merge uploaded workbooks into the template's consolidated report
pub async fn consolidate(
    state: Arc<AppState>,
    request: ConsolidationRequest,
) -> Result<ConsolidationOutcome, CommandError> {
    let store = state.store.clone();
    let policy = state.config.partial_merge_policy;

    let outcome = tokio::task::spawn_blocking(move || {
        Consolidator::new(store.as_ref(), policy).run(&request)
    })
    .await?;

    Ok(outcome)
}

// ==================== Store management ====================

/// Store new templates. Every name must be `.xlsx`; existing names are
/// never overwritten.
pub async fn upload_templates(
    state: Arc<AppState>,
    uploads: Vec<Upload>,
) -> Result<Vec<String>, CommandError> {
    if uploads.is_empty() {
        return Err(ConsolidationError::EmptyOrMissingField("file".to_string()).into());
    }
    if let Some(upload) = uploads.iter().find(|u| !has_xlsx_extension(&u.file_name)) {
        return Err(ConsolidationError::InvalidExtension(upload.file_name.clone()).into());
    }

    let store = state.store.clone();
    let stored = tokio::task::spawn_blocking(move || -> Result<Vec<String>, ConsolidationError> {
        let mut stored = Vec::with_capacity(uploads.len());
        for upload in &uploads {
            store
                .create(StoreKind::Template, &upload.file_name, &upload.bytes)
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::AlreadyExists => {
                        ConsolidationError::AlreadyExists(upload.file_name.clone())
                    }
                    _ => ConsolidationError::from(e),
                })?;
            info!(template = %upload.file_name, "Stored template");
            stored.push(upload.file_name.clone());
        }
        Ok(stored)
    })
    .await??;

    Ok(stored)
}

pub async fn list_files(state: Arc<AppState>, kind: StoreKind) -> Result<BTreeSet<String>, CommandError> {
    let store = state.store.clone();
    let names = tokio::task::spawn_blocking(move || store.list(kind))
        .await?
        .map_err(ConsolidationError::from)?;
    Ok(names)
}

pub async fn delete_file(state: Arc<AppState>, kind: StoreKind, name: String) -> Result<String, CommandError> {
    let store = state.store.clone();
    let message = tokio::task::spawn_blocking(move || -> Result<String, ConsolidationError> {
        let path = store
            .open(kind, &name)
            .ok_or_else(|| ConsolidationError::NotFound(name.clone()))?;
        if !store.delete(&path) {
            return Err(ConsolidationError::DeleteFailed(name));
        }
        info!(file = %name, ?kind, "Deleted file");
        Ok(format!("Successfully deleted file: {}", name))
    })
    .await??;

    Ok(message)
}

pub async fn download_file(state: Arc<AppState>, kind: StoreKind, name: String) -> Result<Vec<u8>, CommandError> {
    let store = state.store.clone();
    let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ConsolidationError> {
        if store.open(kind, &name).is_none() {
            return Err(ConsolidationError::NotFound(name));
        }
        Ok(store.read(kind, &name)?)
    })
    .await??;

    Ok(bytes)
}

/// Sheet summaries and checksum of a stored document
pub async fn inspect(state: Arc<AppState>, kind: StoreKind, name: String) -> Result<DocumentInfo, CommandError> {
    let store = state.store.clone();
    let info = tokio::task::spawn_blocking(move || -> Result<DocumentInfo, ConsolidationError> {
        let path = store
            .open(kind, &name)
            .ok_or_else(|| ConsolidationError::NotFound(name.clone()))?;
        Ok(excel::describe_document(&path)?)
    })
    .await??;

    Ok(info)
}
