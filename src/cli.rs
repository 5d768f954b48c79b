// CLI surface over the command layer

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::commands::{self, AppState, CommandError};
use crate::consolidate::{ConsolidationOutcome, ConsolidationRequest, Upload};
use crate::store::StoreKind;

pub const EXIT_OK: i32 = 0;
pub const EXIT_SERVER_ERROR: i32 = 1;
pub const EXIT_CLIENT_ERROR: i32 = 2;

#[derive(Parser)]
#[command(name = "xlsx-consolidator")]
#[command(about = "Consolidate XLSX uploads into one report per template", long_about = None)]
pub struct Cli {
    /// JSON config file (overrides XLSX_CONSOLIDATOR_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Manage consolidated reports
    Consolidated {
        #[command(subcommand)]
        action: StoredAction,
    },

    /// Merge content workbooks into the template's consolidated report
    Consolidate {
        /// Template name, e.g. `Budget.xlsx`
        #[arg(long)]
        template: String,

        /// Require an existing consolidated report
        #[arg(long, action = clap::ArgAction::Set, required = true)]
        merged: bool,

        /// Content workbooks, merged in the order given
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show sheets, size and checksum of a stored document
    Inspect {
        store: InspectTarget,
        name: String,
    },
}

#[derive(Subcommand)]
pub enum TemplateAction {
    /// Add templates to the store
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    #[command(flatten)]
    Stored(StoredAction),
}

#[derive(Subcommand)]
pub enum StoredAction {
    /// List stored files
    List,
    /// Delete a stored file
    Delete { name: String },
    /// Copy a stored file out of the store
    Download {
        name: String,
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum InspectTarget {
    Template,
    Consolidated,
}

impl From<InspectTarget> for StoreKind {
    fn from(target: InspectTarget) -> Self {
        match target {
            InspectTarget::Template => StoreKind::Template,
            InspectTarget::Consolidated => StoreKind::Consolidation,
        }
    }
}

fn read_uploads(files: &[PathBuf]) -> Result<Vec<Upload>, CommandError> {
    files
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path).map_err(|e| CommandError {
                message: format!("Unable to read '{}': {}", path.display(), e),
                client: true,
            })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            Ok(Upload::new(&name, bytes))
        })
        .collect()
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<(), CommandError> {
    std::fs::write(path, bytes).map_err(|e| CommandError {
        message: format!("Unable to write '{}': {}", path.display(), e),
        client: false,
    })
}

async fn run_stored(state: Arc<AppState>, kind: StoreKind, action: StoredAction) -> Result<String, CommandError> {
    match action {
        StoredAction::List => {
            let names = commands::list_files(state, kind).await?;
            Ok(names.into_iter().collect::<Vec<_>>().join("\n"))
        }
        StoredAction::Delete { name } => commands::delete_file(state, kind, name).await,
        StoredAction::Download { name, output } => {
            let bytes = commands::download_file(state, kind, name.clone()).await?;
            write_output(&output, &bytes)?;
            Ok(format!("Downloaded {} to {}", name, output.display()))
        }
    }
}

async fn run_command(state: Arc<AppState>, command: Commands) -> Result<String, CommandError> {
    match command {
        Commands::Template { action } => match action {
            TemplateAction::Upload { files } => {
                let stored = commands::upload_templates(state, read_uploads(&files)?).await?;
                Ok(format!("Successfully uploaded templates: {}", stored.join(", ")))
            }
            TemplateAction::Stored(action) => run_stored(state, StoreKind::Template, action).await,
        },
        Commands::Consolidated { action } => run_stored(state, StoreKind::Consolidation, action).await,
        Commands::Consolidate { template, merged, files } => {
            let request = ConsolidationRequest {
                template_name: Some(template),
                is_merged: Some(merged),
                uploads: read_uploads(&files)?,
            };
            match commands::consolidate(state, request).await? {
                ConsolidationOutcome::Success(message) => Ok(message),
                ConsolidationOutcome::ClientError(message) => Err(CommandError { message, client: true }),
                ConsolidationOutcome::ServerError(message) => Err(CommandError { message, client: false }),
            }
        }
        Commands::Inspect { store, name } => {
            let info = commands::inspect(state, store.into(), name).await?;
            serde_json::to_string_pretty(&info).map_err(|e| CommandError {
                message: format!("Failed to render document info: {}", e),
                client: false,
            })
        }
    }
}

/// Run a parsed command line and return the process exit code
pub async fn run(state: Arc<AppState>, command: Commands) -> i32 {
    match run_command(state, command).await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            EXIT_OK
        }
        Err(e) => {
            eprintln!("{}", e);
            if e.client {
                EXIT_CLIENT_ERROR
            } else {
                EXIT_SERVER_ERROR
            }
        }
    }
}
