pub mod cli;
pub mod commands;
pub mod config;
pub mod consolidate;
pub mod excel;
pub mod logging;
pub mod store;

pub use commands::{AppState, CommandError};
pub use config::{Config, PartialMergePolicy};
pub use consolidate::{ConsolidationError, ConsolidationOutcome, ConsolidationRequest, Consolidator, Upload};
pub use store::{DocumentStore, FsDocumentStore, StoreKind};
