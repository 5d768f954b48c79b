//! Flat file stores for templates, consolidated reports and staged uploads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Template,
    Consolidation,
    Temp,
}

/// File access for the consolidation engine.
///
/// Names are reduced to their final path component, so a name can never
/// address anything outside its store.
pub trait DocumentStore: Send + Sync {
    /// Path of an existing document, if any
    fn open(&self, kind: StoreKind, name: &str) -> Option<PathBuf>;

    fn read(&self, kind: StoreKind, name: &str) -> io::Result<Vec<u8>>;

    /// Create a new document; fails with `AlreadyExists` if the name is taken
    fn create(&self, kind: StoreKind, name: &str, bytes: &[u8]) -> io::Result<PathBuf>;

    /// Replace the contents of an existing document
    fn overwrite(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    fn delete(&self, path: &Path) -> bool;

    fn list(&self, kind: StoreKind) -> io::Result<BTreeSet<String>>;

    /// Write an upload into the temp store under a request-unique name
    fn stage(&self, request_id: &Uuid, index: usize, name: &str, bytes: &[u8]) -> io::Result<PathBuf>;
}

/// Final path component of a name, if it has one
pub fn file_name_only(name: &str) -> Option<&str> {
    Path::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
}

fn invalid_name(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid file name: '{}'", name))
}

pub struct FsDocumentStore {
    template_dir: PathBuf,
    consolidation_dir: PathBuf,
    temp_dir: PathBuf,
}

impl FsDocumentStore {
    /// Open the stores named by the config, creating missing directories
    pub fn new(config: &Config) -> io::Result<Self> {
        for dir in [&config.template_dir, &config.consolidation_dir, &config.temp_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(FsDocumentStore {
            template_dir: config.template_dir.clone(),
            consolidation_dir: config.consolidation_dir.clone(),
            temp_dir: config.temp_dir.clone(),
        })
    }

    pub fn dir(&self, kind: StoreKind) -> &Path {
        match kind {
            StoreKind::Template => &self.template_dir,
            StoreKind::Consolidation => &self.consolidation_dir,
            StoreKind::Temp => &self.temp_dir,
        }
    }

    fn path_for(&self, kind: StoreKind, name: &str) -> io::Result<PathBuf> {
        let file_name = file_name_only(name).ok_or_else(|| invalid_name(name))?;
        Ok(self.dir(kind).join(file_name))
    }

    fn create_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
        FsDocumentStore::create_with(path, |file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
    }

    /// Create `path` exclusively and fill it. A file that could not be
    /// filled is removed again before the error is returned.
    fn create_with<F>(path: &Path, fill: F) -> io::Result<()>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        if let Err(e) = fill(&mut file) {
            drop(file);
            if let Err(remove_err) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %remove_err, "Failed to remove partly written file");
            }
            return Err(e);
        }
        Ok(())
    }
}

impl DocumentStore for FsDocumentStore {
    fn open(&self, kind: StoreKind, name: &str) -> Option<PathBuf> {
        self.path_for(kind, name).ok().filter(|path| path.is_file())
    }

    fn read(&self, kind: StoreKind, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(kind, name)?)
    }

    fn create(&self, kind: StoreKind, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.path_for(kind, name)?;
        FsDocumentStore::create_new(&path, bytes)?;
        debug!(path = %path.display(), "Created document");
        Ok(path)
    }

    fn overwrite(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::write(path, bytes)
    }

    fn delete(&self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to delete document");
                false
            }
        }
    }

    fn list(&self, kind: StoreKind) -> io::Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(self.dir(kind))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.insert(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(names)
    }

    fn stage(&self, request_id: &Uuid, index: usize, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let file_name = file_name_only(name).ok_or_else(|| invalid_name(name))?;
        let path = self.temp_dir.join(format!("{}-{}-{}", request_id, index, file_name));

        match FsDocumentStore::create_new(&path, bytes) {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Residual file from an earlier run: drop it and retry once
                warn!(path = %path.display(), "Removing residual temp file");
                fs::remove_file(&path)?;
                FsDocumentStore::create_new(&path, bytes)?;
                Ok(path)
            }
            Err(e) => Err(e),
        }
    }
}
