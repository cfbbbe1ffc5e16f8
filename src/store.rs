use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;

use crate::domain::{AnalysisParams, RawRow};
use crate::error::NarrascopeError;
use crate::session::{self, SessionFile};

/// On-disk store for exported analysis sessions. One CSV file per session,
/// written atomically, named by `session::session_filename`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: Utf8PathBuf,
}

impl SessionStore {
    pub fn new() -> Result<Self, NarrascopeError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".narrascope").join("sessions"),
                )
                .ok()
            })
            .ok_or_else(|| {
                NarrascopeError::Filesystem("unable to resolve session directory".to_string())
            })?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), NarrascopeError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| NarrascopeError::Filesystem(err.to_string()))
    }

    /// Encode and write a session file, returning its path. The write goes
    /// through a temp file in the same directory so a crash never leaves a
    /// half-written session behind.
    pub fn save(
        &self,
        rows: &[RawRow],
        params: &AnalysisParams,
    ) -> Result<Utf8PathBuf, NarrascopeError> {
        self.ensure_root()?;
        let content = session::encode(rows, params);
        let filename = session::session_filename(&params.selected_datasets, chrono::Utc::now());
        let destination = self.root.join(&filename);
        Self::write_atomic(&destination, content.as_bytes())?;
        Ok(destination)
    }

    /// Saved session filenames, newest first.
    pub fn list(&self) -> Result<Vec<String>, NarrascopeError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(self.root.as_std_path()).map_err(|err| {
                NarrascopeError::Filesystem(err.to_string())
            })?;
        let mut sessions: Vec<(SystemTime, String)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| NarrascopeError::Filesystem(err.to_string()))?;
            let path = entry.path();
            let is_csv = path.extension().map(|ext| ext == "csv").unwrap_or(false);
            if !path.is_file() || !is_csv {
                continue;
            }
            let name = match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            sessions.push((modified, name));
        }
        sessions.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(sessions.into_iter().map(|(_, name)| name).collect())
    }

    /// Decode one saved session. A parse failure is reported for this file
    /// only and corrupts nothing already loaded.
    pub fn load(&self, filename: &str) -> Result<SessionFile, NarrascopeError> {
        let path = self.root.join(filename);
        if !path.as_std_path().exists() {
            return Err(NarrascopeError::SessionNotFound(filename.to_string()));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| NarrascopeError::Filesystem(err.to_string()))?;
        session::decode(&content)
    }

    fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), NarrascopeError> {
        let parent = path
            .parent()
            .ok_or_else(|| NarrascopeError::Filesystem("invalid session path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| NarrascopeError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("narrascope-session")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| NarrascopeError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content)
            .map_err(|err| NarrascopeError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| NarrascopeError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
