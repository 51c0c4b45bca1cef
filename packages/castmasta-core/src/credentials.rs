//! Persistent storage for device pairing credentials.
//!
//! Credentials are opaque blobs produced by a capability provider during
//! pairing, keyed by `"{identifier}:{sub_protocol}"` in a single JSON file.
//!
//! # Security
//!
//! The storage directory is owner-only (`0700`) and the file is
//! owner-read-write (`0600`). Writes go to a temp file in the same directory
//! and are renamed over the target, so a crash mid-write leaves the previous
//! credentials intact.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::device::SubProtocol;
use crate::error::{CastError, CastResult};

/// Directory under the home directory holding CastMasta state.
pub const STATE_DIR_NAME: &str = ".castmasta";

const CREDENTIALS_FILE: &str = "credentials.json";

/// Returns the default credential file location (`~/.castmasta/credentials.json`).
pub fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIR_NAME)
        .join(CREDENTIALS_FILE)
}

fn credential_key(identifier: &str, sub_protocol: SubProtocol) -> String {
    format!("{}:{}", identifier, sub_protocol)
}

/// Store of pairing credentials backed by one JSON file.
///
/// All mutations hold the store lock through the disk write, so there is a
/// single writer per store instance.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    credentials: Mutex<BTreeMap<String, String>>,
}

impl CredentialStore {
    /// Opens the store at `path`, creating its directory with owner-only permissions.
    ///
    /// A missing or unreadable file yields an empty store: pairing can always
    /// be redone, so a corrupt file must not block startup.
    ///
    /// # Errors
    ///
    /// Returns [`CastError::Persistence`] if the directory cannot be created
    /// or locked down.
    pub fn open(path: impl Into<PathBuf>) -> CastResult<Self> {
        let path = path.into();
        let dir = storage_dir(&path);
        fs::create_dir_all(&dir).map_err(|e| {
            CastError::Persistence(format!("cannot create {}: {}", dir.display(), e))
        })?;
        restrict_permissions(&dir, 0o700)?;

        let credentials = Self::load(&path);
        log::debug!(
            "[Credentials] Loaded {} credential(s) from {}",
            credentials.len(),
            path.display()
        );

        Ok(Self {
            path,
            credentials: Mutex::new(credentials),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> BTreeMap<String, String> {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!(
                    "[Credentials] Ignoring unreadable credential file {}: {}",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Returns the stored credential for a device channel, if any.
    pub fn get(&self, identifier: &str, sub_protocol: SubProtocol) -> Option<String> {
        self.credentials
            .lock()
            .get(&credential_key(identifier, sub_protocol))
            .cloned()
    }

    /// Stores a credential and persists the store.
    ///
    /// # Errors
    ///
    /// Returns [`CastError::Persistence`] if the file cannot be written. The
    /// in-memory value is kept so the current process can still use it.
    pub fn set(
        &self,
        identifier: &str,
        sub_protocol: SubProtocol,
        credential: impl Into<String>,
    ) -> CastResult<()> {
        let mut credentials = self.credentials.lock();
        credentials.insert(credential_key(identifier, sub_protocol), credential.into());
        self.save(&credentials)
    }

    /// Removes one channel's credential, or every credential for the
    /// device when `sub_protocol` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CastError::Persistence`] if the file cannot be written.
    pub fn delete(&self, identifier: &str, sub_protocol: Option<SubProtocol>) -> CastResult<()> {
        let mut credentials = self.credentials.lock();
        match sub_protocol {
            Some(proto) => {
                credentials.remove(&credential_key(identifier, proto));
            }
            None => {
                let prefix = format!("{}:", identifier);
                credentials.retain(|key, _| !key.starts_with(&prefix));
            }
        }
        self.save(&credentials)
    }

    /// Writes the map via temp file + rename.
    ///
    /// The temp file is removed on drop if anything fails before the rename.
    fn save(&self, credentials: &BTreeMap<String, String>) -> CastResult<()> {
        let dir = storage_dir(&self.path);
        let persist_err =
            |e: std::io::Error| CastError::Persistence(format!("{}: {}", self.path.display(), e));

        let contents = serde_json::to_string_pretty(credentials)
            .map_err(|e| CastError::Persistence(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(persist_err)?;
        restrict_permissions(tmp.path(), 0o600)?;
        tmp.write_all(contents.as_bytes()).map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(&self.path)
            .map_err(|e| persist_err(e.error))?;

        log::debug!(
            "[Credentials] Saved {} credential(s) to {}",
            credentials.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn storage_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> CastResult<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        CastError::Persistence(format!(
            "cannot set permissions on {}: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> CastResult<()> {
    Ok(())
}
