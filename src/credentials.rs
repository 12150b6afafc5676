//! Credential record and file-backed store (spec §3, §6, §9).
//!
//! Entries are keyed by `"<host>:<database_name>"` and persisted as a JSON
//! object at `$HOME/.spacetimedb/credentials.json`. Writers use
//! write-to-temp-then-rename so a reader never observes a torn file.

use crate::error::BlackholioError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Entries older than this are treated as absent (spec §3, §6).
pub const CREDENTIAL_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub identity: String,
    pub token: String,
    pub host: String,
    pub database: String,
    pub timestamp: u64,
}

impl Credential {
    pub fn new(identity: impl Into<String>, token: impl Into<String>, host: impl Into<String>, database: impl Into<String>) -> Self {
        Credential {
            identity: identity.into(),
            token: token.into(),
            host: host.into(),
            database: database.into(),
            timestamp: now_unix(),
        }
    }

    pub fn is_expired(&self) -> bool {
        now_unix().saturating_sub(self.timestamp) > CREDENTIAL_TTL_SECS
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// File-backed credential store. The core only reads/writes through this
/// narrow interface; it never interprets the rest of the user's home
/// directory.
pub struct CredentialStore {
    path: PathBuf,
    cache: HashMap<String, Credential>,
}

impl CredentialStore {
    /// Opens (and, if necessary, creates) the store at
    /// `$HOME/.spacetimedb/credentials.json`.
    pub fn open_default() -> io::Result<Self> {
        let home = home::home_dir().ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
        Self::open(home.join(".spacetimedb").join("credentials.json"))
    }

    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let cache = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(CredentialStore { path, cache })
    }

    pub fn key(host: &str, database: &str) -> String {
        format!("{host}:{database}")
    }

    /// Returns the credential for `(host, database)` if present and not
    /// expired.
    pub fn get(&self, host: &str, database: &str) -> Option<&Credential> {
        let cred = self.cache.get(&Self::key(host, database))?;
        if cred.is_expired() {
            None
        } else {
            Some(cred)
        }
    }

    /// Persists `cred`, overwriting any (possibly expired) prior entry for
    /// the same key, and flushes to disk atomically: write to a sibling
    /// temp file, then rename over the target.
    pub fn put(&mut self, cred: Credential) -> io::Result<()> {
        let key = Self::key(&cred.host, &cred.database);
        self.cache.insert(key, cred);
        self.flush()
    }

    fn flush(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
            set_private_permissions(parent)?;
        }
        let body = serde_json::to_string_pretty(&self.cache)?;
        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, &body)?;
        let file = fs::File::open(&tmp_path)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("credentials.json");
    tmp.set_file_name(format!("{file_name}.tmp"));
    tmp
}

#[cfg(unix)]
fn set_private_permissions(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(dir)?.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(dir, perms)
}

#[cfg(not(unix))]
fn set_private_permissions(_dir: &Path) -> io::Result<()> {
    Ok(())
}

impl From<serde_json::Error> for BlackholioError {
    fn from(e: serde_json::Error) -> Self {
        BlackholioError::protocol(format!("malformed credentials file: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("blackholio-creds-test-{}", std::process::id()));
        let path = dir.join("credentials.json");
        let mut store = CredentialStore::open(&path).unwrap();
        store
            .put(Credential::new("id-abc", "tok-xyz", "localhost", "blackholio"))
            .unwrap();

        let reopened = CredentialStore::open(&path).unwrap();
        let cred = reopened.get("localhost", "blackholio").unwrap();
        assert_eq!(cred.identity, "id-abc");
        assert_eq!(cred.token, "tok-xyz");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn expired_entries_are_treated_as_absent() {
        let mut cred = Credential::new("id", "tok", "h", "d");
        cred.timestamp = 0; // epoch: far in the past
        let dir = std::env::temp_dir().join(format!("blackholio-creds-test-expired-{}", std::process::id()));
        let path = dir.join("credentials.json");
        let mut store = CredentialStore::open(&path).unwrap();
        store.put(cred).unwrap();
        assert!(store.get("h", "d").is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
