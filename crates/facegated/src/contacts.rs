//! Contact book: identity name → optional contact address.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContactError {
    #[error("failed to read contact book {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write contact book {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("contact book {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait ContactBook {
    fn contact(&self, name: &str) -> Option<String>;

    /// Record `contact` for `name`. `None` or blank keeps whatever is stored.
    fn upsert(&mut self, name: &str, contact: Option<&str>) -> Result<(), ContactError>;
}

/// Contact book persisted as a flat JSON object (`{"alice": "alice@example.org"}`).
#[derive(Debug)]
pub struct JsonContactBook {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonContactBook {
    /// Load `path`, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ContactError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ContactError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(ContactError::Read { path, source }),
        };
        tracing::debug!(path = %path.display(), contacts = entries.len(), "contact book loaded");
        Ok(Self { path, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<(), ContactError> {
        let write_err = |source| ContactError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        let json = serde_json::to_vec_pretty(&self.entries).map_err(|e| write_err(e.into()))?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

impl ContactBook for JsonContactBook {
    fn contact(&self, name: &str) -> Option<String> {
        self.entries.get(name).cloned()
    }

    fn upsert(&mut self, name: &str, contact: Option<&str>) -> Result<(), ContactError> {
        let Some(contact) = contact.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(());
        };
        if self.entries.get(name).map(String::as_str) == Some(contact) {
            return Ok(());
        }
        self.entries.insert(name.to_string(), contact.to_string());
        self.persist()?;
        tracing::info!(identity = name, "contact updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let book = JsonContactBook::open(tmp.path().join("users.json")).unwrap();
        assert!(book.is_empty());
        assert_eq!(book.contact("alice"), None);
    }

    #[test]
    fn test_upsert_persists_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data/users.json");
        let mut book = JsonContactBook::open(&path).unwrap();
        book.upsert("alice", Some(" alice@example.org ")).unwrap();
        book.upsert("alice", Some("alice@new.example.org")).unwrap();

        let reloaded = JsonContactBook::open(&path).unwrap();
        assert_eq!(reloaded.contact("alice").as_deref(), Some("alice@new.example.org"));
        assert_eq!(reloaded.len(), 1);

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["alice"], "alice@new.example.org");
    }

    #[test]
    fn test_blank_contact_keeps_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("users.json");
        let mut book = JsonContactBook::open(&path).unwrap();
        book.upsert("bob", Some("bob@example.org")).unwrap();
        book.upsert("bob", None).unwrap();
        book.upsert("bob", Some("   ")).unwrap();
        assert_eq!(book.contact("bob").as_deref(), Some("bob@example.org"));

        book.upsert("carol", None).unwrap();
        assert_eq!(JsonContactBook::open(&path).unwrap().contact("carol"), None);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("users.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonContactBook::open(&path),
            Err(ContactError::Corrupt { .. })
        ));
    }
}
