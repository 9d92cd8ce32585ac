//! On-disk dataset: one directory per identity holding canonical face crops.
//!
//! ```text
//! faces/
//!   alice/1.png 2.png ...
//!   bob/1.png ...
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::normalize::{normalize_image, FaceCrop};
use crate::types::IdentityName;

const SAMPLE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Directory-backed store of enrolled face samples.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identity_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Whether a directory exists for `name`, with or without samples.
    pub fn contains(&self, name: &IdentityName) -> bool {
        self.identity_dir(name.as_str()).is_dir()
    }

    /// Identity directory names in lexicographic order.
    ///
    /// Files and hidden entries are skipped. A missing root is an empty dataset.
    pub fn list_identities(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Read {
                path: self.root.clone(),
                source,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                tracing::warn!(path = %entry.path().display(), "skipping identity directory with non UTF-8 name");
                continue;
            };
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Sample files of one identity, numbered files first in numeric order.
    pub fn list_samples(&self, name: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.identity_dir(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Read { path: dir, source }),
        };

        let mut samples = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| StoreError::Read {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if path.is_file() && is_sample_file(&path) {
                samples.push(path);
            }
        }
        samples.sort_by(|a, b| {
            (sample_index(a).unwrap_or(u64::MAX), a.file_name())
                .cmp(&(sample_index(b).unwrap_or(u64::MAX), b.file_name()))
        });
        Ok(samples)
    }

    pub fn sample_count(&self, name: &str) -> Result<usize, StoreError> {
        Ok(self.list_samples(name)?.len())
    }

    /// Decode every sample of `name` into canonical crops.
    ///
    /// Files that fail to decode are skipped with a warning, like any stray
    /// file dropped into the directory.
    pub fn load_samples(&self, name: &str) -> Result<Vec<FaceCrop>, StoreError> {
        let mut crops = Vec::new();
        for path in self.list_samples(name)? {
            match image::open(&path) {
                Ok(img) => crops.push(normalize_image(&img)),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable sample"),
            }
        }
        Ok(crops)
    }

    /// Persist a new sample for `name`, creating the identity directory on first write.
    ///
    /// The sample is encoded into a temporary file and renamed into place under
    /// the next free counter, so a partially written sample is never visible.
    pub fn append(&self, name: &IdentityName, crop: &FaceCrop) -> Result<PathBuf, StoreError> {
        let dir = self.identity_dir(name.as_str());
        fs::create_dir_all(&dir).map_err(|source| StoreError::SampleWrite {
            path: dir.clone(),
            source,
        })?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|source| StoreError::SampleWrite {
            path: dir.clone(),
            source,
        })?;
        crop.image()
            .write_to(tmp.as_file_mut(), ImageFormat::Png)
            .map_err(|source| StoreError::SampleEncode {
                path: tmp.path().to_path_buf(),
                source,
            })?;
        tmp.as_file().sync_all().map_err(|source| StoreError::SampleWrite {
            path: tmp.path().to_path_buf(),
            source,
        })?;

        let mut index = self.next_index(name.as_str())?;
        loop {
            let path = dir.join(format!("{index}.png"));
            match tmp.persist_noclobber(&path) {
                Ok(_) => {
                    tracing::debug!(identity = %name, path = %path.display(), "sample written");
                    return Ok(path);
                }
                Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                    tmp = err.file;
                    index += 1;
                }
                Err(err) => {
                    return Err(StoreError::SampleWrite {
                        path,
                        source: err.error,
                    })
                }
            }
        }
    }

    /// Undo samples written by an aborted enrollment.
    ///
    /// Removes `samples`, then the identity directory itself when
    /// `remove_dir` is set and nothing else is left in it. Failures only log.
    pub fn discard(&self, name: &IdentityName, samples: &[PathBuf], remove_dir: bool) {
        for path in samples {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove aborted sample");
                }
            }
        }
        let dir = self.identity_dir(name.as_str());
        let empty = fs::read_dir(&dir).is_ok_and(|mut entries| entries.next().is_none());
        if remove_dir && empty {
            match fs::remove_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %dir.display(), error = %e, "failed to remove identity directory"),
            }
        }
        tracing::info!(identity = %name, removed = samples.len(), "aborted enrollment rolled back");
    }

    fn next_index(&self, name: &str) -> Result<u64, StoreError> {
        let highest = self
            .list_samples(name)?
            .iter()
            .filter_map(|p| sample_index(p))
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }
}

fn is_sample_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    let known_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SAMPLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    !hidden && known_ext
}

fn sample_index(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::CANONICAL_SIZE;
    use image::{DynamicImage, GrayImage, Luma};
    use tempfile::TempDir;

    fn crop(value: u8) -> FaceCrop {
        let img = GrayImage::from_pixel(CANONICAL_SIZE, CANONICAL_SIZE, Luma([value]));
        normalize_image(&DynamicImage::ImageLuma8(img))
    }

    fn name(raw: &str) -> IdentityName {
        IdentityName::parse(raw).unwrap()
    }

    #[test]
    fn test_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path().join("nope"));
        assert!(store.list_identities().unwrap().is_empty());
        assert!(store.list_samples("alice").unwrap().is_empty());
    }

    #[test]
    fn test_identities_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        for dir in ["carol", "alice", ".staging", "bob"] {
            fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let store = DatasetStore::new(tmp.path());
        assert_eq!(store.list_identities().unwrap(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_append_numbers_samples_sequentially() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let alice = name("alice");
        assert!(!store.contains(&alice));

        let first = store.append(&alice, &crop(10)).unwrap();
        let second = store.append(&alice, &crop(20)).unwrap();
        assert!(store.contains(&alice));
        assert_eq!(first.file_name().unwrap(), "1.png");
        assert_eq!(second.file_name().unwrap(), "2.png");
        assert_eq!(store.sample_count("alice").unwrap(), 2);
    }

    #[test]
    fn test_append_continues_after_existing_files() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let dir = tmp.path().join("bob");
        fs::create_dir_all(&dir).unwrap();
        crop(0).image().save(dir.join("7.jpg")).unwrap();

        let path = store.append(&name("bob"), &crop(1)).unwrap();
        assert_eq!(path.file_name().unwrap(), "8.png");
    }

    #[test]
    fn test_discard_keeps_earlier_samples() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let bob = name("bob");
        store.append(&bob, &crop(1)).unwrap();
        let aborted = vec![store.append(&bob, &crop(2)).unwrap(), store.append(&bob, &crop(3)).unwrap()];

        // The directory still holds 1.png, so it survives even when asked to go.
        store.discard(&bob, &aborted, true);
        assert!(store.contains(&bob));
        assert_eq!(store.sample_count("bob").unwrap(), 1);

        let carol = name("carol");
        let written = vec![store.append(&carol, &crop(4)).unwrap()];
        store.discard(&carol, &written, true);
        assert!(!store.contains(&carol));
    }

    #[test]
    fn test_samples_round_trip_losslessly() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let original = crop(123);
        store.append(&name("alice"), &original).unwrap();

        let loaded = store.load_samples("alice").unwrap();
        assert_eq!(loaded, vec![original]);
    }

    #[test]
    fn test_list_samples_numeric_order_and_unreadable_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let alice = name("alice");
        for v in 0..11 {
            store.append(&alice, &crop(v)).unwrap();
        }
        fs::write(tmp.path().join("alice").join("broken.png"), b"not an image").unwrap();
        fs::write(tmp.path().join("alice").join("readme.md"), b"ignored").unwrap();

        let samples = store.list_samples("alice").unwrap();
        assert_eq!(samples.len(), 12);
        assert_eq!(samples[1].file_name().unwrap(), "2.png");
        assert_eq!(samples[10].file_name().unwrap(), "11.png");
        assert_eq!(samples[11].file_name().unwrap(), "broken.png");

        assert_eq!(store.load_samples("alice").unwrap().len(), 11);
    }
}
