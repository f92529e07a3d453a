use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::NamedTempFile;
use tensorhub_error::{HubError, HubResult, ResultExt};

use crate::store::{ByteStore, validate_key};

const TEMP_PREFIX: &str = ".tensorhub-tmp";

/// A [`ByteStore`] rooted at a local directory. Each key is a file below the root.
///
/// Writes go through a temporary file in the destination directory and are renamed into place,
/// so a reader never observes a partially written value.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> HubResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(HubError::from)
            .context(|| format!("creating {}", root.display()))?;
        Ok(Self { root })
    }

    /// The directory this store lives in
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> HubResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn prefix_path(&self, prefix: &str) -> HubResult<PathBuf> {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            Ok(self.root.clone())
        } else {
            self.path_of(prefix)
        }
    }

    fn parent_dir(&self, path: &Path) -> HubResult<PathBuf> {
        let parent = path.parent().unwrap_or(self.root.as_path()).to_path_buf();
        fs::create_dir_all(&parent)
            .map_err(HubError::from)
            .context(|| format!("creating {}", parent.display()))?;
        Ok(parent)
    }

    fn collect(&self, dir: &Path, keys: &mut Vec<String>) -> HubResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect(&path, keys)?;
            } else if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        Ok(())
    }
}

impl ByteStore for LocalStore {
    fn get(&self, key: &str) -> HubResult<Option<Bytes>> {
        let path = self.path_of(key)?;
        if path.is_dir() {
            return Ok(None);
        }
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, key: &str, value: Bytes) -> HubResult<()> {
        let path = self.path_of(key)?;
        let parent = self.parent_dir(&path)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&parent)?;
        tmp.write_all(&value)?;
        persist(tmp, &path)
    }

    fn put_if_absent(&self, key: &str, value: Bytes) -> HubResult<bool> {
        let path = self.path_of(key)?;
        self.parent_dir(&path)?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(&value)?;
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, key: &str) -> HubResult<()> {
        let path = self.path_of(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> HubResult<()> {
        let path = self.prefix_path(prefix)?;
        let result = if path == self.root {
            // keep the root itself so the store stays usable
            match fs::read_dir(&path) {
                Ok(entries) => entries.into_iter().try_for_each(|entry| {
                    let entry = entry?;
                    if entry.file_type()?.is_dir() {
                        fs::remove_dir_all(entry.path())
                    } else {
                        fs::remove_file(entry.path())
                    }
                }),
                Err(err) => Err(err),
            }
        } else if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, prefix: &str) -> HubResult<Vec<String>> {
        let path = self.prefix_path(prefix)?;
        let mut keys = Vec::new();
        if path.is_file() {
            keys.push(prefix.trim_matches('/').to_string());
        } else {
            self.collect(&path, &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> HubResult<bool> {
        Ok(self.path_of(key)?.is_file())
    }
}

fn persist(tmp: NamedTempFile, path: &Path) -> HubResult<()> {
    tmp.persist(path)
        .map_err(|err| HubError::from(err.error))
        .context(|| format!("persisting {}", path.display()))?;
    Ok(())
}
