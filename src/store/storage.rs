/// Directory-tree object storage
///
/// Maps object keys (`flow/run/step/task`) onto directories under the datastore
/// root. Each object owns a reserved `_meta` directory of small JSON files, one per
/// logical record, so listing children is a directory listing and fetching a record
/// is a file read. There is no index to maintain.
///
/// Writes go through a temp file in the destination directory followed by a rename,
/// so readers never observe partial content. Reads never fail: missing or corrupt
/// files are reported as absent.

use crate::store::error::{StoreError, StoreResult};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

/// Name of the datastore directory created under the configured root
pub const DATASTORE_DIR: &str = ".metaflow";

/// Reserved per-object directory holding record files
pub const META_DIR: &str = "_meta";

/// Record name of an object's own description
pub const SELF_RECORD: &str = "_self";

const RECORD_EXT: &str = "json";

/// Location of one object in the hierarchy, outermost component first
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    components: Vec<String>,
}

impl ObjectKey {
    /// Build a key from its components, validating each one
    pub fn new<S: AsRef<str>>(components: &[S]) -> StoreResult<Self> {
        let mut key = ObjectKey {
            components: Vec::with_capacity(components.len()),
        };
        for component in components {
            key = key.child(component.as_ref())?;
        }
        Ok(key)
    }

    /// Key of a direct child of this object
    pub fn child(&self, name: &str) -> StoreResult<Self> {
        validate_name(name)?;
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(ObjectKey { components })
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}

/// Check that `name` can be used as an object directory name
///
/// Only the record directory name is reserved; steps such as `_parameters` are legal.
pub fn validate_name(name: &str) -> StoreResult<()> {
    validate_record_part(name)?;
    if name == META_DIR {
        return Err(StoreError::Validation(format!("'{}' is reserved", name)));
    }
    Ok(())
}

/// Check that `name` can be embedded in a record file name
pub fn validate_record_part(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::Validation("name must not be empty".into()));
    }
    if name == "." || name == ".." {
        return Err(StoreError::Validation(format!("'{}' is not a valid name", name)));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(StoreError::Validation(format!(
            "'{}' must not contain path separators",
            name
        )));
    }
    Ok(())
}

/// Filesystem-backed object store rooted at `<root>/.metaflow`
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Open (creating if needed) the datastore under `root`
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let datastore = root.as_ref().join(DATASTORE_DIR);
        fs::create_dir_all(&datastore).map_err(|e| StoreError::io(&datastore, e))?;
        let root = datastore
            .canonicalize()
            .map_err(|e| StoreError::io(&datastore, e))?;
        tracing::debug!("Opened object store at {}", root.display());
        Ok(Self { root })
    }

    /// Absolute path of the datastore directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_dir(&self, key: &ObjectKey) -> PathBuf {
        let mut dir = self.root.clone();
        dir.extend(key.components());
        dir
    }

    fn meta_dir(&self, key: &ObjectKey) -> PathBuf {
        self.object_dir(key).join(META_DIR)
    }

    fn record_path(&self, key: &ObjectKey, name: &str) -> PathBuf {
        self.meta_dir(key).join(format!("{}.{}", name, RECORD_EXT))
    }

    /// Create the object's directory (and `_meta`) if missing
    pub fn ensure_object(&self, key: &ObjectKey) -> StoreResult<()> {
        let dir = self.meta_dir(key);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))
    }

    /// Read one record; `None` when missing or unreadable
    pub fn read<T: DeserializeOwned>(&self, key: &ObjectKey, name: &str) -> Option<T> {
        read_record(&self.record_path(key, name))
    }

    /// Persist one record atomically, creating directories as needed
    pub fn write<T: Serialize>(&self, key: &ObjectKey, name: &str, record: &T) -> StoreResult<()> {
        self.ensure_object(key)?;
        let path = self.record_path(key, name);
        let bytes = serde_json::to_vec(record)?;
        write_atomic(&path, &bytes).map_err(|e| StoreError::io(&path, e))?;
        tracing::debug!("Wrote {}/{}", key, name);
        Ok(())
    }

    /// Persist one record unless a record of that name already exists
    ///
    /// Returns false, leaving the existing file untouched, when the name is taken.
    /// Used for write-once records (artifacts, metadata entries).
    pub fn write_new<T: Serialize>(&self, key: &ObjectKey, name: &str, record: &T) -> StoreResult<bool> {
        self.ensure_object(key)?;
        let path = self.record_path(key, name);
        if path.exists() {
            return Ok(false);
        }
        let bytes = serde_json::to_vec(record)?;
        let written = write_atomic_new(&path, &bytes).map_err(|e| StoreError::io(&path, e))?;
        if written {
            tracing::debug!("Wrote {}/{}", key, name);
        }
        Ok(written)
    }

    /// Return the existing `_self` record of `key` or build and persist a new one
    ///
    /// Read-then-write: two processes creating the same object concurrently may both
    /// write, and the last writer wins. Acceptable because concurrent creators of
    /// the same flow or step send equivalent records.
    pub fn get_or_create<T, F>(&self, key: &ObjectKey, build: F) -> StoreResult<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.read(key, SELF_RECORD) {
            return Ok((existing, false));
        }
        let record = build();
        self.write(key, SELF_RECORD, &record)?;
        Ok((record, true))
    }

    /// Names of the child objects of `key` (filesystem order)
    pub fn list_children(&self, key: &ObjectKey) -> Vec<String> {
        let dir = self.object_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name != META_DIR)
            .collect()
    }

    /// `_self` records of every child of `key` that has one
    pub fn list_child_records<T: DeserializeOwned>(&self, key: &ObjectKey) -> Vec<T> {
        self.list_children(key)
            .iter()
            .filter_map(|name| {
                let child = key.child(name).ok()?;
                self.read(&child, SELF_RECORD)
            })
            .collect()
    }

    /// All records of `key` whose name satisfies `matches` (filesystem order)
    pub fn read_matching<T, P>(&self, key: &ObjectKey, matches: P) -> Vec<T>
    where
        T: DeserializeOwned,
        P: Fn(&str) -> bool,
    {
        let dir = self.meta_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                    return None;
                }
                let stem = path.file_stem()?.to_str()?;
                if !matches(stem) {
                    return None;
                }
                read_record(&path)
            })
            .collect()
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Skipping unreadable record {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!("Skipping corrupt record {}: {}", path.display(), e);
            None
        }
    }
}

/// Write `bytes` to `path` through a synced temp file and a rename
///
/// The temp file lives in the destination directory so the rename never crosses
/// filesystems. A crash leaves either the previous file or the new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("record path has no parent directory"))?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Like [`write_atomic`], but never replaces an existing file
///
/// Returns false when `path` already exists.
pub fn write_atomic_new(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("record path has no parent directory"))?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    match temp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}
