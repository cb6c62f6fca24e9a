//! Photo storage backends
//!
//! Defines the `FileSystem` contract the photo application stores files
//! through, and three implementations:
//! - `LocalFileSystem` keeps files under a root directory
//! - `SkyDriveFileSystem` keeps files in one SkyDrive folder
//! - `LocalSkyDriveFileSystem` combines them: originals live on SkyDrive only,
//!   resized versions live in both places
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn FileSystem>`).

pub mod adapter;
pub mod error;
pub mod local;
pub mod skydrive;

pub use adapter::LocalSkyDriveFileSystem;
pub use error::{Error, Result};
pub use local::LocalFileSystem;
pub use skydrive::{DEFAULT_FOLDER, SkyDriveFileSystem};

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Boxed future returned by the fallible `FileSystem` operations.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Size key of the full-resolution upload.
pub const ORIGINAL_KEY: &str = "original";

/// A stored photo: size key (`original`, `base`, `100x100xCR`, ...) to remote path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    #[serde(default)]
    pub paths: BTreeMap<String, String>,
}

impl Photo {
    /// Remote path of the original, if the record has one.
    pub fn original(&self) -> Option<&str> {
        self.paths.get(ORIGINAL_KEY).map(String::as_str)
    }
}

/// One file of a batch upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoUpload {
    pub local_file: PathBuf,
    pub remote_file: String,
    /// Unix seconds
    #[serde(default)]
    pub date_taken: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticStatus {
    Ok,
    Warn,
    Fail,
}

/// One line of backend diagnostics for the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub label: String,
    pub status: DiagnosticStatus,
    pub detail: String,
}

impl Diagnostic {
    pub fn ok(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(label, DiagnosticStatus::Ok, detail)
    }

    pub fn warn(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(label, DiagnosticStatus::Warn, detail)
    }

    pub fn fail(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(label, DiagnosticStatus::Fail, detail)
    }

    fn new(label: impl Into<String>, status: DiagnosticStatus, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status,
            detail: detail.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == DiagnosticStatus::Fail
    }
}

/// Storage contract used by the photo application.
pub trait FileSystem: Send + Sync {
    /// Store `local_file` at `remote_file`.
    fn put_photo<'a>(
        &'a self,
        local_file: &'a Path,
        remote_file: &'a str,
        date_taken: Option<i64>,
    ) -> FsFuture<'a, ()>;

    /// Store a batch, in order. Stops at the first failure.
    fn put_photos<'a>(&'a self, files: &'a [PhotoUpload]) -> FsFuture<'a, ()>;

    /// Remove every stored version of `photo`.
    fn delete_photo<'a>(&'a self, photo: &'a Photo) -> FsFuture<'a, ()>;

    /// Fetch the original into a local temp file and return its path.
    fn download_photo<'a>(&'a self, photo: &'a Photo) -> FsFuture<'a, PathBuf>;

    /// Copy the stored file `filename` to a local temp file and return its path.
    fn get_photo<'a>(&'a self, filename: &'a str) -> FsFuture<'a, PathBuf>;

    /// Prepare the backend (create folders, resolve ids).
    fn initialize(&self, is_edit_mode: bool) -> FsFuture<'_, ()>;

    /// Backend names, outermost first.
    fn identity(&self) -> Vec<String>;

    fn diagnostics(&self) -> Pin<Box<dyn Future<Output = Vec<Diagnostic>> + Send + '_>>;

    /// Hostname used to build public URLs.
    fn host(&self) -> &str;

    /// Extra metadata to keep on the photo record.
    fn metadata(&self, local_file: &Path) -> BTreeMap<String, String>;

    fn normalize_path(&self, path: &str) -> String;

    /// Return the text of an upgrade script when it targets this backend.
    fn execute_script<'a>(
        &'a self,
        file: &'a Path,
        filesystem: &'a str,
    ) -> FsFuture<'a, Option<String>>;
}

/// Whether `remote_file` is a full-resolution original.
pub fn is_original(remote_file: &str) -> bool {
    remote_file.contains("/original/")
}

/// Last path segment of a remote path (`/original/201310/a.jpg` -> `a.jpg`).
pub fn basename(remote_file: &str) -> &str {
    remote_file.rsplit('/').next().unwrap_or(remote_file)
}

/// Unique path in `dir` that keeps the extension of `name`.
pub(crate) fn temp_path(dir: &Path, name: &str) -> PathBuf {
    let id = uuid::Uuid::new_v4();
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => dir.join(format!("photo-store-{id}.{ext}")),
        None => dir.join(format!("photo-store-{id}")),
    }
}

/// Read an upgrade script.
pub(crate) async fn read_script(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .map_err(|e| Error::io(file, e))
}
