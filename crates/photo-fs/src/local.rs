//! Plain directory-backed storage
//!
//! Remote paths such as `/base/201310/abc-img.jpg` map to files under `root`.
//! Paths with `..` or other non-normal components are rejected.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::{
    Diagnostic, FileSystem, FsFuture, Photo, PhotoUpload, read_script, temp_path,
};

pub struct LocalFileSystem {
    root: PathBuf,
    host: String,
    temp_dir: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>, host: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            host: host.into(),
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Directory for the temp copies handed out by `get_photo`.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `remote_file` under the root.
    pub fn resolve(&self, remote_file: &str) -> Result<PathBuf> {
        let relative = Path::new(remote_file.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidPath(remote_file.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn put(&self, local_file: &Path, remote_file: &str) -> Result<()> {
        let dest = self.resolve(remote_file)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        tokio::fs::copy(local_file, &dest)
            .await
            .map_err(|e| Error::io(local_file, e))?;
        debug!(src = %local_file.display(), dest = %dest.display(), "stored photo locally");
        Ok(())
    }

    async fn copy_to_temp(&self, remote_file: &str) -> Result<PathBuf> {
        let src = self.resolve(remote_file)?;
        let dest = temp_path(&self.temp_dir, remote_file);
        tokio::fs::copy(&src, &dest)
            .await
            .map_err(|e| Error::io(&src, e))?;
        Ok(dest)
    }

    async fn root_is_writable(&self) -> std::result::Result<(), String> {
        let probe = self.root.join(format!(".write-probe-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&probe, b"probe")
            .await
            .map_err(|e| e.to_string())?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(|e| e.to_string())
    }
}

impl FileSystem for LocalFileSystem {
    fn put_photo<'a>(
        &'a self,
        local_file: &'a Path,
        remote_file: &'a str,
        _date_taken: Option<i64>,
    ) -> FsFuture<'a, ()> {
        Box::pin(self.put(local_file, remote_file))
    }

    fn put_photos<'a>(&'a self, files: &'a [PhotoUpload]) -> FsFuture<'a, ()> {
        Box::pin(async move {
            for file in files {
                self.put(&file.local_file, &file.remote_file).await?;
            }
            Ok(())
        })
    }

    fn delete_photo<'a>(&'a self, photo: &'a Photo) -> FsFuture<'a, ()> {
        Box::pin(async move {
            for remote_file in photo.paths.values() {
                let path = self.resolve(remote_file)?;
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!(path = %path.display(), "deleted local file"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::io(&path, e)),
                }
            }
            Ok(())
        })
    }

    fn download_photo<'a>(&'a self, photo: &'a Photo) -> FsFuture<'a, PathBuf> {
        Box::pin(async move {
            let original = photo
                .original()
                .ok_or_else(|| Error::NotFound(format!("photo {} has no original", photo.id)))?;
            self.copy_to_temp(original).await
        })
    }

    fn get_photo<'a>(&'a self, filename: &'a str) -> FsFuture<'a, PathBuf> {
        Box::pin(self.copy_to_temp(filename))
    }

    fn initialize(&self, _is_edit_mode: bool) -> FsFuture<'_, ()> {
        Box::pin(async move {
            match tokio::fs::metadata(&self.root).await {
                Ok(meta) if meta.is_dir() => Ok(()),
                Ok(_) => Err(Error::InvalidPath(format!(
                    "{} is not a directory",
                    self.root.display()
                ))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tokio::fs::create_dir_all(&self.root)
                        .await
                        .map_err(|e| Error::io(&self.root, e))?;
                    info!(root = %self.root.display(), "created photo root");
                    Ok(())
                }
                Err(e) => Err(Error::io(&self.root, e)),
            }
        })
    }

    fn identity(&self) -> Vec<String> {
        vec!["local".to_string()]
    }

    fn diagnostics(&self) -> Pin<Box<dyn Future<Output = Vec<Diagnostic>> + Send + '_>> {
        Box::pin(async move {
            let root = self.root.display().to_string();
            let is_dir = tokio::fs::metadata(&self.root)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                warn!(root = %root, "photo root missing");
                return vec![Diagnostic::fail(
                    "local root",
                    format!("{root} does not exist or is not a directory"),
                )];
            }

            let mut diagnostics = vec![Diagnostic::ok("local root", format!("{root} exists"))];
            diagnostics.push(match self.root_is_writable().await {
                Ok(()) => Diagnostic::ok("local root writable", format!("{root} is writable")),
                Err(e) => {
                    warn!(root = %root, error = %e, "photo root not writable");
                    Diagnostic::fail("local root writable", format!("{root}: {e}"))
                }
            });
            diagnostics
        })
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn metadata(&self, _local_file: &Path) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Strip a public URL prefix (`https://{host}`) or the root directory,
    /// leaving a path with exactly one leading `/`.
    fn normalize_path(&self, path: &str) -> String {
        let mut rest = path;
        for scheme in ["https://", "http://"] {
            if let Some(stripped) = rest.strip_prefix(scheme) {
                rest = stripped.strip_prefix(self.host.as_str()).unwrap_or(stripped);
                break;
            }
        }
        if let Some(root) = self.root.to_str() {
            let root = root.trim_end_matches('/');
            if !root.is_empty() {
                if let Some(stripped) = rest.strip_prefix(root) {
                    rest = stripped;
                }
            }
        }
        format!("/{}", rest.trim_start_matches('/'))
    }

    fn execute_script<'a>(
        &'a self,
        file: &'a Path,
        filesystem: &'a str,
    ) -> FsFuture<'a, Option<String>> {
        Box::pin(async move {
            if filesystem != "local" {
                return Ok(None);
            }
            read_script(file).await.map(Some)
        })
    }
}
