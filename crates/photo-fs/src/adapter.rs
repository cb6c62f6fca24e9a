//! Local + SkyDrive backend
//!
//! Originals (remote paths containing `/original/`) are kept on SkyDrive
//! only; every other version is written to both. Reads of resized versions
//! are served locally, downloads of originals come from SkyDrive.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::debug;

use crate::local::LocalFileSystem;
use crate::skydrive::SkyDriveFileSystem;
use crate::{Diagnostic, FileSystem, FsFuture, Photo, PhotoUpload, is_original, read_script};

pub struct LocalSkyDriveFileSystem {
    skydrive: SkyDriveFileSystem,
    local: LocalFileSystem,
}

impl LocalSkyDriveFileSystem {
    pub fn new(skydrive: SkyDriveFileSystem, local: LocalFileSystem) -> Self {
        Self { skydrive, local }
    }

    pub fn skydrive(&self) -> &SkyDriveFileSystem {
        &self.skydrive
    }

    pub fn local(&self) -> &LocalFileSystem {
        &self.local
    }
}

impl FileSystem for LocalSkyDriveFileSystem {
    /// Both sides are attempted; the SkyDrive error wins when both fail.
    fn put_photo<'a>(
        &'a self,
        local_file: &'a Path,
        remote_file: &'a str,
        date_taken: Option<i64>,
    ) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let local = if is_original(remote_file) {
                Ok(())
            } else {
                self.local
                    .put_photo(local_file, remote_file, date_taken)
                    .await
            };
            self.skydrive
                .put_photo(local_file, remote_file, date_taken)
                .await?;
            local
        })
    }

    fn put_photos<'a>(&'a self, files: &'a [PhotoUpload]) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let local_files: Vec<PhotoUpload> = files
                .iter()
                .filter(|f| !is_original(&f.remote_file))
                .cloned()
                .collect();
            self.skydrive.put_photos(files).await?;
            self.local.put_photos(&local_files).await
        })
    }

    fn delete_photo<'a>(&'a self, photo: &'a Photo) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.skydrive.delete_photo(photo).await?;
            self.local.delete_photo(photo).await
        })
    }

    fn download_photo<'a>(&'a self, photo: &'a Photo) -> FsFuture<'a, PathBuf> {
        Box::pin(self.skydrive.download_photo(photo))
    }

    fn get_photo<'a>(&'a self, filename: &'a str) -> FsFuture<'a, PathBuf> {
        debug!(filename, "serving photo from local storage");
        self.local.get_photo(filename)
    }

    fn initialize(&self, is_edit_mode: bool) -> FsFuture<'_, ()> {
        Box::pin(async move {
            self.skydrive.initialize(is_edit_mode).await?;
            self.local.initialize(is_edit_mode).await
        })
    }

    fn identity(&self) -> Vec<String> {
        let mut identity = self.skydrive.identity();
        identity.extend(self.local.identity());
        identity
    }

    fn diagnostics(&self) -> Pin<Box<dyn Future<Output = Vec<Diagnostic>> + Send + '_>> {
        Box::pin(async move {
            let mut diagnostics = self.skydrive.diagnostics().await;
            diagnostics.extend(self.local.diagnostics().await);
            diagnostics
        })
    }

    fn host(&self) -> &str {
        self.local.host()
    }

    fn metadata(&self, _local_file: &Path) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn normalize_path(&self, path: &str) -> String {
        self.local.normalize_path(path)
    }

    fn execute_script<'a>(
        &'a self,
        file: &'a Path,
        filesystem: &'a str,
    ) -> FsFuture<'a, Option<String>> {
        if filesystem == "skydrive" {
            Box::pin(async move { read_script(file).await.map(Some) })
        } else {
            self.local.execute_script(file, filesystem)
        }
    }
}
