//! SkyDrive half of the combined backend
//!
//! All photos go into a single folder (default `trovebox`) in the user's
//! root, stored flat under the basename of their remote path. The folder id
//! is resolved once and cached.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use skydrive::SkyDriveApi;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::{Diagnostic, Photo, PhotoUpload, basename, temp_path};

pub const DEFAULT_FOLDER: &str = "trovebox";

/// Parent id of the user's root folder.
const ROOT_FOLDER: &str = "me/skydrive";

/// Warn once less than this fraction of the quota is left.
const LOW_SPACE_RATIO: f64 = 0.05;

pub struct SkyDriveFileSystem {
    api: Arc<SkyDriveApi>,
    folder: String,
    folder_id: OnceCell<String>,
    temp_dir: PathBuf,
}

impl SkyDriveFileSystem {
    pub fn new(api: Arc<SkyDriveApi>) -> Self {
        Self {
            api,
            folder: DEFAULT_FOLDER.to_string(),
            folder_id: OnceCell::new(),
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    /// Directory for files fetched by `download_photo`.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn api(&self) -> &Arc<SkyDriveApi> {
        &self.api
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Id of the photo folder, looked up (or created) on first use.
    pub async fn folder_id(&self) -> Result<&str> {
        self.folder_id
            .get_or_try_init(|| self.find_or_create_folder())
            .await
            .map(String::as_str)
    }

    async fn find_or_create_folder(&self) -> Result<String> {
        let listing = self.api.get_my_root_folders(None).await?;
        if let Some(existing) = listing
            .data
            .iter()
            .rev()
            .find(|o| o.name == self.folder && o.is_container())
        {
            info!(folder = %self.folder, id = %existing.id, "using existing SkyDrive folder");
            return Ok(existing.id.clone());
        }

        let created = self
            .api
            .create_folder(ROOT_FOLDER, &self.folder, "Photo library storage")
            .await?;
        info!(folder = %self.folder, id = %created.id, "created SkyDrive folder");
        Ok(created.id)
    }

    pub async fn initialize(&self, is_edit_mode: bool) -> Result<()> {
        if is_edit_mode {
            info!(folder = %self.folder, "initializing SkyDrive backend in edit mode");
        }
        self.folder_id().await?;
        Ok(())
    }

    /// Upload `local_file` under the basename of `remote_file`.
    pub async fn put_photo(
        &self,
        local_file: &Path,
        remote_file: &str,
        date_taken: Option<i64>,
    ) -> Result<()> {
        let folder_id = self.folder_id().await?;
        let name = basename(remote_file);
        let uploaded = self.api.upload(local_file, name, folder_id).await?;
        debug!(remote_file, id = %uploaded.id, date_taken, "stored photo on SkyDrive");
        Ok(())
    }

    pub async fn put_photos(&self, files: &[PhotoUpload]) -> Result<()> {
        for file in files {
            self.put_photo(&file.local_file, &file.remote_file, file.date_taken)
                .await?;
        }
        Ok(())
    }

    /// Delete every version of `photo` from the folder. Files that are
    /// already gone count as deleted.
    pub async fn delete_photo(&self, photo: &Photo) -> Result<()> {
        let folder_id = self.folder_id().await?;
        let listing = self.api.get_folder_files(folder_id, None).await?;

        for remote_file in photo.paths.values() {
            let name = basename(remote_file);
            let Some(object) = listing.find_by_name(name) else {
                debug!(photo = %photo.id, name, "not on SkyDrive, nothing to delete");
                continue;
            };
            match self.api.delete_object(&object.id).await {
                Ok(()) => debug!(photo = %photo.id, name, "deleted from SkyDrive"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Fetch the original into a temp file.
    pub async fn download_photo(&self, photo: &Photo) -> Result<PathBuf> {
        let original = photo
            .original()
            .ok_or_else(|| Error::NotFound(format!("photo {} has no original", photo.id)))?;
        let name = basename(original);
        let folder_id = self.folder_id().await?;

        let object = self
            .api
            .get_file_by_name(name, Some(folder_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("{name} not found on SkyDrive")))?;

        let dest = temp_path(&self.temp_dir, name);
        self.api.download_to_file(&object.id, &dest).await?;
        Ok(dest)
    }

    pub fn identity(&self) -> Vec<String> {
        vec!["skydrive".to_string()]
    }

    pub async fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::with_capacity(3);

        let expired = self.api.is_access_token_expired().await;
        let can_refresh = self.api.has_refresh_token().await;
        diagnostics.push(match (expired, can_refresh) {
            (false, _) => Diagnostic::ok("skydrive token", "access token valid"),
            (true, true) => Diagnostic::ok("skydrive token", "access token will be refreshed"),
            (true, false) => {
                warn!("no usable SkyDrive token");
                Diagnostic::fail(
                    "skydrive token",
                    "no usable token; complete the authorization flow",
                )
            }
        });

        diagnostics.push(match self.api.get_me().await {
            Ok(me) => Diagnostic::ok(
                "skydrive account",
                format!("connected as {}", me.name.as_deref().unwrap_or(&me.id)),
            ),
            Err(e) => {
                warn!(error = %e, "SkyDrive account check failed");
                Diagnostic::fail("skydrive account", e.to_string())
            }
        });

        diagnostics.push(match self.api.get_storage_info().await {
            Ok(quota) => {
                let detail = format!("{} of {} bytes available", quota.available, quota.quota);
                if (quota.available as f64) < quota.quota as f64 * LOW_SPACE_RATIO {
                    Diagnostic::warn("skydrive quota", detail)
                } else {
                    Diagnostic::ok("skydrive quota", detail)
                }
            }
            Err(e) => {
                warn!(error = %e, "SkyDrive quota check failed");
                Diagnostic::fail("skydrive quota", e.to_string())
            }
        });

        diagnostics
    }
}
