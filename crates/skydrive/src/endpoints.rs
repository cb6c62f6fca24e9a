//! Endpoint wrappers
//!
//! Each wrapper maps to exactly one REST call (except `get_file_by_name`,
//! which lists a folder and filters locally). Paths are relative to the API
//! base. `query` arguments take a raw filter string such as
//! `filter=photos&limit=10`.

use std::path::Path;

use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::api::SkyDriveApi;
use crate::error::{Error, Result};
use crate::request::ApiRequest;
use crate::types::{Download, DriveObject, Listing, Quota, UserProfile};

/// Response of a `suppress_redirects=true` content request.
#[derive(serde::Deserialize)]
struct Location {
    location: String,
}

impl SkyDriveApi {
    /// Upload a local file into `folder_id` under `filename` (PUT, streamed).
    ///
    /// The response carries the new file's `id`, `name` and `source`.
    pub async fn upload(
        &self,
        file_path: &Path,
        filename: &str,
        folder_id: &str,
    ) -> Result<DriveObject> {
        info!(file = %file_path.display(), filename, folder_id, "uploading file");
        let request = ApiRequest::put("upload", &format!("{folder_id}/files"))
            .segment(filename)
            .file(file_path);
        self.call_as(request).await
    }

    /// Download a file: either its pre-authenticated link or its content.
    pub async fn download(&self, file_id: &str, return_link: bool) -> Result<Download> {
        if return_link {
            self.download_link(file_id).await.map(Download::Link)
        } else {
            self.download_content(file_id).await.map(Download::Content)
        }
    }

    /// The temporary download URL for a file (`location`).
    pub async fn download_link(&self, file_id: &str) -> Result<String> {
        let request = ApiRequest::get("download_link", &format!("{file_id}/content"))
            .param("suppress_redirects", "true")
            .param("download", "false");
        let location: Location = self.call_as(request).await?;
        Ok(location.location)
    }

    /// The file content, following the redirect to the storage host.
    pub async fn download_content(&self, file_id: &str) -> Result<Vec<u8>> {
        let response = self.send(&content_request(file_id)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("download: reading content: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Stream a file's content into `dest`, returning the number of bytes written.
    ///
    /// A partially written `dest` is removed when the transfer fails.
    pub async fn download_to_file(&self, file_id: &str, dest: &Path) -> Result<u64> {
        let response = self.send(&content_request(file_id)).await?;
        match write_response(response, dest).await {
            Ok(written) => {
                debug!(file_id, bytes = written, dest = %dest.display(), "downloaded file");
                Ok(written)
            }
            Err(e) => {
                match tokio::fs::remove_file(dest).await {
                    Ok(()) => {}
                    Err(rm) if rm.kind() == std::io::ErrorKind::NotFound => {}
                    Err(rm) => warn!(
                        dest = %dest.display(),
                        error = %rm,
                        "failed to remove partial download"
                    ),
                }
                Err(e)
            }
        }
    }

    /// Update properties (name, description, ...) of a file or folder.
    pub async fn update_file_properties(
        &self,
        file_id: &str,
        properties: Value,
    ) -> Result<DriveObject> {
        let request = ApiRequest::put("update_properties", file_id).json(properties);
        self.call_as(request).await
    }

    /// Fetch any object by id (user, folder, album, file, ...).
    pub async fn get_object(&self, object_id: &str) -> Result<Value> {
        self.call(ApiRequest::get("object", object_id)).await
    }

    /// Find a file by exact name in `parent_id` (root folder when `None`).
    ///
    /// Returns `None` when no entry matches; with duplicates the last one wins.
    pub async fn get_file_by_name(
        &self,
        file_name: &str,
        parent_id: Option<&str>,
    ) -> Result<Option<DriveObject>> {
        let parent = parent_id.unwrap_or("me/skydrive");
        let listing = self.get_folder_files(parent, None).await?;
        let found = listing.find_by_name(file_name).cloned();
        debug!(file_name, parent, found = found.is_some(), "file lookup by name");
        Ok(found)
    }

    /// Delete any object by id.
    pub async fn delete_object(&self, object_id: &str) -> Result<()> {
        info!(object_id, "deleting object");
        self.call(ApiRequest::delete("delete", object_id)).await?;
        Ok(())
    }

    pub async fn get_albums_of_user(&self, user_id: &str, query: Option<&str>) -> Result<Listing> {
        let request =
            ApiRequest::get("user_albums", &format!("{user_id}/albums")).raw_query(query);
        self.call_as(request).await
    }

    pub async fn get_me(&self) -> Result<UserProfile> {
        self.call_as(ApiRequest::get("me", "me")).await
    }

    /// Total and available storage.
    pub async fn get_storage_info(&self) -> Result<Quota> {
        self.call_as(ApiRequest::get("quota", "me/skydrive/quota")).await
    }

    /// Folders that contain photos.
    pub async fn get_my_albums(&self, query: Option<&str>) -> Result<Listing> {
        self.call_as(ApiRequest::get("my_albums", "me/albums").raw_query(query))
            .await
    }

    pub async fn get_photos_of_album(
        &self,
        album_id: &str,
        query: Option<&str>,
    ) -> Result<Listing> {
        let request =
            ApiRequest::get("album_photos", &format!("{album_id}/files")).raw_query(query);
        self.call_as(request).await
    }

    pub async fn get_folder_files(&self, folder_id: &str, query: Option<&str>) -> Result<Listing> {
        let request =
            ApiRequest::get("folder_files", &format!("{folder_id}/files")).raw_query(query);
        self.call_as(request).await
    }

    pub async fn create_folder(
        &self,
        parent_folder_id: &str,
        name: &str,
        description: &str,
    ) -> Result<DriveObject> {
        info!(parent_folder_id, name, "creating folder");
        let request = ApiRequest::post("create_folder", parent_folder_id)
            .json(json!({ "name": name, "description": description }));
        self.call_as(request).await
    }

    pub async fn get_my_root_folders(&self, query: Option<&str>) -> Result<Listing> {
        self.call_as(ApiRequest::get("root_folders", "me/skydrive/files").raw_query(query))
            .await
    }

    pub async fn get_my_root(&self) -> Result<DriveObject> {
        self.call_as(ApiRequest::get("root", "me/skydrive")).await
    }

    pub async fn get_my_shared_files(&self, query: Option<&str>) -> Result<Listing> {
        self.call_as(ApiRequest::get("shared_files", "me/skydrive/shared/files").raw_query(query))
            .await
    }

    pub async fn get_comments(&self, object_id: &str, query: Option<&str>) -> Result<Value> {
        self.call(ApiRequest::get("comments", &format!("{object_id}/comments")).raw_query(query))
            .await
    }

    /// Scopes the user has granted to this application.
    pub async fn get_permissions(&self) -> Result<Value> {
        self.call(ApiRequest::get("permissions", "me/permissions")).await
    }

    /// Find objects whose name or content matches `q`.
    pub async fn search(&self, q: &str) -> Result<Listing> {
        self.call_as(ApiRequest::get("search", "me/skydrive/search").param("q", q))
            .await
    }

    pub async fn get_tags(&self, object_id: &str) -> Result<Value> {
        self.call(ApiRequest::get("tags", &format!("{object_id}/tags"))).await
    }
}

async fn write_response(mut response: reqwest::Response, dest: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| Error::Io(format!("creating {}: {e}", dest.display())))?;

    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::Http(format!("download: reading content: {e}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::Io(format!("writing {}: {e}", dest.display())))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| Error::Io(format!("flushing {}: {e}", dest.display())))?;
    Ok(written)
}

fn content_request(file_id: &str) -> ApiRequest {
    ApiRequest::get("download", &format!("{file_id}/content")).param("download", "true")
}
