//! File-backed storage for the current token bundle
//!
//! Holds at most one `AccessToken`. Writes go through a temp file + rename so
//! a crash mid-write never leaves a truncated token file, and a tokio Mutex
//! serializes writers (the HTTP callback and the client's refresh path).

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::token::AccessToken;

pub struct TokenStore {
    path: PathBuf,
    state: Mutex<Option<AccessToken>>,
}

impl TokenStore {
    /// Load the token file. A missing file yields an empty store; the file is
    /// only created once a token is stored.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading token file: {e}")))?;
            let token: AccessToken = serde_json::from_str(&contents)
                .map_err(|e| Error::TokenParse(format!("parsing token file: {e}")))?;
            info!(path = %path.display(), expires_at = token.expires_at(), "loaded stored token");
            Some(token)
        } else {
            info!(path = %path.display(), "token file not found, starting unauthenticated");
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self) -> Option<AccessToken> {
        self.state.lock().await.clone()
    }

    /// Replace the stored token and persist it.
    pub async fn set(&self, token: AccessToken) -> Result<()> {
        let mut state = self.state.lock().await;
        write_atomic(&self.path, &token).await?;
        *state = Some(token);
        Ok(())
    }

    /// Forget the token and delete the file.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = None;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed token file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!("removing token file: {e}"))),
        }
    }
}

/// Write the token to `path` atomically with 0600 permissions on unix.
async fn write_atomic(path: &Path, token: &AccessToken) -> Result<()> {
    let json = serde_json::to_string_pretty(token)
        .map_err(|e| Error::TokenParse(format!("serializing token: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("token path has no parent directory".into()))?;

    if !dir.as_os_str().is_empty() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Io(format!("creating token directory: {e}")))?;
    }

    let tmp_path = dir.join(format!(".skydrive-token.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted token");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(access: &str) -> AccessToken {
        AccessToken {
            token_type: "bearer".into(),
            expires_in: 3600,
            scope: "wl.basic".into(),
            access_token: access.into(),
            refresh_token: Some(format!("rt_{access}")),
            authentication_token: None,
            created: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");

        let store = TokenStore::load(path.clone()).await.unwrap();
        assert!(store.get().await.is_none());
        assert!(!path.exists(), "load must not create the file");
    }

    #[tokio::test]
    async fn roundtrip_set_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");

        let store = TokenStore::load(path.clone()).await.unwrap();
        store.set(token("at_1")).await.unwrap();

        let reloaded = TokenStore::load(path).await.unwrap();
        let stored = reloaded.get().await.unwrap();
        assert_eq!(stored, token("at_1"));
    }

    #[tokio::test]
    async fn set_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token.json");

        let store = TokenStore::load(path.clone()).await.unwrap();
        store.set(token("at_1")).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");

        let store = TokenStore::load(path.clone()).await.unwrap();
        store.set(token("at_1")).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.get().await.is_none());
        assert!(!path.exists());
        // clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let result = TokenStore::load(path).await;
        assert!(matches!(result, Err(Error::TokenParse(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let store = TokenStore::load(path.clone()).await.unwrap();
        store.set(token("at_1")).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
    }
}
