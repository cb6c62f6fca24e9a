//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret and refresh token come from SKYDRIVE_CLIENT_SECRET /
//! SKYDRIVE_REFRESH_TOKEN or from files, never from the TOML directly.

use common::Secret;
use serde::Deserialize;
use skydrive_auth::OAuthClient;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub skydrive: SkyDriveConfig,
    pub localfs: LocalFsConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Timeout for each outbound SkyDrive request
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Live Connect application and storage settings
#[derive(Debug, Deserialize)]
pub struct SkyDriveConfig {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    pub token_path: PathBuf,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default)]
    pub refresh_token_file: Option<PathBuf>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
}

/// Local half of the storage backend
#[derive(Debug, Deserialize)]
pub struct LocalFsConfig {
    pub root: PathBuf,
    pub host: String,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    256
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_scope() -> String {
    skydrive_auth::DEFAULT_SCOPE.to_string()
}

fn default_folder() -> String {
    photo_fs::DEFAULT_FOLDER.to_string()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order (each):
    /// 1. SKYDRIVE_CLIENT_SECRET / SKYDRIVE_REFRESH_TOKEN env var
    /// 2. client_secret_file / refresh_token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| common::Error::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&contents)?;

        config.skydrive.client_secret = resolve_secret(
            "SKYDRIVE_CLIENT_SECRET",
            config.skydrive.client_secret_file.as_deref(),
        )?;
        config.skydrive.refresh_token = resolve_secret(
            "SKYDRIVE_REFRESH_TOKEN",
            config.skydrive.refresh_token_file.as_deref(),
        )?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(common::Error::Config(
                "max_upload_bytes must be greater than 0".into(),
            ));
        }

        let skydrive = &self.skydrive;
        if skydrive.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }
        check_url("redirect_uri", &skydrive.redirect_uri)?;
        for (name, url) in [
            ("api_base_url", &skydrive.api_base_url),
            ("authorize_url", &skydrive.authorize_url),
            ("token_url", &skydrive.token_url),
        ] {
            if let Some(url) = url {
                check_url(name, url)?;
            }
        }
        if skydrive.client_secret.is_none() {
            return Err(common::Error::Config(
                "client secret missing: set SKYDRIVE_CLIENT_SECRET or client_secret_file".into(),
            ));
        }
        if skydrive.folder.trim().is_empty() {
            return Err(common::Error::Config("folder must not be empty".into()));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("photo-store.toml")
    }
}

impl SkyDriveConfig {
    /// The application registration, with any endpoint overrides applied.
    pub fn oauth_client(&self) -> common::Result<OAuthClient> {
        let secret = self
            .client_secret
            .clone()
            .ok_or_else(|| common::Error::Config("client secret missing".into()))?;
        let mut client = OAuthClient::new(&self.client_id, secret, &self.redirect_uri)
            .with_scope(&self.scope);
        if self.authorize_url.is_some() || self.token_url.is_some() {
            let authorize = self
                .authorize_url
                .clone()
                .unwrap_or_else(|| client.authorize_endpoint.clone());
            let token = self
                .token_url
                .clone()
                .unwrap_or_else(|| client.token_endpoint.clone());
            client = client.with_endpoints(authorize, token);
        }
        Ok(client)
    }
}

/// Env var first, then file. A blank file yields `None`.
fn resolve_secret(env_var: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var) {
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }
    match file {
        Some(path) => Secret::from_file(path).map_err(|source| common::Error::ReadFile {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(None),
    }
}

fn check_url(name: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {url}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_secret_env() {
        unsafe {
            remove_env("SKYDRIVE_CLIENT_SECRET");
            remove_env("SKYDRIVE_REFRESH_TOKEN");
        }
    }

    fn toml_with(skydrive_extra: &str, server_extra: &str) -> String {
        format!(
            r#"
[server]
listen_addr = "127.0.0.1:8080"
{server_extra}

[skydrive]
client_id = "000000004C0F1234"
redirect_uri = "https://photos.example.com/skydrive/callback"
token_path = "/var/lib/photo-store/skydrive-token.json"
{skydrive_extra}

[localfs]
root = "/var/lib/photo-store/photos"
host = "photos.example.com"
"#
        )
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("photo-store.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("client_secret");
        std::fs::write(&secret, "s3cret\n").unwrap();
        let path = write_config(
            &dir,
            &toml_with(&format!("client_secret_file = \"{}\"", secret.display()), ""),
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.timeout_secs, 60);
        assert_eq!(config.server.max_connections, 256);
        assert_eq!(config.server.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.skydrive.scope, skydrive_auth::DEFAULT_SCOPE);
        assert_eq!(config.skydrive.folder, "trovebox");
        assert_eq!(config.skydrive.client_secret.as_ref().unwrap().expose(), "s3cret");
        assert!(config.skydrive.refresh_token.is_none());
        assert_eq!(config.localfs.host, "photos.example.com");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(common::Error::ReadFile { .. })));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_secrets_from_env_override_files() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("client_secret");
        std::fs::write(&secret, "from-file").unwrap();
        let path = write_config(
            &dir,
            &toml_with(
                &format!(
                    "client_secret_file = \"{}\"\nrefresh_token_file = \"/nonexistent/rt\"",
                    secret.display()
                ),
                "",
            ),
        );

        unsafe {
            set_env("SKYDRIVE_CLIENT_SECRET", "from-env");
            set_env("SKYDRIVE_REFRESH_TOKEN", "rt-env");
        }
        let config = Config::load(&path).unwrap();
        clear_secret_env();

        assert_eq!(config.skydrive.client_secret.as_ref().unwrap().expose(), "from-env");
        assert_eq!(config.skydrive.refresh_token.as_ref().unwrap().expose(), "rt-env");
    }

    #[test]
    fn test_missing_client_secret_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, &toml_with("", ""));

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("client secret missing"), "got: {err}");
    }

    #[test]
    fn test_blank_secret_file_is_missing() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("client_secret");
        std::fs::write(&secret, "  \n  ").unwrap();
        let path = write_config(
            &dir,
            &toml_with(&format!("client_secret_file = \"{}\"", secret.display()), ""),
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_nonexistent_refresh_token_file_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        let dir = tempfile::tempdir().unwrap();
        unsafe { set_env("SKYDRIVE_CLIENT_SECRET", "s") };
        let path = write_config(
            &dir,
            &toml_with("refresh_token_file = \"/nonexistent/rt\"", ""),
        );
        let result = Config::load(&path);
        clear_secret_env();
        assert!(matches!(result, Err(common::Error::ReadFile { .. })));
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        unsafe { set_env("SKYDRIVE_CLIENT_SECRET", "s") };
        let dir = tempfile::tempdir().unwrap();

        let path = write_config(&dir, &toml_with("token_url = \"login.live.com/token\"", ""));
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("token_url must start with http"), "got: {err}");

        let bad_redirect = toml_with("", "").replace(
            "https://photos.example.com/skydrive/callback",
            "photos.example.com/cb",
        );
        let path = write_config(&dir, &bad_redirect);
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("redirect_uri"), "got: {err}");
        clear_secret_env();
    }

    #[test]
    fn test_zero_limits_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        unsafe { set_env("SKYDRIVE_CLIENT_SECRET", "s") };
        let dir = tempfile::tempdir().unwrap();

        for extra in ["timeout_secs = 0", "max_connections = 0", "max_upload_bytes = 0"] {
            let path = write_config(&dir, &toml_with("", extra));
            assert!(Config::load(&path).is_err(), "{extra} must be rejected");
        }
        clear_secret_env();
    }

    #[test]
    fn test_oauth_client_applies_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        unsafe { set_env("SKYDRIVE_CLIENT_SECRET", "s") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &toml_with(
                "scope = \"wl.basic\"\ntoken_url = \"http://127.0.0.1:9999/token\"",
                "",
            ),
        );
        let config = Config::load(&path).unwrap();
        clear_secret_env();

        let client = config.skydrive.oauth_client().unwrap();
        assert_eq!(client.scope, "wl.basic");
        assert_eq!(client.token_endpoint, "http://127.0.0.1:9999/token");
        assert_eq!(client.authorize_endpoint, skydrive_auth::AUTHORIZE_ENDPOINT);
        assert_eq!(client.client_secret.expose(), "s");
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("photo-store.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }
}
