//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The Azure client secret and the JWT signing secret are loaded from the
//! AZURE_CLIENT_SECRET / API_JWT_SECRET env vars or from secret files,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use mssql_driver::SqlTarget;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub azure: AzureConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// HTTP server settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Browser origins allowed to call the API cross-origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Azure SQL connection settings
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Fully qualified server name, e.g. "myserver.database.windows.net".
    pub server: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

/// Azure AD app registration used for the client-credentials grant
#[derive(Debug, Deserialize)]
pub struct AzureConfig {
    pub tenant_id: String,
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to
    /// AZURE_CLIENT_SECRET env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

/// Bearer-token verification settings
#[derive(Debug, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(skip)]
    pub jwt_secret: Option<Secret<String>>,
    /// Path to a file containing the JWT signing secret (alternative to
    /// API_JWT_SECRET env var)
    #[serde(default)]
    pub jwt_secret_file: Option<PathBuf>,
}

/// Background token refresh cadence
#[derive(Debug, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_minutes")]
    pub interval_minutes: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_refresh_minutes(),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_pool_size() -> usize {
    4
}

fn default_timeout() -> u64 {
    30
}

fn default_refresh_minutes() -> u64 {
    30
}

impl DatabaseConfig {
    /// Connection coordinates for the driver; port 1433 and encrypted
    /// transport come from the target defaults.
    pub fn target(&self) -> SqlTarget {
        let mut target = SqlTarget::new(self.server.clone(), self.database.clone());
        target.pool_size = self.pool_size;
        target.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        target.request_timeout = Duration::from_secs(self.request_timeout_secs);
        target
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order (each secret):
    /// 1. env var (AZURE_CLIENT_SECRET / API_JWT_SECRET)
    /// 2. *_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.database.server.is_empty() {
            return Err(common::Error::Config("database.server must not be empty".into()));
        }
        if config.database.database.is_empty() {
            return Err(common::Error::Config("database.database must not be empty".into()));
        }
        if config.database.pool_size == 0 {
            return Err(common::Error::Config(
                "database.pool_size must be greater than 0".into(),
            ));
        }
        if config.database.connect_timeout_secs == 0 || config.database.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "database timeouts must be greater than 0".into(),
            ));
        }
        if config.azure.tenant_id.is_empty() {
            return Err(common::Error::Config("azure.tenant_id must not be empty".into()));
        }
        if config.azure.client_id.is_empty() {
            return Err(common::Error::Config("azure.client_id must not be empty".into()));
        }
        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.refresh.interval_minutes == 0 {
            return Err(common::Error::Config(
                "refresh.interval_minutes must be greater than 0".into(),
            ));
        }
        for origin in &config.server.cors_origins {
            if !origin.starts_with("http://") && !origin.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "cors_origins entries must start with http:// or https://, got: {origin}"
                )));
            }
        }

        config.azure.client_secret = resolve_secret(
            "AZURE_CLIENT_SECRET",
            config.azure.client_secret_file.as_deref(),
        )?;
        if config.azure.client_secret.is_none() {
            return Err(common::Error::Config(
                "no client secret: set AZURE_CLIENT_SECRET or azure.client_secret_file".into(),
            ));
        }

        config.auth.jwt_secret =
            resolve_secret("API_JWT_SECRET", config.auth.jwt_secret_file.as_deref())?;
        if config.auth.jwt_secret.is_none() {
            return Err(common::Error::Config(
                "no JWT secret: set API_JWT_SECRET or auth.jwt_secret_file".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or PRODRATE_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("PRODRATE_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("production-rates-api.toml")
    }
}

/// Env var takes precedence over the file; blank values count as absent.
fn resolve_secret(env_var: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }
    if let Some(path) = file {
        let value = std::fs::read_to_string(path).map_err(|e| {
            common::Error::Config(format!("failed to read secret file {}: {e}", path.display()))
        })?;
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }
    Ok(None)
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

    fn valid_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:8080"
cors_origins = ["http://localhost:3000"]

[database]
server = "prodrate-test.database.windows.net"
database = "prodrate"

[azure]
tenant_id = "11111111-2222-3333-4444-555555555555"
client_id = "66666666-7777-8888-9999-000000000000"
"#
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = std::env::temp_dir().join("prodrate-config-test-valid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, valid_toml()).unwrap();

        unsafe { set_env("AZURE_CLIENT_SECRET", "s3cret") };
        unsafe { set_env("API_JWT_SECRET", "jwt-s3cret") };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.cors_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.database.connect_timeout_secs, 30);
        assert_eq!(config.database.request_timeout_secs, 30);
        assert_eq!(config.refresh.interval_minutes, 30);
        assert_eq!(config.azure.client_secret.as_ref().unwrap().expose(), "s3cret");
        assert_eq!(config.auth.jwt_secret.as_ref().unwrap().expose(), "jwt-s3cret");

        unsafe { remove_env("AZURE_CLIENT_SECRET") };
        unsafe { remove_env("API_JWT_SECRET") };
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = std::env::temp_dir().join("prodrate-config-test-invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "not valid {{{{ toml").unwrap();

        let result = Config::load(&path);
        assert!(result.is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_client_secret_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = std::env::temp_dir().join("prodrate-config-test-nosecret");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, valid_toml()).unwrap();

        unsafe { remove_env("AZURE_CLIENT_SECRET") };
        unsafe { set_env("API_JWT_SECRET", "jwt-s3cret") };

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("AZURE_CLIENT_SECRET"));

        unsafe { remove_env("API_JWT_SECRET") };
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_secrets_from_files() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let client_secret_path = dir.path().join("client_secret");
        std::fs::write(&client_secret_path, "file-client-secret\n").unwrap();
        let jwt_secret_path = dir.path().join("jwt_secret");
        std::fs::write(&jwt_secret_path, "file-jwt-secret\n").unwrap();

        let toml_content = format!(
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[database]
server = "prodrate-test.database.windows.net"
database = "prodrate"

[azure]
tenant_id = "t"
client_id = "c"
client_secret_file = "{}"

[auth]
jwt_secret_file = "{}"
"#,
            client_secret_path.display(),
            jwt_secret_path.display()
        );
        let path = dir.path().join("config.toml");
        std::fs::write(&path, toml_content).unwrap();

        unsafe { remove_env("AZURE_CLIENT_SECRET") };
        unsafe { remove_env("API_JWT_SECRET") };

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.azure.client_secret.as_ref().unwrap().expose(),
            "file-client-secret"
        );
        assert_eq!(
            config.auth.jwt_secret.as_ref().unwrap().expose(),
            "file-jwt-secret"
        );
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = std::env::temp_dir().join("prodrate-config-test-poolsize");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let toml_content = valid_toml().replace(
            "database = \"prodrate\"",
            "database = \"prodrate\"\npool_size = 0",
        );
        std::fs::write(&path, toml_content).unwrap();

        unsafe { set_env("AZURE_CLIENT_SECRET", "s") };
        unsafe { set_env("API_JWT_SECRET", "j") };

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("pool_size"));

        unsafe { remove_env("AZURE_CLIENT_SECRET") };
        unsafe { remove_env("API_JWT_SECRET") };
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_bad_cors_origin_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = std::env::temp_dir().join("prodrate-config-test-cors");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let toml_content = valid_toml().replace(
            "cors_origins = [\"http://localhost:3000\"]",
            "cors_origins = [\"localhost:3000\"]",
        );
        std::fs::write(&path, toml_content).unwrap();

        unsafe { set_env("AZURE_CLIENT_SECRET", "s") };
        unsafe { set_env("API_JWT_SECRET", "j") };

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("cors_origins"));

        unsafe { remove_env("AZURE_CLIENT_SECRET") };
        unsafe { remove_env("API_JWT_SECRET") };
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { set_env("PRODRATE_CONFIG", "/from/env.toml") };
        assert_eq!(
            Config::resolve_path(Some("/from/cli.toml")),
            PathBuf::from("/from/cli.toml")
        );
        assert_eq!(Config::resolve_path(None), PathBuf::from("/from/env.toml"));

        unsafe { remove_env("PRODRATE_CONFIG") };
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("production-rates-api.toml")
        );
    }

    #[test]
    fn test_target_carries_overrides() {
        let db = DatabaseConfig {
            server: "prodrate-test.database.windows.net".into(),
            database: "prodrate".into(),
            pool_size: 8,
            connect_timeout_secs: 10,
            request_timeout_secs: 20,
        };
        let target = db.target();
        assert_eq!(target.host, "prodrate-test.database.windows.net");
        assert_eq!(target.database, "prodrate");
        assert_eq!(target.port, 1433);
        assert!(target.encrypt);
        assert_eq!(target.pool_size, 8);
        assert_eq!(target.connect_timeout, Duration::from_secs(10));
        assert_eq!(target.request_timeout, Duration::from_secs(20));
    }
}
