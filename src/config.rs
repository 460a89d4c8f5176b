//! Client configuration
//!
//! Settings come from a YAML file (`~/.config/caveclient/config.yaml` by
//! default), then `CAVE_*` environment variables override individual
//! fields. The auth token is never stored in the config file by this crate;
//! it is read from the environment, an explicit token file, or the
//! `~/.cloudvolume/secrets` directory shared with other CAVE tools.

use crate::cache::DEFAULT_TTL;
use crate::client::DEFAULT_TIMEOUT;
use crate::error::CaveError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_SERVER_ADDRESS: &str = "https://global.daf-apis.com";

pub const ENV_SERVER_ADDRESS: &str = "CAVE_SERVER_ADDRESS";
pub const ENV_DATASTACK: &str = "CAVE_DATASTACK";
pub const ENV_TOKEN: &str = "CAVE_TOKEN";

const SECRETS_DIR: &str = ".cloudvolume/secrets";
const SECRET_FILE: &str = "cave-secret.json";
const TOKEN_KEY: &str = "token";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("token file {} has no string \"token\" field", .path.display())]
    InvalidTokenFile { path: PathBuf },

    #[error("invalid server address {address:?}: {source}")]
    InvalidServer {
        address: String,
        source: url::ParseError,
    },

    #[error("no datastack configured; pass one or set CAVE_DATASTACK")]
    MissingDatastack,
}

impl From<ConfigError> for CaveError {
    fn from(err: ConfigError) -> Self {
        CaveError::Config(err.to_string())
    }
}

/// Everything needed to build a [`crate::CaveClient`]
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Global server hosting the info service
    pub server_address: String,
    pub datastack: Option<String>,
    /// Explicit token; takes precedence over token files
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// JSON file holding `{"token": ...}`
    pub token_file: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Lifetime of cached version and table metadata
    pub cache_ttl_secs: u64,
    /// Pin an API version instead of negotiating
    pub chunkedgraph_api_version: Option<u32>,
    pub materialization_api_version: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            datastack: None,
            token: None,
            token_file: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            chunkedgraph_api_version: None,
            materialization_api_version: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_address", &self.server_address)
            .field("datastack", &self.datastack)
            .field("has_token", &self.token.is_some())
            .field("token_file", &self.token_file)
            .field("timeout_secs", &self.timeout_secs)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("chunkedgraph_api_version", &self.chunkedgraph_api_version)
            .field("materialization_api_version", &self.materialization_api_version)
            .finish()
    }
}

impl ClientConfig {
    /// `~/.config/caveclient/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("caveclient").join("config.yaml"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` (or the default file if it exists) and apply the process
    /// environment on top
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => {
                    debug!(path = %path.display(), "loading config");
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    /// Override fields from environment variables, looked up through `lookup`
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(server) = set(ENV_SERVER_ADDRESS) {
            self.server_address = server;
        }
        if let Some(datastack) = set(ENV_DATASTACK) {
            self.datastack = Some(datastack);
        }
        if let Some(token) = set(ENV_TOKEN) {
            self.token = Some(token);
        }
        self
    }

    pub fn with_datastack(mut self, datastack: impl Into<String>) -> Self {
        self.datastack = Some(datastack.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn server_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.server_address).map_err(|source| ConfigError::InvalidServer {
            address: self.server_address.clone(),
            source,
        })
    }

    pub fn datastack(&self) -> Result<&str, ConfigError> {
        self.datastack.as_deref().ok_or(ConfigError::MissingDatastack)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// The auth token, if one can be found.
    ///
    /// Order: explicit token, `token_file`, then in the secrets directory
    /// `<server host>-cave-secret.json` followed by `cave-secret.json`.
    pub fn resolve_token(&self) -> Result<Option<String>, ConfigError> {
        if let Some(token) = &self.token {
            return Ok(Some(token.clone()));
        }
        if let Some(path) = &self.token_file {
            return read_token(path).map(Some);
        }
        match dirs::home_dir() {
            Some(home) => self.token_from_dir(&home.join(SECRETS_DIR)),
            None => Ok(None),
        }
    }

    /// Look for a token file in `dir`, preferring one named after the server
    pub fn token_from_dir(&self, dir: &Path) -> Result<Option<String>, ConfigError> {
        let host = self
            .server_url()
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
        let mut candidates = Vec::new();
        if let Some(host) = host {
            candidates.push(dir.join(format!("{host}-{SECRET_FILE}")));
        }
        candidates.push(dir.join(SECRET_FILE));

        for path in candidates {
            if path.is_file() {
                debug!(path = %path.display(), "reading token");
                return read_token(&path).map(Some);
            }
        }
        Ok(None)
    }
}

fn read_token(path: &Path) -> Result<String, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|_| ConfigError::InvalidTokenFile {
            path: path.to_path_buf(),
        })?;
    value
        .get(TOKEN_KEY)
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidTokenFile {
            path: path.to_path_buf(),
        })
}
