// src/config.rs

use std::{env, fmt, path::PathBuf};
use thiserror::Error;
use url::Url;

pub const MSSQL_CONN_STR: &str = "MSSQL_CONN_STR";
pub const FABRIC_CLIENT_ID: &str = "FABRIC_CLIENT_ID";
pub const FABRIC_CLIENT_SECRET: &str = "FABRIC_CLIENT_SECRET";
pub const FABRIC_TENANT_ID: &str = "FABRIC_TENANT_ID";
pub const FABRIC_WORKSPACE_ID: &str = "FABRIC_WORKSPACE_ID";
pub const FABRIC_ITEM_ID: &str = "FABRIC_ITEM_ID";

const DESTINATION_BUCKET_URL: &str = "DESTINATION_BUCKET_URL";
const PIPELINES_DIR: &str = "PIPELINES_DIR";
const MSSQL_SCHEMA: &str = "MSSQL_SCHEMA";
const EXTRACT_BATCH_SIZE: &str = "EXTRACT_BATCH_SIZE";
const FABRIC_API_BASE: &str = "FABRIC_API_BASE";
const FABRIC_AUTHORITY_HOST: &str = "FABRIC_AUTHORITY_HOST";

const DEFAULT_BUCKET_URL: &str = "data";
const DEFAULT_PIPELINES_DIR: &str = ".pipelines";
const DEFAULT_SCHEMA: &str = "dbo";
const DEFAULT_BATCH_SIZE: usize = 10_000;
const DEFAULT_API_BASE: &str = "https://api.fabric.microsoft.com";
const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Everything the two phases need, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub fabric: FabricConfig,
}

#[derive(Clone)]
pub struct SourceConfig {
    /// ADO.NET style connection string.
    pub conn_str: String,
    pub schema: String,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct DestinationConfig {
    /// Root directory of the filesystem destination.
    pub bucket_url: PathBuf,
    /// Working directory holding per-pipeline state and load history.
    pub pipelines_dir: PathBuf,
}

#[derive(Clone)]
pub struct FabricConfig {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub workspace_id: String,
    pub item_id: String,
    pub api_base: Url,
    pub authority_host: Url,
}

impl Config {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. All missing required keys are
    /// reported in a single error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut missing = Vec::new();
        let mut required = |key: &'static str| match get(key) {
            Some(v) => v,
            None => {
                missing.push(key);
                String::new()
            }
        };

        let conn_str = required(MSSQL_CONN_STR);
        let client_id = required(FABRIC_CLIENT_ID);
        let client_secret = required(FABRIC_CLIENT_SECRET);
        let tenant_id = required(FABRIC_TENANT_ID);
        let workspace_id = required(FABRIC_WORKSPACE_ID);
        let item_id = required(FABRIC_ITEM_ID);

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let batch_size = match get(EXTRACT_BATCH_SIZE) {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        var: EXTRACT_BATCH_SIZE,
                        reason: "must be greater than zero".into(),
                    })
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        var: EXTRACT_BATCH_SIZE,
                        reason: e.to_string(),
                    })
                }
            },
            None => DEFAULT_BATCH_SIZE,
        };

        Ok(Config {
            source: SourceConfig {
                conn_str,
                schema: get(MSSQL_SCHEMA).unwrap_or_else(|| DEFAULT_SCHEMA.into()),
                batch_size,
            },
            destination: DestinationConfig {
                bucket_url: PathBuf::from(
                    get(DESTINATION_BUCKET_URL).unwrap_or_else(|| DEFAULT_BUCKET_URL.into()),
                ),
                pipelines_dir: PathBuf::from(
                    get(PIPELINES_DIR).unwrap_or_else(|| DEFAULT_PIPELINES_DIR.into()),
                ),
            },
            fabric: FabricConfig {
                client_id,
                client_secret,
                tenant_id,
                workspace_id,
                item_id,
                api_base: parse_url(FABRIC_API_BASE, get(FABRIC_API_BASE), DEFAULT_API_BASE)?,
                authority_host: parse_url(
                    FABRIC_AUTHORITY_HOST,
                    get(FABRIC_AUTHORITY_HOST),
                    DEFAULT_AUTHORITY_HOST,
                )?,
            },
        })
    }
}

fn parse_url(var: &'static str, value: Option<String>, default: &str) -> Result<Url, ConfigError> {
    let raw = value.unwrap_or_else(|| default.to_string());
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::Invalid {
            var,
            reason: format!("`{}` cannot be used as a base URL", raw),
        });
    }
    Ok(url)
}

// Secrets stay out of logs.
impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("conn_str", &"<redacted>")
            .field("schema", &self.schema)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl fmt::Debug for FabricConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FabricConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("workspace_id", &self.workspace_id)
            .field("item_id", &self.item_id)
            .field("api_base", &self.api_base.as_str())
            .field("authority_host", &self.authority_host.as_str())
            .finish()
    }
}
