// src/fabric/mod.rs
//! Shortcut provisioning against the Fabric workspace REST API.
//!
//! Each loaded table folder gets a OneLake shortcut under `Tables/` of the
//! configured workspace item. Listing failures are fatal; a create that does
//! not come back `201 Created` is logged and the remaining folders are still
//! attempted.

pub mod auth;
pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::FabricConfig;
pub use auth::{acquire_token, AccessToken};
pub use client::FabricClient;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("authentication failed ({status}): {error} {description}")]
    Auth {
        status: u16,
        error: String,
        description: String,
    },
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("`{0}` cannot be used as a base url")]
    InvalidBase(String),
}

pub type Result<T, E = FabricError> = std::result::Result<T, E>;

/// One entry of the shortcut listing. Other fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Shortcut {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShortcutList {
    #[serde(default)]
    pub value: Vec<Shortcut>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShortcutRequest {
    pub path: String,
    pub name: String,
    pub target: ShortcutTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutTarget {
    pub one_lake: OneLakeTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneLakeTarget {
    pub workspace_id: String,
    pub item_id: String,
    pub path: String,
}

/// A shortcut to provision: `Tables/<folder>` → `Files/<dataset>/<folder>`
/// inside the same workspace item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutSpec {
    pub folder: String,
    pub target_path: String,
    pub workspace_id: String,
    pub item_id: String,
}

impl ShortcutSpec {
    pub fn new(dataset: &str, folder: &str, workspace_id: &str, item_id: &str) -> Self {
        Self {
            folder: folder.to_string(),
            target_path: format!("Files/{}/{}", dataset, folder),
            workspace_id: workspace_id.to_string(),
            item_id: item_id.to_string(),
        }
    }

    pub fn to_request(&self) -> CreateShortcutRequest {
        CreateShortcutRequest {
            path: "Tables/".to_string(),
            name: self.folder.clone(),
            target: ShortcutTarget {
                one_lake: OneLakeTarget {
                    workspace_id: self.workspace_id.clone(),
                    item_id: self.item_id.clone(),
                    path: self.target_path.clone(),
                },
            },
        }
    }
}

/// Result of a single create call. Only `201 Created` counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Failed { status: u16, body: String },
}

/// What happened to one folder during provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyExists,
    Created,
    Failed { status: u16, body: String },
}

#[async_trait]
pub trait ShortcutApi: Send + Sync {
    async fn list_shortcuts(&self) -> Result<Vec<Shortcut>>;
    async fn create_shortcut(&self, request: &CreateShortcutRequest) -> Result<CreateOutcome>;
}

/// Case-insensitive name match against the current listing.
pub async fn shortcut_exists<A: ShortcutApi + ?Sized>(api: &A, name: &str) -> Result<bool> {
    let shortcuts = api.list_shortcuts().await?;
    Ok(shortcuts.iter().any(|s| same_name(&s.name, name)))
}

/// Unicode lowercase comparison; `Ärenden` and `ärenden` are one shortcut.
fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[instrument(level = "info", skip(api, spec), fields(folder = %spec.folder))]
pub async fn create_shortcut_if_not_exists<A: ShortcutApi + ?Sized>(
    api: &A,
    spec: &ShortcutSpec,
) -> Result<ProvisionOutcome> {
    if shortcut_exists(api, &spec.folder).await? {
        info!("shortcut already exists, skipping");
        return Ok(ProvisionOutcome::AlreadyExists);
    }

    match api.create_shortcut(&spec.to_request()).await? {
        CreateOutcome::Created => {
            info!(target_path = %spec.target_path, "shortcut created");
            Ok(ProvisionOutcome::Created)
        }
        CreateOutcome::Failed { status, body } => {
            warn!(status, %body, "failed to create shortcut");
            Ok(ProvisionOutcome::Failed { status, body })
        }
    }
}

/// Provision every spec in order. Only listing and transport errors abort.
pub async fn create_shortcuts<A: ShortcutApi + ?Sized>(
    api: &A,
    specs: &[ShortcutSpec],
) -> Result<Vec<(String, ProvisionOutcome)>> {
    let mut outcomes = Vec::with_capacity(specs.len());
    for spec in specs {
        let outcome = create_shortcut_if_not_exists(api, spec).await?;
        outcomes.push((spec.folder.clone(), outcome));
    }
    Ok(outcomes)
}

/// Acquire a token once, then provision a shortcut per folder of `dataset`.
#[instrument(level = "info", skip(config, folders), fields(workspace = %config.workspace_id, item = %config.item_id))]
pub async fn provision_shortcuts(
    config: &FabricConfig,
    dataset: &str,
    folders: &[String],
) -> Result<Vec<(String, ProvisionOutcome)>> {
    let http = reqwest::Client::new();
    let token = acquire_token(
        &http,
        &config.authority_host,
        &config.tenant_id,
        &config.client_id,
        &config.client_secret,
    )
    .await?;
    let client = FabricClient::new(
        http,
        &config.api_base,
        token,
        &config.workspace_id,
        &config.item_id,
    )?;

    let specs: Vec<ShortcutSpec> = folders
        .iter()
        .map(|f| ShortcutSpec::new(dataset, f, &config.workspace_id, &config.item_id))
        .collect();
    create_shortcuts(&client, &specs).await
}
