// src/fabric/client.rs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::auth::AccessToken;
use super::{CreateOutcome, CreateShortcutRequest, FabricError, Result, Shortcut, ShortcutApi, ShortcutList};

const CONFLICT_POLICY: (&str, &str) = ("shortcutConflictPolicy", "CreateOrOverwrite");

/// Shortcut collection of one workspace item, reached over HTTP.
pub struct FabricClient {
    http: Client,
    token: AccessToken,
    shortcuts_url: Url,
}

impl FabricClient {
    pub fn new(
        http: Client,
        api_base: &Url,
        token: AccessToken,
        workspace_id: &str,
        item_id: &str,
    ) -> Result<Self> {
        Ok(Self {
            http,
            token,
            shortcuts_url: shortcuts_url(api_base, workspace_id, item_id)?,
        })
    }
}

/// `{api_base}/v1/workspaces/{workspace}/items/{item}/shortcuts`
pub fn shortcuts_url(api_base: &Url, workspace_id: &str, item_id: &str) -> Result<Url> {
    let mut url = api_base.clone();
    url.path_segments_mut()
        .map_err(|_| FabricError::InvalidBase(api_base.to_string()))?
        .pop_if_empty()
        .extend(["v1", "workspaces", workspace_id, "items", item_id, "shortcuts"]);
    Ok(url)
}

#[async_trait]
impl ShortcutApi for FabricClient {
    async fn list_shortcuts(&self) -> Result<Vec<Shortcut>> {
        let resp = self
            .http
            .get(self.shortcuts_url.clone())
            .bearer_auth(self.token.secret())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FabricError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let list: ShortcutList = resp.json().await?;
        debug!(count = list.value.len(), "listed shortcuts");
        Ok(list.value)
    }

    async fn create_shortcut(&self, request: &CreateShortcutRequest) -> Result<CreateOutcome> {
        let resp = self
            .http
            .post(self.shortcuts_url.clone())
            .query(&[CONFLICT_POLICY])
            .bearer_auth(self.token.secret())
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::CREATED {
            return Ok(CreateOutcome::Created);
        }
        let body = resp.text().await.unwrap_or_default();
        Ok(CreateOutcome::Failed {
            status: status.as_u16(),
            body,
        })
    }
}
