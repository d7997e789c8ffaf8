use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, instrument};
use url::Url;

use super::{FabricError, Result};

/// Scope granting access to the Fabric REST API.
pub const FABRIC_SCOPE: &str = "https://analysis.windows.net/powerbi/api/.default";

/// Bearer token for the Fabric API.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// `{authority_host}/{tenant}/oauth2/v2.0/token`
pub fn token_endpoint(authority_host: &Url, tenant_id: &str) -> Result<Url> {
    let mut url = authority_host.clone();
    url.path_segments_mut()
        .map_err(|_| FabricError::InvalidBase(authority_host.to_string()))?
        .pop_if_empty()
        .extend([tenant_id, "oauth2", "v2.0", "token"]);
    Ok(url)
}

/// Client-credentials grant. Fetched once per run; no caching or refresh.
#[instrument(level = "info", skip(http, client_secret), fields(%authority_host))]
pub async fn acquire_token(
    http: &Client,
    authority_host: &Url,
    tenant_id: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<AccessToken> {
    let endpoint = token_endpoint(authority_host, tenant_id)?;
    let resp = http
        .post(endpoint)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", FABRIC_SCOPE),
        ])
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;
    let parsed: Option<TokenResponse> = serde_json::from_str(&body).ok();

    match parsed {
        Some(TokenResponse {
            access_token: Some(token),
            ..
        }) if status.is_success() => {
            debug!("token acquired");
            Ok(AccessToken::new(token))
        }
        Some(TokenResponse {
            error,
            error_description,
            ..
        }) => Err(FabricError::Auth {
            status: status.as_u16(),
            error: error.unwrap_or_else(|| "missing access_token".to_string()),
            description: error_description.unwrap_or_default(),
        }),
        None => Err(FabricError::Auth {
            status: status.as_u16(),
            error: "unparseable token response".to_string(),
            description: body,
        }),
    }
}
