//! Azure credential acquisition.
//!
//! Two token sources cover everything the node needs:
//!
//! - [`ArcIdentityClient`] speaks the Arc agent's local IMDS (HIMDS)
//!   challenge/response protocol to obtain tokens for the machine's managed
//!   identity. The endpoint answers the first request with 401 and a
//!   `Www-Authenticate: Basic realm=<key file>` header; the key file is only
//!   readable with privileges, which is what proves the caller is local and
//!   authorized.
//! - [`service_principal_token`] runs the plain client-credentials flow
//!   against Microsoft Entra for configs that carry a service principal.

use crate::config::Config;
use crate::errors::{FlexnodeError, FlexnodeResult};
#[cfg(target_os = "linux")]
use crate::platform::command;
use serde::Deserialize;
use std::time::Duration;

const HIMDS_TOKEN_URL: &str = "http://localhost:40342/metadata/identity/oauth2/token";
const API_VERSION: &str = "2020-06-01";

/// Audience for Azure Resource Manager calls.
pub const ARM_RESOURCE: &str = "https://management.azure.com/";

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_on: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntraTokenResponse {
    access_token: String,
}

/// Managed-identity token client backed by the Arc agent's HIMDS endpoint.
pub struct ArcIdentityClient {
    http: reqwest::Client,
}

impl ArcIdentityClient {
    pub fn new() -> FlexnodeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http })
    }

    /// Acquire a managed-identity token for `resource`.
    pub async fn token(&self, resource: &str) -> FlexnodeResult<AccessToken> {
        let challenge = self
            .http
            .get(HIMDS_TOKEN_URL)
            .query(&[("api-version", API_VERSION), ("resource", resource)])
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| {
                FlexnodeError::Auth(format!(
                    "Arc identity endpoint unreachable (is the Arc agent running?): {}",
                    e
                ))
            })?;

        if challenge.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Err(FlexnodeError::Auth(format!(
                "Arc identity endpoint returned {} instead of a challenge",
                challenge.status()
            )));
        }

        let key_path = Self::challenge_key_path(&challenge)?;
        let key = Self::read_challenge_key(&key_path).await?;

        let response = self
            .http
            .get(HIMDS_TOKEN_URL)
            .query(&[("api-version", API_VERSION), ("resource", resource)])
            .header("Metadata", "true")
            .header("Authorization", format!("Basic {}", key))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FlexnodeError::Auth(format!(
                "Arc identity token request failed with {}: {}",
                status, body
            )));
        }
        Ok(response.json::<AccessToken>().await?)
    }

    fn challenge_key_path(challenge: &reqwest::Response) -> FlexnodeResult<String> {
        let header = challenge
            .headers()
            .get("Www-Authenticate")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                FlexnodeError::Auth("Arc identity challenge missing Www-Authenticate".into())
            })?;
        header
            .strip_prefix("Basic realm=")
            .map(|p| p.to_string())
            .ok_or_else(|| {
                FlexnodeError::Auth(format!("unexpected Arc identity challenge: {}", header))
            })
    }

    /// The key file is root-owned; on Linux it is read through the privileged
    /// runner so a sudo-capable invoker works without running the whole
    /// process as root. The elevated Windows process reads it directly.
    async fn read_challenge_key(path: &str) -> FlexnodeResult<String> {
        #[cfg(target_os = "linux")]
        let key = command::run_privileged_with_output("cat", &[path])
            .await
            .map_err(|e| {
                FlexnodeError::Auth(format!("failed to read Arc challenge key {}: {}", path, e))
            })?;
        #[cfg(not(target_os = "linux"))]
        let key = tokio::fs::read_to_string(path).await.map_err(|e| {
            FlexnodeError::Auth(format!("failed to read Arc challenge key {}: {}", path, e))
        })?;
        Ok(key.trim().to_string())
    }
}

/// Client-credentials token for configs carrying a service principal.
pub async fn service_principal_token(
    config: &Config,
    scope: &str,
) -> FlexnodeResult<AccessToken> {
    let sp = config
        .azure
        .service_principal
        .as_ref()
        .ok_or_else(|| FlexnodeError::Auth("no service principal configured".into()))?;

    let url = format!(
        "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
        config.azure.tenant_id
    );
    let response = reqwest::Client::new()
        .post(&url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", sp.client_id.as_str()),
            ("client_secret", sp.client_secret.as_str()),
            ("scope", scope),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(FlexnodeError::Auth(format!(
            "service principal token request failed with {}: {}",
            status, body
        )));
    }
    let token = response.json::<EntraTokenResponse>().await?;
    Ok(AccessToken {
        access_token: token.access_token,
        expires_on: None,
        resource: Some(scope.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_deserializes_himds_shape() {
        let raw = r#"{
            "access_token": "eyJ0eXAi...",
            "expires_on": "1735689600",
            "resource": "https://management.azure.com/",
            "token_type": "Bearer"
        }"#;
        let token: AccessToken = serde_json::from_str(raw).unwrap();
        assert_eq!(token.access_token, "eyJ0eXAi...");
        assert_eq!(token.expires_on.as_deref(), Some("1735689600"));
    }

    #[tokio::test]
    async fn service_principal_token_requires_configured_sp() {
        let config = Config::default();
        let err = service_principal_token(&config, ARM_RESOURCE)
            .await
            .unwrap_err();
        assert!(matches!(err, FlexnodeError::Auth(_)));
    }
}
