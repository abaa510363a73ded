//! Access tokens for the Drive API.
//!
//! The interactive OAuth consent flow is out of scope: a token file produced
//! by it is expected on disk. This module reads it, refreshes the access
//! token when it expires, and writes the refreshed token back.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("token expired and no refresh token is available")]
    NoRefreshToken,

    #[error("token refresh rejected: {0}")]
    Refresh(String),

    #[error("token refresh request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Source of bearer tokens for Drive requests
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Called after a 401 so the next request refreshes
    async fn invalidate(&self) {}
}

/// Fixed token (tests, service proxies)
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// `credentials.json` as downloaded from the cloud console
#[derive(Debug, Deserialize)]
struct ClientSecrets {
    #[serde(alias = "web")]
    installed: Option<ClientInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientInfo {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// `token.json` written by the consent flow
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    #[serde(alias = "access_token")]
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
}

impl StoredToken {
    /// Treat tokens as expired a minute early
    fn is_fresh(&self) -> bool {
        match self.expiry {
            Some(expiry) => expiry - ChronoDuration::seconds(60) > Utc::now(),
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Token provider backed by the on-disk token file
pub struct FileTokenProvider {
    token_path: PathBuf,
    token_endpoint: String,
    client: Option<ClientInfo>,
    http: reqwest::Client,
    state: Mutex<StoredToken>,
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, AuthError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AuthError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&raw).map_err(|source| AuthError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl FileTokenProvider {
    pub async fn load(
        credentials_path: &Path,
        token_path: &Path,
        default_endpoint: &str,
    ) -> Result<Self, AuthError> {
        let secrets: ClientSecrets = read_json(credentials_path).await?;
        let token: StoredToken = read_json(token_path).await?;

        let token_endpoint = token
            .token_uri
            .clone()
            .or_else(|| secrets.installed.as_ref().and_then(|c| c.token_uri.clone()))
            .unwrap_or_else(|| default_endpoint.to_string());

        Ok(Self {
            token_path: token_path.to_path_buf(),
            token_endpoint,
            client: secrets.installed,
            http: reqwest::Client::new(),
            state: Mutex::new(token),
        })
    }

    async fn refresh(&self, token: &mut StoredToken) -> Result<(), AuthError> {
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;
        let client_id = token
            .client_id
            .clone()
            .or_else(|| self.client.as_ref().map(|c| c.client_id.clone()))
            .unwrap_or_default();
        let client_secret = token
            .client_secret
            .clone()
            .or_else(|| self.client.as_ref().map(|c| c.client_secret.clone()))
            .unwrap_or_default();

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Refresh(format!("{}: {}", status, body.trim())));
        }

        let refreshed: RefreshResponse = response.json().await?;
        token.token = refreshed.access_token;
        token.expiry = refreshed
            .expires_in
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));

        if let Err(e) = self.persist(token).await {
            tracing::warn!(path = %self.token_path.display(), error = %e, "Could not save refreshed token");
        }
        tracing::debug!("Drive access token refreshed");
        Ok(())
    }

    async fn persist(&self, token: &StoredToken) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(token)?;
        let dir = match self.token_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = self
            .token_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "token.json".to_string());
        tokio::task::spawn_blocking(move || super::local::write_atomic(&dir, &name, json.as_bytes()))
            .await??;
        Ok(())
    }
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut token = self.state.lock().await;
        if !token.is_fresh() {
            self.refresh(&mut token).await?;
        }
        Ok(token.token.clone())
    }

    async fn invalidate(&self) {
        let mut token = self.state.lock().await;
        token.expiry = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_loads_fresh_token_without_refresh() {
        let temp = TempDir::new().unwrap();
        let creds = temp.path().join("credentials.json");
        let token = temp.path().join("token.json");
        std::fs::write(
            &creds,
            r#"{"installed": {"client_id": "id", "client_secret": "secret"}}"#,
        )
        .unwrap();
        let expiry = (Utc::now() + ChronoDuration::hours(1)).to_rfc3339();
        std::fs::write(
            &token,
            format!(r#"{{"token": "abc", "refresh_token": "r", "expiry": "{}"}}"#, expiry),
        )
        .unwrap();

        let provider = FileTokenProvider::load(&creds, &token, "http://127.0.0.1:9/token")
            .await
            .unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_token_fails() {
        let temp = TempDir::new().unwrap();
        let creds = temp.path().join("credentials.json");
        let token = temp.path().join("token.json");
        std::fs::write(&creds, r#"{"installed": null}"#).unwrap();
        std::fs::write(
            &token,
            r#"{"token": "old", "expiry": "2020-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let provider = FileTokenProvider::load(&creds, &token, "http://127.0.0.1:9/token")
            .await
            .unwrap();
        assert!(matches!(
            provider.access_token().await,
            Err(AuthError::NoRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_malformed_token_file() {
        let temp = TempDir::new().unwrap();
        let creds = temp.path().join("credentials.json");
        let token = temp.path().join("token.json");
        std::fs::write(&creds, "{}").unwrap();
        std::fs::write(&token, "not json").unwrap();

        let result = FileTokenProvider::load(&creds, &token, "http://x").await;
        assert!(matches!(result, Err(AuthError::Parse { .. })));
    }
}
