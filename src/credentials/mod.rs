//! Google OAuth credential resolution.
//!
//! Providers are asked in order; the first one that yields credentials wins.
//! The resolved token is cached and refreshed once when it has expired.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::{build_client, json_or_upstream, DEFAULT_TIMEOUT};
use crate::config::Config;
use crate::error::{AvaBotError, Result};
use crate::interfaces::credentials::CredentialProvider;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const EXPIRY_SKEW_SECONDS: i64 = 60;
/// Assumed lifetime when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Authorized-user credentials, in the `token.json` layout written by the
/// Google auth libraries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleCredentials {
    #[serde(default, alias = "access_token")]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<String>,
}

impl GoogleCredentials {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.expiry.as_deref()?.trim();
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| naive.and_utc())
            })
            .ok()
    }

    fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }

    /// A token with no known expiry is refreshed once when it can be, so an
    /// access token handed in through the environment never goes stale.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        let missing_token = self
            .token
            .as_deref()
            .map(|token| token.trim().is_empty())
            .unwrap_or(true);
        if missing_token {
            return true;
        }
        match self.expires_at() {
            Some(expiry) => expiry <= now + TimeDelta::seconds(EXPIRY_SKEW_SECONDS),
            None => self.can_refresh(),
        }
    }
}

pub struct EnvCredentialProvider {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl EnvCredentialProvider {
    pub const REQUIRED: [&'static str; 4] = [
        "GOOGLE_CLIENT_ID",
        "GOOGLE_CLIENT_SECRET",
        "GOOGLE_ACCESS_TOKEN",
        "GOOGLE_REFRESH_TOKEN",
    ];

    pub fn new() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    fn name(&self) -> &str {
        "environment"
    }

    async fn load(&self) -> Result<Option<GoogleCredentials>> {
        let missing: Vec<&str> = Self::REQUIRED
            .iter()
            .copied()
            .filter(|key| self.get(key).is_none())
            .collect();
        if !missing.is_empty() {
            debug!(missing = ?missing, "google environment credentials incomplete");
            return Ok(None);
        }

        Ok(Some(GoogleCredentials {
            token: self.get("GOOGLE_ACCESS_TOKEN"),
            refresh_token: self.get("GOOGLE_REFRESH_TOKEN"),
            token_uri: self
                .get("GOOGLE_TOKEN_URI")
                .unwrap_or_else(default_token_uri),
            client_id: self.get("GOOGLE_CLIENT_ID"),
            client_secret: self.get("GOOGLE_CLIENT_SECRET"),
            scopes: Vec::new(),
            expiry: None,
        }))
    }
}

pub struct TokenFileProvider {
    candidates: Vec<PathBuf>,
}

impl TokenFileProvider {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl CredentialProvider for TokenFileProvider {
    fn name(&self) -> &str {
        "token_file"
    }

    async fn load(&self) -> Result<Option<GoogleCredentials>> {
        let Some(path) = self.candidates.iter().find(|path| path.is_file()) else {
            debug!(candidates = ?self.candidates, "no token file found");
            return Ok(None);
        };

        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read token file");
                return Ok(None);
            }
        };
        match serde_json::from_str::<GoogleCredentials>(&raw) {
            Ok(credentials) => {
                info!(path = %path.display(), "loaded google credentials from token file");
                Ok(Some(credentials))
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "token file is not valid credentials json");
                Ok(None)
            }
        }
    }
}

pub struct CredentialChain {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Environment first, then the token files.
    pub fn standard(token_files: Vec<PathBuf>) -> Self {
        Self::new(vec![
            Arc::new(EnvCredentialProvider::new()),
            Arc::new(TokenFileProvider::new(token_files)),
        ])
    }

    pub async fn resolve(&self) -> Result<GoogleCredentials> {
        for provider in &self.providers {
            if let Some(credentials) = provider.load().await? {
                info!(provider = provider.name(), "resolved google credentials");
                return Ok(credentials);
            }
        }
        Err(AvaBotError::NoCredentials(
            "set the GOOGLE_* environment variables or provide a token.json".to_string(),
        ))
    }
}

/// Hands out a valid Google access token, resolving and refreshing lazily.
pub struct GoogleAuth {
    chain: CredentialChain,
    client: reqwest::Client,
    cached: RwLock<Option<GoogleCredentials>>,
}

impl GoogleAuth {
    pub fn new(chain: CredentialChain) -> Result<Self> {
        Ok(Self {
            chain,
            client: build_client(DEFAULT_TIMEOUT)?,
            cached: RwLock::new(None),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let token_files = config
            .google
            .as_ref()
            .and_then(|google| google.token_files.clone())
            .map(|files| files.into_iter().map(PathBuf::from).collect::<Vec<_>>())
            .unwrap_or_else(crate::runtime_paths::default_token_file_candidates);
        Self::new(CredentialChain::standard(token_files))
    }

    pub async fn access_token(&self) -> Result<String> {
        {
            let cached = self.cached.read().await;
            if let Some(credentials) = cached.as_ref() {
                if !credentials.needs_refresh(Utc::now()) {
                    if let Some(token) = &credentials.token {
                        return Ok(token.clone());
                    }
                }
            }
        }

        let mut cached = self.cached.write().await;
        let mut credentials = match cached.take() {
            Some(credentials) => credentials,
            None => self.chain.resolve().await?,
        };
        if credentials.needs_refresh(Utc::now()) {
            credentials = match self.refresh(credentials.clone()).await {
                Ok(refreshed) => refreshed,
                Err(err) => {
                    *cached = Some(credentials);
                    return Err(err);
                }
            };
        }
        let token = credentials
            .token
            .clone()
            .ok_or_else(|| AvaBotError::Credentials("no access token available".to_string()))?;
        *cached = Some(credentials);
        Ok(token)
    }

    async fn refresh(&self, mut credentials: GoogleCredentials) -> Result<GoogleCredentials> {
        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            credentials.refresh_token.clone(),
            credentials.client_id.clone(),
            credentials.client_secret.clone(),
        ) else {
            return Err(AvaBotError::Credentials(
                "token expired and cannot be refreshed (missing refresh_token or client)"
                    .to_string(),
            ));
        };

        info!(token_uri = %credentials.token_uri, "refreshing google access token");
        let response = self
            .client
            .post(&credentials.token_uri)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AvaBotError::Credentials(format!("token refresh failed: {e}")))?;
        let body = json_or_upstream(response)
            .await
            .map_err(|e| AvaBotError::Credentials(format!("token refresh failed: {e}")))?;

        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AvaBotError::Credentials("token refresh response had no access_token".to_string())
            })?;
        credentials.token = Some(token.to_string());
        let lifetime = body
            .get("expires_in")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECONDS);
        credentials.expiry = Some((Utc::now() + TimeDelta::seconds(lifetime)).to_rfc3339());
        if let Some(rotated) = body.get("refresh_token").and_then(|v| v.as_str()) {
            credentials.refresh_token = Some(rotated.to_string());
        }
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(expiry: Option<&str>) -> GoogleCredentials {
        GoogleCredentials {
            token: Some("ya29.token".to_string()),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: default_token_uri(),
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
            scopes: Vec::new(),
            expiry: expiry.map(str::to_string),
        }
    }

    #[test]
    fn expiry_accepts_rfc3339_and_naive_forms() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(credentials(Some("2026-01-01T11:00:00Z")).needs_refresh(now));
        assert!(credentials(Some("2026-01-01T12:00:30.123456")).needs_refresh(now));
        assert!(!credentials(Some("2026-01-01T13:00:00Z")).needs_refresh(now));
        assert!(credentials(None).needs_refresh(now));

        let mut static_token = credentials(None);
        static_token.refresh_token = None;
        assert!(!static_token.needs_refresh(now));

        let mut tokenless = credentials(None);
        tokenless.token = None;
        assert!(tokenless.needs_refresh(now));
    }

    #[test]
    fn token_json_uses_default_token_uri() {
        let parsed: GoogleCredentials = serde_json::from_str(
            r#"{"token": "abc", "refresh_token": "r", "client_id": "c", "client_secret": "s", "scopes": ["https://www.googleapis.com/auth/gmail.modify"]}"#,
        )
        .unwrap();
        assert_eq!(parsed.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(parsed.scopes.len(), 1);
    }
}
