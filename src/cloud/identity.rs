//! Keystone session bootstrap. Out of core scope per the design brief;
//! this is a narrow surface the retry-on-unauthorized helper in
//! `provider::manila` rebuilds against.

use async_trait::async_trait;

use crate::error::FuxiResult;

#[async_trait]
pub trait IdentitySession: Send + Sync {
    /// The current token, authenticating if the session has never
    /// authenticated yet.
    async fn token(&self) -> FuxiResult<String>;

    /// Drops the current token and re-authenticates. Called once by the
    /// retry-on-unauthorized wrapper after a client reports `Unauthorized`.
    async fn reauthenticate(&self) -> FuxiResult<String>;
}

#[derive(Debug, Clone)]
pub struct KeystoneConfig {
    pub auth_url: String,
    pub admin_user: String,
    pub admin_password: String,
    pub admin_tenant_name: String,
    pub admin_token: Option<String>,
    pub auth_ca_cert: Option<String>,
    pub auth_insecure: bool,
    pub region: Option<String>,
}

/// Password-auth Keystone session. Token fetch/refresh go through a single
/// client so every provider sees the same credential.
pub struct KeystoneSession {
    config: KeystoneConfig,
    http: reqwest::Client,
    token: tokio::sync::RwLock<Option<String>>,
}

impl KeystoneSession {
    pub fn new(config: KeystoneConfig) -> FuxiResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.auth_insecure)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build keystone http client: {}", e))?;
        Ok(Self {
            config,
            http,
            token: tokio::sync::RwLock::new(None),
        })
    }

    async fn authenticate(&self) -> FuxiResult<String> {
        if let Some(token) = &self.config.admin_token {
            return Ok(token.clone());
        }
        let body = serde_json::json!({
            "auth": {
                "tenantName": self.config.admin_tenant_name,
                "passwordCredentials": {
                    "username": self.config.admin_user,
                    "password": self.config.admin_password,
                }
            }
        });
        let response = self
            .http
            .post(format!("{}/tokens", self.config.auth_url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("keystone auth request failed: {}", e))?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("keystone auth response malformed: {}", e))?;
        value["access"]["token"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("keystone response missing access.token.id").into())
    }
}

#[async_trait]
impl IdentitySession for KeystoneSession {
    async fn token(&self) -> FuxiResult<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.reauthenticate().await
    }

    async fn reauthenticate(&self) -> FuxiResult<String> {
        let token = self.authenticate().await?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }
}
