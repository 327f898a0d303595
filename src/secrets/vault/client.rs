//! HTTP client for one Vault instance's KV secrets engine.
//!
//! The client branches on the configured KV version instead of sniffing
//! response shapes: v2 reads unwrap `data.data`, v1 reads unwrap `data`.
//! AppRole clients track their token lease and log in again shortly before
//! it expires, or once when a request comes back 403.

use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::config::{AuthMethod, KvVersion, VaultInstanceConfig};
use crate::errors::{ResolverError, Result};
use crate::secrets::reference::SecretLocator;
use crate::secrets::types::SecretString;

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const MAX_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Result of `GET /v1/sys/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultHealth {
    pub instance_name: String,
    pub vault_url: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum Credentials {
    Token,
    AppRole { role_id: SecretString, secret_id: SecretString },
}

struct TokenState {
    token: SecretString,
    refresh_at: Option<Instant>,
    /// Bumped by every successful login
    generation: u64,
}

impl TokenState {
    fn is_stale(&self) -> bool {
        self.refresh_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Client for a single named Vault instance.
pub struct VaultClient {
    instance_name: String,
    base_url: String,
    namespace: Option<String>,
    mount_point: String,
    kv_version: KvVersion,
    http: reqwest::Client,
    credentials: Credentials,
    token: RwLock<TokenState>,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("instance_name", &self.instance_name)
            .field("base_url", &self.base_url)
            .field("namespace", &self.namespace)
            .field("mount_point", &self.mount_point)
            .field("kv_version", &self.kv_version)
            .field("auth_method", &self.auth_method())
            .finish()
    }
}

impl VaultClient {
    /// Build a client from validated settings. AppRole instances log in here.
    pub async fn connect(config: VaultInstanceConfig) -> Result<Self> {
        config.validate_config()?;
        let kv_version = KvVersion::try_from(config.kv_version)?;

        let http = reqwest::Client::builder()
            .user_agent(format!("manifest-resolver/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| {
                ResolverError::config_with_source(
                    format!(
                        "Failed to build HTTP client for Vault instance '{}'",
                        config.instance_name
                    ),
                    Box::new(e),
                )
            })?;

        if !config.verify_ssl {
            warn!(
                instance = %config.instance_name,
                "TLS certificate verification disabled for Vault instance"
            );
        }

        let (credentials, initial_token) = match config.auth_method {
            AuthMethod::Token => (Credentials::Token, config.vault_token.unwrap_or_default()),
            AuthMethod::AppRole => (
                Credentials::AppRole {
                    role_id: config.role_id.unwrap_or_default(),
                    secret_id: config.secret_id.unwrap_or_default(),
                },
                SecretString::default(),
            ),
        };

        let client = Self {
            instance_name: config.instance_name,
            base_url: config.vault_url.trim_end_matches('/').to_string(),
            namespace: config.vault_namespace.filter(|ns| !ns.is_empty()),
            mount_point: config.kv_mount_point.trim_matches('/').to_string(),
            kv_version,
            http,
            credentials,
            token: RwLock::new(TokenState {
                token: initial_token,
                refresh_at: None,
                generation: 0,
            }),
        };

        if matches!(client.credentials, Credentials::AppRole { .. }) {
            client.login_if(|_| true).await?;
        }

        info!(
            instance = %client.instance_name,
            vault_url = %client.base_url,
            auth_method = %client.auth_method(),
            kv_version = %client.kv_version,
            "Vault client initialized"
        );

        Ok(client)
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn vault_url(&self) -> &str {
        &self.base_url
    }

    pub fn kv_version(&self) -> KvVersion {
        self.kv_version
    }

    pub fn auth_method(&self) -> AuthMethod {
        match self.credentials {
            Credentials::Token => AuthMethod::Token,
            Credentials::AppRole { .. } => AuthMethod::AppRole,
        }
    }

    /// Read the key/value map stored at `path`.
    ///
    /// `version` is only sent to KV v2 mounts.
    pub async fn read_secret(
        &self,
        path: &str,
        version: Option<u64>,
    ) -> Result<Map<String, Value>> {
        let path = path.trim_matches('/');
        debug!(
            instance = %self.instance_name,
            path = %path,
            version = ?version,
            "Reading Vault secret"
        );

        let response = match self.kv_version {
            KvVersion::V2 => {
                let query: Vec<(&str, String)> =
                    version.map(|v| vec![("version", v.to_string())]).unwrap_or_default();
                let api_path = format!("/v1/{}/data/{}", self.mount_point, path);
                let response = self.request(Method::GET, &api_path, &query, None).await?;
                response.get("data").and_then(|d| d.get("data")).cloned()
            }
            KvVersion::V1 => {
                let api_path = format!("/v1/{}/{}", self.mount_point, path);
                let response = self.request(Method::GET, &api_path, &[], None).await?;
                response.get("data").cloned()
            }
        };

        Ok(match response {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        })
    }

    /// Write `data` at `path` and return the response's `data` object.
    pub async fn write_secret(
        &self,
        path: &str,
        data: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let path = path.trim_matches('/');
        let (api_path, payload) = match self.kv_version {
            KvVersion::V2 => {
                (format!("/v1/{}/data/{}", self.mount_point, path), json!({ "data": data }))
            }
            KvVersion::V1 => {
                (format!("/v1/{}/{}", self.mount_point, path), Value::Object(data.clone()))
            }
        };

        let response = self.request(Method::POST, &api_path, &[], Some(&payload)).await?;
        info!(instance = %self.instance_name, path = %path, "Wrote Vault secret");

        Ok(match response.get("data") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        })
    }

    /// List the keys under `path`.
    pub async fn list_secrets(&self, path: &str) -> Result<Vec<String>> {
        let path = path.trim_matches('/');
        let api_path = match self.kv_version {
            KvVersion::V2 => format!("/v1/{}/metadata/{}", self.mount_point, path),
            KvVersion::V1 => format!("/v1/{}/{}", self.mount_point, path),
        };

        let query = [("list", "true".to_string())];
        let response = self.request(Method::GET, &api_path, &query, None).await?;

        let keys = response
            .get("data")
            .and_then(|d| d.get("keys"))
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(|k| k.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Ok(keys)
    }

    /// Probe `/v1/sys/health`. Failures are reported in the record, never raised.
    pub async fn health_check(&self) -> VaultHealth {
        let mut health = VaultHealth {
            instance_name: self.instance_name.clone(),
            vault_url: self.base_url.clone(),
            healthy: false,
            initialized: None,
            sealed: None,
            version: None,
            error: None,
        };

        match self.send(Method::GET, "/v1/sys/health", &[], None, None).await {
            Ok(response) => {
                let flag = |name: &str| response.get(name).and_then(Value::as_bool);
                health.healthy = true;
                health.initialized = Some(flag("initialized").unwrap_or(false));
                health.sealed = Some(flag("sealed").unwrap_or(true));
                health.version = Some(
                    response.get("version").and_then(Value::as_str).unwrap_or("unknown").to_string(),
                );
            }
            Err(e) => {
                warn!(instance = %self.instance_name, error = %e, "Vault health check failed");
                health.error = Some(e.to_string());
            }
        }

        health
    }

    /// Resolve a `path[#key][@version]` reference against this instance.
    pub async fn resolve_secret_reference(&self, composite: &str) -> Result<Value> {
        let locator = SecretLocator::parse(composite)?;
        self.resolve_locator(&locator).await
    }

    /// Read the secret a locator names; the whole map when it has no key.
    pub async fn resolve_locator(&self, locator: &SecretLocator) -> Result<Value> {
        let mut secret = self.read_secret(&locator.path, locator.version).await?;

        match &locator.key {
            None => Ok(Value::Object(secret)),
            Some(key) => secret.remove(key).ok_or_else(|| {
                ResolverError::not_found(format!(
                    "Key '{}' not found in secret at path '{}' in instance '{}'",
                    key, locator.path, self.instance_name
                ))
            }),
        }
    }

    /// Authenticated request with token freshness handling.
    async fn request(
        &self,
        method: Method,
        api_path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        self.refresh_if_stale().await?;

        let (token, generation) = self.current_token().await;
        match self.send(method.clone(), api_path, query, body, Some(&token)).await {
            Err(e) if e.status() == Some(403) && self.auth_method() == AuthMethod::AppRole => {
                warn!(
                    instance = %self.instance_name,
                    path = %api_path,
                    "Vault returned 403, re-authenticating once"
                );
                // Another request may already have replaced the rejected token
                self.login_if(|state| state.generation == generation).await?;
                let (token, _) = self.current_token().await;
                self.send(method, api_path, query, body, Some(&token)).await
            }
            other => other,
        }
    }

    async fn current_token(&self) -> (SecretString, u64) {
        let state = self.token.read().await;
        (state.token.clone(), state.generation)
    }

    async fn send(
        &self,
        method: Method,
        api_path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: Option<&SecretString>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, api_path);
        let mut request = self.http.request(method, &url).header(CONTENT_TYPE, "application/json");

        if let Some(token) = token {
            request = request.header(TOKEN_HEADER, token.expose_secret());
        }
        if let Some(namespace) = &self.namespace {
            request = request.header(NAMESPACE_HEADER, namespace);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            ResolverError::connection(
                &self.instance_name,
                format!("Vault connection error: {}", e),
                Box::new(e),
            )
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ResolverError::connection(
                &self.instance_name,
                format!("Failed to read Vault response body: {}", e),
                Box::new(e),
            )
        })?;

        if status.is_client_error() || status.is_server_error() {
            return Err(ResolverError::http_status(
                &self.instance_name,
                status.as_u16(),
                error_message(status, &text),
            ));
        }

        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }

        serde_json::from_str(&text).map_err(|e| {
            ResolverError::serialization(
                format!("Invalid JSON in response from Vault instance '{}'", self.instance_name),
                e,
            )
        })
    }

    async fn refresh_if_stale(&self) -> Result<()> {
        if !self.token.read().await.is_stale() {
            return Ok(());
        }
        debug!(instance = %self.instance_name, "Vault token lease nearly expired, logging in again");
        self.login_if(TokenState::is_stale).await
    }

    /// Exchange AppRole credentials for a fresh token, unless `needs_login`
    /// no longer holds once the token lock is taken.
    async fn login_if(&self, needs_login: impl FnOnce(&TokenState) -> bool) -> Result<()> {
        let Credentials::AppRole { role_id, secret_id } = &self.credentials else {
            return Ok(());
        };

        let mut state = self.token.write().await;
        if !needs_login(&state) {
            debug!(instance = %self.instance_name, "Vault token already replaced, skipping login");
            return Ok(());
        }
        let body = json!({
            "role_id": role_id.expose_secret(),
            "secret_id": secret_id.expose_secret(),
        });

        let response = self
            .send(Method::POST, "/v1/auth/approle/login", &[], Some(&body), None)
            .await
            .map_err(|e| match e {
                ResolverError::Transport { status: Some(_), message, .. } => {
                    ResolverError::authentication(&self.instance_name, message)
                }
                other => other,
            })?;

        let auth = response.get("auth");
        let token = auth
            .and_then(|a| a.get("client_token"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ResolverError::authentication(
                    &self.instance_name,
                    "AppRole login response did not include a client token",
                )
            })?;
        let lease = auth.and_then(|a| a.get("lease_duration")).and_then(Value::as_u64).unwrap_or(0);

        let generation = state.generation + 1;
        *state = TokenState {
            token: SecretString::new(token),
            refresh_at: refresh_deadline(lease),
            generation,
        };
        info!(
            instance = %self.instance_name,
            lease_seconds = lease,
            "AppRole authentication succeeded"
        );

        Ok(())
    }
}

/// When to log in again for a lease of `lease_seconds`. `None` for non-expiring
/// tokens and for leases too long to represent as an `Instant`.
fn refresh_deadline(lease_seconds: u64) -> Option<Instant> {
    if lease_seconds == 0 {
        return None;
    }
    let lease = Duration::from_secs(lease_seconds);
    let margin = (lease / 10).min(MAX_REFRESH_MARGIN);
    Instant::now().checked_add(lease - margin)
}

#[derive(Deserialize)]
struct VaultErrorBody {
    errors: Vec<String>,
}

/// Vault's `errors` list joined, or the raw body when it is not a Vault error document.
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<VaultErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join(", "),
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => status.canonical_reason().unwrap_or("request failed").to_string(),
    }
}
