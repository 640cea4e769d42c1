//! RunCloud API client

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::error::Error as _;

use crate::config::{CacheConfig, Config};
use crate::generate::DatabaseCredentials;
use crate::output::PebbleError;

const HUB_CACHE_FOLDER_SIZE: u32 = 50;
const HUB_CACHE_VALID_MINUTES: u32 = 480;
const STACK_MODE: &str = "production";
const TABLE_PREFIX: &str = "wp_";

// ============ Errors ============

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication failed (401): {0}")]
    Unauthorized(String),

    #[error("permission denied (403): {0}")]
    Forbidden(String),

    #[error("request rejected (422): {message}{}", format_fields(.fields))]
    Validation {
        message: String,
        fields: Vec<(String, String)>,
    },

    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network unreachable, could not resolve the API host: {0}")]
    Unreachable(String),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("could not parse API response: {0}")]
    Decode(String),

    #[error("API response did not contain an application id")]
    MissingId,
}

fn format_fields(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(field, message)| format!("\n  - {}: {}", field, message))
        .collect()
}

impl ApiError {
    /// Map a non-success status and its JSON body to an error
    pub fn from_status(status: StatusCode, body: &Value) -> Self {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("no message").to_string());

        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized(message),
            StatusCode::FORBIDDEN => ApiError::Forbidden(message),
            StatusCode::UNPROCESSABLE_ENTITY => ApiError::Validation {
                message,
                fields: field_errors(body),
            },
            _ => ApiError::Status {
                status: status.as_u16(),
                message,
            },
        }
    }

    fn from_transport(err: reqwest::Error) -> Self {
        if host_unresolved(&err) {
            ApiError::Unreachable(err.to_string())
        } else {
            ApiError::Transport(err)
        }
    }

    /// Actionable hint shown next to the error
    pub fn hint(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "Check that RUNCLOUD_API_KEY is a valid API key",
            ApiError::Forbidden(_) => "Grant the API key access to this server",
            ApiError::Validation { .. } => "Fix the rejected fields and run again",
            ApiError::Status { .. } => "Check the RunCloud dashboard for the app state",
            ApiError::Unreachable(_) | ApiError::Transport(_) => {
                "Check your network connection and RUNCLOUD_API_BASE"
            }
            ApiError::Decode(_) | ApiError::MissingId => "Check RUNCLOUD_API_BASE points at the v3 API",
        }
    }

    pub fn to_pebble(&self, op: &str) -> PebbleError {
        let message = self.to_string();
        let err = match self {
            ApiError::Unauthorized(_) => PebbleError::auth("UNAUTHORIZED", &message),
            ApiError::Forbidden(_) => PebbleError::auth("FORBIDDEN", &message),
            ApiError::Validation { fields, .. } => PebbleError::ext("VALIDATION", &message)
                .with_details(
                    fields
                        .iter()
                        .map(|(f, m)| json!({"field": f, "message": m}))
                        .collect::<Vec<_>>(),
                ),
            ApiError::Status { status, .. } => {
                PebbleError::ext("API_ERROR", &message).with_details(json!({"status": status}))
            }
            ApiError::Unreachable(_) => PebbleError::net("UNREACHABLE", &message),
            ApiError::Transport(_) => PebbleError::net("TRANSPORT", &message),
            ApiError::Decode(_) | ApiError::MissingId => PebbleError::ext("BAD_RESPONSE", &message),
        };
        err.with_op(op).with_fix(self.hint())
    }
}

/// Flatten `{"errors": {"field": ["msg", ...]}}` into (field, message) pairs
fn field_errors(body: &Value) -> Vec<(String, String)> {
    let Some(errors) = body.get("errors").and_then(Value::as_object) else {
        return Vec::new();
    };
    errors
        .iter()
        .map(|(field, messages)| {
            let message = match messages {
                Value::Array(list) => list
                    .iter()
                    .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
                    .collect::<Vec<_>>()
                    .join("; "),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (field.clone(), message)
        })
        .collect()
}

fn host_unresolved(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string().to_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("nodename nor servname")
        {
            return true;
        }
        source = cause.source();
    }
    false
}

// ============ Payloads ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordpressPayload {
    pub name: String,
    pub domain_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<u64>,
    pub php_version: String,
    pub stack: String,
    pub stack_mode: String,
    pub site_title: String,
    pub admin_username: String,
    pub password: String,
    pub email: String,
    pub database_name: String,
    pub database_user: String,
    pub database_password: String,
    pub database_prefix: String,
}

impl WordpressPayload {
    pub fn new(config: &Config, db: &DatabaseCredentials) -> Self {
        Self {
            name: config.name.clone(),
            domain_name: config.domain.clone(),
            user: config.owner_id(),
            php_version: config.php.api_token().to_string(),
            stack: config.stack_token().to_string(),
            stack_mode: STACK_MODE.to_string(),
            site_title: config.name.clone(),
            admin_username: config.admin.user.clone(),
            password: config.admin.password.clone(),
            email: config.admin.email.clone(),
            database_name: db.name.clone(),
            database_user: db.user.clone(),
            database_password: db.password.clone(),
            database_prefix: TABLE_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomAppPayload {
    pub name: String,
    pub domain_name: String,
    pub user: u64,
    pub php_version: String,
    pub stack: String,
    pub stack_mode: String,
    pub disable_functions: String,
    pub allow_url_fopen: bool,
}

impl CustomAppPayload {
    pub fn new(config: &Config, owner_id: u64) -> Self {
        Self {
            name: config.name.clone(),
            domain_name: config.domain.clone(),
            user: owner_id,
            php_version: config.php.api_token().to_string(),
            stack: config.stack_token().to_string(),
            stack_mode: STACK_MODE.to_string(),
            disable_functions: String::new(),
            allow_url_fopen: true,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HubPayload {
    cache_type: &'static str,
    redis_object_cache: bool,
    cache_folder_size: u32,
    cache_valid_minutes: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SslPayload {
    provider: &'static str,
    authorization_method: &'static str,
    environment: &'static str,
    redirect_https: bool,
    enable_hsts: bool,
    auto_renew: bool,
}

const SSL_POLICY: SslPayload = SslPayload {
    provider: "letsencrypt",
    authorization_method: "http-01",
    environment: "live",
    redirect_https: false,
    enable_hsts: false,
    auto_renew: false,
};

// ============ Responses ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct RawDomain {
    id: Value,
    name: String,
}

/// Application id at `id` or `data.id`, as string or number
fn extract_id(body: &Value) -> Option<String> {
    let id = body
        .get("id")
        .or_else(|| body.get("data").and_then(|d| d.get("id")))?;
    id_string(id)
}

fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Domain list as a bare array or wrapped in `data`
fn parse_domains(body: Value) -> Result<Vec<Domain>, ApiError> {
    let list = match body {
        Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
        other => other,
    };
    let raw: Vec<RawDomain> =
        serde_json::from_value(list).map_err(|e| ApiError::Decode(e.to_string()))?;
    raw.into_iter()
        .map(|d| {
            let id = id_string(&d.id)
                .ok_or_else(|| ApiError::Decode(format!("domain {} has no id", d.name)))?;
            Ok(Domain { id, name: d.name })
        })
        .collect()
}

// ============ Client ============

/// One method per remote operation used by the provisioner
#[async_trait]
pub trait RunCloudApi: Send + Sync {
    /// Returns the new application id
    async fn create_wordpress(&self, payload: &WordpressPayload) -> Result<String, ApiError>;

    /// Returns the new application id
    async fn create_custom(&self, payload: &CustomAppPayload) -> Result<String, ApiError>;

    async fn install_cache_plugin(&self, app_id: &str, cache: CacheConfig) -> Result<(), ApiError>;

    async fn list_domains(&self, app_id: &str) -> Result<Vec<Domain>, ApiError>;

    async fn request_certificate(&self, app_id: &str, domain_id: &str) -> Result<(), ApiError>;

    async fn patch_settings(&self, app_id: &str, settings: &Value) -> Result<(), ApiError>;
}

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
    server_id: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            server_id: config.server_id.clone(),
        }
    }

    fn app_path(&self, app_id: &str, rest: &str) -> String {
        format!("/servers/{}/webapps/{}{}", self.server_id, app_id, rest)
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base, path);

        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(body) = body {
            if method != Method::GET {
                req = req.json(body);
            }
        }

        let resp = req.send().await.map_err(ApiError::from_transport)?;
        let status = resp.status();
        let text = resp.text().await.map_err(ApiError::from_transport)?;

        if !status.is_success() {
            let body = serde_json::from_str(&text).unwrap_or(Value::Null);
            return Err(ApiError::from_status(status, &body));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RunCloudApi for ApiClient {
    async fn create_wordpress(&self, payload: &WordpressPayload) -> Result<String, ApiError> {
        let path = format!("/servers/{}/webapps/wordpress", self.server_id);
        let body = self.request(Method::POST, &path, Some(payload)).await?;
        extract_id(&body).ok_or(ApiError::MissingId)
    }

    async fn create_custom(&self, payload: &CustomAppPayload) -> Result<String, ApiError> {
        let path = format!("/servers/{}/webapps", self.server_id);
        let body = self.request(Method::POST, &path, Some(payload)).await?;
        extract_id(&body).ok_or(ApiError::MissingId)
    }

    async fn install_cache_plugin(&self, app_id: &str, cache: CacheConfig) -> Result<(), ApiError> {
        let payload = HubPayload {
            cache_type: cache.cache_type.api_token(),
            redis_object_cache: cache.object_cache,
            cache_folder_size: HUB_CACHE_FOLDER_SIZE,
            cache_valid_minutes: HUB_CACHE_VALID_MINUTES,
        };
        self.request(Method::POST, &self.app_path(app_id, "/runcloudhub"), Some(&payload))
            .await?;
        Ok(())
    }

    async fn list_domains(&self, app_id: &str) -> Result<Vec<Domain>, ApiError> {
        let body = self
            .request::<Value>(Method::GET, &self.app_path(app_id, "/domains"), None)
            .await?;
        parse_domains(body)
    }

    async fn request_certificate(&self, app_id: &str, domain_id: &str) -> Result<(), ApiError> {
        let path = self.app_path(app_id, &format!("/domains/{}/ssl", domain_id));
        self.request(Method::POST, &path, Some(&SSL_POLICY)).await?;
        Ok(())
    }

    async fn patch_settings(&self, app_id: &str, settings: &Value) -> Result<(), ApiError> {
        let path = self.app_path(app_id, "/settings/fpmnginx");
        self.request(Method::PATCH, &path, Some(settings)).await?;
        Ok(())
    }
}
