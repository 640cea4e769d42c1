//! Configuration loading (.env + environment + flags)

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::cli::{AppType, CacheType, CreateArgs, PhpVersion, Stack};
use crate::generate;

pub const DEFAULT_API_BASE: &str = "https://manage.runcloud.io/api/v3";

pub const ENV_API_KEY: &str = "RUNCLOUD_API_KEY";
pub const ENV_SERVER_ID: &str = "RUNCLOUD_SERVER_ID";
pub const ENV_API_BASE: &str = "RUNCLOUD_API_BASE";
pub const ENV_OWNER_ID: &str = "RUNCLOUD_OWNER_ID";
pub const ENV_ADMIN_USER: &str = "RUNCLOUD_ADMIN_USER";
pub const ENV_ADMIN_PASSWORD: &str = "RUNCLOUD_ADMIN_PASSWORD";
pub const ENV_ADMIN_EMAIL: &str = "RUNCLOUD_ADMIN_EMAIL";
pub const ENV_INSTALL_CACHE: &str = "RUNCLOUD_INSTALL_CACHE";
pub const ENV_INSTALL_SSL: &str = "RUNCLOUD_INSTALL_SSL";
pub const ENV_UNRESTRICT_PHP: &str = "RUNCLOUD_UNRESTRICT_PHP";
pub const ENV_CACHE_TYPE: &str = "RUNCLOUD_CACHE_TYPE";
pub const ENV_OBJECT_CACHE: &str = "RUNCLOUD_OBJECT_CACHE";

const DEFAULT_ADMIN_USER: &str = "admin";
const DEFAULT_INSTALL_CACHE: bool = true;
const DEFAULT_INSTALL_SSL: bool = true;
const DEFAULT_UNRESTRICT_PHP: bool = false;
const DEFAULT_OBJECT_CACHE: bool = false;

/// Stack token forced for custom applications
const CUSTOM_STACK: &str = "customnginx";

/// Snapshot of environment variables the resolver reads from
pub type EnvMap = HashMap<String, String>;

/// Project directory (where .env is)
pub fn project_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RC_PROJECT_DIR") {
        return PathBuf::from(dir);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Load .env into the process environment if one exists
pub fn load_env() -> Result<()> {
    let env_path = project_dir().join(".env");
    if !env_path.exists() {
        return Ok(());
    }
    dotenvy::from_path(&env_path)
        .with_context(|| format!("Failed to load .env from {:?}", env_path))?;
    Ok(())
}

/// Capture the process environment once, after .env has been loaded
pub fn env_snapshot() -> EnvMap {
    std::env::vars().collect()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing API key: set RUNCLOUD_API_KEY")]
    MissingApiKey,

    #[error("missing server id: set RUNCLOUD_SERVER_ID")]
    MissingServerId,

    #[error("custom apps need an owner: pass --owner-id or set RUNCLOUD_OWNER_ID")]
    MissingOwnerId,

    #[error("owner id must be a positive integer, got '{0}'")]
    InvalidOwnerId(String),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub user: String,
    pub password: String,
    pub email: String,
    /// Password was generated rather than supplied
    pub generated_password: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub cache_type: CacheType,
    pub object_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub install_cache: bool,
    pub install_ssl: bool,
    pub unrestrict_php: bool,
}

/// Application type with the owner it requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    Wordpress { owner_id: Option<u64> },
    Custom { owner_id: u64 },
}

/// Fully resolved configuration for one `create` run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_key: String,
    pub server_id: String,
    pub api_base: String,
    pub app: AppKind,
    pub domain: String,
    pub name: String,
    pub admin: AdminCredentials,
    pub php: PhpVersion,
    pub stack: Stack,
    pub features: Features,
    pub cache: CacheConfig,
}

impl Config {
    /// Flags first, then environment, then defaults
    pub fn resolve(args: &CreateArgs, env: &EnvMap) -> Result<Self, ConfigError> {
        let api_key = resolve_string(None, env, ENV_API_KEY).ok_or(ConfigError::MissingApiKey)?;
        let server_id =
            resolve_string(None, env, ENV_SERVER_ID).ok_or(ConfigError::MissingServerId)?;
        let api_base = resolve_string(None, env, ENV_API_BASE)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let owner_id = match resolve_string(args.owner_id.clone(), env, ENV_OWNER_ID) {
            Some(raw) => Some(parse_owner_id(&raw)?),
            None => None,
        };
        let app = match args.app_type.unwrap_or(AppType::Wordpress) {
            AppType::Wordpress => AppKind::Wordpress { owner_id },
            AppType::Custom => AppKind::Custom {
                owner_id: owner_id.ok_or(ConfigError::MissingOwnerId)?,
            },
        };

        let admin_user = resolve_string(args.admin_user.clone(), env, ENV_ADMIN_USER)
            .unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string());
        let (admin_password, generated_password) =
            match resolve_string(args.admin_password.clone(), env, ENV_ADMIN_PASSWORD) {
                Some(password) => (password, false),
                None => (generate::admin_password(), true),
            };
        let admin_email = resolve_string(args.admin_email.clone(), env, ENV_ADMIN_EMAIL)
            .unwrap_or_else(|| format!("admin@{}", args.domain));

        let cache_type = match args.cache_type {
            Some(cache_type) => cache_type,
            None => match resolve_string(None, env, ENV_CACHE_TYPE) {
                Some(raw) => CacheType::from_str(raw.trim(), true).map_err(|_| {
                    ConfigError::InvalidValue {
                        key: ENV_CACHE_TYPE.to_string(),
                        value: raw.clone(),
                    }
                })?,
                None => CacheType::Native,
            },
        };

        Ok(Self {
            api_key,
            server_id,
            api_base,
            app,
            domain: args.domain.clone(),
            name: args.name.clone(),
            admin: AdminCredentials {
                user: admin_user,
                password: admin_password,
                email: admin_email,
                generated_password,
            },
            php: args.php.unwrap_or(PhpVersion::Php82),
            stack: args.stack.unwrap_or(Stack::Nginx),
            features: Features {
                install_cache: resolve_bool(
                    args.install_cache,
                    env,
                    ENV_INSTALL_CACHE,
                    DEFAULT_INSTALL_CACHE,
                ),
                install_ssl: resolve_bool(
                    args.install_ssl,
                    env,
                    ENV_INSTALL_SSL,
                    DEFAULT_INSTALL_SSL,
                ),
                unrestrict_php: resolve_bool(
                    args.unrestrict_php,
                    env,
                    ENV_UNRESTRICT_PHP,
                    DEFAULT_UNRESTRICT_PHP,
                ),
            },
            cache: CacheConfig {
                cache_type,
                object_cache: resolve_bool(
                    args.object_cache,
                    env,
                    ENV_OBJECT_CACHE,
                    DEFAULT_OBJECT_CACHE,
                ),
            },
        })
    }

    pub fn is_wordpress(&self) -> bool {
        matches!(self.app, AppKind::Wordpress { .. })
    }

    pub fn app_type(&self) -> AppType {
        match self.app {
            AppKind::Wordpress { .. } => AppType::Wordpress,
            AppKind::Custom { .. } => AppType::Custom,
        }
    }

    pub fn owner_id(&self) -> Option<u64> {
        match self.app {
            AppKind::Wordpress { owner_id } => owner_id,
            AppKind::Custom { owner_id } => Some(owner_id),
        }
    }

    /// Stack token sent to the API
    pub fn stack_token(&self) -> &'static str {
        match (self.app_type(), self.stack) {
            (AppType::Custom, _) => CUSTOM_STACK,
            (AppType::Wordpress, Stack::Nginx) => "nativenginx",
            (AppType::Wordpress, Stack::Apache) => "hybrid",
        }
    }

    /// Site URL, https only once a certificate is in place
    pub fn url(&self, secured: bool) -> String {
        let scheme = if secured { "https" } else { "http" };
        format!("{}://{}", scheme, self.domain)
    }
}

fn resolve_string(cli_value: Option<String>, env: &EnvMap, env_key: &str) -> Option<String> {
    if let Some(value) = cli_value {
        if !value.trim().is_empty() {
            return Some(value);
        }
    }
    env.get(env_key)
        .filter(|value| !value.trim().is_empty())
        .cloned()
}

/// Explicit flag wins; otherwise the env var counts only if it is exactly "true"
fn resolve_bool(cli_value: Option<bool>, env: &EnvMap, env_key: &str, default: bool) -> bool {
    if let Some(value) = cli_value {
        return value;
    }
    match env.get(env_key).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => value == "true",
        _ => default,
    }
}

fn parse_owner_id(raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ConfigError::InvalidOwnerId(raw.to_string())),
    }
}
