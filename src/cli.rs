//! CLI definition using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rc")]
#[command(version)]
#[command(about = "Provision RunCloud web applications and local reverse proxies")]
#[command(long_about = r#"
RC - RunCloud provisioning tool

Commands:
  create   Create a WordPress or custom web app on a RunCloud server,
           then optionally tune PHP, install RunCloud Hub and request SSL
  proxy    Register an nginx reverse proxy for a local port (run as root)

Setup:
  RUNCLOUD_API_KEY and RUNCLOUD_SERVER_ID must be set in the environment
  or in a .env file in the project directory (RC_PROJECT_DIR).
"#)]
#[command(after_help = r#"
Examples:

  Create a WordPress site with cache and SSL:
    rc create --domain blog.example.com --name blog

  Create a custom PHP app owned by system user 42, no SSL:
    rc create --domain app.example.com --name app --type custom --owner-id 42 --install-ssl=false

  Register a reverse proxy for a Node app:
    sudo rc proxy --site api.example.com
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Machine output mode (JSON Lines)
    #[arg(long, global = true)]
    pub agent: bool,

    /// Show debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create and configure a web application on a RunCloud server
    Create(CreateArgs),

    /// Register an nginx reverse proxy to 127.0.0.1:<port>
    Proxy(ProxyArgs),
}

// ============ Create ============

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AppType {
    Wordpress,
    Custom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PhpVersion {
    #[value(name = "7.4")]
    Php74,
    #[value(name = "8.0")]
    Php80,
    #[value(name = "8.1")]
    Php81,
    #[value(name = "8.2")]
    Php82,
    #[value(name = "8.3")]
    Php83,
}

impl PhpVersion {
    /// Version token understood by the RunCloud API
    pub fn api_token(self) -> &'static str {
        match self {
            PhpVersion::Php74 => "php74rc",
            PhpVersion::Php80 => "php80rc",
            PhpVersion::Php81 => "php81rc",
            PhpVersion::Php82 => "php82rc",
            PhpVersion::Php83 => "php83rc",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Stack {
    /// Native nginx
    Nginx,
    /// nginx in front of Apache
    Apache,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CacheType {
    Native,
    Redis,
}

impl CacheType {
    pub fn api_token(self) -> &'static str {
        match self {
            CacheType::Native => "native",
            CacheType::Redis => "redis-full-page-cache",
        }
    }
}

#[derive(Args, Debug, Default)]
#[command(after_help = "Examples:
  rc create --domain blog.example.com --name blog
  rc create --domain blog.example.com --name blog --cache-type redis --object-cache
  rc create --domain app.example.com --name app --type custom --owner-id 42")]
pub struct CreateArgs {
    /// Domain name of the web application
    #[arg(short, long)]
    pub domain: String,

    /// Web application name
    #[arg(short, long)]
    pub name: String,

    /// Application type
    #[arg(short = 't', long = "type", value_enum)]
    pub app_type: Option<AppType>,

    /// WordPress admin username [env: RUNCLOUD_ADMIN_USER, default: admin]
    #[arg(long)]
    pub admin_user: Option<String>,

    /// WordPress admin password (generated when unset) [env: RUNCLOUD_ADMIN_PASSWORD]
    #[arg(long)]
    pub admin_password: Option<String>,

    /// WordPress admin email [env: RUNCLOUD_ADMIN_EMAIL, default: admin@<domain>]
    #[arg(long)]
    pub admin_email: Option<String>,

    /// System user id that owns the app (required for custom apps) [env: RUNCLOUD_OWNER_ID]
    #[arg(long)]
    pub owner_id: Option<String>,

    /// PHP version
    #[arg(long, value_enum)]
    pub php: Option<PhpVersion>,

    /// Web server stack (custom apps always use custom nginx)
    #[arg(long, value_enum)]
    pub stack: Option<Stack>,

    /// Install RunCloud Hub cache plugin (WordPress only) [env: RUNCLOUD_INSTALL_CACHE]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub install_cache: Option<bool>,

    /// RunCloud Hub cache type [env: RUNCLOUD_CACHE_TYPE]
    #[arg(long, value_enum)]
    pub cache_type: Option<CacheType>,

    /// Enable Redis object cache in RunCloud Hub [env: RUNCLOUD_OBJECT_CACHE]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub object_cache: Option<bool>,

    /// Request a Let's Encrypt certificate [env: RUNCLOUD_INSTALL_SSL]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub install_ssl: Option<bool>,

    /// Clear PHP disable_functions (WordPress only) [env: RUNCLOUD_UNRESTRICT_PHP]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub unrestrict_php: Option<bool>,
}

// ============ Proxy ============

#[derive(Args, Debug)]
#[command(after_help = "Examples:
  sudo rc proxy --site api.example.com
  sudo rc proxy --site api.example.com --port 3005")]
pub struct ProxyArgs {
    /// Site name (server_name and file name)
    #[arg(short, long)]
    pub site: String,

    /// Local port to proxy to (next free port when unset)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// nginx fragment directory
    #[arg(long, default_value = crate::proxy::DEFAULT_CONF_DIR)]
    pub conf_dir: PathBuf,
}
