//! nginx reverse proxy registration for local services

use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tokio::task::JoinSet;

use crate::output::Output;

pub const DEFAULT_CONF_DIR: &str = "/etc/nginx/conf.d";
/// Fragments are named `<site>.proxy.conf`
pub const FRAGMENT_SUFFIX: &str = "proxy.conf";
/// Used when no existing fragment names a port
pub const BASE_PORT: u16 = 3000;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("must be run as root")]
    NotRoot,

    #[error("invalid site name '{0}'")]
    InvalidSite(String),

    #[error("proxy config already exists: {0}")]
    AlreadyExists(String),

    #[error("no free port after {0}")]
    PortsExhausted(u16),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("nginx config test failed, removed {path}:\n{diagnostics}")]
    CheckFailed { path: String, diagnostics: String },

    #[error("nginx reload failed: {0}")]
    ReloadFailed(String),
}

/// Program plus arguments run as a side effect
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Ok(()) on exit status 0, otherwise the combined output
    fn run(&self) -> Result<(), String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.display(), e))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let diagnostics = [stderr.trim(), stdout.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        if diagnostics.is_empty() {
            Err(format!("{} exited with {}", self.display(), output.status))
        } else {
            Err(diagnostics)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub site: String,
    pub port: u16,
    pub path: PathBuf,
}

pub struct ProxyRegistrar {
    conf_dir: PathBuf,
    check: ExternalCommand,
    reload: ExternalCommand,
}

impl ProxyRegistrar {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
            check: ExternalCommand::new("nginx", &["-t"]),
            reload: ExternalCommand::new("systemctl", &["reload", "nginx"]),
        }
    }

    #[cfg(test)]
    pub fn with_commands(mut self, check: ExternalCommand, reload: ExternalCommand) -> Self {
        self.check = check;
        self.reload = reload;
        self
    }

    pub fn fragment_path(&self, site: &str) -> PathBuf {
        self.conf_dir.join(format!("{}.{}", site, FRAGMENT_SUFFIX))
    }

    /// One past the highest port found in existing fragments
    pub async fn next_port(&self, out: &Output) -> Result<u16, ProxyError> {
        let mut entries = match tokio::fs::read_dir(&self.conf_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                out.debug(&format!("{} does not exist, using base port", self.conf_dir.display()));
                return Ok(BASE_PORT);
            }
            Err(source) => {
                return Err(ProxyError::Io {
                    context: format!("failed to read {}", self.conf_dir.display()),
                    source,
                })
            }
        };

        let suffix = format!(".{}", FRAGMENT_SUFFIX);
        let mut reads = JoinSet::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| ProxyError::Io {
            context: format!("failed to list {}", self.conf_dir.display()),
            source,
        })? {
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix));
            if matches {
                reads.spawn(async move {
                    let port = tokio::fs::read_to_string(&path)
                        .await
                        .ok()
                        .and_then(|content| first_port(&content));
                    (path, port)
                });
            }
        }

        let mut highest: Option<u16> = None;
        while let Some(joined) = reads.join_next().await {
            let Ok((path, port)) = joined else { continue };
            if let Some(port) = port {
                out.debug(&format!("{} uses port {}", path.display(), port));
                highest = Some(highest.map_or(port, |h| h.max(port)));
            }
        }

        match highest {
            None => Ok(BASE_PORT),
            Some(port) => port.checked_add(1).ok_or(ProxyError::PortsExhausted(port)),
        }
    }

    /// Write the fragment, test nginx, reload it
    pub async fn register(
        &self,
        site: &str,
        port: Option<u16>,
        out: &Output,
    ) -> Result<ProxyEntry, ProxyError> {
        validate_site(site)?;

        let path = self.fragment_path(site);
        if path.exists() {
            return Err(ProxyError::AlreadyExists(path.display().to_string()));
        }

        let port = match port {
            Some(port) => port,
            None => self.next_port(out).await?,
        };
        out.progress(25, &format!("Proxying {} to 127.0.0.1:{}", site, port));

        tokio::fs::create_dir_all(&self.conf_dir)
            .await
            .map_err(|source| ProxyError::Io {
                context: format!("failed to create {}", self.conf_dir.display()),
                source,
            })?;
        tokio::fs::write(&path, render_fragment(site, port))
            .await
            .map_err(|source| ProxyError::Io {
                context: format!("failed to write {}", path.display()),
                source,
            })?;
        out.progress(50, &format!("Wrote {}", path.display()));

        if let Err(diagnostics) = self.check.run() {
            remove_fragment(&path, out).await;
            return Err(ProxyError::CheckFailed {
                path: path.display().to_string(),
                diagnostics,
            });
        }
        out.progress(75, "nginx configuration test passed");

        self.reload.run().map_err(ProxyError::ReloadFailed)?;
        out.progress(100, "nginx reloaded");

        Ok(ProxyEntry {
            site: site.to_string(),
            port,
            path,
        })
    }
}

async fn remove_fragment(path: &Path, out: &Output) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        out.warn(&format!("Failed to remove {}: {}", path.display(), e));
    }
}

fn port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"127\.0\.0\.1:(\d+)").expect("valid port pattern"))
}

/// Port of the first `127.0.0.1:<port>` in a fragment
fn first_port(content: &str) -> Option<u16> {
    let caps = port_pattern().captures(content)?;
    caps.get(1)?.as_str().parse().ok()
}

fn validate_site(site: &str) -> Result<(), ProxyError> {
    let valid = !site.is_empty()
        && !site.starts_with('.')
        && site
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(ProxyError::InvalidSite(site.to_string()))
    }
}

pub fn render_fragment(site: &str, port: u16) -> String {
    format!(
        r#"server {{
    listen 80;
    server_name {site};

    location / {{
        proxy_pass http://127.0.0.1:{port};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }}
}}
"#,
        site = site,
        port = port
    )
}

#[cfg(unix)]
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}
