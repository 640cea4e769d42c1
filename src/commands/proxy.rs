//! `rc proxy` - register an nginx reverse proxy

use anyhow::Result;
use serde_json::json;

use crate::cli::ProxyArgs;
use crate::output::{Output, PebbleError};
use crate::proxy::{self, ProxyError, ProxyRegistrar};

pub async fn run(args: ProxyArgs, out: &Output) -> Result<()> {
    if !proxy::is_root() {
        out.error(
            PebbleError::input("NOT_ROOT", &ProxyError::NotRoot.to_string())
                .with_op("proxy")
                .with_fix("Run again with sudo"),
        );
    }

    out.info(&format!("Registering reverse proxy for {}", args.site));
    let registrar = ProxyRegistrar::new(&args.conf_dir);

    match registrar.register(&args.site, args.port, out).await {
        Ok(entry) => {
            out.summary(
                "Reverse proxy ready",
                &[
                    ("Site", entry.site.clone()),
                    ("Target", format!("127.0.0.1:{}", entry.port)),
                    ("Config", entry.path.display().to_string()),
                ],
            );
            out.result(json!({
                "success": true,
                "site": entry.site,
                "port": entry.port,
                "path": entry.path,
            }));
            Ok(())
        }
        Err(e) => {
            let err = match &e {
                ProxyError::InvalidSite(_) | ProxyError::AlreadyExists(_) => {
                    PebbleError::input("INVALID_SITE", &e.to_string())
                }
                ProxyError::CheckFailed { .. } => PebbleError::ext("NGINX_INVALID", &e.to_string())
                    .with_fix("Fix the nginx configuration reported above and run again"),
                ProxyError::ReloadFailed(_) => PebbleError::ext("NGINX_RELOAD_FAILED", &e.to_string())
                    .with_fix("Check `systemctl status nginx`; the new config file was kept"),
                _ => PebbleError::sys("PROXY_FAILED", &e.to_string()),
            };
            out.error(err.with_op("proxy").with_details(json!({"site": args.site})))
        }
    }
}
