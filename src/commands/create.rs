//! `rc create` - provision a web application

use anyhow::Result;

use crate::api::ApiClient;
use crate::cli::CreateArgs;
use crate::config::{self, Config};
use crate::output::{Output, PebbleError};
use crate::provision::{ProvisionError, Provisioner};

pub async fn run(args: CreateArgs, out: &Output) -> Result<()> {
    config::load_env()?;
    let env = config::env_snapshot();

    let config = match Config::resolve(&args, &env) {
        Ok(config) => config,
        Err(e) => out.error(PebbleError::input("CONFIG", &e.to_string()).with_op("create")),
    };
    out.debug(&format!("API base {}", config.api_base));

    let client = ApiClient::new(&config);
    let report = match Provisioner::new(&client, out).run(&config).await {
        Ok(report) => report,
        Err(ProvisionError::Create(e)) => out.error(
            e.to_pebble("create")
                .with_details(serde_json::json!({"domain": config.domain, "name": config.name})),
        ),
    };

    out.result(serde_json::json!({
        "success": true,
        "report": report,
        "admin": config.is_wordpress().then(|| serde_json::json!({
            "user": config.admin.user,
            "password": config.admin.password,
            "email": config.admin.email,
            "generated_password": config.admin.generated_password,
        })),
    }));

    Ok(())
}
