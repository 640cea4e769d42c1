//! Web application provisioning sequence
//!
//! Creation is the only fatal step. Everything after it reports a
//! [`StepOutcome`] and the run always reaches the final summary.

use serde::Serialize;
use serde_json::json;
use std::time::Duration;

use crate::api::{ApiError, CustomAppPayload, RunCloudApi, WordpressPayload};
use crate::config::{AppKind, Config};
use crate::generate::{self, DatabaseCredentials};
use crate::output::Output;

/// Wait after creation so the app's files exist before follow-up calls
pub const PROPAGATION_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to create web application: {0}")]
    Create(#[source] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    UnrestrictPhp,
    CachePlugin,
    Certificate,
}

impl Step {
    fn label(self) -> &'static str {
        match self {
            Step::UnrestrictPhp => "PHP unrestriction",
            Step::CachePlugin => "RunCloud Hub install",
            Step::Certificate => "SSL certificate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Done,
    Skipped { reason: String },
    Failed { reason: String, hint: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: Step,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Serialize)]
pub struct ProvisionReport {
    pub app_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub steps: Vec<StepOutcome>,
}

impl ProvisionReport {
    #[cfg(test)]
    pub fn outcome(&self, step: Step) -> Option<&Outcome> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.outcome)
    }
}

pub struct Provisioner<'a> {
    api: &'a dyn RunCloudApi,
    out: &'a Output,
    delay: Duration,
}

impl<'a> Provisioner<'a> {
    pub fn new(api: &'a dyn RunCloudApi, out: &'a Output) -> Self {
        Self {
            api,
            out,
            delay: PROPAGATION_DELAY,
        }
    }

    pub async fn run(&self, config: &Config) -> Result<ProvisionReport, ProvisionError> {
        self.print_config(config);

        self.out.progress(10, &format!("Creating web application {}", config.name));
        let (app_id, database) = self.create(config).await?;
        self.out.info(&format!("Web application created (id {})", app_id));

        let wordpress = config.is_wordpress();
        let features = config.features;
        if features.install_ssl || (wordpress && (features.install_cache || features.unrestrict_php)) {
            self.out.progress(
                30,
                &format!("Waiting {}s for the server to settle", self.delay.as_secs()),
            );
            tokio::time::sleep(self.delay).await;
        }

        let mut steps = Vec::new();

        if wordpress && features.unrestrict_php {
            self.out.progress(45, "Clearing PHP disable_functions");
            let result = self
                .api
                .patch_settings(&app_id, &json!({"disableFunctions": ""}))
                .await;
            steps.push(self.record(Step::UnrestrictPhp, result));
        }

        if !wordpress {
            steps.push(self.skip(Step::CachePlugin, "not available for custom apps"));
        } else if features.install_cache {
            self.out.progress(60, "Installing RunCloud Hub");
            let result = self.api.install_cache_plugin(&app_id, config.cache).await;
            steps.push(self.record(Step::CachePlugin, result));
        } else {
            steps.push(self.skip(Step::CachePlugin, "disabled"));
        }

        if features.install_ssl {
            self.out.progress(80, &format!("Requesting SSL certificate for {}", config.domain));
            let outcome = self.certificate(&app_id, &config.domain).await;
            steps.push(outcome);
        } else {
            steps.push(self.skip(Step::Certificate, "disabled"));
        }

        self.out.progress(100, "Provisioning finished");
        let secured = steps
            .iter()
            .any(|s| s.step == Step::Certificate && s.outcome == Outcome::Done);
        let report = ProvisionReport {
            app_id,
            url: config.url(secured),
            database: database.map(|db| db.name),
            steps,
        };
        self.print_summary(config, &report);
        Ok(report)
    }

    async fn create(
        &self,
        config: &Config,
    ) -> Result<(String, Option<DatabaseCredentials>), ProvisionError> {
        match config.app {
            AppKind::Wordpress { .. } => {
                let db = DatabaseCredentials::generate(&config.name, &generate::unique_suffix());
                self.out.debug(&format!("Database {} / user {}", db.name, db.user));
                let payload = WordpressPayload::new(config, &db);
                let id = self
                    .api
                    .create_wordpress(&payload)
                    .await
                    .map_err(ProvisionError::Create)?;
                Ok((id, Some(db)))
            }
            AppKind::Custom { owner_id } => {
                let payload = CustomAppPayload::new(config, owner_id);
                let id = self
                    .api
                    .create_custom(&payload)
                    .await
                    .map_err(ProvisionError::Create)?;
                Ok((id, None))
            }
        }
    }

    async fn certificate(&self, app_id: &str, domain: &str) -> StepOutcome {
        let domains = match self.api.list_domains(app_id).await {
            Ok(domains) => domains,
            Err(e) => return self.record(Step::Certificate, Err(e)),
        };

        // exact, case-sensitive match
        let Some(found) = domains.iter().find(|d| d.name == domain) else {
            return self.fail(
                Step::Certificate,
                format!("domain {} not found on the web application", domain),
                "Attach the domain to the app in RunCloud, then request SSL from the dashboard",
            );
        };
        self.out.debug(&format!("Domain {} has id {}", domain, found.id));

        let result = self.api.request_certificate(app_id, &found.id).await;
        self.record(Step::Certificate, result)
    }

    fn record(&self, step: Step, result: Result<(), ApiError>) -> StepOutcome {
        match result {
            Ok(()) => {
                self.out.info(&format!("{} done", step.label()));
                StepOutcome {
                    step,
                    outcome: Outcome::Done,
                }
            }
            Err(e) => self.fail(step, e.to_string(), e.hint()),
        }
    }

    fn fail(&self, step: Step, reason: String, hint: &str) -> StepOutcome {
        self.out.warn(&format!("{} failed: {}", step.label(), reason));
        self.out.warn(&format!("Hint: {}", hint));
        StepOutcome {
            step,
            outcome: Outcome::Failed {
                reason,
                hint: hint.to_string(),
            },
        }
    }

    fn skip(&self, step: Step, reason: &str) -> StepOutcome {
        self.out.info(&format!("{} skipped ({})", step.label(), reason));
        StepOutcome {
            step,
            outcome: Outcome::Skipped {
                reason: reason.to_string(),
            },
        }
    }

    fn print_config(&self, config: &Config) {
        let on_off = |b: bool| (if b { "yes" } else { "no" }).to_string();
        let mut rows = vec![
            ("Server", config.server_id.clone()),
            ("Type", format!("{:?}", config.app_type()).to_lowercase()),
            ("Name", config.name.clone()),
            ("Domain", config.domain.clone()),
            ("PHP", config.php.api_token().to_string()),
            ("Stack", config.stack_token().to_string()),
            ("Owner", config.owner_id().map(|id| id.to_string()).unwrap_or_else(|| "-".into())),
            ("SSL", on_off(config.features.install_ssl)),
        ];
        if config.is_wordpress() {
            rows.push(("Admin user", config.admin.user.clone()));
            rows.push(("Admin email", config.admin.email.clone()));
            rows.push(("RunCloud Hub", on_off(config.features.install_cache)));
            rows.push(("Cache type", config.cache.cache_type.api_token().to_string()));
            rows.push(("Object cache", on_off(config.cache.object_cache)));
            rows.push(("Unrestrict PHP", on_off(config.features.unrestrict_php)));
        }
        self.out.summary("Configuration", &rows);
    }

    fn print_summary(&self, config: &Config, report: &ProvisionReport) {
        let mut rows = vec![("URL", report.url.clone()), ("App id", report.app_id.clone())];
        if config.is_wordpress() {
            let password = if config.admin.generated_password {
                format!("{} (generated)", config.admin.password)
            } else {
                config.admin.password.clone()
            };
            rows.push(("Admin user", config.admin.user.clone()));
            rows.push(("Admin password", password));
            rows.push(("Admin email", config.admin.email.clone()));
            if let Some(db) = &report.database {
                rows.push(("Database", db.clone()));
            }
        } else {
            rows.push(("Files", "Upload your application over SFTP as the owner user".into()));
        }
        for step in &report.steps {
            let status = match &step.outcome {
                Outcome::Done => "done".to_string(),
                Outcome::Skipped { reason } => format!("skipped ({})", reason),
                Outcome::Failed { .. } => "FAILED".to_string(),
            };
            rows.push((step.step.label(), status));
        }
        self.out.summary("Web application ready", &rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Domain;
    use crate::cli::{AppType, CacheType, PhpVersion, Stack};
    use crate::config::{AdminCredentials, CacheConfig, Features};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        CreateWordpress,
        CreateCustom,
        PatchSettings(String),
        InstallCache(CacheType, bool),
        ListDomains,
        RequestCertificate(String),
    }

    struct FakeApi {
        calls: Mutex<Vec<(Call, Instant)>>,
        domains: Vec<Domain>,
        fail_create: bool,
        fail_cache: bool,
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                domains: vec![
                    Domain { id: "1".into(), name: "www.blog.example.com".into() },
                    Domain { id: "2".into(), name: "blog.example.com".into() },
                ],
                fail_create: false,
                fail_cache: false,
            }
        }

        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push((call, Instant::now()));
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }

        fn times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }
    }

    fn boom() -> ApiError {
        ApiError::Status {
            status: 500,
            message: "boom".into(),
        }
    }

    #[async_trait]
    impl RunCloudApi for FakeApi {
        async fn create_wordpress(&self, payload: &WordpressPayload) -> Result<String, ApiError> {
            assert_eq!(payload.database_prefix, "wp_");
            self.push(Call::CreateWordpress);
            if self.fail_create {
                return Err(ApiError::Unauthorized("bad key".into()));
            }
            Ok("55".into())
        }

        async fn create_custom(&self, payload: &CustomAppPayload) -> Result<String, ApiError> {
            assert_eq!(payload.stack, "customnginx");
            assert_eq!(payload.user, 3);
            self.push(Call::CreateCustom);
            Ok("66".into())
        }

        async fn install_cache_plugin(&self, app_id: &str, cache: CacheConfig) -> Result<(), ApiError> {
            assert_eq!(app_id, "55");
            self.push(Call::InstallCache(cache.cache_type, cache.object_cache));
            if self.fail_cache {
                return Err(boom());
            }
            Ok(())
        }

        async fn list_domains(&self, _app_id: &str) -> Result<Vec<Domain>, ApiError> {
            self.push(Call::ListDomains);
            Ok(self.domains.clone())
        }

        async fn request_certificate(&self, _app_id: &str, domain_id: &str) -> Result<(), ApiError> {
            self.push(Call::RequestCertificate(domain_id.to_string()));
            Ok(())
        }

        async fn patch_settings(&self, _app_id: &str, settings: &Value) -> Result<(), ApiError> {
            self.push(Call::PatchSettings(settings.to_string()));
            Ok(())
        }
    }

    fn config(app_type: AppType) -> Config {
        Config {
            api_key: "k".into(),
            server_id: "1".into(),
            api_base: "http://unused".into(),
            app: match app_type {
                AppType::Wordpress => AppKind::Wordpress { owner_id: None },
                AppType::Custom => AppKind::Custom { owner_id: 3 },
            },
            domain: "blog.example.com".into(),
            name: "blog".into(),
            admin: AdminCredentials {
                user: "admin".into(),
                password: "pw".into(),
                email: "admin@blog.example.com".into(),
                generated_password: true,
            },
            php: PhpVersion::Php82,
            stack: Stack::Nginx,
            features: Features {
                install_cache: true,
                install_ssl: true,
                unrestrict_php: false,
            },
            cache: CacheConfig {
                cache_type: CacheType::Redis,
                object_cache: true,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wordpress_runs_every_step_after_one_delay() {
        let api = FakeApi::new();
        let out = Output::capture();
        let mut cfg = config(AppType::Wordpress);
        cfg.features.unrestrict_php = true;

        let report = Provisioner::new(&api, &out).run(&cfg).await.unwrap();

        assert_eq!(
            api.calls(),
            vec![
                Call::CreateWordpress,
                Call::PatchSettings(r#"{"disableFunctions":""}"#.into()),
                Call::InstallCache(CacheType::Redis, true),
                Call::ListDomains,
                Call::RequestCertificate("2".into()),
            ]
        );
        let times = api.times();
        for t in &times[1..] {
            assert_eq!(*t - times[0], PROPAGATION_DELAY);
        }
        assert_eq!(report.app_id, "55");
        assert!(report.database.as_deref().unwrap().starts_with("blog_"));
        assert!(report.steps.iter().all(|s| s.outcome == Outcome::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn wordpress_without_unrestrict_skips_patch() {
        let api = FakeApi::new();
        let out = Output::capture();

        Provisioner::new(&api, &out)
            .run(&config(AppType::Wordpress))
            .await
            .unwrap();

        assert_eq!(
            api.calls(),
            vec![
                Call::CreateWordpress,
                Call::InstallCache(CacheType::Redis, true),
                Call::ListDomains,
                Call::RequestCertificate("2".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn custom_app_only_requests_certificate() {
        let api = FakeApi::new();
        let out = Output::capture();
        let mut cfg = config(AppType::Custom);
        cfg.features.unrestrict_php = true;

        let report = Provisioner::new(&api, &out).run(&cfg).await.unwrap();

        assert_eq!(
            api.calls(),
            vec![
                Call::CreateCustom,
                Call::ListDomains,
                Call::RequestCertificate("2".into()),
            ]
        );
        assert_eq!(report.database, None);
        assert!(out.lines().iter().any(|l| l.contains("SFTP")));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_failure_does_not_stop_certificate() {
        let mut api = FakeApi::new();
        api.fail_cache = true;
        let out = Output::capture();

        let report = Provisioner::new(&api, &out)
            .run(&config(AppType::Wordpress))
            .await
            .unwrap();

        assert!(matches!(report.outcome(Step::CachePlugin), Some(Outcome::Failed { .. })));
        assert_eq!(report.outcome(Step::Certificate), Some(&Outcome::Done));
        assert!(api.calls().contains(&Call::RequestCertificate("2".into())));
        let lines = out.lines();
        assert!(lines.iter().any(|l| l.starts_with("[WARN] RunCloud Hub install failed")));
        assert!(lines.iter().any(|l| l.contains("Web application ready")));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_domain_never_requests_certificate() {
        let mut api = FakeApi::new();
        api.domains = vec![Domain { id: "9".into(), name: "Blog.Example.com".into() }];
        let out = Output::capture();

        let report = Provisioner::new(&api, &out)
            .run(&config(AppType::Wordpress))
            .await
            .unwrap();

        assert_eq!(api.calls().last(), Some(&Call::ListDomains));
        assert!(matches!(report.outcome(Step::Certificate), Some(Outcome::Failed { .. })));
        assert_eq!(report.url, "http://blog.example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn url_is_https_only_with_certificate() {
        let api = FakeApi::new();
        let out = Output::capture();
        let report = Provisioner::new(&api, &out)
            .run(&config(AppType::Wordpress))
            .await
            .unwrap();
        assert_eq!(report.url, "https://blog.example.com");

        let mut cfg = config(AppType::Wordpress);
        cfg.features.install_ssl = false;
        let report = Provisioner::new(&api, &out).run(&cfg).await.unwrap();
        assert_eq!(report.url, "http://blog.example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn agent_mode_emits_configuration_and_summary() {
        let api = FakeApi::new();
        let out = Output::capture_agent();
        let mut cfg = config(AppType::Wordpress);
        cfg.php = PhpVersion::Php83;
        cfg.stack = Stack::Apache;

        Provisioner::new(&api, &out).run(&cfg).await.unwrap();

        let events: Vec<Value> = out
            .lines()
            .iter()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let summaries: Vec<&Value> = events.iter().filter(|e| e["type"] == "summary").collect();
        assert_eq!(summaries.len(), 2);

        let rows = &summaries[0]["payload"]["rows"];
        assert_eq!(summaries[0]["payload"]["title"], "Configuration");
        assert_eq!(rows["PHP"], "php83rc");
        assert_eq!(rows["Stack"], "hybrid");

        let rows = &summaries[1]["payload"]["rows"];
        assert_eq!(rows["URL"], "https://blog.example.com");
        assert_eq!(rows["Admin password"], "pw (generated)");
    }

    #[tokio::test(start_paused = true)]
    async fn creation_failure_is_fatal() {
        let mut api = FakeApi::new();
        api.fail_create = true;
        let out = Output::capture();

        let err = Provisioner::new(&api, &out)
            .run(&config(AppType::Wordpress))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Create(ApiError::Unauthorized(_))));
        assert_eq!(api.calls(), vec![Call::CreateWordpress]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_delay_when_nothing_follows_creation() {
        let api = FakeApi::new();
        let out = Output::capture();
        let mut cfg = config(AppType::Wordpress);
        cfg.features = Features {
            install_cache: false,
            install_ssl: false,
            unrestrict_php: false,
        };

        let start = Instant::now();
        let report = Provisioner::new(&api, &out).run(&cfg).await.unwrap();

        assert_eq!(Instant::now() - start, Duration::ZERO);
        assert_eq!(api.calls(), vec![Call::CreateWordpress]);
        assert_eq!(
            report.outcome(Step::CachePlugin),
            Some(&Outcome::Skipped { reason: "disabled".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn generated_password_is_marked_in_summary() {
        let api = FakeApi::new();
        let out = Output::capture();

        Provisioner::new(&api, &out)
            .run(&config(AppType::Wordpress))
            .await
            .unwrap();

        assert!(out.lines().iter().any(|l| l.contains("pw (generated)")));
    }
}
