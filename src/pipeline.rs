use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use secrecy::ExposeSecret;

use crate::backup::postgres::DockerPgDump;
use crate::backup::s3::AwsCliSync;
use crate::backup::{BackupExecutor, BackupReport, DatabaseDumper, RemoteSync, SyncOutcome};
use crate::certificate::certbot::Certbot;
use crate::certificate::{CertificateAuthority, CertificateManager};
use crate::compose::{self, StackDescriptor};
use crate::config::Configuration;
use crate::env_store::{self, EnvironmentStore};
use crate::error::{DeployError, DeployResult};
use crate::host::{HostSetup, SystemHost};
use crate::layout::Layout;
use crate::proxy::nginx::{self, Nginx};
use crate::proxy::{ProxyControl, ProxyRule, ReverseProxyConfigurator, TlsBinding};
use crate::schedule::crontab::SystemCrontab;
use crate::schedule::{BackupScheduler, CronTable, DEFAULT_BACKUP_SCHEDULE};
use crate::stack::docker::DockerCompose;
use crate::stack::{ComposeEngine, StackRunner};

/// Installation steps, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prerequisites,
    Configure,
    Compose,
    Volumes,
    Proxy,
    Certificate,
    Stack,
    BackupSchedule,
}

impl Stage {
    pub const ALL: [Self; 8] = [
        Self::Prerequisites,
        Self::Configure,
        Self::Compose,
        Self::Volumes,
        Self::Proxy,
        Self::Certificate,
        Self::Stack,
        Self::BackupSchedule,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Prerequisites => "prerequisites",
            Self::Configure => "configure",
            Self::Compose => "compose",
            Self::Volumes => "volumes",
            Self::Proxy => "proxy",
            Self::Certificate => "certificate",
            Self::Stack => "stack",
            Self::BackupSchedule => "backup-schedule",
        }
    }
}

/// Operator input for an install run. Unset fields fall back to the
/// persisted configuration, then to an interactive prompt.
#[derive(Debug, Clone, Default, Args)]
pub struct InstallOptions {
    /// Public hostname n8n is served on
    #[arg(long)]
    pub domain: Option<String>,

    /// Contact address for the certificate authority
    #[arg(long)]
    pub email: Option<String>,

    /// IANA timezone for schedules inside n8n
    #[arg(long)]
    pub timezone: Option<String>,

    /// Print what would be written without touching the host
    #[arg(long)]
    pub dry_run: bool,
}

impl InstallOptions {
    #[must_use]
    pub fn new(domain: &str, email: &str) -> Self {
        Self {
            domain: Some(domain.to_string()),
            email: Some(email.to_string()),
            ..Self::default()
        }
    }
}

/// What an install run ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSummary {
    /// Env keys of the secrets created during this run.
    pub generated_secrets: Vec<&'static str>,
    /// Whether the proxy serves TLS at the end of the run.
    pub tls: bool,
    pub dry_run: bool,
}

/// Drives host preparation, configuration, proxy, certificate, stack
/// and backup scheduling in dependency order.
///
/// Each collaborator sits behind a trait; [`Pipeline::system`] wires
/// the real tools and the setters swap in others.
pub struct Pipeline {
    layout: Layout,
    host: Box<dyn HostSetup>,
    proxy: Box<dyn ProxyControl>,
    authority: Box<dyn CertificateAuthority>,
    engine: Box<dyn ComposeEngine>,
    cron: Box<dyn CronTable>,
    dumper: Box<dyn DatabaseDumper>,
    remote: Box<dyn RemoteSync>,
    executable: Option<PathBuf>,
}

impl Pipeline {
    /// Pipeline against the local host: apt, nginx, certbot, docker
    /// compose, crontab and the aws CLI.
    #[must_use]
    pub fn system(layout: Layout) -> Self {
        let authority = Certbot::new(&layout.acme_webroot, &layout.letsencrypt_live);
        let dumper = DockerPgDump::new(layout.compose_file());
        Self {
            layout,
            host: Box::new(SystemHost::new()),
            proxy: Box::new(Nginx::new()),
            authority: Box::new(authority),
            engine: Box::new(DockerCompose::new()),
            cron: Box::new(SystemCrontab::new()),
            dumper: Box::new(dumper),
            remote: Box::new(AwsCliSync::new()),
            executable: None,
        }
    }

    #[must_use]
    pub fn host(mut self, host: impl HostSetup + 'static) -> Self {
        self.host = Box::new(host);
        self
    }

    #[must_use]
    pub fn proxy(mut self, control: impl ProxyControl + 'static) -> Self {
        self.proxy = Box::new(control);
        self
    }

    #[must_use]
    pub fn authority(mut self, authority: impl CertificateAuthority + 'static) -> Self {
        self.authority = Box::new(authority);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: impl ComposeEngine + 'static) -> Self {
        self.engine = Box::new(engine);
        self
    }

    #[must_use]
    pub fn cron(mut self, cron: impl CronTable + 'static) -> Self {
        self.cron = Box::new(cron);
        self
    }

    #[must_use]
    pub fn dumper(mut self, dumper: impl DatabaseDumper + 'static) -> Self {
        self.dumper = Box::new(dumper);
        self
    }

    #[must_use]
    pub fn remote(mut self, remote: impl RemoteSync + 'static) -> Self {
        self.remote = Box::new(remote);
        self
    }

    /// Binary the backup cron job invokes. Defaults to the running
    /// executable.
    #[must_use]
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Run a parsed CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatched command fails.
    pub fn dispatch(&self, command: &Command) -> DeployResult<()> {
        match command {
            Command::Install(options) => self.install(options).map(drop),
            Command::Backup => {
                let report = self.backup()?;
                print_backup_report(&report);
                Ok(())
            }
            Command::Render => self.render(),
            Command::Status => self.status(),
        }
    }

    /// Provision or converge the deployment.
    ///
    /// Configuration, compose and stack failures abort with
    /// [`DeployError::StepFailed`] naming the stage; whatever was
    /// already written stays on disk. A certificate failure leaves the
    /// proxy on plain HTTP and the run continues.
    ///
    /// # Errors
    ///
    /// Returns the first fatal stage failure.
    pub fn install(&self, options: &InstallOptions) -> DeployResult<InstallSummary> {
        if options.dry_run {
            return self.dry_run(options);
        }

        run_stage(Stage::Prerequisites, || self.host.ensure_prerequisites())?;

        let (config, generated_secrets) = run_stage(Stage::Configure, || {
            let mut config = self.resolve(options)?;
            let generated = config.ensure_secrets()?;
            config.validate()?;
            let saved = self.store().save(config)?;
            Ok((saved, generated))
        })?;
        if !generated_secrets.is_empty() {
            self.announce_secrets(&config, &generated_secrets);
        }

        let stack = StackRunner::new(&*self.engine, self.layout.compose_file());
        let descriptor = run_stage(Stage::Compose, || {
            let descriptor = compose::render(&config)?;
            stack.write(&descriptor)?;
            Ok(descriptor)
        })?;

        run_stage(Stage::Volumes, || self.host.prepare(&self.layout, &config))?;

        let configurator = ReverseProxyConfigurator::new(&self.layout.proxy_site, &*self.proxy);
        // Start from TLS when a valid certificate is already on disk, so
        // a rerun never drops the site back to plain HTTP.
        let mut rule = self.site_rule(&config);
        run_stage(Stage::Proxy, || configurator.apply(&rule))?;

        let tls = if config.protocol == "https" {
            let manager = CertificateManager::new(&*self.authority, &*self.cron);
            match manager.ensure(&config.domain, &config.admin_email) {
                Ok(cert) => {
                    rule = rule.tls(cert.tls_binding());
                    run_stage(Stage::Certificate, || configurator.apply(&rule))?;
                    true
                }
                Err(err) => {
                    tracing::warn!(stage = Stage::Certificate.name(), error = %err, "continuing without TLS");
                    eprintln!("WARNING: TLS certificate not obtained: {err}");
                    eprintln!("n8n is reachable over plain HTTP; re-run install once DNS points at this host.");
                    false
                }
            }
        } else {
            false
        };

        run_stage(Stage::Stack, || stack.up(&descriptor))?;

        run_stage(Stage::BackupSchedule, || {
            let executable = match &self.executable {
                Some(path) => path.clone(),
                None => std::env::current_exe()?,
            };
            BackupScheduler::new(&*self.cron, &self.layout.backup_log).install(
                &executable,
                &self.cron_args(),
                DEFAULT_BACKUP_SCHEDULE,
            )
        })?;

        tracing::info!(domain = %config.domain, tls, "install complete");
        eprintln!();
        eprintln!("n8n is up at {}", config.webhook_url());

        Ok(InstallSummary {
            generated_secrets,
            tls,
            dry_run: false,
        })
    }

    /// Run one backup now.
    ///
    /// # Errors
    ///
    /// Fails on missing configuration, a held lock, or a failed dump
    /// or archive. Prune and sync problems land in the report.
    pub fn backup(&self) -> DeployResult<BackupReport> {
        BackupExecutor::new(self.layout.clone(), &*self.dumper, &*self.remote).run()
    }

    /// Print the stack descriptor and proxy rule for the persisted
    /// configuration.
    ///
    /// # Errors
    ///
    /// Fails when no configuration has been persisted yet or it does
    /// not validate.
    pub fn render(&self) -> DeployResult<()> {
        let store = self.store();
        let config = store
            .load()?
            .ok_or_else(|| DeployError::ConfigurationMissing(store.path().to_path_buf()))?;

        let rule = self.site_rule(&config);

        print_files(&compose::render(&config)?, &nginx::render(&rule)?, &self.layout)
    }

    /// Report which stack services are running.
    ///
    /// # Errors
    ///
    /// Fails if the compose engine cannot be queried.
    pub fn status(&self) -> DeployResult<()> {
        let compose_file = self.layout.compose_file();
        if !compose_file.exists() {
            return Err(DeployError::ConfigurationMissing(compose_file));
        }

        let running = self.engine.running_services(&compose_file)?;
        for service in [compose::POSTGRES_SERVICE, compose::N8N_SERVICE] {
            let state = if running.iter().any(|r| r == service) {
                "running"
            } else {
                "not running"
            };
            println!("{service:<10} {state}");
        }
        Ok(())
    }

    fn dry_run(&self, options: &InstallOptions) -> DeployResult<InstallSummary> {
        let mut config = self.resolve(options)?;
        // Placeholders only: never shown, never persisted.
        config.ensure_secrets()?;
        config.validate()?;

        eprintln!("=== Dry run: no changes will be made ===");
        eprintln!();
        print_files(
            &compose::render(&config)?,
            &nginx::render(&self.proxy_rule(&config))?,
            &self.layout,
        )?;

        eprintln!("--- Stages that would run ---");
        for (i, stage) in Stage::ALL.iter().enumerate() {
            eprintln!("{}. {}", i + 1, stage.name());
        }

        Ok(InstallSummary {
            generated_secrets: Vec::new(),
            tls: false,
            dry_run: true,
        })
    }

    /// Merge operator input over the persisted configuration.
    fn resolve(&self, options: &InstallOptions) -> DeployResult<Configuration> {
        let mut config = self.store().load()?.unwrap_or_else(|| {
            Configuration::new("", "").backup_dir(self.layout.default_backup_dir())
        });

        if let Some(domain) = &options.domain {
            config.domain.clone_from(domain);
        }
        if let Some(email) = &options.email {
            config.admin_email.clone_from(email);
        }
        if let Some(tz) = &options.timezone {
            config.timezone.clone_from(tz);
        }

        if config.domain.is_empty() {
            config.domain = prompt("Domain for n8n (e.g. n8n.example.com)")?;
        }
        if config.admin_email.is_empty() {
            config.admin_email = prompt("Email for Let's Encrypt notices")?;
        }

        Ok(config)
    }

    fn proxy_rule(&self, config: &Configuration) -> ProxyRule {
        ProxyRule::new(&config.domain, &format!("127.0.0.1:{}", config.port))
            .acme_webroot(&self.layout.acme_webroot)
    }

    /// The proxy rule as the site currently stands: TLS when serving
    /// https and a certificate is already on disk.
    fn site_rule(&self, config: &Configuration) -> ProxyRule {
        let rule = self.proxy_rule(config);
        if config.protocol != "https" {
            return rule;
        }
        match self.current_tls(&config.domain) {
            Some(binding) => rule.tls(binding),
            None => rule,
        }
    }

    fn current_tls(&self, domain: &str) -> Option<TlsBinding> {
        let cert = self.authority.locate(domain);
        self.authority
            .is_current(&cert, Duration::ZERO)
            .unwrap_or(false)
            .then(|| cert.tls_binding())
    }

    /// Arguments placed between the executable and `backup` in the
    /// cron line.
    fn cron_args(&self) -> Vec<String> {
        if self.layout.install_dir == Layout::default().install_dir {
            Vec::new()
        } else {
            vec![
                "--install-dir".to_string(),
                self.layout.install_dir.to_string_lossy().into_owned(),
            ]
        }
    }

    fn store(&self) -> EnvironmentStore {
        EnvironmentStore::new(self.layout.env_file())
    }

    fn announce_secrets(&self, config: &Configuration, keys: &[&str]) {
        let rule = "=".repeat(64);
        eprintln!();
        eprintln!("{rule}");
        eprintln!(" Generated secrets (stored in {}):", self.layout.env_file().display());
        eprintln!();
        for key in keys {
            if let Some(value) = secret_value(config, key) {
                eprintln!("   {key}={value}");
            }
        }
        eprintln!();
        eprintln!(" They will NOT be shown again. Keep a copy somewhere safe:");
        eprintln!(" losing N8N_ENCRYPTION_KEY makes stored credentials unreadable.");
        eprintln!("{rule}");
        eprintln!();
    }
}

fn run_stage<T>(stage: Stage, f: impl FnOnce() -> DeployResult<T>) -> DeployResult<T> {
    tracing::info!(stage = stage.name(), "running");
    f().map_err(|e| {
        tracing::error!(stage = stage.name(), error = %e, "stage failed");
        DeployError::step(stage.name(), e)
    })
}

fn secret_value<'c>(config: &'c Configuration, key: &str) -> Option<&'c str> {
    match key {
        env_store::N8N_ENCRYPTION_KEY => config.encryption_key.as_ref(),
        env_store::POSTGRES_PASSWORD => config.database.password.as_ref(),
        _ => None,
    }
    .map(|secret| secret.expose_secret())
}

fn print_files(descriptor: &StackDescriptor, site: &str, layout: &Layout) -> DeployResult<()> {
    eprintln!("--- {} ---", layout.compose_file().display());
    println!("{}", descriptor.to_yaml()?);
    eprintln!("--- {} ---", layout.proxy_site.display());
    println!("{site}");
    Ok(())
}

fn print_backup_report(report: &BackupReport) {
    eprintln!("Backup {} complete:", report.artifact.timestamp);
    eprintln!("  {}", report.artifact.dump.display());
    eprintln!("  {}", report.artifact.archive.display());
    if !report.pruned.is_empty() {
        eprintln!("Pruned {} expired file(s)", report.pruned.len());
    }
    for failure in &report.prune_failures {
        eprintln!("WARNING: {failure}");
    }
    match &report.sync {
        SyncOutcome::Skipped => {}
        SyncOutcome::Synced => eprintln!("Mirrored to remote storage"),
        SyncOutcome::Failed(err) => eprintln!("WARNING: {err} (local backup kept)"),
    }
}

fn prompt(label: &str) -> DeployResult<String> {
    eprint!("{label}: ");
    std::io::stderr().flush()?;
    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

#[derive(Parser)]
#[command(name = "n8n-deploy", version)]
#[command(about = "Provision and back up a self-hosted n8n")]
pub struct Cli {
    /// Directory holding the env file, compose file and data
    #[arg(long, global = true, default_value = "/opt/n8n")]
    pub install_dir: PathBuf,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install or converge the deployment (default)
    Install(InstallOptions),

    /// Dump the database, archive state, prune and mirror
    Backup,

    /// Print the compose file and proxy rule for the saved configuration
    Render,

    /// Show whether the stack services are running
    Status,
}

impl Default for Command {
    fn default() -> Self {
        Self::Install(InstallOptions::default())
    }
}
