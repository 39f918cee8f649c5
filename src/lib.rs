//! Idempotent provisioning and backups for a self-hosted n8n.
//!
//! One command takes a bare Debian or Ubuntu host to a running n8n
//! behind nginx with a Let's Encrypt certificate, backed by
//! PostgreSQL, with a nightly backup job. Re-running it converges the
//! host on the same state without rotating secrets.
//!
//! # Overview
//!
//! An installation is a [`Pipeline`] that runs these stages in order:
//!
//! 1. **prerequisites** - install docker, nginx, certbot, cron
//! 2. **configure** - merge operator input with the persisted
//!    [`Configuration`], generate missing secrets, save the env file
//!    through [`EnvironmentStore`]
//! 3. **compose** - render the [`StackDescriptor`] and write
//!    `docker-compose.yml`
//! 4. **volumes** - create the data, backup and ACME directories
//! 5. **proxy** - activate an HTTP [`ProxyRule`] with the ACME
//!    challenge carve-out
//! 6. **certificate** - obtain or reuse a certificate and switch the
//!    rule to HTTPS
//! 7. **stack** - pull images and bring the services up
//! 8. **backup-schedule** - register the daily `backup` cron job
//!
//! Every external tool sits behind a trait
//! ([`ProxyControl`](proxy::ProxyControl),
//! [`CertificateAuthority`](certificate::CertificateAuthority),
//! [`ComposeEngine`](stack::ComposeEngine),
//! [`CronTable`](schedule::CronTable),
//! [`DatabaseDumper`](backup::DatabaseDumper),
//! [`RemoteSync`](backup::RemoteSync)) so each stage can be driven
//! against fakes.
//!
//! # Examples
//!
//! ```rust,no_run
//! use n8n_deploy::{InstallOptions, Layout, Pipeline};
//!
//! fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::system(Layout::new("/opt/n8n"));
//!
//!     let summary = pipeline.install(&InstallOptions::new(
//!         "n8n.example.com",
//!         "ops@example.com",
//!     ))?;
//!     assert!(summary.generated_secrets.len() <= 2);
//!
//!     let report = pipeline.backup()?;
//!     println!("{}", report.artifact.dump.display());
//!     Ok(())
//! }
//! ```
//!
//! From the command line:
//!
//! ```sh
//! # First install (prompts for domain and email)
//! n8n-deploy install
//!
//! # Preview the compose file and nginx site
//! n8n-deploy install --domain n8n.example.com --email ops@example.com --dry-run
//!
//! # What the nightly cron job runs
//! n8n-deploy backup
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod backup;
pub mod certificate;
pub mod cmd;
pub mod compose;
pub mod config;
pub mod env_store;
pub mod error;
pub mod files;
pub mod host;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod proxy;
pub mod schedule;
pub mod secret;
pub mod stack;

pub use backup::{BackupArtifact, BackupExecutor, BackupReport, SyncOutcome};
pub use certificate::{Certificate, CertificateManager};
pub use compose::StackDescriptor;
pub use config::{Configuration, RemoteStorage};
pub use env_store::EnvironmentStore;
pub use error::{DeployError, DeployResult};
pub use layout::Layout;
pub use pipeline::{InstallOptions, InstallSummary, Pipeline, Stage};
pub use proxy::{ProxyRule, ReverseProxyConfigurator};
pub use stack::StackRunner;
