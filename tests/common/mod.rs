//! Recording stand-ins for the external tools. Clones share state, so
//! a test keeps one handle and gives the other to the code under test.
#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::rc::Rc;
use std::time::Duration;

use n8n_deploy::backup::{DatabaseDumper, RemoteSync};
use n8n_deploy::certificate::{Certificate, CertificateAuthority};
use n8n_deploy::config::{Configuration, RemoteStorage};
use n8n_deploy::error::{DeployError, DeployResult};
use n8n_deploy::host::{self, HostSetup};
use n8n_deploy::layout::Layout;
use n8n_deploy::proxy::ProxyControl;
use n8n_deploy::schedule::{CronEntry, CronTable};
use n8n_deploy::stack::ComposeEngine;

#[derive(Debug, Default)]
pub struct ProxyState {
    pub reject: bool,
    pub validations: usize,
    pub reloads: usize,
}

#[derive(Clone, Default)]
pub struct FakeProxy(pub Rc<RefCell<ProxyState>>);

impl FakeProxy {
    pub fn rejecting() -> Self {
        let proxy = Self::default();
        proxy.0.borrow_mut().reject = true;
        proxy
    }

    pub fn reloads(&self) -> usize {
        self.0.borrow().reloads
    }
}

impl ProxyControl for FakeProxy {
    fn validate(&self) -> DeployResult<()> {
        let mut state = self.0.borrow_mut();
        state.validations += 1;
        if state.reject {
            Err(DeployError::InvalidProxyConfig(
                "unexpected \"}\" in site file".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn reload(&self) -> DeployResult<()> {
        self.0.borrow_mut().reloads += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct AuthorityState {
    pub fail: bool,
    pub issued: usize,
}

/// Issues "certificates" as plain files under `live`.
#[derive(Clone)]
pub struct FakeAuthority {
    pub live: PathBuf,
    pub state: Rc<RefCell<AuthorityState>>,
}

impl FakeAuthority {
    pub fn new(live: &Path) -> Self {
        Self {
            live: live.to_path_buf(),
            state: Rc::default(),
        }
    }

    pub fn failing(live: &Path) -> Self {
        let authority = Self::new(live);
        authority.state.borrow_mut().fail = true;
        authority
    }

    pub fn issued(&self) -> usize {
        self.state.borrow().issued
    }
}

impl CertificateAuthority for FakeAuthority {
    fn locate(&self, domain: &str) -> Certificate {
        let dir = self.live.join(domain);
        Certificate {
            domain: domain.to_string(),
            certificate: dir.join("fullchain.pem"),
            private_key: dir.join("privkey.pem"),
        }
    }

    fn is_current(&self, cert: &Certificate, _margin: Duration) -> DeployResult<bool> {
        Ok(cert.certificate.exists() && cert.private_key.exists())
    }

    fn issue(&self, domain: &str, _email: &str) -> DeployResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail {
            return Err(DeployError::CertificateError(format!(
                "challenge for {domain} not reachable"
            )));
        }
        let cert = self.locate(domain);
        fs::create_dir_all(cert.certificate.parent().unwrap())?;
        fs::write(&cert.certificate, "CERT")?;
        fs::write(&cert.private_key, "KEY")?;
        state.issued += 1;
        Ok(())
    }

    fn renewal_entry(&self) -> CronEntry {
        CronEntry::new("17 3 * * *", "certbot renew --quiet").identity(&["certbot", "renew"])
    }
}

#[derive(Clone, Default)]
pub struct FakeCron {
    pub content: Rc<RefCell<String>>,
    pub writes: Rc<RefCell<usize>>,
}

impl FakeCron {
    pub fn with(content: &str) -> Self {
        let cron = Self::default();
        *cron.content.borrow_mut() = content.to_string();
        cron
    }

    pub fn content(&self) -> String {
        self.content.borrow().clone()
    }

    pub fn lines_containing(&self, needle: &str) -> usize {
        self.content().lines().filter(|l| l.contains(needle)).count()
    }
}

impl CronTable for FakeCron {
    fn read(&self) -> DeployResult<String> {
        Ok(self.content())
    }

    fn write(&self, content: &str) -> DeployResult<()> {
        *self.content.borrow_mut() = content.to_string();
        *self.writes.borrow_mut() += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub struct EngineState {
    pub calls: Vec<&'static str>,
    pub fail_pull: bool,
    pub fail_up: bool,
    pub running: Vec<String>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            fail_pull: false,
            fail_up: false,
            running: vec!["postgres".into(), "n8n".into()],
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeEngine(pub Rc<RefCell<EngineState>>);

impl FakeEngine {
    pub fn calls(&self) -> Vec<&'static str> {
        self.0.borrow().calls.clone()
    }
}

impl ComposeEngine for FakeEngine {
    fn pull(&self, _compose_file: &Path) -> DeployResult<()> {
        let mut state = self.0.borrow_mut();
        state.calls.push("pull");
        if state.fail_pull {
            return Err(command_failed(
                "docker compose pull",
                "manifest for docker.n8n.io/n8nio/n8n:latest not found",
            ));
        }
        Ok(())
    }

    fn up(&self, _compose_file: &Path) -> DeployResult<()> {
        let mut state = self.0.borrow_mut();
        state.calls.push("up");
        if state.fail_up {
            return Err(command_failed(
                "docker compose up -d",
                "container n8n exited with code 1",
            ));
        }
        Ok(())
    }

    fn running_services(&self, _compose_file: &Path) -> DeployResult<Vec<String>> {
        let mut state = self.0.borrow_mut();
        state.calls.push("ps");
        Ok(state.running.clone())
    }
}

/// Creates directories, installs nothing.
#[derive(Clone, Default)]
pub struct FakeHost {
    pub prerequisite_checks: Rc<RefCell<usize>>,
}

impl HostSetup for FakeHost {
    fn ensure_prerequisites(&self) -> DeployResult<()> {
        *self.prerequisite_checks.borrow_mut() += 1;
        Ok(())
    }

    fn prepare(&self, layout: &Layout, config: &Configuration) -> DeployResult<()> {
        host::prepare_directories(layout, config)
    }
}

#[derive(Clone, Default)]
pub struct FakeDumper {
    pub fail: bool,
    pub calls: Rc<RefCell<usize>>,
}

impl FakeDumper {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl DatabaseDumper for FakeDumper {
    fn dump(&self, config: &Configuration, out: &mut dyn Write) -> DeployResult<()> {
        *self.calls.borrow_mut() += 1;
        // Fail after partial output, like a dropped connection.
        writeln!(out, "-- PostgreSQL database dump of {}", config.database.name)?;
        if self.fail {
            return Err(DeployError::DumpFailed("connection reset".into()));
        }
        writeln!(out, "CREATE TABLE workflow_entity (id varchar(36));")?;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeRemote {
    pub fail: bool,
    pub synced: Rc<RefCell<Vec<(PathBuf, String)>>>,
}

impl FakeRemote {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.synced.borrow().len()
    }
}

impl RemoteSync for FakeRemote {
    fn sync(&self, dir: &Path, target: &RemoteStorage) -> DeployResult<()> {
        self.synced
            .borrow_mut()
            .push((dir.to_path_buf(), target.bucket.clone()));
        if self.fail {
            return Err(DeployError::SyncFailed("AccessDenied".into()));
        }
        Ok(())
    }
}

/// What a non-zero exit of `command` looks like.
pub fn command_failed(command: &str, stderr: &str) -> DeployError {
    DeployError::CommandFailed {
        command: command.to_string(),
        status: ExitStatus::from_raw(1 << 8),
        stderr: stderr.to_string(),
    }
}

/// A layout with every host path inside `root`.
pub fn layout(root: &Path) -> Layout {
    Layout::new(root.join("n8n"))
        .proxy_site(root.join("nginx/n8n.conf"))
        .acme_webroot(root.join("acme"))
        .letsencrypt_live(root.join("live"))
        .backup_log(root.join("n8n-backup.log"))
}

/// A complete configuration whose backups go under `root`.
pub fn configuration(root: &Path) -> Configuration {
    let mut config =
        Configuration::new("n8n.example.com", "ops@example.com").backup_dir(root.join("backups"));
    config.ensure_secrets().unwrap();
    config
}
