use std::fs;
use std::os::unix::fs::lchown;
use std::path::Path;
use std::time::Duration;

use crate::cmd::{self, Invocation};
use crate::config::Configuration;
use crate::error::{DeployError, DeployResult};
use crate::files;
use crate::layout::Layout;

/// uid/gid of the `node` user inside the n8n image.
pub const APP_UID: u32 = 1000;
pub const APP_GID: u32 = 1000;

/// Host tool and the Debian package that provides it.
const PREREQUISITES: &[(&str, &str)] = &[
    ("docker", "docker.io"),
    ("nginx", "nginx"),
    ("certbot", "certbot"),
    ("crontab", "cron"),
    ("openssl", "openssl"),
];

const COMPOSE_PACKAGE: &str = "docker-compose-v2";
const SERVICES: &[&str] = &["docker", "nginx", "cron"];

/// Machine-level preparation done before anything is deployed.
pub trait HostSetup {
    /// Make sure every external tool the deployment drives is
    /// installed and its daemon running.
    fn ensure_prerequisites(&self) -> DeployResult<()>;

    /// Create the directories the stack, proxy and backups need.
    fn prepare(&self, layout: &Layout, config: &Configuration) -> DeployResult<()>;
}

/// A Debian/Ubuntu host managed with apt and systemd.
#[derive(Debug, Default)]
pub struct SystemHost;

impl SystemHost {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn compose_plugin_present() -> bool {
        Invocation::new("docker")
            .args(["compose", "version"])
            .timeout(Duration::from_secs(30))
            .output()
            .is_ok_and(|o| o.status.success())
    }
}

impl HostSetup for SystemHost {
    fn ensure_prerequisites(&self) -> DeployResult<()> {
        let mut missing: Vec<&str> = PREREQUISITES
            .iter()
            .filter(|(tool, _)| !cmd::command_exists(tool))
            .map(|(_, package)| *package)
            .collect();
        if !Self::compose_plugin_present() {
            missing.push(COMPOSE_PACKAGE);
        }

        if missing.is_empty() {
            tracing::info!("prerequisites present");
        } else {
            tracing::info!(packages = %missing.join(" "), "installing missing packages");
            if !cmd::command_exists("apt-get") {
                return Err(DeployError::PrerequisiteMissing(format!(
                    "{} (and no apt-get to install them)",
                    missing.join(", ")
                )));
            }
            Invocation::new("apt-get")
                .args(["update", "-q"])
                .env("DEBIAN_FRONTEND", "noninteractive")
                .run_interactive()?;
            Invocation::new("apt-get")
                .args(["install", "-y", "-q"])
                .args(&missing)
                .env("DEBIAN_FRONTEND", "noninteractive")
                .run_interactive()
                .map_err(|e| DeployError::PrerequisiteMissing(format!("{}: {e}", missing.join(", "))))?;
        }

        Invocation::new("systemctl")
            .args(["enable", "--now"])
            .args(SERVICES)
            .timeout(Duration::from_secs(120))
            .run()?;
        Ok(())
    }

    fn prepare(&self, layout: &Layout, config: &Configuration) -> DeployResult<()> {
        prepare_directories(layout, config)?;
        chown_recursive(&layout.data_dir(), APP_UID, APP_GID)?;
        tracing::info!(dir = %layout.data_dir().display(), uid = APP_UID, "data dir ownership set");
        Ok(())
    }
}

/// Create the install, data, backup and ACME directories. The
/// backup dir is private to the owning account.
pub fn prepare_directories(layout: &Layout, config: &Configuration) -> DeployResult<()> {
    files::ensure_dir(layout.install_dir(), 0o755)?;
    files::ensure_dir(&layout.data_dir(), 0o755)?;
    files::ensure_dir(&config.backup.dir, 0o700)?;
    files::ensure_dir(&layout.acme_webroot, 0o755)?;
    Ok(())
}

fn chown_recursive(path: &Path, uid: u32, gid: u32) -> DeployResult<()> {
    lchown(path, Some(uid), Some(gid))?;
    if fs::symlink_metadata(path)?.is_dir() {
        for entry in fs::read_dir(path)? {
            chown_recursive(&entry?.path(), uid, gid)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn creates_directories_with_modes() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().join("n8n")).acme_webroot(dir.path().join("acme"));
        let config = Configuration::new("n8n.example.com", "ops@example.com")
            .backup_dir(dir.path().join("n8n/backups"));

        prepare_directories(&layout, &config).unwrap();

        assert!(layout.data_dir().is_dir());
        assert!(dir.path().join("acme").is_dir());
        let mode = fs::metadata(&config.backup.dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn prepare_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path()).acme_webroot(dir.path().join("acme"));
        let config =
            Configuration::new("n8n.example.com", "ops@example.com").backup_dir(dir.path().join("b"));
        fs::create_dir_all(layout.data_dir()).unwrap();
        fs::write(layout.data_dir().join("config"), "{}").unwrap();

        prepare_directories(&layout, &config).unwrap();
        prepare_directories(&layout, &config).unwrap();

        assert!(layout.data_dir().join("config").exists());
    }
}
