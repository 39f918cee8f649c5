use std::path::{Path, PathBuf};

/// Name of the application state directory inside the install dir.
/// The stack descriptor bind-mounts it relative to the compose file.
pub const DATA_DIR_NAME: &str = "n8n_data";

/// Where everything lives on the host.
///
/// # Example
///
/// ```
/// use n8n_deploy::Layout;
///
/// let layout = Layout::new("/srv/n8n").acme_webroot("/srv/acme");
///
/// assert_eq!(layout.env_file().to_str(), Some("/srv/n8n/.env"));
/// assert_eq!(layout.acme_webroot.to_str(), Some("/srv/acme"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub install_dir: PathBuf,
    pub proxy_site: PathBuf,
    pub acme_webroot: PathBuf,
    pub letsencrypt_live: PathBuf,
    pub backup_log: PathBuf,
}

impl Layout {
    #[must_use]
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            proxy_site: PathBuf::from("/etc/nginx/conf.d/n8n.conf"),
            acme_webroot: PathBuf::from("/var/www/certbot"),
            letsencrypt_live: PathBuf::from("/etc/letsencrypt/live"),
            backup_log: PathBuf::from("/var/log/n8n-backup.log"),
        }
    }

    #[must_use]
    pub fn proxy_site(mut self, path: impl Into<PathBuf>) -> Self {
        self.proxy_site = path.into();
        self
    }

    #[must_use]
    pub fn acme_webroot(mut self, path: impl Into<PathBuf>) -> Self {
        self.acme_webroot = path.into();
        self
    }

    #[must_use]
    pub fn letsencrypt_live(mut self, path: impl Into<PathBuf>) -> Self {
        self.letsencrypt_live = path.into();
        self
    }

    #[must_use]
    pub fn backup_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_log = path.into();
        self
    }

    #[must_use]
    pub fn env_file(&self) -> PathBuf {
        self.install_dir.join(".env")
    }

    #[must_use]
    pub fn compose_file(&self) -> PathBuf {
        self.install_dir.join("docker-compose.yml")
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.install_dir.join(DATA_DIR_NAME)
    }

    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.install_dir.join("backup.lock")
    }

    #[must_use]
    pub fn default_backup_dir(&self) -> PathBuf {
        self.install_dir.join("backups")
    }

    #[must_use]
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new("/opt/n8n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let layout = Layout::default();

        assert_eq!(layout.install_dir, PathBuf::from("/opt/n8n"));
        assert_eq!(layout.compose_file(), PathBuf::from("/opt/n8n/docker-compose.yml"));
        assert_eq!(layout.data_dir(), PathBuf::from("/opt/n8n/n8n_data"));
        assert_eq!(layout.default_backup_dir(), PathBuf::from("/opt/n8n/backups"));
        assert_eq!(layout.proxy_site, PathBuf::from("/etc/nginx/conf.d/n8n.conf"));
    }

    #[test]
    fn builder_chain() {
        let layout = Layout::new("/tmp/x")
            .proxy_site("/tmp/site.conf")
            .letsencrypt_live("/tmp/live")
            .backup_log("/tmp/backup.log");

        assert_eq!(layout.proxy_site, PathBuf::from("/tmp/site.conf"));
        assert_eq!(layout.letsencrypt_live, PathBuf::from("/tmp/live"));
        assert_eq!(layout.backup_log, PathBuf::from("/tmp/backup.log"));
        assert_eq!(layout.lock_file(), PathBuf::from("/tmp/x/backup.lock"));
    }
}
