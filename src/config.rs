use std::path::PathBuf;

use indexmap::IndexMap;
use secrecy::SecretString;

use crate::error::{DeployError, DeployResult};
use crate::secret;

pub const DEFAULT_PORT: u16 = 5678;
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Database credentials shared by the postgres and n8n services.
#[derive(Debug)]
pub struct Database {
    pub user: String,
    pub password: Option<SecretString>,
    pub name: String,
}

/// Where backups go and how long they stay.
#[derive(Debug, PartialEq, Eq)]
pub struct BackupPolicy {
    pub dir: PathBuf,
    pub retention_days: u32,
}

/// Optional S3 mirror for the backup directory.
#[derive(Debug)]
pub struct RemoteStorage {
    pub bucket: String,
    pub prefix: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

/// The resolved deployment parameters. Loaded once, passed to every
/// component.
///
/// # Example
///
/// ```
/// use n8n_deploy::Configuration;
///
/// let config = Configuration::new("n8n.example.com", "ops@example.com")
///     .timezone("Europe/Berlin")
///     .retention_days(14);
///
/// assert_eq!(config.webhook_url(), "https://n8n.example.com/");
/// assert!(config.encryption_key.is_none());
/// ```
#[derive(Debug)]
pub struct Configuration {
    pub domain: String,
    pub admin_email: String,
    pub port: u16,
    pub protocol: String,
    pub timezone: String,
    pub encryption_key: Option<SecretString>,
    pub database: Database,
    pub backup: BackupPolicy,
    pub remote: Option<RemoteStorage>,
    /// Keys in the env file this tool does not manage. Preserved
    /// across saves.
    pub extra: IndexMap<String, String>,
}

impl Configuration {
    #[must_use]
    pub fn new(domain: &str, admin_email: &str) -> Self {
        Self {
            domain: domain.to_string(),
            admin_email: admin_email.to_string(),
            port: DEFAULT_PORT,
            protocol: "https".to_string(),
            timezone: "UTC".to_string(),
            encryption_key: None,
            database: Database {
                user: "n8n".to_string(),
                password: None,
                name: "n8n".to_string(),
            },
            backup: BackupPolicy {
                dir: PathBuf::from("/opt/n8n/backups"),
                retention_days: DEFAULT_RETENTION_DAYS,
            },
            remote: None,
            extra: IndexMap::new(),
        }
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn timezone(mut self, tz: &str) -> Self {
        self.timezone = tz.to_string();
        self
    }

    #[must_use]
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup.dir = dir.into();
        self
    }

    #[must_use]
    pub const fn retention_days(mut self, days: u32) -> Self {
        self.backup.retention_days = days;
        self
    }

    #[must_use]
    pub fn remote(mut self, remote: RemoteStorage) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn webhook_url(&self) -> String {
        format!("{}://{}/", self.protocol, self.domain)
    }

    /// Generate whichever secrets are still unset. Returns the env
    /// keys of the secrets created by this call; existing secrets are
    /// never replaced.
    pub fn ensure_secrets(&mut self) -> DeployResult<Vec<&'static str>> {
        let mut generated = Vec::new();
        if self.encryption_key.is_none() {
            self.encryption_key = Some(secret::generate()?);
            generated.push("N8N_ENCRYPTION_KEY");
        }
        if self.database.password.is_none() {
            self.database.password = Some(secret::generate()?);
            generated.push("POSTGRES_PASSWORD");
        }
        Ok(generated)
    }

    /// Take over the secrets of a previously persisted configuration.
    /// Non-secret fields of `self` win.
    pub(crate) fn inherit_secrets(&mut self, previous: Self) {
        if previous.encryption_key.is_some() {
            self.encryption_key = previous.encryption_key;
        }
        if previous.database.password.is_some() {
            self.database.password = previous.database.password;
        }
    }

    /// Check that every required key is present and well-formed.
    /// The error lists every offending key, not just the first.
    pub fn validate(&self) -> DeployResult<()> {
        let mut problems = Vec::new();

        if self.domain.is_empty() {
            problems.push("DOMAIN".to_string());
        } else if !is_valid_domain(&self.domain) {
            problems.push(format!("DOMAIN (invalid hostname '{}')", self.domain));
        }

        if self.admin_email.is_empty() {
            problems.push("SSL_EMAIL".to_string());
        } else if !is_valid_email(&self.admin_email) {
            problems.push(format!("SSL_EMAIL (invalid address '{}')", self.admin_email));
        }

        if self.port == 0 {
            problems.push("N8N_PORT".to_string());
        }
        if !matches!(self.protocol.as_str(), "http" | "https") {
            problems.push(format!("N8N_PROTOCOL (unsupported '{}')", self.protocol));
        }
        if !is_valid_timezone(&self.timezone) {
            problems.push(format!("GENERIC_TIMEZONE (invalid '{}')", self.timezone));
        }
        if self.encryption_key.is_none() {
            problems.push("N8N_ENCRYPTION_KEY".to_string());
        }
        if !is_plain_word(&self.database.user) {
            problems.push("POSTGRES_USER".to_string());
        }
        if self.database.password.is_none() {
            problems.push("POSTGRES_PASSWORD".to_string());
        }
        if !is_plain_word(&self.database.name) {
            problems.push("POSTGRES_DB".to_string());
        }
        if self.backup.dir.as_os_str().is_empty() {
            problems.push("BACKUP_DIR".to_string());
        }
        if let Some(remote) = &self.remote {
            if remote.bucket.is_empty() {
                problems.push("S3_BUCKET".to_string());
            }
            if remote.region.is_empty() {
                problems.push("AWS_DEFAULT_REGION".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DeployError::InvalidConfiguration(problems))
        }
    }
}

/// RFC 1123 hostname: dot-separated labels of ASCII alphanumerics
/// and inner hyphens.
#[must_use]
pub fn is_valid_domain(domain: &str) -> bool {
    domain.len() <= 253
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, host)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
        && host.contains('.')
        && is_valid_domain(host)
}

fn is_valid_timezone(tz: &str) -> bool {
    !tz.is_empty()
        && tz
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/_+-".contains(c))
}

fn is_plain_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
