use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{Configuration, RemoteStorage};
use crate::error::{DeployError, DeployResult};
use crate::files;

pub const DOMAIN: &str = "DOMAIN";
pub const SSL_EMAIL: &str = "SSL_EMAIL";
pub const N8N_HOST: &str = "N8N_HOST";
pub const N8N_PORT: &str = "N8N_PORT";
pub const N8N_PROTOCOL: &str = "N8N_PROTOCOL";
pub const WEBHOOK_URL: &str = "WEBHOOK_URL";
pub const GENERIC_TIMEZONE: &str = "GENERIC_TIMEZONE";
pub const N8N_ENCRYPTION_KEY: &str = "N8N_ENCRYPTION_KEY";
pub const POSTGRES_USER: &str = "POSTGRES_USER";
pub const POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
pub const POSTGRES_DB: &str = "POSTGRES_DB";
pub const BACKUP_DIR: &str = "BACKUP_DIR";
pub const BACKUP_RETENTION_DAYS: &str = "BACKUP_RETENTION_DAYS";
pub const S3_BUCKET: &str = "S3_BUCKET";
pub const S3_PREFIX: &str = "S3_PREFIX";
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";

const MANAGED_KEYS: &[&str] = &[
    DOMAIN,
    SSL_EMAIL,
    N8N_HOST,
    N8N_PORT,
    N8N_PROTOCOL,
    WEBHOOK_URL,
    GENERIC_TIMEZONE,
    N8N_ENCRYPTION_KEY,
    POSTGRES_USER,
    POSTGRES_PASSWORD,
    POSTGRES_DB,
    BACKUP_DIR,
    BACKUP_RETENTION_DAYS,
    S3_BUCKET,
    S3_PREFIX,
    AWS_ACCESS_KEY_ID,
    AWS_SECRET_ACCESS_KEY,
    AWS_DEFAULT_REGION,
];

/// Persists the [`Configuration`] as a `KEY=value` env file that
/// docker compose also reads for variable interpolation.
///
/// The file is written with mode 0600 through a staging file and a
/// rename. Secrets already on disk always win over the secrets of
/// the configuration being saved.
#[derive(Debug, Clone)]
pub struct EnvironmentStore {
    path: PathBuf,
}

impl EnvironmentStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted configuration, `None` if none exists yet.
    pub fn load(&self) -> DeployResult<Option<Configuration>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => parse(&content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `config`, keeping any secret the file already holds.
    /// Returns the configuration as it now exists on disk.
    pub fn save(&self, mut config: Configuration) -> DeployResult<Configuration> {
        if let Some(previous) = self.load()? {
            config.inherit_secrets(previous);
        }

        files::write_atomic(&self.path, render(&config).as_bytes(), files::PRIVATE).map_err(
            |source| DeployError::PersistenceError {
                path: self.path.clone(),
                source,
            },
        )?;

        tracing::info!(path = %self.path.display(), "configuration saved");
        Ok(config)
    }
}

/// Serialize to env-file text. Derived keys (`N8N_HOST`,
/// `WEBHOOK_URL`) are written for compose interpolation and ignored
/// on load.
#[must_use]
pub fn render(config: &Configuration) -> String {
    let mut out = String::from("# Managed by n8n-deploy. Secrets are generated once; keep this file private.\n");
    let mut put = |key: &str, value: &str| {
        let _ = writeln!(out, "{key}={value}");
    };

    put(DOMAIN, &config.domain);
    put(SSL_EMAIL, &config.admin_email);
    put(N8N_HOST, &config.domain);
    put(N8N_PORT, &config.port.to_string());
    put(N8N_PROTOCOL, &config.protocol);
    put(WEBHOOK_URL, &config.webhook_url());
    put(GENERIC_TIMEZONE, &config.timezone);
    if let Some(key) = &config.encryption_key {
        put(N8N_ENCRYPTION_KEY, key.expose_secret());
    }
    put(POSTGRES_USER, &config.database.user);
    if let Some(password) = &config.database.password {
        put(POSTGRES_PASSWORD, password.expose_secret());
    }
    put(POSTGRES_DB, &config.database.name);
    put(BACKUP_DIR, &config.backup.dir.to_string_lossy());
    put(BACKUP_RETENTION_DAYS, &config.backup.retention_days.to_string());
    if let Some(remote) = &config.remote {
        put(S3_BUCKET, &remote.bucket);
        put(S3_PREFIX, &remote.prefix);
        put(AWS_ACCESS_KEY_ID, &remote.access_key_id);
        put(AWS_SECRET_ACCESS_KEY, remote.secret_access_key.expose_secret());
        put(AWS_DEFAULT_REGION, &remote.region);
    }
    for (key, value) in &config.extra {
        put(key, value);
    }

    out
}

/// Parse env-file text. Missing keys fall back to defaults, except
/// domain and email which stay empty so validation can name them.
pub fn parse(content: &str) -> DeployResult<Configuration> {
    let mut values = parse_pairs(content);
    let mut take = |key: &str| values.shift_remove(key).filter(|v| !v.is_empty());
    let mut problems = Vec::new();

    let mut config = Configuration::new(
        &take(DOMAIN).unwrap_or_default(),
        &take(SSL_EMAIL).unwrap_or_default(),
    );

    if let Some(port) = take(N8N_PORT) {
        match port.parse() {
            Ok(port) => config.port = port,
            Err(_) => problems.push(format!("{N8N_PORT} (not a port number: '{port}')")),
        }
    }
    if let Some(protocol) = take(N8N_PROTOCOL) {
        config.protocol = protocol;
    }
    if let Some(tz) = take(GENERIC_TIMEZONE) {
        config.timezone = tz;
    }
    config.encryption_key = take(N8N_ENCRYPTION_KEY).map(SecretString::from);
    if let Some(user) = take(POSTGRES_USER) {
        config.database.user = user;
    }
    config.database.password = take(POSTGRES_PASSWORD).map(SecretString::from);
    if let Some(name) = take(POSTGRES_DB) {
        config.database.name = name;
    }
    if let Some(dir) = take(BACKUP_DIR) {
        config.backup.dir = PathBuf::from(dir);
    }
    if let Some(days) = take(BACKUP_RETENTION_DAYS) {
        match days.parse() {
            Ok(days) => config.backup.retention_days = days,
            Err(_) => problems.push(format!(
                "{BACKUP_RETENTION_DAYS} (not a number of days: '{days}')"
            )),
        }
    }

    let bucket = take(S3_BUCKET);
    let prefix = take(S3_PREFIX).unwrap_or_default();
    let access_key_id = take(AWS_ACCESS_KEY_ID).unwrap_or_default();
    let secret_access_key = take(AWS_SECRET_ACCESS_KEY).unwrap_or_default();
    let region = take(AWS_DEFAULT_REGION).unwrap_or_default();
    config.remote = bucket.map(|bucket| RemoteStorage {
        bucket,
        prefix,
        region,
        access_key_id,
        secret_access_key: SecretString::from(secret_access_key),
    });

    // Derived on save.
    take(N8N_HOST);
    take(WEBHOOK_URL);

    if !problems.is_empty() {
        return Err(DeployError::InvalidConfiguration(problems));
    }

    config.extra = values
        .into_iter()
        .filter(|(key, _)| !MANAGED_KEYS.contains(&key.as_str()))
        .collect();
    Ok(config)
}

fn parse_pairs(content: &str) -> IndexMap<String, String> {
    let mut pairs = IndexMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        pairs.insert(key.trim().to_string(), unquote(value.trim()).to_string());
    }
    pairs
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_unquotes() {
        let config = parse(
            "# header\n\
             DOMAIN=n8n.example.com\n\
             SSL_EMAIL=\"ops@example.com\"\n\
             export GENERIC_TIMEZONE='Europe/Berlin'\n\
             \n\
             BACKUP_RETENTION_DAYS=14\n",
        )
        .unwrap();

        assert_eq!(config.domain, "n8n.example.com");
        assert_eq!(config.admin_email, "ops@example.com");
        assert_eq!(config.timezone, "Europe/Berlin");
        assert_eq!(config.backup.retention_days, 14);
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn parse_rejects_bad_numbers() {
        let err = parse("N8N_PORT=http\nBACKUP_RETENTION_DAYS=week\n").unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("N8N_PORT"));
        assert!(msg.contains("BACKUP_RETENTION_DAYS"));
    }

    #[test]
    fn parse_keeps_unmanaged_keys() {
        let config = parse("DOMAIN=a.example.com\nN8N_SMTP_HOST=mail.example.com\nWEBHOOK_URL=x\n").unwrap();

        assert_eq!(config.extra.len(), 1);
        assert_eq!(
            config.extra.get("N8N_SMTP_HOST").map(String::as_str),
            Some("mail.example.com")
        );
    }

    #[test]
    fn parse_remote_only_with_bucket() {
        let without = parse("S3_PREFIX=n8n\n").unwrap();
        let with = parse("S3_BUCKET=backups\nAWS_DEFAULT_REGION=eu-west-1\n").unwrap();

        assert!(without.remote.is_none());
        let remote = with.remote.unwrap();
        assert_eq!(remote.bucket, "backups");
        assert_eq!(remote.region, "eu-west-1");
    }

    #[test]
    fn render_writes_derived_keys() {
        let config = Configuration::new("n8n.example.com", "ops@example.com");

        let text = render(&config);

        assert!(text.contains("N8N_HOST=n8n.example.com\n"));
        assert!(text.contains("WEBHOOK_URL=https://n8n.example.com/\n"));
        assert!(!text.contains("S3_BUCKET"));
    }
}
