use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("secure random source unavailable: {0}")]
    EntropySourceUnavailable(String),

    #[error("failed to persist {}: {source}", .path.display())]
    PersistenceError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {}", .0.join(", "))]
    InvalidConfiguration(Vec<String>),

    #[error("invalid proxy configuration: {0}")]
    InvalidProxyConfig(String),

    #[error("certificate error: {0}")]
    CertificateError(String),

    #[error("configuration missing: {} not found", .0.display())]
    ConfigurationMissing(PathBuf),

    #[error("database dump failed: {0}")]
    DumpFailed(String),

    #[error("remote sync failed: {0}")]
    SyncFailed(String),

    #[error("failed to prune {}: {reason}", .path.display())]
    RetentionPruneFailed { path: PathBuf, reason: String },

    #[error("another backup run holds the lock {}", .0.display())]
    BackupInProgress(PathBuf),

    #[error("service '{0}' is not running after docker compose up")]
    ServiceNotRunning(String),

    #[error("command failed ({status}): {command}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command timed out after {}s: {command}", .after.as_secs())]
    CommandTimedOut { command: String, after: Duration },

    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: &'static str,
        #[source]
        source: Box<DeployError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Template(#[from] tera::Error),
}

impl DeployError {
    /// Whether this error aborts its parent operation. Certificate,
    /// remote sync and retention failures leave a degraded but
    /// working deployment behind.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::CertificateError(_) | Self::SyncFailed(_) | Self::RetentionPruneFailed { .. }
        )
    }

    pub(crate) fn step(step: &'static str, source: Self) -> Self {
        Self::StepFailed {
            step,
            source: Box::new(source),
        }
    }
}
