pub mod nginx;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::is_valid_domain;
use crate::error::{DeployError, DeployResult};
use crate::files;

/// Request body ceiling in megabytes.
pub const MAX_BODY_SIZE_MB: u32 = 50;
/// Upstream read timeout; long-running workflow executions hold the
/// connection open.
pub const READ_TIMEOUT_SECS: u32 = 600;

/// Certificate files served for the domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsBinding {
    pub certificate: String,
    pub private_key: String,
}

/// Routes the public domain to the internal n8n endpoint, with the
/// ACME HTTP-01 challenge path served from a local webroot.
///
/// # Example
///
/// ```
/// use n8n_deploy::ProxyRule;
///
/// let rule = ProxyRule::new("n8n.example.com", "127.0.0.1:5678");
///
/// assert_eq!(rule.max_body_size_mb, 50);
/// assert!(rule.read_timeout_secs >= 600);
/// assert!(rule.tls.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRule {
    pub domain: String,
    pub upstream: String,
    pub acme_webroot: String,
    pub max_body_size_mb: u32,
    pub read_timeout_secs: u32,
    pub tls: Option<TlsBinding>,
}

impl ProxyRule {
    #[must_use]
    pub fn new(domain: &str, upstream: &str) -> Self {
        Self {
            domain: domain.to_string(),
            upstream: upstream.to_string(),
            acme_webroot: "/var/www/certbot".to_string(),
            max_body_size_mb: MAX_BODY_SIZE_MB,
            read_timeout_secs: READ_TIMEOUT_SECS,
            tls: None,
        }
    }

    #[must_use]
    pub fn acme_webroot(mut self, path: &Path) -> Self {
        self.acme_webroot = path.to_string_lossy().into_owned();
        self
    }

    #[must_use]
    pub fn tls(mut self, binding: TlsBinding) -> Self {
        self.tls = Some(binding);
        self
    }

    /// Reject values that would change the structure of the rendered
    /// file rather than fill a slot in it.
    pub fn validate(&self) -> DeployResult<()> {
        let mut problems = Vec::new();

        if !is_valid_domain(&self.domain) {
            problems.push(format!("domain '{}'", self.domain));
        }
        if !is_valid_upstream(&self.upstream) {
            problems.push(format!("upstream '{}'", self.upstream));
        }
        if !is_safe_path(&self.acme_webroot) {
            problems.push(format!("acme webroot '{}'", self.acme_webroot));
        }
        if let Some(tls) = &self.tls {
            for path in [&tls.certificate, &tls.private_key] {
                if !is_safe_path(path) {
                    problems.push(format!("tls path '{path}'"));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DeployError::InvalidProxyConfig(problems.join(", ")))
        }
    }
}

fn is_valid_upstream(upstream: &str) -> bool {
    upstream.rsplit_once(':').is_some_and(|(host, port)| {
        !host.is_empty()
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
            && port.parse::<u16>().is_ok_and(|p| p > 0)
    })
}

fn is_safe_path(path: &str) -> bool {
    path.starts_with('/')
        && !path
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || ";{}'\"$#".contains(c))
}

/// Control surface of the running proxy process.
pub trait ProxyControl {
    /// Check the on-disk configuration without applying it.
    fn validate(&self) -> DeployResult<()>;

    /// Gracefully reload the running proxy with the on-disk
    /// configuration.
    fn reload(&self) -> DeployResult<()>;
}

/// Writes the site file, validates it, and reloads the proxy.
///
/// A candidate that fails validation is rolled back on disk and the
/// proxy is never reloaded, so the running process keeps serving
/// the previous rule.
pub struct ReverseProxyConfigurator<'a> {
    site: PathBuf,
    control: &'a dyn ProxyControl,
}

impl<'a> ReverseProxyConfigurator<'a> {
    #[must_use]
    pub fn new(site: impl Into<PathBuf>, control: &'a dyn ProxyControl) -> Self {
        Self {
            site: site.into(),
            control,
        }
    }

    /// Render `rule` and make it the live configuration.
    pub fn apply(&self, rule: &ProxyRule) -> DeployResult<()> {
        let rendered = nginx::render(rule)?;
        self.activate(&rendered)?;
        tracing::info!(domain = %rule.domain, tls = rule.tls.is_some(), "proxy rule active");
        Ok(())
    }

    /// Install already-rendered site text. Unchanged text is a no-op.
    pub fn activate(&self, rendered: &str) -> DeployResult<()> {
        let previous = match fs::read_to_string(&self.site) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if previous.as_deref() == Some(rendered) {
            tracing::debug!(site = %self.site.display(), "proxy rule unchanged");
            return Ok(());
        }

        files::write_atomic(&self.site, rendered.as_bytes(), files::PUBLIC)?;

        if let Err(err) = self.control.validate() {
            self.restore(previous.as_deref())?;
            tracing::error!(site = %self.site.display(), "rejected proxy configuration, previous rule kept");
            return Err(match err {
                DeployError::InvalidProxyConfig(_) => err,
                other => DeployError::InvalidProxyConfig(other.to_string()),
            });
        }

        self.control.reload()
    }

    fn restore(&self, previous: Option<&str>) -> DeployResult<()> {
        match previous {
            Some(content) => files::write_atomic(&self.site, content.as_bytes(), files::PUBLIC)?,
            None => fs::remove_file(&self.site)?,
        }
        Ok(())
    }
}
