pub mod certbot;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DeployError, DeployResult};
use crate::proxy::TlsBinding;
use crate::schedule::{self, CronEntry, CronTable};

/// Renew once less than this much validity is left.
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A TLS credential for one domain, as files on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub domain: String,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

impl Certificate {
    #[must_use]
    pub fn tls_binding(&self) -> TlsBinding {
        TlsBinding {
            certificate: self.certificate.to_string_lossy().into_owned(),
            private_key: self.private_key.to_string_lossy().into_owned(),
        }
    }
}

/// Issues certificates and inspects the ones on disk.
pub trait CertificateAuthority {
    /// Where the certificate for `domain` lives (whether or not it
    /// exists yet).
    fn locate(&self, domain: &str) -> Certificate;

    /// Whether `cert` exists and stays valid for at least `margin`.
    fn is_current(&self, cert: &Certificate, margin: Duration) -> DeployResult<bool>;

    /// Obtain a certificate for `domain`.
    fn issue(&self, domain: &str, email: &str) -> DeployResult<()>;

    /// The recurring job that renews every managed certificate.
    fn renewal_entry(&self) -> CronEntry;
}

/// Ensures a usable certificate exists and that renewal is
/// scheduled. Every failure here surfaces as
/// [`DeployError::CertificateError`], which callers treat as
/// non-fatal.
pub struct CertificateManager<'a> {
    authority: &'a dyn CertificateAuthority,
    cron: &'a dyn CronTable,
}

impl<'a> CertificateManager<'a> {
    #[must_use]
    pub fn new(authority: &'a dyn CertificateAuthority, cron: &'a dyn CronTable) -> Self {
        Self { authority, cron }
    }

    /// No-op when a certificate with more than [`RENEWAL_MARGIN`] of
    /// validity already exists.
    pub fn ensure(&self, domain: &str, email: &str) -> DeployResult<Certificate> {
        self.ensure_inner(domain, email).map_err(|e| match e {
            DeployError::CertificateError(_) => e,
            other => DeployError::CertificateError(other.to_string()),
        })
    }

    fn ensure_inner(&self, domain: &str, email: &str) -> DeployResult<Certificate> {
        let cert = self.authority.locate(domain);

        if self.authority.is_current(&cert, RENEWAL_MARGIN)? {
            tracing::info!(%domain, "certificate current, skipping issuance");
        } else {
            tracing::info!(%domain, "requesting certificate");
            self.authority.issue(domain, email)?;
            if !self.authority.is_current(&cert, Duration::ZERO)? {
                return Err(DeployError::CertificateError(format!(
                    "issuance reported success but no certificate at {}",
                    cert.certificate.display()
                )));
            }
        }

        if schedule::register(self.cron, &self.authority.renewal_entry())? {
            tracing::info!("certificate renewal scheduled");
        }
        Ok(cert)
    }
}
