use std::path::PathBuf;
use std::time::Duration;

use crate::certificate::{Certificate, CertificateAuthority};
use crate::cmd::Invocation;
use crate::error::{DeployError, DeployResult};
use crate::schedule::CronEntry;

const ISSUE_TIMEOUT: Duration = Duration::from_secs(300);

/// Let's Encrypt via `certbot certonly --webroot`, with expiry checks
/// through `openssl x509 -checkend`.
#[derive(Debug, Clone)]
pub struct Certbot {
    pub webroot: PathBuf,
    pub live_dir: PathBuf,
}

impl Certbot {
    #[must_use]
    pub fn new(webroot: impl Into<PathBuf>, live_dir: impl Into<PathBuf>) -> Self {
        Self {
            webroot: webroot.into(),
            live_dir: live_dir.into(),
        }
    }
}

impl CertificateAuthority for Certbot {
    fn locate(&self, domain: &str) -> Certificate {
        let dir = self.live_dir.join(domain);
        Certificate {
            domain: domain.to_string(),
            certificate: dir.join("fullchain.pem"),
            private_key: dir.join("privkey.pem"),
        }
    }

    fn is_current(&self, cert: &Certificate, margin: Duration) -> DeployResult<bool> {
        if !cert.certificate.exists() || !cert.private_key.exists() {
            return Ok(false);
        }

        // Exit 0: still valid `margin` seconds from now. Exit 1:
        // expires within that window.
        let output = Invocation::new("openssl")
            .args(["x509", "-noout", "-checkend"])
            .arg(margin.as_secs().to_string())
            .arg("-in")
            .arg(&cert.certificate)
            .timeout(Duration::from_secs(30))
            .output()?;
        Ok(output.status.success())
    }

    fn issue(&self, domain: &str, email: &str) -> DeployResult<()> {
        Invocation::new("certbot")
            .args(["certonly", "--webroot", "-w"])
            .arg(&self.webroot)
            .args(["-d", domain, "--email", email])
            .args([
                "--agree-tos",
                "--non-interactive",
                "--keep-until-expiring",
            ])
            .timeout(ISSUE_TIMEOUT)
            .run()
            .map(drop)
            .map_err(|e| match e {
                DeployError::CommandFailed { stderr, .. } => DeployError::CertificateError(stderr),
                other => other,
            })
    }

    fn renewal_entry(&self) -> CronEntry {
        CronEntry::new(
            "17 3 * * *",
            "certbot renew --quiet --deploy-hook 'nginx -s reload'",
        )
        .identity(&["certbot", "renew"])
    }
}
