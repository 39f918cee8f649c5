use std::path::Path;
use std::time::Duration;

use secrecy::ExposeSecret;

use crate::backup::RemoteSync;
use crate::cmd::Invocation;
use crate::config::RemoteStorage;
use crate::error::{DeployError, DeployResult};

const SYNC_TIMEOUT: Duration = Duration::from_secs(1800);

/// `aws s3 sync` without `--delete`: uploads only.
#[derive(Debug, Default)]
pub struct AwsCliSync;

impl AwsCliSync {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// `s3://bucket/prefix`, tolerating stray slashes in the prefix.
#[must_use]
pub fn destination(target: &RemoteStorage) -> String {
    let prefix = target.prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("s3://{}", target.bucket)
    } else {
        format!("s3://{}/{prefix}", target.bucket)
    }
}

impl RemoteSync for AwsCliSync {
    fn sync(&self, dir: &Path, target: &RemoteStorage) -> DeployResult<()> {
        let mut aws = Invocation::new("aws")
            .args(["s3", "sync"])
            .arg(dir)
            .arg(destination(target))
            .args(["--exclude", "*.partial"])
            .args(["--region", target.region.as_str(), "--only-show-errors"])
            .env("AWS_DEFAULT_REGION", &target.region)
            .timeout(SYNC_TIMEOUT);
        if !target.access_key_id.is_empty() {
            aws = aws
                .env("AWS_ACCESS_KEY_ID", &target.access_key_id)
                .env(
                    "AWS_SECRET_ACCESS_KEY",
                    target.secret_access_key.expose_secret(),
                );
        }

        aws.run().map(drop).map_err(|e| DeployError::SyncFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn target(prefix: &str) -> RemoteStorage {
        RemoteStorage {
            bucket: "ops-backups".into(),
            prefix: prefix.into(),
            region: "eu-central-1".into(),
            access_key_id: String::new(),
            secret_access_key: SecretString::from(String::new()),
        }
    }

    #[test]
    fn destination_with_prefix() {
        assert_eq!(destination(&target("/n8n/prod/")), "s3://ops-backups/n8n/prod");
    }

    #[test]
    fn destination_without_prefix() {
        assert_eq!(destination(&target("")), "s3://ops-backups");
    }
}
