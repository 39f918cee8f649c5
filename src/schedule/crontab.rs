use std::time::Duration;

use crate::cmd::Invocation;
use crate::error::{DeployError, DeployResult};
use crate::schedule::CronTable;

/// The invoking account's crontab, via `crontab -l` / `crontab -`.
#[derive(Debug, Default)]
pub struct SystemCrontab;

impl SystemCrontab {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CronTable for SystemCrontab {
    fn read(&self) -> DeployResult<String> {
        let output = Invocation::new("crontab")
            .arg("-l")
            .timeout(Duration::from_secs(30))
            .output()?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab") {
            Ok(String::new())
        } else {
            Err(DeployError::CommandFailed {
                command: "crontab -l".to_string(),
                status: output.status,
                stderr: stderr.trim().to_string(),
            })
        }
    }

    fn write(&self, content: &str) -> DeployResult<()> {
        Invocation::new("crontab")
            .arg("-")
            .stdin(content)
            .timeout(Duration::from_secs(30))
            .run()?;
        Ok(())
    }
}
