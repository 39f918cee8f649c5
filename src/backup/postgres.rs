use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::backup::DatabaseDumper;
use crate::compose::POSTGRES_SERVICE;
use crate::config::Configuration;
use crate::error::{DeployError, DeployResult};
use crate::stack::docker::DockerCompose;

const DUMP_TIMEOUT: Duration = Duration::from_secs(1800);

/// `pg_dump` inside the running postgres service.
#[derive(Debug, Clone)]
pub struct DockerPgDump {
    compose_file: PathBuf,
}

impl DockerPgDump {
    #[must_use]
    pub fn new(compose_file: impl Into<PathBuf>) -> Self {
        Self {
            compose_file: compose_file.into(),
        }
    }
}

impl DatabaseDumper for DockerPgDump {
    fn dump(&self, config: &Configuration, out: &mut dyn Write) -> DeployResult<()> {
        let copied = DockerCompose::invocation(&self.compose_file)
            .args(["exec", "-T", POSTGRES_SERVICE, "pg_dump", "-U"])
            .arg(&config.database.user)
            .arg("-d")
            .arg(&config.database.name)
            .timeout(DUMP_TIMEOUT)
            .stream_to(out)
            .map_err(|e| DeployError::DumpFailed(e.to_string()))?;

        if copied == 0 {
            return Err(DeployError::DumpFailed("pg_dump produced no output".into()));
        }
        tracing::debug!(bytes = copied, "database dump streamed");
        Ok(())
    }
}
