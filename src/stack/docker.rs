use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::cmd::Invocation;
use crate::error::DeployResult;
use crate::stack::ComposeEngine;

const PULL_TIMEOUT: Duration = Duration::from_secs(900);

/// `docker compose` (v2 plugin).
#[derive(Debug, Default)]
pub struct DockerCompose;

impl DockerCompose {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// `docker compose -f <file>` with the project directory set to
    /// the file's directory so `.env` interpolation applies.
    #[must_use]
    pub fn invocation(compose_file: &Path) -> Invocation {
        let mut inv = Invocation::new("docker")
            .args(["compose", "-f"])
            .arg(compose_file);
        if let Some(dir) = compose_file.parent() {
            inv = inv.current_dir(dir);
        }
        inv
    }
}

impl ComposeEngine for DockerCompose {
    fn pull(&self, compose_file: &Path) -> DeployResult<()> {
        Self::invocation(compose_file)
            .args(["pull", "--quiet"])
            .timeout(PULL_TIMEOUT)
            .run_interactive()
    }

    fn up(&self, compose_file: &Path) -> DeployResult<()> {
        Self::invocation(compose_file)
            .args(["up", "-d", "--remove-orphans", "--wait"])
            .run_interactive()
    }

    fn running_services(&self, compose_file: &Path) -> DeployResult<Vec<String>> {
        let out = Self::invocation(compose_file)
            .args(["ps", "--status", "running", "--format", "json"])
            .timeout(Duration::from_secs(60))
            .run()?;
        parse_ps_output(&out)
    }
}

#[derive(Deserialize)]
struct PsEntry {
    #[serde(rename = "Service")]
    service: String,
}

/// Parse `docker compose ps --format json`. Older releases print a
/// JSON array, newer ones one object per line.
pub fn parse_ps_output(out: &str) -> DeployResult<Vec<String>> {
    let trimmed = out.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<PsEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str::<PsEntry>)
            .collect::<Result<_, _>>()?
    };

    Ok(entries.into_iter().map(|e| e.service).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array() {
        let out = r#"[{"Name":"n8n","Service":"n8n","State":"running"},{"Name":"n8n-postgres","Service":"postgres","State":"running"}]"#;

        assert_eq!(parse_ps_output(out).unwrap(), vec!["n8n", "postgres"]);
    }

    #[test]
    fn parses_json_lines() {
        let out = "{\"Service\":\"postgres\",\"State\":\"running\"}\n{\"Service\":\"n8n\",\"State\":\"running\"}\n";

        assert_eq!(parse_ps_output(out).unwrap(), vec!["postgres", "n8n"]);
    }

    #[test]
    fn empty_output_means_nothing_running() {
        assert!(parse_ps_output("\n").unwrap().is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_ps_output("not json").is_err());
    }

    #[test]
    fn invocation_targets_compose_file() {
        let inv = DockerCompose::invocation(Path::new("/opt/n8n/docker-compose.yml"));

        assert_eq!(inv.describe(), "docker compose -f /opt/n8n/docker-compose.yml");
    }
}
