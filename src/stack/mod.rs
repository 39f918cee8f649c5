pub mod docker;

use std::fs;
use std::path::{Path, PathBuf};

use crate::compose::StackDescriptor;
use crate::error::{DeployError, DeployResult};
use crate::files;

/// The container orchestrator, addressed by compose file.
pub trait ComposeEngine {
    /// Fetch every image the file references. Running containers
    /// are not touched.
    fn pull(&self, compose_file: &Path) -> DeployResult<()>;

    /// Converge running containers on the file, recreating only the
    /// services whose definition or image changed.
    fn up(&self, compose_file: &Path) -> DeployResult<()>;

    /// Names of services currently running.
    fn running_services(&self, compose_file: &Path) -> DeployResult<Vec<String>>;
}

/// Writes the stack descriptor and brings the services up.
pub struct StackRunner<'a> {
    engine: &'a dyn ComposeEngine,
    compose_file: PathBuf,
}

impl<'a> StackRunner<'a> {
    #[must_use]
    pub fn new(engine: &'a dyn ComposeEngine, compose_file: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            compose_file: compose_file.into(),
        }
    }

    #[must_use]
    pub fn compose_file(&self) -> &Path {
        &self.compose_file
    }

    /// Write the descriptor to the compose file. Returns whether the
    /// file content changed.
    pub fn write(&self, descriptor: &StackDescriptor) -> DeployResult<bool> {
        let yaml = descriptor.to_yaml()?;
        if fs::read_to_string(&self.compose_file).is_ok_and(|current| current == yaml) {
            return Ok(false);
        }
        files::write_atomic(&self.compose_file, yaml.as_bytes(), files::PUBLIC)?;
        tracing::info!(path = %self.compose_file.display(), "stack descriptor written");
        Ok(true)
    }

    /// Pull first so a failed pull leaves the running stack alone,
    /// then converge and check every service is running.
    pub fn up(&self, descriptor: &StackDescriptor) -> DeployResult<()> {
        self.write(descriptor)?;

        tracing::info!("pulling images");
        self.engine.pull(&self.compose_file)?;

        tracing::info!("starting services");
        self.engine.up(&self.compose_file)?;

        let running = self.engine.running_services(&self.compose_file)?;
        for name in descriptor.service_names() {
            if !running.iter().any(|r| r == name) {
                return Err(DeployError::ServiceNotRunning(name.to_string()));
            }
        }

        tracing::info!(services = running.len(), "stack running");
        Ok(())
    }
}
