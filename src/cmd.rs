use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::error::{DeployError, DeployResult};

/// Upper bound for any single external step (package install,
/// image pull, certificate issuance).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// An external program invocation with a hard deadline. A child
/// still running when the deadline passes is killed and the step
/// reports [`DeployError::CommandTimedOut`].
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
}

impl Invocation {
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Set an environment variable for the child only. Values never
    /// show up in [`Invocation::describe`].
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    #[must_use]
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable command line for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    /// Run and capture the raw output without judging the exit code.
    pub fn output(&self) -> DeployResult<Output> {
        block_on(self.capture())?
    }

    /// Run and return trimmed stdout. Fails on a non-zero exit code.
    pub fn run(&self) -> DeployResult<String> {
        let bytes = self.run_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }

    /// Run and return stdout untouched. Fails on a non-zero exit code.
    pub fn run_bytes(&self) -> DeployResult<Vec<u8>> {
        let output = self.output()?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(self.failed(output.status, &output.stderr))
        }
    }

    /// Run and copy stdout into `out` as it arrives, returning the
    /// number of bytes copied. Fails on a non-zero exit code.
    pub fn stream_to(&self, out: &mut dyn Write) -> DeployResult<u64> {
        block_on(async {
            let mut child = self
                .command()
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| self.spawn_error(e))?;
            let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
            else {
                return Err(DeployError::Io(std::io::Error::other("child pipes unavailable")));
            };

            let copy = async {
                let mut copied = 0u64;
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    let n = stdout.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    out.write_all(&buf[..n])?;
                    copied += n as u64;
                }
                Ok::<_, std::io::Error>(copied)
            };
            let drain = async {
                let mut err = Vec::new();
                stderr.read_to_end(&mut err).await.map(|_| err)
            };
            let work = async {
                let (copied, err) = tokio::join!(copy, drain);
                let status = child.wait().await?;
                Ok::<_, std::io::Error>((copied?, err?, status))
            };

            // On expiry the child is killed when it drops below.
            match tokio::time::timeout(self.timeout, work).await {
                Ok(result) => {
                    let (copied, err, status) = result?;
                    if status.success() {
                        Ok(copied)
                    } else {
                        Err(self.failed(status, &err))
                    }
                }
                Err(_) => Err(self.timed_out()),
            }
        })?
    }

    /// Run with stdin/stdout/stderr inherited from this process.
    pub fn run_interactive(&self) -> DeployResult<()> {
        block_on(async {
            let mut child = self
                .command()
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|e| self.spawn_error(e))?;

            match tokio::time::timeout(self.timeout, child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    if status.success() {
                        Ok(())
                    } else {
                        Err(self.failed(status, &[]))
                    }
                }
                Err(_) => {
                    child.kill().await?;
                    Err(self.timed_out())
                }
            }
        })?
    }

    async fn capture(&self) -> DeployResult<Output> {
        let stdin = if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = self
            .command()
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let pipe = child.stdin.take();
        let data = self.stdin.clone();
        let work = async move {
            if let (Some(mut pipe), Some(data)) = (pipe, data) {
                pipe.write_all(&data).await?;
            }
            child.wait_with_output().await
        };

        // Dropping `work` on expiry drops the child, which kills it.
        match tokio::time::timeout(self.timeout, work).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(self.timed_out()),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }

    fn spawn_error(&self, e: std::io::Error) -> DeployError {
        if e.kind() == std::io::ErrorKind::NotFound {
            DeployError::CommandNotFound(self.program.clone())
        } else {
            DeployError::Io(e)
        }
    }

    fn failed(&self, status: ExitStatus, stderr: &[u8]) -> DeployError {
        let stderr = String::from_utf8_lossy(stderr).trim().to_string();
        if !stderr.is_empty() {
            tracing::debug!(command = %self.describe(), %stderr, "command failed");
        }
        DeployError::CommandFailed {
            command: self.describe(),
            status,
            stderr,
        }
    }

    fn timed_out(&self) -> DeployError {
        DeployError::CommandTimedOut {
            command: self.describe(),
            after: self.timeout,
        }
    }
}

/// Check if a command exists on PATH.
#[must_use]
pub fn command_exists(program: &str) -> bool {
    Invocation::new("which")
        .arg(program)
        .timeout(Duration::from_secs(10))
        .output()
        .is_ok_and(|o| o.status.success())
}

fn block_on<F: Future>(future: F) -> DeployResult<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}
