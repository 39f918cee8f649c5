pub mod crontab;

use std::path::{Path, PathBuf};

use crate::error::DeployResult;

/// Daily at 02:00.
pub const DEFAULT_BACKUP_SCHEDULE: &str = "0 2 * * *";

/// One line in the account's cron table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronEntry {
    pub schedule: String,
    pub command: String,
    /// Tokens that identify this job. Any existing line containing
    /// all of them is replaced on registration.
    pub identity: Vec<String>,
    pub log: Option<PathBuf>,
}

impl CronEntry {
    /// An entry identified by its full command.
    #[must_use]
    pub fn new(schedule: &str, command: &str) -> Self {
        Self {
            schedule: schedule.to_string(),
            command: command.to_string(),
            identity: command.split_whitespace().map(str::to_string).collect(),
            log: None,
        }
    }

    #[must_use]
    pub fn identity(mut self, tokens: &[&str]) -> Self {
        self.identity = tokens.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// Append stdout and stderr of each run to `path`.
    #[must_use]
    pub fn log_to(mut self, path: &Path) -> Self {
        self.log = Some(path.to_path_buf());
        self
    }

    #[must_use]
    pub fn line(&self) -> String {
        match &self.log {
            Some(log) => format!(
                "{} {} >> {} 2>&1",
                self.schedule,
                self.command,
                shell_quote(&log.to_string_lossy())
            ),
            None => format!("{} {}", self.schedule, self.command),
        }
    }

    fn matches(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || self.identity.is_empty() {
            return false;
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        self.identity.iter().all(|id| tokens.contains(&id.as_str()))
    }
}

/// The account's recurring-job table.
pub trait CronTable {
    fn read(&self) -> DeployResult<String>;
    fn write(&self, content: &str) -> DeployResult<()>;
}

/// Quote `word` for the shell cron runs the line with. Plain words
/// pass through unchanged.
#[must_use]
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@+,".contains(c));
    let quoted = if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    };
    // cron turns an unescaped `%` into a newline.
    quoted.replace('%', "\\%")
}

/// Put `entry`'s line where the first line matching its identity
/// was, dropping any later matches. Without a match the line is
/// appended. Unrelated lines and comments keep their order.
#[must_use]
pub fn upsert_entry(content: &str, entry: &CronEntry) -> String {
    let mut replaced = false;
    let mut lines: Vec<String> = Vec::new();
    for line in content.lines() {
        if entry.matches(line) {
            if !replaced {
                lines.push(entry.line());
                replaced = true;
            }
        } else {
            lines.push(line.to_string());
        }
    }

    if !replaced {
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        lines.push(entry.line());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Register `entry` in `table`. Returns whether the table changed.
pub fn register(table: &dyn CronTable, entry: &CronEntry) -> DeployResult<bool> {
    let current = table.read()?;
    let updated = upsert_entry(&current, entry);
    if updated == current {
        return Ok(false);
    }
    table.write(&updated)?;
    Ok(true)
}

/// Installs the recurring backup run.
pub struct BackupScheduler<'a> {
    table: &'a dyn CronTable,
    log: PathBuf,
}

impl<'a> BackupScheduler<'a> {
    #[must_use]
    pub fn new(table: &'a dyn CronTable, log: impl Into<PathBuf>) -> Self {
        Self {
            table,
            log: log.into(),
        }
    }

    /// Schedule `<executable> [args..] backup`. Keyed by the
    /// executable and subcommand, so re-installing replaces the
    /// existing line instead of adding another.
    pub fn install(&self, executable: &Path, args: &[String], schedule: &str) -> DeployResult<()> {
        let exe = shell_quote(&executable.to_string_lossy());
        let mut command = vec![exe.clone()];
        command.extend(args.iter().map(String::as_str).map(shell_quote));
        command.push("backup".to_string());

        let mut identity: Vec<&str> = exe.split_whitespace().collect();
        identity.push("backup");
        let entry = CronEntry::new(schedule, &command.join(" "))
            .identity(&identity)
            .log_to(&self.log);

        if register(self.table, &entry)? {
            tracing::info!(schedule, command = %entry.command, "backup job scheduled");
        } else {
            tracing::info!("backup job already scheduled");
        }
        Ok(())
    }
}
