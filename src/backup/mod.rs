pub mod archive;
pub mod lock;
pub mod postgres;
pub mod retention;
pub mod s3;

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::config::{Configuration, RemoteStorage};
use crate::env_store::EnvironmentStore;
use crate::error::{DeployError, DeployResult};
use crate::files;
use crate::layout::{DATA_DIR_NAME, Layout};

use self::lock::BackupLock;

/// `YYYYMMDD-HHMM`, shared by both files of one artifact.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M";
pub const DUMP_PREFIX: &str = "postgres-";
pub const DUMP_SUFFIX: &str = ".sql.gz";
pub const ARCHIVE_PREFIX: &str = "n8n-config-";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";
/// Marks a file still being written. Never matched as an artifact.
pub const STAGING_SUFFIX: &str = ".partial";

/// Produces a plain SQL dump of the application database.
pub trait DatabaseDumper {
    fn dump(&self, config: &Configuration, out: &mut dyn Write) -> DeployResult<()>;
}

/// Mirrors the local backup directory to remote object storage.
/// Uploads new and changed files only; never deletes remotely.
pub trait RemoteSync {
    fn sync(&self, dir: &Path, target: &RemoteStorage) -> DeployResult<()>;
}

/// One point-in-time backup: database dump plus state archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub timestamp: String,
    pub dump: PathBuf,
    pub archive: PathBuf,
}

#[derive(Debug)]
pub enum SyncOutcome {
    /// No remote target configured; nothing was contacted.
    Skipped,
    Synced,
    Failed(DeployError),
}

/// What a backup run did. Prune and sync failures are recorded here
/// rather than failing the run.
#[derive(Debug)]
pub struct BackupReport {
    pub artifact: BackupArtifact,
    pub pruned: Vec<PathBuf>,
    pub prune_failures: Vec<DeployError>,
    pub sync: SyncOutcome,
}

/// Dump, archive, prune, mirror.
pub struct BackupExecutor<'a> {
    store: EnvironmentStore,
    layout: Layout,
    dumper: &'a dyn DatabaseDumper,
    remote: &'a dyn RemoteSync,
}

impl<'a> BackupExecutor<'a> {
    #[must_use]
    pub fn new(
        layout: Layout,
        dumper: &'a dyn DatabaseDumper,
        remote: &'a dyn RemoteSync,
    ) -> Self {
        Self {
            store: EnvironmentStore::new(layout.env_file()),
            layout,
            dumper,
            remote,
        }
    }

    pub fn run(&self) -> DeployResult<BackupReport> {
        self.run_at(Local::now())
    }

    /// Run as if the clock read `now`. Names the artifact and anchors
    /// the retention window.
    pub fn run_at(&self, now: DateTime<Local>) -> DeployResult<BackupReport> {
        let config = self
            .store
            .load()?
            .ok_or_else(|| DeployError::ConfigurationMissing(self.store.path().to_path_buf()))?;

        let dir = config.backup.dir.clone();
        files::ensure_dir(&dir, 0o700)?;
        let _lock = BackupLock::acquire(&self.layout.lock_file())?;

        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        tracing::info!(%timestamp, dir = %dir.display(), "backup started");

        clear_staging(&dir);

        let dump = dir.join(format!("{DUMP_PREFIX}{timestamp}{DUMP_SUFFIX}"));
        let archive = dir.join(format!("{ARCHIVE_PREFIX}{timestamp}{ARCHIVE_SUFFIX}"));
        let dump_staging = staging_path(&dump);
        let archive_staging = staging_path(&archive);

        self.write_dump(&config, &dump_staging)?;
        let written = archive::write(
            &archive_staging,
            &[
                (DATA_DIR_NAME, self.layout.data_dir()),
                (".env", self.layout.env_file()),
                ("docker-compose.yml", self.layout.compose_file()),
            ],
        )
        .and_then(|()| {
            fs::rename(&archive_staging, &archive)?;
            fs::rename(&dump_staging, &dump)?;
            Ok(())
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&archive_staging);
            let _ = fs::remove_file(&dump_staging);
            return Err(e);
        }
        tracing::info!(dump = %dump.display(), archive = %archive.display(), "backup artifact written");

        let pruned = retention::prune(&dir, config.backup.retention_days, SystemTime::from(now));
        for failure in &pruned.failures {
            tracing::warn!(error = %failure, "retention prune failed");
        }

        let sync = match &config.remote {
            None => SyncOutcome::Skipped,
            Some(target) => match self.remote.sync(&dir, target) {
                Ok(()) => {
                    tracing::info!(bucket = %target.bucket, "backups mirrored");
                    SyncOutcome::Synced
                }
                Err(e) => {
                    let err = DeployError::SyncFailed(e.to_string());
                    tracing::warn!(error = %err, "local backup kept");
                    SyncOutcome::Failed(err)
                }
            },
        };

        Ok(BackupReport {
            artifact: BackupArtifact {
                timestamp,
                dump,
                archive,
            },
            pruned: pruned.removed,
            prune_failures: pruned.failures,
            sync,
        })
    }

    /// A failed dump removes its staging file and nothing else.
    fn write_dump(&self, config: &Configuration, staging: &Path) -> DeployResult<()> {
        self.try_write_dump(config, staging).map_err(|e| {
            let _ = fs::remove_file(staging);
            match e {
                DeployError::DumpFailed(_) => e,
                other => DeployError::DumpFailed(other.to_string()),
            }
        })
    }

    fn try_write_dump(&self, config: &Configuration, path: &Path) -> DeployResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(files::PRIVATE)
            .open(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        self.dumper.dump(config, &mut encoder)?;
        encoder.finish()?.sync_all()?;
        Ok(())
    }
}

/// `dir/.<name>.partial` next to the final artifact path.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    if let Some(file_name) = path.file_name() {
        name.push(file_name);
    }
    name.push(STAGING_SUFFIX);
    path.with_file_name(name)
}

/// Remove staging files left by a run that was killed mid-write.
/// Only called with the backup lock held.
fn clear_staging(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') && name.ends_with(STAGING_SUFFIX) {
            match fs::remove_file(entry.path()) {
                Ok(()) => tracing::info!(file = name, "removed leftover staging file"),
                Err(e) => tracing::warn!(file = name, error = %e, "could not remove staging file"),
            }
        }
    }
}
