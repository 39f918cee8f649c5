use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::backup::{ARCHIVE_PREFIX, ARCHIVE_SUFFIX, DUMP_PREFIX, DUMP_SUFFIX};
use crate::error::DeployError;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default)]
pub struct Pruned {
    pub removed: Vec<PathBuf>,
    pub failures: Vec<DeployError>,
}

/// Whether `name` is a backup artifact file this tool produced.
#[must_use]
pub fn is_artifact(name: &str) -> bool {
    (name.starts_with(DUMP_PREFIX) && name.ends_with(DUMP_SUFFIX))
        || (name.starts_with(ARCHIVE_PREFIX) && name.ends_with(ARCHIVE_SUFFIX))
}

/// Delete artifacts in `dir` last modified more than `retention_days`
/// before `now`. Best effort: failures are collected, not raised.
pub fn prune(dir: &Path, retention_days: u32, now: SystemTime) -> Pruned {
    let mut pruned = Pruned::default();
    let cutoff = now
        .checked_sub(DAY * retention_days)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            pruned.failures.push(DeployError::RetentionPruneFailed {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            });
            return pruned;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let is_candidate = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_artifact);
        if !is_candidate {
            continue;
        }

        let outcome = entry
            .metadata()
            .and_then(|m| m.modified())
            .and_then(|modified| {
                if modified < cutoff {
                    fs::remove_file(&path).map(|()| true)
                } else {
                    Ok(false)
                }
            });

        match outcome {
            Ok(true) => {
                tracing::info!(path = %path.display(), "pruned expired backup");
                pruned.removed.push(path);
            }
            Ok(false) => {}
            Err(e) => pruned.failures.push(DeployError::RetentionPruneFailed {
                path,
                reason: e.to_string(),
            }),
        }
    }

    pruned.removed.sort();
    pruned
}
