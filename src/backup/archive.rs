use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::DeployResult;
use crate::files;

/// Write a gzip-compressed tarball at `path` holding each source
/// under its archive name. Missing sources are skipped.
pub fn write(path: &Path, sources: &[(&str, PathBuf)]) -> DeployResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(files::PRIVATE)
        .open(path)?;
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for (name, source) in sources {
        if source.is_dir() {
            tar.append_dir_all(name, source)?;
        } else if source.is_file() {
            tar.append_path_with_name(source, name)?;
        } else {
            tracing::debug!(source = %source.display(), "not present, skipped");
        }
    }

    tar.into_inner()?.finish()?.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;

    #[test]
    fn archives_dirs_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("nodes")).unwrap();
        fs::write(data.join("config"), "{}").unwrap();
        fs::write(dir.path().join(".env"), "A=1\n").unwrap();
        let out = dir.path().join("out.tar.gz");

        write(
            &out,
            &[
                ("n8n_data", data),
                (".env", dir.path().join(".env")),
                ("absent", dir.path().join("absent")),
            ],
        )
        .unwrap();

        let mut names: Vec<String> = tar::Archive::new(GzDecoder::new(fs::File::open(&out).unwrap()))
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();

        assert!(names.contains(&".env".to_string()));
        assert!(names.iter().any(|n| n == "n8n_data/config"));
        assert!(!names.iter().any(|n| n.starts_with("absent")));
    }
}
