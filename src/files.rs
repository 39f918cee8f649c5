use std::fs::{self, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Owner read/write only.
pub const PRIVATE: u32 = 0o600;
/// World-readable, owner-writable.
pub const PUBLIC: u32 = 0o644;

/// Replace `path` with `contents` through a sibling staging file and
/// a rename, so readers observe either the old or the new file.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut staging = path.as_os_str().to_os_string();
    staging.push(".tmp");
    let staging = Path::new(&staging);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(staging)?;
    // `mode` only applies on creation; a leftover staging file keeps
    // whatever it had.
    file.set_permissions(Permissions::from_mode(mode))?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(staging, path)
}

/// Create `dir` (and parents) and set its mode.
pub fn ensure_dir(dir: &Path, mode: u32) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::set_permissions(dir, Permissions::from_mode(mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_with_requested_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(".env");

        write_atomic(&path, b"A=1\n", PRIVATE).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "A=1\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn replaces_existing_file_and_leaves_no_staging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.conf");

        write_atomic(&path, b"old", PUBLIC).unwrap();
        write_atomic(&path, b"new", PUBLIC).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert!(!dir.path().join("site.conf.tmp").exists());
    }
}
