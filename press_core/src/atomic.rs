//! Crash-safe replacement of the calibration record on disk.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Hidden sibling the new contents are staged in: `dir/.name.tmp`.
fn staging_path(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let mut staged = OsString::from(".");
    staged.push(name);
    staged.push(".tmp");
    Ok(path.with_file_name(staged))
}

/// Replace `path` with `bytes` so a power cut leaves either the old record
/// or the new one. Missing parent directories are created.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
    if let Some(dir) = dir {
        fs::create_dir_all(dir)?;
    }
    let staged = staging_path(path)?;
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&staged)?;
    if let Err(e) = f.write_all(bytes).and_then(|()| f.sync_all()) {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }
    drop(f);
    fs::rename(&staged, path)?;

    // The rename is only durable once the directory entry is flushed.
    if cfg!(unix)
        && let Some(dir) = dir
    {
        fs::File::open(dir)?.sync_all()?;
    }
    Ok(())
}
