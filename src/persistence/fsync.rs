//! Low-level durable file operations.
//!
//! Both file and directory fsyncs are required for crash safety: creating or
//! renaming a file updates the directory entry, and without a directory fsync that
//! entry may not survive a power loss even if the file contents were synced.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory so that entries created, renamed or removed in it are durable.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

/// Writes `bytes` to `path` atomically.
///
/// 1. Write to `<path>.tmp`
/// 2. fsync the temp file
/// 3. Rename over `<path>`
/// 4. fsync the parent directory
///
/// Readers see either the old content or the new content, never a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent();
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(tmp_path, path)?;

    if let Some(parent) = parent {
        fsync_dir(parent)?;
    }

    Ok(())
}

/// Creates `path` exclusively with the given content.
///
/// Returns `Ok(false)` if the file already exists. The existence check and the
/// creation are one `O_CREAT | O_EXCL` open, so two processes racing on the same
/// path cannot both succeed.
pub fn create_exclusive(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    file.write_all(bytes)?;
    fsync_file(&file)?;
    drop(file);

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(true)
}

/// Removes a file, treating "not found" as success.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
