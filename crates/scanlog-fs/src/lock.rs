use crate::workspace::WorkspacePaths;
use fs2::FileExt;
use scanlog_core::{ScanError, ScanResult};
use std::fs::{File, OpenOptions};
use std::io;

/// Exclusive hold on `.scanlog/lock`, released when dropped.
///
/// Commands that load the record snapshot and write it back hold this for
/// their whole run, so concurrent `scanlog` processes take turns instead of
/// overwriting each other's changes.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
}

impl WorkspaceLock {
    /// Blocks until no other process holds the lock.
    pub fn acquire(paths: &WorkspacePaths) -> ScanResult<Self> {
        let file = open_lock_file(paths)?;
        FileExt::lock_exclusive(&file).map_err(|err| lock_error(paths, err))?;
        Ok(Self { file })
    }

    /// `None` while another process holds the lock.
    pub fn try_acquire(paths: &WorkspacePaths) -> ScanResult<Option<Self>> {
        let file = open_lock_file(paths)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file })),
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(lock_error(paths, err)),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        // Closing the handle releases the lock too.
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_lock_file(paths: &WorkspacePaths) -> ScanResult<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&paths.lock_path)
        .map_err(|err| {
            ScanError::io(format!(
                "failed to open workspace lock '{}': {err}",
                paths.lock_path.display()
            ))
        })
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn lock_error(paths: &WorkspacePaths, err: io::Error) -> ScanError {
    ScanError::io(format!(
        "failed to lock workspace '{}': {err}",
        paths.lock_path.display()
    ))
}
