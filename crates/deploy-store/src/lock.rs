use crate::layout::StateLayout;
use crate::StoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;

/// Advisory exclusive lock on a state store, serializing mutating CLI
/// invocations against the same `--store` directory.
///
/// The lock file lives inside the state directory (see
/// `StateLayout::lock_file`) and records the holder's pid so a blocked
/// invocation can name the culprit. Released on drop.
pub struct StateLock {
    lock_file: File,
}

impl StateLock {
    /// Block until the store is free, then take the lock.
    pub fn acquire(layout: &StateLayout) -> Result<Self, StoreError> {
        let mut file = Self::open(layout)?;
        file.lock_exclusive()
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        Self::stamp(&mut file);
        Ok(Self { lock_file: file })
    }

    /// Take the lock if the store is free; `None` when another invocation
    /// holds it.
    pub fn try_acquire(layout: &StateLayout) -> Result<Option<Self>, StoreError> {
        let mut file = Self::open(layout)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                Self::stamp(&mut file);
                Ok(Some(Self { lock_file: file }))
            }
            Err(_) => Ok(None),
        }
    }

    /// Pid recorded by the current (or most recent) holder. Diagnostic only;
    /// the advisory lock is what actually arbitrates.
    pub fn holder(layout: &StateLayout) -> Option<String> {
        let text = std::fs::read_to_string(layout.lock_file()).ok()?;
        let pid = text.trim();
        (!pid.is_empty()).then(|| pid.to_owned())
    }

    fn open(layout: &StateLayout) -> Result<File, StoreError> {
        let path = layout.lock_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?)
    }

    fn stamp(file: &mut File) {
        // Best effort; a stale pid only degrades the diagnostic.
        let _ = file.set_len(0);
        let _ = file.write_all(format!("{}\n", std::process::id()).as_bytes());
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_store_refuses_second_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());

        let _held = StateLock::acquire(&layout).unwrap();
        assert!(StateLock::try_acquire(&layout).unwrap().is_none());
    }

    #[test]
    fn lock_records_holder_pid() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());

        let _held = StateLock::acquire(&layout).unwrap();
        assert_eq!(
            StateLock::holder(&layout),
            Some(std::process::id().to_string())
        );
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());

        {
            let _held = StateLock::acquire(&layout).unwrap();
        }
        assert!(StateLock::try_acquire(&layout).unwrap().is_some());
    }
}
