use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::{debug, error, info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, info, warn};

use crate::driver::{DriverStatus, OpenFlags, StatusKind, Volume};
use crate::error::IoError;
use crate::path::PathResolver;

const READ_CHUNK: usize = 512;

/// Single-file operations against a mounted volume. Callers pass logical
/// paths; they are resolved before they reach the driver.
pub struct FileAccessor<'a, V>
where
    V: Volume,
{
    volume: &'a mut V,
    resolver: &'a PathResolver,
}

impl<'a, V> FileAccessor<'a, V>
where
    V: Volume,
{
    pub fn new(volume: &'a mut V, resolver: &'a PathResolver) -> Self {
        Self { volume, resolver }
    }

    /// Create or truncate `path` and write `data` to it.
    pub fn write(&mut self, path: &str, data: &[u8]) -> Result<(), IoError> {
        self.put(path, data, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE)?;
        info!("Wrote {} bytes to {}", data.len(), path);
        Ok(())
    }

    /// Append `data` to `path`, creating it if needed.
    pub fn append(&mut self, path: &str, data: &[u8]) -> Result<(), IoError> {
        self.put(path, data, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::APPEND)?;
        info!("Appended {} bytes to {}", data.len(), path);
        Ok(())
    }

    fn put(&mut self, path: &str, data: &[u8], flags: OpenFlags) -> Result<(), IoError> {
        let physical = self.resolver.resolve(path);
        let mut file = self
            .volume
            .open(&physical, flags)
            .map_err(|status| failed("open", &physical, &status))?;

        let written = if data.is_empty() {
            Ok(0)
        } else {
            self.volume.write(&mut file, data)
        };
        let closed = self.volume.close(file);

        let written = written.map_err(|status| failed("write", &physical, &status))?;
        closed.map_err(|status| failed("close", &physical, &status))?;
        if written != data.len() {
            error!("Short write to {}: {} of {} bytes", path, written, data.len());
            return Err(IoError::ShortWrite {
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }

    /// Read the whole file.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>, IoError> {
        let physical = self.resolver.resolve(path);
        let mut file = self
            .volume
            .open(&physical, OpenFlags::READ)
            .map_err(|status| failed("open", &physical, &status))?;

        let mut contents = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let result = loop {
            match self.volume.read(&mut file, &mut chunk) {
                Ok(0) => break Ok(()),
                Ok(count) => contents.extend_from_slice(&chunk[..count]),
                Err(status) => break Err(failed("read", &physical, &status)),
            }
        };
        if let Err(status) = self.volume.close(file) {
            warn!("Closing {} after read failed (driver code {})", path, status.code());
        }
        result?;

        info!("Read {} bytes from {}", contents.len(), path);
        Ok(contents)
    }

    pub fn size(&mut self, path: &str) -> Result<u64, IoError> {
        let physical = self.resolver.resolve(path);
        self.volume
            .stat(&physical)
            .map(|metadata| metadata.size)
            .map_err(|status| failed("stat", &physical, &status))
    }

    /// Remove a file. Directories are refused with [`IoError::IsDirectory`];
    /// use [`FileAccessor::remove_directory`] for those.
    pub fn delete(&mut self, path: &str) -> Result<(), IoError> {
        let physical = self.resolver.resolve(path);
        let metadata = self
            .volume
            .stat(&physical)
            .map_err(|status| failed("stat", &physical, &status))?;
        if metadata.is_dir() {
            error!("Refusing to delete directory {} as a file", path);
            return Err(IoError::IsDirectory);
        }
        self.volume
            .unlink(&physical)
            .map_err(|status| failed("delete", &physical, &status))?;
        info!("Deleted file {}", path);
        Ok(())
    }

    /// Create a directory. An existing directory counts as success.
    pub fn create_directory(&mut self, path: &str) -> Result<(), IoError> {
        let physical = self.resolver.resolve(path);
        match self.volume.mkdir(&physical) {
            Ok(()) => {}
            Err(status) if status.kind() == StatusKind::AlreadyExists => {
                if !self.is_directory(path) {
                    error!("Can't create directory {}: a file is in the way", path);
                    return Err(IoError::NotADirectory);
                }
            }
            Err(status) => return Err(failed("mkdir", &physical, &status)),
        }
        info!("Directory ready: {}", path);
        Ok(())
    }

    /// Remove an empty directory.
    pub fn remove_directory(&mut self, path: &str) -> Result<(), IoError> {
        let physical = self.resolver.resolve(path);
        let metadata = self
            .volume
            .stat(&physical)
            .map_err(|status| failed("stat", &physical, &status))?;
        if !metadata.is_dir() {
            return Err(IoError::NotADirectory);
        }
        self.volume
            .rmdir(&physical)
            .map_err(|status| failed("rmdir", &physical, &status))?;
        info!("Removed directory {}", path);
        Ok(())
    }

    pub fn is_directory(&mut self, path: &str) -> bool {
        let physical = self.resolver.resolve(path);
        match self.volume.stat(&physical) {
            Ok(metadata) => metadata.is_dir(),
            Err(status) => {
                debug!("stat {} failed (driver code {})", physical.as_str(), status.code());
                false
            }
        }
    }
}

pub(crate) fn failed<S: DriverStatus>(operation: &str, physical: &str, status: &S) -> IoError {
    error!(
        "{} {} failed: {:?} (driver code {})",
        operation,
        physical,
        status.kind(),
        status.code()
    );
    IoError::from_status(status)
}
