use alloc::{string::String, vec::Vec};

#[cfg(feature = "log")]
use log::{debug, info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, info, warn};

use super::file::failed;
use crate::driver::{DriverStatus, Volume};
use crate::error::IoError;
use crate::path::{self, PathResolver};

/// One entry found while walking a directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Logical path, built from the path the walk started at.
    pub path: String,
    /// Zero for directories.
    pub size: u64,
    pub is_directory: bool,
}

/// Depth-limited, pre-order directory listing.
pub struct DirWalker<'a, V>
where
    V: Volume,
{
    volume: &'a mut V,
    resolver: &'a PathResolver,
}

impl<'a, V> DirWalker<'a, V>
where
    V: Volume,
{
    pub fn new(volume: &'a mut V, resolver: &'a PathResolver) -> Self {
        Self { volume, resolver }
    }

    /// List `path` and, while `max_depth > 1`, its subdirectories. Entries
    /// that can't be inspected are skipped. Only a failure to open `path`
    /// itself is an error.
    pub fn list(&mut self, path: &str, max_depth: u8) -> Result<Vec<FileInfo>, IoError> {
        let mut entries = Vec::new();
        if max_depth == 0 {
            return Ok(entries);
        }

        let physical = self.resolver.resolve(path);
        debug!("Scanning directory: {}", physical.as_str());
        let dir = self
            .volume
            .open_dir(&physical)
            .map_err(|status| failed("opendir", &physical, &status))?;
        self.scan(dir, path, max_depth, &mut entries);

        info!(
            "Listed {} entries under {} (depth: {})",
            entries.len(),
            path,
            max_depth
        );
        Ok(entries)
    }

    fn scan(&mut self, mut dir: V::Dir, path: &str, depth: u8, out: &mut Vec<FileInfo>) {
        loop {
            let name = match self.volume.read_dir(&mut dir) {
                Ok(Some(name)) => name,
                Ok(None) => break,
                Err(status) => {
                    warn!("Reading {} stopped (driver code {})", path, status.code());
                    break;
                }
            };
            if name == "." || name == ".." {
                continue;
            }

            let entry_path = path::join(path, &name);
            let physical = self.resolver.resolve(&entry_path);
            let metadata = match self.volume.stat(&physical) {
                Ok(metadata) => metadata,
                Err(status) => {
                    warn!(
                        "Skipping {}: stat failed (driver code {})",
                        entry_path.as_str(),
                        status.code()
                    );
                    continue;
                }
            };

            let is_directory = metadata.is_dir();
            debug!(
                "  Found: {} ({}, {} bytes)",
                name.as_str(),
                if is_directory { "DIR" } else { "FILE" },
                metadata.size
            );
            out.push(FileInfo {
                path: entry_path.clone(),
                size: if is_directory { 0 } else { metadata.size },
                is_directory,
            });

            if is_directory && depth > 1 {
                match self.volume.open_dir(&physical) {
                    Ok(subdir) => self.scan(subdir, &entry_path, depth - 1, out),
                    Err(status) => {
                        warn!(
                            "Skipping contents of {}: opendir failed (driver code {})",
                            entry_path.as_str(),
                            status.code()
                        );
                    }
                }
            }
        }

        if let Err(status) = self.volume.close_dir(dir) {
            warn!("Closing {} failed (driver code {})", path, status.code());
        }
    }

    /// Same walk as [`DirWalker::list`], paths only.
    pub fn list_names(&mut self, path: &str, max_depth: u8) -> Result<Vec<String>, IoError> {
        Ok(self
            .list(path, max_depth)?
            .into_iter()
            .map(|entry| entry.path)
            .collect())
    }
}
