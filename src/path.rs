//! sdmmc-card - Path resolution
//!
//! Maps the paths a host hands us onto physical paths below the mount
//! point (`/sdcard/...`) or drive (`0:/...`) the filesystem lives at.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    /// Never ends with a separator; empty when mounted at `/`.
    root: String,
}

impl PathResolver {
    pub fn new(root: &str) -> Self {
        PathResolver {
            root: String::from(root.trim_end_matches(SEPARATOR)),
        }
    }

    /// Resolver for a FatFs logical drive, e.g. `0:`.
    pub fn drive(number: u8) -> Self {
        let mut root = number.to_string();
        root.push(':');
        PathResolver { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Resolve a logical path. Paths already below the root are only
    /// normalised, so resolving twice gives the same result. `..` never
    /// climbs above the root.
    pub fn resolve(&self, logical: &str) -> String {
        let relative = self.strip_root(logical).unwrap_or(logical);

        let mut segments = Vec::new();
        for segment in relative.split(SEPARATOR) {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                segment => segments.push(segment),
            }
        }

        let mut physical = String::with_capacity(self.root.len() + relative.len() + 1);
        physical.push_str(&self.root);
        for segment in segments {
            physical.push(SEPARATOR);
            physical.push_str(segment);
        }
        if physical.len() == self.root.len() {
            physical.push(SEPARATOR);
        }
        physical
    }

    fn strip_root<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.root.is_empty() {
            return None;
        }
        let rest = path.strip_prefix(self.root.as_str())?;
        if rest.is_empty() || rest.starts_with(SEPARATOR) {
            Some(rest)
        } else {
            None
        }
    }
}

/// Join a logical directory path and an entry name with one separator.
pub fn join(dir: &str, name: &str) -> String {
    let mut path = String::with_capacity(dir.len() + name.len() + 1);
    path.push_str(dir);
    if !dir.is_empty() && !dir.ends_with(SEPARATOR) {
        path.push(SEPARATOR);
    }
    path.push_str(name);
    path
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
