//! sdmmc-card - File and directory access on a mounted volume

pub mod directory;
pub mod file;

pub use self::directory::{DirWalker, FileInfo};
pub use self::file::FileAccessor;
