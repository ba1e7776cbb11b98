//! sdmmc-card - Errors
//!
//! Driver statuses are translated into these at the call site. The raw code
//! is logged there and goes no further.

use crate::driver::{DriverStatus, StatusKind};

/// Failures of the mount lifecycle.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MountError {
    /// The card did not answer on the bus
    HardwareNotResponding,
    /// The card answered but cannot be used
    UnsupportedMedia,
    /// No FAT filesystem on the card and formatting was not requested
    FilesystemAbsent,
    AlreadyMounted,
    NotMounted,
    /// Couldn't drive the card power pin
    Gpio,
    /// Any other driver status, by raw code
    Driver(i32),
}

impl MountError {
    pub fn from_status<S: DriverStatus>(status: &S) -> Self {
        match status.kind() {
            StatusKind::NotResponding => MountError::HardwareNotResponding,
            StatusKind::Unsupported => MountError::UnsupportedMedia,
            StatusKind::NoFilesystem => MountError::FilesystemAbsent,
            _ => MountError::Driver(status.code()),
        }
    }
}

/// Failures of a single file or directory operation. Never fatal.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoError {
    /// The card is not mounted, so the target could not even be looked up
    NotMounted,
    NotFound,
    IsDirectory,
    NotADirectory,
    PermissionDenied,
    /// The filesystem accepted fewer bytes than were written
    ShortWrite { written: usize, expected: usize },
    Unknown(i32),
}

impl IoError {
    pub fn from_status<S: DriverStatus>(status: &S) -> Self {
        match status.kind() {
            StatusKind::NotFound => IoError::NotFound,
            StatusKind::IsDirectory => IoError::IsDirectory,
            StatusKind::NotDirectory => IoError::NotADirectory,
            StatusKind::Denied => IoError::PermissionDenied,
            _ => IoError::Unknown(status.code()),
        }
    }
}

/// Returned by anything that needs the card while it is not mounted.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NotMounted;

impl From<NotMounted> for IoError {
    fn from(_: NotMounted) -> Self {
        IoError::NotMounted
    }
}

impl From<NotMounted> for MountError {
    fn from(_: NotMounted) -> Self {
        MountError::NotMounted
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
