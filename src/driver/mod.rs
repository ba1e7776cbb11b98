//! sdmmc-card - Driver boundary
//!
//! The SDMMC host controller and the FAT filesystem are provided by the
//! platform. This module describes what the rest of the crate needs from
//! them. Bind it to a vendor stack on hardware, or use [`memory::MemoryHost`]
//! on a PC.

pub mod memory;

use alloc::string::String;
use core::fmt::Debug;

use crate::sdmmc::config::{FormatOptions, MountOptions, SlotConfig};
use crate::sdmmc::registers::CardRegisters;

/// Broad classes of driver failure. Everything the crate reports to callers
/// is derived from these.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusKind {
    NotResponding,
    Unsupported,
    NoFilesystem,
    NotFound,
    AlreadyExists,
    IsDirectory,
    NotDirectory,
    Denied,
    Other,
}

/// A status code returned by the platform driver.
pub trait DriverStatus: Debug {
    fn kind(&self) -> StatusKind;
    /// The raw vendor code, for diagnostics only.
    fn code(&self) -> i32;
}

bitflags::bitflags! {
    pub struct OpenFlags: u8 {
        const READ = (1 << 0);
        const WRITE = (1 << 1);
        const CREATE = (1 << 2);
        const TRUNCATE = (1 << 3);
        const APPEND = (1 << 4);
    }
}

bitflags::bitflags! {
    /// The FAT directory entry attribute byte.
    pub struct Attributes: u8 {
        const READ_ONLY = (1 << 0);
        const HIDDEN = (1 << 1);
        const SYSTEM = (1 << 2);
        const VOLUME_ID = (1 << 3);
        const DIRECTORY = (1 << 4);
        const ARCHIVE = (1 << 5);
    }
}

impl Attributes {
    pub fn is_dir(&self) -> bool {
        self.contains(Self::DIRECTORY)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub size: u64,
    pub attributes: Attributes,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.attributes.is_dir()
    }
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FsType {
    Fat12,
    Fat16,
    Fat32,
    ExFat,
    Unknown,
}

impl FsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsType::Fat12 => "FAT12",
            FsType::Fat16 => "FAT16",
            FsType::Fat32 => "FAT32",
            FsType::ExFat => "exFAT",
            FsType::Unknown => "UNKNOWN",
        }
    }
}

/// Allocation figures of a mounted volume.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VolumeStats {
    pub fs_type: FsType,
    pub sector_size: u32,
    pub sectors_per_cluster: u32,
    pub cluster_count: u32,
    pub free_clusters: u32,
}

impl VolumeStats {
    pub fn cluster_bytes(&self) -> u64 {
        u64::from(self.sector_size) * u64::from(self.sectors_per_cluster)
    }

    pub fn total_bytes(&self) -> u64 {
        u64::from(self.cluster_count) * self.cluster_bytes()
    }

    pub fn free_bytes(&self) -> u64 {
        u64::from(self.free_clusters) * self.cluster_bytes()
    }
}

/// The SDMMC host controller: brings a card online and attaches a
/// filesystem to it.
pub trait SdmmcHost {
    type Error: DriverStatus;
    type Volume: Volume<Error = Self::Error>;

    /// Initialise the card in `slot` and mount its filesystem.
    fn mount(
        &mut self,
        slot: &SlotConfig,
        options: &MountOptions,
    ) -> Result<Self::Volume, Self::Error>;

    /// Release a mounted volume. On failure the volume is handed back, still
    /// mounted.
    fn unmount(&mut self, volume: Self::Volume) -> Result<(), (Self::Error, Self::Volume)>;

    /// Write a fresh filesystem to an unmounted card. Destroys all data.
    fn format(&mut self, slot: &SlotConfig, options: &FormatOptions) -> Result<(), Self::Error>;
}

/// A mounted filesystem. All paths are physical paths, under the mount
/// point the volume was mounted at.
pub trait Volume {
    type Error: DriverStatus;
    type File;
    type Dir;

    fn card_registers(&self) -> CardRegisters;
    fn stats(&mut self) -> Result<VolumeStats, Self::Error>;
    fn stat(&mut self, path: &str) -> Result<Metadata, Self::Error>;

    fn open(&mut self, path: &str, flags: OpenFlags) -> Result<Self::File, Self::Error>;
    /// Returns the number of bytes read, zero at end of file.
    fn read(&mut self, file: &mut Self::File, buffer: &mut [u8]) -> Result<usize, Self::Error>;
    /// Returns the number of bytes the filesystem accepted.
    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<usize, Self::Error>;
    fn close(&mut self, file: Self::File) -> Result<(), Self::Error>;

    fn open_dir(&mut self, path: &str) -> Result<Self::Dir, Self::Error>;
    /// Next entry name in enumeration order, `None` once exhausted. May yield
    /// the `.` and `..` pseudo entries.
    fn read_dir(&mut self, dir: &mut Self::Dir) -> Result<Option<String>, Self::Error>;
    fn close_dir(&mut self, dir: Self::Dir) -> Result<(), Self::Error>;

    fn mkdir(&mut self, path: &str) -> Result<(), Self::Error>;
    fn rmdir(&mut self, path: &str) -> Result<(), Self::Error>;
    fn unlink(&mut self, path: &str) -> Result<(), Self::Error>;
}

impl<T> SdmmcHost for &mut T
where
    T: SdmmcHost,
{
    type Error = T::Error;
    type Volume = T::Volume;

    fn mount(
        &mut self,
        slot: &SlotConfig,
        options: &MountOptions,
    ) -> Result<Self::Volume, Self::Error> {
        (*self).mount(slot, options)
    }

    fn unmount(&mut self, volume: Self::Volume) -> Result<(), (Self::Error, Self::Volume)> {
        (*self).unmount(volume)
    }

    fn format(&mut self, slot: &SlotConfig, options: &FormatOptions) -> Result<(), Self::Error> {
        (*self).format(slot, options)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
