//! sdmmc-card - In-memory card
//!
//! A card and a FAT-like filesystem that live in RAM. The host and every
//! volume it mounts share one [`MemoryCard`], so contents survive remounts
//! and tests can keep a handle to inject faults while the card is in use.

use alloc::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
    string::{String, ToString},
    vec::Vec,
};
use core::cell::{RefCell, RefMut};

use super::{
    Attributes, DriverStatus, FsType, Metadata, OpenFlags, SdmmcHost, StatusKind, Volume,
    VolumeStats,
};
use crate::sdmmc::config::{FormatOptions, MountOptions, SlotConfig};
use crate::sdmmc::registers::{CardFamily, CardRegisters};

const SECTOR_SIZE: u32 = 512;
const OCR_CCS: u32 = 1 << 30;

/// FatFs style result codes.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryError {
    DiskError,
    NotReady,
    NoFile,
    NoPath,
    InvalidName,
    Denied,
    Exist,
    Locked,
    NoFilesystem,
    Unsupported,
    IsDirectory,
    NotDirectory,
}

impl DriverStatus for MemoryError {
    fn kind(&self) -> StatusKind {
        match self {
            MemoryError::NotReady => StatusKind::NotResponding,
            MemoryError::Unsupported => StatusKind::Unsupported,
            MemoryError::NoFilesystem => StatusKind::NoFilesystem,
            MemoryError::NoFile | MemoryError::NoPath | MemoryError::InvalidName => {
                StatusKind::NotFound
            }
            MemoryError::Exist => StatusKind::AlreadyExists,
            MemoryError::IsDirectory => StatusKind::IsDirectory,
            MemoryError::NotDirectory => StatusKind::NotDirectory,
            MemoryError::Denied => StatusKind::Denied,
            MemoryError::DiskError | MemoryError::Locked => StatusKind::Other,
        }
    }

    fn code(&self) -> i32 {
        match self {
            MemoryError::DiskError => 1,
            MemoryError::NotReady => 3,
            MemoryError::NoFile => 4,
            MemoryError::NoPath => 5,
            MemoryError::InvalidName => 6,
            MemoryError::Denied => 7,
            MemoryError::Exist => 8,
            MemoryError::NoFilesystem => 13,
            MemoryError::Locked => 16,
            MemoryError::Unsupported => 0x107,
            MemoryError::IsDirectory => 0x108,
            MemoryError::NotDirectory => 0x109,
        }
    }
}

/// Switches for misbehaving hardware.
#[derive(Debug, Default, Clone)]
pub struct Faults {
    pub not_responding: bool,
    pub unsupported: bool,
    pub unmount_fails: bool,
    pub format_fails: bool,
    /// Accept at most this many bytes per write call.
    pub write_limit: Option<usize>,
    /// Volume relative paths (`/dir/name`) whose stat fails.
    pub unreadable: BTreeSet<String>,
}

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug, Clone)]
struct MemoryFs {
    fs_type: FsType,
    sectors_per_cluster: u32,
    cluster_count: u32,
    nodes: BTreeMap<String, Node>,
}

impl MemoryFs {
    fn new(capacity: u64, allocation_unit_size: u32) -> Self {
        let sectors_per_cluster = (allocation_unit_size / SECTOR_SIZE).max(1);
        let cluster_bytes = u64::from(sectors_per_cluster * SECTOR_SIZE);
        let cluster_count = (capacity / cluster_bytes).min(u64::from(u32::MAX)) as u32;
        let fs_type = if cluster_count < 4085 {
            FsType::Fat12
        } else if cluster_count < 65525 {
            FsType::Fat16
        } else {
            FsType::Fat32
        };
        MemoryFs {
            fs_type,
            sectors_per_cluster,
            cluster_count,
            nodes: BTreeMap::new(),
        }
    }

    fn cluster_bytes(&self) -> u64 {
        u64::from(self.sectors_per_cluster * SECTOR_SIZE)
    }

    fn used_clusters(&self) -> u64 {
        let cluster = self.cluster_bytes();
        self.nodes
            .values()
            .map(|node| match node {
                Node::File(data) => (data.len() as u64 + cluster - 1) / cluster,
                Node::Dir => 1,
            })
            .sum()
    }

    fn is_dir(&self, path: &str) -> bool {
        path == "/" || matches!(self.nodes.get(path), Some(Node::Dir))
    }

    fn check_parent(&self, path: &str) -> Result<(), MemoryError> {
        if self.is_dir(parent(path)) {
            Ok(())
        } else {
            Err(MemoryError::NoPath)
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|key| key.as_str() != path && parent(key) == path)
            .map(|key| key[key.rfind('/').map_or(0, |i| i + 1)..].to_string())
            .collect()
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// The physical card: registers, optional filesystem, fault switches.
#[derive(Debug)]
pub struct MemoryCard {
    registers: CardRegisters,
    capacity: u64,
    filesystem: Option<MemoryFs>,
    mounted: bool,
    pub faults: Faults,
}

impl MemoryCard {
    fn new(family: CardFamily, ocr: u32, csd: [u8; 16], capacity: u64, freq_khz: u32) -> Self {
        MemoryCard {
            registers: CardRegisters {
                family,
                ocr,
                csd,
                freq_khz,
            },
            capacity,
            filesystem: Some(MemoryFs::new(capacity, 16 * 1024)),
            mounted: false,
            faults: Faults::default(),
        }
    }

    /// Drop the filesystem, as if the card came fresh from the factory
    /// without one.
    pub fn erase(&mut self) {
        self.filesystem = None;
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn file_count(&self) -> usize {
        self.filesystem.as_ref().map_or(0, |fs| {
            fs.nodes
                .values()
                .filter(|node| matches!(node, Node::File(_)))
                .count()
        })
    }
}

/// Build a version 2.0 CSD for a block addressed card.
fn csd_v2(capacity: u64) -> [u8; 16] {
    let c_size = (capacity / (512 * 1024)).saturating_sub(1) as u32;
    let mut csd = [0u8; 16];
    csd[0] = 0x40;
    csd[5] = 0x59;
    csd[7] = ((c_size >> 16) & 0x3F) as u8;
    csd[8] = (c_size >> 8) as u8;
    csd[9] = c_size as u8;
    csd
}

/// Build a version 1.0 CSD with 512 byte blocks and the largest multiplier.
fn csd_v1(capacity: u64) -> [u8; 16] {
    let c_size = ((capacity / (512 * 512)).saturating_sub(1)).min(0xFFF) as u32;
    let c_size_mult = 7u8;
    let mut csd = [0u8; 16];
    csd[5] = 0x59;
    csd[6] = ((c_size >> 10) & 0x03) as u8;
    csd[7] = (c_size >> 2) as u8;
    csd[8] = ((c_size & 0x03) << 6) as u8;
    csd[9] = (c_size_mult >> 1) & 0x03;
    csd[10] = (c_size_mult & 0x01) << 7;
    csd
}

/// The host controller side of the in-memory card.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    card: Rc<RefCell<MemoryCard>>,
}

impl MemoryHost {
    /// A block addressed card (SDHC, or SDXC above 32 GiB).
    pub fn sdhc(capacity: u64) -> Self {
        Self::from_card(MemoryCard::new(
            CardFamily::Sd,
            OCR_CCS,
            csd_v2(capacity),
            capacity,
            50_000,
        ))
    }

    /// A byte addressed card of at most 1 GiB.
    pub fn sdsc(capacity: u64) -> Self {
        Self::from_card(MemoryCard::new(
            CardFamily::Sd,
            0,
            csd_v1(capacity),
            capacity,
            25_000,
        ))
    }

    /// An MMC 4.x card: CSD_STRUCTURE 2, capacity in the version 1.0 fields.
    pub fn mmc(capacity: u64) -> Self {
        let mut csd = csd_v1(capacity);
        csd[0] = 0x90;
        Self::from_card(MemoryCard::new(
            CardFamily::Mmc,
            0,
            csd,
            capacity,
            20_000,
        ))
    }

    /// A card with arbitrary register contents.
    pub fn with_registers(registers: CardRegisters, capacity: u64) -> Self {
        Self::from_card(MemoryCard::new(
            registers.family,
            registers.ocr,
            registers.csd,
            capacity,
            registers.freq_khz,
        ))
    }

    fn from_card(card: MemoryCard) -> Self {
        MemoryHost {
            card: Rc::new(RefCell::new(card)),
        }
    }

    /// Borrow the card, e.g. to flip fault switches.
    ///
    /// Panics if a volume operation is in progress, which cannot happen from
    /// a single thread between calls.
    pub fn card(&self) -> RefMut<'_, MemoryCard> {
        self.card.borrow_mut()
    }
}

impl SdmmcHost for MemoryHost {
    type Error = MemoryError;
    type Volume = MemoryVolume;

    fn mount(
        &mut self,
        slot: &SlotConfig,
        options: &MountOptions,
    ) -> Result<Self::Volume, Self::Error> {
        let mut card = self.card.borrow_mut();
        if card.faults.not_responding {
            return Err(MemoryError::NotReady);
        }
        if card.faults.unsupported {
            return Err(MemoryError::Unsupported);
        }
        if card.mounted {
            return Err(MemoryError::Locked);
        }
        if card.filesystem.is_none() {
            return Err(MemoryError::NoFilesystem);
        }
        card.mounted = true;
        let mut registers = card.registers;
        registers.freq_khz = registers.freq_khz.min(slot.max_freq_khz);
        drop(card);

        Ok(MemoryVolume {
            card: self.card.clone(),
            registers,
            mount_point: options.mount_point.trim_end_matches('/').to_string(),
            max_files: usize::from(options.max_files),
            open_files: 0,
        })
    }

    fn unmount(&mut self, volume: Self::Volume) -> Result<(), (Self::Error, Self::Volume)> {
        let mut card = self.card.borrow_mut();
        if card.faults.unmount_fails {
            drop(card);
            return Err((MemoryError::DiskError, volume));
        }
        card.mounted = false;
        Ok(())
    }

    fn format(&mut self, _slot: &SlotConfig, options: &FormatOptions) -> Result<(), Self::Error> {
        let mut card = self.card.borrow_mut();
        if card.faults.not_responding {
            return Err(MemoryError::NotReady);
        }
        if card.mounted {
            return Err(MemoryError::Locked);
        }
        if card.faults.format_fails {
            card.filesystem = None;
            return Err(MemoryError::DiskError);
        }
        let capacity = card.capacity;
        card.filesystem = Some(MemoryFs::new(capacity, options.allocation_unit_size));
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryFile {
    path: String,
    position: usize,
    writable: bool,
}

#[derive(Debug)]
pub struct MemoryDir {
    entries: Vec<String>,
    position: usize,
}

/// A mounted view of the in-memory card.
#[derive(Debug)]
pub struct MemoryVolume {
    card: Rc<RefCell<MemoryCard>>,
    registers: CardRegisters,
    mount_point: String,
    max_files: usize,
    open_files: usize,
}

impl MemoryVolume {
    /// Turn a physical path into a volume relative one (`/a/b`).
    fn relative(&self, path: &str) -> Result<String, MemoryError> {
        let rest = path
            .strip_prefix(self.mount_point.as_str())
            .ok_or(MemoryError::InvalidName)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(MemoryError::InvalidName);
        }
        let mut out = String::new();
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            out.push('/');
            out.push_str(segment);
        }
        if out.is_empty() {
            out.push('/');
        }
        Ok(out)
    }

    fn with_fs<T>(
        &mut self,
        f: impl FnOnce(&mut MemoryFs, &Faults) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let mut card = self.card.borrow_mut();
        let MemoryCard {
            filesystem, faults, ..
        } = &mut *card;
        let fs = filesystem.as_mut().ok_or(MemoryError::NoFilesystem)?;
        f(fs, faults)
    }
}

impl Volume for MemoryVolume {
    type Error = MemoryError;
    type File = MemoryFile;
    type Dir = MemoryDir;

    fn card_registers(&self) -> CardRegisters {
        self.registers
    }

    fn stats(&mut self) -> Result<VolumeStats, Self::Error> {
        self.with_fs(|fs, _| {
            let used = fs.used_clusters().min(u64::from(fs.cluster_count)) as u32;
            Ok(VolumeStats {
                fs_type: fs.fs_type,
                sector_size: SECTOR_SIZE,
                sectors_per_cluster: fs.sectors_per_cluster,
                cluster_count: fs.cluster_count,
                free_clusters: fs.cluster_count - used,
            })
        })
    }

    fn stat(&mut self, path: &str) -> Result<Metadata, Self::Error> {
        let path = self.relative(path)?;
        self.with_fs(|fs, faults| {
            if faults.unreadable.contains(&path) {
                return Err(MemoryError::DiskError);
            }
            if path == "/" {
                return Ok(Metadata {
                    size: 0,
                    attributes: Attributes::DIRECTORY,
                });
            }
            match fs.nodes.get(&path) {
                Some(Node::File(data)) => Ok(Metadata {
                    size: data.len() as u64,
                    attributes: Attributes::ARCHIVE,
                }),
                Some(Node::Dir) => Ok(Metadata {
                    size: 0,
                    attributes: Attributes::DIRECTORY,
                }),
                None => {
                    fs.check_parent(&path)?;
                    Err(MemoryError::NoFile)
                }
            }
        })
    }

    fn open(&mut self, path: &str, flags: OpenFlags) -> Result<Self::File, Self::Error> {
        if self.open_files >= self.max_files {
            return Err(MemoryError::Locked);
        }
        let path = self.relative(path)?;
        let position = self.with_fs(|fs, _| {
            if fs.is_dir(&path) {
                return Err(MemoryError::IsDirectory);
            }
            fs.check_parent(&path)?;
            if let Some(Node::File(data)) = fs.nodes.get_mut(&path) {
                if flags.contains(OpenFlags::TRUNCATE) {
                    data.clear();
                }
                return Ok(if flags.contains(OpenFlags::APPEND) {
                    data.len()
                } else {
                    0
                });
            }
            if flags.contains(OpenFlags::CREATE) {
                fs.nodes.insert(path.clone(), Node::File(Vec::new()));
                Ok(0)
            } else {
                Err(MemoryError::NoFile)
            }
        })?;
        self.open_files += 1;
        Ok(MemoryFile {
            path,
            position,
            writable: flags.contains(OpenFlags::WRITE),
        })
    }

    fn read(&mut self, file: &mut Self::File, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        self.with_fs(|fs, _| match fs.nodes.get(&file.path) {
            Some(Node::File(data)) => {
                let available = data.len().saturating_sub(file.position);
                let count = available.min(buffer.len());
                buffer[..count].copy_from_slice(&data[file.position..file.position + count]);
                file.position += count;
                Ok(count)
            }
            _ => Err(MemoryError::NoFile),
        })
    }

    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<usize, Self::Error> {
        if !file.writable {
            return Err(MemoryError::Denied);
        }
        self.with_fs(|fs, faults| {
            let count = faults.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
            match fs.nodes.get_mut(&file.path) {
                Some(Node::File(contents)) => {
                    let end = file.position + count;
                    if contents.len() < end {
                        contents.resize(end, 0);
                    }
                    contents[file.position..end].copy_from_slice(&data[..count]);
                    file.position = end;
                    Ok(count)
                }
                _ => Err(MemoryError::NoFile),
            }
        })
    }

    fn close(&mut self, _file: Self::File) -> Result<(), Self::Error> {
        self.open_files = self.open_files.saturating_sub(1);
        Ok(())
    }

    fn open_dir(&mut self, path: &str) -> Result<Self::Dir, Self::Error> {
        let path = self.relative(path)?;
        self.with_fs(|fs, _| {
            if !fs.is_dir(&path) {
                return match fs.nodes.get(&path) {
                    Some(_) => Err(MemoryError::NotDirectory),
                    None => Err(MemoryError::NoPath),
                };
            }
            let mut entries = Vec::new();
            if path != "/" {
                entries.push(".".to_string());
                entries.push("..".to_string());
            }
            entries.extend(fs.children(&path));
            Ok(MemoryDir {
                entries,
                position: 0,
            })
        })
    }

    fn read_dir(&mut self, dir: &mut Self::Dir) -> Result<Option<String>, Self::Error> {
        let entry = dir.entries.get(dir.position).cloned();
        if entry.is_some() {
            dir.position += 1;
        }
        Ok(entry)
    }

    fn close_dir(&mut self, _dir: Self::Dir) -> Result<(), Self::Error> {
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<(), Self::Error> {
        let path = self.relative(path)?;
        self.with_fs(|fs, _| {
            if path == "/" || fs.nodes.contains_key(&path) {
                return Err(MemoryError::Exist);
            }
            fs.check_parent(&path)?;
            fs.nodes.insert(path, Node::Dir);
            Ok(())
        })
    }

    fn rmdir(&mut self, path: &str) -> Result<(), Self::Error> {
        let path = self.relative(path)?;
        self.with_fs(|fs, _| {
            match fs.nodes.get(&path).map(|node| matches!(node, Node::Dir)) {
                Some(true) if fs.children(&path).is_empty() => {}
                Some(true) => return Err(MemoryError::Denied),
                Some(false) => return Err(MemoryError::NotDirectory),
                None if path == "/" => return Err(MemoryError::Denied),
                None => return Err(MemoryError::NoFile),
            }
            fs.nodes.remove(&path);
            Ok(())
        })
    }

    /// Removes files and, as FAT does, empty directories.
    fn unlink(&mut self, path: &str) -> Result<(), Self::Error> {
        let path = self.relative(path)?;
        self.with_fs(|fs, _| {
            match fs.nodes.get(&path).map(|node| matches!(node, Node::Dir)) {
                Some(true) if !fs.children(&path).is_empty() => return Err(MemoryError::Denied),
                Some(_) => {}
                None if path == "/" => return Err(MemoryError::Denied),
                None => return Err(MemoryError::NoFile),
            }
            fs.nodes.remove(&path);
            Ok(())
        })
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
