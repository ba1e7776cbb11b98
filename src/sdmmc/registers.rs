//! sdmmc-card - Card registers
//!
//! Decodes the OCR and CSD registers the host driver reports after card
//! initialisation into the metadata the rest of the crate works with.

use crate::driver::FsType;

/// OCR bit 30: Card Capacity Status. Set for block-addressed (SDHC/SDXC) cards.
const OCR_CCS: u32 = 1 << 30;

/// Anything above this is SDXC territory.
const SDHC_MAX_BYTES: u64 = 32 * 1024 * 1024 * 1024;

/// Which command set the host negotiated with the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardFamily {
    Sd,
    Mmc,
}

/// Raw registers of an initialised card, as read by the host controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardRegisters {
    pub family: CardFamily,
    pub ocr: u32,
    pub csd: [u8; 16],
    /// Bus clock the host settled on, in kHz.
    pub freq_khz: u32,
}

/// The capacity class of a card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardClass {
    Mmc,
    Sdsc,
    Sdhc,
    Sdxc,
    Unknown,
}

impl CardClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardClass::Mmc => "MMC",
            CardClass::Sdsc => "SDSC",
            CardClass::Sdhc => "SDHC",
            CardClass::Sdxc => "SDXC",
            CardClass::Unknown => "UNKNOWN",
        }
    }
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CsdError {
    UnknownStructure(u8),
    InvalidBlockLength(u8),
}

/// CSD register, structure version 1.0 (SDSC and MMC).
#[derive(Debug, Copy, Clone)]
pub struct CsdV1 {
    data: [u8; 16],
}

impl CsdV1 {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u8, [(9, 0, 2), (10, 7, 1)]);
    define_field!(perm_write_protect, bool, 14, 5);
    define_field!(tmp_write_protect, bool, 14, 4);

    /// Bytes per sector, `2^READ_BL_LEN`.
    pub fn sector_size(&self) -> Result<u32, CsdError> {
        match self.read_block_length() {
            n @ 9..=11 => Ok(1 << n),
            n => Err(CsdError::InvalidBlockLength(n)),
        }
    }

    pub fn sector_count(&self) -> u64 {
        (u64::from(self.device_size()) + 1) << (self.device_size_multiplier() + 2)
    }
}

/// CSD register, structure version 2.0 (SDHC and SDXC).
#[derive(Debug, Copy, Clone)]
pub struct CsdV2 {
    data: [u8; 16],
}

impl CsdV2 {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(perm_write_protect, bool, 14, 5);
    define_field!(tmp_write_protect, bool, 14, 4);

    /// Always 512 bytes; C_SIZE counts units of 512 KiB.
    pub fn sector_size(&self) -> u32 {
        512
    }

    pub fn sector_count(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 1024
    }
}

#[derive(Debug, Copy, Clone)]
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

impl Csd {
    /// MMC cards keep the version 1.0 capacity fields whatever their
    /// CSD_STRUCTURE says. SD cards use the structure to pick the layout.
    pub fn parse(family: CardFamily, data: [u8; 16]) -> Result<Self, CsdError> {
        match (family, data[0] >> 6) {
            (CardFamily::Mmc, _) | (CardFamily::Sd, 0) => Ok(Csd::V1(CsdV1 { data })),
            (CardFamily::Sd, 1) => Ok(Csd::V2(CsdV2 { data })),
            (CardFamily::Sd, n) => Err(CsdError::UnknownStructure(n)),
        }
    }

    /// Returns `(sector_count, sector_size)`.
    pub fn geometry(&self) -> Result<(u64, u32), CsdError> {
        match self {
            Csd::V1(csd) => Ok((csd.sector_count(), csd.sector_size()?)),
            Csd::V2(csd) => Ok((csd.sector_count(), csd.sector_size())),
        }
    }

    pub fn write_protected(&self) -> bool {
        match self {
            Csd::V1(csd) => csd.perm_write_protect() || csd.tmp_write_protect(),
            Csd::V2(csd) => csd.perm_write_protect() || csd.tmp_write_protect(),
        }
    }
}

/// Everything we know about a mounted card. Recomputed on every mount.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardMetadata {
    pub class: CardClass,
    pub freq_khz: u32,
    pub fs_type: FsType,
    pub sector_count: u64,
    pub sector_size: u32,
    pub write_protected: bool,
}

impl CardMetadata {
    pub fn decode(registers: &CardRegisters, fs_type: FsType) -> Result<Self, CsdError> {
        let csd = Csd::parse(registers.family, registers.csd)?;
        let (sector_count, sector_size) = csd.geometry()?;
        let capacity = sector_count * u64::from(sector_size);

        let class = match registers.family {
            CardFamily::Mmc => CardClass::Mmc,
            CardFamily::Sd if registers.ocr & OCR_CCS == 0 => CardClass::Sdsc,
            CardFamily::Sd if capacity > SDHC_MAX_BYTES => CardClass::Sdxc,
            CardFamily::Sd => CardClass::Sdhc,
        };

        Ok(Self {
            class,
            freq_khz: registers.freq_khz,
            fs_type,
            sector_count,
            sector_size,
            write_protected: csd.write_protected(),
        })
    }

    /// Metadata for a card whose CSD could not be decoded. The capacity reads
    /// as zero.
    pub fn undecoded(registers: &CardRegisters, fs_type: FsType) -> Self {
        Self {
            class: match registers.family {
                CardFamily::Mmc => CardClass::Mmc,
                CardFamily::Sd => CardClass::Unknown,
            },
            freq_khz: registers.freq_khz,
            fs_type,
            sector_count: 0,
            sector_size: 0,
            write_protected: false,
        }
    }

    /// Raw card capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.sector_count * u64::from(self.sector_size)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
