//! sdmmc-card - Bus and mount configuration

use alloc::string::String;

/// Number of data lines used on the SDMMC bus.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusWidth {
    One,
    Four,
}

impl BusWidth {
    pub fn lines(&self) -> u8 {
        match self {
            BusWidth::One => 1,
            BusWidth::Four => 4,
        }
    }
}

/// GPIO numbers wired to the card slot.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusPins {
    pub clk: u8,
    pub cmd: u8,
    pub d0: u8,
    pub d1: u8,
    pub d2: u8,
    pub d3: u8,
}

impl Default for BusPins {
    /// The fixed IO_MUX pins of the ESP32 SDMMC slot 1.
    fn default() -> Self {
        BusPins {
            clk: 14,
            cmd: 15,
            d0: 2,
            d1: 4,
            d2: 12,
            d3: 13,
        }
    }
}

/// Everything needed to bring a card online. Handed to the mount manager
/// once and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    pub bus_width: BusWidth,
    pub pins: BusPins,
    pub mount_point: String,
    /// Cluster size used when formatting, in bytes.
    pub allocation_unit_size: u32,
    pub max_open_files: u8,
    /// Format the card when it carries no filesystem, then mount again.
    pub format_if_mount_failed: bool,
    pub max_freq_khz: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            bus_width: BusWidth::Four,
            pins: BusPins::default(),
            mount_point: String::from("/sdcard"),
            allocation_unit_size: 16 * 1024,
            max_open_files: 5,
            format_if_mount_failed: false,
            max_freq_khz: 20_000,
        }
    }
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyMountPoint,
    /// The same GPIO is assigned to two active bus lines
    PinConflict(u8),
    NoOpenFiles,
    AllocationUnit(u32),
}

impl MountConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mount_point.is_empty() {
            return Err(ConfigError::EmptyMountPoint);
        }
        if self.max_open_files == 0 {
            return Err(ConfigError::NoOpenFiles);
        }
        let unit = self.allocation_unit_size;
        if !unit.is_power_of_two() || !(512..=65536).contains(&unit) {
            return Err(ConfigError::AllocationUnit(unit));
        }

        let slot = self.slot();
        let lines = [
            Some(slot.clk),
            Some(slot.cmd),
            Some(slot.d0),
            slot.d1,
            slot.d2,
            slot.d3,
        ];
        for (idx, pin) in lines.iter().enumerate() {
            if let Some(pin) = pin {
                if lines[idx + 1..].contains(&Some(*pin)) {
                    return Err(ConfigError::PinConflict(*pin));
                }
            }
        }
        Ok(())
    }

    /// Slot description for the host driver. Data lines 1-3 are left
    /// unconnected in 1-bit mode.
    pub fn slot(&self) -> SlotConfig {
        let wide = |pin| match self.bus_width {
            BusWidth::One => None,
            BusWidth::Four => Some(pin),
        };
        SlotConfig {
            width: self.bus_width,
            clk: self.pins.clk,
            cmd: self.pins.cmd,
            d0: self.pins.d0,
            d1: wide(self.pins.d1),
            d2: wide(self.pins.d2),
            d3: wide(self.pins.d3),
            max_freq_khz: self.max_freq_khz,
        }
    }

    pub fn mount_options(&self) -> MountOptions {
        MountOptions {
            mount_point: self.mount_point.clone(),
            max_files: self.max_open_files,
        }
    }

    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            allocation_unit_size: self.allocation_unit_size,
        }
    }
}

/// Pin and clock assignment for one host slot.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SlotConfig {
    pub width: BusWidth,
    pub clk: u8,
    pub cmd: u8,
    pub d0: u8,
    pub d1: Option<u8>,
    pub d2: Option<u8>,
    pub d3: Option<u8>,
    pub max_freq_khz: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    pub mount_point: String,
    pub max_files: u8,
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// Requested cluster size in bytes. The filesystem variant is chosen by
    /// the driver.
    pub allocation_unit_size: u32,
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
