//! sdmmc-card - The host facing component
//!
//! Ties mount manager, path resolution, file access, directory walking and
//! telemetry together behind the `setup` / `tick` / `dump_config` lifecycle
//! a host framework drives.

use alloc::{rc::Rc, string::String, vec::Vec};
use core::cell::RefCell;
use core::fmt::Write;

use embedded_hal::digital::v2::OutputPin;
#[cfg(feature = "log")]
use log::{error, warn};

#[cfg(feature = "defmt-log")]
use defmt::{error, warn};

use crate::driver::{DriverStatus, SdmmcHost, Volume, VolumeStats};
use crate::error::{IoError, MountError, NotMounted};
use crate::fs::{DirWalker, FileAccessor, FileInfo};
use crate::path::PathResolver;
use crate::sdmmc::config::{ConfigError, MountConfig};
use crate::sdmmc::registers::CardMetadata;
use crate::sdmmc::{MountState, NoPower, SdMmc};
use crate::telemetry::{Metric, Sink, Snapshot, Telemetry, TickOutcome};

/// One SD/MMC card slot as seen by the host.
pub struct SdCard<H, P = NoPower>
where
    H: SdmmcHost,
    P: OutputPin,
{
    sdmmc: SdMmc<H, P>,
    resolver: PathResolver,
    telemetry: Telemetry,
    failed: bool,
}

impl<H> SdCard<H, NoPower>
where
    H: SdmmcHost,
{
    pub fn new(host: H, config: MountConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let resolver = PathResolver::new(&config.mount_point);
        Ok(SdCard {
            sdmmc: SdMmc::new(host, config),
            resolver,
            telemetry: Telemetry::new(0),
            failed: false,
        })
    }
}

impl<H, P> SdCard<H, P>
where
    H: SdmmcHost,
    P: OutputPin,
{
    pub fn with_power_pin<Q: OutputPin>(self, power: Q) -> SdCard<H, Q> {
        SdCard {
            sdmmc: self.sdmmc.with_power_pin(power),
            resolver: self.resolver,
            telemetry: self.telemetry,
            failed: self.failed,
        }
    }

    pub fn with_publish_interval(mut self, interval_ms: u64) -> Self {
        self.telemetry.set_interval(interval_ms);
        self
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Initial mount. On failure the component is marked failed and stays
    /// inert until someone mounts it explicitly.
    pub fn setup(&mut self, now_ms: u64) -> Result<CardMetadata, MountError> {
        match self.sdmmc.mount() {
            Ok(metadata) => {
                self.failed = false;
                self.publish_now();
                self.telemetry.mark(now_ms);
                Ok(metadata)
            }
            Err(e) => {
                error!("Setup failed, marking component failed: {:?}", e);
                self.failed = true;
                Err(e)
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Called on every scheduler pass.
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        if !self.telemetry.due(now_ms) {
            return TickOutcome::Idle;
        }
        match self.snapshot() {
            Ok(snapshot) => {
                self.telemetry.publish(&snapshot);
                self.telemetry.mark(now_ms);
                TickOutcome::Published
            }
            Err(NotMounted) => TickOutcome::Skipped,
        }
    }

    /// Describe configuration and card state.
    pub fn dump_config<W: Write>(&self, out: &mut W) -> core::fmt::Result {
        let config = self.sdmmc.config();
        let pins = &config.pins;
        writeln!(out, "SD MMC Card:")?;
        writeln!(out, "  Mount: {}", config.mount_point)?;
        writeln!(out, "  Mode: {}-bit", config.bus_width.lines())?;
        write!(out, "  Pins: CLK={} CMD={} D0={}", pins.clk, pins.cmd, pins.d0)?;
        if config.bus_width.lines() == 4 {
            write!(out, " D1={} D2={} D3={}", pins.d1, pins.d2, pins.d3)?;
        }
        writeln!(out)?;
        writeln!(out, "  State: {:?}", self.sdmmc.state())?;
        if let Some(metadata) = self.sdmmc.metadata() {
            writeln!(out, "  Card Type: {}", metadata.class.as_str())?;
            writeln!(out, "  Filesystem: {}", metadata.fs_type.as_str())?;
            writeln!(out, "  Capacity: {} bytes", metadata.capacity_bytes())?;
            writeln!(out, "  Frequency: {} kHz", metadata.freq_khz)?;
            if metadata.write_protected {
                writeln!(out, "  Write protected")?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mount management
    // ------------------------------------------------------------------

    pub fn state(&self) -> MountState {
        self.sdmmc.state()
    }

    pub fn metadata(&self) -> Option<&CardMetadata> {
        self.sdmmc.metadata()
    }

    /// Raw card capacity in bytes, while mounted.
    pub fn card_capacity(&self) -> Option<u64> {
        self.sdmmc.metadata().map(CardMetadata::capacity_bytes)
    }

    pub fn mount(&mut self) -> Result<CardMetadata, MountError> {
        let metadata = self.sdmmc.mount()?;
        self.failed = false;
        Ok(metadata)
    }

    pub fn unmount(&mut self) -> Result<(), MountError> {
        self.sdmmc.unmount()
    }

    pub fn remount(&mut self) -> Result<CardMetadata, MountError> {
        let metadata = self.sdmmc.remount()?;
        self.publish_now();
        Ok(metadata)
    }

    pub fn format(&mut self) -> Result<CardMetadata, MountError> {
        let metadata = self.sdmmc.format()?;
        self.publish_now();
        Ok(metadata)
    }

    // ------------------------------------------------------------------
    // Files and directories
    // ------------------------------------------------------------------

    fn files(&mut self) -> Result<FileAccessor<'_, H::Volume>, NotMounted> {
        let volume = self.sdmmc.volume()?;
        Ok(FileAccessor::new(volume, &self.resolver))
    }

    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), IoError> {
        self.files()?.write(path, data)?;
        self.file_changed(path);
        Ok(())
    }

    pub fn append_file(&mut self, path: &str, data: &[u8]) -> Result<(), IoError> {
        self.files()?.append(path, data)?;
        self.file_changed(path);
        Ok(())
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, IoError> {
        self.files()?.read(path)
    }

    pub fn file_size(&mut self, path: &str) -> Result<u64, IoError> {
        self.files()?.size(path)
    }

    pub fn delete_file(&mut self, path: &str) -> Result<(), IoError> {
        self.files()?.delete(path)?;
        if self.is_watched(path) {
            self.telemetry.numeric(Metric::FileSize, 0.0);
        }
        Ok(())
    }

    pub fn create_directory(&mut self, path: &str) -> Result<(), IoError> {
        self.files()?.create_directory(path)
    }

    pub fn remove_directory(&mut self, path: &str) -> Result<(), IoError> {
        self.files()?.remove_directory(path)
    }

    /// False when not mounted or when `path` can't be inspected.
    pub fn is_directory(&mut self, path: &str) -> bool {
        match self.files() {
            Ok(mut files) => files.is_directory(path),
            Err(NotMounted) => false,
        }
    }

    pub fn list_directory(&mut self, path: &str, max_depth: u8) -> Result<Vec<FileInfo>, IoError> {
        if max_depth == 0 {
            return Ok(Vec::new());
        }
        let volume = self.sdmmc.volume()?;
        DirWalker::new(volume, &self.resolver).list(path, max_depth)
    }

    pub fn list_names(&mut self, path: &str, max_depth: u8) -> Result<Vec<String>, IoError> {
        if max_depth == 0 {
            return Ok(Vec::new());
        }
        let volume = self.sdmmc.volume()?;
        DirWalker::new(volume, &self.resolver).list_names(path, max_depth)
    }

    // ------------------------------------------------------------------
    // Space
    // ------------------------------------------------------------------

    fn stats(&mut self) -> Result<VolumeStats, IoError> {
        self.sdmmc.volume()?.stats().map_err(|status| {
            error!("Couldn't read volume stats (driver code {})", status.code());
            IoError::from_status(&status)
        })
    }

    /// Filesystem size in bytes.
    pub fn total_space(&mut self) -> Result<u64, IoError> {
        Ok(self.stats()?.total_bytes())
    }

    pub fn free_space(&mut self) -> Result<u64, IoError> {
        Ok(self.stats()?.free_bytes())
    }

    pub fn used_space(&mut self) -> Result<u64, IoError> {
        let stats = self.stats()?;
        Ok(stats.total_bytes().saturating_sub(stats.free_bytes()))
    }

    // ------------------------------------------------------------------
    // Telemetry
    // ------------------------------------------------------------------

    /// Attach a sink. Only a weak reference is kept.
    pub fn register_sink(&mut self, metric: Metric, sink: &Rc<RefCell<dyn Sink>>) {
        self.telemetry.register(metric, sink);
    }

    /// Report size (and content, if a sink wants it) of `path`.
    pub fn watch_file(&mut self, path: &str) {
        self.telemetry.watch(path);
    }

    fn is_watched(&self, path: &str) -> bool {
        match self.telemetry.watched() {
            Some(watched) => self.resolver.resolve(watched) == self.resolver.resolve(path),
            None => false,
        }
    }

    fn file_changed(&mut self, path: &str) {
        if !self.is_watched(path) {
            return;
        }
        match self.file_size(path) {
            Ok(size) => self.telemetry.numeric(Metric::FileSize, size as f64),
            Err(e) => warn!("Couldn't size watched file {}: {:?}", path, e),
        }
    }

    fn publish_now(&mut self) {
        if let Ok(snapshot) = self.snapshot() {
            self.telemetry.publish(&snapshot);
        }
    }

    fn snapshot(&mut self) -> Result<Snapshot, NotMounted> {
        let metadata = *self.sdmmc.metadata().ok_or(NotMounted)?;
        let space = self
            .stats()
            .ok()
            .map(|stats| (stats.total_bytes(), stats.free_bytes()));

        let watched = self.telemetry.watched().map(String::from);
        let (file_size, file_content) = match watched {
            Some(path) => {
                let size = self.file_size(&path).unwrap_or(0);
                let content = if self.telemetry.wants(Metric::FileContent) {
                    self.read_file(&path)
                        .ok()
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                } else {
                    None
                };
                (Some(size), content)
            }
            None => (None, None),
        };

        Ok(Snapshot {
            space,
            freq_khz: metadata.freq_khz,
            fs_type: metadata.fs_type,
            card_class: metadata.class,
            file_size,
            file_content,
        })
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
