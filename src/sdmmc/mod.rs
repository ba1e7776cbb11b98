//! sdmmc-card - Mount lifecycle
//!
//! Owns the host driver, the bus configuration and, while mounted, the
//! volume handle. Every other part of the crate reaches the card through
//! [`SdMmc::volume`], which refuses unless the card is mounted.

pub mod config;
pub mod registers;

#[cfg(test)]
mod test;

use core::convert::Infallible;

use embedded_hal::digital::v2::OutputPin;
#[cfg(feature = "log")]
use log::{debug, error, info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, info, warn};

use crate::driver::{DriverStatus, FsType, SdmmcHost, StatusKind, Volume};
use crate::error::{MountError, NotMounted};

use self::config::MountConfig;
use self::registers::CardMetadata;

/// Where the card is in its lifecycle.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounted,
    /// The last mount attempt failed. Only a fresh `mount` gets out of here.
    Failed,
}

enum State<V> {
    Unmounted,
    Mounted { volume: V, metadata: CardMetadata },
    Failed(MountError),
}

/// Stand-in power pin for boards that hard-wire the card supply.
#[derive(Debug, Default)]
pub struct NoPower;

impl OutputPin for NoPower {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// The mount manager for one card slot.
pub struct SdMmc<H, P = NoPower>
where
    H: SdmmcHost,
    P: OutputPin,
{
    host: H,
    config: MountConfig,
    power: P,
    state: State<H::Volume>,
}

impl<H> SdMmc<H, NoPower>
where
    H: SdmmcHost,
{
    /// The config is assumed to be validated already.
    pub fn new(host: H, config: MountConfig) -> Self {
        SdMmc {
            host,
            config,
            power: NoPower,
            state: State::Unmounted,
        }
    }
}

impl<H, P> SdMmc<H, P>
where
    H: SdmmcHost,
    P: OutputPin,
{
    /// Switch the card supply through `power` (high = on).
    pub fn with_power_pin<Q: OutputPin>(self, power: Q) -> SdMmc<H, Q> {
        SdMmc {
            host: self.host,
            config: self.config,
            power,
            state: self.state,
        }
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn state(&self) -> MountState {
        match self.state {
            State::Unmounted => MountState::Unmounted,
            State::Mounted { .. } => MountState::Mounted,
            State::Failed(_) => MountState::Failed,
        }
    }

    /// The error that put us into `Failed`, if that is where we are.
    pub fn failure(&self) -> Option<MountError> {
        match self.state {
            State::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn metadata(&self) -> Option<&CardMetadata> {
        match &self.state {
            State::Mounted { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    pub fn volume(&mut self) -> Result<&mut H::Volume, NotMounted> {
        match &mut self.state {
            State::Mounted { volume, .. } => Ok(volume),
            _ => Err(NotMounted),
        }
    }

    /// Bring the card online and attach its filesystem.
    pub fn mount(&mut self) -> Result<CardMetadata, MountError> {
        if let State::Mounted { .. } = self.state {
            warn!("Mount requested but card is already mounted");
            return Err(MountError::AlreadyMounted);
        }
        match self.try_mount() {
            Ok((volume, metadata)) => {
                info!(
                    "Mounted at {} ({}-bit, {} kHz, {})",
                    self.config.mount_point.as_str(),
                    self.config.bus_width.lines(),
                    metadata.freq_khz,
                    metadata.class.as_str()
                );
                self.state = State::Mounted { volume, metadata };
                Ok(metadata)
            }
            Err(e) => {
                error!("Mount failed: {:?}", e);
                self.power_off();
                self.state = State::Failed(e);
                Err(e)
            }
        }
    }

    fn try_mount(&mut self) -> Result<(H::Volume, CardMetadata), MountError> {
        self.power.set_high().map_err(|_| MountError::Gpio)?;

        let slot = self.config.slot();
        let options = self.config.mount_options();
        let mut volume = match self.host.mount(&slot, &options) {
            Ok(volume) => volume,
            Err(status)
                if status.kind() == StatusKind::NoFilesystem
                    && self.config.format_if_mount_failed =>
            {
                warn!("No filesystem on card, formatting");
                self.host
                    .format(&slot, &self.config.format_options())
                    .map_err(|status| translate("format", &status))?;
                self.host
                    .mount(&slot, &options)
                    .map_err(|status| translate("mount", &status))?
            }
            Err(status) => return Err(translate("mount", &status)),
        };

        let fs_type = match volume.stats() {
            Ok(stats) => stats.fs_type,
            Err(status) => {
                warn!("Couldn't read volume stats (driver code {})", status.code());
                FsType::Unknown
            }
        };

        let registers = volume.card_registers();
        let metadata = CardMetadata::decode(&registers, fs_type).unwrap_or_else(|e| {
            warn!("Couldn't decode card registers, capacity unknown: {:?}", e);
            CardMetadata::undecoded(&registers, fs_type)
        });
        if metadata.write_protected {
            warn!("Card is write protected");
        }
        Ok((volume, metadata))
    }

    /// Release the filesystem and the card, then cut card power.
    pub fn unmount(&mut self) -> Result<(), MountError> {
        self.release()?;
        self.power_off();
        Ok(())
    }

    /// The card is already released when this runs, so a stuck pin is only
    /// worth a log line.
    fn power_off(&mut self) {
        if self.power.set_low().is_err() {
            error!("Couldn't switch card power off");
        }
    }

    fn release(&mut self) -> Result<(), MountError> {
        let state = core::mem::replace(&mut self.state, State::Unmounted);
        let (volume, metadata) = match state {
            State::Mounted { volume, metadata } => (volume, metadata),
            other => {
                self.state = other;
                warn!("Unmount requested but card is not mounted");
                return Err(MountError::NotMounted);
            }
        };
        match self.host.unmount(volume) {
            Ok(()) => {
                info!("Unmounted {}", self.config.mount_point.as_str());
                Ok(())
            }
            Err((status, volume)) => {
                self.state = State::Mounted { volume, metadata };
                Err(translate("unmount", &status))
            }
        }
    }

    /// Unmount and mount again with the same configuration. A failed unmount
    /// leaves the card mounted; a failed mount leaves it `Failed`.
    pub fn remount(&mut self) -> Result<CardMetadata, MountError> {
        self.release()?;
        self.mount()
    }

    /// Erase the card: unmount, write a fresh filesystem, mount again.
    pub fn format(&mut self) -> Result<CardMetadata, MountError> {
        self.release()?;
        let slot = self.config.slot();
        if let Err(status) = self.host.format(&slot, &self.config.format_options()) {
            let e = translate("format", &status);
            self.power_off();
            self.state = State::Failed(e);
            return Err(e);
        }
        warn!(
            "Formatted card at {}; remounting",
            self.config.mount_point.as_str()
        );
        let metadata = self.mount()?;
        debug!("Fresh filesystem is {}", metadata.fs_type.as_str());
        Ok(metadata)
    }
}

fn translate<S: DriverStatus>(operation: &str, status: &S) -> MountError {
    error!(
        "{} failed: {:?} (driver code {})",
        operation,
        status.kind(),
        status.code()
    );
    MountError::from_status(status)
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
