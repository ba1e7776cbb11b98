//! # sdmmc-card
//!
//! > Mount, use and monitor an SD/MMC card in Embedded Rust
//!
//! This crate sits between a host framework that runs components through a
//! `setup` / `loop` / `dump_config` lifecycle and the SDMMC host controller
//! and FAT filesystem your platform already provides. It owns the card's
//! mount lifecycle, maps logical paths onto the mount point, offers simple
//! whole-file and directory operations, and periodically publishes space
//! usage and card details to whatever sinks the host registered.
//!
//! It is `#![no_std]` and needs `alloc`. In the first instance it is designed
//! for readability and simplicity over performance.
//!
//! ## Using the crate
//!
//! You will need something that implements the [`SdmmcHost`] trait for your
//! card slot. On a PC, or in tests, use [`MemoryHost`], which keeps a card and
//! its filesystem in RAM.
//!
//! ```rust
//! use sdmmc_card::{MemoryHost, MountConfig, SdCard, TickOutcome};
//!
//! let host = MemoryHost::sdhc(8 * 1024 * 1024 * 1024);
//! let mut card = SdCard::new(host, MountConfig::default()).unwrap();
//! let metadata = card.setup(0).unwrap();
//! println!("{} card, {} bytes", metadata.class.as_str(), metadata.capacity_bytes());
//!
//! card.write_file("log.txt", b"hello").unwrap();
//! card.append_file("/log.txt", b" world").unwrap();
//! assert_eq!(card.read_file("/sdcard/log.txt").unwrap(), b"hello world");
//!
//! for entry in card.list_directory("/", 2).unwrap() {
//!     println!("{} ({} bytes)", entry.path, entry.size);
//! }
//!
//! assert_eq!(card.tick(1_000), TickOutcome::Idle);
//! assert_eq!(card.tick(61_000), TickOutcome::Published);
//! ```
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]
// #![deny(missing_docs)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

extern crate alloc;


#[macro_use]
mod structure;

pub mod card;
pub mod driver;
pub mod error;
pub mod fs;
pub mod path;
pub mod sdmmc;
pub mod telemetry;

pub use crate::card::SdCard;
pub use crate::driver::memory::{MemoryError, MemoryHost};
pub use crate::driver::{DriverStatus, FsType, SdmmcHost, StatusKind, Volume};
pub use crate::error::{IoError, MountError, NotMounted};
pub use crate::fs::FileInfo;
pub use crate::path::PathResolver;
pub use crate::sdmmc::config::{BusPins, BusWidth, ConfigError, MountConfig};
pub use crate::sdmmc::registers::{CardClass, CardMetadata};
pub use crate::sdmmc::{MountState, NoPower, SdMmc};
pub use crate::telemetry::{Metric, Sink, TickOutcome};

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
