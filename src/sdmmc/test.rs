use std::{cell::RefCell, rc::Rc, vec::Vec};

use embedded_hal::digital::v2::OutputPin;

use super::config::MountConfig;
use super::registers::{CardClass, CardFamily, CardRegisters};
use super::{MountState, SdMmc};
use crate::driver::memory::MemoryHost;
use crate::driver::{FsType, OpenFlags, Volume};
use crate::error::{MountError, NotMounted};

const GIB: u64 = 1024 * 1024 * 1024;

/// Records every level it is driven to.
#[derive(Clone, Default)]
struct PowerLog(Rc<RefCell<Vec<bool>>>);

impl OutputPin for PowerLog {
    type Error = ();

    fn set_low(&mut self) -> Result<(), ()> {
        self.0.borrow_mut().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), ()> {
        self.0.borrow_mut().push(true);
        Ok(())
    }
}

struct BrokenPin;

impl OutputPin for BrokenPin {
    type Error = ();

    fn set_low(&mut self) -> Result<(), ()> {
        Err(())
    }

    fn set_high(&mut self) -> Result<(), ()> {
        Err(())
    }
}

/// Switches on fine but can't be switched off.
struct StuckOn;

impl OutputPin for StuckOn {
    type Error = ();

    fn set_low(&mut self) -> Result<(), ()> {
        Err(())
    }

    fn set_high(&mut self) -> Result<(), ()> {
        Ok(())
    }
}

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn mount_reports_card_details() {
    init();
    let host = MemoryHost::sdhc(8 * GIB);
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default());
    assert_eq!(sdmmc.state(), MountState::Unmounted);
    assert_eq!(sdmmc.metadata(), None);

    let metadata = sdmmc.mount().unwrap();
    assert_eq!(sdmmc.state(), MountState::Mounted);
    assert_eq!(metadata.class, CardClass::Sdhc);
    assert_eq!(metadata.fs_type, FsType::Fat32);
    // The card could do 50 MHz, the slot is capped at 20.
    assert_eq!(metadata.freq_khz, 20_000);
    assert_eq!(metadata.capacity_bytes(), 8 * GIB);
    assert_eq!(sdmmc.metadata(), Some(&metadata));
    assert!(host.card().is_mounted());
}

#[test]
fn card_classes() {
    let mut sdsc = SdMmc::new(MemoryHost::sdsc(256 * 1024 * 1024), MountConfig::default());
    let metadata = sdsc.mount().unwrap();
    assert_eq!(metadata.class, CardClass::Sdsc);
    assert_eq!(metadata.fs_type, FsType::Fat16);
    assert_eq!(metadata.capacity_bytes(), 256 * 1024 * 1024);

    let mut mmc = SdMmc::new(MemoryHost::mmc(GIB), MountConfig::default());
    assert_eq!(mmc.mount().unwrap().class, CardClass::Mmc);

    let mut sdxc = SdMmc::new(MemoryHost::sdhc(64 * GIB), MountConfig::default());
    assert_eq!(sdxc.mount().unwrap().class, CardClass::Sdxc);
}

#[test]
fn mount_twice_is_rejected() {
    init();
    let mut sdmmc = SdMmc::new(MemoryHost::sdhc(8 * GIB), MountConfig::default());
    sdmmc.mount().unwrap();
    assert_eq!(sdmmc.mount(), Err(MountError::AlreadyMounted));
    assert_eq!(sdmmc.state(), MountState::Mounted);
}

#[test]
fn unmount_requires_mounted_card() {
    let mut sdmmc = SdMmc::new(MemoryHost::sdhc(8 * GIB), MountConfig::default());
    assert_eq!(sdmmc.unmount(), Err(MountError::NotMounted));
    assert_eq!(sdmmc.state(), MountState::Unmounted);
    assert!(sdmmc.volume().is_err());

    sdmmc.mount().unwrap();
    sdmmc.unmount().unwrap();
    assert_eq!(sdmmc.state(), MountState::Unmounted);
    assert_eq!(sdmmc.metadata(), None);
    assert_eq!(sdmmc.volume().err(), Some(NotMounted));
}

#[test]
fn refused_unmount_keeps_card_mounted() {
    init();
    let host = MemoryHost::sdhc(8 * GIB);
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default());
    sdmmc.mount().unwrap();

    host.card().faults.unmount_fails = true;
    assert_eq!(sdmmc.unmount(), Err(MountError::Driver(1)));
    assert_eq!(sdmmc.state(), MountState::Mounted);
    assert!(sdmmc.metadata().is_some());
    // The handle came back and still works.
    assert!(sdmmc.volume().unwrap().stat("/sdcard/").unwrap().is_dir());

    host.card().faults.unmount_fails = false;
    sdmmc.unmount().unwrap();
    assert!(!host.card().is_mounted());
}

#[test]
fn failed_remount_then_mount_recovers() {
    init();
    let host = MemoryHost::sdhc(8 * GIB);
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default());
    sdmmc.mount().unwrap();

    host.card().faults.not_responding = true;
    assert_eq!(sdmmc.remount(), Err(MountError::HardwareNotResponding));
    assert_eq!(sdmmc.state(), MountState::Failed);
    assert_eq!(sdmmc.failure(), Some(MountError::HardwareNotResponding));
    assert_eq!(sdmmc.metadata(), None);

    host.card().faults.not_responding = false;
    sdmmc.mount().unwrap();
    assert_eq!(sdmmc.state(), MountState::Mounted);
    assert_eq!(sdmmc.failure(), None);
}

#[test]
fn remount_with_refused_unmount_does_nothing_else() {
    let host = MemoryHost::sdhc(8 * GIB);
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default());
    sdmmc.mount().unwrap();

    host.card().faults.unmount_fails = true;
    assert_eq!(sdmmc.remount(), Err(MountError::Driver(1)));
    assert_eq!(sdmmc.state(), MountState::Mounted);
}

#[test]
fn format_with_refused_unmount_keeps_card_mounted() {
    let host = MemoryHost::sdhc(8 * GIB);
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default());
    sdmmc.mount().unwrap();
    let file = sdmmc
        .volume()
        .unwrap()
        .open("/sdcard/keep.txt", OpenFlags::WRITE | OpenFlags::CREATE)
        .unwrap();
    sdmmc.volume().unwrap().close(file).unwrap();

    host.card().faults.unmount_fails = true;
    assert_eq!(sdmmc.format(), Err(MountError::Driver(1)));
    assert_eq!(sdmmc.state(), MountState::Mounted);
    assert!(sdmmc.metadata().is_some());
    assert!(host.card().is_mounted());
    assert_eq!(host.card().file_count(), 1);
}

#[test]
fn missing_filesystem() {
    init();
    let host = MemoryHost::sdhc(8 * GIB);
    host.card().erase();

    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default());
    assert_eq!(sdmmc.mount(), Err(MountError::FilesystemAbsent));
    assert_eq!(sdmmc.state(), MountState::Failed);

    let config = MountConfig {
        format_if_mount_failed: true,
        ..MountConfig::default()
    };
    let mut sdmmc = SdMmc::new(host.clone(), config);
    let metadata = sdmmc.mount().unwrap();
    assert_eq!(metadata.fs_type, FsType::Fat32);
    assert_eq!(host.card().file_count(), 0);
}

#[test]
fn unsupported_cards() {
    let host = MemoryHost::sdhc(8 * GIB);
    host.card().faults.unsupported = true;
    let mut sdmmc = SdMmc::new(host, MountConfig::default());
    assert_eq!(sdmmc.mount(), Err(MountError::UnsupportedMedia));

    assert_eq!(sdmmc.state(), MountState::Failed);
}

#[test]
fn undecodable_csd_still_mounts() {
    init();
    // CSD structure 3 is reserved on SD cards.
    let registers = CardRegisters {
        family: CardFamily::Sd,
        ocr: 0,
        csd: [0xC0; 16],
        freq_khz: 25_000,
    };
    let host = MemoryHost::with_registers(registers, GIB);
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default());
    let metadata = sdmmc.mount().unwrap();
    assert_eq!(metadata.class, CardClass::Unknown);
    assert_eq!(metadata.capacity_bytes(), 0);
    assert_eq!(metadata.fs_type, FsType::Fat32);
    assert_eq!(sdmmc.state(), MountState::Mounted);
    assert!(host.card().is_mounted());

    // The driver and the manager agree on the card's state throughout.
    sdmmc.unmount().unwrap();
    assert!(!host.card().is_mounted());
    sdmmc.mount().unwrap();
    assert!(host.card().is_mounted());
}

#[test]
fn mmc_cards_mount_whatever_their_csd_structure() {
    init();
    let mut sdmmc = SdMmc::new(MemoryHost::mmc(GIB), MountConfig::default());
    let metadata = sdmmc.mount().unwrap();
    assert_eq!(metadata.class, CardClass::Mmc);
    assert_eq!(metadata.capacity_bytes(), GIB);

    for structure in 0..4u8 {
        let mut csd = [0u8; 16];
        csd[0] = structure << 6;
        csd[5] = 0x59;
        csd[6] = 0x03;
        csd[7] = 0xFF;
        csd[8] = 0xC0;
        csd[9] = 0x03;
        csd[10] = 0x80;
        let registers = CardRegisters {
            family: CardFamily::Mmc,
            ocr: 0,
            csd,
            freq_khz: 20_000,
        };
        let mut sdmmc = SdMmc::new(
            MemoryHost::with_registers(registers, GIB),
            MountConfig::default(),
        );
        let metadata = sdmmc.mount().unwrap();
        assert_eq!(metadata.class, CardClass::Mmc);
        assert_eq!(metadata.capacity_bytes(), GIB, "structure {}", structure);
    }
}

#[test]
fn format_requires_mounted_card() {
    let mut sdmmc = SdMmc::new(MemoryHost::sdhc(8 * GIB), MountConfig::default());
    assert_eq!(sdmmc.format(), Err(MountError::NotMounted));
    assert_eq!(sdmmc.state(), MountState::Unmounted);
}

#[test]
fn format_failure_leaves_card_failed() {
    init();
    let host = MemoryHost::sdhc(8 * GIB);
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default());
    sdmmc.mount().unwrap();

    host.card().faults.format_fails = true;
    assert_eq!(sdmmc.format(), Err(MountError::Driver(1)));
    assert_eq!(sdmmc.state(), MountState::Failed);

    host.card().faults.format_fails = false;
    assert_eq!(sdmmc.mount(), Err(MountError::FilesystemAbsent));
}

#[test]
fn power_pin_follows_mount_state() {
    let log = PowerLog::default();
    let mut sdmmc =
        SdMmc::new(MemoryHost::sdhc(8 * GIB), MountConfig::default()).with_power_pin(log.clone());
    sdmmc.mount().unwrap();
    sdmmc.unmount().unwrap();
    assert_eq!(*log.0.borrow(), [true, false]);
}

#[test]
fn failed_mount_switches_power_off() {
    let host = MemoryHost::sdhc(8 * GIB);
    let log = PowerLog::default();
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default()).with_power_pin(log.clone());

    host.card().faults.not_responding = true;
    assert_eq!(sdmmc.mount(), Err(MountError::HardwareNotResponding));
    assert_eq!(*log.0.borrow(), [true, false]);

    host.card().faults.not_responding = false;
    host.card().erase();
    assert_eq!(sdmmc.mount(), Err(MountError::FilesystemAbsent));
    assert_eq!(*log.0.borrow(), [true, false, true, false]);
}

#[test]
fn failed_format_switches_power_off() {
    let host = MemoryHost::sdhc(8 * GIB);
    let log = PowerLog::default();
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default()).with_power_pin(log.clone());
    sdmmc.mount().unwrap();

    host.card().faults.format_fails = true;
    assert!(sdmmc.format().is_err());
    assert_eq!(*log.0.borrow(), [true, false]);
}

#[test]
fn stuck_power_pin_does_not_fail_unmount() {
    init();
    let host = MemoryHost::sdhc(8 * GIB);
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default()).with_power_pin(StuckOn);
    sdmmc.mount().unwrap();

    assert_eq!(sdmmc.unmount(), Ok(()));
    assert_eq!(sdmmc.state(), MountState::Unmounted);
    assert!(!host.card().is_mounted());
    assert_eq!(sdmmc.unmount(), Err(MountError::NotMounted));
    sdmmc.mount().unwrap();
}

#[test]
fn broken_power_pin() {
    let host = MemoryHost::sdhc(8 * GIB);
    let mut sdmmc = SdMmc::new(host.clone(), MountConfig::default()).with_power_pin(BrokenPin);
    assert_eq!(sdmmc.mount(), Err(MountError::Gpio));
    assert_eq!(sdmmc.state(), MountState::Failed);
    assert!(!host.card().is_mounted());
}

#[test]
fn borrowed_host() {
    let mut host = MemoryHost::sdhc(8 * GIB);
    {
        let mut sdmmc = SdMmc::new(&mut host, MountConfig::default());
        sdmmc.mount().unwrap();
        sdmmc.unmount().unwrap();
        sdmmc.mount().unwrap();
    }
    assert!(host.card().is_mounted());
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
