use std::{cell::RefCell, rc::Rc};

use sdmmc_card::{MemoryHost, Metric, MountConfig, SdCard, Sink, TickOutcome};

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Default)]
struct Recorder {
    numbers: Vec<f64>,
    texts: Vec<String>,
}

impl Sink for Recorder {
    fn publish_numeric(&mut self, value: f64) {
        self.numbers.push(value);
    }

    fn publish_text(&mut self, value: &str) {
        self.texts.push(value.to_owned());
    }
}

/// A recorder plus the type erased handle the card registers.
fn recorder() -> (Rc<RefCell<Recorder>>, Rc<RefCell<dyn Sink>>) {
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    let sink: Rc<RefCell<dyn Sink>> = recorder.clone();
    (recorder, sink)
}

fn card() -> SdCard<MemoryHost> {
    let _ = env_logger::builder().is_test(true).try_init();
    SdCard::new(MemoryHost::sdhc(8 * GIB), MountConfig::default()).unwrap()
}

#[test]
fn setup_publishes_once() {
    let mut card = card();
    let (total, total_sink) = recorder();
    let (kind, kind_sink) = recorder();
    card.register_sink(Metric::TotalSpace, &total_sink);
    card.register_sink(Metric::CardType, &kind_sink);
    card.register_sink(Metric::FilesystemType, &kind_sink);

    card.setup(0).unwrap();
    assert_eq!(total.borrow().numbers, [(8 * GIB) as f64]);
    assert_eq!(kind.borrow().texts, ["SDHC", "FAT32"]);
}

#[test]
fn tick_follows_the_interval() {
    let mut card = card();
    let (used, used_sink) = recorder();
    let (freq, freq_sink) = recorder();
    card.register_sink(Metric::UsedSpace, &used_sink);
    card.register_sink(Metric::Frequency, &freq_sink);
    card.setup(1_000).unwrap();
    assert_eq!(used.borrow().numbers.len(), 1);

    assert_eq!(card.tick(30_000), TickOutcome::Idle);
    assert_eq!(card.tick(61_000), TickOutcome::Idle);
    card.write_file("blob", &[0; 100]).unwrap();
    assert_eq!(card.tick(61_001), TickOutcome::Published);
    assert_eq!(used.borrow().numbers, [0.0, 16_384.0]);
    assert_eq!(freq.borrow().numbers, [20_000.0, 20_000.0]);

    assert_eq!(card.tick(100_000), TickOutcome::Idle);
}

#[test]
fn unmounted_tick_is_retried() {
    let mut card = card().with_publish_interval(1_000);
    let (free, free_sink) = recorder();
    card.register_sink(Metric::FreeSpace, &free_sink);
    card.setup(0).unwrap();
    card.unmount().unwrap();

    assert_eq!(card.tick(5_000), TickOutcome::Skipped);
    assert_eq!(card.tick(5_001), TickOutcome::Skipped);
    assert_eq!(free.borrow().numbers.len(), 1);

    card.mount().unwrap();
    assert_eq!(card.tick(5_002), TickOutcome::Published);
    assert_eq!(card.tick(5_003), TickOutcome::Idle);
    assert_eq!(free.borrow().numbers.len(), 2);
}

#[test]
fn failed_setup_never_publishes() {
    let host = MemoryHost::sdhc(8 * GIB);
    host.card().faults.not_responding = true;
    let mut card = SdCard::new(host, MountConfig::default()).unwrap();
    let (total, total_sink) = recorder();
    card.register_sink(Metric::TotalSpace, &total_sink);

    assert!(card.setup(0).is_err());
    assert_eq!(card.tick(60_001), TickOutcome::Skipped);
    assert!(total.borrow().numbers.is_empty());
}

#[test]
fn watched_file() {
    let mut card = card();
    card.setup(0).unwrap();
    let (size, size_sink) = recorder();
    let (content, content_sink) = recorder();
    card.register_sink(Metric::FileSize, &size_sink);
    card.register_sink(Metric::FileContent, &content_sink);
    card.watch_file("log.txt");

    card.write_file("/log.txt", b"abc").unwrap();
    card.append_file("/sdcard/log.txt", b"de").unwrap();
    card.write_file("other.txt", b"ignored").unwrap();
    assert_eq!(size.borrow().numbers, [3.0, 5.0]);

    assert_eq!(card.tick(60_001), TickOutcome::Published);
    assert_eq!(size.borrow().numbers, [3.0, 5.0, 5.0]);
    assert_eq!(content.borrow().texts, ["abcde"]);

    card.delete_file("log.txt").unwrap();
    assert_eq!(size.borrow().numbers, [3.0, 5.0, 5.0, 0.0]);

    // Gone: size reads as zero, content is left alone
    assert_eq!(card.tick(120_002), TickOutcome::Published);
    assert_eq!(size.borrow().numbers, [3.0, 5.0, 5.0, 0.0, 0.0]);
    assert_eq!(content.borrow().texts, ["abcde"]);
}

#[test]
fn dropped_sink_is_ignored() {
    let mut card = card();
    let (kept, kept_sink) = recorder();
    let (dropped, dropped_sink) = recorder();
    card.register_sink(Metric::TotalSpace, &kept_sink);
    card.register_sink(Metric::TotalSpace, &dropped_sink);
    drop(dropped_sink);
    drop(dropped);

    card.setup(0).unwrap();
    assert_eq!(card.tick(60_001), TickOutcome::Published);
    assert_eq!(kept.borrow().numbers.len(), 2);
}

#[test]
fn remount_and_format_publish() {
    let mut card = card();
    card.setup(0).unwrap();
    card.write_file("a", &[0; 10]).unwrap();
    let (used, used_sink) = recorder();
    card.register_sink(Metric::UsedSpace, &used_sink);

    card.remount().unwrap();
    assert_eq!(used.borrow().numbers, [16_384.0]);

    card.format().unwrap();
    assert_eq!(used.borrow().numbers, [16_384.0, 0.0]);

    // An explicit mount does not
    card.unmount().unwrap();
    card.mount().unwrap();
    assert_eq!(used.borrow().numbers.len(), 2);
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
