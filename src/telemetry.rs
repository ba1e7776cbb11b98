//! sdmmc-card - Telemetry
//!
//! Periodic publishing of space usage and card details to whichever sinks
//! the host registered. Sinks are held weakly; one that has been dropped is
//! forgotten on the next publish.

use alloc::{
    rc::{Rc, Weak},
    string::String,
    vec::Vec,
};
use core::cell::RefCell;

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

use crate::driver::FsType;
use crate::sdmmc::registers::CardClass;

/// Publish once a minute unless told otherwise.
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;

/// Something that displays values to the outside world, like a sensor.
pub trait Sink {
    fn publish_numeric(&mut self, _value: f64) {}
    fn publish_text(&mut self, _value: &str) {}
}

/// What a sink is registered for.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Metric {
    TotalSpace,
    UsedSpace,
    FreeSpace,
    /// Bus frequency in kHz
    Frequency,
    /// Size of the watched file
    FileSize,
    CardType,
    FilesystemType,
    /// Contents of the watched file
    FileContent,
}

/// Values gathered from the card for one publish cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// `(total, free)` in bytes, if the volume could report them
    pub space: Option<(u64, u64)>,
    pub freq_khz: u32,
    pub fs_type: FsType,
    pub card_class: CardClass,
    pub file_size: Option<u64>,
    pub file_content: Option<String>,
}

/// Result of one scheduler pass.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not due yet
    Idle,
    /// Due, but the card is not mounted. Retried on the next pass.
    Skipped,
    Published,
}

struct Registration {
    metric: Metric,
    sink: Weak<RefCell<dyn Sink>>,
}

pub struct Telemetry {
    interval_ms: u64,
    last_publish_ms: u64,
    watched: Option<String>,
    sinks: Vec<Registration>,
}

impl Telemetry {
    pub fn new(now_ms: u64) -> Self {
        Telemetry {
            interval_ms: DEFAULT_INTERVAL_MS,
            last_publish_ms: now_ms,
            watched: None,
            sinks: Vec::new(),
        }
    }

    pub fn set_interval(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    pub fn register(&mut self, metric: Metric, sink: &Rc<RefCell<dyn Sink>>) {
        self.sinks.push(Registration {
            metric,
            sink: Rc::downgrade(sink),
        });
    }

    /// Watch one file for the `FileSize` and `FileContent` metrics.
    pub fn watch(&mut self, path: &str) {
        self.watched = Some(String::from(path));
    }

    pub fn watched(&self) -> Option<&str> {
        self.watched.as_deref()
    }

    pub fn wants(&self, metric: Metric) -> bool {
        self.sinks.iter().any(|r| r.metric == metric)
    }

    pub fn due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_publish_ms) > self.interval_ms
    }

    pub fn mark(&mut self, now_ms: u64) {
        self.last_publish_ms = now_ms;
    }

    pub fn last_publish(&self) -> u64 {
        self.last_publish_ms
    }

    pub fn publish(&mut self, snapshot: &Snapshot) {
        if let Some((total, free)) = snapshot.space {
            self.numeric(Metric::TotalSpace, total as f64);
            self.numeric(Metric::UsedSpace, total.saturating_sub(free) as f64);
            self.numeric(Metric::FreeSpace, free as f64);
        }
        self.numeric(Metric::Frequency, f64::from(snapshot.freq_khz));
        if let Some(size) = snapshot.file_size {
            self.numeric(Metric::FileSize, size as f64);
        }
        self.text(Metric::CardType, snapshot.card_class.as_str());
        self.text(Metric::FilesystemType, snapshot.fs_type.as_str());
        if let Some(content) = &snapshot.file_content {
            self.text(Metric::FileContent, content);
        }
        debug!("Published telemetry to {} sinks", self.sinks.len());
    }

    pub fn numeric(&mut self, metric: Metric, value: f64) {
        self.each(metric, |sink| sink.publish_numeric(value));
    }

    pub fn text(&mut self, metric: Metric, value: &str) {
        self.each(metric, |sink| sink.publish_text(value));
    }

    fn each(&mut self, metric: Metric, mut f: impl FnMut(&mut dyn Sink)) {
        self.sinks.retain(|r| r.sink.strong_count() > 0);
        for registration in self.sinks.iter().filter(|r| r.metric == metric) {
            if let Some(sink) = registration.sink.upgrade() {
                f(&mut *sink.borrow_mut());
            }
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
