//! Persistent status journal.
//!
//! Every status call becomes one JSON line, so the file replays what the
//! display was shown and when.

use crate::protocol::JournalEntry;
use spindle_core::tags::{self, Tag};
use spindle_core::{MonotonicCounter, StatusSink};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Thread-safe JSONL writer usable as a status sink.
pub struct JournalSink {
    writer: Mutex<BufWriter<File>>,
    counter: Arc<dyn MonotonicCounter>,
}

impl JournalSink {
    /// Opens `path` in append mode, creating parent directories.
    pub fn new(path: &Path, counter: Arc<dyn MonotonicCounter>) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
            counter,
        })
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn record(&self, tag: Tag, value: impl Into<serde_json::Value>) {
        let entry = JournalEntry::new(self.counter.now_us(), tag, value);
        if let Err(e) = self.append(&entry) {
            warn!(error = %e, field = tag.key, "Journal write failed");
        }
    }
}

impl StatusSink for JournalSink {
    fn write_rpm(&mut self, rpm: f64) {
        self.record(tags::RPM, rpm);
    }
    fn update_engine_state(&mut self, energized: bool) {
        self.record(tags::ENGINE_ENERGIZED, energized);
    }
    fn update_power_state(&mut self, on: bool) {
        self.record(tags::MAIN_POWER, on);
    }
    fn update_direction_state(&mut self, forward: bool, backward: bool) {
        self.record(tags::DIRECTION_FORWARD, forward);
        self.record(tags::DIRECTION_BACKWARD, backward);
    }
    fn update_light(&mut self, on: bool) {
        self.record(tags::LIGHT, on);
    }
    fn update_backlight(&mut self, on: bool) {
        self.record(tags::BACKLIGHT, on);
    }
    fn update_lube(&mut self, on: bool) {
        self.record(tags::LUBRICATION, on);
    }
    fn update_warning(&mut self, warning: bool) {
        self.record(tags::WARNING, warning);
    }
    fn write_emergency(&mut self, emergency: bool) {
        self.record(tags::EMERGENCY, emergency);
    }
}
