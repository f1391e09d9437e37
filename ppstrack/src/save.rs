//! Storage writer: appends records to `.csv` files and rotates them daily

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use ppstools::cfg::Config;
use ppstools::{ser, Record};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[allow(unused_imports)]
use tracing::{debug, error, info, span, warn, Level};

use crate::status::Status;
use crate::Anomaly;

#[derive(Clone, Debug)]
pub struct SaveSettings {
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub rotation_time: NaiveTime,
    pub offset: FixedOffset,
    /// Signal column names, in record order
    pub channel_names: Vec<String>,
    /// Sensor column names, empty without diagnostics
    pub sensor_names: Vec<String>,
}

impl SaveSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let offset = cfg
            .rotation_offset()
            .ok_or_else(|| anyhow!("invalid rotation offset {}", cfg.rotation_utc_offset))?;
        Ok(SaveSettings {
            output_dir: cfg.output_dir.clone(),
            file_prefix: cfg.file_prefix.clone(),
            rotation_time: cfg.rotation_time,
            offset,
            channel_names: cfg.signal_names(),
            sensor_names: Vec::new(),
        })
    }
}

/// True if the first `at` strictly after `prev` is not after `next`, both
/// taken as wall-clock times in `offset`.
pub fn rotation_due(
    prev: DateTime<Utc>,
    next: DateTime<Utc>,
    at: NaiveTime,
    offset: FixedOffset,
) -> bool {
    let p = prev.with_timezone(&offset).naive_local();
    let n = next.with_timezone(&offset).naive_local();
    let mut due = p.date().and_time(at);
    if due <= p {
        due = due + Duration::days(1);
    }
    due <= n
}

/// `{prefix}%Y-%m-%d_%H-%M-%S.csv`, with milliseconds if `precise`
pub fn file_name(prefix: &str, label: DateTime<FixedOffset>, precise: bool) -> String {
    let stamp = if precise {
        label.format("%Y-%m-%d_%H-%M-%S%.3f")
    } else {
        label.format("%Y-%m-%d_%H-%M-%S")
    };
    format!("{}{}.csv", prefix, stamp)
}

struct OpenFile {
    path: PathBuf,
    wtr: csv::Writer<File>,
}

pub struct Writer {
    settings: SaveSettings,
    status: Arc<Status>,
    file: Option<OpenFile>,
    last_label: Option<DateTime<Utc>>,
    files: Vec<PathBuf>,
}

impl Writer {
    pub fn new(settings: SaveSettings, status: Arc<Status>) -> Self {
        Writer { settings, status, file: None, last_label: None, files: Vec::new() }
    }

    /// Append one record, opening or rotating the file first if needed.
    ///
    /// On failure the file is dropped and storage is marked degraded; the
    /// next record tries again with a fresh file.
    pub fn write(&mut self, rec: &Record) -> Result<()> {
        let label = rec.group.label();
        if let Some(prev) = self.last_label {
            if rotation_due(prev, label, self.settings.rotation_time, self.settings.offset) {
                info!("rotating output file at period {}", rec.group.index());
                self.close();
            }
        }
        self.last_label = Some(label);
        match self.append(rec) {
            Ok(()) => {
                self.status.storage_ok();
                Ok(())
            }
            Err(e) => {
                self.file = None;
                self.status
                    .record(&Anomaly::StorageDegraded(format!("{:#}", e)));
                Err(e)
            }
        }
    }

    fn append(&mut self, rec: &Record) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(self.open(rec.group.label())?);
        }
        if let Some(f) = self.file.as_mut() {
            ser::record(&mut f.wtr, rec)
                .with_context(|| format!("writing {}", f.path.display()))?;
            f.wtr
                .flush()
                .with_context(|| format!("flushing {}", f.path.display()))?;
        }
        Ok(())
    }

    fn open(&mut self, label: DateTime<Utc>) -> Result<OpenFile> {
        let local = label.with_timezone(&self.settings.offset);
        let mut path = self.settings.output_dir.clone();
        path.push(file_name(&self.settings.file_prefix, local, false));
        let f = match create_new(&path) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                path.set_file_name(file_name(&self.settings.file_prefix, local, true));
                create_new(&path)
            }
            r => r,
        }
        .with_context(|| format!("creating {}", path.display()))?;
        let mut wtr = ser::writer(f);
        ser::header(
            &mut wtr,
            &self.settings.channel_names,
            &self.settings.sensor_names,
        )?;
        info!("new file opened: {}", path.display());
        self.status.note(format!("New file opened: {}", path.display()));
        self.files.push(path.clone());
        Ok(OpenFile { path, wtr })
    }

    /// Flush and close the current file, if any
    pub fn close(&mut self) {
        if let Some(mut f) = self.file.take() {
            if let Err(e) = f.wtr.flush() {
                error!("flushing {}: {}", f.path.display(), e);
            }
            info!("file closed: {}", f.path.display());
            self.status.note(format!("File closed: {}", f.path.display()));
        }
    }

    /// Every file opened so far
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Writer thread fed through `sender`
pub struct SaveHandle {
    pub sender: flume::Sender<Record>,
    join: JoinHandle<Vec<PathBuf>>,
}

impl SaveHandle {
    pub fn new(settings: SaveSettings, status: Arc<Status>) -> Self {
        let (sender, receiver) = flume::unbounded::<Record>();
        let join = thread::spawn(move || {
            let span = span!(Level::INFO, "storage");
            let _enter = span.enter();
            let mut writer = Writer::new(settings, status);
            while let Ok(rec) = receiver.recv() {
                if let Err(e) = writer.write(&rec) {
                    debug!("record {} not stored: {:#}", rec.group.index(), e);
                }
            }
            writer.close();
            writer.files
        });
        SaveHandle { sender, join }
    }

    /// Wait until every queued record is written. Other clones of the
    /// sender must be dropped first. Returns the files written.
    pub fn finish(self) -> Result<Vec<PathBuf>> {
        drop(self.sender);
        self.join
            .join()
            .map_err(|_| anyhow!("storage thread panicked"))
    }
}
