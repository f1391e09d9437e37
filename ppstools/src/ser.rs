//! Serialization of finalized groups to `.csv` records
//!
//! One row per group: UTC label, period index, one field per signal channel,
//! then sensor values if diagnostics are recorded. A channel field holds the
//! offsets of that channel's events from the period start, in picoseconds,
//! joined by [`OFFSET_DELIMITER`]. Offsets are plain integers, so neither
//! delimiter can appear inside a value.

use crate::{Record, LABEL_FORMAT};
use anyhow::Result;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::io::Write;

pub const COLUMN_DELIMITER: u8 = b',';
pub const OFFSET_DELIMITER: char = ';';

/// CSV writer with the record delimiters. Rows without sensor readings are
/// shorter than the header.
pub fn writer<W: Write>(wtr: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(COLUMN_DELIMITER)
        .flexible(true)
        .from_writer(wtr)
}

/// Write the header row: `UTC`, `Index`, channel names, sensor names.
pub fn header(
    wtr: &mut csv::Writer<impl Write>,
    channel_names: &[String],
    sensor_names: &[String],
) -> Result<()> {
    let mut row: Vec<String> = vec![String::from("UTC"), String::from("Index")];
    row.extend(channel_names.iter().cloned());
    row.extend(sensor_names.iter().cloned());
    wtr.write_record(&row)?;
    Ok(())
}

/// Write one group as a row.
pub fn record(wtr: &mut csv::Writer<impl Write>, rec: &Record) -> Result<()> {
    let g = &rec.group;
    let mut row: Vec<String> = Vec::with_capacity(2 + g.channels().len());
    row.push(label(&g.label()));
    row.push(g.index().to_string());
    for ch in g.channels() {
        row.push(offsets(&ch.offsets));
    }
    if let Some(s) = &rec.sensors {
        row.extend(s.values().map(String::from));
    }
    wtr.write_record(&row)?;
    Ok(())
}

/// Fixed-precision UTC label with microsecond resolution
pub fn label(t: &DateTime<Utc>) -> String {
    t.format(LABEL_FORMAT).to_string()
}

pub fn offsets(offsets: &[i64]) -> String {
    offsets.iter().join(&OFFSET_DELIMITER.to_string())
}
