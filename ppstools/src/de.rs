//! Deserialization of stored records and device sensor dumps

use crate::ser::{COLUMN_DELIMITER, OFFSET_DELIMITER};
use crate::SensorSnapshot;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::io::Read;

/// One stored row, as read back from a `.csv` file
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub label: DateTime<Utc>,
    pub index: u64,
    pub offsets: Vec<Vec<i64>>,
    pub sensors: Vec<String>,
}

/// CSV reader matching [`crate::ser::writer`], skipping the header row
pub fn reader<R: Read>(rdr: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(COLUMN_DELIMITER)
        .has_headers(true)
        .flexible(true)
        .from_reader(rdr)
}

/// Read all rows of a record file with `channels` signal columns.
pub fn records(rdr: &mut csv::Reader<impl Read>, channels: usize) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.len() < 2 + channels {
            return Err(anyhow!(
                "record has {} fields, expected at least {}",
                record.len(),
                2 + channels
            ));
        }
        let label = label(&record[0])?;
        let index = record[1].parse::<u64>().context("bad period index")?;
        let mut offsets = Vec::with_capacity(channels);
        for field in record.iter().skip(2).take(channels) {
            offsets.push(offset_list(field)?);
        }
        let sensors = record.iter().skip(2 + channels).map(String::from).collect();
        rows.push(Row { label, index, offsets, sensors });
    }
    Ok(rows)
}

/// Parse a UTC label written by [`crate::ser::label`]
pub fn label(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
        .with_context(|| format!("bad UTC label {:?}", s))?;
    Ok(Utc.from_utc_datetime(&naive))
}

pub fn offset_list(field: &str) -> Result<Vec<i64>> {
    if field.is_empty() {
        return Ok(Vec::new());
    }
    let mut v = Vec::new();
    for x in field.split(OFFSET_DELIMITER) {
        v.push(x.parse::<i64>().with_context(|| format!("bad offset {:?}", x))?);
    }
    Ok(v)
}

/// Deserialize a device sensor dump: tab-separated (name, value) lines.
/// Lines with fewer than two fields are skipped.
pub fn sensor_tsv(rdr: impl Read) -> Result<SensorSnapshot> {
    let mut crdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(rdr);
    let mut fields = Vec::new();
    for result in crdr.records() {
        let record = result?;
        if record.len() < 2 {
            continue;
        }
        fields.push((String::from(&record[0]), String::from(&record[1])));
    }
    Ok(SensorSnapshot { fields })
}
