pub mod cfg;
pub mod de;
pub mod ser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Input identifier. Positive for the rising edge of an input, negative for
/// the falling edge of the same input.
pub type ChannelId = i32;

/// The basic representation of a tagged event
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct Tag {
    /// Counter in picoseconds from arbitrary offset
    pub time: i64,
    /// Channel of the event
    pub channel: ChannelId,
}

/// One item of the stream delivered by an event source.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Event {
    /// Arrival sequence number, assigned by the source
    pub seq: u64,
    pub kind: EventKind,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum EventKind {
    Tag(Tag),
    /// The device lost `missed` events on `channel` (buffer overflow)
    Overflow { channel: ChannelId, missed: u32 },
}

impl Event {
    pub fn tag(seq: u64, channel: ChannelId, time: i64) -> Self {
        Event { seq, kind: EventKind::Tag(Tag { time, channel }) }
    }

    pub fn overflow(seq: u64, channel: ChannelId, missed: u32) -> Self {
        Event { seq, kind: EventKind::Overflow { channel, missed } }
    }

    pub fn channel(&self) -> ChannelId {
        match self.kind {
            EventKind::Tag(t) => t.channel,
            EventKind::Overflow { channel, .. } => channel,
        }
    }
}

/// What a channel is used for during a measurement
#[derive(Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reference,
    Signal,
    ExternalClock,
    Unassigned,
}

impl Default for Role {
    fn default() -> Self {
        Role::Unassigned
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Reference => "reference",
            Role::Signal => "signal",
            Role::ExternalClock => "external clock",
            Role::Unassigned => "unassigned",
        };
        f.write_str(s)
    }
}

/// Offsets of one signal channel within a period
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ChannelOffsets {
    pub channel: ChannelId,
    pub offsets: Vec<i64>,
}

/// The finalized record of one reference period.
///
/// Groups are handed out as `Arc<Group>` once finalized and have no mutating
/// methods, so a published group can never change.
#[derive(Clone, PartialEq, Debug)]
pub struct Group {
    index: u64,
    label: DateTime<Utc>,
    start: i64,
    end: Option<i64>,
    channels: Vec<ChannelOffsets>,
}

impl Group {
    pub fn new(
        index: u64,
        label: DateTime<Utc>,
        start: i64,
        end: Option<i64>,
        channels: Vec<ChannelOffsets>,
    ) -> Self {
        Group { index, label, start, end, channels }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// UTC wall-clock label of the period start
    pub fn label(&self) -> DateTime<Utc> {
        self.label
    }

    /// Device timestamp of the reference tag that opened the period
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Device timestamp of the reference tag that closed the period, or
    /// `None` if the period was closed by stopping the measurement.
    pub fn end(&self) -> Option<i64> {
        self.end
    }

    /// Per-channel offsets, in configuration order
    pub fn channels(&self) -> &[ChannelOffsets] {
        &self.channels
    }

    pub fn offsets(&self, channel: ChannelId) -> Option<&[i64]> {
        self.channels
            .iter()
            .find(|c| c.channel == channel)
            .map(|c| c.offsets.as_slice())
    }

    /// Channels without any event in this period
    pub fn missing_channels(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .filter(|c| c.offsets.is_empty())
            .map(|c| c.channel)
            .collect()
    }
}

/// Auxiliary device readings, as `(name, value)` pairs
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct SensorSnapshot {
    pub fields: Vec<(String, String)>,
}

impl SensorSnapshot {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, v)| v.as_str())
    }

    /// Readings for exactly `names`, in that order. Names without a reading
    /// get an empty value.
    pub fn select(&self, names: &[String]) -> SensorSnapshot {
        let fields = names
            .iter()
            .map(|n| {
                let v = self
                    .fields
                    .iter()
                    .find(|(name, _)| name == n)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                (n.clone(), v)
            })
            .collect();
        SensorSnapshot { fields }
    }
}

/// A group on its way to storage, with optional sensor readings attached
#[derive(Clone, Debug)]
pub struct Record {
    pub group: Arc<Group>,
    pub sensors: Option<SensorSnapshot>,
}

/// Device time units per second
pub const PS_PER_SECOND: i64 = 1_000_000_000_000;

/// Format of the UTC label in stored records
pub const LABEL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
