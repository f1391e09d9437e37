//! Configuration tools: the run file that declares a measurement

use crate::{ChannelId, Role, PS_PER_SECOND};
use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Measurement declaration, read once when a session starts.
///
/// Runs are declared in JSON. Only `channels` is required; every other field
/// falls back to the defaults below. A minimal run file assigns one
/// reference channel and some signal channels:
///
/// ```json
/// {
///     "name": "lab clock vs gps",
///     "channels": [
///         {"channel": 1, "role": "reference", "name": "GPS"},
///         {"channel": 2, "role": "signal", "name": "Rb"},
///         {"channel": -3, "role": "signal"}
///     ]
/// }
/// ```
///
/// ## Channels
///
/// The order of the signal channels in `channels` is the column order of the
/// stored records. Negative channel numbers select the falling edge.
///
/// ## External clock
///
/// With an `external_clock` channel, the nominal tick period is
/// `clock_divider / clock_frequency`. Ticks deviating from it by more than
/// `drift_tolerance_ppm` over the last `clock_window` ticks raise the
/// clock-drift flag.
///
/// ## Storage
///
/// Files are rotated when a group's label passes `rotation_time`, evaluated
/// in a zone `rotation_utc_offset` minutes east of UTC.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub name:                   String,
    pub channels:               Vec<ChannelConfig>,
    #[serde(default = "default_clock_frequency")]
    pub clock_frequency:        f64,
    #[serde(default = "default_one")]
    pub clock_divider:          u32,
    #[serde(default = "default_clock_window")]
    pub clock_window:           usize,
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance_ppm:    f64,
    #[serde(default = "default_display_length")]
    pub display_length:         usize,
    #[serde(default = "default_rotation_time")]
    pub rotation_time:          NaiveTime,
    #[serde(default)]
    pub rotation_utc_offset:    i32,
    #[serde(default = "default_output_dir")]
    pub output_dir:             PathBuf,
    #[serde(default)]
    pub file_prefix:            String,
    #[serde(default)]
    pub diagnostics:            bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity:         usize,
    #[serde(default = "default_no_signal", with = "humantime_serde")]
    pub no_signal_threshold:    Duration,
}

/// Role and display name of one channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub channel:    ChannelId,
    pub role:       Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name:       Option<String>,
}

impl ChannelConfig {
    pub fn new(channel: ChannelId, role: Role) -> Self {
        ChannelConfig { channel, role, name: None }
    }

    pub fn named(channel: ChannelId, role: Role, name: &str) -> Self {
        ChannelConfig { channel, role, name: Some(String::from(name)) }
    }
}

/// Problems that prevent a measurement from starting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no reference channel assigned")]
    NoReference,
    #[error("more than one reference channel: {0:?}")]
    MultipleReferences(Vec<ChannelId>),
    #[error("more than one external clock channel: {0:?}")]
    MultipleClocks(Vec<ChannelId>),
    #[error("channel {0} is assigned more than once")]
    DuplicateChannel(ChannelId),
    #[error("channel number 0 is not a valid input")]
    ZeroChannel,
    #[error("clock frequency must be positive, got {0}")]
    ClockFrequency(f64),
    #[error("clock divider must be at least 1")]
    ClockDivider,
    #[error("clock window must hold at least 2 ticks, got {0}")]
    ClockWindow(usize),
    #[error("drift tolerance must be positive, got {0} ppm")]
    DriftTolerance(f64),
    #[error("display length must be at least 1")]
    DisplayLength,
    #[error("queue capacity must be at least 1")]
    QueueCapacity,
    #[error("rotation offset of {0} minutes is out of range")]
    RotationOffset(i32),
}

fn default_clock_frequency() -> f64 {
    10e6
}

fn default_one() -> u32 {
    1
}

fn default_clock_window() -> usize {
    1000
}

fn default_drift_tolerance() -> f64 {
    100.0
}

fn default_display_length() -> usize {
    300
}

fn default_rotation_time() -> NaiveTime {
    NaiveTime::MIN
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_queue_capacity() -> usize {
    65536
}

fn default_no_signal() -> Duration {
    Duration::from_secs(5)
}

/// Creates a run with no channels. It does not validate until channels are
/// assigned.
impl Default for Config {
    fn default() -> Self {
        Config {
            name:                   String::new(),
            channels:               Vec::new(),
            clock_frequency:        default_clock_frequency(),
            clock_divider:          default_one(),
            clock_window:           default_clock_window(),
            drift_tolerance_ppm:    default_drift_tolerance(),
            display_length:         default_display_length(),
            rotation_time:          default_rotation_time(),
            rotation_utc_offset:    0,
            output_dir:             default_output_dir(),
            file_prefix:            String::new(),
            diagnostics:            false,
            queue_capacity:         default_queue_capacity(),
            no_signal_threshold:    default_no_signal(),
        }
    }
}

impl Config {
    /// Check everything a measurement needs before it can start
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for c in self.channels.iter() {
            if c.channel == 0 {
                return Err(ConfigError::ZeroChannel);
            }
            if !seen.insert(c.channel) {
                return Err(ConfigError::DuplicateChannel(c.channel));
            }
        }
        let refs = self.with_role(Role::Reference);
        match refs.len() {
            0 => return Err(ConfigError::NoReference),
            1 => {}
            _ => return Err(ConfigError::MultipleReferences(refs)),
        }
        let clocks = self.with_role(Role::ExternalClock);
        if clocks.len() > 1 {
            return Err(ConfigError::MultipleClocks(clocks));
        }
        if !(self.clock_frequency > 0.0) {
            return Err(ConfigError::ClockFrequency(self.clock_frequency));
        }
        if self.clock_divider == 0 {
            return Err(ConfigError::ClockDivider);
        }
        if self.clock_window < 2 {
            return Err(ConfigError::ClockWindow(self.clock_window));
        }
        if !(self.drift_tolerance_ppm > 0.0) {
            return Err(ConfigError::DriftTolerance(self.drift_tolerance_ppm));
        }
        if self.display_length == 0 {
            return Err(ConfigError::DisplayLength);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::QueueCapacity);
        }
        if self.rotation_offset().is_none() {
            return Err(ConfigError::RotationOffset(self.rotation_utc_offset));
        }
        Ok(())
    }

    /// Channels carrying `role`, in declaration order
    pub fn with_role(&self, role: Role) -> Vec<ChannelId> {
        self.channels
            .iter()
            .filter(|c| c.role == role)
            .map(|c| c.channel)
            .collect()
    }

    pub fn reference(&self) -> Option<ChannelId> {
        self.with_role(Role::Reference).first().copied()
    }

    pub fn clock(&self) -> Option<ChannelId> {
        self.with_role(Role::ExternalClock).first().copied()
    }

    pub fn signals(&self) -> Vec<ChannelId> {
        self.with_role(Role::Signal)
    }

    /// Column names of the signal channels, `Channel <n>` if unnamed
    pub fn signal_names(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|c| c.role == Role::Signal)
            .map(|c| match &c.name {
                Some(n) if !n.is_empty() => n.clone(),
                _ => format!("Channel {}", c.channel),
            })
            .collect()
    }

    pub fn reference_name(&self) -> String {
        self.channels
            .iter()
            .find(|c| c.role == Role::Reference)
            .and_then(|c| c.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| String::from("Reference"))
    }

    /// Nominal period between two external clock ticks, in picoseconds
    pub fn nominal_clock_period(&self) -> f64 {
        self.clock_divider as f64 * PS_PER_SECOND as f64 / self.clock_frequency
    }

    /// Zone in which `rotation_time` is evaluated
    pub fn rotation_offset(&self) -> Option<FixedOffset> {
        self.rotation_utc_offset
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }
}
