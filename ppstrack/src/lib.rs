pub mod clock;
pub mod controller;
pub mod diag;
pub mod display;
pub mod group;
pub mod queue;
pub mod save;
pub mod sim;
pub mod source;
pub mod status;
pub mod sync;
pub mod utc;

use argh::FromArgs;
use ppstools::ChannelId;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, FromArgs, Clone)]
/// Track a 1PPS reference and group signal events by reference period
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// run file path (JSON)
    #[argh(option, short = 'c')]
    pub config: Option<String>,
    /// stop after this long, e.g. "15min" (default: run until the source ends)
    #[argh(option, from_str_fn(parse_duration))]
    pub duration: Option<Duration>,
    /// simulation speed relative to real time, 0 for as fast as possible
    #[argh(option, default = "1.0")]
    pub speed: f64,
    /// simulation random seed
    #[argh(option, default = "0")]
    pub seed: u64,
    /// probability that a simulated reference pulse is lost
    #[argh(option, default = "0.0")]
    pub dropout: f64,
    /// status report period in ms
    #[argh(option, default = "1000")]
    pub status_rate: u64,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Steady-state conditions. None of them stops a running measurement: they
/// are counted in [`status::Status`] and grouping carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Anomaly {
    #[error("reference tag at {time} ps is not after the open period start {start} ps")]
    NonMonotonicReference { time: i64, start: i64 },
    #[error("period index jumped from {previous} to {index}, {missed} period(s) missing")]
    SequenceGap { previous: u64, index: u64, missed: u64 },
    #[error("period index {index} does not follow {previous}")]
    IndexRegression { previous: u64, index: u64 },
    #[error("late event on channel {channel} at {time} ps, period {index} started at {start} ps")]
    LateEvent { channel: ChannelId, time: i64, index: u64, start: i64 },
    #[error("event queue full, dropped {dropped} event(s)")]
    Overrun { dropped: u64 },
    #[error("storage degraded: {0}")]
    StorageDegraded(String),
    #[error("external clock deviates from nominal by {ppm:.3} ppm")]
    ClockDrift { ppm: f64 },
}
