#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use ppstools::cfg::{ChannelConfig, Config};
use ppstools::{Role, PS_PER_SECOND};
use ppstrack::status::Status;
use ppstrack::sync::Boundary;
use ppstrack::utc::HostClock;
use std::sync::Arc;

/// Seconds to device picoseconds
pub fn s(x: f64) -> i64 {
    (x * PS_PER_SECOND as f64).round() as i64
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 6, 18, 13, 14, 53).unwrap()
}

/// Host clock that only moves when told to
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(t: DateTime<Utc>) -> Arc<Self> {
        Arc::new(ManualClock(Mutex::new(t)))
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.0.lock() = t;
    }

    pub fn advance(&self, d: Duration) {
        *self.0.lock() += d;
    }
}

impl HostClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

pub fn status() -> Arc<Status> {
    Arc::new(Status::new(ManualClock::new(t0())))
}

/// Boundary observed exactly `time` after `t0`
pub fn boundary(index: u64, time: i64) -> Boundary {
    Boundary {
        index,
        start: time,
        observed_at: t0() + Duration::nanoseconds(time / 1000),
    }
}

/// Reference on 1, signals on 2 and -3
pub fn config() -> Config {
    Config {
        channels: vec![
            ChannelConfig::named(1, Role::Reference, "GPS"),
            ChannelConfig::named(2, Role::Signal, "Rb"),
            ChannelConfig::new(-3, Role::Signal),
        ],
        ..Config::default()
    }
}
