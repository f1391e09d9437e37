//! Host wall clock and its correlation to device time

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Source of host wall-clock time
pub trait HostClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl HostClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Most anchors kept between two labels
const MAX_ANCHORS: usize = 1024;

/// Maps device timestamps to UTC. Anchors pair a device timestamp with the
/// host time it was observed at; a timestamp between two anchors is
/// interpolated linearly, one outside of them is offset from the nearest
/// anchor at host rate.
#[derive(Default, Clone, Debug)]
pub struct UtcCorrelator {
    anchors: VecDeque<(i64, DateTime<Utc>)>,
}

impl UtcCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchors must come in device time order, others are ignored
    pub fn anchor(&mut self, time: i64, utc: DateTime<Utc>) {
        if let Some(&(last, _)) = self.anchors.back() {
            if time <= last {
                return;
            }
        }
        self.anchors.push_back((time, utc));
        if self.anchors.len() > MAX_ANCHORS {
            self.anchors.pop_front();
        }
    }

    pub fn label(&self, time: i64) -> Option<DateTime<Utc>> {
        let i = self.anchors.partition_point(|&(t, _)| t < time);
        if i > 0 && i < self.anchors.len() {
            let (t1, u1) = self.anchors[i - 1];
            let (t2, u2) = self.anchors[i];
            let du = (u2 - u1).num_nanoseconds()? as i128;
            let ns = du * (time - t1) as i128 / (t2 - t1) as i128;
            return Some(u1 + Duration::nanoseconds(i64::try_from(ns).ok()?));
        }
        let &(t, u) = if i == 0 { self.anchors.front()? } else { self.anchors.back()? };
        Some(u + ps_to_duration(time - t))
    }

    /// Drop anchors that no longer bracket `time` or anything after it
    pub fn prune(&mut self, time: i64) {
        let i = self.anchors.partition_point(|&(t, _)| t < time);
        self.anchors.drain(..i.saturating_sub(1));
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

/// Device picoseconds to a chrono duration, truncated to nanoseconds
pub fn ps_to_duration(ps: i64) -> Duration {
    Duration::nanoseconds(ps / 1000)
}
