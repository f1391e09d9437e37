//! Reference synchronizer: turns reference tags into numbered period
//! boundaries, and keeps the software clock of the external reference.

use chrono::{DateTime, Utc};
use std::sync::Arc;

#[allow(unused_imports)]
use tracing::{debug, info, warn};

use crate::clock::{ClockState, SoftClock};
use crate::status::Status;
use crate::utc::HostClock;
use crate::Anomaly;

/// Start of a new period
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boundary {
    pub index: u64,
    /// Device timestamp of the reference tag
    pub start: i64,
    /// Host time when the reference tag was accepted
    pub observed_at: DateTime<Utc>,
}

pub struct Synchronizer {
    next_index: u64,
    open: Option<(u64, i64)>,
    /// Start of the latest accepted reference tag
    last_start: Option<i64>,
    soft_clock: Option<SoftClock>,
    clock: Arc<dyn HostClock>,
    status: Arc<Status>,
}

impl Synchronizer {
    pub fn new(clock: Arc<dyn HostClock>, status: Arc<Status>) -> Self {
        Synchronizer {
            next_index: 0,
            open: None,
            last_start: None,
            soft_clock: None,
            clock,
            status,
        }
    }

    /// Discipline with an external clock
    pub fn with_soft_clock(mut self, soft_clock: SoftClock) -> Self {
        self.soft_clock = Some(soft_clock);
        self
    }

    /// Accept a reference tag. The first one opens period 0. A tag not later
    /// than the latest accepted one is rejected and the period stays open.
    pub fn on_reference(&mut self, time: i64) -> Result<Boundary, Anomaly> {
        if let Some(start) = self.last_start {
            if time <= start {
                let a = Anomaly::NonMonotonicReference { time, start };
                self.status.record(&a);
                return Err(a);
            }
        }
        let b = Boundary {
            index: self.next_index,
            start: time,
            observed_at: self.clock.now(),
        };
        self.open = Some((b.index, time));
        self.last_start = Some(time);
        self.next_index += 1;
        Ok(b)
    }

    /// The device lost `missed` reference tags. The open period ended at the
    /// first of them, and the next boundary skips as many indices. Losses
    /// before the first reference tag are ignored.
    pub fn on_reference_overflow(&mut self, missed: u32) {
        if self.last_start.is_none() {
            debug!("{} reference tag(s) lost before the first period", missed);
            return;
        }
        warn!("{} reference tag(s) lost", missed);
        self.open = None;
        self.next_index += missed as u64;
    }

    pub fn on_clock_tick(&mut self, time: i64) {
        let sc = match self.soft_clock.as_mut() {
            Some(sc) => sc,
            None => return,
        };
        let before = sc.state();
        match sc.on_tick(time) {
            ClockState::Drifting { ppm } => {
                // record once per excursion, then only refresh the deviation
                if !matches!(before, ClockState::Drifting { .. }) {
                    self.status.record(&Anomaly::ClockDrift { ppm });
                } else {
                    self.status.clock_deviation(ppm);
                }
            }
            ClockState::InTolerance { ppm } => self.status.clock_in_tolerance(ppm),
            ClockState::Settling => {}
        }
    }

    pub fn on_clock_overflow(&mut self, missed: u32) {
        if let Some(sc) = self.soft_clock.as_mut() {
            warn!("{} clock tick(s) lost, restarting clock estimate", missed);
            sc.reset();
            self.status.clear_clock_deviation();
        }
    }

    /// Index and start of the open period, `None` before the first reference
    /// tag and after a lost one
    pub fn current(&self) -> Option<(u64, i64)> {
        self.open
    }

    pub fn soft_clock(&self) -> Option<&SoftClock> {
        self.soft_clock.as_ref()
    }
}
