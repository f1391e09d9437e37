//! Status feed for the user interface: anomaly counters, flags and a log of
//! timestamped messages.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ppstools::ChannelId;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use crate::utc::{HostClock, SystemClock};
use crate::Anomaly;

/// Number of messages kept for [`Status::messages_since`]
pub const MESSAGE_LOG_LEN: usize = 1000;

const NO_INDEX: u64 = u64::MAX;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub index: u64,
    pub time: DateTime<Utc>,
    pub text: String,
}

/// Point-in-time copy of all counters and flags
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct StatusReport {
    pub clock_drift: bool,
    pub clock_deviation_ppm: Option<f64>,
    pub sequence_gaps: u64,
    pub missed_periods: u64,
    pub late_events: u64,
    pub pre_reference_events: u64,
    pub unreferenced_events: u64,
    pub non_monotonic_references: u64,
    pub index_regressions: u64,
    pub overruns: u64,
    pub missed_signal_events: u64,
    pub storage_degraded: bool,
    pub storage_failures: u64,
    pub records_written: u64,
    pub no_signal: bool,
    pub groups: u64,
    pub last_index: Option<u64>,
}

struct MessageLog {
    next: u64,
    log: VecDeque<Message>,
}

pub struct Status {
    clock_drift: AtomicBool,
    clock_deviation: AtomicU64,
    sequence_gaps: AtomicU64,
    missed_periods: AtomicU64,
    late_events: AtomicU64,
    pre_reference: AtomicU64,
    unreferenced: AtomicU64,
    non_monotonic: AtomicU64,
    index_regressions: AtomicU64,
    overruns: AtomicU64,
    missed_signal: AtomicU64,
    storage_degraded: AtomicBool,
    storage_failures: AtomicU64,
    records_written: AtomicU64,
    no_signal: AtomicBool,
    groups: AtomicU64,
    last_index: AtomicU64,
    messages: Mutex<MessageLog>,
    clock: Arc<dyn HostClock>,
}

impl Default for Status {
    fn default() -> Self {
        Status::new(Arc::new(SystemClock))
    }
}

impl Status {
    pub fn new(clock: Arc<dyn HostClock>) -> Self {
        Status {
            clock_drift: AtomicBool::new(false),
            clock_deviation: AtomicU64::new(f64::NAN.to_bits()),
            sequence_gaps: AtomicU64::new(0),
            missed_periods: AtomicU64::new(0),
            late_events: AtomicU64::new(0),
            pre_reference: AtomicU64::new(0),
            unreferenced: AtomicU64::new(0),
            non_monotonic: AtomicU64::new(0),
            index_regressions: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            missed_signal: AtomicU64::new(0),
            storage_degraded: AtomicBool::new(false),
            storage_failures: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            no_signal: AtomicBool::new(false),
            groups: AtomicU64::new(0),
            last_index: AtomicU64::new(NO_INDEX),
            messages: Mutex::new(MessageLog { next: 0, log: VecDeque::new() }),
            clock,
        }
    }

    /// Count an anomaly. Rare ones also go to the message log; late events
    /// and overruns are only counted, since they can arrive at event rate.
    pub fn record(&self, a: &Anomaly) {
        match a {
            Anomaly::NonMonotonicReference { .. } => {
                self.non_monotonic.fetch_add(1, Ordering::Relaxed);
                warn!("{}", a);
                self.note(a.to_string());
            }
            Anomaly::SequenceGap { missed, .. } => {
                self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
                self.missed_periods.fetch_add(*missed, Ordering::Relaxed);
                warn!("{}", a);
                self.note(a.to_string());
            }
            Anomaly::IndexRegression { .. } => {
                self.index_regressions.fetch_add(1, Ordering::Relaxed);
                error!("{}", a);
                self.note(a.to_string());
            }
            Anomaly::LateEvent { .. } => {
                self.late_events.fetch_add(1, Ordering::Relaxed);
                debug!("{}", a);
            }
            Anomaly::Overrun { dropped } => {
                self.overruns.fetch_add(*dropped, Ordering::Relaxed);
                debug!("{}", a);
            }
            Anomaly::StorageDegraded(_) => {
                self.storage_failures.fetch_add(1, Ordering::Relaxed);
                error!("{}", a);
                if !self.storage_degraded.swap(true, Ordering::AcqRel) {
                    self.note(a.to_string());
                }
            }
            Anomaly::ClockDrift { ppm } => {
                self.clock_deviation.store(ppm.to_bits(), Ordering::Relaxed);
                warn!("{}", a);
                if !self.clock_drift.swap(true, Ordering::AcqRel) {
                    self.note(a.to_string());
                }
            }
        }
    }

    /// Add a timestamped message to the log
    pub fn note(&self, text: impl Into<String>) {
        let text = text.into();
        let time = self.clock.now();
        let mut m = self.messages.lock();
        let index = m.next;
        m.next += 1;
        m.log.push_back(Message { index, time, text });
        while m.log.len() > MESSAGE_LOG_LEN {
            m.log.pop_front();
        }
    }

    /// Messages with index `from` or later that are still in the log
    pub fn messages_since(&self, from: u64) -> Vec<Message> {
        let m = self.messages.lock();
        m.log.iter().filter(|msg| msg.index >= from).cloned().collect()
    }

    /// Index the next message will get
    pub fn message_index(&self) -> u64 {
        self.messages.lock().next
    }

    /// Publish a clock deviation within tolerance, clearing the drift flag
    pub fn clock_in_tolerance(&self, ppm: f64) {
        self.clock_deviation.store(ppm.to_bits(), Ordering::Relaxed);
        if self.clock_drift.swap(false, Ordering::AcqRel) {
            info!("external clock back within tolerance ({:.3} ppm)", ppm);
            self.note(format!("external clock back within tolerance ({:.3} ppm)", ppm));
        }
    }

    pub fn clock_deviation(&self, ppm: f64) {
        self.clock_deviation.store(ppm.to_bits(), Ordering::Relaxed);
    }

    /// Forget the clock estimate, including an ongoing drift excursion
    pub fn clear_clock_deviation(&self) {
        self.clock_deviation.store(f64::NAN.to_bits(), Ordering::Relaxed);
        self.clock_drift.store(false, Ordering::Release);
    }

    pub fn storage_ok(&self) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
        if self.storage_degraded.swap(false, Ordering::AcqRel) {
            info!("storage recovered");
            self.note("storage recovered");
        }
    }

    pub fn pre_reference(&self) {
        self.pre_reference.fetch_add(1, Ordering::Relaxed);
    }

    /// Signal event dropped because its reference tag was lost
    pub fn unreferenced(&self) {
        self.unreferenced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn missed_signal(&self, channel: ChannelId, missed: u32) {
        self.missed_signal.fetch_add(missed as u64, Ordering::Relaxed);
        warn!("{} event(s) lost on channel {}", missed, channel);
        self.note(format!("{} event(s) lost on input {}", missed, channel));
    }

    pub fn set_no_signal(&self, silent: bool) {
        self.no_signal.store(silent, Ordering::Relaxed);
    }

    pub fn group_emitted(&self, index: u64) {
        self.groups.fetch_add(1, Ordering::Relaxed);
        self.last_index.store(index, Ordering::Relaxed);
    }

    pub fn storage_degraded(&self) -> bool {
        self.storage_degraded.load(Ordering::Acquire)
    }

    pub fn report(&self) -> StatusReport {
        let dev = f64::from_bits(self.clock_deviation.load(Ordering::Relaxed));
        let last = self.last_index.load(Ordering::Relaxed);
        StatusReport {
            clock_drift: self.clock_drift.load(Ordering::Acquire),
            clock_deviation_ppm: if dev.is_nan() { None } else { Some(dev) },
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            missed_periods: self.missed_periods.load(Ordering::Relaxed),
            late_events: self.late_events.load(Ordering::Relaxed),
            pre_reference_events: self.pre_reference.load(Ordering::Relaxed),
            unreferenced_events: self.unreferenced.load(Ordering::Relaxed),
            non_monotonic_references: self.non_monotonic.load(Ordering::Relaxed),
            index_regressions: self.index_regressions.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            missed_signal_events: self.missed_signal.load(Ordering::Relaxed),
            storage_degraded: self.storage_degraded.load(Ordering::Acquire),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            no_signal: self.no_signal.load(Ordering::Relaxed),
            groups: self.groups.load(Ordering::Relaxed),
            last_index: if last == NO_INDEX { None } else { Some(last) },
        }
    }
}
