//! Grouping engine: assigns signal events to the open reference period and
//! finalizes one [`Group`] per period.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use ppstools::{ChannelId, ChannelOffsets, Group};
use std::collections::HashMap;
use std::sync::Arc;

#[allow(unused_imports)]
use tracing::{debug, info, warn};

use crate::status::Status;
use crate::sync::Boundary;
use crate::utc::UtcCorrelator;
use crate::Anomaly;

struct OpenPeriod {
    index: u64,
    start: i64,
    observed_at: DateTime<Utc>,
    /// Absolute timestamps per signal slot, ascending
    buckets: Vec<Vec<i64>>,
}

pub struct Grouper {
    signals: Vec<ChannelId>,
    slots: HashMap<ChannelId, usize>,
    open: Option<OpenPeriod>,
    last_index: Option<u64>,
    correlator: UtcCorrelator,
    status: Arc<Status>,
}

impl Grouper {
    /// `signals` gives the channel order of the finalized groups
    pub fn new(signals: Vec<ChannelId>, status: Arc<Status>) -> Self {
        let slots = signals.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Grouper {
            signals,
            slots,
            open: None,
            last_index: None,
            correlator: UtcCorrelator::new(),
            status,
        }
    }

    /// Close the open period at `b.start` and open period `b.index`.
    ///
    /// Returns the finalized group, or `None` for the very first boundary.
    /// Events already bucketed at or after `b.start` move to the new period.
    pub fn on_boundary(&mut self, b: Boundary) -> Result<Option<Arc<Group>>, Anomaly> {
        if let Some(previous) = self.last_index {
            if b.index <= previous {
                let a = Anomaly::IndexRegression { previous, index: b.index };
                self.status.record(&a);
                return Err(a);
            }
            if b.index != previous + 1 {
                self.status.record(&Anomaly::SequenceGap {
                    previous,
                    index: b.index,
                    missed: b.index - previous - 1,
                });
            }
        }
        let first = self.last_index.is_none();
        self.last_index = Some(b.index);

        let mut next = OpenPeriod {
            index: b.index,
            start: b.start,
            observed_at: b.observed_at,
            buckets: vec![Vec::new(); self.signals.len()],
        };
        let closed = match self.open.take() {
            Some(mut p) => {
                for (old, new) in p.buckets.iter_mut().zip(next.buckets.iter_mut()) {
                    let split = old.partition_point(|&t| t < b.start);
                    *new = old.split_off(split);
                }
                Some(self.finalize(p, Some(b.start)))
            }
            None if first => {
                info!("first reference at {} ps, period {}", b.start, b.index);
                None
            }
            None => {
                info!("reference back at {} ps, period {}", b.start, b.index);
                None
            }
        };
        self.open = Some(next);
        Ok(closed)
    }

    /// The reference tag that would have closed the open period was lost.
    /// Closes it without an end timestamp; signal events are dropped until
    /// the next boundary.
    pub fn on_reference_lost(&mut self) -> Option<Arc<Group>> {
        let p = self.open.take()?;
        Some(self.finalize(p, None))
    }

    /// Pair a device timestamp with the host time it was seen at, for the
    /// UTC labels
    pub fn anchor(&mut self, time: i64, utc: DateTime<Utc>) {
        self.correlator.anchor(time, utc);
    }

    /// Bucket a signal event. Events on channels that are not signal
    /// channels are ignored.
    pub fn on_signal(&mut self, channel: ChannelId, time: i64) -> Result<(), Anomaly> {
        let slot = match self.slots.get(&channel) {
            Some(&s) => s,
            None => return Ok(()),
        };
        let p = match self.open.as_mut() {
            Some(p) => p,
            None if self.last_index.is_none() => {
                self.status.pre_reference();
                return Ok(());
            }
            None => {
                self.status.unreferenced();
                return Ok(());
            }
        };
        if time < p.start {
            let a = Anomaly::LateEvent { channel, time, index: p.index, start: p.start };
            self.status.record(&a);
            return Err(a);
        }
        let bucket = &mut p.buckets[slot];
        match bucket.last() {
            Some(&last) if last > time => {
                let at = bucket.partition_point(|&t| t <= time);
                bucket.insert(at, time);
            }
            _ => bucket.push(time),
        }
        Ok(())
    }

    /// Close the open period without an end timestamp
    pub fn finish(&mut self) -> Option<Arc<Group>> {
        let p = self.open.take()?;
        Some(self.finalize(p, None))
    }

    /// Index and start of the open period
    pub fn current(&self) -> Option<(u64, i64)> {
        self.open.as_ref().map(|p| (p.index, p.start))
    }

    pub fn signals(&self) -> &[ChannelId] {
        &self.signals
    }

    fn finalize(&mut self, p: OpenPeriod, end: Option<i64>) -> Arc<Group> {
        let label = self.correlator.label(p.start).unwrap_or(p.observed_at);
        self.correlator.prune(p.start);
        let channels = self
            .signals
            .iter()
            .zip(p.buckets)
            .map(|(&channel, bucket)| ChannelOffsets {
                channel,
                offsets: bucket.into_iter().map(|t| t - p.start).collect(),
            })
            .collect();
        let g = Group::new(p.index, label, p.start, end, channels);
        let missing = g.missing_channels();
        if !missing.is_empty() {
            debug!("period {}: no events on {:?}", g.index(), missing);
            self.status
                .note(format!("Tags missing: input {}", missing.iter().join(", ")));
        }
        self.status.group_emitted(g.index());
        Arc::new(g)
    }
}
