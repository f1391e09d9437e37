//! Bounded event queue between the source and the grouping thread
//!
//! The producer never blocks: when the queue is full the oldest queued event
//! is dropped to make room, and the loss is counted as an overrun.

use flume::{Receiver, Sender, TrySendError};
use ppstools::Event;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[allow(unused_imports)]
use tracing::{debug, info, span, warn, Level};

use crate::source::Subscription;
use crate::status::Status;
use crate::Anomaly;

/// Producer side of the queue
pub struct EventQueue {
    sender: Sender<Event>,
    // held to evict from the front when full, so the channel never
    // disconnects by itself
    evict: Receiver<Event>,
    hung_up: Arc<AtomicBool>,
    status: Arc<Status>,
    overrunning: bool,
}

/// Consumer side of the queue. Dropping it tells the producer to stop.
pub struct Events {
    receiver: Receiver<Event>,
    hung_up: Arc<AtomicBool>,
}

impl Deref for Events {
    type Target = Receiver<Event>;

    fn deref(&self) -> &Receiver<Event> {
        &self.receiver
    }
}

impl Drop for Events {
    fn drop(&mut self) {
        self.hung_up.store(true, Ordering::Release);
    }
}

pub fn bounded(capacity: usize, status: Arc<Status>) -> (EventQueue, Events) {
    let (sender, receiver) = flume::bounded(capacity.max(1));
    let hung_up = Arc::new(AtomicBool::new(false));
    let q = EventQueue {
        sender,
        evict: receiver.clone(),
        hung_up: hung_up.clone(),
        status,
        overrunning: false,
    };
    (q, Events { receiver, hung_up })
}

impl EventQueue {
    /// Queue an event, dropping the oldest ones if needed. Returns `false`
    /// once the consumer is gone.
    pub fn push(&mut self, event: Event) -> bool {
        if self.hung_up.load(Ordering::Acquire) {
            return false;
        }
        let mut event = event;
        let mut dropped = 0u64;
        let ok = loop {
            match self.sender.try_send(event) {
                Ok(()) => break true,
                Err(TrySendError::Disconnected(_)) => break false,
                Err(TrySendError::Full(e)) => {
                    event = e;
                    if self.evict.try_recv().is_ok() {
                        dropped += 1;
                    }
                }
            }
        };
        if dropped > 0 {
            if !self.overrunning {
                warn!("event queue full, dropping oldest events");
                self.status.note("Event queue overrun, dropping oldest events");
                self.overrunning = true;
            }
            self.status.record(&Anomaly::Overrun { dropped });
        } else {
            self.overrunning = false;
        }
        ok
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

/// Spawn the producer thread: pulls from the subscription until it ends,
/// the consumer hangs up, or `stop` is raised.
pub fn pump(
    subscription: Subscription,
    mut queue: EventQueue,
    stop: Arc<AtomicBool>,
) -> JoinHandle<u64> {
    thread::spawn(move || {
        let span = span!(Level::INFO, "source");
        let _enter = span.enter();
        let mut n = 0u64;
        for event in subscription {
            if stop.load(Ordering::Relaxed) || !queue.push(event) {
                break;
            }
            n += 1;
        }
        debug!("source finished after {} events", n);
        n
    })
}
