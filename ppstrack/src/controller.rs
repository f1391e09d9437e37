//! Session controller: wires the source, the grouping thread and the output
//! threads together, and tears them down again.
//!
//! ```text
//! source ─► pump ─► bounded queue ─► grouping ─┬─► display buffer
//!                                               └─► [diagnostics] ─► storage
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use flume::{RecvTimeoutError, Sender};
use ppstools::cfg::Config;
use ppstools::{ChannelId, Event, EventKind, Group, Record, Role};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[allow(unused_imports)]
use tracing::{debug, error, info, span, warn, Level};

use crate::clock::SoftClock;
use crate::diag;
use crate::display::DisplayBuffer;
use crate::group::Grouper;
use crate::queue::{self, Events};
use crate::save::{SaveHandle, SaveSettings};
use crate::source::{EventSource, SourceSettings};
use crate::status::{Status, StatusReport};
use crate::sync::Synchronizer;
use crate::utc::{HostClock, SystemClock};

/// How often the grouping thread checks the stop flag while idle
const POLL: Duration = Duration::from_millis(20);

pub struct Engine {
    config: Config,
    source: Box<dyn EventSource>,
    clock: Arc<dyn HostClock>,
}

impl Engine {
    /// Fails if the configuration is not usable
    pub fn new(config: Config, source: Box<dyn EventSource>) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        Ok(Engine { config, source, clock: Arc::new(SystemClock) })
    }

    /// Use another host clock for labels and messages
    pub fn with_clock(mut self, clock: Arc<dyn HostClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Configure the source and start all threads. The session borrows the
    /// engine, so only one can run at a time.
    pub fn start(&mut self) -> Result<Session<'_>> {
        let cfg = &self.config;
        let status = Arc::new(Status::new(self.clock.clone()));
        let mut save_settings = SaveSettings::from_config(cfg)?;
        self.source
            .configure(&SourceSettings::from(cfg))
            .context("configuring source")?;
        let subscription = self.source.subscribe().context("subscribing to source")?;
        let probe = if cfg.diagnostics { self.source.sensor_probe() } else { None };
        if let Some(p) = probe.as_ref() {
            save_settings.sensor_names = p.names();
        }
        let save = SaveHandle::new(save_settings, status.clone());

        let mut diag_join = None;
        let output = if cfg.diagnostics {
            let (sender, receiver) = flume::unbounded();
            diag_join = Some(diag::main(receiver, save.sender.clone(), probe, status.clone()));
            Output::Diagnostics(sender)
        } else {
            Output::Storage(save.sender.clone())
        };

        let mut sync = Synchronizer::new(self.clock.clone(), status.clone());
        if cfg.clock().is_some() {
            sync = sync.with_soft_clock(SoftClock::new(
                cfg.nominal_clock_period(),
                cfg.drift_tolerance_ppm,
                cfg.clock_window,
            ));
        }
        let grouping = Grouping {
            roles: cfg.channels.iter().map(|c| (c.channel, c.role)).collect(),
            grouper: Grouper::new(cfg.signals(), status.clone()),
            sync,
            clock: self.clock.clone(),
            last_time: None,
            display: Arc::new(DisplayBuffer::new(cfg.display_length)),
            output,
            status: status.clone(),
        };
        let display = grouping.display.clone();

        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let (q, events) = queue::bounded(cfg.queue_capacity, status.clone());
        // exits on its own at the next event once grouping is gone
        let _producer = queue::pump(subscription, q, stop.clone());
        let join = {
            let stop = stop.clone();
            let done = done.clone();
            let threshold = cfg.no_signal_threshold;
            thread::spawn(move || {
                let n = grouping.run(events, &stop, threshold);
                done.store(true, Ordering::Release);
                n
            })
        };
        let started = self.clock.now();
        let reference = self.config.reference_name();
        info!("session started, reference on {}", reference);
        status.note(format!("Measurement started, reference input {}", reference));

        Ok(Session {
            _engine: self,
            status,
            display,
            stop,
            done,
            started,
            grouping: Some(join),
            diagnostics: diag_join,
            save: Some(save),
        })
    }
}

enum Output {
    Storage(Sender<Record>),
    Diagnostics(Sender<Arc<Group>>),
}

impl Output {
    fn send(&self, group: Arc<Group>) -> bool {
        match self {
            Output::Storage(s) => s.send(Record { group, sensors: None }).is_ok(),
            Output::Diagnostics(s) => s.send(group).is_ok(),
        }
    }
}

/// State owned by the grouping thread
struct Grouping {
    roles: HashMap<ChannelId, Role>,
    sync: Synchronizer,
    clock: Arc<dyn HostClock>,
    /// Latest device timestamp seen
    last_time: Option<i64>,
    grouper: Grouper,
    display: Arc<DisplayBuffer>,
    output: Output,
    status: Arc<Status>,
}

impl Grouping {
    /// Process events until the source ends or `stop` is raised, then drain
    /// what is queued and close the open period. Returns the event count.
    fn run(mut self, events: Events, stop: &AtomicBool, no_signal: Duration) -> u64 {
        let span = span!(Level::INFO, "grouping");
        let _enter = span.enter();
        let mut n = 0u64;
        let mut last_event = Instant::now();
        let mut silent = false;
        while !stop.load(Ordering::Relaxed) {
            match events.recv_timeout(POLL) {
                Ok(ev) => {
                    n += 1;
                    last_event = Instant::now();
                    if silent {
                        silent = false;
                        info!("signals resumed");
                        self.status.set_no_signal(false);
                        self.status.note("Incoming signals resumed");
                    }
                    self.dispatch(ev);
                    if events.is_empty() {
                        self.anchor();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !silent && last_event.elapsed() >= no_signal {
                        silent = true;
                        let d = humantime::format_duration(no_signal);
                        warn!("no incoming signals for more than {}", d);
                        self.status.set_no_signal(true);
                        self.status
                            .note(format!("No incoming signals for more than {}", d));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("source ended");
                    break;
                }
            }
        }
        for ev in events.try_iter() {
            n += 1;
            self.dispatch(ev);
        }
        drop(events);
        self.anchor();
        if let Some(g) = self.grouper.finish() {
            self.publish(g);
        }
        debug!("grouping finished after {} events", n);
        n
    }

    /// Pair the latest device time with the host time once the queue is
    /// drained, the way a device hands over one batch at a time
    fn anchor(&mut self) {
        if let Some(t) = self.last_time {
            self.grouper.anchor(t, self.clock.now());
        }
    }

    fn dispatch(&mut self, ev: Event) {
        let channel = ev.channel();
        let role = self.roles.get(&channel).copied().unwrap_or_default();
        if let EventKind::Tag(t) = ev.kind {
            self.last_time = Some(self.last_time.map_or(t.time, |l| l.max(t.time)));
        }
        match (ev.kind, role) {
            (EventKind::Tag(t), Role::Reference) => {
                if let Ok(b) = self.sync.on_reference(t.time) {
                    if let Ok(Some(g)) = self.grouper.on_boundary(b) {
                        self.publish(g);
                    }
                }
            }
            (EventKind::Tag(t), Role::Signal) => {
                let _ = self.grouper.on_signal(channel, t.time);
            }
            (EventKind::Tag(t), Role::ExternalClock) => self.sync.on_clock_tick(t.time),
            (EventKind::Overflow { missed, .. }, Role::Reference) => {
                // the lost pulse ended the open period
                self.sync.on_reference_overflow(missed);
                if let Some(g) = self.grouper.on_reference_lost() {
                    self.publish(g);
                }
            }
            (EventKind::Overflow { missed, .. }, Role::ExternalClock) => {
                self.sync.on_clock_overflow(missed)
            }
            (EventKind::Overflow { missed, .. }, Role::Signal) => {
                self.status.missed_signal(channel, missed)
            }
            (_, Role::Unassigned) => {}
        }
    }

    fn publish(&self, g: Arc<Group>) {
        self.display.push(g.clone());
        if !self.output.send(g) {
            error!("output thread gone, group not stored");
        }
    }
}

/// Outcome of a finished session
#[derive(Serialize, Clone, Debug)]
pub struct Summary {
    pub started: DateTime<Utc>,
    pub stopped: DateTime<Utc>,
    pub events: u64,
    pub files: Vec<PathBuf>,
    pub status: StatusReport,
}

/// A running measurement
pub struct Session<'a> {
    _engine: &'a mut Engine,
    status: Arc<Status>,
    display: Arc<DisplayBuffer>,
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    started: DateTime<Utc>,
    grouping: Option<JoinHandle<u64>>,
    diagnostics: Option<JoinHandle<()>>,
    save: Option<SaveHandle>,
}

impl<'a> Session<'a> {
    pub fn display(&self) -> Arc<DisplayBuffer> {
        self.display.clone()
    }

    pub fn status(&self) -> Arc<Status> {
        self.status.clone()
    }

    /// True once the source has ended and every group was handed on
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Run until the source ends
    pub fn wait(mut self) -> Result<Summary> {
        self.shutdown()
    }

    /// Stop the measurement: close the open period, write out every
    /// pending record and close the files.
    pub fn stop(mut self) -> Result<Summary> {
        self.stop.store(true, Ordering::Relaxed);
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<Summary> {
        let events = match self.grouping.take() {
            Some(j) => j.join().map_err(|_| anyhow!("grouping thread panicked"))?,
            None => 0,
        };
        if let Some(j) = self.diagnostics.take() {
            j.join().map_err(|_| anyhow!("diagnostics thread panicked"))?;
        }
        let files = match self.save.take() {
            Some(s) => s.finish()?,
            None => Vec::new(),
        };
        info!("session stopped after {} events", events);
        self.status.note("Measurement stopped");
        Ok(Summary {
            started: self.started,
            stopped: Utc::now(),
            events,
            files,
            status: self.status.report(),
        })
    }
}

impl<'a> Drop for Session<'a> {
    fn drop(&mut self) {
        if self.grouping.is_some() {
            self.stop.store(true, Ordering::Relaxed);
            if let Err(e) = self.shutdown() {
                error!("{:#}", e);
            }
        }
    }
}
