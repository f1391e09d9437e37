//! Simulated time tagger
//!
//! Emits one reference tag per period, one tag per signal channel at a fixed
//! delay plus jitter, and the ticks of an external clock when one is
//! configured and slow enough to simulate. Dropped reference pulses are
//! reported as device overflows, like a tagger whose buffer ran full.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use ppstools::{de, ChannelId, Event, Role, SensorSnapshot, PS_PER_SECOND};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[allow(unused_imports)]
use tracing::{debug, info, warn};

use crate::source::{EventSource, SensorProbe, SourceSettings, Subscription};

/// Clock ticks per period above which the clock channel is not simulated
pub const MAX_TICKS_PER_PERIOD: f64 = 10_000.0;

#[derive(Clone, Debug)]
pub struct SimConfig {
    pub seed: u64,
    /// Reference period in picoseconds
    pub period: i64,
    /// Device time of the first reference pulse
    pub origin: i64,
    /// Delay of the first signal channel; each further channel adds as much
    pub delay: i64,
    /// Spread of the signal jitter in picoseconds
    pub jitter: i64,
    /// Probability that a reference pulse is lost
    pub dropout: f64,
    /// Relative rate error of the simulated external clock, in ppm
    pub clock_error_ppm: f64,
    /// Pacing relative to real time; 0 runs as fast as possible
    pub speed: f64,
    /// Stop after this many periods
    pub periods: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            seed: 0,
            period: PS_PER_SECOND,
            origin: 1_000_000,
            delay: 100_000_000,
            jitter: 2_000,
            dropout: 0.0,
            clock_error_ppm: 0.0,
            speed: 1.0,
            periods: None,
        }
    }
}

pub struct SimSource {
    cfg: SimConfig,
    settings: Option<SourceSettings>,
    subscribed: bool,
    probe: Arc<SimProbe>,
}

impl SimSource {
    pub fn new(cfg: SimConfig) -> Self {
        let probe = Arc::new(SimProbe::new(cfg.seed));
        SimSource { cfg, settings: None, subscribed: false, probe }
    }
}

impl EventSource for SimSource {
    fn configure(&mut self, settings: &SourceSettings) -> Result<()> {
        if self.subscribed {
            bail!("cannot reconfigure a running simulation");
        }
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn subscribe(&mut self) -> Result<Subscription> {
        if self.subscribed {
            bail!("simulated stream already consumed");
        }
        let settings = match &self.settings {
            Some(s) => s,
            None => bail!("simulation not configured"),
        };
        self.subscribed = true;
        Ok(Box::new(SimStream::new(self.cfg.clone(), settings)))
    }

    fn sensor_probe(&self) -> Option<Arc<dyn SensorProbe>> {
        Some(self.probe.clone() as Arc<dyn SensorProbe>)
    }
}

struct SimStream {
    cfg: SimConfig,
    reference: Option<ChannelId>,
    signals: Vec<ChannelId>,
    clock: Option<(ChannelId, f64)>,
    rng: StdRng,
    period: u64,
    next_tick: u64,
    seq: u64,
    pending: VecDeque<Event>,
    started: Option<Instant>,
}

impl SimStream {
    fn new(cfg: SimConfig, settings: &SourceSettings) -> Self {
        let with_role = move |role: Role| {
            settings
                .roles
                .iter()
                .filter(move |(_, r)| *r == role)
                .map(|(c, _)| *c)
        };
        let reference = with_role(Role::Reference).next();
        let signals = with_role(Role::Signal).collect();
        let tick = settings.clock_divider as f64 * PS_PER_SECOND as f64
            / settings.clock_frequency
            * (1.0 + cfg.clock_error_ppm * 1e-6);
        let clock = match with_role(Role::ExternalClock).next() {
            Some(c) if tick > 0.0 && cfg.period as f64 / tick <= MAX_TICKS_PER_PERIOD => {
                Some((c, tick))
            }
            Some(c) => {
                warn!("clock channel {} too fast to simulate, leaving it silent", c);
                None
            }
            None => None,
        };
        let rng = StdRng::seed_from_u64(cfg.seed);
        SimStream {
            cfg,
            reference,
            signals,
            clock,
            rng,
            period: 0,
            next_tick: 0,
            seq: 0,
            pending: VecDeque::new(),
            started: None,
        }
    }

    /// Roughly normal jitter: sum of three uniform draws
    fn jitter(&mut self) -> i64 {
        let j = self.cfg.jitter.max(1);
        (0..3).map(|_| self.rng.gen_range(-j..=j)).sum::<i64>() / 3
    }

    fn fill(&mut self) {
        let start = self.cfg.origin + self.period as i64 * self.cfg.period;
        let end = start + self.cfg.period;
        let mut tags: Vec<(i64, ChannelId)> = Vec::new();
        let mut lost = false;
        if let Some(r) = self.reference {
            if self.period > 0 && self.rng.gen_bool(self.cfg.dropout.clamp(0.0, 1.0)) {
                lost = true;
            } else {
                tags.push((start, r));
            }
        }
        for i in 0..self.signals.len() {
            let delay = self.cfg.delay * (i as i64 + 1);
            let t = start + delay + self.jitter();
            tags.push((t.max(start), self.signals[i]));
        }
        if let Some((c, tick)) = self.clock {
            loop {
                let t = self.cfg.origin + (self.next_tick as f64 * tick) as i64;
                if t >= end {
                    break;
                }
                tags.push((t, c));
                self.next_tick += 1;
            }
        }
        tags.sort_unstable();
        if lost {
            // the device reports the loss where the pulse would have been
            if let Some(r) = self.reference {
                self.pending.push_back(Event::overflow(self.seq, r, 1));
                self.seq += 1;
            }
        }
        for (t, c) in tags {
            self.pending.push_back(Event::tag(self.seq, c, t));
            self.seq += 1;
        }
        self.period += 1;
    }

    fn pace(&mut self) {
        if self.cfg.speed <= 0.0 {
            return;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let secs = self.period as f64 * self.cfg.period as f64
            / PS_PER_SECOND as f64
            / self.cfg.speed;
        let due = started + Duration::from_secs_f64(secs);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }
}

impl Iterator for SimStream {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        while self.pending.is_empty() {
            if let Some(n) = self.cfg.periods {
                if self.period >= n {
                    return None;
                }
            }
            self.pace();
            self.fill();
        }
        self.pending.pop_front()
    }
}

const SENSORS: [&str; 3] = ["Temperature", "Supply voltage", "Laser current"];

/// Simulated housekeeping sensors, produced as the device's tab-separated
/// text dump
pub struct SimProbe {
    rng: Mutex<StdRng>,
}

impl SimProbe {
    pub fn new(seed: u64) -> Self {
        SimProbe { rng: Mutex::new(StdRng::seed_from_u64(seed ^ 0x5eed)) }
    }

    fn dump(&self) -> String {
        let mut rng = self.rng.lock();
        format!(
            "{}\t{:.2}\n{}\t{:.3}\n{}\t{:.1}\n",
            SENSORS[0],
            40.0 + rng.gen_range(-0.5..0.5),
            SENSORS[1],
            5.0 + rng.gen_range(-0.01..0.01),
            SENSORS[2],
            120.0 + rng.gen_range(-1.0..1.0),
        )
    }
}

impl SensorProbe for SimProbe {
    fn names(&self) -> Vec<String> {
        SENSORS.iter().map(|s| s.to_string()).collect()
    }

    fn snapshot(&self) -> Result<SensorSnapshot> {
        de::sensor_tsv(self.dump().as_bytes())
    }
}
