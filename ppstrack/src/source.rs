//! Event source adapter: the seam between the time tagger and the engine

use anyhow::{bail, Result};
use ppstools::cfg::Config;
use ppstools::{ChannelId, Event, Role, SensorSnapshot};
use std::sync::Arc;

/// Lazy, unbounded, non-restartable stream of device events
pub type Subscription = Box<dyn Iterator<Item = Event> + Send>;

/// What the device needs to know before it starts tagging
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSettings {
    pub roles: Vec<(ChannelId, Role)>,
    pub clock_frequency: f64,
    pub clock_divider: u32,
}

impl From<&Config> for SourceSettings {
    fn from(cfg: &Config) -> Self {
        SourceSettings {
            roles: cfg.channels.iter().map(|c| (c.channel, c.role)).collect(),
            clock_frequency: cfg.clock_frequency,
            clock_divider: cfg.clock_divider,
        }
    }
}

impl SourceSettings {
    pub fn role_of(&self, channel: ChannelId) -> Role {
        self.roles
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, r)| *r)
            .unwrap_or_default()
    }
}

/// Reads the auxiliary sensors of a device
pub trait SensorProbe: Send + Sync {
    /// Sensors the device has, known before the first reading
    fn names(&self) -> Vec<String>;

    fn snapshot(&self) -> Result<SensorSnapshot>;
}

pub trait EventSource: Send {
    fn configure(&mut self, settings: &SourceSettings) -> Result<()>;

    /// Start delivering events. A source can be subscribed to only once.
    fn subscribe(&mut self) -> Result<Subscription>;

    fn sensor_probe(&self) -> Option<Arc<dyn SensorProbe>> {
        None
    }
}

/// Replays a fixed list of events
pub struct ScriptedSource {
    events: Option<Vec<Event>>,
    probe: Option<Arc<dyn SensorProbe>>,
    settings: Option<SourceSettings>,
}

impl ScriptedSource {
    pub fn new(events: Vec<Event>) -> Self {
        ScriptedSource { events: Some(events), probe: None, settings: None }
    }

    /// Tags given as `(channel, time)`, numbered in order
    pub fn from_tags(tags: &[(ChannelId, i64)]) -> Self {
        let events = tags
            .iter()
            .enumerate()
            .map(|(i, &(ch, t))| Event::tag(i as u64, ch, t))
            .collect();
        Self::new(events)
    }

    pub fn with_probe(mut self, probe: Arc<dyn SensorProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn settings(&self) -> Option<&SourceSettings> {
        self.settings.as_ref()
    }
}

impl EventSource for ScriptedSource {
    fn configure(&mut self, settings: &SourceSettings) -> Result<()> {
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn subscribe(&mut self) -> Result<Subscription> {
        match self.events.take() {
            Some(ev) => Ok(Box::new(ev.into_iter())),
            None => bail!("event stream already consumed"),
        }
    }

    fn sensor_probe(&self) -> Option<Arc<dyn SensorProbe>> {
        self.probe.clone()
    }
}
