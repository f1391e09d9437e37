//! Diagnostic sink: attaches device sensor readings to finalized groups on
//! their way to storage.

use flume::{Receiver, Sender};
use ppstools::{Group, Record, SensorSnapshot};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[allow(unused_imports)]
use tracing::{debug, error, info, span, warn, Level};

use crate::source::SensorProbe;
use crate::status::Status;

/// Spawn the sink thread. It ends when `receiver` is disconnected and
/// drained, or when the storage side hangs up.
///
/// Readings are reduced to the probe's sensor names, in order. When a
/// reading fails the group is forwarded with empty values.
pub fn main(
    receiver: Receiver<Arc<Group>>,
    sender: Sender<Record>,
    probe: Option<Arc<dyn SensorProbe>>,
    status: Arc<Status>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let span = span!(Level::INFO, "diagnostics");
        let _enter = span.enter();
        if probe.is_none() {
            warn!("diagnostics enabled but the source has no sensors");
            status.note("Diagnostics enabled but the source has no sensors");
        }
        let names = probe.as_ref().map(|p| p.names()).unwrap_or_default();
        let mut failing = false;
        while let Ok(group) = receiver.recv() {
            let sensors = match probe.as_ref().map(|p| p.snapshot()) {
                Some(Ok(s)) => {
                    if failing {
                        info!("sensor readings recovered");
                        failing = false;
                    }
                    Some(s.select(&names))
                }
                Some(Err(e)) => {
                    if !failing {
                        error!("sensor readout failed: {:#}", e);
                        status.note(format!("Sensor readout failed: {}", e));
                        failing = true;
                    }
                    Some(blank(&names))
                }
                None => None,
            };
            if sender.send(Record { group, sensors }).is_err() {
                break;
            }
        }
        debug!("diagnostics finished");
    })
}

fn blank(names: &[String]) -> SensorSnapshot {
    SensorSnapshot {
        fields: names.iter().map(|n| (n.clone(), String::new())).collect(),
    }
}
