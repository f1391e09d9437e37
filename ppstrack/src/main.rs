use anyhow::{bail, Context, Result};
use chrono::Local;
use ppstools::cfg::Config;
use ppstrack::controller::Engine;
use ppstrack::sim::{SimConfig, SimSource};
use ppstrack::CliArgs;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

fn main() -> Result<()> {
    // Parse command line arguments
    let args: CliArgs = argh::from_env();

    if args.version {
        println!(concat!(env!("CARGO_BIN_NAME"), " ", "{}"), GIT_VERSION);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load the run file
    let cfg_path = match args.config {
        Some(c) => PathBuf::from(c),
        None => bail!("no run file provided, use --config"),
    };
    let f = File::open(&cfg_path)
        .with_context(|| format!("opening run file {}", cfg_path.display()))?;
    let config: Config = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("parsing run file {}", cfg_path.display()))?;

    let sim = SimSource::new(SimConfig {
        seed: args.seed,
        dropout: args.dropout,
        speed: args.speed,
        ..SimConfig::default()
    });
    let mut engine = Engine::new(config, Box::new(sim))?;
    let session = engine.start()?;
    let status = session.status();
    let display = session.display();

    let tick_rate = Duration::from_millis(args.status_rate.max(1));
    let first_tick = Instant::now();
    let mut last_tick = first_tick;
    let mut next_message = 0;
    loop {
        for m in status.messages_since(next_message) {
            info!("[{}] {}", m.time.format("%H:%M:%S"), m.text);
            next_message = m.index + 1;
        }
        let snap = display.snapshot();
        if let Some(g) = snap.latest() {
            let r = status.report();
            info!(
                "period {} ({} shown), {} gaps, {} late, {} overruns",
                g.index(),
                snap.len(),
                r.sequence_gaps,
                r.late_events,
                r.overruns,
            );
            if r.storage_degraded {
                warn!("storage degraded");
            }
        }

        if session.is_finished() {
            break;
        }
        if let Some(d) = args.duration {
            if first_tick.elapsed() > d {
                break;
            }
        }

        // Sleep for the rest of tick rate
        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        std::thread::sleep(timeout);
        last_tick = Instant::now();
    }

    let summary = session.stop()?;
    info!(
        "{} events, {} groups, {} file(s)",
        summary.events,
        summary.status.groups,
        summary.files.len()
    );

    // Now record the run summary next to the run file
    let json_record = serde_json::to_string_pretty(&summary)?;
    let ts = Local::now();
    let stem = cfg_path
        .file_stem()
        .unwrap_or_else(|| std::ffi::OsStr::new("run"))
        .to_string_lossy()
        .to_string();
    let rcd_path = cfg_path.with_file_name(format!("{}_{}.json", stem, ts.format("%F_%H-%M-%S")));
    let rcd_path2 =
        cfg_path.with_file_name(format!("{}_{}.json", stem, ts.format("%F_%H-%M-%S%.3f")));
    let f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&rcd_path)
        .or_else(|_| {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&rcd_path2)
        })
        .context("saving more than one run record per millisecond")?;
    let mut wtr = BufWriter::new(f);
    wtr.write_all(json_record.as_bytes())?;
    wtr.flush()?;

    Ok(())
}
