use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use printwatch_core::{ChangeEvent, Monitor};
use tokio::sync::mpsc;
use tracing::{info, warn};

const JOURNAL_PREFIX: &str = "printwatch-";
const JOURNAL_SUFFIX: &str = ".jsonl";
const PRUNE_EVERY: Duration = Duration::from_secs(1800);

pub async fn run_exporter(
    monitor: &Monitor,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    output_dir: &str,
    retention_days: u64,
) -> Result<()> {
    let out_dir = PathBuf::from(output_dir);
    fs::create_dir_all(&out_dir)?;

    let mut state = ExportState::new(out_dir, retention_days)?;
    state.maybe_prune()?;
    info!(dir = %output_dir, retention_days, "exporting change events");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                state.write_event(&event)?;
                state.maybe_prune()?;
            }
        }
    }

    monitor.stop_monitoring();
    Ok(())
}

pub(crate) struct ExportState {
    out_dir: PathBuf,
    retention_days: u64,
    current_day: String,
    writer: BufWriter<File>,
    last_prune: Option<Instant>,
}

impl ExportState {
    pub(crate) fn new(out_dir: PathBuf, retention_days: u64) -> Result<Self> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let writer = Self::open_writer(&out_dir, &day)?;

        Ok(Self {
            out_dir,
            retention_days,
            current_day: day,
            writer,
            last_prune: None,
        })
    }

    fn open_writer(out_dir: &Path, day: &str) -> Result<BufWriter<File>> {
        let path = out_dir.join(journal_file_name(day));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    fn rotate_if_needed(&mut self, ts: DateTime<Utc>) -> Result<()> {
        let day = ts.format("%Y-%m-%d").to_string();
        if day != self.current_day {
            self.writer.flush()?;
            self.writer = Self::open_writer(&self.out_dir, &day)?;
            self.current_day = day;
        }
        Ok(())
    }

    pub(crate) fn write_event(&mut self, event: &ChangeEvent) -> Result<()> {
        self.rotate_if_needed(event.timestamp())?;

        let mut exported = serde_json::to_value(event)?;
        if let Some(obj) = exported.as_object_mut() {
            obj.insert(
                "unix_ms".to_string(),
                serde_json::Value::from(event.timestamp().timestamp_millis()),
            );
        }

        serde_json::to_writer(&mut self.writer, &exported)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let latest_path = self.out_dir.join("latest.json");
        fs::write(latest_path, serde_json::to_vec_pretty(&exported)?)?;

        Ok(())
    }

    fn maybe_prune(&mut self) -> Result<()> {
        if self.last_prune.is_some_and(|at| at.elapsed() < PRUNE_EVERY) {
            return Ok(());
        }
        self.last_prune = Some(Instant::now());

        prune_old_journals(&self.out_dir, self.retention_days, SystemTime::now())
    }
}

fn journal_file_name(day: &str) -> String {
    format!("{JOURNAL_PREFIX}{day}{JOURNAL_SUFFIX}")
}

pub(crate) fn prune_old_journals(out_dir: &Path, retention_days: u64, now: SystemTime) -> Result<()> {
    let today = DateTime::<Utc>::from(now).date_naive();
    let cutoff = today
        .checked_sub_days(Days::new(retention_days))
        .unwrap_or(today);

    for entry in fs::read_dir(out_dir)? {
        let path = entry?.path();

        let Some(file_name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        let Some(date_part) = file_name
            .strip_prefix(JOURNAL_PREFIX)
            .and_then(|v| v.strip_suffix(JOURNAL_SUFFIX))
        else {
            continue;
        };

        let Ok(file_date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "failed to prune journal");
            }
        }
    }

    Ok(())
}
