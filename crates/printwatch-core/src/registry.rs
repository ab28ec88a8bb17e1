use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::snapshot::DeviceState;

pub const SIMULATE_ENV: &str = "PRINTWATCH_SIMULATE";
pub const SIMULATED_PRINTER: &str = "Simulated Printer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
    pub state: DeviceState,
    pub state_reasons: Vec<String>,
}

impl DeviceRecord {
    pub fn new(name: impl Into<String>, state: DeviceState) -> Self {
        Self {
            name: name.into(),
            state,
            state_reasons: Vec::new(),
        }
    }

    pub fn with_reasons<I, S>(mut self, reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state_reasons = reasons.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("device registry unavailable: {0}")]
    Unavailable(String),
    #[error("timeout")]
    Timeout,
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Source of device status. Each call is independent; implementations keep no
/// session state between queries.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn query_devices(&self) -> Result<Vec<DeviceRecord>, RegistryError>;
}

#[async_trait]
impl<R: DeviceRegistry + ?Sized> DeviceRegistry for Arc<R> {
    async fn query_devices(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        (**self).query_devices().await
    }
}

pub fn simulation_enabled() -> bool {
    match std::env::var(SIMULATE_ENV) {
        Ok(val) => val == "true" || val == "1",
        Err(_) => false,
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    devices: Vec<DeviceRecord>,
    fail_next: u32,
    delay: Option<Duration>,
    queries: u64,
}

/// In-memory registry whose answers are scripted by the caller. Clones share
/// the same device list.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRegistry {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedRegistry {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        let registry = Self::default();
        registry.set_devices(devices);
        registry
    }

    pub fn with_simulated_printer() -> Self {
        Self::new(vec![DeviceRecord::new(SIMULATED_PRINTER, DeviceState::Idle)])
    }

    pub fn set_devices(&self, devices: Vec<DeviceRecord>) {
        self.state.lock().devices = devices;
    }

    pub fn upsert(&self, record: DeviceRecord) {
        let mut state = self.state.lock();
        match state.devices.iter_mut().find(|d| d.name == record.name) {
            Some(existing) => *existing = record,
            None => state.devices.push(record),
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.devices.len();
        state.devices.retain(|d| d.name != name);
        state.devices.len() != before
    }

    /// Makes the next `count` queries fail with [`RegistryError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.state.lock().fail_next = count;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    pub fn query_count(&self) -> u64 {
        self.state.lock().queries
    }
}

#[async_trait]
impl DeviceRegistry for SimulatedRegistry {
    async fn query_devices(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        let delay = {
            let mut state = self.state.lock();
            state.queries += 1;
            state.delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(RegistryError::Unavailable("simulated failure".to_string()));
        }
        Ok(state.devices.clone())
    }
}

/// CUPS backend built on `lpstat -l -p`.
#[derive(Debug, Clone)]
pub struct LpstatRegistry {
    program: String,
}

impl Default for LpstatRegistry {
    fn default() -> Self {
        Self::new("lpstat")
    }
}

impl LpstatRegistry {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DeviceRegistry for LpstatRegistry {
    async fn query_devices(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        let output = Command::new(&self.program)
            .args(["-l", "-p"])
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| RegistryError::Io(format!("failed to run {}: {err}", self.program)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let devices = parse_lpstat(&stdout)?;

        // lpstat exits non-zero when no destinations exist; only treat that as
        // a failure when nothing could be read.
        if !output.status.success() && devices.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No destinations added") {
                return Ok(Vec::new());
            }
            return Err(RegistryError::Unavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        debug!(count = devices.len(), "lpstat query complete");
        Ok(devices)
    }
}

pub fn parse_lpstat(output: &str) -> Result<Vec<DeviceRecord>, RegistryError> {
    let mut devices: Vec<DeviceRecord> = Vec::new();

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("printer ") {
            let (name, status) = rest.split_once(' ').unwrap_or((rest, ""));
            if name.is_empty() {
                return Err(RegistryError::Parse(format!("missing printer name: {line}")));
            }
            devices.push(DeviceRecord::new(name, lpstat_state(status)));
            continue;
        }

        let trimmed = line.trim_start();
        if trimmed.len() == line.len() {
            continue;
        }

        let Some(alerts) = trimmed.strip_prefix("Alerts:") else {
            continue;
        };
        let Some(current) = devices.last_mut() else {
            return Err(RegistryError::Parse(format!("alerts before any printer: {line}")));
        };
        current.state_reasons = alerts
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|r| !r.is_empty() && *r != "none")
            .map(str::to_string)
            .collect();
    }

    Ok(devices)
}

fn lpstat_state(status: &str) -> DeviceState {
    if status.starts_with("is idle") {
        DeviceState::Idle
    } else if status.starts_with("now printing") {
        DeviceState::Printing
    } else if status.starts_with("disabled") {
        DeviceState::Paused
    } else if status.contains("offline") {
        DeviceState::Offline
    } else {
        DeviceState::Unknown
    }
}
