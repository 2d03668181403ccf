//! Process-wide registry of screen pipelines and tracked devices.
//!
//! Every operation touches a single key under one lock; there are no
//! cross-key invariants, so writers never hold both maps at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use screencast_types::{
    DeviceSnapshot, DeviceStatus, PipelineSnapshot, PlayerStatus, SessionPhase, StatusResponse,
};

/// Most recent incarnation of one screen's pipeline. Overwritten on restart.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub url: Option<String>,
    pub started_at: Option<SystemTime>,
    pub exited_at: Option<SystemTime>,
    pub last_heartbeat_at: Option<SystemTime>,
    pub last_heartbeat_output: Option<String>,
    pub last_error: Option<String>,
    pub restarts: u64,
}

/// A playback device as first seen by discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub host: String,
    pub friendly_name: Option<String>,
    pub last_seen: SystemTime,
}

impl DeviceRecord {
    pub fn new(host: impl Into<String>, friendly_name: Option<String>) -> Self {
        Self {
            host: host.into(),
            friendly_name,
            last_seen: SystemTime::now(),
        }
    }

    /// `[host, name]` label used in logs.
    pub fn label(&self) -> String {
        format!(
            "{}, {}",
            self.host,
            self.friendly_name.as_deref().unwrap_or("<unnamed>")
        )
    }
}

/// Observable session state of one device. Handles stay inside the session task.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub buffering_strikes: u32,
    /// Set once when the device link fails; never cleared.
    pub fatal_error: Option<String>,
    pub stream_url: Option<String>,
    pub status_updated_at: Option<SystemTime>,
    pub device_status: Option<DeviceStatus>,
    pub player_status: Option<PlayerStatus>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Connecting,
            buffering_strikes: 0,
            fatal_error: None,
            stream_url: None,
            status_updated_at: None,
            device_status: None,
            player_status: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub record: DeviceRecord,
    pub session: SessionState,
}

#[derive(Clone, Default)]
pub struct Registry {
    screens: Arc<Mutex<HashMap<String, PipelineState>>>,
    devices: Arc<Mutex<HashMap<String, DeviceEntry>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty entry for a configured screen.
    pub fn ensure_screen(&self, name: &str) {
        lock(&self.screens).entry(name.to_string()).or_default();
    }

    /// Record a freshly started incarnation and publish its URL.
    pub fn pipeline_started(&self, name: &str, url: &str) {
        let mut screens = lock(&self.screens);
        let entry = screens.entry(name.to_string()).or_default();
        entry.started_at = Some(SystemTime::now());
        entry.url = Some(url.to_string());
    }

    /// Record encoder diagnostic output.
    pub fn heartbeat(&self, name: &str, output: &str) {
        let mut screens = lock(&self.screens);
        let entry = screens.entry(name.to_string()).or_default();
        entry.last_heartbeat_at = Some(SystemTime::now());
        entry.last_heartbeat_output = Some(output.to_string());
    }

    /// Record the failure of a live incarnation before it is replaced.
    pub fn pipeline_exited(&self, name: &str, reason: &str) {
        let mut screens = lock(&self.screens);
        let entry = screens.entry(name.to_string()).or_default();
        entry.exited_at = Some(SystemTime::now());
        entry.last_error = Some(reason.to_string());
        entry.restarts = entry.restarts.saturating_add(1);
    }

    /// Record a failure to construct a pipeline.
    pub fn pipeline_failed(&self, name: &str, error: &str) {
        lock(&self.screens)
            .entry(name.to_string())
            .or_default()
            .last_error = Some(error.to_string());
    }

    pub fn screen(&self, name: &str) -> Option<PipelineState> {
        lock(&self.screens).get(name).cloned()
    }

    pub fn last_heartbeat_output(&self, name: &str) -> Option<String> {
        lock(&self.screens)
            .get(name)
            .and_then(|state| state.last_heartbeat_output.clone())
    }

    /// Published stream URL for a screen.
    pub fn stream_url(&self, name: &str) -> Option<String> {
        lock(&self.screens).get(name).and_then(|s| s.url.clone())
    }

    /// First screen (by name) with a published URL.
    pub fn first_stream_url(&self) -> Option<String> {
        let screens = lock(&self.screens);
        let mut names: Vec<&String> = screens
            .iter()
            .filter(|(_, state)| state.url.is_some())
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
            .first()
            .and_then(|name| screens.get(*name))
            .and_then(|state| state.url.clone())
    }

    /// Start tracking a device. Returns `false` if the host is already tracked.
    pub fn try_track(&self, record: DeviceRecord) -> bool {
        let mut devices = lock(&self.devices);
        if devices.contains_key(&record.host) {
            return false;
        }
        devices.insert(
            record.host.clone(),
            DeviceEntry {
                record,
                session: SessionState::default(),
            },
        );
        true
    }

    /// Stop tracking a device. Returns `true` if it was tracked.
    pub fn untrack(&self, host: &str) -> bool {
        lock(&self.devices).remove(host).is_some()
    }

    pub fn is_tracked(&self, host: &str) -> bool {
        lock(&self.devices).contains_key(host)
    }

    pub fn device(&self, host: &str) -> Option<DeviceEntry> {
        lock(&self.devices).get(host).cloned()
    }

    /// Apply `update` to a tracked device's session state; untracked hosts are ignored.
    pub fn update_session<F>(&self, host: &str, update: F) -> bool
    where
        F: FnOnce(&mut SessionState),
    {
        match lock(&self.devices).get_mut(host) {
            Some(entry) => {
                update(&mut entry.session);
                true
            }
            None => false,
        }
    }

    pub fn screen_snapshots(&self) -> Vec<PipelineSnapshot> {
        let screens = lock(&self.screens);
        let mut out: Vec<PipelineSnapshot> = screens
            .iter()
            .map(|(name, state)| PipelineSnapshot {
                name: name.clone(),
                url: state.url.clone(),
                started_at_ms: state.started_at.map(unix_ms),
                exited_at_ms: state.exited_at.map(unix_ms),
                last_heartbeat_at_ms: state.last_heartbeat_at.map(unix_ms),
                last_heartbeat_output: state.last_heartbeat_output.clone(),
                last_error: state.last_error.clone(),
                restarts: state.restarts,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn device_snapshots(&self) -> Vec<DeviceSnapshot> {
        let devices = lock(&self.devices);
        let mut out: Vec<DeviceSnapshot> = devices
            .values()
            .map(|entry| DeviceSnapshot {
                host: entry.record.host.clone(),
                friendly_name: entry.record.friendly_name.clone(),
                last_seen_ms: unix_ms(entry.record.last_seen),
                phase: entry.session.phase,
                buffering_strikes: entry.session.buffering_strikes,
                fatal_error: entry.session.fatal_error.clone(),
                stream_url: entry.session.stream_url.clone(),
                status_updated_at_ms: entry.session.status_updated_at.map(unix_ms),
                device_status: entry.session.device_status.clone(),
                player_status: entry.session.player_status.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.host.cmp(&b.host));
        out
    }

    pub fn snapshot(&self) -> StatusResponse {
        StatusResponse {
            screens: self.screen_snapshots(),
            devices: self.device_snapshots(),
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_ms(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
