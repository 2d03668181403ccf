//! Per-device session: connect, launch, load, then poll forever.
//!
//! A session owns its device client and player exclusively. Its only exit is a
//! transport fault reported by the client's error observer; every other failure
//! is retried in place.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use screencast_types::{DeviceStatus, PlayerState, PlayerStatus, SessionPhase};

use crate::device::{CastError, DeviceClient, DeviceConnector, FaultSignal, MediaResource, ReceiverPlayer};
use crate::events::EventBus;
use crate::registry::{DeviceRecord, Registry};
use crate::timeout::{NETWORK_DEADLINE, STOP_DEADLINE, with_deadline};

/// Delay between the end of one poll cycle and the start of the next.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Consecutive buffering polls tolerated before playback is restarted.
const MAX_BUFFERING_STRIKES: u32 = 5;

/// What a poll should do about the player it just inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Playback {
    Resume,
    KeepBuffering,
    KeepPlaying,
}

/// Decide whether playback must be restarted.
pub(crate) fn assess_playback(status: Option<&PlayerStatus>, strikes: u32) -> Playback {
    let state = status.map(|s| s.player_state);
    match state {
        Some(PlayerState::Playing) => Playback::KeepPlaying,
        Some(PlayerState::Buffering) => {
            let negative_time = status
                .and_then(|s| s.current_time)
                .is_some_and(|t| t < 0.0);
            if negative_time || strikes > MAX_BUFFERING_STRIKES {
                Playback::Resume
            } else {
                Playback::KeepBuffering
            }
        }
        _ => Playback::Resume,
    }
}

/// Whether the receiver is free for (or already running) our app.
fn wants_playback(status: &DeviceStatus, app_id: &str) -> bool {
    status.applications.is_empty()
        || status
            .applications
            .iter()
            .any(|app| app.is_idle_screen || app.app_id == app_id)
}

/// Session bootstrap failed before polling began.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub(crate) struct SessionError {
    pub stage: &'static str,
    pub source: CastError,
}

/// Terminal transport fault; the session has stopped polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionFault {
    pub error: String,
}

/// Connection and player carried from one poll to the next.
pub(crate) struct Link {
    client: Box<dyn DeviceClient>,
    player: Option<Box<dyn ReceiverPlayer>>,
    fault: FaultSignal,
}

impl Link {
    fn new(client: Box<dyn DeviceClient>) -> Self {
        let fault = client.fault();
        Self {
            client,
            player: None,
            fault,
        }
    }
}

pub(crate) struct DeviceSession {
    record: DeviceRecord,
    media: MediaResource,
    app_id: String,
    connector: Arc<dyn DeviceConnector>,
    registry: Registry,
    events: EventBus,
    poll_interval: Duration,
}

impl DeviceSession {
    pub(crate) fn new(
        record: DeviceRecord,
        media: MediaResource,
        app_id: String,
        connector: Arc<dyn DeviceConnector>,
        registry: Registry,
        events: EventBus,
    ) -> Self {
        Self {
            record,
            media,
            app_id,
            connector,
            registry,
            events,
            poll_interval: POLL_INTERVAL,
        }
    }

    fn host(&self) -> &str {
        &self.record.host
    }

    fn set_phase(&self, phase: SessionPhase) {
        if self.registry.update_session(self.host(), |s| s.phase = phase) {
            self.events.devices_changed();
        }
    }

    fn record_device_status(&self, status: &DeviceStatus) {
        self.registry.update_session(self.host(), |s| {
            s.device_status = Some(status.clone());
            s.status_updated_at = Some(SystemTime::now());
        });
        self.events.device_status(self.host(), status.clone());
    }

    fn record_player_status(&self, status: &Option<PlayerStatus>) {
        self.registry.update_session(self.host(), |s| {
            s.player_status = status.clone();
            s.status_updated_at = Some(SystemTime::now());
        });
        self.events.player_status(self.host(), status.clone());
    }

    fn record_strikes(&self, strikes: u32) {
        self.registry
            .update_session(self.host(), |s| s.buffering_strikes = strikes);
    }

    async fn connect(&self) -> Result<Box<dyn DeviceClient>, CastError> {
        let client = with_deadline(
            "took too long to connect",
            NETWORK_DEADLINE,
            self.connector.connect(self.host()),
        )
        .await?;
        self.registry
            .update_session(self.host(), |s| s.fatal_error = None);
        Ok(client)
    }

    /// Bring the device to a playing state. The client is closed on failure.
    pub(crate) async fn start(&self) -> Result<Link, SessionError> {
        let label = self.record.label();
        self.registry
            .update_session(self.host(), |s| s.stream_url = Some(self.media.url.clone()));
        self.set_phase(SessionPhase::Connecting);
        let client = self.connect().await.map_err(|source| SessionError {
            stage: "connect",
            source,
        })?;
        tracing::info!(device = %label, "session: connected, launching app");

        self.set_phase(SessionPhase::Launching);
        let player = match with_deadline(
            "took too long to start app",
            NETWORK_DEADLINE,
            client.launch_app(&self.app_id),
        )
        .await
        {
            Ok(player) => player,
            Err(source) => {
                client.close();
                return Err(SessionError {
                    stage: "launch",
                    source,
                });
            }
        };
        tracing::info!(
            device = %label,
            app = ?player.display_name(),
            url = %self.media.url,
            "session: app launched, loading media"
        );

        self.set_phase(SessionPhase::Loading);
        match with_deadline(
            "took too long to load media",
            NETWORK_DEADLINE,
            player.load(&self.media),
        )
        .await
        {
            Ok(status) => {
                tracing::info!(
                    device = %label,
                    state = ?status.as_ref().map(|s| s.player_state),
                    "session: media loaded"
                );
                self.record_player_status(&status);
            }
            Err(source) => {
                client.close();
                return Err(SessionError {
                    stage: "load",
                    source,
                });
            }
        }

        self.set_phase(SessionPhase::Polling);
        let mut link = Link::new(client);
        link.player = Some(player);
        Ok(link)
    }

    /// Poll until the connection reports a transport fault.
    pub(crate) async fn run(&self, link: Link) -> SessionFault {
        let label = self.record.label();
        let mut link = Some(link);
        let mut strikes = 0u32;

        loop {
            if let Some(error) = link.as_ref().and_then(|l| l.fault.current()) {
                return self.fail(link, error);
            }

            let had_client = link.is_some();
            if let Err(err) = self.poll_cycle(&mut link, &mut strikes).await {
                if let Some(error) = link.as_ref().and_then(|l| l.fault.current()) {
                    return self.fail(link, error);
                }
                if had_client {
                    tracing::warn!(
                        device = %label,
                        error = %err,
                        "session: check status failed, retrying with new client"
                    );
                    if let Some(current) = link.take() {
                        current.client.close();
                    }
                    self.set_phase(SessionPhase::Connecting);
                    continue;
                }
                tracing::warn!(device = %label, error = %err, "session: check status failed");
            }

            let fault = match link.as_mut() {
                Some(current) => tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => None,
                    error = current.fault.fired() => Some(error),
                },
                None => {
                    tokio::time::sleep(self.poll_interval).await;
                    None
                }
            };
            if let Some(error) = fault {
                return self.fail(link, error);
            }
        }
    }

    async fn poll_cycle(&self, link: &mut Option<Link>, strikes: &mut u32) -> Result<(), CastError> {
        let label = self.record.label();
        if link.is_none() {
            let client = self.connect().await?;
            *link = Some(Link::new(client));
            self.set_phase(SessionPhase::Polling);
        }
        let Some(current) = link.as_mut() else {
            return Ok(());
        };

        tracing::debug!(device = %label, "session: checking status");
        let status = with_deadline(
            "took too long to check status",
            NETWORK_DEADLINE,
            current.client.get_status(),
        )
        .await?;
        self.record_device_status(&status);
        if !wants_playback(&status, &self.app_id) {
            tracing::debug!(device = %label, "session: another app is in the foreground");
            return Ok(());
        }

        if current.player.is_none() {
            let player = with_deadline(
                "took too long to start app",
                NETWORK_DEADLINE,
                current.client.launch_app(&self.app_id),
            )
            .await?;
            current.player = Some(player);
        }
        let Some(player) = current.player.as_ref() else {
            return Ok(());
        };

        let player_status = with_deadline(
            "took too long to get player status",
            NETWORK_DEADLINE,
            player.get_status(),
        )
        .await?;
        self.record_player_status(&player_status);

        match assess_playback(player_status.as_ref(), *strikes) {
            Playback::Resume => {
                *strikes = 0;
                self.record_strikes(0);
                tracing::info!(device = %label, "session: resume playing");
                if let Err(err) = with_deadline("stop playing", STOP_DEADLINE, player.stop()).await {
                    tracing::warn!(device = %label, error = %err, "session: stop failed, ignoring");
                }
                let loaded = with_deadline(
                    "took too long to load media",
                    NETWORK_DEADLINE,
                    player.load(&self.media),
                )
                .await?;
                tracing::info!(
                    device = %label,
                    state = ?loaded.as_ref().map(|s| s.player_state),
                    "session: playing resumed"
                );
                self.record_player_status(&loaded);
            }
            Playback::KeepBuffering => {
                *strikes = strikes.saturating_add(1);
                self.record_strikes(*strikes);
            }
            Playback::KeepPlaying => {
                *strikes = 0;
                self.record_strikes(0);
            }
        }
        Ok(())
    }

    fn fail(&self, link: Option<Link>, error: String) -> SessionFault {
        if let Some(current) = link {
            current.client.close();
        }
        tracing::warn!(
            device = %self.record.label(),
            error = %error,
            "session: device not registered? stopping status checks"
        );
        self.registry.update_session(self.host(), |s| {
            s.phase = SessionPhase::Error;
            s.fatal_error = Some(error.clone());
        });
        self.events.devices_changed();
        SessionFault { error }
    }
}
