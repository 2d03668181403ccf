use serde::{Deserialize, Serialize};

/// Playback state reported by a receiver application's media channel.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    Buffering,
    /// Any state string the receiver reports that this crate does not model.
    #[serde(other)]
    Unknown,
}

impl PlayerState {
    /// Parse the state string used on the Cast media namespace.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "IDLE" => PlayerState::Idle,
            "PLAYING" => PlayerState::Playing,
            "PAUSED" => PlayerState::Paused,
            "BUFFERING" => PlayerState::Buffering,
            _ => PlayerState::Unknown,
        }
    }
}

/// Media status of the receiver application, as last reported by the device.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PlayerStatus {
    /// Media session id assigned by the receiver.
    pub media_session_id: Option<i64>,
    pub player_state: PlayerState,
    /// Playback position in seconds. Some receivers report negative values while stalled.
    pub current_time: Option<f64>,
    /// Reason for an `IDLE` state (`FINISHED`, `ERROR`, ...).
    pub idle_reason: Option<String>,
    /// Content id (URL) of the loaded media.
    pub content_id: Option<String>,
}

/// One application entry of a receiver status.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReceiverApp {
    pub app_id: String,
    pub display_name: Option<String>,
    /// `true` for the device's backdrop/idle screen.
    pub is_idle_screen: bool,
    pub session_id: Option<String>,
    pub transport_id: Option<String>,
}

/// Receiver (device-level) status.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DeviceStatus {
    /// Applications currently running in the foreground.
    pub applications: Vec<ReceiverApp>,
    pub volume_level: Option<f64>,
    pub muted: Option<bool>,
}

/// Lifecycle phase of a device session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Connecting,
    Launching,
    Loading,
    Polling,
    /// Terminal: the device link reported a transport error.
    Error,
}

/// Observable state of one screen's capture+encode pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PipelineSnapshot {
    /// Screen name.
    pub name: String,
    /// Playable stream URL, once published.
    pub url: Option<String>,
    pub started_at_ms: Option<i64>,
    pub exited_at_ms: Option<i64>,
    /// Last encoder diagnostic output time.
    pub last_heartbeat_at_ms: Option<i64>,
    pub last_heartbeat_output: Option<String>,
    pub last_error: Option<String>,
    /// Number of times the pipeline was rebuilt after a failure.
    pub restarts: u64,
}

/// Observable state of one tracked playback device.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DeviceSnapshot {
    /// Device address (identity key).
    pub host: String,
    pub friendly_name: Option<String>,
    pub last_seen_ms: i64,
    pub phase: SessionPhase,
    pub buffering_strikes: u32,
    pub fatal_error: Option<String>,
    pub stream_url: Option<String>,
    pub status_updated_at_ms: Option<i64>,
    pub device_status: Option<DeviceStatus>,
    pub player_status: Option<PlayerStatus>,
}

/// Full registry snapshot served to status observers.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatusResponse {
    pub screens: Vec<PipelineSnapshot>,
    pub devices: Vec<DeviceSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_state_parses_cast_strings() {
        assert_eq!(PlayerState::parse("PLAYING"), PlayerState::Playing);
        assert_eq!(PlayerState::parse("BUFFERING"), PlayerState::Buffering);
        assert_eq!(PlayerState::parse("LOADING"), PlayerState::Unknown);
    }

    #[test]
    fn player_state_serializes_uppercase() {
        let raw = serde_json::to_string(&PlayerState::Buffering).unwrap();
        assert_eq!(raw, "\"BUFFERING\"");
        let back: PlayerState = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(back, PlayerState::Unknown);
    }
}
