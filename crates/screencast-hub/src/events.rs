//! In-process event bus for status observers.
//!
//! Device sessions publish raw receiver/player snapshots here; they are for display only.

use screencast_types::{DeviceStatus, PlayerStatus};
use tokio::sync::broadcast;

/// Events published by sessions and pipelines.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// Raw receiver status fetched during a poll.
    DeviceStatus { host: String, status: DeviceStatus },
    /// Raw media status of the receiver app (`None` when no media session exists).
    PlayerStatus {
        host: String,
        status: Option<PlayerStatus>,
    },
    /// A screen's pipeline state changed (started, exited, failed).
    PipelineChanged { screen: String },
    /// A device was tracked, untracked, or changed phase.
    DevicesChanged,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus with a bounded broadcast channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    pub fn device_status(&self, host: &str, status: DeviceStatus) {
        let _ = self.sender.send(HubEvent::DeviceStatus {
            host: host.to_string(),
            status,
        });
    }

    pub fn player_status(&self, host: &str, status: Option<PlayerStatus>) {
        let _ = self.sender.send(HubEvent::PlayerStatus {
            host: host.to_string(),
            status,
        });
    }

    pub fn pipeline_changed(&self, screen: &str) {
        let _ = self.sender.send(HubEvent::PipelineChanged {
            screen: screen.to_string(),
        });
    }

    pub fn devices_changed(&self) {
        let _ = self.sender.send(HubEvent::DevicesChanged);
    }
}
