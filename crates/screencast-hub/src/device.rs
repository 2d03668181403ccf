//! Device-protocol seam used by sessions.
//!
//! The session state machine only sees these traits; `cast_v2` provides the
//! network implementation and tests provide scripted fakes.

use async_trait::async_trait;
use screencast_types::{DeviceStatus, PlayerStatus};
use tokio::sync::watch;

use crate::timeout::Timeout;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CastError {
    #[error(transparent)]
    Timeout(#[from] Timeout),
    /// The device link itself failed.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("load failed: {0}")]
    Load(String),
    /// Unexpected or unparseable reply.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CastError {
    fn from(value: std::io::Error) -> Self {
        CastError::Io(value.to_string())
    }
}

/// Media handed to the receiver app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaResource {
    pub url: String,
    pub content_type: String,
}

/// Error observer of one device connection.
///
/// Fires at most once, when the link reports a transport error; the
/// connection is closed by the time observers see it.
#[derive(Clone, Debug)]
pub struct FaultSignal {
    rx: watch::Receiver<Option<String>>,
}

/// Producer half of a `FaultSignal`, owned by the connection implementation.
#[derive(Debug)]
pub struct FaultTrigger {
    tx: watch::Sender<Option<String>>,
}

pub fn fault_channel() -> (FaultTrigger, FaultSignal) {
    let (tx, rx) = watch::channel(None);
    (FaultTrigger { tx }, FaultSignal { rx })
}

impl FaultTrigger {
    /// Record the fault; later calls keep the first error.
    pub fn fire(&self, error: impl Into<String>) {
        let error = error.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(error);
            true
        });
    }
}

impl FaultSignal {
    /// The recorded fault, if any.
    pub fn current(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Wait until a fault is recorded. Pends forever if the trigger is dropped unfired.
    pub async fn fired(&mut self) -> String {
        loop {
            if let Some(err) = self.rx.borrow_and_update().clone() {
                return err;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Open a connection to the device at `host`.
    async fn connect(&self, host: &str) -> Result<Box<dyn DeviceClient>, CastError>;
}

#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Launch (or join) the receiver application.
    async fn launch_app(&self, app_id: &str) -> Result<Box<dyn ReceiverPlayer>, CastError>;
    /// Fetch receiver-level status.
    async fn get_status(&self) -> Result<DeviceStatus, CastError>;
    /// Error observer for this connection.
    fn fault(&self) -> FaultSignal;
    /// Close the connection. Idempotent.
    fn close(&self);
}

#[async_trait]
pub trait ReceiverPlayer: Send + Sync {
    /// Load media with autoplay; returns the resulting player status.
    async fn load(&self, media: &MediaResource) -> Result<Option<PlayerStatus>, CastError>;
    /// Current media status, `None` when no media session exists.
    async fn get_status(&self) -> Result<Option<PlayerStatus>, CastError>;
    /// Stop the current media session.
    async fn stop(&self) -> Result<(), CastError>;
    /// Display name of the launched application.
    fn display_name(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fault_signal_keeps_first_error() {
        let (trigger, mut signal) = fault_channel();
        assert_eq!(signal.current(), None);
        trigger.fire("socket reset");
        trigger.fire("second");
        assert_eq!(signal.fired().await, "socket reset");
        assert_eq!(signal.clone().current().as_deref(), Some("socket reset"));
    }
}
