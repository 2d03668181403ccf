//! Matches discovered devices to screens and owns their session tasks.
//!
//! A host is tracked from the moment it is accepted until its session ends, so
//! repeated advertisements never start a second session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::CastSettings;
use crate::device::{DeviceConnector, MediaResource};
use crate::discovery::{Discovery, NewDevice};
use crate::events::EventBus;
use crate::registry::{DeviceRecord, Registry};
use crate::session::DeviceSession;

/// Delay before a device whose session could not be built is tried again.
pub(crate) const REDISCOVERY_DELAY: Duration = Duration::from_secs(60);

/// Something that can re-broadcast a discovery query.
pub(crate) trait LookupTrigger: Send + Sync {
    fn start_lookup(&self);
}

impl LookupTrigger for Discovery {
    fn start_lookup(&self) {
        Discovery::start_lookup(self);
    }
}

/// Screen selection and receiver settings for new sessions.
#[derive(Debug, Clone)]
pub(crate) struct Routing {
    /// Friendly name to screen name.
    pub mapping: HashMap<String, String>,
    pub default_screen: Option<String>,
    pub cast: CastSettings,
}

/// Pick a published stream for a device: mapped screen, then the default
/// screen, then the first screen with a URL.
pub(crate) fn resolve_stream_url(
    registry: &Registry,
    routing: &Routing,
    friendly_name: Option<&str>,
) -> Option<String> {
    friendly_name
        .and_then(|name| routing.mapping.get(name))
        .and_then(|screen| registry.stream_url(screen))
        .or_else(|| {
            routing
                .default_screen
                .as_deref()
                .and_then(|screen| registry.stream_url(screen))
        })
        .or_else(|| registry.first_stream_url())
}

pub(crate) struct Correlator {
    registry: Registry,
    events: EventBus,
    connector: Arc<dyn DeviceConnector>,
    lookup: Arc<dyn LookupTrigger>,
    routing: Routing,
}

impl Correlator {
    pub(crate) fn new(
        registry: Registry,
        events: EventBus,
        connector: Arc<dyn DeviceConnector>,
        lookup: Arc<dyn LookupTrigger>,
        routing: Routing,
    ) -> Self {
        Self {
            registry,
            events,
            connector,
            lookup,
            routing,
        }
    }

    /// Consume discovery events and delayed retries until both sources close.
    pub(crate) async fn run(self, mut discovered: mpsc::UnboundedReceiver<NewDevice>) {
        let (retry_tx, mut retry_rx) = mpsc::unbounded_channel();
        let this = Arc::new(self);
        loop {
            let device = tokio::select! {
                Some(device) = discovered.recv() => device,
                Some(device) = retry_rx.recv() => device,
                else => break,
            };
            this.accept(device, &retry_tx);
        }
    }

    fn accept(self: &Arc<Self>, device: NewDevice, retry: &mpsc::UnboundedSender<NewDevice>) {
        let record = DeviceRecord::new(device.host.clone(), device.friendly_name.clone());
        if !self.registry.try_track(record.clone()) {
            tracing::debug!(host = %device.host, "session: device already tracked");
            return;
        }
        tracing::info!(device = %record.label(), "session: new device");
        self.events.devices_changed();

        let this = self.clone();
        let retry = retry.clone();
        tokio::spawn(async move {
            this.drive(record, device, retry).await;
        });
    }

    async fn drive(
        &self,
        record: DeviceRecord,
        device: NewDevice,
        retry: mpsc::UnboundedSender<NewDevice>,
    ) {
        let Some(url) =
            resolve_stream_url(&self.registry, &self.routing, record.friendly_name.as_deref())
        else {
            tracing::warn!(device = %record.label(), "session: no stream available");
            self.retry_later(device, retry);
            return;
        };

        let session = DeviceSession::new(
            record.clone(),
            MediaResource {
                url,
                content_type: self.routing.cast.content_type.clone(),
            },
            self.routing.cast.app_id.clone(),
            self.connector.clone(),
            self.registry.clone(),
            self.events.clone(),
        );
        match session.start().await {
            Ok(link) => {
                let fault = session.run(link).await;
                tracing::info!(
                    device = %record.label(),
                    error = %fault.error,
                    "session: device lost, starting rediscovery"
                );
                self.registry.untrack(&record.host);
                self.events.devices_changed();
                self.lookup.start_lookup();
            }
            Err(err) => {
                tracing::error!(device = %record.label(), error = %err, "session: fatal error while connecting");
                self.retry_later(device, retry);
            }
        }
    }

    fn retry_later(&self, device: NewDevice, retry: mpsc::UnboundedSender<NewDevice>) {
        self.registry.untrack(&device.host);
        self.events.devices_changed();
        tokio::spawn(async move {
            tokio::time::sleep(REDISCOVERY_DELAY).await;
            let _ = retry.send(device);
        });
    }
}
