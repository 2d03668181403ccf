//! Shared application state for HTTP handlers.

use crate::events::EventBus;
use crate::registry::Registry;

pub struct AppState {
    pub registry: Registry,
    pub events: EventBus,
}

impl AppState {
    pub fn new(registry: Registry, events: EventBus) -> Self {
        Self { registry, events }
    }
}
