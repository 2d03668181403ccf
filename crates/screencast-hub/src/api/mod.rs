//! HTTP API handlers.
//!
//! Read-only views of the registry plus a live status stream.

pub mod health;
pub mod status;
pub mod streams;

#[cfg(test)]
mod tests {
    use actix_web::{App, test as actix_test, web};
    use screencast_types::{
        DeviceStatus, PipelineSnapshot, PlayerState, PlayerStatus, SessionPhase, StatusResponse,
    };

    use crate::api;
    use crate::events::{EventBus, HubEvent};
    use crate::registry::{DeviceRecord, Registry};
    use crate::state::AppState;

    fn make_state() -> web::Data<AppState> {
        let registry = Registry::new();
        registry.pipeline_started("lobby", "http://10.0.0.2:8000/live/lobby/dash.mpd");
        registry.heartbeat("lobby", "frame=  250 fps=25");
        registry.ensure_screen("hall");
        registry.try_track(DeviceRecord::new("10.0.0.5", Some("Kitchen".to_string())));
        registry.update_session("10.0.0.5", |s| s.phase = SessionPhase::Polling);
        web::Data::new(AppState::new(registry, EventBus::new()))
    }

    #[actix_web::test]
    async fn health_reports_ok() {
        let app = actix_test::init_service(App::new().service(api::health::health)).await;
        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().unwrap().starts_with(env!("CARGO_PKG_VERSION")));
    }

    #[actix_web::test]
    async fn status_lists_screens_and_devices() {
        let state = make_state();
        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .service(api::status::status),
        )
        .await;
        let req = actix_test::TestRequest::get().uri("/status").to_request();
        let resp: StatusResponse = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.screens.len(), 2);
        assert_eq!(resp.screens[0].name, "hall");
        assert_eq!(
            resp.screens[1].last_heartbeat_output.as_deref(),
            Some("frame=  250 fps=25")
        );
        assert_eq!(resp.devices.len(), 1);
        assert_eq!(resp.devices[0].friendly_name.as_deref(), Some("Kitchen"));
        assert_eq!(resp.devices[0].phase, SessionPhase::Polling);
    }

    #[actix_web::test]
    async fn unknown_screen_returns_404() {
        let state = make_state();
        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .service(api::status::screen_get)
                .service(api::status::screens_list),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/screens/lobby").to_request();
        let screen: PipelineSnapshot = actix_test::call_and_read_body_json(&app, req).await;
        assert!(screen.url.is_some());

        let req = actix_test::TestRequest::get().uri("/screens/attic").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn status_stream_is_event_stream() {
        let state = make_state();
        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .service(api::streams::status_stream),
        )
        .await;
        let req = actix_test::TestRequest::get().uri("/status/stream").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers()
                .get(actix_web::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
    }

    #[test]
    fn bus_events_become_named_sse_events() {
        let state = make_state();
        let event = HubEvent::PlayerStatus {
            host: "10.0.0.5".to_string(),
            status: Some(PlayerStatus {
                media_session_id: Some(3),
                player_state: PlayerState::Buffering,
                current_time: Some(-1.0),
                idle_reason: None,
                content_id: None,
            }),
        };
        let bytes = api::streams::hub_event(&state, &event).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("event: player_status\ndata: "), "{text}");
        let data: serde_json::Value =
            serde_json::from_str(text.trim_end().trim_start_matches("event: player_status\ndata: "))
                .unwrap();
        assert_eq!(data["host"], "10.0.0.5");
        assert_eq!(data["status"]["player_state"], "BUFFERING");

        let event = HubEvent::DeviceStatus {
            host: "10.0.0.5".to_string(),
            status: DeviceStatus::default(),
        };
        let bytes = api::streams::hub_event(&state, &event).unwrap();
        assert!(bytes.starts_with(b"event: device_status\n"));

        let event = HubEvent::PipelineChanged {
            screen: "lobby".to_string(),
        };
        let bytes = api::streams::hub_event(&state, &event).unwrap();
        assert!(std::str::from_utf8(&bytes).unwrap().contains("\"name\":\"lobby\""));

        let unknown = HubEvent::PipelineChanged {
            screen: "attic".to_string(),
        };
        assert!(api::streams::hub_event(&state, &unknown).is_none());
        assert!(api::streams::hub_event(&state, &HubEvent::DevicesChanged).is_none());
    }

    #[test]
    fn sse_event_prefixes_each_line() {
        let bytes = api::streams::sse_event("status", "{\n\"a\":1\n}");
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            "event: status\ndata: {\ndata: \"a\":1\ndata: }\n\n"
        );
    }
}
