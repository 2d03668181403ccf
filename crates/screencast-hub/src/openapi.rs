use utoipa::OpenApi;

use crate::api;
use screencast_types::{
    DeviceSnapshot, DeviceStatus, PipelineSnapshot, PlayerState, PlayerStatus, ReceiverApp,
    SessionPhase, StatusResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health::health,
        api::status::status,
        api::status::screens_list,
        api::status::screen_get,
        api::status::devices_list,
        api::streams::status_stream,
    ),
    components(
        schemas(
            api::health::HealthResponse,
            StatusResponse,
            PipelineSnapshot,
            DeviceSnapshot,
            DeviceStatus,
            ReceiverApp,
            PlayerStatus,
            PlayerState,
            SessionPhase,
        )
    ),
    tags(
        (name = "screencast-hub", description = "Screen streaming and cast status API")
    )
)]
pub struct ApiDoc;
