//! Registry read access: pipelines per screen, sessions per device.

use actix_web::{HttpResponse, Responder, get, web};
use screencast_types::{DeviceSnapshot, PipelineSnapshot, StatusResponse};

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "All screens and devices", body = StatusResponse)
    )
)]
#[get("/status")]
pub async fn status(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.registry.snapshot())
}

#[utoipa::path(
    get,
    path = "/screens",
    responses(
        (status = 200, description = "Screen pipelines", body = [PipelineSnapshot])
    )
)]
#[get("/screens")]
pub async fn screens_list(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.registry.screen_snapshots())
}

#[utoipa::path(
    get,
    path = "/screens/{name}",
    params(
        ("name" = String, Path, description = "Screen name")
    ),
    responses(
        (status = 200, description = "Screen pipeline", body = PipelineSnapshot),
        (status = 404, description = "Unknown screen")
    )
)]
#[get("/screens/{name}")]
pub async fn screen_get(state: web::Data<AppState>, name: web::Path<String>) -> impl Responder {
    let name = name.into_inner();
    match state
        .registry
        .screen_snapshots()
        .into_iter()
        .find(|screen| screen.name == name)
    {
        Some(screen) => HttpResponse::Ok().json(screen),
        None => HttpResponse::NotFound().body(format!("unknown screen: {name}")),
    }
}

#[utoipa::path(
    get,
    path = "/devices",
    responses(
        (status = 200, description = "Tracked cast devices", body = [DeviceSnapshot])
    )
)]
#[get("/devices")]
pub async fn devices_list(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.registry.device_snapshots())
}
