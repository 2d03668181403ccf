use actix_web::{HttpResponse, Responder, get};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub build_date: &'static str,
}

pub(crate) const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+",
    env!("SCREENCAST_GIT_SHA")
);
pub(crate) const BUILD_DATE: &str = env!("SCREENCAST_BUILD_DATE");

/// Liveness probe with build metadata.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Hub is running", body = HealthResponse)
    )
)]
#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        version: VERSION,
        build_date: BUILD_DATE,
    })
}
