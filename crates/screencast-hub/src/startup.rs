//! Actix server startup and background wiring.
//!
//! Serves the status API and DASH output, brings every screen pipeline up, then
//! starts casting once the streams have had time to produce segments.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use actix_files::Files;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse};
use actix_web::{App, Error, HttpServer, web};
use anyhow::{Context as _, Result};
use futures_util::future::{LocalBoxFuture, Ready, ok};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::cast_v2::CastV2Connector;
use crate::config::{self, ScreenConfig};
use crate::correlation::{Correlator, Routing};
use crate::discovery::Discovery;
use crate::encoder::FfmpegEncoder;
use crate::events::EventBus;
use crate::openapi;
use crate::pipeline::PipelineSupervisor;
use crate::registry::Registry;
use crate::renderer::CommandRenderer;
use crate::state::AppState;

/// Applied once, after every screen's first pipeline attempt, before casting starts.
const WARM_UP: Duration = Duration::from_secs(4);

/// Build server state, start background work, and run the HTTP server.
pub(crate) async fn run(args: crate::Args) -> Result<()> {
    let cfg = load_config(args.config.as_ref())?;
    let bind = resolve_bind(args.bind, &cfg)?;
    let public_base_url = config::public_base_url_from_config(&cfg, bind)?;
    let media_dir = args
        .media_dir
        .unwrap_or_else(|| config::media_dir_from_config(&cfg));
    let interface = config::network_interface_from_config(&cfg)?;
    tracing::info!(
        bind = %bind,
        public_base_url = %public_base_url,
        media_dir = %media_dir.display(),
        screens = ?cfg.screens.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        version = api::health::VERSION,
        build_date = api::health::BUILD_DATE,
        "starting screencast-hub"
    );

    let live_dir = media_dir.join("live");
    std::fs::create_dir_all(&live_dir)
        .with_context(|| format!("create media dir {}", live_dir.display()))?;

    let registry = Registry::new();
    let events = EventBus::new();
    let supervisor = PipelineSupervisor::new(
        Arc::new(CommandRenderer::new(&cfg.renderer)),
        Arc::new(FfmpegEncoder::new(cfg.encoder.as_ref(), media_dir.clone())),
        registry.clone(),
        events.clone(),
        public_base_url,
    );
    let routing = Routing {
        mapping: cfg.cast_mapping.clone(),
        default_screen: cfg.default_screen.clone(),
        cast: config::cast_settings_from_config(&cfg),
    };

    setup_shutdown();
    actix_web::rt::spawn(bring_up(
        supervisor,
        cfg.screens.clone(),
        interface,
        routing,
        registry.clone(),
        events.clone(),
    ));

    let state = web::Data::new(AppState::new(registry, events));
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(FilteredLogger)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::health::health)
            .service(api::status::status)
            .service(api::streams::status_stream)
            .service(api::status::screens_list)
            .service(api::status::screen_get)
            .service(api::status::devices_list)
            .service(Files::new("/live", live_dir.clone()))
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}

/// Start every pipeline, wait for first attempts plus warm-up, then cast.
async fn bring_up(
    supervisor: PipelineSupervisor,
    screens: Vec<ScreenConfig>,
    interface: Option<IpAddr>,
    routing: Routing,
    registry: Registry,
    events: EventBus,
) {
    let first_attempts: Vec<_> = screens
        .into_iter()
        .map(|screen| supervisor.spawn(screen))
        .collect();
    for attempt in first_attempts {
        let _ = attempt.await;
    }
    tracing::info!("all streams up and running, connecting cast devices");
    tokio::time::sleep(WARM_UP).await;

    let (discovery, discovered) = match Discovery::new(interface) {
        Ok(discovery) => discovery,
        Err(err) => {
            tracing::error!(error = %err, "mdns: failed to start; casting disabled");
            return;
        }
    };
    let correlator = Correlator::new(
        registry,
        events,
        Arc::new(CastV2Connector),
        Arc::new(discovery.clone()),
        routing,
    );
    discovery.start_lookup();
    correlator.run(discovered).await;
}

fn setup_shutdown() {
    let system = actix_web::rt::System::current();
    let _ = ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        system.stop();
    });
}

/// Return true when the request path should be logged.
fn should_log_path(path: &str) -> bool {
    !(path.starts_with("/live/") || path == "/status/stream" || path == "/health")
}

/// Actix middleware that skips segment fetches and probes in request logs.
struct FilteredLogger;

impl<S, B> actix_web::dev::Transform<S, ServiceRequest> for FilteredLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = FilteredLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(FilteredLoggerMiddleware { service })
    }
}

struct FilteredLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for FilteredLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        let should_log = should_log_path(&path);
        let method = req.method().clone();
        let peer = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("-")
            .to_string();
        let start = std::time::Instant::now();
        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            if should_log {
                tracing::info!(
                    method = %method,
                    path = %path,
                    status = %res.status().as_u16(),
                    peer = %peer,
                    elapsed_ms = %start.elapsed().as_millis(),
                    "http request"
                );
            }
            Ok(res)
        })
    }
}

/// Load the config named on the command line, or `config.toml` next to the executable.
fn load_config(path: Option<&PathBuf>) -> Result<config::ServerConfig> {
    if let Some(path) = path {
        return config::ServerConfig::load(path);
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("config.toml")))
        .filter(|path| path.exists());
    match auto_path {
        Some(path) => config::ServerConfig::load(&path),
        None => Err(anyhow::anyhow!("config file is required; use --config")),
    }
}

fn resolve_bind(bind: Option<SocketAddr>, cfg: &config::ServerConfig) -> Result<SocketAddr> {
    match bind {
        Some(addr) => Ok(addr),
        None => Ok(config::bind_from_config(cfg)?
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8000)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_fetches_are_not_logged() {
        assert!(!should_log_path("/live/lobby/chunk-stream0-00012.m4s"));
        assert!(!should_log_path("/status/stream"));
        assert!(should_log_path("/status"));
        assert!(should_log_path("/devices"));
    }
}
