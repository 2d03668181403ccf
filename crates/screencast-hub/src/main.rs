mod api;
mod cast_channel;
mod cast_v2;
mod config;
mod correlation;
mod device;
mod discovery;
mod encoder;
mod events;
mod openapi;
mod pipeline;
mod registry;
mod renderer;
mod session;
mod startup;
mod state;
mod timeout;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "screencast-hub")]
pub(crate) struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:8000
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Directory the DASH output is written to and served from
    #[arg(long)]
    media_dir: Option<PathBuf>,

    /// Server config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,screencast_hub=info")
        }))
        .init();

    startup::run(args).await
}
