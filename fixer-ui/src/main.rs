//! Fixer UI server - start fix runs over HTTP and stream their events.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use axum::Router;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use fixer::io::config::load_config;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "fixer-ui")]
#[command(about = "Web API for starting fix runs and streaming their events")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Directory run artifacts are written under (will contain .fixer/)
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Config file path
    #[arg(long, default_value = ".fixer/config.toml")]
    config: PathBuf,

    /// Environment variable holding the GitHub token
    #[arg(long, default_value = "GITHUB_TOKEN")]
    token_env: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fixer_ui=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = load_config(&args.config)?;
    let token = std::env::var(&args.token_env)
        .with_context(|| format!("read GitHub token from ${}", args.token_env))?;

    let project_dir = args.project_dir.canonicalize().unwrap_or(args.project_dir);
    info!(project_dir = %project_dir.display(), "starting fixer-ui");

    let state = AppState::new(project_dir, config, token);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
