//! Mesh Bridge
//!
//! Relays text between Discord channels and channels on a MeshCore radio
//! mesh:
//!
//! 1. **Mesh → Discord**: channel messages heard by the radio gateway are
//!    posted to the Discord channel routed for their mesh channel index.
//!
//! 2. **Discord → mesh**: `/send`, `!send` and always-forward channels are
//!    normalized, split to fit the radio payload limit and transmitted one
//!    message at a time with a pause between chunks.
//!
//! 3. **Control**: admins can pause and resume both directions with
//!    `/bridge`; a per-channel flood governor throttles busy channels.
//!
//! The radio gateway attaches over a WebSocket at `/mesh`.

mod chunking;
mod config;
mod discord;
mod error;
mod flood;
mod gate;
mod mesh;
mod normalize;
mod queue;
mod react;
mod relay;
mod routing;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::config::FileConfig;
use crate::discord::DiscordApi;
use crate::mesh::{InboundText, MeshLink};
use crate::relay::BridgeCore;

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mesh-bridge", version, about = "Discord ↔ MeshCore relay bridge")]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "config.json", env = "BRIDGE_CONFIG")]
    config: PathBuf,

    /// Port for the mesh gateway link and status endpoints
    #[arg(short, long, default_value_t = 8080, env = "BRIDGE_PORT")]
    port: u16,

    /// Verbose logging (same as DEBUG in the config file)
    #[arg(long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

// ── Shared State ──────────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    core: BridgeCore,
    link: Arc<MeshLink>,
    inbound: mpsc::UnboundedSender<InboundText>,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let settings = FileConfig::load(&args.config).and_then(FileConfig::into_settings);
    let debug = args.debug || settings.as_ref().is_ok_and(|s| s.debug);
    init_tracing(debug, args.log_json);

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(path = %args.config.display(), error = %e, "Failed to load config");
            std::process::exit(1);
        }
    };

    let _ = rustls::crypto::ring::default_provider().install_default();

    let api = match DiscordApi::new(&settings.discord_token, settings.application_id.clone()) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build Discord client");
            std::process::exit(1);
        }
    };
    let link = Arc::new(MeshLink::new(settings.mesh_ack_timeout));

    let core = BridgeCore::new(&settings, link.clone(), api.clone());
    let inbound = mesh::spawn_inbound_worker(core.clone());

    tracing::info!(
        mesh_max_len = settings.mesh_max_len,
        chunk_delay_ms = settings.chunk_delay.as_millis() as u64,
        always_forward = settings.always_forward.len(),
        default_chat = settings.routes.default_chat().map(|c| c.as_str()).unwrap_or("none"),
        "Bridge configured"
    );

    tokio::spawn(discord::run(api, core.clone()));

    let state = AppState {
        core,
        link,
        inbound,
    };

    let app = Router::new()
        .route("/mesh", get(mesh_ws_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Mesh bridge listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = addr.as_str(), error = %e, "Failed to bind address");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

fn init_tracing(debug: bool, json: bool) {
    let default_filter = if debug {
        "mesh_bridge=debug,tower_http=info"
    } else {
        "mesh_bridge=info,tower_http=info"
    };

    let builder = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| default_filter.into()),
    );

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for the radio gateway.
async fn mesh_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| mesh::handle_gateway_socket(socket, state.link, state.inbound))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(health_body())
}

fn health_body() -> serde_json::Value {
    json!({
        "status": "ok",
        "service": "mesh-bridge",
        "version": env!("CARGO_PKG_VERSION"),
    })
}

/// Bridge, queue and gateway status.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(status_body(&state))
}

fn status_body(state: &AppState) -> serde_json::Value {
    json!({
        "bridge": state.core.status(),
        "mesh": {
            "connected": state.link.is_connected(),
            "pending_acks": state.link.pending_acks(),
        },
        "timestamp": chrono::Utc::now().timestamp_millis(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
