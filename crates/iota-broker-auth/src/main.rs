//! `iota-authd` — HTTP shim between the broker's http-auth plugin and
//! the platform's credential checks. The broker POSTs form-encoded
//! requests; 200 means allow, 403 means deny.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use clap::Parser;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use iota_broker_auth::{Access, AgentCredentials, acl_check, connect_check};
use iota_server::Config;

#[derive(Parser)]
#[command(name = "iota-authd", about = "Broker authentication backend", version)]
struct Cli {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8084")]
    bind: String,

    /// Debugging mode
    #[arg(short = 'D', long)]
    debug: bool,
}

#[derive(Clone)]
struct AuthState {
    credentials: Arc<AgentCredentials>,
}

#[derive(Debug, Deserialize)]
struct UserCheck {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    clientid: String,
}

#[derive(Debug, Deserialize)]
struct AclCheck {
    #[serde(default)]
    username: String,
    #[serde(default)]
    clientid: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    acc: i32,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(&cli.bind).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(bind: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let credentials = Arc::new(AgentCredentials::from_config(&config).await?);

    let app = Router::new()
        .route("/auth/user", post(check_user))
        .route("/auth/acl", post(check_acl))
        .with_state(AuthState { credentials });

    let listener = TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "iota-authd listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn check_user(State(state): State<AuthState>, Form(req): Form<UserCheck>) -> StatusCode {
    let allowed = connect_check(
        state.credentials.as_ref(),
        &req.username,
        &req.password,
        &req.clientid,
    )
    .await;
    tracing::debug!(username = %req.username, clientid = %req.clientid, allowed, "connect check");
    if allowed { StatusCode::OK } else { StatusCode::FORBIDDEN }
}

async fn check_acl(State(state): State<AuthState>, Form(req): Form<AclCheck>) -> StatusCode {
    let Some(access) = Access::from_mosquitto(req.acc) else {
        return StatusCode::FORBIDDEN;
    };
    let allowed = acl_check(
        state.credentials.as_ref(),
        &req.clientid,
        &req.username,
        &req.topic,
        access,
    );
    tracing::debug!(
        username = %req.username,
        topic = %req.topic,
        acc = req.acc,
        allowed,
        "acl check"
    );
    if allowed { StatusCode::OK } else { StatusCode::FORBIDDEN }
}
