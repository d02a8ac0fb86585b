//! `iota` — management tool and API server.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use iota_mqtt::{Channel, MqttChannel};
use iota_server::auth::userdb::UserDatabase;
use iota_server::{AppState, Config, bridge, routes};

#[derive(Parser)]
#[command(name = "iota", about = "IOTA device management tool", version)]
struct Cli {
    /// Debugging mode
    #[arg(short = 'D', long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the API server
    ApiServer {
        /// Listen address
        #[arg(long, default_value = ":8080")]
        bind: String,
    },
    /// Get or set a configuration value
    Config {
        key: String,
        value: Option<String>,
        /// Delete the key
        #[arg(short = 'd', long)]
        delete: bool,
    },
    /// Add a user
    Useradd { user: String, pass: String },
    /// Delete a user
    Userdel { user: String },
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

    if let Err(e) = run(cli.command).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::ApiServer { bind } => api_server(&bind).await,
        Command::Config { key, value, delete } => config_cmd(&key, value.as_deref(), delete),
        Command::Useradd { user, pass } => {
            let config = Config::load()?;
            let db = UserDatabase::open(&config).await?;
            db.create(&user, &pass).await?;
            Ok(())
        }
        Command::Userdel { user } => {
            let config = Config::load()?;
            let db = UserDatabase::open(&config).await?;
            db.remove(&user).await?;
            Ok(())
        }
    }
}

async fn api_server(bind: &str) -> anyhow::Result<()> {
    tracing::info!(version = iota_server::api::VERSION, "iota api server starting");

    let mut config = Config::load()?;
    ensure_client_id(&mut config);

    let (channel, eventloop) = MqttChannel::new(&config.mqtt())?;
    let channel = Arc::new(channel);

    let state = AppState::new(&config, Some(Arc::clone(&channel) as Arc<dyn Channel>)).await?;
    let router = routes::build_router(state);

    tokio::spawn(bridge::run(eventloop, Arc::clone(&channel), router.clone()));

    let addr = parse_bind(bind);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, router).await?;
    Ok(())
}

/// Generate and persist a stable MQTT client id the first time the
/// server runs, so the broker session survives restarts.
fn ensure_client_id(config: &mut Config) {
    if !config.get_or("mqtt.clientid", "").is_empty() {
        return;
    }
    let mut raw = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut raw);
    let client_id = hex::encode(raw);
    config.set("mqtt.clientid", &client_id);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "could not persist generated mqtt client id");
    }
}

fn config_cmd(key: &str, value: Option<&str>, delete: bool) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if delete {
        config.remove(key);
        config.save()?;
    } else if let Some(value) = value {
        config.set(key, value);
        config.save()?;
    } else {
        match config.get(key) {
            Some(value) => println!("{value}"),
            None => anyhow::bail!("{key}: not found"),
        }
    }
    Ok(())
}

/// `:8080` means all interfaces; otherwise take the address verbatim.
fn parse_bind(bind: &str) -> String {
    match bind.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => bind.to_string(),
    }
}
