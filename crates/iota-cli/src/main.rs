//! `iotacli` — command-line client for the IOTA API server.

mod client;
mod session;

use clap::{Parser, Subcommand};

use iota_protocol::Record;

use client::ApiClient;
use session::Session;

#[derive(Parser)]
#[command(name = "iotacli", about = "IOTA command-line client", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and cache the session token
    Login { user: String, pass: String },
    /// Drop the cached session token
    Logout,
    /// Show client and server version
    Version,
    /// List devices, or show one device
    Device {
        id: Option<String>,
        /// Project to these attribute keys (comma-separated)
        #[arg(short = 'k', long)]
        keys: Option<String>,
    },
    /// Register a device; attributes are a JSON object
    #[command(name = "device:create")]
    DeviceCreate {
        id: String,
        #[arg(default_value = "{}")]
        attrs: String,
    },
    /// Merge attribute updates into a device
    #[command(name = "device:update")]
    DeviceUpdate { id: String, updates: String },
    /// Remove a device
    #[command(name = "device:delete")]
    DeviceDelete { id: String },
    /// Send a JSON-RPC request to a device
    #[command(name = "device:rpc")]
    DeviceRpc { id: String, request: String },
    /// List pending claims
    #[command(name = "device:claims")]
    DeviceClaims,
    /// Approve a pending claim
    #[command(name = "device:approve")]
    DeviceApprove {
        id: String,
        #[arg(default_value = "{}")]
        overrides: String,
    },
    /// Reject a pending claim
    #[command(name = "device:reject")]
    DeviceReject { id: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse().command).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn parse_record(raw: &str) -> anyhow::Result<Record> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("invalid JSON attributes: {e}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command) -> anyhow::Result<()> {
    let mut session = Session::load()?;
    let client = ApiClient::new(&session);

    match command {
        Command::Login { user, pass } => {
            let token = client.login(&user, &pass).await?;
            session.token = Some(token);
            session.save()?;
            println!("Login succeeded");
        }
        Command::Logout => {
            session.token = None;
            session.save()?;
        }
        Command::Version => {
            println!("Client version: {}", env!("CARGO_PKG_VERSION"));
            let server = client.server_version().await?;
            println!("Server version: {}", server.version);
            println!("API version:    {}", server.api_version);
            println!("Os/Arch:        {}/{}", server.os, server.arch);
        }
        Command::Device { id: Some(id), keys } => {
            let device = client.get_device(&id, keys.as_deref()).await?;
            print_json(&device)?;
        }
        Command::Device { id: None, keys } => {
            let devices = client.list_devices(keys.as_deref()).await?;
            print_json(&devices)?;
        }
        Command::DeviceCreate { id, attrs } => {
            let mut attrs = parse_record(&attrs)?;
            attrs.insert("id".into(), serde_json::Value::String(id));
            let token = client.create_device(&attrs).await?;
            println!("{}", token.token);
        }
        Command::DeviceUpdate { id, updates } => {
            client.update_device(&id, &parse_record(&updates)?).await?;
        }
        Command::DeviceDelete { id } => {
            client.delete_device(&id).await?;
        }
        Command::DeviceRpc { id, request } => {
            if let Some(response) = client.rpc(&id, &request).await? {
                println!("{response}");
            }
        }
        Command::DeviceClaims => {
            let claims = client.list_claims().await?;
            print_json(&claims)?;
        }
        Command::DeviceApprove { id, overrides } => {
            let token = client.approve_claim(&id, &parse_record(&overrides)?).await?;
            println!("{}", token.token);
        }
        Command::DeviceReject { id } => {
            client.reject_claim(&id).await?;
        }
    }
    Ok(())
}
