use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use device_control::{CloudNodes, Devices};
use pdk::{load_config, AccountCredentials, AuthenticatedClient, PdkConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Command-line arguments for PDK device control
#[derive(Parser, Debug)]
#[command(name = "pdk-devices", about = "List and control PDK doors and gates", version)]
struct Cli {
    #[arg(long, default_value = "pdk.toml")]
    config: String,

    #[arg(long, default_value = "credentials.json")]
    credentials: String,

    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List cloud nodes
    Nodes {
        /// Zero-based page
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        per_page: Option<u32>,
    },
    /// List devices on a cloud node
    Devices { cloud_node_id: String },
    /// Open a device
    Open {
        cloud_node_id: String,
        device_id: String,
        /// Open time in tenths of a second (1-5400)
        #[arg(long)]
        dwell: Option<u32>,
    },
    /// Close a device
    Close { cloud_node_id: String, device_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "device_control=debug,pdk=debug"
    } else {
        "device_control=info,pdk=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = if Path::new(&cli.config).exists() {
        load_config(&cli.config)?
    } else {
        PdkConfig::default()
    };
    let login = if Path::new(&cli.credentials).exists() {
        AccountCredentials::from_file(&cli.credentials)?
    } else {
        AccountCredentials::from_env().context("No credentials file and PDK_* env vars incomplete")?
    };

    let client = Arc::new(AuthenticatedClient::from_config(&config, login).context("Failed to initialize PDK client")?);
    info!(account_id = %client.account_id(), "PDK client ready");

    match cli.command {
        Command::Nodes { page, per_page } => {
            for node in CloudNodes::new(client).list(page, per_page).await? {
                let status = if node.is_connected() { "connected" } else { "disconnected" };
                println!(
                    "{}  {} ({})  {}  ip={}",
                    node.id,
                    node.name,
                    node.serial_number.as_deref().unwrap_or("-"),
                    status,
                    node.ipv4_address.as_deref().unwrap_or("N/A")
                );
            }
        }
        Command::Devices { cloud_node_id } => {
            for device in Devices::new(client).list(&cloud_node_id).await? {
                println!(
                    "{}  {}  type={}  dwell={}",
                    device.id,
                    device.name,
                    device.device_type.as_deref().unwrap_or("-"),
                    device.dwell.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Command::Open {
            cloud_node_id,
            device_id,
            dwell,
        } => {
            Devices::new(client).try_open(&cloud_node_id, &device_id, dwell).await?;
            println!("Opened {}", device_id);
        }
        Command::Close {
            cloud_node_id,
            device_id,
        } => {
            Devices::new(client).close(&cloud_node_id, &device_id).await?;
            println!("Closed {}", device_id);
        }
    }

    Ok(())
}
