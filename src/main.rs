use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use pdk::credentials::generate_key;
use pdk::{load_config, AccountCredentials, AuthenticatedClient, CredentialSet, PdkConfig};
use std::path::Path;
use tracing::{info, warn};

/// Command-line arguments for the PDK token tool
#[derive(Parser, Debug)]
#[command(name = "pdk", about = "Log in to PDK and manage cached access tokens", version)]
struct Cli {
    /// TOML configuration file (defaults apply when it does not exist)
    #[arg(long, default_value = "pdk.toml")]
    config: String,

    /// JSON file with email, password and system_id (falls back to PDK_* env vars)
    #[arg(long, default_value = "credentials.json")]
    credentials: String,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Make sure usable tokens exist and print a summary
    Tokens,
    /// Run a full login even if cached tokens are still valid
    Login,
    /// Renew tokens with the stored refresh token only
    Refresh,
    /// Authenticated GET against an account-scoped endpoint
    Get {
        endpoint: String,
        /// Query parameter, repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Print a new base64 key for encrypting the token store
    Keygen,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "pdk=debug" } else { "pdk=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    if let Command::Keygen = cli.command {
        println!("{}", generate_key());
        return Ok(());
    }

    let config = read_config(&cli.config)?;
    let login = read_credentials(&cli.credentials)?;
    info!(account_id = %login.system_id, environment = ?config.platform.environment, "Configuration loaded");

    let client = AuthenticatedClient::from_config(&config, login).context("Failed to initialize PDK client")?;
    let manager = client.manager();
    let account_id = client.account_id();

    match cli.command {
        Command::Tokens => {
            let set = manager.ensure_credentials(account_id).await?;
            print_summary(&set);
        }
        Command::Login => {
            let set = manager.force_login(account_id).await?;
            print_summary(&set);
        }
        Command::Refresh => {
            if !config.platform.resolve().supports_refresh() {
                bail!("the configured platform does not issue refresh tokens");
            }
            let set = manager.refresh_with_refresh_token(account_id).await?;
            print_summary(&set);
        }
        Command::Get { endpoint, params } => {
            let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let value = client.get(&endpoint, &params, None).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        // Answered before any config is read
        Command::Keygen => {}
    }

    Ok(())
}

fn read_config(path: &str) -> Result<PdkConfig> {
    if Path::new(path).exists() {
        load_config(path)
    } else {
        warn!(path = %path, "Config file not found, using defaults");
        Ok(PdkConfig::default())
    }
}

fn read_credentials(path: &str) -> Result<AccountCredentials> {
    if Path::new(path).exists() {
        AccountCredentials::from_file(path)
    } else {
        AccountCredentials::from_env().with_context(|| format!("{} not found and PDK_* env vars incomplete", path))
    }
}

fn print_summary(set: &CredentialSet) {
    println!("Tokens for system {}", set.account_id);
    print_token("ID Token", Some(&set.id_token), Some(set.id_token_expiry));
    print_token("Access Token", set.access_token.as_deref(), None);
    print_token("System Token", Some(&set.system_token), Some(set.system_token_expiry));
    print_token("Refresh Token", set.refresh_token.as_deref(), set.refresh_token_expiry);
    println!("  Last updated: {}", set.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
}

fn print_token(label: &str, token: Option<&str>, expiry: Option<DateTime<Utc>>) {
    let Some(token) = token else {
        println!("  {}: not available", label);
        return;
    };
    let preview = match token.char_indices().nth(15) {
        Some((idx, _)) => format!("{}...", &token[..idx]),
        None => token.to_string(),
    };
    match expiry {
        Some(expiry) => println!("  {}: {} (expires {})", label, preview, expiry.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  {}: {}", label, preview),
    }
}
