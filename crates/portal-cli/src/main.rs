// ============================================================================
// tribe-portal - Command-line front end for the tribe access gate
// ============================================================================
// Usage:
//   tribe-portal verify <ADDRESS>                 Check one wallet against the tribe
//   tribe-portal roster [--tribe-id ID]           List tribe members
//   tribe-portal login --account <ADDRESS>        Connect a wallet and run the gate
//   tribe-portal status                           Silently restore the saved session
//   tribe-portal logout                           Clear the saved session
//   tribe-portal approvals list|add|remove        Manage approved admin users
//   tribe-portal activity [--limit N]             Show recent admin activity
// ============================================================================

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use portal_core::access::{AccessGate, GateView, TribeVerifier, Verdict};
use portal_core::db::{keys, KeyValueStore, PortalDb};
use portal_core::wallet::{StaticHost, StaticProvider};
use portal_core::{Address, AdminRegistry, ChainId, PortalConfig, WorldApiClient};
use std::sync::Arc;
use tracing::info;

/// Tribe portal access gate
#[derive(Parser)]
#[command(name = "tribe-portal", version, about = "Wallet identity and tribe access gate")]
struct Cli {
    /// Path to the database file (default: ~/.tribe-portal/portal.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a wallet's character and evaluate tribe access
    Verify {
        address: String,
    },

    /// List members of a tribe (default: the required tribe)
    Roster {
        #[arg(long)]
        tribe_id: Option<u64>,
    },

    /// Connect a wallet account and run the access gate
    Login {
        /// Wallet address exposed by the headless provider
        #[arg(long)]
        account: String,

        /// Chain id (hex or decimal, default: expected chain)
        #[arg(long)]
        chain_id: Option<String>,
    },

    /// Restore the saved session without prompting and show the gate view
    Status {
        #[arg(long)]
        chain_id: Option<String>,
    },

    /// Disconnect the saved session
    Logout,

    /// Manage approved users
    Approvals {
        #[command(subcommand)]
        action: ApprovalAction,
    },

    /// Show recent admin activity, newest first
    Activity {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ApprovalAction {
    /// List approved users
    List {
        /// Only show addresses containing this text
        #[arg(long)]
        search: Option<String>,
    },
    /// Approve a wallet
    Add {
        address: String,
        /// Acting admin wallet
        #[arg(long)]
        by: Option<String>,
    },
    /// Revoke a wallet
    Remove {
        address: String,
        #[arg(long)]
        by: Option<String>,
    },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn init_logging() {
    if let Err(e) = dotenvy::dotenv() {
        // A missing .env is normal
        if !e.not_found() {
            eprintln!("Warning: Could not load .env file: {}", e);
        }
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("portal_core=info,tribe_portal=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = PortalConfig::default();
    let db_path = cli.db_path.as_deref().or(config.db_path.as_deref());

    match cli.command {
        Commands::Verify { address } => cmd_verify(&config, &address).await,
        Commands::Roster { tribe_id } => cmd_roster(&config, tribe_id).await,
        Commands::Login { account, chain_id } => {
            let store = open_store(db_path)?;
            cmd_login(&config, store, &account, chain_id.as_deref()).await
        }
        Commands::Status { chain_id } => {
            let store = open_store(db_path)?;
            cmd_status(&config, store, chain_id.as_deref()).await
        }
        Commands::Logout => cmd_logout(&config, open_store(db_path)?),
        Commands::Approvals { action } => {
            let registry = AdminRegistry::new(open_store(db_path)?, config.admin_wallets.clone());
            cmd_approvals(&registry, action)
        }
        Commands::Activity { limit } => {
            let registry = AdminRegistry::new(open_store(db_path)?, config.admin_wallets.clone());
            cmd_activity(&registry, limit)
        }
    }
}

fn open_store(path: Option<&str>) -> Result<Arc<dyn KeyValueStore>> {
    let db = PortalDb::open(path)?;
    info!("Using database {}", db.path().display());
    Ok(Arc::new(db))
}

fn world_api(config: &PortalConfig) -> Result<WorldApiClient> {
    Ok(WorldApiClient::new(&config.world_api_base, config.http_timeout())?)
}

fn chain_or_default(config: &PortalConfig, raw: Option<&str>) -> Result<ChainId> {
    match raw {
        Some(raw) => Ok(ChainId::parse(raw)?),
        None => config
            .expected_chain_id
            .ok_or_else(|| anyhow!("No chain id given and PORTAL_EXPECTED_CHAIN_ID is unset")),
    }
}

fn build_gate(config: &PortalConfig, store: Arc<dyn KeyValueStore>, provider: Option<StaticProvider>) -> Result<AccessGate> {
    let host = match provider {
        Some(provider) => StaticHost::empty().with_injected(Arc::new(provider)),
        None => StaticHost::empty(),
    };
    Ok(AccessGate::new(
        config,
        Arc::new(host),
        Arc::new(world_api(config)?),
        store,
    ))
}

fn print_view(view: &GateView) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(view)?);
    Ok(())
}

async fn cmd_verify(config: &PortalConfig, raw: &str) -> Result<()> {
    let address = Address::parse(raw)?;
    let verifier = TribeVerifier::new(Arc::new(world_api(config)?), config.required_tribe_id);

    match verifier.verify(&address).await {
        Verdict::Granted(record) => {
            println!("ACCESS GRANTED");
            println!("  Character: {}", record.display_name);
            println!("  Tribe:     {}", record.group_id);
            println!("  Portrait:  {}", record.portrait_url);
        }
        Verdict::Denied(Some(record)) => {
            println!("ACCESS DENIED");
            println!("  Character: {}", record.display_name);
            println!("  Tribe:     {} (required: {})", record.group_id, verifier.required_group_id());
        }
        Verdict::Denied(None) => {
            println!("ACCESS DENIED");
            println!("  {} has no tribe membership", address.short());
            println!("  Need help? {}", config.help_url);
        }
        Verdict::Unavailable(e) => {
            anyhow::bail!("Could not verify {}: {} (try again)", address.short(), e);
        }
    }
    Ok(())
}

async fn cmd_roster(config: &PortalConfig, tribe_id: Option<u64>) -> Result<()> {
    let tribe_id = tribe_id.unwrap_or(config.required_tribe_id);
    let verifier = TribeVerifier::new(Arc::new(world_api(config)?), config.required_tribe_id);
    let roster = verifier.fetch_roster(tribe_id).await?;

    println!("=== {} ({}) ===", roster.name, roster.id);
    if roster.members.is_empty() {
        println!("No members found.");
        return Ok(());
    }

    println!("{:<42}  {}", "ADDRESS", "NAME");
    println!("{}", "-".repeat(70));
    for member in &roster.members {
        println!("{:<42}  {}", member.address.as_str(), member.name);
    }
    println!("\nTotal: {} members", roster.members.len());
    Ok(())
}

async fn cmd_login(
    config: &PortalConfig,
    store: Arc<dyn KeyValueStore>,
    account: &str,
    chain_id: Option<&str>,
) -> Result<()> {
    let account = Address::parse(account)?;
    let provider = StaticProvider::new(vec![account], chain_or_default(config, chain_id)?);
    let mut gate = build_gate(config, store, Some(provider))?;

    gate.connect().await;
    print_view(&gate.view())
}

async fn cmd_status(config: &PortalConfig, store: Arc<dyn KeyValueStore>, chain_id: Option<&str>) -> Result<()> {
    // The headless wallet keeps permission for the last connected account
    let provider = match store.get(keys::ACCOUNT)? {
        Some(raw) => {
            let account = Address::parse(&raw)?;
            Some(StaticProvider::new(vec![account], chain_or_default(config, chain_id)?).authorized())
        }
        None => None,
    };
    let has_wallet = provider.is_some();

    let mut gate = build_gate(config, store, provider)?;
    if has_wallet {
        gate.restore().await;
    }
    print_view(&gate.view())
}

fn cmd_logout(config: &PortalConfig, store: Arc<dyn KeyValueStore>) -> Result<()> {
    let account = store.get(keys::ACCOUNT)?;
    let mut gate = build_gate(config, store, None)?;
    gate.disconnect();

    match account {
        Some(raw) => println!("Disconnected {}", raw),
        None => println!("No saved session."),
    }
    Ok(())
}

fn cmd_approvals(registry: &AdminRegistry, action: ApprovalAction) -> Result<()> {
    match action {
        ApprovalAction::List { search } => {
            let users = registry.search(search.as_deref().unwrap_or(""))?;
            if users.is_empty() {
                println!("No approved users found.");
                return Ok(());
            }
            for user in &users {
                let tag = if registry.is_admin_wallet(user) { "  (admin)" } else { "" };
                println!("{}{}", user, tag);
            }
            println!("\nTotal: {} approved users", users.len());
        }
        ApprovalAction::Add { address, by } => {
            let by = by.as_deref().map(Address::parse).transpose()?;
            let approved = registry.approve(&address, by.as_ref())?;
            println!("Approved {}", approved);
        }
        ApprovalAction::Remove { address, by } => {
            let by = by.as_deref().map(Address::parse).transpose()?;
            let revoked = registry.revoke(&address, by.as_ref())?;
            println!("Revoked {}", revoked);
        }
    }
    Ok(())
}

fn cmd_activity(registry: &AdminRegistry, limit: usize) -> Result<()> {
    let entries = registry.recent_activity(limit)?;
    if entries.is_empty() {
        println!("No admin activity recorded.");
        return Ok(());
    }

    println!("{:<22}  {:<14}  {:<42}  {}", "WHEN", "ACTION", "ADDRESS", "BY");
    println!("{}", "-".repeat(100));
    for entry in &entries {
        println!(
            "{:<22}  {:<14}  {:<42}  {}",
            format_timestamp(entry.timestamp),
            entry.action.display_name(),
            entry.address.as_str(),
            entry.admin.as_ref().map(|a| a.short()).unwrap_or_else(|| "-".into())
        );
    }
    Ok(())
}
