// ============================================================================
// pulse-agent - PulseRemit transfer agent and database inspection tool
// ============================================================================
// Usage:
//   pulse-agent run                         Run the recurring scheduler until Ctrl-C
//   pulse-agent scan                        Perform one due-scan and exit
//   pulse-agent stats                       Show database statistics
//   pulse-agent schedules [--user ID]       List recurring schedules
//   pulse-agent transfers [--user ID]       List recorded transfers
//   pulse-agent cancel <SCHEDULE_ID>        Deactivate a schedule
//   pulse-agent digest ...                  Print the EIP-712 digest of a request
//   pulse-agent agent                       Show agent identity and reputation
// ============================================================================

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use pulse_core::chain::ChainGateway;
use pulse_core::digest::{domain_separator, struct_hash, typed_data_digest, VAULT_DOMAIN_NAME, VAULT_DOMAIN_VERSION};
use pulse_core::utils::{usd_to_wei, wei_to_usd};
use pulse_core::{
    PulseConfig, PulseDb, PulseStore, ScheduleProcessor, SystemClock, TransferExecutor, TransferRequest,
    VaultGateway,
};
use tracing::{error, info, warn};

/// PulseRemit agent
#[derive(Parser)]
#[command(name = "pulse-agent", version, about = "Execute signed vault transfers and recurring schedules")]
struct Cli {
    /// Path to the database file (default: ~/.pulse/agent.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and process due schedules until interrupted
    Run,

    /// Run a single due-scan now
    Scan,

    /// Show database statistics (intents, transfers, schedules)
    Stats,

    /// List recurring schedules
    Schedules {
        /// Only schedules of this user
        #[arg(long)]
        user: Option<String>,
    },

    /// List recorded transfers
    Transfers {
        /// Only transfers of this user
        #[arg(long)]
        user: Option<String>,
    },

    /// Deactivate a schedule (irreversible)
    Cancel {
        schedule_id: String,
    },

    /// Compute the digest a user must sign for a transfer request
    Digest {
        #[arg(long)]
        recipient: String,
        /// Amount in USD, e.g. 12.5
        #[arg(long)]
        amount: String,
        #[arg(long)]
        nonce: u64,
        /// Unix timestamp
        #[arg(long)]
        deadline: u64,
        /// Domain separator as read from the vault
        #[arg(long)]
        domain: Option<String>,
        /// Compute the domain separator locally from chain id and vault
        #[arg(long)]
        chain_id: Option<u64>,
        #[arg(long)]
        vault: Option<String>,
    },

    /// Show agent ownership verification and reputation
    Agent,
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "pulse_agent=debug".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    let filter = match "pulse_core=debug".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

struct Agent {
    gateway: Arc<VaultGateway>,
    processor: Arc<ScheduleProcessor>,
}

fn build_agent(config: PulseConfig, db: Arc<PulseDb>) -> Agent {
    let gateway = Arc::new(VaultGateway::new(config.gateway));
    let executor = Arc::new(TransferExecutor::new(
        gateway.clone(),
        db,
        Arc::new(SystemClock),
        config.executor,
    ));
    let processor = Arc::new(ScheduleProcessor::new(executor, config.scheduler));
    Agent { gateway, processor }
}

fn open_db(cli_path: Option<&str>) -> Result<Arc<PulseDb>> {
    Ok(Arc::new(PulseDb::open(cli_path)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: .env not loaded: {}", e);
    }
    init_tracing();

    let cli = Cli::parse();
    let db_path = cli.db_path.clone();

    match cli.command {
        Commands::Run => cmd_run(db_path).await,
        Commands::Scan => cmd_scan(db_path).await,
        Commands::Stats => cmd_stats(&*open_db(db_path.as_deref())?),
        Commands::Schedules { user } => cmd_schedules(&*open_db(db_path.as_deref())?, user.as_deref()),
        Commands::Transfers { user } => cmd_transfers(&*open_db(db_path.as_deref())?, user.as_deref()),
        Commands::Cancel { schedule_id } => cmd_cancel(&*open_db(db_path.as_deref())?, &schedule_id),
        Commands::Digest {
            recipient,
            amount,
            nonce,
            deadline,
            domain,
            chain_id,
            vault,
        } => cmd_digest(&recipient, &amount, nonce, deadline, domain, chain_id, vault),
        Commands::Agent => cmd_agent().await,
    }
}

/// Database path precedence: --db-path, then PULSE_DB_PATH from the config.
fn resolve_db(cli_path: Option<String>, config: &PulseConfig) -> Result<Arc<PulseDb>> {
    let path = cli_path.or_else(|| config.db_path.clone());
    open_db(path.as_deref())
}

async fn cmd_run(db_path: Option<String>) -> Result<()> {
    let config = PulseConfig::from_env()?;
    let db = resolve_db(db_path, &config)?;
    let agent = build_agent(config, db);

    agent.gateway.check_chain_id().await?;
    if !agent.gateway.verify_agent_ownership().await {
        warn!("Agent identity could not be verified, transfers may be rejected");
    }

    info!("Starting PulseRemit agent {}", agent.gateway.agent_address());
    agent.processor.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for the current scan to finish");
    agent.processor.stop().await;
    Ok(())
}

async fn cmd_scan(db_path: Option<String>) -> Result<()> {
    let config = PulseConfig::from_env()?;
    let db = resolve_db(db_path, &config)?;
    let agent = build_agent(config, db);

    let report = agent.processor.run_due_scan().await?;
    for outcome in report.outcomes.iter().filter(|o| o.error.is_some()) {
        error!(
            "Schedule {} failed: {}",
            outcome.schedule_id,
            outcome.error.as_deref().unwrap_or_default()
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_stats(db: &PulseDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== PulseRemit Agent Database Stats ===");
    println!("Database: {}", db.path().display());
    println!();
    println!("Intents:   {} total", stats.total_intents);
    for (status, count) in &stats.intent_counts {
        println!("  {:12} {}", status, count);
    }
    println!("Transfers: {} total", stats.total_transfers);
    for (status, count) in &stats.transfer_counts {
        println!("  {:12} {}", status, count);
    }
    println!(
        "Schedules: {} total, {} active",
        stats.total_schedules, stats.active_schedules
    );

    Ok(())
}

fn amount_usd(wei: &str) -> String {
    U256::from_str_radix(wei, 10)
        .map(wei_to_usd)
        .unwrap_or_else(|_| format!("(invalid: {})", wei))
}

fn cmd_schedules(db: &PulseDb, user: Option<&str>) -> Result<()> {
    let schedules = db.list_schedules(user)?;

    if schedules.is_empty() {
        println!("No schedules found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<8}  {:<7}  {:<22}  {:>14}  {}",
        "SCHEDULE ID", "ACTIVE", "FREQ", "NEXT RUN", "AMOUNT (USD)", "RECIPIENT"
    );
    println!("{}", "-".repeat(140));

    for schedule in &schedules {
        println!(
            "{:<36}  {:<8}  {:<7}  {:<22}  {:>14}  {}",
            schedule.id,
            if schedule.is_active { "yes" } else { "no" },
            schedule.frequency.as_str(),
            format_timestamp(schedule.next_run),
            amount_usd(&schedule.amount),
            schedule.recipient
        );
    }

    println!("\nTotal: {} schedules", schedules.len());
    Ok(())
}

fn cmd_transfers(db: &PulseDb, user: Option<&str>) -> Result<()> {
    let transfers = db.list_transfers(user)?;

    if transfers.is_empty() {
        println!("No transfers found.");
        return Ok(());
    }

    println!(
        "{:<66}  {:<9}  {:>10}  {:>14}  {}",
        "TX HASH", "STATUS", "BLOCK", "AMOUNT (USD)", "CREATED AT"
    );
    println!("{}", "-".repeat(130));

    for transfer in &transfers {
        println!(
            "{:<66}  {:<9}  {:>10}  {:>14}  {}",
            transfer.tx_hash,
            transfer.status.as_str(),
            transfer
                .block_number
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".into()),
            amount_usd(&transfer.amount),
            format_timestamp(transfer.created_at)
        );
    }

    println!("\nTotal: {} transfers", transfers.len());
    Ok(())
}

fn cmd_cancel(db: &PulseDb, schedule_id: &str) -> Result<()> {
    if !db.deactivate_schedule(schedule_id)? {
        anyhow::bail!("Schedule not found: {}", schedule_id);
    }
    println!("Schedule {} cancelled", schedule_id);
    Ok(())
}

fn cmd_digest(
    recipient: &str,
    amount: &str,
    nonce: u64,
    deadline: u64,
    domain: Option<String>,
    chain_id: Option<u64>,
    vault: Option<String>,
) -> Result<()> {
    let request = TransferRequest {
        recipient: Address::from_str(recipient)?,
        amount: usd_to_wei(amount)?,
        nonce: U256::from(nonce),
        deadline: U256::from(deadline),
    };

    let separator = match (domain, chain_id, vault) {
        (Some(domain), _, _) => B256::from_str(&domain)?,
        (None, Some(chain_id), Some(vault)) => domain_separator(
            VAULT_DOMAIN_NAME,
            VAULT_DOMAIN_VERSION,
            chain_id,
            Address::from_str(&vault)?,
        ),
        _ => anyhow::bail!("Provide --domain, or both --chain-id and --vault"),
    };

    let output = serde_json::json!({
        "request": request,
        "domainSeparator": separator,
        "structHash": struct_hash(&request),
        "digest": typed_data_digest(&request, &separator),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_agent() -> Result<()> {
    let config = PulseConfig::from_env()?;
    let gateway = VaultGateway::new(config.gateway);

    let verified = gateway.verify_agent_ownership().await;
    let reputation = gateway.agent_reputation().await;

    let output = serde_json::json!({
        "agentId": gateway.agent_id(),
        "agentAddress": gateway.agent_address(),
        "ownershipVerified": verified,
        "reputation": reputation,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
