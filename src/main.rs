//! Risk Gate CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zentinel_risk_gate::store::Outcome;
use zentinel_risk_gate::{Config, Identifiers, RecordOutcome, RiskService};

#[derive(Parser, Debug)]
#[command(name = "zentinel-risk-gate")]
#[command(about = "Risk gate for Zentinel - usage limits, IP reputation and abuse incident recording")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "risk-gate.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up the reputation of an IP address
    Lookup {
        ip: IpAddr,
        /// Bypass the cache
        #[arg(long)]
        force: bool,
    },

    /// Check that the configured API key is accepted
    VerifyKey,

    /// Evaluate usage limits for the given identifiers
    Evaluate {
        #[arg(long)]
        ip: Option<IpAddr>,
        /// Secondary identifier, e.g. a phone number
        #[arg(long)]
        secondary: Option<String>,
    },

    /// Record a completed attempt
    RecordEvent {
        /// Unique id of the attempt
        #[arg(long)]
        attempt: String,
        #[arg(long)]
        ip: Option<IpAddr>,
        #[arg(long)]
        secondary: Option<String>,
        #[arg(long, value_enum, default_value = "success")]
        outcome: Outcome,
    },

    /// Record an abuse incident
    Incident { ip: IpAddr, reason: String },

    /// List recent abuse reports
    Reports {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Mark a pending report as sent
    MarkSent { id: i64 },

    /// Mark a pending report as failed
    MarkFailed { id: i64 },
}

fn identifiers(ip: Option<IpAddr>, secondary: Option<String>) -> Identifiers {
    let mut ids = Identifiers::new();
    if let Some(ip) = ip {
        ids = ids.with_ip(ip.to_string());
    }
    if let Some(secondary) = secondary {
        ids = ids.with_secondary(secondary);
    }
    ids
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(ExitCode::SUCCESS);
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = args.command else {
        anyhow::bail!("no command given; see --help");
    };

    let service = RiskService::new(config).await?;

    match command {
        Command::Lookup { ip, force } => {
            let record = service.lookup(&ip, force).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::VerifyKey => {
            let cache = service
                .reputation()
                .context("reputation lookups are not configured")?;
            let isp = cache.verify_credential().await?;
            println!("API key accepted (test IP 8.8.8.8 -> {})", isp);
        }
        Command::Evaluate { ip, secondary } => {
            let ids = identifiers(ip, secondary);
            if ids.is_empty() {
                anyhow::bail!("at least one of --ip or --secondary is required");
            }
            let decision = service.evaluate(&ids).await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
            if !decision.allowed {
                return Ok(ExitCode::from(2));
            }
        }
        Command::RecordEvent {
            attempt,
            ip,
            secondary,
            outcome,
        } => {
            let ids = identifiers(ip, secondary);
            if ids.is_empty() {
                anyhow::bail!("at least one of --ip or --secondary is required");
            }
            let stored = service.record_attempt(&attempt, &ids, outcome).await?;
            println!("{} event(s) recorded", stored);
        }
        Command::Incident { ip, reason } => {
            match service.incidents().record_incident(&ip, &reason).await? {
                RecordOutcome::Recorded(id) => println!("Recorded report {}", id),
                RecordOutcome::Duplicate => println!("Pending report already exists for {}", ip),
                RecordOutcome::Allowlisted => println!("{} is allowlisted, not recorded", ip),
            }
        }
        Command::Reports { limit } => {
            let reports = service.incidents().recent_reports(limit).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::MarkSent { id } => {
            let report = service.incidents().mark_sent(id).await?;
            println!("Report {} is now {}", report.id, report.status);
        }
        Command::MarkFailed { id } => {
            let report = service.incidents().mark_failed(id).await?;
            println!("Report {} is now {}", report.id, report.status);
        }
    }

    Ok(ExitCode::SUCCESS)
}
