use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use warden::{ProcessRequest, Warden, WardenConfig, WardenError};
use warden_core::{ActionType, ActorId, Clock, Location, ManualClock, Timestamp};
use warden_geofence::AccessRequest;

/// Warden: spatial access control and usage throttling for shared worlds
#[derive(Parser, Debug)]
#[command(name = "warden", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Load and validate the configuration, then summarize it
    CheckConfig,

    /// Evaluate one action at a location against the configured regions
    Query {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        action: String,
        #[arg(long, allow_hyphen_values = true)]
        x: f64,
        #[arg(long, allow_hyphen_values = true)]
        y: f64,
        #[arg(long, allow_hyphen_values = true)]
        z: f64,
        #[arg(long)]
        world: Option<String>,
    },

    /// Replay a burst of actions against the configured rate limits on a
    /// simulated clock
    Simulate {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        action: String,
        #[arg(long, default_value = "20")]
        count: u32,
        /// Simulated gap between actions
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Run a JSON-encoded request through the full pipeline
    Process {
        /// Request as JSON; read from stdin when omitted
        #[arg(long)]
        request: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("warden=debug,warden_geofence=debug,warden_throttle=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(path: Option<&PathBuf>) -> PathBuf {
    path.cloned().unwrap_or_else(WardenConfig::default_config_path)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), WardenError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), WardenError> {
    let path = config_path(cli.config.as_ref());
    match cli.command {
        Commands::Init { force } => cmd_init(&path, force),
        Commands::CheckConfig => cmd_check_config(&path),
        Commands::Query {
            actor,
            action,
            x,
            y,
            z,
            world,
        } => {
            let mut location = Location::new(x, y, z);
            if let Some(world) = world {
                location = location.in_world(world);
            }
            cmd_query(&path, AccessRequest::new(actor, action, location))
        }
        Commands::Simulate {
            actor,
            action,
            count,
            interval_ms,
        } => cmd_simulate(&path, &actor, &action, count, interval_ms),
        Commands::Process { request } => cmd_process(&path, request).await,
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<(), WardenError> {
    if path.exists() && !force {
        return Err(WardenError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    WardenConfig::default().save(path)?;
    info!(path = %path.display(), "default configuration written");
    println!("Config written to {}", path.display());
    Ok(())
}

fn cmd_check_config(path: &Path) -> Result<(), WardenError> {
    let config = WardenConfig::load(path)?;
    let warden = Warden::new(config)?;
    let stats = warden.index_stats()?;

    println!("Configuration OK: {}", path.display());
    println!("  Cell size:     {}", warden.config().index.cell_size);
    println!("  Regions:       {} ({} cells)", stats.regions, stats.buckets);
    println!("  Rate limits:   {}", warden.config().rate_limits.len());
    for policy in &warden.config().rate_limits {
        println!(
            "    {:<12} {} per {} ms{}",
            policy.action_type.as_str(),
            policy.limit,
            policy.window_ms,
            if policy.adaptive { " (adaptive)" } else { "" }
        );
    }
    println!(
        "  Collaborator timeout: {} ms",
        warden.config().pipeline.collaborator_timeout_ms
    );
    Ok(())
}

fn cmd_query(path: &Path, request: AccessRequest) -> Result<(), WardenError> {
    let warden = Warden::new(WardenConfig::load(path)?)?;
    let query = warden.query_access(&request)?;
    print_json(&query)
}

fn cmd_simulate(
    path: &Path,
    actor: &str,
    action: &str,
    count: u32,
    interval_ms: u64,
) -> Result<(), WardenError> {
    let config = WardenConfig::load(path)?;
    let clock = Arc::new(ManualClock::new(Timestamp::from_seconds(0)));
    let warden = Warden::builder(config).clock(clock.clone()).build()?;
    let actor = ActorId::new(actor);
    let action = ActionType::new(action);

    if warden.policy(&action)?.is_none() {
        println!("No rate limit configured for '{}'; every action is allowed.", action);
    }
    for i in 0..count {
        let decision = warden.record_usage(&actor, &action)?;
        println!(
            "{}",
            serde_json::json!({
                "step": i + 1,
                "at_ms": clock.now().millis_since_epoch,
                "decision": decision,
            })
        );
        clock.advance(interval_ms);
    }
    Ok(())
}

async fn cmd_process(path: &Path, request: Option<String>) -> Result<(), WardenError> {
    let raw = match request {
        Some(raw) => raw,
        None => std::io::read_to_string(std::io::stdin())?,
    };
    let request: ProcessRequest = serde_json::from_str(&raw)?;
    let warden = Warden::new(WardenConfig::load(path)?)?;
    let outcome = warden.process(request).await;
    print_json(&outcome)
}
