use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use threadsync::config::LoggingConfig;
use threadsync::health::CheckResult;
use threadsync::{
    timestamp, token, Config, HealthCheck, JsonBackup, SyncManager, SyncOutcome, ThreadsClient,
    ThreadsDb, TokenConfig,
};

#[derive(Parser)]
#[command(name = "threadsync")]
#[command(about = "Archive Threads posts and replies into a local SQLite database")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write default settings and a token file template
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Refresh the token, sync new posts and replies, then export to CSV
    Run {
        /// Skip the JSON backup of newly fetched posts
        #[arg(long)]
        no_backup: bool,
    },

    /// Run a single sync mode
    Sync {
        #[command(subcommand)]
        mode: SyncCommands,
    },

    /// Export posts not yet exported to a CSV file
    Export,

    /// Inspect or refresh the access token
    Token {
        #[command(subcommand)]
        token_command: TokenCommands,
    },

    /// Show recent sync runs
    Log {
        /// Number of runs to show
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },

    /// Check the token file, database and output directory
    Doctor,
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Import the whole post history
    Full(BackupArgs),

    /// Fetch posts newer than the latest archived one
    Incremental(BackupArgs),

    /// Fetch posts published between two times
    Range {
        /// Start (Unix seconds, 2024-07-01T00:00:00+0000, or 2024-07-01)
        #[arg(long)]
        since: String,

        /// End (same formats as --since)
        #[arg(long)]
        until: String,

        #[command(flatten)]
        backup: BackupArgs,
    },

    /// Fetch conversations for posts that have none yet
    Replies,
}

#[derive(Args)]
struct BackupArgs {
    /// Write a JSON backup of fetched posts
    #[arg(long, conflicts_with = "no_backup")]
    backup: bool,

    /// Do not write a JSON backup
    #[arg(long)]
    no_backup: bool,
}

impl BackupArgs {
    fn resolve(&self, default: bool) -> bool {
        if self.backup {
            true
        } else if self.no_backup {
            false
        } else {
            default
        }
    }
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Show token expiry
    Status,

    /// Refresh the token if it is close to expiry
    Refresh {
        /// Refresh even when the token is not close to expiry
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        init_logging(cli.verbose, &LoggingConfig::default())?;
        cmd_init(cli.config, force)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(cli.config)?;
    init_logging(cli.verbose, &config.logging)?;
    info!("Starting threadsync v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Init { .. } => bail!("init is handled before configuration is loaded"),
        Commands::Run { no_backup } => cmd_run(!no_backup && config.sync.backup, &config).await,
        Commands::Sync { mode } => cmd_sync(mode, &config).await,
        Commands::Export => cmd_export(&config).map(|()| ExitCode::SUCCESS),
        Commands::Token { token_command } => cmd_token(token_command, &config)
            .await
            .map(|()| ExitCode::SUCCESS),
        Commands::Log { limit } => cmd_log(limit, &config).map(|()| ExitCode::SUCCESS),
        Commands::Doctor => cmd_doctor(&config),
    }
}

/// Initialize logging
///
/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
/// Logs go to stderr so command output on stdout stays clean.
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("Invalid log level: {}", default_level))?,
    };

    let layer = fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format.as_str() {
        "full" => registry.with(layer).init(),
        "pretty" => registry.with(layer.pretty()).init(),
        _ => registry.with(layer.compact()).init(),
    }

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) if !path.exists() => bail!(
            "Config file {} not found. Run: threadsync init --config {}",
            path.display(),
            path.display()
        ),
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Write default settings and a token template
fn cmd_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    let mut config = if config_path.exists() && !force {
        println!("⚠️  Keeping existing configuration (use --force to overwrite)");
        Config::load(&config_path)?
    } else {
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let config = Config::default();
        config.save(&config_path)?;
        info!("Configuration saved to: {:?}", config_path);
        config
    };
    config.expand_paths()?;

    let token_path = config.token_file_path();
    if !token_path.exists() {
        TokenConfig::new("", 0).save(&token_path)?;
        println!("📝 Token template written to {}", token_path.display());
    }

    println!("✅ threadsync initialized");
    println!("   Config: {}", config_path.display());
    println!("   Token file: {}", token_path.display());
    println!("   Database: {}", config.database_path().display());
    println!("   Output: {}", config.output_dir().display());
    println!("   Next: put your long-lived access token in the token file, then run 'threadsync run'");

    Ok(())
}

/// Load the token, refresh it when close to expiry, and build an authenticated client
async fn authorized_client(config: &Config) -> Result<ThreadsClient> {
    let token_path = config.token_file_path();
    let current = TokenConfig::load(&token_path)?;
    let client = ThreadsClient::new(&config.api, current.access_token()?)?;

    let token = match token::refresh_if_needed(
        &client,
        &current,
        config.token.refresh_threshold_days,
        Utc::now(),
    )
    .await?
    {
        Some(updated) => {
            updated.save(&token_path)?;
            updated
        }
        None => current,
    };

    Ok(client.with_token(token.access_token()?))
}

fn open_manager(config: &Config, client: ThreadsClient) -> Result<SyncManager<ThreadsClient>> {
    let db = ThreadsDb::open_at(&config.database_path())?;
    let backup = JsonBackup::new(config.output_dir());
    Ok(SyncManager::new(client, db, Some(backup)))
}

fn print_outcome(outcome: &SyncOutcome) {
    let icon = if outcome.success { "✅" } else { "❌" };
    println!(
        "{} {} sync: success={}, count={} ({:.2}s)",
        icon,
        outcome.mode,
        outcome.success,
        outcome.count,
        outcome.duration.as_secs_f64()
    );
}

/// The default flow: incremental posts, replies, CSV export
async fn cmd_run(backup: bool, config: &Config) -> Result<ExitCode> {
    let client = authorized_client(config).await?;
    let sync = open_manager(config, client)?;

    let posts = sync.incremental_sync(backup).await?;
    print_outcome(&posts);

    let replies = sync.sync_replies().await?;
    print_outcome(&replies);

    match sync.db().export_to_csv(&config.output_dir())? {
        Some(path) => println!("📄 CSV written: {}", path.display()),
        None => println!("📄 No new posts to export"),
    }

    Ok(exit_code(posts.success && replies.success))
}

/// Run one sync mode
async fn cmd_sync(mode: SyncCommands, config: &Config) -> Result<ExitCode> {
    // Reject bad bounds before touching the token
    let range = match &mode {
        SyncCommands::Range { since, until, .. } => {
            let since = timestamp::parse_time_bound(since)?;
            let until = timestamp::parse_time_bound(until)?;
            if since > until {
                bail!("--since must not be later than --until");
            }
            Some((since, until))
        }
        _ => None,
    };

    let client = authorized_client(config).await?;
    let sync = open_manager(config, client)?;
    let default_backup = config.sync.backup;

    let outcome = match mode {
        SyncCommands::Full(args) => sync.initial_sync(args.resolve(default_backup)).await?,
        SyncCommands::Incremental(args) => {
            sync.incremental_sync(args.resolve(default_backup)).await?
        }
        SyncCommands::Range { backup, .. } => {
            let (since, until) = range.unzip();
            sync.sync_time_range(since, until, backup.resolve(default_backup))
                .await?
        }
        SyncCommands::Replies => sync.sync_replies().await?,
    };

    print_outcome(&outcome);

    Ok(exit_code(outcome.success))
}

fn cmd_export(config: &Config) -> Result<()> {
    let db = ThreadsDb::open_at(&config.database_path())?;

    match db.export_to_csv(&config.output_dir())? {
        Some(path) => println!("📄 CSV written: {}", path.display()),
        None => println!("📄 No new posts to export"),
    }

    Ok(())
}

async fn cmd_token(token_command: TokenCommands, config: &Config) -> Result<()> {
    let token_path = config.token_file_path();
    let current = TokenConfig::load(&token_path)?;
    let now = Utc::now();

    match token_command {
        TokenCommands::Status => {
            println!("🔑 Token file: {}", token_path.display());
            print_token_expiry(&current, config.token.refresh_threshold_days, now);
        }

        TokenCommands::Refresh { force } => {
            let client = ThreadsClient::new(&config.api, current.access_token()?)?;
            let refreshed = if force {
                Some(token::refresh_now(&client, &current, now).await?)
            } else {
                token::refresh_if_needed(&client, &current, config.token.refresh_threshold_days, now)
                    .await?
            };

            match refreshed {
                Some(updated) => {
                    updated.save(&token_path)?;
                    println!("✅ Token refreshed");
                    print_token_expiry(&updated, config.token.refresh_threshold_days, now);
                }
                None => {
                    println!("✅ Token not near expiry, nothing to do (use --force to refresh anyway)");
                    print_token_expiry(&current, config.token.refresh_threshold_days, now);
                }
            }
        }
    }

    Ok(())
}

fn print_token_expiry(token: &TokenConfig, threshold_days: i64, now: DateTime<Utc>) {
    match (token.expires_at_datetime(), token.remaining(now)) {
        (Some(expires), Some(remaining)) => {
            println!("   Expires: {}", expires.to_rfc3339());
            if token.is_expired(now) {
                println!("   ❌ Expired");
            } else if token.is_near_expiry(threshold_days, now) {
                println!("   ⚠️  {} days remaining (refresh due)", remaining.num_days());
            } else {
                println!("   ✅ {} days remaining", remaining.num_days());
            }
        }
        _ => println!("   ⚠️  Expiry not recorded"),
    }
}

fn cmd_log(limit: u32, config: &Config) -> Result<()> {
    let db = ThreadsDb::open_at(&config.database_path())?;
    let logs = db.recent_sync_logs(limit)?;

    if logs.is_empty() {
        println!("No sync runs recorded yet");
        return Ok(());
    }

    println!("📊 Recent sync runs ({}):", logs.len());
    for entry in logs {
        let icon = if entry.success { "✅" } else { "❌" };
        let seconds = (entry.end_time - entry.start_time).num_milliseconds() as f64 / 1000.0;
        println!(
            "   {} #{} {} count={}{} ({:.2}s)",
            icon,
            entry.id.unwrap_or_default(),
            entry.start_time.format("%Y-%m-%d %H:%M:%S"),
            entry.count,
            if entry.initial { " initial" } else { "" },
            seconds
        );
    }

    Ok(())
}

/// System health check and diagnostics
fn cmd_doctor(config: &Config) -> Result<ExitCode> {
    let health = HealthCheck::run(config, Utc::now());
    print_health_report(&health);

    if !health.all_passed() {
        warn!("{} checks failed", health.errors().len());
    }

    Ok(exit_code(health.all_passed()))
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 threadsync diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    let warnings = health.warnings().len();
    if health.all_passed() && warnings > 0 {
        println!("✅ All checks passed ({} warnings)", warnings);
    } else if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
