//! CAPM Bot - Main Entry Point
//!
//! Replays recorded quotes through the bot against the paper venue.

use anyhow::{Context, Result};
use capm_bot::config::Config;
use capm_bot::replay::{CsvQuoteLoader, ReplayConfig, ReplayRunner};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// CAPM Bot CLI
#[derive(Parser)]
#[command(name = "capm-bot")]
#[command(version, about = "CAPM portfolio optimizer with closing-window market making")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded quotes against the paper venue
    Replay {
        /// Path to CSV quote file (timestamp,security,bid,ask,last)
        #[arg(short, long)]
        data: String,

        /// Starting cash
        #[arg(short, long, default_value = "10000")]
        cash: Decimal,

        /// Session length in minutes from the first quote
        #[arg(short, long, default_value = "20")]
        session_minutes: i64,

        /// Seconds between ticks (defaults to bot.tick_interval_secs)
        #[arg(short, long)]
        tick_secs: Option<u64>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,

        /// Include every tick report in the JSON output
        #[arg(long, requires = "json")]
        reports: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Commands::Replay {
            data,
            cash,
            session_minutes,
            tick_secs,
            json,
            reports,
        } => {
            let tick_secs = tick_secs.unwrap_or(config.bot.tick_interval_secs);
            let replay = ReplayConfig {
                initial_cash: cash,
                session_minutes,
                tick_secs: i64::try_from(tick_secs).context("tick_secs too large")?,
                keep_reports: reports,
            };
            run_replay(&data, config, replay, json).await
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Run a replay and print its summary.
async fn run_replay(data_path: &str, config: Config, replay: ReplayConfig, json: bool) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║              CAPM Bot v{} - REPLAY MODE                 ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    info!("📊 Loading quotes from: {}", data_path);
    let loader = CsvQuoteLoader::new(data_path)?;

    if let Some((start, end)) = loader.available_range() {
        info!(
            "   Data range: {} to {}",
            start.format("%Y-%m-%d %H:%M:%S"),
            end.format("%Y-%m-%d %H:%M:%S")
        );
    }
    info!("   Securities: {}", loader.securities().len());
    info!("   Snapshots: {}", loader.len());

    log_config(&config);

    let summary = ReplayRunner::new(loader, config, replay).run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("\n{}", summary.summary());
    }

    Ok(())
}

/// Initialize logging to stderr and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "capm-bot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("capm_bot=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stderr.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Risk Aversion: {}", config.optimizer.risk_aversion);
    info!(
        "   History Window: {} (min {})",
        config.optimizer.history_window, config.optimizer.min_observations
    );
    info!("   Materiality: {:?}", config.decision.materiality);
    info!("   Cooldown: {}s", config.decision.cooldown_secs);
    info!(
        "   Closing Window: {}s",
        config.decision.closing_window_secs
    );
    info!(
        "   Half Spread: {}%",
        config.quoting.half_spread_pct * Decimal::ONE_HUNDRED
    );
    info!(
        "   Max Inventory: {} units",
        config.quoting.max_inventory_units
    );
    info!("   Tick Size: {}", config.venue.tick_size);
}
