use anyhow::Context;
use clap::Parser;
use cyclebot::api::{BinanceClient, ScriptedPriceSource};
use cyclebot::config::Settings;
use cyclebot::execution::{
    CachedPriceSource, PollingLoop, PriceSource, RunReport, RunSnapshot, SimulationSession,
};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Paper-trade one buy -> sell -> rebuy cycle against a live price. No
/// orders are ever placed.
#[derive(Parser, Debug)]
#[command(name = "cyclebot", version)]
struct Cli {
    /// Settings file (TOML). Defaults to ./cyclebot.toml when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Amount spent on the simulated buy
    #[arg(long)]
    capital: Option<Decimal>,

    /// Rise over the entry price that triggers the sell (0.02 = +2%)
    #[arg(long)]
    sell_target_pct: Option<Decimal>,

    /// Fall from the sell target that triggers the rebuy (0.03 = -3%)
    #[arg(long)]
    rebuy_drop_pct: Option<Decimal>,

    /// Trading pair, e.g. ADAUSDT
    #[arg(long)]
    symbol: Option<String>,

    /// Seconds between price reads
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Reuse a price read for this many seconds (0 disables the cache). Must be
    /// shorter than the poll interval
    #[arg(long)]
    cache_ttl_secs: Option<u64>,

    /// Replay these prices instead of polling Binance, e.g. "0.50,0.49,-,0.51"
    /// where "-" is a failed read
    #[arg(long)]
    script: Option<String>,

    /// Print the final run snapshot as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    tracing::info!("🚀 CycleBot starting (simulation only, no orders are placed)");
    tracing::info!("📊 Configuration:");
    tracing::info!("  Symbol: {}", settings.strategy.symbol);
    tracing::info!("  Capital: {}", settings.strategy.capital);
    tracing::info!(
        "  Sell target: +{}%",
        settings.strategy.sell_target_pct * Decimal::ONE_HUNDRED
    );
    tracing::info!(
        "  Rebuy drop: -{}%",
        settings.strategy.rebuy_drop_pct * Decimal::ONE_HUNDRED
    );
    tracing::info!("  Poll interval: {}s", settings.polling.interval_secs);

    match &cli.script {
        Some(script) => {
            let source = ScriptedPriceSource::parse(script).context("invalid --script")?;
            simulate(&settings, source, cli.json).await
        }
        None => {
            let client = BinanceClient::new(&settings.feed)?;
            let ttl = settings.feed.cache_ttl_secs;
            if ttl == 0 {
                simulate(&settings, client, cli.json).await
            } else {
                let cached = CachedPriceSource::new(client, Duration::from_secs(ttl));
                simulate(&settings, cached, cli.json).await
            }
        }
    }
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cyclebot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    if let Some(capital) = cli.capital {
        settings.strategy.capital = capital;
    }
    if let Some(pct) = cli.sell_target_pct {
        settings.strategy.sell_target_pct = pct;
    }
    if let Some(pct) = cli.rebuy_drop_pct {
        settings.strategy.rebuy_drop_pct = pct;
    }
    if let Some(symbol) = &cli.symbol {
        settings.strategy.symbol = symbol.to_uppercase();
    }
    if let Some(secs) = cli.interval_secs {
        settings.polling.interval_secs = secs;
    }
    if let Some(secs) = cli.cache_ttl_secs {
        settings.feed.cache_ttl_secs = secs;
    }

    settings.validate().context("invalid settings")?;
    Ok(settings)
}

async fn simulate<S: PriceSource + 'static>(
    settings: &Settings,
    source: S,
    as_json: bool,
) -> anyhow::Result<()> {
    tracing::info!("  Price source: {}", source.name());

    let session = Arc::new(SimulationSession::new(
        settings.strategy.clone(),
        source,
        PollingLoop::new(settings.polling.interval()),
    )?);

    let handle = session.start().await.context("could not start the cycle")?;

    let ctrl_c = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("⚠️  Received Ctrl+C, stopping...");
                session.stop();
            }
        })
    };

    let report = handle.await.context("polling task panicked")?;
    ctrl_c.abort();

    let snapshot = session.snapshot();
    print_summary(&snapshot, &report);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    tracing::info!("👋 CycleBot stopped");
    Ok(())
}

fn print_summary(snapshot: &RunSnapshot, report: &RunReport) {
    println!("\n═══════════════════════════════════════════════════════");
    println!("  {} cycle: {} ({:?})", snapshot.symbol, snapshot.phase, report.outcome);
    println!("═══════════════════════════════════════════════════════");

    if let Some(cycle) = &snapshot.cycle {
        println!("  Quantity     : {}", cycle.quantity);
        println!("  Entry        : {}", cycle.entry_price);
        println!("  Sell target  : {}", cycle.sell_target);
        println!("  Rebuy target : {}", cycle.rebuy_target);
    }
    if let Some(price) = snapshot.current_price {
        println!("  Last price   : {}", price);
    }
    println!(
        "  Reads        : {} ({} unavailable, {} logged)",
        report.ticks,
        report.missed_ticks,
        snapshot.price_log.len()
    );

    println!("\n  Time       Action  Price");
    if snapshot.event_log.is_empty() {
        println!("  (no simulated trades)");
    }
    for event in snapshot.event_log.events() {
        println!(
            "  {}   {:<6}  {}",
            event.timestamp.format("%H:%M:%S"),
            event.kind.to_string(),
            event.price
        );
    }
    println!();
}
