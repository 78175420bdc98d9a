use anyhow::{Context, Result};
use clap::Parser;
use orderbot::api::{Credentials, KrakenClient};
use orderbot::backtest::{MilestoneWalk, SimulatedGateway};
use orderbot::display;
use orderbot::execution::{
    ensure_online, Confirmation, ConsolePrompt, LiveGateway, OrderGateway, PollSchedule,
    Scheduler, DEFAULT_GRACE_WINDOW,
};
use orderbot::{BotError, Operation, Settings};
use rust_decimal::Decimal;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Manage stop-loss and take-profit orders for one Kraken pair
#[derive(Parser, Debug)]
#[command(name = "orderbot", version, about)]
struct Cli {
    /// Operation file describing the orders to manage
    #[arg(short, long, default_value = "operation.json")]
    config: PathBuf,

    /// File every handled event and error is appended to
    #[arg(long, default_value = "log.txt")]
    log_file: PathBuf,

    /// Submit orders without asking for confirmation
    #[arg(short, long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let started_at = Instant::now();
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let guard = setup_logging(&cli.log_file)?;

    println!("{}\n", display::credits());

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let mut operation = settings.operation();

    let confirmation = if cli.yes {
        Confirmation::unattended()
    } else {
        Confirmation::new(started_at, DEFAULT_GRACE_WINDOW, Box::new(ConsolePrompt))
    };
    let mut gateway = build_gateway(&settings, &mut operation, confirmation)?;

    match run(&settings, &mut operation, gateway.as_mut()).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_fatal() => {
            tracing::warn!("{}, exiting", err);
            drop(guard);
            std::process::exit(err.exit_code());
        }
        Err(err) => {
            tracing::error!("❌ {}", err);
            Err(err.into())
        }
    }
}

async fn run(
    settings: &Settings,
    operation: &mut Operation,
    gateway: &mut dyn OrderGateway,
) -> orderbot::Result<()> {
    operation.wait_for_start_price(gateway, settings.interval).await?;
    operation.setup_orders(gateway).await?;

    println!(
        "{}\n",
        display::header(&settings.pair, operation, settings.use_market_price, gateway.is_simulated())
    );

    if !gateway.is_simulated() {
        ensure_online(gateway).await?;
    }

    tracing::info!(
        "🚀 Managing {} on {} every {}s",
        operation.strategy().name(),
        settings.pair,
        settings.interval.as_secs()
    );
    Scheduler::new(PollSchedule::new(settings.interval))
        .run(operation, gateway)
        .await
}

fn build_gateway(
    settings: &Settings,
    operation: &mut Operation,
    confirmation: Confirmation,
) -> Result<Box<dyn OrderGateway>> {
    if let Some(simulation) = &settings.simulation {
        let walk = MilestoneWalk::new(simulation.milestones.clone())
            .context("simulation needs at least two milestones")?;
        let mut gateway =
            SimulatedGateway::new(settings.pair.clone(), walk).with_confirmation(confirmation);

        // an existing stop-loss referenced by id only exists in the simulated book if described
        let stop_loss = operation.stop_loss_mut();
        if stop_loss.is_placed && stop_loss.price > Decimal::ZERO && stop_loss.volume > Decimal::ZERO {
            gateway.seed_order(stop_loss);
        }

        tracing::info!("Running against the simulator");
        return Ok(Box::new(gateway));
    }

    let credentials = Credentials::from_env().ok_or(BotError::MissingCredentials)?;
    let client = KrakenClient::new(Some(credentials), settings.timeout)?;
    Ok(Box::new(LiveGateway::new(
        client,
        settings.pair.clone(),
        settings.use_market_price,
        PollSchedule::new(settings.interval).refresh_interval(),
        settings.cooldowns.rate_limit,
        confirmation,
    )))
}

fn setup_logging(log_file: &Path) -> Result<WorkerGuard> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "orderbot=info".to_string());

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let console_layer = fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(&filter));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(EnvFilter::new(&filter));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
