use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use marketflow::application::system::Application;
use marketflow::application::warmup::WarmupService;
use marketflow::config::{Config, parse_markets};
use marketflow::domain::signals::MarketSkew;
use marketflow::infrastructure::fmp::FmpClient;
use marketflow::infrastructure::mock::StaticSkew;
use marketflow::infrastructure::replay::ReplayDriver;
use marketflow::infrastructure::scheduler::TokioScheduler;

#[derive(Debug, Parser)]
#[command(name = "marketflow", about = "Real-time market analysis pipeline")]
struct Args {
    /// Replay a recorded session file instead of polling the vendor.
    #[arg(long)]
    backtest: Option<PathBuf>,

    /// Comma-separated market override, e.g. "^NDX,^GSPC".
    #[arg(long)]
    markets: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::from_env_unchecked();
    if let Some(markets) = &args.markets {
        config.markets = parse_markets(markets);
    }
    if let Some(path) = &args.backtest {
        config.backtest = true;
        config.backtest_file = Some(path.clone());
    }
    config.validate().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!(markets = ?config.markets, backtest = config.backtest, "starting marketflow");

    let client = Arc::new(FmpClient::new(
        config.fmp_base_url.clone(),
        config.fmp_api_key.clone(),
    )?);
    // The position manager runs out of process; until it reports, the
    // pipeline assumes no exposure.
    let skew_provider = Arc::new(StaticSkew(MarketSkew::Neutral));
    let scheduler = Arc::new(TokioScheduler::new());

    let mut app =
        Application::build(&config, client.clone(), skew_provider, scheduler.clone()).await?;

    // Stand-in position manager: log every proposal.
    if let Some(mut entries) = app.take_entry_feed() {
        tokio::spawn(async move {
            while let Some(signal) = entries.recv().await {
                info!(
                    market = %signal.market,
                    direction = %signal.direction,
                    price = signal.price,
                    confluence = signal.confluence,
                    reasons = ?signal.reasons,
                    "entry proposed"
                );
            }
        });
    }
    if let Some(mut exits) = app.take_exit_feed() {
        tokio::spawn(async move {
            while let Some(signal) = exits.recv().await {
                info!(
                    market = %signal.market,
                    direction = %signal.direction,
                    price = signal.price,
                    reasons = ?signal.reasons,
                    "exit proposed"
                );
            }
        });
    }

    if config.backtest {
        let path = config
            .backtest_file
            .as_ref()
            .expect("validated backtest file");
        let driver = ReplayDriver::new(app.dispatcher());
        match driver.run_file(path).await {
            Ok(summary) => info!(
                delivered = summary.candles_delivered,
                signals = summary.catch_up_signals,
                "replay complete"
            ),
            Err(e) => error!("replay failed: {e:#}"),
        }
    } else {
        let warmup = WarmupService::new(client.clone(), app.dispatcher());
        let now = chrono::Utc::now().with_timezone(&chrono_tz::America::New_York);
        if let Err(e) = warmup.warm_up(&config.markets, now).await {
            error!("warmup failed: {e:#}");
        }

        tokio::signal::ctrl_c()
            .await
            .context("listening for shutdown")?;
        info!("interrupt received");
    }

    // Stop the job ticks first so no new catch-up signals are produced,
    // then drain the pipeline; both waits join their spawned tasks.
    scheduler.shutdown().await;
    app.shutdown().await;
    Ok(())
}
