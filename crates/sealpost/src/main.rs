use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use sealpost_core::{
    config::Config,
    cron::DailyTrigger,
    domain::LetterId,
    ports::{DeliveryLog, LetterStore, Transports},
    scheduler::DeliveryScheduler,
};
use sealpost_email::{EmailSettings, ResendTransport};
use sealpost_sqlite::SqliteStore;
use sealpost_telegram::{TelegramSettings, TelegramTransport};

#[derive(Parser)]
#[command(name = "sealpost", version, about = "Letters to your future self, delivered on the day")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daily delivery trigger until Ctrl-C.
    Serve {
        /// Also run the Telegram link bot.
        #[arg(long)]
        with_bot: bool,
    },
    /// Run one delivery sweep now and print the report.
    Run {
        /// Delivery date (YYYY-MM-DD). Defaults to today, local time.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print letter and delivery-attempt counts.
    Stats,
    /// Print the delivery log for one letter.
    Attempts { letter_id: String },
}

#[tokio::main]
async fn main() -> Result<(), sealpost_core::Error> {
    sealpost_core::logging::init("sealpost")?;

    let cli = Cli::parse();
    let cfg = Config::load()?;
    let store = Arc::new(SqliteStore::open(&cfg.database_path).await?);

    match cli.command {
        Command::Serve { with_bot } => serve(&cfg, store, with_bot).await,
        Command::Run { date } => {
            let scheduler = build_scheduler(&cfg, store)?;
            let today = date.unwrap_or_else(|| Local::now().date_naive());
            let report = scheduler.run_daily_delivery(today).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Stats => {
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Attempts { letter_id } => {
            let attempts = store.attempts_for(&LetterId(letter_id)).await?;
            println!("{}", serde_json::to_string_pretty(&attempts)?);
            Ok(())
        }
    }
}

fn build_scheduler(
    cfg: &Config,
    store: Arc<SqliteStore>,
) -> Result<DeliveryScheduler, sealpost_core::Error> {
    let email = Arc::new(ResendTransport::new(EmailSettings::from(cfg))?);
    let telegram = Arc::new(TelegramTransport::new(TelegramSettings::from(cfg))?);

    if cfg.resend_api_key.is_none() || cfg.email_from.is_none() {
        tracing::warn!("email is not configured; email letters will fail until it is");
    }
    if cfg.telegram_bot_token.is_none() {
        tracing::warn!("telegram is not configured; telegram letters will fail until it is");
    }

    Ok(DeliveryScheduler::new(
        store.clone(),
        store,
        Transports::new(email, telegram)?,
    ))
}

async fn serve(
    cfg: &Config,
    store: Arc<SqliteStore>,
    with_bot: bool,
) -> Result<(), sealpost_core::Error> {
    let scheduler = build_scheduler(cfg, store)?;
    let trigger = DailyTrigger::new(&cfg.delivery_cron, scheduler)?;
    trigger.start().await;

    let cancel = CancellationToken::new();
    let bot = match (with_bot, cfg.telegram_bot_token.clone()) {
        (true, Some(token)) => {
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = sealpost_telegram::bot::run_polling(token, cancel).await {
                    tracing::error!("link bot failed: {e:#}");
                }
            }))
        }
        (true, None) => {
            tracing::warn!("--with-bot given but TELEGRAM_BOT_TOKEN is not set; bot disabled");
            None
        }
        (false, _) => None,
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    trigger.stop().await;
    cancel.cancel();
    if let Some(handle) = bot {
        handle
            .await
            .map_err(|e| sealpost_core::Error::External(format!("link bot task failed: {e}")))?;
    }
    Ok(())
}
