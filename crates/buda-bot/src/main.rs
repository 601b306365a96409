//! Buda execution bot CLI.
//!
//! Usage:
//!   buda-bot buy <CURRENCY> <AMOUNT>    Spend AMOUNT CLP buying CURRENCY
//!   buda-bot sell <CURRENCY> <AMOUNT>   Sell AMOUNT of CURRENCY for CLP
//!   buda-bot balance <CURRENCY>         Show one balance
//!   buda-bot orderbook [MARKET]         Show top of the order book

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use buda_common::{MarketSpec, Side, format_clp, format_crypto};

use buda_bot::{
    BotConfig, BudaClient, Credentials, ExchangeApi, PricingStrategy, ShutdownToken, TradingBot,
};

#[derive(Parser, Debug)]
#[command(name = "buda-bot")]
#[command(about = "Buda.com execution bot - maintain a best-positioned limit order")]
#[command(version)]
struct Args {
    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Place and maintain a buy order until the CLP target is spent
    Buy {
        /// Currency to buy (btc or usdc)
        currency: String,
        /// Amount of CLP to spend
        amount: Decimal,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Place and maintain a sell order until the crypto amount is sold
    Sell {
        /// Currency to sell (btc or usdc)
        currency: String,
        /// Amount of crypto to sell
        amount: Decimal,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Check an account balance
    Balance {
        /// Currency to check (e.g. clp, btc)
        currency: String,
    },
    /// Show the top of the order book
    Orderbook {
        /// Market to show
        #[arg(default_value = "btc-clp")]
        market: String,
    },
}

#[derive(clap::Args, Debug)]
struct RunOpts {
    /// Monitoring interval in seconds
    #[arg(short, long, default_value_t = 30)]
    interval: u64,

    /// Simulate without placing real orders
    #[arg(short, long)]
    dry_run: bool,

    /// Pricing strategy: top or depth
    #[arg(short, long, default_value = "top")]
    strategy: PricingStrategy,

    /// Fraction of side volume for the depth strategy, in (0, 1]
    #[arg(long, default_value = "0.9")]
    depth_ratio: Decimal,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: failed to load .env file: {e}");
        }
    }

    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    let credentials = Credentials::from_env()
        .context("missing API credentials; create a .env file with BUDA_API_KEY and BUDA_API_SECRET")?;
    let client = Arc::new(BudaClient::new(credentials));

    match args.command {
        Command::Buy {
            currency,
            amount,
            opts,
        } => run_order(client, Side::Buy, &currency, amount, opts).await,
        Command::Sell {
            currency,
            amount,
            opts,
        } => run_order(client, Side::Sell, &currency, amount, opts).await,
        Command::Balance { currency } => show_balance(client, &currency).await,
        Command::Orderbook { market } => show_orderbook(client, &market).await,
    }
}

async fn run_order(
    client: Arc<BudaClient>,
    side: Side,
    currency: &str,
    amount: Decimal,
    opts: RunOpts,
) -> Result<()> {
    if amount <= Decimal::ZERO {
        bail!("amount must be positive");
    }

    let market_id = format!("{}-clp", currency.to_lowercase());
    let Some(market) = MarketSpec::for_market(&market_id) else {
        bail!("unsupported market {market_id}; supported: btc-clp, usdc-clp");
    };

    let config = BotConfig::new(market)
        .with_strategy(opts.strategy)
        .with_depth_ratio(opts.depth_ratio)
        .context("invalid depth ratio")?
        .with_interval(Duration::from_secs(opts.interval))
        .with_dry_run(opts.dry_run);

    if opts.dry_run {
        warn!("dry-run mode: no orders will be placed");
    }

    let shutdown = ShutdownToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown().await {
            error!(error = %e, "shutdown signal handler error");
        }
        info!("shutdown requested");
        signal_token.trigger();
    });

    let mut bot = TradingBot::new(client, config, shutdown);
    let summary = match side {
        Side::Buy => bot.execute_buy(amount).await?,
        Side::Sell => bot.execute_sell(amount).await?,
    };

    if summary.remaining > Decimal::ZERO {
        warn!(remaining = %summary.remaining, "run ended with an unexecuted remainder");
    }
    Ok(())
}

async fn show_balance(client: Arc<BudaClient>, currency: &str) -> Result<()> {
    let balance = client.get_balance(currency).await?;
    let render = |amount: Decimal| {
        if balance.currency == "clp" {
            format_clp(amount)
        } else {
            format_crypto(amount, &balance.currency)
        }
    };
    println!("Balance for {}:", balance.currency.to_uppercase());
    println!("  Available: {}", render(balance.available));
    println!("  Frozen:    {}", render(balance.frozen));
    Ok(())
}

async fn show_orderbook(client: Arc<BudaClient>, market_id: &str) -> Result<()> {
    let market_id = market_id.to_lowercase();
    let book = client.get_order_book(&market_id).await?;

    println!("Order book for {}:", market_id.to_uppercase());
    println!();
    println!("  ASKS (sell orders):");
    for ask in book.asks.iter().take(5).rev() {
        println!("    {} | {}", format_clp(ask.price), ask.amount);
    }
    println!("  ---");
    println!("  BIDS (buy orders):");
    for bid in book.bids.iter().take(5) {
        println!("    {} | {}", format_clp(bid.price), bid.amount);
    }

    if let Ok(last) = client.get_ticker(&market_id).await {
        println!();
        println!("  Last price: {}", format_clp(last));
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
