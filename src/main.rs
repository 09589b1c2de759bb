//! Order book replica entry point.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use book_replica::api::{create_router, AppState};
use book_replica::book::{MarketId, Side};
use book_replica::config::Config;
use book_replica::feed::{
    pump_lines, read_feed, Applied, BookDriver, BookSession, OwnedOrders, UserOrderEvent,
};
use book_replica::metrics;
use book_replica::utils::shutdown_signal;

/// Client-side order book replica.
#[derive(Parser, Debug)]
#[command(name = "book-replica")]
#[command(about = "Mirror a remote matching engine's order book from its event feed")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a JSON-lines event feed and print the resulting book.
    Replay {
        /// Feed file, one event per line.
        file: PathBuf,

        /// Market to mirror (defaults to MARKET).
        #[arg(short, long)]
        market: Option<String>,

        /// Drift tolerance for the heaviest-order query.
        #[arg(short, long, default_value = "0.05")]
        tolerance: Decimal,

        /// Also estimate filling this quantity on each side.
        #[arg(long)]
        fill: Option<u64>,
    },

    /// Stream a feed through the replica and serve the book over HTTP.
    Serve {
        /// Feed file to follow; reads stdin when omitted.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// User-order feed file (placed/finished notifications).
        #[arg(long)]
        user_feed: Option<PathBuf>,

        /// Market to mirror (defaults to MARKET).
        #[arg(short, long)]
        market: Option<String>,

        /// HTTP server port (defaults to PORT).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("book_replica=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(args.json_logs.then(|| fmt::layer().json()))
        .with((!args.json_logs).then(fmt::layer))
        .with(filter)
        .init();

    match args.command {
        Command::Replay {
            file,
            market,
            tolerance,
            fill,
        } => cmd_replay(&file, market, tolerance, fill),
        Command::Serve {
            file,
            user_feed,
            market,
            port,
        } => cmd_serve(file, user_feed, market, port).await,
        Command::CheckConfig => cmd_check_config(),
    }
}

/// Load and validate configuration.
fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BOOK REPLICA - CONFIGURATION CHECK");
    println!("======================================================================");

    let config = load_config()?;

    println!("  Market: {}", config.market);
    println!("  Max Bins Per Side: {}", config.max_bins_per_side);
    println!("  Max Relevance Divergence: {}", config.max_relevance_divergence);
    println!("  Track Market Orders: {}", config.track_market_orders);
    println!(
        "  Ownership Re-checks: {}ms / {}ms",
        config.ownership_recheck_short_ms, config.ownership_recheck_long_ms
    );
    println!("  Port: {}", config.port);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Apply a feed file synchronously and print the book.
fn cmd_replay(
    file: &Path,
    market: Option<String>,
    tolerance: Decimal,
    fill: Option<u64>,
) -> anyhow::Result<()> {
    let config = load_config()?;
    let events = read_feed(BufReader::new(File::open(file)?))?;

    let market = MarketId::new(market.unwrap_or_else(|| config.market.clone()));
    let mut session = BookSession::new(market, &config);

    let (mut changed, mut unchanged, mut stale) = (0usize, 0usize, 0usize);
    for event in events {
        match session.apply(event) {
            Applied::Changed => changed += 1,
            Applied::Unchanged => unchanged += 1,
            Applied::Stale => stale += 1,
        }
    }

    let summary = session.summary();
    println!("======================================================================");
    println!("BOOK REPLICA - {}", summary.market);
    println!("======================================================================");
    println!("Events: {} changed, {} absorbed, {} stale", changed, unchanged, stale);
    println!(
        "Orders: {} ({} bids, {} asks)  Epoch: {}",
        summary.count,
        summary.bid_count,
        summary.ask_count,
        summary.epoch.map_or_else(|| "-".to_string(), |e| e.to_string())
    );
    if let (Some(mid), Some(spread)) = (summary.mid_gap, summary.spread) {
        println!(
            "Mid-gap: {}  Spread: {}{}",
            mid,
            spread,
            if summary.inverted { " (inverted)" } else { "" }
        );
    }
    println!(
        "Depth: {} bid atoms, {} ask atoms",
        summary.bid_quantity, summary.ask_quantity
    );

    for side in [Side::Sell, Side::Buy] {
        println!("----------------------------------------------------------------------");
        println!("{}", side.to_string().to_uppercase());
        println!(
            "{:<6} {:>14} {:>6} {:>16} {:>8}",
            "ORDERS",
            "RATE",
            "EPOCH",
            "QTY",
            "WEIGHT"
        );
        let weights = session.relevance_weights(side);
        for (bin, weight) in session.bins(side).iter().zip(weights) {
            let rate = if bin.is_market() {
                "market".to_string()
            } else {
                bin.rate.to_string()
            };
            println!(
                "{:<6} {:>14} {:>6} {:>16} {:>8}",
                bin.orders.len(),
                rate,
                if bin.provisional { "*" } else { "" },
                bin.quantity,
                weight.round_dp(3)
            );
        }
        match session.heaviest_relevant_order(side, tolerance) {
            Some(order) => println!(
                "Heaviest within {}: {} @ {} ({})",
                tolerance, order.quantity_atoms, order.rate, order.id
            ),
            None => println!("Heaviest within {}: -", tolerance),
        }
    }

    if let Some(qty) = fill {
        println!("----------------------------------------------------------------------");
        for side in [Side::Buy, Side::Sell] {
            match session.fill_estimate(side, qty) {
                Some(est) => println!(
                    "{} {}: vwap {} (best {}, worst {})",
                    side,
                    qty,
                    est.vwap.round_dp(4),
                    est.best_rate,
                    est.worst_rate
                ),
                None => println!("{} {}: insufficient depth", side, qty),
            }
        }
    }
    println!("======================================================================");

    Ok(())
}

/// Stream the feed through the driver and serve the book API.
async fn cmd_serve(
    file: Option<PathBuf>,
    user_feed: Option<PathBuf>,
    market: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let config = load_config()?;
    let handle = metrics::install_prometheus()?;

    let market = MarketId::new(market.unwrap_or_else(|| config.market.clone()));
    info!(market = %market, "Starting book replica");

    let session = Arc::new(RwLock::new(BookSession::new(market, &config)));
    let driver = BookDriver::new(session.clone(), Arc::new(OwnedOrders::new()), &config);

    // Book feed
    let (book_tx, book_rx) = mpsc::channel(1000);
    tokio::spawn(driver.clone().run(book_rx));
    tokio::spawn(async move {
        let result = match file {
            Some(path) => match tokio::fs::File::open(&path).await {
                Ok(f) => pump_lines(tokio::io::BufReader::new(f), book_tx).await,
                Err(e) => Err(e.into()),
            },
            None => pump_lines(tokio::io::BufReader::new(tokio::io::stdin()), book_tx).await,
        };
        match result {
            Ok(sent) => info!(sent, "Book feed input finished"),
            Err(e) => error!(error = %e, "Book feed input failed"),
        }
    });

    // User-order feed
    if let Some(path) = user_feed {
        let (user_tx, user_rx) = mpsc::channel(100);
        tokio::spawn(driver.clone().run_user_feed(user_rx));
        tokio::spawn(async move {
            if let Err(e) = pump_user_orders(&path, user_tx).await {
                error!(error = %e, "User order feed failed");
            }
        });
    }

    let state = AppState::new(session, config.max_relevance_divergence).with_metrics(handle);
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.port)));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Book replica stopped");
    Ok(())
}

/// Forward user-order notifications from a JSON-lines file.
async fn pump_user_orders(path: &Path, tx: mpsc::Sender<UserOrderEvent>) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = tokio::io::BufReader::new(file).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<UserOrderEvent>(&line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Skipping user order line"),
        }
    }

    Ok(())
}
