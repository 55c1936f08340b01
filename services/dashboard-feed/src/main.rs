//! Dashboard feed CLI
//!
//! Connects to a dashboard backend and logs every published notification
//! and heartbeat indicator change.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dashboard_feed::{load_config, Config, Subscription};
use tracing::{debug, info, Level};

#[derive(Parser)]
#[command(name = "dashboard-feed")]
#[command(about = "Real-time event feed for observatory dashboards")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dashboard page URL (overrides config file)
    #[arg(long)]
    page_url: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info", value_parser = clap::value_parser!(Level))]
    log_level: Level,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the feed until interrupted (default)
    Watch {
        /// Additional page to subscribe to, e.g. "camera summit/ccs"
        #[arg(long = "page")]
        pages: Vec<String>,

        /// Additionally subscribe to historical status
        #[arg(long)]
        historical_status: bool,
    },

    /// Ask once whether the backend is still loading historical data
    HistoricalStatus {
        /// Seconds to wait for an answer
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    debug!(
        "Parsed command line arguments: config={:?}, page_url={:?}, log_level={:?}",
        args.config, args.page_url, args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        debug!("Using default configuration");
        Config::default()
    };

    if let Some(page_url) = args.page_url {
        config.page_url = page_url;
    }

    match args.command.unwrap_or(Commands::Watch {
        pages: Vec::new(),
        historical_status: false,
    }) {
        Commands::Watch {
            pages,
            historical_status,
        } => {
            for page in &pages {
                config.subscriptions.push(parse_page(page)?);
            }
            if historical_status {
                config.subscriptions.push(Subscription::HistoricalStatus);
            }

            info!("Starting dashboard feed for {}", config.page_url);
            debug!(
                "Subscriptions: {}, Heartbeats: {}",
                config.subscriptions.len(),
                config.heartbeats.len()
            );
            dashboard_feed::run(config).await?;
        }
        Commands::HistoricalStatus { timeout } => {
            let notification = dashboard_feed::probe(&config, Duration::from_secs(timeout)).await?;
            match notification.data() {
                Some(data) => println!("historicalStatus: {}", data),
                None => println!(
                    "historicalStatus: error ({})",
                    notification.error().unwrap_or("unknown")
                ),
            }
        }
    }

    Ok(())
}

/// Parse `"<pageType> [location[/camera[/channel]]]"` into a subscription
fn parse_page(page: &str) -> Result<Subscription, String> {
    let mut words = page.split_whitespace();
    let page_type = words
        .next()
        .ok_or_else(|| format!("Empty page argument {:?}", page))?;
    let mut parts = words.next().unwrap_or_default().split('/');
    let mut part = || parts.next().filter(|p| !p.is_empty());
    let (location, camera, channel) = (part(), part(), part());
    Ok(Subscription::service(page_type, location, camera, channel))
}
