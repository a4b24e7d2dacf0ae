//! Stockwatch CLI: download, catalog, status and stats commands.
//!
//! Commands:
//! - `download`: fetch daily bars for one market (or all) into the data root
//! - `catalog`: resolve and print a market's symbol catalog
//! - `status`: report manifest counts per status
//! - `stats`: bucket trailing-period highs across cached series

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stockwatch_core::config::AppConfig;
use stockwatch_core::data::catalog::{http_client, standard_source, CatalogProvider, JsonCatalogCache};
use stockwatch_core::data::manifest::read_counts;
use stockwatch_core::data::{download_market, manifest_path, DownloadContext, LogProgress, ThreadSleeper, YahooProvider};
use stockwatch_core::domain::Market;
use stockwatch_core::stats::{analyze_market, distribution, ReturnKind, ReturnPeriod};

#[derive(Parser)]
#[command(name = "stockwatch", about = "Multi-market daily-bar downloader")]
struct Cli {
    /// TOML config file. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data root; overrides the config file.
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily bars for a market and cache them as CSV.
    Download {
        /// Market code (tw, us, hk, cn, jp, kr) or `all`.
        #[arg(long)]
        market: String,

        /// Treat cached files older than this as stale.
        #[arg(long)]
        max_age_secs: Option<u64>,

        /// Discard the manifest and start a new batch.
        #[arg(long, default_value_t = false)]
        restart: bool,
    },
    /// Print a market's symbol catalog.
    Catalog {
        #[arg(long)]
        market: Market,

        /// Rows to print.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Report manifest counts per status.
    Status {
        #[arg(long)]
        market: Market,
    },
    /// Print the distribution of trailing-period highs.
    Stats {
        #[arg(long)]
        market: Market,

        /// week, month or year. All three when omitted.
        #[arg(long)]
        period: Option<ReturnPeriod>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(root) = cli.data_root {
        config.download.data_root = root;
    }

    match cli.command {
        Commands::Download {
            market,
            max_age_secs,
            restart,
        } => run_download(&config, &market, max_age_secs, restart),
        Commands::Catalog { market, limit } => run_catalog(&config, market, limit),
        Commands::Status { market } => run_status(&config, market),
        Commands::Stats { market, period } => run_stats(&config.download.data_root, market, period),
    }
}

fn parse_markets(arg: &str) -> Result<Vec<Market>> {
    if arg.eq_ignore_ascii_case("all") {
        return Ok(Market::ALL.to_vec());
    }
    Ok(vec![arg.parse::<Market>()?])
}

fn catalog_provider(config: &AppConfig, markets: &[Market]) -> Result<CatalogProvider> {
    let client = http_client(Duration::from_secs(config.download.catalog_timeout_secs))?;
    let mut provider = CatalogProvider::new(Box::new(JsonCatalogCache::new(&config.download.data_root)));
    for &market in markets {
        let settings = config.market_settings(market);
        provider = provider.with_source(
            market,
            standard_source(&settings.profile, client.clone(), settings.reference_list),
        );
    }
    Ok(provider)
}

fn run_download(config: &AppConfig, market: &str, max_age_secs: Option<u64>, restart: bool) -> Result<()> {
    let markets = parse_markets(market)?;
    let catalog = catalog_provider(config, &markets)?;
    let progress = LogProgress::default();

    let mut any_failed = false;
    for market in markets {
        let mut settings = config.market_settings(market);
        if let Some(secs) = max_age_secs {
            settings.freshness.max_age = Some(Duration::from_secs(secs));
        }
        let provider = YahooProvider::new(settings.request_timeout)?;
        let ctx = DownloadContext {
            provider: &provider,
            catalog: &catalog,
            sleeper: &ThreadSleeper,
            progress: &progress,
        };

        // One market failing does not stop the others.
        match download_market(&settings, &ctx, restart) {
            Ok(summary) => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                any_failed |= summary.fail() > 0;
            }
            Err(e) => {
                tracing::error!(market = %market, error = %e, "market run failed");
                any_failed = true;
            }
        }
    }

    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}

fn run_catalog(config: &AppConfig, market: Market, limit: usize) -> Result<()> {
    let catalog = catalog_provider(config, &[market])?;
    let symbols = catalog.get_symbols(market);

    println!("{market}: {} symbols", symbols.len());
    for s in symbols.iter().take(limit) {
        let board = s.board.as_deref().unwrap_or("-");
        println!("  {:<12} {:<6} {}", s.ticker, board, s.display_name);
    }
    Ok(())
}

fn run_status(config: &AppConfig, market: Market) -> Result<()> {
    let settings = config.market_settings(market);
    let path = manifest_path(&settings);
    if !path.exists() {
        println!("{market}: no manifest at {}", path.display());
        return Ok(());
    }

    let counts = read_counts(&path).with_context(|| format!("reading {}", path.display()))?;
    println!("{market} manifest: {}", path.display());
    println!("  pending: {}", counts.pending);
    println!("  done:    {}", counts.done);
    println!("  empty:   {}", counts.empty);
    println!("  failed:  {}", counts.failed);
    println!("  total:   {}", counts.total());
    Ok(())
}

fn run_stats(data_root: &Path, market: Market, period: Option<ReturnPeriod>) -> Result<()> {
    let results = analyze_market(data_root, market)?;
    if results.is_empty() {
        println!("{market}: no cached series with enough history");
        return Ok(());
    }

    let periods = match period {
        Some(p) => vec![p],
        None => ReturnPeriod::ALL.to_vec(),
    };
    for period in periods {
        let hist = distribution(&results, period, ReturnKind::High);
        println!("{market} {period} high returns ({} symbols)", hist.total);
        for bucket in hist.buckets.iter().filter(|b| !b.members.is_empty()) {
            println!("  [{:>5.0}%, {:>4.0}%) {:>5}", bucket.lower, bucket.upper, bucket.members.len());
        }
        if !hist.overflow.is_empty() {
            let top: Vec<String> = hist
                .overflow
                .iter()
                .take(5)
                .map(|(label, v)| format!("{label} {v:.1}%"))
                .collect();
            println!("  >=100%        {:>5}  {}", hist.overflow.len(), top.join(", "));
        }
    }
    Ok(())
}
