//! Holdings CLI: ingest, backfill, compare and store inspection commands.
//!
//! Commands:
//! - `ingest`: fetch the latest holdings for one or all funds and store them
//! - `backfill`: import saved CSV/JSON exports as historical snapshots
//! - `compare`: show what a fund added, removed and changed between two dates
//! - `funds` / `dates`: list what the store contains

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use holdings_core::data::{HoldingStore, SourceRegistry};
use holdings_core::{FundCode, HoldingRow, HoldingsConfig};
use holdings_runner::{
    backfill, compare, ingest_funds, BackfillOptions, Comparison, StdoutProgress,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "holdings",
    about = "Daily ETF holdings ingestion and comparison"
)]
struct Cli {
    /// Debug-level logging (overrides RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the latest holdings and store them.
    Ingest {
        /// Fund to ingest (PCEF or YYY). Defaults to YYY.
        #[arg(long, conflicts_with = "all_funds")]
        fund: Option<String>,

        /// Ingest every supported fund.
        #[arg(long, default_value_t = false)]
        all_funds: bool,

        /// Snapshot date (YYYY-MM-DD). Defaults to the date the source publishes.
        #[arg(long)]
        date: Option<String>,

        /// Store file. Overrides the config file.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Fetch from this URL instead of the configured one.
        #[arg(long, conflicts_with = "all_funds")]
        url: Option<String>,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Import saved holdings files as historical snapshots.
    Backfill {
        /// A .csv/.json file, or a directory of them.
        path: PathBuf,

        /// Fund the files belong to.
        #[arg(long)]
        fund: String,

        /// Snapshot date for every file (YYYY-MM-DD).
        #[arg(long)]
        date: Option<String>,

        /// Scan subdirectories too.
        #[arg(long, default_value_t = false)]
        recursive: bool,

        /// Store file. Overrides the config file.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Compare a fund's holdings between two stored dates.
    Compare {
        #[arg(long)]
        fund: String,

        /// Earlier date (YYYY-MM-DD).
        #[arg(long)]
        from: String,

        /// Later date (YYYY-MM-DD).
        #[arg(long)]
        to: String,

        /// Store file. Overrides the config file.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Print the comparison as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List funds present in the store.
    Funds {
        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List stored snapshot dates for a fund.
    Dates {
        #[arg(long)]
        fund: String,

        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ingest {
            fund,
            all_funds,
            date,
            db,
            url,
            config,
        } => run_ingest(fund, all_funds, date, db, url, config),
        Commands::Backfill {
            path,
            fund,
            date,
            recursive,
            db,
            config,
        } => run_backfill(&path, &fund, date, recursive, db, config),
        Commands::Compare {
            fund,
            from,
            to,
            db,
            json,
            config,
        } => run_compare(&fund, &from, &to, db, json, config),
        Commands::Funds { db, config } => run_funds(db, config),
        Commands::Dates { fund, db, config } => run_dates(&fund, db, config),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,holdings_core=debug,holdings_runner=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<PathBuf>, db: Option<PathBuf>) -> Result<HoldingsConfig> {
    let config = match path {
        Some(path) => HoldingsConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => HoldingsConfig::default(),
    };
    Ok(match db {
        Some(db) => config.with_store_path(db),
        None => config,
    })
}

fn parse_fund(text: &str) -> Result<FundCode> {
    Ok(text.parse::<FundCode>()?)
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{text}', expected YYYY-MM-DD"))
}

fn run_ingest(
    fund: Option<String>,
    all_funds: bool,
    date: Option<String>,
    db: Option<PathBuf>,
    url: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(config_path, db)?;
    let as_of = date.as_deref().map(parse_date).transpose()?;

    let funds: Vec<FundCode> = if all_funds {
        FundCode::ALL.to_vec()
    } else {
        let fund = fund.as_deref().map(parse_fund).transpose()?;
        vec![fund.unwrap_or(FundCode::LEGACY_DEFAULT)]
    };
    if let (Some(url), [fund]) = (url, funds.as_slice()) {
        config.override_url(*fund, url);
    }

    let registry = SourceRegistry::from_config(&config)?;
    let store = HoldingStore::new(&config.store.path);
    let summary = ingest_funds(&registry, &store, &funds, as_of, &StdoutProgress);

    if !summary.all_succeeded() {
        for (fund, err) in &summary.errors {
            eprintln!("Error for {fund}: {err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_backfill(
    path: &Path,
    fund: &str,
    date: Option<String>,
    recursive: bool,
    db: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let fund = parse_fund(fund)?;
    let config = load_config(config_path, db)?;
    let options = BackfillOptions {
        as_of: date.as_deref().map(parse_date).transpose()?,
        recursive,
    };

    let store = HoldingStore::new(&config.store.path);
    let summary = backfill(&store, fund, path, &options)?;

    if summary.total == 0 {
        println!("No .csv or .json files found under {}", path.display());
        return Ok(());
    }

    for outcome in &summary.outcomes {
        println!(
            "  OK: {} -> {fund} {} ({} rows)",
            outcome.origin, outcome.date, outcome.rows
        );
    }
    println!(
        "\nBackfill complete: {}/{} files imported, {} failed",
        summary.succeeded, summary.total, summary.failed
    );

    if !summary.all_succeeded() {
        for (file, err) in &summary.errors {
            eprintln!("Error for {}: {err}", file.display());
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_compare(
    fund: &str,
    from: &str,
    to: &str,
    db: Option<PathBuf>,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let fund = parse_fund(fund)?;
    let (from, to) = (parse_date(from)?, parse_date(to)?);
    let config = load_config(config_path, db)?;
    let store = HoldingStore::new(&config.store.path);

    let comparison = compare(&store, fund, from, to)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
    } else {
        print_comparison(&comparison);
    }
    Ok(())
}

fn run_funds(db: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, db)?;
    let store = HoldingStore::new(&config.store.path);

    let funds = store.available_funds()?;
    if funds.is_empty() {
        println!("Store is empty: {}", store.path().display());
        return Ok(());
    }
    for fund in funds {
        println!("{:<6} {}", fund, fund.display_name());
    }
    Ok(())
}

fn run_dates(fund: &str, db: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<()> {
    let fund = parse_fund(fund)?;
    let config = load_config(config_path, db)?;
    let store = HoldingStore::new(&config.store.path);

    let dates = store.available_dates(fund)?;
    if dates.is_empty() {
        println!("No snapshots stored for {fund}");
        return Ok(());
    }
    for date in dates {
        let totals = store.totals_for(fund, date)?;
        println!(
            "{date}  {:>4} positions  {:>18}",
            totals.positions,
            format_money(totals.market_value)
        );
    }
    Ok(())
}

fn print_comparison(cmp: &Comparison) {
    println!();
    println!(
        "=== {} holdings: {} -> {} ===",
        cmp.fund, cmp.date_before, cmp.date_after
    );

    print_rows("Added", &cmp.added);
    print_rows("Removed", &cmp.removed);

    println!();
    println!("--- Changed ({}) ---", cmp.changed.len());
    if !cmp.changed.is_empty() {
        println!(
            "{:<16} {:>14} {:>14} {:>18} {:>9}",
            "Ticker", "Shares", "Δ Shares", "Δ Market Value", "Δ Weight"
        );
        for c in &cmp.changed {
            println!(
                "{:<16} {:>14.2} {:>+14.2} {:>18} {:>+8.2}%",
                c.ticker,
                c.shares_after,
                c.shares_delta,
                format_money(c.market_value_delta),
                c.weight_delta * 100.0
            );
        }
    }

    let t = &cmp.totals;
    println!();
    println!("--- Totals ---");
    println!(
        "Market Value:   {} -> {} ({})",
        format_money(t.market_value_before),
        format_money(t.market_value_after),
        format_money(t.market_value_delta)
    );
    println!(
        "Positions:      {} -> {} ({:+})",
        t.positions_before, t.positions_after, t.positions_delta
    );
    println!();
}

fn print_rows(title: &str, rows: &[HoldingRow]) {
    println!();
    println!("--- {title} ({}) ---", rows.len());
    for r in rows {
        println!(
            "{:<16} {:<40} {:>14.2} {:>18}",
            r.ticker,
            truncate(&r.name, 40),
            r.shares,
            format_money(r.market_value)
        );
    }
}

/// At most `width` characters, ending in `…` when cut.
fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

fn format_money(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();

    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}${grouped}.{:02}", cents % 100)
}
