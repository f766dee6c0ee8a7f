use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ev_station_etl::{
    check_offline, health_report, init_tracing, open_existing, run_etl, station_stats,
    AlertReport, AppConfig, RunSummary,
};

#[derive(Parser, Debug)]
#[command(name = "ev-station-etl")]
#[command(about = "Fetch, normalize and store EV charging stations")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run extract, transform and load once
    Run {
        /// Stop after this many listing pages
        #[arg(long)]
        max_pages: Option<usize>,

        /// Geocoding cache file (overrides GEOCODE_CACHE_PATH)
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Check the share of offline stations against a threshold
    Alert {
        /// Offline percentage above which the check fails
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Print aggregate station statistics as JSON
    Stats,
    /// Report database, cache and credential status as JSON
    Health,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = AppConfig::from_env();
    if let Some(path) = args.database {
        config.database_path = path;
    }

    match args.command {
        Command::Run { max_pages, cache } => {
            if let Some(path) = cache {
                config.cache_path = path;
            }
            let summary = run_etl(&config, max_pages).await?;
            print_summary(&summary);
            Ok(ExitCode::SUCCESS)
        }
        Command::Alert { threshold } => {
            let threshold = threshold.unwrap_or(config.alert_threshold_pct);
            let connection = open_existing(&config.database_path).with_context(|| {
                format!("failed to open {}", config.database_path.display())
            })?;
            let report = check_offline(&connection, threshold)?;
            print_alert(&report);
            Ok(if report.breached {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Stats => {
            let connection = open_existing(&config.database_path).with_context(|| {
                format!("failed to open {}", config.database_path.display())
            })?;
            let stats = station_stats(&connection)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let report = health_report(&config);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("SUMMARY");
    println!("{}", "=".repeat(50));
    println!("   Pages fetched:     {}", summary.pages);
    println!("   Stations fetched:  {}", summary.extracted);
    if summary.skipped_records > 0 {
        println!("   Skipped records:   {}", summary.skipped_records);
    }
    println!(
        "   Duplicates:        {}",
        summary.transform.duplicates_dropped
    );
    println!("   Stations loaded:   {}", summary.loaded);
    println!("   Total in database: {}", summary.stored_total);
    println!("   Offline stations:  {}", summary.offline);
    println!("   Online stations:   {}", summary.online);
    println!("   Tesla stations:    {}", summary.tesla);
    println!(
        "   Geocoding:         {} cached, {} looked up, {} failed",
        summary.transform.geocoding.cache_hits,
        summary.transform.geocoding.lookups,
        summary.transform.geocoding.fallbacks
    );
    println!("   Data saved to:     {}", summary.database_path.display());
    println!(
        "   Geocoding cache:   {} ({} entries)",
        summary.cache_path.display(),
        summary.cache_entries
    );
}

fn print_alert(report: &AlertReport) {
    println!("Total stations:     {}", report.total);
    println!("Offline stations:   {}", report.offline);
    println!("Offline percentage: {:.1}%", report.offline_pct);

    if report.breached {
        println!(
            "ALERT: {:.1}% of charging stations are offline (threshold {}%)",
            report.offline_pct, report.threshold_pct
        );
    } else {
        println!(
            "OK: {:.1}% offline (below {}% threshold)",
            report.offline_pct, report.threshold_pct
        );
    }

    if report.offline_stations.is_empty() {
        println!("No offline stations found.");
        return;
    }
    println!();
    println!("{:<40} {:<20} {:<8} {:>6}", "name", "city", "operator", "days");
    for station in &report.offline_stations {
        println!(
            "{:<40} {:<20} {:<8} {:>6}",
            station.name,
            station.city,
            station.operator_clean,
            station
                .days_since_update
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".into())
        );
    }
}
