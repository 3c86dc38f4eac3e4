use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use atd_core::config::PipelineConfig;
use atd_core::pipeline::{derive_only, run_pipeline, PipelineOutput};
use atd_core::report::{
    build_report, filter_by_request_date, BatchReport, GroupMean, TrendPeriod, DAY_NAMES,
};
use atd_core::table_io::{extract_table, write_table};
use atd_core::timestamps::normalize_timestamps;
use atd_core::weather::{load_weather, WeatherTables};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "ATD_CONFIG";
const RAIN_ENV: &str = "ATD_WEATHER_RAIN";
const TEMP_ENV: &str = "ATD_WEATHER_TEMP";

#[derive(Parser, Debug)]
#[command(author, version, about = "Delivery ATD feature pipeline", long_about = None)]
struct Cli {
    /// Pipeline config (TOML); falls back to $ATD_CONFIG, then built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize, derive features, join weather and clean a raw export
    Run(RunArgs),
    /// Normalize and derive features only (no weather join, no cleaning)
    Features(FeaturesArgs),
    /// Print KPIs and ATD trends of an enriched table
    Report(ReportArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Raw delivery export (.csv or .parquet)
    #[arg(long)]
    input: PathBuf,
    /// Destination for the enriched table (.csv or .parquet)
    #[arg(long)]
    output: PathBuf,
    /// Monthly rain aggregates (territory,year_month,rain)
    #[arg(long)]
    rain: Option<PathBuf>,
    /// Monthly temperature aggregates (territory,year_month,temp_mean)
    #[arg(long)]
    temp: Option<PathBuf>,
    /// Write the category code dictionaries as JSON
    #[arg(long)]
    encodings: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct FeaturesArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
    #[arg(long)]
    encodings: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Enriched table produced by `run`
    #[arg(long)]
    input: PathBuf,
    /// First request date to include (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last request date to include (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Bucket width of the ATD trends: weekly (Monday start) or daily
    #[arg(long, default_value_t = TrendPeriod::Weekly)]
    period: TrendPeriod,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let env = |key: &str| std::env::var_os(key);
    let mut config = resolve_config(cli.config.as_deref(), env)?;

    match cli.command {
        Command::Run(args) => {
            apply_weather_overrides(&mut config, args.rain, args.temp, env);

            let raw = extract_table(&args.input)
                .with_context(|| format!("failed to extract {}", args.input.display()))?;
            let weather = load_configured_weather(&config)?;
            let output = run_pipeline(&raw, &weather, &config)?;
            finish(&output, &args.output, args.encodings.as_deref())?;
            print_summary(&output);
            Ok(())
        }
        Command::Features(args) => {
            let raw = extract_table(&args.input)
                .with_context(|| format!("failed to extract {}", args.input.display()))?;
            let output = derive_only(&raw, &config)?;
            finish(&output, &args.output, args.encodings.as_deref())?;
            info!(rows = output.dataframe.height(), "features written");
            Ok(())
        }
        Command::Report(args) => {
            let enriched = extract_table(&args.input)
                .with_context(|| format!("failed to read {}", args.input.display()))?;
            let enriched = normalize_timestamps(&enriched)?;
            let filtered = filter_by_request_date(&enriched, args.from, args.to)?;
            let report = build_report(&filtered, args.period)?;
            print_report(&report);
            Ok(())
        }
    }
}

/// Config file from `--config`, else `$ATD_CONFIG`, else built-in defaults.
fn resolve_config(
    flag: Option<&Path>,
    env: impl Fn(&str) -> Option<OsString>,
) -> Result<PipelineConfig> {
    let path = flag
        .map(Path::to_path_buf)
        .or_else(|| env(CONFIG_ENV).map(PathBuf::from));
    match path {
        Some(path) => PipelineConfig::load(&path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

/// Weather paths resolve config, then environment, then command-line flags;
/// each later source wins.
fn apply_weather_overrides(
    config: &mut PipelineConfig,
    rain_flag: Option<PathBuf>,
    temp_flag: Option<PathBuf>,
    env: impl Fn(&str) -> Option<OsString>,
) {
    if let Some(rain) = rain_flag.or_else(|| env(RAIN_ENV).map(PathBuf::from)) {
        config.weather.rain_path = rain;
    }
    if let Some(temp) = temp_flag.or_else(|| env(TEMP_ENV).map(PathBuf::from)) {
        config.weather.temp_path = temp;
    }
}

fn load_configured_weather(config: &PipelineConfig) -> Result<WeatherTables> {
    let paths = &config.weather;
    load_weather(&paths.rain_path, &paths.temp_path).with_context(|| {
        format!(
            "failed to load weather from {} and {}",
            paths.rain_path.display(),
            paths.temp_path.display()
        )
    })
}

fn finish(output: &PipelineOutput, destination: &Path, encodings: Option<&Path>) -> Result<()> {
    write_table(&output.dataframe, destination)
        .with_context(|| format!("failed to write {}", destination.display()))?;
    if let Some(path) = encodings {
        let json = serde_json::to_vec_pretty(&output.encodings)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write encodings {}", path.display()))?;
    }
    Ok(())
}

fn print_summary(output: &PipelineOutput) {
    let summary = &output.summary;
    let mut table = Table::new();
    table.set_header(vec!["Stage", "Rows"]);
    table.add_row(vec!["input".to_string(), summary.input_rows.to_string()]);
    table.add_row(vec![
        "weather matched".to_string(),
        summary.weather_matched_rows.to_string(),
    ]);
    table.add_row(vec![
        "dropped (invalid ATD)".to_string(),
        summary.cleaning.dropped_invalid_atd.to_string(),
    ]);
    table.add_row(vec![
        "duplicates removed".to_string(),
        summary.cleaning.duplicates_removed.to_string(),
    ]);
    table.add_row(vec!["output".to_string(), summary.cleaning.output_rows.to_string()]);
    println!("{table}");

    if !summary.cleaning.bounds.is_empty() {
        let mut bounds = Table::new();
        bounds.set_header(vec!["Column", "Lower", "Upper"]);
        for bound in &summary.cleaning.bounds {
            bounds.add_row(vec![
                bound.column.clone(),
                format!("{:.3}", bound.lower),
                format!("{:.3}", bound.upper),
            ]);
        }
        println!("{bounds}");
    }
}

fn print_report(report: &BatchReport) {
    let kpis = &report.kpis;
    let mut table = Table::new();
    table.set_header(vec!["KPI", "Value"]);
    table.add_row(vec!["Average ATD (min)".to_string(), fmt_opt(kpis.average_atd, 2)]);
    table.add_row(vec!["Total orders".to_string(), kpis.total_orders.to_string()]);
    table.add_row(vec![
        "Unique couriers".to_string(),
        kpis.unique_couriers
            .map(|count| count.to_string())
            .unwrap_or_else(|| "N/A".to_string()),
    ]);
    table.add_row(vec![
        "Long deliveries > 10 km".to_string(),
        kpis.long_delivery_pct
            .map(|pct| format!("{pct:.1}%"))
            .unwrap_or_else(|| "N/A".to_string()),
    ]);
    table.add_row(vec![
        "Avg total distance (km)".to_string(),
        fmt_opt(kpis.average_total_distance_km, 2),
    ]);
    if let Some(distribution) = &report.atd_distribution {
        table.add_row(vec![
            "ATD range, capped at p99 (min)".to_string(),
            format!("{:.2} to {:.2}", distribution.min, distribution.p99),
        ]);
        table.add_row(vec![
            "Orders within ATD cap".to_string(),
            distribution.orders_within_cap.to_string(),
        ]);
    }
    println!("{table}");

    let mut trend = Table::new();
    trend.set_header(vec![
        format!("Period ({})", report.period),
        "Avg ATD (min)".to_string(),
        "Orders".to_string(),
    ]);
    for point in &report.time_trend {
        trend.add_row(vec![
            point.period.to_string(),
            format!("{:.2}", point.mean_atd),
            point.orders.to_string(),
        ]);
    }
    println!("{trend}");

    for category in &report.category_trends {
        let mut table = Table::new();
        table.set_header(vec![
            category.column.clone(),
            format!("Period ({})", report.period),
            "Avg ATD (min)".to_string(),
            "Orders".to_string(),
        ]);
        for point in &category.points {
            table.add_row(vec![
                point.label.clone(),
                point.period.to_string(),
                format!("{:.2}", point.mean_atd),
                point.orders.to_string(),
            ]);
        }
        println!("{table}");
    }

    print_groups("Order hour", &report.by_order_hour, |hour| hour.to_string());
    print_groups("Day of week", &report.by_dayofweek, |day| {
        usize::try_from(*day)
            .ok()
            .and_then(|idx| DAY_NAMES.get(idx))
            .map(|name| name.to_string())
            .unwrap_or_else(|| day.to_string())
    });
    print_groups("Part of day", &report.by_time_of_day, |label| label.clone());
    print_groups("Peak hour", &report.by_peak_hour, |flag| flag.to_string());
    print_groups("Weekend", &report.by_weekend, |flag| flag.to_string());
}

fn print_groups<K>(title: &str, groups: &[GroupMean<K>], label: impl Fn(&K) -> String) {
    let mut table = Table::new();
    table.set_header(vec![title, "Avg ATD (min)", "Orders"]);
    for group in groups {
        table.add_row(vec![
            label(&group.key),
            format!("{:.2}", group.mean_atd),
            group.orders.to_string(),
        ]);
    }
    println!("{table}");
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{v:.precision$}"))
        .unwrap_or_else(|| "N/A".to_string())
}
