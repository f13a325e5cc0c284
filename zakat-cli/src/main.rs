//! # zakat-cli
//!
//! Command-line front end for the zakat-hawl engine.
//!
//! ```bash
//! # Nisab thresholds at the given prices
//! zakat-cli --gold-price 65 --silver-price 0.80 nisab --methodology hanafi
//!
//! # Zakat over a JSON file of assets
//! zakat-cli calculate --assets assets.json --date 2024-03-01
//!
//! # Hawl window starting on a date
//! zakat-cli hawl --start 2024-03-01
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use uuid::Uuid;

use zakat_hawl::prelude::*;

mod config_loader;

use config_loader::CliConfig;

/// Zakat calculator and Hawl planner
#[derive(Parser, Debug)]
#[command(name = "zakat-cli")]
#[command(version)]
#[command(about = "Zakat calculator and Hawl planner", long_about = None)]
struct Args {
    /// Write logs to the logs/ directory
    #[arg(long, default_value = "false")]
    log: bool,

    /// Gold price per gram
    #[arg(long, global = true)]
    gold_price: Option<Decimal>,

    /// Silver price per gram
    #[arg(long, global = true)]
    silver_price: Option<Decimal>,

    /// Print JSON instead of tables
    #[arg(long, global = true, default_value = "false")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show Nisab thresholds at current prices
    Nisab {
        #[arg(long)]
        methodology: Option<String>,
    },
    /// Calculate zakat over assets read from a JSON file
    Calculate {
        /// JSON array of assets
        #[arg(long)]
        assets: PathBuf,
        #[arg(long)]
        methodology: Option<String>,
        /// "lunar" or "solar"
        #[arg(long)]
        calendar: Option<String>,
        /// Gregorian date, or a Hijri date for the lunar calendar. Defaults to today.
        #[arg(long)]
        date: Option<String>,
        /// Print the step-by-step explanation
        #[arg(long, default_value = "false")]
        explain: bool,
    },
    /// Show the Hawl window starting on a date
    Hawl {
        #[arg(long)]
        start: NaiveDate,
    },
    /// Print a JSON schema
    Schema {
        #[arg(value_enum)]
        kind: SchemaKind,
    },
    /// Write a sample config file
    InitConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SchemaKind {
    Request,
    Calculation,
    Record,
    Asset,
}

/// Asset entry as written in an assets file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetEntry {
    #[serde(default)]
    name: Option<String>,
    category: AssetCategory,
    value: Decimal,
    #[serde(default)]
    passive: Option<bool>,
    #[serde(default)]
    restricted: Option<bool>,
    #[serde(default)]
    eligible: Option<bool>,
}

impl AssetEntry {
    fn into_asset(self, user_id: Uuid) -> Result<Asset, ZakatError> {
        let mut asset = Asset::new(user_id, self.category, self.value)?;
        if let Some(name) = self.name {
            asset = asset.named(name);
        }
        if let Some(passive) = self.passive {
            asset = asset.passive(passive);
        }
        if let Some(restricted) = self.restricted {
            asset = asset.restricted(restricted);
        }
        if let Some(eligible) = self.eligible {
            asset = asset.eligible(eligible);
        }
        asset.validate()?;
        Ok(asset)
    }
}

#[derive(Tabled)]
struct BreakdownRow {
    #[tabled(rename = "Asset")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Modifier")]
    modifier: String,
    #[tabled(rename = "Zakatable")]
    zakatable: String,
    #[tabled(rename = "Due")]
    due: String,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn field(field: &str, value: impl ToString) -> FieldRow {
    FieldRow {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn init_tracing(enabled: bool) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, Box<dyn std::error::Error>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("zakat_hawl=info,zakat_cli=info"));
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if !enabled {
        tracing_subscriber::registry().with(env_filter).with(console).init();
        return Ok(None);
    }

    std::fs::create_dir_all("logs")?;
    let file_appender = tracing_appender::rolling::daily("logs", "zakat.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!("--- Zakat session started [{}] ---", Utc::now());
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = CliConfig::load();
    let _guard = init_tracing(args.log || config.enable_logging.unwrap_or(false))?;

    let result = run(&args, &config).await;
    if let Err(e) = &result {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&zakat_hawl::types::ErrorBody::from(e))?);
        } else {
            eprintln!("{} {}", "error:".red().bold(), e);
        }
        std::process::exit(1);
    }
    Ok(())
}

/// Prices from flags, then the config file, then `ZAKAT_*` variables.
fn resolve_prices(args: &Args, config: &CliConfig) -> Result<Prices, ZakatError> {
    let engine_config = EngineConfig::from_env()?;
    let fallback = engine_config.fallback_prices;

    let gold = args
        .gold_price
        .or(config.gold_price)
        .or(fallback.as_ref().map(|p| p.gold_per_gram))
        .unwrap_or(dec!(85));
    let silver = args
        .silver_price
        .or(config.silver_price)
        .or(fallback.as_ref().map(|p| p.silver_per_gram))
        .unwrap_or(dec!(1));

    Prices::new(gold, silver)
}

fn service(prices: Prices) -> NisabYearService {
    NisabYearService::new(
        Arc::new(InMemoryRecordStore::new()),
        Arc::new(InMemoryAssetStore::new()),
        Arc::new(StaticPriceOracle::from_prices(prices)),
    )
}

async fn run(args: &Args, config: &CliConfig) -> Result<(), ZakatError> {
    match &args.command {
        Commands::Nisab { methodology } => {
            let methodology = methodology
                .as_deref()
                .or(config.methodology.as_deref())
                .unwrap_or("standard");
            let info = service(resolve_prices(args, config)?)
                .current_nisab(MethodologyId::parse(methodology)?, None)
                .await?;
            print_nisab(&info, args.json)
        }
        Commands::Calculate { assets, methodology, calendar, date, explain } => {
            let methodology = methodology
                .clone()
                .or_else(|| config.methodology.clone())
                .unwrap_or_else(|| "standard".to_string());
            let date = date.clone().unwrap_or_else(|| Utc::now().date_naive().to_string());
            let mut request = CalculationRequest::new(methodology, date);
            if let Some(calendar) = calendar.clone().or_else(|| config.calendar.clone()) {
                request = request.calendar(calendar);
            }

            let user_id = Uuid::new_v4();
            let store = Arc::new(InMemoryAssetStore::new());
            for asset in load_assets(assets, user_id)? {
                store.upsert(asset).await;
            }
            let service = NisabYearService::new(
                Arc::new(InMemoryRecordStore::new()),
                store,
                Arc::new(StaticPriceOracle::from_prices(resolve_prices(args, config)?)),
            );

            let calculation = service.calculate(user_id, &request).await?;
            print_calculation(&calculation, args.json, *explain)
        }
        Commands::Hawl { start } => {
            let calendar = IslamicCivilCalendar::new();
            let period = HawlPeriod::starting(&calendar, *start, EngineConfig::from_env()?.hawl)?;
            print_hawl(&period, args.json)
        }
        Commands::Schema { kind } => {
            let schema = match kind {
                SchemaKind::Request => schemars::schema_for!(CalculationRequest),
                SchemaKind::Calculation => schemars::schema_for!(ZakatCalculation),
                SchemaKind::Record => schemars::schema_for!(NisabYearRecord),
                SchemaKind::Asset => schemars::schema_for!(Asset),
            };
            println!("{}", to_json(&schema)?);
            Ok(())
        }
        Commands::InitConfig => {
            let path = CliConfig::create_sample()
                .map_err(|e| ZakatError::Configuration(format!("Failed to write config: {}", e)))?;
            println!("Wrote sample config to {}", path.display());
            Ok(())
        }
    }
}

fn to_json(value: &impl serde::Serialize) -> Result<String, ZakatError> {
    serde_json::to_string_pretty(value).map_err(|e| ZakatError::Configuration(e.to_string()))
}

fn load_assets(path: &Path, user_id: Uuid) -> Result<Vec<Asset>, ZakatError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ZakatError::Configuration(format!("Failed to read {}: {}", path.display(), e)))?;
    let entries: Vec<AssetEntry> = serde_json::from_str(&content)
        .map_err(|e| ZakatError::validation("assets", format!("invalid assets file: {}", e)))?;
    tracing::debug!(count = entries.len(), "loaded assets");
    entries.into_iter().map(|entry| entry.into_asset(user_id)).collect()
}

fn print_nisab(info: &NisabInfo, json: bool) -> Result<(), ZakatError> {
    if json {
        println!("{}", to_json(info)?);
        return Ok(());
    }
    let rows = vec![
        field("Gold price / g", info.gold_price_per_gram),
        field("Silver price / g", info.silver_price_per_gram),
        field("Gold Nisab", info.gold_nisab),
        field("Silver Nisab", info.silver_nisab),
        field("Methodology basis", info.methodology_basis),
        field("Effective Nisab", format!("{} ({})", info.effective_nisab, info.nisab_basis)),
    ];
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}

fn print_calculation(calc: &ZakatCalculation, json: bool, explain: bool) -> Result<(), ZakatError> {
    if json {
        println!("{}", to_json(calc)?);
        return Ok(());
    }

    let rows: Vec<BreakdownRow> = calc
        .breakdown
        .iter()
        .map(|line| BreakdownRow {
            name: line.name.clone(),
            category: line.category.to_string(),
            value: line.value.to_string(),
            modifier: line.modifier_label.clone(),
            zakatable: line.zakatable_amount.to_string(),
            due: line.zakat_due.to_string(),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));

    let status = if calc.meets_nisab {
        "Nisab met".green().bold()
    } else {
        "Below Nisab".yellow().bold()
    };
    let methodology = calc.methodology.to_string();
    let dated = format!("Date: {} ({})", calc.calculation_date, calc.calculation_date_hijri);
    println!(
        "{} {} | net {} | Nisab {} ({})",
        methodology.as_str().cyan(),
        status,
        calc.totals.net_zakatable,
        calc.nisab.effective_nisab,
        calc.nisab.nisab_basis
    );
    println!("{} {}", "Zakat due:".bold(), calc.format_amount());
    println!("{}", dated.as_str().dimmed());

    if explain {
        println!("\n{}", calc.explain());
    }
    Ok(())
}

fn print_hawl(period: &HawlPeriod, json: bool) -> Result<(), ZakatError> {
    if json {
        println!("{}", to_json(period)?);
        return Ok(());
    }
    let today = Utc::now().date_naive();
    let rows = vec![
        field("Start", format!("{} ({})", period.start, period.start_hijri)),
        field("Completion", format!("{} ({})", period.completion, period.completion_hijri)),
        field("Length (days)", period.total_days()),
        field("Days remaining", period.days_remaining(today)),
        field("Progress", format!("{}%", (period.progress(today) * dec!(100)).round_dp(1))),
    ];
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}
