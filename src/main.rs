use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use uuid::Uuid;

mod aggregate;
mod config;
mod db;
mod emissions;
mod extraction;
mod factors;
mod models;
mod report;
mod score;

use config::Settings;
use extraction::{DraftEdits, UsageOverride};
use models::Source;

#[derive(Parser)]
#[command(name = "emission-ledger")]
#[command(about = "Carbon emission ledger for utility bills", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample companies and bills
    Seed,
    /// Register a company
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        logo: Option<String>,
    },
    /// Import bills from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Stage the extraction output for a bill and print its token
    Extract {
        /// Email of the company the bill belongs to
        #[arg(long)]
        company: String,
        /// Raw response from the OCR/LLM extraction step
        #[arg(long)]
        response: PathBuf,
        /// Location of the uploaded bill document
        #[arg(long)]
        document: Option<String>,
    },
    /// Save a staged extraction as a bill, applying corrections
    Save {
        #[arg(long)]
        token: Uuid,
        #[arg(long)]
        bill_date: Option<NaiveDate>,
        #[arg(long)]
        bill_number: Option<String>,
        #[arg(long)]
        billing_period_start: Option<NaiveDate>,
        #[arg(long)]
        billing_period_end: Option<NaiveDate>,
        /// Location of the bill document
        #[arg(long)]
        document: Option<String>,
        /// Usage correction, e.g. electricity=120:kWh or trade-co2=3
        #[arg(long = "set")]
        overrides: Vec<UsageOverride>,
        /// Drop a source from the staged bill
        #[arg(long = "clear")]
        cleared: Vec<Source>,
    },
    /// Drop a staged extraction without saving it
    Discard {
        #[arg(long)]
        token: Uuid,
    },
    /// Delete staged extractions past their expiry
    PurgePending,
    /// Emissions dashboard for a company
    Dashboard {
        #[arg(long)]
        company: String,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Rank companies by sustainability score
    Leaderboard {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List a company's bills, most recent upload first
    Bills {
        #[arg(long)]
        company: String,
    },
    /// Show the loaded emission factor table
    Factors,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_logging();
    let cli = Cli::parse();
    let settings = cli.settings;

    if let Commands::Factors = cli.command {
        let factors = settings.load_factors()?;
        for row in factors.rows() {
            println!(
                "{:<18} {:<8} {:>12} t CO2 {:>12} kgCO2e",
                row.source.factor_name(),
                row.unit,
                row.co2_tonnes_per_unit,
                row.kgco2e_per_unit
            );
        }
        return Ok(());
    }

    let pool = settings.connect().await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let factors = settings.load_factors()?;
            let inserted = db::seed(&pool, &factors).await?;
            println!("Seed data inserted ({inserted} new bills).");
        }
        Commands::Register { name, email, logo } => {
            let id = db::register_company(&pool, &name, &email, logo.as_deref()).await?;
            println!("Registered {name} ({id}).");
        }
        Commands::Import { csv } => {
            let factors = settings.load_factors()?;
            let inserted = db::import_csv(&pool, &factors, &csv).await?;
            println!("Inserted {inserted} bills from {}.", csv.display());
        }
        Commands::Extract {
            company,
            response,
            document,
        } => {
            let company = db::company_by_email(&pool, &company).await?;
            let text = std::fs::read_to_string(&response)
                .with_context(|| format!("failed to read {}", response.display()))?;
            let mut draft = extraction::parse_llm_response(&text)?;
            if document.is_some() {
                draft.bill_file_path = document;
            }
            if draft.usage.is_empty() {
                warn!("extraction found no usage values; fill them in with --set when saving");
            }

            let pending =
                db::stage_extraction(&pool, company.id, &draft, settings.pending_ttl()).await?;
            info!(token = %pending.token, company = %company.company_name, "staged extraction");

            println!(
                "Staged bill for {} at {}.",
                company.company_name,
                pending.created_at.format("%Y-%m-%d %H:%M UTC")
            );
            println!(
                "- date: {}",
                draft
                    .bill_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            );
            println!("- number: {}", draft.bill_number.as_deref().unwrap_or("unknown"));
            for (source, usage) in draft.usage.iter() {
                println!(
                    "- {}: {} {}",
                    source,
                    usage
                        .value
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    usage.unit.as_deref().unwrap_or("")
                );
            }
            println!(
                "Token {} (expires {}). Run `save --token {}` or `discard --token {}`.",
                pending.token,
                pending.expires_at.format("%Y-%m-%d %H:%M UTC"),
                pending.token,
                pending.token
            );
        }
        Commands::Save {
            token,
            bill_date,
            bill_number,
            billing_period_start,
            billing_period_end,
            document,
            overrides,
            cleared,
        } => {
            let factors = settings.load_factors()?;
            let edits = DraftEdits {
                bill_date,
                bill_number,
                billing_period_start,
                billing_period_end,
                bill_file_path: document,
                cleared,
                overrides,
            };
            let (bill_id, totals) = db::save_extraction(&pool, &factors, token, &edits)
                .await?
                .with_context(|| {
                    format!("no pending extraction for token {token} (saved, discarded or expired)")
                })?;
            println!(
                "Bill {bill_id} saved: {:.2} kgCO2e, {:.3} t CO2.",
                totals.emission_kgco2e, totals.co2_tonnes
            );
        }
        Commands::Discard { token } => {
            if db::discard_extraction(&pool, token).await? {
                println!("Discarded extraction {token}.");
            } else {
                println!("No pending extraction for token {token}.");
            }
        }
        Commands::PurgePending => {
            let purged = db::purge_expired_extractions(&pool).await?;
            println!("Purged {purged} expired extractions.");
        }
        Commands::Dashboard {
            company,
            format,
            out,
        } => {
            let company = db::company_by_email(&pool, &company).await?;
            let factors = settings.load_factors()?;
            let bills = db::fetch_bills(&pool, company.id, db::BillOrder::BillDateDesc).await?;
            let charts = report::chart_data(&factors, &bills);

            let rendered = match format {
                Format::Markdown => report::build_dashboard(&company, &charts, &bills),
                Format::Json => serde_json::to_string_pretty(&charts)? + "\n",
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Dashboard written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
        Commands::Leaderboard { limit } => {
            let totals = db::fetch_company_totals(&pool).await?;
            let ranked = score::rank_leaderboard(totals);
            let shown: Vec<_> = ranked.into_iter().take(limit).collect();
            print!("{}", report::build_leaderboard(&shown));
        }
        Commands::Bills { company } => {
            let company = db::company_by_email(&pool, &company).await?;
            let bills = db::fetch_bills(&pool, company.id, db::BillOrder::UploadedDesc).await?;

            if bills.is_empty() {
                println!("No bills uploaded for {}.", company.company_name);
                return Ok(());
            }

            println!("Bills for {}:", company.company_name);
            for bill in &bills {
                println!("- [{}] {}", bill.id, report::bill_line(bill));
            }
        }
        Commands::Factors => {} // printed above without a database
    }

    Ok(())
}
