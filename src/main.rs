use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Datelike, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;

use femora_cycles::config::{ContextConfig, CycleConfig};
use femora_cycles::context::{self, DiagnosisReader, HealthContextAssembler, ProfileReader};
use femora_cycles::db::{self, PgHealthStore, Toggle};
use femora_cycles::models::{CalendarMonth, Cycle, CyclePrediction};
use femora_cycles::{cycles, report, HealthError};

#[derive(Parser)]
#[command(name = "femora-cycles")]
#[command(about = "Period tracking, cycle prediction and assistant context for Femora", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Tuning for cycle prediction and context assembly.
#[derive(Args)]
struct ConfigArgs {
    /// Largest gap in days between two logged days of the same period
    #[arg(long, global = true, default_value_t = 10, value_parser = clap::value_parser!(i64).range(0..=90))]
    intra_period_gap_days: i64,
    #[arg(long, global = true, default_value_t = 5, value_parser = clap::value_parser!(i64).range(1..=15))]
    period_duration_days: i64,
    #[arg(long, global = true, default_value_t = 14, value_parser = clap::value_parser!(i64).range(0..=30))]
    luteal_phase_days: i64,
    #[arg(long, global = true, default_value_t = 5, value_parser = clap::value_parser!(i64).range(0..=14))]
    fertile_window_lookback_days: i64,
    #[arg(long, global = true, default_value_t = 6, value_parser = clap::value_parser!(u32).range(1..=120))]
    context_window_months: u32,
    /// Per-read timeout when assembling assistant context
    #[arg(long, global = true, default_value_t = 3000, value_parser = clap::value_parser!(u64).range(1..=60_000))]
    read_timeout_ms: u64,
}

impl ConfigArgs {
    fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            intra_period_gap_days: self.intra_period_gap_days,
            period_duration_days: self.period_duration_days,
            luteal_phase_days: self.luteal_phase_days,
            fertile_window_lookback_days: self.fertile_window_lookback_days,
        }
    }

    fn context_config(&self) -> ContextConfig {
        ContextConfig {
            context_window_months: self.context_window_months,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample users, periods and a diagnosis
    Seed,
    /// Import period dates from a CSV file (user_id,date[,display_name,email])
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Toggle a logged period day
    Log {
        #[arg(long)]
        user: String,
        #[arg(long)]
        date: String,
    },
    /// Store an ultrasound analysis result
    Diagnose {
        #[arg(long)]
        user: String,
        #[arg(long, value_parser = clap::value_parser!(i32).range(0..=100))]
        probability: i32,
        #[arg(long, value_parser = clap::value_parser!(i32).range(0..=100))]
        confidence: i32,
        #[arg(long = "finding")]
        findings: Vec<String>,
    },
    /// Show cycles and the next-period prediction
    Predict {
        #[arg(long)]
        user: String,
        /// Calendar month to mark, as YYYY-MM (defaults to the current month)
        #[arg(long)]
        month: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print the assistant context block, optionally wrapped around a question
    Context {
        #[arg(long)]
        user: String,
        #[arg(long)]
        question: Option<String>,
    },
    /// Write a plain-text health report
    Report {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "report.txt")]
        out: PathBuf,
    },
}

#[derive(Serialize)]
struct PredictOutput<'a> {
    cycles: &'a [Cycle],
    prediction: Option<&'a CyclePrediction>,
    calendar: &'a CalendarMonth,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cycle_config = cli.config.cycle_config();
    let context_config = cli.config.context_config();

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the Femora Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgHealthStore::new(pool.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} period days from {}.", csv.display());
        }
        Commands::Log { user, date } => {
            let date = cycles::parse_date(&date)?;
            db::upsert_user(&pool, &user, None, None).await?;
            match db::toggle_period_date(&pool, &user, date).await? {
                Toggle::Logged => println!("Logged {date} for {user}."),
                Toggle::Removed => println!("Removed {date} for {user}."),
            }
        }
        Commands::Diagnose {
            user,
            probability,
            confidence,
            findings,
        } => {
            require_user(&store, &user).await?;
            let id = db::record_diagnosis(&pool, &user, probability, confidence, &findings).await?;
            log::info!("recorded diagnosis {id} for {user}");
            println!("Diagnosis saved ({probability}% PCOS probability).");
        }
        Commands::Predict { user, month, json } => {
            let today = Utc::now().date_naive();
            let since = context::window_start(today, context_config.context_window_months);
            let dates: Vec<_> = db::fetch_period_entries(&pool, &user, since)
                .await?
                .into_iter()
                .map(|entry| entry.date)
                .collect();

            let grouped = cycles::group_into_cycles(&dates, &cycle_config);
            let prediction = cycles::predict(&grouped, &cycle_config);

            let (year, month) = match month {
                Some(raw) => {
                    let first = cycles::parse_date(&format!("{raw}-01"))
                        .map_err(|_| HealthError::InvalidDateFormat(raw.clone()))?;
                    (first.year(), first.month())
                }
                None => (today.year(), today.month()),
            };
            let calendar =
                cycles::calendar_month(year, month, &dates, prediction.as_ref(), &cycle_config)?;

            if json {
                let output = PredictOutput {
                    cycles: &grouped,
                    prediction: prediction.as_ref(),
                    calendar: &calendar,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(());
            }

            if grouped.is_empty() {
                println!("No periods logged in the last {} months.", context_config.context_window_months);
                return Ok(());
            }

            println!("Logged periods:");
            for cycle in &grouped {
                println!("- {} ({} days)", cycle.start_date(), cycle.dates().len());
            }

            match &prediction {
                Some(prediction) => {
                    println!(
                        "Average cycle {} days, next period {}, ovulation {}.",
                        prediction.average_cycle_length_days,
                        prediction.predicted_next_period_start,
                        prediction.predicted_ovulation_date
                    );
                    let marked: Vec<String> = calendar
                        .days
                        .iter()
                        .filter(|day| day.in_predicted_range || day.fertile)
                        .map(|day| {
                            let tag = if day.in_predicted_range { "period" } else { "fertile" };
                            format!("{} {}", day.date.day(), tag)
                        })
                        .collect();
                    if !marked.is_empty() {
                        println!("{year}-{month:02}: {}", marked.join(", "));
                    }
                }
                None => println!("Log at least two periods to see predictions."),
            }
        }
        Commands::Context { user, question } => {
            let store = Arc::new(store);
            let assembler = HealthContextAssembler::new(
                store.clone(),
                store.clone(),
                store,
                cycle_config,
                context_config,
            );
            let summary = assembler.assemble(&user, Utc::now()).await?;

            match question {
                Some(question) => print!("{}", context::compose_prompt(&summary, &question)?),
                None => print!("{}", summary.text),
            }
        }
        Commands::Report { user, out } => {
            let profile = require_user(&store, &user).await?;
            let since = context::window_start(
                Utc::now().date_naive(),
                context_config.context_window_months,
            );
            let diagnosis = store.latest_diagnosis(&user).await?;
            let dates: Vec<_> = db::fetch_period_entries(&pool, &user, since)
                .await?
                .into_iter()
                .map(|entry| entry.date)
                .collect();

            let report = report::build_report(
                &profile,
                diagnosis.as_ref(),
                &dates,
                Utc::now().date_naive(),
                &cycle_config,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn require_user(
    store: &PgHealthStore,
    user: &str,
) -> anyhow::Result<femora_cycles::models::UserProfile> {
    store
        .profile(user)
        .await?
        .ok_or_else(|| HealthError::UnresolvedUser(user.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("femora-cycles").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_match_library_config() {
        let cli = parse(&["predict", "--user", "u1"]).unwrap();
        assert_eq!(cli.config.cycle_config(), CycleConfig::default());
        assert_eq!(cli.config.context_config(), ContextConfig::default());
    }

    #[test]
    fn rejects_out_of_range_settings() {
        assert!(parse(&["--luteal-phase-days", "10000000000000", "predict", "--user", "u1"]).is_err());
        assert!(parse(&["predict", "--user", "u1", "--period-duration-days", "9223372036854775807"]).is_err());
        assert!(parse(&["predict", "--user", "u1", "--fertile-window-lookback-days", "-1"]).is_err());
        assert!(parse(&["context", "--user", "u1", "--read-timeout-ms", "0"]).is_err());

        let cli = parse(&["predict", "--user", "u1", "--intra-period-gap-days", "7"]).unwrap();
        assert_eq!(cli.config.cycle_config().intra_period_gap_days, 7);
    }
}
