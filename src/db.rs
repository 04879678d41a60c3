use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::context::{DiagnosisReader, PeriodLogReader, ProfileReader};
use crate::cycles;
use crate::models::{DiagnosisRecord, PeriodLogEntry, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Logged,
    Removed,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn upsert_user(
    pool: &PgPool,
    user_id: &str,
    display_name: Option<&str>,
    email: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO femora.users (id, display_name, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE
        SET display_name = COALESCE(EXCLUDED.display_name, femora.users.display_name),
            email = COALESCE(EXCLUDED.email, femora.users.email)
        "#,
    )
    .bind(user_id)
    .bind(display_name)
    .bind(email)
    .execute(pool)
    .await
    .with_context(|| format!("failed to upsert user {user_id}"))?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let users = vec![
        ("seed-maya", Some("Maya Chen"), "maya.chen@femora.app"),
        ("seed-ines", None, "ines.ortega@femora.app"),
    ];

    for (id, name, email) in users {
        upsert_user(pool, id, name, Some(email)).await?;
    }

    let periods = [
        ("seed-maya", "2026-05-03"),
        ("seed-maya", "2026-05-04"),
        ("seed-maya", "2026-05-05"),
        ("seed-maya", "2026-05-31"),
        ("seed-maya", "2026-06-01"),
        ("seed-maya", "2026-06-29"),
        ("seed-maya", "2026-06-30"),
        ("seed-maya", "2026-07-01"),
        ("seed-ines", "2026-06-10"),
    ];

    for (user_id, raw) in periods {
        let date = cycles::parse_date(raw)?;
        insert_period(pool, user_id, date).await?;
    }

    let existing: i64 = sqlx::query(
        "SELECT COUNT(*) AS total FROM femora.diagnoses WHERE user_id = $1",
    )
    .bind("seed-maya")
    .fetch_one(pool)
    .await?
    .get("total");

    if existing == 0 {
        record_diagnosis(
            pool,
            "seed-maya",
            72,
            88,
            &[
                "Multiple small follicles along the ovarian periphery".to_string(),
                "Increased ovarian volume".to_string(),
            ],
        )
        .await?;
    }

    Ok(())
}

async fn insert_period(pool: &PgPool, user_id: &str, date: NaiveDate) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO femora.periods (user_id, date)
        VALUES ($1, $2)
        ON CONFLICT (user_id, date) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(date)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Logs `date` for the user, or removes it if it was already logged.
pub async fn toggle_period_date(
    pool: &PgPool,
    user_id: &str,
    date: NaiveDate,
) -> anyhow::Result<Toggle> {
    let removed = sqlx::query("DELETE FROM femora.periods WHERE user_id = $1 AND date = $2")
        .bind(user_id)
        .bind(date)
        .execute(pool)
        .await?;

    if removed.rows_affected() > 0 {
        return Ok(Toggle::Removed);
    }

    insert_period(pool, user_id, date).await?;
    Ok(Toggle::Logged)
}

pub async fn record_diagnosis(
    pool: &PgPool,
    user_id: &str,
    probability: i32,
    confidence: i32,
    findings: &[String],
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO femora.diagnoses (id, user_id, probability, confidence, findings, created_at)
        VALUES ($1, $2, $3, $4, $5, now())
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(probability)
    .bind(confidence)
    .bind(findings)
    .execute(pool)
    .await
    .with_context(|| format!("failed to record diagnosis for {user_id}"))?;
    Ok(id)
}

pub async fn fetch_period_entries(
    pool: &PgPool,
    user_id: &str,
    since_date: NaiveDate,
) -> anyhow::Result<Vec<PeriodLogEntry>> {
    let rows = sqlx::query(
        "SELECT user_id, date FROM femora.periods \
         WHERE user_id = $1 AND date >= $2 \
         ORDER BY date",
    )
    .bind(user_id)
    .bind(since_date)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(PeriodLogEntry {
            user_id: row.get("user_id"),
            date: row.get("date"),
        });
    }

    Ok(entries)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodCsvRow {
    pub user_id: String,
    pub date: NaiveDate,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// Parses `user_id,date[,display_name,email]` rows. Errors name the file line.
pub fn read_period_csv<R: std::io::Read>(input: R, source: &str) -> anyhow::Result<Vec<PeriodCsvRow>> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        user_id: String,
        date: String,
        display_name: Option<String>,
        email: Option<String>,
    }

    let mut reader = csv::Reader::from_reader(input);
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();

    for result in reader.records() {
        let record = result.with_context(|| format!("failed to read {source}"))?;
        let line = record.position().map_or(0, |position| position.line());
        let row: CsvRow = record
            .deserialize(Some(&headers))
            .with_context(|| format!("line {line} of {source}"))?;
        let date = cycles::parse_date(&row.date)
            .with_context(|| format!("line {line} of {source}"))?;

        rows.push(PeriodCsvRow {
            user_id: row.user_id,
            date,
            display_name: row.display_name,
            email: row.email,
        });
    }

    Ok(rows)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = read_period_csv(file, &csv_path.display().to_string())?;
    let mut inserted = 0usize;

    for row in rows {
        upsert_user(pool, &row.user_id, row.display_name.as_deref(), row.email.as_deref())
            .await?;

        if insert_period(pool, &row.user_id, row.date).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Reads context data from the Postgres schema.
#[derive(Clone)]
pub struct PgHealthStore {
    pool: PgPool,
}

impl PgHealthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DiagnosisReader for PgHealthStore {
    async fn latest_diagnosis(&self, user_id: &str) -> anyhow::Result<Option<DiagnosisRecord>> {
        let row = sqlx::query(
            "SELECT probability, confidence, findings, created_at \
             FROM femora.diagnoses WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read latest diagnosis")?;

        Ok(row.map(|row| DiagnosisRecord {
            probability: row.get("probability"),
            confidence: row.get("confidence"),
            findings: row.get::<Vec<String>, _>("findings"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        }))
    }
}

#[async_trait]
impl PeriodLogReader for PgHealthStore {
    async fn period_dates(
        &self,
        user_id: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<NaiveDate>> {
        let entries = fetch_period_entries(&self.pool, user_id, since)
            .await
            .context("failed to read period log")?;
        Ok(entries.into_iter().map(|entry| entry.date).collect())
    }
}

#[async_trait]
impl ProfileReader for PgHealthStore {
    async fn profile(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT id, display_name, email FROM femora.users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read user profile")?;

        Ok(row.map(|row| UserProfile {
            user_id: row.get("id"),
            display_name: row.get("display_name"),
            email: row.get("email"),
        }))
    }
}
