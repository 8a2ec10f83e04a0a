//! # Database Module
//!
//! Postgres persistence for beneficiary profiles, submissions and reminder
//! notes. The free functions take a `PgPool` and are what the integration
//! tests exercise; `PgStore` wraps them behind the `ProfileStore` and
//! `SubmissionSink` traits the conversation engine consumes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Row};
use tracing::{debug, info};

use crate::dialogue::{truncate_preview, ResidenceStatus, Sex, SubmissionKind, SubmissionRecord};
use crate::services::{Profile, ProfileStore, SubmissionOverview, SubmissionSink, SubmissionStats};

const SNIPPET_LENGTH: usize = 80;

pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS beneficiaries (
            id BIGSERIAL PRIMARY KEY,
            telegram_id BIGINT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            sex TEXT,
            phone TEXT,
            residence_status TEXT,
            governorate TEXT,
            directorate TEXT,
            village TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create beneficiaries table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS submissions (
            id BIGSERIAL PRIMARY KEY,
            telegram_id BIGINT NOT NULL,
            beneficiary_id BIGINT REFERENCES beneficiaries(id) ON DELETE SET NULL,
            kind TEXT NOT NULL,
            name TEXT,
            sex TEXT,
            phone TEXT,
            residence_status TEXT,
            governorate TEXT,
            directorate TEXT,
            village TEXT,
            original_text TEXT NOT NULL,
            summary_en TEXT,
            complaint_type TEXT,
            complaint_category TEXT,
            sensitivity TEXT,
            is_critical BOOLEAN NOT NULL DEFAULT FALSE,
            status TEXT NOT NULL DEFAULT 'PENDING',
            source_channel TEXT NOT NULL DEFAULT 'TELEGRAM',
            submitted_at TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create submissions table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS reminder_notes (
            id BIGSERIAL PRIMARY KEY,
            telegram_id BIGINT NOT NULL,
            submission_id BIGINT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create reminder_notes table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_submissions_telegram_id ON submissions(telegram_id)")
        .execute(pool)
        .await
        .context("Failed to create submissions index")?;

    info!("Database schema initialized successfully");
    Ok(())
}

#[derive(Debug, FromRow)]
struct BeneficiaryRow {
    telegram_id: i64,
    name: String,
    sex: Option<String>,
    phone: Option<String>,
    residence_status: Option<String>,
    governorate: Option<String>,
    directorate: Option<String>,
    village: Option<String>,
}

impl From<BeneficiaryRow> for Profile {
    fn from(row: BeneficiaryRow) -> Self {
        Profile {
            user_id: row.telegram_id,
            name: row.name,
            sex: row.sex.as_deref().and_then(Sex::from_code),
            phone: row.phone,
            residence_status: row.residence_status.as_deref().and_then(ResidenceStatus::from_code),
            governorate: row.governorate,
            directorate: row.directorate,
            village: row.village,
        }
    }
}

#[derive(Debug, FromRow)]
struct OverviewRow {
    id: i64,
    kind: String,
    is_critical: bool,
    status: String,
    submitted_at: DateTime<Utc>,
    original_text: String,
}

impl OverviewRow {
    fn into_overview(self, reference_prefix: &str) -> SubmissionOverview {
        SubmissionOverview {
            id: self.id,
            reference: format_reference(reference_prefix, self.id),
            kind: SubmissionKind::parse(&self.kind).unwrap_or(SubmissionKind::Complaint),
            is_critical: self.is_critical,
            status: self.status,
            submitted_at: self.submitted_at,
            snippet: truncate_preview(&self.original_text, SNIPPET_LENGTH),
        }
    }
}

/// Human-facing reference id for a submission row
pub fn format_reference(prefix: &str, id: i64) -> String {
    format!("{prefix}-{id:06}")
}

pub async fn get_beneficiary(pool: &PgPool, telegram_id: i64) -> Result<Option<Profile>> {
    let row = sqlx::query_as::<_, BeneficiaryRow>(
        "SELECT telegram_id, name, sex, phone, residence_status, governorate, directorate, village
         FROM beneficiaries WHERE telegram_id = $1",
    )
    .bind(telegram_id)
    .fetch_optional(pool)
    .await
    .context("Failed to load beneficiary")?;

    Ok(row.map(Profile::from))
}

/// Insert or merge a beneficiary; empty incoming fields keep the stored value
pub async fn upsert_beneficiary(pool: &PgPool, profile: &Profile) -> Result<i64> {
    let row = sqlx::query(
        "INSERT INTO beneficiaries
            (telegram_id, name, sex, phone, residence_status, governorate, directorate, village)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (telegram_id) DO UPDATE SET
            name = EXCLUDED.name,
            sex = COALESCE(EXCLUDED.sex, beneficiaries.sex),
            phone = COALESCE(EXCLUDED.phone, beneficiaries.phone),
            residence_status = COALESCE(EXCLUDED.residence_status, beneficiaries.residence_status),
            governorate = COALESCE(EXCLUDED.governorate, beneficiaries.governorate),
            directorate = COALESCE(EXCLUDED.directorate, beneficiaries.directorate),
            village = COALESCE(EXCLUDED.village, beneficiaries.village),
            updated_at = NOW()
         RETURNING id",
    )
    .bind(profile.user_id)
    .bind(&profile.name)
    .bind(profile.sex.map(|s| s.code()))
    .bind(&profile.phone)
    .bind(profile.residence_status.map(|r| r.code()))
    .bind(&profile.governorate)
    .bind(&profile.directorate)
    .bind(&profile.village)
    .fetch_one(pool)
    .await
    .context("Failed to save beneficiary")?;

    Ok(row.get("id"))
}

/// Store a finalized record; links the beneficiary row when one exists
pub async fn insert_submission(pool: &PgPool, record: &SubmissionRecord) -> Result<i64> {
    let classification = record.classification.as_ref();
    let original_text = record.original_text.as_deref().unwrap_or_default();

    let row = sqlx::query(
        "INSERT INTO submissions
            (telegram_id, beneficiary_id, kind, name, sex, phone, residence_status, governorate,
             directorate, village, original_text, summary_en, complaint_type, complaint_category,
             sensitivity, is_critical, submitted_at)
         VALUES ($1, (SELECT id FROM beneficiaries WHERE telegram_id = $1), $2, $3, $4, $5, $6,
                 $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
         RETURNING id",
    )
    .bind(record.user_id)
    .bind(record.kind.as_str())
    .bind(&record.name)
    .bind(record.sex.map(|s| s.code()))
    .bind(&record.phone)
    .bind(record.residence_status.map(|r| r.code()))
    .bind(&record.governorate)
    .bind(&record.directorate)
    .bind(&record.village)
    .bind(original_text)
    .bind(&record.derived_summary)
    .bind(classification.map(|c| c.complaint_type.as_str()))
    .bind(classification.map(|c| c.category.as_str()))
    .bind(classification.map(|c| c.sensitivity.as_str()))
    .bind(record.is_critical())
    .bind(record.source_timestamp.unwrap_or(record.created_at))
    .fetch_one(pool)
    .await
    .context("Failed to insert submission")?;

    let id: i64 = row.get("id");
    debug!(submission_id = id, user_id = record.user_id, kind = record.kind.as_str(), "Submission stored");
    Ok(id)
}

/// A user's complaints, most recent first
pub async fn complaints_for_user(
    pool: &PgPool,
    telegram_id: i64,
    limit: i64,
    reference_prefix: &str,
) -> Result<Vec<SubmissionOverview>> {
    let rows = sqlx::query_as::<_, OverviewRow>(
        "SELECT id, kind, is_critical, status, submitted_at, original_text
         FROM submissions WHERE telegram_id = $1 AND kind = 'complaint'
         ORDER BY submitted_at DESC, id DESC LIMIT $2",
    )
    .bind(telegram_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to list user complaints")?;

    Ok(rows.into_iter().map(|r| r.into_overview(reference_prefix)).collect())
}

pub async fn complaint_count(pool: &PgPool, telegram_id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM submissions WHERE telegram_id = $1 AND kind = 'complaint'")
        .bind(telegram_id)
        .fetch_one(pool)
        .await
        .context("Failed to count user complaints")?;

    Ok(row.get("count"))
}

pub async fn recent_submissions(pool: &PgPool, limit: i64, reference_prefix: &str) -> Result<Vec<SubmissionOverview>> {
    let rows = sqlx::query_as::<_, OverviewRow>(
        "SELECT id, kind, is_critical, status, submitted_at, original_text
         FROM submissions ORDER BY submitted_at DESC, id DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to list recent submissions")?;

    Ok(rows.into_iter().map(|r| r.into_overview(reference_prefix)).collect())
}

pub async fn insert_reminder_note(pool: &PgPool, telegram_id: i64, submission_id: i64) -> Result<i64> {
    let row = sqlx::query(
        "INSERT INTO reminder_notes (telegram_id, submission_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(telegram_id)
    .bind(submission_id)
    .fetch_one(pool)
    .await
    .context("Failed to insert reminder note")?;

    Ok(row.get("id"))
}

pub async fn reminder_count(pool: &PgPool, submission_id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM reminder_notes WHERE submission_id = $1")
        .bind(submission_id)
        .fetch_one(pool)
        .await
        .context("Failed to count reminder notes")?;

    Ok(row.get("count"))
}

pub async fn submission_statistics(pool: &PgPool) -> Result<SubmissionStats> {
    let row = sqlx::query(
        "SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE is_critical) AS critical,
            COUNT(*) FILTER (WHERE kind = 'complaint') AS complaints,
            COUNT(*) FILTER (WHERE kind = 'suggestion') AS suggestions,
            COUNT(*) FILTER (WHERE kind = 'feedback') AS feedback,
            COUNT(*) FILTER (WHERE status = 'PENDING') AS pending
         FROM submissions",
    )
    .fetch_one(pool)
    .await
    .context("Failed to compute submission statistics")?;

    Ok(SubmissionStats {
        total: row.get("total"),
        critical: row.get("critical"),
        complaints: row.get("complaints"),
        suggestions: row.get("suggestions"),
        feedback: row.get("feedback"),
        pending: row.get("pending"),
    })
}

/// `ProfileStore` and `SubmissionSink` over a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    reference_prefix: String,
}

impl PgStore {
    pub fn new(pool: PgPool, reference_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            reference_prefix: reference_prefix.into(),
        }
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn get_profile(&self, user_id: i64) -> Result<Option<Profile>> {
        get_beneficiary(&self.pool, user_id).await
    }

    async fn save_profile(&self, profile: &Profile) -> Result<bool> {
        upsert_beneficiary(&self.pool, profile).await?;
        Ok(true)
    }
}

#[async_trait]
impl SubmissionSink for PgStore {
    async fn log_submission(&self, record: &SubmissionRecord) -> Result<String> {
        let id = insert_submission(&self.pool, record).await?;
        Ok(format_reference(&self.reference_prefix, id))
    }

    async fn previous_submissions(&self, user_id: i64) -> Result<Vec<SubmissionOverview>> {
        complaints_for_user(&self.pool, user_id, 5, &self.reference_prefix).await
    }

    async fn complaint_count(&self, user_id: i64) -> Result<i64> {
        complaint_count(&self.pool, user_id).await
    }

    async fn log_reminder(&self, user_id: i64, submission_id: i64) -> Result<()> {
        insert_reminder_note(&self.pool, user_id, submission_id).await?;
        Ok(())
    }

    async fn statistics(&self) -> Result<SubmissionStats> {
        submission_statistics(&self.pool).await
    }

    async fn export_recent(&self, limit: i64) -> Result<Vec<SubmissionOverview>> {
        recent_submissions(&self.pool, limit, &self.reference_prefix).await
    }
}
