use anyhow::{Context, Result};
use chrono::{Duration, TimeZone, Utc};
use complaint_desk::db::*;
use complaint_desk::dialogue::{ResidenceStatus, Sex, SubmissionKind, SubmissionRecord};
use complaint_desk::services::{Classification, Profile, ProfileStore, SubmissionSink};
use sqlx::PgPool;
use std::env;

/// Helper macro to skip tests when database is not available
macro_rules! skip_if_no_db {
    ($test_fn:expr) => {
        match setup_test_db().await {
            Ok(pool) => $test_fn(&pool).await,
            Err(_) => {
                eprintln!("Skipping test: Database not available");
                Ok(())
            }
        }
    };
}

async fn setup_test_db() -> Result<PgPool> {
    let database_url = match env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping database tests: DATABASE_URL not set");
            return Err(anyhow::anyhow!("Test database not configured"));
        }
    };

    let pool = PgPool::connect(&database_url)
        .await
        .context("Failed to connect to test database")?;

    // Clean up any existing test data
    sqlx::query("DROP TABLE IF EXISTS reminder_notes CASCADE")
        .execute(&pool)
        .await?;
    sqlx::query("DROP TABLE IF EXISTS submissions CASCADE")
        .execute(&pool)
        .await?;
    sqlx::query("DROP TABLE IF EXISTS beneficiaries CASCADE")
        .execute(&pool)
        .await?;

    init_database_schema(&pool).await?;

    Ok(pool)
}

fn profile(telegram_id: i64) -> Profile {
    Profile {
        user_id: telegram_id,
        name: "Ahmed Ali".to_string(),
        sex: Some(Sex::Male),
        phone: Some("0712345678".to_string()),
        residence_status: Some(ResidenceStatus::Resident),
        governorate: Some("Sana'a".to_string()),
        directorate: Some("X".to_string()),
        village: Some("Y".to_string()),
    }
}

fn complaint(telegram_id: i64, text: &str, minutes_ago: i64) -> SubmissionRecord {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() - Duration::minutes(minutes_ago);
    let mut record = SubmissionRecord::new(telegram_id, SubmissionKind::Complaint, at);
    record.apply_profile(&profile(telegram_id));
    record.capture_text(text.to_string(), at);
    record.decide_criticality(false);
    record.classification = Some(Classification::default());
    record
}

#[tokio::test]
async fn test_beneficiary_upsert_merges_fields() -> Result<()> {
    skip_if_no_db!(test_beneficiary_upsert_merges_fields_impl)
}

async fn test_beneficiary_upsert_merges_fields_impl(pool: &PgPool) -> Result<()> {
    assert!(get_beneficiary(pool, 12345).await?.is_none());

    let first_id = upsert_beneficiary(pool, &profile(12345)).await?;
    let stored = get_beneficiary(pool, 12345).await?.expect("beneficiary stored");
    assert_eq!(stored, profile(12345));

    // Missing fields keep what was stored before
    let update = Profile {
        name: "Ahmed Ali Saleh".to_string(),
        phone: None,
        village: Some("Z".to_string()),
        ..profile(12345)
    };
    let second_id = upsert_beneficiary(pool, &update).await?;
    assert_eq!(first_id, second_id);

    let merged = get_beneficiary(pool, 12345).await?.expect("beneficiary stored");
    assert_eq!(merged.name, "Ahmed Ali Saleh");
    assert_eq!(merged.phone.as_deref(), Some("0712345678"));
    assert_eq!(merged.village.as_deref(), Some("Z"));
    assert_eq!(merged.residence_status, Some(ResidenceStatus::Resident));

    Ok(())
}

#[tokio::test]
async fn test_submission_listing_and_references() -> Result<()> {
    skip_if_no_db!(test_submission_listing_and_references_impl)
}

async fn test_submission_listing_and_references_impl(pool: &PgPool) -> Result<()> {
    let store = PgStore::new(pool.clone(), "CMP");
    store.save_profile(&profile(777)).await?;

    let older = store.log_submission(&complaint(777, "No water for two weeks", 30)).await?;
    let newer = store.log_submission(&complaint(777, "Clinic closed since Monday", 5)).await?;
    assert!(older.starts_with("CMP-"));
    assert_ne!(older, newer);

    let mut suggestion = SubmissionRecord::new(777, SubmissionKind::Suggestion, Utc::now());
    suggestion.capture_text("Open the office on Saturdays".to_string(), Utc::now());
    store.log_submission(&suggestion).await?;

    // Suggestions never count as earlier complaints
    let previous = store.previous_submissions(777).await?;
    assert_eq!(previous.len(), 2);
    assert_eq!(previous[0].reference, newer);
    assert_eq!(previous[0].snippet, "Clinic closed since Monday");
    assert_eq!(previous[0].status, "PENDING");
    assert_eq!(previous[1].reference, older);

    assert!(store.previous_submissions(778).await?.is_empty());

    let recent = store.export_recent(2).await?;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].kind, SubmissionKind::Suggestion);

    Ok(())
}

#[tokio::test]
async fn test_reminder_notes() -> Result<()> {
    skip_if_no_db!(test_reminder_notes_impl)
}

async fn test_reminder_notes_impl(pool: &PgPool) -> Result<()> {
    let id = insert_submission(pool, &complaint(42, "Road to the school is blocked", 0)).await?;
    assert_eq!(reminder_count(pool, id).await?, 0);

    let store = PgStore::new(pool.clone(), "CMP");
    store.log_reminder(42, id).await?;
    store.log_reminder(42, id).await?;
    assert_eq!(reminder_count(pool, id).await?, 2);

    // Unknown submission violates the foreign key
    assert!(insert_reminder_note(pool, 42, id + 1000).await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_submission_statistics() -> Result<()> {
    skip_if_no_db!(test_submission_statistics_impl)
}

async fn test_submission_statistics_impl(pool: &PgPool) -> Result<()> {
    let empty = submission_statistics(pool).await?;
    assert_eq!(empty.total, 0);

    insert_submission(pool, &complaint(1, "Electricity cut for three days", 10)).await?;

    let mut urgent = SubmissionRecord::new(2, SubmissionKind::Complaint, Utc::now());
    urgent.name = Some("Mona Saleh".to_string());
    urgent.phone = Some("0770000000".to_string());
    urgent.capture_text("Armed men threatened the family".to_string(), Utc::now());
    urgent.decide_criticality(true);
    insert_submission(pool, &urgent).await?;

    let mut feedback = SubmissionRecord::new(3, SubmissionKind::Feedback, Utc::now());
    feedback.capture_text("Staff were very helpful".to_string(), Utc::now());
    insert_submission(pool, &feedback).await?;

    let stats = submission_statistics(pool).await?;
    assert_eq!(stats.total, 3);
    assert_eq!(stats.critical, 1);
    assert_eq!(stats.complaints, 2);
    assert_eq!(stats.suggestions, 0);
    assert_eq!(stats.feedback, 1);
    assert_eq!(stats.pending, 3);

    Ok(())
}

#[tokio::test]
async fn test_complaint_count_is_not_capped_by_listing() -> Result<()> {
    skip_if_no_db!(test_complaint_count_is_not_capped_by_listing_impl)
}

async fn test_complaint_count_is_not_capped_by_listing_impl(pool: &PgPool) -> Result<()> {
    let store = PgStore::new(pool.clone(), "CMP");
    for minutes_ago in 0..7 {
        store.log_submission(&complaint(555, "Garbage not collected in our area", minutes_ago)).await?;
    }
    let mut feedback = SubmissionRecord::new(555, SubmissionKind::Feedback, Utc::now());
    feedback.capture_text("Thanks for the quick answer".to_string(), Utc::now());
    store.log_submission(&feedback).await?;

    assert_eq!(store.previous_submissions(555).await?.len(), 5);
    assert_eq!(store.complaint_count(555).await?, 7);
    assert_eq!(complaint_count(pool, 556).await?, 0);
    Ok(())
}
