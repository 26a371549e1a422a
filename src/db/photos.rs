//! The AI-results side-table update.

use anyhow::{Context, Result};
use chrono::NaiveDate;

use super::Database;

#[derive(Debug, Clone, Default)]
pub struct AiResults {
    pub person_ids: Vec<String>,
    pub ocr_text: Option<String>,
    pub ocr_date: Option<NaiveDate>,
}

impl Database {
    /// Commits the photo-level side-table update described in §3/§4.8:
    /// `ai_processed_at`, the deduplicated `ai_person_ids`, OCR text/date,
    /// and — only when `update_taken_at` is set and the photo has no
    /// `taken_at` yet — a backfill from the OCR-detected date. An existing
    /// EXIF-derived `taken_at` is never overwritten.
    pub fn update_ai_results(
        &self,
        photo_id: &str,
        results: &AiResults,
        update_taken_at: bool,
    ) -> Result<()> {
        let mut person_ids = results.person_ids.clone();
        person_ids.sort();
        person_ids.dedup();

        let mut conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE photos
            SET ai_processed_at = NOW(),
                ai_person_ids = $2,
                ai_ocr_text = $3,
                ai_ocr_date = $4,
                taken_at = CASE
                    WHEN $5 AND taken_at IS NULL THEN $4::timestamptz
                    ELSE taken_at
                END
            WHERE id = $1
            "#,
            &[
                &photo_id,
                &person_ids,
                &results.ocr_text,
                &results.ocr_date,
                &update_taken_at,
            ],
        )
        .context("update photo AI results")?;
        Ok(())
    }
}
