//! Worker Loop: drains the photo queue through face detection, face
//! embedding + clustering, CLIP tagging, and date OCR.
//!
//! State machine and cancellation follow the teacher's
//! `tasks/manager.rs::BackgroundTaskManager` idiom (an `Arc<AtomicBool>`
//! cancel flag checked cooperatively between units of work) generalized
//! from "one flag per registered task" down to the single worker this
//! service runs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::db::{AiResults, Database, WorkItem};
use crate::error::StageOutcome;
use crate::faces::{FaceDetector, FaceEmbedder, PersonClusterer};
use crate::models::ModelCache;
use crate::ocr::{DateOcr, OrtTextLineReader, TextLineReader, UnavailableTextLineReader};
use crate::tagger::Tagger;

/// Rows stuck in `processing` past this many seconds are requeued at the
/// start of every run. Not independently configurable in the retrieved
/// reference configuration; resolved as an Open Question in DESIGN.md.
const STUCK_TIMEOUT_SECS: i64 = 1800;

/// Delay before rechecking the pending count after an empty claim,
/// matching the reference implementation's `asyncio.sleep(5)`.
const EMPTY_QUEUE_RECHECK_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Processing,
    Stopping,
    Error,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub photos_processed: u64,
    pub faces_detected: u64,
    pub persons_created: u64,
    pub tags_assigned: u64,
    pub ocr_dates_found: u64,
    pub errors: u64,
}

#[derive(Debug, Error)]
pub enum WorkerControlError {
    #[error("worker is already processing")]
    AlreadyRunning,
    #[error("worker is not processing")]
    NotRunning,
}

#[derive(Debug, Default)]
struct PhotoDelta {
    faces_detected: u64,
    persons_created: u64,
    tags_assigned: u64,
    ocr_date_found: bool,
}

pub struct Worker {
    db: Arc<Database>,
    models: Arc<ModelCache>,
    detector: FaceDetector,
    embedder: FaceEmbedder,
    clusterer: Arc<PersonClusterer>,
    tagger: Arc<Tagger>,
    ocr: DateOcr,
    config: Arc<Config>,
    state: Mutex<WorkerState>,
    cancel: Arc<AtomicBool>,
    last_run: Mutex<Option<RunStats>>,
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

impl Worker {
    pub fn new(config: Arc<Config>, db: Arc<Database>, models: Arc<ModelCache>, tagger: Arc<Tagger>) -> Result<Self> {
        let detector = FaceDetector::new(
            models.clone(),
            config.faces.min_confidence,
            config.faces.min_size,
            config.faces.max_per_photo,
        );
        let embedder = FaceEmbedder::new(models.clone());
        let clusterer = Arc::new(PersonClusterer::load(&db).context("seed person clusterer gallery")?);

        let reader: Box<dyn TextLineReader> = if config.ocr.enabled {
            Box::new(OrtTextLineReader::new(models.clone()))
        } else {
            Box::new(UnavailableTextLineReader)
        };
        let ocr = DateOcr::new(reader, config.ocr.mode, config.ocr.min_confidence);

        Ok(Self {
            db,
            models,
            detector,
            embedder,
            clusterer,
            tagger,
            ocr,
            config,
            state: Mutex::new(WorkerState::Idle),
            cancel: Arc::new(AtomicBool::new(false)),
            last_run: Mutex::new(None),
            last_activity: Mutex::new(None),
        })
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().expect("worker state mutex poisoned")
    }

    pub fn last_run(&self) -> Option<RunStats> {
        self.last_run.lock().expect("worker last_run mutex poisoned").clone()
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.lock().expect("worker last_activity mutex poisoned")
    }

    pub fn models(&self) -> &Arc<ModelCache> {
        &self.models
    }

    pub fn tagger(&self) -> &Arc<Tagger> {
        &self.tagger
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Starts a new run if the worker is idle (or in the transient `error`
    /// state, which resets to `processing`). A request made while already
    /// `processing` is a logged no-op, not a second concurrent drain.
    pub fn start(self: &Arc<Self>) -> Result<(), WorkerControlError> {
        {
            let mut state = self.state.lock().expect("worker state mutex poisoned");
            if *state == WorkerState::Processing {
                return Err(WorkerControlError::AlreadyRunning);
            }
            *state = WorkerState::Processing;
        }
        self.cancel.store(false, Ordering::SeqCst);

        let worker = self.clone();
        tokio::spawn(async move { worker.run_loop().await });
        Ok(())
    }

    /// Requests a cooperative stop. Takes effect within one photo's
    /// processing time, not one whole run.
    pub fn request_stop(&self) -> Result<(), WorkerControlError> {
        let mut state = self.state.lock().expect("worker state mutex poisoned");
        if *state != WorkerState::Processing {
            return Err(WorkerControlError::NotRunning);
        }
        *state = WorkerState::Stopping;
        self.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        let started_at = Utc::now();
        let mut stats = RunStats {
            started_at: Some(started_at),
            ..Default::default()
        };

        {
            let db = self.db.clone();
            match tokio::task::spawn_blocking(move || db.reset_stuck(STUCK_TIMEOUT_SECS)).await {
                Ok(Ok(reset)) if reset > 0 => tracing::info!(count = reset, "reset stuck queue rows"),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "reset_stuck failed at run start"),
                Err(e) => tracing::error!(error = %e, "reset_stuck task panicked"),
            }
        }

        let mut empty_observations = 0u32;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }

            let db = self.db.clone();
            let claimed = tokio::task::spawn_blocking(move || db.claim_next()).await;
            let item = match claimed {
                Ok(Ok(item)) => item,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "claim_next failed");
                    None
                }
                Err(e) => {
                    tracing::error!(error = %e, "claim_next task panicked");
                    None
                }
            };

            let Some(item) = item else {
                empty_observations += 1;
                if empty_observations >= 2 {
                    break;
                }
                tokio::time::sleep(EMPTY_QUEUE_RECHECK_DELAY).await;
                continue;
            };
            empty_observations = 0;

            if self.config.logging.log_each_photo {
                tracing::debug!(photo_id = %item.photo_id, "processing photo");
            }

            let worker = self.clone();
            let item_for_blocking = item.clone();
            let outcome = tokio::task::spawn_blocking(move || worker.process_photo(&item_for_blocking)).await;

            match outcome {
                Ok(Ok(delta)) => {
                    stats.photos_processed += 1;
                    stats.faces_detected += delta.faces_detected;
                    stats.persons_created += delta.persons_created;
                    stats.tags_assigned += delta.tags_assigned;
                    if delta.ocr_date_found {
                        stats.ocr_dates_found += 1;
                    }
                }
                Ok(Err(e)) => {
                    stats.errors += 1;
                    tracing::warn!(photo_id = %item.photo_id, error = %e, "photo processing failed");
                    let db = self.db.clone();
                    let photo_id = item.photo_id.clone();
                    let message = e.to_string();
                    let max_retries = self.config.max_retries;
                    let fail_result =
                        tokio::task::spawn_blocking(move || db.fail(&photo_id, &message, max_retries)).await;
                    match fail_result {
                        Ok(Err(e)) => tracing::error!(error = %e, "failed to record photo failure in queue"),
                        Err(e) => tracing::error!(error = %e, "fail() task panicked"),
                        Ok(Ok(())) => {}
                    }
                }
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!(photo_id = %item.photo_id, error = %e, "photo processing task panicked");
                }
            }

            *self.last_activity.lock().expect("worker last_activity mutex poisoned") = Some(Utc::now());

            if self.config.performance.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.performance.delay_ms)).await;
            }
        }

        stats.completed_at = Some(Utc::now());
        tracing::info!(
            photos_processed = stats.photos_processed,
            faces_detected = stats.faces_detected,
            persons_created = stats.persons_created,
            tags_assigned = stats.tags_assigned,
            ocr_dates_found = stats.ocr_dates_found,
            errors = stats.errors,
            "worker run complete"
        );

        *self.last_run.lock().expect("worker last_run mutex poisoned") = Some(stats);
        *self.state.lock().expect("worker state mutex poisoned") = WorkerState::Idle;
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// Runs the full per-photo pipeline. Called from `spawn_blocking`: every
    /// step here is either CPU-bound inference or a blocking `postgres`
    /// call. A missing/unreadable source image is the one failure that
    /// aborts the whole photo; each AI stage failure is caught and recorded
    /// individually so it doesn't masquerade as a different stage's error.
    fn process_photo(&self, item: &WorkItem) -> Result<PhotoDelta> {
        let photo_id = &item.photo_id;
        let img = self.load_photo_image(photo_id)?;

        let mut delta = PhotoDelta::default();
        let mut results = AiResults::default();

        if self.config.faces.enabled {
            match self.run_face_stage(photo_id, &img) {
                StageOutcome::Ok((person_ids, faces_detected, persons_created)) => {
                    results.person_ids = person_ids;
                    delta.faces_detected = faces_detected;
                    delta.persons_created = persons_created;
                }
                StageOutcome::Skipped { reason } => {
                    tracing::debug!(photo_id = %photo_id, reason, "face stage skipped");
                }
                StageOutcome::Failed { stage, message } => {
                    tracing::warn!(photo_id = %photo_id, stage, message, "face stage failed");
                }
            }
        }

        if self.config.tags.enabled {
            match self.run_tag_stage(photo_id, &img) {
                StageOutcome::Ok(tags_assigned) => delta.tags_assigned = tags_assigned,
                StageOutcome::Skipped { reason } => {
                    tracing::debug!(photo_id = %photo_id, reason, "tag stage skipped");
                }
                StageOutcome::Failed { stage, message } => {
                    tracing::warn!(photo_id = %photo_id, stage, message, "tag stage failed");
                }
            }
        }

        if self.config.ocr.enabled {
            match self.run_ocr_stage(&img) {
                StageOutcome::Ok((text, date)) => {
                    delta.ocr_date_found = date.is_some();
                    results.ocr_text = text;
                    results.ocr_date = date;
                }
                StageOutcome::Skipped { reason } => {
                    tracing::debug!(photo_id = %photo_id, reason, "ocr stage skipped");
                }
                StageOutcome::Failed { stage, message } => {
                    tracing::warn!(photo_id = %photo_id, stage, message, "ocr stage failed");
                }
            }
        }

        self.db
            .update_ai_results(photo_id, &results, self.config.ocr.update_taken_at)
            .context("update photo AI results")?;
        self.db.complete(photo_id).context("mark queue row complete")?;

        Ok(delta)
    }

    fn load_photo_image(&self, photo_id: &str) -> Result<DynamicImage> {
        let path = photo_preview_path(&self.config.paths.media_path, photo_id);
        image::open(&path).with_context(|| format!("failed to load photo preview at {}", path.display()))
    }

    fn run_face_stage(&self, photo_id: &str, img: &DynamicImage) -> StageOutcome<(Vec<String>, u64, u64)> {
        let faces = match self.detector.detect(img) {
            Ok(faces) => faces,
            Err(e) => {
                return StageOutcome::Failed {
                    stage: "face_detect",
                    message: e.to_string(),
                }
            }
        };

        if faces.is_empty() {
            return StageOutcome::Skipped { reason: "no faces detected" };
        }

        let embeddings = self.embedder.embed_all(img, &faces);
        let before = self.clusterer.person_count();
        let mut person_ids = Vec::new();

        for (face, embedding) in faces.iter().zip(embeddings.iter()) {
            let Some(embedding) = embedding else {
                continue;
            };

            let person_id = match self.clusterer.assign(&self.db, embedding, self.config.cluster.threshold) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(photo_id = %photo_id, error = %e, "person cluster assignment failed");
                    continue;
                }
            };

            let face_id = uuid::Uuid::new_v4().to_string();
            if let Err(e) = self.db.insert_face(&face_id, &person_id, embedding) {
                tracing::warn!(photo_id = %photo_id, error = %e, "face row insert failed");
                continue;
            }
            if let Err(e) = self.db.insert_photo_face(photo_id, &face_id, &face.bbox, embedding, face.confidence) {
                tracing::warn!(photo_id = %photo_id, error = %e, "photo_face edge insert failed");
                continue;
            }

            person_ids.push(person_id);
        }

        let after = self.clusterer.person_count();
        StageOutcome::Ok((person_ids, faces.len() as u64, (after - before) as u64))
    }

    fn run_tag_stage(&self, photo_id: &str, img: &DynamicImage) -> StageOutcome<u64> {
        let tags = match self.tagger.tag(img) {
            Ok(tags) => tags,
            Err(e) => {
                return StageOutcome::Failed {
                    stage: "tagger",
                    message: e.to_string(),
                }
            }
        };

        if tags.is_empty() {
            return StageOutcome::Skipped { reason: "no tags above threshold" };
        }

        let mut assigned = 0u64;
        for tag in &tags {
            let tag_id = match self.db.ensure_tag(tag.kind, &tag.name) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(photo_id = %photo_id, error = %e, "tag upsert failed");
                    continue;
                }
            };
            if let Err(e) = self.db.insert_photo_tag(photo_id, &tag_id, tag.confidence) {
                tracing::warn!(photo_id = %photo_id, error = %e, "photo_tag edge insert failed");
                continue;
            }
            assigned += 1;
        }

        StageOutcome::Ok(assigned)
    }

    fn run_ocr_stage(&self, img: &DynamicImage) -> StageOutcome<(Option<String>, Option<chrono::NaiveDate>)> {
        match self.ocr.process(img) {
            Ok(result) => StageOutcome::Ok((result.text, result.date)),
            Err(e) => StageOutcome::Failed {
                stage: "ocr",
                message: e.to_string(),
            },
        }
    }
}

fn photo_preview_path(media_path: &str, id: &str) -> PathBuf {
    let mut path = PathBuf::from(media_path);
    debug_assert!(id.len() >= 4, "photo id too short for path sharding: {id}");
    path.push(&id[0..2]);
    path.push(&id[2..4]);
    path.push(format!("{id}_s.webp"));
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_path_shards_by_id_prefix() {
        let path = photo_preview_path("/media", "abcdef1234567890");
        assert_eq!(path, PathBuf::from("/media/ab/cd/abcdef1234567890_s.webp"));
    }
}
