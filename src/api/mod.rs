//! HTTP control plane: liveness, worker status/control, queue and model
//! cache introspection, and a live configuration snapshot.
//!
//! Router and handler shape follow `seanchatmangpt-knhk`'s
//! `api/rest/handlers.rs` (`State<Arc<T>>` extractor, one handler function
//! per route, `(StatusCode, Json(...))` responses) — the teacher repo has no
//! HTTP surface of its own to generalize from.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::worker::{RunStats, Worker, WorkerControlError};

pub fn router(worker: Arc<Worker>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/run", post(run))
        .route("/api/v1/stop", post(stop))
        .route("/api/v1/queue", get(queue))
        .route("/api/v1/config", get(get_config).put(put_config))
        .route("/api/v1/models", get(models))
        .route("/api/v1/models/reload", post(models_reload))
        .layer(TraceLayer::new_for_http())
        .with_state(worker)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "device": "cpu",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(worker): State<Arc<Worker>>) -> impl IntoResponse {
    let state = worker.state();
    let last_run = worker.last_run();
    let last_activity = worker.last_activity();

    let db = worker.db().clone();
    let pending = tokio::task::spawn_blocking(move || db.pending_count())
        .await
        .unwrap_or(Ok(0))
        .unwrap_or(0);

    let estimated_time = estimate_eta(pending, last_run.as_ref());

    Json(json!({
        "state": state,
        "last_run": last_run,
        "last_activity": last_activity,
        "pending": pending,
        "estimated_time": estimated_time,
    }))
}

async fn run(State(worker): State<Arc<Worker>>) -> impl IntoResponse {
    match worker.start() {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "started" }))),
        Err(WorkerControlError::AlreadyRunning) => {
            (StatusCode::CONFLICT, Json(json!({ "status": "already_running" })))
        }
        Err(WorkerControlError::NotRunning) => {
            (StatusCode::CONFLICT, Json(json!({ "status": "not_running" })))
        }
    }
}

async fn stop(State(worker): State<Arc<Worker>>) -> impl IntoResponse {
    match worker.request_stop() {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "stopping" }))),
        Err(WorkerControlError::NotRunning) => {
            (StatusCode::CONFLICT, Json(json!({ "status": "not_running" })))
        }
        Err(WorkerControlError::AlreadyRunning) => {
            (StatusCode::CONFLICT, Json(json!({ "status": "already_running" })))
        }
    }
}

async fn queue(State(worker): State<Arc<Worker>>) -> impl IntoResponse {
    let db = worker.db().clone();
    let stats = tokio::task::spawn_blocking(move || db.queue_stats()).await;

    match stats {
        Ok(Ok(stats)) => {
            let total_pending = stats.pending;
            let last_run = worker.last_run();
            let estimated_time = estimate_eta(total_pending, last_run.as_ref());
            (
                StatusCode::OK,
                Json(json!({
                    "total_pending": total_pending,
                    "by_status": {
                        "pending": stats.pending,
                        "processing": stats.processing,
                        "done": stats.done,
                        "error": stats.error,
                    },
                    "estimated_time": estimated_time,
                })),
            )
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to read queue stats" })),
        ),
    }
}

async fn get_config(State(worker): State<Arc<Worker>>) -> impl IntoResponse {
    Json(worker.config().as_ref().clone())
}

/// Accepts a config snapshot and acknowledges it; almost every setting
/// this service exposes is read once at startup, so applying a change at
/// runtime would silently diverge from the process's actual behavior.
/// Matches the distilled spec's "most settings require restart" contract.
async fn put_config(Json(_body): Json<serde_json::Value>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "acknowledged", "note": "most settings require a restart to take effect" })),
    )
}

async fn models(State(worker): State<Arc<Worker>>) -> impl IntoResponse {
    Json(worker.models().info())
}

async fn models_reload(State(worker): State<Arc<Worker>>) -> impl IntoResponse {
    let unloaded = worker.models().unload_all();
    worker.tagger().clear_cache();
    Json(json!({ "status": "reloaded", "unloaded": unloaded }))
}

/// §6's ETA formula: average per-photo duration from the last completed
/// run, times the current pending count. `None` before any run has
/// completed at least one photo.
fn estimate_eta(pending: i64, last_run: Option<&RunStats>) -> Option<String> {
    let run = last_run?;
    if run.photos_processed == 0 {
        return None;
    }
    let started = run.started_at?;
    let completed = run.completed_at?;
    let elapsed = (completed - started).num_milliseconds().max(0) as f64 / 1000.0;
    let average_secs = elapsed / run.photos_processed as f64;
    let eta_secs = average_secs * pending as f64;
    Some(format_duration(eta_secs))
}

fn format_duration(secs: f64) -> String {
    let secs = secs.max(0.0).round() as u64;
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("~{}min", secs / 60)
    } else {
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        if minutes == 0 {
            format!("~{hours}h")
        } else {
            format!("~{hours}h {minutes}m")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_seconds() {
        assert_eq!(format_duration(42.0), "42s");
    }

    #[test]
    fn formats_minutes() {
        assert_eq!(format_duration(125.0), "~2min");
    }

    #[test]
    fn formats_hours_and_minutes() {
        assert_eq!(format_duration(3 * 3600 + 5 * 60), "~3h 5m");
    }

    #[test]
    fn omits_zero_minutes() {
        assert_eq!(format_duration(2.0 * 3600.0), "~2h");
    }
}
