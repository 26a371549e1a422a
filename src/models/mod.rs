//! Model Cache: a process-wide registry of loaded inference artifacts,
//! lazily loaded and TTL-evicted.
//!
//! Generalizes the teacher's bare `OnceLock<Mutex<Session>>` singletons
//! (`faces/detector.rs`, `clip/model.rs`) into a registry of four logical
//! slots so eviction and `info()` can reason about all of them jointly —
//! the teacher has no eviction at all, so this is new functionality built
//! in the teacher's idiom rather than copied from it.

mod fetch;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::Serialize;

use crate::error::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKey {
    FaceDetection,
    FaceRecognition,
    ClipVisual,
    ClipTextual,
    TextRecognition,
}

impl ModelKey {
    pub const ALL: [ModelKey; 5] = [
        ModelKey::FaceDetection,
        ModelKey::FaceRecognition,
        ModelKey::ClipVisual,
        ModelKey::ClipTextual,
        ModelKey::TextRecognition,
    ];

    /// Source repository for this artifact, grounded in the reference
    /// `ModelManager.MODELS` table (`TextRecognition` is new: the reference
    /// pulls a turnkey `rapidocr_onnxruntime` package instead of a named
    /// model file, so its repo/file pair is sourced from a PP-OCRv4 mobile
    /// recognition export rather than that table).
    fn repo(self) -> &'static str {
        match self {
            ModelKey::FaceDetection | ModelKey::FaceRecognition => "public-data/insightface",
            ModelKey::ClipVisual => "Qdrant/clip-ViT-B-32-vision",
            ModelKey::ClipTextual => "Qdrant/clip-ViT-B-32-text",
            ModelKey::TextRecognition => "PaddlePaddle/PP-OCRv4_mobile_rec",
        }
    }

    fn remote_file(self) -> &'static str {
        match self {
            ModelKey::FaceDetection => "models/buffalo_l/det_10g.onnx",
            ModelKey::FaceRecognition => "models/buffalo_l/w600k_r50.onnx",
            ModelKey::ClipVisual | ModelKey::ClipTextual => "model.onnx",
            ModelKey::TextRecognition => "inference.onnx",
        }
    }

    fn canonical_filename(self) -> &'static str {
        match self {
            ModelKey::FaceDetection => "face_detection.onnx",
            ModelKey::FaceRecognition => "face_recognition.onnx",
            ModelKey::ClipVisual => "clip_visual.onnx",
            ModelKey::ClipTextual => "clip_textual.onnx",
            ModelKey::TextRecognition => "text_recognition.onnx",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKey::FaceDetection => "face_detection",
            ModelKey::FaceRecognition => "face_recognition",
            ModelKey::ClipVisual => "clip_visual",
            ModelKey::ClipTextual => "clip_textual",
            ModelKey::TextRecognition => "text_recognition",
        }
    }
}

struct CacheEntry {
    session: Arc<Mutex<Session>>,
    last_used: Instant,
    size_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: &'static str,
    pub size_mb: f64,
    pub idle_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub loaded: Vec<ModelInfo>,
    pub memory_used_mb: f64,
    pub ttl_seconds: u64,
}

pub struct ModelCache {
    models_dir: PathBuf,
    repo_override: Option<String>,
    threads: usize,
    ttl: Duration,
    entries: Mutex<HashMap<ModelKey, CacheEntry>>,
}

impl ModelCache {
    pub fn new(models_dir: PathBuf, repo_override: Option<String>, threads: usize, ttl_secs: u64) -> Self {
        Self {
            models_dir,
            repo_override,
            threads,
            ttl: Duration::from_secs(ttl_secs),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached session for `key`, loading it (double-checked
    /// under the same exclusive section, so contended `load` calls never
    /// construct the same model twice) if it isn't resident. Model
    /// construction can take tens of seconds; callers must tolerate the
    /// blocking duration, which is why this is always invoked from
    /// `spawn_blocking` in the worker loop.
    pub fn load(&self, key: ModelKey) -> Result<Arc<Mutex<Session>>, CacheError> {
        let mut entries = self.entries.lock().expect("model cache mutex poisoned");

        if let Some(entry) = entries.get_mut(&key) {
            entry.last_used = Instant::now();
            return Ok(entry.session.clone());
        }

        let path = fetch::ensure_model(&self.models_dir, key, self.repo_override.as_deref())?;

        let intra_threads = if self.threads == 0 { num_cpus() } else { self.threads };

        let session = Session::builder()
            .map_err(|e| CacheError::SessionInit(key.canonical_filename(), e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| CacheError::SessionInit(key.canonical_filename(), e.to_string()))?
            .with_intra_threads(intra_threads)
            .map_err(|e| CacheError::SessionInit(key.canonical_filename(), e.to_string()))?
            .with_inter_threads(1)
            .map_err(|e| CacheError::SessionInit(key.canonical_filename(), e.to_string()))?
            .commit_from_file(&path)
            .map_err(|e| CacheError::SessionInit(key.canonical_filename(), e.to_string()))?;

        let size_mb = std::fs::metadata(&path)
            .map(|meta| meta.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        let arc = Arc::new(Mutex::new(session));
        entries.insert(
            key,
            CacheEntry {
                session: arc.clone(),
                last_used: Instant::now(),
                size_mb,
            },
        );

        tracing::info!(model = key.as_str(), size_mb, "model loaded");
        Ok(arc)
    }

    pub fn unload(&self, key: ModelKey) -> bool {
        let mut entries = self.entries.lock().expect("model cache mutex poisoned");
        let removed = entries.remove(&key).is_some();
        if removed {
            tracing::info!(model = key.as_str(), "model unloaded");
        }
        removed
    }

    /// Drops every entry idle longer than the configured TTL. No-op if
    /// TTL is zero.
    pub fn evict_expired(&self) -> usize {
        if self.ttl.is_zero() {
            return 0;
        }
        let mut entries = self.entries.lock().expect("model cache mutex poisoned");
        let now = Instant::now();
        let expired: Vec<ModelKey> = entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_used) > self.ttl)
            .map(|(k, _)| *k)
            .collect();
        for key in &expired {
            entries.remove(key);
            tracing::info!(model = key.as_str(), "model evicted (idle TTL exceeded)");
        }
        expired.len()
    }

    pub fn unload_all(&self) -> usize {
        let mut entries = self.entries.lock().expect("model cache mutex poisoned");
        let n = entries.len();
        entries.clear();
        if n > 0 {
            tracing::info!(count = n, "all models unloaded");
        }
        n
    }

    pub fn is_any_loaded(&self) -> bool {
        !self.entries.lock().expect("model cache mutex poisoned").is_empty()
    }

    pub fn info(&self) -> CacheSnapshot {
        let entries = self.entries.lock().expect("model cache mutex poisoned");
        let now = Instant::now();
        let loaded: Vec<ModelInfo> = entries
            .iter()
            .map(|(key, e)| ModelInfo {
                name: key.as_str(),
                size_mb: e.size_mb,
                idle_seconds: now.duration_since(e.last_used).as_secs(),
            })
            .collect();
        let memory_used_mb = loaded.iter().map(|m| m.size_mb).sum();
        CacheSnapshot {
            loaded,
            memory_used_mb,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unload_all_reports_prior_count_and_empties_cache() {
        // ModelCache::new doesn't touch the filesystem or ONNX runtime until
        // load() is called, so this exercises the bookkeeping in isolation.
        let cache = ModelCache::new(PathBuf::from("/tmp/does-not-matter"), None, 0, 1800);
        assert_eq!(cache.unload_all(), 0);
        assert!(!cache.is_any_loaded());
    }

    #[test]
    fn evict_expired_is_noop_with_zero_ttl() {
        let cache = ModelCache::new(PathBuf::from("/tmp/does-not-matter"), None, 0, 0);
        assert_eq!(cache.evict_expired(), 0);
    }
}
