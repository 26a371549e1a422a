//! Model artifact acquisition: fetch-by-(repo, filename) into a canonical
//! local path, the way `faces::detector::ensure_model` does it in the
//! application this worker is adapted from, generalized to a Hugging
//! Face Hub–style resolve URL and a rename step into a fixed local name.

use std::path::{Path, PathBuf};

use crate::error::CacheError;

use super::ModelKey;

/// Ensures the blob for `key` is materialized under `models_dir`, fetching
/// it if absent. Treated as an opaque blob fetcher — the content itself is
/// never inspected.
pub fn ensure_model(models_dir: &Path, key: ModelKey, repo_override: Option<&str>) -> Result<PathBuf, CacheError> {
    std::fs::create_dir_all(models_dir).map_err(|source| CacheError::Io {
        path: models_dir.display().to_string(),
        source,
    })?;

    let canonical = models_dir.join(key.canonical_filename());
    if canonical.exists() {
        return Ok(canonical);
    }

    let repo = repo_override.unwrap_or(key.repo());
    let url = format!("https://huggingface.co/{repo}/resolve/main/{}", key.remote_file());

    tracing::info!(model = key.canonical_filename(), %url, "fetching model artifact");

    let response = ureq::get(&url)
        .call()
        .map_err(|source| CacheError::Fetch {
            name: key.canonical_filename(),
            source,
        })?;

    let tmp_path = canonical.with_extension("part");
    let mut file = std::fs::File::create(&tmp_path).map_err(|source| CacheError::Io {
        path: tmp_path.display().to_string(),
        source,
    })?;
    std::io::copy(&mut response.into_reader(), &mut file).map_err(|source| CacheError::Io {
        path: tmp_path.display().to_string(),
        source,
    })?;
    drop(file);

    std::fs::rename(&tmp_path, &canonical).map_err(|source| CacheError::Io {
        path: canonical.display().to_string(),
        source,
    })?;

    tracing::info!(model = key.canonical_filename(), "model artifact ready");
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_existing_blob_without_fetching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let canonical = dir.path().join(ModelKey::FaceDetection.canonical_filename());
        std::fs::write(&canonical, b"not a real model").unwrap();

        let resolved = ensure_model(dir.path(), ModelKey::FaceDetection, None).expect("ensure_model");
        assert_eq!(resolved, canonical);
    }
}
