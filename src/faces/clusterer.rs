//! Online person clustering: assigns each new face embedding to an
//! existing person or mints a new `Unknown N` one.
//!
//! Keeps the teacher's `cluster_faces` linear-scan-plus-cosine-similarity
//! shape (`faces/clustering.rs`), generalized from an offline one-shot
//! batch clustering pass into an online `assign()` call made per detected
//! face as photos stream through the worker loop.

use std::sync::Mutex;

use anyhow::Result;
use rand::Rng;

use crate::db::Database;

struct GalleryEntry {
    person_id: String,
    embedding: Vec<f32>,
}

/// In-memory mirror of the face gallery, seeded once from the database and
/// kept current as new faces are assigned. A single coarse mutex guards the
/// whole scan-then-insert critical section of `assign()`, matching the
/// reference implementation's locking granularity.
pub struct PersonClusterer {
    gallery: Mutex<Vec<GalleryEntry>>,
    person_count: Mutex<usize>,
}

impl PersonClusterer {
    /// Seeds the in-memory gallery from every known face embedding.
    pub fn load(db: &Database) -> Result<Self> {
        let faces = db.load_face_gallery()?;
        let person_count = db.person_count()? as usize;
        let gallery = faces
            .into_iter()
            .map(|f| GalleryEntry {
                person_id: f.person_id,
                embedding: f.embedding,
            })
            .collect();

        Ok(Self {
            gallery: Mutex::new(gallery),
            person_count: Mutex::new(person_count),
        })
    }

    /// Assigns `embedding` to the best-matching existing person, or mints a
    /// new one. `threshold` is a cosine-*distance* threshold (`d = 1 -
    /// cosine_similarity`); a gallery member at distance exactly equal to
    /// `threshold` does not count as a match — the comparison is strict `<`.
    pub fn assign(&self, db: &Database, embedding: &[f32], threshold: f32) -> Result<String> {
        let mut gallery = self.gallery.lock().expect("clusterer gallery mutex poisoned");

        let best = nearest_match(&gallery, embedding, threshold);

        let person_id = match best {
            Some(person_id) => person_id,
            None => {
                let mut count = self.person_count.lock().expect("clusterer count mutex poisoned");
                *count += 1;
                let new_id = new_person_id();
                let name = format!("Unknown {}", *count);
                db.insert_person(&new_id, &name)?;
                new_id
            }
        };

        gallery.push(GalleryEntry {
            person_id: person_id.clone(),
            embedding: embedding.to_vec(),
        });

        Ok(person_id)
    }

    /// Current count of distinct persons minted by this clusterer instance.
    /// Callers diff this across an `assign` call to detect whether a new
    /// person was created, without an extra DB round trip.
    pub fn person_count(&self) -> usize {
        *self.person_count.lock().expect("clusterer count mutex poisoned")
    }
}

/// Scans the gallery for the lowest cosine distance to `embedding` and
/// returns its person id if that distance is strictly below `threshold`.
/// A distance exactly equal to `threshold` is treated as no match (§8
/// "Clusterer threshold boundary").
fn nearest_match(gallery: &[GalleryEntry], embedding: &[f32], threshold: f32) -> Option<String> {
    gallery
        .iter()
        .map(|entry| (entry.person_id.clone(), 1.0 - cosine_similarity(&entry.embedding, embedding)))
        .filter(|(_, d)| !d.is_nan())
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .filter(|(_, d)| *d < threshold)
        .map(|(person_id, _)| person_id)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

fn new_person_id() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12).map(|_| HEX[rng.gen_range(0..16)] as char).collect();
    format!("person_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn new_person_id_has_expected_shape() {
        let id = new_person_id();
        assert!(id.starts_with("person_"));
        assert_eq!(id.len(), "person_".len() + 12);
    }

    fn gallery_with(person_id: &str, embedding: Vec<f32>) -> Vec<GalleryEntry> {
        vec![GalleryEntry {
            person_id: person_id.to_string(),
            embedding,
        }]
    }

    #[test]
    fn nearest_match_below_threshold_returns_existing_person() {
        // similarity 0.9 -> distance 0.1, comfortably under a 0.6 threshold.
        let gallery = gallery_with("person_aaaaaaaaaaaa", vec![1.0, 0.0, 0.0]);
        let probe = vec![0.9, (1.0f32 - 0.9 * 0.9).sqrt(), 0.0];
        let result = nearest_match(&gallery, &probe, 0.6);
        assert_eq!(result.as_deref(), Some("person_aaaaaaaaaaaa"));
    }

    #[test]
    fn nearest_match_at_exact_threshold_is_not_a_match() {
        // Orthogonal vectors: similarity 0.0 -> distance exactly 1.0.
        let gallery = gallery_with("person_aaaaaaaaaaaa", vec![1.0, 0.0]);
        let probe = vec![0.0, 1.0];
        assert_eq!(nearest_match(&gallery, &probe, 1.0), None);
    }

    #[test]
    fn nearest_match_above_threshold_is_no_match() {
        let gallery = gallery_with("person_aaaaaaaaaaaa", vec![1.0, 0.0]);
        let probe = vec![0.0, 1.0];
        assert_eq!(nearest_match(&gallery, &probe, 0.5), None);
    }
}
