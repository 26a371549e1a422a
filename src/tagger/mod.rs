//! Zero-shot object/scene tagging via a dual-encoder (CLIP-style) vision-
//! language model.
//!
//! Keeps the teacher's `ClipModel` singleton-handle shape (`clip/model.rs`)
//! but replaces the teacher's whole-image semantic-search embedding with
//! the reference implementation's fixed-category zero-shot classifier
//! (`clip_tagger.py`): a label-embedding cache built once per process
//! lifetime, a single image embedding per photo, and cosine similarity
//! against every cached label.

mod labels;
mod tokenizer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ort::value::Tensor;

use crate::db::TagKind;
use crate::models::{ModelCache, ModelKey};

const INPUT_SIZE: u32 = 224;
const CLIP_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const CLIP_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

#[derive(Debug, Clone)]
pub struct TagResult {
    pub name: String,
    pub kind: TagKind,
    pub confidence: f32,
}

/// Write-once-per-epoch, read-many label-embedding cache. "Epoch" means
/// the span between process start (or the last idle-unload) and the next
/// `clear`; a simple mutex around insertion is enough since population
/// only ever grows monotonically within an epoch.
pub struct Tagger {
    cache: Arc<ModelCache>,
    label_embeddings: Mutex<HashMap<String, Vec<f32>>>,
    min_confidence: f32,
    max_per_photo: usize,
}

impl Tagger {
    pub fn new(cache: Arc<ModelCache>, min_confidence: f32, max_per_photo: usize) -> Self {
        Self {
            cache,
            label_embeddings: Mutex::new(HashMap::new()),
            min_confidence,
            max_per_photo,
        }
    }

    /// Drops every cached label embedding. Called by the idle-unload task
    /// alongside `ModelCache::unload_all`; the cache is rebuilt lazily on
    /// next use.
    pub fn clear_cache(&self) {
        let mut cache = self.label_embeddings.lock().expect("label cache mutex poisoned");
        cache.clear();
    }

    /// Tags one photo: image embedding, cosine similarity against every
    /// known label, threshold filter, descending sort, top-K truncation.
    pub fn tag(&self, img: &DynamicImage) -> Result<Vec<TagResult>> {
        let image_embedding = self.embed_image(img)?;

        let mut scored = Vec::new();
        for &label in labels::OBJECT_CATEGORIES {
            let embedding = self.label_embedding(label)?;
            let sim = cosine_similarity(&image_embedding, &embedding);
            if sim >= self.min_confidence {
                scored.push(TagResult {
                    name: label.to_string(),
                    kind: TagKind::Object,
                    confidence: sim,
                });
            }
        }
        for &label in labels::SCENE_CATEGORIES {
            let embedding = self.label_embedding(label)?;
            let sim = cosine_similarity(&image_embedding, &embedding);
            if sim >= self.min_confidence {
                scored.push(TagResult {
                    name: label.to_string(),
                    kind: TagKind::Scene,
                    confidence: sim,
                });
            }
        }

        scored.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.max_per_photo);
        Ok(scored)
    }

    /// Returns the cached embedding for `label`, computing and caching it
    /// on first use via the prompt template `"a photo of {label}"`.
    fn label_embedding(&self, label: &str) -> Result<Vec<f32>> {
        {
            let cache = self.label_embeddings.lock().expect("label cache mutex poisoned");
            if let Some(embedding) = cache.get(label) {
                return Ok(embedding.clone());
            }
        }

        let prompt = format!("a photo of {label}");
        let embedding = self.embed_text(&prompt)?;

        let mut cache = self.label_embeddings.lock().expect("label cache mutex poisoned");
        cache.entry(label.to_string()).or_insert_with(|| embedding.clone());
        Ok(embedding)
    }

    fn embed_image(&self, img: &DynamicImage) -> Result<Vec<f32>> {
        let session = self.cache.load(ModelKey::ClipVisual)?;
        let mut session = session.lock().map_err(|_| anyhow!("CLIP visual session poisoned"))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("CLIP visual model has no inputs"))?;

        let data = preprocess_image(img);
        let tensor = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            data.into_boxed_slice(),
        ))?;
        let outputs = session.run(ort::inputs![input_name.as_str() => tensor])?;
        let (_, embedding_data) = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("CLIP visual model produced no output"))?
            .1
            .try_extract_tensor::<f32>()?;

        Ok(l2_normalize(embedding_data.to_vec()))
    }

    fn embed_text(&self, prompt: &str) -> Result<Vec<f32>> {
        let session = self.cache.load(ModelKey::ClipTextual)?;
        let mut session = session.lock().map_err(|_| anyhow!("CLIP textual session poisoned"))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("CLIP textual model has no inputs"))?;

        let ids = tokenizer::tokenize(prompt);
        let tensor = Tensor::from_array(([1usize, tokenizer::CONTEXT_LENGTH], ids.to_vec().into_boxed_slice()))?;
        let outputs = session.run(ort::inputs![input_name.as_str() => tensor])?;
        let (_, embedding_data) = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("CLIP textual model produced no output"))?
            .1
            .try_extract_tensor::<f32>()?;

        Ok(l2_normalize(embedding_data.to_vec()))
    }
}

fn l2_normalize(v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Resize so the shorter side reaches 224 (`scale = max(224/h, 224/w)`),
/// center-crop to 224x224, ImageNet-normalize, CHW, batched. The source
/// image is already decoded to RGB, so the reference's BGR->RGB swap is a
/// no-op here.
fn preprocess_image(img: &DynamicImage) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let scale = (INPUT_SIZE as f32 / h as f32).max(INPUT_SIZE as f32 / w as f32);
    let new_w = ((w as f32 * scale).round() as u32).max(INPUT_SIZE);
    let new_h = ((h as f32 * scale).round() as u32).max(INPUT_SIZE);

    let resized = img.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();

    let start_x = (new_w - INPUT_SIZE) / 2;
    let start_y = (new_h - INPUT_SIZE) / 2;
    let cropped: RgbImage = image::imageops::crop_imm(&resized, start_x, start_y, INPUT_SIZE, INPUT_SIZE).to_image();

    let side = INPUT_SIZE as usize;
    let mut data = vec![0.0f32; 3 * side * side];
    for y in 0..side {
        for x in 0..side {
            let pixel = cropped.get_pixel(x as u32, y as u32);
            let idx = y * side + x;
            for c in 0..3 {
                let normalized = (pixel[c] as f32 / 255.0 - CLIP_MEAN[c]) / CLIP_STD[c];
                data[c * side * side + idx] = normalized;
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_unit_vectors_is_one() {
        let a = l2_normalize(vec![1.0, 2.0, 3.0]);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn preprocess_image_produces_fixed_size_chw_buffer() {
        let img = DynamicImage::new_rgb8(400, 300);
        let data = preprocess_image(&img);
        assert_eq!(data.len(), 3 * INPUT_SIZE as usize * INPUT_SIZE as usize);
    }
}
