//! SCRFD-style multi-stride face detector.
//!
//! Ports the ONNX tensor-construction idiom of the teacher's
//! `run_ultraface_detection` (manual NCHW buffer construction, named input/
//! output access, a greedy NMS helper) onto the SCRFD anchor-decode math
//! the reference implementation uses, which this module follows
//! formula-for-formula.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ort::value::Tensor;

use crate::models::{ModelCache, ModelKey};

use super::{BoundingBox, DetectedFace};

const INPUT_SIDE: u32 = 640;
const FEAT_STRIDES: [u32; 3] = [8, 16, 32];
const NUM_ANCHORS: usize = 2;
const FMC: usize = 3;
const NMS_THRESHOLD: f32 = 0.4;

pub struct FaceDetector {
    cache: Arc<ModelCache>,
    min_confidence: f32,
    min_size: u32,
    max_per_photo: usize,
}

impl FaceDetector {
    pub fn new(cache: Arc<ModelCache>, min_confidence: f32, min_size: u32, max_per_photo: usize) -> Self {
        Self {
            cache,
            min_confidence,
            min_size,
            max_per_photo,
        }
    }

    pub fn detect(&self, img: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let (orig_w, orig_h) = img.dimensions();

        let (input_tensor, scale) = letterbox_preprocess(img);

        let session = self.cache.load(ModelKey::FaceDetection)?;
        let mut session = session.lock().map_err(|_| anyhow!("face detection session poisoned"))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("face detection model has no inputs"))?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.len() < FMC * 3 {
            return Err(anyhow!(
                "face detection model has {} outputs, expected at least {}",
                output_names.len(),
                FMC * 3
            ));
        }

        let tensor = Tensor::from_array((
            [1usize, 3, INPUT_SIDE as usize, INPUT_SIDE as usize],
            input_tensor.into_boxed_slice(),
        ))?;
        let outputs = session.run(ort::inputs![input_name.as_str() => tensor])?;

        let mut all_boxes: Vec<[f32; 4]> = Vec::new();
        let mut all_scores: Vec<f32> = Vec::new();
        let mut all_kps: Vec<[(f32, f32); 5]> = Vec::new();

        for (idx, &stride) in FEAT_STRIDES.iter().enumerate() {
            let feat_h = (INPUT_SIDE / stride) as usize;
            let feat_w = (INPUT_SIDE / stride) as usize;

            let scores_name = &output_names[idx];
            let bbox_name = &output_names[idx + FMC];
            let kps_name = &output_names[idx + FMC * 2];

            let (_, scores) = outputs
                .get(scores_name.as_str())
                .ok_or_else(|| anyhow!("missing output {scores_name}"))?
                .try_extract_tensor::<f32>()?;
            let (_, bbox_preds) = outputs
                .get(bbox_name.as_str())
                .ok_or_else(|| anyhow!("missing output {bbox_name}"))?
                .try_extract_tensor::<f32>()?;
            let (_, kps_preds) = outputs
                .get(kps_name.as_str())
                .ok_or_else(|| anyhow!("missing output {kps_name}"))?
                .try_extract_tensor::<f32>()?;

            let anchors = generate_anchors(feat_h, feat_w, stride as f32);

            for (i, &score) in scores.iter().enumerate() {
                if score < self.min_confidence {
                    continue;
                }
                let (px, py) = anchors[i];
                let bd = &bbox_preds[i * 4..i * 4 + 4];
                let x1 = px - bd[0] * stride as f32;
                let y1 = py - bd[1] * stride as f32;
                let x2 = px + bd[2] * stride as f32;
                let y2 = py + bd[3] * stride as f32;

                let kd = &kps_preds[i * 10..i * 10 + 10];
                let mut kps = [(0.0f32, 0.0f32); 5];
                for (k, slot) in kps.iter_mut().enumerate() {
                    slot.0 = px + kd[k * 2] * stride as f32;
                    slot.1 = py + kd[k * 2 + 1] * stride as f32;
                }

                all_boxes.push([x1, y1, x2, y2]);
                all_scores.push(score);
                all_kps.push(kps);
            }
        }

        if all_boxes.is_empty() {
            return Ok(Vec::new());
        }

        let keep = nms(&all_boxes, &all_scores, NMS_THRESHOLD);

        let mut faces = Vec::new();
        for i in keep {
            let [x1, y1, x2, y2] = all_boxes[i];
            let (x1, y1, x2, y2) = (x1 / scale, y1 / scale, x2 / scale, y2 / scale);
            let x1 = x1.clamp(0.0, orig_w as f32);
            let y1 = y1.clamp(0.0, orig_h as f32);
            let x2 = x2.clamp(x1, orig_w as f32);
            let y2 = y2.clamp(y1, orig_h as f32);
            let face_w = x2 - x1;
            let face_h = y2 - y1;

            if face_w < self.min_size as f32 || face_h < self.min_size as f32 {
                continue;
            }

            let landmarks = all_kps[i].map(|(x, y)| (x / scale, y / scale));

            faces.push(DetectedFace {
                bbox: BoundingBox {
                    x: (x1 / orig_w as f32).max(0.0),
                    y: (y1 / orig_h as f32).max(0.0),
                    w: (face_w / orig_w as f32).max(f32::MIN_POSITIVE),
                    h: (face_h / orig_h as f32).max(f32::MIN_POSITIVE),
                },
                landmarks,
                confidence: all_scores[i],
            });

            if faces.len() >= self.max_per_photo {
                break;
            }
        }

        Ok(faces)
    }
}

/// Generates anchor centers for one feature-map stride, in the same
/// row-major, anchor-minor order the network's flattened outputs use:
/// for each grid cell (y outer, x inner), `NUM_ANCHORS` consecutive
/// identical centers.
fn generate_anchors(feat_h: usize, feat_w: usize, stride: f32) -> Vec<(f32, f32)> {
    let mut anchors = Vec::with_capacity(feat_h * feat_w * NUM_ANCHORS);
    for y in 0..feat_h {
        for x in 0..feat_w {
            let cx = x as f32 * stride;
            let cy = y as f32 * stride;
            for _ in 0..NUM_ANCHORS {
                anchors.push((cx, cy));
            }
        }
    }
    anchors
}

/// Letterbox-resizes `img` to `INPUT_SIDE`×`INPUT_SIDE`, preserving aspect
/// ratio and zero-padding bottom/right, then normalizes to NCHW
/// `(px - 127.5) / 128.0`. Returns the flat tensor buffer and the scale
/// factor applied.
fn letterbox_preprocess(img: &DynamicImage) -> (Vec<f32>, f32) {
    let (w, h) = img.dimensions();
    let scale = (INPUT_SIDE as f32 / h as f32).min(INPUT_SIDE as f32 / w as f32);
    let new_w = (w as f32 * scale) as u32;
    let new_h = (h as f32 * scale) as u32;

    let resized = img.resize_exact(new_w.max(1), new_h.max(1), FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let mut canvas = RgbImage::from_pixel(INPUT_SIDE, INPUT_SIDE, Rgb([0, 0, 0]));
    image::imageops::overlay(&mut canvas, &rgb, 0, 0);

    let side = INPUT_SIDE as usize;
    let mut data = vec![0.0f32; 3 * side * side];
    for y in 0..side {
        for x in 0..side {
            let pixel = canvas.get_pixel(x as u32, y as u32);
            let idx = y * side + x;
            data[idx] = (pixel[0] as f32 - 127.5) / 128.0;
            data[side * side + idx] = (pixel[1] as f32 - 127.5) / 128.0;
            data[2 * side * side + idx] = (pixel[2] as f32 - 127.5) / 128.0;
        }
    }

    (data, scale)
}

/// Greedy IoU-NMS: descending-score traversal, ties broken by earlier
/// input order (a stable sort preserves that for equal scores).
fn nms(boxes: &[[f32; 4]], scores: &[f32], threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut suppressed = vec![false; boxes.len()];
    let mut keep = Vec::new();

    for &i in &order {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order {
            if j == i || suppressed[j] {
                continue;
            }
            if iou(&boxes[i], &boxes[j]) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = [0.0, 0.0, 5.0, 5.0];
        let b = [10.0, 10.0, 15.0, 15.0];
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_suppresses_overlapping_lower_score_box() {
        let boxes = vec![[0.0, 0.0, 10.0, 10.0], [1.0, 1.0, 11.0, 11.0]];
        let scores = vec![0.9, 0.8];
        let keep = nms(&boxes, &scores, 0.4);
        assert_eq!(keep, vec![0]);
    }

    #[test]
    fn nms_keeps_both_disjoint_boxes() {
        let boxes = vec![[0.0, 0.0, 5.0, 5.0], [10.0, 10.0, 15.0, 15.0]];
        let scores = vec![0.9, 0.95];
        let keep = nms(&boxes, &scores, 0.4);
        assert_eq!(keep.len(), 2);
    }

    #[test]
    fn anchor_grid_duplicates_each_center_per_anchor() {
        let anchors = generate_anchors(2, 2, 8.0);
        assert_eq!(anchors.len(), 2 * 2 * NUM_ANCHORS);
        assert_eq!(anchors[0], anchors[1]);
        assert_eq!(anchors[0], (0.0, 0.0));
        assert_eq!(anchors[2], (8.0, 0.0));
    }
}
