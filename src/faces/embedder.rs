//! ArcFace-style face embedder: landmark alignment, then a 512-dim
//! L2-normalized embedding.
//!
//! Preprocessing and embedding follow the teacher's `run_arcface_embedding`
//! (manual NCHW tensor construction, `(pixel - 127.5) / 127.5` normalize,
//! L2-normalize the output); the alignment step — a similarity transform to
//! the ARCFACE_DST template — is new, since the teacher only ever did an
//! axis-aligned crop.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ort::value::Tensor;

use crate::models::{ModelCache, ModelKey};

use super::{DetectedFace, Landmarks};

const INPUT_SIZE: u32 = 112;

const ARCFACE_DST: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub struct FaceEmbedder {
    cache: Arc<ModelCache>,
}

impl FaceEmbedder {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self { cache }
    }

    /// Embeds every detected face independently. A face whose alignment or
    /// inference fails yields `None` at its slot rather than aborting the
    /// whole batch, matching the per-face try/except the reference
    /// implementation uses.
    pub fn embed_all(&self, img: &DynamicImage, faces: &[DetectedFace]) -> Vec<Option<Vec<f32>>> {
        faces
            .iter()
            .map(|face| match self.embed_one(img, face) {
                Ok(embedding) => Some(embedding),
                Err(err) => {
                    tracing::warn!(error = %err, "face embedding failed, skipping face");
                    None
                }
            })
            .collect()
    }

    fn embed_one(&self, img: &DynamicImage, face: &DetectedFace) -> Result<Vec<f32>> {
        let aligned = align_face(img, &face.landmarks).unwrap_or_else(|| {
            let (w, h) = img.dimensions();
            axis_aligned_crop(img, &face.landmarks, w, h)
        });

        let session = self.cache.load(ModelKey::FaceRecognition)?;
        let mut session = session.lock().map_err(|_| anyhow!("face recognition session poisoned"))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("face recognition model has no inputs"))?;

        let input_data = preprocess(&aligned);
        let tensor = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            input_data.into_boxed_slice(),
        ))?;
        let outputs = session.run(ort::inputs![input_name.as_str() => tensor])?;

        let (_, embedding_value) = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("face recognition model produced no output"))?;
        let (_, data) = embedding_value.try_extract_tensor::<f32>()?;

        let embedding: Vec<f32> = data.to_vec();
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            Ok(embedding.iter().map(|x| x / norm).collect())
        } else {
            Ok(embedding)
        }
    }
}

fn preprocess(img: &RgbImage) -> Vec<f32> {
    let side = INPUT_SIZE as usize;
    let mut data = vec![0.0f32; 3 * side * side];
    for y in 0..side {
        for x in 0..side {
            let pixel = img.get_pixel(x as u32, y as u32);
            let idx = y * side + x;
            data[idx] = (pixel[0] as f32 - 127.5) / 127.5;
            data[side * side + idx] = (pixel[1] as f32 - 127.5) / 127.5;
            data[2 * side * side + idx] = (pixel[2] as f32 - 127.5) / 127.5;
        }
    }
    data
}

/// Estimates a similarity transform from `landmarks` to `ARCFACE_DST` and
/// warps `img` through it into a 112x112 crop. Returns `None` if the
/// transform is degenerate (near-zero source variance).
fn align_face(img: &DynamicImage, landmarks: &Landmarks) -> Option<RgbImage> {
    let transform = estimate_similarity_transform(landmarks, &ARCFACE_DST)?;
    let inverse = transform.inverse()?;

    let rgb = img.to_rgb8();
    let (src_w, src_h) = rgb.dimensions();
    let mut out = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, Rgb([0, 0, 0]));

    for dy in 0..INPUT_SIZE {
        for dx in 0..INPUT_SIZE {
            let (sx, sy) = inverse.apply(dx as f32, dy as f32);
            if let Some(pixel) = sample_bilinear(&rgb, sx, sy, src_w, src_h) {
                out.put_pixel(dx, dy, pixel);
            }
        }
    }

    Some(out)
}

/// Fallback when alignment can't be solved: crop the landmark bounding box
/// padded 20px per side, then resize to 112x112.
fn axis_aligned_crop(img: &DynamicImage, landmarks: &Landmarks, img_w: u32, img_h: u32) -> RgbImage {
    let min_x = landmarks.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let max_x = landmarks.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = landmarks.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_y = landmarks.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

    let x = (min_x - 20.0).max(0.0) as u32;
    let y = (min_y - 20.0).max(0.0) as u32;
    let w = ((max_x - min_x + 40.0) as u32).min(img_w.saturating_sub(x)).max(1);
    let h = ((max_y - min_y + 40.0) as u32).min(img_h.saturating_sub(y)).max(1);

    let cropped = img.crop_imm(x, y, w, h);
    cropped
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb8()
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32, w: u32, h: u32) -> Option<Rgb<u8>> {
    if x < 0.0 || y < 0.0 || x >= (w - 1) as f32 || y >= (h - 1) as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = x0 + 1;
    let y1 = y0 + 1;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// A 2D similarity transform: `dst = scale * R * src + t`.
#[derive(Debug, Clone, Copy)]
struct SimilarityTransform {
    scale: f32,
    rotation: [[f32; 2]; 2],
    translation: (f32, f32),
}

impl SimilarityTransform {
    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let rx = self.rotation[0][0] * x + self.rotation[0][1] * y;
        let ry = self.rotation[1][0] * x + self.rotation[1][1] * y;
        (self.scale * rx + self.translation.0, self.scale * ry + self.translation.1)
    }

    /// The inverse maps dst-space coordinates back to src-space, which is
    /// what warping needs (sample source at the preimage of each output
    /// pixel).
    fn inverse(&self) -> Option<SimilarityTransform> {
        if self.scale.abs() < 1e-8 {
            return None;
        }
        let inv_scale = 1.0 / self.scale;
        // R is orthonormal, so R^-1 == R^T.
        let rt = [
            [self.rotation[0][0], self.rotation[1][0]],
            [self.rotation[0][1], self.rotation[1][1]],
        ];
        // dst = scale*R*src + t  =>  src = R^T * (dst - t) / scale
        let tx = self.translation.0;
        let ty = self.translation.1;
        // Fold the translation into the new transform: src = inv_scale*R^T*dst + t'
        // where t' = -inv_scale*R^T*t
        let t_prime_x = -inv_scale * (rt[0][0] * tx + rt[0][1] * ty);
        let t_prime_y = -inv_scale * (rt[1][0] * tx + rt[1][1] * ty);
        Some(SimilarityTransform {
            scale: inv_scale,
            rotation: rt,
            translation: (t_prime_x, t_prime_y),
        })
    }
}

/// Umeyama's least-squares estimate of the similarity transform mapping
/// `src` onto `dst`. Returns `None` when source variance is degenerate
/// (all points coincident).
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<SimilarityTransform> {
    let n = src.len() as f32;

    let src_mean = mean(src);
    let dst_mean = mean(dst);

    let src_demean: Vec<(f32, f32)> = src.iter().map(|p| (p.0 - src_mean.0, p.1 - src_mean.1)).collect();
    let dst_demean: Vec<(f32, f32)> = dst.iter().map(|p| (p.0 - dst_mean.0, p.1 - dst_mean.1)).collect();

    let var_src: f32 = src_demean.iter().map(|p| p.0 * p.0 + p.1 * p.1).sum::<f32>() / n;
    if var_src < 1e-6 {
        return None;
    }

    // Covariance matrix cov = dst_demean^T * src_demean / n.
    let mut cov = [[0.0f32; 2]; 2];
    for (s, d) in src_demean.iter().zip(dst_demean.iter()) {
        cov[0][0] += d.0 * s.0;
        cov[0][1] += d.0 * s.1;
        cov[1][0] += d.1 * s.0;
        cov[1][1] += d.1 * s.1;
    }
    for row in cov.iter_mut() {
        for v in row.iter_mut() {
            *v /= n;
        }
    }

    let (u, singular, vt) = svd2x2(cov);
    let det_cov = cov[0][0] * cov[1][1] - cov[0][1] * cov[1][0];

    let mut d = [1.0f32, 1.0f32];
    if det_cov < 0.0 {
        d[1] = -1.0;
    }

    // R = U * diag(d) * V^T
    let ud = [[u[0][0] * d[0], u[0][1] * d[1]], [u[1][0] * d[0], u[1][1] * d[1]]];
    let rotation = mat_mul(ud, vt);

    let trace_sd = singular[0] * d[0] + singular[1] * d[1];
    let scale = trace_sd / var_src;

    let r_src_mean = (
        rotation[0][0] * src_mean.0 + rotation[0][1] * src_mean.1,
        rotation[1][0] * src_mean.0 + rotation[1][1] * src_mean.1,
    );
    let translation = (dst_mean.0 - scale * r_src_mean.0, dst_mean.1 - scale * r_src_mean.1);

    Some(SimilarityTransform {
        scale,
        rotation,
        translation,
    })
}

fn mean(points: &[(f32, f32); 5]) -> (f32, f32) {
    let n = points.len() as f32;
    let sum = points.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    (sum.0 / n, sum.1 / n)
}

fn mat_mul(a: [[f32; 2]; 2], b: [[f32; 2]; 2]) -> [[f32; 2]; 2] {
    [
        [a[0][0] * b[0][0] + a[0][1] * b[1][0], a[0][0] * b[0][1] + a[0][1] * b[1][1]],
        [a[1][0] * b[0][0] + a[1][1] * b[1][0], a[1][0] * b[0][1] + a[1][1] * b[1][1]],
    ]
}

/// Closed-form SVD of a 2x2 matrix: `m = U * diag(singular) * Vt`, with
/// `singular` sorted `[largest, smallest]`.
fn svd2x2(m: [[f32; 2]; 2]) -> ([[f32; 2]; 2], [f32; 2], [[f32; 2]; 2]) {
    let (a, b, c, d) = (m[0][0], m[0][1], m[1][0], m[1][1]);

    let e = (a + d) / 2.0;
    let f = (a - d) / 2.0;
    let g = (c + b) / 2.0;
    let h = (c - b) / 2.0;

    let q = (e * e + h * h).sqrt();
    let r = (f * f + g * g).sqrt();

    let sx = q + r;
    let sy = (q - r).abs();

    let a1 = g.atan2(f);
    let a2 = h.atan2(e);

    let theta = (a2 - a1) / 2.0;
    let phi = (a2 + a1) / 2.0;

    let u = [[theta.cos(), -theta.sin()], [theta.sin(), theta.cos()]];
    // Vt is V transposed; V is the phi rotation.
    let vt = [[phi.cos(), phi.sin()], [-phi.sin(), phi.cos()]];

    ([[u[0][0], u[0][1]], [u[1][0], u[1][1]]], [sx, sy], vt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_points_yield_identity_transform() {
        let pts = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.5, 0.5)];
        let t = estimate_similarity_transform(&pts, &pts).expect("transform");
        assert!((t.scale - 1.0).abs() < 1e-3);
        let (x, y) = t.apply(2.0, 3.0);
        assert!((x - 2.0).abs() < 1e-3);
        assert!((y - 3.0).abs() < 1e-3);
    }

    #[test]
    fn scaled_points_recover_scale_factor() {
        let src = [(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (1.0, 1.0)];
        let dst = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.5, 0.5)];
        let t = estimate_similarity_transform(&src, &dst).expect("transform");
        assert!((t.scale - 0.5).abs() < 1e-3);
    }

    #[test]
    fn degenerate_points_return_none() {
        let pts = [(5.0, 5.0); 5];
        assert!(estimate_similarity_transform(&pts, &ARCFACE_DST).is_none());
    }

    #[test]
    fn inverse_round_trips_through_a_point() {
        let src = [(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (1.0, 1.0)];
        let t = estimate_similarity_transform(&src, &ARCFACE_DST).expect("transform");
        let inverse = t.inverse().expect("invertible");
        let (dx, dy) = t.apply(1.3, 0.7);
        let (sx, sy) = inverse.apply(dx, dy);
        assert!((sx - 1.3).abs() < 1e-2);
        assert!((sy - 0.7).abs() < 1e-2);
    }
}
