//! `ort`-backed text-line reader: the production `TextLineReader`.
//!
//! The reference implementation hands this whole job to the turnkey
//! `rapidocr_onnxruntime` package (detection + angle-classification +
//! recognition, in one black-box call) rather than to anything this
//! service's other stages would recognize as their own idiom. Since there
//! is no equivalent single Rust crate, and the other three AI stages all
//! wire a single `ort` session through the Model Cache (`FaceDetector`,
//! `FaceEmbedder`, `Tagger`), this reader follows the same shape for the
//! one model that actually needs ONNX inference — a CRNN/CTC-style
//! recognition network — and substitutes a classical horizontal-projection
//! line segmentation for the detector network the reference pulls in,
//! since date stamps are near-horizontal single lines and the caller
//! already narrows the search area via the corner mosaic in `auto` mode.
//! A full scene-text detector (polygon regression + NMS over rotated
//! boxes) is out of scope for what this module needs to produce.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ort::value::Tensor;

use crate::models::{ModelCache, ModelKey};

use super::chardict;
use super::{OcrLine, TextLineReader};

const REC_HEIGHT: u32 = 48;
const REC_MAX_WIDTH: u32 = 320;

/// Rows darker than this (0-255 luma) count toward a row's ink density.
const DARK_THRESHOLD: u8 = 140;
/// Minimum contiguous band height to be treated as a text line, filtering
/// out single-row noise.
const MIN_BAND_HEIGHT: u32 = 6;
const BAND_PADDING: u32 = 2;

pub struct OrtTextLineReader {
    cache: Arc<ModelCache>,
}

impl OrtTextLineReader {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self { cache }
    }
}

impl TextLineReader for OrtTextLineReader {
    fn read_lines(&self, image: &DynamicImage) -> Result<Vec<OcrLine>> {
        let bands = detect_line_bands(image);
        if bands.is_empty() {
            return Ok(Vec::new());
        }

        let session = self.cache.load(ModelKey::TextRecognition)?;
        let mut session = session.lock().map_err(|_| anyhow!("text recognition session poisoned"))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("text recognition model has no inputs"))?;

        let mut lines = Vec::new();
        for (x, y, w, h) in bands {
            let crop = image.crop_imm(x, y, w, h);
            let input_data = preprocess_line(&crop);
            let tensor = Tensor::from_array((
                [1usize, 3, REC_HEIGHT as usize, REC_MAX_WIDTH as usize],
                input_data.into_boxed_slice(),
            ))?;
            let outputs = session.run(ort::inputs![input_name.as_str() => tensor])?;

            let (_, value) = outputs
                .iter()
                .next()
                .ok_or_else(|| anyhow!("text recognition model produced no output"))?;
            let (_, data) = value.try_extract_tensor::<f32>()?;

            let classes = chardict::num_classes();
            if classes == 0 || data.len() < classes {
                continue;
            }
            let timesteps = data.len() / classes;
            let (text, confidence) = ctc_greedy_decode(data, timesteps, classes);
            let text = text.trim().to_string();
            if !text.is_empty() {
                lines.push(OcrLine { text, confidence });
            }
        }

        Ok(lines)
    }
}

/// Greedy CTC decode: per timestep, take the highest-scoring class; collapse
/// consecutive repeats and drop the blank class (index 0). Confidence is the
/// mean of the winning score at each timestep that contributed a character.
fn ctc_greedy_decode(scores: &[f32], timesteps: usize, classes: usize) -> (String, f32) {
    let mut text = String::new();
    let mut last_class: Option<usize> = None;
    let mut confidence_sum = 0.0f32;
    let mut confidence_count = 0u32;

    for t in 0..timesteps {
        let row = &scores[t * classes..(t + 1) * classes];
        let (best_idx, best_val) = row
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });

        if Some(best_idx) != last_class {
            if let Some(ch) = chardict::char_for_class(best_idx) {
                text.push(ch);
                confidence_sum += best_val;
                confidence_count += 1;
            }
        }
        last_class = Some(best_idx);
    }

    let confidence = if confidence_count > 0 {
        confidence_sum / confidence_count as f32
    } else {
        0.0
    };
    (text, confidence)
}

/// Finds horizontal bands of the image whose row-wise dark-pixel density
/// clears a threshold, merges nothing across a gap (a gap always ends a
/// band), and discards bands shorter than [`MIN_BAND_HEIGHT`]. Each band
/// spans the full image width, padded vertically and clamped to bounds.
fn detect_line_bands(image: &DynamicImage) -> Vec<(u32, u32, u32, u32)> {
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let min_ink = ((w as f32) * 0.02).max(1.0) as u32;
    let row_is_text: Vec<bool> = (0..h)
        .map(|y| {
            let ink = (0..w).filter(|&x| gray.get_pixel(x, y).0[0] < DARK_THRESHOLD).count() as u32;
            ink >= min_ink
        })
        .collect();

    let mut bands = Vec::new();
    let mut start: Option<u32> = None;
    for y in 0..h {
        match (row_is_text[y as usize], start) {
            (true, None) => start = Some(y),
            (false, Some(s)) => {
                if y - s >= MIN_BAND_HEIGHT {
                    bands.push((s, y));
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        if h - s >= MIN_BAND_HEIGHT {
            bands.push((s, h));
        }
    }

    bands
        .into_iter()
        .map(|(y0, y1)| {
            let y0 = y0.saturating_sub(BAND_PADDING);
            let y1 = (y1 + BAND_PADDING).min(h);
            (0, y0, w, y1 - y0)
        })
        .collect()
}

/// Resizes a line crop to `REC_HEIGHT`, preserving aspect ratio and capping
/// width at `REC_MAX_WIDTH`, then normalizes to `[-1, 1]` and zero-pads any
/// remaining columns. Returns a flat CHW buffer.
fn preprocess_line(crop: &DynamicImage) -> Vec<f32> {
    let (cw, ch) = crop.dimensions();
    let scale = REC_HEIGHT as f32 / ch.max(1) as f32;
    let new_w = ((cw as f32 * scale) as u32).clamp(1, REC_MAX_WIDTH);

    let resized = crop.resize_exact(new_w, REC_HEIGHT, FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let h = REC_HEIGHT as usize;
    let w = REC_MAX_WIDTH as usize;
    let mut data = vec![0.0f32; 3 * h * w];
    for y in 0..h {
        for x in 0..new_w as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * w + x;
            data[idx] = (pixel[0] as f32 / 255.0 - 0.5) / 0.5;
            data[h * w + idx] = (pixel[1] as f32 / 255.0 - 0.5) / 0.5;
            data[2 * h * w + idx] = (pixel[2] as f32 / 255.0 - 0.5) / 0.5;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbImage};

    #[test]
    fn blank_image_has_no_line_bands() {
        let img = DynamicImage::new_rgb8(200, 100);
        assert!(detect_line_bands(&img).is_empty());
    }

    #[test]
    fn a_single_dark_band_is_detected() {
        let mut buf = image::GrayImage::from_pixel(200, 100, Luma([255]));
        for y in 40..55 {
            for x in 0..200 {
                buf.put_pixel(x, y, Luma([0]));
            }
        }
        let img = DynamicImage::ImageLuma8(buf);
        let bands = detect_line_bands(&img);
        assert_eq!(bands.len(), 1);
        let (x, y, w, _h) = bands[0];
        assert_eq!(x, 0);
        assert_eq!(w, 200);
        assert!(y <= 40);
    }

    #[test]
    fn thin_noise_rows_are_not_a_band() {
        let mut buf = image::GrayImage::from_pixel(200, 100, Luma([255]));
        buf.put_pixel(10, 10, Luma([0]));
        let img = DynamicImage::ImageLuma8(buf);
        assert!(detect_line_bands(&img).is_empty());
    }

    #[test]
    fn ctc_decode_collapses_repeats_and_drops_blank() {
        // classes = blank(0), 'a'(1), 'b'(2) relative to a 2-char dict slice;
        // simulate with the real dictionary's first two non-blank classes.
        let classes = chardict::num_classes();
        let mut scores = vec![0.0f32; classes * 4];
        // timestep 0: class 1 high
        scores[1] = 1.0;
        // timestep 1: class 1 high again (repeat, should collapse)
        scores[classes + 1] = 1.0;
        // timestep 2: blank high
        scores[2 * classes] = 1.0;
        // timestep 3: class 2 high
        scores[3 * classes + 2] = 1.0;

        let (text, confidence) = ctc_greedy_decode(&scores, 4, classes);
        assert_eq!(text.chars().count(), 2);
        assert!(confidence > 0.0);
    }

    #[test]
    fn preprocess_line_fills_only_resized_columns() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 48, image::Rgb([255, 255, 255])));
        let data = preprocess_line(&img);
        assert_eq!(data.len(), 3 * REC_HEIGHT as usize * REC_MAX_WIDTH as usize);
        // Far-right padding column should be untouched (zero), unlike resized content.
        let last_col_idx = (REC_HEIGHT as usize / 2) * REC_MAX_WIDTH as usize + (REC_MAX_WIDTH as usize - 1);
        assert_eq!(data[last_col_idx], 0.0);
    }
}
