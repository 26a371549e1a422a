//! Date OCR: corner compositing (auto) or whole-frame scan (full), text-line
//! recognition through a pluggable reader, and date-pattern parsing.
//!
//! Corner geometry and mode dispatch are grounded in
//! `original_source/ai/app/processing/ocr.py`'s `_extract_corners`/`process`.
//! Text recognition is modeled as a `TextLineReader` trait so the
//! corner-mosaic geometry and date-pattern parsing can be tested in
//! isolation against a fake reader; `OrtTextLineReader` (`reader.rs`) is the
//! production implementation, and `UnavailableTextLineReader` is used when
//! `AI_OCR_ENABLED=false`, mirroring the reference's graceful-degradation
//! path for an uninstalled OCR engine without making that the only path.

mod chardict;
mod patterns;
mod reader;

use anyhow::Result;
use chrono::NaiveDate;
use image::{DynamicImage, GenericImage, GenericImageView};

use crate::config::OcrMode;

pub use reader::OrtTextLineReader;

#[derive(Debug, Clone)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct OcrResult {
    pub text: Option<String>,
    pub date: Option<NaiveDate>,
}

/// A text-line recognizer: takes an image region, returns recognized lines
/// with per-line confidence. The production implementation runs an external
/// inference engine; tests substitute a fake that returns fixed lines.
pub trait TextLineReader: Send + Sync {
    fn read_lines(&self, image: &DynamicImage) -> Result<Vec<OcrLine>>;
}

/// No text-recognition engine wired up. Mirrors the reference
/// implementation's graceful degradation when `rapidocr_onnxruntime` isn't
/// importable: OCR is silently disabled rather than treated as an error.
pub struct UnavailableTextLineReader;

impl TextLineReader for UnavailableTextLineReader {
    fn read_lines(&self, _image: &DynamicImage) -> Result<Vec<OcrLine>> {
        Ok(Vec::new())
    }
}

pub struct DateOcr {
    reader: Box<dyn TextLineReader>,
    mode: OcrMode,
    min_confidence: f32,
}

impl DateOcr {
    pub fn new(reader: Box<dyn TextLineReader>, mode: OcrMode, min_confidence: f32) -> Self {
        Self { reader, mode, min_confidence }
    }

    pub fn process(&self, image: &DynamicImage) -> Result<OcrResult> {
        if self.mode == OcrMode::Off {
            return Ok(OcrResult::default());
        }

        let region = match self.mode {
            OcrMode::Auto => corner_mosaic(image),
            OcrMode::Full => image.clone(),
            OcrMode::Off => unreachable!(),
        };

        let lines = self.reader.read_lines(&region)?;
        let texts: Vec<&str> = lines
            .iter()
            .filter(|l| l.confidence >= self.min_confidence)
            .map(|l| l.text.as_str())
            .collect();

        if texts.is_empty() {
            return Ok(OcrResult::default());
        }

        let combined = texts.join(" ");

        let mut date = None;
        for text in &texts {
            date = patterns::parse_date(text);
            if date.is_some() {
                break;
            }
        }
        if date.is_none() {
            date = patterns::parse_date(&combined);
        }

        // auto mode discards the raw text and returns only the date.
        let text = match self.mode {
            OcrMode::Auto => None,
            _ => Some(combined),
        };

        Ok(OcrResult { text, date })
    }
}

/// Crops the four image corners (25% width x 15% height each) and
/// composites them into a single 2x2 mosaic: top-left + top-right as the
/// top row, bottom-left + bottom-right as the bottom row. Covers ~95% of
/// observed date-stamp positions at ~15% of the pixel cost of a full scan.
fn corner_mosaic(image: &DynamicImage) -> DynamicImage {
    let (w, h) = image.dimensions();
    let corner_w = ((w as f32 * 0.25) as u32).max(1);
    let corner_h = ((h as f32 * 0.15) as u32).max(1);

    let top_left = image.crop_imm(0, 0, corner_w, corner_h);
    let top_right = image.crop_imm(w - corner_w, 0, corner_w, corner_h);
    let bottom_left = image.crop_imm(0, h - corner_h, corner_w, corner_h);
    let bottom_right = image.crop_imm(w - corner_w, h - corner_h, corner_w, corner_h);

    let mut mosaic = DynamicImage::new_rgb8(corner_w * 2, corner_h * 2);
    mosaic.copy_from(&top_left, 0, 0).ok();
    mosaic.copy_from(&top_right, corner_w, 0).ok();
    mosaic.copy_from(&bottom_left, 0, corner_h).ok();
    mosaic.copy_from(&bottom_right, corner_w, corner_h).ok();

    mosaic
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedReader(Mutex<Vec<OcrLine>>);

    impl TextLineReader for FixedReader {
        fn read_lines(&self, _image: &DynamicImage) -> Result<Vec<OcrLine>> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    #[test]
    fn off_mode_short_circuits_without_touching_the_reader() {
        let ocr = DateOcr::new(Box::new(UnavailableTextLineReader), OcrMode::Off, 0.7);
        let img = DynamicImage::new_rgb8(100, 100);
        let result = ocr.process(&img).unwrap();
        assert!(result.text.is_none());
        assert!(result.date.is_none());
    }

    #[test]
    fn auto_mode_discards_text_but_keeps_date() {
        let reader = FixedReader(Mutex::new(vec![OcrLine { text: "15.08.1995".into(), confidence: 0.9 }]));
        let ocr = DateOcr::new(Box::new(reader), OcrMode::Auto, 0.7);
        let img = DynamicImage::new_rgb8(100, 100);
        let result = ocr.process(&img).unwrap();
        assert!(result.text.is_none());
        assert!(result.date.is_some());
    }

    #[test]
    fn full_mode_keeps_combined_text() {
        let reader = FixedReader(Mutex::new(vec![OcrLine { text: "hello 15.08.1995".into(), confidence: 0.9 }]));
        let ocr = DateOcr::new(Box::new(reader), OcrMode::Full, 0.7);
        let img = DynamicImage::new_rgb8(100, 100);
        let result = ocr.process(&img).unwrap();
        assert_eq!(result.text.as_deref(), Some("hello 15.08.1995"));
        assert!(result.date.is_some());
    }

    #[test]
    fn low_confidence_lines_are_filtered_out() {
        let reader = FixedReader(Mutex::new(vec![OcrLine { text: "15.08.1995".into(), confidence: 0.2 }]));
        let ocr = DateOcr::new(Box::new(reader), OcrMode::Full, 0.7);
        let img = DynamicImage::new_rgb8(100, 100);
        let result = ocr.process(&img).unwrap();
        assert!(result.text.is_none());
        assert!(result.date.is_none());
    }

    #[test]
    fn corner_mosaic_is_a_2x2_composite() {
        let img = DynamicImage::new_rgb8(1000, 800);
        let mosaic = corner_mosaic(&img);
        assert_eq!(mosaic.width(), 2 * (1000.0 * 0.25) as u32);
        assert_eq!(mosaic.height(), 2 * (800.0 * 0.15) as u32);
    }
}
