//! Background AI analysis worker for photo libraries.
//!
//! Drains a Postgres-backed work queue of photos and runs face detection,
//! face embedding with online person clustering, zero-shot CLIP tagging,
//! and date-stamp OCR over each, exposing a small HTTP control plane for
//! status, start/stop, queue, model cache, and configuration introspection.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod faces;
pub mod logging;
pub mod models;
pub mod ocr;
pub mod periodic;
pub mod tagger;
pub mod worker;
