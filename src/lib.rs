//! Batch media compression.
//!
//! A tool accepts up to three files of one [`Category`], runs each through a
//! compression engine in order, and hands back either the single result or
//! one zip archive. An engine failure on one file never sinks the batch: that
//! file comes back unchanged, with a warning.

use wasm_bindgen::prelude::*;

pub mod category;
pub mod config;
pub mod controller;
pub mod error;
pub mod intake;
pub mod output;
pub mod pipeline;
pub mod quality;
pub mod transform;

pub use category::Category;
pub use config::{ToolConfig, MAX_CAPACITY};
pub use controller::{Controller, Controls, DownloadTarget, Event, Notice, SessionState};
pub use error::{BatchError, Result};
pub use intake::{Admission, BatchState, Candidate, InputItem, IntakeReport};
pub use output::{Artifact, ArchiveWriter, DirectorySink, DownloadSink, ZipArchiveWriter};
pub use pipeline::{BatchOutcome, ConversionResult, ConversionStatus, Pipeline, Progress};
pub use quality::{EngineParam, QualityTable, QualityTier};
pub use transform::{engine_for, EngineOptions, Transform};

fn parse_tier(quality: &str) -> std::result::Result<QualityTier, JsError> {
    match quality {
        "low" => Ok(QualityTier::Low),
        "medium" => Ok(QualityTier::Medium),
        "high" => Ok(QualityTier::High),
        other => Err(JsError::new(&format!("Unknown quality: {}", other))),
    }
}

fn console_warn(message: &str) {
    #[cfg(target_arch = "wasm32")]
    web_sys::console::warn_1(&JsValue::from_str(message));
    #[cfg(not(target_arch = "wasm32"))]
    log::warn!("{}", message);
}

/// One compressed file handed back to JavaScript.
#[wasm_bindgen]
#[derive(Debug, Clone)]
pub struct CompressedFile {
    name: String,
    bytes: Vec<u8>,
    original_size: u64,
    fallback: bool,
    warning: Option<String>,
}

#[wasm_bindgen]
impl CompressedFile {
    /// Download name, with the extension changed when the format did.
    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.name.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    #[wasm_bindgen(getter = originalSize)]
    pub fn original_size(&self) -> f64 {
        self.original_size as f64
    }

    #[wasm_bindgen(getter = outputSize)]
    pub fn output_size(&self) -> f64 {
        self.bytes.len() as f64
    }

    /// True when the original came back because compression failed or grew
    /// the file.
    #[wasm_bindgen(getter)]
    pub fn fallback(&self) -> bool {
        self.fallback
    }

    #[wasm_bindgen(getter)]
    pub fn warning(&self) -> Option<String> {
        self.warning.clone()
    }
}

impl From<ConversionResult> for CompressedFile {
    fn from(result: ConversionResult) -> Self {
        Self {
            fallback: result.status == ConversionStatus::PassthroughFallback,
            name: result.output_name,
            bytes: result.bytes,
            original_size: result.original_size,
            warning: result.warning,
        }
    }
}

/// Runs one file through the stock engine of its category. Audio and video
/// have no transcoder in the browser build and come back unchanged.
fn compress_one(
    category: Category,
    name: &str,
    mime: &str,
    input: &[u8],
    tier: QualityTier,
) -> Result<CompressedFile> {
    let config = ToolConfig::for_category(category);
    let options = EngineOptions {
        passthrough: matches!(category, Category::Audio | Category::Video),
        ..EngineOptions::default()
    };
    let mut pipeline = Pipeline::new(config.clone(), engine_for(&config, &options));

    let mut batch = BatchState::new(&config);
    batch.accept(Candidate::new(name, mime, input.to_vec()));

    let outcome = pipeline.run(&batch, tier, &mut |_| {})?;
    let result = outcome.into_results().into_iter().next().ok_or(BatchError::NoResult)?;
    Ok(result.into())
}

/// Compresses one file in the browser.
#[wasm_bindgen]
pub fn compress_file(
    name: &str,
    mime: &str,
    input: &[u8],
    quality: &str,
) -> std::result::Result<CompressedFile, JsError> {
    let tier = parse_tier(quality)?;
    let category = Category::from_mime(mime)
        .ok_or_else(|| JsError::new(&format!("Unsupported file type: {}", mime)))?;

    let file = compress_one(category, name, mime, input, tier)
        .map_err(|e| JsError::new(&e.to_string()))?;
    if let Some(warning) = &file.warning {
        console_warn(&format!("{}: kept original ({})", name, warning));
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, RgbImage};

    use super::*;

    fn bmp(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(w, h, |x, y| image::Rgb([(x * 4) as u8, (y * 4) as u8, 128]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Bmp).unwrap();
        bytes
    }

    #[test]
    fn reencoded_image_reports_its_new_name() {
        let input = bmp(64, 64);
        let file = compress_one(Category::Image, "x.bmp", "image/bmp", &input, QualityTier::Medium).unwrap();

        assert_eq!(file.name(), "x-compressed.jpg");
        assert!(!file.fallback());
        assert_eq!(file.warning(), None);
        assert_eq!(file.original_size(), input.len() as f64);
        assert!(file.output_size() < file.original_size());
        assert_eq!(image::guess_format(&file.bytes()).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn undecodable_image_comes_back_flagged() {
        let file = compress_one(Category::Image, "x.png", "image/png", b"not a png", QualityTier::Low).unwrap();

        assert_eq!(file.name(), "x.png");
        assert!(file.fallback());
        assert!(file.warning().is_some());
        assert_eq!(file.bytes(), b"not a png");
    }

    #[test]
    fn media_without_a_browser_engine_passes_through() {
        let file = compress_one(Category::Audio, "a.mp3", "audio/mpeg", &[7u8; 100], QualityTier::High).unwrap();
        assert_eq!(file.name(), "a-compressed.mp3");
        assert_eq!(file.bytes(), vec![7u8; 100]);
        assert!(!file.fallback());
    }
}
