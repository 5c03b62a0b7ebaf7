//! Per-category compression engines.
//!
//! An engine is driven through `&mut self`, one item at a time. Engines that
//! wrap a single external session (ffmpeg's scratch directory, for one) rely
//! on that: the pipeline never holds two calls into the same engine.

use anyhow::Result;

use crate::category::Category;
use crate::config::ToolConfig;
use crate::intake::InputItem;
use crate::quality::EngineParam;

mod ffmpeg;
mod raster;
mod pdf;

pub use self::ffmpeg::{FfmpegMode, FfmpegTranscoder};
pub use self::raster::ImageReencoder;
pub use self::pdf::PdfImageRecompressor;

pub trait Transform {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Starts the engine before the first item. A failure here aborts the
    /// whole run, unlike failures in [`Transform::transform`].
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Extension of the produced container when it differs from the input's.
    fn output_extension(&self, _item: &InputItem) -> Option<String> {
        None
    }

    fn transform(&mut self, item: &InputItem, param: EngineParam) -> Result<Vec<u8>>;
}

/// Hands the original bytes back untouched.
#[derive(Debug, Default, Clone)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn transform(&mut self, item: &InputItem, _param: EngineParam) -> Result<Vec<u8>> {
        Ok(item.bytes().to_vec())
    }
}

/// Options for [`engine_for`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Longer-side cap for re-encoded images, in pixels.
    pub max_dim: Option<u32>,
    pub ffmpeg: std::path::PathBuf,
    pub passthrough: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_dim: None,
            ffmpeg: "ffmpeg".into(),
            passthrough: false,
        }
    }
}

/// The stock engine for a tool.
pub fn engine_for(config: &ToolConfig, options: &EngineOptions) -> Box<dyn Transform> {
    if options.passthrough {
        return Box::new(Passthrough);
    }
    match config.category {
        Category::Image => Box::new(ImageReencoder::new().with_max_dim(options.max_dim)),
        Category::Pdf => Box::new(PdfImageRecompressor::new(
            options.max_dim.unwrap_or(PdfImageRecompressor::DEFAULT_MAX_DIM),
        )),
        Category::Audio => Box::new(FfmpegTranscoder::new(&options.ffmpeg, FfmpegMode::Audio)),
        Category::Video => Box::new(FfmpegTranscoder::new(&options.ffmpeg, FfmpegMode::Video)),
    }
}
