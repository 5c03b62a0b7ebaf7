use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, GenericImageView};
use log::debug;

use super::Transform;
use crate::intake::InputItem;
use crate::quality::EngineParam;

/// Redraws an image at a smaller size and re-encodes it as JPEG.
#[derive(Debug, Clone)]
pub struct ImageReencoder {
    scale: f32,
    max_dim: Option<u32>,
}

impl ImageReencoder {
    /// Both sides are scaled to 80% before encoding.
    pub const DEFAULT_SCALE: f32 = 0.8;

    pub fn new() -> Self {
        Self {
            scale: Self::DEFAULT_SCALE,
            max_dim: None,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale.clamp(0.01, 1.0);
        self
    }

    pub fn with_max_dim(mut self, max_dim: Option<u32>) -> Self {
        self.max_dim = max_dim;
        self
    }
}

impl Default for ImageReencoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for ImageReencoder {
    fn name(&self) -> &str {
        "image"
    }

    fn output_extension(&self, _item: &InputItem) -> Option<String> {
        Some("jpg".to_string())
    }

    fn transform(&mut self, item: &InputItem, param: EngineParam) -> Result<Vec<u8>> {
        let quality = param
            .jpeg_quality()
            .with_context(|| format!("Image engine cannot use {}", param))?;

        let img = image::load_from_memory(item.bytes()).context("Failed to decode image")?;
        let (w, h) = img.dimensions();

        let target_w = ((w as f32 * self.scale).round() as u32).max(1);
        let target_h = ((h as f32 * self.scale).round() as u32).max(1);
        let mut img = if (target_w, target_h) != (w, h) {
            img.resize_exact(target_w, target_h, FilterType::Triangle)
        } else {
            img
        };

        if let Some(max_dim) = self.max_dim {
            if img.width() > max_dim || img.height() > max_dim {
                img = img.resize(max_dim, max_dim, FilterType::Lanczos3);
            }
        }

        // JPEG has no alpha; transparent pixels come out as their colour channels.
        let rgb = img.to_rgb8();
        let (out_w, out_h) = rgb.dimensions();
        debug!(
            "{}: {}x{} -> {}x{} JPEG(q={})",
            item.name(),
            w,
            h,
            out_w,
            out_h,
            quality
        );

        let mut buffer = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
        encoder
            .encode(rgb.as_raw(), out_w, out_h, ColorType::Rgb8.into())
            .context("JPEG encoding failed")?;

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, RgbImage};

    use super::*;
    use crate::config::ToolConfig;
    use crate::intake::{BatchState, Candidate};

    fn png_item(w: u32, h: u32) -> InputItem {
        let img = RgbImage::from_fn(w, h, |x, y| image::Rgb([(x * 4) as u8, (y * 4) as u8, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let mut batch = BatchState::new(&ToolConfig::image());
        batch.accept(Candidate::new("pic.png", "image/png", bytes));
        batch.items()[0].clone()
    }

    #[test]
    fn reencodes_as_scaled_jpeg() {
        let item = png_item(50, 40);
        let out = ImageReencoder::new()
            .transform(&item, EngineParam::Quality(0.7))
            .unwrap();

        assert_eq!(&out[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (40, 32));
    }

    #[test]
    fn caps_longer_side() {
        let item = png_item(60, 30);
        let out = ImageReencoder::new()
            .with_scale(1.0)
            .with_max_dim(Some(20))
            .transform(&item, EngineParam::Quality(0.5))
            .unwrap();

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (20, 10));
    }

    #[test]
    fn rejects_non_quality_param_and_garbage() {
        let item = png_item(8, 8);
        assert!(ImageReencoder::new()
            .transform(&item, EngineParam::Crf(28))
            .is_err());

        let mut batch = BatchState::new(&ToolConfig::image());
        batch.accept(Candidate::new("bad.png", "image/png", b"not a png".to_vec()));
        assert!(ImageReencoder::new()
            .transform(&batch.items()[0], EngineParam::Quality(0.7))
            .is_err());
    }
}
