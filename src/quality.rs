use std::fmt;

use clap::ValueEnum;

use crate::category::Category;

/// User-facing quality choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
        })
    }
}

/// Engine-specific parameter a tier resolves to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineParam {
    /// Encoder quality in `0.0..=1.0` (canvas-style image encoders).
    Quality(f32),
    /// Target bitrate in kbit/s (media re-recording).
    Bitrate(u32),
    /// Constant rate factor (transcoders; lower is better).
    Crf(u8),
}

impl EngineParam {
    /// Quality as a JPEG 1-100 setting, if this is a quality parameter.
    pub fn jpeg_quality(&self) -> Option<u8> {
        match self {
            EngineParam::Quality(q) => Some((q.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8),
            _ => None,
        }
    }
}

impl fmt::Display for EngineParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineParam::Quality(q) => write!(f, "quality {:.2}", q),
            EngineParam::Bitrate(kbps) => write!(f, "{}k", kbps),
            EngineParam::Crf(crf) => write!(f, "crf {}", crf),
        }
    }
}

/// Fixed tier -> parameter lookup for one tool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityTable {
    pub low: EngineParam,
    pub medium: EngineParam,
    pub high: EngineParam,
}

impl QualityTable {
    pub const IMAGE: QualityTable = QualityTable {
        low: EngineParam::Quality(0.5),
        medium: EngineParam::Quality(0.7),
        high: EngineParam::Quality(0.9),
    };

    pub const AUDIO: QualityTable = QualityTable {
        low: EngineParam::Bitrate(64),
        medium: EngineParam::Bitrate(96),
        high: EngineParam::Bitrate(128),
    };

    pub const VIDEO: QualityTable = QualityTable {
        low: EngineParam::Crf(35),
        medium: EngineParam::Crf(28),
        high: EngineParam::Crf(23),
    };

    pub const PDF: QualityTable = QualityTable {
        low: EngineParam::Quality(0.3),
        medium: EngineParam::Quality(0.5),
        high: EngineParam::Quality(0.75),
    };

    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Image => Self::IMAGE,
            Category::Audio => Self::AUDIO,
            Category::Video => Self::VIDEO,
            Category::Pdf => Self::PDF,
        }
    }

    pub fn lookup(&self, tier: QualityTier) -> EngineParam {
        match tier {
            QualityTier::Low => self.low,
            QualityTier::Medium => self.medium,
            QualityTier::High => self.high,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_fixed_per_category() {
        let video = QualityTable::for_category(Category::Video);
        assert_eq!(video.lookup(QualityTier::Low), EngineParam::Crf(35));
        assert_eq!(video.lookup(QualityTier::High), EngineParam::Crf(23));

        let audio = QualityTable::for_category(Category::Audio);
        assert_eq!(audio.lookup(QualityTier::Medium), EngineParam::Bitrate(96));

        let image = QualityTable::for_category(Category::Image);
        assert_eq!(image.lookup(QualityTier::Medium), EngineParam::Quality(0.7));
    }

    #[test]
    fn jpeg_quality_is_clamped() {
        assert_eq!(EngineParam::Quality(0.8).jpeg_quality(), Some(80));
        assert_eq!(EngineParam::Quality(3.0).jpeg_quality(), Some(100));
        assert_eq!(EngineParam::Quality(0.0).jpeg_quality(), Some(1));
        assert_eq!(EngineParam::Crf(28).jpeg_quality(), None);
    }
}
