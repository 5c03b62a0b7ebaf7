use crate::category::Category;
use crate::quality::QualityTable;

/// Largest batch any tool accepts.
pub const MAX_CAPACITY: usize = 3;

/// Suffix inserted before the extension of transformed outputs.
pub const DEFAULT_SUFFIX: &str = "-compressed";

/// Everything that distinguishes one tool from another.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub category: Category,
    pub max_capacity: usize,
    /// Skip candidates whose name is already queued.
    pub dedupe_by_name: bool,
    pub suffix: String,
    pub archive_name: String,
    pub quality: QualityTable,
    /// Only ever hold one item (the video tool).
    pub single_file_only: bool,
    /// Keep transformed output even when it is larger than the input.
    pub allow_growth: bool,
}

impl ToolConfig {
    fn preset(category: Category, archive_name: &str) -> Self {
        Self {
            category,
            max_capacity: MAX_CAPACITY,
            dedupe_by_name: true,
            suffix: DEFAULT_SUFFIX.to_string(),
            archive_name: archive_name.to_string(),
            quality: QualityTable::for_category(category),
            single_file_only: false,
            allow_growth: false,
        }
    }

    pub fn image() -> Self {
        Self::preset(Category::Image, "compressed-images.zip")
    }

    pub fn audio() -> Self {
        Self::preset(Category::Audio, "audios.zip")
    }

    pub fn video() -> Self {
        Self {
            single_file_only: true,
            ..Self::preset(Category::Video, "compressed-videos.zip")
        }
    }

    pub fn pdf() -> Self {
        Self::preset(Category::Pdf, "compressed-pdfs.zip")
    }

    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Image => Self::image(),
            Category::Audio => Self::audio(),
            Category::Video => Self::video(),
            Category::Pdf => Self::pdf(),
        }
    }

    /// Capacity after the single-file restriction is applied.
    pub fn effective_capacity(&self) -> usize {
        if self.single_file_only {
            self.max_capacity.min(1)
        } else {
            self.max_capacity
        }
    }
}
