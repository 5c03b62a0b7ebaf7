use std::fmt;
use std::path::Path;

use clap::ValueEnum;

/// Media family a tool accepts. Each tool instance processes exactly one.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Image,
    Audio,
    Video,
    Pdf,
}

// extension -> MIME for the formats the tools are expected to see
const EXTENSIONS: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
    ("oga", "audio/ogg"),
    ("flac", "audio/flac"),
    ("m4a", "audio/mp4"),
    ("aac", "audio/aac"),
    ("opus", "audio/opus"),
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("webm", "video/webm"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("wmv", "video/x-ms-wmv"),
    ("mkv", "video/x-matroska"),
    ("pdf", "application/pdf"),
];

impl Category {
    /// Classifies a MIME string. PDF is matched exactly, the media families by
    /// their top-level type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime == "application/pdf" {
            return Some(Category::Pdf);
        }
        match mime.split('/').next() {
            Some("image") => Some(Category::Image),
            Some("audio") => Some(Category::Audio),
            Some("video") => Some(Category::Video),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Image => "image",
            Category::Audio => "audio",
            Category::Video => "video",
            Category::Pdf => "pdf",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort MIME type for a file name, from its extension.
/// Unknown extensions map to `application/octet-stream`.
pub fn mime_from_name(name: impl AsRef<Path>) -> &'static str {
    let ext = name
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    ext.and_then(|ext| {
        EXTENSIONS
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, mime)| *mime)
    })
    .unwrap_or("application/octet-stream")
}
