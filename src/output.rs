//! Output naming, archive assembly and delivery.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::category::Category;
use crate::error::{BatchError, Result};
use crate::pipeline::BatchOutcome;

lazy_static! {
    static ref EXTENSION: Regex = Regex::new(r"\.[^/.]+$").expect("valid extension pattern");
}

/// Extension of a file name without the dot, if it has one.
pub fn extension_of(name: &str) -> Option<&str> {
    EXTENSION.find(name).map(|m| &m.as_str()[1..])
}

/// File name with its extension removed.
pub fn stem_of(name: &str) -> &str {
    match EXTENSION.find(name) {
        Some(m) => &name[..m.start()],
        None => name,
    }
}

/// `photo.png` + `-compressed` -> `photo-compressed.png`, or with a new
/// extension when the container changes (`song.mp3` -> `song-compressed.webm`).
pub fn output_name(original: &str, suffix: &str, new_extension: Option<&str>) -> String {
    let stem = stem_of(original);
    match new_extension.or_else(|| extension_of(original)) {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext),
        None => format!("{}{}", stem, suffix),
    }
}

/// Makes every name unique by appending `-1`, `-2`, ... before the extension
/// of later duplicates. The first occurrence keeps its name.
pub fn dedupe_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut taken = HashSet::new();
    let mut unique = Vec::new();

    for name in names {
        let mut candidate = name.to_string();
        let mut index = 1;
        while taken.contains(&candidate) {
            candidate = output_name(name, &format!("-{}", index), None);
            index += 1;
        }
        taken.insert(candidate.clone());
        unique.push(candidate);
    }

    unique
}

/// Size in KB with one decimal, as shown in the comparison list.
pub fn format_kb(bytes: u64) -> String {
    format!("{:.1} KB", bytes as f64 / 1024.0)
}

pub fn format_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1_048_576.0)
}

/// Packs named payloads into one archive.
pub trait ArchiveWriter {
    fn write_archive(&mut self, entries: &[(String, &[u8])]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy)]
pub struct ZipArchiveWriter {
    method: CompressionMethod,
}

impl ZipArchiveWriter {
    pub fn new() -> Self {
        Self {
            method: CompressionMethod::Deflated,
        }
    }

    /// Already-compressed media gains nothing from deflate.
    pub fn stored() -> Self {
        Self {
            method: CompressionMethod::Stored,
        }
    }

    /// Stores audio and video as is; deflates images and PDFs.
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Audio | Category::Video => Self::stored(),
            Category::Image | Category::Pdf => Self::new(),
        }
    }
}

impl Default for ZipArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn write_archive(&mut self, entries: &[(String, &[u8])]) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(self.method);

        for (name, bytes) in entries {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        Ok(zip.finish()?.into_inner())
    }
}

/// The downloadable result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Single { name: String, bytes: Vec<u8> },
    Archive {
        name: String,
        bytes: Vec<u8>,
        members: Vec<String>,
    },
}

impl Artifact {
    pub fn name(&self) -> &str {
        match self {
            Artifact::Single { name, .. } | Artifact::Archive { name, .. } => name,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Artifact::Single { bytes, .. } | Artifact::Archive { bytes, .. } => bytes,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Artifact::Archive { .. })
    }
}

/// Builds the artifact for a finished batch: the one result directly, or
/// every result packed under a unique name. Single-file tools never get
/// here with more than one result; their batch holds one item.
pub fn assemble(
    outcome: &BatchOutcome,
    archive_name: &str,
    writer: &mut dyn ArchiveWriter,
) -> Result<Artifact> {
    let results = outcome.results();
    match results {
        [] => Err(BatchError::EmptyBatch),
        [only] => Ok(Artifact::Single {
            name: only.output_name.clone(),
            bytes: only.bytes.clone(),
        }),
        _ => {
            let members = dedupe_names(results.iter().map(|r| r.output_name.as_str()));
            let entries: Vec<(String, &[u8])> = members
                .iter()
                .cloned()
                .zip(results.iter().map(|r| r.bytes.as_slice()))
                .collect();
            let bytes = writer.write_archive(&entries)?;
            info!(
                "Packed {} file(s) into {} ({})",
                members.len(),
                archive_name,
                format_kb(bytes.len() as u64)
            );
            Ok(Artifact::Archive {
                name: archive_name.to_string(),
                bytes,
                members,
            })
        }
    }
}

/// Where downloads end up.
pub trait DownloadSink {
    fn save(&mut self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// Writes downloads into a directory, atomically per file.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    saved: Vec<PathBuf>,
}

impl DirectorySink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            saved: Vec::new(),
        }
    }

    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }
}

impl DownloadSink for DirectorySink {
    fn save(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        // Names come from user files; never let them escape the directory.
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, name.to_string()))?;
        let target = self.dir.join(file_name);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(&target).map_err(|e| e.error)?;

        debug!("Saved {}", target.display());
        self.saved.push(target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn names() {
        assert_eq!(extension_of("a.tar.gz"), Some("gz"));
        assert_eq!(extension_of("README"), None);
        assert_eq!(stem_of("clip.final.mp4"), "clip.final");
        assert_eq!(output_name("photo.png", "-compressed", None), "photo-compressed.png");
        assert_eq!(output_name("song.mp3", "-compressed", Some("webm")), "song-compressed.webm");
        assert_eq!(output_name("noext", "-compressed", None), "noext-compressed");
    }

    #[test]
    fn dedupes_collisions_with_index() {
        let names = dedupe_names(["a.jpg", "a.jpg", "b.jpg", "a.jpg", "a-1.jpg"]);
        assert_eq!(names, vec!["a.jpg", "a-1.jpg", "b.jpg", "a-2.jpg", "a-1-1.jpg"]);
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_kb(200_000), "195.3 KB");
        assert_eq!(format_mb(1_048_576), "1.00 MB");
    }

    #[test]
    fn zip_round_trip() {
        let entries = vec![
            ("one.txt".to_string(), &b"first"[..]),
            ("two.txt".to_string(), &b"second"[..]),
        ];
        let bytes = ZipArchiveWriter::new().write_archive(&entries).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive.by_name("two.txt").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn media_archives_skip_deflate() {
        let entries = vec![("clip.mp4".to_string(), &[0u8; 4096][..])];

        let stored = ZipArchiveWriter::for_category(Category::Video).write_archive(&entries).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(stored)).unwrap();
        assert_eq!(archive.by_index(0).unwrap().compression(), CompressionMethod::Stored);

        let deflated = ZipArchiveWriter::for_category(Category::Pdf).write_archive(&entries).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(deflated)).unwrap();
        assert_eq!(archive.by_index(0).unwrap().compression(), CompressionMethod::Deflated);
    }

    #[test]
    fn directory_sink_strips_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path());
        sink.save("../escape.txt", b"data").unwrap();

        assert_eq!(sink.saved(), &[dir.path().join("escape.txt")]);
        assert_eq!(std::fs::read(dir.path().join("escape.txt")).unwrap(), b"data");
    }
}
