//! Intake and the capacity guard.
//!
//! Candidates come from a drop or a file picker as a group. Each is checked
//! against the tool's category, the name-dedupe rule and the capacity. When
//! capacity is hit the caller gets a single notice and the rest of that
//! group is ignored.

use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use crate::category::{mime_from_name, Category};
use crate::config::ToolConfig;
use crate::error::{BatchError, Result as BatchResult};

/// A raw file handle as delivered by the intake surface.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Candidate {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Reads a file from disk, guessing its MIME type from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Unusable file name: {}", path.display()))?
            .to_string();
        let mime = mime_from_name(path).to_string();
        Ok(Self { name, mime, bytes })
    }
}

/// An accepted file. Immutable once in the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct InputItem {
    name: String,
    mime: String,
    category: Category,
    bytes: Vec<u8>,
}

impl InputItem {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    WrongCategory,
    Duplicate,
    AtCapacity,
}

/// Summary of one drop/selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub accepted: Vec<String>,
    pub wrong_category: Vec<String>,
    pub duplicates: Vec<String>,
    /// Candidates not looked at because the batch filled up.
    pub over_capacity: Vec<String>,
}

impl IntakeReport {
    pub fn capacity_reached(&self) -> bool {
        !self.over_capacity.is_empty()
    }
}

/// Ordered, bounded set of queued items.
#[derive(Debug, Clone)]
pub struct BatchState {
    category: Category,
    capacity: usize,
    dedupe_by_name: bool,
    items: Vec<InputItem>,
}

impl BatchState {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            category: config.category,
            capacity: config.effective_capacity(),
            dedupe_by_name: config.dedupe_by_name,
            items: Vec::with_capacity(config.effective_capacity()),
        }
    }

    pub fn items(&self) -> &[InputItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tries to add a single candidate.
    pub fn accept(&mut self, candidate: Candidate) -> Admission {
        if Category::from_mime(&candidate.mime) != Some(self.category) {
            debug!(
                "Dropping {} ({}): not a {} file",
                candidate.name, candidate.mime, self.category
            );
            return Admission::WrongCategory;
        }
        if self.is_full() {
            return Admission::AtCapacity;
        }
        if self.dedupe_by_name && self.items.iter().any(|i| i.name == candidate.name) {
            debug!("Skipping {}: already queued", candidate.name);
            return Admission::Duplicate;
        }

        self.items.push(InputItem {
            name: candidate.name,
            mime: candidate.mime,
            category: self.category,
            bytes: candidate.bytes,
        });
        Admission::Accepted
    }

    /// Adds a group of candidates in order, stopping at the first one that
    /// would exceed capacity.
    pub fn accept_all(&mut self, candidates: impl IntoIterator<Item = Candidate>) -> IntakeReport {
        let mut report = IntakeReport::default();
        let mut full = false;

        for candidate in candidates {
            if full {
                // Still filter by category so the notice only counts real overflow.
                if Category::from_mime(&candidate.mime) == Some(self.category) {
                    report.over_capacity.push(candidate.name);
                } else {
                    report.wrong_category.push(candidate.name);
                }
                continue;
            }

            let name = candidate.name.clone();
            match self.accept(candidate) {
                Admission::Accepted => report.accepted.push(name),
                Admission::WrongCategory => report.wrong_category.push(name),
                Admission::Duplicate => report.duplicates.push(name),
                Admission::AtCapacity => {
                    full = true;
                    report.over_capacity.push(name);
                }
            }
        }

        report
    }

    /// Removes the item at `index`, shifting later items down.
    pub fn remove(&mut self, index: usize) -> BatchResult<InputItem> {
        if index >= self.items.len() {
            return Err(BatchError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        Ok(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
