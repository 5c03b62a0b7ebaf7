//! Sequential, failure-tolerant batch processing.
//!
//! Items go through the engine strictly in batch order. A failing item is
//! replaced by its original bytes and a warning; the run always yields one
//! result per queued item.

use std::fmt;

use log::{debug, info, warn};

use crate::config::ToolConfig;
use crate::error::{BatchError, Result};
use crate::intake::{BatchState, InputItem};
use crate::output::{format_kb, output_name};
use crate::quality::QualityTier;
use crate::transform::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStatus {
    Transformed,
    PassthroughFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionResult {
    pub output_name: String,
    pub bytes: Vec<u8>,
    pub original_size: u64,
    pub status: ConversionStatus,
    /// Why the original bytes were kept.
    pub warning: Option<String>,
}

impl ConversionResult {
    pub fn output_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn passthrough(item: &InputItem, warning: String) -> Self {
        Self {
            output_name: item.name().to_string(),
            bytes: item.bytes().to_vec(),
            original_size: item.size(),
            status: ConversionStatus::PassthroughFallback,
            warning: Some(warning),
        }
    }
}

impl fmt::Display for ConversionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.output_name,
            format_kb(self.original_size),
            format_kb(self.output_size())
        )?;
        if let Some(warning) = &self.warning {
            write!(f, " (kept original: {})", warning)?;
        }
        Ok(())
    }
}

/// Results of one run, parallel to the batch it was started from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    results: Vec<ConversionResult>,
}

impl BatchOutcome {
    pub fn results(&self) -> &[ConversionResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ConversionResult> {
        self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn fallbacks(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results
            .iter()
            .filter(|r| r.status == ConversionStatus::PassthroughFallback)
    }

    pub fn original_total(&self) -> u64 {
        self.results.iter().map(|r| r.original_size).sum()
    }

    pub fn output_total(&self) -> u64 {
        self.results.iter().map(ConversionResult::output_size).sum()
    }
}

/// Progress reported while a run is underway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Item `index` (1-based) of `total` is about to start.
    Item {
        index: usize,
        total: usize,
        name: String,
    },
    Packaging,
    Done,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Item { index, total, name } => {
                write!(f, "Processing item {} of {}: {}", index, total, name)
            }
            Progress::Packaging => f.write_str("Packaging archive…"),
            Progress::Done => f.write_str("Done!"),
        }
    }
}

/// One tool's pipeline: its configuration plus the engine that does the work.
pub struct Pipeline {
    config: ToolConfig,
    engine: Box<dyn Transform>,
}

impl Pipeline {
    pub fn new(config: ToolConfig, engine: Box<dyn Transform>) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Processes every queued item in order.
    ///
    /// Only an engine that fails to start is an error; per-item failures
    /// become passthrough results.
    pub fn run(
        &mut self,
        batch: &BatchState,
        tier: QualityTier,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<BatchOutcome> {
        if batch.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        self.engine
            .prepare()
            .map_err(|e| BatchError::EngineInit(format!("{}: {:#}", self.engine.name(), e)))?;

        let param = self.config.quality.lookup(tier);
        let total = batch.len();
        debug!(
            "Running {} on {} item(s) at {} ({})",
            self.engine.name(),
            total,
            tier,
            param
        );

        let mut results = Vec::with_capacity(total);
        for (i, item) in batch.items().iter().enumerate() {
            progress(Progress::Item {
                index: i + 1,
                total,
                name: item.name().to_string(),
            });
            debug!(
                "Starting {} ({} {}, {})",
                item.name(),
                item.category(),
                item.mime(),
                format_kb(item.size())
            );
            let result = self.convert(item, tier);
            info!("{}", result);
            results.push(result);
        }

        Ok(BatchOutcome { results })
    }

    fn convert(&mut self, item: &InputItem, tier: QualityTier) -> ConversionResult {
        let param = self.config.quality.lookup(tier);

        let bytes = match self.engine.transform(item, param) {
            Ok(bytes) => bytes,
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!("Compression failed for {}: {}", item.name(), reason);
                return ConversionResult::passthrough(item, reason);
            }
        };

        if !self.config.allow_growth && bytes.len() as u64 > item.size() {
            let reason = format!(
                "output was larger ({} > {})",
                format_kb(bytes.len() as u64),
                format_kb(item.size())
            );
            warn!("{}: {}", item.name(), reason);
            return ConversionResult::passthrough(item, reason);
        }

        let extension = self.engine.output_extension(item);
        ConversionResult {
            output_name: output_name(item.name(), &self.config.suffix, extension.as_deref()),
            bytes,
            original_size: item.size(),
            status: ConversionStatus::Transformed,
            warning: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;
    use crate::intake::Candidate;
    use crate::quality::EngineParam;
    use crate::transform::Passthrough;

    struct Grow;

    impl Transform for Grow {
        fn name(&self) -> &str {
            "grow"
        }

        fn transform(&mut self, item: &InputItem, _param: EngineParam) -> anyhow::Result<Vec<u8>> {
            let mut out = item.bytes().to_vec();
            out.extend_from_slice(b"padding");
            Ok(out)
        }
    }

    struct Broken;

    impl Transform for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn prepare(&mut self) -> anyhow::Result<()> {
            bail!("engine missing")
        }

        fn transform(&mut self, _item: &InputItem, _param: EngineParam) -> anyhow::Result<Vec<u8>> {
            unreachable!("prepare failed")
        }
    }

    fn batch(config: &ToolConfig) -> BatchState {
        let mut batch = BatchState::new(config);
        batch.accept(Candidate::new("a.png", "image/png", vec![7; 64]));
        batch
    }

    #[test]
    fn growth_is_rejected_unless_allowed() {
        let mut config = ToolConfig::image();
        let queued = batch(&config);

        let outcome = Pipeline::new(config.clone(), Box::new(Grow))
            .run(&queued, QualityTier::Medium, &mut |_| {})
            .unwrap();
        let result = &outcome.results()[0];
        assert_eq!(result.status, ConversionStatus::PassthroughFallback);
        assert_eq!(result.bytes, vec![7; 64]);
        assert_eq!(result.output_name, "a.png");

        config.allow_growth = true;
        let outcome = Pipeline::new(config, Box::new(Grow))
            .run(&queued, QualityTier::Medium, &mut |_| {})
            .unwrap();
        assert_eq!(outcome.results()[0].status, ConversionStatus::Transformed);
        assert_eq!(outcome.results()[0].output_size(), 71);
    }

    #[test]
    fn engine_start_failure_is_batch_level() {
        let config = ToolConfig::image();
        let queued = batch(&config);
        let err = Pipeline::new(config, Box::new(Broken))
            .run(&queued, QualityTier::Low, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, BatchError::EngineInit(msg) if msg.contains("engine missing")));
    }

    #[test]
    fn empty_batch_is_an_error() {
        let config = ToolConfig::pdf();
        let empty = BatchState::new(&config);
        let mut pipeline = Pipeline::new(config, Box::new(Passthrough));
        assert!(matches!(
            pipeline.run(&empty, QualityTier::High, &mut |_| {}),
            Err(BatchError::EmptyBatch)
        ));
    }

    #[test]
    fn progress_text() {
        let p = Progress::Item {
            index: 2,
            total: 3,
            name: "b.png".into(),
        };
        assert_eq!(p.to_string(), "Processing item 2 of 3: b.png");
    }
}
