//! Session state machine.
//!
//! ```text
//! Idle -> Collecting -> Processing -> Ready -> Idle   (reset)
//!         Collecting -> Idle                          (reset, or last item removed)
//! ```
//!
//! The controller owns the batch and the last outcome and knows nothing
//! about how it is displayed. Front ends feed it [`Event`]s and read back
//! [`Controls`], [`Notice`]s and the progress line.

use log::{error, info};

use crate::error::{BatchError, Result};
use crate::intake::{BatchState, Candidate, IntakeReport};
use crate::output::{assemble, format_kb, Artifact, ArchiveWriter, DownloadSink, ZipArchiveWriter};
use crate::pipeline::{BatchOutcome, Pipeline, Progress};
use crate::quality::QualityTier;

pub const WAITING: &str = "Waiting for upload…";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Collecting,
    Processing,
    Ready,
}

#[derive(Debug, Clone)]
pub enum Event {
    ItemsAdded(Vec<Candidate>),
    ItemRemoved(usize),
    ProcessRequested(QualityTier),
    ResetRequested,
    DownloadRequested(DownloadTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadTarget {
    /// The single file or the archive.
    Artifact,
    /// One result by position, next to the archive.
    Item(usize),
}

/// Messages for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    CapacityReached { max: usize },
    Fallback { name: String, reason: String },
    BatchFailed(String),
}

/// Which controls are usable in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub add: bool,
    pub process: bool,
    pub reset: bool,
    pub download: bool,
}

pub struct Controller<S: DownloadSink> {
    pipeline: Pipeline,
    archive: Box<dyn ArchiveWriter>,
    sink: S,
    state: SessionState,
    batch: BatchState,
    outcome: BatchOutcome,
    artifact: Option<Artifact>,
    notices: Vec<Notice>,
    progress: String,
    on_progress: Option<Box<dyn FnMut(&Progress)>>,
}

impl<S: DownloadSink> Controller<S> {
    pub fn new(pipeline: Pipeline, sink: S) -> Self {
        let batch = BatchState::new(pipeline.config());
        let archive = ZipArchiveWriter::for_category(pipeline.config().category);
        Self {
            pipeline,
            archive: Box::new(archive),
            sink,
            state: SessionState::Idle,
            batch,
            outcome: BatchOutcome::default(),
            artifact: None,
            notices: Vec::new(),
            progress: WAITING.to_string(),
            on_progress: None,
        }
    }

    pub fn with_archive_writer(mut self, archive: Box<dyn ArchiveWriter>) -> Self {
        self.archive = archive;
        self
    }

    /// Called with every progress update during a run.
    pub fn on_progress(mut self, callback: impl FnMut(&Progress) + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn batch(&self) -> &BatchState {
        &self.batch
    }

    pub fn outcome(&self) -> &BatchOutcome {
        &self.outcome
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    pub fn progress(&self) -> &str {
        &self.progress
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Hands over pending notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn controls(&self) -> Controls {
        match self.state {
            SessionState::Idle => Controls {
                add: true,
                process: false,
                reset: true,
                download: false,
            },
            SessionState::Collecting => Controls {
                add: !self.batch.is_full(),
                process: true,
                reset: true,
                download: false,
            },
            SessionState::Processing => Controls {
                add: false,
                process: false,
                reset: false,
                download: false,
            },
            SessionState::Ready => Controls {
                add: false,
                process: false,
                reset: true,
                download: true,
            },
        }
    }

    pub fn dispatch(&mut self, event: Event) -> Result<()> {
        match event {
            Event::ItemsAdded(candidates) => self.add(candidates).map(|_| ()),
            Event::ItemRemoved(index) => self.remove(index),
            Event::ProcessRequested(tier) => self.process(tier).map(|_| ()),
            Event::ResetRequested => self.reset(),
            Event::DownloadRequested(target) => self.download(target),
        }
    }

    pub fn add(&mut self, candidates: Vec<Candidate>) -> Result<IntakeReport> {
        self.expect_collecting("add files")?;

        let report = self.batch.accept_all(candidates);
        if report.capacity_reached() {
            self.notices.push(Notice::CapacityReached {
                max: self.batch.capacity(),
            });
        }
        self.sync_collecting();
        Ok(report)
    }

    pub fn remove(&mut self, index: usize) -> Result<()> {
        self.expect_collecting("remove files")?;
        self.batch.remove(index)?;
        self.sync_collecting();
        Ok(())
    }

    /// Runs the batch and builds the download. A failure to start the engine
    /// or to build the archive leaves the batch queued and the controls
    /// usable again.
    pub fn process(&mut self, tier: QualityTier) -> Result<&Artifact> {
        match self.state {
            SessionState::Collecting => {}
            SessionState::Idle => return Err(BatchError::EmptyBatch),
            state => return Err(BatchError::invalid_state("process", state)),
        }

        self.state = SessionState::Processing;
        self.outcome = BatchOutcome::default();
        self.artifact = None;

        match self.run(tier) {
            Ok((outcome, artifact)) => {
                for result in outcome.fallbacks() {
                    self.notices.push(Notice::Fallback {
                        name: result.output_name.clone(),
                        reason: result.warning.clone().unwrap_or_default(),
                    });
                }
                info!(
                    "Batch done: {} -> {}",
                    format_kb(outcome.original_total()),
                    format_kb(outcome.output_total())
                );
                self.outcome = outcome;
                self.state = SessionState::Ready;
                self.report(Progress::Done);
                Ok(&*self.artifact.insert(artifact))
            }
            Err(e) => {
                error!("Batch failed: {}", e);
                self.notices.push(Notice::BatchFailed(e.to_string()));
                self.progress = format!("Failed: {}", e);
                self.state = SessionState::Collecting;
                Err(e)
            }
        }
    }

    fn run(&mut self, tier: QualityTier) -> Result<(BatchOutcome, Artifact)> {
        let Self {
            pipeline,
            batch,
            progress,
            on_progress,
            archive,
            ..
        } = self;

        let mut report = |p: Progress| {
            *progress = p.to_string();
            if let Some(callback) = on_progress.as_mut() {
                callback(&p);
            }
        };

        let outcome = pipeline.run(batch, tier, &mut report)?;

        let config = pipeline.config();
        if outcome.len() > 1 {
            report(Progress::Packaging);
        }
        let artifact = assemble(&outcome, &config.archive_name, &mut **archive)?;
        Ok((outcome, artifact))
    }

    /// Empties everything. Allowed in any state but `Processing`.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == SessionState::Processing {
            return Err(BatchError::invalid_state("reset", self.state));
        }
        self.batch.clear();
        self.outcome = BatchOutcome::default();
        self.artifact = None;
        self.notices.clear();
        self.progress = WAITING.to_string();
        self.state = SessionState::Idle;
        Ok(())
    }

    pub fn download(&mut self, target: DownloadTarget) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(BatchError::invalid_state("download", self.state));
        }

        match target {
            DownloadTarget::Artifact => {
                let artifact = self.artifact.as_ref().ok_or(BatchError::NoResult)?;
                self.sink.save(artifact.name(), artifact.bytes())
            }
            DownloadTarget::Item(index) => {
                let results = self.outcome.results();
                let result = results.get(index).ok_or(BatchError::IndexOutOfRange {
                    index,
                    len: results.len(),
                })?;
                self.sink.save(&result.output_name, &result.bytes)
            }
        }
    }

    fn report(&mut self, p: Progress) {
        self.progress = p.to_string();
        if let Some(callback) = self.on_progress.as_mut() {
            callback(&p);
        }
    }

    fn expect_collecting(&self, action: &'static str) -> Result<()> {
        match self.state {
            SessionState::Idle | SessionState::Collecting => Ok(()),
            state => Err(BatchError::invalid_state(action, state)),
        }
    }

    fn sync_collecting(&mut self) {
        self.state = if self.batch.is_empty() {
            SessionState::Idle
        } else {
            SessionState::Collecting
        };
    }
}
