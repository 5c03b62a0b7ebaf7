use std::cell::RefCell;
use std::collections::HashSet;
use std::io::Cursor;
use std::rc::Rc;

use anyhow::bail;
use batch_compressor::output::assemble;
use batch_compressor::{
    Artifact, BatchState, Candidate, ConversionStatus, EngineParam, InputItem, Pipeline,
    Progress, QualityTier, ToolConfig, Transform, ZipArchiveWriter,
};

/// Halves every payload and records the parameters it was called with.
#[derive(Default)]
struct Halve {
    calls: Rc<RefCell<Vec<(String, EngineParam)>>>,
    fail_on: HashSet<String>,
}

impl Halve {
    fn failing_on(names: &[&str]) -> Self {
        Self {
            fail_on: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Transform for Halve {
    fn name(&self) -> &str {
        "halve"
    }

    fn transform(&mut self, item: &InputItem, param: EngineParam) -> anyhow::Result<Vec<u8>> {
        self.calls.borrow_mut().push((item.name().to_string(), param));
        if self.fail_on.contains(item.name()) {
            bail!("decoder crashed on {}", item.name());
        }
        Ok(item.bytes()[..item.bytes().len() / 2].to_vec())
    }
}

fn image(name: &str, size: usize) -> Candidate {
    let mime = if name.ends_with(".png") { "image/png" } else { "image/jpeg" };
    Candidate::new(name, mime, vec![1u8; size])
}

#[test]
fn three_images_then_a_fourth() {
    let config = ToolConfig::image();
    let mut batch = BatchState::new(&config);

    let report = batch.accept_all(vec![
        image("a.png", 200_000),
        image("b.png", 500_000),
        image("c.jpg", 100_000),
    ]);
    assert_eq!(report.accepted.len(), 3);

    let report = batch.accept_all(vec![image("d.png", 10)]);
    assert!(report.capacity_reached());
    assert_eq!(batch.len(), 3);

    let mut pipeline = Pipeline::new(config, Box::new(Halve::default()));
    let outcome = pipeline
        .run(&batch, QualityTier::Medium, &mut |_| {})
        .unwrap();

    assert_eq!(outcome.len(), 3);
    for (result, item) in outcome.results().iter().zip(batch.items()) {
        assert_eq!(result.status, ConversionStatus::Transformed);
        assert!(result.output_size() <= result.original_size);
        assert_eq!(result.original_size, item.size());
    }
    let names: Vec<_> = outcome.results().iter().map(|r| r.output_name.as_str()).collect();
    assert_eq!(names, vec!["a-compressed.png", "b-compressed.png", "c-compressed.jpg"]);
}

#[test]
fn failed_item_falls_back_and_the_rest_continue() {
    let config = ToolConfig::image();
    let mut batch = BatchState::new(&config);
    batch.accept_all(vec![image("a.png", 100), image("b.png", 100), image("c.png", 100)]);

    let engine = Halve::failing_on(&["b.png"]);
    let calls = Rc::clone(&engine.calls);
    let outcome = Pipeline::new(config, Box::new(engine))
        .run(&batch, QualityTier::Low, &mut |_| {})
        .unwrap();

    assert_eq!(outcome.len(), 3);
    let failed = &outcome.results()[1];
    assert_eq!(failed.status, ConversionStatus::PassthroughFallback);
    assert_eq!(failed.bytes, batch.items()[1].bytes());
    assert_eq!(failed.output_name, "b.png");
    assert!(failed.warning.as_deref().unwrap().contains("decoder crashed"));

    assert_eq!(outcome.results()[2].status, ConversionStatus::Transformed);
    assert_eq!(outcome.fallbacks().count(), 1);

    let calls = calls.borrow();
    let called: Vec<_> = calls.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(called, vec!["a.png", "b.png", "c.png"]);
    assert!(calls.iter().all(|(_, p)| *p == EngineParam::Quality(0.5)));
}

#[test]
fn every_item_failing_still_yields_full_outcome() {
    let config = ToolConfig::image();
    let mut batch = BatchState::new(&config);
    batch.accept_all(vec![image("a.png", 10), image("b.png", 20)]);

    let mut pipeline = Pipeline::new(config, Box::new(Halve::failing_on(&["a.png", "b.png"])));
    let outcome = pipeline.run(&batch, QualityTier::High, &mut |_| {}).unwrap();

    assert_eq!(outcome.len(), 2);
    assert_eq!(outcome.fallbacks().count(), 2);
    assert_eq!(outcome.output_total(), outcome.original_total());
}

#[test]
fn progress_is_reported_before_each_item_in_order() {
    let config = ToolConfig::image();
    let mut batch = BatchState::new(&config);
    batch.accept_all(vec![image("a.png", 10), image("b.png", 10)]);

    let mut seen = Vec::new();
    Pipeline::new(config, Box::new(Halve::default()))
        .run(&batch, QualityTier::Medium, &mut |p| seen.push(p))
        .unwrap();

    assert_eq!(
        seen,
        vec![
            Progress::Item {
                index: 1,
                total: 2,
                name: "a.png".into()
            },
            Progress::Item {
                index: 2,
                total: 2,
                name: "b.png".into()
            },
        ]
    );
}

#[test]
fn single_audio_file_gives_one_artifact() {
    let config = ToolConfig::audio();
    let mut batch = BatchState::new(&config);
    batch.accept(Candidate::new("d.mp3", "audio/mpeg", vec![3u8; 1_000_000]));

    let outcome = Pipeline::new(config.clone(), Box::new(Halve::default()))
        .run(&batch, QualityTier::Medium, &mut |_| {})
        .unwrap();
    let artifact = assemble(&outcome, &config.archive_name, &mut ZipArchiveWriter::new()).unwrap();

    match artifact {
        Artifact::Single { name, bytes } => {
            assert_eq!(name, "d-compressed.mp3");
            assert_eq!(bytes.len(), 500_000);
        }
        other => panic!("expected a single file, got {:?}", other.name()),
    }
}

#[test]
fn colliding_outputs_are_renamed_inside_the_archive() {
    let mut config = ToolConfig::pdf();
    config.dedupe_by_name = false;
    let mut batch = BatchState::new(&config);
    batch.accept_all(vec![
        Candidate::new("report.pdf", "application/pdf", vec![1; 8]),
        Candidate::new("report.pdf", "application/pdf", vec![2; 8]),
    ]);

    let outcome = Pipeline::new(config.clone(), Box::new(Halve::default()))
        .run(&batch, QualityTier::Medium, &mut |_| {})
        .unwrap();
    let artifact = assemble(&outcome, &config.archive_name, &mut ZipArchiveWriter::new()).unwrap();

    let Artifact::Archive { name, bytes, members } = artifact else {
        panic!("expected an archive");
    };
    assert_eq!(name, "compressed-pdfs.zip");
    assert_eq!(members, vec!["report-compressed.pdf", "report-compressed-1.pdf"]);

    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut stored: Vec<_> = archive.file_names().collect();
    stored.sort();
    assert_eq!(stored, vec!["report-compressed-1.pdf", "report-compressed.pdf"]);
}
