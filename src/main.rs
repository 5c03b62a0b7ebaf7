use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use batch_compressor::output::format_mb;
use batch_compressor::{
    engine_for, Candidate, Category, Controller, DirectorySink, DownloadTarget, EngineOptions, Notice,
    Pipeline, QualityTier, ToolConfig,
};
use clap::Parser;

/// Compress up to three media files at once
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Tool to use
    #[arg(value_enum)]
    kind: Category,

    /// Input files (the video tool takes one)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Compression quality
    #[arg(long, value_enum, default_value_t = QualityTier::Medium)]
    quality: QualityTier,

    /// Directory to save results into
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Max image dimension (longer side)
    #[arg(long)]
    max_dim: Option<u32>,

    /// Name of the zip when several files are compressed
    #[arg(long)]
    archive_name: Option<String>,

    /// Accept files with the same name twice
    #[arg(long)]
    no_dedupe: bool,

    /// Keep compressed output even if it is bigger than the original
    #[arg(long)]
    allow_growth: bool,

    /// Repackage files without compressing them
    #[arg(long)]
    passthrough: bool,

    /// ffmpeg binary for audio and video
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Also save every file individually next to the archive
    #[arg(long)]
    each: bool,
}

fn tool_config(args: &Args) -> ToolConfig {
    let mut config = ToolConfig::for_category(args.kind);
    if let Some(name) = &args.archive_name {
        config.archive_name = name.clone();
    }
    config.dedupe_by_name = !args.no_dedupe;
    config.allow_growth = args.allow_growth;
    config
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = tool_config(&args);
    let options = EngineOptions {
        max_dim: args.max_dim,
        ffmpeg: args.ffmpeg.clone(),
        passthrough: args.passthrough,
    };
    let engine = engine_for(&config, &options);
    let category = config.category;

    let mut controller = Controller::new(Pipeline::new(config, engine), DirectorySink::new(&args.out_dir))
        .on_progress(|p| println!("{}", p));

    let candidates = args
        .inputs
        .iter()
        .map(|path| Candidate::from_path(path))
        .collect::<Result<Vec<_>>>()?;

    let report = controller.add(candidates)?;
    for name in &report.wrong_category {
        eprintln!("Skipping {}: not a {} file", name, category);
    }
    for name in &report.duplicates {
        eprintln!("Skipping {}: already added", name);
    }
    for notice in controller.take_notices() {
        if let Notice::CapacityReached { max } = notice {
            eprintln!(
                "Only {} file(s) allowed at once; ignoring {}",
                max,
                report.over_capacity.join(", ")
            );
        }
    }
    if controller.batch().is_empty() {
        bail!("No {} files to compress", category);
    }

    let start = Instant::now();
    controller
        .process(args.quality)
        .context("Compression failed")?;
    println!("Processed in {:.2?}", start.elapsed());

    for result in controller.outcome().results() {
        println!("{}", result);
    }
    for notice in controller.take_notices() {
        if let Notice::Fallback { name, reason } = notice {
            eprintln!("Warning: {} was not compressed: {}", name, reason);
        }
    }

    controller
        .download(DownloadTarget::Artifact)
        .context("Failed to save result")?;
    let is_archive = controller.artifact().map_or(false, |a| a.is_archive());
    if args.each && is_archive {
        for index in 0..controller.outcome().len() {
            controller.download(DownloadTarget::Item(index))?;
        }
    }

    let outcome = controller.outcome();
    println!("Original size: {}", format_mb(outcome.original_total()));
    println!("New size:      {}", format_mb(outcome.output_total()));
    for path in controller.sink().saved() {
        println!("Saved {}", path.display());
    }

    Ok(())
}
