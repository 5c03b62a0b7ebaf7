use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use log::debug;
use tempfile::TempDir;

use super::Transform;
use crate::intake::InputItem;
use crate::output::extension_of;
use crate::quality::EngineParam;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfmpegMode {
    /// Re-encode the video stream at a CRF, keeping the container.
    Video,
    /// Re-record the audio as Opus at a bitrate, in a WebM container.
    Audio,
}

/// Drives an external `ffmpeg` binary.
///
/// The scratch directory is created by [`Transform::prepare`] and shared by
/// every item of the run, so items must go through one at a time.
#[derive(Debug)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    mode: FfmpegMode,
    workdir: Option<TempDir>,
}

impl FfmpegTranscoder {
    pub fn new(program: impl AsRef<Path>, mode: FfmpegMode) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            mode,
            workdir: None,
        }
    }

    fn build_args(
        &self,
        input: &Path,
        output: &Path,
        ext: &str,
        param: EngineParam,
    ) -> Result<Vec<String>> {
        let mut args: Vec<String> = ["-nostdin", "-loglevel", "error", "-y", "-i"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(input.to_str().context("Invalid input path")?.to_string());

        match (self.mode, param) {
            (FfmpegMode::Video, EngineParam::Crf(crf)) => {
                let codec = video_codec(ext);
                args.extend([
                    "-c:v".to_string(),
                    codec.to_string(),
                    "-crf".to_string(),
                    crf.to_string(),
                ]);
                if codec == "libvpx-vp9" {
                    // constant quality mode for VP9
                    args.extend(["-b:v".to_string(), "0".to_string()]);
                }
            }
            (FfmpegMode::Audio, EngineParam::Bitrate(kbps)) => {
                args.extend([
                    "-vn".to_string(),
                    "-c:a".to_string(),
                    "libopus".to_string(),
                    "-b:a".to_string(),
                    format!("{}k", kbps),
                ]);
            }
            (mode, param) => bail!("{:?} transcoding cannot use {}", mode, param),
        }

        args.push(output.to_str().context("Invalid output path")?.to_string());
        Ok(args)
    }
}

/// Encoder for a video container extension.
pub fn video_codec(ext: &str) -> &'static str {
    match ext {
        "webm" => "libvpx-vp9",
        _ => "libx264",
    }
}

impl Transform for FfmpegTranscoder {
    fn name(&self) -> &str {
        match self.mode {
            FfmpegMode::Video => "ffmpeg-video",
            FfmpegMode::Audio => "ffmpeg-audio",
        }
    }

    fn prepare(&mut self) -> Result<()> {
        if self.workdir.is_some() {
            return Ok(());
        }

        let output = Command::new(&self.program)
            .args(["-hide_banner", "-version"])
            .output()
            .with_context(|| {
                format!("Failed to run {}. Is ffmpeg installed?", self.program.display())
            })?;
        if !output.status.success() {
            bail!("{} -version exited with {}", self.program.display(), output.status);
        }

        self.workdir = Some(tempfile::tempdir().context("Failed to create scratch directory")?);
        Ok(())
    }

    fn output_extension(&self, _item: &InputItem) -> Option<String> {
        match self.mode {
            FfmpegMode::Audio => Some("webm".to_string()),
            FfmpegMode::Video => None,
        }
    }

    fn transform(&mut self, item: &InputItem, param: EngineParam) -> Result<Vec<u8>> {
        let workdir = self
            .workdir
            .as_ref()
            .context("ffmpeg engine used before prepare()")?
            .path()
            .to_path_buf();

        let ext = extension_of(item.name())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "bin".to_string());
        let out_ext = self.output_extension(item).unwrap_or_else(|| ext.clone());

        let input = workdir.join(format!("input.{}", ext));
        let output = workdir.join(format!("output.{}", out_ext));
        std::fs::write(&input, item.bytes()).context("Failed to stage input")?;

        let args = self.build_args(&input, &output, &ext, param)?;
        debug!("{} {}", self.program.display(), args.join(" "));

        let result = Command::new(&self.program)
            .args(&args)
            .output()
            .context("Failed to run ffmpeg");
        let data = result.and_then(|out| {
            if !out.status.success() {
                bail!("ffmpeg failed: {}", String::from_utf8_lossy(&out.stderr).trim());
            }
            std::fs::read(&output).context("Failed to read ffmpeg output")
        });

        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&output);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_codec_by_container() {
        assert_eq!(video_codec("webm"), "libvpx-vp9");
        assert_eq!(video_codec("mp4"), "libx264");
        assert_eq!(video_codec("mkv"), "libx264");
    }

    #[test]
    fn video_args() {
        let t = FfmpegTranscoder::new("ffmpeg", FfmpegMode::Video);
        let args = t
            .build_args(Path::new("/w/input.webm"), Path::new("/w/output.webm"), "webm", EngineParam::Crf(28))
            .unwrap();
        assert_eq!(
            args,
            vec![
                "-nostdin", "-loglevel", "error", "-y", "-i", "/w/input.webm", "-c:v", "libvpx-vp9",
                "-crf", "28", "-b:v", "0", "/w/output.webm"
            ]
        );
    }

    #[test]
    fn audio_args_and_mismatched_param() {
        let t = FfmpegTranscoder::new("ffmpeg", FfmpegMode::Audio);
        let args = t
            .build_args(Path::new("in.mp3"), Path::new("out.webm"), "mp3", EngineParam::Bitrate(96))
            .unwrap();
        assert!(args.windows(2).any(|w| w[0] == "-b:a" && w[1] == "96k"));
        assert!(args.contains(&"libopus".to_string()));

        assert!(t
            .build_args(Path::new("in.mp3"), Path::new("out.webm"), "mp3", EngineParam::Crf(28))
            .is_err());
    }

    #[test]
    fn missing_binary_fails_prepare() {
        let mut t = FfmpegTranscoder::new("/nonexistent/ffmpeg-binary", FfmpegMode::Video);
        assert!(t.prepare().is_err());
    }
}
