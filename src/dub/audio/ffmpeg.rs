use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::dub::error::MediaError;
use crate::ui::prelude::*;

use super::AudioBackend;

const SAMPLE_RATE: u32 = 44_100;
const SILENCE_THRESHOLD: &str = "-50dB";

/// [`AudioBackend`] that shells out to ffmpeg and ffprobe.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegBackend {
    /// Locates ffmpeg and ffprobe in PATH.
    pub fn discover() -> Result<Self, MediaError> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| MediaError::ToolNotFound("ffmpeg"))?;
        let ffprobe = which::which("ffprobe").map_err(|_| MediaError::ToolNotFound("ffprobe"))?;
        Ok(Self { ffmpeg, ffprobe })
    }

    async fn run_ffmpeg(&self, subject: &Path, args: Vec<OsString>) -> Result<(), MediaError> {
        let mut full = vec![
            OsString::from("-hide_banner"),
            OsString::from("-loglevel"),
            OsString::from("error"),
            OsString::from("-y"),
        ];
        full.extend(args);
        emit(
            Level::Debug,
            "dub.audio.ffmpeg",
            &format!("ffmpeg {}", display_args(&full)),
            None,
        );

        let output = Command::new(&self.ffmpeg)
            .args(&full)
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                tool: "ffmpeg",
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure("ffmpeg", subject, stderr));
        }
        Ok(())
    }
}

#[async_trait]
impl AudioBackend for FfmpegBackend {
    async fn cut_range(
        &self,
        input: &Path,
        begin: f64,
        end: f64,
        output: &Path,
    ) -> Result<(), MediaError> {
        let args = vec![
            "-i".into(),
            input.into(),
            "-ss".into(),
            format_seconds(begin).into(),
            "-to".into(),
            format_seconds(end).into(),
            "-vn".into(),
            output.into(),
        ];
        self.run_ffmpeg(input, args).await
    }

    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        let Some(first) = inputs.first() else {
            return Ok(());
        };
        let mut args: Vec<OsString> = Vec::with_capacity(inputs.len() * 2 + 6);
        for input in inputs {
            args.push("-i".into());
            args.push(input.into());
        }
        args.push("-filter_complex".into());
        args.push(concat_filter(inputs.len()).into());
        args.push("-map".into());
        args.push("[out]".into());
        args.push(output.into());
        self.run_ffmpeg(first, args).await
    }

    async fn change_speed(
        &self,
        input: &Path,
        factor: f64,
        output: &Path,
    ) -> Result<(), MediaError> {
        let args = vec![
            "-i".into(),
            input.into(),
            "-filter:a".into(),
            atempo_filter(factor).into(),
            "-vn".into(),
            output.into(),
        ];
        self.run_ffmpeg(input, args).await
    }

    async fn generate_silence(&self, seconds: f64, output: &Path) -> Result<(), MediaError> {
        let args = vec![
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!("anullsrc=r={SAMPLE_RATE}:cl=mono").into(),
            "-t".into(),
            format_seconds(seconds).into(),
            output.into(),
        ];
        self.run_ffmpeg(output, args).await
    }

    async fn measure_duration(&self, input: &Path) -> Result<f64, MediaError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                tool: "ffprobe",
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure("ffprobe", input, stderr));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        parse_duration(input, &raw)
    }

    async fn overlay(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        let Some(first) = inputs.first() else {
            return Ok(());
        };
        let mut args: Vec<OsString> = Vec::with_capacity(inputs.len() * 2 + 4);
        for input in inputs {
            args.push("-i".into());
            args.push(input.into());
        }
        args.push("-filter_complex".into());
        args.push(amix_filter(inputs.len()).into());
        args.push(output.into());
        self.run_ffmpeg(first, args).await
    }

    async fn trim_silence(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        let args = vec![
            "-i".into(),
            input.into(),
            "-af".into(),
            trim_silence_filter().into(),
            output.into(),
        ];
        self.run_ffmpeg(input, args).await
    }

    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        let args = vec![
            "-i".into(),
            input.into(),
            "-vn".into(),
            "-map".into(),
            "0:a:0".into(),
            "-ac".into(),
            "1".into(),
            "-ar".into(),
            SAMPLE_RATE.to_string().into(),
            output.into(),
        ];
        self.run_ffmpeg(input, args).await
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

fn format_seconds(seconds: f64) -> String {
    format!("{seconds:.4}")
}

fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resamples every input to a common mono format before concatenating so
/// synthesized speech and generated silence can be spliced together.
fn concat_filter(inputs: usize) -> String {
    let mut filter = String::new();
    for i in 0..inputs {
        filter.push_str(&format!(
            "[{i}:a]aresample={SAMPLE_RATE},aformat=sample_fmts=s16:channel_layouts=mono[a{i}];"
        ));
    }
    for i in 0..inputs {
        filter.push_str(&format!("[a{i}]"));
    }
    filter.push_str(&format!("concat=n={inputs}:v=0:a=1[out]"));
    filter
}

fn atempo_filter(factor: f64) -> String {
    format!("atempo={factor:.6}")
}

fn amix_filter(inputs: usize) -> String {
    format!("amix=inputs={inputs}:duration=longest:normalize=0")
}

fn trim_silence_filter() -> String {
    let strip = format!("silenceremove=start_periods=1:start_threshold={SILENCE_THRESHOLD}");
    format!("{strip},areverse,{strip},areverse")
}

fn parse_duration(path: &Path, raw: &str) -> Result<f64, MediaError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| MediaError::UnparsableDuration {
            path: path.to_path_buf(),
            raw: trimmed.to_string(),
        })
}

fn classify_failure(tool: &'static str, subject: &Path, stderr: String) -> MediaError {
    if stderr.contains("Invalid data found") || stderr.contains("could not find codec parameters")
    {
        MediaError::InvalidMedia {
            path: subject.to_path_buf(),
            message: stderr,
        }
    } else if stderr.contains("No such file or directory") && !subject.exists() {
        MediaError::MissingFile(subject.to_path_buf())
    } else {
        MediaError::CommandFailed {
            tool,
            message: stderr,
        }
    }
}
