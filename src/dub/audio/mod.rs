//! Audio utility layer.
//!
//! Raw media primitives live behind [`AudioBackend`]; [`AudioUtils`] wraps a
//! backend with argument validation and scratch-file ownership so callers
//! only ever hold [`ClipFile`]s that delete themselves when dropped.

mod ffmpeg;

pub use ffmpeg::FfmpegBackend;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{TempDir, TempPath};

use crate::ui::prelude::*;

use super::error::{DubError, DubResult, MediaError};

/// Extension used for every intermediate clip
pub const WORK_EXTENSION: &str = "wav";

pub const MIN_SPEED_FACTOR: f64 = 0.5;
pub const MAX_SPEED_FACTOR: f64 = 2.0;
pub const MIN_SILENCE_SECONDS: f64 = 0.001;

/// Raw media operations. Implementations write to the given output path and
/// never take ownership of their inputs.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn cut_range(
        &self,
        input: &Path,
        begin: f64,
        end: f64,
        output: &Path,
    ) -> Result<(), MediaError>;

    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError>;

    async fn change_speed(&self, input: &Path, factor: f64, output: &Path)
    -> Result<(), MediaError>;

    async fn generate_silence(&self, seconds: f64, output: &Path) -> Result<(), MediaError>;

    async fn measure_duration(&self, input: &Path) -> Result<f64, MediaError>;

    /// Mixes all inputs without normalization; the result is as long as the longest input
    async fn overlay(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError>;

    /// Removes leading and trailing silence
    async fn trim_silence(&self, input: &Path, output: &Path) -> Result<(), MediaError>;

    /// Pulls the first audio stream out of an audio or video container
    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), MediaError>;

    fn name(&self) -> &'static str;
}

/// Per-run scratch directory. Removed with everything still inside it when dropped.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new_in(root: &Path) -> DubResult<Self> {
        let dir = tempfile::Builder::new().prefix("smartdub-").tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn scratch(&self, prefix: &str, extension: &str) -> DubResult<TempPath> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(&format!(".{extension}"))
            .tempfile_in(self.dir.path())?;
        Ok(file.into_temp_path())
    }
}

/// An owned scratch audio file, deleted when dropped.
pub struct ClipFile {
    path: TempPath,
}

impl ClipFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }

    /// Atomically places the clip at `destination`: the bytes are copied into a
    /// temp file in the destination directory which is then renamed over it.
    pub fn persist(self, destination: &Path) -> DubResult<()> {
        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;
        let staged = tempfile::Builder::new()
            .prefix(".smartdub-")
            .tempfile_in(&parent)?;
        std::fs::copy(&self.path, staged.path())?;
        staged
            .persist(destination)
            .map_err(|err| DubError::Io(err.error))?;
        Ok(())
    }
}

impl From<TempPath> for ClipFile {
    fn from(path: TempPath) -> Self {
        Self { path }
    }
}

impl fmt::Debug for ClipFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClipFile").field(&self.path.display()).finish()
    }
}

/// Validating facade over an [`AudioBackend`].
///
/// Operations that transform a clip consume it, so the input file is removed
/// as soon as the result exists.
#[derive(Clone)]
pub struct AudioUtils {
    backend: Arc<dyn AudioBackend>,
    workspace: Arc<Workspace>,
}

impl AudioUtils {
    pub fn new(backend: Arc<dyn AudioBackend>, workspace: Arc<Workspace>) -> Self {
        Self { backend, workspace }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn new_clip(&self, prefix: &str, extension: &str) -> DubResult<ClipFile> {
        Ok(ClipFile::from(self.workspace.scratch(prefix, extension)?))
    }

    /// Writes encoded audio bytes (e.g. a synthesis response) into a new clip.
    pub async fn import_bytes(&self, bytes: &[u8], extension: &str) -> DubResult<ClipFile> {
        let clip = self.new_clip("speech-", extension)?;
        tokio::fs::write(clip.path(), bytes).await?;
        Ok(clip)
    }

    /// Copies an existing audio file into the workspace.
    pub async fn import_file(&self, source: &Path) -> DubResult<ClipFile> {
        ensure_exists(source)?;
        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or(WORK_EXTENSION);
        let clip = self.new_clip("import-", extension)?;
        tokio::fs::copy(source, clip.path()).await?;
        Ok(clip)
    }

    pub async fn extract_audio(&self, media: &Path) -> DubResult<ClipFile> {
        ensure_exists(media)?;
        let clip = self.new_clip("source-", WORK_EXTENSION)?;
        self.backend.extract_audio(media, clip.path()).await?;
        Ok(clip)
    }

    pub async fn cut_range(&self, input: &Path, begin: f64, end: f64) -> DubResult<ClipFile> {
        ensure_exists(input)?;
        if !(begin >= 0.0 && begin < end) {
            return Err(DubError::InvalidInput(format!(
                "cannot cut range {begin}..{end} from {}",
                input.display()
            )));
        }
        let clip = self.new_clip("cut-", WORK_EXTENSION)?;
        self.backend.cut_range(input, begin, end, clip.path()).await?;
        Ok(clip)
    }

    /// Concatenates clips in order. With no clips the empty output clip is
    /// returned without invoking the backend.
    pub async fn concatenate(&self, clips: Vec<ClipFile>) -> DubResult<ClipFile> {
        self.concatenate_as(clips, WORK_EXTENSION).await
    }

    pub async fn concatenate_as(
        &self,
        clips: Vec<ClipFile>,
        extension: &str,
    ) -> DubResult<ClipFile> {
        let output = self.new_clip("concat-", extension)?;
        if clips.is_empty() {
            emit(
                Level::Warn,
                "dub.audio.concat_empty",
                "No clips to concatenate; returning an empty output file",
                Some(serde_json::json!({ "output": output.path().display().to_string() })),
            );
            return Ok(output);
        }

        let inputs: Vec<PathBuf> = clips.iter().map(|c| c.path().to_path_buf()).collect();
        self.backend.concatenate(&inputs, output.path()).await?;
        Ok(output)
    }

    /// Changes playback speed without changing pitch. A factor of exactly 1.0
    /// hands the clip back untouched.
    pub async fn change_speed(&self, clip: ClipFile, factor: f64) -> DubResult<ClipFile> {
        if !(MIN_SPEED_FACTOR..=MAX_SPEED_FACTOR).contains(&factor) {
            return Err(DubError::SpeedFactorOutOfRange(factor));
        }
        if factor == 1.0 {
            return Ok(clip);
        }
        let output = self.new_clip("tempo-", WORK_EXTENSION)?;
        self.backend
            .change_speed(clip.path(), factor, output.path())
            .await?;
        Ok(output)
    }

    pub async fn generate_silence(&self, seconds: f64) -> DubResult<ClipFile> {
        if !(seconds.is_finite() && seconds > MIN_SILENCE_SECONDS) {
            return Err(MediaError::InvalidSilenceDuration(seconds).into());
        }
        let output = self.new_clip("silence-", WORK_EXTENSION)?;
        self.backend.generate_silence(seconds, output.path()).await?;
        Ok(output)
    }

    pub async fn measure_duration(&self, path: &Path) -> DubResult<f64> {
        ensure_exists(path)?;
        Ok(self.backend.measure_duration(path).await?)
    }

    pub async fn overlay(&self, mut clips: Vec<ClipFile>) -> DubResult<ClipFile> {
        if clips.len() <= 1 {
            return match clips.pop() {
                Some(only) => Ok(only),
                None => self.concatenate(clips).await,
            };
        }
        let output = self.new_clip("mix-", WORK_EXTENSION)?;
        let inputs: Vec<PathBuf> = clips.iter().map(|c| c.path().to_path_buf()).collect();
        self.backend.overlay(&inputs, output.path()).await?;
        Ok(output)
    }

    /// Strips leading and trailing silence. If trimming fails the clip is
    /// handed back unchanged with a warning.
    pub async fn trim_silence(&self, clip: ClipFile) -> ClipFile {
        let output = match self.new_clip("trim-", WORK_EXTENSION) {
            Ok(output) => output,
            Err(err) => {
                warn_untrimmed(&clip, &err.to_string());
                return clip;
            }
        };
        match self.backend.trim_silence(clip.path(), output.path()).await {
            Ok(()) => output,
            Err(err) => {
                warn_untrimmed(&clip, &err.to_string());
                clip
            }
        }
    }
}

fn warn_untrimmed(clip: &ClipFile, reason: &str) {
    emit(
        Level::Warn,
        "dub.audio.trim_failed",
        &format!("Could not trim silence, keeping the untrimmed clip: {reason}"),
        Some(serde_json::json!({ "clip": clip.path().display().to_string() })),
    );
}

fn ensure_exists(path: &Path) -> Result<(), MediaError> {
    if path.exists() {
        Ok(())
    } else {
        Err(MediaError::MissingFile(path.to_path_buf()))
    }
}
