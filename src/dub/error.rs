use std::path::PathBuf;
use thiserror::Error;

/// Failures of the low-level audio utility layer.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Media file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Invalid or corrupted media {}: {message}", path.display())]
    InvalidMedia { path: PathBuf, message: String },

    #[error("{tool} failed: {message}")]
    CommandFailed { tool: &'static str, message: String },

    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} was not found in PATH")]
    ToolNotFound(&'static str),

    #[error("Could not parse duration '{raw}' reported for {}", path.display())]
    UnparsableDuration { path: PathBuf, raw: String },

    #[error("Silence duration must be greater than 0.001s, got {0}")]
    InvalidSilenceDuration(f64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DubError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Array length mismatch: {segments} segments but {clips} speech clips")]
    LengthMismatch { segments: usize, clips: usize },

    #[error("No utterances found in the transcription")]
    EmptyTranscription,

    #[error(
        "Segment {index} is {length} characters long (limit {limit}); merge thresholds do not fit this language"
    )]
    SegmentTooLong {
        index: usize,
        length: usize,
        limit: usize,
    },

    #[error(
        "The voice '{voice_id}' cannot be used for synthesis because it is a protected voice"
    )]
    ProtectedVoice { voice_id: String },

    #[error("Transient collaborator error: {0}")]
    Transient(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Speech synthesis failed after {attempts} attempts: {message}")]
    SynthesisFailed { attempts: u32, message: String },

    #[error("Rewrite request failed: {0}")]
    RewriteFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("{job} did not finish after {attempts} status checks")]
    PollTimeout { job: String, attempts: u32 },

    #[error("Speed factor {0} is outside the supported range [0.5, 2.0]")]
    SpeedFactorOutOfRange(f64),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DubError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DubError::Transient(_))
    }
}

impl From<reqwest::Error> for DubError {
    fn from(err: reqwest::Error) -> Self {
        DubError::Transient(err.to_string())
    }
}

pub type DubResult<T> = std::result::Result<T, DubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(DubError::Transient("429".into()).is_retryable());
        assert!(
            !DubError::ProtectedVoice {
                voice_id: "v1".into()
            }
            .is_retryable()
        );
        assert!(!DubError::SpeedFactorOutOfRange(3.0).is_retryable());
        assert!(!DubError::Rejected("404 voice not found".into()).is_retryable());
    }
}
