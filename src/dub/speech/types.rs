use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::time::Duration;

use crate::dub::config::RetryConfig;
use crate::dub::error::DubResult;
use crate::dub::rewrite::PauseStyle;

/// Text of the neighbouring segments, forwarded so the voice keeps its intonation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechContext {
    pub previous_text: Option<String>,
    pub next_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice_id: String,
    pub context: SpeechContext,
    /// Speaking-rate hint, only sent during fine correction
    pub speed: Option<f64>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, voice_id: impl Into<String>, context: SpeechContext) -> Self {
        Self {
            text: text.into(),
            voice_id: voice_id.into(),
            context,
            speed: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }
}

/// Encoded audio returned by a synthesis service.
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    pub audio: Bytes,
    /// File extension matching the audio encoding
    pub extension: &'static str,
    pub request_id: String,
}

/// Text-to-speech service.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns [`DubError::ProtectedVoice`](crate::dub::error::DubError::ProtectedVoice)
    /// when the voice cannot be used, and `Transient` for anything worth retrying.
    async fn synthesize(&self, request: &SpeechRequest) -> DubResult<SynthesizedSpeech>;

    /// How pauses must be written in the text this engine receives
    fn pause_style(&self) -> PauseStyle;

    fn name(&self) -> &'static str;
}

/// Creates a synthesis voice from a recording of one speaker.
#[async_trait]
pub trait VoiceCloner: Send + Sync {
    /// Returns the id of the new voice.
    async fn clone_voice(&self, label: &str, sample: &Path) -> DubResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            attempts: config.synthesis_attempts.max(1),
            backoff: config.synthesis_backoff(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
