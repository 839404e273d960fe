//! In-memory collaborators for unit tests.
//!
//! Fake "audio files" hold their duration as plain text, so every audio
//! operation is plain arithmetic on those numbers.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::audio::{AudioBackend, AudioUtils, ClipFile, Workspace};
use super::error::{DubError, DubResult, MediaError};
use super::rewrite::{PauseStyle, RewriteRequest, Rewriter};
use super::segment::{Segment, SpeakerId};
use super::speech::{SpeechRequest, SpeechSynthesizer, SynthesizedSpeech, VoiceCloner};

pub fn segment(index: usize, speaker: SpeakerId, begin: f64, end: f64, text: &str) -> Segment {
    Segment {
        index,
        speaker,
        begin,
        end,
        text: text.to_string(),
        original_text: None,
        words_with_silence: text.to_string(),
        confidence: 1.0,
        language: "en".to_string(),
    }
}

pub fn fake_utils() -> (AudioUtils, Arc<FakeAudioBackend>, Arc<Workspace>) {
    let backend = Arc::new(FakeAudioBackend::default());
    let workspace =
        Arc::new(Workspace::new_in(&std::env::temp_dir()).expect("create test workspace"));
    let utils = AudioUtils::new(backend.clone(), workspace.clone());
    (utils, backend, workspace)
}

#[derive(Default)]
pub struct FakeAudioBackend {
    calls: Mutex<HashMap<&'static str, usize>>,
    mixes: Mutex<Vec<Vec<f64>>>,
    concatenations: Mutex<Vec<Vec<f64>>>,
    trim_seconds: Mutex<f64>,
    fail_trim: AtomicBool,
}

impl FakeAudioBackend {
    pub async fn clip(&self, utils: &AudioUtils, seconds: f64) -> ClipFile {
        utils
            .import_bytes(seconds.to_string().as_bytes(), "wav")
            .await
            .expect("write fake clip")
    }

    pub fn read_duration(path: &Path) -> Result<f64, MediaError> {
        let raw = std::fs::read_to_string(path)?;
        raw.trim()
            .parse()
            .map_err(|_| MediaError::UnparsableDuration {
                path: path.to_path_buf(),
                raw,
            })
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    /// Durations of the inputs of every concatenation, in call order
    pub fn concatenations(&self) -> Vec<Vec<f64>> {
        self.concatenations.lock().expect("lock").clone()
    }

    pub fn mixes(&self) -> Vec<Vec<f64>> {
        self.mixes.lock().expect("lock").clone()
    }

    /// Every trim removes this much from a clip
    pub fn trim_by(&self, seconds: f64) {
        *self.trim_seconds.lock().expect("lock") = seconds;
    }

    pub fn fail_trims(&self) {
        self.fail_trim.store(true, Ordering::SeqCst);
    }

    fn record(&self, op: &'static str) {
        *self.calls.lock().expect("calls lock").entry(op).or_default() += 1;
    }

    fn write(path: &Path, seconds: f64) -> Result<(), MediaError> {
        std::fs::write(path, seconds.to_string())?;
        Ok(())
    }

    fn durations(inputs: &[PathBuf]) -> Result<Vec<f64>, MediaError> {
        inputs.iter().map(|p| Self::read_duration(p)).collect()
    }
}

#[async_trait]
impl AudioBackend for FakeAudioBackend {
    async fn cut_range(
        &self,
        _input: &Path,
        begin: f64,
        end: f64,
        output: &Path,
    ) -> Result<(), MediaError> {
        self.record("cut_range");
        Self::write(output, end - begin)
    }

    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        self.record("concatenate");
        let durations = Self::durations(inputs)?;
        let total = durations.iter().sum();
        self.concatenations.lock().expect("lock").push(durations);
        Self::write(output, total)
    }

    async fn change_speed(
        &self,
        input: &Path,
        factor: f64,
        output: &Path,
    ) -> Result<(), MediaError> {
        self.record("change_speed");
        Self::write(output, Self::read_duration(input)? / factor)
    }

    async fn generate_silence(&self, seconds: f64, output: &Path) -> Result<(), MediaError> {
        self.record("generate_silence");
        Self::write(output, seconds)
    }

    async fn measure_duration(&self, input: &Path) -> Result<f64, MediaError> {
        Self::read_duration(input)
    }

    async fn overlay(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        self.record("overlay");
        let durations = Self::durations(inputs)?;
        let longest = durations.iter().copied().fold(0.0, f64::max);
        self.mixes.lock().expect("lock").push(durations);
        Self::write(output, longest)
    }

    async fn trim_silence(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        self.record("trim_silence");
        if self.fail_trim.load(Ordering::SeqCst) {
            return Err(MediaError::CommandFailed {
                tool: "fake",
                message: "trim failed".into(),
            });
        }
        let trim = *self.trim_seconds.lock().expect("lock");
        Self::write(output, (Self::read_duration(input)? - trim).max(0.0))
    }

    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        self.record("extract_audio");
        std::fs::copy(input, output)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Speech engine whose clips last 0.1s per character divided by the speed hint,
/// unless durations were scripted.
#[derive(Default)]
pub struct FakeSynthesizer {
    calls: AtomicUsize,
    transient_failures: AtomicU32,
    protected_voice: Option<String>,
    garbled: bool,
    scripted: Mutex<VecDeque<f64>>,
    requests: Mutex<Vec<SpeechRequest>>,
}

impl FakeSynthesizer {
    pub const SECONDS_PER_CHAR: f64 = 0.1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration_for(text: &str, speed: Option<f64>) -> f64 {
        text.chars().count() as f64 * Self::SECONDS_PER_CHAR / speed.unwrap_or(1.0)
    }

    pub fn fail_transiently(self, times: u32) -> Self {
        self.transient_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn protected(mut self, voice_id: &str) -> Self {
        self.protected_voice = Some(voice_id.to_string());
        self
    }

    /// Every call returns audio whose duration cannot be read
    pub fn garbled(mut self) -> Self {
        self.garbled = true;
        self
    }

    /// Durations returned by the next calls, in order
    pub fn scripted(self, durations: impl IntoIterator<Item = f64>) -> Self {
        self.scripted
            .lock()
            .expect("lock")
            .extend(durations);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SpeechRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> DubResult<SynthesizedSpeech> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("lock").push(request.clone());

        if self.protected_voice.as_deref() == Some(request.voice_id.as_str()) {
            return Err(DubError::ProtectedVoice {
                voice_id: request.voice_id.clone(),
            });
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DubError::Transient("503 Service Unavailable".into()));
        }

        if self.garbled {
            return Ok(SynthesizedSpeech {
                audio: Bytes::from_static(b"garbage"),
                extension: "mp3",
                request_id: format!("req-{call}"),
            });
        }

        let duration = self
            .scripted
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Self::duration_for(&request.text, request.speed));
        Ok(SynthesizedSpeech {
            audio: Bytes::from(duration.to_string()),
            extension: "mp3",
            request_id: format!("req-{call}"),
        })
    }

    fn pause_style(&self) -> PauseStyle {
        PauseStyle::BreakTags
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Returns `cloned-<label>` and remembers the duration of every sample.
#[derive(Default)]
pub struct FakeVoiceCloner {
    samples: Mutex<Vec<(String, f64)>>,
}

impl FakeVoiceCloner {
    pub fn samples(&self) -> Vec<(String, f64)> {
        self.samples.lock().expect("lock").clone()
    }
}

#[async_trait]
impl VoiceCloner for FakeVoiceCloner {
    async fn clone_voice(&self, label: &str, sample: &Path) -> DubResult<String> {
        let seconds = FakeAudioBackend::read_duration(sample)?;
        self.samples
            .lock()
            .expect("lock")
            .push((label.to_string(), seconds));
        Ok(format!("cloned-{label}"))
    }
}

enum Fallback {
    Echo,
    Uppercase,
}

/// Returns queued answers first, then echoes (or uppercases) the input.
pub struct ScriptedRewriter {
    answers: Mutex<VecDeque<String>>,
    fallback: Fallback,
    requests: Mutex<Vec<RewriteRequest>>,
}

impl ScriptedRewriter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            fallback: Fallback::Echo,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn uppercase() -> Self {
        Self {
            fallback: Fallback::Uppercase,
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("lock").len()
    }

    pub fn requests(&self) -> Vec<RewriteRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Rewriter for ScriptedRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> DubResult<String> {
        self.requests.lock().expect("lock").push(request.clone());
        if let Some(answer) = self.answers.lock().expect("lock").pop_front() {
            return Ok(answer);
        }
        Ok(match self.fallback {
            Fallback::Echo => request.text.clone(),
            Fallback::Uppercase => request.text.to_uppercase(),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
