use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::paths;

use super::rewrite::PauseStyle;
use super::segment::SpeakerId;

/// Tolerance bands and thresholds of the timing adaptation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Below this speed factor a clip is too short and gets lengthened
    pub min_speed_factor: f64,
    /// Above this speed factor a clip is too long and gets shortened
    pub max_speed_factor: f64,
    pub max_reformulation_rounds: u32,
    /// Word changes are allowed when lengthening below this speed factor
    pub rewrite_speed_factor: f64,
    /// ... or when the missing duration exceeds this many seconds
    pub rewrite_gap_seconds: f64,
    /// Speed factors eligible for a speed-hinted re-synthesis
    pub fine_correction_low: (f64, f64),
    pub fine_correction_high: (f64, f64),
    /// A speed-hinted clip is kept only strictly inside this range
    pub fine_correction_accept: (f64, f64),
    /// Neighbour text is forwarded to synthesis only below this gap
    pub pause_threshold_seconds: f64,
    /// Gaps at or below this are not filled with silence
    pub silence_epsilon_seconds: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_speed_factor: 0.9,
            max_speed_factor: 1.15,
            max_reformulation_rounds: 2,
            rewrite_speed_factor: 0.75,
            rewrite_gap_seconds: 2.0,
            fine_correction_low: (0.8, 0.9),
            fine_correction_high: (1.1, 1.2),
            fine_correction_accept: (0.9, 1.1),
            pause_threshold_seconds: 0.5,
            silence_epsilon_seconds: 0.001,
        }
    }
}

impl TimingConfig {
    pub fn is_too_long(&self, speed_factor: f64) -> bool {
        speed_factor > self.max_speed_factor
    }

    pub fn is_too_short(&self, speed_factor: f64) -> bool {
        speed_factor < self.min_speed_factor
    }

    pub fn needs_correction(&self, speed_factor: f64) -> bool {
        self.is_too_long(speed_factor) || self.is_too_short(speed_factor)
    }

    pub fn clamp(&self, speed_factor: f64) -> f64 {
        speed_factor.clamp(self.min_speed_factor, self.max_speed_factor)
    }

    pub fn in_fine_correction_band(&self, speed_factor: f64) -> bool {
        let (low_a, low_b) = self.fine_correction_low;
        let (high_a, high_b) = self.fine_correction_high;
        (low_a..=low_b).contains(&speed_factor) || (high_a..=high_b).contains(&speed_factor)
    }

    pub fn accepts_fine_correction(&self, speed_factor: f64) -> bool {
        let (low, high) = self.fine_correction_accept;
        speed_factor > low && speed_factor < high
    }

    fn sanitize(&mut self) {
        let defaults = Self::default();
        let valid = self.min_speed_factor.is_finite()
            && self.max_speed_factor.is_finite()
            && self.min_speed_factor >= 0.5
            && self.max_speed_factor <= 2.0
            && self.min_speed_factor < self.max_speed_factor;
        if !valid {
            self.min_speed_factor = defaults.min_speed_factor;
            self.max_speed_factor = defaults.max_speed_factor;
        }
        if !self.pause_threshold_seconds.is_finite() || self.pause_threshold_seconds < 0.0 {
            self.pause_threshold_seconds = defaults.pause_threshold_seconds;
        }
        if !self.silence_epsilon_seconds.is_finite() || self.silence_epsilon_seconds < 0.001 {
            self.silence_epsilon_seconds = defaults.silence_epsilon_seconds;
        }
    }
}

/// Segment split/merge thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterConfig {
    pub merge_gap_seconds: f64,
    pub max_characters: usize,
    pub max_characters_non_latin: usize,
    pub split_characters: usize,
    pub absolute_max_characters: usize,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            merge_gap_seconds: 0.7,
            max_characters: 350,
            max_characters_non_latin: 175,
            split_characters: 500,
            absolute_max_characters: 4000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Simultaneous speech-synthesis requests
    pub synthesis_width: usize,
    /// Simultaneous translation requests
    pub translation_width: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            synthesis_width: 1,
            translation_width: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub synthesis_attempts: u32,
    pub synthesis_backoff_ms: u64,
    /// Attempts while the rewrite service echoes its input back unchanged
    pub rewrite_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            synthesis_attempts: 3,
            synthesis_backoff_ms: 10_000,
            rewrite_attempts: 3,
        }
    }
}

impl RetryConfig {
    pub fn synthesis_backoff(&self) -> Duration {
        Duration::from_millis(self.synthesis_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model_id: String,
    pub output_format: String,
    pub stability: f64,
    pub similarity_boost: f64,
    pub pause_style: PauseStyle,
    /// Clone a voice from the recording for speakers without a configured voice
    pub clone_voices: bool,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            output_format: "mp3_44100_128".to_string(),
            stability: 0.5,
            similarity_boost: 0.85,
            pause_style: PauseStyle::BreakTags,
            clone_voices: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub translation_model: String,
    pub rewrite_model: String,
    pub temperature: f64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            translation_model: "gpt-4.1".to_string(),
            rewrite_model: "o3-mini".to_string(),
            temperature: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GladiaConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for GladiaConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.gladia.io/v2".to_string(),
            poll_interval_ms: 1_000,
            max_polls: 1_800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DubConfig {
    /// Language the dub is produced in
    pub target_language: String,
    /// Parent directory for per-run scratch files (defaults to the user cache dir)
    pub work_dir: Option<String>,
    pub timing: TimingConfig,
    pub formatter: FormatterConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub openai: OpenAiConfig,
    pub gladia: GladiaConfig,
    /// Speaker id -> voice id
    pub voices: BTreeMap<String, String>,
    /// Voice for speakers missing from `voices`
    pub default_voice: Option<String>,
}

impl Default for DubConfig {
    fn default() -> Self {
        Self {
            target_language: "english".to_string(),
            work_dir: None,
            timing: TimingConfig::default(),
            formatter: FormatterConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            elevenlabs: ElevenLabsConfig::default(),
            openai: OpenAiConfig::default(),
            gladia: GladiaConfig::default(),
            voices: BTreeMap::new(),
            default_voice: None,
        }
    }
}

impl DubConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_path(paths::default_config_path()?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save_to_path(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading dub config from {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents).context("parsing dub config")?;
        config.sanitize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating dub config directory {}", parent.display()))?;
        }

        let toml = toml::to_string_pretty(self).context("serializing dub config")?;
        fs::write(path, toml)
            .with_context(|| format!("writing dub config to {}", path.display()))?;
        Ok(())
    }

    fn sanitize(&mut self) {
        self.timing.sanitize();
        let defaults = ConcurrencyConfig::default();
        if self.concurrency.synthesis_width == 0 {
            self.concurrency.synthesis_width = defaults.synthesis_width;
        }
        if self.concurrency.translation_width == 0 {
            self.concurrency.translation_width = defaults.translation_width;
        }
        if self.retry.synthesis_attempts == 0 {
            self.retry.synthesis_attempts = 1;
        }
        if self.retry.rewrite_attempts == 0 {
            self.retry.rewrite_attempts = 1;
        }
    }

    /// Splits `speakers` into those with a configured voice and those without.
    /// A `[voices]` entry wins over `default_voice`.
    pub fn configured_voices(
        &self,
        speakers: &[SpeakerId],
    ) -> (BTreeMap<SpeakerId, String>, Vec<SpeakerId>) {
        let mut voices = BTreeMap::new();
        let mut missing = Vec::new();
        for &speaker in speakers {
            match self
                .voices
                .get(&speaker.to_string())
                .or(self.default_voice.as_ref())
            {
                Some(voice) => {
                    voices.insert(speaker, voice.clone());
                }
                None => missing.push(speaker),
            }
        }
        (voices, missing)
    }

    /// Resolves the voice for every speaker, failing on the first one without a voice.
    pub fn voice_map(&self, speakers: &[SpeakerId]) -> Result<BTreeMap<SpeakerId, String>> {
        let (voices, missing) = self.configured_voices(speakers);
        if let Some(speaker) = missing.first() {
            anyhow::bail!(
                "No voice configured for speaker {speaker}. Add it under [voices] or set default_voice"
            );
        }
        Ok(voices)
    }

    /// Directory under which each run creates its scratch directory
    pub fn work_root(&self) -> Result<PathBuf> {
        match &self.work_dir {
            Some(dir) => {
                let expanded = PathBuf::from(shellexpand::tilde(dir).to_string());
                fs::create_dir_all(&expanded).with_context(|| {
                    format!("creating work directory {}", expanded.display())
                })?;
                Ok(expanded)
            }
            None => paths::smartdub_cache_dir(),
        }
    }
}
