//! End-to-end dubbing run: transcript → segments → translation → speech →
//! timing adaptation → timeline → output file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::progress::{create_spinner, finish_spinner_with_success};
use crate::ui::prelude::*;

use super::adaptation::Adapter;
use super::audio::{AudioBackend, AudioUtils, ClipFile, WORK_EXTENSION, Workspace};
use super::config::DubConfig;
use super::duration;
use super::formatter::SegmentFormatter;
use super::rewrite::{self, Rewriter};
use super::segment::{AdjustedClip, Segment, SpeakerId};
use super::speech::{self, RetryPolicy, SpeechSynthesizer, VoiceCloner};
use super::timeline::TimelineAssembler;
use super::transcription::{self, Transcriber, Transcript};

/// External collaborators of a run.
pub struct Services {
    pub backend: Arc<dyn AudioBackend>,
    pub transcriber: Option<Box<dyn Transcriber>>,
    pub rewriter: Box<dyn Rewriter>,
    pub synthesizer: Box<dyn SpeechSynthesizer>,
    /// Clones voices for speakers without a configured one
    pub cloner: Option<Box<dyn VoiceCloner>>,
}

#[derive(Debug, Clone)]
pub struct DubOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Use this transcript instead of calling the transcription service
    pub transcript: Option<PathBuf>,
    pub source_language: Option<String>,
    pub target_language: String,
    pub summary: Option<String>,
    /// Keep the transcript text as is (it is already in the target language)
    pub skip_translation: bool,
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentReport {
    pub index: usize,
    pub speaker: SpeakerId,
    pub begin: f64,
    pub end: f64,
    pub final_duration: f64,
    pub raw_speed_factor: f64,
    pub applied_speed_factor: f64,
    pub reformulation_rounds: u32,
    pub fine_corrected: bool,
    pub text: String,
    #[serde(default)]
    pub segment_duration: f64,
    #[serde(default)]
    pub request_id: String,
}

impl From<&AdjustedClip> for SegmentReport {
    fn from(clip: &AdjustedClip) -> Self {
        Self {
            index: clip.index,
            speaker: clip.speaker,
            begin: clip.begin,
            end: clip.end,
            final_duration: clip.final_duration,
            raw_speed_factor: clip.raw_speed_factor,
            applied_speed_factor: clip.applied_speed_factor,
            reformulation_rounds: clip.reformulation_rounds,
            fine_corrected: clip.fine_corrected,
            text: clip.text.clone(),
            segment_duration: clip.segment_duration(),
            request_id: clip.request_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub output: PathBuf,
    pub source_language: String,
    pub target_language: String,
    pub duration: f64,
    pub segments: Vec<SegmentReport>,
}

impl RunReport {
    /// Segments whose final clip is still outside the tolerance band
    pub fn out_of_band(&self, config: &DubConfig) -> usize {
        self.segments
            .iter()
            .filter(|s| {
                s.segment_duration > 0.0
                    && config.timing.needs_correction(s.final_duration / s.segment_duration)
            })
            .count()
    }
}

pub async fn run(config: &DubConfig, services: &Services, options: &DubOptions) -> Result<RunReport> {
    let workspace = Arc::new(Workspace::new_in(&config.work_root()?)?);
    let utils = AudioUtils::new(services.backend.clone(), workspace);
    emit(
        Level::Debug,
        "dub.run.services",
        &format!(
            "Audio: {}, speech: {}, rewriting: {}",
            utils.backend_name(),
            services.synthesizer.name(),
            services.rewriter.name()
        ),
        None,
    );

    let (transcript, source_audio) = obtain_transcript(services, &utils, options).await?;
    let source_language = options
        .source_language
        .clone()
        .unwrap_or_else(|| transcript.language.clone());
    let summary = options.summary.clone().or(transcript.summary.clone());

    let mut segments = SegmentFormatter::new(config.formatter.clone())
        .format(&transcript.utterances, &source_language)
        .context("formatting transcript into segments")?;
    emit(
        Level::Info,
        "dub.format.done",
        &format!("{} segments to dub", segments.len()),
        None,
    );

    if options.skip_translation {
        for segment in &mut segments {
            segment.original_text = Some(segment.text.clone());
        }
    } else {
        let pb = create_spinner(format!(
            "Translating {} segments to {} with {}...",
            segments.len(),
            options.target_language,
            services.rewriter.name()
        ));
        rewrite::translate_segments(
            services.rewriter.as_ref(),
            &mut segments,
            &options.target_language,
            summary.as_deref(),
            config.concurrency.translation_width,
            config.retry.rewrite_attempts,
        )
        .await
        .context("translating segments")?;
        finish_spinner_with_success(pb, "Translation complete");
    }

    let voices = resolve_voices(config, services, &utils, options, &segments, source_audio).await?;
    let policy = RetryPolicy::from_config(&config.retry);

    let pb = create_spinner("Synthesizing speech...".to_string());
    let clips = speech::synthesize_segments(
        services.synthesizer.as_ref(),
        &utils,
        &policy,
        &segments,
        &voices,
        config.concurrency.synthesis_width,
        config.timing.pause_threshold_seconds,
    )
    .await
    .context("synthesizing speech")?;
    finish_spinner_with_success(pb, "Speech synthesized");

    let pb = create_spinner("Adapting timing...".to_string());
    let adapter = Adapter::new(
        services.synthesizer.as_ref(),
        services.rewriter.as_ref(),
        &utils,
        config.timing.clone(),
    )
    .with_retry(policy, config.retry.rewrite_attempts)
    .with_target_language(options.target_language.clone())
    .with_summary(summary);
    let adjusted = adapter
        .adapt_all(&segments, clips, &voices)
        .await
        .context("adapting speech timing")?;
    finish_spinner_with_success(pb, "Timing adapted");

    let reports: Vec<SegmentReport> = adjusted.iter().map(SegmentReport::from).collect();
    let track = TimelineAssembler::new(&utils, config.timing.silence_epsilon_seconds)
        .assemble(adjusted)
        .await
        .context("assembling timeline")?;
    let duration = write_output(&utils, track, &options.output).await?;

    let report = RunReport {
        output: options.output.clone(),
        source_language,
        target_language: options.target_language.clone(),
        duration,
        segments: reports,
    };
    if let Some(path) = &options.report {
        write_report(&report, path)?;
    }
    Ok(report)
}

/// Loads or produces the transcript. Also returns the extracted source audio
/// when transcription needed it.
async fn obtain_transcript(
    services: &Services,
    utils: &AudioUtils,
    options: &DubOptions,
) -> Result<(Transcript, Option<ClipFile>)> {
    if let Some(path) = &options.transcript {
        let transcript = transcription::load_transcript(path)
            .with_context(|| format!("loading transcript {}", path.display()))?;
        return Ok((transcript, None));
    }

    let transcriber = services
        .transcriber
        .as_ref()
        .context("No transcriber configured; pass --transcript or set a Gladia API key")?;
    let audio = utils
        .extract_audio(&options.input)
        .await
        .with_context(|| format!("extracting audio from {}", options.input.display()))?;

    let pb = create_spinner(format!("Transcribing with {}...", transcriber.name()));
    let transcript = transcriber
        .transcribe(audio.path())
        .await
        .context("transcribing source audio")?;
    finish_spinner_with_success(
        pb,
        &format!("Transcribed {} utterances", transcript.utterances.len()),
    );
    Ok((transcript, Some(audio)))
}

/// Configured voices first; the remaining speakers get a voice cloned from
/// the source recording when a cloner is available.
async fn resolve_voices(
    config: &DubConfig,
    services: &Services,
    utils: &AudioUtils,
    options: &DubOptions,
    segments: &[Segment],
    source_audio: Option<ClipFile>,
) -> Result<BTreeMap<SpeakerId, String>> {
    let speakers = speakers(segments);
    let (mut voices, missing) = config.configured_voices(&speakers);
    if missing.is_empty() {
        return Ok(voices);
    }
    let Some(cloner) = services
        .cloner
        .as_deref()
        .filter(|_| config.elevenlabs.clone_voices)
    else {
        return config.voice_map(&speakers);
    };

    let audio = match source_audio {
        Some(audio) => audio,
        None => utils.extract_audio(&options.input).await.with_context(|| {
            format!(
                "extracting audio from {} to clone voices",
                options.input.display()
            )
        })?,
    };

    let pb = create_spinner(format!("Cloning {} voices...", missing.len()));
    let cloned = speech::clone_voices(cloner, utils, audio.path(), segments, &missing)
        .await
        .context("cloning speaker voices")?;
    finish_spinner_with_success(pb, &format!("Cloned {} voices", cloned.len()));
    voices.extend(cloned);
    Ok(voices)
}

fn speakers(segments: &[Segment]) -> Vec<SpeakerId> {
    segments
        .iter()
        .map(|s| s.speaker)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Re-encodes the track when the destination wants another format, then
/// moves it into place atomically. Returns the measured output duration.
async fn write_output(utils: &AudioUtils, track: ClipFile, output: &Path) -> Result<f64> {
    let wanted = output
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_else(|| WORK_EXTENSION.to_string());
    let track = if track.extension() == Some(wanted.as_str()) {
        track
    } else {
        utils
            .concatenate_as(vec![track], &wanted)
            .await
            .with_context(|| format!("encoding output as {wanted}"))?
    };

    let duration = duration::measure_or(utils, &track, 0.0).await;
    track
        .persist(output)
        .with_context(|| format!("writing {}", output.display()))?;
    emit(
        Level::Success,
        "dub.output.written",
        &format!("Wrote {} ({duration:.2}s)", output.display()),
        Some(json!({ "path": output.display().to_string(), "duration": duration })),
    );
    Ok(duration)
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serializing run report")?;
    std::fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
    Ok(())
}

/// One pre-rendered clip placed on the timeline by the `assemble` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub begin: f64,
    pub end: f64,
    #[serde(default)]
    pub speaker: SpeakerId,
}

/// Lays existing audio files out on a timeline without synthesis.
pub async fn assemble_manifest(
    config: &DubConfig,
    backend: Arc<dyn AudioBackend>,
    entries: &[ManifestEntry],
    output: &Path,
) -> Result<f64> {
    let workspace = Arc::new(Workspace::new_in(&config.work_root()?)?);
    let utils = AudioUtils::new(backend, workspace);

    let mut clips = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        anyhow::ensure!(
            entry.begin < entry.end,
            "manifest entry {index} ends before it begins"
        );
        let clip = utils
            .import_file(&entry.path)
            .await
            .with_context(|| format!("importing {}", entry.path.display()))?;
        let final_duration = duration::measure(&utils, &clip)
            .await
            .with_context(|| format!("measuring {}", entry.path.display()))?;
        clips.push(AdjustedClip {
            index,
            speaker: entry.speaker,
            begin: entry.begin,
            end: entry.end,
            final_duration,
            text: String::new(),
            raw_speed_factor: 1.0,
            applied_speed_factor: 1.0,
            reformulation_rounds: 0,
            fine_corrected: false,
            request_id: String::new(),
            clip,
        });
    }

    let track = TimelineAssembler::new(&utils, config.timing.silence_epsilon_seconds)
        .assemble(clips)
        .await
        .context("assembling timeline")?;
    write_output(&utils, track, output).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dub::segment::Utterance;
    use crate::dub::test_support::{
        FakeAudioBackend, FakeSynthesizer, FakeVoiceCloner, ScriptedRewriter,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn config(work: &Path) -> DubConfig {
        let mut config = DubConfig::default();
        config.work_dir = Some(work.display().to_string());
        config.default_voice = Some("voice".into());
        config.retry.synthesis_backoff_ms = 1;
        config
    }

    fn utterance(speaker: SpeakerId, start: f64, end: f64, text: &str) -> Utterance {
        Utterance {
            text: text.into(),
            start,
            end,
            speaker,
            channel: 0,
            confidence: 1.0,
            language: "en".into(),
            words: Vec::new(),
        }
    }

    #[tokio::test]
    async fn full_run_writes_output_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript {
            language: "en".into(),
            summary: None,
            utterances: vec![
                // 10 chars -> 1.0s of fake speech in a 1.0s slot
                utterance(0, 0.5, 1.5, "abcdefghij"),
                utterance(1, 2.0, 3.0, "klmnopqrst"),
            ],
        };
        let transcript_path = dir.path().join("transcript.json");
        std::fs::write(&transcript_path, serde_json::to_string(&transcript).unwrap()).unwrap();

        let services = Services {
            backend: Arc::new(FakeAudioBackend::default()),
            transcriber: None,
            rewriter: Box::new(ScriptedRewriter::new(Vec::<String>::new())),
            synthesizer: Box::new(FakeSynthesizer::new()),
            cloner: None,
        };
        let options = DubOptions {
            input: dir.path().join("unused.mp4"),
            output: dir.path().join("out").join("dub.wav"),
            transcript: Some(transcript_path),
            source_language: None,
            target_language: "en".into(),
            summary: None,
            skip_translation: true,
            report: Some(dir.path().join("report.json")),
        };

        let report = run(&config(dir.path()), &services, &options).await.unwrap();

        assert_eq!(report.segments.len(), 2);
        assert_eq!(report.source_language, "en");
        assert!((report.duration - 3.0).abs() < 1e-9);
        assert_eq!(report.out_of_band(&config(dir.path())), 0);
        assert!(options.output.exists());
        let saved: RunReport =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("report.json")).unwrap())
                .unwrap();
        assert_eq!(saved.segments[1].speaker, 1);
        assert!((saved.segments[1].segment_duration - 1.0).abs() < 1e-9);
        assert!(saved.segments.iter().all(|s| s.request_id.starts_with("req-")));
    }

    /// Shares the recorded samples with the test after the run.
    struct SharedCloner(Arc<FakeVoiceCloner>);

    #[async_trait]
    impl VoiceCloner for SharedCloner {
        async fn clone_voice(&self, label: &str, sample: &Path) -> crate::dub::error::DubResult<String> {
            self.0.clone_voice(label, sample).await
        }
    }

    /// Records synthesis voice ids for the test.
    struct RecordingSynthesizer {
        inner: FakeSynthesizer,
        voices: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynthesizer {
        async fn synthesize(
            &self,
            request: &speech::SpeechRequest,
        ) -> crate::dub::error::DubResult<speech::SynthesizedSpeech> {
            self.voices.lock().unwrap().push(request.voice_id.clone());
            self.inner.synthesize(request).await
        }

        fn pause_style(&self) -> rewrite::PauseStyle {
            self.inner.pause_style()
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn speakers_without_voice_get_a_cloned_one() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript {
            language: "en".into(),
            summary: None,
            utterances: vec![
                utterance(0, 0.5, 1.5, "abcdefghij"),
                utterance(1, 2.0, 3.0, "klmnopqrst"),
            ],
        };
        let transcript_path = dir.path().join("transcript.json");
        std::fs::write(&transcript_path, serde_json::to_string(&transcript).unwrap()).unwrap();
        let input = dir.path().join("talk.mp4");
        std::fs::write(&input, "10.0").unwrap();

        let mut config = config(dir.path());
        config.default_voice = None;
        config.voices.insert("1".into(), "voice-b".into());

        let cloner = Arc::new(FakeVoiceCloner::default());
        let voices = Arc::new(Mutex::new(Vec::new()));
        let services = Services {
            backend: Arc::new(FakeAudioBackend::default()),
            transcriber: None,
            rewriter: Box::new(ScriptedRewriter::new(Vec::<String>::new())),
            synthesizer: Box::new(RecordingSynthesizer {
                inner: FakeSynthesizer::new(),
                voices: voices.clone(),
            }),
            cloner: Some(Box::new(SharedCloner(cloner.clone()))),
        };
        let options = DubOptions {
            input,
            output: dir.path().join("dub.wav"),
            transcript: Some(transcript_path),
            source_language: None,
            target_language: "en".into(),
            summary: None,
            skip_translation: true,
            report: None,
        };

        run(&config, &services, &options).await.unwrap();

        let samples = cloner.samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].0, "speaker-0");
        let used = voices.lock().unwrap().clone();
        assert!(used.contains(&"cloned-speaker-0".to_string()));
        assert!(used.contains(&"voice-b".to_string()));
    }

    #[tokio::test]
    async fn cloning_disabled_reports_the_missing_voice() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript {
            language: "en".into(),
            summary: None,
            utterances: vec![utterance(0, 0.5, 1.5, "abcdefghij")],
        };
        let transcript_path = dir.path().join("transcript.json");
        std::fs::write(&transcript_path, serde_json::to_string(&transcript).unwrap()).unwrap();

        let mut config = config(dir.path());
        config.default_voice = None;
        config.elevenlabs.clone_voices = false;
        let services = Services {
            backend: Arc::new(FakeAudioBackend::default()),
            transcriber: None,
            rewriter: Box::new(ScriptedRewriter::new(Vec::<String>::new())),
            synthesizer: Box::new(FakeSynthesizer::new()),
            cloner: Some(Box::new(FakeVoiceCloner::default())),
        };
        let options = DubOptions {
            input: dir.path().join("talk.mp4"),
            output: dir.path().join("dub.wav"),
            transcript: Some(transcript_path),
            source_language: None,
            target_language: "en".into(),
            summary: None,
            skip_translation: true,
            report: None,
        };

        let err = run(&config, &services, &options).await.unwrap_err();
        assert!(err.to_string().contains("No voice configured for speaker 0"));
    }

    #[tokio::test]
    async fn missing_transcriber_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let services = Services {
            backend: Arc::new(FakeAudioBackend::default()),
            transcriber: None,
            rewriter: Box::new(ScriptedRewriter::new(Vec::<String>::new())),
            synthesizer: Box::new(FakeSynthesizer::new()),
            cloner: None,
        };
        let options = DubOptions {
            input: dir.path().join("in.mp4"),
            output: dir.path().join("out.wav"),
            transcript: None,
            source_language: None,
            target_language: "fr".into(),
            summary: None,
            skip_translation: false,
            report: None,
        };
        let err = run(&config(dir.path()), &services, &options).await.unwrap_err();
        assert!(err.to_string().contains("No transcriber configured"));
    }

    #[tokio::test]
    async fn manifest_clips_are_placed_on_the_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        std::fs::write(&a, "1.5").unwrap();
        std::fs::write(&b, "0.5").unwrap();
        let entries = vec![
            ManifestEntry {
                path: a,
                begin: 1.0,
                end: 2.5,
                speaker: 0,
            },
            ManifestEntry {
                path: b,
                begin: 4.0,
                end: 4.5,
                speaker: 0,
            },
        ];
        let output = dir.path().join("mix.wav");

        let duration = assemble_manifest(
            &config(dir.path()),
            Arc::new(FakeAudioBackend::default()),
            &entries,
            &output,
        )
        .await
        .unwrap();

        assert!((duration - 4.5).abs() < 1e-9);
        assert!(output.exists());
    }
}
