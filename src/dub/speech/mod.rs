//! Speech synthesis: the service seam, retries and batch rendering.

mod cloning;
mod elevenlabs;
mod types;

pub use cloning::clone_voices;
pub use elevenlabs::ElevenLabsSynthesizer;
pub use types::{
    RetryPolicy, SpeechContext, SpeechRequest, SpeechSynthesizer, SynthesizedSpeech, VoiceCloner,
};

use futures_util::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;

use crate::ui::prelude::*;

use super::audio::{AudioUtils, ClipFile};
use super::duration;
use super::error::{DubError, DubResult};
use super::segment::{Segment, SpeakerId, SpeechClip};

/// Runs a synthesis request under `policy`.
///
/// Protected voices and other non-transient failures are returned at once;
/// transient failures are retried with a fixed backoff.
pub async fn synthesize_with_retry(
    synthesizer: &dyn SpeechSynthesizer,
    request: &SpeechRequest,
    policy: &RetryPolicy,
) -> DubResult<SynthesizedSpeech> {
    let mut attempt = 1;
    loop {
        match synthesizer.synthesize(request).await {
            Ok(speech) => return Ok(speech),
            Err(err) if err.is_retryable() && attempt < policy.attempts => {
                emit(
                    Level::Warn,
                    "dub.speech.retry",
                    &format!(
                        "Speech synthesis failed (attempt {attempt}/{}): {err}; retrying in {:?}",
                        policy.attempts, policy.backoff
                    ),
                    None,
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(err) if err.is_retryable() => {
                return Err(DubError::SynthesisFailed {
                    attempts: attempt,
                    message: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }
}

/// Synthesizes `request` into a clip that has not been measured yet.
/// Returns the clip and the service's request id.
pub async fn synthesize_clip(
    synthesizer: &dyn SpeechSynthesizer,
    utils: &AudioUtils,
    policy: &RetryPolicy,
    request: &SpeechRequest,
) -> DubResult<(ClipFile, String)> {
    let speech = synthesize_with_retry(synthesizer, request, policy).await?;
    let clip = utils.import_bytes(&speech.audio, speech.extension).await?;
    Ok((clip, speech.request_id))
}

/// Synthesizes `request` and stores the audio as a measured clip for `segment`.
///
/// First takes have nothing to fall back on, so a clip that cannot be
/// measured is an error.
pub async fn render_clip(
    synthesizer: &dyn SpeechSynthesizer,
    utils: &AudioUtils,
    policy: &RetryPolicy,
    segment: &Segment,
    request: &SpeechRequest,
) -> DubResult<SpeechClip> {
    let (clip, request_id) = synthesize_clip(synthesizer, utils, policy, request).await?;
    let duration = duration::measure(utils, &clip).await?;
    Ok(SpeechClip {
        index: segment.index,
        speaker: segment.speaker,
        duration,
        request_id,
        clip,
    })
}

/// Neighbour text for the segment at `position`.
///
/// A neighbour is forwarded only when it has the same speaker and the silence
/// between the two segments is below `pause_threshold` seconds.
pub fn context_for(segments: &[Segment], position: usize, pause_threshold: f64) -> SpeechContext {
    let Some(current) = segments.get(position) else {
        return SpeechContext::default();
    };

    let previous_text = position
        .checked_sub(1)
        .and_then(|i| segments.get(i))
        .filter(|prev| prev.speaker == current.speaker && prev.gap_to(current) < pause_threshold)
        .map(|prev| prev.text.clone());

    let next_text = segments
        .get(position + 1)
        .filter(|next| next.speaker == current.speaker && current.gap_to(next) < pause_threshold)
        .map(|next| next.text.clone());

    SpeechContext {
        previous_text,
        next_text,
    }
}

pub fn voice_for(voices: &BTreeMap<SpeakerId, String>, speaker: SpeakerId) -> DubResult<&str> {
    voices
        .get(&speaker)
        .map(String::as_str)
        .ok_or_else(|| DubError::InvalidInput(format!("no voice for speaker {speaker}")))
}

/// Synthesizes every segment, `width` requests at a time. Clips come back
/// sorted by segment index.
pub async fn synthesize_segments(
    synthesizer: &dyn SpeechSynthesizer,
    utils: &AudioUtils,
    policy: &RetryPolicy,
    segments: &[Segment],
    voices: &BTreeMap<SpeakerId, String>,
    width: usize,
    pause_threshold: f64,
) -> DubResult<Vec<SpeechClip>> {
    let mut requests = Vec::with_capacity(segments.len());
    for (position, segment) in segments.iter().enumerate() {
        let voice = voice_for(voices, segment.speaker)?;
        let context = context_for(segments, position, pause_threshold);
        requests.push((segment, SpeechRequest::new(&segment.text, voice, context)));
    }

    let mut clips = Vec::with_capacity(segments.len());
    for batch in requests.chunks(width.max(1)) {
        let results = join_all(batch.iter().map(|(segment, request)| {
            render_clip(synthesizer, utils, policy, segment, request)
        }))
        .await;
        for result in results {
            clips.push(result?);
        }
        emit(
            Level::Debug,
            "dub.speech.batch",
            &format!("Synthesized {}/{} segments", clips.len(), segments.len()),
            Some(json!({ "engine": synthesizer.name() })),
        );
    }

    clips.sort_by_key(|c| c.index);
    Ok(clips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dub::test_support::{FakeSynthesizer, fake_utils, segment};
    use std::time::Duration;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn short_same_speaker_gap_forwards_context() {
        let segments = vec![
            segment(0, 1, 0.0, 1.0, "first"),
            segment(1, 1, 1.3, 2.0, "second"),
            segment(2, 1, 2.8, 3.5, "third"),
        ];
        let ctx = context_for(&segments, 1, 0.5);
        assert_eq!(ctx.previous_text.as_deref(), Some("first"));
        assert_eq!(ctx.next_text, None);
    }

    #[test]
    fn other_speaker_never_gives_context() {
        let segments = vec![
            segment(0, 0, 0.0, 1.0, "first"),
            segment(1, 1, 1.1, 2.0, "second"),
        ];
        assert_eq!(context_for(&segments, 1, 0.5), SpeechContext::default());
        assert_eq!(context_for(&segments, 0, 0.5), SpeechContext::default());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let synth = FakeSynthesizer::new().fail_transiently(2);
        let request = SpeechRequest::new("hello", "v", SpeechContext::default());
        let speech = synthesize_with_retry(&synth, &request, &quick_policy())
            .await
            .unwrap();
        assert!(!speech.audio.is_empty());
        assert_eq!(synth.calls(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let synth = FakeSynthesizer::new().fail_transiently(10);
        let request = SpeechRequest::new("hello", "v", SpeechContext::default());
        let err = synthesize_with_retry(&synth, &request, &quick_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, DubError::SynthesisFailed { attempts: 3, .. }));
        assert_eq!(synth.calls(), 3);
    }

    #[tokio::test]
    async fn protected_voice_is_not_retried() {
        let synth = FakeSynthesizer::new().protected("locked");
        let request = SpeechRequest::new("hello", "locked", SpeechContext::default());
        let err = synthesize_with_retry(&synth, &request, &quick_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, DubError::ProtectedVoice { .. }));
        assert_eq!(synth.calls(), 1);
    }

    #[tokio::test]
    async fn batch_synthesis_is_sorted_and_measured() {
        let (utils, _backend, _ws) = fake_utils();
        let synth = FakeSynthesizer::new();
        let segments = vec![
            segment(0, 0, 0.0, 1.0, "aaaa"),
            segment(1, 1, 1.0, 2.0, "bb"),
            segment(2, 0, 2.0, 3.0, "cccccc"),
        ];
        let voices = BTreeMap::from([(0, "v0".to_string()), (1, "v1".to_string())]);

        let clips =
            synthesize_segments(&synth, &utils, &quick_policy(), &segments, &voices, 2, 0.5)
                .await
                .unwrap();

        let indices: Vec<_> = clips.iter().map(|c| c.index).collect();
        assert_eq!(indices, [0, 1, 2]);
        assert_eq!(clips[0].duration, FakeSynthesizer::duration_for("aaaa", None));
        assert_eq!(clips[1].speaker, 1);
    }

    #[tokio::test]
    async fn unmeasurable_first_take_is_an_error() {
        let (utils, _backend, _ws) = fake_utils();
        let synth = FakeSynthesizer::new().garbled();
        let seg = segment(0, 0, 0.0, 1.0, "hello");
        let request = SpeechRequest::new("hello", "v", SpeechContext::default());

        let err = render_clip(&synth, &utils, &quick_policy(), &seg, &request)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DubError::Media(crate::dub::error::MediaError::UnparsableDuration { .. })
        ));
    }

    #[tokio::test]
    async fn missing_voice_is_invalid_input() {
        let (utils, _backend, _ws) = fake_utils();
        let synth = FakeSynthesizer::new();
        let segments = vec![segment(0, 4, 0.0, 1.0, "x")];
        let err = synthesize_segments(
            &synth,
            &utils,
            &quick_policy(),
            &segments,
            &BTreeMap::new(),
            1,
            0.5,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DubError::InvalidInput(_)));
        assert_eq!(synth.calls(), 0);
    }
}
