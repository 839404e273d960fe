//! Timing adaptation: fits each synthesized clip to its segment's duration.
//!
//! A clip whose speed factor (clip duration / segment duration) falls outside
//! the tolerance band is rewritten and re-synthesized for a bounded number of
//! rounds. A speed-hinted re-synthesis then gets one chance to land close to
//! 1.0, and finally the clip is time-stretched by the clamped factor.

use serde_json::json;
use std::collections::BTreeMap;

use crate::ui::prelude::*;

use super::audio::{AudioUtils, ClipFile};
use super::config::TimingConfig;
use super::duration::{self, speed_factor};
use super::error::{DubError, DubResult};
use super::rewrite::{self, RewriteKind, RewriteRequest, Rewriter};
use super::segment::{AdjustedClip, Segment, SpeakerId, SpeechClip};
use super::speech::{self, RetryPolicy, SpeechContext, SpeechRequest, SpeechSynthesizer};

pub struct Adapter<'a> {
    synthesizer: &'a dyn SpeechSynthesizer,
    rewriter: &'a dyn Rewriter,
    utils: &'a AudioUtils,
    timing: TimingConfig,
    retry: RetryPolicy,
    rewrite_attempts: u32,
    target_language: String,
    summary: Option<String>,
}

/// Clip being worked on, with its last measured duration and the text it speaks.
struct Take {
    clip: ClipFile,
    duration: f64,
    text: String,
    request_id: String,
}

impl<'a> Adapter<'a> {
    pub fn new(
        synthesizer: &'a dyn SpeechSynthesizer,
        rewriter: &'a dyn Rewriter,
        utils: &'a AudioUtils,
        timing: TimingConfig,
    ) -> Self {
        Self {
            synthesizer,
            rewriter,
            utils,
            timing,
            retry: RetryPolicy::default(),
            rewrite_attempts: 3,
            target_language: String::new(),
            summary: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, rewrite_attempts: u32) -> Self {
        self.retry = retry;
        self.rewrite_attempts = rewrite_attempts;
        self
    }

    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = language.into();
        self
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary;
        self
    }

    /// Adapts one clip to `segment`.
    ///
    /// A re-synthesized take that cannot be measured is dropped with a
    /// warning and the previous take is kept.
    pub async fn adapt(
        &self,
        segment: &Segment,
        clip: SpeechClip,
        voice_id: &str,
        context: &SpeechContext,
    ) -> DubResult<AdjustedClip> {
        if clip.index != segment.index || clip.speaker != segment.speaker {
            return Err(DubError::InvalidInput(format!(
                "speech clip {} (speaker {}) does not belong to segment {} (speaker {})",
                clip.index, clip.speaker, segment.index, segment.speaker
            )));
        }
        let target = segment.duration();
        if !(target > 0.0) {
            return Err(DubError::InvalidInput(format!(
                "segment {} has no duration",
                segment.index
            )));
        }

        let mut take = Take {
            clip: clip.clip,
            duration: clip.duration,
            text: segment.text.clone(),
            request_id: clip.request_id,
        };
        let mut factor = speed_factor(take.duration, target);
        let mut rounds = 0;
        let mut lengthened = false;

        while self.timing.needs_correction(factor) && rounds < self.timing.max_reformulation_rounds
        {
            let lengthening = self.timing.is_too_short(factor);
            let kind = if lengthening {
                emit(
                    Level::Debug,
                    "dub.adapt.too_short",
                    &format!(
                        "Segment {} is too short (speed factor {factor:.3}), lengthening",
                        segment.index
                    ),
                    None,
                );
                RewriteKind::Lengthen {
                    target_seconds: target,
                    actual_seconds: take.duration,
                    allow_word_changes: self.allows_word_changes(factor, target - take.duration),
                    pause_style: self.synthesizer.pause_style(),
                }
            } else {
                emit(
                    Level::Debug,
                    "dub.adapt.too_long",
                    &format!(
                        "Segment {} is too long (speed factor {factor:.3}), shortening",
                        segment.index
                    ),
                    None,
                );
                RewriteKind::Shorten {
                    target_seconds: target,
                    actual_seconds: take.duration,
                }
            };

            let text = self.rewrite(segment, &take.text, kind).await?;
            let request = SpeechRequest::new(&text, voice_id, context.clone());
            rounds += 1;
            let Some(fresh) = self.retake(segment, &request).await? else {
                break;
            };
            take = self.trimmed(fresh).await;
            lengthened |= lengthening;
            factor = speed_factor(take.duration, target);

            emit(
                Level::Debug,
                "dub.adapt.round",
                &format!(
                    "Segment {} round {rounds}: speed factor {factor:.3}",
                    segment.index
                ),
                None,
            );
        }

        let raw_factor = factor;
        let mut applied = self.timing.clamp(factor);
        let mut fine_corrected = false;

        if !lengthened && self.timing.in_fine_correction_band(factor) {
            let request =
                SpeechRequest::new(&take.text, voice_id, context.clone()).with_speed(factor);
            if let Some(hinted) = self.retake(segment, &request).await? {
                let hinted_factor = speed_factor(hinted.duration, target);
                if self.timing.accepts_fine_correction(hinted_factor) {
                    take = hinted;
                    applied = self.timing.clamp(hinted_factor);
                    fine_corrected = true;
                } else {
                    emit(
                        Level::Debug,
                        "dub.adapt.fine_rejected",
                        &format!(
                            "Segment {}: speed-hinted speech landed at {hinted_factor:.3}, keeping previous take",
                            segment.index
                        ),
                        None,
                    );
                }
            }
        }

        let stretched = self.utils.change_speed(take.clip, applied).await?;
        let final_duration =
            duration::measure_or(self.utils, &stretched, take.duration / applied).await;

        if rounds > 0 || fine_corrected {
            emit(
                Level::Info,
                "dub.adapt.adjusted",
                &format!(
                    "Segment {} adjusted: {:.3}s for a {:.3}s slot",
                    segment.index, final_duration, target
                ),
                Some(json!({
                    "index": segment.index,
                    "rounds": rounds,
                    "raw_speed_factor": raw_factor,
                    "applied_speed_factor": applied,
                    "fine_corrected": fine_corrected,
                    "request_id": take.request_id,
                })),
            );
        }

        Ok(AdjustedClip {
            index: segment.index,
            speaker: segment.speaker,
            begin: segment.begin,
            end: segment.end,
            final_duration,
            text: take.text,
            raw_speed_factor: raw_factor,
            applied_speed_factor: applied,
            reformulation_rounds: rounds,
            fine_corrected,
            request_id: take.request_id,
            clip: stretched,
        })
    }

    /// Adapts every clip in segment order.
    ///
    /// The previous-text context of each segment is the *final* text of the
    /// segment before it, so rewrites propagate forward.
    pub async fn adapt_all(
        &self,
        segments: &[Segment],
        clips: Vec<SpeechClip>,
        voices: &BTreeMap<SpeakerId, String>,
    ) -> DubResult<Vec<AdjustedClip>> {
        if segments.len() != clips.len() {
            return Err(DubError::LengthMismatch {
                segments: segments.len(),
                clips: clips.len(),
            });
        }

        let mut ordered: Vec<Segment> = segments.to_vec();
        ordered.sort_by_key(|s| s.index);
        let mut clips = clips;
        clips.sort_by_key(|c| c.index);

        let mut adjusted: Vec<AdjustedClip> = Vec::with_capacity(ordered.len());
        for (position, clip) in clips.into_iter().enumerate() {
            let segment = &ordered[position];
            let voice = speech::voice_for(voices, segment.speaker)?;
            let mut context =
                speech::context_for(&ordered, position, self.timing.pause_threshold_seconds);
            if context.previous_text.is_some() {
                context.previous_text = adjusted.last().map(|prev| prev.text.clone());
            }

            adjusted.push(self.adapt(segment, clip, voice, &context).await?);
        }
        Ok(adjusted)
    }

    fn allows_word_changes(&self, factor: f64, missing_seconds: f64) -> bool {
        factor < self.timing.rewrite_speed_factor || missing_seconds > self.timing.rewrite_gap_seconds
    }

    async fn rewrite(&self, segment: &Segment, text: &str, kind: RewriteKind) -> DubResult<String> {
        let request = RewriteRequest {
            kind,
            text: text.to_string(),
            original_text: segment.original_text.clone(),
            words_with_silence: segment.words_with_silence.clone(),
            target_language: if self.target_language.is_empty() {
                segment.language.clone()
            } else {
                self.target_language.clone()
            },
            summary: self.summary.clone(),
        };
        rewrite::rewrite_until_changed(self.rewriter, &request, self.rewrite_attempts).await
    }

    /// Synthesizes a new take. `None` when its duration cannot be measured.
    async fn retake(&self, segment: &Segment, request: &SpeechRequest) -> DubResult<Option<Take>> {
        let (clip, request_id) =
            speech::synthesize_clip(self.synthesizer, self.utils, &self.retry, request).await?;
        match duration::measure(self.utils, &clip).await {
            Ok(duration) => Ok(Some(Take {
                clip,
                duration,
                text: request.text.clone(),
                request_id,
            })),
            Err(err) => {
                emit(
                    Level::Warn,
                    "dub.duration.fallback",
                    &format!(
                        "Segment {}: could not measure the new take ({err}), keeping the previous one",
                        segment.index
                    ),
                    Some(json!({ "index": segment.index, "request_id": request_id })),
                );
                Ok(None)
            }
        }
    }

    async fn trimmed(&self, take: Take) -> Take {
        let clip = self.utils.trim_silence(take.clip).await;
        let duration = duration::measure_or(self.utils, &clip, take.duration).await;
        Take {
            clip,
            duration,
            ..take
        }
    }
}
