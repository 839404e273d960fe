//! Turns raw transcription utterances into ordered, bounded segments.

use serde_json::json;

use crate::ui::prelude::*;

use super::config::FormatterConfig;
use super::error::{DubError, DubResult};
use super::language;
use super::segment::{Segment, SpeakerId, Utterance, Word};

/// Intermediate unit between splitting and merging.
#[derive(Debug, Clone)]
struct Chunk {
    speaker: SpeakerId,
    begin: f64,
    end: f64,
    text: String,
    words_with_silence: String,
    confidence: f64,
    language: String,
}

pub struct SegmentFormatter {
    config: FormatterConfig,
}

impl SegmentFormatter {
    pub fn new(config: FormatterConfig) -> Self {
        Self { config }
    }

    /// Splits overlong utterances, merges close same-speaker neighbours and
    /// indexes the result `0..N`.
    pub fn format(
        &self,
        utterances: &[Utterance],
        detected_language: &str,
    ) -> DubResult<Vec<Segment>> {
        if utterances.is_empty() {
            return Err(DubError::EmptyTranscription);
        }

        let mut chunks = Vec::with_capacity(utterances.len());
        for utterance in utterances {
            validate_utterance(utterance)?;
            let language = if detected_language.trim().is_empty() {
                utterance.language.clone()
            } else {
                detected_language.to_string()
            };
            for part in self.split(utterance) {
                chunks.push(Chunk {
                    speaker: part.speaker,
                    begin: round_ms(part.start),
                    end: round_ms(part.end),
                    text: part.text.trim().to_string(),
                    words_with_silence: annotate_silences(&part.words),
                    confidence: part.confidence,
                    language: language.clone(),
                });
            }
        }

        let merged = self.merge(chunks);
        emit(
            Level::Debug,
            "dub.format.merged",
            &format!(
                "Formatted {} utterances into {} segments",
                utterances.len(),
                merged.len()
            ),
            None,
        );

        merged
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| self.finish(index, chunk))
            .collect()
    }

    /// Splits an utterance whose text exceeds the split cap by greedy word
    /// accumulation. Words are never broken.
    fn split(&self, utterance: &Utterance) -> Vec<Utterance> {
        let limit = self.config.split_characters;
        if utterance.text.chars().count() <= limit || utterance.words.is_empty() {
            return vec![utterance.clone()];
        }

        let mut parts = Vec::new();
        let mut current: Vec<Word> = Vec::new();
        let mut length = 0;
        for word in &utterance.words {
            let word_length = word.text.chars().count();
            if length + word_length > limit && !current.is_empty() {
                parts.push(chunk_from_words(utterance, std::mem::take(&mut current)));
                length = 0;
            }
            current.push(word.clone());
            length += word_length;
        }
        if !current.is_empty() {
            parts.push(chunk_from_words(utterance, current));
        }

        emit(
            Level::Debug,
            "dub.format.split",
            &format!("Split a long utterance into {} parts", parts.len()),
            Some(json!({ "start": utterance.start, "chars": utterance.text.chars().count() })),
        );
        parts
    }

    fn merge(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
        let mut iter = chunks.into_iter();
        let Some(mut current) = iter.next() else {
            return merged;
        };

        for next in iter {
            let cap = language::max_chars_for(&next.language, &self.config);
            let gap = next.begin - current.end;
            let combined = current.text.chars().count() + next.text.chars().count();

            if gap <= self.config.merge_gap_seconds
                && current.speaker == next.speaker
                && combined < cap
            {
                current = join_chunks(current, next, gap);
            } else {
                merged.push(std::mem::replace(&mut current, next));
            }
        }
        merged.push(current);
        merged
    }

    fn finish(&self, index: usize, chunk: Chunk) -> DubResult<Segment> {
        let length = chunk.text.chars().count();
        if length >= self.config.absolute_max_characters {
            return Err(DubError::SegmentTooLong {
                index,
                length,
                limit: self.config.absolute_max_characters,
            });
        }
        if chunk.end <= chunk.begin {
            return Err(DubError::InvalidInput(format!(
                "segment {index} ends at {} before it begins at {}",
                chunk.end, chunk.begin
            )));
        }
        Ok(Segment {
            index,
            speaker: chunk.speaker,
            begin: chunk.begin,
            end: chunk.end,
            text: chunk.text,
            original_text: None,
            words_with_silence: chunk.words_with_silence,
            confidence: chunk.confidence,
            language: chunk.language,
        })
    }
}

fn validate_utterance(utterance: &Utterance) -> DubResult<()> {
    let valid = utterance.start.is_finite()
        && utterance.end.is_finite()
        && utterance.start >= 0.0
        && utterance.end > utterance.start;
    if valid {
        Ok(())
    } else {
        Err(DubError::InvalidInput(format!(
            "utterance '{}' has invalid timing {}..{}",
            utterance.text.trim(),
            utterance.start,
            utterance.end
        )))
    }
}

fn chunk_from_words(parent: &Utterance, words: Vec<Word>) -> Utterance {
    let text: String = words.iter().map(|w| w.text.as_str()).collect();
    let start = words.first().map_or(parent.start, |w| w.start);
    let end = words.last().map_or(parent.end, |w| w.end);
    let confidence = words.iter().map(|w| w.confidence).sum::<f64>() / words.len().max(1) as f64;
    Utterance {
        text,
        start,
        end,
        speaker: parent.speaker,
        channel: parent.channel,
        confidence,
        language: parent.language.clone(),
        words,
    }
}

fn join_chunks(current: Chunk, next: Chunk, gap: f64) -> Chunk {
    let current_len = current.text.chars().count() as f64;
    let next_len = next.text.chars().count() as f64;
    let confidence = if current_len + next_len > 0.0 {
        (current.confidence * current_len + next.confidence * next_len) / (current_len + next_len)
    } else {
        current.confidence
    };

    let words_with_silence = match (
        current.words_with_silence.is_empty(),
        next.words_with_silence.is_empty(),
    ) {
        (true, _) => next.words_with_silence,
        (_, true) => current.words_with_silence,
        _ => format!(
            "{}{}{}",
            current.words_with_silence,
            silence_marker(gap),
            next.words_with_silence
        ),
    };

    Chunk {
        speaker: current.speaker,
        begin: current.begin,
        end: next.end,
        text: format!("{} {}", current.text, next.text),
        words_with_silence,
        confidence,
        language: current.language,
    }
}

/// `Hello<0.250s>world`: each trimmed word followed by the silence before the next.
pub fn annotate_silences(words: &[Word]) -> String {
    let mut annotated = String::new();
    for (i, word) in words.iter().enumerate() {
        annotated.push_str(word.text.trim());
        if let Some(next) = words.get(i + 1) {
            annotated.push_str(&silence_marker(next.start - word.end));
        }
    }
    annotated
}

fn silence_marker(gap: f64) -> String {
    format!("<{:.3}s>", gap.max(0.0))
}

fn round_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}
