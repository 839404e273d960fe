//! Translation and timing-driven text rewriting.

mod openai;
pub mod prompts;
mod types;

pub use openai::OpenAiRewriter;
pub use types::{Neighbour, PauseStyle, RewriteKind, RewriteRequest, Rewriter};

use futures_util::future::join_all;
use serde_json::json;

use crate::ui::prelude::*;

use super::error::DubResult;
use super::segment::Segment;

/// Calls the rewriter until it returns text different from the input.
///
/// After `attempts` identical answers the unchanged text is accepted and a
/// warning is emitted.
pub async fn rewrite_until_changed(
    rewriter: &dyn Rewriter,
    request: &RewriteRequest,
    attempts: u32,
) -> DubResult<String> {
    let attempts = attempts.max(1);
    let mut output = request.text.clone();
    for attempt in 1..=attempts {
        output = rewriter.rewrite(request).await?;
        if output != request.text {
            return Ok(output);
        }
        emit(
            Level::Debug,
            "dub.rewrite.unchanged",
            &format!(
                "{} rewrite returned its input unchanged (attempt {attempt}/{attempts})",
                request.kind.label()
            ),
            None,
        );
    }

    emit(
        Level::Warn,
        "dub.rewrite.exhausted",
        &format!(
            "{} rewrite kept returning the same text after {attempts} attempts; keeping it",
            request.kind.label()
        ),
        Some(json!({ "text": request.text })),
    );
    Ok(output)
}

/// Translates every segment in place, `width` requests at a time.
///
/// Each segment's previous and next neighbours are sent as context. The
/// source text is kept in `original_text`.
pub async fn translate_segments(
    rewriter: &dyn Rewriter,
    segments: &mut [Segment],
    target_language: &str,
    summary: Option<&str>,
    width: usize,
    attempts: u32,
) -> DubResult<()> {
    segments.sort_by_key(|s| s.index);
    let requests: Vec<RewriteRequest> = (0..segments.len())
        .map(|i| translation_request(segments, i, target_language, summary))
        .collect();

    let mut translations: Vec<String> = Vec::with_capacity(requests.len());
    for batch in requests.chunks(width.max(1)) {
        let results = join_all(
            batch
                .iter()
                .map(|request| rewrite_until_changed(rewriter, request, attempts)),
        )
        .await;
        for result in results {
            translations.push(result?);
        }
        emit(
            Level::Debug,
            "dub.translate.batch",
            &format!("Translated {}/{} segments", translations.len(), segments.len()),
            None,
        );
    }

    for (segment, translated) in segments.iter_mut().zip(translations) {
        let source = std::mem::replace(&mut segment.text, translated);
        segment.original_text = Some(source);
        segment.language = target_language.to_string();
    }
    Ok(())
}

fn translation_request(
    segments: &[Segment],
    position: usize,
    target_language: &str,
    summary: Option<&str>,
) -> RewriteRequest {
    let segment = &segments[position];
    let neighbour = |s: &Segment| Neighbour {
        speaker: s.speaker,
        text: s.text.clone(),
    };
    let previous = position
        .checked_sub(1)
        .and_then(|i| segments.get(i))
        .map(neighbour);
    let next = segments.get(position + 1).map(neighbour);

    RewriteRequest {
        kind: RewriteKind::Translate {
            source_language: segment.language.clone(),
            previous,
            next,
            speaker: segment.speaker,
        },
        text: segment.text.clone(),
        original_text: None,
        words_with_silence: segment.words_with_silence.clone(),
        target_language: target_language.to_string(),
        summary: summary.map(str::to_string),
    }
}
