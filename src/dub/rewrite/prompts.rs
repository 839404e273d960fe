//! Prompt text for the chat-completion rewriter.

use super::types::{Neighbour, PauseStyle, RewriteKind, RewriteRequest};

/// Pause budgets above this are reduced, models tend to overshoot
const OVERSHOOT_THRESHOLD: f64 = 0.5;
const OVERSHOOT_MARGIN: f64 = 0.4;

pub const TRANSLATE_INSTRUCTIONS: &str = "\
You are a professional translator working on a dubbing project.
Translate only the current segment into the target language.
Preserve meaning, tone, register and verbal tics. Keep the politeness level \
(formal or informal forms) consistent with the surrounding segments.
Write numbers out in words and expand units and currencies when the target language has an equivalent.
Keep '--' markers where they appear.
If the text is already in the target language, return it unchanged.
Return only the translated text with no quotes or commentary.";

pub const SHORTEN_INSTRUCTIONS: &str = "\
You adapt dubbed dialogue so it fits the original speaking time.
Rephrase the translated text so it is shorter when spoken while keeping exactly the same meaning, \
register and punctuation. Prefer natural expressions of the target language.
If the text cannot reasonably be shortened, return it as is.
Write numbers out in words.
Return only the reformulated text with no commentary.";

pub const LENGTHEN_INSTRUCTIONS: &str = "\
You adapt dubbed dialogue whose synthesized speech is shorter than the original.
When rewriting is allowed you may add or slightly reformulate words without changing the meaning.
When rewriting is not allowed you may only insert pause markers.
Place pauses using the silences between the original words first, then punctuation.
Never put a pause marker after the last word. A little less silence is better than too much.
Return only the modified text with no commentary.";

pub fn system_prompt(kind: &RewriteKind) -> &'static str {
    match kind {
        RewriteKind::Translate { .. } => TRANSLATE_INSTRUCTIONS,
        RewriteKind::Shorten { .. } => SHORTEN_INSTRUCTIONS,
        RewriteKind::Lengthen { .. } => LENGTHEN_INSTRUCTIONS,
    }
}

pub fn user_prompt(request: &RewriteRequest) -> String {
    let mut prompt = match &request.kind {
        RewriteKind::Translate {
            source_language,
            previous,
            next,
            speaker,
        } => translate_prompt(request, source_language, previous, next, *speaker),
        RewriteKind::Shorten {
            target_seconds,
            actual_seconds,
        } => shorten_prompt(request, *target_seconds, *actual_seconds),
        RewriteKind::Lengthen {
            target_seconds,
            actual_seconds,
            allow_word_changes,
            pause_style,
        } => lengthen_prompt(
            request,
            *target_seconds,
            *actual_seconds,
            *allow_word_changes,
            *pause_style,
        ),
    };

    if let Some(summary) = request.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("\nSummary of the recording for context: {summary}\n"));
    }
    prompt
}

fn translate_prompt(
    request: &RewriteRequest,
    source_language: &str,
    previous: &Option<Neighbour>,
    next: &Option<Neighbour>,
    speaker: u32,
) -> String {
    let mut prompt = format!(
        "Target language: {}\nSource language: {}\n\n",
        request.target_language, source_language
    );
    if let Some(previous) = previous {
        prompt.push_str(&format!(
            "--- PREVIOUS TEXT (speaker {}, context only) ---\n{}\n---END---\n\n",
            previous.speaker, previous.text
        ));
    }
    prompt.push_str(&format!(
        "--- TEXT TO TRANSLATE (speaker {speaker}) ---\n{}\n---END---\n",
        request.text
    ));
    if let Some(next) = next {
        prompt.push_str(&format!(
            "\n--- NEXT TEXT (speaker {}, context only) ---\n{}\n---END---\n",
            next.speaker, next.text
        ));
    }
    prompt
}

fn shorten_prompt(request: &RewriteRequest, target: f64, actual: f64) -> String {
    let overage = actual - target;
    let original = request.original_text.as_deref().unwrap_or(&request.text);
    format!(
        "Shorten the translated text so it fits into {target:.3} seconds.\n\n\
         --- Original text (untranslated) ---\n{original}\n---END---\n\n\
         --- Translated text (too long) ---\n{}\n---END---\n\n\
         Duration of the original speech: {target:.3} seconds.\n\
         Duration of the translated speech: {actual:.3} seconds.\n\
         The text is {overage:.3} seconds too long.\n\
         Return only the shortened text in {}.\n",
        request.text,
        request.target_language.to_uppercase()
    )
}

fn lengthen_prompt(
    request: &RewriteRequest,
    target: f64,
    actual: f64,
    allow_word_changes: bool,
    style: PauseStyle,
) -> String {
    let (actual, difference) = pause_budget(target, actual);
    let mut prompt = format!(
        "allowRewrite: {allow_word_changes}\n\
         originalSegmentDuration: {target:.3} seconds\n\
         translatedSpeechDuration: {actual:.4} seconds\n\
         difference: {difference:.4} seconds\n\
         targetLanguage: {}\n\n",
        request.target_language
    );

    prompt.push_str(&pause_rules(style, difference));
    prompt.push_str(&format!(
        "\n--- Text you must return updated ---\n{}\n---END---\n\n\
         --- Original words with the silence after each word ---\n{}\n---END---\n",
        request.text, request.words_with_silence
    ));
    prompt
}

/// Adjusted (speech duration, missing seconds) handed to the model.
pub fn pause_budget(target: f64, actual: f64) -> (f64, f64) {
    let difference = target - actual;
    if difference > OVERSHOOT_THRESHOLD {
        (actual + OVERSHOOT_MARGIN, difference - OVERSHOOT_MARGIN)
    } else {
        (actual, difference)
    }
}

fn pause_rules(style: PauseStyle, difference: f64) -> String {
    match style {
        PauseStyle::BreakTags => format!(
            "Distribute {difference:.4} seconds of silence using <break time=\"X.Xs\" /> tags.\n\
             - Use a break tag only for pauses of 0.8 seconds or more, rounded to one decimal.\n\
             - Below 0.8 seconds use punctuation only (comma, period, question mark).\n\
             - Split pauses longer than 1.5 seconds into several smaller ones.\n\
             - Always put a space before and after a break tag.\n"
        ),
        PauseStyle::Dashes => format!(
            "Distribute {difference:.4} seconds of silence using \"--\" markers, each about 0.6 seconds.\n\
             - Surround every marker with spaces, e.g. \"word -- word\".\n"
        ),
    }
}
