use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde_json::json;

use crate::dub::config::OpenAiConfig;
use crate::dub::error::{DubError, DubResult};
use crate::ui::prelude::{Level, emit};

use super::prompts;
use super::types::{RewriteKind, RewriteRequest, Rewriter};

/// Chat-completions backed [`Rewriter`].
pub struct OpenAiRewriter {
    client: Client,
    api_key: String,
    base_url: String,
    translation_model: String,
    rewrite_model: String,
    temperature: f64,
}

impl OpenAiRewriter {
    pub fn new(config: &OpenAiConfig, api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            translation_model: config.translation_model.clone(),
            rewrite_model: config.rewrite_model.clone(),
            temperature: config.temperature,
        }
    }

    fn model_for(&self, kind: &RewriteKind) -> &str {
        match kind {
            RewriteKind::Translate { .. } => &self.translation_model,
            _ => &self.rewrite_model,
        }
    }

    fn body(&self, request: &RewriteRequest) -> serde_json::Value {
        let model = self.model_for(&request.kind);
        let mut body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": prompts::system_prompt(&request.kind) },
                { "role": "user", "content": prompts::user_prompt(request) },
            ],
        });
        // Reasoning models reject a temperature
        if !model.starts_with('o') {
            body["temperature"] = json!(self.temperature);
        }
        body
    }
}

#[async_trait]
impl Rewriter for OpenAiRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> DubResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        emit(
            Level::Debug,
            "dub.rewrite.request",
            &format!("Requesting {} rewrite", request.kind.label()),
            Some(json!({ "chars": request.text.chars().count() })),
        );

        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&self.body(request))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                DubError::Transient(format!("rewrite service returned {status}: {text}"))
            } else {
                DubError::RewriteFailed(format!("{status}: {text}"))
            });
        }

        let json: serde_json::Value = resp.json().await?;
        extract_message(&json)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

fn extract_message(json: &serde_json::Value) -> DubResult<String> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| DubError::RewriteFailed("response contained no message".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dub::rewrite::PauseStyle;

    fn request(kind: RewriteKind) -> RewriteRequest {
        RewriteRequest {
            kind,
            text: "Hola".into(),
            original_text: None,
            words_with_silence: "Hello".into(),
            target_language: "spanish".into(),
            summary: None,
        }
    }

    #[test]
    fn message_content_is_trimmed() {
        let json = json!({ "choices": [ { "message": { "content": "  Hola amigos \n" } } ] });
        assert_eq!(extract_message(&json).unwrap(), "Hola amigos");
        assert!(extract_message(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn reasoning_models_get_no_temperature() {
        let rewriter = OpenAiRewriter::new(&OpenAiConfig::default(), "key".into());
        let shorten = rewriter.body(&request(RewriteKind::Shorten {
            target_seconds: 1.0,
            actual_seconds: 1.5,
        }));
        assert_eq!(shorten["model"], "o3-mini");
        assert!(shorten.get("temperature").is_none());

        let translate = rewriter.body(&request(RewriteKind::Translate {
            source_language: "en".into(),
            previous: None,
            next: None,
            speaker: 0,
        }));
        assert_eq!(translate["model"], "gpt-4.1");
        assert_eq!(translate["temperature"], 0.5);

        let lengthen = rewriter.body(&request(RewriteKind::Lengthen {
            target_seconds: 2.0,
            actual_seconds: 1.0,
            allow_word_changes: true,
            pause_style: PauseStyle::Dashes,
        }));
        assert_eq!(lengthen["messages"][0]["content"], prompts::LENGTHEN_INSTRUCTIONS);
    }
}
