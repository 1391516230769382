//! One-shot speech synthesis through the Gemini `generateContent` endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{classify_failure, with_retry, Language, RetryPolicy, SpeechSynthesizer, DEFAULT_VOICE};
use crate::{
    error::{MnemonixError, Result},
    live::protocol::{Content, GenerationConfig, SpeechConfig},
};

/// Speech model for narration.
pub const TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Instruction wrapped around narration text: English words in an English
/// accent, the explanation in the learner's language.
pub fn tts_prompt(text: &str, language: Language) -> String {
    format!(
        "Read the following text aloud. It contains English words and their explanation in {language}. \
         Please use a clear, standard English accent for the English words and a natural, fluent \
         {language} accent for the rest of the text.\nText: \"{text}\""
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateResponse {
    /// First inline payload of the first candidate.
    fn audio_data(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.inline_data)
            .map(|blob| blob.data)
            .find(|data| !data.is_empty())
    }
}

pub struct GeminiTts {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    voice: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiTts {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: TTS_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            base_url: API_BASE.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Point at a different API root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, text: &str, language: Language) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content::text(None, tts_prompt(text, language))],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".into()],
                speech_config: Some(SpeechConfig::prebuilt(&self.voice)),
            },
        }
    }

    fn synthesize_once(&self, body: &GenerateRequest) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &text));
        }

        let payload: GenerateResponse = response.json()?;
        payload.audio_data().ok_or(MnemonixError::EmptyPayload)
    }
}

impl SpeechSynthesizer for GeminiTts {
    fn synthesize(&self, text: &str, language: Language) -> Result<String> {
        let body = self.request_body(text, language);
        debug!(model = %self.model, chars = text.len(), %language, "requesting narration audio");

        let audio = with_retry(&self.retry, || self.synthesize_once(&body))?;
        info!(base64_len = audio.len(), "narration audio received");
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_the_target_accent_and_quotes_the_text() {
        let prompt = tts_prompt("apple. olma", Language::Uzbek);
        assert!(prompt.contains("explanation in Uzbek"));
        assert!(prompt.contains("fluent Uzbek accent"));
        assert!(prompt.ends_with("Text: \"apple. olma\""));
    }

    #[test]
    fn request_body_asks_for_audio_in_the_configured_voice() {
        let tts = GeminiTts::new("key").unwrap().with_voice("Puck");
        let json = serde_json::to_value(tts.request_body("hi", Language::Russian)).unwrap();
        assert_eq!(json["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert!(json["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Russian"));
    }

    #[test]
    fn audio_is_taken_from_the_first_inline_part() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"ok"},
                {"inlineData":{"mimeType":"audio/L16;codec=pcm;rate=24000","data":"AAEC"}}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(response.audio_data().as_deref(), Some("AAEC"));
    }

    #[test]
    fn response_without_audio_has_no_payload() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"no"}]}}]}"#)
                .unwrap();
        assert!(response.audio_data().is_none());
        assert!(GenerateResponse::default().audio_data().is_none());
    }
}
