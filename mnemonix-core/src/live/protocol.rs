//! JSON messages of the Gemini Live `BidiGenerateContent` protocol.
//!
//! Only the subset the tutor session uses is modelled. Unknown server fields
//! are ignored so protocol additions do not break parsing.
//!
//! ```text
//! client → {"setup": {...}}                      once, first message
//! server → {"setupComplete": {}}
//! client → {"realtimeInput": {"mediaChunks": [{"data", "mimeType"}]}}
//! client → {"clientContent": {"turns": [...], "turnComplete": true}}
//! server → {"serverContent": {"modelTurn", "inputTranscription",
//!                             "outputTranscription", "interrupted", "turnComplete"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::{api::Language, error::Result};

/// Native-audio model used for spoken tutoring.
pub const LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Mime type of every outbound microphone frame.
pub const PCM_MIME_16K: &str = "audio/pcm;rate=16000";

/// System instruction for the spoken tutor persona.
pub fn tutor_instruction(language: Language) -> String {
    format!(
        "You are a professional mnemonics and English teacher. Hold a spoken \
         conversation with the learner. To help them remember words, offer funny \
         mental images and similar-sounding words in {language}. IMPORTANT: speak \
         only in {language}."
    )
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupConfig),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

impl ClientMessage {
    /// Setup for the spoken tutor: audio replies, transcription both ways.
    pub fn tutor_setup(model: &str, voice: &str, language: Language) -> Self {
        ClientMessage::Setup(SetupConfig {
            model: format!("models/{}", model.trim_start_matches("models/")),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".into()],
                speech_config: Some(SpeechConfig::prebuilt(voice)),
            },
            system_instruction: Some(Content::text(None, tutor_instruction(language))),
            input_audio_transcription: Some(AudioTranscriptionConfig::default()),
            output_audio_transcription: Some(AudioTranscriptionConfig::default()),
        })
    }

    /// One encoded microphone frame.
    pub fn audio_frame(data: String) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                data,
                mime_type: PCM_MIME_16K.into(),
            }],
        })
    }

    /// A typed user turn, completed immediately.
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::text(Some("user"), text.into())],
            turn_complete: true,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

impl SpeechConfig {
    pub fn prebuilt(voice: &str) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice.into(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Serializes as `{}`; presence alone enables transcription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// Base64 payload tagged with its mime type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: Option<&str>, text: String) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Transcription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Base64 audio payloads of the model turn, in message order.
    pub fn audio_chunks(&self) -> impl Iterator<Item = &str> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/"))
            .map(|blob| blob.data.as_str())
    }

    /// What the learner said, when this message carries it.
    pub fn input_text(&self) -> Option<&str> {
        self.server_content
            .as_ref()
            .and_then(|c| c.input_transcription.as_ref())
            .map(|t| t.text.as_str())
            .filter(|t| !t.trim().is_empty())
    }

    /// What the tutor said, when this message carries it.
    pub fn output_text(&self) -> Option<&str> {
        self.server_content
            .as_ref()
            .and_then(|c| c.output_transcription.as_ref())
            .map(|t| t.text.as_str())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.interrupted)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.turn_complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tutor_setup_serializes_the_live_config() {
        let json = serde_json::to_value(ClientMessage::tutor_setup(
            LIVE_MODEL,
            "Kore",
            Language::Kazakh,
        ))
        .unwrap();

        let setup = &json["setup"];
        assert_eq!(setup["model"], format!("models/{LIVE_MODEL}"));
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert!(setup["inputAudioTranscription"].is_object());
        assert!(setup["outputAudioTranscription"].is_object());
        let instruction = setup["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap();
        assert!(instruction.contains("only in Kazakh"));
    }

    #[test]
    fn audio_frame_uses_realtime_input_shape() {
        let json = serde_json::to_value(ClientMessage::audio_frame("AAA=".into())).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["data"], "AAA=");
        assert_eq!(chunk["mimeType"], PCM_MIME_16K);
    }

    #[test]
    fn user_text_is_a_completed_user_turn() {
        let json = serde_json::to_value(ClientMessage::user_text("salom")).unwrap();
        assert_eq!(json["clientContent"]["turnComplete"], true);
        assert_eq!(json["clientContent"]["turns"][0]["role"], "user");
        assert_eq!(json["clientContent"]["turns"][0]["parts"][0]["text"], "salom");
    }

    #[test]
    fn server_content_exposes_audio_transcripts_and_interruption() {
        let msg = ServerMessage::parse(
            r#"{
                "serverContent": {
                    "modelTurn": {"parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQA="}},
                        {"text": "thinking"},
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AgA="}}
                    ]},
                    "outputTranscription": {"text": "Salom"},
                    "inputTranscription": {"text": "  "},
                    "interrupted": true,
                    "somethingNew": 1
                }
            }"#,
        )
        .unwrap();

        assert_eq!(msg.audio_chunks().collect::<Vec<_>>(), vec!["AQA=", "AgA="]);
        assert_eq!(msg.output_text(), Some("Salom"));
        assert_eq!(msg.input_text(), None);
        assert!(msg.is_interrupted());
        assert!(!msg.is_turn_complete());
        assert!(!msg.is_setup_complete());
    }

    #[test]
    fn setup_complete_is_detected() {
        let msg = ServerMessage::parse(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert_eq!(msg.audio_chunks().count(), 0);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(ServerMessage::parse("{not json").is_err());
    }
}
