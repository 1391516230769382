//! Events emitted by a `LiveSession`.
//!
//! ## Channels
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `TranscriptEvent` | `LiveSession::subscribe_transcripts` |
//! | `SessionStatusEvent` | `LiveSession::subscribe_status` |
//! | `PlaybackEvent` | `LiveSession::subscribe_playback` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transcript events
// ---------------------------------------------------------------------------

/// One transcription fragment from either side of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub speaker: Speaker,
    pub text: String,
}

impl TranscriptEvent {
    /// Line shown in the recent-transcript log, e.g. `"Tutor: salom"`.
    pub fn display_line(&self) -> String {
        format!("{}: {}", self.speaker.label(), self.text)
    }
}

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The learner (input transcription of the microphone).
    User,
    /// The model (output transcription of its audio).
    Tutor,
}

impl Speaker {
    pub fn label(self) -> &'static str {
        match self {
            Speaker::User => "You",
            Speaker::Tutor => "Tutor",
        }
    }
}

// ---------------------------------------------------------------------------
// Playback events
// ---------------------------------------------------------------------------

/// Emitted when tutor audio is placed on, or cleared from, the output clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlaybackEvent {
    #[serde(rename_all = "camelCase")]
    Scheduled { start_at: f64, duration: f64 },
    /// Barge-in; `stopped` sources were cut off.
    Interrupted { stopped: usize },
}

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created but `start()` not yet called.
    Idle,
    /// Opening devices and the live transport.
    Connecting,
    /// Streaming microphone audio and playing tutor replies.
    Listening,
    /// Stopped by the user; may be restarted.
    Stopped,
    /// Transport or device failure; restart required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_event_serializes_with_lowercase_speaker() {
        let event = TranscriptEvent {
            seq: 4,
            speaker: Speaker::Tutor,
            text: "Salom!".into(),
        };

        let json = serde_json::to_value(&event).expect("serialize transcript event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["speaker"], "tutor");
        assert_eq!(json["text"], "Salom!");

        let round_trip: TranscriptEvent =
            serde_json::from_value(json).expect("deserialize transcript event");
        assert_eq!(round_trip, event);
        assert_eq!(round_trip.display_line(), "Tutor: Salom!");
    }

    #[test]
    fn playback_event_is_tagged_with_camel_case_fields() {
        let json = serde_json::to_value(PlaybackEvent::Scheduled {
            start_at: 0.5,
            duration: 0.25,
        })
        .expect("serialize playback event");
        assert_eq!(json["kind"], "scheduled");
        assert_eq!(json["startAt"], 0.5);
        assert_eq!(json["duration"], 0.25);

        let json = serde_json::to_value(PlaybackEvent::Interrupted { stopped: 3 })
            .expect("serialize interruption");
        assert_eq!(json["kind"], "interrupted");
        assert_eq!(json["stopped"], 3);
    }

    #[test]
    fn session_status_event_serializes_with_lowercase_status() {
        let event = SessionStatusEvent {
            status: SessionStatus::Connecting,
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "connecting");
        assert!(json["detail"].is_null());
    }

    #[test]
    fn speaker_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<Speaker>(r#""Tutor""#).is_err());
    }
}
