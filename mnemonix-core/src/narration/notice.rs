//! Transient user-facing failure notice.
//!
//! A failed narration raises one notice; it stays visible for a fixed TTL and
//! then disappears on its own. Hosts poll [`NoticeBoard::current`] from the UI
//! thread.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::MnemonixError;

const RATE_LIMITED_TEXT: &str = "Quota exceeded. Please wait a moment and try again.";
const PLAYBACK_FAILED_TEXT: &str = "Audio playback failed. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeKind {
    RateLimited,
    PlaybackFailed,
}

impl NoticeKind {
    pub fn for_error(err: &MnemonixError) -> Self {
        if err.is_rate_limited() {
            NoticeKind::RateLimited
        } else {
            NoticeKind::PlaybackFailed
        }
    }

    pub fn default_text(self) -> &'static str {
        match self {
            NoticeKind::RateLimited => RATE_LIMITED_TEXT,
            NoticeKind::PlaybackFailed => PLAYBACK_FAILED_TEXT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

pub struct NoticeBoard {
    ttl: Duration,
    slot: Mutex<Option<(Notice, Instant)>>,
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Show a notice for `err`, replacing whatever was visible.
    pub fn raise_for(&self, err: &MnemonixError) -> Notice {
        let kind = NoticeKind::for_error(err);
        self.raise(kind, kind.default_text())
    }

    pub fn raise(&self, kind: NoticeKind, message: impl Into<String>) -> Notice {
        let notice = Notice {
            kind,
            message: message.into(),
        };
        *self.slot.lock() = Some((notice.clone(), Instant::now()));
        notice
    }

    /// The visible notice, if it has not expired yet.
    pub fn current(&self) -> Option<Notice> {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some((_, raised_at)) if raised_at.elapsed() >= self.ttl => {
                *slot = None;
                None
            }
            Some((notice, _)) => Some(notice.clone()),
            None => None,
        }
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
