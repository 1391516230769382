//! One-shot narration: fetch or synthesize one payload, decode it once, play
//! it with toggle semantics.
//!
//! ## Cache
//!
//! A single decoded buffer is kept, keyed by the SHA-256 of the payload
//! source (narration text and language, stored URL, or inline payload).
//! Asking for a different source replaces it, so audio for a previous word is
//! never played for new text. Call [`NarrationPlayer::invalidate`] when the
//! displayed word changes.
//!
//! ## Failures
//!
//! Every failed `play` raises a transient [`Notice`] (quota vs. generic) on the
//! player's [`NoticeBoard`] and still returns the error to the caller.

pub mod entry;
pub mod notice;

pub use entry::MnemonicEntry;
pub use notice::{Notice, NoticeBoard, NoticeKind};

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{
    api::{AssetFetcher, Language, SpeechSynthesizer},
    audio::output::{OutputContext, SourceHandle},
    buffering::chunk::PlayableBuffer,
    codec::PcmCodec,
    error::{MnemonixError, Result},
};

#[derive(Debug, Clone)]
pub struct NarrationConfig {
    /// Rate of synthesized and stored narration audio (Hz). Default: 24000.
    pub sample_rate: u32,
    /// Default: 1.
    pub channels: u16,
    /// Language the explanation is read in.
    pub language: Language,
    /// How long a failure notice stays visible. Default: 5 s.
    pub notice_ttl: Duration,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            language: Language::default(),
            notice_ttl: Duration::from_secs(5),
        }
    }
}

/// Where the narration audio comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    /// Synthesize `text` through the speech API.
    Synthesize { text: String },
    /// Raw s16le bytes previously stored by the backend.
    StoredUrl(String),
    /// Base64 s16le already in hand.
    Inline(String),
}

impl PayloadSource {
    pub fn synthesize(text: impl Into<String>) -> Self {
        PayloadSource::Synthesize { text: text.into() }
    }

    /// Narration of a mnemonic card.
    pub fn for_entry(entry: &MnemonicEntry) -> Self {
        Self::synthesize(entry.narration_text())
    }

    /// Hex SHA-256 identifying the audio this source yields.
    pub fn cache_key(&self, language: Language) -> String {
        let mut hasher = Sha256::new();
        match self {
            PayloadSource::Synthesize { text } => {
                hasher.update(b"tts\0");
                hasher.update(language.as_str().as_bytes());
                hasher.update(b"\0");
                hasher.update(text.as_bytes());
            }
            PayloadSource::StoredUrl(url) => {
                hasher.update(b"url\0");
                hasher.update(url.as_bytes());
            }
            PayloadSource::Inline(data) => {
                hasher.update(b"inline\0");
                hasher.update(data.as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayOutcome {
    /// Playback began; `from_cache` is true when no fetch or synthesis ran.
    Started { duration: f64, from_cache: bool },
    /// The call stopped narration that was already playing.
    Stopped,
}

struct CachedNarration {
    key: String,
    buffer: Arc<PlayableBuffer>,
}

pub struct NarrationPlayer {
    config: NarrationConfig,
    output: Arc<dyn OutputContext>,
    codec: PcmCodec,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    fetcher: Option<Arc<dyn AssetFetcher>>,
    cache: Option<CachedNarration>,
    current: Option<SourceHandle>,
    notices: Arc<NoticeBoard>,
}

impl NarrationPlayer {
    /// `output` should belong to this player alone; do not share it with a
    /// live session.
    pub fn new(output: Arc<dyn OutputContext>, config: NarrationConfig) -> Self {
        let notices = Arc::new(NoticeBoard::new(config.notice_ttl));
        Self {
            config,
            output,
            codec: PcmCodec::new(),
            synthesizer: None,
            fetcher: None,
            cache: None,
            current: None,
            notices,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_codec(mut self, codec: PcmCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Toggle: stop narration if it is playing, otherwise play `source`.
    ///
    /// # Errors
    /// Upstream, decode (`EmptyPayload`) and output failures. A notice is
    /// raised for each.
    pub fn play(&mut self, source: &PayloadSource) -> Result<PlayOutcome> {
        if self.is_playing() {
            self.stop();
            return Ok(PlayOutcome::Stopped);
        }

        self.start(source).inspect_err(|e| {
            let notice = self.notices.raise_for(e);
            warn!(kind = ?notice.kind, "narration failed: {e}");
        })
    }

    fn start(&mut self, source: &PayloadSource) -> Result<PlayOutcome> {
        let key = source.cache_key(self.config.language);
        let cached = self
            .cache
            .as_ref()
            .filter(|c| c.key == key)
            .map(|c| Arc::clone(&c.buffer));

        let from_cache = cached.is_some();
        let buffer = match cached {
            Some(buffer) => buffer,
            None => {
                // Drop stale audio before loading so a failure cannot leave it behind.
                self.cache = None;
                let buffer = Arc::new(self.load(source)?);
                self.cache = Some(CachedNarration {
                    key,
                    buffer: Arc::clone(&buffer),
                });
                buffer
            }
        };

        let duration = buffer.duration_secs();
        let handle = self.output.schedule(buffer, self.output.current_time())?;
        self.current = Some(handle);

        info!(duration, from_cache, "narration started");
        Ok(PlayOutcome::Started {
            duration,
            from_cache,
        })
    }

    fn load(&self, source: &PayloadSource) -> Result<PlayableBuffer> {
        let (rate, channels) = (self.config.sample_rate, self.config.channels);
        let decoded = match source {
            PayloadSource::Synthesize { text } => {
                if text.trim().is_empty() {
                    return Err(MnemonixError::EmptyPayload);
                }
                let synthesizer = self.synthesizer.as_ref().ok_or_else(|| {
                    MnemonixError::Protocol("no speech synthesizer configured".into())
                })?;
                let payload = synthesizer.synthesize(text, self.config.language)?;
                self.codec.decode_chunk(&payload, rate, channels)
            }
            PayloadSource::StoredUrl(url) => {
                let fetcher = self.fetcher.as_ref().ok_or_else(|| {
                    MnemonixError::Protocol("no asset fetcher configured".into())
                })?;
                let bytes = fetcher.fetch(url)?;
                self.codec.bytes_to_playable_buffer(&bytes, rate, channels)
            }
            PayloadSource::Inline(payload) => self.codec.decode_chunk(payload, rate, channels),
        };

        let buffer = decoded.ok_or(MnemonixError::EmptyPayload)?;
        debug!(frames = buffer.frame_count(), "narration decoded");
        Ok(buffer)
    }

    /// Stop current narration. Returns whether anything was playing.
    pub fn stop(&mut self) -> bool {
        match self.current.take() {
            Some(handle) => {
                let was_playing = !handle.has_ended();
                handle.stop();
                was_playing
            }
            None => false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.current.as_ref().is_some_and(|h| !h.has_ended())
    }

    /// Content changed: stop playback and forget the cached buffer.
    pub fn invalidate(&mut self) {
        self.stop();
        if self.cache.take().is_some() {
            debug!("narration cache invalidated");
        }
    }

    /// A new word is on screen. Drops playback and cache unless `source` is
    /// what is already cached. Returns whether anything was invalidated.
    pub fn set_content(&mut self, source: &PayloadSource) -> bool {
        if self.is_cached(source) {
            return false;
        }
        let had_state = self.cache.is_some() || self.is_playing();
        self.invalidate();
        had_state
    }

    /// Whether `source` would play without a fetch or synthesis.
    pub fn is_cached(&self, source: &PayloadSource) -> bool {
        let key = source.cache_key(self.config.language);
        self.cache.as_ref().is_some_and(|c| c.key == key)
    }

    pub fn set_language(&mut self, language: Language) {
        self.config.language = language;
    }

    pub fn language(&self) -> Language {
        self.config.language
    }

    pub fn notices(&self) -> &Arc<NoticeBoard> {
        &self.notices
    }

    pub fn output(&self) -> &Arc<dyn OutputContext> {
        &self.output
    }
}

impl Drop for NarrationPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::audio::output::VirtualOutput;
    use crate::codec::float_samples_to_base64_pcm;

    const RATE: u32 = 24_000;

    /// Returns `seconds` of a constant tone, or a scripted error.
    struct FixtureTts {
        calls: AtomicUsize,
        seconds: f64,
        fail_with_quota: bool,
    }

    impl FixtureTts {
        fn new(seconds: f64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seconds,
                fail_with_quota: false,
            })
        }

        fn quota_exhausted() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seconds: 0.0,
                fail_with_quota: true,
            })
        }
    }

    impl SpeechSynthesizer for FixtureTts {
        fn synthesize(&self, _text: &str, _language: Language) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_with_quota {
                return Err(MnemonixError::RateLimited("RESOURCE_EXHAUSTED".into()));
            }
            let frames = (self.seconds * RATE as f64) as usize;
            Ok(float_samples_to_base64_pcm(&vec![0.25; frames]))
        }
    }

    struct FixtureStore(Vec<u8>);

    impl AssetFetcher for FixtureStore {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    fn player(tts: &Arc<FixtureTts>) -> (Arc<VirtualOutput>, NarrationPlayer) {
        let output = Arc::new(VirtualOutput::new(RATE));
        let player = NarrationPlayer::new(
            Arc::clone(&output) as Arc<dyn OutputContext>,
            NarrationConfig::default(),
        )
        .with_synthesizer(Arc::clone(tts) as Arc<dyn SpeechSynthesizer>);
        (output, player)
    }

    #[test]
    fn second_play_while_playing_stops_instead_of_restarting() {
        let tts = FixtureTts::new(1.0);
        let (output, mut player) = player(&tts);
        let source = PayloadSource::synthesize("apple. olma");

        assert!(matches!(
            player.play(&source).unwrap(),
            PlayOutcome::Started { from_cache: false, .. }
        ));
        assert!(player.is_playing());

        assert_eq!(player.play(&source).unwrap(), PlayOutcome::Stopped);
        assert!(!player.is_playing());
        output.advance(0.01);
        assert_eq!(output.active_voices(), 0);
    }

    #[test]
    fn identical_text_reuses_the_decoded_buffer() {
        let tts = FixtureTts::new(0.2);
        let (output, mut player) = player(&tts);
        let source = PayloadSource::synthesize("apple");

        player.play(&source).unwrap();
        output.advance(0.5);
        assert!(!player.is_playing());

        let again = player.play(&source).unwrap();
        assert!(matches!(again, PlayOutcome::Started { from_cache: true, .. }));
        assert_eq!(tts.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_text_or_invalidation_never_replays_stale_audio() {
        let tts = FixtureTts::new(0.1);
        let (output, mut player) = player(&tts);

        player.play(&PayloadSource::synthesize("apple")).unwrap();
        output.advance(0.2);
        assert!(!player.is_cached(&PayloadSource::synthesize("pear")));

        player.play(&PayloadSource::synthesize("pear")).unwrap();
        output.advance(0.2);
        assert_eq!(tts.calls.load(Ordering::SeqCst), 2);

        player.invalidate();
        assert!(!player.is_cached(&PayloadSource::synthesize("pear")));
    }

    #[test]
    fn switching_words_stops_old_narration_but_same_word_keeps_cache() {
        let tts = FixtureTts::new(1.0);
        let (output, mut player) = player(&tts);
        let apple = PayloadSource::synthesize("apple");

        player.play(&apple).unwrap();
        assert!(!player.set_content(&apple));
        assert!(player.is_playing());

        assert!(player.set_content(&PayloadSource::synthesize("pear")));
        assert!(!player.is_playing());
        assert!(!player.is_cached(&apple));
        output.advance(0.01);
        assert_eq!(output.active_voices(), 0);
    }

    #[test]
    fn quota_failure_raises_rate_limit_notice_and_returns_error() {
        let tts = FixtureTts::quota_exhausted();
        let (_output, mut player) = player(&tts);

        let err = player.play(&PayloadSource::synthesize("apple")).unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(
            player.notices().current().map(|n| n.kind),
            Some(NoticeKind::RateLimited)
        );
    }

    #[test]
    fn undecodable_payload_is_a_generic_failure() {
        let tts = FixtureTts::new(0.1);
        let (_output, mut player) = player(&tts);

        let err = player
            .play(&PayloadSource::Inline("not base64 at all!".into()))
            .unwrap_err();
        assert!(matches!(err, MnemonixError::EmptyPayload));
        assert_eq!(
            player.notices().current().map(|n| n.kind),
            Some(NoticeKind::PlaybackFailed)
        );
    }

    #[test]
    fn stored_audio_bytes_play_through_the_same_decoder() {
        let output = Arc::new(VirtualOutput::new(RATE));
        // 0.5 s of s16le plus one stray byte.
        let mut bytes = vec![0u8; RATE as usize];
        bytes.push(7);
        let mut player = NarrationPlayer::new(
            Arc::clone(&output) as Arc<dyn OutputContext>,
            NarrationConfig::default(),
        )
        .with_fetcher(Arc::new(FixtureStore(bytes)));

        match player
            .play(&PayloadSource::StoredUrl("https://cdn.example/apple.pcm".into()))
            .unwrap()
        {
            PlayOutcome::Started { duration, .. } => assert!((duration - 0.5).abs() < 1e-9),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn cache_key_depends_on_language_for_synthesis() {
        let source = PayloadSource::synthesize("apple");
        assert_ne!(
            source.cache_key(Language::Uzbek),
            source.cache_key(Language::Kazakh)
        );
        assert_eq!(
            PayloadSource::StoredUrl("u".into()).cache_key(Language::Uzbek),
            PayloadSource::StoredUrl("u".into()).cache_key(Language::Russian)
        );
    }
}
