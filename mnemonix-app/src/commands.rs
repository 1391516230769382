//! Command handlers behind the `mnemonix` subcommands.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use mnemonix_core::{
    api::{GeminiTts, HttpAssetFetcher},
    audio::device::{list_input_devices, list_output_devices},
    engine::Connector,
    live::{ClientMessage, LiveTransport},
    CpalOutput, GeminiLiveTransport, LiveSession, MnemonicEntry, NarrationConfig,
    NarrationPlayer, OutputContext, PayloadSource, PlayOutcome, SessionConfig, VirtualOutput,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::settings::AppSettings;

/// Extra time left for the device buffer to drain after the last sample.
const DRAIN_TAIL: Duration = Duration::from_millis(250);

/// What to narrate.
#[derive(Debug, Clone)]
pub enum NarrationInput {
    Text(String),
    /// A mnemonic card saved as JSON.
    EntryFile(PathBuf),
    StoredUrl(String),
}

impl NarrationInput {
    fn into_source(self) -> anyhow::Result<PayloadSource> {
        Ok(match self {
            NarrationInput::Text(text) => PayloadSource::synthesize(text),
            NarrationInput::EntryFile(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let entry: MnemonicEntry = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?;
                PayloadSource::for_entry(&entry)
            }
            NarrationInput::StoredUrl(url) => PayloadSource::StoredUrl(url),
        })
    }
}

fn narration_config(settings: &AppSettings) -> NarrationConfig {
    NarrationConfig {
        language: settings.language(),
        notice_ttl: Duration::from_secs(settings.notice_ttl_secs),
        ..NarrationConfig::default()
    }
}

fn build_player(
    output: Arc<dyn OutputContext>,
    settings: &AppSettings,
    api_key: Option<&str>,
) -> anyhow::Result<NarrationPlayer> {
    let mut player = NarrationPlayer::new(output, narration_config(settings))
        .with_fetcher(Arc::new(HttpAssetFetcher::new()?));
    if let Some(key) = api_key {
        player = player.with_synthesizer(Arc::new(
            GeminiTts::new(key)?.with_voice(settings.voice.clone()),
        ));
    }
    Ok(player)
}

/// Play one narration on the output device, or render it to `wav` offline.
pub fn narrate(
    settings: &AppSettings,
    api_key: Option<&str>,
    input: NarrationInput,
    wav: Option<&Path>,
) -> anyhow::Result<()> {
    let source = input.into_source()?;
    if matches!(source, PayloadSource::Synthesize { .. }) && api_key.is_none() {
        bail!("no API key: set MNEMONIX_API_KEY or GEMINI_API_KEY");
    }

    match wav {
        Some(path) => render_to_wav(settings, api_key, &source, path),
        None => play_on_device(settings, api_key, &source),
    }
}

fn play_on_device(
    settings: &AppSettings,
    api_key: Option<&str>,
    source: &PayloadSource,
) -> anyhow::Result<()> {
    let output = Arc::new(CpalOutput::open_with_preference(
        NarrationConfig::default().sample_rate,
        settings.preferred_output_device.as_deref(),
    )?);
    let mut player = build_player(output, settings, api_key)?;

    let duration = match player.play(source) {
        Ok(PlayOutcome::Started { duration, from_cache }) => {
            info!(duration, from_cache, "narration playing");
            duration
        }
        Ok(PlayOutcome::Stopped) => return Ok(()),
        Err(e) => return Err(report_notice(&player, e)),
    };

    std::thread::sleep(Duration::from_secs_f64(duration) + DRAIN_TAIL);
    player.stop();
    Ok(())
}

fn render_to_wav(
    settings: &AppSettings,
    api_key: Option<&str>,
    source: &PayloadSource,
    path: &Path,
) -> anyhow::Result<()> {
    let rate = NarrationConfig::default().sample_rate;
    let output = Arc::new(VirtualOutput::new(rate).recording());
    let mut player = build_player(
        Arc::clone(&output) as Arc<dyn OutputContext>,
        settings,
        api_key,
    )?;

    let duration = match player.play(source) {
        Ok(PlayOutcome::Started { duration, .. }) => duration,
        Ok(PlayOutcome::Stopped) => 0.0,
        Err(e) => return Err(report_notice(&player, e)),
    };

    output.advance(duration);
    output.write_wav(path)?;
    info!(path = %path.display(), duration, "narration rendered");
    println!("wrote {:.2}s of narration to {}", duration, path.display());
    Ok(())
}

fn report_notice(player: &NarrationPlayer, err: mnemonix_core::MnemonixError) -> anyhow::Error {
    if let Some(notice) = player.notices().current() {
        eprintln!("{}", notice.message);
    }
    anyhow!(err)
}

/// Run a live tutoring session until stdin closes or `/quit` is typed.
///
/// Typed lines are sent as user turns; `/stop` cuts off the tutor.
pub fn live(settings: &AppSettings, api_key: &str) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let _guard = runtime.enter();

    let config = SessionConfig {
        voice: settings.voice.clone(),
        language: settings.language(),
        transcript_history: settings.transcript_history,
        capture_enabled: settings.capture_enabled,
        preferred_input_device: settings.preferred_input_device.clone(),
        ..SessionConfig::default()
    };
    let output = Arc::new(CpalOutput::open_with_preference(
        config.output_sample_rate,
        settings.preferred_output_device.as_deref(),
    )?);
    let session = Arc::new(LiveSession::new(config));

    // ── Forward session events to the terminal ────────────────────────────
    let mut transcript_rx = session.subscribe_transcripts();
    runtime.spawn(async move {
        loop {
            match transcript_rx.recv().await {
                Ok(event) => println!("{}", event.display_line()),
                Err(RecvError::Lagged(n)) => warn!("transcript forwarder lagged by {n}"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut status_rx = session.subscribe_status();
    runtime.spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => match event.detail {
                    Some(detail) => eprintln!("[{:?}] {detail}", event.status),
                    None => eprintln!("[{:?}]", event.status),
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let key = api_key.to_string();
    let connect: Connector = Box::new(
        move |setup: &ClientMessage| -> mnemonix_core::Result<Box<dyn LiveTransport>> {
            Ok(Box::new(GeminiLiveTransport::connect(&key, setup)?))
        },
    );
    session.start(connect, output)?;
    eprintln!("listening; type to chat, /stop to interrupt the tutor, /quit to leave");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if !session.is_running() {
            break;
        }
        match line {
            "" => continue,
            "/quit" => break,
            "/stop" => session.interrupt()?,
            text => session.send_text(text)?,
        }
    }

    if session.is_running() {
        session.stop()?;
    }
    let diag = session.diagnostics_snapshot();
    info!(
        frames_sent = diag.frames_sent,
        chunks_scheduled = diag.chunks_scheduled,
        interruptions = diag.interruptions,
        transcripts = diag.transcripts,
        "live session diagnostics"
    );
    Ok(())
}

/// Print input and output devices as JSON.
pub fn devices() -> anyhow::Result<()> {
    let listing = serde_json::json!({
        "inputs": list_input_devices(),
        "outputs": list_output_devices(),
    });
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_file_narrates_the_card() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apple.json");
        std::fs::write(
            &path,
            r#"{ "word": "apple", "meaning": "olma", "imagination": "a red ball", "connectorSentence": "Olma is an apple." }"#,
        )
        .unwrap();

        let source = NarrationInput::EntryFile(path).into_source().unwrap();
        assert_eq!(
            source,
            PayloadSource::synthesize("apple. olma. a red ball. Olma is an apple.")
        );
    }

    #[test]
    fn missing_entry_file_is_an_error() {
        let err = NarrationInput::EntryFile(PathBuf::from("/nonexistent/card.json"))
            .into_source()
            .unwrap_err();
        assert!(err.to_string().contains("card.json"));
    }

    #[test]
    fn synthesis_without_key_is_refused_before_opening_audio() {
        let err = narrate(
            &AppSettings::default(),
            None,
            NarrationInput::Text("apple".into()),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn narration_config_follows_settings() {
        let settings = AppSettings {
            language: "Russian".into(),
            notice_ttl_secs: 9,
            ..AppSettings::default()
        };
        let config = narration_config(&settings);
        assert_eq!(config.language, mnemonix_core::Language::Russian);
        assert_eq!(config.notice_ttl, Duration::from_secs(9));
        assert_eq!(config.sample_rate, 24_000);
    }
}
