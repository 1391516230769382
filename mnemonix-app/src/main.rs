//! `mnemonix`: narration playback and live voice tutoring from the terminal.
//!
//! ```text
//! mnemonix narrate <text> [--wav out.wav]
//! mnemonix narrate --entry card.json [--wav out.wav]
//! mnemonix play-url <url> [--wav out.wav]
//! mnemonix live [--text-only]
//! mnemonix devices
//! ```
//!
//! Global options: `--language <name|code>`, `--voice <name>`,
//! `--settings <path>`, `--save` (persist the options given).

mod commands;
mod settings;

use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::info;

use crate::commands::NarrationInput;
use crate::settings::{
    default_settings_path, load_settings, normalize_language, normalize_voice, resolve_api_key,
    save_settings, AppSettings,
};

#[derive(Debug)]
enum Command {
    Narrate(NarrationInput),
    PlayUrl(String),
    Live,
    Devices,
}

#[derive(Debug)]
struct Args {
    command: Command,
    wav: Option<PathBuf>,
    language: Option<String>,
    voice: Option<String>,
    settings_path: Option<PathBuf>,
    text_only: bool,
    save: bool,
}

fn usage() -> &'static str {
    "usage: mnemonix <narrate <text> | narrate --entry <file> | play-url <url> | live | devices> \
     [--wav <path>] [--language <lang>] [--voice <name>] [--settings <path>] [--text-only] [--save]"
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut command: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut entry: Option<PathBuf> = None;
    let mut wav: Option<PathBuf> = None;
    let mut language: Option<String> = None;
    let mut voice: Option<String> = None;
    let mut settings_path: Option<PathBuf> = None;
    let mut text_only = false;
    let mut save = false;

    let mut it = raw.into_iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| {
            it.next()
                .with_context(|| format!("missing value for {flag}"))
        };
        match arg.as_str() {
            "--entry" => entry = Some(PathBuf::from(value("--entry")?)),
            "--wav" => wav = Some(PathBuf::from(value("--wav")?)),
            "--language" => language = Some(value("--language")?),
            "--voice" => voice = Some(value("--voice")?),
            "--settings" => settings_path = Some(PathBuf::from(value("--settings")?)),
            "--text-only" => text_only = true,
            "--save" => save = true,
            "-h" | "--help" => bail!(usage()),
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{}", usage()),
            _ if command.is_none() => command = Some(arg),
            _ => positional.push(arg),
        }
    }

    let command = match command.as_deref() {
        Some("narrate") => match (entry, positional.is_empty()) {
            (Some(path), true) => Command::Narrate(NarrationInput::EntryFile(path)),
            (None, false) => Command::Narrate(NarrationInput::Text(positional.join(" "))),
            _ => bail!("narrate takes either text or --entry <file>"),
        },
        Some("play-url") => match positional.as_slice() {
            [url] => Command::PlayUrl(url.clone()),
            _ => bail!("play-url takes exactly one url"),
        },
        Some("live") => Command::Live,
        Some("devices") => Command::Devices,
        Some(other) => bail!("unknown command {other}\n{}", usage()),
        None => bail!(usage()),
    };

    Ok(Args {
        command,
        wav,
        language,
        voice,
        settings_path,
        text_only,
        save,
    })
}

fn apply_overrides(settings: &mut AppSettings, args: &Args) {
    if let Some(language) = &args.language {
        settings.language = normalize_language(language);
    }
    if let Some(voice) = &args.voice {
        settings.voice = normalize_voice(voice);
    }
    if args.text_only {
        settings.capture_enabled = false;
    }
}

fn run() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    let settings_path = args
        .settings_path
        .clone()
        .unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    apply_overrides(&mut app_settings, &args);
    if args.save {
        save_settings(&settings_path, &app_settings)
            .with_context(|| format!("saving {}", settings_path.display()))?;
    }
    info!(
        settings_path = ?settings_path,
        language = %app_settings.language,
        voice = %app_settings.voice,
        "settings loaded"
    );

    let api_key = resolve_api_key(&app_settings);
    match args.command {
        Command::Narrate(input) => commands::narrate(
            &app_settings,
            api_key.as_deref(),
            input,
            args.wav.as_deref(),
        ),
        Command::PlayUrl(url) => commands::narrate(
            &app_settings,
            api_key.as_deref(),
            NarrationInput::StoredUrl(url),
            args.wav.as_deref(),
        ),
        Command::Live => {
            let key = api_key.context("no API key: set MNEMONIX_API_KEY or GEMINI_API_KEY")?;
            commands::live(&app_settings, &key)
        }
        Command::Devices => commands::devices(),
    }
}

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mnemonix=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("mnemonix: {e:#}");
        std::process::exit(1);
    }
}
