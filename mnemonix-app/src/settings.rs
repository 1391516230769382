//! Persistent application settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use mnemonix_core::Language;
use serde::{Deserialize, Serialize};

pub const DEFAULT_VOICE: &str = mnemonix_core::api::DEFAULT_VOICE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Explanation language, by name or ISO code.
    pub language: String,
    pub voice: String,
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    /// Used only when no API key is set in the environment.
    pub api_key: Option<String>,
    pub notice_ttl_secs: u64,
    pub transcript_history: usize,
    pub capture_enabled: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            language: Language::default().as_str().into(),
            voice: DEFAULT_VOICE.into(),
            preferred_input_device: None,
            preferred_output_device: None,
            api_key: None,
            notice_ttl_secs: 5,
            transcript_history: 5,
            capture_enabled: true,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.language = normalize_language(&self.language);
        self.voice = normalize_voice(&self.voice);
        self.preferred_input_device = normalize_optional(self.preferred_input_device.take());
        self.preferred_output_device = normalize_optional(self.preferred_output_device.take());
        self.api_key = normalize_optional(self.api_key.take());
        self.notice_ttl_secs = self.notice_ttl_secs.clamp(1, 60);
        self.transcript_history = self.transcript_history.clamp(1, 50);
    }

    /// Parsed language, or the default one for unrecognised values.
    pub fn language(&self) -> Language {
        Language::from_str(&self.language).unwrap_or_default()
    }
}

pub fn normalize_language(raw: &str) -> String {
    match Language::from_str(raw) {
        Ok(language) => language.as_str().into(),
        Err(_) => Language::default().as_str().into(),
    }
}

pub fn normalize_voice(raw: &str) -> String {
    let voice = raw.trim();
    if voice.is_empty() {
        DEFAULT_VOICE.into()
    } else {
        voice.into()
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// API key lookup order: `MNEMONIX_API_KEY`, `GEMINI_API_KEY`, settings file.
pub fn resolve_api_key(settings: &AppSettings) -> Option<String> {
    ["MNEMONIX_API_KEY", "GEMINI_API_KEY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .or_else(|| settings.api_key.clone())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("MnemoniX")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("mnemonix")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("absent.json"));
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.language(), Language::Uzbek);
    }

    #[test]
    fn save_then_load_keeps_user_choices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            language: "Kazakh".into(),
            voice: "Puck".into(),
            preferred_output_device: Some("USB Headset".into()),
            ..AppSettings::default()
        };

        save_settings(&path, &settings).unwrap();
        let loaded = load_settings(&path);
        assert_eq!(loaded.language(), Language::Kazakh);
        assert_eq!(loaded.voice, "Puck");
        assert_eq!(loaded.preferred_output_device.as_deref(), Some("USB Headset"));
    }

    #[test]
    fn partial_and_out_of_range_values_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "language": "ky", "voice": "  ", "apiKey": " ", "noticeTtlSecs": 0, "transcriptHistory": 500 }"#,
        )
        .unwrap();

        let loaded = load_settings(&path);
        assert_eq!(loaded.language, "Kyrgyz");
        assert_eq!(loaded.voice, DEFAULT_VOICE);
        assert_eq!(loaded.api_key, None);
        assert_eq!(loaded.notice_ttl_secs, 1);
        assert_eq!(loaded.transcript_history, 50);
        assert!(loaded.capture_enabled);
    }

    #[test]
    fn unknown_language_falls_back_to_default() {
        assert_eq!(normalize_language("klingon"), "Uzbek");
        assert_eq!(normalize_language(" tg "), "Tajik");
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
    }
}
