//! Audio device enumeration.

use serde::{Deserialize, Serialize};

/// Whether a device captures or plays audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
    /// Heuristic flag for inputs that capture system output instead of a voice.
    pub is_loopback_like: bool,
    /// Best guess for the tutor microphone (inputs) or the default speaker (outputs).
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "virtual output",
];

const MIC_KEYWORDS: &[&str] = &["microphone", "mic", "headset", "array", "usb", "webcam"];

/// Best-effort heuristic for loopback/system-output capture devices.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Higher is a more likely speech microphone.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_loopback_like_name(&lowered) { -16 } else { 8 };
    if MIC_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    score
}

/// Mark the best entry as recommended and order recommended/default first.
fn rank(mut list: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    let best = list
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| {
            let base = match d.direction {
                DeviceDirection::Input => mic_preference_score(&d.name),
                DeviceDirection::Output => 0,
            };
            base + if d.is_default { 2 } else { 0 }
        })
        .map(|(idx, _)| idx);
    if let Some(best) = best.and_then(|idx| list.get_mut(idx)) {
        best.is_recommended = true;
    }

    list.sort_by_key(|d| (!d.is_recommended, !d.is_default, d.name.to_ascii_lowercase()));
    list
}

/// List capture devices. Empty when cpal is unavailable or nothing is attached.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => rank(
            devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        is_loopback_like: is_loopback_like_name(&name),
                        direction: DeviceDirection::Input,
                        is_recommended: false,
                        name,
                    }
                })
                .collect(),
        ),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

/// List playback devices. Empty when cpal is unavailable or nothing is attached.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => rank(
            devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        is_loopback_like: false,
                        direction: DeviceDirection::Output,
                        is_recommended: false,
                        name,
                    }
                })
                .collect(),
        ),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}
