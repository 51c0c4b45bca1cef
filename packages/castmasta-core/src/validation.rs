//! Input validation for every public agent operation.
//!
//! Everything here runs before any backend, provider or subprocess is
//! touched, and every failure is a [`CastError::Validation`] that says what
//! was wrong and what is allowed.

use std::fs;
use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{CastError, CastResult};

/// File extensions accepted by `stream_file`.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "aac", "flac", "m4a", "m4v", "mov", "mp3", "mp4", "ogg", "wav",
];

/// File extensions accepted by `display_image`.
pub const IMAGE_EXTENSIONS: &[&str] = &["bmp", "gif", "jpeg", "jpg", "png", "webp"];

/// URL schemes accepted by `play_url`.
pub const URL_SCHEMES: &[&str] = &["http", "https"];

pub const MIN_DISPLAY_DURATION_SECS: u32 = 1;
pub const MAX_DISPLAY_DURATION_SECS: u32 = 86_400;
pub const DEFAULT_DISPLAY_DURATION_SECS: u32 = 3600;

pub const MAX_ANNOUNCE_TEXT_LEN: usize = 4000;
pub const DEFAULT_VOICE: &str = "en_US-lessac-medium";

/// Step used by `volume_up`/`volume_down` when the caller gives none.
pub const DEFAULT_VOLUME_DELTA: f64 = 0.1;

/// Validates a local media file and returns its canonical path.
pub fn validate_media_path(path: impl AsRef<Path>) -> CastResult<PathBuf> {
    validate_file(path.as_ref(), MEDIA_EXTENSIONS, "file")
}

/// Validates a local image file and returns its canonical path.
pub fn validate_image_path(path: impl AsRef<Path>) -> CastResult<PathBuf> {
    validate_file(path.as_ref(), IMAGE_EXTENSIONS, "image")
}

/// Rejects symlinks, resolves the path, requires a regular file and checks
/// the extension of the resolved file against `allowed`.
fn validate_file(path: &Path, allowed: &[&str], kind: &str) -> CastResult<PathBuf> {
    let not_found = || {
        CastError::Validation(format!(
            "{} not found: {}",
            capitalize(kind),
            path.display()
        ))
    };

    let meta = fs::symlink_metadata(path).map_err(|_| not_found())?;
    if meta.file_type().is_symlink() {
        return Err(CastError::Validation(format!(
            "Symlinks are not allowed: {}",
            path.display()
        )));
    }

    let resolved = fs::canonicalize(path).map_err(|_| not_found())?;
    if !resolved.is_file() {
        return Err(not_found());
    }

    let extension = resolved
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !allowed.contains(&extension.as_str()) {
        let allowed: Vec<String> = allowed.iter().map(|e| format!(".{}", e)).collect();
        return Err(CastError::Validation(format!(
            "Unsupported {} type '.{}'. Allowed: {}",
            kind,
            extension,
            allowed.join(", ")
        )));
    }

    Ok(resolved)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Requires an `http`/`https` URL with a host.
pub fn validate_url(url: &str) -> CastResult<()> {
    let parsed =
        Url::parse(url).map_err(|e| CastError::Validation(format!("Invalid URL '{}': {}", url, e)))?;
    if !URL_SCHEMES.contains(&parsed.scheme()) {
        return Err(CastError::Validation(format!(
            "URL scheme '{}' not allowed. Use http or https.",
            parsed.scheme()
        )));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(CastError::Validation("URL must include a hostname.".into())),
    }
}

/// Volume must be finite and within `[0.0, 1.0]`.
pub fn validate_volume(volume: f64) -> CastResult<()> {
    if !volume.is_finite() {
        return Err(CastError::Validation("Volume must be a finite number.".into()));
    }
    if !(0.0..=1.0).contains(&volume) {
        return Err(CastError::Validation(format!(
            "Volume must be between 0.0 and 1.0, got {}",
            volume
        )));
    }
    Ok(())
}

/// Delta must be finite and within `(0.0, 1.0]`.
pub fn validate_delta(delta: f64) -> CastResult<()> {
    if !delta.is_finite() {
        return Err(CastError::Validation("Delta must be a finite number.".into()));
    }
    if delta <= 0.0 || delta > 1.0 {
        return Err(CastError::Validation(format!(
            "Delta must be between 0.0 and 1.0, got {}",
            delta
        )));
    }
    Ok(())
}

/// Seek position must be finite and non-negative.
pub fn validate_position(position: f64) -> CastResult<()> {
    if !position.is_finite() || position < 0.0 {
        return Err(CastError::Validation(format!(
            "Position must be a finite number of seconds >= 0, got {}",
            position
        )));
    }
    Ok(())
}

/// Requires a finite duration and clamps it to 1..=86400 seconds.
pub fn clamp_duration(duration_secs: f64) -> CastResult<u32> {
    if !duration_secs.is_finite() {
        return Err(CastError::Validation("Duration must be a finite number.".into()));
    }
    let clamped = duration_secs.trunc().clamp(
        f64::from(MIN_DISPLAY_DURATION_SECS),
        f64::from(MAX_DISPLAY_DURATION_SECS),
    );
    Ok(clamped as u32)
}

/// Announcement text must be non-blank and at most 4000 characters.
pub fn validate_announce_text(text: &str) -> CastResult<()> {
    if text.trim().is_empty() {
        return Err(CastError::Validation("text must be a non-empty string.".into()));
    }
    if text.chars().count() > MAX_ANNOUNCE_TEXT_LEN {
        return Err(CastError::Validation(format!(
            "text too long (max {} chars).",
            MAX_ANNOUNCE_TEXT_LEN
        )));
    }
    Ok(())
}

/// Voice must be a bare model name: ASCII letters, digits, `-` and `_`.
pub fn validate_voice(voice: &str) -> CastResult<()> {
    let valid = !voice.is_empty()
        && voice
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(CastError::Validation(
            "voice must be a simple model name (letters, digits, hyphens, underscores only).".into(),
        ));
    }
    Ok(())
}
