//! Media conversion through external tools.
//!
//! `display_image` renders a still image into a looping MP4 with ffmpeg and
//! `announce` synthesises speech with piper. Both write into owner-only
//! temp files that are deleted when the returned [`TempPath`] drops, so the
//! caller gets cleanup on every exit path for free.
//!
//! Tools are always spawned with an explicit argument list, never through a
//! shell.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{CastError, CastResult};

/// Silence prepended to announcements so stream start-up latency does not
/// swallow the first words.
pub const ANNOUNCE_LEAD_IN: Duration = Duration::from_millis(1500);

pub const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";
pub const DEFAULT_PIPER_BIN: &str = "piper";

const USER_VOICE_DIR: &str = ".local/share/piper-voices";
const SYSTEM_VOICE_DIR: &str = "/usr/share/castmasta/voices";

/// Piper voice directory: the per-user one if it exists, else the system one.
pub fn default_voice_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(USER_VOICE_DIR))
        .filter(|dir| dir.exists())
        .unwrap_or_else(|| PathBuf::from(SYSTEM_VOICE_DIR))
}

/// Converts caller content into something a device can stream.
#[async_trait]
pub trait MediaConverter: Send + Sync {
    /// Renders `image` as an H.264 MP4 lasting `duration_secs`.
    async fn image_to_video(&self, image: &Path, duration_secs: u32) -> CastResult<TempPath>;

    /// Synthesises `text` with `voice` into a WAV with a silent lead-in.
    async fn text_to_speech(&self, text: &str, voice: &str) -> CastResult<TempPath>;
}

/// [`MediaConverter`] backed by the ffmpeg and piper executables.
#[derive(Debug, Clone)]
pub struct ProcessConverter {
    ffmpeg_bin: PathBuf,
    piper_bin: PathBuf,
    voice_dir: PathBuf,
}

impl Default for ProcessConverter {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG_BIN, DEFAULT_PIPER_BIN, default_voice_dir())
    }
}

impl ProcessConverter {
    pub fn new(
        ffmpeg_bin: impl Into<PathBuf>,
        piper_bin: impl Into<PathBuf>,
        voice_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            piper_bin: piper_bin.into(),
            voice_dir: voice_dir.into(),
        }
    }
}

#[async_trait]
impl MediaConverter for ProcessConverter {
    async fn image_to_video(&self, image: &Path, duration_secs: u32) -> CastResult<TempPath> {
        let output = owner_only_temp(".mp4")?;

        let mut command = Command::new(&self.ffmpeg_bin);
        command
            .args(["-loop", "1", "-i"])
            .arg(image)
            .args(["-c:v", "libx264", "-t"])
            .arg(duration_secs.to_string())
            .args(["-pix_fmt", "yuv420p", "-y"])
            .arg(&*output)
            .stdin(Stdio::null());

        log::debug!(
            "[Convert] Rendering {} for {}s into {}",
            image.display(),
            duration_secs,
            output.display()
        );
        run_tool(command, "ffmpeg", None).await?;
        Ok(output)
    }

    async fn text_to_speech(&self, text: &str, voice: &str) -> CastResult<TempPath> {
        let output = owner_only_temp(".wav")?;

        let mut command = Command::new(&self.piper_bin);
        command
            .arg("--model")
            .arg(voice)
            .arg("--data-dir")
            .arg(&self.voice_dir)
            .arg("--output_file")
            .arg(&*output)
            .stdin(Stdio::piped());

        log::debug!("[Convert] Synthesising {} chars with {}", text.len(), voice);
        run_tool(command, "piper", Some(text.as_bytes())).await?;

        let wav = tokio::fs::read(&*output)
            .await
            .map_err(|e| CastError::Conversion(format!("cannot read piper output: {}", e)))?;
        let padded = prepend_silence(&wav, ANNOUNCE_LEAD_IN)?;
        tokio::fs::write(&*output, &padded)
            .await
            .map_err(|e| CastError::Conversion(format!("cannot write announcement: {}", e)))?;
        Ok(output)
    }
}

/// Creates an empty temp file readable only by the owner and returns its
/// path, deleted on drop.
fn owner_only_temp(suffix: &str) -> CastResult<TempPath> {
    let file = tempfile::Builder::new()
        .prefix("castmasta-")
        .suffix(suffix)
        .tempfile()
        .map_err(|e| CastError::Conversion(format!("cannot create temp file: {}", e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|e| CastError::Conversion(format!("cannot restrict temp file: {}", e)))?;
    }

    Ok(file.into_temp_path())
}

/// Runs a tool to completion, feeding `input` on stdin, and maps a failed
/// spawn or non-zero exit to [`CastError::Conversion`] with the tool's stderr.
async fn run_tool(mut command: Command, tool: &str, input: Option<&[u8]>) -> CastResult<()> {
    command
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| CastError::Conversion(format!("failed to start {}: {}", tool, e)))?;

    if let Some(input) = input {
        if let Some(mut stdin) = child.stdin.take() {
            // A tool that exits early closes its stdin; its exit status says why.
            if let Err(e) = stdin.write_all(input).await {
                log::debug!("[Convert] {} closed stdin early: {}", tool, e);
            }
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| CastError::Conversion(format!("{} did not finish: {}", tool, e)))?;

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        return Err(CastError::Conversion(format!(
            "{} failed (exit {}): {}",
            tool,
            code,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// PCM layout read from a WAV `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WavFormat {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

impl WavFormat {
    fn block_align(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits_per_sample / 8)
    }
}

fn le_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn le_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Returns a copy of a PCM WAV with `lead_in` of silence before the audio.
///
/// Only the `fmt ` and `data` chunks are carried over.
pub fn prepend_silence(wav: &[u8], lead_in: Duration) -> CastResult<Bytes> {
    let invalid = |what: &str| CastError::Conversion(format!("not a PCM WAV file: {}", what));

    if wav.len() < 12 || &wav[0..4] != b"RIFF" || &wav[8..12] != b"WAVE" {
        return Err(invalid("missing RIFF/WAVE header"));
    }

    let mut fmt_chunk: Option<&[u8]> = None;
    let mut data: Option<&[u8]> = None;
    let mut offset = 12;
    while offset + 8 <= wav.len() {
        let id = &wav[offset..offset + 4];
        let size = le_u32(wav, offset + 4).ok_or_else(|| invalid("truncated chunk"))? as usize;
        let body_start = offset + 8;
        // Streamed writers leave the data size at 0 or u32::MAX; read to the end.
        let unsized_data = id == b"data" && (size == 0 || size == u32::MAX as usize);
        let body_end = if unsized_data {
            wav.len()
        } else {
            body_start.saturating_add(size).min(wav.len())
        };
        let body = &wav[body_start..body_end];
        match id {
            b"fmt " => fmt_chunk = Some(body),
            b"data" => {
                data = Some(body);
                break;
            }
            _ => {}
        }
        offset = body_end + (size & 1);
    }

    let fmt_chunk = fmt_chunk.ok_or_else(|| invalid("no fmt chunk"))?;
    let data = data.ok_or_else(|| invalid("no data chunk"))?;
    let format = WavFormat {
        channels: le_u16(fmt_chunk, 2).ok_or_else(|| invalid("short fmt chunk"))?,
        sample_rate: le_u32(fmt_chunk, 4).ok_or_else(|| invalid("short fmt chunk"))?,
        bits_per_sample: le_u16(fmt_chunk, 14).ok_or_else(|| invalid("short fmt chunk"))?,
    };
    if format.block_align() == 0 {
        return Err(invalid("zero-width samples"));
    }

    let silence_frames = (f64::from(format.sample_rate) * lead_in.as_secs_f64()) as usize;
    let silence_len = silence_frames * format.block_align();
    // 8-bit PCM is unsigned, so its midpoint is 0x80.
    let silence_byte = if format.bits_per_sample == 8 { 0x80 } else { 0x00 };

    let data_len = silence_len + data.len();
    let data_len_u32 =
        u32::try_from(data_len).map_err(|_| invalid("audio too long for a WAV file"))?;
    let padded_fmt = fmt_chunk.len() & 1;
    let riff_len = 4 + (8 + fmt_chunk.len() + padded_fmt) + (8 + data_len);

    let mut out = BytesMut::with_capacity(8 + riff_len);
    out.put_slice(b"RIFF");
    out.put_u32_le(riff_len as u32);
    out.put_slice(b"WAVE");

    out.put_slice(b"fmt ");
    out.put_u32_le(fmt_chunk.len() as u32);
    out.put_slice(fmt_chunk);
    if padded_fmt == 1 {
        out.put_u8(0);
    }

    out.put_slice(b"data");
    out.put_u32_le(data_len_u32);
    out.put_bytes(silence_byte, silence_len);
    out.put_slice(data);

    Ok(out.freeze())
}
