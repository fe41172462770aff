//! Recording hand-off.
//!
//! Captured PCM is written as a mono 16-bit WAV and transcoded to MP3 by an
//! external `ffmpeg`. The WAV is removed once the transcode succeeds and kept
//! otherwise.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use streamer_settings::RecordingSettings;
use tokio::process::Command;
use tracing::{debug, warn};

const WAV_HEADER_LEN: usize = 44;
const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Encode raw little-endian 16-bit mono PCM as a WAV file.
pub fn wav_bytes(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX);

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&data_len.saturating_add(36).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Writes session recordings to disk.
#[derive(Clone, Debug)]
pub struct Recorder {
    dir: PathBuf,
    ffmpeg_path: String,
    sample_rate: u32,
}

impl Recorder {
    /// Create a recorder writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>, ffmpeg_path: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            dir: dir.into(),
            ffmpeg_path: ffmpeg_path.into(),
            sample_rate,
        }
    }

    /// Build from settings, or `None` when recordings are disabled.
    pub fn from_settings(settings: &RecordingSettings, sample_rate: u32) -> Option<Self> {
        settings
            .enabled
            .then(|| Self::new(&settings.dir, &settings.ffmpeg_path, sample_rate))
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `<name>.wav`, transcode it to `<name>.mp3`, and return the path
    /// of the file that remains.
    pub async fn persist(&self, name: &str, pcm: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let wav = self.dir.join(format!("{name}.wav"));
        let mp3 = self.dir.join(format!("{name}.mp3"));
        tokio::fs::write(&wav, wav_bytes(pcm, self.sample_rate)).await?;

        let status = Command::new(&self.ffmpeg_path)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(&wav)
            .arg(&mp3)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                tokio::fs::remove_file(&wav).await?;
                debug!(path = %mp3.display(), "recording transcoded");
                Ok(mp3)
            }
            Ok(status) => {
                warn!(%status, path = %wav.display(), "transcoder failed, keeping wav");
                Ok(wav)
            }
            Err(error) => {
                warn!(%error, path = %wav.display(), "transcoder unavailable, keeping wav");
                Ok(wav)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_layout() {
        let wav = wav_bytes(&[1, 0, 2, 0], 44_100);
        assert_eq!(wav.len(), WAV_HEADER_LEN + 4);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 40);
        assert_eq!(&wav[8..16], b"WAVEfmt ");
        assert_eq!(u16::from_le_bytes(wav[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 44_100);
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 88_200);
        assert_eq!(u16::from_le_bytes(wav[34..36].try_into().unwrap()), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 4);
        assert_eq!(&wav[44..], &[1, 0, 2, 0]);
    }

    #[test]
    fn disabled_settings_yield_no_recorder() {
        let settings = RecordingSettings {
            enabled: false,
            ..RecordingSettings::default()
        };
        assert!(Recorder::from_settings(&settings, 16_000).is_none());
        let rec = Recorder::from_settings(&RecordingSettings::default(), 16_000).unwrap();
        assert_eq!(rec.dir(), Path::new("recordings"));
    }

    #[tokio::test]
    async fn failing_transcoder_keeps_wav() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path().join("rec"), "false", 16_000);
        let path = rec.persist("s1", &[0, 0]).await.unwrap();
        assert_eq!(path, dir.path().join("rec/s1.wav"));
        assert_eq!(std::fs::read(&path).unwrap().len(), WAV_HEADER_LEN + 2);
    }

    #[tokio::test]
    async fn missing_transcoder_keeps_wav() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), "/nonexistent/ffmpeg", 16_000);
        let path = rec.persist("s2", &[]).await.unwrap();
        assert!(path.ends_with("s2.wav"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn successful_transcoder_removes_wav() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), "true", 16_000);
        let path = rec.persist("s3", &[0, 0]).await.unwrap();
        assert_eq!(path, dir.path().join("s3.mp3"));
        assert!(!dir.path().join("s3.wav").exists());
    }
}
