// Integration tests for WAV decoding and the file capture backend
//
// These tests verify that WAV files decode to mono f32 and replay as
// fixed-size capture blocks on a deterministic clock.

mod common;

use anyhow::Result;
use tempfile::TempDir;
use voice_relay::audio::{AudioBackend, AudioBackendConfig, AudioFile, WavFileBackend};

fn backend_config(sample_rate: u32, block_size: usize) -> AudioBackendConfig {
    AudioBackendConfig {
        sample_rate,
        block_size,
        realtime: false,
    }
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("speech.wav");
    common::write_speech_wav(&path, 24000, 500, 500);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 24000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 24000);
    assert!((audio.duration_seconds - 1.0).abs() < 1e-9);
    assert!(audio.path.contains("speech.wav"));

    // Tone first, digital silence after
    assert!(audio.samples[..12000].iter().any(|s| s.abs() > 0.4));
    assert!(audio.samples[12000..].iter().all(|s| *s == 0.0));

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let result = AudioFile::open("/nonexistent/path/to/audio.wav");
    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_stereo_is_averaged_to_mono() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("stereo.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 24000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;
    for _ in 0..100 {
        writer.write_sample(16384i16)?;
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.channels, 2);
    assert_eq!(audio.samples.len(), 100);
    assert!(audio.samples.iter().all(|s| (s - 0.25).abs() < 1e-4));

    Ok(())
}

#[tokio::test]
async fn test_backend_replays_blocks_with_trailing_silence() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("short.wav");
    common::write_speech_wav(&path, 24000, 100, 0);

    let mut backend = WavFileBackend::open(&path, backend_config(24000, 2400))?;
    let mut rx = backend.start().await?;
    assert_eq!(backend.name(), "wav-file");

    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }

    // 100 ms of audio plus 2000 ms of padding, 100 ms per block
    assert_eq!(frames.len(), 21);
    assert!(frames.iter().all(|f| f.samples.len() == 2400));
    let timestamps: Vec<u64> = frames.iter().map(|f| f.timestamp_ms).collect();
    assert_eq!(timestamps[..3], [0, 100, 200]);
    assert!(frames[0].rms() > 0.1);
    assert!(frames[1..].iter().all(|f| f.rms() == 0.0));
    assert!(!backend.is_capturing());

    Ok(())
}

#[tokio::test]
async fn test_backend_rejects_second_start_and_stops() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("long.wav");
    common::write_speech_wav(&path, 24000, 1000, 1000);

    let mut backend = WavFileBackend::open(&path, AudioBackendConfig::default())?;
    let _rx = backend.start().await?;
    assert!(backend.is_capturing());
    assert!(backend.start().await.is_err());

    backend.stop().await?;
    assert!(!backend.is_capturing());

    Ok(())
}

#[test]
fn test_backend_rejects_sample_rate_mismatch() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("narrowband.wav");
    common::write_speech_wav(&path, 16000, 100, 0);

    let err = WavFileBackend::open(&path, backend_config(24000, 4096))
        .err()
        .expect("mismatched rate must be rejected");
    assert!(err.to_string().contains("16000Hz"));

    Ok(())
}
