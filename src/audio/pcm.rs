//! Signed 16-bit little-endian PCM conversions and their base64 wire form

use base64::Engine;

/// Clamp to `[-1, 1]` and scale asymmetrically so both extremes are reachable.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// A trailing odd byte is ignored.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Float samples to the base64 payload of a `mediaChunks` entry
pub fn encode_utterance(samples: &[f32]) -> String {
    let pcm = float_to_pcm16(samples);
    base64::engine::general_purpose::STANDARD.encode(pcm16_to_bytes(&pcm))
}

/// Base64 PCM payload of an `audioChunk` frame to float samples
pub fn decode_chunk(data: &str) -> Result<Vec<f32>, base64::DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
    Ok(pcm16_to_float(&bytes_to_pcm16(&bytes)))
}
