//! WAV handling for audio utterances

use std::io::Cursor;

use crate::{Error, Result};

/// Sample rate the STT engines expect
pub const SAMPLE_RATE: u32 = 16000;

/// Header facts about a WAV payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub duration_ms: u64,
}

/// Read the WAV header
///
/// # Errors
///
/// Returns `Error::Audio` if the bytes are not a readable WAV file
pub fn inspect_wav(bytes: &[u8]) -> Result<WavInfo> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let frames = u64::from(reader.duration());
    let duration_ms = if spec.sample_rate == 0 {
        0
    } else {
        frames * 1000 / u64::from(spec.sample_rate)
    };

    Ok(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        duration_ms,
    })
}

/// Accept audio that is a WAV file of at least `min_duration_ms`
///
/// # Errors
///
/// Returns `Error::InvalidInput` for unreadable or too-short audio
pub fn validate_wav(bytes: &[u8], min_duration_ms: u64) -> Result<WavInfo> {
    let info = inspect_wav(bytes).map_err(|e| Error::InvalidInput(e.to_string()))?;
    if info.duration_ms < min_duration_ms {
        return Err(Error::InvalidInput(format!(
            "audio is {}ms, need at least {min_duration_ms}ms",
            info.duration_ms
        )));
    }
    Ok(info)
}

/// Encode mono f32 samples as 16-bit PCM WAV
///
/// # Errors
///
/// Returns `Error::Audio` if encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;
        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
