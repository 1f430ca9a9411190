use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use thiserror::Error;

/// Errors raised while reading an audio file.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read WAV {path}: {source}")]
    Wav { path: PathBuf, source: hound::Error },
    #[error("Failed to decode {path}: {source}")]
    Symphonia {
        path: PathBuf,
        source: SymphoniaError,
    },
    #[error("No decodable audio track in {0}")]
    NoTrack(PathBuf),
    #[error("Missing {what} for {path}")]
    MissingParameter { path: PathBuf, what: &'static str },
}

/// Interleaved `i16` samples as they come out of a container.
pub(crate) struct RawAudio {
    pub(crate) samples: Vec<i16>,
    pub(crate) sample_rate: u32,
    pub(crate) channels: u16,
}

impl RawAudio {
    /// Split interleaved samples into one buffer per channel.
    pub(crate) fn deinterleave(&self) -> Vec<Vec<i16>> {
        let channels = self.channels.max(1) as usize;
        let frames = self.samples.len() / channels;
        let mut out = vec![Vec::with_capacity(frames); channels];
        for frame in self.samples.chunks_exact(channels) {
            for (channel, &sample) in out.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        out
    }
}

/// Decode `path`, stopping after `max_seconds` when given.
pub(crate) fn decode_file(path: &Path, max_seconds: Option<f32>) -> Result<RawAudio, DecodeError> {
    let is_wav = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
    if is_wav {
        // Fall back to symphonia for WAV variants hound does not understand.
        match decode_with_hound(path, max_seconds) {
            Ok(audio) => return Ok(audio),
            Err(err) => tracing::debug!("hound could not read {}: {err}", path.display()),
        }
    }
    decode_with_symphonia(path, max_seconds)
}

fn sample_limit(max_seconds: Option<f32>, sample_rate: u32, channels: u16) -> Option<usize> {
    max_seconds.filter(|limit| *limit > 0.0).map(|limit| {
        let frames = (limit * sample_rate as f32).ceil().max(1.0) as usize;
        frames.saturating_mul(channels.max(1) as usize)
    })
}

fn decode_with_hound(path: &Path, max_seconds: Option<f32>) -> Result<RawAudio, DecodeError> {
    let wav_error = |source| DecodeError::Wav {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = hound::WavReader::open(path).map_err(wav_error)?;
    let spec = reader.spec();
    let limit = sample_limit(max_seconds, spec.sample_rate, spec.channels).unwrap_or(usize::MAX);
    let samples = match spec.sample_format {
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => {
            let shift = 16 - spec.bits_per_sample as u32;
            reader
                .samples::<i16>()
                .take(limit)
                .map(|s| s.map(|v| v << shift))
                .collect::<Result<Vec<_>, _>>()
        }
        hound::SampleFormat::Int => {
            let shift = spec.bits_per_sample as u32 - 16;
            reader
                .samples::<i32>()
                .take(limit)
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<Result<Vec<_>, _>>()
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .take(limit)
            .map(|s| s.map(float_to_i16))
            .collect::<Result<Vec<_>, _>>(),
    }
    .map_err(wav_error)?;
    Ok(RawAudio {
        samples,
        sample_rate: spec.sample_rate.max(1),
        channels: spec.channels.max(1),
    })
}

fn decode_with_symphonia(path: &Path, max_seconds: Option<f32>) -> Result<RawAudio, DecodeError> {
    let symphonia_error = |source| DecodeError::Symphonia {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(|source| DecodeError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(symphonia_error)?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| DecodeError::NoTrack(path.to_path_buf()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::MissingParameter {
            path: path.to_path_buf(),
            what: "sample rate",
        })?;
    let channels = codec_params
        .channels
        .ok_or_else(|| DecodeError::MissingParameter {
            path: path.to_path_buf(),
            what: "channel layout",
        })?
        .count() as u16;
    let max_samples = sample_limit(max_seconds, sample_rate, channels);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(symphonia_error)?;

    let mut samples = Vec::new();
    loop {
        if max_samples.is_some_and(|limit| samples.len() >= limit) {
            break;
        }
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(err) => return Err(symphonia_error(err)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            Err(SymphoniaError::DecodeError(err)) => {
                tracing::debug!("Skipping corrupt packet in {}: {err}", path.display());
                continue;
            }
            Err(err) => return Err(symphonia_error(err)),
        };
        let spec = *audio_buf.spec();
        let mut sample_buf = SampleBuffer::<i16>::new(audio_buf.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        samples.extend_from_slice(sample_buf.samples());
    }
    if let Some(limit) = max_samples {
        samples.truncate(limit);
    }

    Ok(RawAudio {
        samples,
        sample_rate: sample_rate.max(1),
        channels: channels.max(1),
    })
}

fn float_to_i16(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::tempdir;

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn stereo_wav_deinterleaves_into_channels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, &[1, -1, 2, -2, 3, -3]);
        let raw = decode_file(&path, None).unwrap();
        assert_eq!(raw.sample_rate, 8_000);
        assert_eq!(raw.deinterleave(), vec![vec![1, 2, 3], vec![-1, -2, -3]]);
    }

    #[test]
    fn limit_truncates_decoded_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_wav(&path, 1, &vec![7; 16_000]);
        let raw = decode_file(&path, Some(0.5)).unwrap();
        assert_eq!(raw.samples.len(), 4_000);
    }

    #[test]
    fn float_wav_is_scaled_to_i16() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for sample in [0.0_f32, 0.5, -1.0] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        let raw = decode_file(&path, None).unwrap();
        assert_eq!(raw.samples, vec![0, 16_384, -32_767]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = decode_file(&dir.path().join("absent.mp3"), None).err().unwrap();
        assert!(matches!(err, DecodeError::Open { .. }));
    }
}
