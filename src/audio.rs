//! Mono PCM buffers and their WAV encoding.

use std::io::Cursor;

use crate::error::SynthesisError;

/// Sample rate produced by the codec.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Mono audio as normalized `f32` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn silence(seconds: f32, sample_rate: u32) -> Self {
        let len = (seconds.max(0.0) * sample_rate as f32).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Join clips with `gap_secs` of silence between consecutive clips.
    ///
    /// Empty clips are skipped. All remaining clips must share one sample rate.
    pub fn concat(clips: Vec<AudioBuffer>, gap_secs: f32) -> Result<AudioBuffer, SynthesisError> {
        let mut clips = clips.into_iter().filter(|c| !c.is_empty());
        let Some(first) = clips.next() else {
            return Err(SynthesisError::NoAudio);
        };

        let rate = first.sample_rate;
        let gap = AudioBuffer::silence(gap_secs, rate).samples;
        let mut samples = first.samples;
        for clip in clips {
            if clip.sample_rate != rate {
                return Err(SynthesisError::SampleRateMismatch {
                    expected: rate,
                    actual: clip.sample_rate,
                });
            }
            samples.extend_from_slice(&gap);
            samples.extend(clip.samples);
        }
        Ok(AudioBuffer::new(samples, rate))
    }

    /// Encode as 16-bit PCM mono WAV.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, SynthesisError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut out = Vec::with_capacity(44 + self.samples.len() * 2);
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec).map_err(audio_err)?;
            for sample in &self.samples {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer.write_sample(value).map_err(audio_err)?;
            }
            writer.finalize().map_err(audio_err)?;
        }
        Ok(out)
    }

    /// Decode a WAV file, downmixing multi-channel audio to mono.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<AudioBuffer, SynthesisError> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(audio_err)?;
        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(audio_err)?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(audio_err)?
            }
        };

        let channels = usize::from(spec.channels.max(1));
        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };
        Ok(AudioBuffer::new(samples, spec.sample_rate))
    }
}

fn audio_err(err: hound::Error) -> SynthesisError {
    SynthesisError::Audio(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_length_follows_sample_rate() {
        let gap = AudioBuffer::silence(0.15, DEFAULT_SAMPLE_RATE);
        assert_eq!(gap.samples.len(), 3600);
        assert!(gap.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn concat_inserts_gaps_between_clips_only() {
        let a = AudioBuffer::new(vec![0.5; 10], 100);
        let b = AudioBuffer::new(vec![-0.5; 5], 100);
        let joined = AudioBuffer::concat(vec![a, AudioBuffer::new(vec![], 100), b], 0.1).unwrap();
        assert_eq!(joined.samples.len(), 10 + 10 + 5);
        assert_eq!(joined.samples[10], 0.0);
        assert_eq!(joined.samples[24], -0.5);
    }

    #[test]
    fn concat_of_nothing_is_an_error() {
        let err = AudioBuffer::concat(vec![AudioBuffer::new(vec![], 100)], 0.1).unwrap_err();
        assert!(matches!(err, SynthesisError::NoAudio));
    }

    #[test]
    fn concat_rejects_mixed_rates() {
        let a = AudioBuffer::new(vec![0.1; 4], 16_000);
        let b = AudioBuffer::new(vec![0.1; 4], 24_000);
        assert!(matches!(
            AudioBuffer::concat(vec![a, b], 0.0),
            Err(SynthesisError::SampleRateMismatch { expected: 16_000, actual: 24_000 })
        ));
    }

    #[test]
    fn wav_encoding_preserves_shape() {
        let clip = AudioBuffer::new(vec![0.0, 0.5, -0.5, 1.0], DEFAULT_SAMPLE_RATE);
        let bytes = clip.to_wav_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");

        let decoded = AudioBuffer::from_wav_bytes(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(decoded.samples.len(), 4);
        assert!((decoded.samples[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn garbage_is_not_audio() {
        assert!(matches!(
            AudioBuffer::from_wav_bytes(b"not a wav file"),
            Err(SynthesisError::Audio(_))
        ));
    }
}
