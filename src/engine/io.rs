//! Sample transports for rvc-infer
//!
//! The host passes samples as decimal text, either one command-line argument
//! per sample or as whitespace-separated text on stdin, and reads the output
//! back as one line of space-separated decimals. WAV files are supported on
//! both sides for callers that would rather exchange audio files.

use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, warn};

use crate::error::{Result, RvcError};

/// Sample rate used for WAV output when nothing better is known
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Where the input samples come from
#[derive(Debug, Clone, PartialEq)]
pub enum SampleSource {
    /// Samples already parsed from the command line
    Args(Vec<f32>),
    /// Whitespace-separated decimal text on stdin
    Stdin,
    /// A WAV file, downmixed to mono
    Wav(PathBuf),
}

/// Input samples plus the sample rate they were recorded at, if known
#[derive(Debug, Clone, PartialEq)]
pub struct InputAudio {
    pub samples: Vec<f32>,
    pub sample_rate: Option<u32>,
}

impl SampleSource {
    /// Read the samples this source describes.
    pub fn read(&self) -> Result<InputAudio> {
        match self {
            SampleSource::Args(samples) => Ok(InputAudio {
                samples: samples.clone(),
                sample_rate: None,
            }),
            SampleSource::Stdin => Ok(InputAudio {
                samples: read_samples_from(io::stdin().lock())?,
                sample_rate: None,
            }),
            SampleSource::Wav(path) => import_wav(path),
        }
    }
}

/// WAV output configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WavFormat {
    /// Sample rate (default: 44100)
    pub sample_rate: u32,
    /// Bit depth: 16, 24, or 32 float (default: 16)
    pub bit_depth: u16,
}

impl Default for WavFormat {
    fn default() -> Self {
        WavFormat {
            sample_rate: DEFAULT_SAMPLE_RATE,
            bit_depth: 16,
        }
    }
}

impl WavFormat {
    /// 16-bit PCM at the given rate
    pub fn pcm16(sample_rate: u32) -> Self {
        WavFormat {
            sample_rate,
            bit_depth: 16,
        }
    }
}

/// Parse decimal sample literals in order.
///
/// # Errors
/// * `InvalidSample` - a token is not a floating-point literal
pub fn parse_samples<I, S>(tokens: I) -> Result<Vec<f32>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .enumerate()
        .map(|(index, token)| {
            let token = token.as_ref();
            token
                .trim()
                .parse::<f32>()
                .map_err(|_| RvcError::InvalidSample {
                    index,
                    value: token.to_string(),
                })
        })
        .collect()
}

/// Read whitespace-separated samples from a text stream.
pub fn read_samples_from<R: Read>(mut reader: R) -> Result<Vec<f32>> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    parse_samples(text.split_whitespace())
}

/// Format samples as one line of space-separated decimals.
///
/// Each value is the shortest text that parses back to the same `f32`, and
/// whole numbers keep their decimal point (`1.0`, not `1`). Non-finite values
/// print as `nan`, `inf` and `-inf`.
pub fn format_samples(samples: &[f32]) -> String {
    let mut line = String::with_capacity(samples.len() * 10);
    for (i, sample) in samples.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        if sample.is_nan() {
            line.push_str("nan");
        } else {
            // Writing to a String cannot fail; infinities print as `inf`
            let _ = write!(line, "{:?}", sample);
        }
    }
    line
}

/// Write the sample line, newline terminated, and flush.
pub fn write_samples<W: Write>(mut writer: W, samples: &[f32]) -> io::Result<()> {
    writeln!(writer, "{}", format_samples(samples))?;
    writer.flush()
}

/// Read a WAV file into a mono sample sequence.
///
/// Multi-channel files are downmixed by averaging each frame.
///
/// # Errors
/// * `InvalidAudio` - the file cannot be opened or decoded as WAV
/// * `EmptyInput` - the file holds no samples
pub fn import_wav(path: &Path) -> Result<InputAudio> {
    let reader = WavReader::open(path).map_err(|e| RvcError::InvalidAudio {
        reason: format!("Failed to open WAV file '{}': {}", path.display(), e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;

    if interleaved.is_empty() {
        return Err(RvcError::EmptyInput);
    }

    let samples = if channels > 1 {
        warn!(
            "Downmixing {}-channel audio from {} to mono",
            channels,
            path.display()
        );
        downmix(&interleaved, channels)
    } else {
        interleaved
    };

    debug!(
        "Read {} samples at {} Hz from {}",
        samples.len(),
        spec.sample_rate,
        path.display()
    );

    Ok(InputAudio {
        samples,
        sample_rate: Some(spec.sample_rate),
    })
}

/// Write mono samples to a WAV file.
pub fn export_wav(samples: &[f32], path: &Path, format: &WavFormat) -> Result<()> {
    if !matches!(format.bit_depth, 16 | 24 | 32) {
        return Err(RvcError::InvalidAudio {
            reason: format!(
                "{}-bit output (only 16, 24, 32 supported)",
                format.bit_depth
            ),
            source: None,
        });
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bit_depth,
        sample_format: if format.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let wav_err = |e: hound::Error| RvcError::InvalidAudio {
        reason: format!("Failed to write WAV file '{}': {}", path.display(), e),
        source: Some(Box::new(e)),
    };

    if format.bit_depth != 32 && samples.iter().any(|s| s.abs() > 1.0) {
        warn!("Output exceeds [-1, 1] and will be clipped in {}", path.display());
    }

    let mut writer = WavWriter::create(path, spec).map_err(wav_err)?;

    match format.bit_depth {
        16 => {
            for sample in samples {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(scaled).map_err(wav_err)?;
            }
        }
        24 => {
            for sample in samples {
                // 24-bit stored as i32 in hound
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer.write_sample(scaled).map_err(wav_err)?;
            }
        }
        _ => {
            for sample in samples {
                writer.write_sample(*sample).map_err(wav_err)?;
            }
        }
    }

    writer.finalize().map_err(wav_err)?;
    Ok(())
}

// ============================================================================
// Internal helper functions
// ============================================================================

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let decode_err = |e: hound::Error| RvcError::InvalidAudio {
        reason: format!("Failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(Box::new(e)),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(decode_err),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                // 24-bit stored as i32 in hound
                24 => 8388608.0,
                32 => 2147483648.0,
                _ => {
                    return Err(RvcError::InvalidAudio {
                        reason: format!("{}-bit integer audio", bits_per_sample),
                        source: None,
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(decode_err)
        }
    }
}

/// Average interleaved frames down to one channel
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
