//! Mono 16-bit PCM WAV encoding and decoding at the generator's native rate.

use std::fs;
use std::io::{Cursor, Seek, Write};
use std::path::Path;

use crate::error::{Result, SynthError};

/// Sample rate every artifact is written at. The codec never resamples.
pub const SAMPLE_RATE: u32 = 16_000;

const I16_MAX_F32: f32 = i16::MAX as f32;

/// Largest absolute sample value, `0.0` for empty or silent buffers.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, &s| m.max(s.abs()))
}

/// Scale so the loudest sample reaches full scale. Silent buffers are left
/// untouched.
pub fn normalize_in_place(samples: &mut [f32]) {
    let m = peak(samples);
    if m > 0.0 {
        for s in samples.iter_mut() {
            *s /= m;
        }
    }
}

/// Peak-normalized copy of `samples`.
pub fn peak_normalize(samples: &[f32]) -> Vec<f32> {
    let mut out = samples.to_vec();
    normalize_in_place(&mut out);
    out
}

fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn into_io(e: hound::Error) -> std::io::Error {
    match e {
        hound::Error::IoError(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::Other, other),
    }
}

/// Write `samples` into `sink` as a WAV container, normalizing first when
/// asked to.
pub fn write_wav<W: Write + Seek>(
    sink: W,
    samples: &[f32],
    normalize: bool,
) -> std::io::Result<()> {
    let scale = if normalize {
        let m = peak(samples);
        if m > 0.0 { 1.0 / m } else { 1.0 }
    } else {
        1.0
    };

    let mut writer = hound::WavWriter::new(sink, wav_spec()).map_err(into_io)?;
    for &s in samples {
        let v = ((s * scale).clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
        writer.write_sample(v).map_err(into_io)?;
    }
    writer.finalize().map_err(into_io)
}

/// Encode to an in-memory WAV file.
pub fn encode_wav_bytes(samples: &[f32], normalize: bool) -> Result<Vec<u8>> {
    // WAV header (44 bytes) + 2 bytes per sample
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + samples.len() * 2));
    write_wav(&mut cursor, samples, normalize)
        .map_err(|e| SynthError::storage("<memory>", e))?;
    Ok(cursor.into_inner())
}

/// Write a WAV file, creating missing parent directories and replacing any
/// existing file.
pub fn write_wav_file<P: AsRef<Path>>(path: P, samples: &[f32], normalize: bool) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SynthError::storage(parent, e))?;
    }
    let file = fs::File::create(path).map_err(|e| SynthError::storage(path, e))?;
    write_wav(std::io::BufWriter::new(file), samples, normalize)
        .map_err(|e| SynthError::storage(path, e))
}

/// Decode WAV bytes into mono samples in [-1, 1] and the file's sample rate.
/// Multi-channel input is averaged down to mono.
pub fn decode_wav_bytes(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| SynthError::InvalidInput(format!("failed to parse WAV: {e}")))?;
    read_samples(reader)
}

pub fn read_wav_file<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
    let path = path.as_ref();
    let reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) => SynthError::storage(path, io),
        other => SynthError::InvalidInput(format!(
            "failed to parse WAV {}: {other}",
            path.display()
        )),
    })?;
    read_samples(reader)
}

fn read_samples<R: std::io::Read>(mut reader: hound::WavReader<R>) -> Result<(Vec<f32>, u32)> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let decoded: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = ((1i64 << (spec.bits_per_sample.max(2) - 1)) - 1) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect()
        }
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
    };
    let interleaved =
        decoded.map_err(|e| SynthError::InvalidInput(format!("corrupt WAV data: {e}")))?;

    let samples = if channels > 1 {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        interleaved
    };

    Ok((samples, spec.sample_rate))
}
