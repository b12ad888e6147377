//! Canonical WAV reading and writing.
//!
//! Only the fixed 44-byte header layout is understood:
//!
//! ```text
//! offset  size  field
//!      0     4  "RIFF"
//!      4     4  file size - 8
//!      8     4  "WAVE"
//!     12     4  "fmt "
//!     16     4  format chunk size (16)
//!     20     2  format tag (1 = PCM)
//!     22     2  channels
//!     24     4  sample rate
//!     28     4  byte rate
//!     32     2  block align
//!     34     2  bits per sample (16)
//!     36     4  "data"
//!     40     4  data size in bytes
//! ```
//!
//! Files with extra chunks (LIST, fact, ...) or any other encoding are rejected
//! with [`EngineError::Format`] rather than parsed on a best-effort basis.

use super::buffer::{try_filled, AudioBuffer, BITS_PER_SAMPLE};
use crate::error::{EngineError, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

/// Size of the canonical header in bytes.
pub const HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

/// Decoded header fields the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WavHeader {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    data_bytes: u32,
}

impl WavHeader {
    fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        expect_tag(raw, 0, b"RIFF")?;
        expect_tag(raw, 8, b"WAVE")?;
        expect_tag(raw, 12, b"fmt ")?;
        expect_tag(raw, 36, b"data")?;

        let fmt_len = le_u32(raw, 16);
        if fmt_len != FMT_CHUNK_LEN {
            return Err(EngineError::format(format!(
                "format chunk is {} bytes, expected {}",
                fmt_len, FMT_CHUNK_LEN
            )));
        }

        let format_tag = le_u16(raw, 20);
        if format_tag != PCM_FORMAT_TAG {
            return Err(EngineError::format(format!(
                "format tag {} is not linear PCM",
                format_tag
            )));
        }

        let header = Self {
            channels: le_u16(raw, 22),
            sample_rate: le_u32(raw, 24),
            bits_per_sample: le_u16(raw, 34),
            data_bytes: le_u32(raw, 40),
        };

        if header.bits_per_sample != BITS_PER_SAMPLE {
            return Err(EngineError::format(format!(
                "{}-bit samples are not supported",
                header.bits_per_sample
            )));
        }
        if header.channels == 0 || header.sample_rate == 0 {
            return Err(EngineError::format("zero channels or sample rate"));
        }
        let block_align = header.channels as u32 * 2;
        if header.data_bytes % block_align != 0 {
            return Err(EngineError::format(format!(
                "data size {} is not a whole number of {}-byte frames",
                header.data_bytes, block_align
            )));
        }

        Ok(header)
    }

    fn for_buffer(buffer: &AudioBuffer) -> Result<Self> {
        let data_bytes = u32::try_from(buffer.len() * 2)
            .ok()
            .filter(|bytes| bytes.checked_add(36).is_some())
            .ok_or_else(|| EngineError::format("buffer too large for a WAV file"))?;

        Ok(Self {
            channels: buffer.channels,
            sample_rate: buffer.sample_rate,
            bits_per_sample: BITS_PER_SAMPLE,
            data_bytes,
        })
    }

    fn encode(&self) -> [u8; HEADER_LEN] {
        let block_align = self.channels * 2;
        let byte_rate = self.sample_rate * block_align as u32;

        let mut raw = [0u8; HEADER_LEN];
        raw[0..4].copy_from_slice(b"RIFF");
        raw[4..8].copy_from_slice(&(self.data_bytes + 36).to_le_bytes());
        raw[8..12].copy_from_slice(b"WAVE");
        raw[12..16].copy_from_slice(b"fmt ");
        raw[16..20].copy_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
        raw[20..22].copy_from_slice(&PCM_FORMAT_TAG.to_le_bytes());
        raw[22..24].copy_from_slice(&self.channels.to_le_bytes());
        raw[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        raw[28..32].copy_from_slice(&byte_rate.to_le_bytes());
        raw[32..34].copy_from_slice(&block_align.to_le_bytes());
        raw[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        raw[36..40].copy_from_slice(b"data");
        raw[40..44].copy_from_slice(&self.data_bytes.to_le_bytes());
        raw
    }
}

fn expect_tag(raw: &[u8], offset: usize, tag: &[u8; 4]) -> Result<()> {
    if &raw[offset..offset + 4] == tag {
        Ok(())
    } else {
        Err(EngineError::format(format!(
            "expected {:?} at offset {}",
            String::from_utf8_lossy(tag),
            offset
        )))
    }
}

fn le_u16(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

fn le_u32(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        raw[offset],
        raw[offset + 1],
        raw[offset + 2],
        raw[offset + 3],
    ])
}

/// Decodes a canonical WAV stream.
///
/// # Errors
///
/// Returns `Format` if the header is missing, truncated or not 16-bit PCM, and
/// `Io` if the sample data cannot be read in full.
pub fn read_wav<R: Read>(mut reader: R) -> Result<AudioBuffer> {
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            EngineError::format("file is shorter than a WAV header")
        } else {
            EngineError::Io(e)
        }
    })?;
    let header = WavHeader::parse(&raw)?;

    let mut bytes = try_filled(header.data_bytes as usize, 0u8)?;
    reader.read_exact(&mut bytes)?;

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    AudioBuffer::new(samples, header.sample_rate, header.channels)
}

/// Encodes a buffer as a canonical WAV stream.
///
/// # Errors
///
/// Returns `Io` on any short write.
pub fn write_wav<W: Write>(mut writer: W, buffer: &AudioBuffer) -> Result<()> {
    let header = WavHeader::for_buffer(buffer)?;
    writer.write_all(&header.encode())?;
    for sample in buffer.samples() {
        writer.write_all(&sample.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Loads a WAV file from disk.
///
/// The returned buffer remembers `path` as its source and has a mix volume
/// of 1.0.
///
/// # Errors
///
/// See [`read_wav`]; failing to open the file is reported as `Io`.
pub fn load<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let buffer = read_wav(BufReader::new(file))?.with_source_path(path);
    tracing::debug!(
        "Decoded {:?}: {} Hz, {} ch, {} frames",
        path,
        buffer.sample_rate,
        buffer.channels,
        buffer.frames()
    );
    Ok(buffer)
}

/// Saves a buffer to disk as a canonical WAV file.
///
/// # Errors
///
/// Returns `Io` if the file cannot be created or fully written.
pub fn save<P: AsRef<Path>>(path: P, buffer: &AudioBuffer) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_wav(BufWriter::new(file), buffer)
}
