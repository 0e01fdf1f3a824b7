//! Compression-backed drivers.
//!
//! Each driver compresses the input file into an anonymous temporary file
//! first, so the stored (compressed) length is known before the item header
//! is written.  Memory use stays bounded by the codecs' internal buffers.

use log::debug;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read, Seek, Write};

use super::{ContentSource, ReadSource, SourceDriver, SourceOptions};
use crate::error::NarResult;

/// Compression code stored in the archive header's `compression` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Zstd,
    Lz4,
    Brotli,
}

impl CompressionType {
    #[inline]
    pub fn code(self) -> u64 {
        match self {
            CompressionType::None   => 0,
            CompressionType::Zstd   => 1,
            CompressionType::Lz4    => 2,
            CompressionType::Brotli => 3,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Zstd),
            2 => Some(CompressionType::Lz4),
            3 => Some(CompressionType::Brotli),
            _ => None,
        }
    }

    /// Name used on the command line and in listings.
    pub fn name(self) -> &'static str {
        match self {
            CompressionType::None   => "none",
            CompressionType::Zstd   => "zstd",
            CompressionType::Lz4    => "lz4",
            CompressionType::Brotli => "brotli",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none"   => Some(CompressionType::None),
            "zstd"   => Some(CompressionType::Zstd),
            "lz4"    => Some(CompressionType::Lz4),
            "brotli" => Some(CompressionType::Brotli),
            _        => None,
        }
    }
}

/// Run `encode` from the input file into a temporary file and hand the
/// result back as a source sized by its stored length.
fn stage<F>(opts: &SourceOptions<'_>, encode: F) -> NarResult<Box<dyn ContentSource>>
where
    F: FnOnce(&mut File, &mut File) -> io::Result<()>,
{
    let mut input  = File::open(opts.input)?;
    let mut staged = tempfile::tempfile()?;
    encode(&mut input, &mut staged)?;
    staged.flush()?;
    let stored = staged.stream_position()?;
    staged.rewind()?;
    debug!(
        "staged {} as {stored} compressed bytes (original {})",
        opts.input.display(),
        input.metadata()?.len()
    );
    Ok(Box::new(ReadSource::new(staged, stored).mark_compressed()))
}

// ── Zstd ─────────────────────────────────────────────────────────────────────

pub struct ZstdDriver;

impl SourceDriver for ZstdDriver {
    fn compression(&self) -> CompressionType { CompressionType::Zstd }

    fn init(&self, opts: &SourceOptions<'_>) -> NarResult<Box<dyn ContentSource>> {
        let level = opts.level;
        stage(opts, |input, out| zstd::stream::copy_encode(input, out, level))
    }

    fn decoder<'a>(&self, stored: Box<dyn Read + 'a>) -> NarResult<Box<dyn Read + 'a>> {
        Ok(Box::new(zstd::stream::read::Decoder::new(stored)?))
    }
}

// ── LZ4 (frame format) ───────────────────────────────────────────────────────

pub struct Lz4Driver;

impl SourceDriver for Lz4Driver {
    fn compression(&self) -> CompressionType { CompressionType::Lz4 }

    fn init(&self, opts: &SourceOptions<'_>) -> NarResult<Box<dyn ContentSource>> {
        stage(opts, |input, out| {
            let mut enc = lz4_flex::frame::FrameEncoder::new(out);
            io::copy(input, &mut enc)?;
            enc.finish().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Ok(())
        })
    }

    fn decoder<'a>(&self, stored: Box<dyn Read + 'a>) -> NarResult<Box<dyn Read + 'a>> {
        Ok(Box::new(lz4_flex::frame::FrameDecoder::new(stored)))
    }
}

// ── Brotli ───────────────────────────────────────────────────────────────────

pub struct BrotliDriver;

impl SourceDriver for BrotliDriver {
    fn compression(&self) -> CompressionType { CompressionType::Brotli }

    fn init(&self, opts: &SourceOptions<'_>) -> NarResult<Box<dyn ContentSource>> {
        let quality = opts.level.clamp(0, 11) as u32;
        stage(opts, |input, out| brotli_encode(input, out, quality))
    }

    fn decoder<'a>(&self, stored: Box<dyn Read + 'a>) -> NarResult<Box<dyn Read + 'a>> {
        Ok(Box::new(brotli::Decompressor::new(stored, 4096)))
    }
}

/// Encode `input` into `out`.  The stream is finished by `into_inner`, which
/// swallows write errors, so they are caught on the way to `out` instead.
fn brotli_encode<W: Write>(input: &mut dyn Read, out: W, quality: u32) -> io::Result<()> {
    let mut w = brotli::CompressorWriter::new(Latched::new(out), 4096, quality, 22);
    io::copy(input, &mut w)?;
    w.into_inner().finish()
}

/// Writer that keeps the first error it returned.
struct Latched<W> {
    inner: W,
    error: Option<io::Error>,
}

impl<W: Write> Latched<W> {
    fn new(inner: W) -> Self { Self { inner, error: None } }

    fn latch(&mut self, e: io::Error) -> io::Error {
        let reported = io::Error::new(e.kind(), e.to_string());
        self.error.get_or_insert(e);
        reported
    }

    fn finish(mut self) -> io::Result<()> {
        match self.error.take() {
            Some(e) => Err(e),
            None    => self.inner.flush(),
        }
    }
}

impl<W: Write> Write for Latched<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).map_err(|e| self.latch(e))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(|e| self.latch(e))
    }
}
