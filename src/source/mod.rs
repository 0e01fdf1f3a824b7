//! Content sources: where segment 2 bytes come from.
//!
//! The writer never buffers a whole entry.  It asks a [`ContentSource`] for
//! the total size (written into `length_2`) and then pulls chunks until that
//! many bytes have been produced.
//!
//! A [`SourceDriver`] builds sources from [`SourceOptions`] and knows how to
//! undo its own transformation on the read side.  Drivers are looked up by
//! the compression code stored in the archive header through a
//! [`DriverRegistry`], which the embedding application populates at startup.
//!
//! # Stored length
//! `length_2` is always the number of bytes stored in the archive.  For a
//! compression driver that is the compressed length, so the reader's offset
//! arithmetic never depends on the driver.

pub mod compress;

use log::debug;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::{NarError, NarResult};

pub use compress::{BrotliDriver, CompressionType, Lz4Driver, ZstdDriver};

// ── Source trait ─────────────────────────────────────────────────────────────

pub trait ContentSource {
    /// Total number of bytes this source will produce.
    fn size(&mut self) -> NarResult<u64>;

    /// Fill up to `buf.len()` bytes.  `Ok(0)` means end of data.
    fn next_chunk(&mut self, buf: &mut [u8]) -> NarResult<usize>;

    /// Release whatever the source holds.  Calling it twice is harmless.
    fn close(&mut self) -> NarResult<()> { Ok(()) }

    /// Whether the produced bytes went through a compression driver.
    fn compressed(&self) -> bool { false }
}

/// A source over any reader whose length is known up front.
pub struct ReadSource<R: Read> {
    inner:      Option<R>,
    len:        u64,
    compressed: bool,
}

pub type FileSource = ReadSource<File>;

impl<R: Read> ReadSource<R> {
    pub fn new(inner: R, len: u64) -> Self {
        Self { inner: Some(inner), len, compressed: false }
    }

    pub(crate) fn mark_compressed(mut self) -> Self {
        self.compressed = true;
        self
    }
}

impl FileSource {
    /// Open `path` and size it from its metadata.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let len  = file.metadata()?.len();
        Ok(Self::new(file, len))
    }
}

impl<'a> ReadSource<&'a [u8]> {
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::new(data, data.len() as u64)
    }
}

impl<R: Read> ContentSource for ReadSource<R> {
    fn size(&mut self) -> NarResult<u64> { Ok(self.len) }

    fn next_chunk(&mut self, buf: &mut [u8]) -> NarResult<usize> {
        let Some(inner) = self.inner.as_mut() else { return Ok(0) };
        loop {
            match inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) -> NarResult<()> {
        self.inner = None;
        Ok(())
    }

    fn compressed(&self) -> bool { self.compressed }
}

// ── Drivers ──────────────────────────────────────────────────────────────────

/// Inputs a driver needs to build a source.
#[derive(Debug, Clone)]
pub struct SourceOptions<'a> {
    pub input: &'a Path,
    /// Driver-specific level; ignored by drivers without levels.
    pub level: i32,
}

pub trait SourceDriver: Send + Sync {
    fn compression(&self) -> CompressionType;

    fn init(&self, opts: &SourceOptions<'_>) -> NarResult<Box<dyn ContentSource>>;

    /// Wrap stored segment 2 bytes so reading yields the original content.
    fn decoder<'a>(&self, stored: Box<dyn Read + 'a>) -> NarResult<Box<dyn Read + 'a>>;
}

/// Stores content as-is.
pub struct PlainDriver;

impl SourceDriver for PlainDriver {
    fn compression(&self) -> CompressionType { CompressionType::None }

    fn init(&self, opts: &SourceOptions<'_>) -> NarResult<Box<dyn ContentSource>> {
        Ok(Box::new(FileSource::open(opts.input)?))
    }

    fn decoder<'a>(&self, stored: Box<dyn Read + 'a>) -> NarResult<Box<dyn Read + 'a>> {
        Ok(stored)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Compression code → driver.
pub struct DriverRegistry {
    drivers: HashMap<u64, Box<dyn SourceDriver>>,
}

impl DriverRegistry {
    /// Registry knowing only the plain (code 0) driver.
    pub fn new() -> Self {
        let mut reg = Self { drivers: HashMap::new() };
        reg.register(Box::new(PlainDriver));
        reg
    }

    /// Registry with every driver this crate ships.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(ZstdDriver));
        reg.register(Box::new(Lz4Driver));
        reg.register(Box::new(BrotliDriver));
        reg
    }

    /// Add `driver`, replacing any driver registered for the same code.
    pub fn register(&mut self, driver: Box<dyn SourceDriver>) {
        let code = driver.compression().code();
        debug!("registering {} driver for code {code}", driver.compression().name());
        self.drivers.insert(code, driver);
    }

    pub fn get(&self, code: u64) -> NarResult<&dyn SourceDriver> {
        self.drivers
            .get(&code)
            .map(|d| d.as_ref())
            .ok_or(NarError::UnsupportedCompressionType(code))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self { Self::new() }
}
