//! Magic-tagged headers.
//!
//! [`Tagged<H, MAGIC>`] is a [`RawHeader`] whose magic has been checked
//! against `MAGIC`.  The check happens once, when the value is built from a
//! decoded header; afterwards the magic can no longer change.  Decoding item
//! headers whose kind is not known up front goes through [`ItemKind`].

use std::io::Read;
use std::ops::Deref;

use crate::error::{NarError, NarResult};
use crate::header::{
    set_bit, GenericHeader, ItemHeader, RawHeader, CURRENT_FORMAT_VERSION, FILE_MAGIC,
    FLAG_EXECUTABLE, NARH_MAGIC, VERSION_MASK, VERSION_SHIFT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tagged<H: RawHeader, const MAGIC: u64> {
    inner: H,
}

/// The archive header.
pub type NarHeader = Tagged<GenericHeader, NARH_MAGIC>;
/// A regular file item.
pub type FileItem = Tagged<ItemHeader, FILE_MAGIC>;

impl<H: RawHeader, const MAGIC: u64> Tagged<H, MAGIC> {
    pub const EXPECTED_MAGIC: u64 = MAGIC;

    /// Zero-valued header carrying `MAGIC`.
    pub fn new() -> Self {
        Self { inner: H::with_magic(MAGIC) }
    }

    /// Accept `header` iff its magic is `MAGIC`.
    pub fn from_generic(header: H) -> NarResult<Self> {
        check_magic(MAGIC, header.magic())?;
        Ok(Self { inner: header })
    }

    /// Replace the payload with `header`, under the same rule as
    /// [`from_generic`](Self::from_generic).  On error `self` is untouched.
    pub fn assign(&mut self, header: H) -> NarResult<()> {
        check_magic(MAGIC, header.magic())?;
        self.inner = header;
        Ok(())
    }

    /// Decode and validate from the first `H::SIZE` bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> NarResult<Self> {
        Self::from_generic(H::decode(bytes)?)
    }

    pub fn read<R: Read>(reader: R) -> NarResult<Self> {
        Self::from_generic(H::read(reader)?)
    }

    /// Edit the payload in place.  Any change to the magic is reverted.
    pub fn update(&mut self, f: impl FnOnce(&mut H)) {
        f(&mut self.inner);
        self.inner.set_magic(MAGIC);
    }

    pub fn into_generic(self) -> H { self.inner }
}

fn check_magic(expected: u64, received: u64) -> NarResult<()> {
    if expected != received {
        return Err(NarError::InvalidMagicNumber { expected, received });
    }
    Ok(())
}

impl<H: RawHeader, const MAGIC: u64> Default for Tagged<H, MAGIC> {
    fn default() -> Self { Self::new() }
}

impl<H: RawHeader, const MAGIC: u64> Deref for Tagged<H, MAGIC> {
    type Target = H;
    fn deref(&self) -> &H { &self.inner }
}

// ── Archive header accessors ────────────────────────────────────────────────

impl NarHeader {
    /// Header as written by this crate: current format version, no
    /// compression, no cipher.
    pub fn current() -> Self {
        let mut h = Self::new();
        h.set_version(CURRENT_FORMAT_VERSION);
        h
    }

    /// Format version stored in bits 46..62 of the version word.
    pub fn version(&self) -> u16 {
        ((self.inner.version & VERSION_MASK) >> VERSION_SHIFT) as u16
    }

    /// Store `v` in the version window.  Bits outside the window are kept.
    pub fn set_version(&mut self, v: u16) {
        self.inner.version &= !VERSION_MASK;
        self.inner.version |= u64::from(v) << VERSION_SHIFT;
    }

    pub fn compression(&self) -> u64 { self.inner.compression }

    pub fn set_compression(&mut self, code: u64) { self.inner.compression = code; }
}

// ── File item accessors ─────────────────────────────────────────────────────

impl FileItem {
    pub fn executable(&self) -> bool { self.inner.flags & FLAG_EXECUTABLE != 0 }

    pub fn set_executable(&mut self, on: bool) { set_bit(&mut self.inner.flags, FLAG_EXECUTABLE, on) }

    pub fn set_compression_segment_1(&mut self, on: bool) { self.inner.set_compression_segment_1(on) }
    pub fn set_compression_segment_2(&mut self, on: bool) { self.inner.set_compression_segment_2(on) }
}

// ── Item kinds ──────────────────────────────────────────────────────────────

/// An item header classified by its magic at the decode boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File(FileItem),
    /// Any other magic.  Skippable by its declared lengths.
    Unknown(ItemHeader),
}

impl ItemKind {
    pub fn classify(header: ItemHeader) -> Self {
        match header.magic {
            FILE_MAGIC => ItemKind::File(Tagged { inner: header }),
            _          => ItemKind::Unknown(header),
        }
    }

    pub fn header(&self) -> &ItemHeader {
        match self {
            ItemKind::File(f)    => &f.inner,
            ItemKind::Unknown(h) => h,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::File(_)    => "file",
            ItemKind::Unknown(_) => "unknown",
        }
    }
}
