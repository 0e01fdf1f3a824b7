//! Fixed-layout headers of the NAR container.
//!
//! # Archive header (64 bytes, once at offset 0)
//!
//! | Offset | Size | Field              |
//! |--------|------|--------------------|
//! | 0      | 8    | magic `[ NARH ]`   |
//! | 8      | 8    | version word       |
//! | 16     | 8    | cipher             |
//! | 24     | 8    | compression        |
//! | 32     | 8    | signature_position |
//! | 40     | 8    | index_position     |
//! | 48     | 8    | unused_1           |
//! | 56     | 8    | unused_2           |
//!
//! # Item header (32 bytes, before every item)
//!
//! | Offset | Size | Field    |
//! |--------|------|----------|
//! | 0      | 8    | magic    |
//! | 8      | 8    | flags    |
//! | 16     | 8    | length_1 |
//! | 24     | 8    | length_2 |
//!
//! Magic numbers are 8 ASCII bytes read as a little-endian `u64`.  Every
//! field is encoded explicitly little-endian, whatever the host byte order;
//! the in-memory layout of these structs is never written out.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{NarError, NarResult};

// ── Magic numbers ───────────────────────────────────────────────────────────

/// `"[ NARH ]"`: archive header.
pub const NARH_MAGIC: u64 = u64::from_le_bytes(*b"[ NARH ]");
/// `"[ FILE ]"`: regular file item.
pub const FILE_MAGIC: u64 = u64::from_le_bytes(*b"[ FILE ]");

/// Printable form of a magic number: its 8 bytes when they are ASCII,
/// otherwise their hex encoding.
pub fn magic_to_string(magic: u64) -> String {
    let bytes = magic.to_le_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        hex::encode(bytes)
    }
}

// ── Flag bits ───────────────────────────────────────────────────────────────

/// Segment 1 was written through a compression driver.
pub const FLAG_COMPRESSION_1: u64 = 1 << 0;
/// Segment 2 was written through a compression driver.
pub const FLAG_COMPRESSION_2: u64 = 1 << 1;
/// File item carries the executable permission.
pub const FLAG_EXECUTABLE:    u64 = 1 << 63;

/// First bit of the 16-bit format-version window.
pub const VERSION_SHIFT: u32 = 46;
pub const VERSION_MASK:  u64 = 0xFFFF << VERSION_SHIFT;
/// Format version written by this crate.
pub const CURRENT_FORMAT_VERSION: u16 = 1;

// ── Shared codec trait ──────────────────────────────────────────────────────

/// A fixed-size, magic-discriminated header layout.
pub trait RawHeader: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Encoded size in bytes.
    const SIZE: usize;

    fn magic(&self) -> u64;

    fn set_magic(&mut self, magic: u64);

    /// All-zero header with only `magic` set.
    fn with_magic(magic: u64) -> Self;

    fn write<W: Write>(&self, writer: W) -> io::Result<()>;

    /// Decode from the first `SIZE` bytes of `bytes`.
    fn decode(bytes: &[u8]) -> NarResult<Self>;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        // Writing into a Vec cannot fail.
        let _ = self.write(&mut out);
        out
    }

    /// Read exactly `SIZE` bytes from `reader` and decode them.
    fn read<R: Read>(reader: R) -> NarResult<Self> {
        let mut buf = vec![0u8; Self::SIZE];
        let got = read_full(reader, &mut buf)?;
        Self::decode(&buf[..got])
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
/// Returns the number of bytes read.
pub(crate) fn read_full<R: Read>(mut reader: R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0)  => break,
            Ok(n)  => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn check_len(bytes: &[u8], expected: usize) -> NarResult<()> {
    if bytes.len() < expected {
        return Err(NarError::ShortRead { expected, received: bytes.len() });
    }
    Ok(())
}

// ── Archive header ──────────────────────────────────────────────────────────

pub const GENERIC_HEADER_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenericHeader {
    pub magic:              u64,
    pub version:            u64,
    pub cipher:             u64,
    pub compression:        u64,
    pub signature_position: u64,
    pub index_position:     u64,
    pub unused_1:           u64,
    pub unused_2:           u64,
}

/// Which revision of the header layout a decoded archive header follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatRevision {
    /// Version packed in bits 46..62 of the version word.
    Current(u16),
    /// Early archives: the version word is a `major`/`minor` u32 pair.
    Legacy { major: u32, minor: u32 },
}

impl GenericHeader {
    pub fn revision(&self) -> FormatRevision {
        let packed = ((self.version & VERSION_MASK) >> VERSION_SHIFT) as u16;
        if packed == 0 && self.version != 0 {
            FormatRevision::Legacy {
                major: self.version as u32,
                minor: (self.version >> 32) as u32,
            }
        } else {
            FormatRevision::Current(packed)
        }
    }
}

impl RawHeader for GenericHeader {
    const SIZE: usize = GENERIC_HEADER_SIZE;

    fn magic(&self) -> u64 { self.magic }

    fn set_magic(&mut self, magic: u64) { self.magic = magic; }

    fn with_magic(magic: u64) -> Self {
        Self { magic, ..Self::default() }
    }

    fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.magic)?;
        writer.write_u64::<LittleEndian>(self.version)?;
        writer.write_u64::<LittleEndian>(self.cipher)?;
        writer.write_u64::<LittleEndian>(self.compression)?;
        writer.write_u64::<LittleEndian>(self.signature_position)?;
        writer.write_u64::<LittleEndian>(self.index_position)?;
        writer.write_u64::<LittleEndian>(self.unused_1)?;
        writer.write_u64::<LittleEndian>(self.unused_2)?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> NarResult<Self> {
        check_len(bytes, Self::SIZE)?;
        let mut r = &bytes[..Self::SIZE];
        Ok(Self {
            magic:              r.read_u64::<LittleEndian>()?,
            version:            r.read_u64::<LittleEndian>()?,
            cipher:             r.read_u64::<LittleEndian>()?,
            compression:        r.read_u64::<LittleEndian>()?,
            signature_position: r.read_u64::<LittleEndian>()?,
            index_position:     r.read_u64::<LittleEndian>()?,
            unused_1:           r.read_u64::<LittleEndian>()?,
            unused_2:           r.read_u64::<LittleEndian>()?,
        })
    }
}

// ── Item header ─────────────────────────────────────────────────────────────

pub const ITEM_HEADER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemHeader {
    pub magic:    u64,
    pub flags:    u64,
    /// Exact length of segment 1, padding excluded.
    pub length_1: u64,
    /// Exact length of segment 2, padding excluded.
    pub length_2: u64,
}

/// Flag interpretation used by legacy-revision archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyFlags {
    pub executable: bool,
    pub compressed: bool,
    pub encrypted:  bool,
}

impl ItemHeader {
    pub fn compression_segment_1(&self) -> bool { self.flags & FLAG_COMPRESSION_1 != 0 }
    pub fn compression_segment_2(&self) -> bool { self.flags & FLAG_COMPRESSION_2 != 0 }

    pub fn set_compression_segment_1(&mut self, on: bool) { set_bit(&mut self.flags, FLAG_COMPRESSION_1, on) }
    pub fn set_compression_segment_2(&mut self, on: bool) { set_bit(&mut self.flags, FLAG_COMPRESSION_2, on) }

    pub fn legacy_flags(&self) -> LegacyFlags {
        LegacyFlags {
            executable: self.flags & 0b001 != 0,
            compressed: self.flags & 0b010 != 0,
            encrypted:  self.flags & 0b100 != 0,
        }
    }
}

pub(crate) fn set_bit(flags: &mut u64, bit: u64, on: bool) {
    if on { *flags |= bit } else { *flags &= !bit }
}

impl RawHeader for ItemHeader {
    const SIZE: usize = ITEM_HEADER_SIZE;

    fn magic(&self) -> u64 { self.magic }

    fn set_magic(&mut self, magic: u64) { self.magic = magic; }

    fn with_magic(magic: u64) -> Self {
        Self { magic, ..Self::default() }
    }

    fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.magic)?;
        writer.write_u64::<LittleEndian>(self.flags)?;
        writer.write_u64::<LittleEndian>(self.length_1)?;
        writer.write_u64::<LittleEndian>(self.length_2)?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> NarResult<Self> {
        check_len(bytes, Self::SIZE)?;
        let mut r = &bytes[..Self::SIZE];
        Ok(Self {
            magic:    r.read_u64::<LittleEndian>()?,
            flags:    r.read_u64::<LittleEndian>()?,
            length_1: r.read_u64::<LittleEndian>()?,
            length_2: r.read_u64::<LittleEndian>()?,
        })
    }
}
