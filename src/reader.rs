//! Sequential archive reader.
//!
//! # States
//! `HeaderPending` → `ItemReady` → (`HeaderPending` after a skip) … →
//! `Exhausted` once no byte is left where an item header would start.
//!
//! # Cursor
//! Within an item the reader tracks how much of segment 1 and segment 2 has
//! been consumed, and the offset from the first byte of the item header.
//! [`skip_to_next_item_header`](NarReader::skip_to_next_item_header) uses that
//! offset to land on the next header no matter how much of the item the
//! caller actually read.  On a pipe the skip discards bytes instead of
//! seeking.

use log::{debug, trace, warn};
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::align::checked_round_up_8;
use crate::error::{NarError, NarResult};
use crate::header::{read_full, FormatRevision, ItemHeader, RawHeader, GENERIC_HEADER_SIZE, ITEM_HEADER_SIZE};
use crate::source::DriverRegistry;
use crate::stream::{corrective_seek, skip_forward};
use crate::typed::{FileItem, ItemKind, NarHeader};

/// Largest segment 1 read into memory by [`NarReader::read_segment_1_to_vec`].
pub const MAX_SEGMENT_1: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemCursor {
    /// Segment 1 bytes consumed, padding included once skipped.
    pub consumed_1:  u64,
    pub consumed_2:  u64,
    /// Bytes consumed since the first byte of the item header.
    pub item_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    HeaderPending,
    ItemReady,
    Exhausted,
}

pub struct NarReader<R: Read + Seek> {
    source:   R,
    state:    ReaderState,
    header:   Option<NarHeader>,
    current:  Option<ItemHeader>,
    cursor:   ItemCursor,
    /// Bytes consumed since the start of the archive.
    position: u64,
}

/// Total bytes an item occupies: header plus both padded segments.
/// `None` when the declared lengths cannot describe a real item.
pub fn item_span(h: &ItemHeader) -> Option<u64> {
    (ITEM_HEADER_SIZE as u64)
        .checked_add(checked_round_up_8(h.length_1)?)?
        .checked_add(checked_round_up_8(h.length_2)?)
}

impl<R: Read + Seek> NarReader<R> {
    /// Wrap `source`.  Nothing is read until the archive header is asked for.
    pub fn open(source: R) -> Self {
        Self {
            source,
            state:    ReaderState::HeaderPending,
            header:   None,
            current:  None,
            cursor:   ItemCursor::default(),
            position: 0,
        }
    }

    pub fn into_inner(self) -> R { self.source }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 { self.position }

    pub fn cursor(&self) -> ItemCursor { self.cursor }

    /// Header of the item being read, if any.
    pub fn current(&self) -> Option<&ItemHeader> { self.current.as_ref() }

    /// The archive header, reading it first when needed.
    pub fn header(&mut self) -> NarResult<NarHeader> {
        match self.header {
            Some(h) => Ok(h),
            None    => self.read_archive_header(),
        }
    }

    // ── Archive header ───────────────────────────────────────────────────────

    /// Read and validate the 64-byte archive header.
    ///
    /// A seekable source is rewound first.  A non-seekable one is read from
    /// where it stands, which is assumed to be the archive start.
    pub fn read_archive_header(&mut self) -> NarResult<NarHeader> {
        if let Some(pos) = corrective_seek(&mut self.source, SeekFrom::Start(0))? {
            self.position = pos;
        }
        let header = NarHeader::read(&mut self.source)?;
        self.position = GENERIC_HEADER_SIZE as u64;
        self.cursor   = ItemCursor::default();
        self.current  = None;
        self.state    = ReaderState::HeaderPending;
        self.header   = Some(header);

        match header.revision() {
            FormatRevision::Current(v) => debug!("archive header: format version {v}, compression {}", header.compression()),
            FormatRevision::Legacy { major, minor } => {
                debug!("archive header: legacy revision {major}.{minor}")
            }
        }
        Ok(header)
    }

    // ── Item headers ─────────────────────────────────────────────────────────

    /// Read the next 32-byte item header from the current position.
    ///
    /// `Ok(None)` means the archive ended cleanly: not a single byte was left.
    /// A partial header is a [`NarError::CorruptArchive`].
    pub fn read_item_header(&mut self) -> NarResult<Option<ItemKind>> {
        if self.state == ReaderState::Exhausted {
            return Ok(None);
        }
        let start = self.position;
        let mut buf = [0u8; ITEM_HEADER_SIZE];
        let got = read_full(&mut self.source, &mut buf)?;
        self.position += got as u64;
        if got == 0 {
            debug!("end of archive at offset {start}");
            self.state   = ReaderState::Exhausted;
            self.current = None;
            return Ok(None);
        }
        if got < ITEM_HEADER_SIZE {
            return Err(NarError::corrupt(
                start,
                format!("item header truncated after {got} of {ITEM_HEADER_SIZE} bytes"),
            ));
        }

        let header = ItemHeader::decode(&buf)?;
        if item_span(&header).is_none() {
            return Err(NarError::corrupt(
                start,
                format!("item lengths {} / {} overflow", header.length_1, header.length_2),
            ));
        }
        self.current = Some(header);
        self.cursor  = ItemCursor { item_offset: ITEM_HEADER_SIZE as u64, ..ItemCursor::default() };
        self.state   = ReaderState::ItemReady;

        let kind = ItemKind::classify(header);
        debug!(
            "{} item at offset {start}: length_1 {}, length_2 {}, flags {:#x}",
            kind.name(), header.length_1, header.length_2, header.flags
        );
        Ok(Some(kind))
    }

    /// Skip whatever is left of the current item, then read the next header.
    /// Reads the archive header first when that has not happened yet.
    pub fn next_item(&mut self) -> NarResult<Option<ItemKind>> {
        if self.header.is_none() {
            self.read_archive_header()?;
        }
        if self.current.is_some() {
            self.skip_to_next_item_header()?;
        }
        self.read_item_header()
    }

    // ── Segments ─────────────────────────────────────────────────────────────

    /// Read up to `buf.len()` bytes of segment 1.  `Ok(0)` once it is
    /// exhausted or when no item is current.
    pub fn read_segment_1(&mut self, buf: &mut [u8]) -> NarResult<usize> {
        let Some(h) = self.current else { return Ok(0) };
        if self.cursor.consumed_1 >= h.length_1 {
            return Ok(0);
        }
        let want = (h.length_1 - self.cursor.consumed_1).min(buf.len() as u64) as usize;
        let n = self.read_declared(&mut buf[..want], "segment 1")?;
        self.cursor.consumed_1 += n as u64;
        Ok(n)
    }

    /// Rest of segment 1 as a vector, refusing segments above
    /// [`MAX_SEGMENT_1`] bytes.
    pub fn read_segment_1_to_vec(&mut self) -> NarResult<Vec<u8>> {
        let Some(h) = self.current else { return Ok(Vec::new()) };
        let remaining = h.length_1.saturating_sub(self.cursor.consumed_1);
        if remaining > MAX_SEGMENT_1 {
            return Err(NarError::corrupt(
                self.position,
                format!("segment 1 of {} bytes exceeds the {MAX_SEGMENT_1}-byte limit", h.length_1),
            ));
        }
        let mut out = vec![0u8; remaining as usize];
        let mut filled = 0;
        while filled < out.len() {
            let n = self.read_segment_1(&mut out[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        Ok(out)
    }

    /// Read up to `buf.len()` bytes of segment 2, first skipping whatever
    /// is left of segment 1 and its padding.  `Ok(0)` once it is exhausted.
    pub fn read_segment_2(&mut self, buf: &mut [u8]) -> NarResult<usize> {
        let Some(h) = self.current else { return Ok(0) };
        self.finish_segment_1(&h)?;
        if self.cursor.consumed_2 >= h.length_2 {
            return Ok(0);
        }
        let want = (h.length_2 - self.cursor.consumed_2).min(buf.len() as u64) as usize;
        let n = self.read_declared(&mut buf[..want], "segment 2")?;
        self.cursor.consumed_2 += n as u64;
        Ok(n)
    }

    /// `Read` view over the rest of segment 2.
    pub fn segment_2(&mut self) -> Segment2<'_, R> {
        Segment2 { reader: self }
    }

    fn finish_segment_1(&mut self, h: &ItemHeader) -> NarResult<()> {
        let padded = checked_round_up_8(h.length_1)
            .ok_or_else(|| NarError::corrupt(self.position, "segment 1 length overflows"))?;
        if self.cursor.consumed_1 >= padded {
            return Ok(());
        }
        let gap = padded - self.cursor.consumed_1;
        let skipped = skip_forward(&mut self.source, gap)?;
        self.advance(skipped);
        if skipped < gap {
            return Err(NarError::corrupt(self.position, "segment 1 truncated"));
        }
        trace!("skipped {gap} bytes of segment 1 and padding");
        self.cursor.consumed_1 = padded;
        Ok(())
    }

    /// Fill `buf` completely; running out of data means the item is cut.
    fn read_declared(&mut self, buf: &mut [u8], what: &str) -> NarResult<usize> {
        let n = read_full(&mut self.source, buf)?;
        self.advance(n as u64);
        if n < buf.len() {
            return Err(NarError::corrupt(self.position, format!("{what} truncated")));
        }
        Ok(n)
    }

    fn advance(&mut self, n: u64) {
        self.cursor.item_offset += n;
        self.position += n;
    }

    // ── Skipping ─────────────────────────────────────────────────────────────

    /// Move to the first byte after the current item.
    ///
    /// The distance is `32 + round_up_8(length_1) + round_up_8(length_2)`
    /// minus what the cursor already consumed.  A negative distance is a
    /// [`NarError::LogicError`].
    pub fn skip_to_next_item_header(&mut self) -> NarResult<()> {
        let Some(h) = self.current else { return Ok(()) };
        let span = item_span(&h)
            .ok_or_else(|| NarError::corrupt(self.position, "item lengths overflow"))?;
        let consumed = self.cursor.item_offset;
        let remaining = span
            .checked_sub(consumed)
            .ok_or(NarError::LogicError { consumed, span })?;

        let skipped = skip_forward(&mut self.source, remaining)?;
        self.position += skipped;
        if skipped < remaining {
            return Err(NarError::corrupt(
                self.position,
                format!("item ends {} bytes before its declared span", remaining - skipped),
            ));
        }
        debug!("skipped {remaining} bytes to the next item header at {}", self.position);

        self.current = None;
        self.cursor  = ItemCursor::default();
        self.state   = ReaderState::HeaderPending;
        Ok(())
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Stream the content of the first file item stored as `name` into
    /// `out`, decoding it through `registry` when it was compressed.
    ///
    /// Returns the number of bytes written, or `None` when no item matched.
    /// The reader is left on the item after the match.
    pub fn extract_to<W: Write>(
        &mut self,
        name:     &[u8],
        out:      &mut W,
        registry: &DriverRegistry,
    ) -> NarResult<Option<u64>> {
        while let Some(kind) = self.next_item()? {
            let ItemKind::File(item) = kind else { continue };
            if self.read_segment_1_to_vec()? != name {
                continue;
            }
            let written = self.copy_content(&item, out, registry)?;
            self.skip_to_next_item_header()?;
            return Ok(Some(written));
        }
        Ok(None)
    }

    /// Copy the current file item's content into `out`, decoded.
    pub fn copy_content<W: Write>(
        &mut self,
        item:     &FileItem,
        out:      &mut W,
        registry: &DriverRegistry,
    ) -> NarResult<u64> {
        if !self.content_compressed(item)? {
            return Ok(io::copy(&mut self.segment_2(), out)?);
        }
        let code = self.header()?.compression();
        let driver = registry.get(code)?;
        let mut decoded = driver.decoder(Box::new(self.segment_2()))?;
        let written = io::copy(&mut decoded, out)?;
        drop(decoded);
        let left = self.current.map_or(0, |h| h.length_2.saturating_sub(self.cursor.consumed_2));
        if left > 0 {
            warn!("{left} stored bytes left after the compressed stream ended");
        }
        Ok(written)
    }

    /// Whether `item`'s segment 2 went through a compression driver, honouring
    /// the legacy flag layout.
    pub fn content_compressed(&mut self, item: &FileItem) -> NarResult<bool> {
        Ok(match self.header()?.revision() {
            FormatRevision::Current(_)    => item.compression_segment_2(),
            FormatRevision::Legacy { .. } => item.legacy_flags().compressed,
        })
    }

    pub fn executable(&mut self, item: &FileItem) -> NarResult<bool> {
        Ok(match self.header()?.revision() {
            FormatRevision::Current(_)    => item.executable(),
            FormatRevision::Legacy { .. } => item.legacy_flags().executable,
        })
    }
}

/// `Read` adapter returned by [`NarReader::segment_2`].
pub struct Segment2<'a, R: Read + Seek> {
    reader: &'a mut NarReader<R>,
}

impl<R: Read + Seek> Read for Segment2<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_segment_2(buf).map_err(NarError::into_io)
    }
}
