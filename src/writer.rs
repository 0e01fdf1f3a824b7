//! Sequential archive writer.
//!
//! [`NarWriter`] is a two-state machine.  `Empty` means the archive header
//! has not been written yet; the first append (or [`close`](NarWriter::close))
//! writes it and moves to `Open`, which stays the state until the sink is
//! released.
//!
//! Every item is flushed before the append returns, so a crash leaves whole
//! items behind and at worst one truncated item at the end.

use log::{debug, trace, warn};
use std::fs::Metadata;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path};
use walkdir::WalkDir;

use crate::align::{checked_round_up_8, padding_8};
use crate::error::{NarError, NarResult};
use crate::header::{RawHeader, FLAG_COMPRESSION_2, FLAG_EXECUTABLE, GENERIC_HEADER_SIZE, ITEM_HEADER_SIZE};
use crate::source::{ContentSource, DriverRegistry, SourceOptions};
use crate::stream::{corrective_seek, is_not_seekable};
use crate::typed::{FileItem, NarHeader};

/// Default size of the buffer content is pulled through: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const ZEROS: [u8; 8] = [0; 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Empty,
    Open,
}

pub struct NarWriter<W: Write + Seek> {
    sink:       Option<W>,
    state:      WriterState,
    header:     NarHeader,
    chunk_size: usize,
    items:      u64,
}

impl<W: Write + Seek> NarWriter<W> {
    /// Wrap `sink` without writing anything.  `header` is written on the
    /// first append.
    pub fn new(sink: W, header: NarHeader) -> Self {
        Self {
            sink:       Some(sink),
            state:      WriterState::Empty,
            header,
            chunk_size: DEFAULT_CHUNK_SIZE,
            items:      0,
        }
    }

    /// Start a fresh archive: write `header` at offset 0 (or at the current
    /// position of a non-seekable sink).
    pub fn create(sink: W, header: NarHeader) -> NarResult<Self> {
        let mut w = Self::new(sink, header);
        w.ensure_open()?;
        Ok(w)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The archive header in effect: the one written, or the one found in an
    /// existing archive.
    pub fn header(&self) -> &NarHeader { &self.header }

    /// Items appended through this writer.
    pub fn items_written(&self) -> u64 { self.items }

    fn ensure_open(&mut self) -> NarResult<()> {
        if self.state == WriterState::Open {
            return Ok(());
        }
        let header = self.header;
        let sink = self.sink_mut()?;
        corrective_seek(sink, SeekFrom::Start(0))?;
        header.write(&mut *sink)?;
        sink.flush()?;
        debug!("wrote {GENERIC_HEADER_SIZE}-byte archive header (version {})", header.version());
        self.state = WriterState::Open;
        Ok(())
    }

    fn sink_mut(&mut self) -> NarResult<&mut W> {
        self.sink.as_mut().ok_or_else(closed)
    }

    // ── Appending ────────────────────────────────────────────────────────────

    /// Append one file item.
    ///
    /// Writes the item header (`length_1 = name.len()`, `length_2 =
    /// content_length`), the padded name, then pulls up to `content_length`
    /// bytes from `source` followed by padding.  A source that ends early
    /// fails with [`NarError::ShortContent`] and leaves a truncated item
    /// behind; a source with more data is cut at `content_length`.
    pub fn append_entry(
        &mut self,
        name:           &[u8],
        content_length: u64,
        source:         &mut dyn ContentSource,
        flags:          u64,
    ) -> NarResult<()> {
        if checked_round_up_8(content_length).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("content length {content_length} cannot be aligned"),
            )
            .into());
        }
        self.ensure_open()?;

        let mut item = FileItem::new();
        item.update(|h| {
            h.flags    = flags;
            h.length_1 = name.len() as u64;
            h.length_2 = content_length;
        });

        let mut buf = vec![0u8; self.chunk_size];
        let sink = self.sink_mut()?;
        item.write(&mut *sink)?;
        sink.write_all(name)?;
        sink.write_all(&ZEROS[..padding_8(name.len() as u64) as usize])?;

        let mut produced = 0u64;
        while produced < content_length {
            let want = (content_length - produced).min(buf.len() as u64) as usize;
            let n = source.next_chunk(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])?;
            produced += n as u64;
            trace!("wrote {n}-byte chunk ({produced}/{content_length})");
        }
        if produced < content_length {
            sink.flush()?;
            return Err(NarError::ShortContent { declared: content_length, produced });
        }
        sink.write_all(&ZEROS[..padding_8(content_length) as usize])?;
        sink.flush()?;

        self.items += 1;
        debug!(
            "appended {:?} ({content_length} bytes, flags {flags:#x}, item span {})",
            String::from_utf8_lossy(name),
            ITEM_HEADER_SIZE as u64 + padded(name.len() as u64) + padded(content_length),
        );
        Ok(())
    }

    /// Append the file at `path` under `name`, producing segment 2 with the
    /// driver matching the archive's compression code.
    pub fn append_file<P: AsRef<Path>>(
        &mut self,
        path:     P,
        name:     &[u8],
        registry: &DriverRegistry,
        level:    i32,
    ) -> NarResult<()> {
        let path   = path.as_ref();
        let driver = registry.get(self.header.compression())?;
        let meta   = std::fs::metadata(path)?;

        let mut source = driver.init(&SourceOptions { input: path, level })?;
        let length = source.size()?;
        let mut flags = 0;
        if is_executable(&meta) {
            flags |= FLAG_EXECUTABLE;
        }
        if source.compressed() {
            flags |= FLAG_COMPRESSION_2;
        }

        let appended = self.append_entry(name, length, source.as_mut(), flags);
        let closed   = source.close();
        appended?;
        closed
    }

    /// Walk `dir` recursively and append every regular file, in file-name
    /// order, named relative to `dir`'s parent.  Symlinks and special files
    /// are skipped.  Returns the number of files appended.
    pub fn append_directory<P: AsRef<Path>>(
        &mut self,
        dir:      P,
        registry: &DriverRegistry,
        level:    i32,
    ) -> NarResult<u64> {
        let root = dir.as_ref();
        let base = root.parent().unwrap_or(Path::new(""));
        let mut count = 0;
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let ft = entry.file_type();
            if ft.is_dir() {
                continue;
            }
            if !ft.is_file() {
                warn!("skipping {}: not a regular file", entry.path().display());
                continue;
            }
            let relative = entry.path().strip_prefix(base).unwrap_or(entry.path());
            self.append_file(entry.path(), &entry_name(relative), registry, level)?;
            count += 1;
        }
        debug!("appended {count} files from {}", root.display());
        Ok(count)
    }

    // ── Closing ──────────────────────────────────────────────────────────────

    /// Flush and release the sink.  The header is written first if nothing
    /// was appended.  Calling it again does nothing.
    pub fn close(&mut self) -> NarResult<()> {
        if self.sink.is_none() {
            return Ok(());
        }
        self.ensure_open()?;
        if let Some(mut sink) = self.sink.take() {
            sink.flush()?;
        }
        debug!("closed writer after {} items", self.items);
        Ok(())
    }

    /// Flush and hand the sink back.
    pub fn into_inner(mut self) -> NarResult<W> {
        self.ensure_open()?;
        let mut sink = self.sink.take().ok_or_else(closed)?;
        sink.flush()?;
        Ok(sink)
    }
}

impl<W: Read + Write + Seek> NarWriter<W> {
    /// Open `sink` for appending.
    ///
    /// An empty sink gets `header` written immediately.  A non-empty sink
    /// must start with a valid archive header, which is kept as-is; the
    /// writer then positions itself at the end.  Nothing is written when
    /// that header fails to decode.  A non-seekable sink is treated as empty.
    pub fn open(mut sink: W, header: NarHeader) -> NarResult<Self> {
        let end = match sink.seek(SeekFrom::End(0)) {
            Ok(end)                        => end,
            Err(e) if is_not_seekable(&e)  => return Self::create(sink, header),
            Err(e)                         => return Err(e.into()),
        };
        if end == 0 {
            return Self::create(sink, header);
        }

        sink.seek(SeekFrom::Start(0))?;
        let existing = NarHeader::read(&mut sink)?;
        sink.seek(SeekFrom::End(0))?;
        debug!(
            "appending to existing archive of {end} bytes (compression code {})",
            existing.compression()
        );
        Ok(Self {
            sink:       Some(sink),
            state:      WriterState::Open,
            header:     existing,
            chunk_size: DEFAULT_CHUNK_SIZE,
            items:      0,
        })
    }
}

fn closed() -> NarError {
    io::Error::new(io::ErrorKind::BrokenPipe, "archive writer is closed").into()
}

fn padded(n: u64) -> u64 {
    checked_round_up_8(n).unwrap_or(u64::MAX)
}

/// Name stored for `path`: its normal components joined by `/`, with `..`
/// resolved lexically against the component before it.  Root, prefix and
/// `.` components are dropped, as is a `..` with nothing left to remove,
/// so stored names are always relative.
pub fn entry_name(path: &Path) -> Vec<u8> {
    let mut parts: Vec<&[u8]> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.as_encoded_bytes()),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    debug!("dropping leading '..' in {}", path.display());
                }
            }
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
        }
    }
    parts.join(&b'/')
}

#[cfg(unix)]
fn is_executable(meta: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &Metadata) -> bool { false }
