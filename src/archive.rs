//! Path-level operations: the embedding surface behind the `nar` tool.
//!
//! ```no_run
//! use nar::archive::{self, ArchiveOptions};
//! use nar::source::{CompressionType, DriverRegistry};
//! use std::fs::File;
//! use std::path::PathBuf;
//!
//! let registry = DriverRegistry::with_builtin();
//! let opts = ArchiveOptions { compression: CompressionType::Zstd, ..ArchiveOptions::default() };
//!
//! // Write
//! archive::create("out.nar", &[PathBuf::from("readme.txt")], &opts, &registry)?;
//!
//! // Read
//! let mut data = Vec::new();
//! archive::extract(File::open("out.nar")?, b"readme.txt", &mut data, &registry)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Reading functions take any `Read + Seek` source, so a pipe wrapped in
//! [`Unseekable`](crate::stream::Unseekable) works as well as a file.

use log::{debug, info, warn};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::NarResult;
use crate::header::{magic_to_string, FormatRevision, ITEM_HEADER_SIZE};
use crate::reader::NarReader;
use crate::source::{CompressionType, DriverRegistry};
use crate::typed::{ItemKind, NarHeader};
use crate::writer::{entry_name, NarWriter, DEFAULT_CHUNK_SIZE};

/// Default compression level handed to drivers that have levels.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// ── ArchiveOptions ───────────────────────────────────────────────────────────

/// Configuration for [`create`] and [`append`].
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Driver used for new archives.  Appending keeps the archive's own.
    pub compression: CompressionType,
    pub level:       i32,
    pub chunk_size:  usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            compression: CompressionType::None,
            level:       DEFAULT_COMPRESSION_LEVEL,
            chunk_size:  DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ArchiveOptions {
    /// Archive header for a new archive written with these options.
    pub fn header(&self) -> NarHeader {
        let mut h = NarHeader::current();
        h.set_compression(self.compression.code());
        h
    }
}

// ── ItemInfo ─────────────────────────────────────────────────────────────────

/// One row of [`list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemInfo {
    /// Offset of the item header from the archive start.
    pub offset:     u64,
    pub kind:       &'static str,
    /// The 8 magic bytes, hex-encoded.
    pub magic:      String,
    pub flags:      u64,
    pub length_1:   u64,
    pub length_2:   u64,
    /// Stored name, file items only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name:       Option<String>,
    pub executable: bool,
    pub compressed: bool,
}

/// Outcome of [`unpack`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnpackReport {
    pub files:   u64,
    pub bytes:   u64,
    pub skipped: u64,
}

/// Archive header as shown by `info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderInfo {
    /// `"1"` for the current layout, `"legacy 0.1"` for the early one.
    pub revision:           String,
    pub compression_code:   u64,
    /// `None` when the code names no known compression.
    pub compression:        Option<CompressionType>,
    pub cipher:             u64,
    pub signature_position: u64,
    pub index_position:     u64,
}

impl From<&NarHeader> for HeaderInfo {
    fn from(h: &NarHeader) -> Self {
        let revision = match h.revision() {
            FormatRevision::Current(v)              => v.to_string(),
            FormatRevision::Legacy { major, minor } => format!("legacy {major}.{minor}"),
        };
        Self {
            revision,
            compression_code:   h.compression(),
            compression:        CompressionType::from_code(h.compression()),
            cipher:             h.cipher,
            signature_position: h.signature_position,
            index_position:     h.index_position,
        }
    }
}

// ── Write ────────────────────────────────────────────────────────────────────

/// Create (or truncate) the archive at `path` and add `inputs`.
/// Returns the number of files added.
pub fn create<P: AsRef<Path>>(
    path:     P,
    inputs:   &[PathBuf],
    opts:     &ArchiveOptions,
    registry: &DriverRegistry,
) -> NarResult<u64> {
    registry.get(opts.compression.code())?;
    let file = File::create(path.as_ref())?;
    let mut writer = NarWriter::create(file, opts.header())?.with_chunk_size(opts.chunk_size);
    let added = add_inputs(&mut writer, inputs, opts, registry)?;
    writer.close()?;
    info!("created {} with {added} files", path.as_ref().display());
    Ok(added)
}

/// Add `inputs` to the archive at `path`, creating it when missing.  An
/// existing archive keeps the compression it was created with.
pub fn append<P: AsRef<Path>>(
    path:     P,
    inputs:   &[PathBuf],
    opts:     &ArchiveOptions,
    registry: &DriverRegistry,
) -> NarResult<u64> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path.as_ref())?;
    let mut writer = NarWriter::open(file, opts.header())?.with_chunk_size(opts.chunk_size);
    let code = writer.header().compression();
    if code != opts.compression.code() {
        warn!(
            "archive uses compression code {code}; ignoring requested {}",
            opts.compression.name()
        );
    }
    let added = add_inputs(&mut writer, inputs, opts, registry)?;
    writer.close()?;
    info!("appended {added} files to {}", path.as_ref().display());
    Ok(added)
}

fn add_inputs<W: Write + Seek>(
    writer:   &mut NarWriter<W>,
    inputs:   &[PathBuf],
    opts:     &ArchiveOptions,
    registry: &DriverRegistry,
) -> NarResult<u64> {
    let mut added = 0;
    for input in inputs {
        let ft = fs::symlink_metadata(input)?.file_type();
        if ft.is_dir() {
            added += writer.append_directory(input, registry, opts.level)?;
        } else if ft.is_file() {
            writer.append_file(input, &entry_name(input), registry, opts.level)?;
            added += 1;
        } else {
            warn!("skipping {}: not a regular file", input.display());
        }
    }
    Ok(added)
}

// ── Read ─────────────────────────────────────────────────────────────────────

/// Decode the archive header.
pub fn info<R: Read + Seek>(source: R) -> NarResult<NarHeader> {
    NarReader::open(source).read_archive_header()
}

/// Describe every item, known kind or not.
pub fn list<R: Read + Seek>(source: R) -> NarResult<Vec<ItemInfo>> {
    let mut reader = NarReader::open(source);
    let mut items = Vec::new();

    while let Some(kind) = reader.next_item()? {
        let offset = reader.position() - ITEM_HEADER_SIZE as u64;
        let h = *kind.header();
        let mut row = ItemInfo {
            offset,
            kind:       kind.name(),
            magic:      hex::encode(h.magic.to_le_bytes()),
            flags:      h.flags,
            length_1:   h.length_1,
            length_2:   h.length_2,
            name:       None,
            executable: false,
            compressed: false,
        };
        match kind {
            ItemKind::File(item) => {
                row.name       = Some(String::from_utf8_lossy(&reader.read_segment_1_to_vec()?).into_owned());
                row.executable = reader.executable(&item)?;
                row.compressed = reader.content_compressed(&item)?;
            }
            ItemKind::Unknown(_) => {
                debug!("unknown item kind {} at offset {offset}", magic_to_string(h.magic));
            }
        }
        items.push(row);
    }
    Ok(items)
}

/// Write the content of the file item stored as `name` to `out`.  `None`
/// when there is no such item.
pub fn extract<R: Read + Seek, W: Write>(
    source:   R,
    name:     &[u8],
    out:      &mut W,
    registry: &DriverRegistry,
) -> NarResult<Option<u64>> {
    NarReader::open(source).extract_to(name, out, registry)
}

/// Extract every file item below `dest`.
///
/// Names that are absolute or climb out of `dest`, unknown item kinds and
/// items whose compression has no registered driver are skipped with a
/// warning.  Any other error aborts.
pub fn unpack<R: Read + Seek, P: AsRef<Path>>(
    source:   R,
    dest:     P,
    registry: &DriverRegistry,
) -> NarResult<UnpackReport> {
    let dest = dest.as_ref();
    fs::create_dir_all(dest)?;
    let mut reader = NarReader::open(source);
    let mut report = UnpackReport::default();

    while let Some(kind) = reader.next_item()? {
        let item = match kind {
            ItemKind::File(item) => item,
            ItemKind::Unknown(h) => {
                warn!("skipping item of unknown kind {}", magic_to_string(h.magic));
                report.skipped += 1;
                continue;
            }
        };
        let name = reader.read_segment_1_to_vec()?;
        let Some(relative) = contained_path(&name) else {
            warn!("refusing to unpack {:?}: not a relative path", String::from_utf8_lossy(&name));
            report.skipped += 1;
            continue;
        };

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&target)?;
        let written = match reader.copy_content(&item, &mut file, registry) {
            Ok(n) => n,
            Err(e) if e.is_recoverable() => {
                warn!("skipping {}: {e}", relative.display());
                drop(file);
                fs::remove_file(&target)?;
                report.skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        file.flush()?;
        if reader.executable(&item)? {
            mark_executable(&file)?;
        }
        debug!("unpacked {} ({written} bytes)", target.display());
        report.files += 1;
        report.bytes += written;
    }
    info!("unpacked {} files ({} bytes), skipped {}", report.files, report.bytes, report.skipped);
    Ok(report)
}

/// `name` as a path made only of normal components, or `None`.
pub fn contained_path(name: &[u8]) -> Option<PathBuf> {
    let path = name_to_path(name)?;
    let contained = {
        let mut components = path.components().peekable();
        components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_)))
    };
    contained.then_some(path)
}

#[cfg(unix)]
fn name_to_path(name: &[u8]) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    Some(PathBuf::from(std::ffi::OsStr::from_bytes(name)))
}

#[cfg(not(unix))]
fn name_to_path(name: &[u8]) -> Option<PathBuf> {
    std::str::from_utf8(name).ok().map(PathBuf::from)
}

#[cfg(unix)]
fn mark_executable(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn mark_executable(_file: &File) -> std::io::Result<()> { Ok(()) }
