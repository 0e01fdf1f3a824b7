//! NAR archive container: a 64-byte archive header followed by items, each a
//! 32-byte item header and two 8-byte-aligned segments (name, content).
//! The archive ends where the stream ends.

pub mod align;
pub mod archive;
pub mod error;
pub mod header;
pub mod reader;
pub mod source;
pub mod stream;
pub mod typed;
pub mod writer;

pub use archive::{ArchiveOptions, HeaderInfo, ItemInfo, UnpackReport};
pub use error::{NarError, NarResult};
pub use header::{GenericHeader, ItemHeader, RawHeader, FILE_MAGIC, NARH_MAGIC};
pub use reader::{ItemCursor, NarReader};
pub use source::{CompressionType, ContentSource, DriverRegistry, FileSource, ReadSource, SourceDriver};
pub use stream::Unseekable;
pub use typed::{FileItem, ItemKind, NarHeader, Tagged};
pub use writer::NarWriter;
