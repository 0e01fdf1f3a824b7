use nar::archive::{self, ArchiveOptions};
use nar::header::{RawHeader, FILE_MAGIC, ITEM_HEADER_SIZE};
use nar::source::{CompressionType, DriverRegistry, ReadSource};
use nar::{ItemHeader, ItemKind, NarError, NarHeader, NarReader, NarWriter, Unseekable};
use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, Write};
use tempfile::{tempdir, NamedTempFile};

fn write_entries<W: Write + Seek>(sink: W, entries: &[(&str, &[u8])]) -> W {
    let mut writer = NarWriter::create(sink, NarHeader::current()).unwrap();
    for (name, content) in entries {
        let mut src = ReadSource::from_slice(content);
        writer.append_entry(name.as_bytes(), content.len() as u64, &mut src, 0).unwrap();
    }
    writer.into_inner().unwrap()
}

fn in_memory(entries: &[(&str, &[u8])]) -> Vec<u8> {
    write_entries(Cursor::new(Vec::new()), entries).into_inner()
}

#[test]
fn test_write_read_roundtrip() {
    let temp_file = NamedTempFile::new().unwrap();
    let archive_path = temp_file.path().to_path_buf();

    write_entries(File::create(&archive_path).unwrap(), &[("a.txt", b"hello")]);

    let mut reader = NarReader::open(File::open(&archive_path).unwrap());
    reader.read_archive_header().unwrap();
    let item_start = reader.position();
    let item = match reader.read_item_header().unwrap() {
        Some(ItemKind::File(item)) => item,
        other => panic!("expected a file item, got {other:?}"),
    };
    assert_eq!((item.length_1, item.length_2), (5, 5));

    let mut name = [0u8; 64];
    let n = reader.read_segment_1(&mut name).unwrap();
    assert_eq!(&name[..n], b"a.txt");
    assert_eq!(reader.read_segment_1(&mut name).unwrap(), 0);

    let mut content = [0u8; 64];
    let n = reader.read_segment_2(&mut content).unwrap();
    assert_eq!(&content[..n], b"hello");
    assert_eq!(reader.read_segment_2(&mut content).unwrap(), 0);

    reader.skip_to_next_item_header().unwrap();
    assert_eq!(reader.position(), item_start + 32 + 8 + 8);

    let mut file = reader.into_inner();
    assert_eq!(file.stream_position().unwrap(), 64 + 32 + 8 + 8);
}

#[test]
fn test_skip_without_reading_content() {
    let bytes = in_memory(&[("first.bin", &[7u8; 1000]), ("second", b"2nd")]);
    let mut reader = NarReader::open(Cursor::new(bytes));
    reader.read_archive_header().unwrap();

    reader.read_item_header().unwrap().unwrap();
    assert_eq!(reader.read_segment_1_to_vec().unwrap(), b"first.bin");
    reader.skip_to_next_item_header().unwrap();

    match reader.read_item_header().unwrap() {
        Some(ItemKind::File(item)) => {
            assert_eq!((item.length_1, item.length_2), (6, 3));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(reader.read_segment_1_to_vec().unwrap(), b"second");
}

#[test]
fn test_skip_without_reading_anything() {
    let bytes = in_memory(&[("x", b"1"), ("y", b"22"), ("z", b"333")]);
    let mut reader = NarReader::open(Cursor::new(bytes));
    let mut lengths = Vec::new();
    while let Some(kind) = reader.next_item().unwrap() {
        lengths.push(kind.header().length_2);
    }
    assert_eq!(lengths, vec![1, 2, 3]);
}

#[test]
fn test_end_of_archive_is_not_an_error() {
    let bytes = in_memory(&[("only", b"one")]);
    let mut reader = NarReader::open(Cursor::new(bytes));
    assert!(reader.next_item().unwrap().is_some());
    assert!(reader.next_item().unwrap().is_none());
    assert!(reader.next_item().unwrap().is_none());

    let empty = in_memory(&[]);
    assert_eq!(empty.len(), 64);
    let mut reader = NarReader::open(Cursor::new(empty));
    assert!(reader.next_item().unwrap().is_none());
}

#[test]
fn test_truncated_item_header_is_corrupt() {
    let mut bytes = in_memory(&[("a", b"b")]);
    bytes.extend_from_slice(&[0u8; 12]);
    let mut reader = NarReader::open(Cursor::new(bytes));
    assert!(reader.next_item().unwrap().is_some());
    match reader.next_item() {
        Err(NarError::CorruptArchive { offset, .. }) => assert_eq!(offset, 64 + 32 + 8 + 8),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_truncated_content_fails_list_on_file_and_pipe() {
    let mut bytes = in_memory(&[("big.bin", &[9u8; 1000])]);
    bytes.truncate(64 + 32 + 8 + 100);

    let temp_file = NamedTempFile::new().unwrap();
    fs::write(temp_file.path(), &bytes).unwrap();

    let from_file = archive::list(File::open(temp_file.path()).unwrap());
    let from_cursor = archive::list(Cursor::new(bytes.clone()));
    let from_pipe = archive::list(Unseekable(Cursor::new(bytes)));
    for result in [from_file, from_cursor, from_pipe] {
        match result {
            Err(NarError::CorruptArchive { offset, .. }) => assert_eq!(offset, 64 + 32 + 8 + 100),
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[test]
fn test_short_archive_header() {
    let bytes = in_memory(&[]);
    let mut reader = NarReader::open(Cursor::new(bytes[..24].to_vec()));
    match reader.read_archive_header() {
        Err(NarError::ShortRead { expected, received }) => assert_eq!((expected, received), (64, 24)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_wrong_archive_magic() {
    let mut bytes = in_memory(&[("a", b"b")]);
    bytes[..8].copy_from_slice(b"[ FILE ]");
    let mut reader = NarReader::open(Cursor::new(bytes));
    match reader.read_archive_header() {
        Err(NarError::InvalidMagicNumber { expected, received }) => {
            assert_eq!(expected, nar::NARH_MAGIC);
            assert_eq!(received, FILE_MAGIC);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_pipe_read_matches_file_read() {
    let bytes = in_memory(&[("one", b"first"), ("two", b"second content")]);
    let mut piped = NarReader::open(Unseekable(Cursor::new(bytes)));

    piped.next_item().unwrap().unwrap();
    assert_eq!(piped.read_segment_1_to_vec().unwrap(), b"one");
    // content of "one" is discarded, not seeked over
    let Some(ItemKind::File(item)) = piped.next_item().unwrap() else { panic!("no second item") };
    let mut content = Vec::new();
    piped.copy_content(&item, &mut content, &DriverRegistry::new()).unwrap();
    assert_eq!(content, b"second content");
    assert!(piped.next_item().unwrap().is_none());
}

#[test]
fn test_pipe_write_matches_file_write() {
    let entries: &[(&str, &[u8])] = &[("a", b"alpha"), ("bb", b"")];
    let piped = write_entries(Unseekable(Vec::new()), entries).into_inner();
    assert_eq!(piped, in_memory(entries));
}

#[test]
fn test_append_to_existing_archive() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("out.nar");
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    fs::write(&a, b"first file").unwrap();
    fs::write(&b, b"second file").unwrap();

    let registry = DriverRegistry::with_builtin();
    let opts = ArchiveOptions::default();
    assert_eq!(archive::append(&archive_path, &[a.clone()], &opts, &registry).unwrap(), 1);
    let after_first = fs::metadata(&archive_path).unwrap().len();
    assert_eq!(archive::append(&archive_path, &[b.clone()], &opts, &registry).unwrap(), 1);
    assert!(fs::metadata(&archive_path).unwrap().len() > after_first);

    let items = archive::list(File::open(&archive_path).unwrap()).unwrap();
    assert_eq!(items.len(), 2);
    assert!(items[0].name.as_deref().unwrap().ends_with("a.txt"));
    assert!(items[1].name.as_deref().unwrap().ends_with("b.txt"));
    assert_eq!(items[0].offset, 64);
}

#[test]
fn test_append_refuses_foreign_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(&[0xAB; 100]).unwrap();
    temp_file.flush().unwrap();
    let input = NamedTempFile::new().unwrap();

    let err = archive::append(
        temp_file.path(),
        &[input.path().to_path_buf()],
        &ArchiveOptions::default(),
        &DriverRegistry::new(),
    )
    .unwrap_err();
    assert!(matches!(err, NarError::InvalidMagicNumber { .. }));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(fs::read(temp_file.path()).unwrap(), vec![0xAB; 100]);
}

#[test]
fn test_compressed_roundtrip() {
    let original: Vec<u8> = b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .cycle()
        .take(100_000)
        .copied()
        .collect();
    let dir = tempdir().unwrap();
    let input = dir.path().join("fox.txt");
    fs::write(&input, &original).unwrap();
    let registry = DriverRegistry::with_builtin();

    for compression in [CompressionType::Zstd, CompressionType::Lz4, CompressionType::Brotli] {
        let archive_path = dir.path().join(format!("fox.{}.nar", compression.name()));
        let opts = ArchiveOptions { compression, ..ArchiveOptions::default() };
        archive::create(&archive_path, &[input.clone()], &opts, &registry).unwrap();

        let items = archive::list(File::open(&archive_path).unwrap()).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].compressed);
        assert!(items[0].length_2 < original.len() as u64, "{}", compression.name());

        // length_2 is the stored size: the archive ends right after it
        let span = ITEM_HEADER_SIZE as u64
            + nar::align::round_up_8(items[0].length_1)
            + nar::align::round_up_8(items[0].length_2);
        assert_eq!(fs::metadata(&archive_path).unwrap().len(), 64 + span);

        let name = items[0].name.clone().unwrap();
        let mut restored = Vec::new();
        let found = archive::extract(
            File::open(&archive_path).unwrap(),
            name.as_bytes(),
            &mut restored,
            &registry,
        )
        .unwrap();
        assert_eq!(found, Some(original.len() as u64));
        assert_eq!(restored, original, "{}", compression.name());

        let header = archive::info(File::open(&archive_path).unwrap()).unwrap();
        assert_eq!(header.compression(), compression.code());
    }
}

#[test]
fn test_unregistered_compression_is_skipped_on_unpack() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("data.bin");
    fs::write(&input, vec![5u8; 4096]).unwrap();
    let archive_path = dir.path().join("z.nar");
    let opts = ArchiveOptions { compression: CompressionType::Zstd, ..ArchiveOptions::default() };
    archive::create(&archive_path, &[input], &opts, &DriverRegistry::with_builtin()).unwrap();

    let out = dir.path().join("out");
    let report = archive::unpack(File::open(&archive_path).unwrap(), &out, &DriverRegistry::new()).unwrap();
    assert_eq!((report.files, report.skipped), (0, 1));
}

#[test]
fn test_short_content_source() {
    let mut writer = NarWriter::create(Cursor::new(Vec::new()), NarHeader::current()).unwrap();
    let mut src = ReadSource::from_slice(b"only eleven");
    match writer.append_entry(b"f", 64, &mut src, 0) {
        Err(e @ NarError::ShortContent { .. }) => {
            assert_eq!(e.to_string(), "content source produced 11 of 64 declared bytes");
            assert_eq!(e.exit_code(), 4);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_unknown_item_kind_is_listed_and_skipped() {
    let mut bytes = in_memory(&[("before", b"1")]);
    let sign = ItemHeader {
        magic:    u64::from_le_bytes(*b"[ SIGN ]"),
        flags:    0,
        length_1: 3,
        length_2: 17,
    };
    bytes.extend_from_slice(&sign.encode());
    bytes.extend_from_slice(&[0xEE; 8 + 24]);
    bytes.extend_from_slice(&in_memory(&[("after", b"2")])[64..]);

    let items = archive::list(Cursor::new(bytes)).unwrap();
    let kinds: Vec<_> = items.iter().map(|i| i.kind).collect();
    assert_eq!(kinds, vec!["file", "unknown", "file"]);
    assert_eq!(items[1].magic, hex::encode(b"[ SIGN ]"));
    assert_eq!(items[1].name, None);
    assert_eq!((items[1].length_1, items[1].length_2), (3, 17));
    assert_eq!(items[2].name.as_deref(), Some("after"));

    let json = serde_json::to_value(&items).unwrap();
    assert_eq!(json[1]["kind"], "unknown");
    assert!(json[1].get("name").is_none());
}

#[test]
fn test_unpack_directory_tree() {
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree");
    fs::create_dir_all(tree.join("sub")).unwrap();
    fs::write(tree.join("top.txt"), b"top").unwrap();
    fs::write(tree.join("sub/inner.txt"), b"inner").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let script = tree.join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o744)).unwrap();
        std::os::unix::fs::symlink(tree.join("top.txt"), tree.join("link")).unwrap();
    }

    let archive_path = dir.path().join("tree.nar");
    let registry = DriverRegistry::with_builtin();
    archive::create(&archive_path, &[tree.clone()], &ArchiveOptions::default(), &registry).unwrap();

    let names: Vec<String> = archive::list(File::open(&archive_path).unwrap())
        .unwrap()
        .into_iter()
        .filter_map(|i| i.name)
        .collect();
    assert!(names.contains(&"tree/top.txt".to_string()));
    assert!(names.contains(&"tree/sub/inner.txt".to_string()));
    assert!(!names.iter().any(|n| n.ends_with("link")));

    let out = dir.path().join("out");
    let report = archive::unpack(File::open(&archive_path).unwrap(), &out, &registry).unwrap();
    assert_eq!(report.skipped, 0);
    assert_eq!(fs::read(out.join("tree/top.txt")).unwrap(), b"top");
    assert_eq!(fs::read(out.join("tree/sub/inner.txt")).unwrap(), b"inner");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(out.join("tree/run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        let mode = fs::metadata(out.join("tree/top.txt")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0);
    }
}

#[test]
fn test_unpack_refuses_escaping_names() {
    let bytes = in_memory(&[("../escape.txt", b"bad"), ("/abs.txt", b"bad"), ("ok.txt", b"good")]);
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let report = archive::unpack(Cursor::new(bytes), &out, &DriverRegistry::new()).unwrap();
    assert_eq!((report.files, report.skipped), (1, 2));
    assert_eq!(fs::read(out.join("ok.txt")).unwrap(), b"good");
    assert!(!dir.path().join("escape.txt").exists());
}

#[test]
fn test_extract_from_pipe() {
    let bytes = in_memory(&[("skip.me", &[1u8; 300]), ("want", b"found it")]);
    let mut out = Vec::new();
    let found = archive::extract(Unseekable(Cursor::new(bytes)), b"want", &mut out, &DriverRegistry::new()).unwrap();
    assert_eq!(found, Some(8));
    assert_eq!(out, b"found it");
}

#[test]
fn test_item_header_bytes_on_disk() {
    let bytes = in_memory(&[("a.txt", b"hello")]);
    let header = ItemHeader::read(&bytes[64..]).unwrap();
    assert_eq!(header.magic, FILE_MAGIC);
    assert_eq!(header.length_1, 5);
    assert_eq!(header.length_2, 5);
    let mut tail = Vec::new();
    Cursor::new(&bytes[96..]).read_to_end(&mut tail).unwrap();
    assert_eq!(tail, b"a.txt\0\0\0hello\0\0\0");
}
