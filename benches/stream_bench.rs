use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nar::source::ReadSource;
use nar::{NarHeader, NarReader, NarWriter, Unseekable};
use std::io::Cursor;

fn build_archive(entries: usize, size: usize) -> Vec<u8> {
    let data = vec![42u8; size];
    let mut writer = NarWriter::create(Cursor::new(Vec::new()), NarHeader::current()).unwrap();
    for i in 0..entries {
        let name = format!("entry-{i:05}.bin");
        let mut src = ReadSource::from_slice(&data);
        writer.append_entry(name.as_bytes(), size as u64, &mut src, 0).unwrap();
    }
    writer.into_inner().unwrap().into_inner()
}

fn bench_write(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];

    c.bench_function("write_1mb_entry", |b| {
        b.iter(|| {
            let mut writer = NarWriter::create(Cursor::new(Vec::new()), NarHeader::current()).unwrap();
            let mut src = ReadSource::from_slice(black_box(&data));
            writer.append_entry(b"bench.bin", data.len() as u64, &mut src, 0).unwrap();
            writer.into_inner().unwrap()
        })
    });
}

fn bench_list(c: &mut Criterion) {
    let archive = build_archive(1000, 4096);

    c.bench_function("list_1000_entries_seek", |b| {
        b.iter(|| {
            let mut reader = NarReader::open(Cursor::new(black_box(&archive[..])));
            let mut count = 0;
            while reader.next_item().unwrap().is_some() {
                count += 1;
            }
            count
        })
    });

    c.bench_function("list_1000_entries_pipe", |b| {
        b.iter(|| {
            let mut reader = NarReader::open(Unseekable(black_box(&archive[..])));
            let mut count = 0;
            while reader.next_item().unwrap().is_some() {
                count += 1;
            }
            count
        })
    });
}

criterion_group!(benches, bench_write, bench_list);
criterion_main!(benches);
