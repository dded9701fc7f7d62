//! Benchmarks for mobstore scanning and selection.

use std::sync::Arc;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

use mobstore::store::{create_mob_writer, StoreFileReader};
use mobstore::util::fs::FileStatus;
use mobstore::{
    Cell, ColumnFamily, Compression, FileSelector, OptionsBuilder, ScanType, StoreScanner,
};

fn build_readers(dir: &TempDir, files: usize, cells_per_file: usize) -> Vec<Arc<StoreFileReader>> {
    (0..files)
        .map(|f| {
            let mut writer = create_mob_writer(
                dir.path(),
                &Bytes::from(vec![f as u8]),
                "20240101",
                Compression::None,
            )
            .unwrap();
            for i in 0..cells_per_file {
                let cell = Cell::put(
                    format!("row_{:02}_{:06}", f, i),
                    "f",
                    "q",
                    1000,
                    "x".repeat(64),
                );
                writer.append(&cell).unwrap();
            }
            writer.append_metadata(1, false, Some(cells_per_file as u64));
            let path = writer.close().unwrap();
            Arc::new(StoreFileReader::open(&path).unwrap())
        })
        .collect()
}

/// Benchmark the merged drop-deletes scan across several files.
fn bench_merge_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_scan");

    for files in [2usize, 8].iter() {
        let cells_per_file = 2000;
        let dir = TempDir::new().unwrap();
        let readers = build_readers(&dir, *files, cells_per_file);

        group.throughput(Throughput::Elements((files * cells_per_file) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(files), files, |b, _| {
            b.iter(|| {
                let mut scanner = StoreScanner::from_readers(
                    readers.clone(),
                    ScanType::DropDeletes,
                    3,
                    None,
                    1_000_000,
                )
                .unwrap();

                let mut total = 0usize;
                let mut chunk = Vec::new();
                loop {
                    let more = scanner.next(&mut chunk, 100).unwrap();
                    total += chunk.len();
                    chunk.clear();
                    if !more {
                        break;
                    }
                }
                black_box(total)
            });
        });
    }

    group.finish();
}

/// Benchmark selection over a large candidate list.
fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");

    let candidates: Vec<FileStatus> = (0..10_000)
        .map(|i| {
            FileStatus::new(
                format!("/mob/d202401{:02}_{:02x}", (i % 28) + 1, i % 16),
                (i % 200) as u64,
                true,
            )
        })
        .collect();

    let options = OptionsBuilder::new().mergeable_threshold(100).build().unwrap();
    let family = ColumnFamily::new("mob");
    let today = chrono::NaiveDate::from_ymd_opt(2024, 1, 17).unwrap();

    group.throughput(Throughput::Elements(candidates.len() as u64));
    group.bench_function("10000_candidates", |b| {
        b.iter(|| {
            let selector = FileSelector::new(&options, &family, today);
            black_box(selector.select(&candidates, false, 0).unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_merge_scan, bench_selection);
criterion_main!(benches);
