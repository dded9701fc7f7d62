//! End-to-end compaction workflows over a real directory layout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use mobstore::bulkload::BulkloadService;
use mobstore::store::{create_del_writer, create_mob_writer, StoreFileReader};
use mobstore::util::fs;
use mobstore::{
    Cell, CellType, ColumnFamily, Compression, Error, LocalBulkload, MobFileCompactor, MobPaths,
    Options, OptionsBuilder, PartitionedMobCompactor, TableName,
};

/// 2024-01-17T12:00:00Z, a Wednesday.
const NOW_MS: u64 = 1_705_492_800_000;

const FAMILY: &str = "mob";

struct Fixture {
    _dir: TempDir,
    paths: MobPaths,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let paths = MobPaths::new(dir.path(), TableName::new("t1"));
        Self { _dir: dir, paths }
    }

    fn family_dir(&self) -> PathBuf {
        self.paths.family_dir(FAMILY)
    }

    fn options(&self) -> Options {
        OptionsBuilder::new()
            .mergeable_threshold(1024 * 1024)
            .compaction_batch_size(10)
            .compaction_kv_max(3)
            .compaction_threads(2)
            .build()
            .unwrap()
    }

    fn compactor_with(
        &self,
        options: Options,
        family: ColumnFamily,
        bulkload: Arc<dyn BulkloadService>,
    ) -> PartitionedMobCompactor {
        PartitionedMobCompactor::new(options, family, self.paths.clone(), bulkload)
            .unwrap()
            .with_clock(NOW_MS)
    }

    fn compactor(&self) -> PartitionedMobCompactor {
        let family = ColumnFamily::new(FAMILY).with_max_versions(10);
        let bulkload = Arc::new(LocalBulkload::new(self.paths.clone()));
        self.compactor_with(self.options(), family, bulkload)
    }

    /// Write a mob file into the family directory and return its status.
    fn write_mob_file(
        &self,
        start_key: &[u8],
        date: &str,
        cells: &[Cell],
        max_seq_id: u64,
    ) -> mobstore::FileStatus {
        let mut writer = create_mob_writer(
            &self.family_dir(),
            &Bytes::copy_from_slice(start_key),
            date,
            Compression::None,
        )
        .unwrap();
        for cell in cells {
            writer.append(cell).unwrap();
        }
        writer.append_metadata(max_seq_id, false, Some(cells.len() as u64));
        let path = writer.close().unwrap();
        fs::get_file_status(&path).unwrap()
    }

    /// Write a del file into the family directory and return its status.
    fn write_del_file(&self, date: &str, cells: &[Cell]) -> mobstore::FileStatus {
        let mut writer =
            create_del_writer(&self.family_dir(), &Bytes::new(), date, Compression::None)
                .unwrap();
        for cell in cells {
            writer.append(cell).unwrap();
        }
        writer.append_metadata(1, false, None);
        let path = writer.close().unwrap();
        fs::get_file_status(&path).unwrap()
    }

    fn candidates(&self) -> Vec<mobstore::FileStatus> {
        fs::list_status(&self.family_dir()).unwrap()
    }

    fn family_file_names(&self) -> Vec<String> {
        self.candidates().iter().map(|s| s.file_name()).collect()
    }

    fn store_dir_cells(&self) -> Vec<Cell> {
        let mut cells = Vec::new();
        for status in fs::list_status(&self.paths.store_dir(FAMILY)).unwrap() {
            let reader = StoreFileReader::open(&status.path).unwrap();
            cells.extend_from_slice(reader.cells());
        }
        cells
    }
}

fn read_cells(path: &Path) -> Vec<Cell> {
    StoreFileReader::open(path).unwrap().cells().to_vec()
}

/// A bulkload service that always fails, for atomicity tests.
struct FailingBulkload;

impl BulkloadService for FailingBulkload {
    fn do_bulk_load(&self, _staging_dir: &Path, _table: &TableName) -> mobstore::Result<()> {
        Err(Error::Bulkload("injected failure".into()))
    }
}

/// Empty input compacts to an empty output.
#[test]
fn compaction_empty_input() {
    let fixture = Fixture::new();
    let compactor = fixture.compactor();
    assert!(compactor.compact(Vec::new(), false).unwrap().is_empty());
}

/// A single small file with no del files is carried over without a rewrite.
#[test]
fn compaction_noop_singleton() {
    let fixture = Fixture::new();
    let status = fixture.write_mob_file(&[0xff], "20240101", &[Cell::put("r1", FAMILY, "q", 10, "v")], 5);

    let compactor = fixture.compactor();
    let paths = compactor.compact(fixture.candidates(), false).unwrap();

    assert_eq!(paths, vec![status.path.clone()]);
    // No rewrite happened: the input is still the only family file and
    // nothing was bulkloaded.
    assert_eq!(fixture.family_file_names(), vec![status.file_name()]);
    assert!(fixture.store_dir_cells().is_empty());
}

/// A lone partition file is dropped when del files exist: it was already
/// compacted against them in a previous run.
#[test]
fn compaction_singleton_pruned_with_del_files() {
    let fixture = Fixture::new();
    fixture.write_mob_file(&[0xff], "20240101", &[Cell::put("r1", FAMILY, "q", 10, "v")], 5);
    fixture.write_del_file(
        "20240102",
        &[Cell::delete("r9", FAMILY, "q", 20, CellType::Delete)],
    );

    let compactor = fixture.compactor();
    let paths = compactor.compact(fixture.candidates(), false).unwrap();

    assert!(paths.is_empty());
    // Both inputs stay: nothing was compacted, and del files are only
    // archived after an all-files run.
    assert_eq!(fixture.candidates().len(), 2);
}

/// Two files of one partition merge into a single new mob file with its
/// reference file bulkloaded, inputs archived.
#[test]
fn compaction_two_file_merge() {
    let fixture = Fixture::new();
    let a = fixture.write_mob_file(
        &[0xff],
        "20240101",
        &[
            Cell::put("r1", FAMILY, "q", 10, "payload-1"),
            Cell::put("r3", FAMILY, "q", 10, "payload-3"),
        ],
        7,
    );
    let b = fixture.write_mob_file(
        &[0xff],
        "20240101",
        &[Cell::put("r2", FAMILY, "q", 12, "payload-2")],
        9,
    );

    let mut expected: Vec<Cell> = read_cells(&a.path)
        .into_iter()
        .chain(read_cells(&b.path))
        .collect();
    expected.sort();

    let compactor = fixture.compactor();
    let paths = compactor.compact(fixture.candidates(), false).unwrap();

    assert_eq!(paths.len(), 1);
    let new_name = paths[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(new_name.starts_with("d20240101_ff"));

    // Cell conservation: the new file holds exactly the input cells.
    let mut merged = read_cells(&paths[0]);
    merged.sort();
    assert_eq!(merged, expected);

    // Trailer metadata aggregates the inputs.
    let reader = StoreFileReader::open(&paths[0]).unwrap();
    assert_eq!(reader.max_sequence_id(), 9);
    assert_eq!(reader.mob_cells_count(), Some(3));

    // Reference integrity: every bulkloaded reference points at the new
    // mob file.
    let refs = fixture.store_dir_cells();
    assert_eq!(refs.len(), 3);
    for reference in &refs {
        assert_eq!(reference.value.as_ref(), new_name.as_bytes());
        assert_eq!(reference.tags[0].value.as_ref(), b"default:t1");
    }

    // Inputs archived, only the new file remains in the family dir.
    assert_eq!(fixture.family_file_names(), vec![new_name]);
    let archive = fs::list_status(&fixture.paths.archive_family_dir(FAMILY)).unwrap();
    let archived: Vec<String> = archive.iter().map(|s| s.file_name()).collect();
    assert!(archived.contains(&a.file_name()));
    assert!(archived.contains(&b.file_name()));
}

/// Running compaction again on its own output changes nothing.
#[test]
fn compaction_idempotent_second_run() {
    let fixture = Fixture::new();
    fixture.write_mob_file(&[0xff], "20240101", &[Cell::put("r1", FAMILY, "q", 10, "a")], 1);
    fixture.write_mob_file(&[0xff], "20240101", &[Cell::put("r2", FAMILY, "q", 10, "b")], 2);

    let compactor = fixture.compactor();
    let first = compactor.compact(fixture.candidates(), false).unwrap();
    assert_eq!(first.len(), 1);

    let second = compactor.compact(fixture.candidates(), false).unwrap();
    assert_eq!(second, first);
    assert_eq!(fixture.candidates().len(), 1);
}

/// Del files merge recursively until the cap is met; old del files are
/// archived, the merged file carries every marker.
#[test]
fn compaction_del_cap_recursion() {
    let fixture = Fixture::new();
    for i in 0..5u64 {
        fixture.write_del_file(
            "20240110",
            &[Cell::delete(
                format!("r{}", i),
                FAMILY,
                "q",
                100 + i,
                CellType::Delete,
            )],
        );
    }
    // An oversized mob file keeps the run PART_FILES so the merged del
    // file stays live and observable.
    let big = vec![Cell::put("big", FAMILY, "q", 1, vec![0u8; 4096])];
    fixture.write_mob_file(&[0xaa], "20240101", &big, 1);

    let options = OptionsBuilder::new()
        .mergeable_threshold(1024)
        .delfile_max_count(1)
        .compaction_batch_size(2)
        .build()
        .unwrap();
    let family = ColumnFamily::new(FAMILY).with_max_versions(10);
    let bulkload = Arc::new(LocalBulkload::new(fixture.paths.clone()));
    let compactor = fixture.compactor_with(options, family, bulkload);

    let paths = compactor.compact(fixture.candidates(), false).unwrap();
    assert!(paths.is_empty());

    let del_names: Vec<String> = fixture
        .family_file_names()
        .into_iter()
        .filter(|n| mobstore::util::filename::is_del_file_name(n))
        .collect();
    assert_eq!(del_names.len(), 1);

    let merged = read_cells(&fixture.family_dir().join(&del_names[0]));
    assert_eq!(merged.len(), 5);
    assert!(merged.iter().all(Cell::is_delete));
}

/// After an all-files compaction the del files are archived away.
#[test]
fn compaction_all_files_archives_del_files() {
    let fixture = Fixture::new();
    fixture.write_mob_file(
        &[0xff],
        "20240101",
        &[
            Cell::put("r1", FAMILY, "q", 10, "keep-1"),
            Cell::put("r2", FAMILY, "q", 10, "dropped"),
        ],
        3,
    );
    fixture.write_mob_file(&[0xff], "20240101", &[Cell::put("r3", FAMILY, "q", 10, "keep-3")], 4);
    fixture.write_del_file(
        "20240102",
        &[Cell::delete("r2", FAMILY, "q", 10, CellType::Delete)],
    );

    let compactor = fixture.compactor();
    let paths = compactor.compact(fixture.candidates(), false).unwrap();

    assert_eq!(paths.len(), 1);
    let survivors = read_cells(&paths[0]);
    let values: Vec<&[u8]> = survivors.iter().map(|c| c.value.as_ref()).collect();
    assert_eq!(values, vec![b"keep-1".as_slice(), b"keep-3".as_slice()]);

    // No del file remains live.
    assert!(fixture
        .family_file_names()
        .iter()
        .all(|n| !mobstore::util::filename::is_del_file_name(n)));

    // References cover only the surviving cells.
    assert_eq!(fixture.store_dir_cells().len(), 2);
}

/// A batch whose cells are all masked commits nothing but still archives
/// its inputs.
#[test]
fn compaction_fully_masked_batch() {
    let fixture = Fixture::new();
    fixture.write_mob_file(&[0xff], "20240101", &[Cell::put("r1", FAMILY, "q", 10, "v")], 1);
    fixture.write_del_file(
        "20240102",
        &[Cell::delete("r1", FAMILY, "q", 20, CellType::DeleteColumn)],
    );

    let compactor = fixture.compactor();
    let paths = compactor.compact(fixture.candidates(), true).unwrap();

    assert!(paths.is_empty());
    // Everything was selected and everything is gone: masked input and del
    // file archived, no output committed, nothing bulkloaded.
    assert!(fixture.family_file_names().is_empty());
    assert!(fixture.store_dir_cells().is_empty());
}

/// Distinct partitions compact independently and in parallel.
#[test]
fn compaction_multiple_partitions() {
    let fixture = Fixture::new();
    for (key, date) in [(0xaau8, "20240101"), (0xbb, "20240101"), (0xcc, "20240102")] {
        for i in 0..2 {
            fixture.write_mob_file(
                &[key],
                date,
                &[Cell::put(format!("{:02x}-r{}", key, i), FAMILY, "q", 10, "v")],
                1,
            );
        }
    }

    let compactor = fixture.compactor();
    let mut paths = compactor.compact(fixture.candidates(), false).unwrap();
    paths.sort();

    assert_eq!(paths.len(), 3);
    assert_eq!(fixture.candidates().len(), 3);
    assert_eq!(fixture.store_dir_cells().len(), 6);
}

/// Candidates that are not mob files are irrelevant, not errors.
#[test]
fn compaction_irrelevant_candidates() {
    let fixture = Fixture::new();
    fs::create_dir_if_missing(&fixture.family_dir()).unwrap();
    std::fs::write(fixture.family_dir().join("not-a-mob-file.txt"), b"x").unwrap();

    let compactor = fixture.compactor();
    let paths = compactor.compact(fixture.candidates(), false).unwrap();
    assert!(paths.is_empty());
    assert_eq!(fixture.candidates().len(), 1);
}

/// An induced bulkload failure leaves no dangling state: the committed mob
/// file is rolled back, staging is wiped, inputs stay live.
#[test]
fn compaction_bulkload_failure_rolls_back() {
    let fixture = Fixture::new();
    let a = fixture.write_mob_file(&[0xff], "20240101", &[Cell::put("r1", FAMILY, "q", 10, "a")], 1);
    let b = fixture.write_mob_file(&[0xff], "20240101", &[Cell::put("r2", FAMILY, "q", 10, "b")], 2);

    let family = ColumnFamily::new(FAMILY).with_max_versions(10);
    let compactor = fixture.compactor_with(fixture.options(), family, Arc::new(FailingBulkload));

    let err = compactor.compact(fixture.candidates(), false).unwrap_err();
    assert!(matches!(err, Error::PartialFailure { failed: 1, total: 1 }));

    // The inputs are untouched and live.
    let mut names = fixture.family_file_names();
    names.sort();
    let mut expected = vec![a.file_name(), b.file_name()];
    expected.sort();
    assert_eq!(names, expected);

    // No reference was attached, no new mob file survives, staging and
    // temp are clean.
    assert!(fixture.store_dir_cells().is_empty());
    assert!(fs::list_status(&fixture.paths.bulkload_dir()).unwrap().is_empty());
    let temp_entries: Vec<_> = fs::list_status(&fixture.paths.temp_dir())
        .unwrap()
        .into_iter()
        .filter(|s| s.is_file)
        .collect();
    assert!(temp_entries.is_empty());

    // Nothing was archived.
    assert!(fs::list_status(&fixture.paths.archive_family_dir(FAMILY))
        .unwrap()
        .is_empty());
}

/// A failing partition does not roll back partitions that already
/// completed: the contract is partition-atomic.
#[test]
fn compaction_partial_failure_keeps_completed_partitions() {
    let fixture = Fixture::new();
    fixture.write_mob_file(&[0xaa], "20240101", &[Cell::put("a1", FAMILY, "q", 10, "v")], 1);
    fixture.write_mob_file(&[0xaa], "20240101", &[Cell::put("a2", FAMILY, "q", 10, "v")], 2);
    let candidates = fixture.candidates();

    // Corrupt the second partition's file after probing so its batch
    // fails while the first compacts cleanly.
    let bad = fixture.write_mob_file(&[0xbb], "20240101", &[Cell::put("b1", FAMILY, "q", 10, "v")], 1);
    let bad2 = fixture.write_mob_file(&[0xbb], "20240101", &[Cell::put("b2", FAMILY, "q", 10, "v")], 2);
    std::fs::write(&bad.path, b"garbage").unwrap();
    std::fs::write(&bad2.path, b"garbage").unwrap();

    let mut all = candidates;
    all.push(fs::get_file_status(&bad.path).unwrap());
    all.push(fs::get_file_status(&bad2.path).unwrap());

    let compactor = fixture.compactor();
    let err = compactor.compact(all, false).unwrap_err();
    assert!(matches!(err, Error::PartialFailure { failed: 1, total: 2 }));

    // The healthy partition's output is live and bulkloaded.
    let refs = fixture.store_dir_cells();
    assert_eq!(refs.len(), 2);
}
