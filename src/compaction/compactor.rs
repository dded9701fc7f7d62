//! Partitioned mob file compactor.
//!
//! The compactor executes a selected [`CompactionRequest`]:
//!
//! 1. Del files are merged down to the configured cap, chunk by chunk, so
//!    later scans never open an unbounded number of tombstone files.
//! 2. The merged del readers are pre-opened and shared read-only with every
//!    partition worker.
//! 3. Partitions compact in parallel on the worker pool. Within a
//!    partition, mob files are processed in sequential batches: each batch
//!    is scanned together with all del files and rewritten into one new mob
//!    file plus one reference file, which are then committed and
//!    bulkloaded.
//!
//! A batch moves through `INIT → MOB_OPEN → REF_OPEN → SCAN_DONE →
//! COMMITTED → ATTACHED`, with an undo action armed at each step that
//! creates state. On any failure the armed actions run in reverse, so a
//! bulkloaded reference never points at a missing mob file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use log::{error, info, warn};

use crate::bulkload::BulkloadService;
use crate::family::ColumnFamily;
use crate::options::Options;
use crate::scan::{ScanType, StoreFileSource, StoreScanner};
use crate::store::format::{encode_u64, BULKLOAD_TIME_KEY};
use crate::store::{
    create_del_writer, create_mob_writer, create_ref_writer, StoreFile, StoreFileReader,
    StoreFileWriter,
};
use crate::types::{Cell, Tag};
use crate::util::filename::{format_date, MobPaths};
use crate::util::fs::{self, FileStatus};
use crate::{Error, Result};

use super::pool::WorkerPool;
use super::select::FileSelector;
use super::{CompactionRequest, MobFileCompactor, Partition};

/// Compacts mob files in partitions grouped by start key and date bucket.
pub struct PartitionedMobCompactor {
    shared: Arc<CompactorShared>,
    pool: WorkerPool,
}

/// State shared between the caller thread and partition workers.
struct CompactorShared {
    options: Options,
    family: ColumnFamily,
    paths: MobPaths,
    bulkload: Arc<dyn BulkloadService>,
    table_name_tag: Tag,
    /// Fixed wall clock for deterministic runs; `None` reads the system
    /// clock.
    clock_ms: Option<u64>,
}

impl PartitionedMobCompactor {
    /// Create a compactor for one column family of one table.
    pub fn new(
        options: Options,
        family: ColumnFamily,
        paths: MobPaths,
        bulkload: Arc<dyn BulkloadService>,
    ) -> Result<Self> {
        options.validate()?;
        let pool = WorkerPool::new(options.compaction_threads);
        let table_name_tag = Tag::table_name(paths.table());
        Ok(Self {
            shared: Arc::new(CompactorShared {
                options,
                family,
                paths,
                bulkload,
                table_name_tag,
                clock_ms: None,
            }),
            pool,
        })
    }

    /// Pin the wall clock, making selection time and date buckets
    /// deterministic.
    pub fn with_clock(mut self, now_ms: u64) -> Self {
        let shared = Arc::get_mut(&mut self.shared)
            .expect("clock must be set before workers share the compactor");
        shared.clock_ms = Some(now_ms);
        self
    }

    /// Execute a selected request. Exposed for callers that run their own
    /// selection.
    pub fn perform(&self, request: CompactionRequest) -> Result<Vec<PathBuf>> {
        let shared = &self.shared;

        let del_paths: Vec<PathBuf> = request
            .del_files
            .iter()
            .map(|f| f.path.clone())
            .collect();
        let new_del_paths = shared.compact_del_files(&request, del_paths)?;

        // Pre-open the del readers so partition workers never race on a
        // cold open. The store files (and with them the readers) are
        // released after every partition settles.
        let mut del_store_files = Vec::with_capacity(new_del_paths.len());
        let mut del_readers = Vec::with_capacity(new_del_paths.len());
        for path in &new_del_paths {
            let mut store_file = StoreFile::open(path)?;
            del_readers.push(store_file.create_reader()?);
            del_store_files.push(store_file);
        }
        info!("after merging, there are {} del files", del_readers.len());

        let paths = self.compact_mob_files(&request, &del_readers)?;
        info!("after compaction, there are {} mob files", paths.len());

        drop(del_readers);
        drop(del_store_files);

        // The del files only become garbage once every mob file has been
        // rewritten against them.
        if request.is_all_files() && !new_del_paths.is_empty() {
            info!(
                "all files were selected, archiving {} del files",
                new_del_paths.len()
            );
            let archive = shared.paths.archive_family_dir(&shared.family.name);
            if let Err(e) = fs::remove_mob_files(&archive, &new_del_paths) {
                error!("failed to archive the del files: {}", e);
            }
        }

        Ok(paths)
    }

    /// Fan partitions out to the worker pool and collect their outputs.
    ///
    /// Every worker settles before a failure is raised; partitions that
    /// completed keep their outputs (their inputs are already archived).
    fn compact_mob_files(
        &self,
        request: &CompactionRequest,
        del_readers: &[Arc<StoreFileReader>],
    ) -> Result<Vec<PathBuf>> {
        if request.partitions.is_empty() {
            info!("no partitions of mob files");
            return Ok(Vec::new());
        }

        let mut handles = Vec::with_capacity(request.partitions.len());
        for partition in &request.partitions {
            let shared = Arc::clone(&self.shared);
            let partition = partition.clone();
            let del_readers = del_readers.to_vec();
            let selection_time = request.selection_time;
            let key = partition.key.clone();
            let handle = self.pool.submit(move || {
                info!(
                    "compacting mob files for partition {}",
                    partition.key.as_string()
                );
                shared.compact_mob_file_partition(&partition, &del_readers, selection_time)
            });
            handles.push((key, handle));
        }

        let total = handles.len();
        let mut failed = 0usize;
        let mut paths = Vec::new();
        for (key, handle) in handles {
            match handle.join() {
                Ok(Ok(mut partition_paths)) => paths.append(&mut partition_paths),
                Ok(Err(e)) => {
                    error!("failed to compact partition {}: {}", key.as_string(), e);
                    failed += 1;
                }
                Err(e) => {
                    error!("worker lost for partition {}: {}", key.as_string(), e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(Error::PartialFailure { failed, total });
        }
        Ok(paths)
    }
}

impl MobFileCompactor for PartitionedMobCompactor {
    fn compact(&self, files: Vec<FileStatus>, is_force_all_files: bool) -> Result<Vec<PathBuf>> {
        if files.is_empty() {
            info!("no candidate mob files");
            return Ok(Vec::new());
        }
        info!(
            "compacting {} candidates, is_force_all_files: {}",
            files.len(),
            is_force_all_files
        );

        let shared = &self.shared;
        let selection_time = shared.now_ms();
        let selector = FileSelector::new(&shared.options, &shared.family, shared.current_date());
        let request = selector.select(&files, is_force_all_files, selection_time)?;
        self.perform(request)
    }
}

impl CompactorShared {
    fn now_ms(&self) -> u64 {
        self.clock_ms.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64
        })
    }

    fn current_date(&self) -> NaiveDate {
        DateTime::from_timestamp_millis(self.now_ms() as i64)
            .map(|dt| dt.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Merge del files until at most `delfile_max_count` remain.
    ///
    /// Files are merged in chunks of the batch size; a chunk of one is
    /// carried over unchanged. Recursion ends when the cap is met.
    fn compact_del_files(
        &self,
        request: &CompactionRequest,
        del_paths: Vec<PathBuf>,
    ) -> Result<Vec<PathBuf>> {
        if del_paths.len() <= self.options.delfile_max_count {
            return Ok(del_paths);
        }
        info!(
            "merging {} del files down to at most {}",
            del_paths.len(),
            self.options.delfile_max_count
        );

        let mut merged = Vec::new();
        for chunk in del_paths.chunks(self.options.compaction_batch_size) {
            if chunk.len() == 1 {
                merged.push(chunk[0].clone());
                continue;
            }
            merged.push(self.compact_del_files_in_batch(request, chunk)?);
        }

        self.compact_del_files(request, merged)
    }

    /// Merge one chunk of del files into a single new del file.
    fn compact_del_files_in_batch(
        &self,
        request: &CompactionRequest,
        chunk: &[PathBuf],
    ) -> Result<PathBuf> {
        let mut store_files = Vec::with_capacity(chunk.len());
        let mut readers = Vec::with_capacity(chunk.len());
        let mut max_seq_id = 0u64;
        for path in chunk {
            let mut store_file = StoreFile::open(path)?;
            let reader = store_file.create_reader()?;
            max_seq_id = max_seq_id.max(reader.max_sequence_id());
            readers.push(reader);
            store_files.push(store_file);
        }

        let mut scanner = StoreScanner::from_readers(
            readers,
            ScanType::RetainDeletes,
            self.family.max_versions,
            self.family.ttl,
            request.selection_time,
        )?;

        let date = format_date(
            DateTime::from_timestamp_millis(request.selection_time as i64)
                .map(|dt| dt.date_naive())
                .unwrap_or_else(|| Utc::now().date_naive()),
        );
        let mut writer = create_del_writer(
            &self.paths.temp_dir(),
            &Bytes::new(),
            &date,
            self.family.compaction_compression,
        )?;
        let temp_path = writer.path().to_path_buf();

        let result = self.pump_del_cells(&mut scanner, &mut writer, max_seq_id);
        let temp_path = match result.and_then(|()| writer.close()) {
            Ok(path) => path,
            Err(e) => {
                if let Err(del_err) = fs::delete_path(&temp_path, false) {
                    error!(
                        "failed to delete temp del file {}: {}",
                        temp_path.display(),
                        del_err
                    );
                }
                return Err(e);
            }
        };

        let committed = fs::commit_file(&temp_path, &self.paths.family_dir(&self.family.name))?;

        // The chunk inputs are superseded by the committed merge; losing
        // the archival move only leaves extra del files behind.
        let archive = self.paths.archive_family_dir(&self.family.name);
        if let Err(e) = fs::remove_mob_files(&archive, chunk) {
            error!("failed to archive the old del files: {}", e);
        }

        Ok(committed)
    }

    fn pump_del_cells(
        &self,
        scanner: &mut StoreScanner<StoreFileSource>,
        writer: &mut StoreFileWriter,
        max_seq_id: u64,
    ) -> Result<()> {
        let mut cells = Vec::new();
        loop {
            let has_more = scanner.next(&mut cells, self.options.compaction_kv_max)?;
            for cell in &cells {
                writer.append(cell)?;
            }
            cells.clear();
            if !has_more {
                break;
            }
        }
        writer.append_metadata(max_seq_id, false, None);
        Ok(())
    }

    /// Compact one partition in sequential batches.
    fn compact_mob_file_partition(
        &self,
        partition: &Partition,
        del_readers: &[Arc<StoreFileReader>],
        selection_time: u64,
    ) -> Result<Vec<PathBuf>> {
        let mut new_files = Vec::new();
        let partition_name = partition.key.as_string();
        let bulkload_partition_dir = self.paths.bulkload_partition_dir(&partition_name);
        let bulkload_family_dir = self
            .paths
            .bulkload_family_dir(&partition_name, &self.family.name);

        for batch in partition
            .files
            .chunks(self.options.compaction_batch_size)
        {
            if batch.len() == 1 && del_readers.is_empty() {
                // A lone file with nothing to apply is carried over as-is.
                new_files.push(batch[0].path.clone());
                continue;
            }

            // Wipe the staging directory so a retried batch cannot
            // re-bulkload stale reference files.
            fs::delete_path(&bulkload_partition_dir, true)?;

            self.compact_mob_files_in_batch(
                partition,
                batch,
                del_readers,
                selection_time,
                &bulkload_partition_dir,
                &bulkload_family_dir,
                &mut new_files,
            )?;
        }

        info!(
            "partition {} compacted {} mob files into {}",
            partition_name,
            partition.file_count(),
            new_files.len()
        );
        Ok(new_files)
    }

    /// Compact one batch of mob files against the del set.
    #[allow(clippy::too_many_arguments)]
    fn compact_mob_files_in_batch(
        &self,
        partition: &Partition,
        batch: &[FileStatus],
        del_readers: &[Arc<StoreFileReader>],
        selection_time: u64,
        bulkload_partition_dir: &Path,
        bulkload_family_dir: &Path,
        new_files: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let mut mob_store_files: Vec<StoreFile> =
            batch.iter().map(|status| StoreFile::new(status.clone())).collect();

        let mut readers = Vec::with_capacity(batch.len() + del_readers.len());
        let mut max_seq_id = 0u64;
        let mut expected_cells = 0u64;
        for store_file in &mut mob_store_files {
            max_seq_id = max_seq_id.max(store_file.max_sequence_id()?);
            expected_cells += store_file.mob_cells_count()?.unwrap_or(0);
            readers.push(store_file.create_reader()?);
        }
        readers.extend(del_readers.iter().cloned());

        let mut scanner = StoreScanner::from_readers(
            readers,
            ScanType::DropDeletes,
            self.family.max_versions,
            self.family.ttl,
            selection_time,
        )?;

        let mut ladder = CleanupLadder::new();
        let result = self.run_batch(
            partition,
            &mut scanner,
            max_seq_id,
            expected_cells,
            selection_time,
            bulkload_partition_dir,
            bulkload_family_dir,
            &mut ladder,
            new_files,
        );

        // Armed undo actions run in reverse on every exit; on success only
        // the staging-directory wipe remains armed.
        ladder.unwind();
        result?;

        // Archive the rewritten inputs, never the del files. Losing this
        // move leaves the inputs in the family directory for the next run.
        let input_paths: Vec<PathBuf> = batch.iter().map(|s| s.path.clone()).collect();
        let archive = self.paths.archive_family_dir(&self.family.name);
        if let Err(e) = fs::remove_mob_files(&archive, &input_paths) {
            error!("failed to archive the compacted mob files: {}", e);
        }

        Ok(())
    }

    /// The armed section of a batch: open writers, emit, commit, bulkload.
    #[allow(clippy::too_many_arguments)]
    fn run_batch(
        &self,
        partition: &Partition,
        scanner: &mut StoreScanner<StoreFileSource>,
        max_seq_id: u64,
        expected_cells: u64,
        selection_time: u64,
        bulkload_partition_dir: &Path,
        bulkload_family_dir: &Path,
        ladder: &mut CleanupLadder,
        new_files: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let mut mob_writer = create_mob_writer(
            &self.paths.temp_dir(),
            &partition.key.start_key,
            &partition.latest_date,
            self.family.compaction_compression,
        )?;
        ladder.arm(CleanupAction::TempMobFile(mob_writer.path().to_path_buf()));

        let mob_file_name = mob_writer
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::internal("mob writer path has no file name"))?;

        let mut ref_writer = create_ref_writer(bulkload_family_dir, expected_cells)?;
        ladder.arm(CleanupAction::BulkloadDir(
            bulkload_partition_dir.to_path_buf(),
        ));

        // Writers are always closed (with trailer metadata) before any
        // armed deletion runs, including on a failed scan.
        let mut mob_cells = 0u64;
        let scan_result =
            self.emit_cells(scanner, &mut mob_writer, &mut ref_writer, &mob_file_name, &mut mob_cells);

        mob_writer.append_metadata(max_seq_id, false, Some(mob_cells));
        let mob_close = mob_writer.close();

        ref_writer.append_metadata(max_seq_id, false, None);
        ref_writer.append_file_info(BULKLOAD_TIME_KEY, encode_u64(selection_time));
        let ref_close = ref_writer.close();

        scan_result?;
        let temp_mob_path = mob_close?;
        ref_close?;

        if mob_cells > 0 {
            let committed =
                fs::commit_file(&temp_mob_path, &self.paths.family_dir(&self.family.name))?;
            ladder.disarm_temp_mob();
            ladder.arm(CleanupAction::CommittedMobFile(committed.clone()));

            self.bulkload
                .do_bulk_load(bulkload_partition_dir, self.paths.table())?;
            ladder.disarm_committed_mob();

            new_files.push(committed);
        }

        Ok(())
    }

    /// Pull cells from the scanner, appending each to the mob writer and a
    /// derived reference cell to the ref writer.
    fn emit_cells(
        &self,
        scanner: &mut StoreScanner<StoreFileSource>,
        mob_writer: &mut StoreFileWriter,
        ref_writer: &mut StoreFileWriter,
        mob_file_name: &str,
        mob_cells: &mut u64,
    ) -> Result<()> {
        let mut cells = Vec::new();
        loop {
            let has_more = scanner.next(&mut cells, self.options.compaction_kv_max)?;
            for cell in &cells {
                mob_writer.append(cell)?;
                let reference = create_ref_cell(cell, mob_file_name, &self.table_name_tag);
                ref_writer.append(&reference)?;
                *mob_cells += 1;
            }
            cells.clear();
            if !has_more {
                break;
            }
        }
        Ok(())
    }
}

/// A reference cell: the coordinate of the original cell, valued with the
/// name of the mob file that now holds the payload, tagged with the owning
/// table.
fn create_ref_cell(cell: &Cell, mob_file_name: &str, table_name_tag: &Tag) -> Cell {
    Cell::put(
        cell.key.row.clone(),
        cell.key.family.clone(),
        cell.key.qualifier.clone(),
        cell.key.timestamp,
        mob_file_name.as_bytes().to_vec(),
    )
    .with_tag(table_name_tag.clone())
}

/// Undo actions for the in-flight state of one batch.
enum CleanupAction {
    /// Delete the uncommitted mob file in the temp directory.
    TempMobFile(PathBuf),
    /// Wipe the partition's bulkload staging directory.
    BulkloadDir(PathBuf),
    /// Delete the committed but not yet referenced mob file.
    CommittedMobFile(PathBuf),
}

/// Armed undo actions, executed in reverse arm order.
struct CleanupLadder {
    actions: Vec<CleanupAction>,
}

impl CleanupLadder {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    fn arm(&mut self, action: CleanupAction) {
        self.actions.push(action);
    }

    fn disarm_temp_mob(&mut self) {
        self.actions
            .retain(|a| !matches!(a, CleanupAction::TempMobFile(_)));
    }

    fn disarm_committed_mob(&mut self) {
        self.actions
            .retain(|a| !matches!(a, CleanupAction::CommittedMobFile(_)));
    }

    /// Run every still-armed action in reverse order. Failures are logged;
    /// cleanup never masks the original error.
    fn unwind(&mut self) {
        for action in self.actions.drain(..).rev() {
            let (path, recursive) = match &action {
                CleanupAction::TempMobFile(path) => (path.clone(), false),
                CleanupAction::BulkloadDir(path) => (path.clone(), true),
                CleanupAction::CommittedMobFile(path) => (path.clone(), false),
            };
            if let Err(e) = fs::delete_path(&path, recursive) {
                warn!("cleanup failed for {}: {}", path.display(), e);
            }
        }
    }
}
