//! Candidate selection: classify files and group them into partitions.
//!
//! Selection walks the candidate list once, routing each entry to exactly
//! one of three buckets: the del set, a compaction partition, or the
//! irrelevant count. Mob files land in the partition keyed by their
//! `(start key, date bucket)` under the family's partition policy, provided
//! their size is under the bucket's threshold.

use std::collections::HashMap;

use chrono::{Datelike, Days, NaiveDate};
use log::info;

use crate::family::{ColumnFamily, PartitionPolicy};
use crate::options::Options;
use crate::util::filename::{self, MobFileName};
use crate::util::fs::{self, FileStatus};
use crate::Result;

use super::{CompactionRequest, CompactionType, Partition, PartitionKey};

/// The date bucket and size threshold a policy assigns to a file date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyBucket {
    /// Whether the file is excluded from compaction under the policy.
    pub skip_compaction: bool,
    /// Date bucket, `YYYYMMDD`.
    pub date: String,
    /// Mergeable-size cut-off for the bucket.
    pub threshold: u64,
}

impl PolicyBucket {
    fn skip() -> Self {
        Self {
            skip_compaction: true,
            date: String::new(),
            threshold: 0,
        }
    }

    fn new(date: String, threshold: u64) -> Self {
        Self {
            skip_compaction: false,
            date,
            threshold,
        }
    }
}

/// Selects del files and small mob files for compaction.
pub struct FileSelector<'a> {
    options: &'a Options,
    family: &'a ColumnFamily,
    current_date: NaiveDate,
}

impl<'a> FileSelector<'a> {
    /// Create a selector evaluating thresholds against `current_date`.
    pub fn new(options: &'a Options, family: &'a ColumnFamily, current_date: NaiveDate) -> Self {
        Self {
            options,
            family,
            current_date,
        }
    }

    /// Classify the candidates into a compaction request.
    ///
    /// Directory entries, unresolvable links and malformed names count as
    /// irrelevant; filesystem probe failures other than NotFound surface.
    pub fn select(
        &self,
        candidates: &[FileStatus],
        is_force_all_files: bool,
        selection_time: u64,
    ) -> Result<CompactionRequest> {
        let mut del_files = Vec::new();
        let mut partitions: HashMap<PartitionKey, Partition> = HashMap::new();
        let mut selected_count = 0usize;
        let mut irrelevant_count = 0usize;

        for file in candidates {
            if !file.is_file {
                irrelevant_count += 1;
                continue;
            }

            // A link stands in for one of several physical locations; an
            // unresolvable link is irrelevant, not an error.
            let linked = if filename::is_link_path(&file.path) {
                match fs::resolve_link(&file.path) {
                    Ok(Some(status)) => status,
                    Ok(None) => {
                        irrelevant_count += 1;
                        continue;
                    }
                    Err(e) if e.is_not_found() => {
                        irrelevant_count += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                file.clone()
            };

            let name = linked.file_name();
            if filename::is_del_file_name(&name) {
                del_files.push(file.clone());
                continue;
            }

            let parsed = match MobFileName::parse(&name) {
                Ok(parsed) => parsed,
                Err(_) => {
                    irrelevant_count += 1;
                    continue;
                }
            };

            let bucket = self.fill_partition(parsed.date());
            if is_force_all_files || (!bucket.skip_compaction && linked.len < bucket.threshold) {
                let key = PartitionKey {
                    start_key: parsed.start_key().clone(),
                    date: bucket.date.clone(),
                };
                partitions
                    .entry(key.clone())
                    .or_insert_with(|| Partition::new(key, bucket.threshold))
                    .add_file(file.clone(), parsed.date());
                selected_count += 1;
            }
        }

        // A lone file in a partition has already been compacted against the
        // del files in a previous run; recompacting it alone against the
        // same del set reproduces the same artifact.
        if !is_force_all_files && !del_files.is_empty() {
            let before: usize = partitions.values().map(Partition::file_count).sum();
            partitions.retain(|_, partition| partition.file_count() > 1);
            let after: usize = partitions.values().map(Partition::file_count).sum();
            selected_count -= before - after;
        }

        let compaction_type =
            if del_files.len() + selected_count + irrelevant_count == candidates.len() {
                CompactionType::AllFiles
            } else {
                CompactionType::PartFiles
            };

        info!(
            "compaction selection: type {:?}, {} del files, {} selected files, {} irrelevant files",
            compaction_type,
            del_files.len(),
            selected_count,
            irrelevant_count
        );

        let mut partitions: Vec<Partition> = partitions.into_values().collect();
        partitions.sort_by(|a, b| {
            a.key
                .start_key
                .cmp(&b.key.start_key)
                .then_with(|| a.key.date.cmp(&b.key.date))
        });

        Ok(CompactionRequest {
            partitions,
            del_files,
            selection_time,
            compaction_type,
        })
    }

    /// Compute the date bucket and threshold for a file date under the
    /// family's partition policy.
    pub fn fill_partition(&self, file_date: &str) -> PolicyBucket {
        let base = self.options.mergeable_threshold;
        let date = match filename::parse_date(file_date) {
            Some(date) => date,
            None => return PolicyBucket::skip(),
        };

        match self.family.mob_compact_partition_policy {
            PartitionPolicy::Daily => PolicyBucket::new(file_date.to_string(), base),
            PartitionPolicy::Weekly => {
                if in_current_week(date, self.current_date) {
                    PolicyBucket::new(file_date.to_string(), base)
                } else {
                    PolicyBucket::new(
                        filename::format_date(first_day_of_week(date)),
                        2 * base,
                    )
                }
            }
            PartitionPolicy::Monthly => {
                if in_current_week(date, self.current_date) {
                    PolicyBucket::new(file_date.to_string(), base)
                } else if in_current_month(date, self.current_date) {
                    PolicyBucket::new(
                        filename::format_date(first_day_of_week(date)),
                        2 * base,
                    )
                } else {
                    PolicyBucket::new(
                        filename::format_date(first_day_of_month(date)),
                        3 * base,
                    )
                }
            }
        }
    }
}

/// First day (Monday) of the ISO week containing `date`.
fn first_day_of_week(date: NaiveDate) -> NaiveDate {
    date - Days::new(date.weekday().num_days_from_monday() as u64)
}

/// First day of the month containing `date`.
fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).expect("day 1 is always valid")
}

fn in_current_week(date: NaiveDate, today: NaiveDate) -> bool {
    first_day_of_week(date) == first_day_of_week(today)
}

fn in_current_month(date: NaiveDate, today: NaiveDate) -> bool {
    date.year() == today.year() && date.month() == today.month()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsBuilder;
    use bytes::Bytes;

    fn options(mergeable: u64) -> Options {
        OptionsBuilder::new()
            .mergeable_threshold(mergeable)
            .build()
            .unwrap()
    }

    fn mob_status(date: &str, key_hex: &str, len: u64) -> FileStatus {
        FileStatus::new(format!("/mob/d{}_{}", date, key_hex), len, true)
    }

    fn del_status(date: &str, len: u64) -> FileStatus {
        FileStatus::new(format!("/mob/d{}__del", date), len, true)
    }

    fn today() -> NaiveDate {
        // A Wednesday.
        NaiveDate::from_ymd_opt(2024, 1, 17).unwrap()
    }

    #[test]
    fn test_daily_selection_groups_by_date() {
        let opts = options(64);
        let family = ColumnFamily::new("mob");
        let selector = FileSelector::new(&opts, &family, today());

        let candidates = vec![
            mob_status("20240101", "ff", 10),
            mob_status("20240101", "ff", 20),
            mob_status("20240102", "ff", 10),
            mob_status("20240101", "aa", 10),
        ];
        let request = selector.select(&candidates, false, 0).unwrap();

        assert_eq!(request.partitions.len(), 3);
        assert!(request.del_files.is_empty());
        assert!(request.is_all_files());

        let big = selector
            .select(&[mob_status("20240101", "ff", 100)], false, 0)
            .unwrap();
        assert!(big.partitions.is_empty());
        assert_eq!(big.compaction_type, CompactionType::PartFiles);
    }

    #[test]
    fn test_force_all_files_overrides_threshold() {
        let opts = options(64);
        let family = ColumnFamily::new("mob");
        let selector = FileSelector::new(&opts, &family, today());

        let request = selector
            .select(&[mob_status("20240101", "ff", 100)], true, 0)
            .unwrap();
        assert_eq!(request.partitions.len(), 1);
        assert!(request.is_all_files());
    }

    #[test]
    fn test_weekly_escalation() {
        let opts = options(64);
        let family =
            ColumnFamily::new("mob").with_partition_policy(PartitionPolicy::Weekly);
        let selector = FileSelector::new(&opts, &family, today());

        // Within the current week of 2024-01-17: threshold stays 64, so a
        // 100-byte file is not eligible.
        let current = selector
            .select(&[mob_status("20240116", "ff", 100)], false, 0)
            .unwrap();
        assert!(current.partitions.is_empty());

        // Two weeks earlier: threshold doubles and the file buckets under
        // its week's Monday.
        let older = selector
            .select(&[mob_status("20240103", "ff", 100)], false, 0)
            .unwrap();
        assert_eq!(older.partitions.len(), 1);
        assert_eq!(older.partitions[0].key.date, "20240101");
        assert_eq!(older.partitions[0].threshold, 128);
        // The member's own date still names the output.
        assert_eq!(older.partitions[0].latest_date, "20240103");
    }

    #[test]
    fn test_monthly_escalation() {
        let opts = options(64);
        let family =
            ColumnFamily::new("mob").with_partition_policy(PartitionPolicy::Monthly);
        let selector = FileSelector::new(&opts, &family, today());

        // Current week: daily bucket, base threshold.
        let bucket = selector.fill_partition("20240116");
        assert_eq!(bucket, PolicyBucket::new("20240116".into(), 64));

        // Current month, earlier week: weekly bucket, doubled.
        let bucket = selector.fill_partition("20240103");
        assert_eq!(bucket, PolicyBucket::new("20240101".into(), 128));

        // Earlier month: monthly bucket, tripled.
        let bucket = selector.fill_partition("20231220");
        assert_eq!(bucket, PolicyBucket::new("20231201".into(), 192));
    }

    #[test]
    fn test_unparsable_date_skips() {
        let opts = options(64);
        let family = ColumnFamily::new("mob");
        let selector = FileSelector::new(&opts, &family, today());

        let bucket = selector.fill_partition("20241399");
        assert!(bucket.skip_compaction);
    }

    #[test]
    fn test_del_files_split_out() {
        let opts = options(64);
        let family = ColumnFamily::new("mob");
        let selector = FileSelector::new(&opts, &family, today());

        let candidates = vec![
            mob_status("20240101", "ff", 10),
            mob_status("20240101", "ff", 15),
            del_status("20240102", 5),
        ];
        let request = selector.select(&candidates, false, 0).unwrap();

        assert_eq!(request.del_files.len(), 1);
        assert_eq!(request.partitions.len(), 1);
        assert!(request.is_all_files());
    }

    #[test]
    fn test_singleton_prune_with_del_files() {
        let opts = options(64);
        let family = ColumnFamily::new("mob");
        let selector = FileSelector::new(&opts, &family, today());

        let candidates = vec![mob_status("20240101", "ff", 10), del_status("20240102", 5)];
        let request = selector.select(&candidates, false, 0).unwrap();

        // The lone mob file is dropped, so the selection no longer covers
        // every candidate.
        assert!(request.partitions.is_empty());
        assert_eq!(request.del_files.len(), 1);
        assert_eq!(request.compaction_type, CompactionType::PartFiles);

        // Without del files the singleton survives.
        let request = selector
            .select(&[mob_status("20240101", "ff", 10)], false, 0)
            .unwrap();
        assert_eq!(request.partitions.len(), 1);
        assert!(request.is_all_files());
    }

    #[test]
    fn test_irrelevant_entries() {
        let opts = options(64);
        let family = ColumnFamily::new("mob");
        let selector = FileSelector::new(&opts, &family, today());

        let candidates = vec![
            FileStatus::new("/mob/subdir", 0, false),
            FileStatus::new("/mob/not-a-mob-file.txt", 10, true),
            mob_status("20240101", "ff", 10),
            mob_status("20240101", "ff", 12),
        ];
        let request = selector.select(&candidates, false, 0).unwrap();

        assert_eq!(request.partitions.len(), 1);
        assert_eq!(request.partitions[0].file_count(), 2);
        // Directory and malformed name count irrelevant, so the request
        // still covers all candidates.
        assert!(request.is_all_files());
    }

    #[test]
    fn test_link_resolution() {
        let opts = options(64);
        let family = ColumnFamily::new("mob");
        let selector = FileSelector::new(&opts, &family, today());

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("d20240101_ff");
        std::fs::write(&target, vec![0u8; 10]).unwrap();

        let link = dir.path().join("d20240101_ff.link");
        std::fs::write(&link, format!("{}\n", target.display())).unwrap();
        let link_status = fs::get_file_status(&link).unwrap();

        let request = selector
            .select(std::slice::from_ref(&link_status), false, 0)
            .unwrap();
        assert_eq!(request.partitions.len(), 1);
        // The candidate itself, not the link target, joins the partition.
        assert_eq!(request.partitions[0].files[0].path, link);
        assert_eq!(
            request.partitions[0].key.start_key,
            Bytes::from_static(&[0xff])
        );

        // A link with no existing target is irrelevant.
        let dead = dir.path().join("d20240101_aa.link");
        std::fs::write(&dead, format!("{}\n", dir.path().join("gone").display())).unwrap();
        let dead_status = fs::get_file_status(&dead).unwrap();

        let request = selector.select(&[dead_status], false, 0).unwrap();
        assert!(request.partitions.is_empty());
        assert!(request.is_all_files());
    }
}
