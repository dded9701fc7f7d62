//! Column family descriptor.
//!
//! Compaction reads a handful of per-family settings: how many versions a
//! column keeps, the time-to-live applied while scanning, the compression
//! used for rewritten files, and the temporal partition policy that buckets
//! mob files by date.

use std::time::Duration;

use crate::options::Compression;

/// Temporal partition policy for mob file compaction.
///
/// The policy maps a mob file's date to a partition bucket and a size
/// threshold. Coarser policies merge older files into larger buckets with
/// escalated thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionPolicy {
    /// One bucket per calendar day.
    #[default]
    Daily,
    /// Files older than the current week bucket by the first day of their
    /// week, with a doubled threshold.
    Weekly,
    /// Files older than the current month bucket by the first day of their
    /// month, with a tripled threshold.
    Monthly,
}

/// Descriptor of the column family whose mob files are being compacted.
#[derive(Debug, Clone)]
pub struct ColumnFamily {
    /// Family name.
    pub name: String,
    /// Maximum versions kept per column.
    pub max_versions: u32,
    /// Time-to-live for cells, `None` for no expiry.
    pub ttl: Option<Duration>,
    /// Compression applied to compaction outputs.
    pub compaction_compression: Compression,
    /// Partition policy for mob compaction.
    pub mob_compact_partition_policy: PartitionPolicy,
}

impl ColumnFamily {
    /// Create a family descriptor with defaults: one version, no TTL, no
    /// compression, daily partitioning.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_versions: 1,
            ttl: None,
            compaction_compression: Compression::None,
            mob_compact_partition_policy: PartitionPolicy::Daily,
        }
    }

    /// Set the maximum versions kept per column.
    pub fn with_max_versions(mut self, max_versions: u32) -> Self {
        self.max_versions = max_versions;
        self
    }

    /// Set the cell time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the compaction output compression.
    pub fn with_compaction_compression(mut self, compression: Compression) -> Self {
        self.compaction_compression = compression;
        self
    }

    /// Set the mob compaction partition policy.
    pub fn with_partition_policy(mut self, policy: PartitionPolicy) -> Self {
        self.mob_compact_partition_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_defaults() {
        let family = ColumnFamily::new("mob");
        assert_eq!(family.name, "mob");
        assert_eq!(family.max_versions, 1);
        assert!(family.ttl.is_none());
        assert_eq!(family.compaction_compression, Compression::None);
        assert_eq!(
            family.mob_compact_partition_policy,
            PartitionPolicy::Daily
        );
    }

    #[test]
    fn test_family_builder() {
        let family = ColumnFamily::new("mob")
            .with_max_versions(3)
            .with_ttl(Duration::from_secs(86400))
            .with_compaction_compression(Compression::Lz4)
            .with_partition_policy(PartitionPolicy::Monthly);

        assert_eq!(family.max_versions, 3);
        assert_eq!(family.ttl, Some(Duration::from_secs(86400)));
        assert_eq!(family.compaction_compression, Compression::Lz4);
        assert_eq!(
            family.mob_compact_partition_policy,
            PartitionPolicy::Monthly
        );
    }
}
