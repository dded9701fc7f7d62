//! Configuration options for mobstore.

/// Configuration key for the base size under which a mob file is mergeable.
pub const MOB_COMPACTION_MERGEABLE_THRESHOLD_KEY: &str =
    "mob.file.compaction.mergeable.threshold";

/// Configuration key for the upper bound on del files after merging.
pub const MOB_DELFILE_MAX_COUNT_KEY: &str = "mob.delfile.max.count";

/// Configuration key for the number of files compacted in a batch.
pub const MOB_COMPACTION_BATCH_SIZE_KEY: &str = "mob.file.compaction.batch.size";

/// Configuration key for the maximum cells pulled per scanner call.
pub const COMPACTION_KV_MAX_KEY: &str = "compaction.kv.max";

/// Configuration key for the number of parallel partition workers.
pub const MOB_COMPACTION_THREADS_KEY: &str = "mob.compaction.threads";

/// Default mergeable threshold (192MB).
pub const DEFAULT_MERGEABLE_THRESHOLD: u64 = 192 * 1024 * 1024;

/// Default upper bound on del files after merging.
pub const DEFAULT_DELFILE_MAX_COUNT: usize = 3;

/// Default number of files compacted in a batch.
pub const DEFAULT_COMPACTION_BATCH_SIZE: usize = 100;

/// Default maximum cells per scanner pull.
pub const DEFAULT_COMPACTION_KV_MAX: usize = 10;

/// Default number of parallel partition workers.
pub const DEFAULT_COMPACTION_THREADS: usize = 4;

/// Compression algorithm for store file payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// No compression.
    #[default]
    None,
    /// LZ4 compression (fast).
    Lz4,
    /// Snappy compression (very fast).
    Snappy,
}

impl Compression {
    /// Check if compression is enabled.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Compression::None)
    }

    /// Create from the byte stored in a file footer.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Compression::None),
            1 => Some(Compression::Lz4),
            2 => Some(Compression::Snappy),
            _ => None,
        }
    }

    /// Convert to the byte stored in a file footer.
    pub fn to_byte(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
            Compression::Snappy => 2,
        }
    }
}

/// Compaction configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Base size under which a mob file is eligible for compaction.
    ///
    /// The partition policy may escalate this to 2x or 3x for weekly and
    /// monthly date buckets.
    pub mergeable_threshold: u64,

    /// Upper bound on the number of del files after merging.
    pub delfile_max_count: usize,

    /// Maximum files per compaction batch and per del-merge chunk.
    pub compaction_batch_size: usize,

    /// Maximum cells pulled from the scanner in one call.
    pub compaction_kv_max: usize,

    /// Number of parallel partition workers.
    pub compaction_threads: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mergeable_threshold: DEFAULT_MERGEABLE_THRESHOLD,
            delfile_max_count: DEFAULT_DELFILE_MAX_COUNT,
            compaction_batch_size: DEFAULT_COMPACTION_BATCH_SIZE,
            compaction_kv_max: DEFAULT_COMPACTION_KV_MAX,
            compaction_threads: DEFAULT_COMPACTION_THREADS,
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.delfile_max_count == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "delfile_max_count must be at least 1".into(),
            ));
        }

        // A chunk of one file is carried over unchanged, so a batch size
        // below 2 can never reduce the del file count.
        if self.compaction_batch_size < 2 {
            return Err(crate::Error::InvalidConfiguration(
                "compaction_batch_size must be at least 2".into(),
            ));
        }

        if self.compaction_kv_max == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "compaction_kv_max must be at least 1".into(),
            ));
        }

        if self.compaction_threads == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "compaction_threads must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Apply a recognized string configuration key.
    ///
    /// Unrecognized keys are ignored so callers can pass a full environment
    /// through without filtering.
    pub fn apply(&mut self, key: &str, value: &str) -> crate::Result<()> {
        let parse_err = |key: &str, value: &str| {
            crate::Error::InvalidConfiguration(format!("invalid value {:?} for {}", value, key))
        };

        match key {
            MOB_COMPACTION_MERGEABLE_THRESHOLD_KEY => {
                self.mergeable_threshold = value.parse().map_err(|_| parse_err(key, value))?;
            }
            MOB_DELFILE_MAX_COUNT_KEY => {
                self.delfile_max_count = value.parse().map_err(|_| parse_err(key, value))?;
            }
            MOB_COMPACTION_BATCH_SIZE_KEY => {
                self.compaction_batch_size = value.parse().map_err(|_| parse_err(key, value))?;
            }
            COMPACTION_KV_MAX_KEY => {
                self.compaction_kv_max = value.parse().map_err(|_| parse_err(key, value))?;
            }
            MOB_COMPACTION_THREADS_KEY => {
                self.compaction_threads = value.parse().map_err(|_| parse_err(key, value))?;
            }
            _ => {}
        }

        Ok(())
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mergeable threshold.
    pub fn mergeable_threshold(mut self, size: u64) -> Self {
        self.options.mergeable_threshold = size;
        self
    }

    /// Set the maximum del file count.
    pub fn delfile_max_count(mut self, count: usize) -> Self {
        self.options.delfile_max_count = count;
        self
    }

    /// Set the compaction batch size.
    pub fn compaction_batch_size(mut self, size: usize) -> Self {
        self.options.compaction_batch_size = size;
        self
    }

    /// Set the maximum cells per scanner pull.
    pub fn compaction_kv_max(mut self, max: usize) -> Self {
        self.options.compaction_kv_max = max;
        self
    }

    /// Set the number of partition workers.
    pub fn compaction_threads(mut self, threads: usize) -> Self {
        self.options.compaction_threads = threads;
        self
    }

    /// Build the options.
    pub fn build(self) -> crate::Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}
