/// Port selected RocksDB options for tuning the underlying rocksdb instance of a record store.
/// The current default values are taken from Aptos.
/// see <https://github.com/facebook/rocksdb/blob/master/include/rocksdb/options.h>
/// for detailed explanations.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RocksdbConfig {
    /// The maximum number of files that can be open concurrently. Defaults to 5000
    pub max_open_files: i32,
    /// Once write-ahead logs exceed this size, RocksDB will start forcing the flush of column
    /// families whose memtables are backed by the oldest live WAL file. Defaults to 1GB
    pub max_total_wal_size: u64,
    /// The maximum number of background threads, including threads for flushing and compaction. Defaults to 16.
    pub max_background_jobs: i32,
}

impl Default for RocksdbConfig {
    fn default() -> Self {
        Self {
            // Allow db to close old sst files, saving memory.
            max_open_files: 5000,
            // The record and index column families are written together, so a
            // single 1G WAL cap is enough to keep both flushing.
            max_total_wal_size: 1u64 << 30,
            // This includes threads for flushing and compaction. Rocksdb will decide the # of
            // threads to use internally.
            max_background_jobs: 16,
        }
    }
}

/// Generate [`rocksdb::Options`] corresponding to the given [`RocksdbConfig`].
/// The database and its column families are created if missing.
pub fn gen_rocksdb_options(config: &RocksdbConfig) -> rocksdb::Options {
    let mut db_opts = rocksdb::Options::default();
    db_opts.set_max_open_files(config.max_open_files);
    db_opts.set_max_total_wal_size(config.max_total_wal_size);
    db_opts.set_max_background_jobs(config.max_background_jobs);
    db_opts.create_if_missing(true);
    db_opts.create_missing_column_families(true);

    db_opts
}

/// Page size used when a request does not name one.
pub const DEFAULT_PAGE_LIMIT: i64 = 20;

/// Settings for a [`CursorPaginator`](crate::CursorPaginator).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PagingConfig {
    /// `limit` applied when the client omits it. Defaults to 20.
    pub default_limit: i64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}
