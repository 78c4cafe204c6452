// SPDX-License-Identifier: Apache-2.0
// Adapted from aptos-core/schemadb

//! This library turns timestamp-ordered records into paged, client-facing API
//! resources. Its core is a cursor pagination scheme: a [`PageRequest`] carries
//! an update-timestamp watermark (`cursor`), an offset into the rows sharing
//! that timestamp (`start`) and a page size (`limit`), and [`paging::advance`]
//! computes the request for the following page from the rows just fetched.
//!
//! Rows come from a [`DataSource`]. The crate ships [`RecordStore`], a source
//! backed by [RocksDB](https://rocksdb.org/) that keeps records by id next to a
//! secondary `(updated_time, id)` index. All data passed in and out of RocksDB
//! is structured according to predefined [`Schema`]s, one per column family,
//! declared with the [`define_schema!`] macro.
//!
//! The [`resource`] module holds the formatting glue that sits around a paged
//! listing: URL building, HTML filtering, user projections and the response
//! envelopes.
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod iterator;
mod metrics;
pub mod paging;
pub mod resource;
pub mod schema;
mod schema_batch;
pub mod source;
pub mod store;

mod config;
#[cfg(feature = "test-utils")]
pub mod test;

pub use config::{gen_rocksdb_options, PagingConfig, RocksdbConfig, DEFAULT_PAGE_LIMIT};

use std::{path::Path, sync::Arc};

use anyhow::format_err;
pub use iterator::{IteratorOutput, SchemaIterator, SeekKeyEncoder};
use metrics::{
    ROCKPAGE_BATCH_COMMIT_BYTES, ROCKPAGE_BATCH_COMMIT_LATENCY_SECONDS, ROCKPAGE_DELETES,
    ROCKPAGE_GET_BYTES, ROCKPAGE_GET_LATENCY_SECONDS, ROCKPAGE_PUT_BYTES,
};
pub use paging::{CursorPaginator, Page, PageQuery, PageRequest, PageResult, Row};
pub use rocksdb;
pub use rocksdb::DEFAULT_COLUMN_FAMILY_NAME;
pub use source::{DataSource, MemorySource};
pub use store::{Record, RecordId, RecordSchema, RecordStore};
use thiserror::Error;
use tracing::info;

pub use crate::schema::Schema;
pub use crate::schema_batch::SchemaBatch;
use crate::schema::{KeyCodec, KeyEncoder, ValueCodec};

/// This DB is a schematized RocksDB wrapper where all data passed in and out are typed according to
/// [`Schema`]s.
#[derive(Debug)]
pub struct DB {
    name: &'static str, // for logging
    db: Arc<rocksdb::DB>,
}

/// Returns the default column family descriptor. Includes LZ4 compression.
pub fn default_cf_descriptor(cf_name: impl Into<String>) -> rocksdb::ColumnFamilyDescriptor {
    let mut cf_opts = rocksdb::Options::default();
    cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    rocksdb::ColumnFamilyDescriptor::new(cf_name, cf_opts)
}

impl DB {
    /// Opens a database backed by RocksDB, using the provided column family names and default
    /// column family options.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn open(
        path: impl AsRef<Path>,
        name: &'static str,
        column_families: impl IntoIterator<Item = impl Into<String>>,
        db_opts: &rocksdb::Options,
    ) -> anyhow::Result<Self> {
        let descriptors = column_families
            .into_iter()
            .map(|cf| default_cf_descriptor(cf.into()));
        let db = DB::open_with_cfds(db_opts, path, name, descriptors)?;
        Ok(db)
    }

    /// Open RocksDB with the provided column family descriptors.
    /// This allows the caller to configure options for each column family.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn open_with_cfds(
        db_opts: &rocksdb::Options,
        path: impl AsRef<Path>,
        name: &'static str,
        cfds: impl IntoIterator<Item = rocksdb::ColumnFamilyDescriptor>,
    ) -> anyhow::Result<DB> {
        let inner = with_error_logging(
            || rocksdb::DB::open_cf_descriptors(db_opts, path, cfds),
            "open_with_cfds",
        )?;
        Ok(Self::log_construct(name, inner))
    }

    fn log_construct(name: &'static str, inner: rocksdb::DB) -> DB {
        info!(rocksdb_name = name, path = %inner.path().display(), "Opened RocksDB");
        DB {
            name,
            db: Arc::new(inner),
        }
    }

    /// Name of the database that can be used for logging or metrics or tracing.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Reads single record by key.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn get<S: Schema>(
        &self,
        schema_key: &impl KeyEncoder<S>,
    ) -> anyhow::Result<Option<S::Value>> {
        with_error_logging::<_, _, anyhow::Error>(
            || {
                let _timer = ROCKPAGE_GET_LATENCY_SECONDS
                    .with_label_values(&[S::COLUMN_FAMILY_NAME])
                    .start_timer();

                let key = schema_key.encode_key()?;
                let cf_handle = self.get_cf_handle(S::COLUMN_FAMILY_NAME)?;
                let result = self.db.get_pinned_cf(cf_handle, key)?;
                ROCKPAGE_GET_BYTES
                    .with_label_values(&[S::COLUMN_FAMILY_NAME])
                    .observe(result.as_ref().map_or(0.0, |v| v.len() as f64));
                result
                    .map(|raw_value| <S::Value as ValueCodec<S>>::decode_value(&raw_value))
                    .transpose()
                    .map_err(|err| err.into())
            },
            "get",
        )
    }

    /// Writes single record.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn put<S: Schema>(
        &self,
        key: &impl KeyCodec<S>,
        value: &impl ValueCodec<S>,
    ) -> anyhow::Result<()> {
        // Not necessary to use a batch, but we'd like a central place to bump counters.
        with_error_logging(
            || {
                let mut batch = SchemaBatch::new();
                batch.put::<S>(key, value)?;
                self.write_schemas_inner(&batch)
            },
            "put",
        )
    }

    /// Delete a single key from the database.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn delete<S: Schema>(&self, key: &impl KeyCodec<S>) -> anyhow::Result<()> {
        with_error_logging(
            || {
                let mut batch = SchemaBatch::new();
                batch.delete::<S>(key)?;
                self.write_schemas_inner(&batch)
            },
            "delete",
        )
    }

    /// Returns a forward [`SchemaIterator`] on a certain schema with the default read options.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn iter<S: Schema>(&self) -> anyhow::Result<SchemaIterator<'_, S>> {
        let cf_handle = self.get_cf_handle(S::COLUMN_FAMILY_NAME)?;
        Ok(SchemaIterator::new(
            self.db
                .raw_iterator_cf_opt(cf_handle, rocksdb::ReadOptions::default()),
        ))
    }

    fn write_schemas_inner(&self, batch: &SchemaBatch) -> anyhow::Result<()> {
        let _timer = ROCKPAGE_BATCH_COMMIT_LATENCY_SECONDS
            .with_label_values(&[self.name])
            .start_timer();

        let mut db_batch = rocksdb::WriteBatch::default();
        let mut columns_written = Vec::with_capacity(batch.last_writes.len());
        for (cf_name, rows) in batch.last_writes.iter() {
            let cf_handle = self.get_cf_handle(cf_name)?;
            let mut write_sizes = Vec::with_capacity(rows.len());
            let mut deletes_for_cf = 0;
            for (key, operation) in rows {
                match operation {
                    Operation::Put { value } => {
                        write_sizes.push(key.len() + value.len());
                        db_batch.put_cf(cf_handle, key, value);
                    }
                    Operation::Delete => {
                        db_batch.delete_cf(cf_handle, key);
                        deletes_for_cf += 1;
                    }
                }
            }
            columns_written.push((*cf_name, write_sizes, deletes_for_cf));
        }

        let serialized_size = db_batch.size_in_bytes();
        self.db.write_opt(db_batch, &default_write_options())?;

        // Bump counters only after DB write succeeds.
        for (cf_name, bytes, deletes) in columns_written {
            for write_size in bytes {
                ROCKPAGE_PUT_BYTES
                    .with_label_values(&[cf_name])
                    .observe(write_size as f64);
            }
            ROCKPAGE_DELETES
                .with_label_values(&[cf_name])
                .inc_by(deletes);
        }
        ROCKPAGE_BATCH_COMMIT_BYTES
            .with_label_values(&[self.name])
            .observe(serialized_size as f64);

        Ok(())
    }

    /// Writes a group of records wrapped in a [`SchemaBatch`] atomically.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn write_schemas(&self, batch: &SchemaBatch) -> anyhow::Result<()> {
        with_error_logging(|| self.write_schemas_inner(batch), "write_schemas")
    }

    fn get_cf_handle(&self, cf_name: &str) -> anyhow::Result<&rocksdb::ColumnFamily> {
        with_error_logging(
            || {
                self.db.cf_handle(cf_name).ok_or_else(|| {
                    format_err!("DB::cf_handle not found for column family name: {cf_name}",)
                })
            },
            "get_cf_handle",
        )
    }
}

fn with_error_logging<F, T, E: Into<anyhow::Error>>(f: F, name: &str) -> anyhow::Result<T>
where
    F: FnOnce() -> Result<T, E>,
{
    let result = f().map_err(|e| e.into());
    if let Err(e) = &result {
        tracing::error!("[Rockpage] error during {}: {}", name, e);
    }
    result
}

/// Readability alias for a key in the DB.
pub type SchemaKey = Vec<u8>;
/// Readability alias for a value in the DB.
pub type SchemaValue = Vec<u8>;

/// Represents operation written to the database.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Operation<V = SchemaValue> {
    /// Writing a value to the DB.
    Put {
        /// Value to write
        value: V,
    },
    /// Deleting a value
    Delete,
}

/// An error that occurred during (de)serialization of a [`Schema`]'s keys or
/// values.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Unable to deserialize a key because it has a different length than
    /// expected.
    #[error("Invalid key length. Expected {expected:}, got {got:}")]
    #[allow(missing_docs)] // The fields' names are self-explanatory.
    InvalidKeyLength { expected: usize, got: usize },
    /// Some other error occurred when (de)serializing a key or value. Inspect
    /// the inner [`anyhow::Error`] for more details.
    #[error(transparent)]
    Wrapped(#[from] anyhow::Error),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An error produced by a pagination step.
///
/// Either the whole step fails or a complete `(rows, next)` pair is returned;
/// a failed step can be retried with the same [`PageRequest`].
#[derive(Error, Debug)]
pub enum PagingError {
    /// The caller supplied a request that can never be served: a non-positive
    /// `limit`, a negative `start` or `cursor`, or a page holding more rows
    /// than `limit`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The row-fetch collaborator failed. The error is passed through unchanged.
    #[error(transparent)]
    DataSource(#[from] anyhow::Error),
}

impl PagingError {
    /// Stable machine-readable code for the error, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PagingError::InvalidArgument(_) => "invalid_argument",
            PagingError::DataSource(_) => "data_source_error",
        }
    }
}

/// For now, we always use synchronous writes. This makes sure that once the operation returns
/// `Ok(())` the data is persisted even if the machine crashes.
fn default_write_options() -> rocksdb::WriteOptions {
    let mut opts = rocksdb::WriteOptions::default();
    opts.set_sync(true);
    opts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_debug_output() {
        let tmpdir = tempfile::tempdir().unwrap();
        let column_families = vec![DEFAULT_COLUMN_FAMILY_NAME];

        let mut db_opts = rocksdb::Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let db = DB::open(tmpdir.path(), "test_db_debug", column_families, &db_opts)
            .expect("Failed to open DB.");

        let db_debug = format!("{db:?}");
        assert!(db_debug.contains("test_db_debug"));
        assert!(db_debug.contains(tmpdir.path().to_str().unwrap()));
    }

    #[test]
    fn test_paging_error_codes() {
        let invalid = PagingError::InvalidArgument("limit must be positive".to_string());
        assert_eq!(invalid.code(), "invalid_argument");
        assert_eq!(invalid.to_string(), "invalid argument: limit must be positive");

        let fetch = PagingError::from(format_err!("connection reset"));
        assert_eq!(fetch.code(), "data_source_error");
        assert_eq!(fetch.to_string(), "connection reset");
    }
}
