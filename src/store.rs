//! A RocksDB record store that serves cursor pages.
//!
//! Records live in their schema's column family keyed by [`RecordId`]. A second
//! column family holds one empty entry per record under
//! [`TimeIndexKey`] `(updated_time, id)`, so a page is a seek to the cursor's
//! bucket followed by a short forward scan.

use std::marker::PhantomData;
use std::path::Path;

use anyhow::format_err;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{gen_rocksdb_options, RocksdbConfig};
use crate::paging::{PageRequest, Row};
use crate::schema::{ColumnFamilyName, KeyDecoder, KeyEncoder, ValueCodec};
use crate::source::{window, DataSource};
use crate::{
    with_error_logging, CodecError, Schema, SchemaBatch, SeekKeyEncoder, DB,
    DEFAULT_COLUMN_FAMILY_NAME,
};

/// Stable identity of a stored record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        RecordId(id)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<S: Schema> KeyEncoder<S> for RecordId {
    fn encode_key(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.0.to_be_bytes().to_vec())
    }
}

impl<S: Schema> KeyDecoder<S> for RecordId {
    fn decode_key(data: &[u8]) -> Result<Self, CodecError> {
        let bytes: [u8; 8] = data.try_into().map_err(|_| CodecError::InvalidKeyLength {
            expected: 8,
            got: data.len(),
        })?;
        Ok(RecordId(u64::from_be_bytes(bytes)))
    }
}

/// A [`Row`] with a stable identity, as kept by a [`RecordStore`].
pub trait Record: Row {
    /// Identity of the record. Must not change across updates.
    fn id(&self) -> RecordId;
}

/// A [`Schema`] holding [`Record`]s by id, paired with the column family of
/// its timestamp index. Usually declared with
/// `define_schema!(Name, Value, "cf", index = "index_cf")`.
pub trait RecordSchema: Schema<Key = RecordId> {
    /// Column family for the `(updated_time, id)` index.
    const INDEX_COLUMN_FAMILY_NAME: ColumnFamilyName;
}

/// Key of the timestamp index: sorts by `updated_time`, then by `id`.
///
/// Encoded as 16 big-endian bytes with the timestamp's sign bit flipped, so
/// byte order equals numeric order for negative timestamps too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeIndexKey {
    /// Record timestamp.
    pub updated_time: i64,
    /// Record identity, the tie-breaker inside a bucket.
    pub id: RecordId,
}

const SIGN_BIT: u64 = 1 << 63;
const TIME_INDEX_KEY_LEN: usize = 16;

impl TimeIndexKey {
    /// Index key of one record.
    pub fn new(updated_time: i64, id: RecordId) -> Self {
        Self { updated_time, id }
    }

    /// The smallest key of the bucket at `updated_time`.
    pub fn bucket_start(updated_time: i64) -> Self {
        Self::new(updated_time, RecordId(0))
    }
}

impl<S: Schema> KeyEncoder<S> for TimeIndexKey {
    fn encode_key(&self) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::with_capacity(TIME_INDEX_KEY_LEN);
        bytes.write_u64::<BigEndian>(self.updated_time as u64 ^ SIGN_BIT)?;
        bytes.write_u64::<BigEndian>(self.id.0)?;
        Ok(bytes)
    }
}

impl<S: Schema> KeyDecoder<S> for TimeIndexKey {
    fn decode_key(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != TIME_INDEX_KEY_LEN {
            return Err(CodecError::InvalidKeyLength {
                expected: TIME_INDEX_KEY_LEN,
                got: data.len(),
            });
        }
        let mut reader = std::io::Cursor::new(data);
        let updated_time = (reader.read_u64::<BigEndian>()? ^ SIGN_BIT) as i64;
        let id = RecordId(reader.read_u64::<BigEndian>()?);
        Ok(Self { updated_time, id })
    }
}

impl<S: Schema> SeekKeyEncoder<S> for TimeIndexKey {
    fn encode_seek_key(&self) -> crate::schema::Result<Vec<u8>> {
        <TimeIndexKey as KeyEncoder<S>>::encode_key(self)
    }
}

/// Index entries carry no payload.
impl<S: Schema> ValueCodec<S> for () {
    fn encode_value(&self) -> Result<Vec<u8>, CodecError> {
        Ok(Vec::new())
    }

    fn decode_value(_data: &[u8]) -> Result<Self, CodecError> {
        Ok(())
    }
}

/// The timestamp index [`Schema`] that goes with record schema `S`.
#[derive(Debug, Default)]
pub struct TimeIndex<S>(PhantomData<S>);

impl<S: RecordSchema> Schema for TimeIndex<S> {
    const COLUMN_FAMILY_NAME: ColumnFamilyName = S::INDEX_COLUMN_FAMILY_NAME;

    type Key = TimeIndexKey;
    type Value = ();
}

/// Records of schema `S`, paged by update timestamp.
///
/// Writes update the record and its index entry in one atomic batch. Readers
/// and writers are serialized by a lock so every fetch sees the index and the
/// records at the same point in time.
#[derive(Debug)]
pub struct RecordStore<S> {
    db: DB,
    consistency: RwLock<()>,
    phantom: PhantomData<S>,
}

impl<S> RecordStore<S>
where
    S: RecordSchema,
    S::Value: Record,
{
    /// Column families a database must have to back this store.
    pub fn column_families() -> [ColumnFamilyName; 3] {
        [
            DEFAULT_COLUMN_FAMILY_NAME,
            S::COLUMN_FAMILY_NAME,
            S::INDEX_COLUMN_FAMILY_NAME,
        ]
    }

    /// Opens (creating if needed) a store at `path`.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn open(
        path: impl AsRef<Path>,
        name: &'static str,
        config: &RocksdbConfig,
    ) -> anyhow::Result<Self> {
        let db_opts = gen_rocksdb_options(config);
        let db = DB::open(path, name, Self::column_families(), &db_opts)?;
        Ok(Self::with_db(db))
    }

    /// Wraps an already opened database holding [`Self::column_families`].
    pub fn with_db(db: DB) -> Self {
        Self {
            db,
            consistency: RwLock::new(()),
            phantom: PhantomData,
        }
    }

    /// The underlying database.
    pub fn db(&self) -> &DB {
        &self.db
    }

    /// Reads one record.
    pub fn get(&self, id: RecordId) -> anyhow::Result<Option<S::Value>> {
        let _guard = self.consistency.read();
        self.db.get::<S>(&id)
    }

    /// Inserts or replaces a record, moving its index entry if its timestamp
    /// changed.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn put(&self, record: &S::Value) -> anyhow::Result<()> {
        let id = record.id();
        let updated_time = record.updated_time();
        let _guard = self.consistency.write();

        let mut batch = SchemaBatch::new();
        if let Some(previous) = self.db.get::<S>(&id)? {
            let previous_time = previous.updated_time();
            if previous_time != updated_time {
                debug!(%id, previous_time, updated_time, "Moving index entry");
                batch.delete::<TimeIndex<S>>(&TimeIndexKey::new(previous_time, id))?;
            }
        }
        batch.put::<S>(&id, record)?;
        batch.put::<TimeIndex<S>>(&TimeIndexKey::new(updated_time, id), &())?;
        self.db.write_schemas(&batch)
    }

    /// Removes a record and its index entry. Returns whether it existed.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn delete(&self, id: RecordId) -> anyhow::Result<bool> {
        let _guard = self.consistency.write();
        let Some(previous) = self.db.get::<S>(&id)? else {
            return Ok(false);
        };

        let mut batch = SchemaBatch::new();
        batch.delete::<S>(&id)?;
        batch.delete::<TimeIndex<S>>(&TimeIndexKey::new(previous.updated_time(), id))?;
        self.db.write_schemas(&batch)?;
        Ok(true)
    }

    /// Runs the page query for `request` against the index.
    #[tracing::instrument(skip_all, level = "error")]
    pub fn fetch_rows(&self, request: &PageRequest) -> anyhow::Result<Vec<S::Value>> {
        let _guard = self.consistency.read();
        with_error_logging(
            || {
                let mut index = self.db.iter::<TimeIndex<S>>()?;
                index.seek(&TimeIndexKey::bucket_start(request.cursor()))?;
                let keys = window(
                    index.map(|entry| entry.map(|output| output.key)),
                    request,
                    |key: &TimeIndexKey| key.updated_time,
                )?;

                keys.into_iter()
                    .map(|key| {
                        self.db.get::<S>(&key.id)?.ok_or_else(|| {
                            format_err!(
                                "{} entry {key:?} points at a missing record",
                                S::INDEX_COLUMN_FAMILY_NAME
                            )
                        })
                    })
                    .collect::<anyhow::Result<Vec<_>>>()
            },
            "fetch_rows",
        )
    }

    /// Inserts or replaces a record from async code.
    pub async fn put_async(&self, record: &S::Value) -> anyhow::Result<()> {
        tokio::task::block_in_place(|| self.put(record))
    }

    /// Runs the page query for `request` from async code.
    pub async fn fetch_rows_async(&self, request: &PageRequest) -> anyhow::Result<Vec<S::Value>> {
        tokio::task::block_in_place(|| self.fetch_rows(request))
    }
}

impl<S> DataSource for RecordStore<S>
where
    S: RecordSchema,
    S::Value: Record,
{
    type Row = S::Value;

    fn fetch(&self, request: &PageRequest) -> anyhow::Result<Vec<S::Value>> {
        self.fetch_rows(request)
    }
}
