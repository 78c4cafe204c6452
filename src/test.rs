//! Helpers for testing: a small record type, its schema and some data sources.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::paging::{PageRequest, Row};
use crate::schema::{ColumnFamilyName, ValueCodec};
use crate::source::{DataSource, MemorySource};
use crate::store::{Record, RecordId, RecordSchema, TimeIndex};
use crate::{CodecError, Schema};

/// A titled record with an update timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    /// Identity.
    pub id: RecordId,
    /// Update timestamp.
    pub updated_time: i64,
    /// Payload.
    pub title: String,
}

impl TestRecord {
    /// Builds a record.
    pub fn new(id: u64, updated_time: i64, title: impl Into<String>) -> Self {
        Self {
            id: RecordId(id),
            updated_time,
            title: title.into(),
        }
    }
}

impl Row for TestRecord {
    fn updated_time(&self) -> i64 {
        self.updated_time
    }
}

impl Record for TestRecord {
    fn id(&self) -> RecordId {
        self.id
    }
}

impl<S: Schema> ValueCodec<S> for TestRecord {
    fn encode_value(&self) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::with_capacity(16 + self.title.len());
        bytes.write_u64::<BigEndian>(self.id.0)?;
        bytes.write_i64::<BigEndian>(self.updated_time)?;
        bytes.extend_from_slice(self.title.as_bytes());
        Ok(bytes)
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = std::io::Cursor::new(data);
        let id = RecordId(reader.read_u64::<BigEndian>()?);
        let updated_time = reader.read_i64::<BigEndian>()?;
        let title = String::from_utf8(data[16..].to_vec()).map_err(anyhow::Error::from)?;
        Ok(Self {
            id,
            updated_time,
            title,
        })
    }
}

/// Schema holding [`TestRecord`]s, indexed by update timestamp.
#[derive(Debug, Default)]
pub struct TestRecordSchema;

impl Schema for TestRecordSchema {
    const COLUMN_FAMILY_NAME: ColumnFamilyName = "test_records";

    type Key = RecordId;
    type Value = TestRecord;
}

impl RecordSchema for TestRecordSchema {
    const INDEX_COLUMN_FAMILY_NAME: ColumnFamilyName = "test_records_by_updated_time";
}

/// Timestamp index of [`TestRecordSchema`].
pub type TestTimeIndex = TimeIndex<TestRecordSchema>;

/// Records with ids `1..=times.len()` carrying the given timestamps.
pub fn records(times: &[i64]) -> Vec<TestRecord> {
    times
        .iter()
        .zip(1u64..)
        .map(|(&t, id)| TestRecord::new(id, t, format!("record-{id}")))
        .collect()
}

/// An in-memory source over [`records`] with the given timestamps.
pub fn memory_source(times: &[i64]) -> MemorySource<TestRecord> {
    MemorySource::new(records(times))
}

/// A source whose every fetch fails. Counts the fetches it receives.
#[derive(Debug, Default)]
pub struct FailingSource {
    fetches: AtomicUsize,
}

impl FailingSource {
    /// Number of fetches attempted so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl DataSource for FailingSource {
    type Row = TestRecord;

    fn fetch(&self, request: &PageRequest) -> Result<Vec<TestRecord>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        bail!("storage unavailable at cursor {}", request.cursor())
    }
}

/// A source that ignores the limit and returns one row more than asked.
#[derive(Debug, Default)]
pub struct OverflowingSource;

impl DataSource for OverflowingSource {
    type Row = TestRecord;

    fn fetch(&self, request: &PageRequest) -> Result<Vec<TestRecord>> {
        let times = vec![request.cursor(); request.max_rows() + 1];
        Ok(records(&times))
    }
}

#[cfg(feature = "arbitrary")]
impl proptest::arbitrary::Arbitrary for TestRecord {
    type Parameters = std::ops::Range<i64>;

    fn arbitrary() -> Self::Strategy {
        Self::arbitrary_with(0..1000)
    }

    fn arbitrary_with(times: Self::Parameters) -> Self::Strategy {
        use proptest::prelude::any;
        use proptest::strategy::Strategy;

        (any::<u64>(), times, "[a-z]{0,12}")
            .prop_map(|(id, updated_time, title)| TestRecord::new(id, updated_time, title))
            .boxed()
    }

    type Strategy = proptest::strategy::BoxedStrategy<Self>;
}
