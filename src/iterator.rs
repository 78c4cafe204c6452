use std::iter::FusedIterator;
use std::marker::PhantomData;

use anyhow::Result;

use crate::metrics::{ROCKPAGE_ITER_BYTES, ROCKPAGE_ITER_LATENCY_SECONDS};
use crate::schema::{KeyDecoder, Schema, ValueCodec};

/// This defines a type that can be used to seek a [`SchemaIterator`], via
/// [`SchemaIterator::seek`]. Not every [`KeyEncoder`](crate::schema::KeyEncoder)
/// is a sensible [`SeekKeyEncoder`]: only encodings whose lexicographic byte
/// order matches the logical order of the key seek correctly. A composite key
/// may also expose a prefix of itself as a seek key, e.g. the timestamp half of
/// a `(updated_time, id)` index key.
pub trait SeekKeyEncoder<S: Schema>: Sized {
    /// Converts `self` to bytes which is used to seek the underlying raw
    /// iterator.
    ///
    /// If `self` is also a [`KeyEncoder`](crate::schema::KeyEncoder), then
    /// [`SeekKeyEncoder::encode_seek_key`] MUST return the same bytes as
    /// [`KeyEncoder::encode_key`](crate::schema::KeyEncoder::encode_key).
    fn encode_seek_key(&self) -> crate::schema::Result<Vec<u8>>;
}

/// Forward DB iterator parameterized on [`Schema`] that seeks with a
/// [`SeekKeyEncoder`] and yields [`Schema::Key`] and [`Schema::Value`] pairs in
/// ascending key order.
pub struct SchemaIterator<'a, S> {
    db_iter: rocksdb::DBRawIterator<'a>,
    phantom: PhantomData<S>,
}

impl<'a, S> SchemaIterator<'a, S>
where
    S: Schema,
{
    pub(crate) fn new(mut db_iter: rocksdb::DBRawIterator<'a>) -> Self {
        // We need an explicit `seek` call before we can start
        // iterating.
        db_iter.seek_to_first();
        SchemaIterator {
            db_iter,
            phantom: PhantomData,
        }
    }

    /// Seeks to the first key whose binary representation is equal to or greater than that of the
    /// `seek_key`.
    pub fn seek(&mut self, seek_key: &impl SeekKeyEncoder<S>) -> Result<()> {
        let key = seek_key.encode_seek_key()?;
        self.db_iter.seek(&key);
        Ok(())
    }

    fn next_impl(&mut self) -> Result<Option<IteratorOutput<S::Key, S::Value>>> {
        let _timer = ROCKPAGE_ITER_LATENCY_SECONDS
            .with_label_values(&[S::COLUMN_FAMILY_NAME])
            .start_timer();

        // Calling `next` requires checking `valid` first, see
        // <https://github.com/rust-rocksdb/rust-rocksdb/issues/824>.
        if !self.db_iter.valid() {
            self.db_iter.status()?;
            return Ok(None);
        }

        let (raw_key, raw_value) = match self.db_iter.item() {
            Some(item) => item,
            None => return Ok(None),
        };
        ROCKPAGE_ITER_BYTES
            .with_label_values(&[S::COLUMN_FAMILY_NAME])
            .observe((raw_key.len() + raw_value.len()) as f64);

        let key = <S::Key as KeyDecoder<S>>::decode_key(raw_key)?;
        let value = <S::Value as ValueCodec<S>>::decode_value(raw_value)?;

        self.db_iter.next();

        Ok(Some(IteratorOutput { key, value }))
    }
}

/// A single decoded entry yielded by [`SchemaIterator`].
pub struct IteratorOutput<K, V> {
    /// Decoded key.
    pub key: K,
    /// Decoded value.
    pub value: V,
}

impl<K, V> IteratorOutput<K, V> {
    /// Splits the output into its key and value.
    pub fn into_tuple(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<S> Iterator for SchemaIterator<'_, S>
where
    S: Schema,
{
    type Item = Result<IteratorOutput<S::Key, S::Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_impl().transpose()
    }
}

impl<S> FusedIterator for SchemaIterator<'_, S> where S: Schema {}
