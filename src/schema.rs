// Adapted from Aptos::storage::schemadb;
// While most of the Sovereign SDK will be available under both
// MIT and APACHE 2.0 licenses, this file is
// licensed under APACHE 2.0 only.

//! A type-safe interface over [`DB`](crate::DB) column families.

use std::fmt::Debug;

use crate::CodecError;

/// Column family names are known up front, so they can have `static` lifetimes.
pub type ColumnFamilyName = &'static str;

/// A [`Schema`] is a type-safe interface over a specific column family in a
/// [`DB`](crate::DB). It is always a key type ([`KeyCodec`]) and a value type ([`ValueCodec`]).
pub trait Schema: Debug + Send + Sync + 'static + Sized + Default {
    /// The column family name associated with this struct.
    /// Note: all schemas within the same DB must have distinct column family names.
    const COLUMN_FAMILY_NAME: ColumnFamilyName;

    /// Type of the key.
    type Key: KeyCodec<Self>;

    /// Type of the value.
    type Value: ValueCodec<Self>;
}

/// A [`core::result::Result`] alias with [`CodecError`] as the error type.
pub type Result<T, E = CodecError> = core::result::Result<T, E>;

/// This trait defines a type that can serve as a [`Schema::Key`].
///
/// [`KeyCodec`] is a marker trait with a blanket implementation for all types
/// that are both [`KeyEncoder`] and [`KeyDecoder`]. Keeping the two halves
/// apart lets a borrowed form of a key (say `&str` for a `String` key) encode
/// without first being copied into the owned type.
pub trait KeyCodec<S: Schema + ?Sized>: KeyEncoder<S> + KeyDecoder<S> {}

impl<T, S: Schema + ?Sized> KeyCodec<S> for T where T: KeyEncoder<S> + KeyDecoder<S> {}

/// Implementors of this trait can be used to encode keys in the given [`Schema`].
pub trait KeyEncoder<S: Schema + ?Sized>: Sized + Debug {
    /// Converts `self` to bytes to be stored in RocksDB.
    fn encode_key(&self) -> Result<Vec<u8>>;
}

impl<S: Schema, T: KeyEncoder<S>> KeyEncoder<S> for &T {
    fn encode_key(&self) -> Result<Vec<u8>> {
        (*self).encode_key()
    }
}

/// Implementors of this trait can be used to decode keys in the given [`Schema`].
pub trait KeyDecoder<S: Schema + ?Sized>: Sized + Debug {
    /// Converts bytes fetched from RocksDB to `Self`.
    fn decode_key(data: &[u8]) -> Result<Self>;
}

/// This trait defines a type that can serve as a [`Schema::Value`].
pub trait ValueCodec<S: Schema + ?Sized>: Sized + Debug {
    /// Converts `self` to bytes to be stored in DB.
    fn encode_value(&self) -> Result<Vec<u8>>;
    /// Converts bytes fetched from DB to `Self`.
    fn decode_value(data: &[u8]) -> Result<Self>;
}

/// A utility macro to define [`Schema`] implementors. You must specify the
/// [`Schema`] implementor's name, the key type, the value type, and the column
/// family name. Record schemas served through a
/// [`RecordStore`](crate::store::RecordStore) additionally name the column
/// family holding their timestamp index.
///
/// # Example
///
/// ```rust
/// use rockpage::define_schema;
/// use rockpage::schema::{Schema, ValueCodec, Result};
/// use rockpage::store::RecordId;
///
/// define_schema!(ArticleTitleById, RecordId, String, "article_title_by_id");
///
/// impl ValueCodec<ArticleTitleById> for String {
///     fn encode_value(&self) -> Result<Vec<u8>> {
///         Ok(self.as_bytes().to_vec())
///     }
///
///     fn decode_value(data: &[u8]) -> Result<Self> {
///         Ok(String::from_utf8(data.to_vec()).map_err(anyhow::Error::from)?)
///     }
/// }
///
/// assert_eq!(ArticleTitleById::COLUMN_FAMILY_NAME, "article_title_by_id");
/// ```
#[macro_export]
macro_rules! define_schema {
    ($schema_type:ident, $key_type:ty, $value_type:ty, $cf_name:expr) => {
        #[derive(Debug, Default)]
        pub(crate) struct $schema_type;

        impl $crate::schema::Schema for $schema_type {
            type Key = $key_type;
            type Value = $value_type;

            const COLUMN_FAMILY_NAME: $crate::schema::ColumnFamilyName = $cf_name;
        }
    };
    ($schema_type:ident, $value_type:ty, $cf_name:expr, index = $index_cf_name:expr) => {
        $crate::define_schema!(
            $schema_type,
            $crate::store::RecordId,
            $value_type,
            $cf_name
        );

        impl $crate::store::RecordSchema for $schema_type {
            const INDEX_COLUMN_FAMILY_NAME: $crate::schema::ColumnFamilyName = $index_cf_name;
        }
    };
}
