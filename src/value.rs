//! Value types and the wire-type map.
//!
//! [`Value`] is the closed set of types that can cross the driver boundary:
//! signed and unsigned integers, floats, text, medium blobs, timestamps and
//! dates, plus NULL. [`SqlType`] is the pure type-map function over that set;
//! each backend translates it into its own wire descriptors.

use chrono::{Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone};

/// Blob payload bound as a MySQL `MEDIUM_BLOB`, up to 16 MiB.
///
/// Text columns stage through 64 KiB buffers; anything larger must be
/// declared as mediumtext to round-trip.
#[derive(Clone, PartialEq, Eq)]
pub struct MediumText(Vec<u8>);

impl MediumText {
    /// Largest payload a mediumtext column can carry.
    pub const MAX_LEN: usize = 16 * 1024 * 1024;

    /// Wrap a payload.
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self(content.into())
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for MediumText {
    fn from(content: Vec<u8>) -> Self {
        Self(content)
    }
}

impl From<String> for MediumText {
    fn from(content: String) -> Self {
        Self(content.into_bytes())
    }
}

impl From<&str> for MediumText {
    fn from(content: &str) -> Self {
        Self(content.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for MediumText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Payloads run to 16 MiB; log the size, not the bytes.
        write!(f, "MediumText({} bytes)", self.0.len())
    }
}

/// A single database value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// 8-bit signed integer (TINYINT)
    Int8(i8),
    /// 8-bit unsigned integer (TINYINT UNSIGNED)
    UInt8(u8),
    /// 16-bit signed integer (SMALLINT)
    Int16(i16),
    /// 16-bit unsigned integer (SMALLINT UNSIGNED)
    UInt16(u16),
    /// 32-bit signed integer (INTEGER)
    Int32(i32),
    /// 32-bit unsigned integer (INTEGER UNSIGNED)
    UInt32(u32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 64-bit unsigned integer (BIGINT UNSIGNED)
    UInt64(u64),
    /// 32-bit floating point (FLOAT / REAL)
    Float(f32),
    /// 64-bit floating point (DOUBLE)
    Double(f64),
    /// Text string (CHAR, VARCHAR)
    Text(String),
    /// Medium blob, up to 16 MiB (MySQL only)
    MediumText(MediumText),
    /// Calendar timestamp (MySQL TIMESTAMP, SQL Server DATETIME)
    Timestamp(NaiveDateTime),
    /// Calendar date (SQL Server DATE)
    Date(NaiveDate),
}

/// Driver-independent wire-type descriptor: the type map as a pure function
/// of the value type. Backends translate this into `MYSQL_TYPE_*` plus
/// signedness, or an ODBC C-type/SQL-type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// TINYINT, signed or unsigned
    TinyInt {
        /// Unsigned flag
        unsigned: bool,
    },
    /// SMALLINT, signed or unsigned
    SmallInt {
        /// Unsigned flag
        unsigned: bool,
    },
    /// INTEGER, signed or unsigned
    Int {
        /// Unsigned flag
        unsigned: bool,
    },
    /// BIGINT, signed or unsigned
    BigInt {
        /// Unsigned flag
        unsigned: bool,
    },
    /// FLOAT / REAL
    Float,
    /// DOUBLE
    Double,
    /// CHAR / VARCHAR
    Text,
    /// MEDIUM_BLOB (MySQL only)
    MediumText,
    /// TIMESTAMP (MySQL) / TYPE_TIMESTAMP (ODBC)
    Timestamp,
    /// TYPE_DATE (ODBC only)
    Date,
}

impl Value {
    /// Check if the value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Wire-type descriptor for this value. NULL has none; the driver binds
    /// it through its own NULL convention.
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            Self::Null => None,
            Self::Int8(_) => Some(SqlType::TinyInt { unsigned: false }),
            Self::UInt8(_) => Some(SqlType::TinyInt { unsigned: true }),
            Self::Int16(_) => Some(SqlType::SmallInt { unsigned: false }),
            Self::UInt16(_) => Some(SqlType::SmallInt { unsigned: true }),
            Self::Int32(_) => Some(SqlType::Int { unsigned: false }),
            Self::UInt32(_) => Some(SqlType::Int { unsigned: true }),
            Self::Int64(_) => Some(SqlType::BigInt { unsigned: false }),
            Self::UInt64(_) => Some(SqlType::BigInt { unsigned: true }),
            Self::Float(_) => Some(SqlType::Float),
            Self::Double(_) => Some(SqlType::Double),
            Self::Text(_) => Some(SqlType::Text),
            Self::MediumText(_) => Some(SqlType::MediumText),
            Self::Timestamp(_) => Some(SqlType::Timestamp),
            Self::Date(_) => Some(SqlType::Date),
        }
    }

    /// Short name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int8(_) => "int8",
            Self::UInt8(_) => "uint8",
            Self::Int16(_) => "int16",
            Self::UInt16(_) => "uint16",
            Self::Int32(_) => "int32",
            Self::UInt32(_) => "uint32",
            Self::Int64(_) => "int64",
            Self::UInt64(_) => "uint64",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::MediumText(_) => "mediumtext",
            Self::Timestamp(_) => "timestamp",
            Self::Date(_) => "date",
        }
    }

    /// Build a timestamp value from Unix epoch seconds, expanded to calendar
    /// fields in local time.
    pub fn timestamp_from_unix(secs: i64) -> Self {
        Self::Timestamp(local_datetime_from_unix(secs))
    }

    /// Build a date value from Unix epoch seconds, expanded in local time.
    pub fn date_from_unix(secs: i64) -> Self {
        Self::Date(local_datetime_from_unix(secs).date())
    }
}

/// Expand Unix epoch seconds into local-time calendar fields.
///
/// Goes through `chrono::Local`, which is thread-safe, unlike the C
/// `localtime()` this replaces.
pub fn local_datetime_from_unix(secs: i64) -> NaiveDateTime {
    match Local.timestamp_opt(secs, 0) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.naive_local(),
        // Unrepresentable in the local zone (DST gap); fall back to UTC.
        LocalResult::None => chrono::DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or_default(),
    }
}

// ==================== From impls ====================

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )+
    };
}

impl_value_from!(
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => Text,
    MediumText => MediumText,
    NaiveDateTime => Timestamp,
    NaiveDate => Date,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(value) => value.into(),
            None => Self::Null,
        }
    }
}

/// Build a `&[Value]` parameter slice from Rust values.
///
/// ```rust
/// use sqlgate::params;
///
/// let args = params![42_u32, "hi", None::<i32>];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        &[] as &[$crate::Value]
    };
    ($($value:expr),+ $(,)?) => {
        &[$($crate::Value::from($value)),+][..]
    };
}
