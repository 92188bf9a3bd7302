//! Row shapes: per-column decoding, tuple and record materialization.
//!
//! A result shape is one of:
//! - a scalar (one column),
//! - a tuple of up to 16 heterogeneous fields,
//! - a record struct registered through [`sql_record!`](crate::sql_record).
//!
//! Each field carries a [`ColumnSpec`] (type tag plus nullability) that the
//! drivers use to allocate output buffers and to decode fetched columns into
//! [`Value`]s; [`FromRow::from_row`] then materializes the row. Borrowed
//! string types deliberately have no [`FromSql`] impl: reads must target
//! owned buffers.

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};
use crate::value::{MediumText, Value};

/// Per-field type tag. Closed set; drivers switch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ColumnKind {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Text,
    MediumText,
    Timestamp,
    Date,
}

/// Output-column descriptor: what to allocate and how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Field type tag
    pub kind: ColumnKind,
    /// Whether NULL is representable (the field is an `Option`)
    pub nullable: bool,
}

impl ColumnSpec {
    /// Spec for a non-nullable column.
    pub const fn required(kind: ColumnKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    /// Spec for a nullable column.
    pub const fn nullable(kind: ColumnKind) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }
}

/// A single result column decodable from a [`Value`].
pub trait FromSql: Sized {
    /// Column descriptor driving buffer allocation and decoding.
    const SPEC: ColumnSpec;

    /// Materialize from the decoded driver value.
    fn from_value(value: Value) -> Result<Self>;
}

macro_rules! impl_from_sql {
    ($($ty:ty => $kind:ident / $variant:ident),+ $(,)?) => {
        $(
            impl FromSql for $ty {
                const SPEC: ColumnSpec = ColumnSpec::required(ColumnKind::$kind);

                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        Value::Null => Err(Error::deserialization(concat!(
                            "unexpected NULL for non-nullable ",
                            stringify!($kind),
                            " column"
                        ))),
                        other => Err(Error::deserialization(format!(
                            concat!("expected ", stringify!($kind), " column, got {}"),
                            other.type_name()
                        ))),
                    }
                }
            }
        )+
    };
}

impl_from_sql!(
    i8 => Int8 / Int8,
    u8 => UInt8 / UInt8,
    i16 => Int16 / Int16,
    u16 => UInt16 / UInt16,
    i32 => Int32 / Int32,
    u32 => UInt32 / UInt32,
    i64 => Int64 / Int64,
    u64 => UInt64 / UInt64,
    f32 => Float / Float,
    f64 => Double / Double,
    String => Text / Text,
    MediumText => MediumText / MediumText,
    NaiveDateTime => Timestamp / Timestamp,
    NaiveDate => Date / Date,
);

impl<T: FromSql> FromSql for Option<T> {
    const SPEC: ColumnSpec = ColumnSpec {
        kind: T::SPEC.kind,
        nullable: true,
    };

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A result-row shape: scalar, tuple or record.
pub trait FromRow: Sized {
    /// Number of columns this shape expects. The driver checks it against
    /// the statement's reported column count before executing.
    const COLUMNS: usize;

    /// Column descriptors, in declaration order.
    fn columns() -> Vec<ColumnSpec>;

    /// Materialize one fetched row.
    fn from_row(row: Vec<Value>) -> Result<Self>;
}

macro_rules! impl_from_row_scalar {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FromRow for $ty {
                const COLUMNS: usize = 1;

                fn columns() -> Vec<ColumnSpec> {
                    vec![<$ty as FromSql>::SPEC]
                }

                fn from_row(mut row: Vec<Value>) -> Result<Self> {
                    if row.len() != 1 {
                        return Err(Error::deserialization(format!(
                            "scalar row shape expects 1 column, got {}",
                            row.len()
                        )));
                    }
                    <$ty as FromSql>::from_value(row.pop().expect("length checked above"))
                }
            }
        )+
    };
}

impl_from_row_scalar!(
    i8, u8, i16, u16, i32, u32, i64, u64, f32, f64, String, MediumText, NaiveDateTime, NaiveDate,
);

impl<T: FromSql> FromRow for Option<T> {
    const COLUMNS: usize = 1;

    fn columns() -> Vec<ColumnSpec> {
        vec![<Option<T> as FromSql>::SPEC]
    }

    fn from_row(mut row: Vec<Value>) -> Result<Self> {
        if row.len() != 1 {
            return Err(Error::deserialization(format!(
                "scalar row shape expects 1 column, got {}",
                row.len()
            )));
        }
        <Option<T> as FromSql>::from_value(row.pop().expect("length checked above"))
    }
}

macro_rules! impl_from_row_tuple {
    ($($field:ident),+) => {
        impl<$($field: FromSql),+> FromRow for ($($field,)+) {
            const COLUMNS: usize = [$(stringify!($field)),+].len();

            fn columns() -> Vec<ColumnSpec> {
                vec![$($field::SPEC),+]
            }

            fn from_row(row: Vec<Value>) -> Result<Self> {
                if row.len() != Self::COLUMNS {
                    return Err(Error::deserialization(format!(
                        "tuple row shape expects {} columns, got {}",
                        Self::COLUMNS,
                        row.len()
                    )));
                }
                let mut values = row.into_iter();
                Ok(($($field::from_value(values.next().expect("length checked above"))?,)+))
            }
        }
    };
}

impl_from_row_tuple!(A);
impl_from_row_tuple!(A, B);
impl_from_row_tuple!(A, B, C);
impl_from_row_tuple!(A, B, C, D);
impl_from_row_tuple!(A, B, C, D, E);
impl_from_row_tuple!(A, B, C, D, E, F);
impl_from_row_tuple!(A, B, C, D, E, F, G);
impl_from_row_tuple!(A, B, C, D, E, F, G, H);
impl_from_row_tuple!(A, B, C, D, E, F, G, H, I);
impl_from_row_tuple!(A, B, C, D, E, F, G, H, I, J);
impl_from_row_tuple!(A, B, C, D, E, F, G, H, I, J, K);
impl_from_row_tuple!(A, B, C, D, E, F, G, H, I, J, K, L);
impl_from_row_tuple!(A, B, C, D, E, F, G, H, I, J, K, L, M);
impl_from_row_tuple!(A, B, C, D, E, F, G, H, I, J, K, L, M, N);
impl_from_row_tuple!(A, B, C, D, E, F, G, H, I, J, K, L, M, N, O);
impl_from_row_tuple!(A, B, C, D, E, F, G, H, I, J, K, L, M, N, O, P);

/// The record-reflection facility: field count, field descriptors and
/// per-row materialization for a user-declared struct.
///
/// Implemented through [`sql_record!`](crate::sql_record); field order is
/// column order.
pub trait Record: Sized {
    /// Number of fields.
    const FIELDS: usize;

    /// Field descriptors, in declaration order.
    fn field_specs() -> Vec<ColumnSpec>;

    /// Materialize a record from one row of decoded values.
    fn from_fields(values: Vec<Value>) -> Result<Self>;
}

/// Register a struct as a result-row record.
///
/// Implements [`Record`] and [`FromRow`] for the named struct; the listed
/// fields, in order, define the expected columns.
///
/// ```rust
/// use sqlgate::sql_record;
///
/// #[derive(Debug, PartialEq)]
/// struct User {
///     id: u32,
///     name: String,
///     email: Option<String>,
/// }
///
/// sql_record!(User {
///     id: u32,
///     name: String,
///     email: Option<String>,
/// });
/// ```
#[macro_export]
macro_rules! sql_record {
    ($name:ident { $($field:ident : $ty:ty),+ $(,)? }) => {
        impl $crate::row::Record for $name {
            const FIELDS: usize = [$(stringify!($field)),+].len();

            fn field_specs() -> ::std::vec::Vec<$crate::row::ColumnSpec> {
                ::std::vec![$(<$ty as $crate::row::FromSql>::SPEC),+]
            }

            fn from_fields(values: ::std::vec::Vec<$crate::Value>) -> $crate::Result<Self> {
                if values.len() != <Self as $crate::row::Record>::FIELDS {
                    return ::std::result::Result::Err($crate::Error::deserialization(
                        ::std::format!(
                            "record {} expects {} columns, got {}",
                            stringify!($name),
                            <Self as $crate::row::Record>::FIELDS,
                            values.len()
                        ),
                    ));
                }
                let mut values = values.into_iter();
                ::std::result::Result::Ok(Self {
                    $($field: <$ty as $crate::row::FromSql>::from_value(
                        values.next().expect("length checked above"),
                    )?),+
                })
            }
        }

        impl $crate::row::FromRow for $name {
            const COLUMNS: usize = <$name as $crate::row::Record>::FIELDS;

            fn columns() -> ::std::vec::Vec<$crate::row::ColumnSpec> {
                <$name as $crate::row::Record>::field_specs()
            }

            fn from_row(row: ::std::vec::Vec<$crate::Value>) -> $crate::Result<Self> {
                <$name as $crate::row::Record>::from_fields(row)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_specs() {
        assert_eq!(u32::SPEC, ColumnSpec::required(ColumnKind::UInt32));
        assert_eq!(String::SPEC, ColumnSpec::required(ColumnKind::Text));
        assert_eq!(
            <Option<String>>::SPEC,
            ColumnSpec::nullable(ColumnKind::Text)
        );
        assert_eq!(
            <Option<i64>>::SPEC,
            ColumnSpec::nullable(ColumnKind::Int64)
        );
    }

    #[test]
    fn test_tuple_columns() {
        let specs = <(u32, String, Option<f64>)>::columns();
        assert_eq!(
            specs,
            vec![
                ColumnSpec::required(ColumnKind::UInt32),
                ColumnSpec::required(ColumnKind::Text),
                ColumnSpec::nullable(ColumnKind::Double),
            ]
        );
        assert_eq!(<(u32, String, Option<f64>)>::COLUMNS, 3);
    }

    #[test]
    fn test_tuple_from_row() {
        let row = vec![Value::UInt32(42), Value::Text("hi".into())];
        let (id, name) = <(u32, String)>::from_row(row).unwrap();
        assert_eq!(id, 42);
        assert_eq!(name, "hi");
    }

    #[test]
    fn test_scalar_from_row() {
        let count = i64::from_row(vec![Value::Int64(9)]).unwrap();
        assert_eq!(count, 9);
    }

    #[test]
    fn test_optional_null_stays_empty() {
        let row = vec![Value::Int32(1), Value::Null];
        let (id, email) = <(i32, Option<String>)>::from_row(row).unwrap();
        assert_eq!(id, 1);
        assert_eq!(email, None);
    }

    #[test]
    fn test_optional_empty_string_is_not_null() {
        let row = vec![Value::Text(String::new())];
        let email = <Option<String>>::from_row(row).unwrap();
        assert_eq!(email, Some(String::new()));
    }

    #[test]
    fn test_null_into_required_field_fails() {
        let err = <(i32,)>::from_row(vec![Value::Null]).unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }

    #[test]
    fn test_row_length_mismatch_fails() {
        let err = <(i32, String)>::from_row(vec![Value::Int32(1)]).unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }

    #[test]
    fn test_type_mismatch_fails() {
        let err = String::from_row(vec![Value::Int32(1)]).unwrap_err();
        assert!(err.to_string().contains("expected Text column"));
    }
}
