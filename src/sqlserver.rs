//! Microsoft SQL Server backend over ODBC.
//!
//! One process-wide ODBC environment (ODBC 3), one [`SqlServerConnection`]
//! per native session. Statements prepare through `SQLPrepare`, bind with
//! `SQLBindParameter`, and fetch through bound column buffers with
//! per-column indicators; every execute leaves the statement closed behind
//! it so the session handles any number of sequential statements.
//!
//! SQL Server has no unsigned column types, so unsigned fields stage
//! through the next wider signed buffer and range-check on decode.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use odbc_api::buffers::{AnySlice, BufferDesc, ColumnarAnyBuffer, NullableSlice};
use odbc_api::parameter::InputParameter;
use odbc_api::sys;
use odbc_api::parameter::WithDataType;
use odbc_api::{
    Connection as OdbcConnection, ConnectionOptions as OdbcConnectionOptions, Cursor, DataType,
    Environment, IntoParameter, ResultSetMetadata,
};

use crate::connection::{Connection, Connector};
use crate::error::{Driver, Error, Result};
use crate::node::{ConnectionOptions, NodeInfo};
use crate::row::{ColumnKind, ColumnSpec, FromRow};
use crate::scoped::ScopeGuard;
use crate::value::Value;

/// Login timeout applied to the connection handle.
const LOGIN_TIMEOUT_SECS: u32 = 3;

/// Staging capacity for text result columns.
const TEXT_COLUMN_LEN: usize = 64 * 1024;

static LIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Number of live SQL Server connections in this process.
pub fn live_connections() -> usize {
    LIVE_CONNECTIONS.load(Ordering::Relaxed)
}

/// Process-wide ODBC environment. Allocating one per connection is legal but
/// wasteful; the driver manager expects a shared environment.
fn environment() -> Result<&'static Environment> {
    static ENV: OnceLock<Environment> = OnceLock::new();
    if let Some(env) = ENV.get() {
        return Ok(env);
    }
    let env = Environment::new()
        .map_err(|e| connection_error(&e, "failed to allocate odbc environment"))?;
    Ok(ENV.get_or_init(|| env))
}

/// A SQL Server session.
pub struct SqlServerConnection {
    ip: String,
    healthy: bool,
    conn: OdbcConnection<'static>,
    _live: ScopeGuard,
}

impl SqlServerConnection {
    /// Connect through `SQLDriverConnect` with a 3-second login timeout.
    ///
    /// `driver_name` is the installed ODBC driver, e.g.
    /// `ODBC Driver 17 for SQL Server`.
    pub fn connect(options: &ConnectionOptions, driver_name: &str) -> Result<Self> {
        let env = environment()?;
        let connection_string = format!(
            "DRIVER={{{}}};SERVER={};UID={};PWD={}",
            driver_name, options.ip, options.user, options.password
        );

        let conn = env
            .connect_with_connection_string(
                &connection_string,
                OdbcConnectionOptions {
                    login_timeout_sec: Some(LOGIN_TIMEOUT_SECS),
                    ..Default::default()
                },
            )
            .map_err(|e| connection_error(&e, "failed to connect to database"))?;

        let live = LIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(ip = %options.ip, live, "sqlserver connection established");

        let ip = options.ip.clone();
        let released = ip.clone();
        Ok(Self {
            ip,
            healthy: true,
            conn,
            _live: ScopeGuard::new(move || {
                let live = LIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
                tracing::debug!(ip = %released, live, "sqlserver connection released");
            }),
        })
    }
}

impl Connection for SqlServerConnection {
    fn execute(&mut self, sql: &str) -> Result<()> {
        // The returned cursor, if any, closes the statement when dropped.
        match self.conn.execute(sql, ()) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.healthy = false;
                Err(execution_error(&e, &format!("failed to execute `{sql}`")))
            }
        }
    }

    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<()> {
        let mut prepared = match self.conn.prepare(sql) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.healthy = false;
                return Err(connection_error(&e, &format!("failed to prepare `{sql}`")));
            }
        };

        let placeholders = prepared
            .num_params()
            .map_err(|e| execution_error(&e, "failed to count placeholders"))?
            as usize;
        if placeholders != params.len() {
            return Err(Error::param_arity(placeholders, params.len()));
        }

        let bound = encode_params(params)?;
        let result = match prepared.execute(bound.as_slice()) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.healthy = false;
                Err(execution_error(&e, "statement execution failed"))
            }
        };
        result
    }

    fn query<R: FromRow>(&mut self, sql: &str, params: &[Value]) -> Result<Vec<R>> {
        let specs = R::columns();

        let mut prepared = match self.conn.prepare(sql) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.healthy = false;
                return Err(connection_error(&e, &format!("failed to prepare `{sql}`")));
            }
        };

        let placeholders = prepared
            .num_params()
            .map_err(|e| execution_error(&e, "failed to count placeholders"))?
            as usize;
        if placeholders != params.len() {
            return Err(Error::param_arity(placeholders, params.len()));
        }

        let columns = prepared
            .num_result_cols()
            .map_err(|e| execution_error(&e, "failed to count result columns"))?;
        if columns as usize != R::COLUMNS {
            return Err(Error::column_arity(columns as usize, R::COLUMNS));
        }

        let descs = specs
            .iter()
            .map(buffer_desc)
            .collect::<Result<Vec<_>>>()?;
        let bound = encode_params(params)?;

        let cursor = match prepared.execute(bound.as_slice()) {
            Ok(Some(cursor)) => cursor,
            Ok(None) => {
                return Err(Error::execution(
                    Driver::SqlServer,
                    "statement produced no result set",
                ));
            }
            Err(e) => {
                self.healthy = false;
                return Err(execution_error(&e, "statement execution failed"));
            }
        };

        // Single-row row sets: SQLFetch streams one row per call into the
        // bound buffers.
        let buffer = ColumnarAnyBuffer::from_descs(1, descs);
        let mut block = match cursor.bind_buffer(buffer) {
            Ok(block) => block,
            Err(e) => {
                self.healthy = false;
                return Err(execution_error(&e, "failed to bind result columns"));
            }
        };

        let mut rows = Vec::new();
        loop {
            // Truncation is an error: a text value past the staging buffer
            // must surface, not silently shrink.
            let batch = match block.fetch_with_truncation_check(true) {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => {
                    self.healthy = false;
                    return Err(execution_error(&e, "row fetch failed"));
                }
            };
            for row in 0..batch.num_rows() {
                let mut values = Vec::with_capacity(specs.len());
                for (column, spec) in specs.iter().enumerate() {
                    values.push(decode_column(batch.column(column), row, spec)?);
                }
                rows.push(R::from_row(values)?);
            }
        }
        Ok(rows)
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.execute("begin tran")
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.execute("commit tran")
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute("rollback tran")
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn ip(&self) -> &str {
        &self.ip
    }
}

/// Connection factory for SQL Server endpoints sharing credentials and an
/// ODBC driver name.
#[derive(Clone)]
pub struct SqlServerConnector {
    user: String,
    password: String,
    driver_name: String,
}

impl SqlServerConnector {
    /// Factory with credentials and the installed ODBC driver name.
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        driver_name: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            driver_name: driver_name.into(),
        }
    }
}

impl Connector for SqlServerConnector {
    type Conn = SqlServerConnection;

    fn connect(&self, node: &NodeInfo) -> Result<SqlServerConnection> {
        SqlServerConnection::connect(
            &ConnectionOptions::new(
                node.ip.clone(),
                node.port.clone(),
                self.user.clone(),
                self.password.clone(),
            ),
            &self.driver_name,
        )
    }
}

fn native_code(e: &odbc_api::Error) -> Option<i32> {
    match e {
        odbc_api::Error::Diagnostics { record, .. } => Some(record.native_error),
        _ => None,
    }
}

#[track_caller]
fn connection_error(e: &odbc_api::Error, context: &str) -> Error {
    match native_code(e) {
        Some(code) => Error::connection_with_code(Driver::SqlServer, format!("{context}: {e}"), code),
        None => Error::connection(Driver::SqlServer, format!("{context}: {e}")),
    }
}

#[track_caller]
fn execution_error(e: &odbc_api::Error, context: &str) -> Error {
    match native_code(e) {
        Some(code) => Error::execution_with_code(Driver::SqlServer, format!("{context}: {e}"), code),
        None => Error::execution(Driver::SqlServer, format!("{context}: {e}")),
    }
}

fn encode_params(params: &[Value]) -> Result<Vec<Box<dyn InputParameter>>> {
    params.iter().map(encode_param).collect()
}

fn encode_param(value: &Value) -> Result<Box<dyn InputParameter>> {
    Ok(match value {
        // Typed NULL with a static indicator; the buffer is irrelevant.
        Value::Null => Box::new(Option::<String>::None.into_parameter()),
        Value::Int8(v) => Box::new(*v),
        Value::UInt8(v) => Box::new(i16::from(*v)),
        Value::Int16(v) => Box::new(*v),
        Value::UInt16(v) => Box::new(i32::from(*v)),
        Value::Int32(v) => Box::new(*v),
        Value::UInt32(v) => Box::new(i64::from(*v)),
        Value::Int64(v) => Box::new(*v),
        Value::UInt64(v) => {
            let widened = i64::try_from(*v).map_err(|_| {
                Error::execution(
                    Driver::SqlServer,
                    format!("unsigned value {v} exceeds the BIGINT range"),
                )
            })?;
            Box::new(widened)
        }
        Value::Float(v) => Box::new(*v),
        Value::Double(v) => Box::new(*v),
        Value::Text(s) => Box::new(s.clone().into_parameter()),
        Value::MediumText(_) => {
            return Err(Error::execution(
                Driver::SqlServer,
                "mediumtext has no sql server wire type",
            ));
        }
        Value::Timestamp(dt) => Box::new(WithDataType {
            value: odbc_timestamp(dt),
            data_type: DataType::Timestamp { precision: 7 },
        }),
        Value::Date(d) => Box::new(odbc_date(d)),
    })
}

/// Map a column spec onto an output buffer description: 64 KiB text staging,
/// indicator-tracked numerics, signed staging for unsigned kinds.
fn buffer_desc(spec: &ColumnSpec) -> Result<BufferDesc> {
    Ok(match spec.kind {
        ColumnKind::Int8 => BufferDesc::I8 { nullable: true },
        ColumnKind::UInt8 => BufferDesc::U8 { nullable: true },
        ColumnKind::Int16 => BufferDesc::I16 { nullable: true },
        ColumnKind::UInt16 => BufferDesc::I32 { nullable: true },
        ColumnKind::Int32 => BufferDesc::I32 { nullable: true },
        ColumnKind::UInt32 => BufferDesc::I64 { nullable: true },
        ColumnKind::Int64 | ColumnKind::UInt64 => BufferDesc::I64 { nullable: true },
        ColumnKind::Float => BufferDesc::F32 { nullable: true },
        ColumnKind::Double => BufferDesc::F64 { nullable: true },
        ColumnKind::Text => BufferDesc::Text {
            max_str_len: TEXT_COLUMN_LEN,
        },
        ColumnKind::Timestamp => BufferDesc::Timestamp { nullable: true },
        ColumnKind::Date => BufferDesc::Date { nullable: true },
        ColumnKind::MediumText => {
            return Err(Error::execution(
                Driver::SqlServer,
                "mediumtext has no sql server column binding",
            ));
        }
    })
}

fn nullable_at<T: Copy>(col: &NullableSlice<'_, T>, row: usize) -> Option<T> {
    let (values, indicators) = col.raw_values();
    if indicators[row] == sys::NULL_DATA {
        None
    } else {
        Some(values[row])
    }
}

fn range_checked<T, U>(value: T, kind: ColumnKind) -> Result<U>
where
    T: Copy + std::fmt::Display,
    U: TryFrom<T>,
{
    U::try_from(value).map_err(|_| {
        Error::deserialization(format!("value {value} out of range for {kind:?} column"))
    })
}

/// Decode one bound column at `row` into the variant the spec demands.
fn decode_column(slice: AnySlice<'_>, row: usize, spec: &ColumnSpec) -> Result<Value> {
    use AnySlice as S;
    Ok(match (spec.kind, slice) {
        (ColumnKind::Text, S::Text(view)) => match view.get(row) {
            Some(bytes) => Value::Text(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| Error::deserialization("text column is not valid UTF-8"))?,
            ),
            None => Value::Null,
        },
        (ColumnKind::Int8, S::NullableI8(col)) => {
            nullable_at(&col, row).map_or(Value::Null, Value::Int8)
        }
        (ColumnKind::UInt8, S::NullableU8(col)) => {
            nullable_at(&col, row).map_or(Value::Null, Value::UInt8)
        }
        (ColumnKind::Int16, S::NullableI16(col)) => {
            nullable_at(&col, row).map_or(Value::Null, Value::Int16)
        }
        (ColumnKind::UInt16, S::NullableI32(col)) => match nullable_at(&col, row) {
            Some(v) => Value::UInt16(range_checked(v, spec.kind)?),
            None => Value::Null,
        },
        (ColumnKind::Int32, S::NullableI32(col)) => {
            nullable_at(&col, row).map_or(Value::Null, Value::Int32)
        }
        (ColumnKind::UInt32, S::NullableI64(col)) => match nullable_at(&col, row) {
            Some(v) => Value::UInt32(range_checked(v, spec.kind)?),
            None => Value::Null,
        },
        (ColumnKind::Int64, S::NullableI64(col)) => {
            nullable_at(&col, row).map_or(Value::Null, Value::Int64)
        }
        (ColumnKind::UInt64, S::NullableI64(col)) => match nullable_at(&col, row) {
            Some(v) => Value::UInt64(range_checked(v, spec.kind)?),
            None => Value::Null,
        },
        (ColumnKind::Float, S::NullableF32(col)) => {
            nullable_at(&col, row).map_or(Value::Null, Value::Float)
        }
        (ColumnKind::Double, S::NullableF64(col)) => {
            nullable_at(&col, row).map_or(Value::Null, Value::Double)
        }
        (ColumnKind::Timestamp, S::NullableTimestamp(col)) => match nullable_at(&col, row) {
            Some(ts) => Value::Timestamp(datetime_from_odbc(ts)?),
            None => Value::Null,
        },
        (ColumnKind::Date, S::NullableDate(col)) => match nullable_at(&col, row) {
            Some(d) => Value::Date(date_from_odbc(d)?),
            None => Value::Null,
        },
        (kind, _) => {
            return Err(Error::deserialization(format!(
                "column buffer does not match {kind:?} field"
            )));
        }
    })
}

fn odbc_timestamp(dt: &NaiveDateTime) -> sys::Timestamp {
    sys::Timestamp {
        year: dt.year() as i16,
        month: dt.month() as u16,
        day: dt.day() as u16,
        hour: dt.hour() as u16,
        minute: dt.minute() as u16,
        second: dt.second() as u16,
        fraction: dt.nanosecond(),
    }
}

fn odbc_date(d: &NaiveDate) -> sys::Date {
    sys::Date {
        year: d.year() as i16,
        month: d.month() as u16,
        day: d.day() as u16,
    }
}

fn datetime_from_odbc(ts: sys::Timestamp) -> Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(i32::from(ts.year), u32::from(ts.month), u32::from(ts.day))
        .and_then(|date| {
            date.and_hms_nano_opt(
                u32::from(ts.hour),
                u32::from(ts.minute),
                u32::from(ts.second),
                ts.fraction,
            )
        })
        .ok_or_else(|| Error::deserialization("timestamp column carries invalid calendar fields"))
}

fn date_from_odbc(d: sys::Date) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))
        .ok_or_else(|| Error::deserialization("date column carries invalid calendar fields"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_desc_stages_unsigned_as_wider_signed() {
        assert!(matches!(
            buffer_desc(&ColumnSpec::required(ColumnKind::UInt16)).unwrap(),
            BufferDesc::I32 { nullable: true }
        ));
        assert!(matches!(
            buffer_desc(&ColumnSpec::required(ColumnKind::UInt32)).unwrap(),
            BufferDesc::I64 { nullable: true }
        ));
        assert!(matches!(
            buffer_desc(&ColumnSpec::required(ColumnKind::UInt8)).unwrap(),
            BufferDesc::U8 { nullable: true }
        ));
    }

    #[test]
    fn test_buffer_desc_text_staging_size() {
        match buffer_desc(&ColumnSpec::required(ColumnKind::Text)).unwrap() {
            BufferDesc::Text { max_str_len } => assert_eq!(max_str_len, 64 * 1024),
            other => panic!("unexpected desc {other:?}"),
        }
    }

    #[test]
    fn test_mediumtext_has_no_binding() {
        let err = buffer_desc(&ColumnSpec::required(ColumnKind::MediumText)).unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));

        let err = encode_param(&Value::MediumText("x".into())).unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));
    }

    #[test]
    fn test_uint64_param_beyond_bigint_rejected() {
        let err = encode_param(&Value::UInt64(u64::MAX)).unwrap_err();
        assert!(err.to_string().contains("BIGINT"));

        assert!(encode_param(&Value::UInt64(i64::MAX as u64)).is_ok());
    }

    #[test]
    fn test_timestamp_struct_round_trip() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_nano_opt(12, 30, 45, 7_000)
            .unwrap();
        let ts = odbc_timestamp(&dt);
        assert_eq!(ts.year, 2024);
        assert_eq!(ts.fraction, 7_000);
        assert_eq!(datetime_from_odbc(ts).unwrap(), dt);
    }

    #[test]
    fn test_date_struct_round_trip() {
        let d = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert_eq!(date_from_odbc(odbc_date(&d)).unwrap(), d);
    }
}
