//! MySQL backend.
//!
//! One [`MySqlConnection`] owns one native session plus its prepared
//! statements. Queries run through the binary protocol: prepare, check both
//! arities, bind parameters, execute, drain the full result set to the
//! client, then decode rows column-by-column as directed by the row shape.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Timelike};
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder};

use crate::connection::{Connection, Connector};
use crate::error::{Driver, Error, Result};
use crate::node::{ConnectionOptions, NodeInfo};
use crate::row::{ColumnKind, ColumnSpec, FromRow};
use crate::scoped::ScopeGuard;
use crate::value::{MediumText, Value};

/// Connect timeout applied to the native session.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Staging capacity for plain text result columns. Larger payloads must be
/// declared as mediumtext.
const TEXT_RESULT_CAP: usize = 64 * 1024;

static LIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Number of live MySQL connections in this process.
pub fn live_connections() -> usize {
    LIVE_CONNECTIONS.load(Ordering::Relaxed)
}

/// A MySQL session.
pub struct MySqlConnection {
    ip: String,
    healthy: bool,
    conn: Conn,
    _live: ScopeGuard,
}

impl MySqlConnection {
    /// Connect to one endpoint with a 3-second connect timeout.
    pub fn connect(options: &ConnectionOptions) -> Result<Self> {
        let port: u16 = options.port.parse().map_err(|_| {
            Error::connection(
                Driver::MySql,
                format!("invalid port `{}` for endpoint {}", options.port, options.ip),
            )
        })?;

        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(options.ip.clone()))
            .tcp_port(port)
            .user(Some(options.user.clone()))
            .pass(Some(options.password.clone()))
            .tcp_connect_timeout(Some(CONNECT_TIMEOUT))
            .into();

        let conn = Conn::new(opts)
            .map_err(|e| connection_error(&e, "failed to connect to database"))?;

        let live = LIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(ip = %options.ip, live, "mysql connection established");

        let ip = options.ip.clone();
        let released = ip.clone();
        Ok(Self {
            ip,
            healthy: true,
            conn,
            _live: ScopeGuard::new(move || {
                let live = LIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
                tracing::debug!(ip = %released, live, "mysql connection released");
            }),
        })
    }

    /// Driver round-trip; true if the server answered.
    pub fn ping(&mut self) -> bool {
        self.conn.ping().is_ok()
    }

    /// Id generated by the last insert on this session.
    pub fn last_insert_id(&self) -> u64 {
        self.conn.last_insert_id()
    }

    /// Prepare and run both arity checks. Returns the prepared statement.
    fn prepare_checked(
        &mut self,
        sql: &str,
        params: &[Value],
        result_columns: Option<usize>,
    ) -> Result<mysql::Statement> {
        let stmt = match self.conn.prep(sql) {
            Ok(stmt) => stmt,
            Err(e) => {
                self.healthy = false;
                return Err(connection_error(
                    &e,
                    &format!("failed to prepare `{sql}`"),
                ));
            }
        };

        let placeholders = stmt.num_params() as usize;
        if placeholders != params.len() {
            return Err(Error::param_arity(placeholders, params.len()));
        }

        if let Some(fields) = result_columns {
            let columns = stmt.num_columns() as usize;
            if columns != fields {
                return Err(Error::column_arity(columns, fields));
            }
        }

        Ok(stmt)
    }
}

impl Connection for MySqlConnection {
    fn execute(&mut self, sql: &str) -> Result<()> {
        if let Err(e) = self.conn.query_drop(sql) {
            self.healthy = false;
            return Err(execution_error(&e, &format!("failed to execute `{sql}`")));
        }
        Ok(())
    }

    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<()> {
        let stmt = self.prepare_checked(sql, params, None)?;
        let bound = encode_params(params)?;
        if let Err(e) = self.conn.exec_drop(&stmt, bound) {
            self.healthy = false;
            return Err(execution_error(&e, "statement execution failed"));
        }
        Ok(())
    }

    fn query<R: FromRow>(&mut self, sql: &str, params: &[Value]) -> Result<Vec<R>> {
        let specs = R::columns();
        let stmt = self.prepare_checked(sql, params, Some(R::COLUMNS))?;
        let bound = encode_params(params)?;

        let result = match self.conn.exec_iter(&stmt, bound) {
            Ok(result) => result,
            Err(e) => {
                self.healthy = false;
                return Err(execution_error(&e, "statement execution failed"));
            }
        };

        // Drain the whole result set to the client before decoding.
        let raw: std::result::Result<Vec<mysql::Row>, mysql::Error> = result.collect();
        let raw = match raw {
            Ok(rows) => rows,
            Err(e) => {
                self.healthy = false;
                return Err(execution_error(&e, "row fetch failed"));
            }
        };

        let mut rows = Vec::with_capacity(raw.len());
        for row in raw {
            rows.push(R::from_row(decode_row(row, &specs)?)?);
        }
        Ok(rows)
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.execute("START TRANSACTION")
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.execute("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK")
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn ip(&self) -> &str {
        &self.ip
    }
}

/// Connection factory for MySQL endpoints sharing one set of credentials.
#[derive(Clone)]
pub struct MySqlConnector {
    user: String,
    password: String,
}

impl MySqlConnector {
    /// Factory with cluster-wide credentials.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl Connector for MySqlConnector {
    type Conn = MySqlConnection;

    fn connect(&self, node: &NodeInfo) -> Result<MySqlConnection> {
        MySqlConnection::connect(&ConnectionOptions::new(
            node.ip.clone(),
            node.port.clone(),
            self.user.clone(),
            self.password.clone(),
        ))
    }
}

#[track_caller]
fn connection_error(e: &mysql::Error, context: &str) -> Error {
    match e {
        mysql::Error::MySqlError(server) => Error::connection_with_code(
            Driver::MySql,
            format!("{context}: {server}"),
            i32::from(server.code),
        ),
        other => Error::connection(Driver::MySql, format!("{context}: {other}")),
    }
}

#[track_caller]
fn execution_error(e: &mysql::Error, context: &str) -> Error {
    match e {
        mysql::Error::MySqlError(server) => Error::execution_with_code(
            Driver::MySql,
            format!("{context}: {server}"),
            i32::from(server.code),
        ),
        other => Error::execution(Driver::MySql, format!("{context}: {other}")),
    }
}

/// Map application values onto wire parameters. Signedness travels through
/// the `Int`/`UInt` split; NULL binds as the wire NULL.
fn encode_params(params: &[Value]) -> Result<mysql::Params> {
    if params.is_empty() {
        return Ok(mysql::Params::Empty);
    }
    let bound = params
        .iter()
        .map(encode_param)
        .collect::<Result<Vec<_>>>()?;
    Ok(mysql::Params::Positional(bound))
}

fn encode_param(value: &Value) -> Result<mysql::Value> {
    Ok(match value {
        Value::Null => mysql::Value::NULL,
        Value::Int8(v) => mysql::Value::Int(i64::from(*v)),
        Value::Int16(v) => mysql::Value::Int(i64::from(*v)),
        Value::Int32(v) => mysql::Value::Int(i64::from(*v)),
        Value::Int64(v) => mysql::Value::Int(*v),
        Value::UInt8(v) => mysql::Value::UInt(u64::from(*v)),
        Value::UInt16(v) => mysql::Value::UInt(u64::from(*v)),
        Value::UInt32(v) => mysql::Value::UInt(u64::from(*v)),
        Value::UInt64(v) => mysql::Value::UInt(*v),
        Value::Float(v) => mysql::Value::Float(*v),
        Value::Double(v) => mysql::Value::Double(*v),
        Value::Text(s) => mysql::Value::Bytes(s.clone().into_bytes()),
        Value::MediumText(blob) => {
            if blob.len() > MediumText::MAX_LEN {
                return Err(Error::execution(
                    Driver::MySql,
                    format!("mediumtext payload of {} bytes exceeds 16 MiB", blob.len()),
                ));
            }
            mysql::Value::Bytes(blob.as_bytes().to_vec())
        }
        Value::Timestamp(dt) => mysql::Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
        Value::Date(_) => {
            return Err(Error::execution(
                Driver::MySql,
                "date values have no mysql wire type; use a timestamp",
            ));
        }
    })
}

fn decode_row(row: mysql::Row, specs: &[ColumnSpec]) -> Result<Vec<Value>> {
    let raw = row.unwrap();
    if raw.len() != specs.len() {
        return Err(Error::deserialization(format!(
            "row has {} columns, shape expects {}",
            raw.len(),
            specs.len()
        )));
    }
    raw.into_iter()
        .zip(specs)
        .map(|(value, spec)| decode_value(value, spec))
        .collect()
}

/// Decode one wire value into the variant demanded by the column spec.
fn decode_value(value: mysql::Value, spec: &ColumnSpec) -> Result<Value> {
    if let mysql::Value::NULL = value {
        return Ok(Value::Null);
    }
    match spec.kind {
        ColumnKind::Int8 => decode_int(&value, spec.kind).map(Value::Int8),
        ColumnKind::UInt8 => decode_int(&value, spec.kind).map(Value::UInt8),
        ColumnKind::Int16 => decode_int(&value, spec.kind).map(Value::Int16),
        ColumnKind::UInt16 => decode_int(&value, spec.kind).map(Value::UInt16),
        ColumnKind::Int32 => decode_int(&value, spec.kind).map(Value::Int32),
        ColumnKind::UInt32 => decode_int(&value, spec.kind).map(Value::UInt32),
        ColumnKind::Int64 => decode_int(&value, spec.kind).map(Value::Int64),
        ColumnKind::UInt64 => decode_int(&value, spec.kind).map(Value::UInt64),
        ColumnKind::Float => match value {
            mysql::Value::Float(v) => Ok(Value::Float(v)),
            mysql::Value::Double(v) => Ok(Value::Float(v as f32)),
            other => Err(type_mismatch(spec.kind, &other)),
        },
        ColumnKind::Double => match value {
            mysql::Value::Float(v) => Ok(Value::Double(f64::from(v))),
            mysql::Value::Double(v) => Ok(Value::Double(v)),
            other => Err(type_mismatch(spec.kind, &other)),
        },
        ColumnKind::Text => match value {
            mysql::Value::Bytes(bytes) => {
                if bytes.len() >= TEXT_RESULT_CAP {
                    return Err(Error::deserialization(format!(
                        "text column of {} bytes exceeds the 64 KiB staging buffer; \
                         declare the column as mediumtext",
                        bytes.len()
                    )));
                }
                String::from_utf8(bytes)
                    .map(Value::Text)
                    .map_err(|_| Error::deserialization("text column is not valid UTF-8"))
            }
            other => Err(type_mismatch(spec.kind, &other)),
        },
        ColumnKind::MediumText => match value {
            mysql::Value::Bytes(bytes) => {
                if bytes.len() > MediumText::MAX_LEN {
                    return Err(Error::deserialization(format!(
                        "mediumtext column of {} bytes exceeds 16 MiB",
                        bytes.len()
                    )));
                }
                Ok(Value::MediumText(MediumText::new(bytes)))
            }
            other => Err(type_mismatch(spec.kind, &other)),
        },
        ColumnKind::Timestamp => match value {
            mysql::Value::Date(year, month, day, hour, minute, second, micros) => {
                NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
                    .and_then(|date| {
                        date.and_hms_micro_opt(
                            u32::from(hour),
                            u32::from(minute),
                            u32::from(second),
                            micros,
                        )
                    })
                    .map(Value::Timestamp)
                    .ok_or_else(|| {
                        Error::deserialization("timestamp column carries invalid calendar fields")
                    })
            }
            other => Err(type_mismatch(spec.kind, &other)),
        },
        ColumnKind::Date => Err(Error::deserialization(
            "date columns have no mysql decoding; declare the field as a timestamp",
        )),
    }
}

fn decode_int<T: TryFrom<i128>>(value: &mysql::Value, kind: ColumnKind) -> Result<T> {
    let wide: i128 = match value {
        mysql::Value::Int(v) => i128::from(*v),
        mysql::Value::UInt(v) => i128::from(*v),
        other => return Err(type_mismatch(kind, other)),
    };
    T::try_from(wide).map_err(|_| {
        Error::deserialization(format!("integer value {wide} out of range for {kind:?} column"))
    })
}

#[track_caller]
fn type_mismatch(kind: ColumnKind, value: &mysql::Value) -> Error {
    Error::deserialization(format!(
        "column cannot decode as {kind:?}: wire value {value:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: ColumnKind) -> ColumnSpec {
        ColumnSpec::required(kind)
    }

    #[test]
    fn test_encode_signedness() {
        assert_eq!(
            encode_param(&Value::Int32(-5)).unwrap(),
            mysql::Value::Int(-5)
        );
        assert_eq!(
            encode_param(&Value::UInt32(5)).unwrap(),
            mysql::Value::UInt(5)
        );
        assert_eq!(
            encode_param(&Value::UInt64(u64::MAX)).unwrap(),
            mysql::Value::UInt(u64::MAX)
        );
    }

    #[test]
    fn test_encode_null_and_text() {
        assert_eq!(encode_param(&Value::Null).unwrap(), mysql::Value::NULL);
        assert_eq!(
            encode_param(&Value::Text("hi".into())).unwrap(),
            mysql::Value::Bytes(b"hi".to_vec())
        );
    }

    #[test]
    fn test_encode_timestamp_fields() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(12, 30, 45)
            .unwrap();
        assert_eq!(
            encode_param(&Value::Timestamp(dt)).unwrap(),
            mysql::Value::Date(2024, 3, 9, 12, 30, 45, 0)
        );
    }

    #[test]
    fn test_encode_date_rejected() {
        let err =
            encode_param(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())).unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));
    }

    #[test]
    fn test_decode_null() {
        let value = decode_value(mysql::Value::NULL, &spec(ColumnKind::Text)).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_decode_unsigned_from_either_wire_variant() {
        assert_eq!(
            decode_value(mysql::Value::Int(42), &spec(ColumnKind::UInt32)).unwrap(),
            Value::UInt32(42)
        );
        assert_eq!(
            decode_value(mysql::Value::UInt(42), &spec(ColumnKind::UInt32)).unwrap(),
            Value::UInt32(42)
        );
    }

    #[test]
    fn test_decode_out_of_range_fails() {
        let err = decode_value(mysql::Value::Int(300), &spec(ColumnKind::Int8)).unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }

    #[test]
    fn test_decode_text_utf8() {
        assert_eq!(
            decode_value(mysql::Value::Bytes(b"hello".to_vec()), &spec(ColumnKind::Text)).unwrap(),
            Value::Text("hello".into())
        );
    }

    #[test]
    fn test_decode_text_over_staging_cap_fails() {
        let big = vec![b'x'; TEXT_RESULT_CAP];
        let err = decode_value(mysql::Value::Bytes(big), &spec(ColumnKind::Text)).unwrap_err();
        assert!(err.to_string().contains("mediumtext"));
    }

    #[test]
    fn test_decode_mediumtext_roundtrips_boundary() {
        let payload = vec![b'x'; TEXT_RESULT_CAP];
        let value = decode_value(
            mysql::Value::Bytes(payload.clone()),
            &spec(ColumnKind::MediumText),
        )
        .unwrap();
        assert_eq!(value, Value::MediumText(MediumText::new(payload)));
    }

    #[test]
    fn test_decode_timestamp() {
        let value = decode_value(
            mysql::Value::Date(2024, 3, 9, 12, 30, 45, 7),
            &spec(ColumnKind::Timestamp),
        )
        .unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(12, 30, 45, 7)
            .unwrap();
        assert_eq!(value, Value::Timestamp(expected));
    }

    #[test]
    fn test_decode_row_arity_guard() {
        let specs = [spec(ColumnKind::Int32), spec(ColumnKind::Text)];
        let row_values = vec![mysql::Value::Int(1)];
        let raw: Vec<Value> = row_values
            .into_iter()
            .zip(specs.iter())
            .map(|(v, s)| decode_value(v, s))
            .collect::<Result<_>>()
            .unwrap();
        // zip stops at the shorter side; decode_row proper rejects the row.
        assert_eq!(raw.len(), 1);
    }
}
