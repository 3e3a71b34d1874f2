//! libSQL backend for the Database trait.
//!
//! Embedded single-file deployment for a small office. SQLite has no row
//! locks, so invariant-bearing mutations run inside `BEGIN IMMEDIATE`
//! transactions, which serialize all writers for the duration.
//!
//! Column codecs: uuids and decimals are stored as TEXT, timestamps as
//! RFC 3339 TEXT, dates as `YYYY-MM-DD` TEXT, booleans as INTEGER 0/1.

mod billing;
mod cascade;
mod practice;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::Database;
use crate::error::DatabaseError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS clients (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        address TEXT,
        company TEXT,
        national_id TEXT,
        notes TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS matters (
        id TEXT PRIMARY KEY,
        matter_number TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT,
        client_id TEXT NOT NULL REFERENCES clients(id),
        responsible_user TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        opened_on TEXT NOT NULL,
        next_hearing TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_matters_client ON matters(client_id)",
    "CREATE TABLE IF NOT EXISTS appointments (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        owner TEXT NOT NULL,
        client_id TEXT REFERENCES clients(id),
        matter_id TEXT REFERENCES matters(id),
        starts_at TEXT NOT NULL,
        ends_at TEXT NOT NULL,
        location TEXT,
        status TEXT NOT NULL DEFAULT 'scheduled',
        notes TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_appointments_client ON appointments(client_id)",
    "CREATE INDEX IF NOT EXISTS idx_appointments_matter ON appointments(matter_id)",
    "CREATE TABLE IF NOT EXISTS invoices (
        id TEXT PRIMARY KEY,
        invoice_number TEXT NOT NULL UNIQUE,
        client_id TEXT NOT NULL REFERENCES clients(id),
        matter_id TEXT REFERENCES matters(id),
        base_amount TEXT NOT NULL,
        tax_amount TEXT NOT NULL,
        total_amount TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        issued_on TEXT NOT NULL,
        due_on TEXT NOT NULL,
        paid_at TEXT,
        notes TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_invoices_client ON invoices(client_id)",
    "CREATE INDEX IF NOT EXISTS idx_invoices_matter ON invoices(matter_id)",
    "CREATE TABLE IF NOT EXISTS payments (
        id TEXT PRIMARY KEY,
        invoice_id TEXT NOT NULL REFERENCES invoices(id),
        amount TEXT NOT NULL,
        method TEXT NOT NULL,
        reference TEXT,
        notes TEXT,
        paid_at TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_payments_invoice ON payments(invoice_id)",
    "CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        client_id TEXT NOT NULL REFERENCES clients(id),
        matter_id TEXT REFERENCES matters(id),
        file_ref TEXT NOT NULL,
        original_filename TEXT NOT NULL,
        doc_type TEXT,
        description TEXT,
        confidential INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_documents_client ON documents(client_id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_matter ON documents(matter_id)",
    // Monotonic counter backing the invoice-number sequence.
    "CREATE TABLE IF NOT EXISTS counters (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )",
    "INSERT OR IGNORE INTO counters (name, value) VALUES ('invoice_number', 0)",
];

/// Embedded libSQL database backend.
pub struct LibSqlBackend {
    db: libsql::Database,
}

impl LibSqlBackend {
    /// Open (or create) a local database file.
    pub async fn new_local(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(path.as_ref())
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self { db })
    }

    /// Open a connection with foreign-key enforcement on. SQLite checks
    /// foreign keys only when the pragma is set per connection.
    pub(crate) async fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        Ok(conn)
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        for statement in SCHEMA {
            conn.execute(statement, ())
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        }
        Ok(())
    }
}

// ==================== Column codecs ====================

pub(crate) fn get_text(row: &libsql::Row, idx: i32) -> String {
    match row.get_value(idx) {
        Ok(libsql::Value::Text(value)) => value,
        _ => String::new(),
    }
}

pub(crate) fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    match row.get_value(idx) {
        Ok(libsql::Value::Text(value)) => Some(value),
        _ => None,
    }
}

pub(crate) fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    match row.get_value(idx) {
        Ok(libsql::Value::Integer(value)) => value,
        _ => 0,
    }
}

pub(crate) fn opt_text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(value) => libsql::Value::Text(value.to_string()),
        None => libsql::Value::Null,
    }
}

pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339 (what this backend writes) and the `datetime('now')`
/// format the schema defaults produce.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("invalid timestamp '{raw}': {e}")))
}

pub(crate) fn parse_timestamp_opt(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Serialization(format!("invalid date '{raw}': {e}")))
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, DatabaseError> {
    raw.parse::<Decimal>()
        .map_err(|e| DatabaseError::Serialization(format!("invalid amount '{raw}': {e}")))
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} uuid: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    use super::{fmt_date, fmt_ts, parse_date, parse_decimal, parse_timestamp};

    #[test]
    fn timestamps_round_trip_through_text() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).single().expect("valid");
        let parsed = parse_timestamp(&fmt_ts(ts)).expect("parse");
        assert_eq!(parsed, ts);
    }

    #[test]
    fn dates_round_trip_through_text() {
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid");
        assert_eq!(fmt_date(date), "2026-03-14");
        assert_eq!(parse_date("2026-03-14").expect("parse"), date);
    }

    #[test]
    fn decimals_parse_exactly() {
        assert_eq!(parse_decimal("115.00").expect("parse"), dec!(115.00));
        assert!(parse_decimal("not-a-number").is_err());
    }
}
