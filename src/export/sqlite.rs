//! Embedded SQLite exporter.
//!
//! Appends one row per reading to a local `sensors` table, creating the
//! schema on first use. The whole batch is written in a single transaction:
//! either every row lands or the commit fails as a unit.

use crate::config::SqliteConfig;
use crate::export::{ExportError, Exporter};
use crate::reading::Batch;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

pub const NAME: &str = "SQLite";

/// Exporter writing readings to a local SQLite database file.
#[derive(Debug)]
pub struct SqliteExporter {
    conn: Option<Connection>,
}

impl SqliteExporter {
    /// Open (or create) the database file named in the configuration and
    /// make sure the `sensors` table exists.
    pub fn open(config: &SqliteConfig) -> Result<Self, ExportError> {
        let file = config
            .file
            .as_ref()
            .ok_or_else(|| ExportError::Config("sqlite.file must be set".into()))?;
        let conn = Connection::open(file)?;
        Self::with_connection(conn)
    }

    /// Build an exporter on an in-memory database. Test use only.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, ExportError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, ExportError> {
        create_table_if_needed(&conn)?;
        Ok(Self { conn: Some(conn) })
    }

    fn connection(&mut self) -> Result<&mut Connection, ExportError> {
        self.conn
            .as_mut()
            .ok_or_else(|| ExportError::Backend("database connection already closed".into()))
    }
}

/// Create the `sensors` table unless it already exists.
///
/// Uses an explicit existence query against `sqlite_master` so the create
/// statement itself stays unconditional.
fn create_table_if_needed(conn: &Connection) -> Result<(), ExportError> {
    // Only a definite "no such row" may trigger the create; a transient
    // query failure (e.g. locked database) must propagate as-is.
    let existing: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'sensors'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(());
    }

    debug!("creating local database table");
    conn.execute(
        "CREATE TABLE sensors (
            id              INTEGER     PRIMARY KEY AUTOINCREMENT NOT NULL,
            timestamp       DATETIME    DEFAULT CURRENT_TIMESTAMP,
            device_id       TEXT        NOT NULL,
            display_name    TEXT,
            temperature     REAL,
            humidity        REAL,
            pressure        REAL
        )",
        [],
    )?;
    Ok(())
}

impl Exporter for SqliteExporter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn export(&mut self, batch: &Batch) -> Result<(), ExportError> {
        let timestamp = batch.timestamp().to_rfc3339();
        let conn = self.connection()?;
        let tx = conn.transaction()?;
        for (mac, reading) in batch.iter() {
            tx.execute(
                "INSERT INTO sensors
                    (timestamp, device_id, display_name, temperature, humidity, pressure)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    timestamp,
                    mac.to_string(),
                    reading.display_name,
                    reading.temperature,
                    reading.humidity,
                    reading.pressure,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ExportError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, err)| ExportError::Sqlite(err))?;
        }
        Ok(())
    }
}
