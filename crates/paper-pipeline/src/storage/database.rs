//! SQLite database for document records
//!
//! Single source of truth for document status. Every status change is a
//! read-validate-write under the connection lock, so a transition is checked
//! against the row as it is stored, not as some caller last saw it.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::processing::lifecycle::{self, Transition};
use crate::types::{DocumentPage, DocumentRecord, DocumentStatus, StatusStats};

const COLUMNS: &str = "doc_key, source_url, display_name, size_bytes, extraction_job_id, status, \
     artifact_path, analysis_results, last_error, uploaded_at, extracted_at, analyzed_at, updated_at";

/// SQLite-based document record store
#[derive(Clone)]
pub struct DocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl DocumentStore {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing and ephemeral runs)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to open in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                doc_key TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                display_name TEXT NOT NULL,
                size_bytes INTEGER,
                extraction_job_id TEXT,
                status TEXT NOT NULL,
                artifact_path TEXT,
                analysis_results TEXT,
                last_error TEXT,
                uploaded_at TEXT NOT NULL,
                extracted_at TEXT,
                analyzed_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
            CREATE INDEX IF NOT EXISTS idx_documents_uploaded_at ON documents(uploaded_at);
        "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to run migrations: {}", e)))?;

        tracing::debug!("Document store migrations complete");
        Ok(())
    }

    /// Insert a freshly uploaded record; keys are never reused
    pub fn insert(&self, record: &DocumentRecord) -> Result<()> {
        record.check_invariants()?;
        let conn = self.conn.lock();

        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM documents WHERE doc_key = ?1",
                params![record.doc_key],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if exists {
            return Err(Error::validation(format!(
                "Document key already exists: {}",
                record.doc_key
            )));
        }

        write_record(&conn, record, true)
    }

    /// Get a record by key
    pub fn get(&self, doc_key: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.conn.lock();
        read_record(&conn, doc_key)
    }

    /// Get a record by key, failing with `NotFound`
    pub fn require(&self, doc_key: &str) -> Result<DocumentRecord> {
        self.get(doc_key)?
            .ok_or_else(|| Error::NotFound(doc_key.to_string()))
    }

    /// Validate and apply a transition against the stored row
    pub fn transition(&self, doc_key: &str, transition: Transition) -> Result<DocumentRecord> {
        let conn = self.conn.lock();
        let current =
            read_record(&conn, doc_key)?.ok_or_else(|| Error::NotFound(doc_key.to_string()))?;

        let name = transition.name();
        let next = lifecycle::apply(&current, transition)?;
        write_record(&conn, &next, false)?;

        tracing::debug!(
            "[{}] {} -> {} ({})",
            doc_key,
            current.status,
            next.status,
            name
        );
        Ok(next)
    }

    /// Re-persist an in-flight record on a pending poll tick
    pub fn record_poll(&self, doc_key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "UPDATE documents SET updated_at = ?2 WHERE doc_key = ?1 AND status = 'parsing'",
            params![doc_key, format_time(Utc::now())],
        )?;
        Ok(count > 0)
    }

    /// Paginated listing, newest upload first; an empty filter means every status
    pub fn list(
        &self,
        statuses: &[DocumentStatus],
        offset: usize,
        limit: usize,
    ) -> Result<DocumentPage> {
        let conn = self.conn.lock();

        let filter = if statuses.is_empty() {
            String::new()
        } else {
            let placeholders = (1..=statuses.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            format!(" WHERE status IN ({})", placeholders)
        };
        let status_params: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM documents{}", filter),
            params_from_iter(status_params.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM documents{} ORDER BY uploaded_at DESC, doc_key ASC LIMIT {} OFFSET {}",
            COLUMNS, filter, limit as i64, offset as i64
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(status_params.iter()), row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(DocumentPage {
            items,
            total: total as usize,
            offset,
            limit,
        })
    }

    /// Every record in one status, oldest upload first
    pub fn list_by_status(&self, status: DocumentStatus) -> Result<Vec<DocumentRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE status = ?1 ORDER BY uploaded_at ASC, doc_key ASC",
            COLUMNS
        ))?;
        let records = stmt
            .query_map(params![status.as_str()], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    /// Count of records per status
    pub fn stats(&self) -> Result<StatusStats> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM documents GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = StatusStats::default();
        for (status, count) in rows {
            match status.parse::<DocumentStatus>() {
                Ok(status) => stats.add(status, count as usize),
                Err(_) => tracing::warn!("Skipping unknown status in stats: {}", status),
            }
        }
        Ok(stats)
    }

    /// Delete a record
    pub fn delete(&self, doc_key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn.execute("DELETE FROM documents WHERE doc_key = ?1", params![doc_key])?;
        Ok(count > 0)
    }
}

fn write_record(conn: &Connection, record: &DocumentRecord, insert: bool) -> Result<()> {
    let results_json = record
        .analysis_results
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let sql = if insert {
        r#"
        INSERT INTO documents (
            doc_key, source_url, display_name, size_bytes, extraction_job_id, status,
            artifact_path, analysis_results, last_error, uploaded_at, extracted_at,
            analyzed_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#
    } else {
        r#"
        UPDATE documents SET
            source_url = ?2,
            display_name = ?3,
            size_bytes = ?4,
            extraction_job_id = ?5,
            status = ?6,
            artifact_path = ?7,
            analysis_results = ?8,
            last_error = ?9,
            uploaded_at = ?10,
            extracted_at = ?11,
            analyzed_at = ?12,
            updated_at = ?13
        WHERE doc_key = ?1
        "#
    };

    conn.execute(
        sql,
        params![
            record.doc_key,
            record.source_url,
            record.display_name,
            record.size_bytes.map(|s| s as i64),
            record.extraction_job_id,
            record.status.as_str(),
            record.artifact_path,
            results_json,
            record.last_error,
            format_time(record.uploaded_at),
            record.extracted_at.map(format_time),
            record.analyzed_at.map(format_time),
            format_time(record.updated_at),
        ],
    )?;

    Ok(())
}

fn read_record(conn: &Connection, doc_key: &str) -> Result<Option<DocumentRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM documents WHERE doc_key = ?1", COLUMNS),
            params![doc_key],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

// fixed-width so that ORDER BY on the text column is chronological
fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<DocumentRecord> {
    let status_str: String = row.get(5)?;
    let status = status_str.parse::<DocumentStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let results_json: Option<String> = row.get(7)?;
    let analysis_results = results_json
        .map(|json| serde_json::from_str::<BTreeMap<String, String>>(&json))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let size_bytes: Option<i64> = row.get(3)?;
    let uploaded_at: String = row.get(9)?;
    let extracted_at: Option<String> = row.get(10)?;
    let analyzed_at: Option<String> = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(DocumentRecord {
        doc_key: row.get(0)?,
        source_url: row.get(1)?,
        display_name: row.get(2)?,
        size_bytes: size_bytes.map(|s| s as u64),
        extraction_job_id: row.get(4)?,
        status,
        artifact_path: row.get(6)?,
        analysis_results,
        last_error: row.get(8)?,
        uploaded_at: parse_time(9, &uploaded_at)?,
        extracted_at: extracted_at.as_deref().map(|t| parse_time(10, t)).transpose()?,
        analyzed_at: analyzed_at.as_deref().map(|t| parse_time(11, t)).transpose()?,
        updated_at: parse_time(12, &updated_at)?,
    })
}
