//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::bus::{HandlerError, ResultHandler};
use crate::domain::{ProbeResult, Target};

use async_trait::async_trait;

mod embedded {
    refinery::embed_migrations!("migrations");
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
///
/// Writes are idempotent so the same envelope may be stored any number
/// of times.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open the database at `path` and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let report = embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        for migration in report.applied_migrations() {
            tracing::info!("Applied migration {}", migration);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Record a target (if unseen) and one of its results in a single
    /// transaction. Rows that already exist are left untouched.
    pub fn store(&self, target: &Target, result: &ProbeResult) -> Result<(), DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let added = tx.execute(
            "INSERT INTO targets (id, url, method, match_regexp) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT DO NOTHING",
            params![
                target.id(),
                target.raw_url(),
                target.method().as_str(),
                target.match_regexp(),
            ],
        )?;
        if added == 1 {
            tracing::info!(target_id = target.id(), "Added target {}", target.raw_url());
        }

        let added = tx.execute(
            "INSERT INTO results (target_id, elapsed_seconds, status, matched, unreachable, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT DO NOTHING",
            params![
                target.id(),
                result.elapsed.as_secs_f64(),
                result.status,
                result.matched,
                result.unreachable,
                result.at.format(TIME_FORMAT).to_string(),
            ],
        )?;
        if added == 1 {
            tracing::info!(target_id = target.id(), "Added result from {}", target.raw_url());
        } else {
            tracing::debug!(target_id = target.id(), "Result already recorded");
        }

        tx.commit()?;
        Ok(())
    }

    /// Get a target by id.
    pub fn target(&self, id: &str) -> Result<Option<StoredTarget>, DbError> {
        let conn = self.lock()?;
        let target = conn
            .query_row(
                "SELECT id, url, method, match_regexp FROM targets WHERE id = ?1",
                params![id],
                |row| {
                    Ok(StoredTarget {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        method: row.get(2)?,
                        match_regexp: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(target)
    }

    /// Get all results of a target, oldest first.
    pub fn results_for(&self, target_id: &str) -> Result<Vec<StoredResult>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, elapsed_seconds, status, matched, unreachable, at
             FROM results WHERE target_id = ?1 ORDER BY at ASC",
        )?;

        let results = stmt
            .query_map(params![target_id], |row| {
                let time_str: String = row.get(5)?;
                let at = parse_db_time(&time_str).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        format!("bad timestamp {:?}", time_str).into(),
                    )
                })?;
                Ok(StoredResult {
                    target_id: row.get(0)?,
                    elapsed_seconds: row.get(1)?,
                    status: row.get(2)?,
                    matched: row.get(3)?,
                    unreachable: row.get(4)?,
                    at,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }

    pub fn count_targets(&self) -> Result<i64, DbError> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM targets", [], |r| r.get(0))?)
    }

    pub fn count_results(&self) -> Result<i64, DbError> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM results", [], |r| r.get(0))?)
    }
}

#[async_trait]
impl ResultHandler for Store {
    async fn handle(&self, target: &Target, result: &ProbeResult) -> Result<(), HandlerError> {
        let store = self.clone();
        let (target, result) = (target.clone(), result.clone());
        tokio::task::spawn_blocking(move || store.store(&target, &result)).await??;
        Ok(())
    }
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .ok()
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}
