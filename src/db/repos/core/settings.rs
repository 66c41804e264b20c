use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::db::DbPool;
use crate::error::AppError;

const SELECT_VALUE: &str = "SELECT value FROM app_settings WHERE key = ?1";
const UPSERT_VALUE: &str = "INSERT INTO app_settings (key, value, updated_at)
     VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3";

/// Value stored under `key`, if any.
pub fn get(pool: &DbPool, key: &str) -> Result<Option<String>, AppError> {
    let conn = pool.get()?;
    read(&conn, key)
}

/// Insert or overwrite `key`.
pub fn set(pool: &DbPool, key: &str, value: &str) -> Result<(), AppError> {
    let conn = pool.get()?;
    write(&conn, key, value)
}

/// Atomically replace the value under `key` with `f(current)`.
///
/// Runs inside a `BEGIN IMMEDIATE` transaction, so the database write lock is
/// held from the read to the commit and concurrent updaters on any connection
/// or process queue behind it (bounded by the pool's `busy_timeout`).
/// `f` returning `Ok(None)` leaves the row untouched; an `Err` rolls back.
pub fn update(
    pool: &DbPool,
    key: &str,
    f: &mut dyn FnMut(Option<String>) -> Result<Option<String>, AppError>,
) -> Result<(), AppError> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current = read(&tx, key)?;
    if let Some(next) = f(current)? {
        write(&tx, key, &next)?;
    }
    tx.commit()?;
    Ok(())
}

fn read(conn: &Connection, key: &str) -> Result<Option<String>, AppError> {
    Ok(conn
        .query_row(SELECT_VALUE, params![key], |row| row.get::<_, String>(0))
        .optional()?)
}

fn write(conn: &Connection, key: &str, value: &str) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(UPSERT_VALUE, params![key, value, now])?;
    Ok(())
}
