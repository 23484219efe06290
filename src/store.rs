//! SQLite persistence for users and summary history.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} already registered")]
    Duplicate(&'static str),

    #[error("database connection lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub hashed_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub link: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database, creating tables as needed
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening database {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

             CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                hashed_password TEXT NOT NULL,
                created_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                youtube_link TEXT NOT NULL,
                summary TEXT NOT NULL,
                created_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_history_user ON history(user_id);",
        )?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn create_user(&self, username: &str, email: &str, hashed_password: &str) -> Result<User, StoreError> {
        let conn = self.conn()?;

        let taken: Option<(String, String)> = conn
            .query_row(
                "SELECT username, email FROM users WHERE username = ?1 OR email = ?2 LIMIT 1",
                params![username, email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((existing_username, _)) = taken {
            return Err(StoreError::Duplicate(if existing_username == username {
                "Username"
            } else {
                "Email"
            }));
        }

        let result = conn.execute(
            "INSERT INTO users (username, email, hashed_password, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![username, email, hashed_password, timestamp(Utc::now())],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(StoreError::Duplicate("Username"));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(User {
            id: conn.last_insert_rowid(),
            username: username.to_string(),
            email: email.to_string(),
            hashed_password: hashed_password.to_string(),
        })
    }

    pub fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, username, email, hashed_password FROM users WHERE username = ?1",
                [username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        hashed_password: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn add_history(&self, user_id: i64, link: &str, summary: &str) -> Result<HistoryEntry, StoreError> {
        let conn = self.conn()?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO history (user_id, youtube_link, summary, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, link, summary, timestamp(created_at)],
        )?;

        Ok(HistoryEntry {
            link: link.to_string(),
            summary: summary.to_string(),
            created_at: parse_timestamp(&timestamp(created_at)).unwrap_or(created_at),
        })
    }

    /// History for one user, oldest first
    pub fn list_history(&self, user_id: i64) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT youtube_link, summary, created_at FROM history WHERE user_id = ?1 ORDER BY id ASC",
        )?;

        let entries = stmt
            .query_map([user_id], |row| {
                let created_at: String = row.get(2)?;
                Ok(HistoryEntry {
                    link: row.get(0)?,
                    summary: row.get(1)?,
                    created_at: parse_timestamp(&created_at).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
                    })?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}
