//! Database module
//!
//! Persistence for chat turns and the project → database mapping the relay
//! reads when a question does not name its database.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Chat not found: {0}")]
    ChatNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Chat Operations ====================

    /// Bump the chat's last-activity marker to now
    pub fn update_last_activity(&self, chat_id: &str) -> DbResult<()> {
        let conn = self.lock();
        touch_chat(&conn, chat_id, &Utc::now())
    }

    // ==================== Message Operations ====================

    pub fn insert_message(&self, chat_id: &str, sender: Sender, content: &str) -> DbResult<i64> {
        let conn = self.lock();
        insert_message_internal(&conn, chat_id, sender, content, &Utc::now())
    }

    /// Store a question/answer pair in one transaction.
    ///
    /// The chat row is created for `user_id` on its first turn; later turns
    /// only move its last-activity marker.
    pub fn record_turn(
        &self,
        chat_id: &str,
        user_id: &str,
        question: &str,
        answer: &str,
    ) -> DbResult<()> {
        let mut conn = self.lock();
        let now = Utc::now();
        let tx = conn.transaction()?;
        upsert_chat(&tx, chat_id, user_id, &now)?;
        insert_message_internal(&tx, chat_id, Sender::You, question, &now)?;
        insert_message_internal(&tx, chat_id, Sender::Ai, answer, &now)?;
        tx.commit()?;
        Ok(())
    }

    // ==================== Project Operations ====================

    /// Associate a project with the database its questions run against
    pub fn link_project_database(&self, project_id: &str, database_id: &str) -> DbResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO project_databases (project_id, database_id) VALUES (?1, ?2)
             ON CONFLICT(project_id) DO UPDATE SET database_id = excluded.database_id",
            params![project_id, database_id],
        )?;
        Ok(())
    }

    pub fn database_id_for_project(&self, project_id: &str) -> DbResult<Option<String>> {
        let conn = self.lock();
        let id = conn
            .query_row(
                "SELECT database_id FROM project_databases WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

#[cfg(test)]
impl Database {
    pub fn create_chat(&self, id: &str, user_id: &str) -> DbResult<Chat> {
        let conn = self.lock();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO chats (id, user_id, created_at, last_activity) VALUES (?1, ?2, ?3, ?3)",
            params![id, user_id, now.to_rfc3339()],
        )?;
        Ok(Chat {
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
        })
    }

    pub fn get_chat(&self, id: &str) -> DbResult<Chat> {
        let conn = self.lock();
        conn.query_row(
            "SELECT user_id, created_at, last_activity FROM chats WHERE id = ?1",
            params![id],
            |row| {
                Ok(Chat {
                    user_id: row.get(0)?,
                    created_at: parse_datetime(&row.get::<_, String>(1)?),
                    last_activity: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::ChatNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    /// Messages for a chat in insertion order
    pub fn get_messages(&self, chat_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT sender_type, content FROM messages WHERE chat_id = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![chat_id], |row| {
            Ok(Message {
                sender: row.get(0)?,
                content: row.get(1)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn upsert_chat(conn: &Connection, chat_id: &str, user_id: &str, now: &DateTime<Utc>) -> DbResult<()> {
    conn.execute(
        "INSERT INTO chats (id, user_id, created_at, last_activity) VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(id) DO UPDATE SET last_activity = excluded.last_activity",
        params![chat_id, user_id, now.to_rfc3339()],
    )?;
    Ok(())
}

fn insert_message_internal(
    conn: &Connection,
    chat_id: &str,
    sender: Sender,
    content: &str,
    now: &DateTime<Utc>,
) -> DbResult<i64> {
    conn.execute(
        "INSERT INTO messages (chat_id, sender_type, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![chat_id, sender.as_str(), content, now.to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn touch_chat(conn: &Connection, chat_id: &str, now: &DateTime<Utc>) -> DbResult<()> {
    let updated = conn.execute(
        "UPDATE chats SET last_activity = ?1 WHERE id = ?2",
        params![now.to_rfc3339(), chat_id],
    )?;
    if updated == 0 {
        return Err(DbError::ChatNotFound(chat_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
