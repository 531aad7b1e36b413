//! SQLite record store for users and file ownership.
//!
//! Two tables: `users` keyed by a unique username, and `files` keyed by the
//! `(username, filename)` pair. The connection sits behind an async mutex and
//! every operation takes the lock for its own statement only, so no lock ever
//! spans the network I/O of a command.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use crate::Result;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        username TEXT UNIQUE NOT NULL,
        password TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY,
        username TEXT NOT NULL,
        filename TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (username) REFERENCES users(username)
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_files_owner_filename
        ON files(username, filename);
";

/// Outcome of a user insertion. The UNIQUE constraint is the final arbiter
/// for racing registrations; the advisory pre-check in the session is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateUser {
    Created,
    Exists,
}

/// Aggregate row counts, used by maintenance and tests.
pub struct StoreStats {
    pub user_count: u64,
    pub file_count: u64,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a new user row. A username collision reports `Exists` rather
    /// than an error so the caller can answer `USERNAME_TAKEN`.
    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<CreateUser> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT INTO users (username, password) VALUES (?, ?)",
            params![username, password_hash],
        );
        match inserted {
            Ok(_) => Ok(CreateUser::Created),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(CreateUser::Exists)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the stored password hash for a username.
    pub async fn password_hash(&self, username: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let hash = conn
            .query_row(
                "SELECT password FROM users WHERE username = ?",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record a successful upload. Ownership is immutable once created.
    pub async fn create_file_record(&self, owner: &str, filename: &str, size: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO files (username, filename, size) VALUES (?, ?, ?)",
            params![owner, filename, size as i64],
        )?;
        Ok(())
    }

    pub async fn file_record_exists(&self, owner: &str, filename: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE username = ? AND filename = ?",
            params![owner, filename],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Ownership check used by RETRIEVE: true only when the record exists and
    /// belongs to `owner`.
    pub async fn owns_file(&self, owner: &str, filename: &str) -> Result<bool> {
        self.file_record_exists(owner, filename).await
    }

    /// Delete every file record. Maintenance and test use only.
    pub async fn clear_file_records(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM files", [])?;
        Ok(())
    }

    /// Delete a user row. Administrative and test use only; the server core
    /// never deletes users.
    pub async fn delete_user(&self, username: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM users WHERE username = ?", params![username])?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().await;
        let user_count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let file_count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(StoreStats {
            user_count: user_count as u64,
            file_count: file_count as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_user_and_lookup() {
        let db = Database::open_in_memory().unwrap();

        let outcome = db.create_user("alice", "hash-a").await.unwrap();
        assert_eq!(outcome, CreateUser::Created);
        assert!(db.username_exists("alice").await.unwrap());
        assert_eq!(
            db.password_hash("alice").await.unwrap().as_deref(),
            Some("hash-a")
        );
        assert!(db.password_hash("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_reports_exists() {
        let db = Database::open_in_memory().unwrap();

        db.create_user("alice", "hash-a").await.unwrap();
        let second = db.create_user("alice", "hash-b").await.unwrap();
        assert_eq!(second, CreateUser::Exists);

        // The first hash survives and exactly one row exists.
        assert_eq!(
            db.password_hash("alice").await.unwrap().as_deref(),
            Some("hash-a")
        );
        assert_eq!(db.stats().await.unwrap().user_count, 1);
    }

    #[tokio::test]
    async fn test_file_records_unique_per_owner() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", "h").await.unwrap();

        db.create_file_record("alice", "notes.txt", 5).await.unwrap();
        assert!(db.file_record_exists("alice", "notes.txt").await.unwrap());
        assert!(!db.file_record_exists("bob", "notes.txt").await.unwrap());

        // Same (owner, filename) pair is rejected by the unique index.
        assert!(db.create_file_record("alice", "notes.txt", 9).await.is_err());
        assert_eq!(db.stats().await.unwrap().file_count, 1);

        // A different owner may use the same filename.
        db.create_user("bob", "h").await.unwrap();
        db.create_file_record("bob", "notes.txt", 5).await.unwrap();
        assert!(db.owns_file("bob", "notes.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_file_records() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", "h").await.unwrap();
        db.create_file_record("alice", "a.txt", 1).await.unwrap();
        db.create_file_record("alice", "b.txt", 2).await.unwrap();

        db.clear_file_records().await.unwrap();
        assert_eq!(db.stats().await.unwrap().file_count, 0);
        assert!(db.username_exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_user() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("gone", "h").await.unwrap();
        db.delete_user("gone").await.unwrap();
        assert!(!db.username_exists("gone").await.unwrap());
    }
}
