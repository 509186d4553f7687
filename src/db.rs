use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A registered user's row in the credential store
///
/// Mirrors the `user_creds` table. The password is stored only as an
/// Argon2 hash; the plaintext never reaches the database.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Row id
    pub id: i64,

    /// First name as entered at signup
    pub first_name: String,

    /// Last name as entered at signup
    pub last_name: String,

    /// Username (unique across the table)
    pub username: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    /// Random identifier assigned at signup
    pub user_uid: String,
}

/// Data for a row about to be inserted at signup
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub password_hash: String,
    pub user_uid: String,
}

/// Handle to the embedded credential store
///
/// The connection is shared behind a mutex; every query binds its inputs
/// as parameters, user-supplied text is never spliced into SQL.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and ensure the schema exists
    ///
    /// # Arguments
    /// * `path` - Location of the SQLite file on disk
    ///
    /// # Errors
    /// * Returns an error if the file cannot be opened or the schema
    ///   cannot be created
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a throwaway in-memory database (used by tests)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_creds (
                id            INTEGER PRIMARY KEY,
                first_name    TEXT NOT NULL,
                last_name     TEXT NOT NULL,
                username      TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                user_uid      TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Insert a freshly signed-up user
    ///
    /// # Arguments
    /// * `user` - Field values for the new row
    ///
    /// # Errors
    /// * Returns an error if the insert fails, including when the
    ///   username collides with an existing row (UNIQUE constraint)
    pub fn insert_user(&self, user: &NewUser) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_creds (first_name, last_name, username, password_hash, user_uid)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.first_name,
                user.last_name,
                user.username,
                user.password_hash,
                user.user_uid
            ],
        )?;
        Ok(())
    }

    /// Look up a user by username
    ///
    /// The username is bound as a query parameter, so hostile input (for
    /// example `' OR '1'='1`) is matched literally and finds nothing.
    ///
    /// # Arguments
    /// * `username` - Exact username to match
    ///
    /// # Returns
    /// * `Result<Option<UserRecord>>` - The matching row, if any
    pub fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, first_name, last_name, username, password_hash, user_uid
             FROM user_creds WHERE username = ?1",
        )?;

        let record = stmt
            .query_row(params![username], |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                    username: row.get(3)?,
                    password_hash: row.get(4)?,
                    user_uid: row.get(5)?,
                })
            })
            .optional()?;

        Ok(record)
    }

    /// Count registered users (startup log line)
    pub fn user_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM user_creds", [], |row| row.get(0))?;
        Ok(count)
    }
}
