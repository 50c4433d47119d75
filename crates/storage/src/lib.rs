#![forbid(unsafe_code)]

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde_json::json;
use std::path::{Path, PathBuf};
use tl_core::model::Task;

pub const EVENT_TASK_ADDED: &str = "task_added";
pub const EVENT_TASK_CHECKED: &str = "task_checked";
pub const EVENT_TASK_REMOVED: &str = "task_removed";

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    UsernameTaken,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UsernameTaken => write!(f, "username already taken"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

#[derive(Clone, Debug)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub salt: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct EventRow {
    pub seq: i64,
    pub ts_ms: i64,
    pub task_id: String,
    pub owner: String,
    pub event_type: String,
    pub payload_json: String,
}

pub struct SqliteStore {
    storage_dir: PathBuf,
    conn: Connection,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;
        let db_path = storage_dir.join("tasklist.db");
        let conn = Connection::open(db_path)?;
        let store = Self { storage_dir, conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;

            CREATE TABLE IF NOT EXISTS meta (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS counters (
              name TEXT PRIMARY KEY,
              value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
              id TEXT PRIMARY KEY,
              username TEXT NOT NULL UNIQUE,
              password_hash TEXT NOT NULL,
              salt TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
              token_hash TEXT PRIMARY KEY,
              user_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
              id TEXT PRIMARY KEY,
              text TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              checked INTEGER NOT NULL,
              owner TEXT NOT NULL,
              username TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              ts_ms INTEGER NOT NULL,
              task_id TEXT NOT NULL,
              owner TEXT NOT NULL,
              type TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_owner_created ON tasks(owner, created_at_ms);
            CREATE INDEX IF NOT EXISTS idx_events_owner_seq ON events(owner, seq);
            "#,
        )?;
        self.conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
            params!["schema_version", "v0"],
        )?;
        Ok(())
    }

    pub fn task_insert(
        &mut self,
        owner: &str,
        username: &str,
        text: &str,
    ) -> Result<(Task, EventRow), StoreError> {
        if owner.trim().is_empty() {
            return Err(StoreError::InvalidInput("owner is required"));
        }
        if username.trim().is_empty() {
            return Err(StoreError::InvalidInput("username is required"));
        }
        if text.trim().is_empty() {
            return Err(StoreError::InvalidInput("text is required"));
        }

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let seq = next_counter_tx(&tx, "task_seq")?;
        let id = format!("TASK-{seq:06}");

        tx.execute(
            r#"
            INSERT INTO tasks(id, text, created_at_ms, checked, owner, username)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![id, text, now_ms, false, owner, username],
        )?;

        let task = Task {
            id: id.clone(),
            text: text.to_string(),
            created_at_ms: now_ms,
            checked: false,
            owner: owner.to_string(),
            username: username.to_string(),
        };

        let payload = json!({
            "id": task.id,
            "text": task.text,
            "created_at_ms": task.created_at_ms,
            "checked": task.checked,
            "owner": task.owner,
            "username": task.username,
        })
        .to_string();
        let event = insert_event_tx(&tx, now_ms, &id, owner, EVENT_TASK_ADDED, &payload)?;

        tx.commit()?;
        Ok((task, event))
    }

    pub fn task_remove(&mut self, id: &str) -> Result<(usize, Option<EventRow>), StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let owner = tx
            .query_row("SELECT owner FROM tasks WHERE id = ?1", params![id], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;

        let Some(owner) = owner else {
            return Ok((0, None));
        };

        let removed = tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        let event = insert_event_tx(&tx, now_ms, id, &owner, EVENT_TASK_REMOVED, "{}")?;

        tx.commit()?;
        Ok((removed, Some(event)))
    }

    pub fn task_set_checked(
        &mut self,
        id: &str,
        checked: bool,
    ) -> Result<(usize, Option<EventRow>), StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let row = tx
            .query_row(
                "SELECT owner, checked FROM tasks WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;

        let Some((owner, current)) = row else {
            return Ok((0, None));
        };

        // A same-value update still counts as matched, but only an actual
        // change appends an event.
        if current == checked {
            return Ok((1, None));
        }

        tx.execute(
            "UPDATE tasks SET checked = ?2 WHERE id = ?1",
            params![id, checked],
        )?;
        let payload = json!({ "checked": checked }).to_string();
        let event = insert_event_tx(&tx, now_ms, id, &owner, EVENT_TASK_CHECKED, &payload)?;

        tx.commit()?;
        Ok((1, Some(event)))
    }

    pub fn task_get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, text, created_at_ms, checked, owner, username
                FROM tasks
                WHERE id = ?1
                "#,
                params![id],
                task_from_row,
            )
            .optional()?)
    }

    pub fn tasks_for_owner(&self, owner: &str) -> Result<Vec<Task>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, text, created_at_ms, checked, owner, username
            FROM tasks
            WHERE owner = ?1
            ORDER BY created_at_ms DESC, id DESC
            "#,
        )?;
        let rows = stmt.query_map(params![owner], task_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // Snapshot and cursor come from one transaction so a subscriber never
    // loses the events committed while the snapshot is being read.
    pub fn snapshot_for_owner(&mut self, owner: &str) -> Result<(Vec<Task>, i64), StoreError> {
        let tx = self.conn.transaction()?;
        let last_seq = last_event_seq_tx(&tx)?;
        let tasks = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, text, created_at_ms, checked, owner, username
                FROM tasks
                WHERE owner = ?1
                ORDER BY created_at_ms DESC, id DESC
                "#,
            )?;
            let rows = stmt.query_map(params![owner], task_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.commit()?;
        Ok((tasks, last_seq))
    }

    pub fn last_event_seq(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COALESCE(MAX(seq), 0) FROM events", [], |row| {
                row.get::<_, i64>(0)
            })?)
    }

    pub fn events_for_owner(
        &self,
        owner: &str,
        since_seq: i64,
        limit: usize,
    ) -> Result<Vec<EventRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT seq, ts_ms, task_id, owner, type, payload_json
            FROM events
            WHERE owner = ?1 AND seq > ?2
            ORDER BY seq ASC
            LIMIT ?3
            "#,
        )?;
        let rows = stmt.query_map(params![owner, since_seq, limit as i64], |row| {
            Ok(EventRow {
                seq: row.get(0)?,
                ts_ms: row.get(1)?,
                task_id: row.get(2)?,
                owner: row.get(3)?,
                event_type: row.get(4)?,
                payload_json: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn user_create(
        &mut self,
        username: &str,
        password_hash: &str,
        salt: &str,
    ) -> Result<UserRow, StoreError> {
        if username.trim().is_empty() {
            return Err(StoreError::InvalidInput("username is required"));
        }
        if password_hash.trim().is_empty() {
            return Err(StoreError::InvalidInput("password_hash is required"));
        }

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;

        let taken = tx
            .query_row(
                "SELECT 1 FROM users WHERE username = ?1",
                params![username],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if taken {
            return Err(StoreError::UsernameTaken);
        }

        let seq = next_counter_tx(&tx, "user_seq")?;
        let id = format!("user-{seq:06}");
        tx.execute(
            r#"
            INSERT INTO users(id, username, password_hash, salt, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![id, username, password_hash, salt, now_ms],
        )?;

        tx.commit()?;
        Ok(UserRow {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            salt: salt.to_string(),
            created_at_ms: now_ms,
        })
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, username, password_hash, salt, created_at_ms
                FROM users
                WHERE username = ?1
                "#,
                params![username],
                user_from_row,
            )
            .optional()?)
    }

    pub fn session_create(&mut self, token_hash: &str, user_id: &str) -> Result<(), StoreError> {
        if token_hash.trim().is_empty() {
            return Err(StoreError::InvalidInput("token_hash is required"));
        }
        if user_id.trim().is_empty() {
            return Err(StoreError::InvalidInput("user_id is required"));
        }
        let now_ms = now_ms();
        self.conn.execute(
            "INSERT OR REPLACE INTO sessions(token_hash, user_id, created_at_ms) VALUES (?1, ?2, ?3)",
            params![token_hash, user_id, now_ms],
        )?;
        Ok(())
    }

    pub fn session_user(&self, token_hash: &str) -> Result<Option<UserRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT u.id, u.username, u.password_hash, u.salt, u.created_at_ms
                FROM sessions s
                JOIN users u ON u.id = s.user_id
                WHERE s.token_hash = ?1
                "#,
                params![token_hash],
                user_from_row,
            )
            .optional()?)
    }

    pub fn session_delete(&mut self, token_hash: &str) -> Result<bool, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            params![token_hash],
        )?;
        Ok(deleted > 0)
    }
}

fn now_ms() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis() as i64
}

fn next_counter_tx(tx: &Transaction<'_>, name: &str) -> Result<i64, StoreError> {
    let current: i64 = tx
        .query_row(
            "SELECT value FROM counters WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    let next = current + 1;
    tx.execute(
        r#"
        INSERT INTO counters(name, value) VALUES (?1, ?2)
        ON CONFLICT(name) DO UPDATE SET value=excluded.value
        "#,
        params![name, next],
    )?;
    Ok(next)
}

fn insert_event_tx(
    tx: &Transaction<'_>,
    ts_ms: i64,
    task_id: &str,
    owner: &str,
    event_type: &str,
    payload_json: &str,
) -> Result<EventRow, StoreError> {
    tx.execute(
        r#"
        INSERT INTO events(ts_ms, task_id, owner, type, payload_json)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![ts_ms, task_id, owner, event_type, payload_json],
    )?;
    let seq = tx.last_insert_rowid();
    Ok(EventRow {
        seq,
        ts_ms,
        task_id: task_id.to_string(),
        owner: owner.to_string(),
        event_type: event_type.to_string(),
        payload_json: payload_json.to_string(),
    })
}

fn last_event_seq_tx(tx: &Transaction<'_>) -> Result<i64, StoreError> {
    Ok(tx.query_row("SELECT COALESCE(MAX(seq), 0) FROM events", [], |row| {
        row.get::<_, i64>(0)
    })?)
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        text: row.get(1)?,
        created_at_ms: row.get(2)?,
        checked: row.get(3)?,
        owner: row.get(4)?,
        username: row.get(5)?,
    })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        salt: row.get(3)?,
        created_at_ms: row.get(4)?,
    })
}
