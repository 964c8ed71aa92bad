use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex as StdMutex},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{ChatMessage, ChatThread, MessageSender};

const MESSAGE_CHANNEL_CAPACITY: usize = 64;

const THREAD_COLUMNS: &str = "t.id, t.title, t.created_at, t.updated_at, t.last_message_at,
    (SELECT COUNT(*) FROM chat_messages m WHERE m.thread_id = t.id)";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub struct ThreadStore {
    conn: Arc<StdMutex<Connection>>,
    channels: Mutex<HashMap<String, broadcast::Sender<ChatMessage>>>,
}

impl ThreadStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed opening thread store {}", path.display()))?;
        let store = Self::with_connection(conn)
            .with_context(|| format!("Failed initializing thread store {}", path.display()))?;
        info!(path = %path.display(), "Thread store ready");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            CREATE TABLE IF NOT EXISTS chat_threads (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_message_at TEXT
            );
            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES chat_threads(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                sender TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS chat_messages_by_thread
                ON chat_messages(thread_id, created_at);
            ",
        )?;

        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
            channels: Mutex::new(HashMap::new()),
        })
    }

    pub async fn create_thread(&self, title: &str) -> Result<ChatThread, PersistenceError> {
        let now = Utc::now();
        let thread = ChatThread {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
            last_message_at: None,
            message_count: 0,
        };

        let row = thread.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_threads (id, title, created_at, updated_at, last_message_at)
                 VALUES (?1, ?2, ?3, ?4, NULL)",
                params![row.id, row.title, row.created_at, row.updated_at],
            )?;
            Ok(())
        })
        .await?;
        info!(thread_id = %thread.id, title = %thread.title, "Thread created");
        Ok(thread)
    }

    pub async fn get_thread(&self, id: &str) -> Result<ChatThread, PersistenceError> {
        let id = id.to_string();
        self.with_conn(move |conn| load_thread(conn, &id)).await
    }

    pub async fn list_threads(&self) -> Result<Vec<ChatThread>, PersistenceError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {THREAD_COLUMNS} FROM chat_threads t
                 ORDER BY t.updated_at DESC, t.rowid DESC"
            ))?;
            let rows = stmt.query_map([], thread_from_row)?;
            let threads = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(threads)
        })
        .await
    }

    pub async fn rename_thread(
        &self,
        id: &str,
        title: &str,
    ) -> Result<ChatThread, PersistenceError> {
        let id = id.to_string();
        let title = title.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE chat_threads SET title = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, title, Utc::now()],
            )?;
            if changed == 0 {
                return Err(PersistenceError::ThreadNotFound(id));
            }
            load_thread(conn, &id)
        })
        .await
    }

    pub async fn delete_thread(&self, id: &str) -> Result<(), PersistenceError> {
        let owned_id = id.to_string();
        let changed = self
            .with_conn(move |conn| {
                Ok(conn.execute("DELETE FROM chat_threads WHERE id = ?1", params![owned_id])?)
            })
            .await?;
        if changed == 0 {
            return Err(PersistenceError::ThreadNotFound(id.to_string()));
        }

        self.channels.lock().await.remove(id);
        info!(thread_id = %id, "Thread deleted");
        Ok(())
    }

    pub async fn append_message(
        &self,
        thread_id: &str,
        content: &str,
        sender: MessageSender,
    ) -> Result<ChatMessage, PersistenceError> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            content: content.to_string(),
            sender,
            created_at: Utc::now(),
        };

        let row = message.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let touched = tx.execute(
                "UPDATE chat_threads SET updated_at = ?2, last_message_at = ?2 WHERE id = ?1",
                params![row.thread_id, row.created_at],
            )?;
            if touched == 0 {
                return Err(PersistenceError::ThreadNotFound(row.thread_id));
            }
            tx.execute(
                "INSERT INTO chat_messages (id, thread_id, content, sender, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.id,
                    row.thread_id,
                    row.content,
                    row.sender.as_str(),
                    row.created_at
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        let mut channels = self.channels.lock().await;
        let delivered = channels
            .get(thread_id)
            .map(|tx| tx.send(message.clone()).unwrap_or(0));
        if let Some(receivers) = delivered {
            debug!(thread_id, receivers, "New message broadcast");
            if receivers == 0 {
                channels.remove(thread_id);
            }
        }
        Ok(message)
    }

    pub async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, PersistenceError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            load_thread(conn, &thread_id)?;

            let mut stmt = conn.prepare(
                "SELECT id, thread_id, content, sender, created_at FROM chat_messages
                 WHERE thread_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map(params![thread_id], message_from_row)?;
            let messages = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }

    pub async fn subscribe(
        &self,
        thread_id: &str,
    ) -> Result<broadcast::Receiver<ChatMessage>, PersistenceError> {
        self.get_thread(thread_id).await?;
        let mut channels = self.channels.lock().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
        let tx = channels
            .entry(thread_id.to_string())
            .or_insert_with(|| broadcast::channel(MESSAGE_CHANNEL_CAPACITY).0);
        Ok(tx.subscribe())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| PersistenceError::Unavailable("connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|err| PersistenceError::Unavailable(format!("storage task failed: {err}")))?
    }
}

fn load_thread(conn: &Connection, id: &str) -> Result<ChatThread, PersistenceError> {
    conn.query_row(
        &format!("SELECT {THREAD_COLUMNS} FROM chat_threads t WHERE t.id = ?1"),
        params![id],
        thread_from_row,
    )
    .optional()?
    .ok_or_else(|| PersistenceError::ThreadNotFound(id.to_string()))
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<ChatThread> {
    let count: i64 = row.get(5)?;
    Ok(ChatThread {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get::<_, DateTime<Utc>>(2)?,
        updated_at: row.get::<_, DateTime<Utc>>(3)?,
        last_message_at: row.get::<_, Option<DateTime<Utc>>>(4)?,
        message_count: count.max(0) as u64,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let sender: String = row.get(3)?;
    let sender = MessageSender::parse(&sender).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown sender {sender}").into(),
        )
    })?;

    Ok(ChatMessage {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        content: row.get(2)?,
        sender,
        created_at: row.get::<_, DateTime<Utc>>(4)?,
    })
}
