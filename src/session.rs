use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::{error::ApiError, models::SessionView, selection::SelectionStore};

pub type SessionMap = Arc<RwLock<HashMap<String, ChatSession>>>;

#[derive(Debug, Clone)]
pub struct ChatSession {
    pub selection: SelectionStore,
    pub database_name: Option<String>,
    pub sending: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            selection: SelectionStore::new(),
            database_name: None,
            sending: false,
            created_at: Utc::now(),
        }
    }

    pub fn select_database(&mut self, id: &str, name: Option<&str>) {
        self.selection.set_database(id);
        self.database_name = name
            .map(str::trim)
            .filter(|n| !n.is_empty() && !self.selection.selected_database_id().is_empty())
            .map(str::to_string);
    }

    pub fn clear(&mut self) {
        self.selection.clear();
        self.database_name = None;
    }

    pub fn view(&self, session_id: &str) -> SessionView {
        SessionView::new(
            session_id,
            &self.selection,
            self.database_name.as_deref(),
            self.sending,
        )
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn create_session(sessions: &SessionMap) -> (String, DateTime<Utc>) {
    let session_id = Uuid::new_v4().to_string();
    let session = ChatSession::new();
    let created_at = session.created_at;
    sessions.write().await.insert(session_id.clone(), session);
    info!(session_id = %session_id, "Session created");
    (session_id, created_at)
}

pub async fn remove_session(sessions: &SessionMap, session_id: &str) -> Result<(), ApiError> {
    sessions
        .write()
        .await
        .remove(session_id)
        .map(|_| info!(session_id, "Session removed"))
        .ok_or_else(|| ApiError::session_not_found(session_id))
}

pub async fn update_session<F>(
    sessions: &SessionMap,
    session_id: &str,
    f: F,
) -> Result<SessionView, ApiError>
where
    F: FnOnce(&mut ChatSession),
{
    let mut guard = sessions.write().await;
    let session = guard
        .get_mut(session_id)
        .ok_or_else(|| ApiError::session_not_found(session_id))?;
    f(session);
    Ok(session.view(session_id))
}

pub async fn read_session<T, F>(sessions: &SessionMap, session_id: &str, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&ChatSession) -> T,
{
    let guard = sessions.read().await;
    let session = guard
        .get(session_id)
        .ok_or_else(|| ApiError::session_not_found(session_id))?;
    Ok(f(session))
}
