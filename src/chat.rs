use axum::http::StatusCode;
use tracing::{debug, info, warn};

use crate::{
    context::ContextAssembler,
    session::SessionMap,
    error::ApiError,
    models::{MessageSender, SendMessageResponse},
    selection::SelectionStore,
    AppState,
};

// One send per session at a time. The flow runs on its own task so the
// in-flight flag is cleared even if the caller goes away.
pub async fn send_message(
    state: &AppState,
    session_id: &str,
    thread_id: &str,
    text: &str,
) -> Result<SendMessageResponse, ApiError> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::invalid_argument("Message must not be empty."));
    }

    let (snapshot, database_name) = {
        let mut sessions = state.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ApiError::session_not_found(session_id))?;
        if session.sending {
            return Err(ApiError::send_in_progress());
        }
        session.sending = true;
        (session.selection.clone(), session.database_name.clone())
    };

    let task_state = state.clone();
    let task_session_id = session_id.to_string();
    let thread_id = thread_id.to_string();
    let handle = tokio::spawn(async move {
        let result = deliver(
            &task_state,
            &thread_id,
            &text,
            &snapshot,
            database_name.as_deref(),
        )
        .await;

        release_session(&task_state.sessions, &task_session_id).await;
        result
    });

    match handle.await {
        Ok(result) => result,
        Err(err) => {
            release_session(&state.sessions, session_id).await;
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SEND_TASK_FAILED",
                format!("Message send task failed: {err}"),
            ))
        }
    }
}

async fn release_session(sessions: &SessionMap, session_id: &str) {
    if let Some(session) = sessions.write().await.get_mut(session_id) {
        session.sending = false;
    }
}

async fn deliver(
    state: &AppState,
    thread_id: &str,
    text: &str,
    snapshot: &SelectionStore,
    database_name: Option<&str>,
) -> Result<SendMessageResponse, ApiError> {
    let user_message = state
        .threads
        .append_message(thread_id, text, MessageSender::User)
        .await?;

    let context = ContextAssembler::new(state.pages.as_ref(), state.config.query_page_size)
        .assemble(snapshot, database_name)
        .await?;

    if state.config.log_payloads {
        debug!(
            thread_id,
            context = %serde_json::to_string(&context).unwrap_or_default(),
            "Assembled chat context"
        );
    }

    let (content, fallback) = match state
        .chat_backend
        .send_chat_message(text, thread_id, context.as_ref())
        .await
    {
        Ok(content) => (content, None),
        Err(err) => {
            warn!(thread_id, code = err.code(), "AI backend failed, using fallback reply: {err}");
            (err.fallback_message().to_string(), Some(err.code()))
        }
    };

    let bot_message = state
        .threads
        .append_message(thread_id, &content, MessageSender::Bot)
        .await?;

    info!(
        thread_id,
        has_context = context.is_some(),
        fallback = fallback.unwrap_or("none"),
        "Chat message answered"
    );

    Ok(SendMessageResponse {
        user_message,
        bot_message,
        context,
        fallback,
    })
}
