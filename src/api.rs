use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::debug;

use crate::{
    auth::verify_bearer,
    chat,
    error::ApiError,
    filter_compiler,
    models::{
        ChatThread, CompiledFilterResponse, CreateThreadRequest, RenameThreadRequest,
        SelectDatabaseRequest, SelectPageRequest, SendMessageRequest, SendMessageResponse,
        SessionCreatedResponse, SessionView, ToggleAttributeRequest,
    },
    selection::FilterValueChoice,
    session::{self, read_session, update_session},
    summary::{self, SelectionSummary},
    AppState,
};

type ApiResult<T> = Result<Json<T>, ApiError>;

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    verify_bearer(headers, &state.config.api_key)
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    let (session_id, created_at) = session::create_session(&state.sessions).await;
    Ok((
        StatusCode::CREATED,
        Json(SessionCreatedResponse {
            session_id,
            created_at,
        }),
    ))
}

pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> ApiResult<SessionView> {
    authorize(&state, &headers)?;
    read_session(&state.sessions, &session_id, |s| s.view(&session_id))
        .await
        .map(Json)
}

pub async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers)?;
    session::remove_session(&state.sessions, &session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn select_database(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<SelectDatabaseRequest>,
) -> ApiResult<SessionView> {
    authorize(&state, &headers)?;
    update_session(&state.sessions, &session_id, |s| {
        s.select_database(&payload.database_id, payload.database_name.as_deref())
    })
    .await
    .map(Json)
}

pub async fn select_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<SelectPageRequest>,
) -> ApiResult<SessionView> {
    authorize(&state, &headers)?;
    update_session(&state.sessions, &session_id, |s| {
        s.selection.set_page(payload.page_id.as_deref())
    })
    .await
    .map(Json)
}

pub async fn toggle_filtering_attribute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<ToggleAttributeRequest>,
) -> ApiResult<SessionView> {
    authorize(&state, &headers)?;
    let meta = payload.meta();
    update_session(&state.sessions, &session_id, |s| {
        s.selection
            .toggle_filtering_attribute(&payload.attribute_id, &meta)
    })
    .await
    .map(Json)
}

pub async fn toggle_data_attribute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<ToggleAttributeRequest>,
) -> ApiResult<SessionView> {
    authorize(&state, &headers)?;
    let meta = payload.meta();
    update_session(&state.sessions, &session_id, |s| {
        s.selection.toggle_data_attribute(&payload.attribute_id, &meta)
    })
    .await
    .map(Json)
}

pub async fn toggle_filter_value(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<FilterValueChoice>,
) -> ApiResult<SessionView> {
    authorize(&state, &headers)?;
    update_session(&state.sessions, &session_id, |s| {
        s.selection.toggle_filter_value(&payload)
    })
    .await
    .map(Json)
}

pub async fn remove_filter_value(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((session_id, attribute_id, value_id)): Path<(String, String, String)>,
) -> ApiResult<SessionView> {
    authorize(&state, &headers)?;
    update_session(&state.sessions, &session_id, |s| {
        if !s.selection.remove_filter_value(&attribute_id, &value_id) {
            debug!(%attribute_id, %value_id, "Filter value not present, nothing removed");
        }
    })
    .await
    .map(Json)
}

pub async fn clear_selection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> ApiResult<SessionView> {
    authorize(&state, &headers)?;
    update_session(&state.sessions, &session_id, |s| s.clear())
        .await
        .map(Json)
}

pub async fn get_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> ApiResult<SelectionSummary> {
    authorize(&state, &headers)?;
    read_session(&state.sessions, &session_id, |s| {
        SelectionSummary::project(&s.selection)
    })
    .await
    .map(Json)
}

pub async fn get_compiled_filter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> ApiResult<CompiledFilterResponse> {
    authorize(&state, &headers)?;
    let selection = read_session(&state.sessions, &session_id, |s| s.selection.clone()).await?;
    let compiled = filter_compiler::compile(selection.filters())?;

    Ok(Json(CompiledFilterResponse {
        database_id: selection.selected_database_id().to_string(),
        filter: compiled.condition,
        skipped: compiled
            .skipped
            .into_iter()
            .map(|s| format!("{}: {}", s.attribute_id, s.reason))
            .collect(),
    }))
}

pub async fn create_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<CreateThreadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    let derived_title =
        read_session(&state.sessions, &session_id, |s| summary::thread_title(&s.selection))
            .await?;
    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or(derived_title);

    let thread = state.threads.create_thread(&title).await?;
    Ok((StatusCode::CREATED, Json(thread)))
}

pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((session_id, thread_id)): Path<(String, String)>,
    Json(payload): Json<SendMessageRequest>,
) -> ApiResult<SendMessageResponse> {
    authorize(&state, &headers)?;
    chat::send_message(&state, &session_id, &thread_id, &payload.message)
        .await
        .map(Json)
}

pub async fn list_databases(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    authorize(&state, &headers)?;
    let databases = state.notion.list_databases().await?;
    Ok(Json(json!({ "databases": databases })))
}

pub async fn list_pages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(database_id): Path<String>,
) -> ApiResult<Value> {
    authorize(&state, &headers)?;
    let pages = state.notion.list_pages(&database_id).await?;
    Ok(Json(json!({ "pages": pages })))
}

pub async fn list_attributes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(database_id): Path<String>,
) -> ApiResult<Value> {
    authorize(&state, &headers)?;
    let attributes = state.notion.list_attributes(&database_id).await?;
    Ok(Json(json!({ "attributes": attributes })))
}

pub async fn list_attribute_options(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((database_id, attribute_name)): Path<(String, String)>,
) -> ApiResult<Value> {
    authorize(&state, &headers)?;
    let options = state
        .notion
        .list_attribute_options(&database_id, &attribute_name)
        .await?;
    Ok(Json(json!({ "options": options })))
}

pub async fn list_threads(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<ChatThread>> {
    authorize(&state, &headers)?;
    Ok(Json(state.threads.list_threads().await?))
}

pub async fn rename_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
    Json(payload): Json<RenameThreadRequest>,
) -> ApiResult<ChatThread> {
    authorize(&state, &headers)?;
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::invalid_argument("Thread title must not be empty."));
    }
    Ok(Json(state.threads.rename_thread(&thread_id, title).await?))
}

pub async fn delete_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers)?;
    state.threads.delete_thread(&thread_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
) -> ApiResult<Value> {
    authorize(&state, &headers)?;
    let messages = state.threads.list_messages(&thread_id).await?;
    Ok(Json(json!({ "threadId": thread_id, "messages": messages })))
}

pub async fn thread_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    authorize(&state, &headers)?;
    let rx = state.threads.subscribe(&thread_id).await?;

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(message) => Event::default()
            .event("message")
            .json_data(&message)
            .ok()
            .map(Ok),
        Err(_) => None,
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        path::PathBuf,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
        Router,
    };
    use serde_json::Map;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        ai_chat::{AiBackendError, ChatBackend},
        attributes::{Attribute, AttributeOption, AttributeType},
        config::Config,
        context::ChatContext,
        notion::{
            DatabaseSummary, FilteredPage, NotionMetadata, PageQuery, PageSummary,
            ProviderError, QueryPagesRequest, QueryPagesResponse,
        },
        store::ThreadStore,
    };

    const KEY: &str = "test-key";

    struct FakeNotion {
        queries: Mutex<Vec<QueryPagesRequest>>,
    }

    #[async_trait]
    impl NotionMetadata for FakeNotion {
        async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, ProviderError> {
            Ok(vec![DatabaseSummary {
                id: "db1".into(),
                name: "Produkty".into(),
                available: true,
            }])
        }

        async fn list_pages(&self, _database_id: &str) -> Result<Vec<PageSummary>, ProviderError> {
            Err(ProviderError::new("Notion API error (404): Could not find database"))
        }

        async fn list_attributes(&self, _database_id: &str) -> Result<Vec<Attribute>, ProviderError> {
            Ok(vec![Attribute {
                id: "Kategoria".into(),
                name: "Kategoria".into(),
                attribute_type: AttributeType::Select,
            }])
        }

        async fn list_attribute_options(
            &self,
            _database_id: &str,
            _attribute_name: &str,
        ) -> Result<Vec<AttributeOption>, ProviderError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl PageQuery for FakeNotion {
        async fn query_pages(
            &self,
            request: &QueryPagesRequest,
        ) -> Result<QueryPagesResponse, ProviderError> {
            self.queries.lock().unwrap().push(request.clone());
            Ok(QueryPagesResponse {
                pages: vec![FilteredPage {
                    id: "p1".into(),
                    title: "Laptop".into(),
                    properties: Map::new(),
                }],
                total_count: 1,
                has_more: false,
            })
        }
    }

    struct FakeBackend {
        reply: Result<String, AiBackendError>,
        delay: Duration,
        panics: bool,
        contexts: Mutex<Vec<Option<ChatContext>>>,
    }

    impl FakeBackend {
        fn replying(reply: Result<String, AiBackendError>) -> Self {
            Self {
                reply,
                delay: Duration::ZERO,
                panics: false,
                contexts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn send_chat_message(
            &self,
            _message: &str,
            _thread_id: &str,
            context: Option<&ChatContext>,
        ) -> Result<String, AiBackendError> {
            self.contexts.lock().unwrap().push(context.cloned());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.panics {
                panic!("chat backend crashed");
            }
            self.reply.clone()
        }
    }

    fn test_config() -> Config {
        Config {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            api_key: KEY.to_string(),
            api_key_is_fallback: false,
            notion_api_key: None,
            notion_base_url: "http://notion.invalid".to_string(),
            notion_api_version: "2022-06-28".to_string(),
            webhook_url: None,
            db_path: PathBuf::from(":memory:"),
            query_page_size: 25,
            http_timeout_seconds: 5,
            language: "en".to_string(),
            log_payloads: true,
        }
    }

    struct Harness {
        app: Router,
        notion: Arc<FakeNotion>,
        backend: Arc<FakeBackend>,
    }

    fn harness(reply: Result<String, AiBackendError>) -> Harness {
        harness_with(FakeBackend::replying(reply))
    }

    fn harness_with(backend: FakeBackend) -> Harness {
        let notion = Arc::new(FakeNotion {
            queries: Mutex::new(Vec::new()),
        });
        let backend = Arc::new(backend);
        let state = AppState {
            config: test_config(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            threads: Arc::new(ThreadStore::open_in_memory().unwrap()),
            notion: notion.clone(),
            pages: notion.clone(),
            chat_backend: backend.clone(),
        };
        Harness {
            app: crate::build_router(state),
            notion,
            backend,
        }
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {KEY}"));
        let body = match body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn new_session(app: &Router) -> String {
        let (status, body) = call(app, Method::POST, "/v1/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["sessionId"].as_str().unwrap().to_string()
    }

    async fn select_electronics(app: &Router, sid: &str) {
        call(
            app,
            Method::PUT,
            &format!("/v1/sessions/{sid}/database"),
            Some(json!({"databaseId": "db1", "databaseName": "Produkty"})),
        )
        .await;
        call(
            app,
            Method::POST,
            &format!("/v1/sessions/{sid}/filtering-attributes/toggle"),
            Some(json!({"attributeId": "Kategoria", "name": "Kategoria", "type": "select"})),
        )
        .await;
        call(
            app,
            Method::POST,
            &format!("/v1/sessions/{sid}/filter-values/toggle"),
            Some(json!({
                "attributeId": "Kategoria",
                "attributeName": "Kategoria",
                "valueId": "Elektronika",
                "valueName": "Elektronika",
                "attributeType": "select"
            })),
        )
        .await;
    }

    #[tokio::test]
    async fn healthz_is_public_but_v1_requires_bearer() {
        let h = harness(Ok("hi".into()));
        let response = h
            .app
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v1/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn selecting_and_filtering_updates_summary() {
        let h = harness(Ok("hi".into()));
        let sid = new_session(&h.app).await;
        select_electronics(&h.app, &sid).await;

        let (status, summary) =
            call(&h.app, Method::GET, &format!("/v1/sessions/{sid}/summary"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["filterSummary"], json!("Kategoria: Elektronika"));
        assert_eq!(summary["threadTitle"], json!("DB | Filters(1)"));

        let (_, compiled) = call(
            &h.app,
            Method::GET,
            &format!("/v1/sessions/{sid}/compiled-filter"),
            None,
        )
        .await;
        assert_eq!(
            compiled["filter"],
            json!({"property": "Kategoria", "select": {"equals": "Elektronika"}})
        );

        let (_, view) = call(
            &h.app,
            Method::DELETE,
            &format!("/v1/sessions/{sid}/filter-values/Kategoria/Elektronika"),
            None,
        )
        .await;
        assert_eq!(view["filters"], json!([]));
        assert_eq!(view["filteringAttributes"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn changing_database_resets_selection() {
        let h = harness(Ok("hi".into()));
        let sid = new_session(&h.app).await;
        select_electronics(&h.app, &sid).await;

        let (_, view) = call(
            &h.app,
            Method::PUT,
            &format!("/v1/sessions/{sid}/database"),
            Some(json!({"databaseId": "db2"})),
        )
        .await;
        assert_eq!(view["selectedDatabaseId"], json!("db2"));
        assert_eq!(view["selectedDatabaseName"], Value::Null);
        assert_eq!(view["selectedPageId"], json!(""));
        assert_eq!(view["filters"], json!([]));
        assert_eq!(view["filteringAttributes"], json!([]));
        assert_eq!(view["dataAttributes"], json!([]));
    }

    #[tokio::test]
    async fn send_message_grounds_reply_in_selection() {
        let h = harness(Ok("Here are your laptops".into()));
        let sid = new_session(&h.app).await;
        select_electronics(&h.app, &sid).await;

        let (status, thread) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(thread["title"], json!("DB | Filters(1)"));
        let tid = thread["id"].as_str().unwrap().to_string();

        let (status, sent) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads/{tid}/messages"),
            Some(json!({"message": "What laptops do we have?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sent["botMessage"]["content"], json!("Here are your laptops"));
        assert_eq!(sent["fallback"], Value::Null);

        let db = &sent["context"]["selectedDatabase"];
        assert_eq!(db["filterSummary"], json!("Kategoria: Elektronika"));
        assert_eq!(db["hasFilters"], json!(true));
        assert_eq!(db["name"], json!("Produkty"));
        assert_eq!(db["filteredData"]["totalCount"], json!(1));

        {
            let queries = h.notion.queries.lock().unwrap();
            assert_eq!(queries.len(), 1);
            assert_eq!(queries[0].page_size, 25);
            assert_eq!(
                serde_json::to_value(&queries[0].filter).unwrap(),
                json!({"property": "Kategoria", "select": {"equals": "Elektronika"}})
            );
        }
        assert!(h.backend.contexts.lock().unwrap()[0].is_some());

        let (_, messages) = call(
            &h.app,
            Method::GET,
            &format!("/v1/threads/{tid}/messages"),
            None,
        )
        .await;
        assert_eq!(messages["messages"].as_array().map(Vec::len), Some(2));

        let (_, view) = call(&h.app, Method::GET, &format!("/v1/sessions/{sid}"), None).await;
        assert_eq!(view["sending"], json!(false));
    }

    #[tokio::test]
    async fn backend_failure_becomes_fallback_reply() {
        let h = harness(Err(AiBackendError::EmptyResponse));
        let sid = new_session(&h.app).await;
        let (_, thread) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads"),
            Some(json!({"title": "  "})),
        )
        .await;
        assert_eq!(thread["title"], json!("New chat"));
        let tid = thread["id"].as_str().unwrap();

        let (status, sent) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads/{tid}/messages"),
            Some(json!({"message": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sent["fallback"], json!("AI_EMPTY_RESPONSE"));
        assert_eq!(
            sent["botMessage"]["content"],
            json!(AiBackendError::EmptyResponse.fallback_message())
        );
        assert_eq!(sent["context"], Value::Null);
        assert!(h.backend.contexts.lock().unwrap()[0].is_none());
    }

    #[tokio::test]
    async fn send_to_unknown_thread_fails_and_releases_session() {
        let h = harness(Ok("hi".into()));
        let sid = new_session(&h.app).await;

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads/missing/messages"),
            Some(json!({"message": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], json!("THREAD_NOT_FOUND"));

        let (_, view) = call(&h.app, Method::GET, &format!("/v1/sessions/{sid}"), None).await;
        assert_eq!(view["sending"], json!(false));
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let h = harness(Ok("hi".into()));
        let sid = new_session(&h.app).await;
        let (status, _) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads/t/messages"),
            Some(json!({"message": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn provider_errors_are_reported_inline() {
        let h = harness(Ok("hi".into()));
        let (status, body) =
            call(&h.app, Method::GET, "/v1/notion/databases/db1/pages", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], json!("NOTION_PROVIDER_ERROR"));
        assert_eq!(
            body["error"]["message"],
            json!("Notion API error (404): Could not find database")
        );

        let (status, body) = call(&h.app, Method::GET, "/v1/notion/databases", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["databases"][0]["name"], json!("Produkty"));
    }

    #[tokio::test]
    async fn thread_rename_and_delete() {
        let h = harness(Ok("hi".into()));
        let sid = new_session(&h.app).await;
        let (_, thread) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads"),
            Some(json!({"title": "Inventory"})),
        )
        .await;
        let tid = thread["id"].as_str().unwrap();

        let (status, _) = call(
            &h.app,
            Method::PATCH,
            &format!("/v1/threads/{tid}"),
            Some(json!({"title": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, renamed) = call(
            &h.app,
            Method::PATCH,
            &format!("/v1/threads/{tid}"),
            Some(json!({"title": "Stock"})),
        )
        .await;
        assert_eq!(renamed["title"], json!("Stock"));

        let (status, _) = call(&h.app, Method::DELETE, &format!("/v1/threads/{tid}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, threads) = call(&h.app, Method::GET, "/v1/threads", None).await;
        assert_eq!(threads, json!([]));
    }

    async fn new_thread(app: &Router, sid: &str) -> String {
        let (_, thread) = call(
            app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads"),
            Some(json!({})),
        )
        .await;
        thread["id"].as_str().unwrap().to_string()
    }

    fn spawn_send(app: &Router, sid: &str, tid: &str, text: &str) -> tokio::task::JoinHandle<(StatusCode, Value)> {
        let app = app.clone();
        let uri = format!("/v1/sessions/{sid}/threads/{tid}/messages");
        let body = json!({ "message": text });
        tokio::spawn(async move { call(&app, Method::POST, &uri, Some(body)).await })
    }

    #[tokio::test]
    async fn overlapping_sends_on_one_session_are_rejected() {
        let h = harness_with(FakeBackend {
            delay: Duration::from_millis(200),
            ..FakeBackend::replying(Ok("slow answer".into()))
        });
        let sid = new_session(&h.app).await;
        let tid = new_thread(&h.app, &sid).await;

        let first = spawn_send(&h.app, &sid, &tid, "first");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_, view) = call(&h.app, Method::GET, &format!("/v1/sessions/{sid}"), None).await;
        assert_eq!(view["sending"], json!(true));

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads/{tid}/messages"),
            Some(json!({"message": "second"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], json!("SEND_IN_PROGRESS"));

        let (status, sent) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sent["botMessage"]["content"], json!("slow answer"));

        let (_, view) = call(&h.app, Method::GET, &format!("/v1/sessions/{sid}"), None).await;
        assert_eq!(view["sending"], json!(false));

        let (status, _) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads/{tid}/messages"),
            Some(json!({"message": "third"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, messages) =
            call(&h.app, Method::GET, &format!("/v1/threads/{tid}/messages"), None).await;
        assert_eq!(messages["messages"].as_array().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn other_sessions_may_send_concurrently() {
        let h = harness_with(FakeBackend {
            delay: Duration::from_millis(100),
            ..FakeBackend::replying(Ok("ok".into()))
        });
        let a = new_session(&h.app).await;
        let b = new_session(&h.app).await;
        let tid = new_thread(&h.app, &a).await;

        let first = spawn_send(&h.app, &a, &tid, "from a");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (status, _) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{b}/threads/{tid}/messages"),
            Some(json!({"message": "from b"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first.await.unwrap().0, StatusCode::OK);
    }

    #[tokio::test]
    async fn selection_changes_during_send_do_not_leak_into_it() {
        let h = harness_with(FakeBackend {
            delay: Duration::from_millis(200),
            ..FakeBackend::replying(Ok("answer".into()))
        });
        let sid = new_session(&h.app).await;
        select_electronics(&h.app, &sid).await;
        let tid = new_thread(&h.app, &sid).await;

        let first = spawn_send(&h.app, &sid, &tid, "What do we sell?");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (status, view) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/filter-values/toggle"),
            Some(json!({
                "attributeId": "Kategoria",
                "attributeName": "Kategoria",
                "valueId": "Dom",
                "valueName": "Dom",
                "attributeType": "select"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["summary"]["filterSummary"], json!("Kategoria: Dom"));

        let (status, sent) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            sent["context"]["selectedDatabase"]["filterSummary"],
            json!("Kategoria: Elektronika")
        );

        let captured = h.backend.contexts.lock().unwrap()[0].clone().unwrap();
        assert_eq!(captured.selected_database.filter_summary, "Kategoria: Elektronika");
        assert_eq!(captured.filters[0].selected_names, vec!["Elektronika"]);

        let queries = h.notion.queries.lock().unwrap();
        assert_eq!(
            serde_json::to_value(&queries[0].filter).unwrap(),
            json!({"property": "Kategoria", "select": {"equals": "Elektronika"}})
        );
    }

    #[tokio::test]
    async fn crashed_send_releases_session() {
        let h = harness_with(FakeBackend {
            panics: true,
            ..FakeBackend::replying(Ok("never".into()))
        });
        let sid = new_session(&h.app).await;
        let tid = new_thread(&h.app, &sid).await;

        let (status, body) = call(
            &h.app,
            Method::POST,
            &format!("/v1/sessions/{sid}/threads/{tid}/messages"),
            Some(json!({"message": "boom"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], json!("SEND_TASK_FAILED"));

        let (_, view) = call(&h.app, Method::GET, &format!("/v1/sessions/{sid}"), None).await;
        assert_eq!(view["sending"], json!(false));
    }
}
