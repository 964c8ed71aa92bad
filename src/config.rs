use std::{env, fs, net::SocketAddr, path::PathBuf};

use anyhow::Result;
use tracing::warn;
use uuid::Uuid;

const MAX_QUERY_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub api_key: String,
    pub api_key_is_fallback: bool,
    pub notion_api_key: Option<String>,
    pub notion_base_url: String,
    pub notion_api_version: String,
    pub webhook_url: Option<String>,
    pub db_path: PathBuf,
    pub query_page_size: u32,
    pub http_timeout_seconds: u64,
    pub language: String,
    pub log_payloads: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_addr = parse_bind_addr(
            &env::var("NOTION_CHAT_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        );

        let (api_key, api_key_is_fallback) = resolve_api_key();

        let notion_base_url = env::var("NOTION_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.notion.com/v1".to_string());
        let notion_api_version =
            env::var("NOTION_API_VERSION").unwrap_or_else(|_| "2022-06-28".to_string());

        let db_path = PathBuf::from(
            env::var("NOTION_CHAT_DB_PATH")
                .unwrap_or_else(|_| "./data/notion-chat.sqlite3".to_string()),
        );

        let query_page_size = env::var("NOTION_CHAT_QUERY_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(MAX_QUERY_PAGE_SIZE)
            .clamp(1, MAX_QUERY_PAGE_SIZE);

        let http_timeout_seconds = env::var("NOTION_CHAT_HTTP_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let language = non_empty_var("NOTION_CHAT_LANGUAGE").unwrap_or_else(|| "en".to_string());

        let log_payloads = env::var("NOTION_CHAT_LOG_PAYLOADS")
            .ok()
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        Ok(Self {
            bind_addr,
            api_key,
            api_key_is_fallback,
            notion_api_key: non_empty_var("NOTION_API_KEY"),
            notion_base_url,
            notion_api_version,
            webhook_url: non_empty_var("NOTION_CHAT_WEBHOOK_URL"),
            db_path,
            query_page_size,
            http_timeout_seconds,
            language,
            log_payloads,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bind_addr(raw: &str) -> SocketAddr {
    raw.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .parse::<SocketAddr>()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)))
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn resolve_api_key() -> (String, bool) {
    if let Some(value) = non_empty_var("NOTION_CHAT_API_KEY") {
        return (value, false);
    }

    if let Ok(key_file) = env::var("NOTION_CHAT_API_KEY_FILE") {
        match fs::read_to_string(&key_file) {
            Ok(raw) => {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return (trimmed.to_string(), false);
                }
                warn!(key_file = %key_file, "NOTION_CHAT_API_KEY_FILE is empty, falling back to generated key");
            }
            Err(err) => {
                warn!(key_file = %key_file, "Failed reading NOTION_CHAT_API_KEY_FILE: {err}, falling back to generated key");
            }
        }
    } else {
        warn!("NOTION_CHAT_API_KEY not set, falling back to generated key");
    }

    (format!("fallback-{}", Uuid::new_v4()), true)
}
