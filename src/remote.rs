//! Pulls a snippet library published as JSON, usually an Apps Script web
//! app, into the local store.
//!
//! The source answers a plain GET with `{"snippets": {...}, "titles": {...}}`.
//! A successful sync replaces `snippets` and `titles` wholesale and records
//! where and when they came from; any failure leaves the store untouched.

use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::assistant::normalize_endpoint;
use crate::errors::SyncError;
use crate::store::{KeyValueStore, SNIPPETS_KEY};

pub const REMOTE_URL_KEY: &str = "remote_url";
pub const TITLES_KEY: &str = "titles";
/// Milliseconds since the epoch of the last successful sync.
pub const LAST_SYNC_KEY: &str = "last_sync";

static HTML_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<html|<body|<!doctype html").expect("html pattern"));

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub url: String,
    pub snippets: usize,
    pub titles: usize,
    pub synced_at: DateTime<Utc>,
}

pub struct RemoteSource {
    client: reqwest::Client,
    url: String,
}

impl RemoteSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let url = normalize_endpoint(url.trim());
        if url.is_empty() {
            return Err(SyncError::EmptyUrl);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches and parses the source. A failed first attempt is retried
    /// once; the second attempt decides the error.
    pub async fn fetch(&self) -> Result<Value, SyncError> {
        match self.fetch_once().await {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!("First fetch of {} failed ({}), retrying", self.url, e);
                self.fetch_once().await
            }
        }
    }

    async fn fetch_once(&self) -> Result<Value, SyncError> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let raw = response.text().await.map_err(request_error)?;
        debug!("Remote answered {} with {} bytes", status, raw.len());

        serde_json::from_str(&raw).map_err(|e| {
            if HTML_BODY.is_match(&raw) {
                SyncError::Html
            } else {
                SyncError::InvalidJson(e.to_string())
            }
        })
    }
}

fn request_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Request { source: err }
    }
}

/// Downloads the library at `url` and stores it along with `remote_url`
/// and `last_sync`. `url` is stored as given, not normalized.
pub async fn sync_remote(
    url: &str,
    store: &dyn KeyValueStore,
    timeout: Duration,
) -> Result<SyncReport, SyncError> {
    let source = RemoteSource::new(url, timeout)?;
    let data = source.fetch().await?;
    let report = store_library(url.trim(), data, store).await?;
    info!(
        "Synced {} snippets and {} titles from {}",
        report.snippets,
        report.titles,
        source.url()
    );
    Ok(report)
}

async fn store_library(
    url: &str,
    data: Value,
    store: &dyn KeyValueStore,
) -> Result<SyncReport, SyncError> {
    let Value::Object(mut data) = data else {
        return Err(SyncError::MissingSnippets);
    };
    let Some(Value::Object(snippets)) = data.remove(SNIPPETS_KEY) else {
        return Err(SyncError::MissingSnippets);
    };
    let titles = match data.remove(TITLES_KEY) {
        Some(Value::Object(titles)) => titles,
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            warn!("Ignoring non-object titles ({})", other);
            Map::new()
        }
    };

    let synced_at = Utc::now();
    let report = SyncReport {
        url: url.to_string(),
        snippets: snippets.len(),
        titles: titles.len(),
        synced_at,
    };

    let mut entries = Map::new();
    entries.insert(REMOTE_URL_KEY.to_string(), Value::String(url.to_string()));
    entries.insert(SNIPPETS_KEY.to_string(), Value::Object(snippets));
    entries.insert(TITLES_KEY.to_string(), Value::Object(titles));
    entries.insert(LAST_SYNC_KEY.to_string(), Value::from(synced_at.timestamp_millis()));
    store.set(entries).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers one GET per body, in order, and reports how many were served.
    async fn serve(bodies: Vec<&'static str>) -> (String, JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/exec", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut served = 0;
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let reply = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
                served += 1;
            }
            served
        });
        (url, handle)
    }

    const LIBRARY: &str =
        r#"{"snippets":{"/hi":"Hello","/bye":"Bye"},"titles":{"/hi":"Greeting"}}"#;

    #[tokio::test]
    async fn test_sync_stores_library_and_source() {
        let (url, server) = serve(vec![LIBRARY]).await;
        let store = MemoryStore::local();
        let changes = store.subscribe();

        let report = sync_remote(&url, &store, Duration::from_secs(5)).await.unwrap();
        assert_eq!((report.snippets, report.titles), (2, 1));
        assert_eq!(server.await.unwrap(), 1);

        assert_eq!(
            store.get(SNIPPETS_KEY).await.unwrap(),
            Some(json!({"/hi": "Hello", "/bye": "Bye"}))
        );
        assert_eq!(store.get(TITLES_KEY).await.unwrap(), Some(json!({"/hi": "Greeting"})));
        assert_eq!(store.get(REMOTE_URL_KEY).await.unwrap(), Some(json!(url)));
        assert_eq!(
            store.get(LAST_SYNC_KEY).await.unwrap(),
            Some(json!(report.synced_at.timestamp_millis()))
        );
        assert!(changes.try_iter().any(|c| c.key == SNIPPETS_KEY));
    }

    #[tokio::test]
    async fn test_retry_after_bad_first_answer() {
        let (url, server) = serve(vec!["not json", r#"{"snippets":{"/a":"A"}}"#]).await;
        let store = MemoryStore::local();

        let report = sync_remote(&url, &store, Duration::from_secs(5)).await.unwrap();
        assert_eq!((report.snippets, report.titles), (1, 0));
        assert_eq!(server.await.unwrap(), 2);
        assert_eq!(store.get(TITLES_KEY).await.unwrap(), Some(json!({})));
    }

    #[tokio::test]
    async fn test_html_answer_gets_login_hint() {
        let page = "<!DOCTYPE html><html><body>Sign in</body></html>";
        let (url, _server) = serve(vec![page, page]).await;
        let store = MemoryStore::local();

        let err = sync_remote(&url, &store, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, SyncError::Html));
        assert!(err.to_string().contains("login"));
        assert_eq!(store.get(SNIPPETS_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_answer_is_invalid_json() {
        let (url, _server) = serve(vec!["oops", "still oops"]).await;
        let err = sync_remote(&url, &MemoryStore::local(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidJson(_)));
    }

    #[tokio::test]
    async fn test_missing_snippets_leaves_store_alone() {
        let store = MemoryStore::local();
        let mut entries = Map::new();
        entries.insert(SNIPPETS_KEY.into(), json!({"/keep": "Kept"}));
        store.set(entries).await.unwrap();

        for data in [json!({"titles": {}}), json!({"snippets": ["/a"]}), json!([1, 2])] {
            let err = store_library("https://x/exec", data, &store).await.unwrap_err();
            assert!(matches!(err, SyncError::MissingSnippets));
        }
        assert_eq!(store.get(SNIPPETS_KEY).await.unwrap(), Some(json!({"/keep": "Kept"})));
        assert_eq!(store.get(REMOTE_URL_KEY).await.unwrap(), None);
    }

    #[test]
    fn test_source_url_is_normalized() {
        let source = RemoteSource::new(
            " https://script.google.com/a/macros/corp.com/s/abc/exec ",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(source.url(), "https://script.google.com/macros/s/abc/exec");
        assert!(matches!(
            RemoteSource::new("   ", Duration::from_secs(1)),
            Err(SyncError::EmptyUrl)
        ));
    }
}
