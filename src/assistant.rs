//! Assistant panel opened by the trigger word: the text typed before the
//! trigger is sent for analysis and the suggested message can replace it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::AssistantConfig;
use crate::errors::{AnalysisError, SurfaceError};
use crate::host::{Clipboard, Notifier};
use crate::insertion::{replace_before_caret, CaretAnchor};
use crate::listeners::{ListenerKind, ListenerRegistry, ListenerScope};
use crate::state::ModalGuard;
use crate::store::{get_layered, KeyValueStore};
use crate::surface::Surface;

/// Hard cap on attachments per request.
pub const MAX_ATTACHMENTS: usize = 12;

pub const FALLBACK_MESSAGE: &str =
    "Could not generate a recommendation right now. Check the guide and write the message yourself.";

const CONTEXT_PREFIX: &str = "context:";

static APPS_SCRIPT_DOMAIN_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://script\.google\.com/a/macros/[^/]+/s/").expect("apps script pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnalysisRequest {
    pub text: String,
    /// Context identifiers such as `challenge` or `site`.
    pub context: BTreeMap<String, String>,
    pub attachments: Vec<Attachment>,
}

impl AnalysisRequest {
    pub fn new(
        text: &str,
        context: BTreeMap<String, String>,
        mut attachments: Vec<Attachment>,
        max_attachments: usize,
    ) -> Self {
        attachments.truncate(max_attachments.min(MAX_ATTACHMENTS));
        Self { text: text.to_string(), context, attachments }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default, rename = "isAllowed")]
    pub is_allowed: Option<bool>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub detected: Vec<String>,
    #[serde(default)]
    pub improved: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisResponse {
    pub fn allowed(&self) -> bool {
        self.is_allowed.unwrap_or(false)
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    fn text(value: Value) -> String {
        match value {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }

    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(text).collect(),
        single => vec![text(single)],
    })
}

#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, AnalysisError>;
}

#[derive(Serialize)]
struct WireRequest<'a> {
    op: &'static str,
    text: &'a str,
    #[serde(flatten)]
    context: &'a BTreeMap<String, String>,
    attachments: &'a [Attachment],
}

/// Posts requests to a script endpoint as `text/plain` JSON, which keeps
/// the request free of a CORS preflight.
pub struct HttpAnalysisClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpAnalysisClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AnalysisError> {
        let endpoint = normalize_endpoint(endpoint.trim());
        if endpoint.is_empty() {
            return Err(AnalysisError::MissingEndpoint);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client })
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self, AnalysisError> {
        let endpoint = config.endpoint.as_deref().ok_or(AnalysisError::MissingEndpoint)?;
        Self::new(endpoint, config.timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Rewrites domain-scoped Apps Script URLs to their public form.
pub fn normalize_endpoint(url: &str) -> String {
    APPS_SCRIPT_DOMAIN_URL
        .replace(url, "https://script.google.com/macros/s/")
        .into_owned()
}

fn request_error(err: reqwest::Error) -> AnalysisError {
    if err.is_timeout() {
        AnalysisError::Timeout
    } else {
        AnalysisError::Request { source: err }
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
        let body = serde_json::to_string(&WireRequest {
            op: "analyze",
            text: &request.text,
            context: &request.context,
            attachments: &request.attachments,
        })
        .map_err(|e| AnalysisError::InvalidJson(e.to_string()))?;

        debug!(
            "Analyzing {} chars with {} attachments",
            request.text.chars().count(),
            request.attachments.len()
        );
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/plain;charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let raw = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body: raw.chars().take(300).collect(),
            });
        }

        let parsed: AnalysisResponse =
            serde_json::from_str(&raw).map_err(|e| AnalysisError::InvalidJson(e.to_string()))?;
        if parsed.ok == Some(false) {
            let reason = parsed.error.clone().unwrap_or_else(|| "analysis failed".to_string());
            return Err(AnalysisError::Rejected(reason));
        }
        Ok(parsed)
    }
}

/// Reads the configured context keys, session store first. Keys named
/// `context:<name>` are sent as `<name>`.
pub async fn read_context(
    session: Option<&dyn KeyValueStore>,
    local: &dyn KeyValueStore,
    keys: &[String],
) -> BTreeMap<String, String> {
    let mut context = BTreeMap::new();
    for key in keys {
        let Some(Value::String(value)) = get_layered(session, local, key).await else {
            continue;
        };
        if value.trim().is_empty() {
            continue;
        }
        let name = key.strip_prefix(CONTEXT_PREFIX).unwrap_or(key);
        context.insert(name.to_string(), value);
    }
    context
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelState {
    Analyzing,
    Ready(AnalysisResponse),
    Failed(String),
}

pub struct AssistantPanel {
    case_text: String,
    anchor: CaretAnchor,
    state: PanelState,
    final_text: String,
    listeners: ListenerScope,
    guard: Option<ModalGuard>,
}

impl AssistantPanel {
    pub fn open(
        case_text: &str,
        anchor: CaretAnchor,
        guard: ModalGuard,
        registry: &ListenerRegistry,
    ) -> Self {
        let mut listeners = registry.scope();
        listeners.add(ListenerKind::Cancel);
        listeners.add(ListenerKind::Close);
        info!("Assistant panel opened for {} chars", case_text.chars().count());
        Self {
            case_text: case_text.to_string(),
            anchor,
            state: PanelState::Analyzing,
            final_text: String::new(),
            listeners,
            guard: Some(guard),
        }
    }

    pub fn case_text(&self) -> &str {
        &self.case_text
    }

    pub fn state(&self) -> &PanelState {
        &self.state
    }

    pub fn final_text(&self) -> &str {
        &self.final_text
    }

    pub fn anchor(&self) -> &CaretAnchor {
        &self.anchor
    }

    pub fn is_open(&self) -> bool {
        self.guard.is_some()
    }

    pub async fn analyze(&mut self, client: &dyn AnalysisClient, request: &AnalysisRequest) {
        match client.analyze(request).await {
            Ok(response) => {
                if let Some(improved) = response.improved.as_deref().filter(|s| !s.is_empty()) {
                    self.final_text = improved.to_string();
                }
                debug!(
                    "Analysis ready: {} detected, allowed={}",
                    response.detected.len(),
                    response.allowed()
                );
                self.state = PanelState::Ready(response);
            }
            Err(e) => self.fail(e),
        }
    }

    /// Shows `error` inline and offers the manual-writing hint instead.
    pub fn fail(&mut self, error: AnalysisError) {
        warn!("Analysis failed: {}", error);
        self.state = PanelState::Failed(error.to_string());
        self.final_text = FALLBACK_MESSAGE.to_string();
    }

    pub fn edit_final(&mut self, text: &str) {
        self.final_text = text.to_string();
    }

    /// Copies the final message; the panel stays open either way.
    pub async fn copy(&self, clipboard: &dyn Clipboard, notifier: &dyn Notifier) -> bool {
        let text = &self.final_text;
        let copied = match clipboard.write_text(text).await {
            Ok(()) => true,
            Err(_) => clipboard.legacy_copy(text).is_ok(),
        };
        if !copied {
            notifier.toast("Could not copy");
        }
        copied
    }

    /// Replaces everything before the anchor with the trimmed final message
    /// and closes. An empty message leaves the panel open.
    pub fn insert(&mut self, surface: &mut Surface) -> Result<bool, SurfaceError> {
        let clean = self.final_text.trim();
        if clean.is_empty() || !self.is_open() {
            return Ok(false);
        }
        replace_before_caret(surface, &self.anchor, clean)?;
        self.close();
        Ok(true)
    }

    pub fn close(&mut self) {
        self.listeners.abort();
        self.guard = None;
    }
}
