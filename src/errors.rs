// src/errors.rs
use std::path::PathBuf;
use thiserror::Error;

use crate::parser::Rule;
use crate::surface::SurfaceId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Failed to parse snippet library: {0}")]
    Library(Box<pest::error::Error<Rule>>),
    #[error("Could not find a configuration directory")]
    ConfigDirectoryNotFound,
    #[error("Failed to create configuration directory: {source}")]
    CreateConfigDir { source: std::io::Error },
    #[error("Failed to write default configuration: {source}")]
    WriteDefaultConfig { source: std::io::Error },
    #[error("Failed to read {path}: {source}")]
    ReadConfig { path: PathBuf, source: std::io::Error },
}

impl From<pest::error::Error<Rule>> for ConfigError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ConfigError::Library(Box::new(err))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on store file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("Store file {path} is not valid JSON: {source}")]
    Corrupt { path: PathBuf, source: serde_json::Error },
    #[error("Failed to encode store contents: {source}")]
    Encode { #[from] source: serde_json::Error },
    #[error("Failed to replace store file {path}: {source}")]
    Persist { path: PathBuf, source: std::io::Error },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("caret context is stale: captured at revision {expected}, surface is at {found}")]
    StaleContext { expected: u64, found: u64 },
    #[error("caret context belongs to surface {expected}, not {found}")]
    SurfaceMismatch { expected: SurfaceId, found: SurfaceId },
    #[error("caret context was captured on a different kind of surface")]
    KindMismatch,
    #[error("position {offset} is out of bounds for node {node}")]
    InvalidPosition { node: usize, offset: usize },
    #[error("node {0} is not attached to the document")]
    DetachedNode(usize),
    #[error("observer failed: {0}")]
    Observer(String),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no analysis endpoint is configured")]
    MissingEndpoint,
    #[error("analysis request timed out")]
    Timeout,
    #[error("analysis request failed: {source}")]
    Request { #[from] source: reqwest::Error },
    #[error("HTTP {status} – {body}")]
    Status { status: u16, body: String },
    #[error("analysis response is not JSON: {0}")]
    InvalidJson(String),
    #[error("analysis rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no remote URL given")]
    EmptyUrl,
    #[error("remote request timed out")]
    Timeout,
    #[error("remote request failed: {source}")]
    Request { #[from] source: reqwest::Error },
    #[error("the URL returned HTML instead of JSON; it may need a login, open it in a browser and check that it shows JSON")]
    Html,
    #[error("remote response is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("remote data has no 'snippets' object")]
    MissingSnippets,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClipboardError {
    #[error("clipboard is not available")]
    Unavailable,
    #[error("clipboard write failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SnipError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("another modal session is already open")]
    ModalBusy,
    #[error("unknown shortcut: {0}")]
    UnknownShortcut(String),
    #[error("file watcher failed: {source}")]
    Watch { #[from] source: notify::Error },
    #[error("I/O error: {source}")]
    Io { #[from] source: std::io::Error },
    #[error("Serde JSON error: {source}")]
    SerdeJson { #[from] source: serde_json::Error },
}

// Global Result type alias
pub type Result<T> = std::result::Result<T, SnipError>;
