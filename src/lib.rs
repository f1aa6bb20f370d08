//! slashsnip - slash-shortcut snippet expansion
//!
//! Typing `/shortcut` followed by a space in a text field or editable region
//! replaces the shortcut with its stored template. Templates may ask for
//! values through a placeholder dialog, carry date macros, or describe a
//! whole mail. A typeahead lists matching shortcuts while one is being
//! typed, and a trigger word opens an assistant panel that rewrites the
//! message typed so far. The snippet library can be imported from a local
//! file or pulled from a remote JSON source.
//!
//! The host page is modelled by [`surface::Surface`]: flat text fields and
//! rich-text trees that the library edits directly and observes through
//! synthetic notifications.

pub mod assistant;
pub mod caret;
pub mod config;
pub mod dialog;
pub mod errors;
pub mod expander;
pub mod host;
pub mod index;
pub mod insertion;
pub mod keyboard;
pub mod library;
pub mod listeners;
pub mod parse;
pub mod parser;
pub mod remote;
pub mod render;
pub mod replacement;
pub mod rich;
pub mod state;
pub mod store;
pub mod surface;
pub mod typeahead;

pub use assistant::{AnalysisClient, AssistantPanel, HttpAnalysisClient};
pub use caret::{CaretAnchorResolver, CaretContext, TokenPattern};
pub use config::{load_config, AppConfig};
pub use dialog::{DialogOutcome, DialogSession};
pub use errors::{
    AnalysisError, ConfigError, Result, SnipError, StoreError, SurfaceError, SyncError,
};
pub use expander::{EventOutcome, Expander};
pub use host::{Clipboard, MailFields, Notifier};
pub use index::{ShortcutIndex, Template};
pub use keyboard::{EditEvent, Key};
pub use remote::{sync_remote, SyncReport};
pub use render::{render, Rendered};
pub use replacement::expand_static_macros;
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use surface::Surface;
