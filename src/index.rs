//! Case-insensitive shortcut → template index rebuilt from the stored
//! snippet mapping.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::SnipError;
use crate::parse::has_placeholders;
use crate::store::{StoreChange, SNIPPETS_KEY};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MailTemplate {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Template {
    Text(String),
    Mail(MailTemplate),
}

/// Joins subject and body while a mail template goes through the dialog.
pub const MAIL_SEPARATOR: &str = "\n<<<__MAILSEP__>>>\n";

impl Template {
    pub fn has_placeholders(&self) -> bool {
        match self {
            Template::Text(text) => has_placeholders(text),
            Template::Mail(mail) => has_placeholders(&mail.subject) || has_placeholders(&mail.body),
        }
    }

    /// Single string fed to the dialog.
    pub fn dialog_source(&self) -> String {
        match self {
            Template::Text(text) => text.clone(),
            Template::Mail(mail) => format!("{}{}{}", mail.subject, MAIL_SEPARATOR, mail.body),
        }
    }

    pub fn is_mail(&self) -> bool {
        matches!(self, Template::Mail(_))
    }

    /// Short one-line description for listings.
    pub fn summary(&self) -> String {
        match self {
            Template::Text(text) => text.replace('\n', " "),
            Template::Mail(mail) => format!("[mail] {}", mail.subject.replace('\n', " ")),
        }
    }
}

pub type SnippetMap = BTreeMap<String, Template>;

/// Reads the stored mapping, skipping entries that are neither text nor
/// mail templates.
pub fn snippets_from_value(value: &Value) -> SnippetMap {
    let Some(object) = value.as_object() else {
        if !value.is_null() {
            warn!("Stored snippets are not an object; ignoring");
        }
        return SnippetMap::new();
    };

    object
        .iter()
        .filter_map(|(key, raw)| match serde_json::from_value::<Template>(raw.clone()) {
            Ok(template) => Some((key.clone(), template)),
            Err(e) => {
                warn!("Skipping snippet {}: {}", key, e);
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ShortcutIndex {
    by_key: HashMap<String, Template>,
    display: Vec<String>,
}

impl ShortcutIndex {
    /// Keys are trimmed and must start with `/`; lookups ignore case and the
    /// last entry in key order wins on a case collision.
    pub fn build(snippets: &SnippetMap) -> Self {
        let mut by_key = HashMap::new();
        let mut display = Vec::new();

        for (key, template) in snippets {
            let trimmed = key.trim();
            if !trimmed.starts_with('/') {
                debug!("Ignoring snippet key without slash: {:?}", key);
                continue;
            }
            by_key.insert(trimmed.to_lowercase(), template.clone());
            display.push(trimmed.to_string());
        }
        display.sort();
        display.dedup();

        Self { by_key, display }
    }

    pub fn from_value(value: &Value) -> Self {
        Self::build(&snippets_from_value(value))
    }

    pub fn lookup(&self, shortcut: &str) -> Option<&Template> {
        self.by_key.get(&shortcut.trim().to_lowercase())
    }

    /// [`ShortcutIndex::lookup`] for callers that need the template.
    pub fn require(&self, shortcut: &str) -> Result<&Template, SnipError> {
        self.lookup(shortcut)
            .ok_or_else(|| SnipError::UnknownShortcut(shortcut.trim().to_string()))
    }

    /// Original-case keys, sorted.
    pub fn keys(&self) -> &[String] {
        &self.display
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Index shared between the event loop and store watchers. Readers take a
/// snapshot and keep it for the duration of an operation.
#[derive(Debug, Default)]
pub struct SharedIndex {
    current: RwLock<Arc<ShortcutIndex>>,
}

impl SharedIndex {
    pub fn new(index: ShortcutIndex) -> Self {
        Self { current: RwLock::new(Arc::new(index)) }
    }

    pub fn snapshot(&self) -> Arc<ShortcutIndex> {
        self.current.read().clone()
    }

    pub fn replace(&self, index: ShortcutIndex) {
        info!("Shortcut index rebuilt with {} entries", index.len());
        *self.current.write() = Arc::new(index);
    }

    /// Rebuilds when the change touches the snippet mapping.
    pub fn apply_change(&self, change: &StoreChange) -> bool {
        if change.key != SNIPPETS_KEY {
            return false;
        }
        let index = change
            .new_value
            .as_ref()
            .map(ShortcutIndex::from_value)
            .unwrap_or_default();
        self.replace(index);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore, StoreScope};
    use serde_json::{json, Map};

    fn sample() -> ShortcutIndex {
        ShortcutIndex::from_value(&json!({
            "/ack": "Thanks for reaching out.",
            " /Apology ": "Sorry about that, {{input:Name}}.",
            "noslash": "ignored",
            "/mail": {"subject": "Hi", "body": "Body {{select:Tone|warm|cold}}"},
            "/broken": 42
        }))
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let index = sample();
        assert_eq!(index.len(), 3);
        assert!(index.lookup("/ACK").is_some());
        assert!(index.lookup("/apology").is_some());
        assert!(index.lookup("noslash").is_none());
        assert!(index.lookup("/broken").is_none());
    }

    #[test]
    fn test_require_reports_unknown_shortcut() {
        let index = sample();
        assert!(index.require(" /Ack").is_ok());
        let err = index.require(" /nope ").unwrap_err();
        assert!(matches!(&err, SnipError::UnknownShortcut(s) if s == "/nope"));
        assert_eq!(err.to_string(), "unknown shortcut: /nope");
    }

    #[test]
    fn test_display_keys_keep_case_and_sort() {
        assert_eq!(sample().keys(), ["/Apology", "/ack", "/mail"]);
    }

    #[test]
    fn test_mail_templates() {
        let index = sample();
        let mail = index.lookup("/mail").unwrap();
        assert!(mail.is_mail());
        assert!(mail.has_placeholders());
        assert_eq!(
            mail.dialog_source(),
            format!("Hi{}Body {{{{select:Tone|warm|cold}}}}", MAIL_SEPARATOR)
        );
    }

    #[test]
    fn test_collision_resolves_deterministically() {
        let index = ShortcutIndex::from_value(&json!({"/Hi": "upper", "/hi": "lower"}));
        assert_eq!(index.lookup("/HI"), Some(&Template::Text("lower".into())));
        assert_eq!(index.keys(), ["/Hi", "/hi"]);
    }

    #[tokio::test]
    async fn test_store_change_rebuilds_index() {
        let store = MemoryStore::new(StoreScope::Local);
        let rx = store.subscribe();
        let shared = SharedIndex::default();
        let before = shared.snapshot();

        let mut entries = Map::new();
        entries.insert(SNIPPETS_KEY.into(), json!({"/new": "fresh"}));
        entries.insert("unrelated".into(), json!(true));
        store.set(entries).await.unwrap();

        let rebuilt = rx.try_iter().filter(|c| shared.apply_change(c)).count();
        assert_eq!(rebuilt, 1);
        assert!(shared.snapshot().lookup("/new").is_some());
        assert!(before.lookup("/new").is_none());
    }
}
