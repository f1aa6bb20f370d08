//! Modal placeholder dialog: one control per distinct directive, a live
//! preview and three exits (copy, insert, cancel) that resolve a single
//! [`DialogOutcome`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::host::{Clipboard, Notifier};
use crate::listeners::{ListenerKind, ListenerRegistry, ListenerScope};
use crate::parse::{parse_placeholders, PlaceholderKind};
use crate::render::{html_escape, render, Rendered, ValueMap};
use crate::state::{ModalGuard, SessionToken};
use crate::store::{get_or_default, KeyValueStore};

pub const LAST_VALUES_PREFIX: &str = "snippet:last:";

pub fn last_values_key(shortcut: &str) -> String {
    format!("{}{}", LAST_VALUES_PREFIX, shortcut.trim().to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogField {
    pub kind: PlaceholderKind,
    pub label: String,
    pub options: Vec<String>,
    pub value: String,
}

/// Where a key or input event was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    Dialog,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Pass,
    /// Stop propagation and prevent the default action.
    Stop,
}

/// Close requests coming from the host's modal mechanism rather than the
/// dialog's own buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostGesture {
    Cancel,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureResponse {
    PreventDefault,
    /// The host already closed the modal; show it again.
    Reopen,
    Ignore,
}

/// Resolves to the text to insert, or `None` when nothing should be
/// inserted (copied, cancelled or the session was dropped).
#[derive(Debug)]
pub struct DialogOutcome(oneshot::Receiver<Option<String>>);

impl Future for DialogOutcome {
    type Output = Option<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|received| received.unwrap_or(None))
    }
}

pub struct DialogSession {
    shortcut: String,
    template: String,
    fields: Vec<DialogField>,
    /// Index of the field changed most recently.
    last_changed: Option<usize>,
    preview: Rendered,
    pinned: bool,
    store: Arc<dyn KeyValueStore>,
    resolve: Option<oneshot::Sender<Option<String>>>,
    listeners: ListenerScope,
    guard: Option<ModalGuard>,
}

impl DialogSession {
    /// Builds the fields, pre-filled from the values last inserted for
    /// `shortcut`, and attaches the session's listeners.
    pub async fn open(
        shortcut: &str,
        template: &str,
        guard: ModalGuard,
        store: Arc<dyn KeyValueStore>,
        registry: &ListenerRegistry,
    ) -> (DialogSession, DialogOutcome) {
        let remembered = load_last_values(store.as_ref(), shortcut).await;

        let fields: Vec<DialogField> = parse_placeholders(template)
            .into_iter()
            .map(|p| {
                let value = match remembered.get(&p.label) {
                    Some(v) if p.kind == PlaceholderKind::Input || p.options.contains(v) => {
                        v.clone()
                    }
                    _ => p.fallback_value(),
                };
                DialogField { kind: p.kind, label: p.label, options: p.options, value }
            })
            .collect();

        let mut listeners = registry.scope();
        for kind in [
            ListenerKind::KeyDown,
            ListenerKind::Input,
            ListenerKind::Cancel,
            ListenerKind::Close,
        ] {
            listeners.add(kind);
        }

        let (tx, rx) = oneshot::channel();
        let mut session = DialogSession {
            shortcut: shortcut.to_string(),
            template: template.to_string(),
            fields,
            last_changed: None,
            preview: Rendered::default(),
            pinned: false,
            store,
            resolve: Some(tx),
            listeners,
            guard: Some(guard),
        };
        session.refresh_preview();
        debug!(
            "Opened dialog for {} with {} fields",
            session.shortcut,
            session.fields.len()
        );

        (session, DialogOutcome(rx))
    }

    pub fn shortcut(&self) -> &str {
        &self.shortcut
    }

    pub fn fields(&self) -> &[DialogField] {
        &self.fields
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.guard.as_ref().map(ModalGuard::token)
    }

    pub fn is_open(&self) -> bool {
        self.resolve.is_some()
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn preview_plain(&self) -> &str {
        &self.preview.plain
    }

    pub fn preview_html(&self) -> &str {
        &self.preview.html
    }

    /// One value per label. An input and a select may share a label; then
    /// the field changed most recently wins, or the first one if neither
    /// has changed.
    pub fn value_map(&self) -> ValueMap {
        let mut values = ValueMap::new();
        for field in &self.fields {
            values.entry(field.label.clone()).or_insert_with(|| field.value.clone());
        }
        if let Some(field) = self.last_changed.and_then(|i| self.fields.get(i)) {
            values.insert(field.label.clone(), field.value.clone());
        }
        values
    }

    pub fn field_index(&self, kind: PlaceholderKind, label: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.kind == kind && f.label == label)
    }

    /// Changes one field and re-renders, dropping any manual preview edit.
    /// Returns false when no field has this kind and label.
    pub fn set_field(&mut self, kind: PlaceholderKind, label: &str, value: &str) -> bool {
        if !self.is_open() {
            return false;
        }
        let Some(index) = self.field_index(kind, label) else {
            return false;
        };
        self.fields[index].value = value.to_string();
        self.last_changed = Some(index);
        self.pinned = false;
        self.refresh_preview();
        true
    }

    /// The user typed into the preview itself; it stays as written until a
    /// field changes.
    pub fn edit_preview(&mut self, text: &str) {
        if !self.is_open() {
            return;
        }
        self.pinned = true;
        self.preview = Rendered { plain: text.to_string(), html: html_escape(text) };
    }

    pub fn refresh_preview(&mut self) {
        if self.pinned {
            return;
        }
        self.preview = render(&self.template, &self.value_map(), true);
    }

    /// Events aimed at the page underneath are trapped while the dialog is
    /// open.
    pub fn filter_event(&self, origin: EventOrigin) -> EventDisposition {
        match (self.is_open(), origin) {
            (true, EventOrigin::Page) => EventDisposition::Stop,
            _ => EventDisposition::Pass,
        }
    }

    pub fn on_host_gesture(&self, gesture: HostGesture) -> GestureResponse {
        if !self.is_open() {
            return GestureResponse::Ignore;
        }
        match gesture {
            HostGesture::Cancel => GestureResponse::PreventDefault,
            HostGesture::Close => GestureResponse::Reopen,
        }
    }

    /// Copies the preview text. Failing both clipboard paths keeps the
    /// dialog open.
    pub async fn copy(&mut self, clipboard: &dyn Clipboard, notifier: &dyn Notifier) -> bool {
        if !self.is_open() {
            return false;
        }
        let text = self.preview.plain.clone();

        let copied = match clipboard.write_text(&text).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Clipboard API refused ({}), trying legacy copy", e);
                match clipboard.legacy_copy(&text) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Copy failed: {}", e);
                        false
                    }
                }
            }
        };

        if !copied {
            notifier.toast("Could not copy");
            return false;
        }
        notifier.toast("Copied to clipboard");
        self.finish(None);
        true
    }

    /// Remembers the field values for next time and resolves with the
    /// preview text.
    pub async fn insert(&mut self) {
        if !self.is_open() {
            return;
        }
        let values: Map<String, Value> = self
            .value_map()
            .into_iter()
            .map(|(label, value)| (label, Value::String(value)))
            .collect();
        let mut entry = Map::new();
        entry.insert(last_values_key(&self.shortcut), Value::Object(values));
        if let Err(e) = self.store.set(entry).await {
            warn!("Could not remember values for {}: {}", self.shortcut, e);
        }

        let text = self.preview.plain.clone();
        info!("Dialog for {} resolved with {} chars", self.shortcut, text.chars().count());
        self.finish(Some(text));
    }

    pub fn cancel(&mut self) {
        if self.is_open() {
            debug!("Dialog for {} cancelled", self.shortcut);
        }
        self.finish(None);
    }

    fn finish(&mut self, result: Option<String>) {
        if let Some(tx) = self.resolve.take() {
            let _ = tx.send(result);
        }
        self.listeners.abort();
        self.guard = None;
    }
}

async fn load_last_values(store: &dyn KeyValueStore, shortcut: &str) -> ValueMap {
    let Some(value) = get_or_default(store, &last_values_key(shortcut)).await else {
        return ValueMap::new();
    };
    let Value::Object(map) = value else {
        warn!("Ignoring malformed last values for {}", shortcut);
        return ValueMap::new();
    };
    map.into_iter()
        .filter_map(|(label, v)| match v {
            Value::String(s) => Some((label, s)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::{ClipboardAction, MockClipboard, RecordingNotifier};
    use crate::state::{ModalCoordinator, ModalKind};
    use crate::store::MemoryStore;
    use serde_json::json;

    const TEMPLATE: &str = "Hello {{input:Name|there}}, tone {{select:Tone|warm|formal}}.";

    struct Fixture {
        modal: ModalCoordinator,
        registry: ListenerRegistry,
        store: Arc<MemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                modal: ModalCoordinator::new(),
                registry: ListenerRegistry::new(),
                store: Arc::new(MemoryStore::local()),
            }
        }

        async fn open(&self, template: &str) -> (DialogSession, DialogOutcome) {
            let guard = self.modal.try_acquire(ModalKind::PlaceholderDialog).unwrap();
            DialogSession::open("/greet", template, guard, self.store.clone(), &self.registry)
                .await
        }
    }

    #[tokio::test]
    async fn test_fallback_values_and_preview() {
        let fx = Fixture::new();
        let (session, _outcome) = fx.open(TEMPLATE).await;

        let values: Vec<_> = session.fields().iter().map(|f| f.value.as_str()).collect();
        assert_eq!(values, vec!["there", "warm"]);
        assert_eq!(session.preview_plain(), "Hello there, tone warm.");
        assert!(session.preview_html().contains(r#"<span class="hl" data-label="Name">there</span>"#));
        assert!(fx.modal.is_open());
    }

    #[tokio::test]
    async fn test_insert_persists_and_prefills_next_time() {
        let fx = Fixture::new();
        let (mut session, outcome) = fx.open(TEMPLATE).await;
        assert!(session.set_field(PlaceholderKind::Input, "Name", "Ana"));
        assert!(session.set_field(PlaceholderKind::Select, "Tone", "formal"));
        session.insert().await;

        assert_eq!(outcome.await.as_deref(), Some("Hello Ana, tone formal."));
        assert!(!fx.modal.is_open());
        assert_eq!(
            fx.store.get(&last_values_key("/greet")).await.unwrap(),
            Some(json!({"Name": "Ana", "Tone": "formal"}))
        );

        let (again, _outcome) = fx.open(TEMPLATE).await;
        assert_eq!(again.value_map().get("Name").map(String::as_str), Some("Ana"));
        assert_eq!(again.preview_plain(), "Hello Ana, tone formal.");
    }

    #[tokio::test]
    async fn test_remembered_select_outside_options_falls_back() {
        let fx = Fixture::new();
        let mut entry = Map::new();
        entry.insert(last_values_key("/GREET"), json!({"Tone": "angry", "Name": 5}));
        fx.store.set(entry).await.unwrap();

        let (session, _outcome) = fx.open(TEMPLATE).await;
        let values = session.value_map();
        assert_eq!(values["Tone"], "warm");
        assert_eq!(values["Name"], "there");
    }

    #[tokio::test]
    async fn test_input_and_select_sharing_a_label() {
        let fx = Fixture::new();
        let (mut session, outcome) =
            fx.open("A={{input:Name|def}} B={{select:Name|one|two}}").await;
        assert_eq!(session.fields().len(), 2);
        assert_eq!(session.preview_plain(), "A=def B=def");

        assert!(session.set_field(PlaceholderKind::Input, "Name", "Ana"));
        assert_eq!(session.preview_plain(), "A=Ana B=Ana");
        assert_eq!(session.fields()[1].value, "one");

        assert!(session.set_field(PlaceholderKind::Select, "Name", "two"));
        assert_eq!(session.fields()[0].value, "Ana");
        assert_eq!(session.preview_plain(), "A=two B=two");
        assert!(!session.set_field(PlaceholderKind::Select, "Tone", "warm"));

        session.insert().await;
        assert_eq!(outcome.await.as_deref(), Some("A=two B=two"));
        assert_eq!(
            fx.store.get(&last_values_key("/greet")).await.unwrap(),
            Some(json!({"Name": "two"}))
        );
    }

    #[tokio::test]
    async fn test_manual_edit_pins_until_field_changes() {
        let fx = Fixture::new();
        let (mut session, outcome) = fx.open(TEMPLATE).await;

        session.edit_preview("Custom <text>");
        assert!(session.is_pinned());
        session.refresh_preview();
        assert_eq!(session.preview_plain(), "Custom <text>");
        assert_eq!(session.preview_html(), "Custom &lt;text&gt;");

        assert!(session.set_field(PlaceholderKind::Input, "Name", "Bo"));
        assert!(!session.is_pinned());
        assert_eq!(session.preview_plain(), "Hello Bo, tone warm.");

        session.edit_preview("Final words");
        session.insert().await;
        assert_eq!(outcome.await.as_deref(), Some("Final words"));
    }

    #[tokio::test]
    async fn test_cancel_resolves_none_without_persisting() {
        let fx = Fixture::new();
        let (mut session, outcome) = fx.open(TEMPLATE).await;
        session.set_field(PlaceholderKind::Input, "Name", "Ana");
        session.cancel();

        assert_eq!(outcome.await, None);
        assert_eq!(fx.store.get(&last_values_key("/greet")).await.unwrap(), None);
        assert!(!session.set_field(PlaceholderKind::Input, "Name", "late"));
    }

    #[tokio::test]
    async fn test_dropped_session_resolves_none() {
        let fx = Fixture::new();
        let (session, outcome) = fx.open(TEMPLATE).await;
        drop(session);
        assert_eq!(outcome.await, None);
        assert!(!fx.modal.is_open());
        assert_eq!(fx.registry.active(), 0);
    }

    #[tokio::test]
    async fn test_copy_uses_legacy_path_when_api_refuses() {
        let fx = Fixture::new();
        let clipboard = MockClipboard::new().refuse_async();
        let notifier = RecordingNotifier::new();
        let (mut session, outcome) = fx.open(TEMPLATE).await;

        assert!(session.copy(&clipboard, &notifier).await);
        assert_eq!(
            clipboard.actions(),
            vec![ClipboardAction::LegacyCopy("Hello there, tone warm.".into())]
        );
        assert_eq!(outcome.await, None);
        assert_eq!(notifier.toasts(), vec!["Copied to clipboard"]);
    }

    #[tokio::test]
    async fn test_failed_copy_keeps_dialog_open() {
        let fx = Fixture::new();
        let clipboard = MockClipboard::new().refuse_all();
        let notifier = RecordingNotifier::new();
        let (mut session, _outcome) = fx.open(TEMPLATE).await;

        assert!(!session.copy(&clipboard, &notifier).await);
        assert!(session.is_open());
        assert!(fx.modal.is_open());
        assert_eq!(notifier.toasts(), vec!["Could not copy"]);
    }

    #[tokio::test]
    async fn test_event_trapping_and_host_gestures() {
        let fx = Fixture::new();
        let (mut session, _outcome) = fx.open(TEMPLATE).await;

        assert_eq!(session.filter_event(EventOrigin::Page), EventDisposition::Stop);
        assert_eq!(session.filter_event(EventOrigin::Dialog), EventDisposition::Pass);
        assert_eq!(session.on_host_gesture(HostGesture::Cancel), GestureResponse::PreventDefault);
        assert_eq!(session.on_host_gesture(HostGesture::Close), GestureResponse::Reopen);
        assert!(session.is_open());

        session.cancel();
        assert_eq!(session.filter_event(EventOrigin::Page), EventDisposition::Pass);
        assert_eq!(session.on_host_gesture(HostGesture::Close), GestureResponse::Ignore);
    }

    #[tokio::test]
    async fn test_listeners_return_to_baseline() {
        let fx = Fixture::new();
        for round in 0..25 {
            let (mut session, outcome) = fx.open(TEMPLATE).await;
            assert_eq!(fx.registry.active(), 4);
            if round % 2 == 0 {
                session.insert().await;
            } else {
                session.cancel();
            }
            outcome.await;
            assert_eq!(fx.registry.active(), 0);
        }
    }
}
