//! The page-level edit event handler: resolves the token at the caret and
//! expands it, drives the typeahead and opens the dialog or assistant.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::assistant::{read_context, AnalysisClient, AnalysisRequest, AssistantPanel, Attachment};
use crate::caret::{CaretAnchorResolver, CaretContext};
use crate::config::AppConfig;
use crate::dialog::{DialogOutcome, DialogSession};
use crate::errors::{AnalysisError, Result, SnipError};
use crate::host::{MailFields, Notifier};
use crate::index::{ShortcutIndex, SharedIndex, Template, MAIL_SEPARATOR};
use crate::insertion;
use crate::keyboard::{EditEvent, EditEventKind};
use crate::listeners::ListenerRegistry;
use crate::replacement::expand_static_macros;
use crate::state::{ModalCoordinator, ModalKind};
use crate::store::{get_or_default, KeyValueStore, StoreChange, SNIPPETS_KEY};
use crate::surface::Surface;
use crate::typeahead::{CloseReason, KeyOutcome, Typeahead, TypeaheadView, Viewport};

pub const SNIPPET_INSERTED: &str = "Snippet inserted";
pub const MAIL_COMPLETED: &str = "Mail completed";

/// What happened to one edit event.
#[derive(Debug)]
pub enum EventOutcome {
    /// Not an event this handler looks at, or a modal session is open.
    Ignored,
    /// Looked at; nothing expanded.
    Passed,
    Typeahead(KeyOutcome),
    Expanded { shortcut: String },
    MailCompleted { shortcut: String },
    DialogOpened(PendingExpansion),
    AssistantOpened(PendingAnalysis),
}

impl EventOutcome {
    /// Whether the host should suppress the event's default action.
    pub fn prevents_default(&self) -> bool {
        match self {
            EventOutcome::Ignored | EventOutcome::Passed => false,
            EventOutcome::Typeahead(outcome) => outcome.prevents_default(),
            _ => true,
        }
    }
}

/// A placeholder dialog waiting for the user, plus what to do with its
/// result.
pub struct PendingExpansion {
    dialog: DialogSession,
    outcome: DialogOutcome,
    completion: Completion,
}

impl PendingExpansion {
    pub fn dialog(&mut self) -> &mut DialogSession {
        &mut self.dialog
    }

    pub fn into_parts(self) -> (DialogSession, DialogOutcome, Completion) {
        (self.dialog, self.outcome, self.completion)
    }
}

impl fmt::Debug for PendingExpansion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingExpansion")
            .field("shortcut", &self.completion.shortcut)
            .field("mail", &self.completion.mail)
            .finish_non_exhaustive()
    }
}

/// Applies a resolved dialog to the surface the shortcut was typed in.
pub struct Completion {
    shortcut: String,
    context: CaretContext,
    mail: bool,
    notifier: Arc<dyn Notifier>,
}

impl Completion {
    pub fn shortcut(&self) -> &str {
        &self.shortcut
    }

    /// `None` (copied or cancelled) leaves the surface alone. Returns
    /// whether anything was written.
    pub fn apply(
        &self,
        result: Option<String>,
        surface: &mut Surface,
        mail: &mut dyn MailFields,
    ) -> Result<bool> {
        let Some(text) = result else {
            debug!("Dialog for {} produced nothing to insert", self.shortcut);
            return Ok(false);
        };

        if self.mail {
            let (subject, body) = split_mail(&text);
            deliver_mail(surface, &self.context, mail, &subject, &body)?;
            self.notifier.toast(MAIL_COMPLETED);
        } else {
            insertion::commit(surface, &self.context, &text)?;
            self.notifier.toast(SNIPPET_INSERTED);
        }
        Ok(true)
    }
}

/// An assistant panel whose analysis has not run yet.
pub struct PendingAnalysis {
    panel: AssistantPanel,
    request: AnalysisRequest,
    client: Option<Arc<dyn AnalysisClient>>,
}

impl PendingAnalysis {
    pub fn panel(&self) -> &AssistantPanel {
        &self.panel
    }

    pub fn request(&self) -> &AnalysisRequest {
        &self.request
    }

    pub async fn run(self) -> AssistantPanel {
        let mut panel = self.panel;
        match &self.client {
            Some(client) => panel.analyze(client.as_ref(), &self.request).await,
            None => panel.fail(AnalysisError::MissingEndpoint),
        }
        panel
    }
}

impl fmt::Debug for PendingAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAnalysis")
            .field("request", &self.request)
            .field("has_client", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

/// Splits a resolved mail dialog back into trimmed subject and body.
pub fn split_mail(text: &str) -> (String, String) {
    match text.split_once(MAIL_SEPARATOR) {
        Some((subject, body)) => (subject.trim().to_string(), body.trim().to_string()),
        None => (text.trim().to_string(), String::new()),
    }
}

pub fn mail_fallback(subject: &str, body: &str) -> String {
    format!("Subject: {}\n\n{}", subject, body)
}

/// Fills the compose fields and drops the typed shortcut, or writes the
/// whole mail in place of the shortcut when there are no compose fields.
fn deliver_mail(
    surface: &mut Surface,
    context: &CaretContext,
    mail: &mut dyn MailFields,
    subject: &str,
    body: &str,
) -> Result<()> {
    if mail.fill(subject, body) {
        insertion::commit(surface, context, "")?;
    } else {
        debug!("No compose fields, inserting mail as text");
        insertion::commit(surface, context, &mail_fallback(subject, body))?;
    }
    Ok(())
}

pub struct Expander {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    session_store: Option<Arc<dyn KeyValueStore>>,
    index: SharedIndex,
    changes: Receiver<StoreChange>,
    modal: ModalCoordinator,
    listeners: ListenerRegistry,
    typeahead: Typeahead,
    shortcuts: CaretAnchorResolver,
    /// Absent when the configured trigger word is blank.
    trigger: Option<CaretAnchorResolver>,
    notifier: Arc<dyn Notifier>,
    analysis: Option<Arc<dyn AnalysisClient>>,
    attachments: Vec<Attachment>,
}

impl Expander {
    /// Subscribes to `store` and builds the index from its current
    /// snippets.
    pub async fn new(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let changes = store.subscribe();
        let snippets = get_or_default(store.as_ref(), SNIPPETS_KEY).await;
        let index = snippets.as_ref().map(ShortcutIndex::from_value).unwrap_or_default();
        info!("Expander ready with {} shortcuts", index.len());

        let trigger = CaretAnchorResolver::trigger(&config.assistant.trigger_word);
        if trigger.is_none() {
            warn!("Blank assistant trigger word, assistant disabled");
        }

        let listeners = ListenerRegistry::new();
        Self {
            typeahead: Typeahead::new(listeners.clone(), &config.typeahead),
            trigger,
            shortcuts: CaretAnchorResolver::shortcuts(),
            config,
            store,
            session_store: None,
            index: SharedIndex::new(index),
            changes,
            modal: ModalCoordinator::new(),
            listeners,
            notifier,
            analysis: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_session_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn with_analysis_client(mut self, client: Arc<dyn AnalysisClient>) -> Self {
        self.analysis = Some(client);
        self
    }

    /// Documents found on the page, sent along with assistant requests.
    pub fn set_page_attachments(&mut self, attachments: Vec<Attachment>) {
        self.attachments = attachments;
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn index(&self) -> Arc<ShortcutIndex> {
        self.index.snapshot()
    }

    pub fn modal(&self) -> &ModalCoordinator {
        &self.modal
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn typeahead(&self) -> &Typeahead {
        &self.typeahead
    }

    pub fn typeahead_view(&self, viewport: Viewport) -> Option<TypeaheadView> {
        self.typeahead.view(viewport)
    }

    /// Pointer activation of a typeahead row.
    pub fn activate_suggestion(&mut self, index: usize, surface: &mut Surface) -> Result<KeyOutcome> {
        Ok(self.typeahead.activate(index, surface)?)
    }

    /// Applies pending store changes. Returns whether the index was rebuilt.
    pub fn sync_index(&self) -> bool {
        let mut rebuilt = false;
        for change in self.changes.try_iter() {
            rebuilt |= self.index.apply_change(&change);
        }
        rebuilt
    }

    pub async fn handle_event(
        &mut self,
        surface: &mut Surface,
        event: &EditEvent,
        mail: &mut dyn MailFields,
    ) -> Result<EventOutcome> {
        self.sync_index();
        if self.modal.is_open() {
            return Ok(EventOutcome::Ignored);
        }

        if self.typeahead.is_open() {
            if let EditEventKind::KeyDown { key, .. } = event.kind {
                if self.typeahead.target() == Some(surface.id()) {
                    let outcome = self.typeahead.handle_key(key, surface)?;
                    if outcome.prevents_default() {
                        return Ok(EventOutcome::Typeahead(outcome));
                    }
                } else {
                    self.typeahead.close(CloseReason::Blur);
                }
            }
        }

        if !surface.is_editable() || !event.should_trigger() {
            return Ok(EventOutcome::Ignored);
        }

        if event.is_completion_key() {
            if let Some(outcome) = self.open_assistant(surface).await? {
                return Ok(outcome);
            }
        }

        let Some(context) = self.shortcuts.resolve(surface) else {
            self.typeahead.close(CloseReason::NoMatch);
            return Ok(EventOutcome::Passed);
        };

        let index = self.index.snapshot();
        self.typeahead.refresh(surface, &index);
        let Some(template) = index.lookup(context.token()).cloned() else {
            return Ok(EventOutcome::Passed);
        };
        let shortcut = context.token().to_string();

        if template.has_placeholders() {
            return self.open_dialog(shortcut, &template, context).await;
        }
        self.typeahead.close(CloseReason::Expanded);

        match template {
            Template::Text(text) => {
                insertion::commit(surface, &context, &expand_static_macros(&text))?;
                info!("Expanded {}", shortcut);
                self.notifier.toast(SNIPPET_INSERTED);
                Ok(EventOutcome::Expanded { shortcut })
            }
            Template::Mail(template) => {
                let subject = expand_static_macros(&template.subject);
                let body = expand_static_macros(&template.body);
                deliver_mail(surface, &context, mail, &subject, &body)?;
                info!("Completed mail from {}", shortcut);
                self.notifier.toast(MAIL_COMPLETED);
                Ok(EventOutcome::MailCompleted { shortcut })
            }
        }
    }

    async fn open_dialog(
        &mut self,
        shortcut: String,
        template: &Template,
        context: CaretContext,
    ) -> Result<EventOutcome> {
        let guard = self
            .modal
            .try_acquire(ModalKind::PlaceholderDialog)
            .ok_or(SnipError::ModalBusy)?;
        self.typeahead.close(CloseReason::DialogOpened);

        let (dialog, outcome) = DialogSession::open(
            &shortcut,
            &template.dialog_source(),
            guard,
            self.store.clone(),
            &self.listeners,
        )
        .await;

        Ok(EventOutcome::DialogOpened(PendingExpansion {
            dialog,
            outcome,
            completion: Completion {
                shortcut,
                context,
                mail: template.is_mail(),
                notifier: self.notifier.clone(),
            },
        }))
    }

    async fn open_assistant(&mut self, surface: &mut Surface) -> Result<Option<EventOutcome>> {
        let Some(context) = self.trigger.as_ref().and_then(|t| t.resolve(surface)) else {
            return Ok(None);
        };
        let Some(guard) = self.modal.try_acquire(ModalKind::AssistantPanel) else {
            return Ok(None);
        };
        self.typeahead.close(CloseReason::DialogOpened);

        let case_text = context.before_text().to_string();
        let anchor = insertion::remove_token(surface, &context)?;

        let assistant = &self.config.assistant;
        let values = read_context(
            self.session_store.as_deref(),
            self.store.as_ref(),
            &assistant.context_keys,
        )
        .await;
        let request = AnalysisRequest::new(
            &case_text,
            values,
            self.attachments.clone(),
            assistant.max_attachments,
        );

        let panel = AssistantPanel::open(&case_text, anchor, guard, &self.listeners);
        Ok(Some(EventOutcome::AssistantOpened(PendingAnalysis {
            panel,
            request,
            client: self.analysis.clone(),
        })))
    }

    pub fn on_blur(&mut self) {
        self.typeahead.close(CloseReason::Blur);
    }

    pub fn on_navigation(&mut self) {
        self.typeahead.close(CloseReason::Navigation);
    }

    /// Page is going away: drop every transient surface and the modal flag.
    pub fn on_page_hide(&mut self) {
        self.typeahead.close(CloseReason::Navigation);
        self.modal.force_release();
    }
}
