//! Seams to the embedding page: clipboard, toasts, mail compose fields.

use async_trait::async_trait;
use tracing::info;

use crate::errors::ClipboardError;

#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Asynchronous clipboard API.
    async fn write_text(&self, text: &str) -> Result<(), ClipboardError>;

    /// Synchronous copy path used when `write_text` is refused.
    fn legacy_copy(&self, _text: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError::Unavailable)
    }
}

/// Short-lived status messages.
pub trait Notifier: Send + Sync {
    fn toast(&self, message: &str);
}

/// Subject/body inputs of a mail composer, if the page has one.
pub trait MailFields {
    /// Returns false when no compose fields were found.
    fn fill(&mut self, subject: &str, body: &str) -> bool;
}

/// Notifier that writes toasts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn toast(&self, message: &str) {
        info!("{}", message);
    }
}

/// Page without a mail composer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMailFields;

impl MailFields for NoMailFields {
    fn fill(&mut self, _subject: &str, _body: &str) -> bool {
        false
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::assistant::{AnalysisClient, AnalysisRequest, AnalysisResponse};
    use crate::errors::{AnalysisError, SurfaceError};
    use crate::surface::{Notification, NotifyTarget, SurfaceObserver};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    pub struct RecordingObserver {
        seen: Arc<Mutex<Vec<(NotifyTarget, Notification)>>>,
        fail: bool,
    }

    impl RecordingObserver {
        pub fn new() -> Self {
            Self::default()
        }

        /// Records, then reports an error for every notification.
        pub fn failing() -> Self {
            Self { fail: true, ..Self::default() }
        }

        pub fn notifications(&self) -> Vec<Notification> {
            self.seen.lock().iter().map(|(_, n)| *n).collect()
        }

        pub fn targets(&self) -> Vec<NotifyTarget> {
            self.seen.lock().iter().map(|(t, _)| *t).collect()
        }
    }

    impl SurfaceObserver for RecordingObserver {
        fn on_notification(
            &self,
            target: NotifyTarget,
            notification: Notification,
        ) -> Result<(), SurfaceError> {
            self.seen.lock().push((target, notification));
            if self.fail {
                return Err(SurfaceError::Observer("listener threw".into()));
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ClipboardAction {
        WriteText(String),
        LegacyCopy(String),
    }

    #[derive(Clone, Default)]
    pub struct MockClipboard {
        actions: Arc<Mutex<Vec<ClipboardAction>>>,
        refuse_async: Arc<AtomicBool>,
        refuse_legacy: Arc<AtomicBool>,
    }

    impl MockClipboard {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn refuse_async(self) -> Self {
            self.refuse_async.store(true, Ordering::SeqCst);
            self
        }

        pub fn refuse_all(self) -> Self {
            self.refuse_async.store(true, Ordering::SeqCst);
            self.refuse_legacy.store(true, Ordering::SeqCst);
            self
        }

        pub fn actions(&self) -> Vec<ClipboardAction> {
            self.actions.lock().clone()
        }
    }

    #[async_trait]
    impl Clipboard for MockClipboard {
        async fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
            if self.refuse_async.load(Ordering::SeqCst) {
                return Err(ClipboardError::Failed("permission denied".into()));
            }
            self.actions.lock().push(ClipboardAction::WriteText(text.to_string()));
            Ok(())
        }

        fn legacy_copy(&self, text: &str) -> Result<(), ClipboardError> {
            if self.refuse_legacy.load(Ordering::SeqCst) {
                return Err(ClipboardError::Unavailable);
            }
            self.actions.lock().push(ClipboardAction::LegacyCopy(text.to_string()));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        toasts: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn toasts(&self) -> Vec<String> {
            self.toasts.lock().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn toast(&self, message: &str) {
            self.toasts.lock().push(message.to_string());
        }
    }

    #[derive(Debug, Default)]
    pub struct MockMailFields {
        pub present: bool,
        pub filled: Vec<(String, String)>,
    }

    impl MockMailFields {
        pub fn present() -> Self {
            Self { present: true, filled: Vec::new() }
        }

        pub fn absent() -> Self {
            Self::default()
        }
    }

    impl MailFields for MockMailFields {
        fn fill(&mut self, subject: &str, body: &str) -> bool {
            if !self.present {
                return false;
            }
            self.filled.push((subject.to_string(), body.to_string()));
            true
        }
    }

    /// Replays one canned answer and records every request it sees.
    #[derive(Clone)]
    pub struct MockAnalysisClient {
        answer: Arc<Mutex<Result<AnalysisResponse, String>>>,
        requests: Arc<Mutex<Vec<AnalysisRequest>>>,
    }

    impl MockAnalysisClient {
        pub fn answering(response: AnalysisResponse) -> Self {
            Self {
                answer: Arc::new(Mutex::new(Ok(response))),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                answer: Arc::new(Mutex::new(Err(message.to_string()))),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn requests(&self) -> Vec<AnalysisRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl AnalysisClient for MockAnalysisClient {
        async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
            self.requests.lock().push(request.clone());
            match &*self.answer.lock() {
                Ok(response) => Ok(response.clone()),
                Err(message) => Err(AnalysisError::Rejected(message.clone())),
            }
        }
    }
}
