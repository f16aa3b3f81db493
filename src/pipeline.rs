//! Message pipeline: handler registry, concurrent dispatch, bulk replay.
//!
//! Handlers are stored by the name they report; re-registering a name
//! replaces the previous handler. Dispatch takes a snapshot of the enabled
//! handlers under the lock, then runs them concurrently without the lock,
//! so register/unregister never race an in-flight dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tracing::{debug, error};

use crate::error::AppError;
use crate::handlers::Handler;
use crate::message::Message;

#[derive(Default)]
pub struct MessagePipeline {
    handlers: Mutex<HashMap<String, Arc<dyn Handler>>>,
}

impl MessagePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Handler>>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `handler` under its own name, replacing any previous handler
    /// with that name.
    pub fn register_handler(&self, handler: Arc<dyn Handler>) -> Result<(), AppError> {
        let name = handler.name().to_string();
        if name.is_empty() {
            return Err(AppError::BadHandler("handler name must not be empty".into()));
        }
        if self.registry().insert(name.clone(), handler).is_some() {
            debug!(handler = %name, "handler replaced");
        }
        Ok(())
    }

    /// Remove the handler registered under `name`. Returns whether one was
    /// present.
    pub fn unregister_handler(&self, name: &str) -> bool {
        self.registry().remove(name).is_some()
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.registry().get(name).cloned()
    }

    /// Snapshot of all registered handlers, in no particular order.
    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.registry().values().cloned().collect()
    }

    pub fn handler_count(&self) -> usize {
        self.registry().len()
    }

    pub fn enabled_handler_count(&self) -> usize {
        self.registry().values().filter(|h| h.enabled()).count()
    }

    pub fn clear_handlers(&self) {
        self.registry().clear();
    }

    /// Dispatch one message to every currently-enabled handler,
    /// concurrently. A failing handler is logged and never aborts the
    /// others.
    pub async fn process_message(&self, message: &Message) {
        let enabled: Vec<Arc<dyn Handler>> = {
            self.registry().values().filter(|h| h.enabled()).cloned().collect()
        };
        let results = join_all(enabled.iter().map(|h| h.handle(message))).await;
        for (handler, result) in enabled.iter().zip(results) {
            if let Err(e) = result {
                error!(handler = %handler.name(), "handler failed: {e}");
            }
        }
    }

    /// Dispatch a batch in timestamp order, awaiting each message before
    /// the next so delivery order equals sort order.
    pub async fn process_messages(&self, messages: &[Message]) {
        for message in sort_by_timestamp(messages) {
            self.process_message(&message).await;
        }
    }
}

/// A new vector ordered by wall time ascending; the input is untouched.
/// The sort is stable, so equal timestamps keep their input order.
pub fn sort_by_timestamp(messages: &[Message]) -> Vec<Message> {
    let mut sorted = messages.to_vec();
    sorted.sort_by(|a, b| a.wall_time.total_cmp(&b.wall_time));
    sorted
}
