//! Draft editing: a local copy of a source form, saved or discarded explicitly.

use form_state::{FormError, FormModel};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::{events::UiEvent, subscription::Subscription};

const FORM_CHANGES_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The value went out on the form-change channel.
    Emitted,
    /// The form failed validation; nothing was emitted.
    Invalid,
}

/// Stages edits in `local` against a source form supplied by the host.
///
/// Saving emits the local value as `K` on the form-change channel; the host
/// persists it and eventually updates the source, which flows back into
/// `local` through the binding.
pub struct DraftController<F: FormModel, K> {
    local: F,
    source: Option<F>,
    subscription: Option<Subscription>,
    form_changes: broadcast::Sender<K>,
}

impl<F, K> DraftController<F, K>
where
    F: FormModel,
    K: DeserializeOwned + Clone + Send + 'static,
{
    pub fn new(local: F) -> Self {
        let (form_changes, _) = broadcast::channel(FORM_CHANGES_CAPACITY);
        Self {
            local,
            source: None,
            subscription: None,
            form_changes,
        }
    }

    pub fn local_form(&self) -> &F {
        &self.local
    }

    pub fn form(&self) -> Option<&F> {
        self.source.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<K> {
        self.form_changes.subscribe()
    }

    /// Binds to `source`, replacing any previous binding. The local form is
    /// patched with the source's current value right away and again on every
    /// later source change. Must be called from within a tokio runtime.
    pub fn bind(&mut self, source: F) {
        self.release();

        let mut changes = source.value_changes();
        self.local.patch_value(&source.value());

        let local = self.local.clone();
        let tracked = source.clone();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(value) => local.patch_value(&value),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "draft source lagged; resyncing");
                        local.patch_value(&tracked.value());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.subscription = Some(Subscription::new(task));
        self.source = Some(source);
    }

    /// Stops following the source and forgets it. Safe to call when unbound.
    pub fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.source = None;
    }

    /// Discards local edits by overwriting the local form with the source value.
    pub fn cancel(&self, event: Option<&mut dyn UiEvent>) {
        if let Some(event) = event {
            event.prevent_default();
        }
        match &self.source {
            Some(source) => self.local.patch_value(&source.value()),
            None => debug!("cancel without a bound source"),
        }
    }

    pub fn save(&self) -> Result<SaveOutcome, FormError> {
        if !self.local.is_valid() {
            warn!(value = %self.local.value(), "form is invalid");
            return Ok(SaveOutcome::Invalid);
        }

        let value = serde_json::from_value::<K>(self.local.value()).map_err(FormError::Decode)?;
        self.emit(value);
        Ok(SaveOutcome::Emitted)
    }

    pub(crate) fn emit(&self, value: K) {
        let _ = self.form_changes.send(value);
    }
}

#[cfg(test)]
#[path = "tests/draft_tests.rs"]
mod tests;
