//! Row-level draft editing over dynamic collections.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use form_state::{DynamicCollection, FormError, FormNode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    draft::{DraftController, SaveOutcome},
    events::UiEvent,
};

/// Asked before a persisted row is deleted.
#[async_trait]
pub trait DeleteConfirmation: Send + Sync {
    async fn confirm(&self, index: usize) -> bool;
}

pub struct AutoConfirm;

#[async_trait]
impl DeleteConfirmation for AutoConfirm {
    async fn confirm(&self, _index: usize) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAtOutcome {
    /// The row never existed in the source and was dropped locally.
    RemovedLocal,
    /// The local row was rebuilt from the source row.
    Replaced,
    /// The local row already matched the source row.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    RemovedLocal,
    Emitted,
    Declined,
}

/// Draft controller for repeatable rows. Row saves and deletes emit the full
/// updated list as `Vec<K>`.
pub struct IndexedDraftController<K> {
    draft: DraftController<DynamicCollection, Vec<K>>,
    confirmation: Arc<dyn DeleteConfirmation>,
    active_index: Option<usize>,
}

impl<K> IndexedDraftController<K>
where
    K: DeserializeOwned + Clone + Send + 'static,
{
    pub fn new(local: DynamicCollection) -> Self {
        Self {
            draft: DraftController::new(local),
            confirmation: Arc::new(AutoConfirm),
            active_index: None,
        }
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn DeleteConfirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn bind(&mut self, source: DynamicCollection) {
        self.draft.bind(source);
    }

    pub fn release(&mut self) {
        self.draft.release();
    }

    pub fn local_form(&self) -> &DynamicCollection {
        self.draft.local_form()
    }

    pub fn form(&self) -> Option<&DynamicCollection> {
        self.draft.form()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<K>> {
        self.draft.subscribe()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    pub fn clear_active_index(&mut self) {
        self.active_index = None;
    }

    pub fn cancel(&self, event: Option<&mut dyn UiEvent>) {
        self.draft.cancel(event);
    }

    pub fn save(&self) -> Result<SaveOutcome, FormError> {
        self.draft.save()
    }

    /// Reverts the local row at `index` to the source row.
    pub fn cancel_at(&self, event: Option<&mut dyn UiEvent>, index: usize) -> CancelAtOutcome {
        if let Some(event) = event {
            event.prevent_default();
        }

        let local = self.draft.local_form();
        let Some(entry) = self.draft.form().and_then(|source| source.at(index)) else {
            local.remove_at(index);
            debug!(index, "cancelled unsaved row");
            return CancelAtOutcome::RemovedLocal;
        };

        let persisted = entry.value();
        // Rebuilding an unchanged row would redraw it for nothing.
        if local
            .at(index)
            .is_some_and(|current| current.value() == persisted)
        {
            return CancelAtOutcome::Unchanged;
        }

        let child = local.create_child(Some(&persisted));
        if local.replace_at(index, child.clone()).is_err() {
            local.insert(index, child);
        }
        CancelAtOutcome::Replaced
    }

    /// Emits the source list with `control`'s value stored at `index`, or
    /// appended when the source has no row there yet.
    pub fn save_at(&self, index: usize, control: &FormNode) -> Result<SaveOutcome, FormError> {
        if control.is_invalid() {
            warn!(index, value = %control.value(), "form is not valid");
            return Ok(SaveOutcome::Invalid);
        }

        let mut values = self.source_values();
        match values.get_mut(index) {
            Some(slot) => *slot = control.value(),
            None => values.push(control.value()),
        }

        self.emit(values)?;
        Ok(SaveOutcome::Emitted)
    }

    /// Deletes the row at `index`. Unsaved rows go away locally without
    /// confirmation; persisted rows are confirmed first and then emitted as
    /// the source list without that row.
    ///
    /// The event is handled before this returns; the future does not hold it.
    pub fn confirm_delete(
        &self,
        event: Option<&mut dyn UiEvent>,
        index: usize,
    ) -> impl Future<Output = Result<DeleteOutcome, FormError>> + Send + '_ {
        if let Some(event) = event {
            event.prevent_default();
            event.stop_propagation();
        }
        self.delete_row(index)
    }

    async fn delete_row(&self, index: usize) -> Result<DeleteOutcome, FormError> {
        let persisted = self
            .draft
            .form()
            .is_some_and(|source| source.at(index).is_some());
        if !persisted {
            self.draft.local_form().remove_at(index);
            debug!(index, "deleted unsaved row");
            return Ok(DeleteOutcome::RemovedLocal);
        }

        if !self.confirmation.confirm(index).await {
            debug!(index, "row deletion declined");
            return Ok(DeleteOutcome::Declined);
        }

        let mut values = self.source_values();
        if index < values.len() {
            values.remove(index);
        }
        self.emit(values)?;
        Ok(DeleteOutcome::Emitted)
    }

    /// Appends a blank row and marks it active.
    pub fn add_control(&mut self) -> usize {
        let index = self.draft.local_form().append(None);
        self.active_index = Some(index);
        index
    }

    fn source_values(&self) -> Vec<Value> {
        self.draft
            .form()
            .map(DynamicCollection::values)
            .unwrap_or_default()
    }

    fn emit(&self, values: Vec<Value>) -> Result<(), FormError> {
        let rows = serde_json::from_value::<Vec<K>>(Value::Array(values))
            .map_err(FormError::Decode)?;
        self.draft.emit(rows);
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/indexed_tests.rs"]
mod tests;
