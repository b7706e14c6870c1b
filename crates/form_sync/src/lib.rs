//! Controllers that keep in-memory form state in step with external data.
//!
//! - [`live::LiveSyncController`] pushes external data into a form and saves
//!   debounced edits back out.
//! - [`draft::DraftController`] stages a local copy of a form for explicit
//!   save or cancel.
//! - [`indexed::IndexedDraftController`] adds per-row save, cancel, delete and
//!   add on top of dynamic collections.

pub mod config;
pub mod draft;
pub mod events;
pub mod focus;
pub mod indexed;
pub mod live;
mod subscription;

pub use config::{load_settings, load_settings_from, SyncSettings};
pub use draft::{DraftController, SaveOutcome};
pub use events::{ActionEvent, UiEvent};
pub use focus::{FieldFocus, FocusQuery, FocusRegistry};
pub use indexed::{
    AutoConfirm, CancelAtOutcome, DeleteConfirmation, DeleteOutcome, IndexedDraftController,
};
pub use live::{
    InboundOutcome, LiveSyncConfig, LiveSyncController, LiveSyncHandle, SaveCompletion,
    SaveHandler, SAVE_DEBOUNCE_TIME,
};
pub use subscription::Subscription;
