//! Live synchronization between a form and an external data stream.
//!
//! Three listeners run per activation: inbound data, outbound edits and
//! context changes. Outbound edits go through these stages, in order:
//!
//! 1. debounce: every change restarts the timer; nothing happens until it expires
//! 2. validity: an invalid form is logged and dropped
//! 3. dirtiness: a pristine form only echoes an inbound patch and is dropped
//! 4. dispatch: the previous in-flight save is aborted and the latest one runs

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use form_state::FormModel;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{config::SyncSettings, focus::FocusQuery};

pub const SAVE_DEBOUNCE_TIME: Duration = Duration::from_millis(500);

const COMPLETIONS_CAPACITY: usize = 32;

/// Host-side persistence for a live form.
#[async_trait]
pub trait SaveHandler: Send + Sync {
    async fn save(&self, value: Value) -> anyhow::Result<()>;
}

/// Result of the most recent save that was not superseded.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveCompletion {
    Saved { value: Value },
    Failed { value: Value, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSyncConfig {
    pub debounce: Duration,
}

impl Default for LiveSyncConfig {
    fn default() -> Self {
        Self {
            debounce: SAVE_DEBOUNCE_TIME,
        }
    }
}

impl From<&SyncSettings> for LiveSyncConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            debounce: settings.save_debounce(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// No data upstream; the form went back to its defaults and any
    /// collections in it were emptied.
    Reset,
    /// The form was patched; `skipped` names focused fields left alone.
    Patched { skipped: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
enum OutboundVerdict {
    Dispatch(Value),
    Invalid(Value),
    Pristine,
}

pub struct LiveSyncController<F: FormModel> {
    form: F,
    saver: Arc<dyn SaveHandler>,
    focus: Option<Arc<dyn FocusQuery>>,
    config: LiveSyncConfig,
    completions: broadcast::Sender<SaveCompletion>,
}

impl<F: FormModel> LiveSyncController<F> {
    pub fn new(form: F, saver: Arc<dyn SaveHandler>) -> Self {
        let (completions, _) = broadcast::channel(COMPLETIONS_CAPACITY);
        Self {
            form,
            saver,
            focus: None,
            config: LiveSyncConfig::default(),
            completions,
        }
    }

    pub fn with_config(mut self, config: LiveSyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_focus(mut self, focus: Arc<dyn FocusQuery>) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn form(&self) -> &F {
        &self.form
    }

    pub fn config(&self) -> &LiveSyncConfig {
        &self.config
    }

    pub fn subscribe_completions(&self) -> broadcast::Receiver<SaveCompletion> {
        self.completions.subscribe()
    }

    /// Applies one inbound emission to the form.
    ///
    /// `None` and `null` reset the form. Otherwise the value is copied,
    /// focused field names are removed from the copy, the copy is patched in
    /// and the form is marked pristine so the patch is not taken for an edit.
    pub fn apply_inbound(&self, incoming: Option<&Value>) -> InboundOutcome {
        apply_inbound(&self.form, self.focus.as_deref(), incoming)
    }

    /// Starts the inbound, outbound and context listeners. They all stop when
    /// the returned handle is deactivated or dropped.
    pub fn activate<D, C, T>(&self, data: D, contexts: C) -> LiveSyncHandle
    where
        D: Stream<Item = Option<Value>> + Send + 'static,
        C: Stream<Item = T> + Send + 'static,
        T: fmt::Debug + Send + 'static,
    {
        let (destroyed, destroyed_rx) = watch::channel(false);
        // Subscribe before spawning so no edit made right after activation is missed.
        let changes = self.form.value_changes();

        let tasks = vec![
            tokio::spawn(run_inbound(
                self.form.clone(),
                self.focus.clone(),
                data,
                destroyed_rx.clone(),
            )),
            tokio::spawn(run_outbound(
                self.form.clone(),
                Arc::clone(&self.saver),
                self.completions.clone(),
                self.config.debounce,
                changes,
                destroyed_rx.clone(),
            )),
            tokio::spawn(run_context_resets(
                self.form.clone(),
                contexts,
                destroyed_rx,
            )),
        ];

        info!(
            debounce_ms = self.config.debounce.as_millis() as u64,
            "live sync activated"
        );
        LiveSyncHandle { destroyed, tasks }
    }
}

/// Keeps a live sync activation running. Deactivation is permanent.
#[derive(Debug)]
pub struct LiveSyncHandle {
    destroyed: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveSyncHandle {
    pub fn is_active(&self) -> bool {
        !*self.destroyed.borrow()
    }

    pub fn deactivate(&mut self) {
        if self.destroyed.send_replace(true) {
            return;
        }
        for task in &self.tasks {
            task.abort();
        }
        info!("live sync deactivated");
    }
}

impl Drop for LiveSyncHandle {
    fn drop(&mut self) {
        self.deactivate();
    }
}

fn apply_inbound<F: FormModel>(
    form: &F,
    focus: Option<&dyn FocusQuery>,
    incoming: Option<&Value>,
) -> InboundOutcome {
    let Some(incoming) = incoming.filter(|value| !value.is_null()) else {
        form.reset();
        debug!("inbound data absent; form reset");
        return InboundOutcome::Reset;
    };

    let mut patch = incoming.clone();
    let mut skipped = Vec::new();
    if let (Some(focus), Value::Object(fields)) = (focus, &mut patch) {
        for name in focus.focused_names() {
            if fields.remove(&name).is_some() {
                skipped.push(name);
            }
        }
    }

    form.patch_value(&patch);
    form.mark_as_pristine();
    debug!(?skipped, "inbound data patched");
    InboundOutcome::Patched { skipped }
}

fn evaluate<F: FormModel>(form: &F) -> OutboundVerdict {
    if !form.is_valid() {
        return OutboundVerdict::Invalid(form.value());
    }
    if !form.is_dirty() {
        return OutboundVerdict::Pristine;
    }
    OutboundVerdict::Dispatch(form.value())
}

async fn run_inbound<F, D>(
    form: F,
    focus: Option<Arc<dyn FocusQuery>>,
    data: D,
    mut destroyed: watch::Receiver<bool>,
) where
    F: FormModel,
    D: Stream<Item = Option<Value>> + Send + 'static,
{
    tokio::pin!(data);
    loop {
        tokio::select! {
            biased;
            _ = destroyed.changed() => break,
            next = data.next() => {
                let Some(incoming) = next else {
                    break;
                };
                if *destroyed.borrow() {
                    break;
                }
                apply_inbound(&form, focus.as_deref(), incoming.as_ref());
            }
        }
    }
}

async fn run_outbound<F: FormModel>(
    form: F,
    saver: Arc<dyn SaveHandler>,
    completions: broadcast::Sender<SaveCompletion>,
    debounce: Duration,
    mut changes: broadcast::Receiver<Value>,
    mut destroyed: watch::Receiver<bool>,
) {
    let mut deadline: Option<Instant> = None;
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            _ = destroyed.changed() => break,
            received = changes.recv() => match received {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    deadline = Some(Instant::now() + debounce);
                }
                Err(RecvError::Closed) => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if *destroyed.borrow() {
                    break;
                }
                match evaluate(&form) {
                    OutboundVerdict::Dispatch(value) => {
                        if let Some(previous) = in_flight.take() {
                            previous.abort();
                        }
                        debug!("dispatching save");
                        in_flight = Some(tokio::spawn(run_save(
                            Arc::clone(&saver),
                            completions.clone(),
                            value,
                            destroyed.clone(),
                        )));
                    }
                    OutboundVerdict::Invalid(value) => {
                        warn!(%value, "form is invalid; save skipped");
                    }
                    OutboundVerdict::Pristine => {
                        debug!("form is pristine; save skipped");
                    }
                }
            }
        }
    }
}

async fn run_save(
    saver: Arc<dyn SaveHandler>,
    completions: broadcast::Sender<SaveCompletion>,
    value: Value,
    destroyed: watch::Receiver<bool>,
) {
    let result = saver.save(value.clone()).await;
    if *destroyed.borrow() {
        return;
    }
    let completion = match result {
        Ok(()) => SaveCompletion::Saved { value },
        Err(err) => SaveCompletion::Failed {
            value,
            message: format!("{err:#}"),
        },
    };
    let _ = completions.send(completion);
}

async fn run_context_resets<F, C, T>(form: F, contexts: C, mut destroyed: watch::Receiver<bool>)
where
    F: FormModel,
    C: Stream<Item = T> + Send + 'static,
    T: fmt::Debug + Send + 'static,
{
    tokio::pin!(contexts);
    loop {
        tokio::select! {
            biased;
            _ = destroyed.changed() => break,
            next = contexts.next() => {
                let Some(context) = next else {
                    break;
                };
                if *destroyed.borrow() {
                    break;
                }
                form.reset();
                debug!(?context, "context changed; form reset");
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/live_tests.rs"]
mod tests;
