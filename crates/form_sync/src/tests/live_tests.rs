use super::*;
use crate::focus::FocusRegistry;
use anyhow::anyhow;
use form_state::{DynamicCollection, FormNode, ValidationError};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Default)]
struct RecordingSaver {
    started: Mutex<Vec<Value>>,
    delay: Duration,
    fail_with: Option<String>,
}

impl RecordingSaver {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing(err: impl Into<String>) -> Self {
        Self {
            fail_with: Some(err.into()),
            ..Self::default()
        }
    }

    async fn started(&self) -> Vec<Value> {
        self.started.lock().await.clone()
    }
}

#[async_trait]
impl SaveHandler for RecordingSaver {
    async fn save(&self, value: Value) -> anyhow::Result<()> {
        self.started.lock().await.push(value);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(())
    }
}

struct Harness {
    form: FormNode,
    saver: Arc<RecordingSaver>,
    data: mpsc::UnboundedSender<Option<Value>>,
    contexts: mpsc::UnboundedSender<i64>,
    completions: broadcast::Receiver<SaveCompletion>,
    handle: LiveSyncHandle,
}

fn settings_form() -> FormNode {
    FormNode::group([
        ("foo", FormNode::control(json!(false))),
        ("bar", FormNode::control(json!(false))),
    ])
}

fn start(form: FormNode, saver: RecordingSaver, focus: Option<FocusRegistry>) -> Harness {
    let saver = Arc::new(saver);
    let mut controller = LiveSyncController::new(form.clone(), saver.clone());
    if let Some(focus) = focus {
        controller = controller.with_focus(Arc::new(focus));
    }
    let (data, data_rx) = mpsc::unbounded_channel();
    let (contexts, contexts_rx) = mpsc::unbounded_channel();
    let completions = controller.subscribe_completions();
    let handle = controller.activate(
        UnboundedReceiverStream::new(data_rx),
        UnboundedReceiverStream::new(contexts_rx),
    );
    Harness {
        form,
        saver,
        data,
        contexts,
        completions,
        handle,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[test]
fn absent_data_resets_without_patching() {
    let form = settings_form();
    form.patch_value(&json!({ "foo": true }));
    let controller = LiveSyncController::new(form.clone(), Arc::new(RecordingSaver::default()));

    assert_eq!(controller.apply_inbound(None), InboundOutcome::Reset);
    assert_eq!(form.value(), json!({ "foo": false, "bar": false }));
    assert!(form.is_pristine());

    form.patch_value(&json!({ "bar": true }));
    assert_eq!(controller.apply_inbound(Some(&json!(null))), InboundOutcome::Reset);
    assert_eq!(form.value(), json!({ "foo": false, "bar": false }));
}

#[test]
fn inbound_patch_leaves_form_pristine() {
    let form = settings_form();
    let controller = LiveSyncController::new(form.clone(), Arc::new(RecordingSaver::default()));
    let incoming = json!({ "foo": true, "bar": true });

    let outcome = controller.apply_inbound(Some(&incoming));

    assert_eq!(outcome, InboundOutcome::Patched { skipped: Vec::new() });
    assert_eq!(form.value(), incoming);
    assert!(form.is_pristine());
}

#[test]
fn focused_fields_are_not_overwritten() {
    let form = settings_form();
    let focus = FocusRegistry::new();
    focus.register("bar");
    focus.focus("foo");
    let controller = LiveSyncController::new(form.clone(), Arc::new(RecordingSaver::default()))
        .with_focus(Arc::new(focus));

    let outcome = controller.apply_inbound(Some(&json!({ "foo": true, "bar": true })));

    assert_eq!(
        outcome,
        InboundOutcome::Patched {
            skipped: vec!["foo".to_string()]
        }
    );
    assert_eq!(form.value(), json!({ "foo": false, "bar": true }));
    assert!(form.is_pristine());
}

#[test]
fn blurred_fields_are_patched_again() {
    let form = settings_form();
    let focus = FocusRegistry::new();
    focus.focus("foo");
    focus.blur("foo");
    let controller = LiveSyncController::new(form.clone(), Arc::new(RecordingSaver::default()))
        .with_focus(Arc::new(focus));

    controller.apply_inbound(Some(&json!({ "foo": true })));
    assert_eq!(form.value(), json!({ "foo": true, "bar": false }));
}

#[test]
fn config_follows_settings() {
    let settings = SyncSettings {
        save_debounce_ms: 750,
        ..SyncSettings::default()
    };
    assert_eq!(
        LiveSyncConfig::from(&settings).debounce,
        Duration::from_millis(750)
    );
    assert_eq!(LiveSyncConfig::default().debounce, SAVE_DEBOUNCE_TIME);
}

#[tokio::test(start_paused = true)]
async fn streamed_data_is_applied() {
    let harness = start(settings_form(), RecordingSaver::default(), None);

    harness
        .data
        .send(Some(json!({ "foo": true, "bar": true })))
        .expect("send");
    settle().await;

    assert_eq!(harness.form.value(), json!({ "foo": true, "bar": true }));
    assert!(harness.form.is_pristine());
}

#[tokio::test(start_paused = true)]
async fn inbound_echo_does_not_trigger_save() {
    let harness = start(settings_form(), RecordingSaver::default(), None);

    harness
        .data
        .send(Some(json!({ "foo": true })))
        .expect("send");
    tokio::time::sleep(SAVE_DEBOUNCE_TIME * 2).await;

    assert!(harness.saver.started().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn edit_saves_once_after_debounce() {
    let harness = start(settings_form(), RecordingSaver::default(), None);

    harness.form.get("foo").expect("foo").set_value(json!(true));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(harness.saver.started().await.is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        harness.saver.started().await,
        vec![json!({ "foo": true, "bar": false })]
    );
}

#[tokio::test(start_paused = true)]
async fn edit_bursts_coalesce_into_one_save() {
    let harness = start(settings_form(), RecordingSaver::default(), None);
    let foo = harness.form.get("foo").expect("foo");
    let bar = harness.form.get("bar").expect("bar");

    foo.set_value(json!(true));
    tokio::time::sleep(Duration::from_millis(300)).await;
    bar.set_value(json!(true));
    tokio::time::sleep(Duration::from_millis(300)).await;
    foo.set_value(json!(false));
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(
        harness.saver.started().await,
        vec![json!({ "foo": false, "bar": true })]
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_form_is_not_saved() {
    let form = settings_form();
    form.add_validator(|value| {
        (value["foo"] == json!(true)).then(|| ValidationError::rejected("foo cannot be enabled"))
    });
    let harness = start(form, RecordingSaver::default(), None);

    harness.form.get("foo").expect("foo").set_value(json!(true));
    tokio::time::sleep(SAVE_DEBOUNCE_TIME * 2).await;

    assert!(harness.saver.started().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn context_change_resets_dirty_form() {
    let harness = start(settings_form(), RecordingSaver::default(), None);
    harness.form.get("bar").expect("bar").set_value(json!(true));
    assert!(harness.form.is_dirty());

    harness.contexts.send(42).expect("send");
    settle().await;

    assert_eq!(harness.form.value(), json!({ "foo": false, "bar": false }));
    assert!(harness.form.is_pristine());

    tokio::time::sleep(SAVE_DEBOUNCE_TIME * 2).await;
    assert!(harness.saver.started().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn newer_save_supersedes_in_flight_one() {
    let mut harness = start(
        settings_form(),
        RecordingSaver::slow(Duration::from_secs(2)),
        None,
    );
    let foo = harness.form.get("foo").expect("foo");

    foo.set_value(json!(true));
    tokio::time::sleep(Duration::from_millis(600)).await;
    foo.set_value(json!(false));
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(harness.saver.started().await.len(), 2);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        harness.completions.try_recv().expect("completion"),
        SaveCompletion::Saved {
            value: json!({ "foo": false, "bar": false })
        }
    );
    assert!(harness.completions.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn failed_save_is_reported_not_retried() {
    let mut harness = start(settings_form(), RecordingSaver::failing("api down"), None);

    harness.form.get("foo").expect("foo").set_value(json!(true));
    tokio::time::sleep(SAVE_DEBOUNCE_TIME * 4).await;

    assert_eq!(harness.saver.started().await.len(), 1);
    assert_eq!(
        harness.completions.try_recv().expect("completion"),
        SaveCompletion::Failed {
            value: json!({ "foo": true, "bar": false }),
            message: "api down".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn deactivation_stops_every_listener() {
    let mut harness = start(settings_form(), RecordingSaver::default(), None);
    assert!(harness.handle.is_active());

    harness.handle.deactivate();
    harness.handle.deactivate();
    assert!(!harness.handle.is_active());

    let _ = harness.data.send(Some(json!({ "foo": true, "bar": true })));
    let _ = harness.contexts.send(7);
    harness.form.get("bar").expect("bar").set_value(json!(true));
    tokio::time::sleep(SAVE_DEBOUNCE_TIME * 2).await;

    assert_eq!(harness.form.value(), json!({ "foo": false, "bar": true }));
    assert!(harness.form.is_dirty());
    assert!(harness.saver.started().await.is_empty());
}

fn order_form(fees: &DynamicCollection) -> FormNode {
    FormNode::group([
        ("name", FormNode::control(json!(""))),
        ("fees", fees.node().clone()),
    ])
}

#[test]
fn absent_data_empties_a_collection_form() {
    let rows = DynamicCollection::new();
    let controller = LiveSyncController::new(rows.clone(), Arc::new(RecordingSaver::default()));

    controller.apply_inbound(Some(&json!(["ctx1-a", "ctx1-b"])));
    assert_eq!(rows.values(), vec![json!("ctx1-a"), json!("ctx1-b")]);
    assert!(rows.node().is_pristine());

    assert_eq!(controller.apply_inbound(None), InboundOutcome::Reset);
    assert_eq!(rows.node().value(), json!([]));
}

#[tokio::test(start_paused = true)]
async fn context_change_empties_a_collection_form() {
    let rows = DynamicCollection::new();
    let saver = Arc::new(RecordingSaver::default());
    let controller = LiveSyncController::new(rows.clone(), saver.clone());
    let (data, data_rx) = mpsc::unbounded_channel();
    let (contexts, contexts_rx) = mpsc::unbounded_channel::<i64>();
    let _handle = controller.activate(
        UnboundedReceiverStream::new(data_rx),
        UnboundedReceiverStream::new(contexts_rx),
    );

    data.send(Some(json!(["ctx1-a", "ctx1-b"]))).expect("send");
    settle().await;
    assert_eq!(rows.len(), 2);

    contexts.send(2).expect("send");
    settle().await;
    assert!(rows.is_empty());

    tokio::time::sleep(SAVE_DEBOUNCE_TIME * 2).await;
    assert!(saver.started().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn nested_collection_follows_inbound_rows() {
    let fees = DynamicCollection::new();
    let harness = start(order_form(&fees), RecordingSaver::default(), None);

    harness
        .data
        .send(Some(json!({ "name": "x", "fees": ["a", "b", "c"] })))
        .expect("send");
    settle().await;
    assert_eq!(
        harness.form.value(),
        json!({ "name": "x", "fees": ["a", "b", "c"] })
    );
    assert!(harness.form.is_pristine());

    harness
        .data
        .send(Some(json!({ "name": "x", "fees": ["a"] })))
        .expect("send");
    settle().await;
    assert_eq!(fees.values(), vec![json!("a")]);

    fees.at(0).expect("row").set_value(json!("a2"));
    tokio::time::sleep(SAVE_DEBOUNCE_TIME * 2).await;
    assert_eq!(
        harness.saver.started().await,
        vec![json!({ "name": "x", "fees": ["a2"] })]
    );

    harness.contexts.send(3).expect("send");
    settle().await;
    assert_eq!(harness.form.value(), json!({ "name": "", "fees": [] }));
}
