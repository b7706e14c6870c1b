use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use form_state::{DynamicCollection, FormNode, ValidationCode, ValidationError};
use form_sync::{
    load_settings, load_settings_from, FocusRegistry, IndexedDraftController, LiveSyncConfig,
    LiveSyncController, SaveCompletion, SaveHandler, SyncSettings,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::info;

#[derive(Parser, Debug)]
struct Cli {
    /// Settings file; defaults to ./form_sync.toml when present.
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    debounce_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Edit a settings record that saves itself after each pause in typing.
    Live,
    /// Add, save and delete fee rows through a draft list.
    Rows,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Fee {
    label: String,
    cents: u32,
}

/// Stands in for an API plus the store that re-publishes saved records.
struct MemoryStore {
    saves: Mutex<u32>,
    updates: broadcast::Sender<Option<Value>>,
}

impl MemoryStore {
    fn new() -> Arc<Self> {
        let (updates, _) = broadcast::channel(16);
        Arc::new(Self {
            saves: Mutex::new(0),
            updates,
        })
    }

    fn publish(&self, record: Option<Value>) {
        let _ = self.updates.send(record);
    }
}

#[async_trait]
impl SaveHandler for MemoryStore {
    async fn save(&self, value: Value) -> Result<()> {
        *self.saves.lock().await += 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        info!(%value, "store persisted record");
        self.publish(Some(value));
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = match &cli.settings {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    if let Some(debounce_ms) = cli.debounce_ms {
        settings.save_debounce_ms = debounce_ms;
    }

    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .init();

    match cli.command {
        Command::Live => run_live(&settings).await,
        Command::Rows => run_rows().await,
    }
}

fn profile_form() -> FormNode {
    let name = FormNode::control(json!("")).with_validator(|value| {
        value
            .as_str()
            .is_some_and(str::is_empty)
            .then(|| ValidationError::new(ValidationCode::Required, "name is required"))
    });
    FormNode::group([
        ("name", name),
        ("greeting", FormNode::control(json!(""))),
        ("enabled", FormNode::control(json!(false))),
    ])
}

async fn run_live(settings: &SyncSettings) -> Result<()> {
    let store = MemoryStore::new();
    let focus = FocusRegistry::new();
    let form = profile_form();
    let (contexts, contexts_rx) = broadcast::channel::<i64>(4);

    let controller = LiveSyncController::new(form.clone(), store.clone())
        .with_config(LiveSyncConfig::from(settings))
        .with_focus(Arc::new(focus.clone()));
    let mut completions = controller.subscribe_completions();
    let data = BroadcastStream::new(store.updates.subscribe()).filter_map(Result::ok);
    let context_changes = BroadcastStream::new(contexts_rx).filter_map(Result::ok);
    let mut handle = controller.activate(data, context_changes);

    let debounce = settings.save_debounce();
    let pause = || tokio::time::sleep(debounce * 2);

    store.publish(Some(json!({ "name": "Front desk", "greeting": "Hi!", "enabled": true })));
    pause().await;
    println!("loaded:        {}", form.value());

    focus.focus("greeting");
    form.get("greeting")
        .context("greeting field")?
        .set_value(json!("Hello there"));
    store.publish(Some(json!({ "name": "Lobby", "greeting": "Hi!", "enabled": true })));
    pause().await;
    focus.blur("greeting");
    println!("while typing:  {}", form.value());

    form.get("enabled")
        .context("enabled field")?
        .set_value(json!(false));
    pause().await;
    println!("after save:    {}", form.value());

    form.get("name").context("name field")?.set_value(json!(""));
    pause().await;
    println!("invalid edit:  {} (valid={})", form.value(), form.is_valid());

    let _ = contexts.send(2);
    pause().await;
    println!("new context:   {}", form.value());

    handle.deactivate();

    while let Ok(completion) = completions.try_recv() {
        match completion {
            SaveCompletion::Saved { value } => println!("saved:         {value}"),
            SaveCompletion::Failed { value, message } => {
                println!("save failed:   {value} ({message})")
            }
        }
    }
    println!("store saves:   {}", *store.saves.lock().await);
    Ok(())
}

async fn run_rows() -> Result<()> {
    let source = DynamicCollection::new();
    source.reconcile_from(&[
        Fee {
            label: "pet".into(),
            cents: 2500,
        },
        Fee {
            label: "parking".into(),
            cents: 4000,
        },
    ])?;

    let mut rows: IndexedDraftController<Fee> = IndexedDraftController::new(DynamicCollection::new());
    rows.bind(source.clone());
    let mut changes = rows.subscribe();
    println!("rows:          {}", rows.local_form().node().value());

    let index = rows.add_control();
    let row = rows.local_form().at(index).context("new row")?;
    row.set_value(json!({ "label": "storage", "cents": 1500 }));
    rows.save_at(index, &row)?;
    persist(&source, &mut changes).await?;
    println!("after add:     {}", rows.local_form().node().value());

    rows.local_form()
        .at(0)
        .context("first row")?
        .set_value(json!({ "label": "pet", "cents": 9900 }));
    rows.cancel_at(None, 0);
    println!("after cancel:  {}", rows.local_form().node().value());

    rows.confirm_delete(None, 1).await?;
    persist(&source, &mut changes).await?;
    println!("after delete:  {}", rows.local_form().node().value());
    Ok(())
}

/// Applies the next emitted list to the source, as a host would after its
/// API call succeeds.
async fn persist(
    source: &DynamicCollection,
    changes: &mut broadcast::Receiver<Vec<Fee>>,
) -> Result<()> {
    let fees = changes.recv().await.context("no rows emitted")?;
    source.reconcile_from(&fees)?;
    tokio::time::sleep(Duration::from_millis(1)).await;
    Ok(())
}
