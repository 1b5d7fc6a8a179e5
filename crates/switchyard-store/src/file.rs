use crate::memory::{InMemoryStore, Tables};
use crate::store::DurableStore;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use switchyard_core::{
    ActivityEntry, Event, Handoff, RetryCounters, ReviewItem, ReviewResponse, SwitchyardError,
    SwitchyardResult, Task, TaskState,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const EVENTS_FILE: &str = "events.jsonl";
const ACTIVITY_FILE: &str = "activity.jsonl";

/// File-backed store under a data directory:
///
/// ```text
/// <dir>/tasks/<id>.json
/// <dir>/handoffs/<id>.json
/// <dir>/reviews/<id>.json
/// <dir>/events.jsonl
/// <dir>/activity.jsonl
/// ```
///
/// Everything is loaded into memory on open; every write goes through to disk
/// before returning. Writes are serialized so a compare-and-set and its file
/// write cannot interleave with another writer.
///
/// A write that fails on disk is undone in memory, so the cache never shows a
/// record the next open would not load.
pub struct FileStore {
    dir: PathBuf,
    cache: InMemoryStore,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (or create) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> SwitchyardResult<Self> {
        let dir = dir.into();
        for sub in ["tasks", "handoffs", "reviews"] {
            tokio::fs::create_dir_all(dir.join(sub)).await?;
        }

        let tables = Tables {
            tasks: load_records::<Task>(&dir.join("tasks"))
                .await?
                .into_iter()
                .map(|t| (t.id, t))
                .collect(),
            handoffs: load_records::<Handoff>(&dir.join("handoffs"))
                .await?
                .into_iter()
                .map(|h| (h.id, h))
                .collect(),
            reviews: load_records::<ReviewItem>(&dir.join("reviews"))
                .await?
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
            events: load_lines(&dir.join(EVENTS_FILE)).await?,
            activity: load_lines(&dir.join(ACTIVITY_FILE)).await?,
        };
        info!(
            dir = %dir.display(),
            tasks = tables.tasks.len(),
            events = tables.events.len(),
            reviews = tables.reviews.len(),
            "Opened file store"
        );

        Ok(Self {
            dir,
            cache: InMemoryStore::from_tables(tables),
            write_lock: Mutex::new(()),
        })
    }

    /// The data directory this store was opened on.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, table: &str, id: Uuid) -> PathBuf {
        self.dir.join(table).join(format!("{id}.json"))
    }

    async fn write_record<T: Serialize>(&self, table: &str, id: Uuid, record: &T) -> SwitchyardResult<()> {
        let path = self.record_path(table, id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = %path.display(), "Wrote record");
        Ok(())
    }

    async fn append_line<T: Serialize>(&self, file: &str, record: &T) -> SwitchyardResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }
}

async fn load_records<T: DeserializeOwned>(dir: &Path) -> SwitchyardResult<Vec<T>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut records = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let record = serde_json::from_str(&data).map_err(|e| {
            SwitchyardError::Store(format!("Failed to parse {}: {e}", path.display()))
        })?;
        records.push(record);
    }
    Ok(records)
}

async fn load_lines<T: DeserializeOwned>(path: &Path) -> SwitchyardResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = tokio::fs::read_to_string(path).await?;
    let mut records = Vec::new();
    for (n, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| {
            SwitchyardError::Store(format!("Invalid line {} in {}: {e}", n + 1, path.display()))
        })?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl DurableStore for FileStore {
    async fn create_task(&self, task: &Task) -> SwitchyardResult<()> {
        let _guard = self.write_lock.lock().await;
        self.cache.create_task(task).await?;
        if let Err(e) = self.write_record("tasks", task.id, task).await {
            self.cache.restore_task(task.id, None).await;
            return Err(e);
        }
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> SwitchyardResult<Option<Task>> {
        self.cache.get_task(id).await
    }

    async fn update_task_state(
        &self,
        id: Uuid,
        expected: TaskState,
        next: TaskState,
    ) -> SwitchyardResult<Task> {
        let _guard = self.write_lock.lock().await;
        let previous = self.cache.get_task(id).await?;
        let task = self.cache.update_task_state(id, expected, next).await?;
        if let Err(e) = self.write_record("tasks", id, &task).await {
            self.cache.restore_task(id, previous).await;
            return Err(e);
        }
        Ok(task)
    }

    async fn update_task(
        &self,
        id: Uuid,
        retries: RetryCounters,
        risk_score: Option<u32>,
    ) -> SwitchyardResult<Task> {
        let _guard = self.write_lock.lock().await;
        let previous = self.cache.get_task(id).await?;
        let task = self.cache.update_task(id, retries, risk_score).await?;
        if let Err(e) = self.write_record("tasks", id, &task).await {
            self.cache.restore_task(id, previous).await;
            return Err(e);
        }
        Ok(task)
    }

    async fn list_tasks(&self) -> SwitchyardResult<Vec<Task>> {
        self.cache.list_tasks().await
    }

    async fn append_event(&self, event: &Event) -> SwitchyardResult<()> {
        let _guard = self.write_lock.lock().await;
        self.append_line(EVENTS_FILE, event).await?;
        self.cache.append_event(event).await
    }

    async fn list_events(&self, trace_id: Uuid) -> SwitchyardResult<Vec<Event>> {
        self.cache.list_events(trace_id).await
    }

    async fn all_events(&self) -> SwitchyardResult<Vec<Event>> {
        self.cache.all_events().await
    }

    async fn create_handoff(&self, handoff: &Handoff) -> SwitchyardResult<()> {
        let _guard = self.write_lock.lock().await;
        self.cache.create_handoff(handoff).await?;
        if let Err(e) = self.write_record("handoffs", handoff.id, handoff).await {
            self.cache.restore_handoff(handoff.id, None).await;
            return Err(e);
        }
        Ok(())
    }

    async fn update_handoff(&self, handoff: &Handoff) -> SwitchyardResult<()> {
        let _guard = self.write_lock.lock().await;
        let previous = self.cache.get_handoff(handoff.id).await?;
        self.cache.update_handoff(handoff).await?;
        if let Err(e) = self.write_record("handoffs", handoff.id, handoff).await {
            self.cache.restore_handoff(handoff.id, previous).await;
            return Err(e);
        }
        Ok(())
    }

    async fn get_handoff(&self, id: Uuid) -> SwitchyardResult<Option<Handoff>> {
        self.cache.get_handoff(id).await
    }

    async fn list_handoffs(&self) -> SwitchyardResult<Vec<Handoff>> {
        self.cache.list_handoffs().await
    }

    async fn append_activity(&self, entry: &ActivityEntry) -> SwitchyardResult<()> {
        let _guard = self.write_lock.lock().await;
        self.append_line(ACTIVITY_FILE, entry).await?;
        self.cache.append_activity(entry).await
    }

    async fn list_activity(&self) -> SwitchyardResult<Vec<ActivityEntry>> {
        self.cache.list_activity().await
    }

    async fn create_review(&self, item: &ReviewItem) -> SwitchyardResult<()> {
        let _guard = self.write_lock.lock().await;
        self.cache.create_review(item).await?;
        if let Err(e) = self.write_record("reviews", item.id, item).await {
            self.cache.restore_review(item.id, None).await;
            return Err(e);
        }
        Ok(())
    }

    async fn get_review(&self, id: Uuid) -> SwitchyardResult<Option<ReviewItem>> {
        self.cache.get_review(id).await
    }

    async fn resolve_review(
        &self,
        id: Uuid,
        response: ReviewResponse,
    ) -> SwitchyardResult<ReviewItem> {
        let _guard = self.write_lock.lock().await;
        let previous = self.cache.get_review(id).await?;
        let item = self.cache.resolve_review(id, response).await?;
        if let Err(e) = self.write_record("reviews", id, &item).await {
            self.cache.restore_review(id, previous).await;
            return Err(e);
        }
        Ok(item)
    }

    async fn list_reviews(&self, pending_only: bool) -> SwitchyardResult<Vec<ReviewItem>> {
        self.cache.list_reviews(pending_only).await
    }
}
