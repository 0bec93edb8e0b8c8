// Task store: the single owner of the to-do list and its persistence

use crate::filter::{TaskCounts, TaskFilter};
use crate::storage::Storage;
use crate::task::{Priority, Task, clean_related_sites};
use eyre::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

/// Storage key the dashboard has always kept its list under
pub const DEFAULT_KEY: &str = "todos";

/// A save that did not make it to storage
///
/// The in-memory list is still authoritative; the next mutation saves the
/// whole list again.
#[derive(Debug)]
pub struct PersistWarning(eyre::Report);

impl PersistWarning {
    pub fn error(&self) -> &eyre::Report {
        &self.0
    }
}

impl fmt::Display for PersistWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

/// Result of a mutating call
#[derive(Debug, Default)]
#[must_use]
pub struct Outcome {
    /// False when the call was a no-op (blank text, unknown id, nothing to do)
    pub changed: bool,
    /// Id of the task created by `add`
    pub id: Option<String>,
    /// Set when the list changed but could not be saved
    pub warning: Option<PersistWarning>,
}

impl Outcome {
    fn unchanged() -> Self {
        Self::default()
    }

    /// True unless a save was attempted and failed
    pub fn is_persisted(&self) -> bool {
        self.warning.is_none()
    }
}

/// Ordered, persisted task list
///
/// Order in `tasks` is the display order. Every mutation that changes the
/// list writes the full list back under `key`.
pub struct TaskStore<S: Storage> {
    storage: S,
    key: String,
    tasks: Vec<Task>,
}

impl<S: Storage> TaskStore<S> {
    /// Load the list stored under [`DEFAULT_KEY`]
    ///
    /// Missing, unreadable or malformed data gives an empty list. This never fails.
    pub fn load(storage: S) -> Self {
        Self::load_with_key(storage, DEFAULT_KEY)
    }

    /// Load the list stored under `key`
    pub fn load_with_key(storage: S, key: &str) -> Self {
        let tasks = match storage.read(key) {
            Ok(Some(raw)) => parse_tasks(key, &raw),
            Ok(None) => {
                debug!(key, "No stored tasks, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!(key, error = ?e, "Failed to read stored tasks, starting empty");
                Vec::new()
            }
        };

        info!(key, count = tasks.len(), "Loaded tasks");

        Self {
            storage,
            key: key.to_string(),
            tasks,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All tasks in display order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Tasks matching `filter`, in display order
    ///
    /// Computed fresh from the list on every call and never stored.
    pub fn filter(&self, filter: TaskFilter) -> Vec<&Task> {
        self.tasks.iter().filter(|t| filter.matches(t)).collect()
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts::of(&self.tasks)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a new task; blank text is ignored
    pub fn add(&mut self, text: &str, priority: Priority) -> Outcome {
        if text.trim().is_empty() {
            debug!("add: ignoring blank text");
            return Outcome::unchanged();
        }

        let task = Task::new(text, priority);
        let id = task.id.clone();
        debug!(id = %id, ?priority, "add: appending task");
        self.tasks.push(task);

        let mut outcome = self.commit();
        outcome.id = Some(id);
        outcome
    }

    /// Flip the completed flag of the task with this id
    pub fn toggle(&mut self, id: &str) -> Outcome {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            debug!(id, "toggle: unknown id");
            return Outcome::unchanged();
        };

        task.completed = !task.completed;
        debug!(id, completed = task.completed, "toggle: flipped");
        self.commit()
    }

    pub fn remove(&mut self, id: &str) -> Outcome {
        let Some(index) = self.position(id) else {
            debug!(id, "remove: unknown id");
            return Outcome::unchanged();
        };

        self.tasks.remove(index);
        self.commit()
    }

    /// Replace the task with the same id by `updated`
    ///
    /// The caller supplies the full record. `created_at` keeps its stored value,
    /// related sites are trimmed with blanks dropped, and an edit that would
    /// leave the text blank is ignored.
    pub fn edit(&mut self, updated: Task) -> Outcome {
        if updated.text.trim().is_empty() {
            debug!(id = %updated.id, "edit: ignoring blank text");
            return Outcome::unchanged();
        }

        let Some(index) = self.position(&updated.id) else {
            debug!(id = %updated.id, "edit: unknown id");
            return Outcome::unchanged();
        };

        let current = &self.tasks[index];
        let replacement = Task {
            id: current.id.clone(),
            text: updated.text.trim().to_string(),
            completed: updated.completed,
            created_at: current.created_at,
            description: updated.description,
            related_sites: updated.related_sites.map(clean_related_sites),
            priority: updated.priority,
        };

        if replacement == *current {
            return Outcome::unchanged();
        }

        self.tasks[index] = replacement;
        self.commit()
    }

    /// Move task `id` so it sits immediately before `before_id`
    pub fn reorder(&mut self, id: &str, before_id: &str) -> Outcome {
        if id == before_id {
            return Outcome::unchanged();
        }

        let (Some(from), Some(before)) = (self.position(id), self.position(before_id)) else {
            debug!(id, before_id, "reorder: unknown id");
            return Outcome::unchanged();
        };

        if from + 1 == before {
            return Outcome::unchanged();
        }

        let task = self.tasks.remove(from);
        let to = if from < before { before - 1 } else { before };
        self.tasks.insert(to, task);
        debug!(id, from, to, "reorder: moved");
        self.commit()
    }

    /// Move task `id` to `index`, clamped to the last position
    ///
    /// Same result as dragging the item onto that slot.
    pub fn move_to(&mut self, id: &str, index: usize) -> Outcome {
        let Some(from) = self.position(id) else {
            debug!(id, "move_to: unknown id");
            return Outcome::unchanged();
        };

        let to = index.min(self.tasks.len() - 1);
        if from == to {
            return Outcome::unchanged();
        }

        let task = self.tasks.remove(from);
        self.tasks.insert(to, task);
        debug!(id, from, to, "move_to: moved");
        self.commit()
    }

    /// Drop every completed task
    pub fn clear_completed(&mut self) -> Outcome {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.completed);

        let removed = before - self.tasks.len();
        if removed == 0 {
            return Outcome::unchanged();
        }

        debug!(removed, "clear_completed: removed tasks");
        self.commit()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Save the full list now
    pub fn persist(&mut self) -> Result<()> {
        let json = serde_json::to_string(&self.tasks).context("Failed to serialize tasks")?;
        self.storage
            .write(&self.key, &json)
            .with_context(|| format!("Failed to save tasks under '{}'", self.key))?;
        debug!(key = %self.key, count = self.tasks.len(), "Saved tasks");
        Ok(())
    }

    /// Wait until every save handed to storage is durable
    pub fn flush(&mut self) -> Result<()> {
        self.storage.flush()
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    fn commit(&mut self) -> Outcome {
        let warning = match self.persist() {
            Ok(()) => None,
            Err(e) => {
                warn!(key = %self.key, error = ?e, "Failed to persist tasks, keeping in-memory list");
                Some(PersistWarning(e))
            }
        };

        Outcome {
            changed: true,
            id: None,
            warning,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }
}

/// Parse a stored payload, treating anything malformed as an empty list
fn parse_tasks(key: &str, raw: &str) -> Vec<Task> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let tasks: Vec<Task> = match serde_json::from_str(raw) {
        Ok(tasks) => tasks,
        Err(e) => {
            warn!(key, error = ?e, "Stored tasks are malformed, starting empty");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let total = tasks.len();
    let tasks: Vec<Task> = tasks.into_iter().filter(|t| seen.insert(t.id.clone())).collect();
    if tasks.len() != total {
        warn!(key, dropped = total - tasks.len(), "Dropped tasks with duplicate ids");
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage, SqliteStorage};
    use crate::writer::QueuedWriter;
    use tempfile::TempDir;

    fn ids(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.clone()).collect()
    }

    fn texts<S: Storage>(store: &TaskStore<S>) -> Vec<&str> {
        store.tasks().iter().map(|t| t.text.as_str()).collect()
    }

    fn add<S: Storage>(store: &mut TaskStore<S>, text: &str) -> String {
        store.add(text, Priority::Low).id.unwrap()
    }

    #[test]
    fn test_load_empty_storage() {
        let store = TaskStore::load(MemoryStorage::new());
        assert!(store.is_empty());
        assert_eq!(store.key(), DEFAULT_KEY);
    }

    #[test]
    fn test_load_malformed_payload() {
        for raw in ["{not json", "null", "{\"id\":\"a\"}", "[{\"text\":\"no id\"}]", ""] {
            let memory = MemoryStorage::new();
            memory.insert_raw(DEFAULT_KEY, raw);

            let store = TaskStore::load(memory);
            assert!(store.is_empty(), "payload {:?} should load as empty", raw);
        }
    }

    #[test]
    fn test_load_unreadable_storage() {
        struct Broken;
        impl Storage for Broken {
            fn read(&self, _key: &str) -> Result<Option<String>> {
                Err(eyre::eyre!("disk on fire"))
            }
            fn write(&mut self, _key: &str, _value: &str) -> Result<()> {
                Err(eyre::eyre!("disk on fire"))
            }
        }

        let mut store = TaskStore::load(Broken);
        assert!(store.is_empty());

        // Still usable for the session
        let outcome = store.add("still works", Priority::Low);
        assert!(outcome.changed);
        assert!(!outcome.is_persisted());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_load_legacy_payload() {
        let memory = MemoryStorage::new();
        memory.insert_raw(
            DEFAULT_KEY,
            r#"[{"id":1700000000000,"text":"old one","completed":false},{"id":1700000000001,"text":"done","completed":true}]"#,
        );

        let store = TaskStore::load(memory);
        assert_eq!(store.len(), 2);
        assert_eq!(store.tasks()[0].id, "1700000000000");
        assert_eq!(store.tasks()[0].priority, Priority::Low);
        assert!(store.tasks()[1].completed);
    }

    #[test]
    fn test_load_drops_duplicate_ids() {
        let memory = MemoryStorage::new();
        memory.insert_raw(
            DEFAULT_KEY,
            r#"[{"id":"a","text":"first"},{"id":"b","text":"other"},{"id":"a","text":"second"}]"#,
        );

        let store = TaskStore::load(memory);
        assert_eq!(texts(&store), vec!["first", "other"]);
    }

    #[test]
    fn test_add_assigns_unique_ids() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let inputs = ["a", "", "b", "   ", "c", "\t\n", "d"];

        for text in inputs {
            let _ = store.add(text, Priority::Medium);
        }

        assert_eq!(store.len(), 4);
        let unique: HashSet<&str> = store.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(texts(&store), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_add_blank_is_noop() {
        let memory = MemoryStorage::new();
        let mut store = TaskStore::load(memory.clone());

        let outcome = store.add("", Priority::Low);
        assert!(!outcome.changed);
        assert!(outcome.id.is_none());

        let outcome = store.add("   ", Priority::High);
        assert!(!outcome.changed);

        assert!(store.is_empty());
        assert_eq!(memory.write_count(), 0);
    }

    #[test]
    fn test_add_sets_fields_and_persists() {
        let memory = MemoryStorage::new();
        let mut store = TaskStore::load(memory.clone());

        let outcome = store.add("  Buy milk ", Priority::High);
        assert!(outcome.changed);
        assert!(outcome.is_persisted());

        let task = store.get(outcome.id.as_deref().unwrap()).unwrap();
        assert_eq!(task.text, "Buy milk");
        assert!(!task.completed);
        assert_eq!(task.priority, Priority::High);
        assert!(task.created_at > 0);

        let raw = memory.read(DEFAULT_KEY).unwrap().unwrap();
        assert!(raw.contains("\"text\":\"Buy milk\""));
        assert!(raw.contains("\"createdAt\""));
    }

    #[test]
    fn test_toggle_twice_restores() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let id = add(&mut store, "Buy milk");

        assert!(store.toggle(&id).changed);
        assert!(store.get(&id).unwrap().completed);

        assert!(store.toggle(&id).changed);
        assert!(!store.get(&id).unwrap().completed);
    }

    #[test]
    fn test_toggle_unknown_is_noop() {
        let memory = MemoryStorage::new();
        let mut store = TaskStore::load(memory.clone());
        add(&mut store, "x");
        let writes = memory.write_count();

        assert!(!store.toggle("missing").changed);
        assert_eq!(memory.write_count(), writes);
    }

    #[test]
    fn test_remove_then_toggle_or_remove_is_noop() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let keep = add(&mut store, "keep");
        let gone = add(&mut store, "gone");

        assert!(store.remove(&gone).changed);
        assert!(!store.toggle(&gone).changed);
        assert!(!store.remove(&gone).changed);

        assert_eq!(store.len(), 1);
        assert_eq!(store.tasks()[0].id, keep);
    }

    #[test]
    fn test_edit_replaces_record() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let id = add(&mut store, "draft");
        let created_at = store.get(&id).unwrap().created_at;

        let mut updated = store.get(&id).unwrap().clone();
        updated.text = " final ".to_string();
        updated.description = Some("details".to_string());
        updated.priority = Priority::High;
        updated.completed = true;
        updated.created_at = 1;

        assert!(store.edit(updated).changed);

        let task = store.get(&id).unwrap();
        assert_eq!(task.text, "final");
        assert_eq!(task.description.as_deref(), Some("details"));
        assert_eq!(task.priority, Priority::High);
        assert!(task.completed);
        assert_eq!(task.created_at, created_at);
    }

    #[test]
    fn test_edit_cleans_related_sites() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let id = add(&mut store, "research");

        let mut updated = store.get(&id).unwrap().clone();
        updated.related_sites = Some(vec!["https://a.com".to_string(), "  ".to_string(), "".to_string()]);
        assert!(store.edit(updated).changed);

        assert_eq!(store.get(&id).unwrap().sites(), ["https://a.com".to_string()]);
    }

    #[test]
    fn test_edit_rejects_blank_text_and_unknown_id() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let id = add(&mut store, "title");

        let mut blank = store.get(&id).unwrap().clone();
        blank.text = "  ".to_string();
        assert!(!store.edit(blank).changed);
        assert_eq!(store.get(&id).unwrap().text, "title");

        let mut stranger = store.get(&id).unwrap().clone();
        stranger.id = "missing".to_string();
        stranger.text = "other".to_string();
        assert!(!store.edit(stranger).changed);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_edit_identical_is_noop() {
        let memory = MemoryStorage::new();
        let mut store = TaskStore::load(memory.clone());
        let id = add(&mut store, "same");
        let writes = memory.write_count();

        let same = store.get(&id).unwrap().clone();
        assert!(!store.edit(same).changed);
        assert_eq!(memory.write_count(), writes);
    }

    #[test]
    fn test_filter_partitions_collection() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let ids_added: Vec<String> = (0..6).map(|i| add(&mut store, &format!("task {}", i))).collect();
        for id in ids_added.iter().step_by(2) {
            let _ = store.toggle(id);
        }

        let active: HashSet<String> = ids(&store.filter(TaskFilter::Active)).into_iter().collect();
        let completed: HashSet<String> = ids(&store.filter(TaskFilter::Completed)).into_iter().collect();
        let all: HashSet<String> = ids_added.into_iter().collect();

        assert!(active.is_disjoint(&completed));
        assert_eq!(active.union(&completed).cloned().collect::<HashSet<_>>(), all);
        assert_eq!(store.filter(TaskFilter::All).len(), 6);
    }

    #[test]
    fn test_filter_keeps_display_order() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let a = add(&mut store, "a");
        let b = add(&mut store, "b");
        let c = add(&mut store, "c");
        let _ = store.reorder(&c, &a);

        assert_eq!(ids(&store.filter(TaskFilter::Active)), vec![c, a, b]);
    }

    #[test]
    fn test_scenario_milk_and_rent() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let milk = store.add("Buy milk", Priority::Low).id.unwrap();
        let rent = store.add("Pay rent", Priority::High).id.unwrap();

        let _ = store.toggle(&rent);

        let completed = store.filter(TaskFilter::Completed);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].text, "Pay rent");

        let active = store.filter(TaskFilter::Active);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text, "Buy milk");

        assert!(store.reorder(&rent, &milk).changed);
        assert_eq!(store.tasks()[0].text, "Pay rent");

        assert!(store.clear_completed().changed);
        assert_eq!(texts(&store), vec!["Buy milk"]);
    }

    #[test]
    fn test_reorder_moves_before_target() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let a = add(&mut store, "a");
        let b = add(&mut store, "b");
        let c = add(&mut store, "c");
        let d = add(&mut store, "d");

        // Move down
        assert!(store.reorder(&a, &d).changed);
        assert_eq!(texts(&store), vec!["b", "c", "a", "d"]);

        // Move up
        assert!(store.reorder(&d, &b).changed);
        assert_eq!(texts(&store), vec!["d", "b", "c", "a"]);

        // Already in place
        assert!(!store.reorder(&b, &c).changed);
        assert_eq!(texts(&store), vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn test_reorder_noops() {
        let memory = MemoryStorage::new();
        let mut store = TaskStore::load(memory.clone());
        let a = add(&mut store, "a");
        let _b = add(&mut store, "b");
        let writes = memory.write_count();

        assert!(!store.reorder(&a, &a).changed);
        assert!(!store.reorder(&a, "missing").changed);
        assert!(!store.reorder("missing", &a).changed);

        assert_eq!(texts(&store), vec!["a", "b"]);
        assert_eq!(memory.write_count(), writes);
    }

    #[test]
    fn test_move_to_index() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let a = add(&mut store, "a");
        let _b = add(&mut store, "b");
        let c = add(&mut store, "c");

        assert!(store.move_to(&a, 2).changed);
        assert_eq!(texts(&store), vec!["b", "c", "a"]);

        assert!(store.move_to(&c, 0).changed);
        assert_eq!(texts(&store), vec!["c", "b", "a"]);

        // Clamped to the end
        assert!(store.move_to(&c, 99).changed);
        assert_eq!(texts(&store), vec!["b", "a", "c"]);

        assert!(!store.move_to(&c, 2).changed);
        assert!(!store.move_to("missing", 0).changed);
    }

    #[test]
    fn test_clear_completed_without_completed_is_noop() {
        let memory = MemoryStorage::new();
        let mut store = TaskStore::load(memory.clone());
        add(&mut store, "a");
        let writes = memory.write_count();

        assert!(!store.clear_completed().changed);
        assert_eq!(memory.write_count(), writes);
    }

    #[test]
    fn test_counts() {
        let mut store = TaskStore::load(MemoryStorage::new());
        let a = add(&mut store, "a");
        add(&mut store, "b");
        let _ = store.toggle(&a);

        assert_eq!(
            store.counts(),
            TaskCounts {
                total: 2,
                active: 1,
                completed: 1
            }
        );
    }

    #[test]
    fn test_every_mutation_persists() {
        let memory = MemoryStorage::new();
        let mut store = TaskStore::load(memory.clone());

        let a = add(&mut store, "a");
        let b = add(&mut store, "b");
        let _ = store.toggle(&a);
        let _ = store.reorder(&b, &a);
        let mut edited = store.get(&b).unwrap().clone();
        edited.description = Some("note".to_string());
        let _ = store.edit(edited);
        let _ = store.clear_completed();
        let _ = store.remove(&b);

        assert_eq!(memory.write_count(), 7);
        assert_eq!(memory.read(DEFAULT_KEY).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_roundtrip_through_memory() {
        let memory = MemoryStorage::new();
        let mut store = TaskStore::load(memory.clone());

        let a = store.add("Buy milk", Priority::Low).id.unwrap();
        let b = store.add("Pay rent", Priority::High).id.unwrap();
        let c = store.add("Call mom", Priority::Medium).id.unwrap();
        let _ = store.toggle(&b);
        let _ = store.reorder(&c, &a);
        let mut edited = store.get(&a).unwrap().clone();
        edited.description = Some("2 litres".to_string());
        edited.related_sites = Some(vec!["https://shop.example".to_string(), " ".to_string()]);
        let _ = store.edit(edited);

        let reloaded = TaskStore::load(memory);
        assert_eq!(reloaded.tasks(), store.tasks());
    }

    #[test]
    fn test_roundtrip_through_file_storage() {
        let temp = TempDir::new().unwrap();
        let expected = {
            let mut store = TaskStore::load(FileStorage::open(temp.path()).unwrap());
            let a = add(&mut store, "first");
            let b = add(&mut store, "second");
            let _ = store.toggle(&a);
            let _ = store.reorder(&b, &a);
            store.tasks().to_vec()
        };

        let reloaded = TaskStore::load(FileStorage::open(temp.path()).unwrap());
        assert_eq!(reloaded.tasks(), expected.as_slice());
        assert_eq!(texts(&reloaded), vec!["second", "first"]);
    }

    #[test]
    fn test_roundtrip_through_sqlite_storage() {
        let temp = TempDir::new().unwrap();
        let expected = {
            let mut store = TaskStore::load(SqliteStorage::open(temp.path()).unwrap());
            add(&mut store, "one");
            let two = add(&mut store, "two");
            let _ = store.toggle(&two);
            store.tasks().to_vec()
        };

        let reloaded = TaskStore::load(SqliteStorage::open(temp.path()).unwrap());
        assert_eq!(reloaded.tasks(), expected.as_slice());
    }

    #[test]
    fn test_custom_key_is_isolated() {
        let memory = MemoryStorage::new();
        let mut work = TaskStore::load_with_key(memory.clone(), "work");
        add(&mut work, "ship it");

        assert!(TaskStore::load(memory.clone()).is_empty());
        assert_eq!(TaskStore::load_with_key(memory, "work").len(), 1);
    }

    #[test]
    fn test_quota_failure_is_warning_and_memory_stays_authoritative() {
        let memory = MemoryStorage::with_quota(200);
        let mut store = TaskStore::load(memory.clone());

        let first = store.add("fits", Priority::Low);
        assert!(first.is_persisted());

        let big = "x".repeat(400);
        let second = store.add(&big, Priority::Low);
        assert!(second.changed);
        let warning = second.warning.expect("quota should be exceeded");
        assert!(warning.to_string().contains("quota exceeded"));

        // In-memory list keeps both, storage still has the last good state
        assert_eq!(store.len(), 2);
        assert_eq!(TaskStore::load(memory.clone()).len(), 1);

        // Removing the big task brings the list back under quota and saves it
        let big_id = store.tasks()[1].id.clone();
        let third = store.remove(&big_id);
        assert!(third.is_persisted());
        assert_eq!(TaskStore::load(memory).len(), 1);
    }

    #[test]
    fn test_failed_save_retried_on_next_mutation() {
        let memory = MemoryStorage::new();
        let mut store = TaskStore::load(memory.clone());

        memory.set_failing(true);
        let a = store.add("a", Priority::Low);
        assert!(!a.is_persisted());

        memory.set_failing(false);
        let b = store.add("b", Priority::Low);
        assert!(b.is_persisted());

        assert_eq!(texts(&TaskStore::load(memory)), vec!["a", "b"]);
    }

    #[test]
    fn test_explicit_persist() {
        let memory = MemoryStorage::new();
        memory.set_failing(true);
        let mut store = TaskStore::load(memory.clone());
        let _ = store.add("a", Priority::Low);

        assert!(store.persist().is_err());
        memory.set_failing(false);
        store.persist().unwrap();
        assert_eq!(TaskStore::load(memory).len(), 1);
    }

    #[test]
    fn test_queued_writer_persists_final_state() {
        let memory = MemoryStorage::new();
        let mut store = TaskStore::load(QueuedWriter::new(memory.clone()).unwrap());

        let id = add(&mut store, "flip me");
        for _ in 0..21 {
            let _ = store.toggle(&id);
        }
        store.flush().unwrap();

        let reloaded = TaskStore::load(memory);
        assert!(reloaded.get(&id).unwrap().completed);
    }
}
