//! Durable record of every work item the orchestrator has seen.
//!
//! Backed by SQLite (`work_items` + `item_events`). The connection sits
//! behind a mutex and every call runs on the blocking pool, so writes are
//! serialized. State changes are conditional updates (`WHERE state = ...`),
//! which is what guarantees a single `Processing` holder per identity.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{
    BackendKind, Fingerprint, ItemFailure, ItemIdentity, StorageLocation, WorkItem, WorkItemState,
};

/// Errors that can occur with the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Item is already being processed: {0}")]
    AlreadyProcessing(ItemIdentity),

    #[error("Item not found: {0}")]
    NotFound(ItemIdentity),

    #[error("Invalid state transition for {identity}: {from} → {to}")]
    InvalidTransition {
        identity: ItemIdentity,
        from: WorkItemState,
        to: WorkItemState,
    },

    #[error("Identity prefix '{0}' matches more than one item")]
    Ambiguous(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt registry row: {0}")]
    Corrupt(String),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Result of recording a discovered item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// New item, now Queued
    Queued,

    /// Identity already present, in the given state
    AlreadyKnown(WorkItemState),

    /// Same fingerprint already recorded under another identity
    Duplicate { of: ItemIdentity },
}

impl EnqueueResult {
    /// Check if this was a new enqueue
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// A registry row
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingRecord {
    #[serde(flatten)]
    pub item: WorkItem,

    /// Stage name recorded with the last failure
    pub failed_stage: Option<String>,

    pub last_attempt_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

/// One row of `item_events`
#[derive(Debug, Clone, Serialize)]
pub struct ItemEvent {
    pub from: Option<WorkItemState>,
    pub to: WorkItemState,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Registry status summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStatus {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub recent: Vec<ProcessingRecord>,
}

impl RegistryStatus {
    /// Total items in registry
    pub fn total(&self) -> usize {
        self.queued + self.processing + self.completed + self.failed
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS work_items (
    identity TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL,
    backend TEXT NOT NULL,
    locator TEXT NOT NULL,
    name TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    state TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT NULL,
    failed_stage TEXT NULL,
    discovered_at TEXT NOT NULL,
    last_attempt_at TEXT NULL,
    completed_at TEXT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_work_items_fingerprint ON work_items(fingerprint);
CREATE INDEX IF NOT EXISTS idx_work_items_state ON work_items(state);

CREATE TABLE IF NOT EXISTS item_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity TEXT NOT NULL,
    from_state TEXT NULL,
    to_state TEXT NOT NULL,
    detail TEXT NULL,
    at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_item_events_identity ON item_events(identity);
"#;

const SELECT_RECORD: &str = "SELECT identity, fingerprint, backend, locator, name, size_bytes, \
     state, attempt_count, last_error, failed_stage, discovered_at, last_attempt_at, \
     completed_at, updated_at FROM work_items";

/// Fixed-width RFC3339 so stored timestamps compare lexicographically
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RegistryError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

fn parse_state(raw: &str) -> Result<WorkItemState, RegistryError> {
    WorkItemState::parse(raw).ok_or_else(|| RegistryError::Corrupt(format!("state '{}'", raw)))
}

/// Columns as stored, before validation
struct RawRecord {
    identity: String,
    fingerprint: String,
    backend: String,
    locator: String,
    name: String,
    size_bytes: i64,
    state: String,
    attempt_count: i64,
    last_error: Option<String>,
    failed_stage: Option<String>,
    discovered_at: String,
    last_attempt_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity: row.get(0)?,
            fingerprint: row.get(1)?,
            backend: row.get(2)?,
            locator: row.get(3)?,
            name: row.get(4)?,
            size_bytes: row.get(5)?,
            state: row.get(6)?,
            attempt_count: row.get(7)?,
            last_error: row.get(8)?,
            failed_stage: row.get(9)?,
            discovered_at: row.get(10)?,
            last_attempt_at: row.get(11)?,
            completed_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<ProcessingRecord, RegistryError> {
        let backend = BackendKind::parse(&self.backend)
            .ok_or_else(|| RegistryError::Corrupt(format!("backend '{}'", self.backend)))?;
        Ok(ProcessingRecord {
            item: WorkItem {
                identity: ItemIdentity::new(self.identity),
                fingerprint: Fingerprint::from_stored(self.fingerprint),
                location: StorageLocation::new(backend, self.locator),
                name: self.name,
                size_bytes: self.size_bytes.max(0) as u64,
                state: parse_state(&self.state)?,
                attempt_count: self.attempt_count.max(0) as u32,
                last_error: self.last_error,
                discovered_at: parse_ts(&self.discovered_at)?,
                completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
            },
            failed_stage: self.failed_stage,
            last_attempt_at: self.last_attempt_at.as_deref().map(parse_ts).transpose()?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// Write transaction that takes the database write lock up front, so a
/// read-then-write never hits SQLITE_BUSY halfway through
fn begin_write(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

fn current_state(conn: &Connection, identity: &str) -> Result<Option<WorkItemState>, RegistryError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT state FROM work_items WHERE identity = ?1",
            params![identity],
            |row| row.get(0),
        )
        .optional()?;
    raw.as_deref().map(parse_state).transpose()
}

fn record_event(
    conn: &Connection,
    identity: &str,
    from: Option<WorkItemState>,
    to: WorkItemState,
    detail: Option<&str>,
    at: &str,
) -> Result<(), RegistryError> {
    conn.execute(
        "INSERT INTO item_events (identity, from_state, to_state, detail, at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![identity, from.map(|s| s.as_str()), to.as_str(), detail, at],
    )?;
    Ok(())
}

/// Explain why a conditional update touched nothing
fn rejected_transition(
    conn: &Connection,
    identity: &ItemIdentity,
    to: WorkItemState,
) -> RegistryError {
    match current_state(conn, identity.as_str()) {
        Ok(None) => RegistryError::NotFound(identity.clone()),
        Ok(Some(WorkItemState::Processing)) if to == WorkItemState::Processing => {
            RegistryError::AlreadyProcessing(identity.clone())
        }
        Ok(Some(from)) => RegistryError::InvalidTransition {
            identity: identity.clone(),
            from,
            to,
        },
        Err(e) => e,
    }
}

/// SQLite-backed item registry
#[derive(Clone)]
pub struct Registry {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Registry {
    /// Open or create the registry database
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RegistryError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Ephemeral registry (tests, dry runs)
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, RegistryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RegistryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| RegistryError::Unavailable("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| RegistryError::Unavailable(e.to_string()))?
    }

    /// Whether an identity has ever been recorded
    pub async fn is_known(&self, identity: &ItemIdentity) -> Result<bool, RegistryError> {
        let identity = identity.as_str().to_string();
        self.with_conn(move |conn| Ok(current_state(conn, &identity)?.is_some()))
            .await
    }

    /// Record a discovered item as Queued, unless its identity or fingerprint
    /// is already present
    pub async fn mark_queued(&self, item: &WorkItem) -> Result<EnqueueResult, RegistryError> {
        let item = item.clone();
        self.with_conn(move |conn| {
            let tx = begin_write(conn)?;

            if let Some(state) = current_state(&tx, item.identity.as_str())? {
                return Ok(EnqueueResult::AlreadyKnown(state));
            }

            let existing: Option<String> = tx
                .query_row(
                    "SELECT identity FROM work_items WHERE fingerprint = ?1",
                    params![item.fingerprint.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(of) = existing {
                return Ok(EnqueueResult::Duplicate {
                    of: ItemIdentity::new(of),
                });
            }

            let now = ts(Utc::now());
            tx.execute(
                "INSERT INTO work_items (identity, fingerprint, backend, locator, name, size_bytes, \
                 state, attempt_count, discovered_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)",
                params![
                    item.identity.as_str(),
                    item.fingerprint.as_str(),
                    item.location.backend().as_str(),
                    item.location.locator(),
                    item.name,
                    item.size_bytes as i64,
                    WorkItemState::Queued.as_str(),
                    ts(item.discovered_at),
                    now,
                ],
            )?;
            record_event(
                &tx,
                item.identity.as_str(),
                Some(WorkItemState::Discovered),
                WorkItemState::Queued,
                Some(&item.location.to_string()),
                &now,
            )?;

            tx.commit()?;
            Ok(EnqueueResult::Queued)
        })
        .await
    }

    /// Claim an item for processing. Exactly one concurrent caller wins;
    /// the others get `AlreadyProcessing`.
    pub async fn mark_processing(&self, identity: &ItemIdentity) -> Result<WorkItem, RegistryError> {
        let identity = identity.clone();
        self.with_conn(move |conn| {
            let tx = begin_write(conn)?;
            let now = ts(Utc::now());
            let changed = tx.execute(
                "UPDATE work_items SET state = ?1, attempt_count = attempt_count + 1, \
                 last_attempt_at = ?2, updated_at = ?2 WHERE identity = ?3 AND state = ?4",
                params![
                    WorkItemState::Processing.as_str(),
                    now,
                    identity.as_str(),
                    WorkItemState::Queued.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(rejected_transition(&tx, &identity, WorkItemState::Processing));
            }

            record_event(
                &tx,
                identity.as_str(),
                Some(WorkItemState::Queued),
                WorkItemState::Processing,
                None,
                &now,
            )?;
            let record = tx
                .query_row(
                    &format!("{} WHERE identity = ?1", SELECT_RECORD),
                    params![identity.as_str()],
                    RawRecord::from_row,
                )?
                .into_record()?;
            tx.commit()?;
            Ok(record.item)
        })
        .await
    }

    /// Processing → Completed
    pub async fn mark_completed(&self, identity: &ItemIdentity) -> Result<(), RegistryError> {
        let identity = identity.clone();
        self.with_conn(move |conn| {
            let tx = begin_write(conn)?;
            let now = ts(Utc::now());
            let changed = tx.execute(
                "UPDATE work_items SET state = ?1, completed_at = ?2, updated_at = ?2, \
                 last_error = NULL, failed_stage = NULL WHERE identity = ?3 AND state = ?4",
                params![
                    WorkItemState::Completed.as_str(),
                    now,
                    identity.as_str(),
                    WorkItemState::Processing.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(rejected_transition(&tx, &identity, WorkItemState::Completed));
            }
            record_event(
                &tx,
                identity.as_str(),
                Some(WorkItemState::Processing),
                WorkItemState::Completed,
                None,
                &now,
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Processing → Failed, recording the structured cause
    pub async fn mark_failed(
        &self,
        identity: &ItemIdentity,
        failure: &ItemFailure,
    ) -> Result<(), RegistryError> {
        let identity = identity.clone();
        let message = failure.to_string();
        let stage = failure.stage_label().map(str::to_string);
        self.with_conn(move |conn| {
            let tx = begin_write(conn)?;
            let now = ts(Utc::now());
            let changed = tx.execute(
                "UPDATE work_items SET state = ?1, last_error = ?2, failed_stage = ?3, \
                 updated_at = ?4 WHERE identity = ?5 AND state = ?6",
                params![
                    WorkItemState::Failed.as_str(),
                    message,
                    stage,
                    now,
                    identity.as_str(),
                    WorkItemState::Processing.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(rejected_transition(&tx, &identity, WorkItemState::Failed));
            }
            record_event(
                &tx,
                identity.as_str(),
                Some(WorkItemState::Processing),
                WorkItemState::Failed,
                Some(&message),
                &now,
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Point a Queued or Failed item at the location its content now lives
    /// at. Returns false when the item is in any other state or already
    /// points there.
    pub async fn relocate(
        &self,
        identity: &ItemIdentity,
        location: &StorageLocation,
        name: &str,
    ) -> Result<bool, RegistryError> {
        let identity = identity.clone();
        let location = location.clone();
        let name = name.to_string();
        self.with_conn(move |conn| {
            let tx = begin_write(conn)?;
            let now = ts(Utc::now());
            let changed = tx.execute(
                "UPDATE work_items SET backend = ?1, locator = ?2, name = ?3, updated_at = ?4 \
                 WHERE identity = ?5 AND state IN (?6, ?7) \
                 AND (backend != ?1 OR locator != ?2)",
                params![
                    location.backend().as_str(),
                    location.locator(),
                    name,
                    now,
                    identity.as_str(),
                    WorkItemState::Queued.as_str(),
                    WorkItemState::Failed.as_str(),
                ],
            )?;
            tx.commit()?;
            Ok(changed > 0)
        })
        .await
    }

    /// Failed → Queued (explicit or automatic retry)
    pub async fn retry(&self, identity: &ItemIdentity, reason: &str) -> Result<(), RegistryError> {
        let identity = identity.clone();
        let reason = reason.to_string();
        self.with_conn(move |conn| {
            let tx = begin_write(conn)?;
            let now = ts(Utc::now());
            let changed = tx.execute(
                "UPDATE work_items SET state = ?1, updated_at = ?2 WHERE identity = ?3 AND state = ?4",
                params![
                    WorkItemState::Queued.as_str(),
                    now,
                    identity.as_str(),
                    WorkItemState::Failed.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(rejected_transition(&tx, &identity, WorkItemState::Queued));
            }
            record_event(
                &tx,
                identity.as_str(),
                Some(WorkItemState::Failed),
                WorkItemState::Queued,
                Some(&reason),
                &now,
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Startup recovery: anything left Processing by a previous run is
    /// re-queued. Returns the recovered identities.
    pub async fn recover_in_flight(&self) -> Result<Vec<ItemIdentity>, RegistryError> {
        self.with_conn(|conn| {
            let tx = begin_write(conn)?;
            let now = ts(Utc::now());

            let stranded: Vec<String> = {
                let mut stmt = tx.prepare("SELECT identity FROM work_items WHERE state = ?1")?;
                let rows = stmt.query_map(params![WorkItemState::Processing.as_str()], |row| {
                    row.get::<_, String>(0)
                })?;
                rows.collect::<Result<_, _>>()?
            };

            for identity in &stranded {
                tx.execute(
                    "UPDATE work_items SET state = ?1, updated_at = ?2 WHERE identity = ?3",
                    params![WorkItemState::Queued.as_str(), now, identity],
                )?;
                record_event(
                    &tx,
                    identity,
                    Some(WorkItemState::Processing),
                    WorkItemState::Queued,
                    Some("recovered at startup"),
                    &now,
                )?;
            }

            tx.commit()?;
            Ok(stranded.into_iter().map(ItemIdentity::new).collect())
        })
        .await
    }

    /// Failed items eligible for automatic retry. Validation rejections are
    /// never retried.
    pub async fn retryable_failures(
        &self,
        max_attempts: u32,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<WorkItem>, RegistryError> {
        let cutoff = ts(older_than);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE state = ?1 AND attempt_count < ?2 \
                 AND (last_attempt_at IS NULL OR last_attempt_at <= ?3) \
                 AND (failed_stage IS NULL OR failed_stage != 'validate') \
                 ORDER BY discovered_at",
                SELECT_RECORD
            ))?;
            let rows = stmt.query_map(
                params![WorkItemState::Failed.as_str(), max_attempts as i64, cutoff],
                RawRecord::from_row,
            )?;
            let mut items = Vec::new();
            for raw in rows {
                items.push(raw?.into_record()?.item);
            }
            Ok(items)
        })
        .await
    }

    /// All records, optionally filtered by state, oldest first
    pub async fn list(
        &self,
        state: Option<WorkItemState>,
    ) -> Result<Vec<ProcessingRecord>, RegistryError> {
        self.with_conn(move |conn| {
            let mut records = Vec::new();
            match state {
                Some(state) => {
                    let mut stmt = conn.prepare(&format!(
                        "{} WHERE state = ?1 ORDER BY discovered_at",
                        SELECT_RECORD
                    ))?;
                    let rows = stmt.query_map(params![state.as_str()], RawRecord::from_row)?;
                    for raw in rows {
                        records.push(raw?.into_record()?);
                    }
                }
                None => {
                    let mut stmt =
                        conn.prepare(&format!("{} ORDER BY discovered_at", SELECT_RECORD))?;
                    let rows = stmt.query_map([], RawRecord::from_row)?;
                    for raw in rows {
                        records.push(raw?.into_record()?);
                    }
                }
            }
            Ok(records)
        })
        .await
    }

    pub async fn get(
        &self,
        identity: &ItemIdentity,
    ) -> Result<Option<ProcessingRecord>, RegistryError> {
        let identity = identity.as_str().to_string();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!("{} WHERE identity = ?1", SELECT_RECORD),
                    params![identity],
                    RawRecord::from_row,
                )
                .optional()?;
            raw.map(RawRecord::into_record).transpose()
        })
        .await
    }

    /// Resolve a full identity from an exact value or a unique prefix.
    /// A bare hash prefix also matches (`1a2b` finds `local:1a2b...`).
    pub async fn resolve_identity(&self, query: &str) -> Result<ItemIdentity, RegistryError> {
        let query = query.trim().to_string();
        self.with_conn(move |conn| {
            if current_state(conn, &query)?.is_some() {
                return Ok(ItemIdentity::new(query));
            }

            let pattern = format!("{}%", query.replace('%', "").replace('_', "\\_"));
            let bare = format!("%:{}", pattern);
            let mut stmt = conn.prepare(
                "SELECT identity FROM work_items \
                 WHERE identity LIKE ?1 ESCAPE '\\' OR identity LIKE ?2 ESCAPE '\\' LIMIT 2",
            )?;
            let matches: Vec<String> = stmt
                .query_map(params![pattern, bare], |row| row.get(0))?
                .collect::<Result<_, _>>()?;

            match matches.len() {
                0 => Err(RegistryError::NotFound(ItemIdentity::new(query))),
                1 => Ok(ItemIdentity::new(matches[0].clone())),
                _ => Err(RegistryError::Ambiguous(query)),
            }
        })
        .await
    }

    /// Transition history for one item, oldest first
    pub async fn history(&self, identity: &ItemIdentity) -> Result<Vec<ItemEvent>, RegistryError> {
        let identity = identity.as_str().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT from_state, to_state, detail, at FROM item_events \
                 WHERE identity = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![identity], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut events = Vec::new();
            for row in rows {
                let (from, to, detail, at) = row?;
                events.push(ItemEvent {
                    from: from.as_deref().map(parse_state).transpose()?,
                    to: parse_state(&to)?,
                    detail,
                    at: parse_ts(&at)?,
                });
            }
            Ok(events)
        })
        .await
    }

    /// Get registry status summary
    pub async fn status(&self) -> Result<RegistryStatus, RegistryError> {
        self.with_conn(|conn| {
            let mut status = RegistryStatus::default();

            let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM work_items GROUP BY state")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (state, count) = row?;
                let count = count.max(0) as usize;
                match parse_state(&state)? {
                    WorkItemState::Queued | WorkItemState::Discovered => status.queued += count,
                    WorkItemState::Processing => status.processing += count,
                    WorkItemState::Completed => status.completed += count,
                    WorkItemState::Failed => status.failed += count,
                }
            }

            // Get recent items (last 5)
            let mut stmt = conn.prepare(&format!(
                "{} ORDER BY updated_at DESC LIMIT 5",
                SELECT_RECORD
            ))?;
            let rows = stmt.query_map([], RawRecord::from_row)?;
            for raw in rows {
                status.recent.push(raw?.into_record()?);
            }

            Ok(status)
        })
        .await
    }
}
