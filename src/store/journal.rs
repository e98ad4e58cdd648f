use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{InMemoryStore, ReservationStore, StoreError};

// ── Group-commit channel ─────────────────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the log and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. Single flush_sync for the whole batch.
/// 5. Answer every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so stray buffered bytes don't ride
    // along with the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Store ────────────────────────────────────────────────────────

/// Event-sourced store: every change is appended to the log, then applied
/// to an in-memory copy that serves all reads.
pub struct JournalStore {
    state: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Appends share it; compaction takes it exclusively so no event lands
    /// between the snapshot and the file swap.
    compaction: RwLock<()>,
}

impl JournalStore {
    /// Replay the log at `path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let state = InMemoryStore::new();
        for event in &events {
            state.apply_event(event);
        }
        info!(
            "journal {} replayed {} events ({} confirmed, {} pending, {} blocked)",
            path.display(),
            events.len(),
            state.confirmed().len(),
            state.pending().len(),
            state.blocked().len(),
        );

        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            state,
            wal_tx,
            compaction: RwLock::new(()),
        })
    }

    async fn persist(&self, event: Event) -> Result<(), StoreError> {
        let _shared = self.compaction.read().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("journal writer dropped response".into()))??;
        self.state.apply_event(&event);
        Ok(())
    }

    /// Rewrite the log with only the events needed to recreate current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.compaction.write().await;
        let events = self.state.snapshot_events();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("journal writer dropped response".into()))??;
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for JournalStore {
    fn next_id(&self) -> Ulid {
        self.state.next_id()
    }

    async fn list_confirmed(&self) -> Result<Vec<Stay>, StoreError> {
        Ok(self.state.confirmed())
    }

    async fn list_pending(&self) -> Result<Vec<Stay>, StoreError> {
        Ok(self.state.pending())
    }

    async fn list_blocked(&self) -> Result<Vec<BlockedRange>, StoreError> {
        Ok(self.state.blocked())
    }

    async fn append_confirmed(&self, stay: Stay) -> Result<(), StoreError> {
        self.persist(Event::BookingConfirmed { stay }).await
    }

    async fn append_pending(&self, stay: Stay) -> Result<(), StoreError> {
        self.persist(Event::RequestSubmitted { stay }).await
    }

    async fn append_blocked(&self, range: BlockedRange) -> Result<(), StoreError> {
        self.persist(Event::RangeBlocked { range }).await
    }

    async fn remove_pending(&self, id: Ulid) -> Result<bool, StoreError> {
        if !self.state.contains_pending(&id) {
            return Ok(false);
        }
        self.persist(Event::RequestRemoved { id }).await?;
        Ok(true)
    }

    async fn remove_confirmed(&self, id: Ulid) -> Result<bool, StoreError> {
        if !self.state.contains_confirmed(&id) {
            return Ok(false);
        }
        self.persist(Event::BookingRemoved { id }).await?;
        Ok(true)
    }

    async fn remove_blocked(&self, id: Ulid) -> Result<bool, StoreError> {
        if !self.state.contains_blocked(&id) {
            return Ok(false);
        }
        self.persist(Event::RangeUnblocked { id }).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staydesk_test_journal");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn stay(store: &JournalStore, day: u32) -> Stay {
        Stay {
            id: store.next_id(),
            name: "Ann".into(),
            email: "ann@example.com".into(),
            check_in: NaiveDate::from_ymd_opt(2024, 6, day),
            check_out: NaiveDate::from_ymd_opt(2024, 6, day + 1),
            notes: None,
            status: StayStatus::Pending,
        }
    }

    #[tokio::test]
    async fn reopen_replays_state() {
        let path = test_wal_path("reopen.wal");
        let (kept, moved) = {
            let store = JournalStore::open(&path).unwrap();
            let kept = stay(&store, 1);
            let moved = stay(&store, 3);
            let dropped = stay(&store, 5);
            store.append_pending(kept.clone()).await.unwrap();
            store.append_pending(moved.clone()).await.unwrap();
            store.append_pending(dropped.clone()).await.unwrap();
            store.append_confirmed(moved.confirmed()).await.unwrap();
            store.remove_pending(moved.id).await.unwrap();
            store.remove_pending(dropped.id).await.unwrap();
            (kept, moved)
        };

        let store = JournalStore::open(&path).unwrap();
        assert_eq!(store.list_pending().await.unwrap(), vec![kept]);
        assert_eq!(store.list_confirmed().await.unwrap(), vec![moved.confirmed()]);
    }

    #[tokio::test]
    async fn removing_absent_id_writes_nothing() {
        let path = test_wal_path("absent.wal");
        let store = JournalStore::open(&path).unwrap();
        assert!(!store.remove_confirmed(Ulid::new()).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn compact_shrinks_and_survives_restart() {
        let path = test_wal_path("compact.wal");
        let keep = {
            let store = JournalStore::open(&path).unwrap();
            for day in 1..20 {
                let s = stay(&store, day);
                store.append_pending(s.clone()).await.unwrap();
                store.remove_pending(s.id).await.unwrap();
            }
            let keep = stay(&store, 25);
            store.append_pending(keep.clone()).await.unwrap();
            assert_eq!(store.appends_since_compact().await, 39);

            let before = std::fs::metadata(&path).unwrap().len();
            store.compact().await.unwrap();
            let after = std::fs::metadata(&path).unwrap().len();
            assert!(after < before, "{after} < {before}");
            assert_eq!(store.appends_since_compact().await, 0);

            let blocked = BlockedRange {
                id: store.next_id(),
                start: NaiveDate::from_ymd_opt(2024, 7, 1),
                end: NaiveDate::from_ymd_opt(2024, 7, 2),
            };
            store.append_blocked(blocked).await.unwrap();
            keep
        };

        let store = JournalStore::open(&path).unwrap();
        assert_eq!(store.list_pending().await.unwrap(), vec![keep]);
        assert_eq!(store.list_blocked().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_all_land() {
        let path = test_wal_path("concurrent.wal");
        let store = Arc::new(JournalStore::open(&path).unwrap());
        let mut handles = Vec::new();
        for day in 1..=28 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let s = stay(&store, day);
                store.append_pending(s).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.list_pending().await.unwrap().len(), 28);

        drop(store);
        let reopened = JournalStore::open(&path).unwrap();
        assert_eq!(reopened.list_pending().await.unwrap().len(), 28);
    }
}
