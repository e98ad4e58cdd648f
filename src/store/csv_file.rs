use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;

use super::{IdMint, ReservationStore, StoreError};

pub const BOOKINGS_FILE: &str = "bookings.csv";
pub const PENDING_FILE: &str = "pending_bookings.csv";
pub const BLOCKED_FILE: &str = "blocked_dates.csv";

const STAY_HEADERS: &[&str] = &["Id", "Name", "Email", "Check-in", "Check-out", "Notes"];
const BLOCKED_HEADERS: &[&str] = &["Id", "Start", "End"];

impl From<csv::Error> for StoreError {
    fn from(e: csv::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Flat-file store: one CSV per collection, rewritten in full on every
/// mutation.
///
/// Rows are kept as raw text between load and save, so cells that fail to
/// parse survive unrelated writes untouched. Files written by older versions
/// without an `Id` column get ids minted and persisted on first load.
pub struct CsvStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
    ids: Arc<IdMint>,
}

impl CsvStore {
    /// Open the store in `dir`, creating the directory and any missing file.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let ids = Arc::new(IdMint::new());
        for (file, headers) in [
            (BOOKINGS_FILE, STAY_HEADERS),
            (PENDING_FILE, STAY_HEADERS),
            (BLOCKED_FILE, BLOCKED_HEADERS),
        ] {
            Table::load(&dir.join(file), headers, &ids)?;
        }
        info!("csv store ready in {}", dir.display());
        Ok(Self {
            dir,
            lock: Mutex::new(()),
            ids,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load `file`, run `op` on it, all on the blocking pool under the store lock.
    async fn with_table<T, F>(
        &self,
        file: &'static str,
        headers: &'static [&'static str],
        op: F,
    ) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Table, &Path) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.lock.lock().await;
        let path = self.dir.join(file);
        let ids = self.ids.clone();
        tokio::task::spawn_blocking(move || {
            let mut table = Table::load(&path, headers, &ids)?;
            op(&mut table, &path)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("csv task failed: {e}")))?
    }

    async fn list_stays(&self, file: &'static str, status: StayStatus) -> Result<Vec<Stay>, StoreError> {
        self.with_table(file, STAY_HEADERS, move |table, _| Ok(table.stays(file, status)))
            .await
    }

    async fn append_stay(&self, file: &'static str, stay: Stay) -> Result<(), StoreError> {
        self.with_table(file, STAY_HEADERS, move |table, path| {
            table.push(&stay_fields(&stay));
            table.save(path)
        })
        .await
    }

    async fn remove_row(
        &self,
        file: &'static str,
        headers: &'static [&'static str],
        id: Ulid,
    ) -> Result<bool, StoreError> {
        self.with_table(file, headers, move |table, path| {
            let removed = table.remove(id);
            if removed {
                table.save(path)?;
            }
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl ReservationStore for CsvStore {
    fn next_id(&self) -> Ulid {
        self.ids.next()
    }

    async fn list_confirmed(&self) -> Result<Vec<Stay>, StoreError> {
        self.list_stays(BOOKINGS_FILE, StayStatus::Confirmed).await
    }

    async fn list_pending(&self) -> Result<Vec<Stay>, StoreError> {
        self.list_stays(PENDING_FILE, StayStatus::Pending).await
    }

    async fn list_blocked(&self) -> Result<Vec<BlockedRange>, StoreError> {
        self.with_table(BLOCKED_FILE, BLOCKED_HEADERS, |table, _| Ok(table.blocked()))
            .await
    }

    async fn append_confirmed(&self, stay: Stay) -> Result<(), StoreError> {
        self.append_stay(BOOKINGS_FILE, stay).await
    }

    async fn append_pending(&self, stay: Stay) -> Result<(), StoreError> {
        self.append_stay(PENDING_FILE, stay).await
    }

    async fn append_blocked(&self, range: BlockedRange) -> Result<(), StoreError> {
        self.with_table(BLOCKED_FILE, BLOCKED_HEADERS, move |table, path| {
            table.push(&[
                ("Id", range.id.to_string()),
                ("Start", date_text(range.start)),
                ("End", date_text(range.end)),
            ]);
            table.save(path)
        })
        .await
    }

    async fn remove_pending(&self, id: Ulid) -> Result<bool, StoreError> {
        self.remove_row(PENDING_FILE, STAY_HEADERS, id).await
    }

    async fn remove_confirmed(&self, id: Ulid) -> Result<bool, StoreError> {
        self.remove_row(BOOKINGS_FILE, STAY_HEADERS, id).await
    }

    async fn remove_blocked(&self, id: Ulid) -> Result<bool, StoreError> {
        self.remove_row(BLOCKED_FILE, BLOCKED_HEADERS, id).await
    }
}

fn stay_fields(stay: &Stay) -> [(&'static str, String); 6] {
    [
        ("Id", stay.id.to_string()),
        ("Name", stay.name.clone()),
        ("Email", stay.email.clone()),
        ("Check-in", date_text(stay.check_in)),
        ("Check-out", date_text(stay.check_out)),
        ("Notes", stay.notes.clone().unwrap_or_default()),
    ]
}

fn date_text(day: Option<Day>) -> String {
    day.map(format_day).unwrap_or_default()
}

// ── Raw table ────────────────────────────────────────────────────

/// One CSV file held as raw text rows.
struct Table {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl Table {
    fn load(path: &Path, default_headers: &[&str], ids: &IdMint) -> Result<Table, StoreError> {
        if !path.exists() {
            let table = Table {
                headers: StringRecord::from(default_headers.to_vec()),
                rows: Vec::new(),
            };
            table.save(path)?;
            debug!("created {}", path.display());
            return Ok(table);
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_path(path)?;
        let mut headers = reader.headers()?.clone();
        if headers.is_empty() {
            headers = StringRecord::from(default_headers.to_vec());
        }
        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            match record {
                Ok(record) => rows.push(record),
                Err(e) => {
                    warn!(file = %path.display(), row = line + 1, "skipping unreadable row: {e}");
                    metrics::counter!(crate::observability::MALFORMED_RECORDS_TOTAL, "stage" => "load")
                        .increment(1);
                }
            }
        }

        let mut table = Table { headers, rows };
        let minted = table.ensure_ids(ids);
        if minted > 0 {
            info!("assigned ids to {minted} rows in {}", path.display());
            table.save(path)?;
        }
        Ok(table)
    }

    /// Give every row a valid `Id`, adding the column if absent. Returns the
    /// number of ids minted.
    fn ensure_ids(&mut self, ids: &IdMint) -> usize {
        let Some(col) = self.column("Id") else {
            self.headers = prepend("Id", &self.headers);
            for row in &mut self.rows {
                *row = prepend(&ids.next().to_string(), row);
            }
            return self.rows.len();
        };
        let mut minted = 0;
        for row in &mut self.rows {
            let valid = row.get(col).is_some_and(|raw| Ulid::from_string(raw).is_ok());
            if !valid {
                *row = with_cell(row, col, &ids.next().to_string());
                minted += 1;
            }
        }
        minted
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn cell<'r>(&self, row: &'r StringRecord, name: &str) -> &'r str {
        self.column(name).and_then(|i| row.get(i)).unwrap_or("")
    }

    fn row_id(&self, row: &StringRecord) -> Option<Ulid> {
        Ulid::from_string(self.cell(row, "Id")).ok()
    }

    fn date(&self, row: &StringRecord, column: &'static str, file: &str) -> Option<Day> {
        match parse_day(column, self.cell(row, column)) {
            Ok(day) => Some(day),
            Err(e) => {
                warn!(file, "{e}");
                metrics::counter!(crate::observability::MALFORMED_RECORDS_TOTAL, "stage" => "load")
                    .increment(1);
                None
            }
        }
    }

    fn stays(&self, file: &str, status: StayStatus) -> Vec<Stay> {
        self.rows
            .iter()
            .filter_map(|row| {
                let notes = self.cell(row, "Notes");
                Some(Stay {
                    id: self.row_id(row)?,
                    name: self.cell(row, "Name").to_string(),
                    email: self.cell(row, "Email").to_string(),
                    check_in: self.date(row, "Check-in", file),
                    check_out: self.date(row, "Check-out", file),
                    notes: (!notes.is_empty()).then(|| notes.to_string()),
                    status,
                })
            })
            .collect()
    }

    fn blocked(&self) -> Vec<BlockedRange> {
        self.rows
            .iter()
            .filter_map(|row| {
                Some(BlockedRange {
                    id: self.row_id(row)?,
                    start: self.date(row, "Start", BLOCKED_FILE),
                    end: self.date(row, "End", BLOCKED_FILE),
                })
            })
            .collect()
    }

    /// Append a row, placing each named field under its header.
    fn push(&mut self, fields: &[(&str, String)]) {
        let record: StringRecord = self
            .headers
            .iter()
            .map(|h| {
                fields
                    .iter()
                    .find(|(name, _)| *name == h)
                    .map(|(_, value)| value.as_str())
                    .unwrap_or("")
            })
            .collect();
        self.rows.push(record);
    }

    fn remove(&mut self, id: Ulid) -> bool {
        let before = self.rows.len();
        let col = self.column("Id");
        self.rows.retain(|row| {
            col.and_then(|i| row.get(i))
                .and_then(|raw| Ulid::from_string(raw).ok())
                != Some(id)
        });
        self.rows.len() != before
    }

    /// Write to a temp file, fsync, then rename over `path`.
    fn save(&self, path: &Path) -> Result<(), StoreError> {
        let tmp_path = path.with_extension("csv.tmp");
        let mut writer = WriterBuilder::new().flexible(true).from_path(&tmp_path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

fn prepend(first: &str, record: &StringRecord) -> StringRecord {
    std::iter::once(first).chain(record.iter()).collect()
}

fn with_cell(record: &StringRecord, col: usize, value: &str) -> StringRecord {
    let mut fields: Vec<&str> = record.iter().collect();
    if fields.len() <= col {
        fields.resize(col + 1, "");
    }
    fields[col] = value;
    fields.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staydesk_test_csv").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn d(s: &str) -> Day {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn stay(store: &CsvStore, check_in: &str, check_out: &str) -> Stay {
        Stay {
            id: store.next_id(),
            name: "Jo Smith".into(),
            email: "jo@example.com".into(),
            check_in: Some(d(check_in)),
            check_out: Some(d(check_out)),
            notes: Some("two dogs, \"friendly\"".into()),
            status: StayStatus::Pending,
        }
    }

    #[tokio::test]
    async fn open_creates_files_with_headers() {
        let dir = test_dir("create");
        let store = CsvStore::open(&dir).unwrap();
        assert!(store.list_pending().await.unwrap().is_empty());
        let header = fs::read_to_string(dir.join(PENDING_FILE)).unwrap();
        assert_eq!(header.trim(), "Id,Name,Email,Check-in,Check-out,Notes");
        let header = fs::read_to_string(dir.join(BLOCKED_FILE)).unwrap();
        assert_eq!(header.trim(), "Id,Start,End");
    }

    #[tokio::test]
    async fn dates_round_trip_exactly() {
        let dir = test_dir("roundtrip");
        let store = CsvStore::open(&dir).unwrap();
        let s = stay(&store, "2024-03-01", "2024-03-05");
        store.append_pending(s.clone()).await.unwrap();

        let raw = fs::read_to_string(dir.join(PENDING_FILE)).unwrap();
        assert!(raw.contains("2024-03-01,2024-03-05"));

        let reopened = CsvStore::open(&dir).unwrap();
        let listed = reopened.list_pending().await.unwrap();
        assert_eq!(listed, vec![s]);
    }

    #[tokio::test]
    async fn legacy_file_gets_stable_ids() {
        let dir = test_dir("legacy");
        fs::write(
            dir.join(BOOKINGS_FILE),
            "Name,Email,Check-in,Check-out,Notes\n\
             Ann,ann@example.com,2024-03-10,2024-03-12,\n\
             Bob,bob@example.com,not a date,2024-04-02,late check-in\n",
        )
        .unwrap();

        let store = CsvStore::open(&dir).unwrap();
        let first = store.list_confirmed().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].name, "Ann");
        assert_eq!(first[0].check_in, Some(d("2024-03-10")));
        assert_eq!(first[0].notes, None);
        assert_eq!(first[0].status, StayStatus::Confirmed);
        assert_eq!(first[1].check_in, None);
        assert_eq!(first[1].check_out, Some(d("2024-04-02")));
        assert_eq!(first[1].notes.as_deref(), Some("late check-in"));

        let again = CsvStore::open(&dir).unwrap().list_confirmed().await.unwrap();
        let ids: Vec<Ulid> = first.iter().map(|s| s.id).collect();
        let ids_again: Vec<Ulid> = again.iter().map(|s| s.id).collect();
        assert_eq!(ids, ids_again);
    }

    #[tokio::test]
    async fn remove_keeps_unparsed_cells_verbatim() {
        let dir = test_dir("verbatim");
        fs::write(
            dir.join(PENDING_FILE),
            "Name,Email,Check-in,Check-out,Notes\n\
             Ann,ann@example.com,someday,2024-03-12,\n\
             Bob,bob@example.com,2024-04-01,2024-04-02,\n",
        )
        .unwrap();

        let store = CsvStore::open(&dir).unwrap();
        let pending = store.list_pending().await.unwrap();
        assert!(store.remove_pending(pending[1].id).await.unwrap());
        assert!(!store.remove_pending(pending[1].id).await.unwrap());

        let raw = fs::read_to_string(dir.join(PENDING_FILE)).unwrap();
        assert!(raw.contains("someday"));
        assert!(!raw.contains("Bob"));
        assert_eq!(store.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blocked_ranges_persist() {
        let dir = test_dir("blocked");
        let store = CsvStore::open(&dir).unwrap();
        let range = BlockedRange {
            id: store.next_id(),
            start: Some(d("2024-12-24")),
            end: Some(d("2024-12-26")),
        };
        store.append_blocked(range.clone()).await.unwrap();
        assert_eq!(store.list_blocked().await.unwrap(), vec![range.clone()]);
        assert!(store.remove_blocked(range.id).await.unwrap());
        assert!(store.list_blocked().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn approve_style_move_between_files() {
        let dir = test_dir("move");
        let store = CsvStore::open(&dir).unwrap();
        let s = stay(&store, "2024-05-01", "2024-05-03");
        store.append_pending(s.clone()).await.unwrap();
        store.append_confirmed(s.confirmed()).await.unwrap();
        store.remove_pending(s.id).await.unwrap();

        let confirmed = store.list_confirmed().await.unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, s.id);
        assert_eq!(confirmed[0].status, StayStatus::Confirmed);
        assert!(store.list_pending().await.unwrap().is_empty());
    }

    #[test]
    fn push_follows_file_header_order() {
        let ids = IdMint::new();
        let mut table = Table {
            headers: StringRecord::from(vec!["Name", "Id", "Extra"]),
            rows: Vec::new(),
        };
        table.push(&[("Id", "x".into()), ("Name", "Ann".into())]);
        assert_eq!(table.rows[0], StringRecord::from(vec!["Ann", "x", ""]));
        // invalid id gets replaced in place
        assert_eq!(table.ensure_ids(&ids), 1);
        assert!(table.row_id(&table.rows[0]).is_some());
        assert_eq!(table.cell(&table.rows[0], "Name"), "Ann");
    }
}
