use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar day with no time component. The only time type in the crate.
pub type Day = NaiveDate;

/// Wire and storage format for every persisted date.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Day-first fallback accepted when reading hand-edited rows.
const DAY_FIRST_FORMAT: &str = "%d/%m/%Y";

/// Half-open day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: Day,
    pub end: Day,
}

impl DateSpan {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    /// `None` unless `end` is strictly after `start`.
    pub fn try_new(start: Day, end: Day) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Span covering the inclusive range `[first, last]`.
    pub fn inclusive(first: Day, last: Day) -> Option<Self> {
        let end = last.checked_add_days(Days::new(1))?;
        Self::try_new(first, end)
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.overlaps_bounds(other.start, other.end)
    }

    /// Overlap test against raw stored bounds, which may be inverted or empty.
    pub fn overlaps_bounds(&self, start: Day, end: Day) -> bool {
        self.start < end && start < self.end
    }

    pub fn contains_day(&self, day: Day) -> bool {
        self.start <= day && day < self.end
    }
}

/// Anything occupying a date range that can take part in a conflict check.
///
/// `bounds()` is the stored half-open range as written, without checking that
/// it is well ordered. It is `None` only when a date is missing or unparseable,
/// and only those records are ignored by conflict detection.
pub trait Dated {
    fn id(&self) -> Ulid;
    fn bounds(&self) -> Option<(Day, Day)>;
}

impl<T: Dated + ?Sized> Dated for &T {
    fn id(&self) -> Ulid {
        (**self).id()
    }

    fn bounds(&self) -> Option<(Day, Day)> {
        (**self).bounds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StayStatus {
    Pending,
    Confirmed,
}

impl StayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StayStatus::Pending => "pending",
            StayStatus::Confirmed => "confirmed",
        }
    }
}

/// A guest's requested or confirmed stay.
///
/// Dates are optional because persisted rows can carry cells that fail to
/// parse; stays created through the engine always have both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub check_in: Option<Day>,
    pub check_out: Option<Day>,
    pub notes: Option<String>,
    pub status: StayStatus,
}

impl Stay {
    /// Copy of this stay promoted to `Confirmed`.
    pub fn confirmed(&self) -> Stay {
        Stay {
            status: StayStatus::Confirmed,
            ..self.clone()
        }
    }

    pub fn has_dates(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_some()
    }
}

impl Dated for Stay {
    fn id(&self) -> Ulid {
        self.id
    }

    fn bounds(&self) -> Option<(Day, Day)> {
        Some((self.check_in?, self.check_out?))
    }
}

/// Administrator exclusion window. Both ends are occupied days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedRange {
    pub id: Ulid,
    pub start: Option<Day>,
    pub end: Option<Day>,
}

impl Dated for BlockedRange {
    fn id(&self) -> Ulid {
        self.id
    }

    fn bounds(&self) -> Option<(Day, Day)> {
        Some((self.start?, self.end?.checked_add_days(Days::new(1))?))
    }
}

/// Guest input for a new booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StayRequest {
    pub name: String,
    pub email: String,
    pub check_in: Day,
    pub check_out: Day,
    pub notes: Option<String>,
}

/// Payload handed to the notification sender after a request is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingNotice {
    pub stay_id: Ulid,
    pub name: String,
    pub email: String,
    pub check_in: Day,
    pub check_out: Day,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventLabel {
    Booked,
    Tentative,
    Unavailable,
}

impl EventLabel {
    pub fn title(&self) -> &'static str {
        match self {
            EventLabel::Booked => "Booked",
            EventLabel::Tentative => "Tentative",
            EventLabel::Unavailable => "Unavailable",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            EventLabel::Booked => "green",
            EventLabel::Tentative => "orange",
            EventLabel::Unavailable => "gray",
        }
    }
}

/// One display event. `end_date_exclusive` is the day after the last
/// occupied day, which is what calendar renderers expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub source_id: Ulid,
    pub label: EventLabel,
    pub start_date: Day,
    pub end_date_exclusive: Day,
}

/// Renderer-facing shape of a calendar event.
#[derive(Debug, Serialize)]
pub struct FeedEntry<'a> {
    pub title: &'a str,
    pub start: String,
    pub end: String,
    pub color: &'a str,
}

impl CalendarEvent {
    pub fn feed_entry(&self) -> FeedEntry<'static> {
        FeedEntry {
            title: self.label.title(),
            start: format_day(self.start_date),
            end: format_day(self.end_date_exclusive),
            color: self.label.color(),
        }
    }
}

/// Journal record format. Each variant is one store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RequestSubmitted { stay: Stay },
    RequestRemoved { id: Ulid },
    BookingConfirmed { stay: Stay },
    BookingRemoved { id: Ulid },
    RangeBlocked { range: BlockedRange },
    RangeUnblocked { id: Ulid },
}

// ── Date parsing ─────────────────────────────────────────────────

/// A persisted cell that could not be turned into a typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub column: &'static str,
    pub value: String,
}

impl std::fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value.is_empty() {
            write!(f, "malformed record: {} is empty", self.column)
        } else {
            write!(f, "malformed record: {} = {:?}", self.column, self.value)
        }
    }
}

impl std::error::Error for MalformedRecord {}

/// Parse a stored date cell. Accepts `YYYY-MM-DD` (optionally followed by a
/// time, which is dropped) and falls back to day-first `DD/MM/YYYY`.
pub fn parse_day(column: &'static str, raw: &str) -> Result<Day, MalformedRecord> {
    let trimmed = raw.trim();
    let malformed = || MalformedRecord {
        column,
        value: trimmed.to_string(),
    };
    if trimmed.is_empty() {
        return Err(malformed());
    }
    if let Ok(day) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
        return Ok(day);
    }
    if let Some(prefix) = trimmed.get(..10)
        && trimmed.len() > 10
        && let Ok(day) = NaiveDate::parse_from_str(prefix, DATE_FORMAT)
    {
        return Ok(day);
    }
    NaiveDate::parse_from_str(trimmed, DAY_FIRST_FORMAT).map_err(|_| malformed())
}

pub fn format_day(day: Day) -> String {
    day.format(DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Day {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn span_basics() {
        let s = DateSpan::new(d("2024-03-10"), d("2024-03-15"));
        assert_eq!(s.nights(), 5);
        assert!(s.contains_day(d("2024-03-10")));
        assert!(s.contains_day(d("2024-03-14")));
        assert!(!s.contains_day(d("2024-03-15"))); // check-out day is free
    }

    #[test]
    fn span_overlap() {
        let a = DateSpan::new(d("2024-03-10"), d("2024-03-15"));
        let b = DateSpan::new(d("2024-03-14"), d("2024-03-20"));
        let c = DateSpan::new(d("2024-03-15"), d("2024-03-20"));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // back-to-back
    }

    #[test]
    fn try_new_rejects_empty_and_inverted() {
        assert!(DateSpan::try_new(d("2024-03-10"), d("2024-03-10")).is_none());
        assert!(DateSpan::try_new(d("2024-03-11"), d("2024-03-10")).is_none());
        assert!(DateSpan::try_new(d("2024-03-10"), d("2024-03-11")).is_some());
    }

    #[test]
    fn inclusive_span_covers_last_day() {
        let s = DateSpan::inclusive(d("2024-03-10"), d("2024-03-12")).unwrap();
        assert_eq!(s.end, d("2024-03-13"));
        // single-day block
        let one = DateSpan::inclusive(d("2024-03-10"), d("2024-03-10")).unwrap();
        assert_eq!(one.nights(), 1);
        assert!(DateSpan::inclusive(d("2024-03-10"), d("2024-03-09")).is_none());
    }

    #[test]
    fn stay_bounds_require_both_dates() {
        let mut stay = Stay {
            id: Ulid::new(),
            name: "Ann".into(),
            email: "ann@example.com".into(),
            check_in: Some(d("2024-03-10")),
            check_out: None,
            notes: None,
            status: StayStatus::Pending,
        };
        assert!(stay.bounds().is_none());
        assert!(!stay.has_dates());
        stay.check_out = Some(d("2024-03-12"));
        assert_eq!(stay.bounds(), Some((d("2024-03-10"), d("2024-03-12"))));
        stay.check_out = Some(d("2024-03-08"));
        assert_eq!(stay.bounds(), Some((d("2024-03-10"), d("2024-03-08"))));
        assert_eq!(stay.confirmed().status, StayStatus::Confirmed);
        assert_eq!(stay.confirmed().id, stay.id);
    }

    #[test]
    fn blocked_range_bounds_are_inclusive() {
        let range = BlockedRange {
            id: Ulid::new(),
            start: Some(d("2024-12-24")),
            end: Some(d("2024-12-26")),
        };
        assert_eq!(range.bounds(), Some((d("2024-12-24"), d("2024-12-27"))));
    }

    #[test]
    fn parse_day_formats() {
        assert_eq!(parse_day("Check-in", "2024-03-01"), Ok(d("2024-03-01")));
        assert_eq!(parse_day("Check-in", " 2024-03-01 "), Ok(d("2024-03-01")));
        assert_eq!(parse_day("Check-in", "2024-03-01 00:00:00"), Ok(d("2024-03-01")));
        assert_eq!(parse_day("Check-in", "01/03/2024"), Ok(d("2024-03-01")));
    }

    #[test]
    fn parse_day_rejects_garbage() {
        let err = parse_day("Check-out", "next tuesday").unwrap_err();
        assert_eq!(err.column, "Check-out");
        assert_eq!(err.value, "next tuesday");
        assert!(parse_day("Start", "").is_err());
        assert!(parse_day("Start", "2024-02-30").is_err());
        assert!(parse_day("End", "2024-13-01 00:00:00").is_err());
    }

    #[test]
    fn format_round_trips() {
        let day = d("2024-03-01");
        assert_eq!(format_day(day), "2024-03-01");
        assert_eq!(parse_day("Start", &format_day(day)), Ok(day));
    }

    #[test]
    fn feed_entry_shape() {
        let event = CalendarEvent {
            source_id: Ulid::new(),
            label: EventLabel::Tentative,
            start_date: d("2024-03-10"),
            end_date_exclusive: d("2024-03-13"),
        };
        let json = serde_json::to_value(event.feed_entry()).unwrap();
        assert_eq!(json["title"], "Tentative");
        assert_eq!(json["start"], "2024-03-10");
        assert_eq!(json["end"], "2024-03-13");
        assert_eq!(json["color"], "orange");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingConfirmed {
            stay: Stay {
                id: Ulid::new(),
                name: "Test".into(),
                email: "t@example.com".into(),
                check_in: Some(d("2024-03-10")),
                check_out: None,
                notes: Some("late arrival".into()),
                status: StayStatus::Confirmed,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
