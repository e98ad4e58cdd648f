use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// True if `candidate` overlaps any record in `existing`.
///
/// Records with a missing date are skipped. Any record with both dates is
/// compared as stored, even when its end is not after its start.
pub fn has_conflict<I>(candidate: &DateSpan, existing: I) -> bool
where
    I: IntoIterator,
    I::Item: Dated,
{
    first_conflict(candidate, existing).is_some()
}

/// Id of the first record in `existing` that overlaps `candidate`.
pub fn first_conflict<I>(candidate: &DateSpan, existing: I) -> Option<Ulid>
where
    I: IntoIterator,
    I::Item: Dated,
{
    existing
        .into_iter()
        .find(|record| {
            record
                .bounds()
                .is_some_and(|(start, end)| candidate.overlaps_bounds(start, end))
        })
        .map(|record| record.id())
}

pub(crate) fn check_no_conflict<I>(candidate: &DateSpan, existing: I) -> Result<(), EngineError>
where
    I: IntoIterator,
    I::Item: Dated,
{
    match first_conflict(candidate, existing) {
        Some(id) => Err(EngineError::DateConflict(id)),
        None => Ok(()),
    }
}

/// Validate guest input and return the requested span.
pub(crate) fn validate_request(request: &StayRequest) -> Result<DateSpan, EngineError> {
    if request.name.trim().is_empty() {
        return Err(EngineError::MissingField("name"));
    }
    if request.email.trim().is_empty() {
        return Err(EngineError::MissingField("email"));
    }
    if request.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    if request.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    if let Some(ref notes) = request.notes
        && notes.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    let span = DateSpan::try_new(request.check_in, request.check_out).ok_or(
        EngineError::InvalidRange {
            start: request.check_in,
            end: request.check_out,
        },
    )?;
    if span.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(span)
}

/// Validate an inclusive administrator block.
pub(crate) fn validate_block(start: Day, end: Day) -> Result<DateSpan, EngineError> {
    let span = DateSpan::inclusive(start, end).ok_or(EngineError::InvalidRange { start, end })?;
    if span.nights() > MAX_BLOCK_DAYS {
        return Err(EngineError::LimitExceeded("block too long"));
    }
    Ok(span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};

    fn d(s: &str) -> Day {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn stay(check_in: Option<&str>, check_out: Option<&str>) -> Stay {
        Stay {
            id: Ulid::new(),
            name: "Guest".into(),
            email: "guest@example.com".into(),
            check_in: check_in.map(d),
            check_out: check_out.map(d),
            notes: None,
            status: StayStatus::Confirmed,
        }
    }

    fn request(check_in: &str, check_out: &str) -> StayRequest {
        StayRequest {
            name: "Guest".into(),
            email: "guest@example.com".into(),
            check_in: d(check_in),
            check_out: d(check_out),
            notes: None,
        }
    }

    #[test]
    fn overlap_on_shared_night() {
        let existing = [stay(Some("2024-03-14"), Some("2024-03-20"))];
        let candidate = DateSpan::new(d("2024-03-10"), d("2024-03-15"));
        assert!(has_conflict(&candidate, &existing));
        assert_eq!(first_conflict(&candidate, &existing), Some(existing[0].id));
    }

    #[test]
    fn back_to_back_is_free() {
        let existing = [stay(Some("2024-03-14"), Some("2024-03-20"))];
        let before = DateSpan::new(d("2024-03-10"), d("2024-03-14"));
        let after = DateSpan::new(d("2024-03-20"), d("2024-03-25"));
        assert!(!has_conflict(&before, &existing));
        assert!(!has_conflict(&after, &existing));
    }

    #[test]
    fn containment_conflicts_both_ways() {
        let outer = [stay(Some("2024-03-01"), Some("2024-03-31"))];
        let inner = DateSpan::new(d("2024-03-10"), d("2024-03-12"));
        assert!(has_conflict(&inner, &outer));

        let small = [stay(Some("2024-03-10"), Some("2024-03-12"))];
        let big = DateSpan::new(d("2024-03-01"), d("2024-03-31"));
        assert!(has_conflict(&big, &small));
    }

    #[test]
    fn malformed_records_are_skipped() {
        let candidate = DateSpan::new(d("2024-03-10"), d("2024-03-15"));
        let existing = [
            stay(None, Some("2024-03-12")),
            stay(Some("2024-03-11"), None),
            stay(None, None),
        ];
        assert!(!has_conflict(&candidate, &existing));
    }

    #[test]
    fn stored_inverted_rows_still_block() {
        let inverted = stay(Some("2024-03-13"), Some("2024-03-11"));
        let id = inverted.id;
        let candidate = DateSpan::new(d("2024-03-10"), d("2024-03-14"));
        assert_eq!(first_conflict(&candidate, [&inverted]), Some(id));

        let zero_night = stay(Some("2024-03-12"), Some("2024-03-12"));
        assert!(has_conflict(&candidate, [&zero_night]));

        // [03-13, 03-11) vs [03-11, 03-13): 03-11 < 03-11 is false
        let adjacent = DateSpan::new(d("2024-03-11"), d("2024-03-13"));
        assert!(!has_conflict(&adjacent, [&inverted]));
    }

    #[test]
    fn malformed_record_does_not_hide_later_conflict() {
        let candidate = DateSpan::new(d("2024-03-10"), d("2024-03-15"));
        let existing = [stay(None, None), stay(Some("2024-03-12"), Some("2024-03-13"))];
        assert_eq!(first_conflict(&candidate, &existing), Some(existing[1].id));
    }

    #[test]
    fn empty_collection_never_conflicts() {
        let candidate = DateSpan::new(d("2024-03-10"), d("2024-03-15"));
        let existing: Vec<Stay> = Vec::new();
        assert!(!has_conflict(&candidate, &existing));
    }

    #[test]
    fn conflict_is_symmetric() {
        let base = d("2024-03-01");
        let day = |n: u64| base.checked_add_days(Days::new(n)).unwrap();
        for a_start in 0..6 {
            for a_end in (a_start + 1)..7 {
                for b_start in 0..6 {
                    for b_end in (b_start + 1)..7 {
                        let a = DateSpan::new(day(a_start), day(a_end));
                        let b = DateSpan::new(day(b_start), day(b_end));
                        let stay_a = Stay {
                            check_in: Some(a.start),
                            check_out: Some(a.end),
                            ..stay(None, None)
                        };
                        let stay_b = Stay {
                            check_in: Some(b.start),
                            check_out: Some(b.end),
                            ..stay(None, None)
                        };
                        assert_eq!(
                            has_conflict(&a, [&stay_b]),
                            has_conflict(&b, [&stay_a]),
                            "{a:?} vs {b:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn blocked_ranges_use_inclusive_end() {
        let blocked = [BlockedRange {
            id: Ulid::new(),
            start: Some(d("2024-03-10")),
            end: Some(d("2024-03-12")),
        }];
        // 12th is blocked
        assert!(has_conflict(&DateSpan::new(d("2024-03-12"), d("2024-03-14")), &blocked));
        assert!(!has_conflict(&DateSpan::new(d("2024-03-13"), d("2024-03-14")), &blocked));
        assert!(!has_conflict(&DateSpan::new(d("2024-03-08"), d("2024-03-10")), &blocked));
    }

    #[test]
    fn validate_rejects_zero_and_negative_nights() {
        assert!(matches!(
            validate_request(&request("2024-03-10", "2024-03-10")),
            Err(EngineError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_request(&request("2024-03-10", "2024-03-09")),
            Err(EngineError::InvalidRange { .. })
        ));
        let span = validate_request(&request("2024-03-10", "2024-03-11")).unwrap();
        assert_eq!(span.nights(), 1);
    }

    #[test]
    fn validate_requires_name_and_email() {
        let mut req = request("2024-03-10", "2024-03-12");
        req.name = "  ".into();
        assert!(matches!(validate_request(&req), Err(EngineError::MissingField("name"))));
        let mut req = request("2024-03-10", "2024-03-12");
        req.email = String::new();
        assert!(matches!(validate_request(&req), Err(EngineError::MissingField("email"))));
    }

    #[test]
    fn validate_limits() {
        let mut req = request("2024-03-10", "2024-03-12");
        req.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
        assert!(matches!(validate_request(&req), Err(EngineError::LimitExceeded(_))));

        let req = request("2024-01-01", "2025-06-01");
        assert!(matches!(validate_request(&req), Err(EngineError::LimitExceeded("stay too long"))));
    }

    #[test]
    fn validate_block_allows_single_day() {
        let span = validate_block(d("2024-03-10"), d("2024-03-10")).unwrap();
        assert_eq!(span.nights(), 1);
        assert!(matches!(
            validate_block(d("2024-03-10"), d("2024-03-09")),
            Err(EngineError::InvalidRange { .. })
        ));
    }
}
