use chrono::Days;
use ulid::Ulid;

use crate::model::*;

/// Map the three collections to display events.
///
/// Each record becomes one event running from its first day to the day after
/// its last day. Records missing either date are dropped and counted; this
/// never fails.
pub fn project(confirmed: &[Stay], pending: &[Stay], blocked: &[BlockedRange]) -> Vec<CalendarEvent> {
    let mut events = Vec::with_capacity(confirmed.len() + pending.len() + blocked.len());
    let mut skipped = 0usize;

    let stays = confirmed
        .iter()
        .map(|s| (EventLabel::Booked, s))
        .chain(pending.iter().map(|s| (EventLabel::Tentative, s)));
    for (label, stay) in stays {
        match display_event(stay.id, label, stay.check_in, stay.check_out) {
            Some(event) => events.push(event),
            None => skipped += 1,
        }
    }
    for range in blocked {
        match display_event(range.id, EventLabel::Unavailable, range.start, range.end) {
            Some(event) => events.push(event),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!("calendar projection skipped {skipped} records with missing dates");
        metrics::counter!(crate::observability::MALFORMED_RECORDS_TOTAL, "stage" => "calendar")
            .increment(skipped as u64);
    }
    events
}

fn display_event(
    source_id: Ulid,
    label: EventLabel,
    first: Option<Day>,
    last: Option<Day>,
) -> Option<CalendarEvent> {
    let start_date = first?;
    let end_date_exclusive = last?.checked_add_days(Days::new(1))?;
    Some(CalendarEvent {
        source_id,
        label,
        start_date,
        end_date_exclusive,
    })
}
