use tracing::info;
use ulid::Ulid;

use crate::auth::AdminToken;
use crate::model::*;
use crate::observability::{APPROVALS_TOTAL, REQUESTS_TOTAL};

use super::conflict::{check_no_conflict, validate_block, validate_request};
use super::{Engine, EngineError};

impl Engine {
    /// Record a guest's request as pending if its dates are free.
    ///
    /// Checks against confirmed and pending stays (and blocked ranges when
    /// [`super::Policy::check_blocked_ranges`] is set), appends the new stay,
    /// then sends exactly one notice. Nothing is written on error.
    pub async fn submit_request(&self, request: StayRequest) -> Result<Stay, EngineError> {
        let result = self.try_submit(request).await;
        let outcome = match &result {
            Ok(_) => "accepted",
            Err(EngineError::DateConflict(_)) => "conflict",
            Err(EngineError::StoreUnavailable(_)) => "store_error",
            Err(_) => "invalid",
        };
        metrics::counter!(REQUESTS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_submit(&self, request: StayRequest) -> Result<Stay, EngineError> {
        let span = validate_request(&request)?;

        let guard = self.lifecycle.lock().await;
        let confirmed = self.store.list_confirmed().await?;
        let pending = self.store.list_pending().await?;
        check_no_conflict(&span, confirmed.iter().chain(pending.iter()))?;
        if self.policy.check_blocked_ranges {
            let blocked = self.store.list_blocked().await?;
            check_no_conflict(&span, &blocked)?;
        }

        let stay = Stay {
            id: self.store.next_id(),
            name: request.name.trim().to_string(),
            email: request.email.trim().to_string(),
            check_in: Some(span.start),
            check_out: Some(span.end),
            notes: request.notes.filter(|n| !n.trim().is_empty()),
            status: StayStatus::Pending,
        };
        self.store.append_pending(stay.clone()).await?;
        drop(guard);

        info!(id = %stay.id, "request submitted for {} to {}", span.start, span.end);
        self.notifier.notify(&BookingNotice {
            stay_id: stay.id,
            name: stay.name.clone(),
            email: stay.email.clone(),
            check_in: span.start,
            check_out: span.end,
            notes: stay.notes.clone(),
        });
        Ok(stay)
    }

    /// Promote a pending stay to confirmed.
    ///
    /// The confirmed copy is written before the pending row is removed, so a
    /// crash in between leaves the stay in both collections; approving it
    /// again then only clears the pending row.
    pub async fn approve(&self, _token: &AdminToken, id: Ulid) -> Result<Stay, EngineError> {
        let _guard = self.lifecycle.lock().await;
        let stay = self
            .store
            .list_pending()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or(EngineError::NotFound(id))?;

        let confirmed = self.store.list_confirmed().await?;
        let already_confirmed = confirmed.iter().any(|s| s.id == id);
        if self.policy.revalidate_on_approve
            && !already_confirmed
            && let Some(span) = stay.bounds().and_then(|(start, end)| DateSpan::try_new(start, end))
        {
            check_no_conflict(&span, &confirmed)?;
        }

        let booked = stay.confirmed();
        if !already_confirmed {
            self.store.append_confirmed(booked.clone()).await?;
        }
        self.store.remove_pending(id).await?;

        metrics::counter!(APPROVALS_TOTAL).increment(1);
        info!(%id, "request approved");
        Ok(booked)
    }

    /// Discard a pending request.
    pub async fn reject(&self, _token: &AdminToken, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.lifecycle.lock().await;
        if !self.store.remove_pending(id).await? {
            return Err(EngineError::NotFound(id));
        }
        info!(%id, "request rejected");
        Ok(())
    }

    pub async fn delete_confirmed(&self, _token: &AdminToken, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.lifecycle.lock().await;
        if !self.store.remove_confirmed(id).await? {
            return Err(EngineError::NotFound(id));
        }
        info!(%id, "booking deleted");
        Ok(())
    }

    /// Block `start..=end`. Existing stays in the window are left alone.
    pub async fn block_range(
        &self,
        _token: &AdminToken,
        start: Day,
        end: Day,
    ) -> Result<BlockedRange, EngineError> {
        validate_block(start, end)?;
        let _guard = self.lifecycle.lock().await;
        let range = BlockedRange {
            id: self.store.next_id(),
            start: Some(start),
            end: Some(end),
        };
        self.store.append_blocked(range.clone()).await?;
        info!(id = %range.id, "blocked {start} to {end}");
        Ok(range)
    }

    pub async fn unblock_range(&self, _token: &AdminToken, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.lifecycle.lock().await;
        if !self.store.remove_blocked(id).await? {
            return Err(EngineError::NotFound(id));
        }
        info!(%id, "range unblocked");
        Ok(())
    }
}
