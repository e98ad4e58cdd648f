mod calendar;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use calendar::project;
pub use conflict::{first_conflict, has_conflict};
pub use error::EngineError;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::notify::NotificationSender;
use crate::store::ReservationStore;

/// Opt-in behaviors beyond the default lifecycle rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    /// Also reject requests that overlap an administrator-blocked range.
    pub check_blocked_ranges: bool,
    /// Re-run the conflict check against confirmed stays when approving.
    pub revalidate_on_approve: bool,
}

/// The request lifecycle over a pluggable store and notifier.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    notifier: Arc<dyn NotificationSender>,
    policy: Policy,
    /// Serializes check-then-write sequences issued through this engine.
    /// Writers outside the process still race (last writer wins).
    lifecycle: Mutex<()>,
}

impl Engine {
    pub fn new(store: Arc<dyn ReservationStore>, notifier: Arc<dyn NotificationSender>) -> Self {
        Self::with_policy(store, notifier, Policy::default())
    }

    pub fn with_policy(
        store: Arc<dyn ReservationStore>,
        notifier: Arc<dyn NotificationSender>,
        policy: Policy,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }
}
