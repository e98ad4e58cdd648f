use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::model::BookingNotice;

const CHANNEL_CAPACITY: usize = 256;

/// Fire-and-forget sink for "new request" notices.
///
/// Implementations must not fail the caller: delivery problems are logged
/// and dropped.
pub trait NotificationSender: Send + Sync {
    fn notify(&self, notice: &BookingNotice);
}

/// Broadcast hub for booking notices. Sending with nobody subscribed is a no-op.
pub struct NotifyHub {
    sender: broadcast::Sender<BookingNotice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingNotice> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl NotificationSender for NotifyHub {
    fn notify(&self, notice: &BookingNotice) {
        if self.sender.send(notice.clone()).is_err() {
            debug!(stay_id = %notice.stay_id, "no notice subscribers");
        }
    }
}

/// Drain `rx`, logging each notice. Runs until the hub is dropped.
pub async fn log_notices(mut rx: broadcast::Receiver<BookingNotice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => info!(
                stay_id = %notice.stay_id,
                email = %notice.email,
                "new booking request from {} for {} to {}",
                notice.name,
                notice.check_in,
                notice.check_out,
            ),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("notice log fell behind, {missed} notices dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn notice() -> BookingNotice {
        BookingNotice {
            stay_id: Ulid::new(),
            name: "Ann".into(),
            email: "ann@example.com".into(),
            check_in: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2024, 3, 12).unwrap(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        let n = notice();
        hub.notify(&n);
        assert_eq!(rx.recv().await.unwrap(), n);
    }

    #[test]
    fn notify_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        assert_eq!(hub.subscriber_count(), 0);
        hub.notify(&notice());
    }

    #[tokio::test]
    async fn log_task_ends_when_hub_dropped() {
        let hub = NotifyHub::new();
        let task = tokio::spawn(log_notices(hub.subscribe()));
        hub.notify(&notice());
        drop(hub);
        task.await.unwrap();
    }
}
