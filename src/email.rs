//! Owner notification by email. Each new booking request becomes one plain
//! text message sent over SMTP with STARTTLS.

use std::fmt::Display;
use std::sync::Arc;

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::model::BookingNotice;
use crate::notify::NotificationSender;
use crate::observability::NOTIFICATION_FAILURES_TOTAL;

pub const SUBJECT: &str = "New Booking Request Received";

#[derive(Debug)]
pub enum EmailError {
    Address(lettre::address::AddressError),
    Message(lettre::error::Error),
    Transport(String),
}

impl Display for EmailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmailError::Address(e) => write!(f, "invalid email address: {e}"),
            EmailError::Message(e) => write!(f, "failed to build email: {e}"),
            EmailError::Transport(e) => write!(f, "smtp delivery failed: {e}"),
        }
    }
}

impl std::error::Error for EmailError {}

impl From<lettre::address::AddressError> for EmailError {
    fn from(e: lettre::address::AddressError) -> Self {
        EmailError::Address(e)
    }
}

impl From<lettre::error::Error> for EmailError {
    fn from(e: lettre::error::Error) -> Self {
        EmailError::Message(e)
    }
}

/// Sends a notice email to the owner for every new request.
///
/// `notify` never blocks the caller: delivery runs on a spawned task and a
/// failure is logged and counted, never returned.
pub struct EmailNotifier<T> {
    transport: Arc<T>,
    from: Mailbox,
    to: Mailbox,
}

impl<T> Clone for EmailNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

impl EmailNotifier<AsyncSmtpTransport<Tokio1Executor>> {
    /// STARTTLS relay on the configured host and port.
    pub fn smtp(config: &SmtpConfig) -> Result<Self, EmailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| EmailError::Transport(e.to_string()))?
            .port(config.port);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }
        Self::new(builder.build(), &config.from, &config.to)
    }
}

impl<T> EmailNotifier<T>
where
    T: AsyncTransport + Send + Sync + 'static,
    T::Error: Display,
{
    pub fn new(transport: T, from: &str, to: &str) -> Result<Self, EmailError> {
        Ok(Self {
            transport: Arc::new(transport),
            from: from.parse()?,
            to: to.parse()?,
        })
    }

    pub fn message(&self, notice: &BookingNotice) -> Result<Message, EmailError> {
        Ok(Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(body(notice))?)
    }

    /// Build and send one notice, waiting for the relay's answer.
    pub async fn deliver(&self, notice: &BookingNotice) -> Result<(), EmailError> {
        let message = self.message(notice)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        info!(stay_id = %notice.stay_id, to = %self.to, "booking notice emailed");
        Ok(())
    }

    async fn deliver_or_warn(&self, notice: &BookingNotice) {
        if let Err(e) = self.deliver(notice).await {
            metrics::counter!(NOTIFICATION_FAILURES_TOTAL).increment(1);
            warn!(stay_id = %notice.stay_id, "booking notice not sent: {e}");
        }
    }
}

impl<T> NotificationSender for EmailNotifier<T>
where
    T: AsyncTransport + Send + Sync + 'static,
    T::Error: Display,
{
    fn notify(&self, notice: &BookingNotice) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            metrics::counter!(NOTIFICATION_FAILURES_TOTAL).increment(1);
            warn!(stay_id = %notice.stay_id, "no runtime to send booking notice on");
            return;
        };
        let mailer = self.clone();
        let notice = notice.clone();
        runtime.spawn(async move { mailer.deliver_or_warn(&notice).await });
    }
}

/// Email every notice from the hub, one at a time. Runs until the hub is dropped.
pub async fn mail_notices<T>(mut rx: broadcast::Receiver<BookingNotice>, mailer: EmailNotifier<T>)
where
    T: AsyncTransport + Send + Sync + 'static,
    T::Error: Display,
{
    loop {
        match rx.recv().await {
            Ok(notice) => mailer.deliver_or_warn(&notice).await,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                metrics::counter!(NOTIFICATION_FAILURES_TOTAL).increment(missed);
                warn!("mailer fell behind, {missed} booking notices not emailed");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn body(notice: &BookingNotice) -> String {
    format!(
        "New booking request received:\n\n\
         Name: {}\n\
         Email: {}\n\
         Check-in: {}\n\
         Check-out: {}\n\
         Notes: {}\n\n\
         Please log in to the admin page to approve or decline this booking.\n",
        notice.name,
        notice.email,
        notice.check_in,
        notice.check_out,
        notice.notes.as_deref().unwrap_or(""),
    )
}
