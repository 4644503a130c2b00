//! Notification outbox drain.
//!
//! Components enqueue rows; an external delivery channel (the bot
//! transport) consumes them. Delivery is at-least-once with idempotent
//! marking: a row is flipped to sent exactly once, and permanent
//! failures (blocked recipient) are marked done without retry so they
//! cannot wedge the queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::persistence::{self, NotificationRow};
use crate::{GameService, StoreError};

/// Rows drained per pass, urgent first.
const DRAIN_BATCH: usize = 50;

/// Seconds between drain passes.
const DRAIN_INTERVAL_SECS: u64 = 10;

#[derive(Debug)]
pub enum DeliveryError {
    /// The recipient is unreachable for good (blocked the bot, deleted
    /// the chat). Mark done, never retry.
    Permanent(String),
    /// A transient transport failure; leave the row queued for the next
    /// pass.
    Transient(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent(detail) => write!(f, "permanent delivery failure: {detail}"),
            Self::Transient(detail) => write!(f, "transient delivery failure: {detail}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// The opaque message transport. The production implementation lives
/// with the bot process; tests and the standalone scheduler use
/// [`LogChannel`].
pub trait DeliveryChannel {
    fn deliver(&self, notification: &NotificationRow) -> Result<(), DeliveryError>;
}

/// Fallback channel: writes deliveries to the log. Useful when the
/// transport runs in another process and only the outbox is shared.
#[derive(Debug, Default)]
pub struct LogChannel;

impl DeliveryChannel for LogChannel {
    fn deliver(&self, notification: &NotificationRow) -> Result<(), DeliveryError> {
        info!(
            user_id = notification.user_id,
            category = notification.category.as_str(),
            priority = notification.priority.as_str(),
            body = %notification.body,
            "notification delivered to log"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub dropped_permanent: usize,
    pub deferred: usize,
}

/// One drain pass: fetch a batch of unsent rows and push each through
/// the channel. A transient failure defers only its own row.
pub fn drain_once<C: DeliveryChannel>(
    service: &mut GameService,
    channel: &C,
) -> Result<DrainReport, StoreError> {
    let now = Utc::now();
    let pending = persistence::pending_notifications(service.store_mut().connection(), DRAIN_BATCH)?;

    let mut report = DrainReport::default();
    for notification in pending {
        match channel.deliver(&notification) {
            Ok(()) => {
                persistence::mark_notification_sent(
                    service.store_mut().connection(),
                    notification.id,
                    now,
                )?;
                report.delivered += 1;
            }
            Err(DeliveryError::Permanent(detail)) => {
                warn!(
                    notification_id = notification.id,
                    user_id = notification.user_id,
                    detail = %detail,
                    "dropping undeliverable notification"
                );
                persistence::mark_notification_sent(
                    service.store_mut().connection(),
                    notification.id,
                    now,
                )?;
                report.dropped_permanent += 1;
            }
            Err(DeliveryError::Transient(detail)) => {
                error!(
                    notification_id = notification.id,
                    user_id = notification.user_id,
                    detail = %detail,
                    "notification deferred"
                );
                report.deferred += 1;
            }
        }
    }
    Ok(report)
}

/// Drain the outbox forever on a fixed interval.
pub async fn run_drain<C: DeliveryChannel>(service: Arc<Mutex<GameService>>, channel: C) {
    let mut ticker = tokio::time::interval(StdDuration::from_secs(DRAIN_INTERVAL_SECS));
    info!("notification drain started (every {DRAIN_INTERVAL_SECS}s)");
    loop {
        ticker.tick().await;
        let mut service = service.lock().await;
        match drain_once(&mut service, &channel) {
            Ok(report) if report.delivered + report.dropped_permanent + report.deferred > 0 => {
                info!(
                    delivered = report.delivered,
                    dropped = report.dropped_permanent,
                    deferred = report.deferred,
                    "drain pass finished"
                );
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "drain pass failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::NewUserProfile;
    use chrono::TimeZone;
    use contracts::{NotificationCategory, NotificationPriority};

    struct FlakyChannel;

    impl DeliveryChannel for FlakyChannel {
        fn deliver(&self, notification: &NotificationRow) -> Result<(), DeliveryError> {
            match notification.body.as_str() {
                "blocked" => Err(DeliveryError::Permanent("blocked by recipient".to_string())),
                "timeout" => Err(DeliveryError::Transient("connect timeout".to_string())),
                _ => Ok(()),
            }
        }
    }

    fn service_with_queue(bodies: &[&str]) -> GameService {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut service = GameService::open_in_memory(now).expect("open service");
        service
            .initialize_user(1, &NewUserProfile::default(), None, now)
            .expect("bootstrap");
        for body in bodies {
            persistence::enqueue_notification(
                service.store_mut().connection(),
                1,
                body,
                NotificationCategory::System,
                NotificationPriority::Normal,
                now,
            )
            .expect("enqueue");
        }
        service
    }

    #[test]
    fn permanent_failures_are_marked_done_without_retry() {
        let mut service = service_with_queue(&["hello", "blocked"]);
        let report = drain_once(&mut service, &FlakyChannel).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped_permanent, 1);

        // Nothing left: the blocked row was consumed, not requeued.
        let second = drain_once(&mut service, &FlakyChannel).unwrap();
        assert_eq!(second, DrainReport::default());
    }

    #[test]
    fn transient_failures_stay_queued() {
        let mut service = service_with_queue(&["timeout"]);
        let report = drain_once(&mut service, &FlakyChannel).unwrap();
        assert_eq!(report.deferred, 1);

        let again = drain_once(&mut service, &FlakyChannel).unwrap();
        assert_eq!(again.deferred, 1, "row survives for the next pass");
    }

    #[test]
    fn batch_failure_does_not_abort_other_rows() {
        let mut service = service_with_queue(&["a", "timeout", "b", "blocked", "c"]);
        let report = drain_once(&mut service, &FlakyChannel).unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.dropped_permanent, 1);
        assert_eq!(report.deferred, 1);
    }
}
