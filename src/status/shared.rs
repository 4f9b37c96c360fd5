//! Lock-guarded status shared across tasks

use std::time::Duration;
use tcm_shared::{DecodedValue, Outcome, Status, Verdict};
use tokio::sync::{watch, Mutex};

/// Latest decoded value and tuning percentage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSnapshot {
    pub value: Option<DecodedValue>,
    pub percent: Option<String>,
}

/// Status record behind one exclusive lock
///
/// Every write goes through [`SharedStatus::update`], which publishes the
/// resulting outcome while the lock is still held so watchers never observe
/// an outcome out of order.
pub struct SharedStatus {
    status: Mutex<Status>,
    outcome_tx: watch::Sender<Outcome>,
}

impl SharedStatus {
    pub fn new(max_retries: u32) -> Self {
        let status = Status::new(max_retries);
        let (outcome_tx, _) = watch::channel(status.outcome());
        Self {
            status: Mutex::new(status),
            outcome_tx,
        }
    }

    /// Run `f` against the status under the lock
    pub async fn update<R>(&self, f: impl FnOnce(&mut Status) -> R) -> R {
        let mut status = self.status.lock().await;
        let result = f(&mut status);
        self.outcome_tx.send_replace(status.outcome());
        result
    }

    /// Classify a reply against the pending command
    pub async fn apply_reply(&self, reply: &str) -> Option<Verdict> {
        self.update(|status| status.apply_reply(reply)).await
    }

    /// Consistent copy of the whole record
    pub async fn snapshot(&self) -> Status {
        self.status.lock().await.clone()
    }

    /// Latest decoded value and percentage
    pub async fn values(&self) -> ValueSnapshot {
        let status = self.status.lock().await;
        ValueSnapshot {
            value: status.decoded_value().cloned(),
            percent: status.decoded_percent().map(str::to_owned),
        }
    }

    #[cfg(test)]
    pub fn outcome(&self) -> Outcome {
        *self.outcome_tx.borrow()
    }

    /// Wait until the outcome leaves `Sent`, for at most `budget`
    ///
    /// Returns `false` when the budget elapsed with the command still `Sent`.
    pub async fn wait_for_reply(&self, budget: Duration) -> bool {
        let mut outcome_rx = self.outcome_tx.subscribe();
        let changed = tokio::time::timeout(
            budget,
            outcome_rx.wait_for(|outcome| *outcome != Outcome::Sent),
        )
        .await;
        matches!(changed, Ok(Ok(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tcm_shared::CommandKind;

    #[tokio::test]
    async fn test_update_publishes_outcome() {
        let shared = SharedStatus::new(5);
        assert_eq!(shared.outcome(), Outcome::Init);

        shared.update(|s| s.reset(1)).await;
        assert_eq!(shared.outcome(), Outcome::Init);

        shared.update(|s| s.mark_sent(CommandKind::Value)).await;
        assert_eq!(shared.outcome(), Outcome::Sent);

        assert_eq!(shared.apply_reply("RPY1=25.3@0").await, Some(Verdict::Ok));
        assert_eq!(shared.outcome(), Outcome::Ok);
        assert_eq!(
            shared.values().await,
            ValueSnapshot {
                value: Some(DecodedValue::Text("25.3".into())),
                percent: None,
            }
        );
    }

    #[tokio::test]
    async fn test_wait_wakes_on_reply() {
        let shared = Arc::new(SharedStatus::new(5));
        shared.update(|s| s.reset(1)).await;
        shared.update(|s| s.mark_sent(CommandKind::Ack)).await;

        let writer = shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.apply_reply("RPY1REPLY=1").await;
        });

        assert!(shared.wait_for_reply(Duration::from_secs(5)).await);
        assert_eq!(shared.outcome(), Outcome::Ok);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_if_already_answered() {
        let shared = SharedStatus::new(5);
        shared.update(|s| s.reset(1)).await;
        shared.update(|s| s.mark_sent(CommandKind::Ack)).await;
        shared.apply_reply("RPY1REPLY=9").await;

        assert!(shared.wait_for_reply(Duration::from_millis(1)).await);
        assert_eq!(shared.outcome(), Outcome::Fail);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let shared = SharedStatus::new(5);
        shared.update(|s| s.reset(1)).await;
        shared.update(|s| s.mark_sent(CommandKind::Ack)).await;

        assert!(!shared.wait_for_reply(Duration::from_millis(20)).await);
        assert_eq!(shared.snapshot().await.outcome(), Outcome::Sent);
    }
}
