use super::ChangeEvent;
use crate::{config::FeedConfig, error::PartdeskError};
use sqlx::{postgres::PgListener, PgPool};
use std::{cmp::min, time::Duration};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Postgres notification channel written to by the `notify_change` trigger.
pub const CHANNEL: &str = "partdesk_changes";

/// Amount of undelivered messages a slow subscriber may fall behind by before it
/// has to resynchronize.
const CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum FeedMessage {
    Change(ChangeEvent),

    /// Events may have been lost, subscribers have to reload.
    Resync,
}

/// Fan-out of database change notifications to live sessions.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<FeedMessage>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    /// Subscribe to the changes of a single organization.
    pub fn subscribe(&self, organization_id: Uuid) -> OrgEvents {
        OrgEvents {
            organization_id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn publish(&self, message: FeedMessage) {
        // Nobody listening is fine.
        let _ = self.tx.send(message);
    }

    /// Decode a notification payload and publish it.
    pub fn publish_payload(&self, payload: &str) -> Result<(), PartdeskError> {
        let event = serde_json::from_str::<ChangeEvent>(payload)?;
        debug!(
            "{:?} {:?} for {}",
            event.kind, event.table, event.organization_id
        );
        self.publish(FeedMessage::Change(event));
        Ok(())
    }

    /// Spawn the task relaying Postgres notifications into the feed. Reconnects with an
    /// exponential backoff whenever the connection drops.
    pub fn listen(&self, pool: PgPool, config: FeedConfig) -> JoinHandle<()> {
        let feed = self.clone();

        tokio::spawn(async move {
            let mut backoff = Backoff::new(config.reconnect_min(), config.reconnect_max());

            loop {
                match feed.relay(&pool, &mut backoff).await {
                    Ok(()) => warn!("Change feed connection closed"),
                    Err(e) => error!("Change feed error: {e}"),
                }

                // Anything sent while we were away is lost.
                feed.publish(FeedMessage::Resync);

                let delay = backoff.next_delay();
                info!("Reconnecting change feed in {}ms", delay.as_millis());
                tokio::time::sleep(delay).await;
            }
        })
    }

    async fn relay(&self, pool: &PgPool, backoff: &mut Backoff) -> Result<(), PartdeskError> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(CHANNEL).await?;

        info!("Listening for changes on '{CHANNEL}'");

        // `try_recv` yields `None` once the connection is lost instead of silently
        // reconnecting, which would hide the gap from subscribers.
        while let Some(notification) = listener.try_recv().await? {
            backoff.reset();
            if let Err(e) = self.publish_payload(notification.payload()) {
                warn!("Discarding malformed change notification: {e}");
            }
        }

        Ok(())
    }
}

/// Receiver of the change feed filtered to one organization.
#[derive(Debug)]
pub struct OrgEvents {
    organization_id: Uuid,
    rx: broadcast::Receiver<FeedMessage>,
}

impl OrgEvents {
    /// Next message for this organization. `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        loop {
            match self.rx.recv().await {
                Ok(FeedMessage::Change(event)) if event.organization_id != self.organization_id => {
                    continue
                }
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Live session for {} lagged by {skipped} messages",
                        self.organization_id
                    );
                    return Some(FeedMessage::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug)]
struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            current: min,
            min,
            max: max.max(min),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = min(self.current * 2, self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{ChangeKind, Table};
    use serde_json::json;

    #[test]
    fn backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(3));

        let delays = (0..5)
            .map(|_| backoff.next_delay().as_millis())
            .collect::<Vec<_>>();
        assert_eq!(delays, vec![500, 1000, 2000, 3000, 3000]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn subscribers_only_see_their_organization() {
        let feed = ChangeFeed::new();
        let org = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut events = feed.subscribe(org);

        for id in [other, org] {
            let payload = json!({
                "table": "parts",
                "type": "DELETE",
                "organization_id": id,
                "record": null,
                "old_record": { "id": Uuid::new_v4() }
            });
            feed.publish_payload(&payload.to_string()).unwrap();
        }

        let Some(FeedMessage::Change(event)) = events.recv().await else {
            panic!("expected a change");
        };
        assert_eq!(event.organization_id, org);
        assert_eq!(event.table, Table::Parts);
        assert_eq!(event.kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn resync_reaches_every_subscriber() {
        let feed = ChangeFeed::new();
        let mut a = feed.subscribe(Uuid::new_v4());
        let mut b = feed.subscribe(Uuid::new_v4());

        feed.publish(FeedMessage::Resync);

        assert!(matches!(a.recv().await, Some(FeedMessage::Resync)));
        assert!(matches!(b.recv().await, Some(FeedMessage::Resync)));
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_to_resync() {
        let feed = ChangeFeed::new();
        let org = Uuid::new_v4();
        let mut events = feed.subscribe(org);

        for _ in 0..CAPACITY + 10 {
            feed.publish(FeedMessage::Resync);
        }

        assert!(matches!(events.recv().await, Some(FeedMessage::Resync)));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let feed = ChangeFeed::new();
        assert!(feed.publish_payload("{\"table\":\"invoices\"}").is_err());
    }
}
