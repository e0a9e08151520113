use super::{
    feed::{ChangeFeed, FeedMessage, OrgEvents},
    LiveView, PartPatch, PartSource, Snapshot,
};
use crate::{document::models::Part, error::PartdeskError};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info};
use uuid::Uuid;

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum Command {
    LoadMore(Reply<Result<usize, PartdeskError>>),
    Patch {
        ids: Vec<Uuid>,
        patch: PartPatch,
        reply: Reply<Vec<(Uuid, PartPatch)>>,
    },
    Remove {
        ids: Vec<Uuid>,
        reply: Reply<Vec<Part>>,
    },
    Restore(Vec<Part>),
}

/// Keeps one organization's live view current.
///
/// The view is owned by a single task which applies loads, change events and local
/// edits one at a time. Dropping the session aborts the task, which also drops its
/// feed subscription.
#[derive(Debug)]
pub struct LiveSession {
    organization_id: Uuid,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    task: JoinHandle<()>,
}

impl LiveSession {
    pub fn spawn(
        organization_id: Uuid,
        page_size: i64,
        source: Arc<dyn PartSource>,
        feed: &ChangeFeed,
    ) -> Self {
        // Subscribe before loading so that nothing written during the load is missed.
        let events = feed.subscribe(organization_id);
        let (commands, command_rx) = mpsc::channel(32);
        let (tx, snapshots) = watch::channel(Arc::new(Snapshot::initial(organization_id)));

        let view = LiveView::new(organization_id, page_size);
        let task = tokio::spawn(run(view, source, events, command_rx, tx));

        info!("Live session started for {organization_id}");

        Self {
            organization_id,
            commands,
            snapshots,
            task,
        }
    }

    pub fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    /// Wait for the initial load to finish.
    pub async fn loaded(&self) -> Result<Arc<Snapshot>, PartdeskError> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|snapshot| !snapshot.loading)
            .await
            .map_err(|_| closed())?;
        Ok(snapshot.clone())
    }

    pub async fn load_more(&self) -> Result<usize, PartdeskError> {
        self.request(Command::LoadMore).await?
    }

    pub async fn patch(
        &self,
        ids: Vec<Uuid>,
        patch: PartPatch,
    ) -> Result<Vec<(Uuid, PartPatch)>, PartdeskError> {
        self.request(|reply| Command::Patch { ids, patch, reply })
            .await
    }

    pub async fn remove(&self, ids: Vec<Uuid>) -> Result<Vec<Part>, PartdeskError> {
        self.request(|reply| Command::Remove { ids, reply }).await
    }

    pub async fn restore(&self, parts: Vec<Part>) -> Result<(), PartdeskError> {
        self.commands
            .send(Command::Restore(parts))
            .await
            .map_err(|_| closed())
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, PartdeskError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        debug!("Live session for {} dropped", self.organization_id);
        self.task.abort();
    }
}

fn closed() -> PartdeskError {
    PartdeskError::Remote("live session closed".to_string())
}

async fn run(
    mut view: LiveView,
    source: Arc<dyn PartSource>,
    mut events: OrgEvents,
    mut commands: mpsc::Receiver<Command>,
    tx: watch::Sender<Arc<Snapshot>>,
) {
    view.load(source.as_ref()).await;
    publish(&tx, &view);

    loop {
        tokio::select! {
            message = events.recv() => {
                let changed = match message {
                    Some(FeedMessage::Change(event)) => view.apply(source.as_ref(), &event).await,
                    Some(FeedMessage::Resync) => {
                        info!("Resynchronizing live view for {}", view.organization_id());
                        view.load(source.as_ref()).await;
                        true
                    }
                    None => break,
                };

                if changed {
                    publish(&tx, &view);
                }
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };

                match command {
                    Command::LoadMore(reply) => {
                        let result = view.load_more(source.as_ref()).await;
                        let _ = reply.send(result);
                    }
                    Command::Patch { ids, patch, reply } => {
                        let _ = reply.send(view.patch(&ids, &patch));
                    }
                    Command::Remove { ids, reply } => {
                        let _ = reply.send(view.remove_parts(&ids));
                    }
                    Command::Restore(parts) => view.restore_parts(parts),
                }

                publish(&tx, &view);
            }
        }
    }

    debug!("Live session task for {} finished", view.organization_id());
}

fn publish(tx: &watch::Sender<Arc<Snapshot>>, view: &LiveView) {
    tx.send_replace(Arc::new(view.snapshot()));
}

struct Entry {
    session: Arc<LiveSession>,
    last_used: Instant,
}

impl Entry {
    /// Nobody but the registry holds the session and it has not been asked for in `ttl`.
    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        Arc::strong_count(&self.session) == 1 && now.duration_since(self.last_used) >= ttl
    }
}

/// Live sessions shared by every viewer of the same organization.
///
/// Sessions stay alive between requests so that loaded pages and local edits are
/// kept. A session is evicted once it has been idle for the configured time and no
/// stream is watching it.
#[derive(Clone)]
pub struct LiveRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, Entry>>>,
    source: Arc<dyn PartSource>,
    feed: ChangeFeed,
    page_size: i64,
    idle: Duration,
}

impl std::fmt::Debug for LiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveRegistry")
            .field("page_size", &self.page_size)
            .field("idle", &self.idle)
            .finish()
    }
}

impl LiveRegistry {
    pub fn new(
        source: Arc<dyn PartSource>,
        feed: ChangeFeed,
        page_size: i64,
        idle: Duration,
    ) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            source,
            feed,
            page_size,
            idle,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The running session for the organization, started if there is none.
    pub fn session(&self, organization_id: Uuid) -> Arc<LiveSession> {
        let now = Instant::now();
        let mut sessions = self.sessions();

        if let Some(entry) = sessions.get_mut(&organization_id) {
            entry.last_used = now;
            return entry.session.clone();
        }

        evict(&mut sessions, now, self.idle);

        let session = Arc::new(LiveSession::spawn(
            organization_id,
            self.page_size,
            self.source.clone(),
            &self.feed,
        ));
        sessions.insert(
            organization_id,
            Entry {
                session: session.clone(),
                last_used: now,
            },
        );
        session
    }

    /// The running session for the organization, if one was started and not yet evicted.
    pub fn existing(&self, organization_id: Uuid) -> Option<Arc<LiveSession>> {
        let mut sessions = self.sessions();
        let entry = sessions.get_mut(&organization_id)?;
        entry.last_used = Instant::now();
        Some(entry.session.clone())
    }

    /// Drop idle sessions. Returns how many were evicted.
    pub fn evict_idle(&self) -> usize {
        evict(&mut self.sessions(), Instant::now(), self.idle)
    }

    /// Evict idle sessions every `every` until the returned task is aborted.
    pub fn sweep(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let evicted = registry.evict_idle();
                if evicted > 0 {
                    debug!("Evicted {evicted} idle live sessions");
                }
            }
        })
    }
}

fn evict(sessions: &mut HashMap<Uuid, Entry>, now: Instant, ttl: Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|_, entry| !entry.is_idle(now, ttl));
    before - sessions.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::models::{DocumentStatus, Priority},
        live::{testing::*, ChangeKind, Table},
    };
    use std::time::Duration;

    async fn next_snapshot(rx: &mut watch::Receiver<Arc<Snapshot>>) -> Arc<Snapshot> {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("timed out waiting for snapshot")
            .unwrap();
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn session_loads_and_follows_the_feed() {
        let org = Uuid::new_v4();
        let source = Arc::new(MemorySource::default());
        let doc = document(org, "drawing.pdf", DocumentStatus::Queued, 0);
        source.add_document(&doc);

        let feed = ChangeFeed::new();
        let session = LiveSession::spawn(org, 10, source.clone(), &feed);

        let snapshot = session.loaded().await.unwrap();
        assert_eq!(snapshot.placeholders().count(), 1);

        let mut rx = session.watch();
        rx.borrow_and_update();

        let p = part(&doc, "bracket", 1);
        feed.publish(FeedMessage::Change(part_inserted(&p)));

        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot.placeholders().count(), 0);
        assert_eq!(snapshot.parts().next().unwrap().id, p.id);
    }

    #[tokio::test]
    async fn local_edits_go_through_the_session() {
        let org = Uuid::new_v4();
        let source = Arc::new(MemorySource::default());
        let doc = document(org, "drawing.pdf", DocumentStatus::Success, 0);
        let p = part(&doc, "bracket", 1);
        source.add_part(&p);

        let feed = ChangeFeed::new();
        let session = LiveSession::spawn(org, 10, source.clone(), &feed);
        session.loaded().await.unwrap();

        let previous = session
            .patch(
                vec![p.id],
                PartPatch {
                    priority: Some(Priority::Urgent),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(
            session.snapshot().parts().next().unwrap().priority,
            Priority::Urgent
        );

        let removed = session.remove(vec![p.id]).await.unwrap();
        assert_eq!(session.snapshot().parts().count(), 0);

        session.restore(removed).await.unwrap();
        // Restore has no reply, a load_more round trip orders us after it.
        session.load_more().await.unwrap();
        assert_eq!(session.snapshot().parts().count(), 1);
    }

    #[tokio::test]
    async fn resync_reloads_from_source() {
        let org = Uuid::new_v4();
        let source = Arc::new(MemorySource::default());
        let feed = ChangeFeed::new();
        let session = LiveSession::spawn(org, 10, source.clone(), &feed);
        session.loaded().await.unwrap();

        // Written while the feed was disconnected, no event was seen.
        let doc = document(org, "missed.pdf", DocumentStatus::Success, 0);
        source.add_part(&part(&doc, "missed", 1));

        let mut rx = session.watch();
        rx.borrow_and_update();
        feed.publish(FeedMessage::Resync);

        let snapshot = next_snapshot(&mut rx).await;
        assert_eq!(snapshot.parts().count(), 1);
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn registry_shares_sessions() {
        let org = Uuid::new_v4();
        let source = Arc::new(MemorySource::default());
        let feed = ChangeFeed::new();
        let registry = LiveRegistry::new(source, feed.clone(), 10, HOUR);

        assert!(registry.existing(org).is_none());

        let a = registry.session(org);
        let b = registry.session(org);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.existing(Uuid::new_v4()).is_none());

        drop(a);
        drop(b);

        // Kept for the next request.
        let c = registry.existing(org).unwrap();
        c.loaded().await.unwrap();
        assert_eq!(c.organization_id(), org);
        assert_eq!(registry.evict_idle(), 0);
    }

    #[tokio::test]
    async fn loaded_pages_survive_between_requests() {
        let org = Uuid::new_v4();
        let source = Arc::new(MemorySource::default());
        let doc = document(org, "assembly.pdf", DocumentStatus::Success, 0);
        for minutes in 0..4 {
            source.add_part(&part(&doc, &format!("part {minutes}"), minutes));
        }

        let registry = LiveRegistry::new(source, ChangeFeed::new(), 2, HOUR);

        let session = registry.session(org);
        assert_eq!(session.loaded().await.unwrap().parts().count(), 2);
        assert_eq!(session.load_more().await.unwrap(), 2);
        drop(session);

        let snapshot = registry.session(org).loaded().await.unwrap();
        assert_eq!(snapshot.parts().count(), 4);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_unless_watched() {
        let watched = Uuid::new_v4();
        let idle = Uuid::new_v4();
        let source = Arc::new(MemorySource::default());
        let registry = LiveRegistry::new(source, ChangeFeed::new(), 10, Duration::ZERO);

        let stream = registry.session(watched);
        drop(registry.session(idle));

        assert_eq!(registry.evict_idle(), 1);
        assert!(registry.existing(idle).is_none());

        let again = registry.existing(watched).unwrap();
        assert!(Arc::ptr_eq(&stream, &again));
        drop(again);

        drop(stream);
        assert_eq!(registry.evict_idle(), 1);
        assert!(registry.existing(watched).is_none());
    }

    #[tokio::test]
    async fn sweep_evicts_in_the_background() {
        let org = Uuid::new_v4();
        let source = Arc::new(MemorySource::default());
        let registry = LiveRegistry::new(source, ChangeFeed::new(), 10, Duration::ZERO);
        drop(registry.session(org));

        let sweeper = registry.sweep(Duration::from_millis(10));
        let evicted = tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.sessions().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        sweeper.abort();

        assert!(evicted.is_ok());
    }

    #[tokio::test]
    async fn dropped_session_stops_listening() {
        let org = Uuid::new_v4();
        let source = Arc::new(MemorySource::default());
        let feed = ChangeFeed::new();
        let session = LiveSession::spawn(org, 10, source.clone(), &feed);
        session.loaded().await.unwrap();

        let rx = session.watch();
        drop(session);

        // The task is aborted, its sender goes away with it.
        let mut rx = rx;
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while rx.changed().await.is_ok() {}
        })
        .await;
        assert!(closed.is_ok());

        let doc = document(org, "late.pdf", DocumentStatus::Success, 0);
        feed.publish(FeedMessage::Change(event(
            org,
            Table::Parts,
            ChangeKind::Insert,
            Some(serde_json::to_value(part(&doc, "late", 1)).unwrap()),
            None,
        )));
    }
}
