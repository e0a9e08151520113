//! User initiated changes to parts.
//!
//! Every action is applied to the caller's view first and persisted afterwards. When
//! persisting fails the local change is rolled back and the error returned.

use crate::{
    document::models::{Part, Priority, WorkflowStatus},
    error::PartdeskError,
    live::{session::LiveSession, PartPatch},
    org::OrgContext,
};
use async_trait::async_trait;
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, warn};
use uuid::Uuid;

pub mod db;

#[async_trait]
pub trait FavoriteStore: Send + Sync {
    async fn favorites(&self, org: Uuid, user: Uuid) -> Result<HashSet<Uuid>, PartdeskError>;

    /// Already present marks are not an error.
    async fn insert_favorites(&self, org: Uuid, user: Uuid, parts: &[Uuid])
        -> Result<(), PartdeskError>;

    async fn delete_favorites(&self, org: Uuid, user: Uuid, parts: &[Uuid])
        -> Result<(), PartdeskError>;
}

#[async_trait]
pub trait PartStore: Send + Sync {
    async fn update_parts(
        &self,
        org: Uuid,
        parts: &[Uuid],
        patch: &PartPatch,
    ) -> Result<u64, PartdeskError>;

    async fn delete_parts(&self, org: Uuid, parts: &[Uuid]) -> Result<u64, PartdeskError>;
}

/// A view that can be changed ahead of the store.
#[async_trait]
pub trait OptimisticView: Send + Sync {
    /// Returns the replaced values of every part that was present.
    async fn patch(
        &self,
        ids: Vec<Uuid>,
        patch: PartPatch,
    ) -> Result<Vec<(Uuid, PartPatch)>, PartdeskError>;

    async fn remove(&self, ids: Vec<Uuid>) -> Result<Vec<Part>, PartdeskError>;

    async fn restore(&self, parts: Vec<Part>) -> Result<(), PartdeskError>;
}

#[async_trait]
impl OptimisticView for LiveSession {
    async fn patch(
        &self,
        ids: Vec<Uuid>,
        patch: PartPatch,
    ) -> Result<Vec<(Uuid, PartPatch)>, PartdeskError> {
        LiveSession::patch(self, ids, patch).await
    }

    async fn remove(&self, ids: Vec<Uuid>) -> Result<Vec<Part>, PartdeskError> {
        LiveSession::remove(self, ids).await
    }

    async fn restore(&self, parts: Vec<Part>) -> Result<(), PartdeskError> {
        LiveSession::restore(self, parts).await
    }
}

#[async_trait]
impl<V: OptimisticView + ?Sized> OptimisticView for Arc<V> {
    async fn patch(
        &self,
        ids: Vec<Uuid>,
        patch: PartPatch,
    ) -> Result<Vec<(Uuid, PartPatch)>, PartdeskError> {
        self.as_ref().patch(ids, patch).await
    }

    async fn remove(&self, ids: Vec<Uuid>) -> Result<Vec<Part>, PartdeskError> {
        self.as_ref().remove(ids).await
    }

    async fn restore(&self, parts: Vec<Part>) -> Result<(), PartdeskError> {
        self.as_ref().restore(parts).await
    }
}

/// Without a view there is nothing to update ahead of the store.
#[async_trait]
impl<V: OptimisticView> OptimisticView for Option<V> {
    async fn patch(
        &self,
        ids: Vec<Uuid>,
        patch: PartPatch,
    ) -> Result<Vec<(Uuid, PartPatch)>, PartdeskError> {
        match self {
            Some(view) => view.patch(ids, patch).await,
            None => Ok(vec![]),
        }
    }

    async fn remove(&self, ids: Vec<Uuid>) -> Result<Vec<Part>, PartdeskError> {
        match self {
            Some(view) => view.remove(ids).await,
            None => Ok(vec![]),
        }
    }

    async fn restore(&self, parts: Vec<Part>) -> Result<(), PartdeskError> {
        match self {
            Some(view) => view.restore(parts).await,
            None => Ok(()),
        }
    }
}

/// The favorite marks of one user in one organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Favorites(HashSet<Uuid>);

impl Favorites {
    pub async fn load<S: FavoriteStore + ?Sized>(
        store: &S,
        ctx: &OrgContext,
    ) -> Result<Self, PartdeskError> {
        Ok(Self(store.favorites(ctx.organization_id, ctx.user_id).await?))
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.0.contains(id)
    }

    pub fn as_set(&self) -> &HashSet<Uuid> {
        &self.0
    }

    fn set(&mut self, ids: &[Uuid], favorite: bool) {
        for id in ids {
            if favorite {
                self.0.insert(*id);
            } else {
                self.0.remove(id);
            }
        }
    }
}

impl From<HashSet<Uuid>> for Favorites {
    fn from(value: HashSet<Uuid>) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkFavorite {
    /// Parts whose mark was written.
    pub changed: Vec<Uuid>,

    /// Parts that already were in the requested state.
    pub skipped: Vec<Uuid>,
}

/// Flip the mark of one part. Returns whether the part is a favorite afterwards.
pub async fn toggle_favorite<S: FavoriteStore + ?Sized>(
    store: &S,
    ctx: &OrgContext,
    favorites: &mut Favorites,
    part: Uuid,
) -> Result<bool, PartdeskError> {
    let favorite = !favorites.contains(&part);
    favorites.set(&[part], favorite);

    let result = if favorite {
        store
            .insert_favorites(ctx.organization_id, ctx.user_id, &[part])
            .await
    } else {
        store
            .delete_favorites(ctx.organization_id, ctx.user_id, &[part])
            .await
    };

    if let Err(e) = result {
        warn!("Rolling back favorite of {part}: {e}");
        favorites.set(&[part], !favorite);
        return Err(e);
    }

    Ok(favorite)
}

/// Bring every part to the `favorite` state with at most one write, skipping the ones
/// already there.
pub async fn bulk_favorite<S: FavoriteStore + ?Sized>(
    store: &S,
    ctx: &OrgContext,
    favorites: &mut Favorites,
    ids: &[Uuid],
    favorite: bool,
) -> Result<BulkFavorite, PartdeskError> {
    let mut seen = HashSet::new();
    let (skipped, changed): (Vec<Uuid>, Vec<Uuid>) = ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .partition(|id| favorites.contains(id) == favorite);

    if changed.is_empty() {
        debug!("Nothing to change, {} parts already in state", skipped.len());
        return Ok(BulkFavorite { changed, skipped });
    }

    favorites.set(&changed, favorite);

    let result = if favorite {
        store
            .insert_favorites(ctx.organization_id, ctx.user_id, &changed)
            .await
    } else {
        store
            .delete_favorites(ctx.organization_id, ctx.user_id, &changed)
            .await
    };

    if let Err(e) = result {
        warn!("Rolling back {} favorite changes: {e}", changed.len());
        favorites.set(&changed, !favorite);
        return Err(e);
    }

    Ok(BulkFavorite { changed, skipped })
}

pub async fn set_workflow_status<V, S>(
    view: &V,
    store: &S,
    ctx: &OrgContext,
    part: Uuid,
    status: WorkflowStatus,
) -> Result<(), PartdeskError>
where
    V: OptimisticView + ?Sized,
    S: PartStore + ?Sized,
{
    bulk_set_workflow_status(view, store, ctx, vec![part], status).await
}

pub async fn bulk_set_workflow_status<V, S>(
    view: &V,
    store: &S,
    ctx: &OrgContext,
    parts: Vec<Uuid>,
    status: WorkflowStatus,
) -> Result<(), PartdeskError>
where
    V: OptimisticView + ?Sized,
    S: PartStore + ?Sized,
{
    let patch = PartPatch {
        workflow_status: Some(status),
        ..Default::default()
    };
    update_parts(view, store, ctx, parts, patch).await
}

pub async fn set_priority<V, S>(
    view: &V,
    store: &S,
    ctx: &OrgContext,
    part: Uuid,
    priority: Priority,
) -> Result<(), PartdeskError>
where
    V: OptimisticView + ?Sized,
    S: PartStore + ?Sized,
{
    let patch = PartPatch {
        priority: Some(priority),
        ..Default::default()
    };
    update_parts(view, store, ctx, vec![part], patch).await
}

async fn update_parts<V, S>(
    view: &V,
    store: &S,
    ctx: &OrgContext,
    parts: Vec<Uuid>,
    patch: PartPatch,
) -> Result<(), PartdeskError>
where
    V: OptimisticView + ?Sized,
    S: PartStore + ?Sized,
{
    if parts.is_empty() {
        return Ok(());
    }

    let previous = view.patch(parts.clone(), patch.clone()).await?;

    match store.update_parts(ctx.organization_id, &parts, &patch).await {
        Ok(updated) => {
            debug!("Updated {updated} parts in {}", ctx.organization_id);
            Ok(())
        }
        Err(e) => {
            warn!("Rolling back update of {} parts: {e}", parts.len());
            for (id, previous) in previous {
                view.patch(vec![id], previous).await?;
            }
            Err(e)
        }
    }
}

/// Returns the amount of parts deleted in the store.
pub async fn bulk_delete_parts<V, S>(
    view: &V,
    store: &S,
    ctx: &OrgContext,
    parts: Vec<Uuid>,
) -> Result<u64, PartdeskError>
where
    V: OptimisticView + ?Sized,
    S: PartStore + ?Sized,
{
    if parts.is_empty() {
        return Ok(0);
    }

    let removed = view.remove(parts.clone()).await?;

    match store.delete_parts(ctx.organization_id, &parts).await {
        Ok(deleted) => Ok(deleted),
        Err(e) => {
            warn!("Restoring {} parts after failed delete: {e}", removed.len());
            view.restore(removed).await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::models::DocumentStatus,
        live::{testing::*, LiveView},
        org::models::Role,
    };
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    #[async_trait]
    impl OptimisticView for tokio::sync::Mutex<LiveView> {
        async fn patch(
            &self,
            ids: Vec<Uuid>,
            patch: PartPatch,
        ) -> Result<Vec<(Uuid, PartPatch)>, PartdeskError> {
            Ok(self.lock().await.patch(&ids, &patch))
        }

        async fn remove(&self, ids: Vec<Uuid>) -> Result<Vec<Part>, PartdeskError> {
            Ok(self.lock().await.remove_parts(&ids))
        }

        async fn restore(&self, parts: Vec<Part>) -> Result<(), PartdeskError> {
            self.lock().await.restore_parts(parts);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct MemoryStore {
        favorites: Mutex<HashSet<Uuid>>,
        inserts: Mutex<Vec<Vec<Uuid>>>,
        deletes: Mutex<Vec<Vec<Uuid>>>,
        updates: Mutex<Vec<(Vec<Uuid>, PartPatch)>>,
        fail: AtomicBool,
    }

    impl MemoryStore {
        fn check(&self) -> Result<(), PartdeskError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PartdeskError::Remote("store unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl FavoriteStore for MemoryStore {
        async fn favorites(&self, _: Uuid, _: Uuid) -> Result<HashSet<Uuid>, PartdeskError> {
            self.check()?;
            Ok(self.favorites.lock().unwrap().clone())
        }

        async fn insert_favorites(
            &self,
            _: Uuid,
            _: Uuid,
            parts: &[Uuid],
        ) -> Result<(), PartdeskError> {
            self.check()?;
            self.inserts.lock().unwrap().push(parts.to_vec());
            self.favorites.lock().unwrap().extend(parts);
            Ok(())
        }

        async fn delete_favorites(
            &self,
            _: Uuid,
            _: Uuid,
            parts: &[Uuid],
        ) -> Result<(), PartdeskError> {
            self.check()?;
            self.deletes.lock().unwrap().push(parts.to_vec());
            let mut favorites = self.favorites.lock().unwrap();
            for id in parts {
                favorites.remove(id);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PartStore for MemoryStore {
        async fn update_parts(
            &self,
            _: Uuid,
            parts: &[Uuid],
            patch: &PartPatch,
        ) -> Result<u64, PartdeskError> {
            self.check()?;
            self.updates
                .lock()
                .unwrap()
                .push((parts.to_vec(), patch.clone()));
            Ok(parts.len() as u64)
        }

        async fn delete_parts(&self, _: Uuid, parts: &[Uuid]) -> Result<u64, PartdeskError> {
            self.check()?;
            Ok(parts.len() as u64)
        }
    }

    fn ctx(org: Uuid) -> OrgContext {
        OrgContext {
            organization_id: org,
            user_id: Uuid::new_v4(),
            role: Role::Member,
        }
    }

    async fn loaded_view(org: Uuid, parts: &[Part]) -> tokio::sync::Mutex<LiveView> {
        let source = MemorySource::default();
        for part in parts {
            source.add_part(part);
        }
        let mut view = LiveView::new(org, 50);
        view.load(&source).await;
        tokio::sync::Mutex::new(view)
    }

    #[tokio::test]
    async fn bulk_favorite_only_writes_missing_marks() {
        let org = Uuid::new_v4();
        let ids = (0..5).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
        let store = MemoryStore::default();
        let mut favorites = Favorites::from(HashSet::from([ids[0], ids[3]]));

        let outcome = bulk_favorite(&store, &ctx(org), &mut favorites, &ids, true)
            .await
            .unwrap();

        assert_eq!(outcome.changed, vec![ids[1], ids[2], ids[4]]);
        assert_eq!(outcome.skipped, vec![ids[0], ids[3]]);

        let inserts = store.inserts.lock().unwrap();
        assert_eq!(inserts.len(), 1, "one batch write");
        assert_eq!(inserts[0].len(), 3);
        assert!(ids.iter().all(|id| favorites.contains(id)));
    }

    #[tokio::test]
    async fn bulk_favorite_without_changes_does_not_write() {
        let org = Uuid::new_v4();
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let store = MemoryStore::default();
        let mut favorites = Favorites::default();

        let outcome = bulk_favorite(&store, &ctx(org), &mut favorites, &ids, false)
            .await
            .unwrap();

        assert!(outcome.changed.is_empty());
        assert_eq!(outcome.skipped.len(), 2);
        assert!(store.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn double_toggle_restores_the_original_state() {
        let org = Uuid::new_v4();
        let part = Uuid::new_v4();
        let store = MemoryStore::default();
        let ctx = ctx(org);
        let mut favorites = Favorites::load(&store, &ctx).await.unwrap();
        let original = favorites.clone();

        assert!(toggle_favorite(&store, &ctx, &mut favorites, part).await.unwrap());
        assert!(!toggle_favorite(&store, &ctx, &mut favorites, part).await.unwrap());

        assert_eq!(favorites, original);
        assert_eq!(Favorites::load(&store, &ctx).await.unwrap(), original);
    }

    #[tokio::test]
    async fn failed_toggle_is_rolled_back() {
        let org = Uuid::new_v4();
        let part = Uuid::new_v4();
        let store = MemoryStore::default();
        store.fail.store(true, Ordering::SeqCst);
        let mut favorites = Favorites::default();

        let result = toggle_favorite(&store, &ctx(org), &mut favorites, part).await;

        assert!(result.is_err());
        assert!(!favorites.contains(&part));
    }

    #[tokio::test]
    async fn workflow_change_is_applied_and_persisted() {
        let org = Uuid::new_v4();
        let doc = document(org, "drawing.pdf", DocumentStatus::Success, 0);
        let p = part(&doc, "bracket", 1);
        let view = loaded_view(org, &[p.clone()]).await;
        let store = MemoryStore::default();

        set_workflow_status(&view, &store, &ctx(org), p.id, WorkflowStatus::Approved)
            .await
            .unwrap();

        let view = view.lock().await;
        assert_eq!(
            view.part(&p.id).unwrap().workflow_status,
            WorkflowStatus::Approved
        );
        let updates = store.updates.lock().unwrap();
        assert_eq!(updates[0].0, vec![p.id]);
        assert_eq!(updates[0].1.workflow_status, Some(WorkflowStatus::Approved));
        assert_eq!(updates[0].1.priority, None);
    }

    #[tokio::test]
    async fn failed_priority_change_is_rolled_back() {
        let org = Uuid::new_v4();
        let doc = document(org, "drawing.pdf", DocumentStatus::Success, 0);
        let p = part(&doc, "bracket", 1);
        let view = loaded_view(org, &[p.clone()]).await;
        let store = MemoryStore::default();
        store.fail.store(true, Ordering::SeqCst);

        let result = set_priority(&view, &store, &ctx(org), p.id, Priority::Urgent).await;

        assert!(matches!(result, Err(PartdeskError::Remote(_))));
        assert_eq!(view.lock().await.part(&p.id).unwrap().priority, p.priority);
    }

    #[tokio::test]
    async fn failed_bulk_workflow_restores_each_part() {
        let org = Uuid::new_v4();
        let doc = document(org, "drawing.pdf", DocumentStatus::Success, 0);
        let a = part(&doc, "a", 1);
        let mut b = part(&doc, "b", 2);
        b.workflow_status = WorkflowStatus::InReview;
        let view = loaded_view(org, &[a.clone(), b.clone()]).await;
        let store = MemoryStore::default();
        store.fail.store(true, Ordering::SeqCst);

        let result = bulk_set_workflow_status(
            &view,
            &store,
            &ctx(org),
            vec![a.id, b.id, Uuid::new_v4()],
            WorkflowStatus::Done,
        )
        .await;

        assert!(result.is_err());
        let view = view.lock().await;
        assert_eq!(view.part(&a.id).unwrap().workflow_status, WorkflowStatus::New);
        assert_eq!(
            view.part(&b.id).unwrap().workflow_status,
            WorkflowStatus::InReview
        );
    }

    #[tokio::test]
    async fn actions_without_a_view_still_persist() {
        let org = Uuid::new_v4();
        let part = Uuid::new_v4();
        let store = MemoryStore::default();
        let view: Option<Arc<tokio::sync::Mutex<LiveView>>> = None;

        set_priority(&view, &store, &ctx(org), part, Priority::High)
            .await
            .unwrap();

        assert_eq!(store.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_bulk_delete_restores_parts() {
        let org = Uuid::new_v4();
        let doc = document(org, "drawing.pdf", DocumentStatus::Success, 0);
        let a = part(&doc, "a", 1);
        let b = part(&doc, "b", 2);
        let view = loaded_view(org, &[a.clone(), b.clone()]).await;
        let store = MemoryStore::default();

        let deleted = bulk_delete_parts(&view, &store, &ctx(org), vec![a.id])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(view.lock().await.part(&a.id).is_none());

        store.fail.store(true, Ordering::SeqCst);
        let result = bulk_delete_parts(&view, &store, &ctx(org), vec![b.id]).await;

        assert!(result.is_err());
        assert!(view.lock().await.part(&b.id).is_some());
    }
}
