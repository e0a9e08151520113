//! Live view over the documents and parts of one organization.
//!
//! Merges three sources into a single ordered list:
//!
//! 1. The first page of parts (joined with their parent documents),
//! 2. documents still in the pipeline that own no part yet, shown as placeholders,
//! 3. change events for the `parts` and `documents` tables.
//!
//! Every merge is keyed by identity so the result does not depend on whether an
//! event is delivered before or after the fetch it overlaps with.

use crate::{
    document::models::{Document, DocumentStatus, Part, Priority, WorkflowStatus},
    error::PartdeskError,
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

pub mod feed;
pub mod session;

/// Read side of the store as seen by the live view.
#[async_trait]
pub trait PartSource: Send + Sync {
    /// Parts of the organization ordered by `last_updated` descending.
    async fn part_page(&self, org: Uuid, offset: i64, limit: i64)
        -> Result<Vec<Part>, PartdeskError>;

    /// Documents whose status is queued, processing or error.
    async fn pending_documents(&self, org: Uuid) -> Result<Vec<Document>, PartdeskError>;

    /// All parts linked to the given document.
    async fn document_parts(&self, org: Uuid, document: Uuid) -> Result<Vec<Part>, PartdeskError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Parts,
    Documents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row level change as delivered by the change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,

    #[serde(rename = "type")]
    pub kind: ChangeKind,

    pub organization_id: Uuid,

    /// New row for inserts and updates.
    #[serde(default)]
    pub record: Option<Value>,

    /// Previous row for updates and deletes.
    #[serde(default)]
    pub old_record: Option<Value>,
}

/// Derived identity of a placeholder. Cannot collide with part ids, which are bare UUIDs.
pub fn placeholder_key(document: Uuid) -> String {
    format!("processing-{document}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewEntry {
    Placeholder { key: String, document: Document },
    Part(Part),
}

/// What the view shows at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub organization_id: Uuid,
    pub entries: Vec<ViewEntry>,
    pub loading: bool,
    pub has_more: bool,
    pub error: Option<String>,
}

impl Snapshot {
    pub fn initial(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            loading: true,
            ..Default::default()
        }
    }

    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.entries.iter().filter_map(|entry| match entry {
            ViewEntry::Part(part) => Some(part),
            ViewEntry::Placeholder { .. } => None,
        })
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Document> {
        self.entries.iter().filter_map(|entry| match entry {
            ViewEntry::Placeholder { document, .. } => Some(document),
            ViewEntry::Part(_) => None,
        })
    }
}

/// Locally applied change to the user editable fields of a part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartPatch {
    pub workflow_status: Option<WorkflowStatus>,
    pub priority: Option<Priority>,
}

impl PartPatch {
    fn apply(&self, part: &mut Part) -> PartPatch {
        let mut previous = PartPatch::default();

        if let Some(status) = self.workflow_status {
            previous.workflow_status = Some(part.workflow_status);
            part.workflow_status = status;
        }

        if let Some(priority) = self.priority {
            previous.priority = Some(part.priority);
            part.priority = priority;
        }

        previous
    }
}

#[derive(Debug)]
pub struct LiveView {
    organization_id: Uuid,

    page_size: i64,

    /// Rows consumed from the paged part query so far.
    fetched: i64,

    has_more: bool,

    parts: HashMap<Uuid, Part>,

    /// Keyed by document ID.
    placeholders: HashMap<Uuid, Document>,

    error: Option<String>,
}

impl LiveView {
    pub fn new(organization_id: Uuid, page_size: i64) -> Self {
        Self {
            organization_id,
            page_size: page_size.max(1),
            fetched: 0,
            has_more: false,
            parts: HashMap::new(),
            placeholders: HashMap::new(),
            error: None,
        }
    }

    pub fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    /// Reset the view to the first page of parts and the placeholders of the documents
    /// that first page does not account for.
    ///
    /// Pending documents whose parts lie beyond the first page are shown as placeholders
    /// until those parts are paged in.
    pub async fn load<S: PartSource + ?Sized>(&mut self, source: &S) {
        self.parts.clear();
        self.placeholders.clear();
        self.error = None;
        self.fetched = 0;
        self.has_more = false;

        let org = self.organization_id;

        let page = match source.part_page(org, 0, self.page_size).await {
            Ok(page) => page,
            Err(e) => return self.fail(e),
        };

        let pending = match source.pending_documents(org).await {
            Ok(pending) => pending,
            Err(e) => return self.fail(e),
        };

        let referenced = page.iter().map(|p| p.document.id).collect::<HashSet<_>>();

        self.fetched = page.len() as i64;
        self.has_more = self.fetched == self.page_size;

        self.parts.extend(page.into_iter().map(|part| (part.id, part)));
        self.placeholders.extend(
            pending
                .into_iter()
                .filter(|doc| !referenced.contains(&doc.id))
                .map(|doc| (doc.id, doc)),
        );

        debug!(
            "Loaded {} parts and {} placeholders for {org}",
            self.parts.len(),
            self.placeholders.len()
        );
    }

    /// Fetch the next page of parts. Returns the amount of parts that were new to the view.
    pub async fn load_more<S: PartSource + ?Sized>(
        &mut self,
        source: &S,
    ) -> Result<usize, PartdeskError> {
        let page = source
            .part_page(self.organization_id, self.fetched, self.page_size)
            .await?;

        self.fetched += page.len() as i64;
        self.has_more = page.len() as i64 == self.page_size;

        let mut added = 0;
        for part in page {
            self.placeholders.remove(&part.document.id);
            if !self.parts.contains_key(&part.id) {
                self.parts.insert(part.id, part);
                added += 1;
            }
        }

        Ok(added)
    }

    /// Apply a change event. Returns whether the view changed.
    pub async fn apply<S: PartSource + ?Sized>(
        &mut self,
        source: &S,
        event: &ChangeEvent,
    ) -> bool {
        if event.organization_id != self.organization_id {
            warn!(
                "Dropping event for {} in view of {}",
                event.organization_id, self.organization_id
            );
            return false;
        }

        match (event.table, event.kind) {
            (Table::Parts, ChangeKind::Insert) => self.insert_part(event),
            (Table::Parts, ChangeKind::Update) => self.update_part(event),
            (Table::Parts, ChangeKind::Delete) => self.delete_part(event),
            (Table::Documents, ChangeKind::Insert | ChangeKind::Update) => {
                self.upsert_document(source, event).await
            }
            (Table::Documents, ChangeKind::Delete) => self.delete_document(event),
        }
    }

    fn insert_part(&mut self, event: &ChangeEvent) -> bool {
        let Some(part) = event.record.as_ref().and_then(decode::<Part>) else {
            warn!("Malformed part insert");
            return false;
        };

        if self.parts.contains_key(&part.id) {
            return false;
        }

        self.placeholders.remove(&part.document.id);
        self.parts.insert(part.id, part);
        true
    }

    fn update_part(&mut self, event: &ChangeEvent) -> bool {
        let Some(record) = event.record.as_ref() else {
            warn!("Part update without record");
            return false;
        };

        let Some(id) = record_id(record) else {
            warn!("Part update without id");
            return false;
        };

        let merged = match self.parts.get(&id) {
            Some(existing) => {
                let Some(merged) = merge_record(existing, record) else {
                    warn!("Malformed part update for {id}");
                    return false;
                };

                if merged.last_updated < existing.last_updated || merged == *existing {
                    return false;
                }

                merged
            }
            None => {
                let Some(part) = decode::<Part>(record) else {
                    warn!("Partial update for unknown part {id}");
                    return false;
                };
                part
            }
        };

        self.placeholders.remove(&merged.document.id);
        self.parts.insert(id, merged);
        true
    }

    fn delete_part(&mut self, event: &ChangeEvent) -> bool {
        let Some(id) = event_id(event) else {
            warn!("Part delete without id");
            return false;
        };

        self.parts.remove(&id).is_some()
    }

    async fn upsert_document<S: PartSource + ?Sized>(
        &mut self,
        source: &S,
        event: &ChangeEvent,
    ) -> bool {
        let Some(record) = event.record.as_ref() else {
            warn!("Document event without record");
            return false;
        };

        let document = match record_id(record).and_then(|id| self.placeholders.get(&id)) {
            Some(existing) => merge_record(existing, record),
            None => decode::<Document>(record),
        };

        let Some(document) = document else {
            warn!("Malformed document record");
            return false;
        };

        let mut changed = self.rename_parts(&document);

        if document.status == DocumentStatus::Success {
            let was_success = event
                .old_record
                .as_ref()
                .and_then(|old| old.get("status"))
                .and_then(Value::as_str)
                .is_some_and(|status| status == DocumentStatus::Success.as_str());

            if was_success {
                return changed;
            }

            return self.refetch_document(source, document).await || changed;
        }

        // A document represented by its parts never turns back into a placeholder.
        if self.has_parts_of(document.id) {
            return changed;
        }

        if self.placeholders.get(&document.id) != Some(&document) {
            self.placeholders.insert(document.id, document);
            changed = true;
        }

        changed
    }

    /// Change events for documents do not carry parts, so a finished document has to be
    /// fetched before its placeholder can be replaced.
    async fn refetch_document<S: PartSource + ?Sized>(
        &mut self,
        source: &S,
        document: Document,
    ) -> bool {
        match source
            .document_parts(self.organization_id, document.id)
            .await
        {
            Ok(parts) => {
                debug!(
                    "Document {} finished with {} parts",
                    document.id,
                    parts.len()
                );

                for part in parts {
                    self.parts.entry(part.id).or_insert(part);
                }
                self.placeholders.remove(&document.id);
                true
            }
            Err(e) => {
                warn!("Unable to fetch parts of {}: {e}", document.id);
                self.error = Some(e.to_string());
                self.placeholders.insert(document.id, document);
                true
            }
        }
    }

    fn delete_document(&mut self, event: &ChangeEvent) -> bool {
        let Some(id) = event_id(event) else {
            warn!("Document delete without id");
            return false;
        };

        let before = self.parts.len();
        self.parts.retain(|_, part| part.document.id != id);

        self.placeholders.remove(&id).is_some() || before != self.parts.len()
    }

    fn rename_parts(&mut self, document: &Document) -> bool {
        let mut changed = false;
        for part in self.parts.values_mut() {
            if part.document.id == document.id && part.document.file_name != document.file_name {
                part.document.file_name = document.file_name.clone();
                changed = true;
            }
        }
        changed
    }

    fn has_parts_of(&self, document: Uuid) -> bool {
        self.parts.values().any(|part| part.document.id == document)
    }

    /// Apply the patch to every present part. Returns the values it replaced, to be
    /// passed back to `patch` when the change has to be undone.
    pub fn patch(&mut self, ids: &[Uuid], patch: &PartPatch) -> Vec<(Uuid, PartPatch)> {
        ids.iter()
            .filter_map(|id| {
                self.parts
                    .get_mut(id)
                    .map(|part| (*id, patch.apply(part)))
            })
            .collect()
    }

    pub fn remove_parts(&mut self, ids: &[Uuid]) -> Vec<Part> {
        ids.iter().filter_map(|id| self.parts.remove(id)).collect()
    }

    /// Put back parts taken out by `remove_parts`. Parts that reappeared in the meantime win.
    pub fn restore_parts(&mut self, parts: Vec<Part>) {
        for part in parts {
            self.placeholders.remove(&part.document.id);
            self.parts.entry(part.id).or_insert(part);
        }
    }

    pub fn part(&self, id: &Uuid) -> Option<&Part> {
        self.parts.get(id)
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut placeholders = self.placeholders.values().collect::<Vec<_>>();
        placeholders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let mut parts = self.parts.values().collect::<Vec<_>>();
        parts.sort_by(|a, b| b.last_updated.cmp(&a.last_updated).then(a.id.cmp(&b.id)));

        let entries = placeholders
            .into_iter()
            .map(|document| ViewEntry::Placeholder {
                key: placeholder_key(document.id),
                document: document.clone(),
            })
            .chain(parts.into_iter().cloned().map(ViewEntry::Part))
            .collect();

        Snapshot {
            organization_id: self.organization_id,
            entries,
            loading: false,
            has_more: self.has_more,
            error: self.error.clone(),
        }
    }

    fn fail(&mut self, e: PartdeskError) {
        warn!("Live view load failed for {}: {e}", self.organization_id);
        self.parts.clear();
        self.placeholders.clear();
        self.has_more = false;
        self.error = Some(e.to_string());
    }
}

fn decode<T: DeserializeOwned>(record: &Value) -> Option<T> {
    serde_json::from_value(record.clone()).ok()
}

fn record_id(record: &Value) -> Option<Uuid> {
    record.get("id")?.as_str()?.parse().ok()
}

fn event_id(event: &ChangeEvent) -> Option<Uuid> {
    event
        .old_record
        .as_ref()
        .and_then(record_id)
        .or_else(|| event.record.as_ref().and_then(record_id))
}

/// Overlay the fields present in `patch` on top of `existing`.
fn merge_record<T: Serialize + DeserializeOwned>(existing: &T, patch: &Value) -> Option<T> {
    let mut base = serde_json::to_value(existing).ok()?;

    let (Value::Object(base_fields), Value::Object(patch_fields)) = (&mut base, patch) else {
        return None;
    };

    for (key, value) in patch_fields {
        base_fields.insert(key.clone(), value.clone());
    }

    serde_json::from_value(base).ok()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::document::models::DocumentRef;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    pub fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    pub fn document(org: Uuid, name: &str, status: DocumentStatus, created: i64) -> Document {
        Document {
            id: Uuid::new_v4(),
            organization_id: org,
            file_name: name.to_string(),
            bucket: "documents".to_string(),
            storage_key: format!("{org}/{name}"),
            thumbnail_key: None,
            status,
            created_at: at(created),
            updated_at: at(created),
        }
    }

    pub fn part(document: &Document, name: &str, updated: i64) -> Part {
        Part {
            id: Uuid::new_v4(),
            organization_id: document.organization_id,
            document: DocumentRef {
                id: document.id,
                file_name: document.file_name.clone(),
            },
            name: name.to_string(),
            class: Some("bracket".to_string()),
            material: Some("steel".to_string()),
            complexity: None,
            fit_level: None,
            company: None,
            workflow_status: WorkflowStatus::New,
            priority: Priority::Medium,
            created_at: at(updated),
            last_updated: at(updated),
        }
    }

    pub fn event(org: Uuid, table: Table, kind: ChangeKind, record: Option<Value>, old: Option<Value>) -> ChangeEvent {
        ChangeEvent {
            table,
            kind,
            organization_id: org,
            record,
            old_record: old,
        }
    }

    pub fn part_inserted(part: &Part) -> ChangeEvent {
        event(
            part.organization_id,
            Table::Parts,
            ChangeKind::Insert,
            Some(serde_json::to_value(part).unwrap()),
            None,
        )
    }

    pub fn part_deleted(part: &Part) -> ChangeEvent {
        event(
            part.organization_id,
            Table::Parts,
            ChangeKind::Delete,
            None,
            Some(json!({ "id": part.id })),
        )
    }

    pub fn document_updated(document: &Document, old_status: DocumentStatus) -> ChangeEvent {
        event(
            document.organization_id,
            Table::Documents,
            ChangeKind::Update,
            Some(serde_json::to_value(document).unwrap()),
            Some(json!({ "id": document.id, "status": old_status })),
        )
    }

    /// In memory stand-in for the database.
    #[derive(Debug, Default)]
    pub struct MemorySource {
        pub parts: Mutex<Vec<Part>>,
        pub documents: Mutex<Vec<Document>>,
        pub fail: AtomicBool,
        pub document_fetches: AtomicUsize,
    }

    impl MemorySource {
        pub fn add_document(&self, document: &Document) {
            self.documents.lock().unwrap().push(document.clone());
        }

        pub fn set_status(&self, id: Uuid, status: DocumentStatus) {
            for document in self.documents.lock().unwrap().iter_mut() {
                if document.id == id {
                    document.status = status;
                }
            }
        }

        pub fn add_part(&self, part: &Part) {
            self.parts.lock().unwrap().push(part.clone());
        }

        fn check(&self) -> Result<(), PartdeskError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PartdeskError::Remote("store unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PartSource for MemorySource {
        async fn part_page(
            &self,
            org: Uuid,
            offset: i64,
            limit: i64,
        ) -> Result<Vec<Part>, PartdeskError> {
            self.check()?;
            let mut parts = self
                .parts
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.organization_id == org)
                .cloned()
                .collect::<Vec<_>>();
            parts.sort_by(|a, b| b.last_updated.cmp(&a.last_updated).then(a.id.cmp(&b.id)));
            Ok(parts
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        }

        async fn pending_documents(&self, org: Uuid) -> Result<Vec<Document>, PartdeskError> {
            self.check()?;
            Ok(self
                .documents
                .lock()
                .unwrap()
                .iter()
                .filter(|d| d.organization_id == org && d.status.is_pending())
                .cloned()
                .collect())
        }

        async fn document_parts(
            &self,
            org: Uuid,
            document: Uuid,
        ) -> Result<Vec<Part>, PartdeskError> {
            self.document_fetches.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self
                .parts
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.organization_id == org && p.document.id == document)
                .cloned()
                .collect())
        }
    }
}
