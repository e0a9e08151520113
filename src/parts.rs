//! Filtering, sorting and bulk selection over the parts of a live view.
//!
//! The filter and sort state round-trips through a URL query string so that a view
//! can be bookmarked and shared.

use crate::{
    document::models::{Complexity, Part, Priority, WorkflowStatus},
    error::PartdeskError,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashSet},
    str::FromStr,
};
use url::form_urlencoded;
use uuid::Uuid;

/// Upper bound of the `recent` filter, in days.
pub const MAX_RECENT_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    LastUpdated,
    CreatedAt,
    Name,
    Priority,
    WorkflowStatus,
    Complexity,
}

impl SortKey {
    fn as_str(&self) -> &'static str {
        match self {
            Self::LastUpdated => "last_updated",
            Self::CreatedAt => "created_at",
            Self::Name => "name",
            Self::Priority => "priority",
            Self::WorkflowStatus => "workflow_status",
            Self::Complexity => "complexity",
        }
    }

    fn compare(&self, a: &Part, b: &Part) -> Ordering {
        match self {
            Self::LastUpdated => a.last_updated.cmp(&b.last_updated),
            Self::CreatedAt => a.created_at.cmp(&b.created_at),
            Self::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            Self::Priority => a.priority.cmp(&b.priority),
            Self::WorkflowStatus => a.workflow_status.cmp(&b.workflow_status),
            Self::Complexity => a.complexity.cmp(&b.complexity),
        }
    }
}

impl FromStr for SortKey {
    type Err = PartdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_updated" => Ok(Self::LastUpdated),
            "created_at" => Ok(Self::CreatedAt),
            "name" => Ok(Self::Name),
            "priority" => Ok(Self::Priority),
            "workflow_status" => Ok(Self::WorkflowStatus),
            "complexity" => Ok(Self::Complexity),
            _ => Err(PartdeskError::Validation(format!("invalid sort: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = PartdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(PartdeskError::Validation(format!("invalid order: {s}"))),
        }
    }
}

/// A single filter. Filters are independent of each other and combine conjunctively.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Complexity(Vec<Complexity>),
    WorkflowStatus(Vec<WorkflowStatus>),
    Priority(Vec<Priority>),
    /// Case insensitive exact match.
    Company(String),
    FavoritesOnly,
    UpdatedSince(DateTime<Utc>),
    /// Case insensitive substring of the part or document name.
    Search(String),
}

impl Predicate {
    pub fn matches(&self, part: &Part, favorites: &HashSet<Uuid>) -> bool {
        match self {
            Self::Complexity(allowed) => part.complexity.is_some_and(|c| allowed.contains(&c)),
            Self::WorkflowStatus(allowed) => allowed.contains(&part.workflow_status),
            Self::Priority(allowed) => allowed.contains(&part.priority),
            Self::Company(company) => part
                .company
                .as_ref()
                .is_some_and(|c| c.eq_ignore_ascii_case(company)),
            Self::FavoritesOnly => favorites.contains(&part.id),
            Self::UpdatedSince(since) => part.last_updated >= *since,
            Self::Search(term) => {
                let term = term.to_lowercase();
                part.name.to_lowercase().contains(&term)
                    || part.document.file_name.to_lowercase().contains(&term)
            }
        }
    }
}

/// Filter and sort state of the parts view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartsQuery {
    pub complexity: Vec<Complexity>,
    pub workflow_status: Vec<WorkflowStatus>,
    pub priority: Vec<Priority>,
    pub company: Option<String>,
    pub favorites_only: bool,
    pub recent_days: Option<u32>,
    pub search: Option<String>,
    pub sort: SortKey,
    pub order: SortOrder,
}

impl PartsQuery {
    /// Parse a query string. Unknown keys are ignored, list values are comma separated.
    ///
    /// Free text values (`company`, `q`) are kept verbatim, blank values are skipped.
    pub fn from_query(query: &str) -> Result<Self, PartdeskError> {
        let mut parsed = Self::default();

        for (key, raw) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }

            match key.as_ref() {
                "complexity" => parsed.complexity = parse_list(value)?,
                "workflow_status" => parsed.workflow_status = parse_list(value)?,
                "priority" => parsed.priority = parse_list(value)?,
                "company" => parsed.company = Some(raw.to_string()),
                "favorites" => parsed.favorites_only = parse_bool(value)?,
                "recent" => parsed.recent_days = Some(parse_recent(value)?),
                "q" => parsed.search = Some(raw.to_string()),
                "sort" => parsed.sort = value.parse()?,
                "order" => parsed.order = value.parse()?,
                _ => {}
            }
        }

        Ok(parsed)
    }

    /// Serialize back to a query string. Defaults are left out.
    pub fn to_query(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());

        if !self.complexity.is_empty() {
            query.append_pair("complexity", &join(&self.complexity, |c| c.as_str()));
        }
        if !self.workflow_status.is_empty() {
            query.append_pair(
                "workflow_status",
                &join(&self.workflow_status, |s| s.as_str()),
            );
        }
        if !self.priority.is_empty() {
            query.append_pair("priority", &join(&self.priority, |p| p.as_str()));
        }
        if let Some(ref company) = self.company {
            query.append_pair("company", company);
        }
        if self.favorites_only {
            query.append_pair("favorites", "true");
        }
        if let Some(days) = self.recent_days {
            query.append_pair("recent", &days.to_string());
        }
        if let Some(ref search) = self.search {
            query.append_pair("q", search);
        }
        if self.sort != SortKey::default() {
            query.append_pair("sort", self.sort.as_str());
        }
        if self.order != SortOrder::default() {
            query.append_pair("order", "asc");
        }

        query.finish()
    }

    pub fn is_filtered(&self) -> bool {
        !self.predicates(Utc::now()).is_empty()
    }

    pub fn predicates(&self, now: DateTime<Utc>) -> Vec<Predicate> {
        let mut predicates = vec![];

        if !self.complexity.is_empty() {
            predicates.push(Predicate::Complexity(self.complexity.clone()));
        }
        if !self.workflow_status.is_empty() {
            predicates.push(Predicate::WorkflowStatus(self.workflow_status.clone()));
        }
        if !self.priority.is_empty() {
            predicates.push(Predicate::Priority(self.priority.clone()));
        }
        if let Some(ref company) = self.company {
            predicates.push(Predicate::Company(company.clone()));
        }
        if self.favorites_only {
            predicates.push(Predicate::FavoritesOnly);
        }
        if let Some(days) = self.recent_days {
            let since = now
                .checked_sub_signed(Duration::days(days as i64))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            predicates.push(Predicate::UpdatedSince(since));
        }
        if let Some(ref search) = self.search {
            predicates.push(Predicate::Search(search.clone()));
        }

        predicates
    }

    /// Filter and sort the parts. The input order is kept among equal elements.
    pub fn apply<'a>(
        &self,
        parts: impl IntoIterator<Item = &'a Part>,
        favorites: &HashSet<Uuid>,
        now: DateTime<Utc>,
    ) -> Vec<&'a Part> {
        let predicates = self.predicates(now);

        let mut view = parts
            .into_iter()
            .filter(|part| predicates.iter().all(|p| p.matches(part, favorites)))
            .collect::<Vec<_>>();

        view.sort_by(|a, b| {
            let ordering = self.sort.compare(a, b);
            match self.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        view
    }
}

fn parse_list<T: FromStr<Err = PartdeskError>>(value: &str) -> Result<Vec<T>, PartdeskError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::parse)
        .collect()
}

fn parse_recent(value: &str) -> Result<u32, PartdeskError> {
    match value.parse::<u32>() {
        Ok(days) if days <= MAX_RECENT_DAYS => Ok(days),
        _ => Err(PartdeskError::Validation(format!(
            "invalid recent: {value}, expected 0 to {MAX_RECENT_DAYS} days"
        ))),
    }
}

fn parse_bool(value: &str) -> Result<bool, PartdeskError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(PartdeskError::Validation(format!("invalid flag: {value}"))),
    }
}

fn join<T>(values: &[T], f: impl Fn(&T) -> &'static str) -> String {
    values.iter().map(f).collect::<Vec<_>>().join(",")
}

/// Parts picked for a bulk operation.
///
/// Independent of any filter: hiding a selected part does not deselect it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection {
    ids: BTreeSet<Uuid>,
}

impl Selection {
    pub fn new(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Read the comma separated `selected` parameters of a query string.
    pub fn from_query(query: &str) -> Result<Self, PartdeskError> {
        let mut ids = BTreeSet::new();

        for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            if key != "selected" {
                continue;
            }

            for id in value.split(',').map(str::trim).filter(|v| !v.is_empty()) {
                ids.insert(Uuid::parse_str(id)?);
            }
        }

        Ok(Self { ids })
    }

    /// Flip membership of the part. Returns whether it is selected afterwards.
    pub fn toggle(&mut self, id: Uuid) -> bool {
        if self.ids.remove(&id) {
            return false;
        }
        self.ids.insert(id);
        true
    }

    /// Add every part currently shown.
    pub fn select_all<'a>(&mut self, visible: impl IntoIterator<Item = &'a Part>) {
        self.ids.extend(visible.into_iter().map(|part| part.id));
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.ids.iter().copied().collect()
    }

    /// Selected parts that are shown in `view`.
    pub fn visible(&self, view: &[&Part]) -> Vec<Uuid> {
        view.iter()
            .map(|part| part.id)
            .filter(|id| self.ids.contains(id))
            .collect()
    }

    /// Selected parts that the current filter hides.
    pub fn hidden(&self, view: &[&Part]) -> Vec<Uuid> {
        let shown = view.iter().map(|part| part.id).collect::<HashSet<_>>();
        self.ids
            .iter()
            .filter(|id| !shown.contains(id))
            .copied()
            .collect()
    }
}
