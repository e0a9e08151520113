use crate::error::PartdeskError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Generates a closed set of values stored as lowercase text columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::error::PartdeskError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err($crate::error::PartdeskError::Validation(format!(
                        concat!("invalid ", stringify!($name), ": {}"),
                        s
                    ))),
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_enum;

text_enum!(
    /// Ordered from least to most urgent, sorting relies on it.
    Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
);

text_enum!(WorkflowStatus {
    New => "new",
    InReview => "in_review",
    Approved => "approved",
    Rejected => "rejected",
    Done => "done",
});

text_enum!(Complexity {
    Simple => "simple",
    Moderate => "moderate",
    Complex => "complex",
});

/// Lifecycle of an uploaded document. Advanced by the external ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Queued,
    Processing,
    Success,
    #[serde(alias = "failed")]
    Error,
}

impl DocumentStatus {
    /// Statuses of documents shown as placeholders until their parts arrive.
    pub const PENDING: [DocumentStatus; 3] = [Self::Queued, Self::Processing, Self::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::Success)
    }
}

impl FromStr for DocumentStatus {
    type Err = PartdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "error" | "failed" => Ok(Self::Error),
            _ => Err(PartdeskError::Validation(format!(
                "invalid DocumentStatus: {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub file_name: String,
    pub bucket: String,
    pub storage_key: String,
    pub thumbnail_key: Option<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database model
#[derive(Debug, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub file_name: String,
    pub bucket: String,
    pub storage_key: String,
    pub thumbnail_key: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = PartdeskError;

    fn try_from(value: DocumentRow) -> Result<Self, Self::Error> {
        let DocumentRow {
            id,
            organization_id,
            file_name,
            bucket,
            storage_key,
            thumbnail_key,
            status,
            created_at,
            updated_at,
        } = value;

        Ok(Self {
            id,
            organization_id,
            file_name,
            bucket,
            storage_key,
            thumbnail_key,
            status: status.parse()?,
            created_at,
            updated_at,
        })
    }
}

/// The parent of a part, resolved through the document-part link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: Uuid,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub document: DocumentRef,
    pub name: String,
    pub class: Option<String>,
    pub material: Option<String>,
    pub complexity: Option<Complexity>,
    pub fit_level: Option<String>,
    pub company: Option<String>,
    pub workflow_status: WorkflowStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Database model, a part joined with its parent document.
#[derive(Debug, sqlx::FromRow)]
pub struct PartRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub document_id: Uuid,
    pub document_file_name: String,
    pub name: String,
    pub class: Option<String>,
    pub material: Option<String>,
    pub complexity: Option<String>,
    pub fit_level: Option<String>,
    pub company: Option<String>,
    pub workflow_status: String,
    pub priority: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl TryFrom<PartRow> for Part {
    type Error = PartdeskError;

    fn try_from(value: PartRow) -> Result<Self, Self::Error> {
        let PartRow {
            id,
            organization_id,
            document_id,
            document_file_name,
            name,
            class,
            material,
            complexity,
            fit_level,
            company,
            workflow_status,
            priority,
            created_at,
            last_updated,
        } = value;

        Ok(Self {
            id,
            organization_id,
            document: DocumentRef {
                id: document_id,
                file_name: document_file_name,
            },
            name,
            class,
            material,
            complexity: complexity
                .as_deref()
                .map(str::parse::<Complexity>)
                .transpose()?,
            fit_level,
            company,
            workflow_status: workflow_status.parse()?,
            priority: priority.parse()?,
            created_at,
            last_updated,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PartTag {
    pub part_id: Uuid,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PartComment {
    pub id: Uuid,
    pub part_id: Uuid,
    pub user_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Where a stored object lives and how long a signed link to it may stay valid.
/// Signing itself happens in the external storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageObject {
    pub bucket: String,
    pub key: String,
    pub expires_in: u64,
}
