//! Data models for synchronized collections.
//!
//! This module defines the core data structures:
//! - `CollectionKind` / `CollectionKey` - names for server-owned collections
//! - `EntityRecord` - the uniform id + JSON payload record the engine stores
//! - `OperationKind` / `MutationPolicy` - mutation descriptors
//! - Typed wire models (`Message`, `Comment`, `Milestone`, `Issue`,
//!   `RoleAssignment`) matching the backend's JSON field names
//! - `graph::DependencyGraph` - static invalidation edges between kinds

pub mod graph;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;

use crate::{Error, Result};

/// Kind of server-owned collection tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Chat messages; insertion order is meaningful (ascending creation time).
    Messages,
    /// Comments on an issue.
    Comments,
    /// Milestones of a project, carrying server-computed progress aggregates.
    Milestones,
    /// Tasks (issues) of a project.
    Tasks,
    /// Role assignments of a project.
    Roles,
    /// The project detail itself (team view); target of role invalidation.
    Project,
}

impl CollectionKind {
    /// Get the string representation used in collection keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Messages => "messages",
            CollectionKind::Comments => "comments",
            CollectionKind::Milestones => "milestones",
            CollectionKind::Tasks => "tasks",
            CollectionKind::Roles => "roles",
            CollectionKind::Project => "project",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifier of one cached collection instance, e.g. `messages:7` for the
/// message list of chat 7 or `milestones:7` for the milestones of project 7.
///
/// The scope may carry further segments (`tasks:7:3` for the tasks of
/// milestone 3 under project 7); [`CollectionKey::project_scope`] strips them
/// when resolving invalidation targets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionKey {
    pub kind: CollectionKind,
    pub scope: String,
}

impl CollectionKey {
    /// Create a key from a kind and a scope.
    pub fn new(kind: CollectionKind, scope: impl Into<String>) -> Self {
        Self {
            kind,
            scope: scope.into(),
        }
    }

    /// The leading scope segment, shared by all collections of one project.
    ///
    /// `tasks:7:3` and `milestones:7` both resolve to project scope `"7"`.
    pub fn project_scope(&self) -> &str {
        self.scope.split(':').next().unwrap_or(&self.scope)
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.scope)
    }
}

/// Identifier of one entity inside a collection.
///
/// Server-assigned ids (JSON numbers or strings) are normalized to strings;
/// optimistic creates use a client-chosen `local-<uuid>` id until the server
/// responds with the canonical record.
pub type EntityId = String;

/// The uniform record stored per entity: an immutable id plus the raw JSON
/// payload as delivered by (or destined for) the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub payload: serde_json::Value,
}

impl EntityRecord {
    /// Create a record with an explicit id.
    pub fn new(id: impl Into<EntityId>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Build a record from a server JSON object, extracting its `id` field.
    ///
    /// Accepts numeric and string ids. Fails when the field is missing,
    /// since a record without an identity cannot be deduplicated.
    pub fn from_value(payload: serde_json::Value) -> Result<Self> {
        let id = match payload.get("id") {
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => {
                return Err(Error::Unknown(
                    "entity payload has no usable id field".to_string(),
                ));
            }
        };
        Ok(Self { id, payload })
    }

    /// Deserialize the payload into a typed wire model.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::Unknown(format!("payload decode failed: {}", e)))
    }

    /// True for client-chosen ids of optimistic creates that the server has
    /// not confirmed yet.
    pub fn is_local(&self) -> bool {
        self.id.starts_with("local-")
    }
}

/// Generate a client-chosen id for an optimistic create.
pub fn local_id() -> EntityId {
    format!("local-{}", uuid::Uuid::new_v4())
}

/// Kind of mutation issued against a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// How a mutation is applied to the local store relative to the network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationPolicy {
    /// Apply locally before the server confirms, rolling back on failure.
    pub optimistic: bool,
}

impl MutationPolicy {
    /// Apply locally first, reconcile or roll back on settlement.
    pub fn optimistic() -> Self {
        Self { optimistic: true }
    }

    /// Wait for server confirmation before touching the store.
    pub fn confirmed() -> Self {
        Self { optimistic: false }
    }
}

/// Minimal reference to a user embedded in other payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserRef>,

    /// Server-assigned creation time; messages are served ascending by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Draft a new message for sending.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            sender: None,
            created_at: None,
        }
    }
}

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_time: Option<DateTime<Utc>>,
}

/// Milestone status in the backend's workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    #[default]
    Planejado,
    EmAndamento,
    Concluido,
}

/// A milestone (sprint) of a project.
///
/// The progress aggregates (`completion_percentage`, `total_issues`,
/// `completed_issues`) are computed server-side and never recomputed locally;
/// after any task mutation they are stale until the milestone collection is
/// re-fetched. The engine flags the collection accordingly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,

    #[serde(default)]
    pub status: MilestoneStatus,

    /// Server-computed completion percentage (0-100).
    #[serde(default)]
    pub completion_percentage: f64,

    /// Server-computed count of issues under this milestone.
    #[serde(default)]
    pub total_issues: i64,

    /// Server-computed count of completed issues under this milestone.
    #[serde(default)]
    pub completed_issues: i64,
}

impl Milestone {
    /// Draft a new milestone for creation.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            start_date: None,
            end_date: None,
            status: MilestoneStatus::default(),
            completion_percentage: 0.0,
            total_issues: 0,
            completed_issues: 0,
        }
    }
}

/// Issue status in the backend's workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    #[default]
    AFazer,
    EmAndamento,
    Concluido,
}

/// Issue priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuePriority {
    Baixa,
    #[default]
    Media,
    Alta,
}

/// A task (issue) of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub status: IssueStatus,

    #[serde(default)]
    pub priority: IssuePriority,

    /// The backend names this field `projectID`, not `projectId`.
    #[serde(rename = "projectID", default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<UserRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl Issue {
    /// Draft a new issue for creation under a project.
    pub fn new(title: impl Into<String>, project_id: i64) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: None,
            status: IssueStatus::default(),
            priority: IssuePriority::default(),
            project_id: Some(project_id),
            milestone_id: None,
            assignee: None,
            due_date: None,
        }
    }
}

/// A role assignment within a project's team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub user_id: i64,

    pub project_id: i64,

    pub role: String,
}
