//! Change events and their enumerations.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::BlastRadiusPrediction;

/// Kind of change observed in the environment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Deployment,
    ConfigChange,
    InfraModification,
    FeatureFlag,
    DbMigration,
    CodeChange,
    Rollback,
    Scaling,
    SecurityPatch,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::ConfigChange => "config_change",
            Self::InfraModification => "infra_modification",
            Self::FeatureFlag => "feature_flag",
            Self::DbMigration => "db_migration",
            Self::CodeChange => "code_change",
            Self::Rollback => "rollback",
            Self::Scaling => "scaling",
            Self::SecurityPatch => "security_patch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deployment" => Some(Self::Deployment),
            "config_change" => Some(Self::ConfigChange),
            "infra_modification" => Some(Self::InfraModification),
            "feature_flag" => Some(Self::FeatureFlag),
            "db_migration" => Some(Self::DbMigration),
            "code_change" => Some(Self::CodeChange),
            "rollback" => Some(Self::Rollback),
            "scaling" => Some(Self::Scaling),
            "security_patch" => Some(Self::SecurityPatch),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin system the event was observed from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Github,
    Gitlab,
    AwsCodepipeline,
    AwsEcs,
    AwsLambda,
    Kubernetes,
    ClaudeHook,
    AgentHook,
    Manual,
    Terraform,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::AwsCodepipeline => "aws_codepipeline",
            Self::AwsEcs => "aws_ecs",
            Self::AwsLambda => "aws_lambda",
            Self::Kubernetes => "kubernetes",
            Self::ClaudeHook => "claude_hook",
            Self::AgentHook => "agent_hook",
            Self::Manual => "manual",
            Self::Terraform => "terraform",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "github" => Some(Self::Github),
            "gitlab" => Some(Self::Gitlab),
            "aws_codepipeline" => Some(Self::AwsCodepipeline),
            "aws_ecs" => Some(Self::AwsEcs),
            "aws_lambda" => Some(Self::AwsLambda),
            "kubernetes" => Some(Self::Kubernetes),
            "claude_hook" => Some(Self::ClaudeHook),
            "agent_hook" => Some(Self::AgentHook),
            "manual" => Some(Self::Manual),
            "terraform" => Some(Self::Terraform),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who initiated the change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    Human,
    Agent,
    Automation,
    Unknown,
}

impl Initiator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
            Self::Automation => "automation",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Self::Human),
            "agent" => Some(Self::Agent),
            "automation" => Some(Self::Automation),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for Initiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the change content was authored. Distinct from [`Initiator`]: a human
/// may push an agent-authored commit and vice versa.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    Human,
    AiAssisted,
    AutonomousAgent,
}

impl AuthorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::AiAssisted => "ai_assisted",
            Self::AutonomousAgent => "autonomous_agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Self::Human),
            "ai_assisted" => Some(Self::AiAssisted),
            "autonomous_agent" => Some(Self::AutonomousAgent),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of the change itself.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logical mutation observed in the environment.
///
/// `id` is immutable once assigned. `idempotency_key` is unique across the
/// store when present. `updated_at >= created_at` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,

    /// Observed wall-clock time of the change; defaults to ingest time.
    pub timestamp: DateTime<Utc>,

    /// Primary affected service. Non-empty.
    pub service: String,

    /// Co-affected services, order-preserving and de-duplicated.
    pub additional_services: Vec<String>,

    pub change_type: ChangeType,
    pub source: ChangeSource,
    pub initiator: Initiator,
    pub initiator_identity: Option<String>,
    pub author_type: Option<AuthorType>,
    pub status: ChangeStatus,
    pub environment: String,

    /// Human-readable description. Non-empty; indexed for full-text search.
    pub summary: String,

    pub commit_sha: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,

    pub diff: Option<String>,
    pub files_changed: Vec<String>,
    pub config_keys: Vec<String>,

    pub previous_version: Option<String>,
    pub new_version: Option<String>,

    /// Attached prediction; mutable after ingest.
    pub blast_radius: Option<BlastRadiusPrediction>,

    pub idempotency_key: Option<String>,
    pub change_set_id: Option<String>,
    pub canonical_url: Option<String>,

    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// The primary service plus every additional service, in order.
    pub fn all_services(&self) -> Vec<String> {
        let mut services = Vec::with_capacity(1 + self.additional_services.len());
        services.push(self.service.clone());
        for s in &self.additional_services {
            if !services.contains(s) {
                services.push(s.clone());
            }
        }
        services
    }

    /// First string value under `key` in metadata, if any.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Ingest payload. Everything the server fills in at insert time is optional
/// here; `service`, `summary`, and `change_type` are validated at insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewChangeEvent {
    pub timestamp: Option<DateTime<Utc>>,
    pub service: String,
    pub additional_services: Vec<String>,
    pub change_type: Option<ChangeType>,
    pub source: Option<ChangeSource>,
    pub initiator: Option<Initiator>,
    pub initiator_identity: Option<String>,
    pub author_type: Option<AuthorType>,
    pub status: Option<ChangeStatus>,
    pub environment: Option<String>,
    pub summary: String,
    pub commit_sha: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub diff: Option<String>,
    pub files_changed: Vec<String>,
    pub config_keys: Vec<String>,
    pub previous_version: Option<String>,
    pub new_version: Option<String>,
    pub idempotency_key: Option<String>,
    pub change_set_id: Option<String>,
    pub canonical_url: Option<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewChangeEvent {
    pub fn new(
        service: impl Into<String>,
        change_type: ChangeType,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            change_type: Some(change_type),
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn from_source(mut self, source: ChangeSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn by(mut self, initiator: Initiator) -> Self {
        self.initiator = Some(initiator);
        self
    }

    pub fn with_status(mut self, status: ChangeStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn in_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn also_affects(mut self, service: impl Into<String>) -> Self {
        self.additional_services.push(service.into());
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_commit(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    pub fn with_pr(mut self, number: i64, url: impl Into<String>) -> Self {
        self.pr_number = Some(number);
        self.pr_url = Some(url.into());
        self
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.files_changed
            .extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), v);
        }
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Partial update. Only the fields carried here are mutable after ingest;
/// an all-`None` patch is a documented no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeEventPatch {
    pub status: Option<ChangeStatus>,
    pub summary: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub blast_radius: Option<BlastRadiusPrediction>,
}

impl ChangeEventPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.summary.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
            && self.blast_radius.is_none()
    }

    pub fn set_status(mut self, status: ChangeStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn set_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn set_blast_radius(mut self, prediction: BlastRadiusPrediction) -> Self {
        self.blast_radius = Some(prediction);
        self
    }
}

/// Change velocity for one service over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityMetric {
    pub service: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub change_count: u64,
    pub change_types: BTreeMap<ChangeType, u64>,
    /// Mean gap between consecutive events in the window; 0 when fewer than
    /// two events.
    pub average_interval_minutes: f64,
}

/// Store-wide aggregate counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: u64,
    pub by_type: BTreeMap<ChangeType, u64>,
    pub by_source: BTreeMap<ChangeSource, u64>,
    pub by_environment: BTreeMap<String, u64>,
}
