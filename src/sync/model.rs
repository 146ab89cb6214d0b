//! Data model shared by every component of the sync engine.
//!
//! All identifiers are opaque 128-bit values (`Uuid`) assigned at creation;
//! equality is bitwise via `Uuid`'s own `PartialEq`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub type SubscriptionId = Uuid;
pub type SnapshotId = Uuid;
pub type ComparisonId = Uuid;
pub type ChangeId = Uuid;
pub type DifferenceId = Uuid;

/// The object-type enumeration. The first eight variants are the *supported
/// set* (participate in comparison); the remainder are carried but only ever
/// surface via the unsupported channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Table,
    View,
    StoredProcedure,
    ScalarFunction,
    TableValuedFunction,
    InlineTableValuedFunction,
    Trigger,
    User,
    Role,
    Login,
    Unknown,
}

impl ObjectType {
    pub const SUPPORTED: [ObjectType; 9] = [
        ObjectType::Table,
        ObjectType::View,
        ObjectType::StoredProcedure,
        ObjectType::ScalarFunction,
        ObjectType::TableValuedFunction,
        ObjectType::InlineTableValuedFunction,
        ObjectType::Trigger,
        ObjectType::User,
        ObjectType::Role,
    ];

    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(self)
    }

    /// Maps a `sys.objects.type` code to an `ObjectType`.
    pub fn from_sys_objects_code(code: &str) -> Option<ObjectType> {
        match code.trim() {
            "U" => Some(ObjectType::Table),
            "V" => Some(ObjectType::View),
            "P" => Some(ObjectType::StoredProcedure),
            "FN" => Some(ObjectType::ScalarFunction),
            "IF" => Some(ObjectType::InlineTableValuedFunction),
            "TF" => Some(ObjectType::TableValuedFunction),
            "TR" => Some(ObjectType::Trigger),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Integrated,
    UsernameSecret,
    CloudInteractive,
    CloudNonInteractive,
}

/// Value object owned exclusively by its `Subscription`. `secret` is an
/// opaque, pre-encrypted blob passed through to the connection factory
/// untouched - the engine never decrypts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConnection {
    pub server: String,
    pub database: String,
    pub auth_kind: AuthKind,
    pub username: Option<String>,
    pub secret: Option<Vec<u8>>,
    pub trust_certificate: bool,
    pub connect_timeout: std::time::Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Flat,
    BySchema,
    ByType,
    BySchemaAndType,
}

/// Value object owned exclusively by its `Subscription`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFolder {
    pub root: std::path::PathBuf,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub layout: LayoutKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    pub auto_compare: bool,
    pub compare_on_file_change: bool,
    pub compare_on_database_change: bool,
    /// Empty is interpreted as "all supported types".
    pub object_type_allow_set: HashSet<ObjectType>,
    pub ignore_whitespace: bool,
    pub ignore_comments: bool,
}

impl SubscriptionOptions {
    /// The effective allow-set: the declared set intersected with the
    /// globally supported set, or the full supported set if empty.
    pub fn effective_allow_set(&self) -> HashSet<ObjectType> {
        if self.object_type_allow_set.is_empty() {
            ObjectType::SUPPORTED.iter().copied().collect()
        } else {
            self.object_type_allow_set
                .iter()
                .copied()
                .filter(ObjectType::is_supported)
                .collect()
        }
    }
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            auto_compare: true,
            compare_on_file_change: true,
            compare_on_database_change: true,
            object_type_allow_set: HashSet::new(),
            ignore_whitespace: false,
            ignore_comments: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Active,
    Paused,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIssueKind {
    Database,
    Folder,
    Files,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthIssue {
    pub kind: HealthIssueKind,
    pub message: String,
    pub since: DateTime<Utc>,
}

/// Bound on the rolling issue history carried on `SubscriptionHealth`.
pub const MAX_HEALTH_HISTORY: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionHealth {
    pub database_connectable: bool,
    pub folder_accessible: bool,
    pub files_present: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub overall_status: HealthStatus,
    /// Most recent issues first; bounded to `MAX_HEALTH_HISTORY`.
    pub issue_history: Vec<HealthIssue>,
}

impl Default for SubscriptionHealth {
    fn default() -> Self {
        Self {
            database_connectable: false,
            folder_accessible: false,
            files_present: false,
            last_checked: None,
            last_error: None,
            overall_status: HealthStatus::Unknown,
            issue_history: Vec::new(),
        }
    }
}

impl SubscriptionHealth {
    /// Derives overall status from the three booleans.
    pub fn derive_status(db_ok: bool, folder_ok: bool, files_present: bool) -> HealthStatus {
        if db_ok && folder_ok && files_present {
            HealthStatus::Healthy
        } else if !db_ok || !folder_ok {
            HealthStatus::Unhealthy
        } else if db_ok && folder_ok && !files_present {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unknown
        }
    }

    pub fn push_issues(&mut self, mut issues: Vec<HealthIssue>) {
        issues.append(&mut self.issue_history);
        issues.truncate(MAX_HEALTH_HISTORY);
        self.issue_history = issues;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionTimestamps {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub paused: Option<DateTime<Utc>>,
    pub resumed: Option<DateTime<Utc>>,
    pub last_compared: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub name: String,
    pub database: DatabaseConnection,
    pub folder: ProjectFolder,
    pub options: SubscriptionOptions,
    pub state: SubscriptionState,
    pub health: SubscriptionHealth,
    pub timestamps: SubscriptionTimestamps,
}

impl Subscription {
    pub fn new(name: String, database: DatabaseConnection, folder: ProjectFolder, options: SubscriptionOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            database,
            folder,
            options,
            state: SubscriptionState::Active,
            health: SubscriptionHealth::default(),
            timestamps: SubscriptionTimestamps {
                created: now,
                updated: now,
                paused: None,
                resumed: None,
                last_compared: None,
            },
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SubscriptionState::Active
    }
}

/// A single schema object's fingerprint, from either side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaObjectSummary {
    pub schema_name: String,
    pub object_name: String,
    pub object_type: ObjectType,
    pub definition_hash: String,
    pub normalized_definition_script: String,
    pub modify_instant: Option<DateTime<Utc>>,
}

impl SchemaObjectSummary {
    /// Two summaries are "equal" iff type, schema, name, and hash all match.
    pub fn matches(&self, other: &SchemaObjectSummary) -> bool {
        self.object_type == other.object_type
            && self.schema_name.eq_ignore_ascii_case(&other.schema_name)
            && self.object_name.eq_ignore_ascii_case(&other.object_name)
            && self.definition_hash == other.definition_hash
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            schema_name: self.schema_name.to_lowercase(),
            object_name: self.object_name.to_lowercase(),
            object_type: self.object_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub object_type: ObjectType,
    pub schema_name: String,
    pub object_name: String,
}

/// The current version of the normalization pipeline. Bump whenever
/// a rule changes; snapshots tagged with an older version are
/// re-normalized on load.
pub const NORMALIZATION_PIPELINE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub id: SnapshotId,
    pub subscription_id: SubscriptionId,
    pub captured_at: DateTime<Utc>,
    pub normalization_pipeline_version: u32,
    pub overall_hash: String,
    pub objects: Vec<SchemaObjectSummary>,
    pub unsupported: Vec<UnsupportedObject>,
}

#[derive(Debug, Clone)]
pub struct FileObjectEntry {
    pub path: std::path::PathBuf,
    pub object_name: String,
    pub schema_name: String,
    pub object_type: ObjectType,
    pub content_hash: String,
    pub normalized_script: String,
    pub last_modified: DateTime<Utc>,
}

/// The symmetric file side. Not persisted - rebuilt per comparison.
#[derive(Debug, Clone)]
pub struct FileModelCache {
    pub subscription_id: SubscriptionId,
    pub captured_at: DateTime<Utc>,
    pub entries: std::collections::HashMap<std::path::PathBuf, FileObjectEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Database,
    Filesystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedChange {
    pub id: ChangeId,
    pub subscription_id: SubscriptionId,
    pub source: ChangeSource,
    pub kind: ChangeKind,
    pub object_identifier: String,
    pub object_type: Option<ObjectType>,
    pub detected_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl DetectedChange {
    pub fn new(
        subscription_id: SubscriptionId,
        source: ChangeSource,
        kind: ChangeKind,
        object_identifier: String,
        object_type: Option<ObjectType>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            source,
            kind,
            object_identifier,
            object_type,
            detected_at: Utc::now(),
            processed: false,
            processed_at: None,
        }
    }
}

/// Transient aggregation produced by the debouncer. Not persisted directly -
/// its members are, by the processor.
#[derive(Debug, Clone)]
pub struct PendingChangeBatch {
    pub subscription_id: SubscriptionId,
    pub changes: Vec<DetectedChange>,
    pub batch_started: DateTime<Utc>,
    pub batch_completed: DateTime<Utc>,
}

impl PendingChangeBatch {
    pub fn dominant_source(&self) -> Option<ChangeSource> {
        let has_fs = self.changes.iter().any(|c| c.source == ChangeSource::Filesystem);
        let has_db = self.changes.iter().any(|c| c.source == ChangeSource::Database);
        match (has_fs, has_db) {
            (true, _) => Some(ChangeSource::Filesystem),
            (false, true) => Some(ChangeSource::Database),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    Add,
    Delete,
    Modify,
    Rename,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDifference {
    pub property_name: String,
    pub database_value: Option<String>,
    pub file_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDifference {
    pub id: DifferenceId,
    pub object_type: ObjectType,
    pub schema_name: String,
    pub object_name: String,
    pub difference_kind: DifferenceKind,
    pub source: ChangeSource,
    pub database_definition: Option<String>,
    pub file_definition: Option<String>,
    pub file_path: Option<std::path::PathBuf>,
    pub property_differences: Vec<PropertyDifference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsupportedObject {
    pub source: ChangeSource,
    pub object_type: ObjectType,
    pub schema_name: String,
    pub object_name: String,
    pub file_path: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Synchronized,
    HasDifferences,
    Error,
    Partial,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total_differences: usize,
    pub additions: usize,
    pub modifications: usize,
    pub deletions: usize,
    pub per_type_counts: std::collections::HashMap<ObjectType, usize>,
    pub objects_compared: usize,
    pub objects_unchanged: usize,
    pub unsupported_database_count: usize,
    pub unsupported_file_count: usize,
}

impl ComparisonSummary {
    /// Derives every count exactly from the difference/unsupported lists so
    /// summary counts are never hand-maintained separately from the
    /// authoritative lists.
    pub fn derive(
        differences: &[SchemaDifference],
        unsupported: &[UnsupportedObject],
        objects_compared: usize,
        objects_unchanged: usize,
    ) -> Self {
        let mut per_type_counts = std::collections::HashMap::new();
        let mut additions = 0;
        let mut modifications = 0;
        let mut deletions = 0;

        for diff in differences {
            *per_type_counts.entry(diff.object_type).or_insert(0) += 1;
            match diff.difference_kind {
                DifferenceKind::Add => additions += 1,
                DifferenceKind::Modify => modifications += 1,
                DifferenceKind::Delete => deletions += 1,
                DifferenceKind::Rename => {}
            }
        }

        let unsupported_database_count = unsupported.iter().filter(|u| u.source == ChangeSource::Database).count();
        let unsupported_file_count = unsupported.iter().filter(|u| u.source == ChangeSource::Filesystem).count();

        Self {
            total_differences: differences.len(),
            additions,
            modifications,
            deletions,
            per_type_counts,
            objects_compared,
            objects_unchanged,
            unsupported_database_count,
            unsupported_file_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub id: ComparisonId,
    pub subscription_id: SubscriptionId,
    pub compared_at: DateTime<Utc>,
    pub duration: std::time::Duration,
    pub status: ComparisonStatus,
    pub trigger: String,
    pub summary: ComparisonSummary,
    pub differences: Vec<SchemaDifference>,
    pub unsupported_objects: Vec<UnsupportedObject>,
}
