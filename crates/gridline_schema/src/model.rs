//! Global Schema Data Model
//!
//! A global schema is the canonical, named column definition set that
//! uploaded files are mapped onto. Snapshots are immutable once
//! superseded: evolving a schema "as a new version" creates a new row
//! with a back-reference to its predecessor, never rewrites history.

use chrono::{DateTime, Utc};
use gridline_ids::{ColumnId, ProjectId, SchemaId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;

/// Column data type for global schemas.
///
/// This is the user-facing set exposed in schema editing. Widening rules
/// between these types live in [`crate::impact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// UTF-8 string (default/fallback)
    #[default]
    Text,

    /// 64-bit signed integer
    Integer,

    /// Arbitrary-precision numeric (floats, decimals)
    Numeric,

    /// Boolean (true/false)
    Boolean,

    /// Timestamp without timezone
    Timestamp,

    /// Nested JSON document
    Json,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Numeric => "numeric",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
        }
    }

    /// All valid type names, for error messages at the API boundary.
    pub fn all() -> &'static [ColumnType] {
        &[
            ColumnType::Text,
            ColumnType::Integer,
            ColumnType::Numeric,
            ColumnType::Boolean,
            ColumnType::Timestamp,
            ColumnType::Json,
        ]
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ColumnType::Text),
            "integer" => Ok(ColumnType::Integer),
            "numeric" => Ok(ColumnType::Numeric),
            "boolean" => Ok(ColumnType::Boolean),
            "timestamp" => Ok(ColumnType::Timestamp),
            "json" => Ok(ColumnType::Json),
            _ => Err(format!("Unknown column type: '{}'", s)),
        }
    }
}

/// Kind of a column validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Min,
    Max,
    Pattern,
    Enum,
    Custom,
}

/// A validation rule attached to a column.
///
/// The `value` payload is rule-specific (a number for min/max, a regex
/// string for pattern, an array for enum) and is never null while the
/// rule exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub rule_type: RuleType,

    /// Rule-specific payload
    pub value: serde_json::Value,

    /// Optional human-readable override for violation messages
    pub error_message: Option<String>,
}

impl ValidationRule {
    pub fn new(rule_type: RuleType, value: serde_json::Value) -> Self {
        Self {
            rule_type,
            value,
            error_message: None,
        }
    }

    pub fn min(value: f64) -> Self {
        Self::new(RuleType::Min, serde_json::json!(value))
    }

    pub fn max(value: f64) -> Self {
        Self::new(RuleType::Max, serde_json::json!(value))
    }

    pub fn pattern(regex: impl Into<String>) -> Self {
        Self::new(RuleType::Pattern, serde_json::Value::String(regex.into()))
    }

    pub fn one_of(values: Vec<serde_json::Value>) -> Self {
        Self::new(RuleType::Enum, serde_json::Value::Array(values))
    }

    /// Set the violation message override
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// A column definition within a global schema snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaColumn {
    /// Immutable once created; survives across schema versions
    pub id: ColumnId,

    /// Unique case-insensitively within one snapshot
    pub name: String,

    pub column_type: ColumnType,

    pub description: Option<String>,

    /// Whether mapped rows must supply a value
    pub is_required: bool,

    pub is_primary_key: bool,

    pub is_foreign_key: bool,

    /// Set only when `is_foreign_key` is true
    pub references_table: Option<String>,

    /// Set only when `is_foreign_key` is true
    pub references_column: Option<String>,

    /// Default applied when a mapped file has no value for this column
    pub default_value: Option<String>,

    pub validation_rules: Vec<ValidationRule>,
}

impl SchemaColumn {
    /// Create a new required column
    pub fn required(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            id: ColumnId::new(),
            name: name.into(),
            column_type,
            description: None,
            is_required: true,
            is_primary_key: false,
            is_foreign_key: false,
            references_table: None,
            references_column: None,
            default_value: None,
            validation_rules: Vec::new(),
        }
    }

    /// Create a new optional column
    pub fn optional(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            is_required: false,
            ..Self::required(name, column_type)
        }
    }

    /// Set description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Mark as primary key
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    /// Mark as foreign key referencing `table.column`
    pub fn foreign_key(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.is_foreign_key = true;
        self.references_table = Some(table.into());
        self.references_column = Some(column.into());
        self
    }

    /// Set the default value applied to unmapped rows
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default_value = Some(default.into());
        self
    }

    /// Attach a validation rule
    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    /// Case-insensitive name comparison, the identity rule for columns
    /// within one snapshot.
    pub fn name_matches(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}

/// A partial update to an existing column.
///
/// Every field is optional; absent fields leave the column untouched.
/// This is the `params` payload of a `modify_column` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnPatch {
    /// Rename the column
    pub name: Option<String>,

    pub column_type: Option<ColumnType>,

    pub description: Option<String>,

    pub is_required: Option<bool>,

    pub is_primary_key: Option<bool>,

    pub is_foreign_key: Option<bool>,

    pub references_table: Option<String>,

    pub references_column: Option<String>,

    pub default_value: Option<String>,

    /// Replaces the full rule set when present
    pub validation_rules: Option<Vec<ValidationRule>>,
}

impl ColumnPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn retype(mut self, column_type: ColumnType) -> Self {
        self.column_type = Some(column_type);
        self
    }

    pub fn require(mut self, required: bool) -> Self {
        self.is_required = Some(required);
        self
    }

    pub fn with_rules(mut self, rules: Vec<ValidationRule>) -> Self {
        self.validation_rules = Some(rules);
        self
    }

    /// Apply this patch to a column, producing the updated column.
    /// The column id is never changed.
    pub fn apply_to(&self, column: &SchemaColumn) -> SchemaColumn {
        let mut updated = column.clone();
        if let Some(ref name) = self.name {
            updated.name = name.clone();
        }
        if let Some(column_type) = self.column_type {
            updated.column_type = column_type;
        }
        if let Some(ref description) = self.description {
            updated.description = Some(description.clone());
        }
        if let Some(required) = self.is_required {
            updated.is_required = required;
        }
        if let Some(pk) = self.is_primary_key {
            updated.is_primary_key = pk;
        }
        if let Some(fk) = self.is_foreign_key {
            updated.is_foreign_key = fk;
            if !fk {
                updated.references_table = None;
                updated.references_column = None;
            }
        }
        if let Some(ref table) = self.references_table {
            updated.references_table = Some(table.clone());
        }
        if let Some(ref column_ref) = self.references_column {
            updated.references_column = Some(column_ref.clone());
        }
        if let Some(ref default) = self.default_value {
            updated.default_value = Some(default.clone());
        }
        if let Some(ref rules) = self.validation_rules {
            updated.validation_rules = rules.clone();
        }
        updated
    }
}

/// Errors describing a malformed schema snapshot.
///
/// A stored schema is always well-formed: these are rejected before
/// anything is persisted, so reads never have to tolerate shape drift.
#[derive(Debug, Error)]
pub enum SchemaShapeError {
    #[error("Schema name cannot be empty")]
    EmptySchemaName,

    #[error("Schema must have at least one column")]
    NoColumns,

    #[error("Column name cannot be empty")]
    EmptyColumnName,

    #[error("Duplicate column name: '{0}'")]
    DuplicateColumnName(String),

    #[error("Foreign key column '{0}' is missing its table/column reference")]
    ForeignKeyMissingReference(String),
}

/// Validate a column set for storage: non-empty names, case-insensitive
/// uniqueness, complete foreign-key references.
pub fn validate_columns(columns: &[SchemaColumn]) -> Result<(), SchemaShapeError> {
    if columns.is_empty() {
        return Err(SchemaShapeError::NoColumns);
    }

    let mut seen = HashSet::new();
    for col in columns {
        if col.name.trim().is_empty() {
            return Err(SchemaShapeError::EmptyColumnName);
        }
        if !seen.insert(col.name.to_ascii_lowercase()) {
            return Err(SchemaShapeError::DuplicateColumnName(col.name.clone()));
        }
        if col.is_foreign_key
            && (col.references_table.is_none() || col.references_column.is_none())
        {
            return Err(SchemaShapeError::ForeignKeyMissingReference(col.name.clone()));
        }
    }

    Ok(())
}

/// A global schema snapshot.
///
/// `version` is strictly increasing along a lineage; `previous_version_id`
/// is a weak back-reference to the superseded snapshot (absent for the
/// first version). Superseded snapshots are history and are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSchema {
    pub id: SchemaId,

    pub owner_id: UserId,

    pub project_id: Option<ProjectId>,

    pub name: String,

    pub description: Option<String>,

    /// Ordered for display; identity is the case-insensitive name
    pub columns: Vec<SchemaColumn>,

    /// Positive, strictly increasing along a lineage
    pub version: u32,

    /// Absent for the first version in a lineage
    pub previous_version_id: Option<SchemaId>,

    /// At most one schema per project is active at any time
    pub is_active: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl GlobalSchema {
    /// Create the first version of a new lineage.
    pub fn new(owner_id: UserId, name: impl Into<String>, columns: Vec<SchemaColumn>) -> Self {
        let now = Utc::now();
        Self {
            id: SchemaId::new(),
            owner_id,
            project_id: None,
            name: name.into(),
            description: None,
            columns,
            version: 1,
            previous_version_id: None,
            is_active: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach to a project
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Set description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Find a column by case-insensitive name.
    pub fn find_column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name_matches(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    /// Cheap fingerprint of the snapshot content, used to assert
    /// byte-equality across a failed commit.
    pub fn content_hash(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.name.hash(&mut hasher);
        self.description.hash(&mut hasher);
        self.version.hash(&mut hasher);
        for col in &self.columns {
            col.name.hash(&mut hasher);
            col.column_type.as_str().hash(&mut hasher);
            col.is_required.hash(&mut hasher);
            col.is_primary_key.hash(&mut hasher);
            col.is_foreign_key.hash(&mut hasher);
            col.references_table.hash(&mut hasher);
            col.references_column.hash(&mut hasher);
            col.default_value.hash(&mut hasher);
            for rule in &col.validation_rules {
                format!("{:?}", rule.rule_type).hash(&mut hasher);
                rule.value.to_string().hash(&mut hasher);
            }
        }
        format!("{:016x}", hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_schema() {
        let schema = GlobalSchema::new(
            UserId::new(),
            "sales",
            vec![
                SchemaColumn::required("id", ColumnType::Text).primary_key(),
                SchemaColumn::required("amount", ColumnType::Numeric),
                SchemaColumn::optional("notes", ColumnType::Text),
            ],
        );

        assert_eq!(schema.version, 1);
        assert!(schema.previous_version_id.is_none());
        assert!(!schema.is_active);
        assert_eq!(schema.columns.len(), 3);
    }

    #[test]
    fn find_column_is_case_insensitive() {
        let schema = GlobalSchema::new(
            UserId::new(),
            "sales",
            vec![SchemaColumn::required("Email", ColumnType::Text)],
        );

        assert!(schema.has_column("email"));
        assert!(schema.has_column("EMAIL"));
        assert!(!schema.has_column("phone"));
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let columns = vec![
            SchemaColumn::required("id", ColumnType::Text),
            SchemaColumn::required("ID", ColumnType::Integer),
        ];

        let err = validate_columns(&columns).unwrap_err();
        assert!(matches!(err, SchemaShapeError::DuplicateColumnName(ref name) if name == "ID"));
    }

    #[test]
    fn validate_rejects_empty_name_and_empty_set() {
        assert!(matches!(
            validate_columns(&[]),
            Err(SchemaShapeError::NoColumns)
        ));

        let columns = vec![SchemaColumn::required("  ", ColumnType::Text)];
        assert!(matches!(
            validate_columns(&columns),
            Err(SchemaShapeError::EmptyColumnName)
        ));
    }

    #[test]
    fn validate_rejects_dangling_foreign_key() {
        let mut col = SchemaColumn::required("user_id", ColumnType::Text);
        col.is_foreign_key = true;

        let err = validate_columns(&[col]).unwrap_err();
        assert!(matches!(err, SchemaShapeError::ForeignKeyMissingReference(_)));
    }

    #[test]
    fn patch_apply_preserves_column_id() {
        let col = SchemaColumn::required("age", ColumnType::Integer);
        let patch = ColumnPatch::new().retype(ColumnType::Numeric).require(false);

        let updated = patch.apply_to(&col);
        assert_eq!(updated.id, col.id);
        assert_eq!(updated.column_type, ColumnType::Numeric);
        assert!(!updated.is_required);
        assert_eq!(updated.name, "age");
    }

    #[test]
    fn patch_clearing_foreign_key_drops_references() {
        let col = SchemaColumn::required("user_id", ColumnType::Text).foreign_key("users", "id");
        let patch = ColumnPatch {
            is_foreign_key: Some(false),
            ..Default::default()
        };

        let updated = patch.apply_to(&col);
        assert!(!updated.is_foreign_key);
        assert!(updated.references_table.is_none());
        assert!(updated.references_column.is_none());
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(ColumnPatch::new().is_empty());
        assert!(!ColumnPatch::new().rename("x").is_empty());
    }

    #[test]
    fn column_type_roundtrip() {
        for ty in ColumnType::all() {
            let parsed: ColumnType = ty.as_str().parse().unwrap();
            assert_eq!(parsed, *ty);
        }
        assert!("geometry".parse::<ColumnType>().is_err());
    }

    #[test]
    fn content_hash_tracks_column_changes() {
        let schema = GlobalSchema::new(
            UserId::new(),
            "sales",
            vec![SchemaColumn::required("id", ColumnType::Text)],
        );
        let before = schema.content_hash();

        let mut changed = schema.clone();
        changed.columns[0].column_type = ColumnType::Integer;
        assert_ne!(before, changed.content_hash());

        assert_eq!(before, schema.content_hash());
    }

    #[test]
    fn validation_rule_builders() {
        let rule = ValidationRule::min(0.0).with_message("must be non-negative");
        assert_eq!(rule.rule_type, RuleType::Min);
        assert!(rule.error_message.is_some());

        let rule = ValidationRule::one_of(vec![
            serde_json::json!("open"),
            serde_json::json!("closed"),
        ]);
        assert_eq!(rule.rule_type, RuleType::Enum);
    }
}
