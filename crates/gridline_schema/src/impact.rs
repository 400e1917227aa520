//! Impact Analysis
//!
//! Pure, side-effect-free evaluation of proposed column changes against an
//! existing column set. Findings come in three severities:
//!
//! - **Conflict**: blocks the operation (duplicate column names)
//! - **Breaking change**: blocks the operation (type narrowing, removal of
//!   a required column)
//! - **Warning**: surfaced to the caller but non-blocking (new constraints
//!   that may orphan rows already mapped through the column-mapping
//!   service)
//!
//! Nothing in this module touches persistence; the transaction manager
//! runs these checks at commit time against its working column set.

use crate::model::{ColumnPatch, ColumnType, SchemaColumn};
use serde::{Deserialize, Serialize};

/// A hard naming conflict that blocks an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnConflict {
    /// The column name at fault
    pub column: String,

    pub message: String,
}

impl std::fmt::Display for ColumnConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Conflict on column '{}': {}", self.column, self.message)
    }
}

/// A change that can invalidate or lose information for data already
/// mapped against the prior schema shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BreakingChange {
    /// Type change outside the widening table
    IncompatibleTypeChange {
        column: String,
        from: ColumnType,
        to: ColumnType,
    },

    /// Removal of a column that mapped rows are required to populate
    RequiredColumnRemoval { column: String },

    /// The operation targets a column that does not exist at this point
    /// of the staged log
    UnknownColumn { column: String },
}

impl BreakingChange {
    pub fn column(&self) -> &str {
        match self {
            BreakingChange::IncompatibleTypeChange { column, .. } => column,
            BreakingChange::RequiredColumnRemoval { column } => column,
            BreakingChange::UnknownColumn { column } => column,
        }
    }
}

impl std::fmt::Display for BreakingChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakingChange::IncompatibleTypeChange { column, from, to } => {
                write!(f, "Column '{}' cannot change type {} -> {}", column, from, to)
            }
            BreakingChange::RequiredColumnRemoval { column } => {
                write!(f, "Column '{}' is required and cannot be removed", column)
            }
            BreakingChange::UnknownColumn { column } => {
                write!(f, "Column '{}' does not exist", column)
            }
        }
    }
}

/// Kind of a non-blocking impact warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Adding a required column: previously mapped rows have no value
    NewRequiredColumn,

    /// Adding a primary key column
    NewPrimaryKeyColumn,

    /// Adding a foreign key column
    NewForeignKeyColumn,

    /// Flipping an optional column to required
    ColumnBecomesRequired,

    /// Promoting a column to primary key
    ColumnBecomesPrimaryKey,

    /// Promoting a column to foreign key
    ColumnBecomesForeignKey,

    /// The patched rule set is stricter than the current one
    StricterValidationRules,
}

/// A non-blocking finding surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactWarning {
    pub kind: WarningKind,

    /// Affected column (if applicable)
    pub column: Option<String>,

    pub message: String,
}

impl ImpactWarning {
    fn for_column(kind: WarningKind, column: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            column: Some(column.to_string()),
            message: message.into(),
        }
    }
}

/// Result of analyzing a set of proposed column additions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdditionImpact {
    pub conflicts: Vec<ColumnConflict>,
    pub warnings: Vec<ImpactWarning>,
}

impl AdditionImpact {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Result of analyzing a proposed column update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateImpact {
    pub breaking_changes: Vec<BreakingChange>,
    pub warnings: Vec<ImpactWarning>,
}

impl UpdateImpact {
    pub fn is_clean(&self) -> bool {
        self.breaking_changes.is_empty()
    }
}

/// Result of analyzing a proposed column removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalImpact {
    pub blocked: bool,
    pub reason: Option<String>,
}

/// Directed type-widening table.
///
/// `from == to` is always compatible. Text is the universal widening
/// target and is itself never safely narrowable.
pub fn is_compatible_type_change(from: ColumnType, to: ColumnType) -> bool {
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (ColumnType::Integer, ColumnType::Numeric)
            | (ColumnType::Integer, ColumnType::Text)
            | (ColumnType::Numeric, ColumnType::Text)
            | (ColumnType::Boolean, ColumnType::Text)
            | (ColumnType::Timestamp, ColumnType::Text)
            | (ColumnType::Json, ColumnType::Text)
    )
}

/// Analyze a set of proposed additions against the existing columns.
///
/// Name collisions are checked against the existing set and between the
/// proposed additions themselves.
pub fn analyze_additions(existing: &[SchemaColumn], additions: &[SchemaColumn]) -> AdditionImpact {
    let mut impact = AdditionImpact::default();

    for (i, added) in additions.iter().enumerate() {
        let collides_existing = existing.iter().any(|c| c.name_matches(&added.name));
        let collides_sibling = additions[..i].iter().any(|c| c.name_matches(&added.name));

        if collides_existing || collides_sibling {
            impact.conflicts.push(ColumnConflict {
                column: added.name.clone(),
                message: format!("A column named '{}' already exists", added.name),
            });
            continue;
        }

        if added.is_required {
            impact.warnings.push(ImpactWarning::for_column(
                WarningKind::NewRequiredColumn,
                &added.name,
                format!(
                    "Column '{}' is required but rows already mapped through the \
                     column-mapping service have no value for it",
                    added.name
                ),
            ));
        }
        if added.is_primary_key {
            impact.warnings.push(ImpactWarning::for_column(
                WarningKind::NewPrimaryKeyColumn,
                &added.name,
                format!("Primary key column '{}' may not be unique across existing mapped rows", added.name),
            ));
        }
        if added.is_foreign_key {
            impact.warnings.push(ImpactWarning::for_column(
                WarningKind::NewForeignKeyColumn,
                &added.name,
                format!("Foreign key column '{}' has no values to resolve for existing mapped rows", added.name),
            ));
        }
    }

    impact
}

/// Analyze a proposed patch against the existing column.
pub fn analyze_update(existing: &SchemaColumn, patch: &ColumnPatch) -> UpdateImpact {
    let mut impact = UpdateImpact::default();

    if let Some(new_type) = patch.column_type {
        if !is_compatible_type_change(existing.column_type, new_type) {
            impact.breaking_changes.push(BreakingChange::IncompatibleTypeChange {
                column: existing.name.clone(),
                from: existing.column_type,
                to: new_type,
            });
        }
    }

    if patch.is_required == Some(true) && !existing.is_required {
        impact.warnings.push(ImpactWarning::for_column(
            WarningKind::ColumnBecomesRequired,
            &existing.name,
            format!(
                "Column '{}' becomes required; mapped rows without a value will fail validation",
                existing.name
            ),
        ));
    }

    if patch.is_primary_key == Some(true) && !existing.is_primary_key {
        impact.warnings.push(ImpactWarning::for_column(
            WarningKind::ColumnBecomesPrimaryKey,
            &existing.name,
            format!("Column '{}' becomes a primary key", existing.name),
        ));
    }

    if patch.is_foreign_key == Some(true) && !existing.is_foreign_key {
        impact.warnings.push(ImpactWarning::for_column(
            WarningKind::ColumnBecomesForeignKey,
            &existing.name,
            format!("Column '{}' becomes a foreign key", existing.name),
        ));
    }

    // Heuristic: more rules than before counts as "stricter". Exact
    // rule-subsumption semantics are not attempted.
    if let Some(ref rules) = patch.validation_rules {
        if rules.len() > existing.validation_rules.len() {
            impact.warnings.push(ImpactWarning::for_column(
                WarningKind::StricterValidationRules,
                &existing.name,
                format!(
                    "Column '{}' gains validation rules ({} -> {}); existing mapped rows may no longer pass",
                    existing.name,
                    existing.validation_rules.len(),
                    rules.len()
                ),
            ));
        }
    }

    impact
}

/// Analyze a proposed column removal.
///
/// A required column can never be removed directly; it must first be
/// demoted to optional (a new version) and removed in a later transaction.
pub fn analyze_removal(existing: &SchemaColumn) -> RemovalImpact {
    if existing.is_required {
        RemovalImpact {
            blocked: true,
            reason: Some(format!(
                "Column '{}' is required; demote it to optional before removing it",
                existing.name
            )),
        }
    } else {
        RemovalImpact {
            blocked: false,
            reason: None,
        }
    }
}
