//! Schema Transactions
//!
//! Controlled evolution of a global schema happens through staged
//! transactions. A caller begins a transaction against a schema, appends
//! operations to its log, then either commits (the whole log is
//! validated and materialized as a new schema version) or rolls back
//! (the log is discarded, the schema was never touched).
//!
//! The state machine is persisted, not in-process: each step arrives as
//! an independent request, so a transaction must be resumable and
//! inspectable from its stored row alone.
//!
//! # Commit contract
//!
//! Commit replays the log in append order over an in-memory working copy
//! of the column set, running impact analysis against the *working*
//! state so later operations see earlier ones' effects. If any conflict
//! or breaking change is found anywhere in the log, nothing is
//! persisted: the schema is untouched and the transaction stays pending
//! for the caller to inspect or discard. Otherwise the working copy
//! becomes a new immutable schema version. There is no partial
//! application, ever.

use crate::impact::{
    analyze_additions, analyze_removal, analyze_update, BreakingChange, ColumnConflict,
    ImpactWarning,
};
use crate::model::{ColumnPatch, GlobalSchema, SchemaColumn};
use crate::store::{SchemaStore, StoreError};
use crate::versioning;
use chrono::{DateTime, Utc};
use gridline_ids::{SchemaId, TransactionId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur in the transaction state machine.
///
/// Business-rule findings (conflicts, breaking changes) are not errors:
/// they are reported inside [`CommitOutcome`].
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Schema not found: {0}")]
    SchemaNotFound(SchemaId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("User {user_id} does not own schema {schema_id}")]
    Forbidden {
        user_id: UserId,
        schema_id: SchemaId,
    },

    #[error("Transaction {0} is already {1}")]
    AlreadyTerminal(TransactionId, TransactionStatus),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Lifecycle state of a transaction. Terminal once committed or rolled
/// back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Committed,
    RolledBack,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "committed" => Ok(TransactionStatus::Committed),
            "rolled_back" => Ok(TransactionStatus::RolledBack),
            _ => Err(format!("Unknown transaction status: '{}'", s)),
        }
    }
}

/// Evaluation state of one staged operation. Transitions only during
/// commit evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Applied,
    Failed,
}

/// A staged schema mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Add a new column
    AddColumn { column: SchemaColumn },

    /// Remove an existing column
    RemoveColumn { column_name: String },

    /// Patch an existing column
    ModifyColumn {
        column_name: String,
        patch: ColumnPatch,
    },

    /// Update schema-level fields
    UpdateSchema {
        name: Option<String>,
        description: Option<String>,
    },
}

impl OperationKind {
    /// The column this operation targets, if it targets one.
    pub fn target(&self) -> Option<&str> {
        match self {
            OperationKind::AddColumn { column } => Some(&column.name),
            OperationKind::RemoveColumn { column_name } => Some(column_name),
            OperationKind::ModifyColumn { column_name, .. } => Some(column_name),
            OperationKind::UpdateSchema { .. } => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::AddColumn { column } => {
                write!(f, "Add column '{}' ({})", column.name, column.column_type)
            }
            OperationKind::RemoveColumn { column_name } => {
                write!(f, "Remove column '{}'", column_name)
            }
            OperationKind::ModifyColumn { column_name, .. } => {
                write!(f, "Modify column '{}'", column_name)
            }
            OperationKind::UpdateSchema { .. } => {
                write!(f, "Update schema metadata")
            }
        }
    }
}

/// One entry in a transaction's append-only operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedOperation {
    pub kind: OperationKind,
    pub status: OperationStatus,
}

impl StagedOperation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            status: OperationStatus::Pending,
        }
    }
}

/// A staged-mutation transaction against one schema lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaTransaction {
    pub id: TransactionId,

    /// Pinned to the schema id live when the transaction began
    pub schema_id: SchemaId,

    /// Must match the schema owner to mutate
    pub user_id: UserId,

    pub status: TransactionStatus,

    /// Append-only; replayed strictly in this order at commit
    pub operations: Vec<StagedOperation>,

    pub started_at: DateTime<Utc>,

    /// Set exactly once, on commit or rollback
    pub completed_at: Option<DateTime<Utc>>,
}

impl SchemaTransaction {
    /// Create a fresh pending transaction with an empty log.
    pub fn begin(schema_id: SchemaId, user_id: UserId) -> Self {
        Self {
            id: TransactionId::new(),
            schema_id,
            user_id,
            status: TransactionStatus::Pending,
            operations: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

/// Result of a commit call.
///
/// A rejected commit is a normal outcome, not an error: the caller is
/// told exactly which items blocked it, the schema is untouched, and the
/// transaction stays pending so the log can be edited and retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub committed: bool,

    pub message: String,

    /// The new schema version (present only when committed)
    pub schema: Option<GlobalSchema>,

    pub conflicts: Vec<ColumnConflict>,

    pub breaking_changes: Vec<BreakingChange>,

    /// Non-blocking findings, surfaced on both outcomes
    pub warnings: Vec<ImpactWarning>,
}

/// The begin/add_operation/commit/rollback state machine.
#[derive(Clone)]
pub struct TransactionManager {
    store: SchemaStore,
}

impl TransactionManager {
    pub fn new(store: SchemaStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SchemaStore {
        &self.store
    }

    /// Begin a transaction against a schema.
    ///
    /// The schema must exist and be owned by `user_id`.
    pub async fn begin(
        &self,
        schema_id: &SchemaId,
        user_id: &UserId,
    ) -> Result<SchemaTransaction, TransactionError> {
        let schema = self
            .store
            .get_schema(schema_id)
            .await?
            .ok_or_else(|| TransactionError::SchemaNotFound(schema_id.clone()))?;

        if schema.owner_id != *user_id {
            return Err(TransactionError::Forbidden {
                user_id: user_id.clone(),
                schema_id: schema_id.clone(),
            });
        }

        let txn = SchemaTransaction::begin(schema_id.clone(), user_id.clone());
        self.store.save_transaction(&txn).await?;

        info!(transaction_id = %txn.id, schema_id = %schema_id, "Transaction started");
        Ok(txn)
    }

    /// Append an operation to a pending transaction's log.
    ///
    /// Only the operation's shape is validated here. Impact is evaluated
    /// at commit time against the cumulative effect of the whole log,
    /// since operations may interact (add column X, then modify X).
    pub async fn add_operation(
        &self,
        transaction_id: &TransactionId,
        kind: OperationKind,
    ) -> Result<SchemaTransaction, TransactionError> {
        let mut txn = self.load(transaction_id).await?;

        if !txn.is_pending() {
            return Err(TransactionError::AlreadyTerminal(txn.id, txn.status));
        }

        validate_operation(&kind)?;

        txn.operations.push(StagedOperation::new(kind));
        self.store.save_transaction(&txn).await?;

        Ok(txn)
    }

    /// Commit a pending transaction.
    ///
    /// All-or-nothing: either every operation applies and a new schema
    /// version is persisted, or nothing is.
    pub async fn commit(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<CommitOutcome, TransactionError> {
        let mut txn = self.load(transaction_id).await?;

        if !txn.is_pending() {
            return Err(TransactionError::AlreadyTerminal(txn.id, txn.status));
        }

        // The live schema as of this commit call. A concurrent commit on
        // the same lineage is not visible here unless it already saved.
        let schema = self
            .store
            .get_schema(&txn.schema_id)
            .await?
            .ok_or_else(|| TransactionError::SchemaNotFound(txn.schema_id.clone()))?;

        let evaluation = replay(&schema, &mut txn.operations);

        if !evaluation.conflicts.is_empty() || !evaluation.breaking_changes.is_empty() {
            // Persist the evaluation marks for inspection, but the
            // transaction stays pending and the schema is untouched.
            self.store.save_transaction(&txn).await?;

            warn!(
                transaction_id = %txn.id,
                conflicts = evaluation.conflicts.len(),
                breaking = evaluation.breaking_changes.len(),
                "Commit rejected"
            );

            return Ok(CommitOutcome {
                committed: false,
                message: format!(
                    "Commit rejected: {} conflict(s), {} breaking change(s)",
                    evaluation.conflicts.len(),
                    evaluation.breaking_changes.len()
                ),
                schema: None,
                conflicts: evaluation.conflicts,
                breaking_changes: evaluation.breaking_changes,
                warnings: evaluation.warnings,
            });
        }

        let mut new_schema = versioning::next_version(&schema, evaluation.columns);
        new_schema.name = evaluation.name;
        new_schema.description = evaluation.description;

        self.store.save_schema(&new_schema).await?;

        txn.status = TransactionStatus::Committed;
        txn.completed_at = Some(Utc::now());
        self.store.save_transaction(&txn).await?;

        info!(
            transaction_id = %txn.id,
            schema_id = %new_schema.id,
            version = new_schema.version,
            "Transaction committed"
        );

        Ok(CommitOutcome {
            committed: true,
            message: format!("Schema committed as version {}", new_schema.version),
            schema: Some(new_schema),
            conflicts: Vec::new(),
            breaking_changes: Vec::new(),
            warnings: evaluation.warnings,
        })
    }

    /// Roll back a pending transaction.
    ///
    /// The schema was never touched, so this is pure bookkeeping; no
    /// compensating writes exist. Rolling back a terminal transaction
    /// fails and changes nothing.
    pub async fn rollback(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<SchemaTransaction, TransactionError> {
        let mut txn = self.load(transaction_id).await?;

        if !txn.is_pending() {
            return Err(TransactionError::AlreadyTerminal(txn.id, txn.status));
        }

        txn.status = TransactionStatus::RolledBack;
        txn.completed_at = Some(Utc::now());
        self.store.save_transaction(&txn).await?;

        info!(transaction_id = %txn.id, "Transaction rolled back");
        Ok(txn)
    }

    /// Read a transaction without side effects.
    pub async fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<SchemaTransaction>, TransactionError> {
        Ok(self.store.get_transaction(transaction_id).await?)
    }

    /// List transactions targeting a schema, newest first.
    pub async fn transactions_for_schema(
        &self,
        schema_id: &SchemaId,
    ) -> Result<Vec<SchemaTransaction>, TransactionError> {
        Ok(self.store.transactions_for_schema(schema_id).await?)
    }

    async fn load(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<SchemaTransaction, TransactionError> {
        self.store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| TransactionError::TransactionNotFound(transaction_id.clone()))
    }
}

/// Shape validation applied before an operation reaches the log.
fn validate_operation(kind: &OperationKind) -> Result<(), TransactionError> {
    match kind {
        OperationKind::AddColumn { column } => {
            if column.name.trim().is_empty() {
                return Err(TransactionError::InvalidOperation(
                    "Column name cannot be empty".into(),
                ));
            }
            if column.is_foreign_key
                && (column.references_table.is_none() || column.references_column.is_none())
            {
                return Err(TransactionError::InvalidOperation(format!(
                    "Foreign key column '{}' must reference a table and column",
                    column.name
                )));
            }
        }
        OperationKind::RemoveColumn { column_name } => {
            if column_name.trim().is_empty() {
                return Err(TransactionError::InvalidOperation(
                    "Removal target cannot be empty".into(),
                ));
            }
        }
        OperationKind::ModifyColumn { column_name, patch } => {
            if column_name.trim().is_empty() {
                return Err(TransactionError::InvalidOperation(
                    "Modification target cannot be empty".into(),
                ));
            }
            if patch.is_empty() {
                return Err(TransactionError::InvalidOperation(format!(
                    "Patch for column '{}' changes nothing",
                    column_name
                )));
            }
            if matches!(patch.name.as_deref(), Some(name) if name.trim().is_empty()) {
                return Err(TransactionError::InvalidOperation(
                    "Column cannot be renamed to an empty name".into(),
                ));
            }
            if patch.is_foreign_key == Some(true)
                && (patch.references_table.is_none() || patch.references_column.is_none())
            {
                return Err(TransactionError::InvalidOperation(format!(
                    "Promoting '{}' to foreign key requires a table and column reference",
                    column_name
                )));
            }
        }
        OperationKind::UpdateSchema { name, description } => {
            if name.is_none() && description.is_none() {
                return Err(TransactionError::InvalidOperation(
                    "Schema update changes nothing".into(),
                ));
            }
            if matches!(name.as_deref(), Some(n) if n.trim().is_empty()) {
                return Err(TransactionError::InvalidOperation(
                    "Schema name cannot be empty".into(),
                ));
            }
        }
    }

    Ok(())
}

/// Outcome of replaying an operation log over a schema's column set.
struct Evaluation {
    columns: Vec<SchemaColumn>,
    name: String,
    description: Option<String>,
    conflicts: Vec<ColumnConflict>,
    breaking_changes: Vec<BreakingChange>,
    warnings: Vec<ImpactWarning>,
}

/// Replay the log in order over a working copy, marking each operation's
/// evaluation status. Later operations see earlier ones' effects.
fn replay(schema: &GlobalSchema, operations: &mut [StagedOperation]) -> Evaluation {
    let mut working = schema.columns.clone();
    let mut name = schema.name.clone();
    let mut description = schema.description.clone();
    let mut conflicts = Vec::new();
    let mut breaking_changes = Vec::new();
    let mut warnings = Vec::new();

    for op in operations.iter_mut() {
        let applied = match &op.kind {
            OperationKind::AddColumn { column } => {
                let impact = analyze_additions(&working, std::slice::from_ref(column));
                warnings.extend(impact.warnings);
                if impact.conflicts.is_empty() {
                    working.push(column.clone());
                    true
                } else {
                    conflicts.extend(impact.conflicts);
                    false
                }
            }

            OperationKind::RemoveColumn { column_name } => {
                match working.iter().position(|c| c.name_matches(column_name)) {
                    None => {
                        breaking_changes.push(BreakingChange::UnknownColumn {
                            column: column_name.clone(),
                        });
                        false
                    }
                    Some(pos) => {
                        let impact = analyze_removal(&working[pos]);
                        if impact.blocked {
                            breaking_changes.push(BreakingChange::RequiredColumnRemoval {
                                column: working[pos].name.clone(),
                            });
                            false
                        } else {
                            working.remove(pos);
                            true
                        }
                    }
                }
            }

            OperationKind::ModifyColumn { column_name, patch } => {
                match working.iter().position(|c| c.name_matches(column_name)) {
                    None => {
                        breaking_changes.push(BreakingChange::UnknownColumn {
                            column: column_name.clone(),
                        });
                        false
                    }
                    Some(pos) => {
                        let rename_collision = patch.name.as_deref().map(|new_name| {
                            working
                                .iter()
                                .enumerate()
                                .any(|(i, c)| i != pos && c.name_matches(new_name))
                        });

                        if rename_collision == Some(true) {
                            let new_name = patch.name.clone().unwrap_or_default();
                            conflicts.push(ColumnConflict {
                                column: new_name.clone(),
                                message: format!("A column named '{}' already exists", new_name),
                            });
                            false
                        } else {
                            let impact = analyze_update(&working[pos], patch);
                            warnings.extend(impact.warnings);
                            if impact.breaking_changes.is_empty() {
                                working[pos] = patch.apply_to(&working[pos]);
                                true
                            } else {
                                breaking_changes.extend(impact.breaking_changes);
                                false
                            }
                        }
                    }
                }
            }

            OperationKind::UpdateSchema {
                name: new_name,
                description: new_description,
            } => {
                if let Some(n) = new_name {
                    name = n.clone();
                }
                if let Some(d) = new_description {
                    description = Some(d.clone());
                }
                true
            }
        };

        op.status = if applied {
            OperationStatus::Applied
        } else {
            OperationStatus::Failed
        };
    }

    Evaluation {
        columns: working,
        name,
        description,
        conflicts,
        breaking_changes,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impact::WarningKind;
    use crate::model::ColumnType;

    async fn setup(columns: Vec<SchemaColumn>) -> (TransactionManager, GlobalSchema, UserId) {
        let store = SchemaStore::in_memory().await.unwrap();
        let owner = UserId::new();
        let schema = GlobalSchema::new(owner.clone(), "uploads", columns);
        store.save_schema(&schema).await.unwrap();
        (TransactionManager::new(store), schema, owner)
    }

    fn add(column: SchemaColumn) -> OperationKind {
        OperationKind::AddColumn { column }
    }

    fn remove(name: &str) -> OperationKind {
        OperationKind::RemoveColumn {
            column_name: name.into(),
        }
    }

    fn modify(name: &str, patch: ColumnPatch) -> OperationKind {
        OperationKind::ModifyColumn {
            column_name: name.into(),
            patch,
        }
    }

    #[tokio::test]
    async fn begin_requires_existing_schema_and_owner() {
        let (manager, schema, owner) = setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        assert!(txn.is_pending());
        assert!(txn.operations.is_empty());

        let err = manager.begin(&SchemaId::new(), &owner).await.unwrap_err();
        assert!(matches!(err, TransactionError::SchemaNotFound(_)));

        let err = manager.begin(&schema.id, &UserId::new()).await.unwrap_err();
        assert!(matches!(err, TransactionError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn add_operation_validates_shape() {
        let (manager, schema, owner) = setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;
        let txn = manager.begin(&schema.id, &owner).await.unwrap();

        let err = manager
            .add_operation(&txn.id, add(SchemaColumn::required("", ColumnType::Text)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::InvalidOperation(_)));

        let err = manager
            .add_operation(&txn.id, modify("id", ColumnPatch::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::InvalidOperation(_)));

        let mut dangling = SchemaColumn::optional("ref", ColumnType::Text);
        dangling.is_foreign_key = true;
        let err = manager.add_operation(&txn.id, add(dangling)).await.unwrap_err();
        assert!(matches!(err, TransactionError::InvalidOperation(_)));

        let err = manager
            .add_operation(
                &txn.id,
                OperationKind::UpdateSchema {
                    name: None,
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::InvalidOperation(_)));

        // None of the rejects reached the log.
        let loaded = manager.get_transaction(&txn.id).await.unwrap().unwrap();
        assert!(loaded.operations.is_empty());
    }

    #[tokio::test]
    async fn removing_required_column_is_rejected() {
        // Scenario: schema has a required email column; removal must fail
        // and leave the column list unchanged.
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("email", ColumnType::Text)]).await;
        let before = schema.content_hash();

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager.add_operation(&txn.id, remove("email")).await.unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        assert!(!outcome.committed);
        assert!(outcome
            .breaking_changes
            .iter()
            .any(|b| matches!(b, BreakingChange::RequiredColumnRemoval { column } if column == "email")));

        let live = manager.store().get_schema(&schema.id).await.unwrap().unwrap();
        assert_eq!(live.content_hash(), before);
        assert_eq!(live.columns.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_addition_names_the_conflict() {
        let (manager, schema, owner) = setup(vec![
            SchemaColumn::required("id", ColumnType::Text),
            SchemaColumn::required("name", ColumnType::Text),
        ])
        .await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager
            .add_operation(&txn.id, add(SchemaColumn::optional("id", ColumnType::Integer)))
            .await
            .unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        assert!(!outcome.committed);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].column, "id");
    }

    #[tokio::test]
    async fn widening_modify_commits_new_version() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("age", ColumnType::Integer)]).await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager
            .add_operation(&txn.id, modify("age", ColumnPatch::new().retype(ColumnType::Numeric)))
            .await
            .unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        assert!(outcome.committed);

        let new_schema = outcome.schema.unwrap();
        assert_eq!(new_schema.version, schema.version + 1);
        assert_eq!(new_schema.previous_version_id, Some(schema.id.clone()));
        assert_eq!(new_schema.columns[0].column_type, ColumnType::Numeric);

        // The old version is history, retrievable unchanged by its id.
        let old = manager.store().get_schema(&schema.id).await.unwrap().unwrap();
        assert_eq!(old.content_hash(), schema.content_hash());
        assert_eq!(old.columns[0].column_type, ColumnType::Integer);
    }

    #[tokio::test]
    async fn narrowing_modify_is_breaking() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("age", ColumnType::Integer)]).await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager
            .add_operation(&txn.id, modify("age", ColumnPatch::new().retype(ColumnType::Boolean)))
            .await
            .unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        assert!(!outcome.committed);
        assert!(outcome
            .breaking_changes
            .iter()
            .any(|b| b.column() == "age"));
    }

    #[tokio::test]
    async fn failed_commit_leaves_schema_untouched_and_transaction_pending() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("email", ColumnType::Text)]).await;
        let before = manager
            .store()
            .get_schema(&schema.id)
            .await
            .unwrap()
            .unwrap()
            .content_hash();

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        // A valid operation followed by a breaking one: nothing applies.
        manager
            .add_operation(&txn.id, add(SchemaColumn::optional("notes", ColumnType::Text)))
            .await
            .unwrap();
        manager.add_operation(&txn.id, remove("email")).await.unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        assert!(!outcome.committed);

        let live = manager.store().get_schema(&schema.id).await.unwrap().unwrap();
        assert_eq!(live.content_hash(), before);

        let loaded = manager.get_transaction(&txn.id).await.unwrap().unwrap();
        assert!(loaded.is_pending());
        assert_eq!(loaded.operations[0].status, OperationStatus::Applied);
        assert_eq!(loaded.operations[1].status, OperationStatus::Failed);
        assert!(loaded.completed_at.is_none());
    }

    #[tokio::test]
    async fn operations_interact_within_one_log() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager
            .add_operation(&txn.id, add(SchemaColumn::optional("score", ColumnType::Integer)))
            .await
            .unwrap();
        // Modifies the column added one step earlier.
        manager
            .add_operation(&txn.id, modify("score", ColumnPatch::new().retype(ColumnType::Numeric)))
            .await
            .unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        assert!(outcome.committed);

        let new_schema = outcome.schema.unwrap();
        let score = new_schema.find_column("score").unwrap();
        assert_eq!(score.column_type, ColumnType::Numeric);
    }

    #[tokio::test]
    async fn add_then_remove_cancels_out() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager
            .add_operation(&txn.id, add(SchemaColumn::optional("tmp", ColumnType::Text)))
            .await
            .unwrap();
        manager.add_operation(&txn.id, remove("tmp")).await.unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        assert!(outcome.committed);
        assert!(!outcome.schema.unwrap().has_column("tmp"));
    }

    #[tokio::test]
    async fn unknown_modify_target_is_reported() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager
            .add_operation(&txn.id, modify("ghost", ColumnPatch::new().require(true)))
            .await
            .unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        assert!(!outcome.committed);
        assert!(outcome
            .breaking_changes
            .iter()
            .any(|b| matches!(b, BreakingChange::UnknownColumn { column } if column == "ghost")));
    }

    #[tokio::test]
    async fn rename_collision_is_a_conflict() {
        let (manager, schema, owner) = setup(vec![
            SchemaColumn::required("id", ColumnType::Text),
            SchemaColumn::optional("uid", ColumnType::Text),
        ])
        .await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager
            .add_operation(&txn.id, modify("uid", ColumnPatch::new().rename("ID")))
            .await
            .unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        assert!(!outcome.committed);
        assert_eq!(outcome.conflicts[0].column, "ID");
    }

    #[tokio::test]
    async fn update_schema_metadata_lands_on_new_version() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager
            .add_operation(
                &txn.id,
                OperationKind::UpdateSchema {
                    name: Some("uploads_v2".into()),
                    description: Some("Renamed during cleanup".into()),
                },
            )
            .await
            .unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        let new_schema = outcome.schema.unwrap();
        assert_eq!(new_schema.name, "uploads_v2");
        assert_eq!(new_schema.description.as_deref(), Some("Renamed during cleanup"));

        let old = manager.store().get_schema(&schema.id).await.unwrap().unwrap();
        assert_eq!(old.name, "uploads");
    }

    #[tokio::test]
    async fn commit_surfaces_warnings_on_success() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager
            .add_operation(&txn.id, add(SchemaColumn::required("tenant", ColumnType::Text)))
            .await
            .unwrap();

        let outcome = manager.commit(&txn.id).await.unwrap();
        assert!(outcome.committed);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::NewRequiredColumn));
    }

    #[tokio::test]
    async fn rollback_is_terminal_and_touches_nothing() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;
        let before = schema.content_hash();

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager.add_operation(&txn.id, remove("id")).await.unwrap();

        let rolled = manager.rollback(&txn.id).await.unwrap();
        assert_eq!(rolled.status, TransactionStatus::RolledBack);
        assert!(rolled.completed_at.is_some());

        // Second rollback fails; the schema never changes either way.
        let err = manager.rollback(&txn.id).await.unwrap_err();
        assert!(matches!(
            err,
            TransactionError::AlreadyTerminal(_, TransactionStatus::RolledBack)
        ));

        let live = manager.store().get_schema(&schema.id).await.unwrap().unwrap();
        assert_eq!(live.content_hash(), before);
    }

    #[tokio::test]
    async fn terminal_transactions_reject_all_mutation() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        manager.rollback(&txn.id).await.unwrap();

        let err = manager
            .add_operation(&txn.id, add(SchemaColumn::optional("x", ColumnType::Text)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::AlreadyTerminal(..)));

        let err = manager.commit(&txn.id).await.unwrap_err();
        assert!(matches!(err, TransactionError::AlreadyTerminal(..)));
    }

    #[tokio::test]
    async fn committing_empty_log_produces_identical_successor() {
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;

        let txn = manager.begin(&schema.id, &owner).await.unwrap();
        let outcome = manager.commit(&txn.id).await.unwrap();

        assert!(outcome.committed);
        let new_schema = outcome.schema.unwrap();
        assert_eq!(new_schema.version, 2);
        assert_eq!(new_schema.columns, schema.columns);
    }

    #[tokio::test]
    async fn concurrent_commits_do_not_see_each_other() {
        // Documented gap: two transactions begun against the same schema
        // both validate against the live row at their own commit time.
        // Each is individually valid; together they produce divergent
        // version-2 siblings neither committer inspected.
        let (manager, schema, owner) =
            setup(vec![SchemaColumn::required("id", ColumnType::Text)]).await;

        let t1 = manager.begin(&schema.id, &owner).await.unwrap();
        let t2 = manager.begin(&schema.id, &owner).await.unwrap();

        manager
            .add_operation(&t1.id, add(SchemaColumn::optional("alpha", ColumnType::Text)))
            .await
            .unwrap();
        manager
            .add_operation(&t2.id, add(SchemaColumn::optional("alpha", ColumnType::Text)))
            .await
            .unwrap();

        let first = manager.commit(&t1.id).await.unwrap();
        assert!(first.committed);

        // With isolation this would conflict on 'alpha'; instead it also
        // commits, validated against the original version-1 row.
        let second = manager.commit(&t2.id).await.unwrap();
        assert!(second.committed);
        assert!(second.conflicts.is_empty());

        let s1 = first.schema.unwrap();
        let s2 = second.schema.unwrap();
        assert_ne!(s1.id, s2.id);
        assert_eq!(s1.version, 2);
        assert_eq!(s2.version, 2);
        assert_eq!(s1.previous_version_id, Some(schema.id.clone()));
        assert_eq!(s2.previous_version_id, Some(schema.id.clone()));
    }
}
