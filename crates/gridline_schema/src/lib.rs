//! Global Schema Engine
//!
//! # Philosophy: stage, analyze, then commit
//!
//! A global schema is the canonical column definition set that uploaded
//! files are mapped onto. It never changes by accident:
//!
//! 1. **Stage**: a caller begins a transaction and appends operations
//!    (add/remove/modify column, schema-level update) to its log
//! 2. **Analyze**: at commit, the whole log is replayed over a working
//!    copy and every operation is impact-checked against the cumulative
//!    state
//! 3. **Commit**: a clean log materializes a new immutable schema
//!    version; any conflict or breaking change aborts with the schema
//!    untouched and the log intact
//! 4. **History**: superseded versions are never mutated; the lineage is
//!    a chain of back-references walkable from any head
//!
//! There is no partial application and no silent coercion. A commit that
//! would lose information for already-mapped data fails loudly, with the
//! specific offending items in the result.
//!
//! # Modules
//!
//! - [`model`]: Core types (GlobalSchema, SchemaColumn, ColumnType,
//!   validation rules)
//! - [`impact`]: Pure conflict/breaking-change/warning analysis
//! - [`transaction`]: The begin/add_operation/commit/rollback state
//!   machine
//! - [`versioning`]: New-version materialization and the version chain
//! - [`store`]: SQLite-backed persistence for schemas and transactions
//! - [`service`]: CRUD facade consumed by the API layer
//! - [`mapping`]: Reserved hook for the external column-mapping service

pub mod impact;
pub mod mapping;
pub mod model;
pub mod service;
pub mod store;
pub mod transaction;
pub mod versioning;

pub use model::*;
pub use store::{SchemaStore, StoreError};

// Re-export key types from the impact module
pub use impact::{
    AdditionImpact, BreakingChange, ColumnConflict, ImpactWarning, RemovalImpact, UpdateImpact,
    WarningKind,
};

// Re-export key types from the transaction module
pub use transaction::{
    CommitOutcome, OperationKind, OperationStatus, SchemaTransaction, StagedOperation,
    TransactionError, TransactionManager, TransactionStatus,
};

// Re-export the service surface
pub use service::{CreateSchemaRequest, SchemaService, SchemaUpdate, ServiceError};

// Re-export the mapping collaborator seam
pub use mapping::{ColumnMappingCollaborator, NoMappings};
