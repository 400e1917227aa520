//! Versioning Policy
//!
//! Decides how a mutation materializes: an in-place update bumps
//! `updated_at` and nothing else, while a "new version" produces a fresh
//! immutable snapshot with `version + 1` and a weak back-reference to its
//! predecessor. The version chain is a keyed store plus a linked-list
//! walk, never an in-memory object graph with live back-pointers.

use crate::model::{GlobalSchema, SchemaColumn};
use crate::store::{SchemaStore, StoreError};
use chrono::Utc;
use gridline_ids::{ProjectId, SchemaId};

/// Materialize the successor snapshot of `base` with the given columns.
///
/// The base row is left untouched in the store; the successor gets a
/// fresh id, `version + 1`, and a back-reference. Activation never moves
/// implicitly: the successor starts inactive and is activated through
/// [`set_active`] only.
pub fn next_version(base: &GlobalSchema, columns: Vec<SchemaColumn>) -> GlobalSchema {
    let now = Utc::now();
    GlobalSchema {
        id: SchemaId::new(),
        owner_id: base.owner_id.clone(),
        project_id: base.project_id.clone(),
        name: base.name.clone(),
        description: base.description.clone(),
        columns,
        version: base.version + 1,
        previous_version_id: Some(base.id.clone()),
        is_active: false,
        created_at: now,
        updated_at: now,
    }
}

/// Activate one schema within a project, deactivating every sibling.
///
/// This is the only place the single-active-schema invariant is enforced;
/// the store applies both steps as one SQL transaction.
pub async fn set_active(
    store: &SchemaStore,
    project_id: &ProjectId,
    schema_id: &SchemaId,
) -> Result<(), StoreError> {
    store.set_active(project_id, schema_id).await
}

/// Walk the lineage from `head` back through `previous_version_id`,
/// newest first. A dangling back-reference ends the walk: it is a weak
/// reference, and an explicitly deleted ancestor is not an error.
pub async fn version_history(
    store: &SchemaStore,
    head: &SchemaId,
) -> Result<Vec<GlobalSchema>, StoreError> {
    let mut history = Vec::new();
    let mut cursor = Some(head.clone());

    while let Some(id) = cursor {
        let Some(schema) = store.get_schema(&id).await? else {
            break;
        };
        cursor = schema.previous_version_id.clone();
        history.push(schema);
    }

    Ok(history)
}
