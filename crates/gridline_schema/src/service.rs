//! Schema Service
//!
//! The CRUD facade the API layer consumes. Ownership is enforced here,
//! snapshot shape is validated before anything is persisted, and every
//! expected business condition comes back as a typed failure rather than
//! a panic or a stringly error.

use crate::model::{validate_columns, GlobalSchema, SchemaColumn, SchemaShapeError};
use crate::store::{SchemaStore, StoreError};
use crate::versioning;
use chrono::Utc;
use gridline_ids::{ProjectId, SchemaId, UserId};
use thiserror::Error;
use tracing::info;

/// Errors surfaced by the schema CRUD surface.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Schema not found: {0}")]
    SchemaNotFound(SchemaId),

    #[error("User {user_id} does not own schema {schema_id}")]
    Forbidden {
        user_id: UserId,
        schema_id: SchemaId,
    },

    #[error("Invalid schema: {0}")]
    InvalidSchema(#[from] SchemaShapeError),
}

/// Payload for creating the first version of a schema lineage.
#[derive(Debug, Clone)]
pub struct CreateSchemaRequest {
    pub owner_id: UserId,
    pub project_id: Option<ProjectId>,
    pub name: String,
    pub description: Option<String>,
    pub columns: Vec<SchemaColumn>,
}

impl CreateSchemaRequest {
    pub fn new(owner_id: UserId, name: impl Into<String>, columns: Vec<SchemaColumn>) -> Self {
        Self {
            owner_id,
            project_id: None,
            name: name.into(),
            description: None,
            columns,
        }
    }

    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Partial schema-level update. Absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SchemaUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub columns: Option<Vec<SchemaColumn>>,
}

/// Direct schema CRUD, bypassing the transaction log.
///
/// The transaction manager is the way to stage interacting mutations;
/// this service covers the plain create/read/update/delete surface plus
/// activation.
#[derive(Clone)]
pub struct SchemaService {
    store: SchemaStore,
}

impl SchemaService {
    pub fn new(store: SchemaStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SchemaStore {
        &self.store
    }

    /// Create version 1 of a new lineage.
    pub async fn create_schema(
        &self,
        request: CreateSchemaRequest,
    ) -> Result<GlobalSchema, ServiceError> {
        if request.name.trim().is_empty() {
            return Err(SchemaShapeError::EmptySchemaName.into());
        }
        validate_columns(&request.columns)?;

        let mut schema = GlobalSchema::new(request.owner_id, request.name, request.columns);
        schema.project_id = request.project_id;
        schema.description = request.description;

        self.store.save_schema(&schema).await?;
        info!(schema_id = %schema.id, name = %schema.name, "Schema created");

        Ok(schema)
    }

    /// Get a schema by id, as a typed failure when absent.
    pub async fn get_schema(&self, id: &SchemaId) -> Result<GlobalSchema, ServiceError> {
        self.store
            .get_schema(id)
            .await?
            .ok_or_else(|| ServiceError::SchemaNotFound(id.clone()))
    }

    /// List schemas in a project, optionally only the active one.
    pub async fn list_for_project(
        &self,
        project_id: &ProjectId,
        active_only: bool,
    ) -> Result<Vec<GlobalSchema>, ServiceError> {
        Ok(self.store.list_for_project(project_id, active_only).await?)
    }

    /// Update a schema in place, or as a new immutable version.
    ///
    /// In-place updates bump `updated_at` and keep id/version; new-version
    /// updates leave the base row untouched and return the successor.
    pub async fn update_schema(
        &self,
        id: &SchemaId,
        user_id: &UserId,
        update: SchemaUpdate,
        as_new_version: bool,
    ) -> Result<GlobalSchema, ServiceError> {
        let schema = self.get_schema(id).await?;
        self.check_owner(&schema, user_id)?;

        if matches!(update.name.as_deref(), Some(n) if n.trim().is_empty()) {
            return Err(SchemaShapeError::EmptySchemaName.into());
        }
        if let Some(ref columns) = update.columns {
            validate_columns(columns)?;
        }

        if as_new_version {
            let columns = update.columns.unwrap_or_else(|| schema.columns.clone());
            let mut successor = versioning::next_version(&schema, columns);
            if let Some(name) = update.name {
                successor.name = name;
            }
            if let Some(description) = update.description {
                successor.description = Some(description);
            }

            self.store.save_schema(&successor).await?;
            info!(
                schema_id = %successor.id,
                version = successor.version,
                "Schema updated as new version"
            );
            Ok(successor)
        } else {
            let mut updated = schema;
            if let Some(name) = update.name {
                updated.name = name;
            }
            if let Some(description) = update.description {
                updated.description = Some(description);
            }
            if let Some(columns) = update.columns {
                updated.columns = columns;
            }
            updated.updated_at = Utc::now();

            self.store.save_schema(&updated).await?;
            info!(schema_id = %updated.id, "Schema updated in place");
            Ok(updated)
        }
    }

    /// Delete a schema row. The only way a historical version leaves the
    /// store.
    pub async fn delete_schema(&self, id: &SchemaId, user_id: &UserId) -> Result<(), ServiceError> {
        let schema = self.get_schema(id).await?;
        self.check_owner(&schema, user_id)?;

        self.store.delete_schema(id).await?;
        info!(schema_id = %id, "Schema deleted");
        Ok(())
    }

    /// Activate a schema within its project, deactivating all siblings.
    pub async fn set_active(
        &self,
        project_id: &ProjectId,
        schema_id: &SchemaId,
        user_id: &UserId,
    ) -> Result<(), ServiceError> {
        let schema = self.get_schema(schema_id).await?;
        self.check_owner(&schema, user_id)?;

        if schema.project_id.as_ref() != Some(project_id) {
            return Err(ServiceError::SchemaNotFound(schema_id.clone()));
        }

        versioning::set_active(&self.store, project_id, schema_id).await?;
        Ok(())
    }

    /// Walk the version chain from `id` back to the first version.
    pub async fn version_history(
        &self,
        id: &SchemaId,
    ) -> Result<Vec<GlobalSchema>, ServiceError> {
        Ok(versioning::version_history(&self.store, id).await?)
    }

    fn check_owner(&self, schema: &GlobalSchema, user_id: &UserId) -> Result<(), ServiceError> {
        if schema.owner_id != *user_id {
            return Err(ServiceError::Forbidden {
                user_id: user_id.clone(),
                schema_id: schema.id.clone(),
            });
        }
        Ok(())
    }
}
