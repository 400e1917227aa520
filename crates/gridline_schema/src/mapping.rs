//! Column Mapping Collaborator
//!
//! File columns are mapped onto global schema columns by an external
//! service. The engine never calls it directly: impact warnings are
//! written assuming such a collaborator exists and may hold stale
//! mappings after a committed breaking change. This trait reserves the
//! integration point for a real implementation layered above the core.

use gridline_ids::ColumnId;

/// External service that knows which file columns are mapped onto a
/// schema column.
pub trait ColumnMappingCollaborator: Send + Sync {
    /// Number of file mappings currently bound to the column. Used by
    /// callers to enrich impact warnings; a stale count is acceptable.
    fn mapped_file_count(&self, column_id: &ColumnId) -> usize;
}

/// Collaborator for deployments without a mapping service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMappings;

impl ColumnMappingCollaborator for NoMappings {
    fn mapped_file_count(&self, _column_id: &ColumnId) -> usize {
        0
    }
}
